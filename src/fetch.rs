use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::average::RateAverager;
use crate::cache::AverageCache;
use crate::data::{RowFilter, Table, TableReader};
use crate::error::{PlotError, Result};
use crate::expr::{CompiledExpr, EvaluatorContext};
use crate::source::SourceKey;

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Monotone completion fraction in `[0, 1]`, shareable across threads.
#[derive(Debug, Default)]
pub struct Progress(AtomicU64);

impl Progress {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Raise the fraction to `value`; lower values are ignored.
    pub fn advance_to(&self, value: f64) {
        let value = value.clamp(0.0, 1.0);
        // bit patterns of non-negative floats order like the floats
        self.0.fetch_max(value.to_bits(), Ordering::Relaxed);
    }

    pub fn finish(&self) {
        self.advance_to(1.0);
    }

    pub fn is_done(&self) -> bool {
        self.get() >= 1.0
    }
}

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// Layer and parameter field an expression came from, for error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub layer: usize,
    pub field: String,
}

impl Origin {
    pub fn new(layer: usize, field: impl Into<String>) -> Self {
        Self {
            layer,
            field: field.into(),
        }
    }
}

/// Everything the layers sharing one source need from it.
#[derive(Debug, Clone)]
pub struct SourceRequest {
    pub key: SourceKey,
    /// Expressions to evaluate, each with the first layer that asked for it.
    pub expressions: BTreeMap<String, Origin>,
    /// One entry per layer reading the source; `None` for layers without cut.
    pub cuts: Vec<(Origin, Option<String>)>,
}

impl SourceRequest {
    pub fn new(key: SourceKey) -> Self {
        Self {
            key,
            expressions: BTreeMap::new(),
            cuts: Vec::new(),
        }
    }

    pub fn add_expression(&mut self, expr: &str, origin: Origin) {
        self.expressions.entry(expr.to_string()).or_insert(origin);
    }

    pub fn add_cut(&mut self, cut: Option<&str>, origin: Origin) {
        self.cuts.push((origin, cut.map(str::to_string)));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub values: Vec<f64>,
    pub unit: String,
}

/// Evaluated expressions of one source, one entry per surviving row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedSeries {
    pub columns: BTreeMap<String, Column>,
    /// Per-cut row masks, aligned with the columns.
    pub masks: BTreeMap<String, Vec<bool>>,
    /// Rows that passed the combined cut.
    pub rows: usize,
}

impl FetchedSeries {
    pub fn column(&self, expr: &str) -> Option<&Column> {
        self.columns.get(expr)
    }

    pub fn mask(&self, cut: &str) -> Option<&[bool]> {
        self.masks.get(cut).map(Vec::as_slice)
    }
}

// ---------------------------------------------------------------------------
// DataFetcher
// ---------------------------------------------------------------------------

/// Runs one pass over each requested source.
pub struct DataFetcher<R> {
    reader: R,
    cache: Option<AverageCache>,
    progress: Arc<Progress>,
}

impl<R: TableReader> DataFetcher<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            cache: None,
            progress: Progress::new(),
        }
    }

    pub fn with_cache(mut self, cache: AverageCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_progress(mut self, progress: Arc<Progress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    /// Fetch every source. Any failure aborts the whole request.
    pub fn fetch_all(&self, requests: &[SourceRequest]) -> Result<HashMap<SourceKey, FetchedSeries>> {
        let total = requests.len().max(1) as f64;
        let mut out = HashMap::with_capacity(requests.len());
        for (i, request) in requests.iter().enumerate() {
            log::debug!(
                "Fetching {} ({} expressions, {} cuts)",
                request.key,
                request.expressions.len(),
                request.cuts.len()
            );
            let series = self.fetch(request, i as f64 / total, 1.0 / total)?;
            out.insert(request.key.clone(), series);
        }
        self.progress.finish();
        Ok(out)
    }

    /// One pass over one source; progress moves from `start` by `share`.
    pub fn fetch(&self, request: &SourceRequest, start: f64, share: f64) -> Result<FetchedSeries> {
        let key = &request.key;
        let raw = self.reader.open(key)?;
        let table = if key.is_averaged() {
            self.average(key, raw, start, share * 0.5)?
        } else {
            raw
        };
        let eval_start = if key.is_averaged() { start + share * 0.5 } else { start };
        let eval_share = if key.is_averaged() { share * 0.5 } else { share };

        let mut ctx = EvaluatorContext::new(&table.column_names);

        let mut exprs = Vec::with_capacity(request.expressions.len());
        for (text, origin) in &request.expressions {
            let compiled = ctx
                .compile(text)
                .map_err(|e| e.in_layer(origin.layer, &origin.field))?;
            exprs.push((text.clone(), origin, compiled, Vec::with_capacity(table.len())));
        }

        let mut cuts: Vec<(String, &Origin, Arc<CompiledExpr>, Vec<bool>)> = Vec::new();
        for (origin, cut) in &request.cuts {
            let Some(text) = cut else { continue };
            if cuts.iter().any(|(t, ..)| t == text) {
                continue;
            }
            let compiled = ctx
                .compile(text)
                .map_err(|e| e.in_layer(origin.layer, &origin.field))?;
            cuts.push((text.clone(), origin, compiled, Vec::with_capacity(table.len())));
        }

        let filter = RowFilter::from_cuts(request.cuts.iter().map(|(_, c)| c.as_deref()), &mut ctx)?;

        let n = table.len().max(1) as f64;
        let mut kept = 0;
        for (i, row) in table.rows().enumerate() {
            if i % 10_000 == 0 {
                self.progress.advance_to(eval_start + eval_share * i as f64 / n);
            }
            if !filter.keep(&row)? {
                continue;
            }
            kept += 1;
            for (_, origin, compiled, values) in exprs.iter_mut() {
                values.push(
                    compiled
                        .eval_f64(&row)
                        .map_err(|e| e.in_layer(origin.layer, &origin.field))?,
                );
            }
            for (_, origin, compiled, mask) in cuts.iter_mut() {
                mask.push(
                    compiled
                        .eval_bool(&row)
                        .map_err(|e| e.in_layer(origin.layer, &origin.field))?,
                );
            }
        }
        self.progress.advance_to(eval_start + eval_share);
        log::debug!("{key}: {kept} of {} rows kept", table.len());

        let columns = exprs
            .into_iter()
            .map(|(text, _, _, values)| {
                let unit = table.unit_of(&text).to_string();
                (text, Column { values, unit })
            })
            .collect();
        let masks = cuts.into_iter().map(|(text, _, _, mask)| (text, mask)).collect();

        Ok(FetchedSeries {
            columns,
            masks,
            rows: kept,
        })
    }

    fn average(&self, key: &SourceKey, raw: Table, start: f64, share: f64) -> Result<Table> {
        let rows = raw.len().max(1) as f64;
        let compute = || {
            RateAverager::for_source(key, &raw)?.average(&raw, |done| {
                self.progress.advance_to(start + share * done as f64 / rows)
            })
        };
        let averaged = match &self.cache {
            Some(cache) => cache.get_or_compute(key, compute),
            None => compute(),
        };
        averaged.map_err(|e| match e {
            PlotError::Config(m) => PlotError::config(format!("averaging {key}: {m}")),
            PlotError::Expression(m) => PlotError::expression(format!("weight of {key}: {m}")),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct OneTable(Table, Cell<usize>);

    impl TableReader for OneTable {
        fn open(&self, _key: &SourceKey) -> Result<Table> {
            self.1.set(self.1.get() + 1);
            Ok(self.0.clone())
        }
    }

    fn reader() -> OneTable {
        let time: Vec<f64> = (0..20).map(f64::from).collect();
        let value: Vec<f64> = (0..20).map(|i| f64::from(i % 2) * 10.0).collect();
        OneTable(
            Table::new(
                "t",
                "/t",
                vec!["time".into(), "value".into()],
                vec!["s".into(), "V".into()],
                vec![time, value],
            )
            .unwrap(),
            Cell::new(0),
        )
    }

    #[test]
    fn evaluates_expressions_with_units() {
        let mut req = SourceRequest::new(SourceKey::table("s", "/t"));
        req.add_expression("value", Origin::new(0, "x0"));
        req.add_expression("value * 2", Origin::new(0, "y0"));
        req.add_cut(None, Origin::new(0, "c0"));

        let fetcher = DataFetcher::new(reader());
        let out = fetcher.fetch_all(&[req.clone()]).unwrap();
        let series = &out[&req.key];
        assert_eq!(series.rows, 20);
        assert_eq!(series.column("value").unwrap().unit, "V");
        assert_eq!(series.column("value * 2").unwrap().unit, "?");
        assert_eq!(series.column("value * 2").unwrap().values[1], 20.0);
        assert!(fetcher.progress().is_done());
    }

    #[test]
    fn cuts_are_or_combined_and_kept_as_masks() {
        let mut req = SourceRequest::new(SourceKey::table("s", "/t"));
        req.add_expression("time", Origin::new(0, "x0"));
        req.add_cut(Some("time < 3"), Origin::new(0, "c0"));
        req.add_cut(Some("time >= 18"), Origin::new(1, "c1"));

        let out = DataFetcher::new(reader()).fetch(&req, 0.0, 1.0).unwrap();
        assert_eq!(out.column("time").unwrap().values, vec![0.0, 1.0, 2.0, 18.0, 19.0]);
        assert_eq!(out.mask("time < 3").unwrap(), &[true, true, true, false, false]);
        assert_eq!(out.mask("time >= 18").unwrap(), &[false, false, false, true, true]);
    }

    #[test]
    fn errors_name_layer_and_field() {
        let mut req = SourceRequest::new(SourceKey::table("s", "/t"));
        req.add_expression("volts", Origin::new(4, "y4"));
        let err = DataFetcher::new(reader()).fetch(&req, 0.0, 1.0).unwrap_err();
        assert!(matches!(&err, PlotError::Expression(m) if m.contains("layer 4, field `y4`")));
    }

    #[test]
    fn averaged_columns_only_exist_on_averaged_sources() {
        let mut raw = SourceRequest::new(SourceKey::table("s", "/t"));
        raw.add_expression("rate", Origin::new(0, "y0"));
        assert!(DataFetcher::new(reader()).fetch(&raw, 0.0, 1.0).is_err());

        let mut avg = SourceRequest::new(SourceKey::parse("s:/t:10:1:None").unwrap());
        avg.add_expression("rate", Origin::new(0, "y0"));
        avg.add_expression("value", Origin::new(0, "x0"));
        let out = DataFetcher::new(reader()).fetch(&avg, 0.0, 1.0).unwrap();
        // rows 0..=9 form the only closed window
        assert_eq!(out.column("rate").unwrap().values, vec![1.0]);
        assert_eq!(out.column("rate").unwrap().unit, "1/s");
        assert_eq!(out.column("value").unwrap().values, vec![5.0]);
    }

    #[test]
    fn progress_is_monotone() {
        let p = Progress::new();
        p.advance_to(0.5);
        p.advance_to(0.25);
        assert_eq!(p.get(), 0.5);
        p.advance_to(3.0);
        assert!(p.is_done());
    }
}
