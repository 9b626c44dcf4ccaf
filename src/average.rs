use std::sync::Arc;

use crate::data::Table;
use crate::error::{PlotError, Result};
use crate::expr::{CompiledExpr, EvaluatorContext};
use crate::source::SourceKey;

/// Column every averaged table must have.
pub const TIME_COLUMN: &str = "time";

/// Columns appended to each averaged record.
pub const DERIVED_COLUMNS: [(&str, &str); 3] = [("count", "1"), ("weight", "1"), ("rate", "1/s")];

// ---------------------------------------------------------------------------
// RateAverager – sliding time windows over a row stream
// ---------------------------------------------------------------------------

/// Turns a time-ordered row stream into windowed means.
///
/// Rows accumulate while `time < ta + window`. The first row at or past the
/// right edge closes the window: if it held rows, one record is emitted with
/// the mean of every column, `time` set to the window centre, and
///
/// * `count`  – rows in the window
/// * `weight` – mean of the weight expression
/// * `rate`   – sum of the weight expression divided by `window`
///
/// The window then advances by `shift * window`, or jumps to the row's own
/// time when that is still past the edge. With `shift == 1` the buffer is
/// cleared; otherwise only rows inside the new window are retained. A window
/// still open when the input ends is not emitted.
#[derive(Debug)]
pub struct RateAverager {
    window: f64,
    shift: f64,
    time_slot: usize,
    width: usize,
    weight: Arc<CompiledExpr>,
    edge: Option<f64>,
    // rows of the open window, each with its weight appended
    buffer: Vec<Vec<f64>>,
}

impl RateAverager {
    /// Averager over rows laid out as `fields`.
    pub fn new<S: AsRef<str>>(fields: &[S], window: f64, shift: f64, weight: &str) -> Result<Self> {
        if !window.is_finite() || window <= 0.0 {
            return Err(PlotError::config(format!(
                "averaging window must be positive, got {window}"
            )));
        }
        if !(shift > 0.0 && shift <= 1.0) {
            return Err(PlotError::config(format!(
                "window shift must be in (0, 1], got {shift}"
            )));
        }
        let time_slot = fields
            .iter()
            .position(|f| f.as_ref() == TIME_COLUMN)
            .ok_or_else(|| PlotError::config("rate averaging needs a `time` column"))?;
        let weight = EvaluatorContext::new(fields).compile(weight)?;

        Ok(Self {
            window,
            shift,
            time_slot,
            width: fields.len(),
            weight,
            edge: None,
            buffer: Vec::new(),
        })
    }

    /// Averager for an averaged source over `table`.
    pub fn for_source(key: &SourceKey, table: &Table) -> Result<Self> {
        let window = key
            .window
            .ok_or_else(|| PlotError::config(format!("source {key} has no averaging window")))?;
        Self::new(&table.column_names, window, key.shift, key.weight_expr())
    }

    /// Feed the next row; returns the record of a window it closed.
    pub fn push(&mut self, row: &[f64]) -> Result<Option<Vec<f64>>> {
        let t = row[self.time_slot];
        let ta = *self.edge.get_or_insert(t);
        let tb = ta + self.window;

        if t < tb {
            self.append(row)?;
            return Ok(None);
        }

        let record = self.close(ta, tb);

        let mut ta = ta + self.shift * self.window;
        if t >= ta + self.window {
            ta = t;
        }
        self.edge = Some(ta);

        if self.shift == 1.0 {
            self.buffer.clear();
        } else {
            let (slot, tb) = (self.time_slot, ta + self.window);
            self.buffer.retain(|r| ta <= r[slot] && r[slot] < tb);
        }
        self.append(row)?;
        Ok(record)
    }

    fn append(&mut self, row: &[f64]) -> Result<()> {
        let w = self.weight.eval_f64(row)?;
        let mut buffered = Vec::with_capacity(row.len() + 1);
        buffered.extend_from_slice(row);
        buffered.push(w);
        self.buffer.push(buffered);
        Ok(())
    }

    fn close(&self, ta: f64, tb: f64) -> Option<Vec<f64>> {
        let n = self.buffer.len();
        if n == 0 {
            return None;
        }
        let mut sums = vec![0.0; self.width + 1];
        for r in &self.buffer {
            for (s, v) in sums.iter_mut().zip(r) {
                *s += v;
            }
        }
        let weight_sum = sums[self.width];
        let mut record: Vec<f64> = sums[..self.width].iter().map(|s| s / n as f64).collect();
        record[self.time_slot] = (ta + tb) * 0.5;
        record.push(n as f64);
        record.push(weight_sum / n as f64);
        record.push(weight_sum / self.window);
        Some(record)
    }

    /// Average a whole table. `progress` receives the number of input rows
    /// consumed so far.
    pub fn average(mut self, table: &Table, mut progress: impl FnMut(usize)) -> Result<Table> {
        let mut out = Vec::new();
        for (i, row) in table.rows().enumerate() {
            if let Some(record) = self.push(&row)? {
                out.push(record);
            }
            if i % 10_000 == 0 {
                progress(i);
            }
        }
        progress(table.len());

        let mut names = table.column_names.clone();
        let mut units = table.units.clone();
        for (name, unit) in DERIVED_COLUMNS {
            names.push(name.to_string());
            units.push(unit.to_string());
        }
        log::debug!(
            "Averaged {} rows of {} into {} windows",
            table.len(),
            table.path,
            out.len()
        );
        Table::from_rows(table.title.clone(), table.path.clone(), names, units, &out)
            .map_err(PlotError::data_range)
    }
}
