//! Turns a parameter bag into a [`Figure`].
//!
//! ```text
//!   ParameterBag ──► LayerSpec[10] + GlobalSpec
//!                        │
//!                        ▼  one SourceRequest per distinct SourceKey
//!                   DataFetcher ──► FetchedSeries per source
//!                        │
//!                        ▼  per active layer: cut mask, mode dispatch
//!                     Figure { axes (main, lazy twins), legend }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::binning::{
    cumulative, density, density2d, expand_limits, finite_range, get_binning, histogram, histogram2d,
    poisson_errors, profile, step_points, BinSpec, Binning,
};
use crate::cache::AverageCache;
use crate::config::Config;
use crate::data::{FileStore, TableReader};
use crate::error::{PlotError, Result};
use crate::expr::{eval_constant, Value};
use crate::fetch::{DataFetcher, FetchedSeries, Origin, Progress, SourceRequest};
use crate::figure::{
    Axes, AxesKind, Colorbar, Figure, HistDraw, Legend, LegendEntry, MeshDraw, Series,
};
use crate::layer::{build_layers, AxisSpec, GlobalSpec, LayerSpec, Mode, ParameterBag};
use crate::maps::{Equirectangular, MapOptions, MapRenderer};
use crate::options::LayerOptions;
use crate::source::SourceKey;
use crate::ticks::{decade_ticks, number_format, ExtendedWilkinson, OnlyInside, TickLocator};

/// Target number of colorbar ticks.
const COLORBAR_TICKS: f64 = 6.0;
/// Significant digits of colorbar tick labels.
const LABEL_PRECISION: usize = 4;
/// Share of the figure width taken by the axes.
const AXES_FRACTION: f64 = 0.82;

// ---------------------------------------------------------------------------
// PlotComposer
// ---------------------------------------------------------------------------

pub struct PlotComposer<R, T = ExtendedWilkinson, M = Equirectangular<ExtendedWilkinson>> {
    fetcher: DataFetcher<R>,
    ticks: T,
    maps: M,
}

impl<R: TableReader> PlotComposer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            fetcher: DataFetcher::new(reader),
            ticks: ExtendedWilkinson::default(),
            maps: Equirectangular::new(ExtendedWilkinson::default()),
        }
    }
}

impl<R: TableReader, T: TickLocator, M: MapRenderer> PlotComposer<R, T, M> {
    pub fn with_cache(mut self, cache: AverageCache) -> Self {
        self.fetcher = self.fetcher.with_cache(cache);
        self
    }

    pub fn with_progress(mut self, progress: Arc<Progress>) -> Self {
        self.fetcher = self.fetcher.with_progress(progress);
        self
    }

    pub fn with_ticks<U: TickLocator>(self, ticks: U) -> PlotComposer<R, U, M> {
        PlotComposer {
            fetcher: self.fetcher,
            ticks,
            maps: self.maps,
        }
    }

    pub fn with_maps<N: MapRenderer>(self, maps: N) -> PlotComposer<R, T, N> {
        PlotComposer {
            fetcher: self.fetcher,
            ticks: self.ticks,
            maps,
        }
    }

    pub fn progress(&self) -> Arc<Progress> {
        self.fetcher.progress()
    }

    /// Fetch every source once and draw every active layer.
    ///
    /// Any configuration, expression or range error aborts the whole plot;
    /// no partial figure is returned.
    pub fn compose(&self, bag: &ParameterBag) -> Result<Figure> {
        let globals = GlobalSpec::from_bag(bag)?;
        let layers = build_layers(bag)?;

        let mut active = Vec::new();
        for layer in layers.iter().filter(|l| l.is_active()) {
            if let Some(key) = layer.source_key()? {
                active.push((layer, key));
            }
        }
        log::info!("Composing {} active layers", active.len());

        let requests = plan_requests(&active);
        let fetched = self.fetcher.fetch_all(&requests)?;

        let mut fig = Figure::new(
            globals.title.clone(),
            globals.font_size,
            globals.width,
            globals.height(),
            globals.grid,
        );
        let ctx = LabelContext {
            globals: &globals,
            active: &active,
            fetched: &fetched,
        };

        for (layer, key) in &active {
            let series = fetched
                .get(key)
                .ok_or_else(|| PlotError::config(format!("source {key} was not fetched")))?;
            let data = LayerData::select(layer, series)?;
            let Some(mode) = layer.mode else { continue };
            let opts = LayerOptions::new(mode, &layer.options);
            let axes = fig.axes_mut(layer.twin.into());
            log::debug!("Layer {} ({mode}) on {:?} axes", layer.index, axes.kind);
            match mode {
                Mode::Xy => self.xy(axes, layer, &data, &opts)?,
                Mode::H1 => self.hist1d(axes, layer, &data, &opts)?,
                Mode::H2 => self.hist2d(axes, layer, &data, &opts, globals.width)?,
                Mode::Profile => self.profile(axes, layer, &data, &opts)?,
                Mode::Map => self.map(axes, layer, &data, &opts, &ctx)?,
            }
        }

        for axes in fig.axes.iter_mut() {
            ctx.configure(axes)?;
        }
        fig.legend = ctx.legend();
        Ok(fig)
    }

    // -----------------------------------------------------------------------
    // Modes
    // -----------------------------------------------------------------------

    fn xy(&self, axes: &mut Axes, layer: &LayerSpec, data: &LayerData, opts: &LayerOptions<'_>) -> Result<()> {
        let y = data.require(layer, 'y')?;
        let x = match &data.x {
            Some(x) => x.clone(),
            None => (0..y.len()).map(|i| i as f64).collect(),
        };
        let style = opts.passthrough();
        match &data.z {
            None => axes.series.push(Series::Line {
                layer: layer.index,
                x,
                y: y.to_vec(),
                style,
            }),
            Some(z) => {
                let size: f64 = opts.get("markersize", 2.0)?;
                let label: String = opts.get("cblabel", layer.z.clone().unwrap_or_default())?;
                let colorbar = self.linear_colorbar(z, label, opts.get("cbfrac", 0.04)?);
                axes.series.push(Series::Scatter {
                    layer: layer.index,
                    x,
                    y: y.to_vec(),
                    z: z.clone(),
                    size: size * size,
                    colorbar,
                    style,
                });
            }
        }
        Ok(())
    }

    fn hist1d(&self, axes: &mut Axes, layer: &LayerSpec, data: &LayerData, opts: &LayerOptions<'_>) -> Result<()> {
        let i = layer.index;
        let x = data.require(layer, 'x')?;
        let normalize: bool = opts.get("density", false)?;
        let direction: i64 = opts.get("cumulative", 0)?;
        let style: String = opts.get("style", if normalize { "histline" } else { "hist" }.to_string())?;
        let xerr: bool = opts.get("xerr", false)?;
        let yerr: bool = opts.get("yerr", false)?;
        let capsize: f64 = opts.get("capsize", if xerr || yerr { 3.0 } else { 0.0 })?;

        let bins = layer_binning(layer, 'x', x)?;
        let mut contents = histogram(x, &bins);
        let mut errors = poisson_errors(&contents);
        if normalize {
            (contents, errors) = density(&contents, &errors, &bins.widths);
        }
        if direction != 0 {
            let widths = normalize.then_some(bins.widths.as_slice());
            (contents, errors) = cumulative(&contents, &errors, direction, widths);
        }

        let (px, py) = if style.contains("line") {
            (bins.centers.clone(), contents.clone())
        } else {
            step_points(&contents, &bins.edges)
        };
        let (draw, px, py) = if style.contains("fill") {
            (HistDraw::Fill, px, py)
        } else if style.contains("hist") {
            if style.contains("line") {
                (HistDraw::Line, px, py)
            } else {
                (HistDraw::Step, px, py)
            }
        } else if style.contains("scat") {
            (HistDraw::Markers, bins.centers.clone(), contents.clone())
        } else if style.contains("line") {
            (HistDraw::Line, px, py)
        } else {
            return Err(PlotError::config(format!("unknown h1 style `{style}`")).in_layer(i, &format!("o{i}style")));
        };

        let passthrough = opts.passthrough();
        if xerr || yerr {
            axes.series.push(Series::ErrorBars {
                layer: i,
                x: bins.centers.clone(),
                y: contents.clone(),
                xerr: xerr.then(|| bins.widths.iter().map(|w| 0.5 * w).collect()),
                yerr: yerr.then(|| errors.clone()),
                capsize,
                marker: None,
                style: passthrough.clone(),
            });
        }

        axes.xlim = Some(expand_limits(axes.xlim, &bins.edges, 0.05, 0.05).map_err(|e| e.in_layer(i, &format!("x{i}")))?);
        let tops: Vec<f64> = contents.iter().zip(&errors).map(|(c, e)| c + e).collect();
        axes.ylim = Some(expand_limits(axes.ylim, &tops, 0.0, 0.05).map_err(|e| e.in_layer(i, &format!("x{i}")))?);

        axes.series.push(Series::Histogram {
            layer: i,
            edges: bins.edges,
            contents,
            errors,
            draw,
            x: px,
            y: py,
            style: passthrough,
        });
        Ok(())
    }

    fn hist2d(
        &self,
        axes: &mut Axes,
        layer: &LayerSpec,
        data: &LayerData,
        opts: &LayerOptions<'_>,
        figure_width: f64,
    ) -> Result<()> {
        let i = layer.index;
        let x = data.require(layer, 'x')?;
        let y = data.require(layer, 'y')?;
        let style: String = opts.get("style", "color".to_string())?;
        let normalize: bool = opts.get("density", false)?;
        let log10: bool = opts.get("log", false)?;
        let filled = style.contains("color") || style.contains("fill");
        let hidezero: bool = opts.get("hidezero", log10 || filled)?;
        let with_colorbar: bool = opts.get("colorbar", filled)?;
        let clabels: bool = opts.get("clabels", !filled)?;

        let xbins = layer_binning(layer, 'x', x)?;
        let ybins = layer_binning(layer, 'y', y)?;
        let mut values = histogram2d(x, y, &xbins, &ybins);
        if normalize {
            values = density2d(&values, &xbins.widths, &ybins.widths);
        }
        for v in values.iter_mut().flatten() {
            if hidezero && *v == 0.0 {
                *v = f64::NAN;
            }
            if log10 {
                *v = v.log10();
            }
            if !v.is_finite() {
                *v = f64::NAN;
            }
        }

        let draw = if style.contains("color") {
            MeshDraw::Color
        } else if style.contains("box") {
            let max = values.iter().flatten().copied().filter(|v| v.is_finite()).fold(f64::NAN, f64::max);
            let cell = 72.0 / 2.0 * figure_width * AXES_FRACTION / xbins.len().max(ybins.len()) as f64;
            let sizes = values
                .iter()
                .map(|row| row.iter().map(|v| v / max * cell * cell).collect())
                .collect();
            MeshDraw::Boxes { sizes }
        } else if style.contains("contour") {
            let n: usize = opts.get("levels", 10)?;
            let flat: Vec<f64> = values.iter().flatten().copied().collect();
            let levels = match finite_range(&flat) {
                Some((lo, hi)) => self.ticks.ticks(lo, hi, n as f64, OnlyInside::Any),
                None => Vec::new(),
            };
            MeshDraw::Contour {
                levels,
                filled,
                labels: !filled && clabels,
            }
        } else {
            return Err(PlotError::config(format!("unknown h2 style `{style}`")).in_layer(i, &format!("o{i}style")));
        };

        let colorbar = if with_colorbar {
            let label: String = opts.get("cblabel", "bincontent".to_string())?;
            let fraction: f64 = opts.get("cbfrac", 0.04)?;
            let flat: Vec<f64> = values.iter().flatten().copied().collect();
            Some(if log10 {
                self.log_colorbar(&flat, label, fraction)
            } else {
                self.linear_colorbar(&flat, label, fraction)
            })
        } else {
            None
        };

        axes.series.push(Series::Mesh {
            layer: i,
            xedges: xbins.edges,
            yedges: ybins.edges,
            values,
            draw,
            colorbar,
            style: opts.passthrough(),
        });
        Ok(())
    }

    fn profile(&self, axes: &mut Axes, layer: &LayerSpec, data: &LayerData, opts: &LayerOptions<'_>) -> Result<()> {
        let x = data.require(layer, 'x')?;
        let y = data.require(layer, 'y')?;
        let xerr: bool = opts.get("xerr", false)?;
        let yerr: bool = opts.get("yerr", false)?;

        let bins = layer_binning(layer, 'x', x)?;
        let (means, stds) = profile(x, y, &bins);
        axes.series.push(Series::ErrorBars {
            layer: layer.index,
            x: bins.centers.clone(),
            y: means,
            xerr: xerr.then(|| bins.widths.iter().map(|w| 0.5 * w).collect()),
            yerr: yerr.then_some(stds),
            capsize: opts.get("capsize", 3.0)?,
            marker: Some(opts.get("marker", ".".to_string())?),
            style: opts.passthrough(),
        });
        Ok(())
    }

    fn map(
        &self,
        axes: &mut Axes,
        layer: &LayerSpec,
        data: &LayerData,
        opts: &LayerOptions<'_>,
        ctx: &LabelContext<'_>,
    ) -> Result<()> {
        let i = layer.index;
        let lon = data.require(layer, 'x')?;
        let lat = data.require(layer, 'y')?;
        let options = MapOptions::from_layer(opts).map_err(|e| e.in_layer(i, &format!("o{i}")))?;
        let frame = self
            .maps
            .draw_map(lat, lon, &options)
            .map_err(|e| e.in_layer(i, &format!("m{i}")))?;
        let (x, y) = frame.project_all(lon, lat);
        axes.map = Some(frame);

        let style = opts.passthrough();
        match &data.z {
            None => axes.series.push(Series::Line {
                layer: i,
                x,
                y,
                style,
            }),
            Some(z) => {
                let size: f64 = opts.get("markersize", 6.0)?;
                let default_label = ctx.label('z', AxesKind::Main).unwrap_or_default();
                let label: String = opts.get("cblabel", default_label)?;
                let colorbar = self.linear_colorbar(z, label, opts.get("cbfrac", 0.04)?);
                let mut style = style;
                style.entry("zorder".to_string()).or_insert_with(|| "100".to_string());
                axes.series.push(Series::Scatter {
                    layer: i,
                    x,
                    y,
                    z: z.clone(),
                    size: size * size,
                    colorbar,
                    style,
                });
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Colorbars
    // -----------------------------------------------------------------------

    fn linear_colorbar(&self, values: &[f64], label: String, fraction: f64) -> Colorbar {
        let range = finite_range(values);
        let ticks = range
            .map(|(lo, hi)| self.ticks.ticks(lo, hi, COLORBAR_TICKS, OnlyInside::Inside))
            .unwrap_or_default();
        let tick_labels = ticks.iter().map(|t| number_format(*t, LABEL_PRECISION)).collect();
        Colorbar {
            label,
            range,
            ticks,
            tick_labels,
            fraction,
            log: false,
        }
    }

    fn log_colorbar(&self, values: &[f64], label: String, fraction: f64) -> Colorbar {
        let range = finite_range(values);
        let ticks = range.map(|(lo, hi)| decade_ticks(lo, hi)).unwrap_or_default();
        let tick_labels = ticks
            .iter()
            .map(|t| number_format(10f64.powf(*t), LABEL_PRECISION))
            .collect();
        Colorbar {
            label,
            range,
            ticks,
            tick_labels,
            fraction,
            log: true,
        }
    }
}

/// Compose `bag` from the tables below `config.basedir`, replaying rate
/// averages through the configured cache.
pub fn make_plot(bag: &ParameterBag, config: &Config, progress: Arc<Progress>) -> Result<Figure> {
    PlotComposer::new(FileStore::new(config.basedir.clone()))
        .with_cache(AverageCache::from_config(config))
        .with_progress(progress)
        .compose(bag)
}

// ---------------------------------------------------------------------------
// Fetch planning
// ---------------------------------------------------------------------------

/// One request per distinct source, in order of first use, collecting the
/// expressions and cuts of every layer that reads it.
fn plan_requests(active: &[(&LayerSpec, SourceKey)]) -> Vec<SourceRequest> {
    let mut requests: Vec<SourceRequest> = Vec::new();
    let mut slot: HashMap<&SourceKey, usize> = HashMap::new();
    for (layer, key) in active {
        let n = *slot.entry(key).or_insert_with(|| {
            requests.push(SourceRequest::new(key.clone()));
            requests.len() - 1
        });
        let request = &mut requests[n];
        let i = layer.index;
        for a in ['x', 'y', 'z'] {
            if let Some(expr) = layer.expression(a) {
                request.add_expression(expr, Origin::new(i, format!("{a}{i}")));
            }
        }
        request.add_cut(layer.cut.as_deref(), Origin::new(i, format!("c{i}")));
    }
    log::debug!("{} layers read {} distinct sources", active.len(), requests.len());
    requests
}

// ---------------------------------------------------------------------------
// Per-layer data
// ---------------------------------------------------------------------------

/// A layer's x/y/z values restricted to the rows passing its own cut.
struct LayerData {
    x: Option<Vec<f64>>,
    y: Option<Vec<f64>>,
    z: Option<Vec<f64>>,
}

impl LayerData {
    fn select(layer: &LayerSpec, series: &FetchedSeries) -> Result<Self> {
        let mask = match layer.cut.as_deref() {
            Some(cut) => Some(series.mask(cut).ok_or_else(|| {
                PlotError::config(format!("no mask for cut `{cut}`")).in_layer(layer.index, &format!("c{}", layer.index))
            })?),
            None => None,
        };
        let pick = |a: char| -> Result<Option<Vec<f64>>> {
            let Some(expr) = layer.expression(a) else {
                return Ok(None);
            };
            let column = series.column(expr).ok_or_else(|| {
                PlotError::config(format!("no values for `{expr}`"))
                    .in_layer(layer.index, &format!("{a}{}", layer.index))
            })?;
            Ok(Some(match mask {
                Some(mask) => column
                    .values
                    .iter()
                    .zip(mask)
                    .filter(|(_, keep)| **keep)
                    .map(|(v, _)| *v)
                    .collect(),
                None => column.values.clone(),
            }))
        };
        Ok(Self {
            x: pick('x')?,
            y: pick('y')?,
            z: pick('z')?,
        })
    }

    fn require(&self, layer: &LayerSpec, a: char) -> Result<&[f64]> {
        let values = match a {
            'x' => &self.x,
            'y' => &self.y,
            _ => &self.z,
        };
        values.as_deref().ok_or_else(|| {
            let mode = layer.mode.map(Mode::as_str).unwrap_or("?");
            PlotError::config(format!("mode {mode} needs an expression"))
                .in_layer(layer.index, &format!("{a}{}", layer.index))
        })
    }
}

fn layer_binning(layer: &LayerSpec, a: char, data: &[f64]) -> Result<Binning> {
    let i = layer.index;
    let spec_text = if a == 'x' { layer.x_bins.as_deref() } else { layer.y_bins.as_deref() };
    let spec = BinSpec::parse(spec_text).map_err(|e| e.in_layer(i, &format!("{a}{i}b")))?;
    get_binning(&spec, data).map_err(|e| e.in_layer(i, &format!("{a}{i}")))
}

// ---------------------------------------------------------------------------
// Labels, ranges and legend
// ---------------------------------------------------------------------------

struct LabelContext<'a> {
    globals: &'a GlobalSpec,
    active: &'a [(&'a LayerSpec, SourceKey)],
    fetched: &'a HashMap<SourceKey, FetchedSeries>,
}

impl LabelContext<'_> {
    fn axis_spec(&self, a: char, kind: AxesKind) -> &AxisSpec {
        let g = self.globals;
        match (a, kind) {
            ('x', AxesKind::TwinX) => &g.x_twin,
            ('y', AxesKind::TwinY) => &g.y_twin,
            ('x', _) => &g.x,
            ('y', _) => &g.y,
            _ => &g.z,
        }
    }

    /// Explicit label, or every distinct expression on that axis with
    /// its unit, e.g. `T_a [°C], H_a [%]`.
    fn label(&self, a: char, kind: AxesKind) -> Option<String> {
        if let Some(label) = &self.axis_spec(a, kind).label {
            return Some(label.clone());
        }
        let mut seen: Vec<&str> = Vec::new();
        let mut parts = Vec::new();
        for (layer, key) in self.active {
            let on_twin = AxesKind::from(layer.twin);
            let belongs = match kind {
                AxesKind::Main => !matches!(
                    (a, on_twin),
                    ('x', AxesKind::TwinX) | ('y', AxesKind::TwinY)
                ),
                twin => on_twin == twin,
            };
            let Some(expr) = layer.expression(a).filter(|_| belongs) else {
                continue;
            };
            if seen.contains(&expr) {
                continue;
            }
            seen.push(expr);
            let unit = self
                .fetched
                .get(key)
                .and_then(|s| s.column(expr))
                .map_or(crate::data::UNKNOWN_UNIT, |c| c.unit.as_str());
            parts.push(format!("{expr} [{unit}]"));
        }
        (!parts.is_empty()).then(|| parts.join(", "))
    }

    /// Labels, scales and ranges; twins only set their own dimension.
    fn configure(&self, axes: &mut Axes) -> Result<()> {
        for a in ['x', 'y'] {
            let own = match axes.kind {
                AxesKind::Main => true,
                AxesKind::TwinX => a == 'x',
                AxesKind::TwinY => a == 'y',
            };
            if !own {
                continue;
            }
            let spec = self.axis_spec(a, axes.kind);
            let label = self.label(a, axes.kind);
            let range = spec.range.as_deref().map(parse_range).transpose()?;
            if a == 'x' {
                axes.xlabel = label;
                axes.xscale = spec.scale;
                axes.xlim = range.or(axes.xlim);
            } else {
                axes.ylabel = label;
                axes.yscale = spec.scale;
                axes.ylim = range.or(axes.ylim);
            }
        }
        Ok(())
    }

    /// Shown for more than one line-like layer, unless disabled or a map is
    /// drawn. 2D histograms have no legend entry.
    fn legend(&self) -> Option<Legend> {
        if !self.globals.legend_enabled() {
            return None;
        }
        if self.active.iter().any(|(l, _)| l.mode == Some(Mode::Map)) {
            return None;
        }
        let entries: Vec<LegendEntry> = self
            .active
            .iter()
            .filter(|(l, _)| l.mode != Some(Mode::H2))
            .map(|(l, _)| LegendEntry {
                layer: l.index,
                label: l.legend_label(),
            })
            .collect();
        if entries.len() < 2 {
            return None;
        }
        Some(Legend {
            location: self.globals.legend.clone().unwrap_or_else(|| "best".to_string()),
            entries,
        })
    }
}

/// Evaluate an axis range expression such as `[0, 10]` or `[-1e3, 2*60]`.
fn parse_range(text: &str) -> Result<(f64, f64)> {
    let bad = || PlotError::config(format!("axis range `{text}` must evaluate to [min, max]"));
    match eval_constant(text).map_err(|_| bad())? {
        Value::List(items) if items.len() == 2 => {
            let (lo, hi) = (items[0], items[1]);
            Ok((lo, hi))
        }
        _ => Err(bad()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Table;
    use std::cell::Cell;

    struct Weather {
        table: Table,
        opened: Cell<usize>,
    }

    impl TableReader for Weather {
        fn open(&self, _key: &SourceKey) -> Result<Table> {
            self.opened.set(self.opened.get() + 1);
            Ok(self.table.clone())
        }
    }

    fn weather() -> Weather {
        let n = 48;
        let time: Vec<f64> = (0..n).map(|i| f64::from(i) * 3600.0).collect();
        let t: Vec<f64> = (0..n).map(|i| f64::from(i % 24) - 5.0).collect();
        let h: Vec<f64> = (0..n).map(|i| 50.0 + f64::from(i % 10)).collect();
        let p: Vec<f64> = (0..n).map(|i| 1000.0 + f64::from(i % 7)).collect();
        Weather {
            table: Table::new(
                "weather",
                "/raw/weather",
                vec!["time".into(), "T_a".into(), "H_a".into(), "p".into()],
                vec!["s".into(), "°C".into(), "%".into(), "hPa".into()],
                vec![time, t, h, p],
            )
            .unwrap(),
            opened: Cell::new(0),
        }
    }

    fn bag(pairs: &[(&str, &str)]) -> ParameterBag {
        pairs.iter().copied().collect()
    }

    const SRC: &str = "data/sample:/raw/weather";

    #[test]
    fn xy_labels_join_units() {
        let fig = PlotComposer::new(weather())
            .compose(&bag(&[
                ("m0", "xy"),
                ("s0", SRC),
                ("x0", "time"),
                ("y0", "T_a"),
                ("m1", "xy"),
                ("s1", SRC),
                ("x1", "time"),
                ("y1", "H_a"),
            ]))
            .unwrap();
        let main = fig.main_axes();
        assert_eq!(main.xlabel.as_deref(), Some("time [s]"));
        assert_eq!(main.ylabel.as_deref(), Some("T_a [°C], H_a [%]"));
        let legend = fig.legend.unwrap();
        assert_eq!(legend.location, "best");
        assert_eq!(legend.entries[1].label, "time:H_a");
    }

    #[test]
    fn cut_masks_only_apply_to_their_layer() {
        let fig = PlotComposer::new(weather())
            .compose(&bag(&[
                ("m0", "xy"),
                ("s0", SRC),
                ("y0", "T_a"),
                ("c0", "T_a < 0"),
                ("m1", "xy"),
                ("s1", SRC),
                ("y1", "T_a"),
            ]))
            .unwrap();
        let lens: Vec<usize> = fig
            .series()
            .map(|s| match s {
                Series::Line { y, .. } => y.len(),
                _ => 0,
            })
            .collect();
        assert_eq!(lens, vec![10, 48]);
    }

    #[test]
    fn scatter_colorbar_ticks_stay_inside() {
        let fig = PlotComposer::new(weather())
            .compose(&bag(&[("m0", "xy"), ("s0", SRC), ("x0", "time"), ("y0", "H_a"), ("z0", "T_a")]))
            .unwrap();
        let Series::Scatter { colorbar, size, .. } = &fig.main_axes().series[0] else {
            panic!("expected a scatter");
        };
        assert_eq!(*size, 4.0);
        assert_eq!(colorbar.label, "T_a");
        assert_eq!(colorbar.range, Some((-5.0, 18.0)));
        assert!(!colorbar.ticks.is_empty());
        assert!(colorbar.ticks.iter().all(|t| (-5.0..=18.0).contains(t)));
        assert!(fig.legend.is_none());
    }

    #[test]
    fn colorbar_of_large_values_with_a_narrow_span() {
        let fig = PlotComposer::new(weather())
            .compose(&bag(&[("m0", "xy"), ("s0", SRC), ("x0", "time"), ("y0", "T_a"), ("z0", "H_a + 1e16")]))
            .unwrap();
        let Series::Scatter { colorbar, .. } = &fig.main_axes().series[0] else {
            panic!("expected a scatter");
        };
        assert!(!colorbar.ticks.is_empty());
        assert!(colorbar.ticks.iter().all(|t| t.is_finite()));
    }

    #[test]
    fn mesh_layers_have_no_legend_entry() {
        let layers = [
            ("m0", "xy"),
            ("s0", SRC),
            ("x0", "time"),
            ("y0", "T_a"),
            ("m1", "h2"),
            ("s1", SRC),
            ("x1", "time"),
            ("y1", "T_a"),
        ];
        let fig = PlotComposer::new(weather()).compose(&bag(&layers)).unwrap();
        assert!(fig.legend.is_none());

        let mut with_line = layers.to_vec();
        with_line.extend([("m2", "h1"), ("s2", SRC), ("x2", "H_a")]);
        let fig = PlotComposer::new(weather()).compose(&bag(&with_line)).unwrap();
        let layers: Vec<usize> = fig.legend.unwrap().entries.iter().map(|e| e.layer).collect();
        assert_eq!(layers, vec![0, 2]);
    }

    #[test]
    fn h1_density_and_error_bars() {
        let fig = PlotComposer::new(weather())
            .compose(&bag(&[
                ("m0", "h1"),
                ("s0", SRC),
                ("x0", "H_a"),
                ("x0b", "[50, 60, 5]"),
                ("o0density", "1"),
                ("o0yerr", "1"),
            ]))
            .unwrap();
        let axes = fig.main_axes();
        assert_eq!(axes.series.len(), 2);
        assert!(matches!(&axes.series[0], Series::ErrorBars { capsize, .. } if *capsize == 3.0));
        let Series::Histogram { contents, edges, draw, x, .. } = &axes.series[1] else {
            panic!("expected a histogram");
        };
        assert_eq!(*draw, HistDraw::Line);
        assert_eq!(x.len(), 5);
        let area: f64 = contents.iter().zip(edges.windows(2)).map(|(c, e)| c * (e[1] - e[0])).sum();
        assert!((area - 1.0).abs() < 1e-12);
        assert_eq!(axes.xlim, Some((49.5, 60.5)));
    }

    #[test]
    fn unknown_style_is_fatal() {
        let err = PlotComposer::new(weather())
            .compose(&bag(&[("m0", "h1"), ("s0", SRC), ("x0", "T_a"), ("o0style", "bars")]))
            .unwrap_err();
        assert!(matches!(&err, PlotError::Config(m) if m.contains("layer 0") && m.contains("bars")));

        let err = PlotComposer::new(weather())
            .compose(&bag(&[("m0", "h2"), ("s0", SRC), ("x0", "T_a"), ("y0", "p"), ("o0style", "hex")]))
            .unwrap_err();
        assert!(matches!(err, PlotError::Config(_)));
    }

    #[test]
    fn h2_log_hides_zero_bins() {
        let fig = PlotComposer::new(weather())
            .compose(&bag(&[
                ("m0", "h2"),
                ("s0", SRC),
                ("x0", "T_a"),
                ("y0", "p"),
                ("x0b", "4"),
                ("y0b", "3"),
                ("o0log", "1"),
            ]))
            .unwrap();
        let Series::Mesh { values, colorbar, draw, .. } = &fig.main_axes().series[0] else {
            panic!("expected a mesh");
        };
        assert_eq!(*draw, MeshDraw::Color);
        assert_eq!(values.len(), 3);
        assert_eq!(values[0].len(), 4);
        assert!(values.iter().flatten().all(|v| v.is_nan() || *v >= 0.0));
        let cb = colorbar.as_ref().unwrap();
        assert!(cb.log);
        assert_eq!(cb.label, "bincontent");
        assert!(cb.ticks.iter().all(|t| t.fract() == 0.0));
    }

    #[test]
    fn h2_contour_lines_have_labels_and_no_colorbar() {
        let fig = PlotComposer::new(weather())
            .compose(&bag(&[("m0", "h2"), ("s0", SRC), ("x0", "T_a"), ("y0", "p"), ("o0style", "contour")]))
            .unwrap();
        let Series::Mesh { draw, colorbar, .. } = &fig.main_axes().series[0] else {
            panic!("expected a mesh");
        };
        assert!(matches!(draw, MeshDraw::Contour { filled: false, labels: true, .. }));
        assert!(colorbar.is_none());
    }

    #[test]
    fn profile_means_per_bin() {
        let fig = PlotComposer::new(weather())
            .compose(&bag(&[
                ("m0", "p"),
                ("s0", SRC),
                ("x0", "time"),
                ("y0", "T_a"),
                ("x0b", "[0, 172800, 2]"),
                ("o0yerr", "1"),
            ]))
            .unwrap();
        let Series::ErrorBars { y, yerr, marker, .. } = &fig.main_axes().series[0] else {
            panic!("expected error bars");
        };
        assert_eq!(y, &vec![6.5, 6.5]);
        assert!(yerr.is_some());
        assert_eq!(marker.as_deref(), Some("."));
    }

    #[test]
    fn map_overlay_disables_legend() {
        let fig = PlotComposer::new(weather())
            .compose(&bag(&[
                ("m0", "map"),
                ("s0", SRC),
                ("x0", "T_a + 10"),
                ("y0", "H_a"),
                ("z0", "p"),
                ("zl", "pressure"),
                ("m1", "xy"),
                ("s1", SRC),
                ("y1", "p"),
            ]))
            .unwrap();
        let main = fig.main_axes();
        assert!(main.map.is_some());
        let Series::Scatter { colorbar, size, style, .. } = &main.series[0] else {
            panic!("expected a scatter overlay");
        };
        assert_eq!(*size, 36.0);
        assert_eq!(colorbar.label, "pressure");
        assert_eq!(style["zorder"], "100");
        assert!(fig.legend.is_none());
    }

    #[test]
    fn missing_expression_names_the_field() {
        let err = PlotComposer::new(weather())
            .compose(&bag(&[("m4", "h2"), ("s4", SRC), ("x4", "T_a")]))
            .unwrap_err();
        assert!(err.to_string().contains("field `y4`"), "{err}");
    }

    #[test]
    fn numeric_cut_is_a_configuration_error() {
        let err = PlotComposer::new(weather())
            .compose(&bag(&[("m0", "xy"), ("s0", SRC), ("y0", "T_a"), ("c0", "T_a * 2")]))
            .unwrap_err();
        assert!(matches!(err, PlotError::Config(_)), "{err}");
    }

    #[test]
    fn explicit_range_scale_and_legend_location() {
        let fig = PlotComposer::new(weather())
            .compose(&bag(&[
                ("m0", "xy"),
                ("s0", SRC),
                ("y0", "T_a"),
                ("m1", "xy"),
                ("s1", SRC),
                ("y1", "p"),
                ("xr", "[0, 2*12]"),
                ("ys", "log"),
                ("l", "upper left"),
            ]))
            .unwrap();
        let main = fig.main_axes();
        assert_eq!(main.xlim, Some((0.0, 24.0)));
        assert_eq!(main.yscale, crate::layer::Scale::Log);
        assert_eq!(fig.legend.unwrap().location, "upper left");
        assert!(parse_range("[1]").is_err());
    }

    #[test]
    fn inactive_layers_are_ignored() {
        let reader = weather();
        let fig = PlotComposer::new(&reader)
            .compose(&bag(&[("m0", "xy"), ("y0", "T_a"), ("s1", SRC), ("y1", "T_a")]))
            .unwrap();
        assert_eq!(fig.series().count(), 0);
        assert_eq!(reader.opened.get(), 0);
    }
}
