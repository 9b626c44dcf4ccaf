//! Renderer-independent description of a composed plot.
//!
//! A [`Figure`] holds resolved numbers only: bin edges, contents, projected
//! coordinates, tick positions and labels. Backends (the JSON writer, the
//! egui viewer) draw it without evaluating anything.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::layer::{Scale, Twin};
use crate::maps::MapFrame;

/// Rendering options handed through from `o{N}*` keys.
pub type Style = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Figure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Figure {
    pub title: Option<String>,
    pub font_size: f64,
    /// Inches.
    pub width: f64,
    pub height: f64,
    pub grid: bool,
    pub axes: Vec<Axes>,
    pub legend: Option<Legend>,
}

impl Figure {
    pub fn new(title: Option<String>, font_size: f64, width: f64, height: f64, grid: bool) -> Self {
        Self {
            title,
            font_size,
            width,
            height,
            grid,
            axes: vec![Axes::new(AxesKind::Main)],
            legend: None,
        }
    }

    pub fn main_axes(&self) -> &Axes {
        &self.axes[0]
    }

    pub fn axes_of(&self, kind: AxesKind) -> Option<&Axes> {
        self.axes.iter().find(|a| a.kind == kind)
    }

    /// The axes of `kind`, appended on first use.
    pub fn axes_mut(&mut self, kind: AxesKind) -> &mut Axes {
        let i = match self.axes.iter().position(|a| a.kind == kind) {
            Some(i) => i,
            None => {
                log::debug!("Creating {kind:?} axes");
                self.axes.push(Axes::new(kind));
                self.axes.len() - 1
            }
        };
        &mut self.axes[i]
    }

    /// Every series on every axes.
    pub fn series(&self) -> impl Iterator<Item = &Series> {
        self.axes.iter().flat_map(|a| a.series.iter())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, self.to_json()?)?;
        log::info!("Wrote figure {}", path.display());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Axes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AxesKind {
    Main,
    /// Own x axis on top, y shared with the main axes.
    TwinX,
    /// Own y axis on the right, x shared with the main axes.
    TwinY,
}

impl From<Twin> for AxesKind {
    fn from(t: Twin) -> Self {
        match t {
            Twin::Main => AxesKind::Main,
            Twin::X => AxesKind::TwinX,
            Twin::Y => AxesKind::TwinY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Axes {
    pub kind: AxesKind,
    pub xlabel: Option<String>,
    pub ylabel: Option<String>,
    pub xscale: Scale,
    pub yscale: Scale,
    pub xlim: Option<(f64, f64)>,
    pub ylim: Option<(f64, f64)>,
    pub series: Vec<Series>,
    /// Background of map layers drawn on these axes.
    pub map: Option<MapFrame>,
}

impl Axes {
    pub fn new(kind: AxesKind) -> Self {
        Self {
            kind,
            xlabel: None,
            ylabel: None,
            xscale: Scale::Linear,
            yscale: Scale::Linear,
            xlim: None,
            ylim: None,
            series: Vec::new(),
            map: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

/// How a 1D histogram is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HistDraw {
    /// Outline through the step points.
    Step,
    /// Area under the outline (or under the center line).
    Fill,
    /// Line through the bin centers.
    Line,
    /// Markers at the bin centers.
    Markers,
}

/// How a 2D histogram is drawn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum MeshDraw {
    /// Pseudocolor cells.
    Color,
    /// Squares at the bin centers, area proportional to the content.
    Boxes { sizes: Vec<Vec<f64>> },
    Contour { levels: Vec<f64>, filled: bool, labels: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Colorbar {
    pub label: String,
    /// Colour range of the mapped values.
    pub range: Option<(f64, f64)>,
    pub ticks: Vec<f64>,
    pub tick_labels: Vec<String>,
    /// Width as a fraction of the axes.
    pub fraction: f64,
    /// Values are log10 of the content; labels show `10^tick`.
    pub log: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Series {
    /// `y` against `x` (xy mode, map overlay without z).
    Line {
        layer: usize,
        x: Vec<f64>,
        y: Vec<f64>,
        style: Style,
    },
    /// Colour-mapped markers (xy or map overlay with z).
    Scatter {
        layer: usize,
        x: Vec<f64>,
        y: Vec<f64>,
        z: Vec<f64>,
        /// Marker area in points squared.
        size: f64,
        colorbar: Colorbar,
        style: Style,
    },
    Histogram {
        layer: usize,
        edges: Vec<f64>,
        contents: Vec<f64>,
        errors: Vec<f64>,
        draw: HistDraw,
        /// The drawn polyline: step points or bin centers.
        x: Vec<f64>,
        y: Vec<f64>,
        style: Style,
    },
    ErrorBars {
        layer: usize,
        x: Vec<f64>,
        y: Vec<f64>,
        xerr: Option<Vec<f64>>,
        yerr: Option<Vec<f64>>,
        capsize: f64,
        marker: Option<String>,
        style: Style,
    },
    /// 2D bin contents indexed `[y][x]`; blank cells are NaN.
    Mesh {
        layer: usize,
        xedges: Vec<f64>,
        yedges: Vec<f64>,
        values: Vec<Vec<f64>>,
        draw: MeshDraw,
        colorbar: Option<Colorbar>,
        style: Style,
    },
}

impl Series {
    pub fn layer(&self) -> usize {
        match self {
            Series::Line { layer, .. }
            | Series::Scatter { layer, .. }
            | Series::Histogram { layer, .. }
            | Series::ErrorBars { layer, .. }
            | Series::Mesh { layer, .. } => *layer,
        }
    }

    pub fn style(&self) -> &Style {
        match self {
            Series::Line { style, .. }
            | Series::Scatter { style, .. }
            | Series::Histogram { style, .. }
            | Series::ErrorBars { style, .. }
            | Series::Mesh { style, .. } => style,
        }
    }

    pub fn colorbar(&self) -> Option<&Colorbar> {
        match self {
            Series::Scatter { colorbar, .. } => Some(colorbar),
            Series::Mesh { colorbar, .. } => colorbar.as_ref(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Legend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendEntry {
    pub layer: usize,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Legend {
    /// Renderer location name, `best` unless set by `l`.
    pub location: String,
    pub entries: Vec<LegendEntry>,
}
