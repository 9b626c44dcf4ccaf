use serde::Serialize;

use crate::binning::finite_range;
use crate::error::{PlotError, Result};
use crate::expr::functions::parse_date;
use crate::options::LayerOptions;
use crate::ticks::{OnlyInside, TickLocator};

/// Obliquity of the ecliptic, for the tropic and polar circle parallels.
const ECLIPTIC_DEG: f64 = 23.44;

/// Landmarks marked on every map as `(name, lat, lon)`.
pub const PLACES: [(&str, f64, f64); 3] = [
    ("Neumayer-St.", -70.6666, -8.2666),
    ("Amundsen-Scott-St.", -90.0, 0.0),
    ("DESY Zeuthen", 52.346142, 13.633432),
];

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapOptions {
    pub margin: f64,
    pub width: f64,
    pub height: Option<f64>,
    pub boundarylat: f64,
    pub projection: String,
    pub drawcoastline: bool,
    pub drawgrid: bool,
    pub drawspecgrid: bool,
    pub drawcountries: bool,
    pub bluemarble: bool,
    /// Shade the night side at this time (seconds since the store epoch).
    pub nightshade: Option<f64>,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            margin: 0.05,
            width: 10e6,
            height: None,
            boundarylat: 50.0,
            projection: "cyl".to_string(),
            drawcoastline: true,
            drawgrid: true,
            drawspecgrid: true,
            drawcountries: false,
            bluemarble: false,
            nightshade: None,
        }
    }
}

impl MapOptions {
    pub fn from_layer(options: &LayerOptions<'_>) -> Result<Self> {
        let d = Self::default();
        let height: f64 = options.get("height", f64::NAN)?;
        let nightshade = if options.is_set("nightshade") {
            let text: String = options.get("nightshade", String::new())?;
            Some(parse_date(&text).map_err(|e| PlotError::config(format!("option `nightshade`: {e}")))?)
        } else {
            None
        };
        Ok(Self {
            margin: options.get("margin", d.margin)?,
            width: options.get("width", d.width)?,
            height: (!height.is_nan()).then_some(height),
            boundarylat: options.get("boundarylat", d.boundarylat)?,
            projection: options.get("projection", d.projection)?,
            drawcoastline: options.get("drawcoastline", d.drawcoastline)?,
            drawgrid: options.get("drawgrid", d.drawgrid)?,
            drawspecgrid: options.get("drawspecgrid", d.drawspecgrid)?,
            drawcountries: options.get("drawcountries", d.drawcountries)?,
            bluemarble: options.get("bluemarble", d.bluemarble)?,
            nightshade,
        })
    }
}

// ---------------------------------------------------------------------------
// Map frame
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Projection {
    /// Equirectangular: plot coordinates are degrees of longitude/latitude.
    Cyl,
}

/// Dashed guide lines drawn when `drawspecgrid` is on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecialGrid {
    pub tropics_and_circles: Vec<f64>,
    pub equator: f64,
    pub prime_meridian: f64,
}

/// Background a map layer is drawn over, with the projection that maps
/// `(lon, lat)` into its plot coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapFrame {
    pub projection: Projection,
    pub lon_range: (f64, f64),
    pub lat_range: (f64, f64),
    pub parallels: Vec<f64>,
    pub meridians: Vec<f64>,
    pub special_grid: Option<SpecialGrid>,
    pub coastlines: bool,
    pub countries: bool,
    pub bluemarble: bool,
    pub nightshade: Option<f64>,
    /// Landmarks in plot coordinates.
    pub places: Vec<(String, f64, f64)>,
}

impl MapFrame {
    pub fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        match self.projection {
            Projection::Cyl => (lon, lat),
        }
    }

    /// Project aligned longitude/latitude slices.
    pub fn project_all(&self, lon: &[f64], lat: &[f64]) -> (Vec<f64>, Vec<f64>) {
        lon.iter().zip(lat).map(|(x, y)| self.project(*x, *y)).unzip()
    }
}

// ---------------------------------------------------------------------------
// Renderers
// ---------------------------------------------------------------------------

/// Builds the map background for a layer's coordinates.
pub trait MapRenderer {
    fn draw_map(&self, lat: &[f64], lon: &[f64], options: &MapOptions) -> Result<MapFrame>;
}

/// Supports the `cyl` projection only.
pub struct Equirectangular<T> {
    ticks: T,
}

impl<T: TickLocator> Equirectangular<T> {
    pub fn new(ticks: T) -> Self {
        Self { ticks }
    }
}

impl<T: TickLocator> MapRenderer for Equirectangular<T> {
    fn draw_map(&self, lat: &[f64], lon: &[f64], options: &MapOptions) -> Result<MapFrame> {
        if options.projection != "cyl" {
            return Err(PlotError::config(format!(
                "map projection `{}` is not available, use `cyl`",
                options.projection
            )));
        }
        let (lat_min, lat_max) = finite_range(lat)
            .ok_or_else(|| PlotError::data_range("map needs at least one finite latitude"))?;
        let (lon_min, lon_max) = finite_range(lon)
            .ok_or_else(|| PlotError::data_range("map needs at least one finite longitude"))?;

        let m = options.margin;
        let lat_span = lat_max - lat_min;
        let lat_range = (
            (lat_min - m * lat_span).max(-90.0),
            (lat_max + m * lat_span).min(90.0),
        );
        let lon_span = lon_max - lon_min;
        let lon_range = (lon_min - m * lon_span, lon_max + m * lon_span);

        let (parallels, meridians) = if options.drawgrid {
            (
                self.ticks.ticks(lat_range.0, lat_range.1, 6.0, OnlyInside::Any),
                self.ticks.ticks(lon_range.0, lon_range.1, 6.0, OnlyInside::Any),
            )
        } else {
            (Vec::new(), Vec::new())
        };

        let special_grid = options.drawspecgrid.then(|| SpecialGrid {
            tropics_and_circles: vec![
                -90.0 + ECLIPTIC_DEG,
                -ECLIPTIC_DEG,
                ECLIPTIC_DEG,
                90.0 - ECLIPTIC_DEG,
            ],
            equator: 0.0,
            prime_meridian: 0.0,
        });

        log::debug!("Map frame lon {lon_range:?} lat {lat_range:?}");
        Ok(MapFrame {
            projection: Projection::Cyl,
            lon_range,
            lat_range,
            parallels,
            meridians,
            special_grid,
            coastlines: options.drawcoastline && !options.bluemarble,
            countries: options.drawcoastline && options.drawcountries && !options.bluemarble,
            bluemarble: options.bluemarble,
            nightshade: options.nightshade,
            places: PLACES
                .iter()
                .map(|(name, lat, lon)| (name.to_string(), *lon, *lat))
                .collect(),
        })
    }
}
