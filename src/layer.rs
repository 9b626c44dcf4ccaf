use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PlotError, Result};
use crate::source::{stable_hash, SourceKey};

/// Number of independently configured layers per plot.
pub const LAYER_COUNT: usize = 10;

/// First characters of keys accepted from untrusted input.
pub const ACCEPTED_KEY_PREFIXES: &str = "xyzcmsorntwhfgl";

// ---------------------------------------------------------------------------
// ParameterBag – the flat key/value request
// ---------------------------------------------------------------------------

/// String keys and values describing one plot. Keys are `{field}{N}{sub}`
/// for layer `N` (e.g. `x0`, `o3density`, `x1b`) or global (`t`, `xr`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterBag(BTreeMap<String, String>);

impl ParameterBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key=value` tokens, as given on a command line.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut bag = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                PlotError::config(format!("parameter `{pair}` is not of the form key=value"))
            })?;
            bag.insert(key.trim(), value);
        }
        Ok(bag)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Trimmed value of `key`; empty values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Untrimmed value, for editing.
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drop keys that cannot name a plot parameter.
    pub fn sanitized(self) -> Self {
        Self(
            self.0
                .into_iter()
                .filter(|(k, _)| {
                    k.chars()
                        .next()
                        .is_some_and(|c| ACCEPTED_KEY_PREFIXES.contains(c))
                })
                .collect(),
        )
    }

    /// Hex SHA-256 of the bag, stable across runs and key order.
    pub fn hash(&self) -> Result<String> {
        stable_hash(&self.0)
    }

    /// Load a session file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Save as a session file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParameterBag {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// ---------------------------------------------------------------------------
// Mode / Twin / Scale
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Xy,
    H1,
    H2,
    #[serde(rename = "p")]
    Profile,
    Map,
}

impl Mode {
    pub const ALL: [Mode; 5] = [Mode::Xy, Mode::H1, Mode::H2, Mode::Profile, Mode::Map];

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Xy => "xy",
            Mode::H1 => "h1",
            Mode::H2 => "h2",
            Mode::Profile => "p",
            Mode::Map => "map",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Mode::Xy => "x/y line or scatter",
            Mode::H1 => "1D histogram",
            Mode::H2 => "2D histogram",
            Mode::Profile => "profile",
            Mode::Map => "map",
        }
    }
}

impl FromStr for Mode {
    type Err = PlotError;

    fn from_str(s: &str) -> Result<Self> {
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| PlotError::config(format!("unknown mode `{s}`")))
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which axis a layer is drawn on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Twin {
    #[default]
    Main,
    /// Own x axis, y axis shared with the main axes.
    X,
    /// Own y axis, x axis shared with the main axes.
    Y,
}

impl FromStr for Twin {
    type Err = PlotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Ok(Twin::Main),
            "x" => Ok(Twin::X),
            "y" => Ok(Twin::Y),
            other => Err(PlotError::config(format!(
                "twin axis must be `x` or `y`, got `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    #[default]
    Linear,
    Log,
}

impl FromStr for Scale {
    type Err = PlotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(Scale::Linear),
            "log" => Ok(Scale::Log),
            other => Err(PlotError::config(format!("unknown axis scale `{other}`"))),
        }
    }
}

// ---------------------------------------------------------------------------
// LayerSpec
// ---------------------------------------------------------------------------

/// One layer slot, read from keys ending in its index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerSpec {
    pub index: usize,
    pub x: Option<String>,
    pub y: Option<String>,
    pub z: Option<String>,
    pub cut: Option<String>,
    pub mode: Option<Mode>,
    /// Table reference `file:table`.
    pub source: Option<String>,
    pub name: Option<String>,
    pub twin: Twin,
    pub rate_window: Option<String>,
    pub rate_shift: String,
    pub rate_weight: String,
    pub x_bins: Option<String>,
    pub y_bins: Option<String>,
    /// Rendering options with the `o{N}` prefix stripped.
    pub options: BTreeMap<String, String>,
}

impl LayerSpec {
    pub fn from_bag(bag: &ParameterBag, index: usize) -> Result<Self> {
        let get = |field: &str| bag.get(&format!("{field}{index}")).map(str::to_string);

        let mode = get("m")
            .map(|m| m.parse::<Mode>())
            .transpose()
            .map_err(|e| e.in_layer(index, &format!("m{index}")))?;
        let twin = get("tw")
            .unwrap_or_default()
            .parse::<Twin>()
            .map_err(|e| e.in_layer(index, &format!("tw{index}")))?;

        let prefix = format!("o{index}");
        let options = bag
            .iter()
            .filter_map(|(k, v)| {
                let name = k.strip_prefix(&prefix)?;
                let value = v.trim();
                (!name.is_empty() && !value.is_empty()).then(|| (name.to_string(), value.to_string()))
            })
            .collect();

        Ok(Self {
            index,
            x: get("x"),
            y: get("y"),
            z: get("z"),
            cut: get("c"),
            mode,
            source: get("s"),
            name: get("n"),
            twin,
            rate_window: get("rw"),
            rate_shift: get("rs").unwrap_or_else(|| "1".to_string()),
            rate_weight: get("rc").unwrap_or_else(|| "1".to_string()),
            x_bins: bag.get(&format!("x{index}b")).map(str::to_string),
            y_bins: bag.get(&format!("y{index}b")).map(str::to_string),
            options,
        })
    }

    /// Layers without a mode or a source draw nothing.
    pub fn is_active(&self) -> bool {
        self.mode.is_some() && self.source.is_some()
    }

    /// The compound `file:table:window:shift:weight` token.
    pub fn source_token(&self) -> Option<String> {
        self.source.as_ref().map(|s| {
            format!(
                "{s}:{}:{}:{}",
                self.rate_window.as_deref().unwrap_or("None"),
                self.rate_shift,
                self.rate_weight
            )
        })
    }

    pub fn source_key(&self) -> Result<Option<SourceKey>> {
        self.source_token()
            .map(|t| SourceKey::parse(&t))
            .transpose()
            .map_err(|e| e.in_layer(self.index, &format!("s{}", self.index)))
    }

    /// Expression on axis `a` (`'x'`, `'y'`, `'z'` or `'c'` for the cut).
    pub fn expression(&self, a: char) -> Option<&str> {
        match a {
            'x' => self.x.as_deref(),
            'y' => self.y.as_deref(),
            'z' => self.z.as_deref(),
            'c' => self.cut.as_deref(),
            _ => None,
        }
    }

    /// Legend entry: explicit name or the non-empty x:y:z:cut expressions.
    pub fn legend_label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        ['x', 'y', 'z', 'c']
            .into_iter()
            .filter_map(|a| self.expression(a))
            .collect::<Vec<_>>()
            .join(":")
    }
}

pub fn build_layers(bag: &ParameterBag) -> Result<Vec<LayerSpec>> {
    (0..LAYER_COUNT).map(|i| LayerSpec::from_bag(bag, i)).collect()
}

// ---------------------------------------------------------------------------
// Figure-wide settings
// ---------------------------------------------------------------------------

/// Range / scale / label overrides for one axis dimension.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AxisSpec {
    /// Expression evaluating to `[min, max]`.
    pub range: Option<String>,
    pub scale: Scale,
    pub label: Option<String>,
}

impl AxisSpec {
    fn from_bag(bag: &ParameterBag, a: char, suffix: &str) -> Result<Self> {
        let scale_key = format!("{a}s{suffix}");
        Ok(Self {
            range: bag.get(&format!("{a}r{suffix}")).map(str::to_string),
            scale: bag
                .get(&scale_key)
                .map(str::parse::<Scale>)
                .transpose()
                .map_err(|e: PlotError| match e {
                    PlotError::Config(m) => PlotError::config(format!("`{scale_key}`: {m}")),
                    other => other,
                })?
                .unwrap_or_default(),
            label: bag.get(&format!("{a}l{suffix}")).map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalSpec {
    pub title: Option<String>,
    pub font_size: f64,
    /// Figure width in inches; height is `width / sqrt(2)`.
    pub width: f64,
    pub grid: bool,
    /// Legend location, `None` for the renderer's best guess. `"none"`
    /// disables the legend.
    pub legend: Option<String>,
    pub x: AxisSpec,
    pub y: AxisSpec,
    pub z: AxisSpec,
    pub x_twin: AxisSpec,
    pub y_twin: AxisSpec,
}

impl GlobalSpec {
    pub const DEFAULT_FONT_SIZE: f64 = 10.0;
    pub const DEFAULT_WIDTH: f64 = 10.0;

    pub fn from_bag(bag: &ParameterBag) -> Result<Self> {
        let number = |key: &str, default: f64| -> Result<f64> {
            match bag.get(key) {
                None => Ok(default),
                Some(v) => v
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite() && *v > 0.0)
                    .ok_or_else(|| PlotError::config(format!("`{key}` must be a positive number, got `{v}`"))),
            }
        };
        Ok(Self {
            title: bag.get("t").map(str::to_string),
            font_size: number("f", Self::DEFAULT_FONT_SIZE)?,
            width: number("w", Self::DEFAULT_WIDTH)?,
            grid: !matches!(bag.get("g"), Some("0" | "false" | "False" | "off" | "no")),
            legend: bag.get("l").map(str::to_string),
            x: AxisSpec::from_bag(bag, 'x', "")?,
            y: AxisSpec::from_bag(bag, 'y', "")?,
            z: AxisSpec::from_bag(bag, 'z', "")?,
            x_twin: AxisSpec::from_bag(bag, 'x', "tw")?,
            y_twin: AxisSpec::from_bag(bag, 'y', "tw")?,
        })
    }

    pub fn height(&self) -> f64 {
        self.width / std::f64::consts::SQRT_2
    }

    pub fn legend_enabled(&self) -> bool {
        self.legend.as_deref() != Some("none")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(pairs: &[(&str, &str)]) -> ParameterBag {
        pairs.iter().copied().collect()
    }

    #[test]
    fn builds_ten_layers_with_defaults() {
        let layers = build_layers(&bag(&[
            ("m0", "h1"),
            ("s0", "data/sample:/raw/weather"),
            ("x0", " T_a "),
            ("x0b", "[-10, 30, 40]"),
            ("o0density", "1"),
            ("o0color", "r"),
            ("o1color", "b"),
            ("y0", ""),
        ]))
        .unwrap();
        assert_eq!(layers.len(), LAYER_COUNT);

        let l = &layers[0];
        assert!(l.is_active());
        assert_eq!(l.mode, Some(Mode::H1));
        assert_eq!(l.x.as_deref(), Some("T_a"));
        assert_eq!(l.y, None);
        assert_eq!(l.x_bins.as_deref(), Some("[-10, 30, 40]"));
        assert_eq!(l.options.len(), 2);
        assert_eq!(l.options["density"], "1");
        assert_eq!(l.rate_shift, "1");
        assert_eq!(l.rate_weight, "1");
        assert_eq!(
            l.source_token().as_deref(),
            Some("data/sample:/raw/weather:None:1:1")
        );
        assert!(!layers[1].is_active());
        assert_eq!(layers[1].options["color"], "b");
    }

    #[test]
    fn unknown_mode_names_the_field() {
        let err = build_layers(&bag(&[("m2", "bar"), ("s2", "a:/b")])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: layer 2, field `m2`: unknown mode `bar`"
        );
    }

    #[test]
    fn twin_assignment() {
        let layers = build_layers(&bag(&[("tw0", "y"), ("tw1", "")])).unwrap();
        assert_eq!(layers[0].twin, Twin::Y);
        assert_eq!(layers[1].twin, Twin::Main);
        assert!(build_layers(&bag(&[("tw0", "z")])).is_err());
    }

    #[test]
    fn legend_label_joins_expressions() {
        let l = LayerSpec::from_bag(&bag(&[("x3", "time"), ("y3", "T_a"), ("c3", "T_a > 0")]), 3).unwrap();
        assert_eq!(l.legend_label(), "time:T_a:T_a > 0");
        let named = LayerSpec::from_bag(&bag(&[("x3", "time"), ("n3", "Zeuthen")]), 3).unwrap();
        assert_eq!(named.legend_label(), "Zeuthen");
    }

    #[test]
    fn globals_and_axes() {
        let g = GlobalSpec::from_bag(&bag(&[
            ("t", "Weather"),
            ("w", "8"),
            ("ys", "log"),
            ("yltw", "pressure"),
            ("l", "none"),
        ]))
        .unwrap();
        assert_eq!(g.title.as_deref(), Some("Weather"));
        assert_eq!(g.font_size, 10.0);
        assert!((g.height() - 8.0 / 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(g.y.scale, Scale::Log);
        assert_eq!(g.y_twin.label.as_deref(), Some("pressure"));
        assert!(g.grid);
        assert!(!g.legend_enabled());

        assert!(GlobalSpec::from_bag(&bag(&[("xs", "sqrt")])).is_err());
        assert!(GlobalSpec::from_bag(&bag(&[("f", "-2")])).is_err());
    }

    #[test]
    fn pairs_sessions_and_sanitizing() {
        let b = ParameterBag::from_pairs(["m0=xy", "x0=time", "c0=T_a>=0", "__class__=x"]).unwrap();
        assert_eq!(b.get("c0"), Some("T_a>=0"));
        assert!(ParameterBag::from_pairs(["oops"]).is_err());

        let clean = b.clone().sanitized();
        assert_eq!(clean.len(), 3);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions/one.json");
        clean.save(&path).unwrap();
        let back = ParameterBag::load(&path).unwrap();
        assert_eq!(back, clean);
        assert_eq!(back.hash().unwrap(), clean.hash().unwrap());
        assert_ne!(b.hash().unwrap(), clean.hash().unwrap());
    }
}
