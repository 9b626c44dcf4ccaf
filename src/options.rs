use std::collections::BTreeMap;

use crate::error::{PlotError, Result};
use crate::expr::{eval_constant, Value};
use crate::layer::Mode;

// ---------------------------------------------------------------------------
// Recognized per-mode options
// ---------------------------------------------------------------------------

/// `(mode, key, default, effect)` for every option a mode interprets.
/// Other option keys are handed to the renderer untouched.
pub const RECOGNIZED: &[(Mode, &str, &str, &str)] = &[
    (Mode::Xy, "markersize", "2", "scatter marker size when z is given"),
    (Mode::Xy, "cbfrac", "0.04", "colorbar width as a fraction of the axes"),
    (Mode::Xy, "cblabel", "z expression", "colorbar label"),
    (Mode::H1, "density", "false", "normalise to unit area"),
    (Mode::H1, "cumulative", "0", "1 forward, -1 reverse cumulative sum"),
    (Mode::H1, "style", "histline if density else hist", "fill / hist / scat / line"),
    (Mode::H1, "xerr", "false", "half bin width error bars"),
    (Mode::H1, "yerr", "false", "propagated error bars"),
    (Mode::H1, "capsize", "3 with error bars, else 0", "error bar cap size"),
    (Mode::H2, "style", "color", "color / box / contour, fill for filled contours"),
    (Mode::H2, "density", "false", "normalise to unit volume"),
    (Mode::H2, "log", "false", "log10 of the bin content"),
    (Mode::H2, "cbfrac", "0.04", "colorbar width as a fraction of the axes"),
    (Mode::H2, "cblabel", "bincontent", "colorbar label"),
    (Mode::H2, "levels", "10", "number of contour levels"),
    (Mode::H2, "hidezero", "log or filled", "leave empty bins blank"),
    (Mode::H2, "colorbar", "filled", "draw a colorbar"),
    (Mode::H2, "clabels", "not filled", "label contour lines"),
    (Mode::Profile, "xerr", "false", "half bin width error bars"),
    (Mode::Profile, "yerr", "false", "standard deviation error bars"),
    (Mode::Profile, "capsize", "3", "error bar cap size"),
    (Mode::Profile, "marker", ".", "marker at each bin"),
    (Mode::Map, "margin", "0.05", "fraction added around the data"),
    (Mode::Map, "width", "10e6", "map width in metres"),
    (Mode::Map, "height", "width", "map height in metres"),
    (Mode::Map, "boundarylat", "50", "boundary latitude of polar projections"),
    (Mode::Map, "projection", "cyl", "map projection"),
    (Mode::Map, "drawcoastline", "1", "draw coast lines"),
    (Mode::Map, "drawgrid", "1", "draw meridians and parallels"),
    (Mode::Map, "drawspecgrid", "1", "draw a grid through the data centre"),
    (Mode::Map, "drawcountries", "0", "draw country borders"),
    (Mode::Map, "bluemarble", "0", "satellite background"),
    (Mode::Map, "nightshade", "none", "shade the night side at this time"),
    (Mode::Map, "markersize", "6", "overlay marker size when z is given"),
    (Mode::Map, "cbfrac", "0.04", "colorbar width as a fraction of the axes"),
    (Mode::Map, "cblabel", "z label", "colorbar label"),
];

pub fn is_recognized(mode: Mode, key: &str) -> bool {
    RECOGNIZED.iter().any(|(m, k, ..)| *m == mode && *k == key)
}

// ---------------------------------------------------------------------------
// Typed option lookup
// ---------------------------------------------------------------------------

/// Types an option string can be read as. Values are evaluated as
/// expressions first, so `1`, `True` and `2 > 1` all read as `true`.
pub trait OptionValue: Sized {
    fn from_option(raw: &str) -> Result<Self>;
}

impl OptionValue for bool {
    fn from_option(raw: &str) -> Result<Self> {
        match eval_constant(raw) {
            Ok(v) => Ok(v.truthy()),
            Err(_) => match raw.to_ascii_lowercase().as_str() {
                "yes" | "on" => Ok(true),
                "no" | "off" | "none" => Ok(false),
                _ => Err(PlotError::config(format!("`{raw}` is not a boolean"))),
            },
        }
    }
}

impl OptionValue for f64 {
    fn from_option(raw: &str) -> Result<Self> {
        eval_constant(raw)
            .and_then(|v| v.as_f64())
            .map_err(|e| PlotError::config(format!("`{raw}` is not a number: {e}")))
    }
}

impl OptionValue for i64 {
    fn from_option(raw: &str) -> Result<Self> {
        let v = f64::from_option(raw)?;
        if v.fract() != 0.0 || !v.is_finite() {
            return Err(PlotError::config(format!("`{raw}` is not an integer")));
        }
        Ok(v as i64)
    }
}

impl OptionValue for usize {
    fn from_option(raw: &str) -> Result<Self> {
        let v = i64::from_option(raw)?;
        usize::try_from(v).map_err(|_| PlotError::config(format!("`{raw}` must not be negative")))
    }
}

/// Quoted strings lose their quotes; anything that is not an expression is
/// taken literally.
impl OptionValue for String {
    fn from_option(raw: &str) -> Result<Self> {
        match eval_constant(raw) {
            Ok(Value::Str(s)) => Ok(s),
            _ => Ok(raw.to_string()),
        }
    }
}

/// Read option `key`, falling back to `default` when it is not set.
pub fn get_option<T: OptionValue>(
    options: &BTreeMap<String, String>,
    key: &str,
    default: T,
) -> Result<T> {
    match options.get(key) {
        None => Ok(default),
        Some(raw) => T::from_option(raw).map_err(|e| match e {
            PlotError::Config(m) => PlotError::config(format!("option `{key}`: {m}")),
            other => other,
        }),
    }
}

/// A layer's options as seen by one mode.
#[derive(Debug, Clone)]
pub struct LayerOptions<'a> {
    mode: Mode,
    raw: &'a BTreeMap<String, String>,
}

impl<'a> LayerOptions<'a> {
    pub fn new(mode: Mode, raw: &'a BTreeMap<String, String>) -> Self {
        Self { mode, raw }
    }

    pub fn get<T: OptionValue>(&self, key: &str, default: T) -> Result<T> {
        get_option(self.raw, key, default)
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.raw.contains_key(key)
    }

    /// Options the mode does not interpret, for the renderer.
    pub fn passthrough(&self) -> BTreeMap<String, String> {
        self.raw
            .iter()
            .filter(|(k, _)| !is_recognized(self.mode, k))
            .map(|(k, v)| (k.clone(), String::from_option(v).unwrap_or_else(|_| v.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn typed_lookup_with_defaults() {
        let o = opts(&[("density", "1"), ("cumulative", "-1"), ("levels", "4*5"), ("style", "fillhist")]);
        assert!(get_option(&o, "density", false).unwrap());
        assert_eq!(get_option(&o, "cumulative", 0i64).unwrap(), -1);
        assert_eq!(get_option(&o, "levels", 10usize).unwrap(), 20);
        assert_eq!(get_option(&o, "style", "hist".to_string()).unwrap(), "fillhist");
        assert_eq!(get_option(&o, "cbfrac", 0.04).unwrap(), 0.04);
    }

    #[test]
    fn bad_values_name_the_option() {
        let o = opts(&[("levels", "many"), ("capsize", "-3")]);
        let err = get_option(&o, "levels", 10usize).unwrap_err();
        assert!(err.to_string().contains("option `levels`"));
        assert!(get_option(&o, "capsize", 0usize).is_err());
    }

    #[test]
    fn booleans_accept_words_and_expressions() {
        let o = opts(&[("a", "True"), ("b", "off"), ("c", "2 > 1"), ("d", "0")]);
        assert!(get_option(&o, "a", false).unwrap());
        assert!(!get_option(&o, "b", true).unwrap());
        assert!(get_option(&o, "c", false).unwrap());
        assert!(!get_option(&o, "d", true).unwrap());
    }

    #[test]
    fn unrecognized_options_pass_through() {
        let o = opts(&[("density", "1"), ("color", "'r'"), ("linestyle", "--")]);
        let layer = LayerOptions::new(Mode::H1, &o);
        let rest = layer.passthrough();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest["color"], "r");
        assert_eq!(rest["linestyle"], "--");
    }
}
