use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{PlotError, Result};
use crate::expr::{eval_constant, Value};

/// Literal used in source tokens for an absent window or weight.
pub const NONE_TOKEN: &str = "None";

// ---------------------------------------------------------------------------
// SourceKey – canonical identity of one fetch
// ---------------------------------------------------------------------------

/// A table reference plus optional rate-averaging parameters.
///
/// Built from tokens of the form `file:table:window:shift:weight`. Two
/// tokens that describe the same fetch compare equal after normalization:
///
/// * paths use `/`, repeated slashes and `./` segments are dropped,
///   trailing slashes are removed, the table path always starts with `/`
/// * `window` and `shift` are evaluated, so `3600` and `60*60` are equal
/// * without a window, `shift` and `weight` have no effect and are reset
/// * a weight of `1` is the same as no weight
#[derive(Debug, Clone, Serialize)]
pub struct SourceKey {
    pub file: String,
    pub table: String,
    /// Averaging window in seconds.
    pub window: Option<f64>,
    /// Window advance as a fraction of `window`, in `(0, 1]`.
    pub shift: f64,
    /// Per-row weight expression used when averaging.
    pub weight: Option<String>,
}

impl SourceKey {
    /// A plain, unaveraged table reference.
    pub fn table(file: &str, table: &str) -> Self {
        Self {
            file: normalize_path(file),
            table: normalize_table(table),
            window: None,
            shift: 1.0,
            weight: None,
        }
    }

    pub fn parse(token: &str) -> Result<Self> {
        // split from the right so store paths may contain ':'
        let mut parts: Vec<&str> = token.rsplitn(5, ':').collect();
        if parts.len() < 5 {
            return Err(PlotError::config(format!(
                "source `{token}` needs 5 fields file:table:window:shift:weight, found {}",
                parts.len()
            )));
        }
        parts.reverse();
        let (file, table, window, shift, weight) =
            (parts[0].trim(), parts[1].trim(), parts[2], parts[3], parts[4]);

        if file.is_empty() || table.is_empty() {
            return Err(PlotError::config(format!(
                "source `{token}` has an empty file or table"
            )));
        }

        let window = match absent(window) {
            None => None,
            Some(w) => {
                let w = eval_number(w, "window")?;
                if !w.is_finite() || w <= 0.0 {
                    return Err(PlotError::config(format!(
                        "averaging window must be positive, got {w}"
                    )));
                }
                Some(w)
            }
        };

        let mut key = Self::table(file, table);
        if window.is_none() {
            return Ok(key);
        }

        let shift = match absent(shift) {
            None => 1.0,
            Some(s) => eval_number(s, "shift")?,
        };
        if !(shift > 0.0 && shift <= 1.0) {
            return Err(PlotError::config(format!(
                "window shift must be in (0, 1], got {shift}"
            )));
        }

        key.window = window;
        key.shift = shift;
        // a constant weight of one is the default
        key.weight = absent(weight).filter(|w| *w != "1").map(str::to_string);
        Ok(key)
    }

    pub fn is_averaged(&self) -> bool {
        self.window.is_some()
    }

    /// Weight expression applied while averaging; `1` when unset.
    pub fn weight_expr(&self) -> &str {
        self.weight.as_deref().unwrap_or("1")
    }

    /// Hex SHA-256 of the canonical JSON form, stable across runs.
    pub fn stable_hash(&self) -> Result<String> {
        stable_hash(self)
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:", self.file, self.table)?;
        match self.window {
            Some(w) => write!(f, "{w}")?,
            None => f.write_str(NONE_TOKEN)?,
        }
        write!(f, ":{}:{}", self.shift, self.weight.as_deref().unwrap_or(NONE_TOKEN))
    }
}

impl PartialEq for SourceKey {
    fn eq(&self, other: &Self) -> bool {
        self.file == other.file
            && self.table == other.table
            && self.window.map(f64::to_bits) == other.window.map(f64::to_bits)
            && self.shift.to_bits() == other.shift.to_bits()
            && self.weight == other.weight
    }
}

impl Eq for SourceKey {}

impl Hash for SourceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.file.hash(state);
        self.table.hash(state);
        self.window.map(f64::to_bits).hash(state);
        self.shift.to_bits().hash(state);
        self.weight.hash(state);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn absent(field: &str) -> Option<&str> {
    let field = field.trim();
    if field.is_empty() || field == NONE_TOKEN {
        None
    } else {
        Some(field)
    }
}

fn eval_number(expr: &str, what: &str) -> Result<f64> {
    match eval_constant(expr) {
        Ok(Value::Number(v)) => Ok(v),
        Ok(other) => Err(PlotError::config(format!(
            "{what} `{expr}` must be a number, got a {}",
            other.type_name()
        ))),
        Err(e) => Err(PlotError::config(format!("{what} `{expr}`: {e}"))),
    }
}

pub fn normalize_path(path: &str) -> String {
    let unified = path.trim().replace('\\', "/");
    let absolute = unified.starts_with('/');
    let segments: Vec<&str> = unified
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    let joined = segments.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

fn normalize_table(table: &str) -> String {
    let path = normalize_path(table);
    if path.starts_with('/') {
        path
    } else if path == "." {
        "/".to_string()
    } else {
        format!("/{path}")
    }
}

/// Hex SHA-256 of a value's JSON serialisation.
pub fn stable_hash<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value)?;
    let digest = Sha256::digest(&bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{b:02x}");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn absent_window_and_weight() {
        let key = SourceKey::parse("f.h5:/t:None:1:None").unwrap();
        assert_eq!(key.file, "f.h5");
        assert_eq!(key.table, "/t");
        assert_eq!(key.window, None);
        assert_eq!(key.shift, 1.0);
        assert_eq!(key.weight, None);
        assert!(!key.is_averaged());
    }

    #[test]
    fn too_few_fields_is_a_config_error() {
        assert!(matches!(SourceKey::parse("a:b"), Err(PlotError::Config(_))));
    }

    #[test]
    fn averaged_source() {
        let key = SourceKey::parse("data/sample:/raw/weather:24*3600:0.5:T_a > 0").unwrap();
        assert_eq!(key.window, Some(86400.0));
        assert_eq!(key.shift, 0.5);
        assert_eq!(key.weight_expr(), "T_a > 0");
    }

    #[test]
    fn invalid_window_and_shift() {
        assert!(matches!(SourceKey::parse("f:/t:0:1:None"), Err(PlotError::Config(_))));
        assert!(matches!(SourceKey::parse("f:/t:-60:1:None"), Err(PlotError::Config(_))));
        assert!(matches!(SourceKey::parse("f:/t:60:0:None"), Err(PlotError::Config(_))));
        assert!(matches!(SourceKey::parse("f:/t:60:1.5:None"), Err(PlotError::Config(_))));
        assert!(matches!(SourceKey::parse("f:/t:[1,2]:1:None"), Err(PlotError::Config(_))));
    }

    #[test]
    fn equality_is_structural() {
        let a = SourceKey::parse("./data//sample/:raw/weather:3600:1:None").unwrap();
        let b = SourceKey::parse("data\\sample:/raw/weather/:60*60: 1 :None").unwrap();
        assert_eq!(a, b);
        let set: HashSet<SourceKey> = [a.clone(), b].into_iter().collect();
        assert_eq!(set.len(), 1);
        assert_eq!(a.stable_hash().unwrap(), a.clone().stable_hash().unwrap());

        // shift and weight do not matter without a window
        let c = SourceKey::parse("data/sample:/raw/weather:None:0.5:1").unwrap();
        assert_eq!(c, SourceKey::table("data/sample", "/raw/weather"));
    }

    #[test]
    fn windows_distinguish_sources() {
        let a = SourceKey::parse("s:/t:3600:1:None").unwrap();
        let b = SourceKey::parse("s:/t:7200:1:None").unwrap();
        assert_ne!(a, b);
        assert_ne!(a.stable_hash().unwrap(), b.stable_hash().unwrap());
    }

    #[test]
    fn colons_in_store_path_survive() {
        let key = SourceKey::parse("C:/stores/nm:/counts:None:1:None").unwrap();
        assert_eq!(key.file, "C:/stores/nm");
        assert_eq!(key.table, "/counts");
    }

    #[test]
    fn display_round_trips() {
        let key = SourceKey::parse("s:/t:3600:0.25:rate").unwrap();
        assert_eq!(key.to_string(), "s:/t:3600:0.25:rate");
        assert_eq!(SourceKey::parse(&key.to_string()).unwrap(), key);
    }
}
