use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Directory layout and cache switches
// ---------------------------------------------------------------------------

const ENV_PREFIX: &str = "CTPLOT_";

/// Where tables, caches, exported figures and sessions live.
///
/// Relative directories are resolved against `basedir`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "Config::default_basedir")]
    pub basedir: PathBuf,
    #[serde(default = "Config::default_datadir")]
    pub datadir: PathBuf,
    #[serde(default = "Config::default_cachedir")]
    pub cachedir: PathBuf,
    #[serde(default = "Config::default_plotdir")]
    pub plotdir: PathBuf,
    #[serde(default = "Config::default_sessiondir")]
    pub sessiondir: PathBuf,
    /// Replay rate averages from the on-disk cache when available.
    #[serde(default = "Config::default_usecache")]
    pub usecache: bool,
    /// How long to wait for another writer of the same cache entry.
    #[serde(default = "Config::default_cache_wait_ms")]
    pub cache_wait_ms: u64,
}

impl Config {
    fn default_basedir() -> PathBuf {
        PathBuf::from(".")
    }
    fn default_datadir() -> PathBuf {
        PathBuf::from("data")
    }
    fn default_cachedir() -> PathBuf {
        PathBuf::from("cache")
    }
    fn default_plotdir() -> PathBuf {
        PathBuf::from("plots")
    }
    fn default_sessiondir() -> PathBuf {
        PathBuf::from("sessions")
    }
    fn default_usecache() -> bool {
        true
    }
    fn default_cache_wait_ms() -> u64 {
        2000
    }

    /// Read a JSON config file. A missing file yields defaults; an unreadable
    /// or malformed one is logged and also yields defaults.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    log::warn!("Failed to parse config {}: {err}. Using defaults.", path.display());
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!("Failed to read config {}: {err}. Using defaults.", path.display());
                Self::default()
            }
        }
    }

    /// Apply `CTPLOT_*` overrides from the process environment.
    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Apply overrides from an arbitrary lookup (keys without prefix).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("BASEDIR") {
            self.basedir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DATADIR") {
            self.datadir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CACHEDIR") {
            self.cachedir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PLOTDIR") {
            self.plotdir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SESSIONDIR") {
            self.sessiondir = PathBuf::from(v);
        }
        if let Some(v) = lookup("USECACHE") {
            match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.usecache = true,
                "0" | "false" | "no" | "off" => self.usecache = false,
                other => log::warn!("Ignoring {ENV_PREFIX}USECACHE={other}"),
            }
        }
        self
    }

    fn resolve(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.basedir.join(dir)
        }
    }

    pub fn data_path(&self) -> PathBuf {
        self.resolve(&self.datadir)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.resolve(&self.cachedir)
    }

    pub fn plot_path(&self) -> PathBuf {
        self.resolve(&self.plotdir)
    }

    pub fn session_path(&self) -> PathBuf {
        self.resolve(&self.sessiondir)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            basedir: Self::default_basedir(),
            datadir: Self::default_datadir(),
            cachedir: Self::default_cachedir(),
            plotdir: Self::default_plotdir(),
            sessiondir: Self::default_sessiondir(),
            usecache: Self::default_usecache(),
            cache_wait_ms: Self::default_cache_wait_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_or_default(&dir.path().join("nope.json"));
        assert_eq!(cfg, Config::default());
        assert!(cfg.usecache);
        assert_eq!(cfg.cache_path(), PathBuf::from("./cache"));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctplot.json");
        fs::write(&path, r#"{"basedir": "/srv/ctplot", "usecache": false}"#).unwrap();

        let cfg = Config::load_or_default(&path);
        assert!(!cfg.usecache);
        assert_eq!(cfg.data_path(), PathBuf::from("/srv/ctplot/data"));
        assert_eq!(cfg.cache_wait_ms, 2000);
    }

    #[test]
    fn malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(Config::load_or_default(&path), Config::default());
    }

    #[test]
    fn overrides_replace_dirs_and_flags() {
        let env: HashMap<&str, &str> =
            [("CACHEDIR", "/tmp/avg"), ("USECACHE", "0")].into_iter().collect();
        let cfg = Config::default().with_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.cache_path(), PathBuf::from("/tmp/avg"));
        assert!(!cfg.usecache);
    }
}
