use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::loader::load_file;
use super::model::{Table, TableSpecs};
use crate::error::{PlotError, Result};
use crate::source::SourceKey;

/// File extensions a table may be stored with, in lookup order.
pub const TABLE_EXTENSIONS: [&str; 3] = ["parquet", "csv", "json"];

// ---------------------------------------------------------------------------
// TableReader – where fetched rows come from
// ---------------------------------------------------------------------------

/// Opens the table a source refers to. Averaging parameters of the key are
/// ignored; only `file` and `table` select the data.
pub trait TableReader {
    fn open(&self, key: &SourceKey) -> Result<Table>;
}

impl<T: TableReader + ?Sized> TableReader for &T {
    fn open(&self, key: &SourceKey) -> Result<Table> {
        (**self).open(key)
    }
}

// ---------------------------------------------------------------------------
// FileStore – tables as files below a store directory
// ---------------------------------------------------------------------------

/// Store paths in source keys are resolved against `base` unless absolute.
#[derive(Debug, Clone)]
pub struct FileStore {
    base: PathBuf,
}

impl FileStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// The file backing `table` in `store`, trying each known extension.
    pub fn locate(&self, store: &str, table: &str) -> Option<PathBuf> {
        let store = Path::new(store);
        let dir = if store.is_absolute() {
            store.to_path_buf()
        } else {
            self.base.join(store)
        };
        let stem = dir.join(table.trim_start_matches('/'));
        TABLE_EXTENSIONS
            .iter()
            .map(|ext| stem.with_extension(ext))
            .find(|p| p.is_file())
    }
}

impl TableReader for FileStore {
    fn open(&self, key: &SourceKey) -> Result<Table> {
        let path = self.locate(&key.file, &key.table).ok_or_else(|| {
            PlotError::config(format!("no table {} in store {}", key.table, key.file))
        })?;
        log::info!("Opening table {} from {}", key.table, path.display());
        load_file(&path, &key.table)
            .map_err(|e| PlotError::config(format!("loading {}: {e:#}", path.display())))
    }
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Every table of every store directly below `datadir`, keyed
/// `"<store>:<table>"` where `<store>` is `datadir/<name>`.
pub fn available_tables(datadir: &Path) -> Result<BTreeMap<String, TableSpecs>> {
    let mut out = BTreeMap::new();
    if !datadir.is_dir() {
        log::warn!("Data directory {} does not exist", datadir.display());
        return Ok(out);
    }

    for entry in std::fs::read_dir(datadir)? {
        let store = entry?.path();
        if !store.is_dir() {
            continue;
        }
        let mut files = Vec::new();
        collect_tables(&store, &mut files)?;
        for file in files {
            let Ok(rel) = file.strip_prefix(&store) else {
                continue;
            };
            let table = format!("/{}", rel.with_extension("").to_string_lossy().replace('\\', "/"));
            match load_file(&file, &table) {
                Ok(t) => {
                    out.insert(format!("{}:{table}", store.display()), t.specs());
                }
                Err(e) => log::warn!("Skipping {}: {e:#}", file.display()),
            }
        }
    }
    Ok(out)
}

fn collect_tables(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_tables(&path, out)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| TABLE_EXTENSIONS.contains(&e))
        {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::write_parquet;

    fn weather() -> Table {
        Table::new(
            "weather",
            "/raw/weather",
            vec!["time".into(), "T_a".into()],
            vec!["s".into(), "°C".into()],
            vec![vec![0.0, 60.0], vec![1.0, 2.0]],
        )
        .unwrap()
    }

    #[test]
    fn opens_tables_relative_to_base() {
        let dir = tempfile::tempdir().unwrap();
        write_parquet(&dir.path().join("sample/raw/weather.parquet"), &weather()).unwrap();

        let store = FileStore::new(dir.path());
        let key = SourceKey::parse("sample:/raw/weather:None:1:None").unwrap();
        let table = store.open(&key).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.unit_of("T_a"), "°C");

        let missing = SourceKey::table("sample", "/raw/nothing");
        assert!(matches!(store.open(&missing), Err(PlotError::Config(_))));
    }

    #[test]
    fn lists_every_table() {
        let dir = tempfile::tempdir().unwrap();
        write_parquet(&dir.path().join("sample/raw/weather.parquet"), &weather()).unwrap();
        std::fs::write(dir.path().join("sample/nm.csv"), "time [s],counts\n0,5\n").unwrap();
        std::fs::write(dir.path().join("README"), "not a store").unwrap();

        let tables = available_tables(dir.path()).unwrap();
        let keys: Vec<&String> = tables.keys().collect();
        assert_eq!(keys.len(), 2);
        assert!(keys[0].ends_with("sample:/nm"));
        assert!(keys[1].ends_with("sample:/raw/weather"));
        assert_eq!(tables[keys[1]].rows, 2);
        assert_eq!(tables[keys[0]].units, vec!["s", "?"]);
    }
}
