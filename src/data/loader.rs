use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{ArrayRef, AsArray, Float64Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::Deserialize;

use super::model::{Table, UNKNOWN_UNIT};

const META_TITLE: &str = "title";
const META_PATH: &str = "path";
const META_UNITS: &str = "units";

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load one table from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – numeric columns, `title` / `units` (JSON list) metadata
/// * `.csv`     – header cells `name [unit]`, one row per record
/// * `.json`    – `{ "title": ..., "columns": [...], "units": [...], "rows": [[...], ...] }`
pub fn load_file(path: &Path, table_path: &str) -> Result<Table> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let table = match ext.as_str() {
        "parquet" | "pq" => load_parquet(path, table_path),
        "json" => load_json(path, table_path),
        "csv" => load_csv(path, table_path),
        other => bail!("Unsupported file extension: .{other}"),
    }?;

    log::debug!(
        "Loaded {} ({} rows, columns {:?})",
        path.display(),
        table.len(),
        table.column_names
    );
    Ok(table)
}

fn file_title(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct JsonTable {
    #[serde(default)]
    title: Option<String>,
    columns: Vec<String>,
    #[serde(default)]
    units: Option<Vec<String>>,
    /// `null` cells become NaN.
    rows: Vec<Vec<Option<f64>>>,
}

fn load_json(path: &Path, table_path: &str) -> Result<Table> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let raw: JsonTable = serde_json::from_str(&text).context("parsing JSON table")?;

    let units = raw
        .units
        .unwrap_or_else(|| vec![UNKNOWN_UNIT.to_string(); raw.columns.len()]);
    let rows: Vec<Vec<f64>> = raw
        .rows
        .iter()
        .map(|r| r.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
        .collect();

    Table::from_rows(
        raw.title.unwrap_or_else(|| file_title(path)),
        table_path,
        raw.columns,
        units,
        &rows,
    )
    .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// Split a header cell `T_a [°C]` into name and unit.
fn split_header(cell: &str) -> (String, String) {
    let cell = cell.trim();
    match (cell.find('['), cell.ends_with(']')) {
        (Some(open), true) => (
            cell[..open].trim().to_string(),
            cell[open + 1..cell.len() - 1].trim().to_string(),
        ),
        _ => (cell.to_string(), UNKNOWN_UNIT.to_string()),
    }
}

fn parse_cell(s: &str) -> Option<f64> {
    match s.trim() {
        "" | "nan" | "NaN" => Some(f64::NAN),
        "true" | "True" => Some(1.0),
        "false" | "False" => Some(0.0),
        other => other.parse::<f64>().ok(),
    }
}

/// CSV layout: header row of `name [unit]` cells, numeric records below.
/// Columns with any non-numeric cell are skipped.
fn load_csv(path: &Path, table_path: &str) -> Result<Table> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<(String, String)> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(split_header)
        .collect();

    let mut columns: Vec<Option<Vec<f64>>> = vec![Some(Vec::new()); headers.len()];

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        for (col_idx, column) in columns.iter_mut().enumerate() {
            let Some(values) = column else {
                continue;
            };
            match parse_cell(record.get(col_idx).unwrap_or("")) {
                Some(v) => values.push(v),
                None => {
                    log::warn!(
                        "{}: column '{}' is not numeric (row {row_no}), skipping it",
                        path.display(),
                        headers[col_idx].0
                    );
                    *column = None;
                }
            }
        }
    }

    let mut names = Vec::new();
    let mut units = Vec::new();
    let mut data = Vec::new();
    for ((name, unit), column) in headers.into_iter().zip(columns) {
        if let Some(values) = column {
            names.push(name);
            units.push(unit);
            data.push(values);
        }
    }

    Table::new(file_title(path), table_path, names, units, data)
        .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet table.
///
/// Every integer, float or boolean column is widened to `f64` (nulls become
/// NaN); other columns are skipped. Units come from the `units` metadata
/// entry, a JSON list aligned with the file's columns.
fn load_parquet(path: &Path, table_path: &str) -> Result<Table> {
    let file = File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;

    let schema = builder.schema().clone();
    let mut metadata: HashMap<String, String> = schema.metadata().clone();
    if let Some(kv) = builder.metadata().file_metadata().key_value_metadata() {
        for entry in kv {
            if let Some(value) = &entry.value {
                metadata.entry(entry.key.clone()).or_insert_with(|| value.clone());
            }
        }
    }

    let all_units: Vec<String> = match metadata.get(META_UNITS) {
        Some(json) => serde_json::from_str(json).context("parsing 'units' metadata")?,
        None => Vec::new(),
    };

    // Numeric columns: (schema index, name, unit)
    let numeric: Vec<(usize, String, String)> = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| {
            let keep = f.data_type().is_numeric() || f.data_type() == &DataType::Boolean;
            if !keep {
                log::warn!(
                    "{}: skipping non-numeric column '{}' ({:?})",
                    path.display(),
                    f.name(),
                    f.data_type()
                );
            }
            keep
        })
        .map(|(i, f)| {
            let unit = all_units
                .get(i)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_UNIT.to_string());
            (i, f.name().clone(), unit)
        })
        .collect();

    let reader = builder.build().context("building parquet reader")?;
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); numeric.len()];

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        for (out, (idx, name, _)) in columns.iter_mut().zip(&numeric) {
            let values = cast(batch.column(*idx), &DataType::Float64)
                .with_context(|| format!("converting column '{name}' to float"))?;
            let values = values.as_primitive::<Float64Type>();
            out.extend(values.iter().map(|v| v.unwrap_or(f64::NAN)));
        }
    }

    let title = metadata
        .get(META_TITLE)
        .cloned()
        .unwrap_or_else(|| file_title(path));
    let (names, units): (Vec<String>, Vec<String>) =
        numeric.into_iter().map(|(_, n, u)| (n, u)).unzip();

    Table::new(title, table_path, names, units, columns)
        .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
}

// ---------------------------------------------------------------------------
// Parquet writer
// ---------------------------------------------------------------------------

/// Persist a table as Parquet with its title, path and units as metadata.
pub fn write_parquet(path: &Path, table: &Table) -> Result<()> {
    write_parquet_tagged(path, table, &[])
}

/// Like [`write_parquet`], with extra key-value metadata entries.
pub fn write_parquet_tagged(path: &Path, table: &Table, tags: &[(&str, &str)]) -> Result<()> {
    if table.columns.is_empty() {
        bail!("refusing to write table '{}' without columns", table.path);
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).context("creating table directory")?;
    }

    let mut metadata = HashMap::new();
    metadata.insert(META_TITLE.to_string(), table.title.clone());
    metadata.insert(META_PATH.to_string(), table.path.clone());
    metadata.insert(META_UNITS.to_string(), serde_json::to_string(&table.units)?);
    for (key, value) in tags {
        metadata.insert(key.to_string(), value.to_string());
    }

    let fields: Vec<Field> = table
        .column_names
        .iter()
        .map(|name| Field::new(name, DataType::Float64, false))
        .collect();
    let schema = Arc::new(Schema::new(fields).with_metadata(metadata));

    let arrays: Vec<ArrayRef> = table
        .columns
        .iter()
        .map(|c| Arc::new(Float64Array::from(c.clone())) as ArrayRef)
        .collect();
    let batch = RecordBatch::try_new(schema.clone(), arrays).context("building record batch")?;

    let file = File::create(path).context("creating parquet file")?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing record batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

/// Metadata of a parquet file without reading its rows.
pub fn parquet_metadata(path: &Path) -> Result<HashMap<String, String>> {
    let file = File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    Ok(builder.schema().metadata().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::new(
            "Zeuthen weather",
            "/raw/weather",
            vec!["time".into(), "T_a".into(), "rain".into()],
            vec!["s".into(), "°C".into(), "".into()],
            vec![vec![0.0, 60.0, 120.0], vec![1.5, f64::NAN, -3.25], vec![0.0, 1.0, 0.0]],
        )
        .unwrap()
    }

    #[test]
    fn parquet_round_trip_keeps_units_and_title() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw/weather.parquet");
        let table = sample();
        write_parquet(&path, &table).unwrap();

        let back = load_file(&path, "/raw/weather").unwrap();
        assert_eq!(back.title, "Zeuthen weather");
        assert_eq!(back.column_names, table.column_names);
        assert_eq!(back.units, table.units);
        assert_eq!(back.columns[0], table.columns[0]);
        assert!(back.columns[1][1].is_nan());
        assert_eq!(back.columns[1][2], -3.25);

        let meta = parquet_metadata(&path).unwrap();
        assert_eq!(meta.get("path").map(String::as_str), Some("/raw/weather"));
    }

    #[test]
    fn csv_headers_carry_units_and_text_columns_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station.csv");
        std::fs::write(
            &path,
            "time [s],T_a [°C],wind_dir,rain\n0,1.5,NW,false\n60,2.0,S,true\n",
        )
        .unwrap();

        let t = load_file(&path, "/station").unwrap();
        assert_eq!(t.column_names, vec!["time", "T_a", "rain"]);
        assert_eq!(t.units, vec!["s", "°C", "?"]);
        assert_eq!(t.column("rain"), Some(&[0.0, 1.0][..]));
        assert_eq!(t.title, "station");
    }

    #[test]
    fn json_nulls_become_nan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nm.json");
        std::fs::write(
            &path,
            r#"{"title": "neutron monitor", "columns": ["time", "counts"],
                "units": ["s", "1/min"], "rows": [[0, 100], [60, null]]}"#,
        )
        .unwrap();

        let t = load_file(&path, "/nm").unwrap();
        assert_eq!(t.title, "neutron monitor");
        assert_eq!(t.unit_of("counts"), "1/min");
        assert!(t.columns[1][1].is_nan());
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(load_file(Path::new("table.h5"), "/t").is_err());
    }
}
