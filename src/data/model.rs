use serde::{Deserialize, Serialize};

/// Unit reported for columns the table does not describe.
pub const UNKNOWN_UNIT: &str = "?";

// ---------------------------------------------------------------------------
// Table – one columnar sensor table
// ---------------------------------------------------------------------------

/// A numeric table held column-major. Every column has the same length;
/// booleans and integers are widened to `f64` on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Human readable title.
    pub title: String,
    /// Path of the table inside its store, e.g. `/raw/weather`.
    pub path: String,
    /// Ordered column names.
    pub column_names: Vec<String>,
    /// Physical unit per column, aligned with `column_names`.
    pub units: Vec<String>,
    /// Column data, aligned with `column_names`.
    pub columns: Vec<Vec<f64>>,
}

impl Table {
    /// Build a table, checking that names, units and columns line up.
    pub fn new(
        title: impl Into<String>,
        path: impl Into<String>,
        column_names: Vec<String>,
        units: Vec<String>,
        columns: Vec<Vec<f64>>,
    ) -> Result<Self, String> {
        if column_names.len() != columns.len() {
            return Err(format!(
                "{} column names for {} columns",
                column_names.len(),
                columns.len()
            ));
        }
        if units.len() != columns.len() {
            return Err(format!("{} units for {} columns", units.len(), columns.len()));
        }
        if let Some(first) = columns.first() {
            if let Some((i, _)) = columns.iter().enumerate().find(|(_, c)| c.len() != first.len()) {
                return Err(format!(
                    "column '{}' has {} rows, expected {}",
                    column_names[i],
                    columns[i].len(),
                    first.len()
                ));
            }
        }
        Ok(Table {
            title: title.into(),
            path: path.into(),
            column_names,
            units,
            columns,
        })
    }

    /// Build a table from row-major records.
    pub fn from_rows(
        title: impl Into<String>,
        path: impl Into<String>,
        column_names: Vec<String>,
        units: Vec<String>,
        rows: &[Vec<f64>],
    ) -> Result<Self, String> {
        let mut columns = vec![Vec::with_capacity(rows.len()); column_names.len()];
        for (r, row) in rows.iter().enumerate() {
            if row.len() != column_names.len() {
                return Err(format!(
                    "row {r} has {} fields, expected {}",
                    row.len(),
                    column_names.len()
                ));
            }
            for (col, v) in columns.iter_mut().zip(row) {
                col.push(*v);
            }
        }
        Self::new(title, path, column_names, units, columns)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.column_index(name).map(|i| self.columns[i].as_slice())
    }

    /// Unit of the column named by `expr` (trimmed), `"?"` when the
    /// expression is not a bare column name.
    pub fn unit_of(&self, expr: &str) -> &str {
        self.column_index(expr.trim())
            .and_then(|i| self.units.get(i))
            .map_or(UNKNOWN_UNIT, String::as_str)
    }

    /// Row `i` in column order.
    pub fn row(&self, i: usize) -> Vec<f64> {
        self.columns.iter().map(|c| c[i]).collect()
    }

    /// Iterate rows in storage (time) order.
    pub fn rows(&self) -> impl Iterator<Item = Vec<f64>> + '_ {
        (0..self.len()).map(move |i| self.row(i))
    }

    pub fn specs(&self) -> TableSpecs {
        TableSpecs {
            title: self.title.clone(),
            colnames: self.column_names.clone(),
            units: self.units.clone(),
            rows: self.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// TableSpecs – what a table listing shows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpecs {
    pub title: String,
    pub colnames: Vec<String>,
    pub units: Vec<String>,
    pub rows: usize,
}
