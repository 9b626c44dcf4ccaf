use thiserror::Error;

// ---------------------------------------------------------------------------
// Error taxonomy shared by the whole plotting pipeline
// ---------------------------------------------------------------------------

/// Everything that can abort (or be recovered inside) a plot request.
#[derive(Error, Debug)]
pub enum PlotError {
    /// Malformed parameter bag, unknown mode/style, bad source token,
    /// invalid window or shift. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// An expression failed to compile or to evaluate against a row.
    #[error("expression error: {0}")]
    Expression(String),

    /// A rate-average cache entry was busy or unreadable.
    /// Recovered locally by recomputing.
    #[error("cache entry {entry} busy or corrupt: {reason}")]
    TransientCache { entry: String, reason: String },

    /// Binning or limit computation over empty / all-nonfinite data.
    #[error("data range error: {0}")]
    DataRange(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PlotError>;

impl PlotError {
    pub fn config(msg: impl Into<String>) -> Self {
        PlotError::Config(msg.into())
    }

    pub fn expression(msg: impl Into<String>) -> Self {
        PlotError::Expression(msg.into())
    }

    pub fn data_range(msg: impl Into<String>) -> Self {
        PlotError::DataRange(msg.into())
    }

    /// Prefix configuration/expression/range messages with the layer and
    /// parameter field that caused them. Other variants pass through.
    pub fn in_layer(self, index: usize, field: &str) -> Self {
        match self {
            PlotError::Config(m) => PlotError::Config(format!("layer {index}, field `{field}`: {m}")),
            PlotError::Expression(m) => {
                PlotError::Expression(format!("layer {index}, field `{field}`: {m}"))
            }
            PlotError::DataRange(m) => {
                PlotError::DataRange(format!("layer {index}, field `{field}`: {m}"))
            }
            other => other,
        }
    }
}
