use std::sync::Arc;

use crate::error::Result;
use crate::expr::{CompiledExpr, EvaluatorContext};

// ---------------------------------------------------------------------------
// Row filter: OR of the cuts of every layer reading one source
// ---------------------------------------------------------------------------

/// Which rows of a source survive before expressions are evaluated.
#[derive(Debug, Clone)]
pub enum RowFilter {
    /// Some layer reads the source without a cut: nothing is dropped.
    All,
    /// Keep a row when any of the cuts holds for it.
    Any(Vec<Arc<CompiledExpr>>),
}

impl RowFilter {
    /// Combine the cuts of the layers sharing a source. `None` means that
    /// layer has no cut, which disables the prefilter for the whole source.
    pub fn from_cuts<'a>(
        cuts: impl IntoIterator<Item = Option<&'a str>>,
        ctx: &mut EvaluatorContext,
    ) -> Result<Self> {
        let mut compiled = Vec::new();
        for cut in cuts {
            match cut {
                None => return Ok(RowFilter::All),
                Some(expr) => {
                    let expr = ctx.compile(expr)?;
                    if !compiled.iter().any(|c| Arc::ptr_eq(c, &expr)) {
                        compiled.push(expr);
                    }
                }
            }
        }
        if compiled.is_empty() {
            Ok(RowFilter::All)
        } else {
            Ok(RowFilter::Any(compiled))
        }
    }

    pub fn keep(&self, row: &[f64]) -> Result<bool> {
        match self {
            RowFilter::All => Ok(true),
            RowFilter::Any(cuts) => {
                for cut in cuts {
                    if cut.eval_bool(row)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, RowFilter::All)
    }
}
