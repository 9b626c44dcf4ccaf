/// Restricted expression language evaluated against table rows.
///
/// Architecture:
/// ```text
///  "T_a * 1.8 + 32"
///        │
///        ▼
///   ┌──────────┐
///   │  lexer    │  characters → tokens (rejects `.`, `=`, `;`, ...)
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  parser   │  tokens → Expr, names bound to row slots / builtins
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  eval     │  Expr × row → Value
///   └──────────┘
/// ```
pub mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

pub use eval::Value;
pub use functions::Builtin;
pub use parser::Expr;

use crate::error::{PlotError, Result};
use parser::Parser;

// ---------------------------------------------------------------------------
// EvaluatorContext – the sandbox an expression is compiled in
// ---------------------------------------------------------------------------

/// Names an expression may reference: the row's fields (in slot order) and
/// the allow-listed builtins. Compiled expressions are memoised by their
/// literal text.
#[derive(Debug, Clone)]
pub struct EvaluatorContext {
    fields: Vec<String>,
    slots: HashMap<String, usize>,
    builtins: BTreeSet<Builtin>,
    compiled: HashMap<String, Arc<CompiledExpr>>,
}

impl EvaluatorContext {
    /// Context over rows whose slot `i` holds `fields[i]`, with every builtin.
    pub fn new<S: AsRef<str>>(fields: &[S]) -> Self {
        let fields: Vec<String> = fields.iter().map(|f| f.as_ref().to_string()).collect();
        let slots = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.clone(), i))
            .collect();
        Self {
            fields,
            slots,
            builtins: Builtin::ALL.iter().copied().collect(),
            compiled: HashMap::new(),
        }
    }

    /// Context without fields, for bin specs, ranges and option values.
    pub fn constants() -> Self {
        Self::new::<&str>(&[])
    }

    /// Restrict the callable functions to `allowed`.
    pub fn with_builtins(mut self, allowed: impl IntoIterator<Item = Builtin>) -> Self {
        self.builtins = allowed.into_iter().collect();
        self.compiled.clear();
        self
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn compile(&mut self, expr: &str) -> Result<Arc<CompiledExpr>> {
        if let Some(hit) = self.compiled.get(expr) {
            return Ok(Arc::clone(hit));
        }
        let ast = Parser::new(expr, &self.slots, &self.builtins)?.parse()?;
        let compiled = Arc::new(CompiledExpr {
            source: expr.to_string(),
            ast,
        });
        self.compiled.insert(expr.to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Compile and evaluate an expression that references no fields.
    pub fn eval_constant(&mut self, expr: &str) -> Result<Value> {
        self.compile(expr)?.eval(&[])
    }
}

/// Evaluate a field-free expression in a fresh context.
pub fn eval_constant(expr: &str) -> Result<Value> {
    EvaluatorContext::constants().eval_constant(expr)
}

// ---------------------------------------------------------------------------
// CompiledExpr – a pure row → value function
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpr {
    source: String,
    ast: Expr,
}

impl CompiledExpr {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, row: &[f64]) -> Result<Value> {
        eval::evaluate(&self.ast, row)
            .map_err(|e| PlotError::expression(format!("`{}`: {}", self.source, strip(e))))
    }

    /// Numeric result; booleans count as 0/1.
    pub fn eval_f64(&self, row: &[f64]) -> Result<f64> {
        self.eval(row)?.as_f64().map_err(|e| {
            PlotError::expression(format!("`{}`: {}", self.source, strip(e)))
        })
    }

    /// Boolean result. A non-boolean value is a configuration error; it is
    /// never coerced.
    pub fn eval_bool(&self, row: &[f64]) -> Result<bool> {
        match self.eval(row)? {
            Value::Bool(b) => Ok(b),
            other => Err(PlotError::config(format!(
                "cut `{}` must be a condition, it evaluated to a {}",
                self.source,
                other.type_name()
            ))),
        }
    }
}

fn strip(err: PlotError) -> String {
    match err {
        PlotError::Expression(m) => m,
        other => other.to_string(),
    }
}
