use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};

use super::eval::{map_numeric, Value};
use crate::error::{PlotError, Result};

// ---------------------------------------------------------------------------
// Allow-listed functions
// ---------------------------------------------------------------------------

/// Every function an expression may call. Anything not listed here cannot
/// be named by the parser, so there is no path to I/O or host state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Builtin {
    Abs,
    All,
    Any,
    Bool,
    Float,
    Int,
    Len,
    Max,
    Min,
    Pow,
    Power,
    Round,
    Sum,
    Range,
    Arange,
    Linspace,
    Logspace,
    Logbins,
    Log,
    Log10,
    Log2,
    Exp,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Arcsin,
    Arccos,
    Arctan,
    Arctan2,
    Floor,
    Ceil,
    Date,
}

impl Builtin {
    pub const ALL: &'static [Builtin] = &[
        Builtin::Abs,
        Builtin::All,
        Builtin::Any,
        Builtin::Bool,
        Builtin::Float,
        Builtin::Int,
        Builtin::Len,
        Builtin::Max,
        Builtin::Min,
        Builtin::Pow,
        Builtin::Power,
        Builtin::Round,
        Builtin::Sum,
        Builtin::Range,
        Builtin::Arange,
        Builtin::Linspace,
        Builtin::Logspace,
        Builtin::Logbins,
        Builtin::Log,
        Builtin::Log10,
        Builtin::Log2,
        Builtin::Exp,
        Builtin::Sqrt,
        Builtin::Sin,
        Builtin::Cos,
        Builtin::Tan,
        Builtin::Arcsin,
        Builtin::Arccos,
        Builtin::Arctan,
        Builtin::Arctan2,
        Builtin::Floor,
        Builtin::Ceil,
        Builtin::Date,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Abs => "abs",
            Builtin::All => "all",
            Builtin::Any => "any",
            Builtin::Bool => "bool",
            Builtin::Float => "float",
            Builtin::Int => "int",
            Builtin::Len => "len",
            Builtin::Max => "max",
            Builtin::Min => "min",
            Builtin::Pow => "pow",
            Builtin::Power => "power",
            Builtin::Round => "round",
            Builtin::Sum => "sum",
            Builtin::Range => "range",
            Builtin::Arange => "arange",
            Builtin::Linspace => "linspace",
            Builtin::Logspace => "logspace",
            Builtin::Logbins => "logbins",
            Builtin::Log => "log",
            Builtin::Log10 => "log10",
            Builtin::Log2 => "log2",
            Builtin::Exp => "exp",
            Builtin::Sqrt => "sqrt",
            Builtin::Sin => "sin",
            Builtin::Cos => "cos",
            Builtin::Tan => "tan",
            Builtin::Arcsin => "arcsin",
            Builtin::Arccos => "arccos",
            Builtin::Arctan => "arctan",
            Builtin::Arctan2 => "arctan2",
            Builtin::Floor => "floor",
            Builtin::Ceil => "ceil",
            Builtin::Date => "date",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|b| b.name() == name)
    }

    pub fn call(self, args: Vec<Value>) -> Result<Value> {
        let name = self.name();
        match self {
            Builtin::Abs => unary(name, args, f64::abs),
            Builtin::Log => unary(name, args, f64::ln),
            Builtin::Log10 => unary(name, args, f64::log10),
            Builtin::Log2 => unary(name, args, f64::log2),
            Builtin::Exp => unary(name, args, f64::exp),
            Builtin::Sqrt => unary(name, args, f64::sqrt),
            Builtin::Sin => unary(name, args, f64::sin),
            Builtin::Cos => unary(name, args, f64::cos),
            Builtin::Tan => unary(name, args, f64::tan),
            Builtin::Arcsin => unary(name, args, f64::asin),
            Builtin::Arccos => unary(name, args, f64::acos),
            Builtin::Arctan => unary(name, args, f64::atan),
            Builtin::Floor => unary(name, args, f64::floor),
            Builtin::Ceil => unary(name, args, f64::ceil),
            Builtin::Int => unary(name, args, f64::trunc),
            Builtin::Float => match one(name, args)? {
                Value::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Number)
                    .map_err(|_| PlotError::expression(format!("float(): cannot parse {s:?}"))),
                other => Ok(Value::Number(other.as_f64()?)),
            },
            Builtin::Bool => Ok(Value::Bool(one(name, args)?.truthy())),
            Builtin::Pow | Builtin::Power => {
                let [a, b] = exactly::<2>(name, args)?;
                binary(a, b, f64::powf)
            }
            Builtin::Arctan2 => {
                let [a, b] = exactly::<2>(name, args)?;
                binary(a, b, f64::atan2)
            }
            Builtin::Round => round(args),
            Builtin::Len => Ok(Value::Number(one(name, args)?.into_list()?.len() as f64)),
            Builtin::Sum => Ok(Value::Number(one(name, args)?.into_list()?.iter().sum())),
            Builtin::All => Ok(Value::Bool(
                one(name, args)?.into_list()?.iter().all(|v| *v != 0.0),
            )),
            Builtin::Any => Ok(Value::Bool(
                one(name, args)?.into_list()?.iter().any(|v| *v != 0.0),
            )),
            Builtin::Max => extremum(name, args, f64::max),
            Builtin::Min => extremum(name, args, f64::min),
            Builtin::Range => range(args),
            Builtin::Arange => arange(args),
            Builtin::Linspace => {
                let (start, stop, num) = span_args(name, args)?;
                Ok(Value::List(linspace(start, stop, num)))
            }
            Builtin::Logspace => {
                let (start, stop, num) = span_args(name, args)?;
                Ok(Value::List(
                    linspace(start, stop, num).into_iter().map(|x| 10f64.powf(x)).collect(),
                ))
            }
            Builtin::Logbins => {
                let [start, stop, count] = exactly::<3>(name, args)?;
                let count = as_count(name, &count)?;
                Ok(Value::List(logbins(start.as_f64()?, stop.as_f64()?, count)))
            }
            Builtin::Date => match one(name, args)? {
                Value::Str(s) => parse_date(&s).map(Value::Number),
                other => Err(PlotError::expression(format!(
                    "date() expects a string, got a {}",
                    other.type_name()
                ))),
            },
        }
    }
}

fn one(name: &str, args: Vec<Value>) -> Result<Value> {
    let [v] = exactly::<1>(name, args)?;
    Ok(v)
}

fn exactly<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N]> {
    let got = args.len();
    args.try_into().map_err(|_| {
        PlotError::expression(format!("{name}() takes {N} argument(s), {got} given"))
    })
}

fn unary(name: &str, args: Vec<Value>, f: fn(f64) -> f64) -> Result<Value> {
    map_numeric(one(name, args)?, f)
}

fn binary(a: Value, b: Value, f: fn(f64, f64) -> f64) -> Result<Value> {
    match (a, b) {
        (Value::List(xs), b) => {
            let y = b.as_f64()?;
            Ok(Value::List(xs.into_iter().map(|x| f(x, y)).collect()))
        }
        (a, b) => Ok(Value::Number(f(a.as_f64()?, b.as_f64()?))),
    }
}

fn round(args: Vec<Value>) -> Result<Value> {
    match args.len() {
        1 => unary("round", args, f64::round),
        2 => {
            let [v, digits] = exactly::<2>("round", args)?;
            let scale = 10f64.powi(digits.as_f64()? as i32);
            map_numeric(v, |x| (x * scale).round() / scale)
        }
        n => Err(PlotError::expression(format!(
            "round() takes 1 or 2 arguments, {n} given"
        ))),
    }
}

/// `max(list)` or `max(a, b, ...)`; NaN entries are skipped.
fn extremum(name: &str, args: Vec<Value>, pick: fn(f64, f64) -> f64) -> Result<Value> {
    let values: Vec<f64> = if args.len() == 1 {
        one(name, args)?.into_list()?
    } else {
        args.iter().map(Value::as_f64).collect::<Result<_>>()?
    };
    values
        .into_iter()
        .reduce(pick)
        .map(Value::Number)
        .ok_or_else(|| PlotError::expression(format!("{name}() of an empty sequence")))
}

fn as_count(name: &str, v: &Value) -> Result<usize> {
    let n = v.as_f64()?;
    if !n.is_finite() || n < 0.0 || n.fract() != 0.0 {
        return Err(PlotError::expression(format!(
            "{name}(): count must be a non-negative integer, got {n}"
        )));
    }
    Ok(n as usize)
}

fn span_args(name: &str, args: Vec<Value>) -> Result<(f64, f64, usize)> {
    match args.len() {
        2 => {
            let [a, b] = exactly::<2>(name, args)?;
            Ok((a.as_f64()?, b.as_f64()?, 50))
        }
        3 => {
            let [a, b, n] = exactly::<3>(name, args)?;
            Ok((a.as_f64()?, b.as_f64()?, as_count(name, &n)?))
        }
        n => Err(PlotError::expression(format!(
            "{name}() takes 2 or 3 arguments, {n} given"
        ))),
    }
}

fn range(args: Vec<Value>) -> Result<Value> {
    let nums: Vec<f64> = args.iter().map(Value::as_f64).collect::<Result<_>>()?;
    if nums.iter().any(|v| v.fract() != 0.0 || !v.is_finite()) {
        return Err(PlotError::expression("range() expects integers"));
    }
    let (start, stop, step) = match nums.as_slice() {
        [stop] => (0.0, *stop, 1.0),
        [start, stop] => (*start, *stop, 1.0),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(PlotError::expression("range() takes 1 to 3 arguments")),
    };
    stepped(start, stop, step).map(Value::List)
}

fn arange(args: Vec<Value>) -> Result<Value> {
    let nums: Vec<f64> = args.iter().map(Value::as_f64).collect::<Result<_>>()?;
    let (start, stop, step) = match nums.as_slice() {
        [stop] => (0.0, *stop, 1.0),
        [start, stop] => (*start, *stop, 1.0),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(PlotError::expression("arange() takes 1 to 3 arguments")),
    };
    stepped(start, stop, step).map(Value::List)
}

fn stepped(start: f64, stop: f64, step: f64) -> Result<Vec<f64>> {
    if step == 0.0 || !step.is_finite() {
        return Err(PlotError::expression("step must be finite and non-zero"));
    }
    let n = ((stop - start) / step).ceil();
    if !n.is_finite() || n > 10_000_000.0 {
        return Err(PlotError::expression("sequence too long"));
    }
    let n = n.max(0.0) as usize;
    Ok((0..n).map(|i| start + i as f64 * step).collect())
}

/// `num` evenly spaced values over `[start, stop]`, both ends included.
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            let mut out: Vec<f64> = (0..num).map(|i| start + i as f64 * step).collect();
            out[num - 1] = stop;
            out
        }
    }
}

/// Logarithmically spaced bin edges from `start` to `stop`.
pub fn logbins(start: f64, stop: f64, count: usize) -> Vec<f64> {
    linspace(start.ln(), stop.ln(), count)
        .into_iter()
        .map(f64::exp)
        .collect()
}

// ---------------------------------------------------------------------------
// date("...") → seconds since the store epoch
// ---------------------------------------------------------------------------

/// Table time columns count seconds since 2004-01-01 00:00 +01:00.
fn epoch() -> Option<DateTime<FixedOffset>> {
    FixedOffset::east_opt(3600).and_then(|tz| tz.with_ymd_and_hms(2004, 1, 1, 0, 0, 0).single())
}

const ZONED_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f %#z",
    "%Y-%m-%d %H:%M:%S %#z",
    "%Y-%m-%d %H:%M %#z",
    "%Y-%m-%dT%H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M%#z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Parse a timestamp into seconds since the store epoch. Timestamps without
/// an explicit offset are read as UTC.
pub fn parse_date(text: &str) -> Result<f64> {
    let s = text.trim();
    let parsed = DateTime::parse_from_rfc3339(s)
        .ok()
        .or_else(|| {
            ZONED_FORMATS
                .iter()
                .find_map(|fmt| DateTime::parse_from_str(s, fmt).ok())
        })
        .map(|dt| dt.timestamp_nanos_opt())
        .or_else(|| {
            NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
                .map(|naive| naive.and_utc().timestamp_nanos_opt())
        })
        .flatten()
        .ok_or_else(|| PlotError::expression(format!("date(): cannot parse {s:?}")))?;

    let base = epoch()
        .and_then(|e| e.timestamp_nanos_opt())
        .ok_or_else(|| PlotError::expression("date(): epoch out of range"))?;
    Ok((parsed - base) as f64 * 1e-9)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn call(b: Builtin, args: &[Value]) -> Result<Value> {
        b.call(args.to_vec())
    }

    #[test]
    fn names_round_trip() {
        for b in Builtin::ALL {
            assert_eq!(Builtin::from_name(b.name()), Some(*b));
        }
        assert_eq!(Builtin::from_name("open"), None);
        assert_eq!(Builtin::from_name("eval"), None);
    }

    #[test]
    fn linspace_includes_both_ends() {
        let v = linspace(0.0, 1.0, 5);
        assert_eq!(v, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn logbins_are_geometric() {
        let v = logbins(1.0, 100.0, 3);
        assert_relative_eq!(v[0], 1.0, max_relative = 1e-12);
        assert_relative_eq!(v[1], 10.0, max_relative = 1e-12);
        assert_relative_eq!(v[2], 100.0, max_relative = 1e-12);
    }

    #[test]
    fn range_and_arange() {
        let r = call(Builtin::Range, &[Value::Number(3.0)]).unwrap();
        assert_eq!(r, Value::List(vec![0.0, 1.0, 2.0]));
        let a = call(
            Builtin::Arange,
            &[Value::Number(0.0), Value::Number(1.0), Value::Number(0.25)],
        )
        .unwrap();
        assert_eq!(a, Value::List(vec![0.0, 0.25, 0.5, 0.75]));
        assert!(call(Builtin::Range, &[Value::Number(1.5)]).is_err());
    }

    #[test]
    fn max_of_list_or_arguments() {
        let m = call(Builtin::Max, &[Value::List(vec![1.0, 7.0, 3.0])]).unwrap();
        assert_eq!(m, Value::Number(7.0));
        let m = call(Builtin::Min, &[Value::Number(4.0), Value::Number(-2.0)]).unwrap();
        assert_eq!(m, Value::Number(-2.0));
        assert!(call(Builtin::Max, &[Value::List(vec![])]).is_err());
    }

    #[test]
    fn arity_is_checked() {
        assert!(call(Builtin::Sin, &[]).is_err());
        assert!(call(Builtin::Pow, &[Value::Number(2.0)]).is_err());
    }

    #[test]
    fn date_counts_seconds_from_store_epoch() {
        assert_eq!(parse_date("2004-01-01 00:00 +01").unwrap(), 0.0);
        assert_eq!(parse_date("2004-01-01T01:00:00+01:00").unwrap(), 3600.0);
        // naive timestamps are UTC, the epoch is 23:00 UTC the day before
        assert_eq!(parse_date("2004-01-01").unwrap(), 3600.0);
        assert!(parse_date("yesterday").is_err());
    }
}
