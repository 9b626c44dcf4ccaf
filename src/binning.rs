use crate::error::{PlotError, Result};
use crate::expr::{eval_constant, functions::linspace, Value};

/// Bin count used when a layer gives no binning.
pub const DEFAULT_BINS: usize = 10;

// ---------------------------------------------------------------------------
// Bin specifications
// ---------------------------------------------------------------------------

/// How a layer asked for its bins.
#[derive(Debug, Clone, PartialEq)]
pub enum BinSpec {
    /// `N` equal bins spanning the data.
    Count(usize),
    /// `[min, max, count]`.
    Range { min: f64, max: f64, count: usize },
    /// Explicit, strictly increasing edges.
    Edges(Vec<f64>),
}

impl Default for BinSpec {
    fn default() -> Self {
        BinSpec::Count(DEFAULT_BINS)
    }
}

impl BinSpec {
    /// Evaluate a binning expression. A three element list is always read
    /// as `[min, max, count]`, never as edges.
    pub fn parse(text: Option<&str>) -> Result<Self> {
        let Some(text) = text else {
            return Ok(Self::default());
        };
        let value = eval_constant(text).map_err(|e| PlotError::config(format!("binning: {e}")))?;
        match value {
            Value::Number(n) => Ok(BinSpec::Count(bin_count(n, text)?)),
            Value::List(v) if v.len() == 3 => {
                let (min, max) = (v[0], v[1]);
                if !(min.is_finite() && max.is_finite() && min < max) {
                    return Err(PlotError::config(format!(
                        "binning `{text}`: need min < max, got [{min}, {max}]"
                    )));
                }
                Ok(BinSpec::Range {
                    min,
                    max,
                    count: bin_count(v[2], text)?,
                })
            }
            Value::List(edges) => {
                if edges.len() < 2 || edges.windows(2).any(|w| !(w[0] < w[1])) {
                    return Err(PlotError::config(format!(
                        "binning `{text}`: edges must be at least two increasing numbers"
                    )));
                }
                Ok(BinSpec::Edges(edges))
            }
            other => Err(PlotError::config(format!(
                "binning `{text}` evaluated to a {}",
                other.type_name()
            ))),
        }
    }
}

fn bin_count(n: f64, text: &str) -> Result<usize> {
    if n.is_finite() && n >= 1.0 && n.fract() == 0.0 {
        Ok(n as usize)
    } else {
        Err(PlotError::config(format!(
            "binning `{text}`: bin count must be a positive integer, got {n}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Binning – edges / centers / widths
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Binning {
    pub edges: Vec<f64>,
    pub centers: Vec<f64>,
    pub widths: Vec<f64>,
}

impl Binning {
    pub fn from_edges(edges: Vec<f64>) -> Self {
        let centers = edges.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
        let widths = edges.windows(2).map(|w| w[1] - w[0]).collect();
        Self {
            edges,
            centers,
            widths,
        }
    }

    pub fn len(&self) -> usize {
        self.centers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centers.is_empty()
    }

    /// Bin holding `v`: `[e_i, e_i+1)`, the last bin also takes its right
    /// edge. NaN and values outside the edges have no bin.
    pub fn index_of(&self, v: f64) -> Option<usize> {
        let n = self.len();
        if n == 0 || !(v >= self.edges[0] && v <= self.edges[n]) {
            return None;
        }
        if v == self.edges[n] {
            return Some(n - 1);
        }
        Some(self.edges.partition_point(|e| *e <= v) - 1)
    }
}

/// Finite minimum and maximum, ignoring NaN and infinities.
pub fn finite_range(data: &[f64]) -> Option<(f64, f64)> {
    data.iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Resolve a bin specification against the data it will bin.
pub fn get_binning(spec: &BinSpec, data: &[f64]) -> Result<Binning> {
    let edges = match spec {
        BinSpec::Count(n) => {
            let (mut lo, mut hi) = finite_range(data).ok_or_else(|| {
                PlotError::data_range(format!(
                    "cannot place {n} bins: no finite values among {} entries",
                    data.len()
                ))
            })?;
            if lo == hi {
                lo -= 0.5;
                hi += 0.5;
            }
            linspace(lo, hi, n + 1)
        }
        BinSpec::Range { min, max, count } => linspace(*min, *max, count + 1),
        BinSpec::Edges(edges) => edges.clone(),
    };
    Ok(Binning::from_edges(edges))
}

// ---------------------------------------------------------------------------
// Histograms
// ---------------------------------------------------------------------------

pub fn histogram(data: &[f64], bins: &Binning) -> Vec<f64> {
    let mut counts = vec![0.0; bins.len()];
    for &v in data {
        if let Some(i) = bins.index_of(v) {
            counts[i] += 1.0;
        }
    }
    counts
}

/// 2D counts indexed `[y][x]`. Pairs are taken from aligned slices.
pub fn histogram2d(x: &[f64], y: &[f64], xbins: &Binning, ybins: &Binning) -> Vec<Vec<f64>> {
    let mut counts = vec![vec![0.0; xbins.len()]; ybins.len()];
    for (&xv, &yv) in x.iter().zip(y) {
        if let (Some(i), Some(j)) = (xbins.index_of(xv), ybins.index_of(yv)) {
            counts[j][i] += 1.0;
        }
    }
    counts
}

/// Poisson errors of bin contents.
pub fn poisson_errors(counts: &[f64]) -> Vec<f64> {
    counts.iter().map(|c| c.sqrt()).collect()
}

/// Normalise to unit area. Bins that become non-finite (empty histogram)
/// are set to zero.
pub fn density(contents: &[f64], errors: &[f64], widths: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let total: f64 = contents.iter().sum();
    let finite_or_zero = |v: f64| if v.is_finite() { v } else { 0.0 };
    let scaled = |values: &[f64]| -> Vec<f64> {
        values
            .iter()
            .zip(widths)
            .map(|(v, w)| finite_or_zero(v / (total * w)))
            .collect()
    };
    (scaled(contents), scaled(errors))
}

/// Normalise 2D contents (`[y][x]`) to unit volume.
pub fn density2d(contents: &[Vec<f64>], xwidths: &[f64], ywidths: &[f64]) -> Vec<Vec<f64>> {
    let total: f64 = contents.iter().flatten().sum();
    contents
        .iter()
        .zip(ywidths)
        .map(|(row, yw)| {
            row.iter()
                .zip(xwidths)
                .map(|(c, xw)| {
                    let v = c / (total * xw * yw);
                    if v.is_finite() {
                        v
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect()
}

/// Cumulative sums of `contents * widths`, errors added in quadrature.
///
/// `direction > 0` sums forward; `direction < 0` gives, per bin, the sum of
/// all bins after it, so the last bin is zero. Zero leaves the input as is.
pub fn cumulative(
    contents: &[f64],
    errors: &[f64],
    direction: i64,
    widths: Option<&[f64]>,
) -> (Vec<f64>, Vec<f64>) {
    if direction == 0 {
        return (contents.to_vec(), errors.to_vec());
    }
    let width = |i: usize| widths.map_or(1.0, |w| w[i]);
    let weighted: Vec<f64> = contents.iter().enumerate().map(|(i, c)| c * width(i)).collect();
    let squared: Vec<f64> = errors
        .iter()
        .enumerate()
        .map(|(i, e)| (e * width(i)).powi(2))
        .collect();

    let running = |values: &[f64]| -> Vec<f64> {
        values
            .iter()
            .scan(0.0, |acc, v| {
                *acc += v;
                Some(*acc)
            })
            .collect()
    };
    let sums = running(&weighted);
    let square_sums = running(&squared);

    if direction > 0 {
        (sums, square_sums.iter().map(|s| s.sqrt()).collect())
    } else {
        let total = sums.last().copied().unwrap_or(0.0);
        let square_total = square_sums.last().copied().unwrap_or(0.0);
        (
            sums.iter().map(|s| total - s).collect(),
            square_sums
                .iter()
                .map(|s| (square_total - s).max(0.0).sqrt())
                .collect(),
        )
    }
}

/// Outline of a histogram: `2 * (n + 1)` points starting and ending at zero.
pub fn step_points(contents: &[f64], edges: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut x = Vec::with_capacity(2 * edges.len());
    let mut y = Vec::with_capacity(2 * edges.len());
    for (i, e) in edges.iter().enumerate() {
        x.push(*e);
        x.push(*e);
        y.push(if i == 0 { 0.0 } else { contents[i - 1] });
        y.push(contents.get(i).copied().unwrap_or(0.0));
    }
    (x, y)
}

/// Mean and population standard deviation of `y` per `x` bin. Empty bins
/// yield NaN. Bins are half open, including the last one.
pub fn profile(x: &[f64], y: &[f64], bins: &Binning) -> (Vec<f64>, Vec<f64>) {
    let n = bins.len();
    let mut sum = vec![0.0; n];
    let mut count = vec![0usize; n];
    let mut members: Vec<Vec<f64>> = vec![Vec::new(); n];
    for (&xv, &yv) in x.iter().zip(y) {
        let Some(i) = bins.index_of(xv) else { continue };
        if xv >= bins.edges[i + 1] {
            continue;
        }
        sum[i] += yv;
        count[i] += 1;
        members[i].push(yv);
    }

    let means: Vec<f64> = sum
        .iter()
        .zip(&count)
        .map(|(s, c)| if *c == 0 { f64::NAN } else { s / *c as f64 })
        .collect();
    let stds = members
        .iter()
        .zip(&means)
        .map(|(m, mean)| {
            if m.is_empty() {
                f64::NAN
            } else {
                (m.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / m.len() as f64).sqrt()
            }
        })
        .collect();
    (means, stds)
}

/// Grow `current` so it covers the finite `data` plus `lower`/`upper`
/// fractions of the data span.
pub fn expand_limits(
    current: Option<(f64, f64)>,
    data: &[f64],
    lower: f64,
    upper: f64,
) -> Result<(f64, f64)> {
    let (lo, hi) = finite_range(data)
        .ok_or_else(|| PlotError::data_range("cannot fit axis limits to data without finite values"))?;
    let span = hi - lo;
    let (lo, hi) = (lo - lower * span, hi + upper * span);
    Ok(match current {
        Some((a, b)) => (a.min(lo), b.max(hi)),
        None => (lo, hi),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn count_binning_spans_the_data() {
        let data = [3.0, -1.0, f64::NAN, 7.0, 2.0];
        for n in [1, 2, 7, 10] {
            let b = get_binning(&BinSpec::Count(n), &data).unwrap();
            assert_eq!(b.edges.len(), n + 1);
            assert_eq!(b.centers.len(), n);
            assert_eq!(b.widths.len(), n);
            assert_eq!(b.edges[0], -1.0);
            assert_eq!(b.edges[n], 7.0);
            for i in 0..n {
                assert_eq!(b.centers[i], (b.edges[i] + b.edges[i + 1]) / 2.0);
            }
        }
    }

    #[test]
    fn spec_forms() {
        assert_eq!(BinSpec::parse(None).unwrap(), BinSpec::Count(10));
        assert_eq!(BinSpec::parse(Some("4")).unwrap(), BinSpec::Count(4));
        assert_eq!(
            BinSpec::parse(Some("[0, 10, 5]")).unwrap(),
            BinSpec::Range { min: 0.0, max: 10.0, count: 5 }
        );
        assert_eq!(
            BinSpec::parse(Some("[0, 1, 2, 4]")).unwrap(),
            BinSpec::Edges(vec![0.0, 1.0, 2.0, 4.0])
        );
        match BinSpec::parse(Some("logbins(1, 1000, 4)")).unwrap() {
            BinSpec::Edges(e) => assert_relative_eq!(e[1], 10.0, max_relative = 1e-12),
            other => panic!("unexpected {other:?}"),
        }
        for bad in ["0", "2.5", "[1, 0, 3]", "[0, 2, 1, 3]", "'ten'", "[5]"] {
            assert!(matches!(BinSpec::parse(Some(bad)), Err(PlotError::Config(_))), "{bad}");
        }
    }

    #[test]
    fn all_nan_data_is_a_range_error() {
        let err = get_binning(&BinSpec::Count(3), &[f64::NAN, f64::INFINITY]).unwrap_err();
        assert!(matches!(err, PlotError::DataRange(_)));
        assert!(get_binning(&BinSpec::Count(3), &[]).is_err());
        // explicit bins do not need data
        assert_eq!(get_binning(&BinSpec::Edges(vec![0.0, 1.0]), &[]).unwrap().len(), 1);
    }

    #[test]
    fn constant_data_gets_a_unit_span() {
        let b = get_binning(&BinSpec::Count(2), &[4.0, 4.0]).unwrap();
        assert_eq!(b.edges, vec![3.5, 4.0, 4.5]);
    }

    #[test]
    fn last_bin_includes_its_right_edge() {
        let b = Binning::from_edges(vec![0.0, 5.0, 10.0]);
        assert_eq!(histogram(&[0.0, 4.9, 5.0, 10.0, 10.1, -0.1, f64::NAN], &b), vec![2.0, 2.0]);
    }

    #[test]
    fn histogram2d_is_row_major_in_y() {
        let xb = Binning::from_edges(vec![0.0, 1.0, 2.0]);
        let yb = Binning::from_edges(vec![0.0, 1.0, 2.0, 3.0]);
        let h = histogram2d(&[0.5, 1.5, 1.5], &[2.5, 0.5, 0.7], &xb, &yb);
        assert_eq!(h, vec![vec![0.0, 2.0], vec![0.0, 0.0], vec![1.0, 0.0]]);
    }

    #[test]
    fn density_integrates_to_one() {
        let b = Binning::from_edges(vec![0.0, 1.0, 3.0, 4.0]);
        let counts = [2.0, 6.0, 0.0];
        let (d, _) = density(&counts, &poisson_errors(&counts), &b.widths);
        let area: f64 = d.iter().zip(&b.widths).map(|(v, w)| v * w).sum();
        assert_relative_eq!(area, 1.0);

        let (empty, errs) = density(&[0.0, 0.0], &[0.0, 0.0], &[1.0, 1.0]);
        assert_eq!(empty, vec![0.0, 0.0]);
        assert_eq!(errs, vec![0.0, 0.0]);
    }

    #[test]
    fn density2d_integrates_to_one() {
        let c = vec![vec![1.0, 3.0], vec![0.0, 4.0]];
        let (xw, yw) = ([1.0, 2.0], [0.5, 1.5]);
        let d = density2d(&c, &xw, &yw);
        let volume: f64 = (0..2)
            .flat_map(|j| (0..2).map(move |i| (i, j)))
            .map(|(i, j)| d[j][i] * xw[i] * yw[j])
            .sum();
        assert_relative_eq!(volume, 1.0);
    }

    #[test]
    fn cumulative_directions() {
        let c = [1.0, 2.0, 3.0];
        let e = poisson_errors(&c);
        let w = [0.5, 0.5, 1.0];

        let (fwd, fwd_err) = cumulative(&c, &e, 1, Some(&w));
        assert_relative_eq!(fwd[2], 1.0 * 0.5 + 2.0 * 0.5 + 3.0);
        assert!(fwd.windows(2).all(|p| p[0] <= p[1]));
        assert_relative_eq!(fwd_err[1], (0.25 * 1.0 + 0.25 * 2.0f64).sqrt(), max_relative = 1e-12);

        let (rev, rev_err) = cumulative(&c, &e, -1, None);
        assert_eq!(rev, vec![5.0, 3.0, 0.0]);
        assert_abs_diff_eq!(rev_err[2], 0.0);
        assert_relative_eq!(rev_err[0], 5.0f64.sqrt(), max_relative = 1e-12);

        assert_eq!(cumulative(&c, &e, 0, None).0, c.to_vec());
    }

    #[test]
    fn step_outline() {
        let (x, y) = step_points(&[2.0, 5.0], &[0.0, 1.0, 2.0]);
        assert_eq!(x, vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0]);
        assert_eq!(y, vec![0.0, 2.0, 2.0, 5.0, 5.0, 0.0]);
    }

    #[test]
    fn profile_means_and_spread() {
        let b = Binning::from_edges(vec![0.0, 2.0, 4.0, 6.0]);
        let x = [0.5, 1.5, 2.5, 3.0, 6.0];
        let y = [1.0, 3.0, 10.0, 10.0, 99.0];
        let (mean, std) = profile(&x, &y, &b);
        assert_eq!(mean[0], 2.0);
        assert_eq!(std[0], 1.0);
        assert_eq!(mean[1], 10.0);
        assert_eq!(std[1], 0.0);
        // x == 6 sits on the closing edge and is left out
        assert!(mean[2].is_nan());
    }

    #[test]
    fn limits_grow_with_margins() {
        let l = expand_limits(None, &[0.0, 10.0, f64::NAN], 0.05, 0.05).unwrap();
        assert_eq!(l, (-0.5, 10.5));
        let l = expand_limits(Some((-3.0, 1.0)), &[0.0, 10.0], 0.0, 0.05).unwrap();
        assert_eq!(l, (-3.0, 10.5));
        assert!(matches!(expand_limits(None, &[f64::NAN], 0.0, 0.0), Err(PlotError::DataRange(_))));
    }
}
