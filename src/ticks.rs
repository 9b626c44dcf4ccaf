//! Tick placement and number formatting for axes and colorbars.
//!
//! The default locator is the extended Wilkinson search (Talbot, Lin and
//! Hanrahan, "An Extension of Wilkinson's Algorithm for Positioning Tick
//! Labels on Axes"), scoring candidate label sets on simplicity, coverage,
//! density and legibility.

/// Which label sets are acceptable relative to the data range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnlyInside {
    /// Labels must cover the data range.
    Cover,
    #[default]
    Any,
    /// Labels must lie within the data range.
    Inside,
}

impl OnlyInside {
    fn from_sign(v: i32) -> Self {
        match v.signum() {
            -1 => OnlyInside::Cover,
            1 => OnlyInside::Inside,
            _ => OnlyInside::Any,
        }
    }
}

/// Picks about `target` nice tick positions for `[min, max]`.
pub trait TickLocator {
    fn ticks(&self, min: f64, max: f64, target: f64, only_inside: OnlyInside) -> Vec<f64>;
}

// ---------------------------------------------------------------------------
// Extended Wilkinson
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExtendedWilkinson {
    /// Nice step multipliers, most preferred first.
    pub q: Vec<f64>,
    /// Weights of simplicity, coverage, density and legibility.
    pub w: [f64; 4],
}

impl Default for ExtendedWilkinson {
    fn default() -> Self {
        Self {
            q: vec![1.0, 5.0, 2.0, 2.5, 4.0, 3.0],
            w: [0.2, 0.25, 0.5, 0.05],
        }
    }
}

/// Largest magnitude below which every integer is an exact `f64` (2^53).
const MAX_EXACT_STEPS: f64 = 9_007_199_254_740_992.0;

/// Label set found by the search.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Labels {
    lmin: f64,
    lstep: f64,
    k: usize,
}

impl ExtendedWilkinson {
    fn score(&self, simplicity: f64, coverage: f64, density: f64, legibility: f64) -> f64 {
        self.w[0] * simplicity + self.w[1] * coverage + self.w[2] * density + self.w[3] * legibility
    }

    fn simplicity(&self, i: usize, j: f64, lmin: f64, lmax: f64, lstep: f64) -> f64 {
        const EPS: f64 = 1e-10;
        let n = self.q.len() as f64;
        let zero_is_label = lmin.rem_euclid(lstep) < EPS
            || ((lstep - lmin).rem_euclid(lstep) < EPS && lmin <= 0.0 && lmax >= 0.0);
        let v = if zero_is_label { 1.0 } else { 0.0 };
        (n - (i + 1) as f64) / (n - 1.0) + v - j
    }

    fn simplicity_max(&self, i: usize, j: f64) -> f64 {
        let n = self.q.len() as f64;
        (n - (i + 1) as f64) / (n - 1.0) + 1.0 - j
    }

    fn search(&self, dmin: f64, dmax: f64, m: f64, only_inside: OnlyInside) -> Option<Labels> {
        let mut best_score = -1.0;
        let mut best = None;

        let mut j = 1.0;
        'outer: loop {
            for (i, &q) in self.q.iter().enumerate() {
                let sm = self.simplicity_max(i, j);
                if self.score(sm, 1.0, 1.0, 1.0) < best_score {
                    break 'outer;
                }

                let mut k = 2.0;
                loop {
                    let dm = density_max(k, m);
                    if self.score(sm, 1.0, dm, 1.0) < best_score {
                        break;
                    }

                    let delta = (dmax - dmin) / (k + 1.0) / j / q;
                    let mut z = delta.log10().ceil();

                    loop {
                        let step = j * q * 10f64.powf(z);
                        let cm = coverage_max(dmin, dmax, step * (k - 1.0));
                        if self.score(sm, cm, dm, 1.0) < best_score {
                            break;
                        }

                        // start positions are counted in whole steps, which
                        // needs dmin / step and dmax / step to be exact integers
                        if (dmin / step).abs().max((dmax / step).abs()) * j >= MAX_EXACT_STEPS {
                            z += 1.0;
                            continue;
                        }
                        let min_start = (dmax / step).floor() * j - (k - 1.0) * j;
                        let max_start = (dmin / step).ceil() * j;
                        if min_start > max_start {
                            break;
                        }

                        for n in 0..=((max_start - min_start) as u64) {
                            let start = min_start + n as f64;
                            let lmin = start * (step / j);
                            let lmax = lmin + step * (k - 1.0);
                            let s = self.simplicity(i, j, lmin, lmax, step);
                            let c = coverage(dmin, dmax, lmin, lmax);
                            let d = density(k, m, dmin, dmax, lmin, lmax);
                            let score = self.score(s, c, d, 1.0);

                            let accepted = match only_inside {
                                OnlyInside::Any => true,
                                OnlyInside::Inside => lmin >= dmin && lmax <= dmax,
                                OnlyInside::Cover => lmin <= dmin && lmax >= dmax,
                            };
                            if score > best_score && accepted {
                                best_score = score;
                                best = Some(Labels {
                                    lmin,
                                    lstep: step,
                                    k: k as usize,
                                });
                            }
                        }
                        z += 1.0;
                    }
                    k += 1.0;
                }
            }
            j += 1.0;
        }
        best
    }
}

fn coverage(dmin: f64, dmax: f64, lmin: f64, lmax: f64) -> f64 {
    1.0 - 0.5 * ((dmax - lmax).powi(2) + (dmin - lmin).powi(2)) / (0.1 * (dmax - dmin)).powi(2)
}

fn coverage_max(dmin: f64, dmax: f64, span: f64) -> f64 {
    let range = dmax - dmin;
    if span > range {
        1.0 - (0.5 * (span - range)).powi(2) / (0.1 * range).powi(2)
    } else {
        1.0
    }
}

fn density(k: f64, m: f64, dmin: f64, dmax: f64, lmin: f64, lmax: f64) -> f64 {
    let r = (k - 1.0) / (lmax - lmin);
    let rt = (m - 1.0) / (lmax.max(dmax) - lmin.min(dmin));
    2.0 - (r / rt).max(rt / r)
}

fn density_max(k: f64, m: f64) -> f64 {
    if k >= m {
        2.0 - (k - 1.0) / (m - 1.0)
    } else {
        1.0
    }
}

impl TickLocator for ExtendedWilkinson {
    fn ticks(&self, min: f64, max: f64, target: f64, only_inside: OnlyInside) -> Vec<f64> {
        if !(min.is_finite() && max.is_finite()) {
            return Vec::new();
        }
        if min >= max || target < 1.0 {
            return vec![min];
        }
        match self.search(min, max, target, only_inside) {
            Some(l) => (0..l.k).map(|i| l.lmin + i as f64 * l.lstep).collect(),
            None => vec![min, max],
        }
    }
}

/// Convenience wrapper with the default weights; `only_inside` is
/// `-1`, `0` or `1`.
pub fn get_ticks(min: f64, max: f64, target: f64, only_inside: i32) -> Vec<f64> {
    ExtendedWilkinson::default().ticks(min, max, target, OnlyInside::from_sign(only_inside))
}

/// Integer decades for a log10 colorbar over `[min, max]`, at most about
/// six of them.
pub fn decade_ticks(min: f64, max: f64) -> Vec<f64> {
    if !(min.is_finite() && max.is_finite()) {
        return Vec::new();
    }
    let (lo, hi) = (min.ceil(), max.floor() + 1.0);
    let step = ((hi - lo) / 6.0).floor().max(1.0);
    let mut out = Vec::new();
    let mut v = lo;
    while v < hi {
        out.push(v);
        v += step;
    }
    out
}

// ---------------------------------------------------------------------------
// Number formatting
// ---------------------------------------------------------------------------

/// Shorter of the fixed and scientific renderings of `value` with
/// `precision` significant digits, trailing zeros removed.
pub fn number_format(value: f64, precision: usize) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let e = value.abs().log10();
    let digits = (precision as i64 - (e.floor() as i64 + 1)).max(1) as usize;

    let fixed = strip_zeros(&format!("{value:.digits$}"));
    let sci = {
        let s = format!("{value:.prec$e}", prec = precision.saturating_sub(1));
        match s.split_once('e') {
            Some((mantissa, exponent)) => format!("{}e{exponent}", strip_zeros(mantissa)),
            None => s,
        }
    };

    if fixed.len() < sci.len() {
        fixed
    } else {
        sci
    }
}

fn strip_zeros(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn nice_ticks_for_zero_to_ten() {
        let t = get_ticks(0.0, 10.0, 6.0, 0);
        let expected = [0.0, 2.0, 4.0, 6.0, 8.0, 10.0];
        assert_eq!(t.len(), expected.len());
        for (a, b) in t.iter().zip(expected) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn only_inside_keeps_labels_within_data() {
        let t = get_ticks(0.3, 9.7, 6.0, 1);
        assert!(t.len() >= 2);
        assert!(t.iter().all(|v| *v >= 0.3 && *v <= 9.7), "{t:?}");
    }

    #[test]
    fn cover_spans_the_data() {
        let t = get_ticks(0.3, 9.7, 6.0, -1);
        assert!(t[0] <= 0.3);
        assert!(*t.last().unwrap() >= 9.7);
    }

    #[test]
    fn degenerate_ranges() {
        assert_eq!(get_ticks(5.0, 5.0, 6.0, 0), vec![5.0]);
        assert_eq!(get_ticks(5.0, 1.0, 6.0, 0), vec![5.0]);
        assert!(get_ticks(f64::NAN, 1.0, 6.0, 0).is_empty());
    }

    #[test]
    fn narrow_ranges_at_large_magnitude_terminate() {
        let (lo, hi) = (1e16, 1e16 + 8.0);
        let t = get_ticks(lo, hi, 6.0, 1);
        assert!(!t.is_empty());
        assert!(t.iter().all(|v| *v >= lo && *v <= hi), "{t:?}");

        let t = get_ticks(1.7e18, 1.7e18 + 5e3, 6.0, 0);
        assert!(!t.is_empty());
        assert!(t.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn decades() {
        assert_eq!(decade_ticks(0.2, 3.5), vec![1.0, 2.0, 3.0]);
        assert_eq!(decade_ticks(-0.5, 14.2), vec![-0.0, 2.0, 4.0, 6.0, 8.0, 10.0, 12.0, 14.0]);
    }

    #[test]
    fn formats_numbers_compactly() {
        assert_eq!(number_format(0.0, 4), "0");
        assert_eq!(number_format(1234.5678, 4), "1234.6");
        assert_eq!(number_format(0.0001234, 4), "1.234e-4");
        assert_eq!(number_format(2.5, 4), "2.5");
        assert_eq!(number_format(-10.0, 4), "-10");
        assert_eq!(number_format(1.5e9, 4), "1.5e9");
        assert_eq!(number_format(f64::NAN, 4), "nan");
    }
}
