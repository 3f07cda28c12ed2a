//! Mean and Student-t confidence interval across runs.
use crate::error::StatsError;
use anyhow::Result;
use log::warn;
use std::f64::consts::PI;

/// Per-index mean with lower and upper bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceInterval {
    /// Mean over runs.
    pub mean: Vec<f64>,

    /// `mean - h`.
    pub lower: Vec<f64>,

    /// `mean + h`.
    pub upper: Vec<f64>,
}

impl ConfidenceInterval {
    /// Number of indices.
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    /// Returns `true` if there is no index.
    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }
}

/// Computes `mean ∓ sem · t((1 + confidence) / 2, n - 1)` at each index.
///
/// Runs are truncated to the shortest one. `sem` is the standard error of the
/// mean with one degree of freedom removed. With a single run the bounds
/// equal the mean.
pub fn mean_confidence_interval(runs: &[Vec<f64>], confidence: f64) -> Result<ConfidenceInterval> {
    if !(confidence > 0. && confidence < 1.) {
        return Err(StatsError::InvalidConfidence(confidence).into());
    }
    let n = runs.len();
    let len = runs.iter().map(|r| r.len()).min().unwrap_or(0);
    if runs.iter().any(|r| r.len() != len) {
        warn!("runs have different lengths, truncated to {}", len);
    }

    let t = match n {
        0 | 1 => {
            warn!("{} run(s), the interval is empty", n);
            0.
        }
        _ => student_t_quantile((1. + confidence) / 2., (n - 1) as f64),
    };

    let mut ci = ConfidenceInterval {
        mean: Vec::with_capacity(len),
        lower: Vec::with_capacity(len),
        upper: Vec::with_capacity(len),
    };
    for i in 0..len {
        let mean = runs.iter().map(|r| r[i]).sum::<f64>() / n as f64;
        let h = match n {
            0 | 1 => 0.,
            _ => {
                let var = runs.iter().map(|r| (r[i] - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
                (var / n as f64).sqrt() * t
            }
        };
        ci.mean.push(mean);
        ci.lower.push(mean - h);
        ci.upper.push(mean + h);
    }
    Ok(ci)
}

/// Quantile of Student's t distribution with `df` degrees of freedom.
pub fn student_t_quantile(p: f64, df: f64) -> f64 {
    if p <= 0. {
        return f64::NEG_INFINITY;
    }
    if p >= 1. {
        return f64::INFINITY;
    }
    if p < 0.5 {
        return -student_t_quantile(1. - p, df);
    }

    let mut hi = 1.;
    while student_t_cdf(hi, df) < p && hi < 1e300 {
        hi *= 2.;
    }
    let mut lo = 0.;
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if student_t_cdf(mid, df) < p {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Cumulative distribution function of Student's t distribution.
pub fn student_t_cdf(t: f64, df: f64) -> f64 {
    let tail = 0.5 * regularized_incomplete_beta(df / (df + t * t), 0.5 * df, 0.5);
    match t >= 0. {
        true => 1. - tail,
        false => tail,
    }
}

/// Regularized incomplete beta function `I_x(a, b)`.
pub fn regularized_incomplete_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0. {
        return 0.;
    }
    if x >= 1. {
        return 1.;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1. - x).ln();
    let front = ln_front.exp();
    // The continued fraction converges fast only below this point.
    if x < (a + 1.) / (a + b + 2.) {
        front * beta_continued_fraction(x, a, b) / a
    } else {
        1. - front * beta_continued_fraction(1. - x, b, a) / b
    }
}

/// Modified Lentz evaluation of the continued fraction of `I_x(a, b)`.
fn beta_continued_fraction(x: f64, a: f64, b: f64) -> f64 {
    const TINY: f64 = 1e-300;
    const EPS: f64 = 1e-15;

    let (qab, qap, qam) = (a + b, a + 1., a - 1.);
    let mut c = 1.;
    let mut d = 1. - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1. / d;
    let mut h = d;

    for m in 1..=500 {
        let m = m as f64;
        let m2 = 2. * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1. + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1. + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1. / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1. + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1. + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1. / d;
        let del = d * c;
        h *= del;
        if (del - 1.).abs() < EPS {
            break;
        }
    }
    h
}

/// Lanczos approximation of `ln Γ(x)`.
fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.;
    const COEF: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        return (PI / (PI * x).sin()).ln() - ln_gamma(1. - x);
    }
    let x = x - 1.;
    let a = COEF
        .iter()
        .enumerate()
        .skip(1)
        .fold(COEF[0], |acc, (i, c)| acc + c / (x + i as f64));
    let t = x + G + 0.5;
    0.5 * (2. * PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ln_gamma() {
        assert!(ln_gamma(1.).abs() < 1e-12);
        assert!((ln_gamma(5.) - 24f64.ln()).abs() < 1e-10);
        assert!((ln_gamma(0.5) - PI.sqrt().ln()).abs() < 1e-10);
    }

    #[test]
    fn test_t_quantile_closed_forms() {
        for p in [0.6, 0.84, 0.975] {
            // df = 1 is the Cauchy distribution.
            let cauchy = (PI * (p - 0.5)).tan();
            assert!((student_t_quantile(p, 1.) - cauchy).abs() < 1e-6);

            let df2 = (2. * p - 1.) / (2. * p * (1. - p)).sqrt();
            assert!((student_t_quantile(p, 2.) - df2).abs() < 1e-6);
        }
        assert!((student_t_quantile(0.975, 10.) - 2.228_139).abs() < 1e-5);
        assert!((student_t_quantile(0.16, 10.) + student_t_quantile(0.84, 10.)).abs() < 1e-9);
        assert_eq!(student_t_quantile(0.5, 3.), 0.);
    }

    #[test]
    fn test_mean_confidence_interval() -> anyhow::Result<()> {
        let runs = vec![vec![1., 2., 3.], vec![3., 4., 5., 6.]];
        let ci = mean_confidence_interval(&runs, 0.68)?;
        assert_eq!(ci.mean, vec![2., 3., 4.]);

        // Standard error is 1 at every index.
        let h = (PI * 0.34).tan();
        for i in 0..3 {
            assert!((ci.lower[i] - (ci.mean[i] - h)).abs() < 1e-6);
            assert!((ci.upper[i] - (ci.mean[i] + h)).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_single_run_and_bad_confidence() -> anyhow::Result<()> {
        let ci = mean_confidence_interval(&[vec![1., 2.]], 0.9)?;
        assert_eq!(ci.lower, ci.mean);
        assert_eq!(ci.upper, ci.mean);
        assert!(mean_confidence_interval(&[vec![1.]], 1.0).is_err());
        Ok(())
    }
}
