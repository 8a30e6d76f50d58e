//! Probability distributions attached to Distribution nodes.
//!
//! The set of families is closed, so a distribution is a plain enum carrying
//! validated parameters. Sampling goes through `rand_distr`; log-densities are
//! computed directly.

pub mod registry;
pub mod special;

pub use registry::{DistributionCtor, DistributionRegistry, DistributionSpec};

use std::f64::consts::PI;
use std::fmt;

use rand::Rng;
use rand_distr::Distribution as _;

use crate::error::ExecutionError;
use special::{ln_beta, ln_choose, ln_gamma, xlogy};

/// A fully parameterized distribution.
///
/// Fields carry the usual parameter names of each family.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distribution {
    /// Point mass.
    Const { value: f64 },
    /// Normal with standard deviation `sd`.
    Normal { mean: f64, sd: f64 },
    /// Log of the variable is normal.
    LogNormal { meanlog: f64, sdlog: f64 },
    /// Gamma in shape and rate.
    Gamma { shape: f64, rate: f64 },
    Exponential { rate: f64 },
    /// Continuous uniform on `[min, max]`.
    Uniform { min: f64, max: f64 },
    Beta { alpha: f64, beta: f64 },
    /// Number of successes in `size` trials.
    Binomial { size: u64, prob: f64 },
    ChiSquared { df: f64 },
    /// Inverse gamma with `scale = 1 / rate`.
    InvGamma { shape: f64, rate: f64 },
    /// Triangular with lower bound, mode, and upper bound.
    Triangular { min: f64, mode: f64, max: f64 },
    Poisson { rate: f64 },
}

fn invalid(name: &str, reason: impl Into<String>) -> ExecutionError {
    ExecutionError::InvalidDistribution {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn positive(name: &str, param: &str, v: f64) -> Result<f64, ExecutionError> {
    if v.is_finite() && v > 0.0 {
        Ok(v)
    } else {
        Err(invalid(name, format!("{param} must be positive, got {v}")))
    }
}

fn finite(name: &str, param: &str, v: f64) -> Result<f64, ExecutionError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(invalid(name, format!("{param} must be finite, got {v}")))
    }
}

#[allow(clippy::cast_precision_loss)]
fn count_to_f64(n: u64) -> f64 {
    n as f64
}

fn is_whole(x: f64) -> bool {
    x.is_finite() && x.fract() == 0.0
}

impl Distribution {
    /// Point mass at `value`.
    pub fn constant(value: f64) -> Result<Self, ExecutionError> {
        Ok(Self::Const {
            value: finite("k", "value", value)?,
        })
    }

    /// Normal with mean and standard deviation.
    pub fn normal(mean: f64, sd: f64) -> Result<Self, ExecutionError> {
        Ok(Self::Normal {
            mean: finite("norm", "mean", mean)?,
            sd: positive("norm", "sd", sd)?,
        })
    }

    /// Log-normal with log-scale mean and standard deviation.
    pub fn log_normal(meanlog: f64, sdlog: f64) -> Result<Self, ExecutionError> {
        Ok(Self::LogNormal {
            meanlog: finite("lnorm", "meanlog", meanlog)?,
            sdlog: positive("lnorm", "sdlog", sdlog)?,
        })
    }

    /// Gamma with shape and rate.
    pub fn gamma(shape: f64, rate: f64) -> Result<Self, ExecutionError> {
        Ok(Self::Gamma {
            shape: positive("gamma", "shape", shape)?,
            rate: positive("gamma", "rate", rate)?,
        })
    }

    /// Exponential with rate.
    pub fn exponential(rate: f64) -> Result<Self, ExecutionError> {
        Ok(Self::Exponential {
            rate: positive("exp", "rate", rate)?,
        })
    }

    /// Uniform on `[min, max)`.
    pub fn uniform(min: f64, max: f64) -> Result<Self, ExecutionError> {
        let min = finite("unif", "min", min)?;
        let max = finite("unif", "max", max)?;
        if min >= max {
            return Err(invalid("unif", format!("min ({min}) must be below max ({max})")));
        }
        Ok(Self::Uniform { min, max })
    }

    /// Beta with two shape parameters.
    pub fn beta(alpha: f64, beta: f64) -> Result<Self, ExecutionError> {
        Ok(Self::Beta {
            alpha: positive("beta", "alpha", alpha)?,
            beta: positive("beta", "beta", beta)?,
        })
    }

    /// Binomial with a whole, non-negative size.
    pub fn binomial(size: f64, prob: f64) -> Result<Self, ExecutionError> {
        if !is_whole(size) || size < 0.0 {
            return Err(invalid("binom", format!("size must be a whole number >= 0, got {size}")));
        }
        if !(0.0..=1.0).contains(&prob) {
            return Err(invalid("binom", format!("prob must be in [0, 1], got {prob}")));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let size = size as u64;
        Ok(Self::Binomial { size, prob })
    }

    /// Chi-squared with degrees of freedom.
    pub fn chi_squared(df: f64) -> Result<Self, ExecutionError> {
        Ok(Self::ChiSquared {
            df: positive("chisq", "df", df)?,
        })
    }

    /// Inverse gamma with shape and rate.
    pub fn inv_gamma(shape: f64, rate: f64) -> Result<Self, ExecutionError> {
        Ok(Self::InvGamma {
            shape: positive("invgamma", "shape", shape)?,
            rate: positive("invgamma", "rate", rate)?,
        })
    }

    /// Triangular over three points given in any order.
    pub fn triangular(a: f64, b: f64, c: f64) -> Result<Self, ExecutionError> {
        let mut pts = [
            finite("triangle", "a", a)?,
            finite("triangle", "m", b)?,
            finite("triangle", "b", c)?,
        ];
        pts.sort_by(f64::total_cmp);
        if pts[0] >= pts[2] {
            return Err(invalid("triangle", "bounds must differ"));
        }
        Ok(Self::Triangular {
            min: pts[0],
            mode: pts[1],
            max: pts[2],
        })
    }

    /// Poisson with rate.
    pub fn poisson(rate: f64) -> Result<Self, ExecutionError> {
        Ok(Self::Poisson {
            rate: positive("pois", "rate", rate)?,
        })
    }

    /// Short family name as used in scripts.
    #[must_use]
    pub const fn family(&self) -> &'static str {
        match self {
            Self::Const { .. } => "k",
            Self::Normal { .. } => "norm",
            Self::LogNormal { .. } => "lnorm",
            Self::Gamma { .. } => "gamma",
            Self::Exponential { .. } => "exp",
            Self::Uniform { .. } => "unif",
            Self::Beta { .. } => "beta",
            Self::Binomial { .. } => "binom",
            Self::ChiSquared { .. } => "chisq",
            Self::InvGamma { .. } => "invgamma",
            Self::Triangular { .. } => "triangle",
            Self::Poisson { .. } => "pois",
        }
    }

    /// Draw one value.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64, ExecutionError> {
        let name = self.family();
        let map = |e: &dyn fmt::Display| invalid(name, e.to_string());
        let value = match *self {
            Self::Const { value } => value,
            Self::Normal { mean, sd } => rand_distr::Normal::new(mean, sd)
                .map_err(|e| map(&e))?
                .sample(rng),
            Self::LogNormal { meanlog, sdlog } => rand_distr::LogNormal::new(meanlog, sdlog)
                .map_err(|e| map(&e))?
                .sample(rng),
            Self::Gamma { shape, rate } => rand_distr::Gamma::new(shape, 1.0 / rate)
                .map_err(|e| map(&e))?
                .sample(rng),
            Self::Exponential { rate } => rand_distr::Exp::new(rate).map_err(|e| map(&e))?.sample(rng),
            Self::Uniform { min, max } => rand_distr::Uniform::new(min, max).sample(rng),
            Self::Beta { alpha, beta } => rand_distr::Beta::new(alpha, beta)
                .map_err(|e| map(&e))?
                .sample(rng),
            Self::Binomial { size, prob } => count_to_f64(
                rand_distr::Binomial::new(size, prob)
                    .map_err(|e| map(&e))?
                    .sample(rng),
            ),
            Self::ChiSquared { df } => rand_distr::ChiSquared::new(df)
                .map_err(|e| map(&e))?
                .sample(rng),
            Self::InvGamma { shape, rate } => {
                let g: f64 = rand_distr::Gamma::new(shape, 1.0)
                    .map_err(|e| map(&e))?
                    .sample(rng);
                (1.0 / rate) / g
            }
            Self::Triangular { min, mode, max } => rand_distr::Triangular::new(min, max, mode)
                .map_err(|e| map(&e))?
                .sample(rng),
            Self::Poisson { rate } => {
                let draw: f64 = rand_distr::Poisson::new(rate)
                    .map_err(|e| map(&e))?
                    .sample(rng);
                draw
            }
        };
        Ok(value)
    }

    /// Log-density (or log-mass) at `x`; negative infinity outside the support.
    #[must_use]
    pub fn log_density(&self, x: f64) -> f64 {
        let ninf = f64::NEG_INFINITY;
        match *self {
            Self::Const { value } => {
                if x == value {
                    0.0
                } else {
                    ninf
                }
            }
            Self::Normal { mean, sd } => {
                let z = (x - mean) / sd;
                -0.5 * z * z - sd.ln() - 0.5 * (2.0 * PI).ln()
            }
            Self::LogNormal { meanlog, sdlog } => {
                if x <= 0.0 {
                    return ninf;
                }
                let z = (x.ln() - meanlog) / sdlog;
                -0.5 * z * z - (x * sdlog).ln() - 0.5 * (2.0 * PI).ln()
            }
            Self::Gamma { shape, rate } => {
                if x < 0.0 {
                    return ninf;
                }
                shape * rate.ln() - ln_gamma(shape) + xlogy(shape - 1.0, x) - rate * x
            }
            Self::Exponential { rate } => {
                if x < 0.0 {
                    ninf
                } else {
                    rate.ln() - rate * x
                }
            }
            Self::Uniform { min, max } => {
                if (min..=max).contains(&x) {
                    -(max - min).ln()
                } else {
                    ninf
                }
            }
            Self::Beta { alpha, beta } => {
                if !(0.0..=1.0).contains(&x) {
                    return ninf;
                }
                xlogy(alpha - 1.0, x) + xlogy(beta - 1.0, 1.0 - x) - ln_beta(alpha, beta)
            }
            Self::Binomial { size, prob } => {
                let n = count_to_f64(size);
                if !is_whole(x) || x < 0.0 || x > n {
                    return ninf;
                }
                ln_choose(n, x) + xlogy(x, prob) + xlogy(n - x, 1.0 - prob)
            }
            Self::ChiSquared { df } => {
                if x < 0.0 {
                    return ninf;
                }
                let k = df / 2.0;
                xlogy(k - 1.0, x) - x / 2.0 - k * 2f64.ln() - ln_gamma(k)
            }
            Self::InvGamma { shape, rate } => {
                if x <= 0.0 {
                    return ninf;
                }
                let scale = 1.0 / rate;
                shape * scale.ln() - ln_gamma(shape) - (shape + 1.0) * x.ln() - scale / x
            }
            Self::Triangular { min, mode, max } => {
                if x < min || x > max {
                    return ninf;
                }
                let d = if x < mode {
                    2.0 * (x - min) / ((max - min) * (mode - min))
                } else if x > mode {
                    2.0 * (max - x) / ((max - min) * (max - mode))
                } else {
                    2.0 / (max - min)
                };
                d.ln()
            }
            Self::Poisson { rate } => {
                if !is_whole(x) || x < 0.0 {
                    return ninf;
                }
                x * rate.ln() - rate - ln_gamma(x + 1.0)
            }
        }
    }

    /// Expected value.
    #[must_use]
    pub fn mean(&self) -> f64 {
        match *self {
            Self::Const { value } => value,
            Self::Normal { mean, .. } => mean,
            Self::LogNormal { meanlog, sdlog } => (meanlog + sdlog * sdlog / 2.0).exp(),
            Self::Gamma { shape, rate } => shape / rate,
            Self::Exponential { rate } => 1.0 / rate,
            Self::Poisson { rate } => rate,
            Self::Uniform { min, max } => (min + max) / 2.0,
            Self::Beta { alpha, beta } => alpha / (alpha + beta),
            Self::Binomial { size, prob } => count_to_f64(size) * prob,
            Self::ChiSquared { df } => df,
            Self::InvGamma { shape, rate } => {
                if shape > 1.0 {
                    (1.0 / rate) / (shape - 1.0)
                } else {
                    f64::INFINITY
                }
            }
            Self::Triangular { min, mode, max } => (min + mode + max) / 3.0,
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.family();
        match *self {
            Self::Const { value } => write!(f, "{name}({value})"),
            Self::Normal { mean: a, sd: b }
            | Self::LogNormal { meanlog: a, sdlog: b }
            | Self::Gamma { shape: a, rate: b }
            | Self::Uniform { min: a, max: b }
            | Self::Beta { alpha: a, beta: b }
            | Self::InvGamma { shape: a, rate: b } => write!(f, "{name}({a}, {b})"),
            Self::Exponential { rate: a } | Self::ChiSquared { df: a } | Self::Poisson { rate: a } => {
                write!(f, "{name}({a})")
            }
            Self::Binomial { size, prob } => write!(f, "{name}({size}, {prob})"),
            Self::Triangular { min, mode, max } => write!(f, "{name}({min}, {mode}, {max})"),
        }
    }
}
