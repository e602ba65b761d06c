use std::fmt::Debug;

use faer::{ColRef, Mat};

use crate::operator::{LogpError, Result, SamplerError};

/// The target density: log posterior value and its gradient.
pub trait CpuLogpFunc {
    type Err: Debug + Send + Sync + LogpError + 'static;

    /// Write the gradient of the log density at `position` into `gradient`
    /// and return the log density.
    fn logp(&mut self, position: &[f64], gradient: &mut [f64]) -> std::result::Result<f64, Self::Err>;
    fn dim(&self) -> usize;
}

/// Products with the precision matrix of a Gaussian potential.
///
/// For a Gaussian target the gradient along a straight line changes by
/// `-t * precision * velocity`, which is what lets the zig-zag sampler
/// move between events without evaluating the density.
pub trait CpuPrecisionFunc {
    fn dim(&self) -> usize;

    /// `out = precision * velocity`
    fn product(&mut self, velocity: &[f64], out: &mut [f64]);

    /// Write column `index` of the precision matrix into `out`.
    fn column(&mut self, index: usize, out: &mut [f64]);
}

/// A dense symmetric precision matrix.
#[derive(Debug, Clone)]
pub struct DensePrecision {
    precision: Mat<f64>,
}

impl DensePrecision {
    pub fn new(precision: Mat<f64>) -> Result<Self> {
        let dim = precision.nrows();
        if precision.ncols() != dim {
            return Err(SamplerError::DimensionMismatch {
                expected: dim,
                found: precision.ncols(),
            });
        }
        for i in 0..dim {
            for j in 0..i {
                let (a, b) = (precision[(i, j)], precision[(j, i)]);
                if (a - b).abs() > 1e-12 * (1. + a.abs().max(b.abs())) {
                    return Err(SamplerError::InvalidSettings(format!(
                        "precision matrix is not symmetric at ({}, {})",
                        i, j
                    )));
                }
            }
        }
        Ok(Self { precision })
    }

    pub fn from_diagonal(diag: &[f64]) -> Self {
        let precision = Mat::from_fn(diag.len(), diag.len(), |i, j| if i == j { diag[i] } else { 0. });
        Self { precision }
    }

    pub fn matrix(&self) -> &Mat<f64> {
        &self.precision
    }
}

impl CpuPrecisionFunc for DensePrecision {
    fn dim(&self) -> usize {
        self.precision.nrows()
    }

    fn product(&mut self, velocity: &[f64], out: &mut [f64]) {
        assert!(velocity.len() == self.dim());
        assert!(out.len() == self.dim());
        let product = self.precision.as_ref() * ColRef::from_slice(velocity);
        out.iter_mut()
            .zip(product.iter())
            .for_each(|(out, &val)| *out = val);
    }

    fn column(&mut self, index: usize, out: &mut [f64]) {
        out.copy_from_slice(self.precision.col_as_slice(index));
    }
}

pub mod test_logps {
    use faer::{Col, Mat};
    use thiserror::Error;

    use crate::cpu_potential::{CpuLogpFunc, DensePrecision};
    use crate::operator::LogpError;

    #[derive(Debug, Error)]
    pub enum NormalLogpError {
        #[error("position is not finite")]
        NotFinite,
    }

    impl LogpError for NormalLogpError {
        fn is_recoverable(&self) -> bool {
            true
        }
    }

    /// Independent normals with unit variance centered at `mu`.
    #[derive(Debug, Clone)]
    pub struct NormalLogp {
        dim: usize,
        mu: f64,
    }

    impl NormalLogp {
        pub fn new(dim: usize, mu: f64) -> NormalLogp {
            NormalLogp { dim, mu }
        }
    }

    impl CpuLogpFunc for NormalLogp {
        type Err = NormalLogpError;

        fn dim(&self) -> usize {
            self.dim
        }

        fn logp(&mut self, position: &[f64], gradient: &mut [f64]) -> Result<f64, Self::Err> {
            let n = position.len();
            assert!(gradient.len() == n);

            let mut logp = 0f64;
            for (p, g) in position.iter().zip(gradient.iter_mut()) {
                if !p.is_finite() {
                    return Err(NormalLogpError::NotFinite);
                }
                let val = *p - self.mu;
                logp -= 0.5 * val * val;
                *g = -val;
            }
            Ok(logp)
        }
    }

    /// A multivariate normal given by its mean and precision matrix.
    #[derive(Debug, Clone)]
    pub struct GaussianLogp {
        mean: Box<[f64]>,
        precision: Mat<f64>,
    }

    impl GaussianLogp {
        pub fn new(mean: &[f64], precision: Mat<f64>) -> GaussianLogp {
            assert!(precision.nrows() == mean.len());
            assert!(precision.ncols() == mean.len());
            GaussianLogp {
                mean: mean.into(),
                precision,
            }
        }

        /// Correlated pairs: unit diagonal and `rho` between neighbours.
        pub fn banded(dim: usize, rho: f64) -> GaussianLogp {
            let precision = Mat::from_fn(dim, dim, |i, j| {
                if i == j {
                    1.
                } else if i.abs_diff(j) == 1 {
                    rho
                } else {
                    0.
                }
            });
            GaussianLogp::new(&vec![0.; dim], precision)
        }

        /// The precision provider that matches this density.
        pub fn precision(&self) -> DensePrecision {
            DensePrecision::new(self.precision.clone()).expect("Precision must be symmetric")
        }
    }

    impl CpuLogpFunc for GaussianLogp {
        type Err = NormalLogpError;

        fn dim(&self) -> usize {
            self.mean.len()
        }

        fn logp(&mut self, position: &[f64], gradient: &mut [f64]) -> Result<f64, Self::Err> {
            let n = self.mean.len();
            assert!(position.len() == n);
            assert!(gradient.len() == n);

            if position.iter().any(|x| !x.is_finite()) {
                return Err(NormalLogpError::NotFinite);
            }

            let diff = Col::from_fn(n, |i| position[i] - self.mean[i]);
            let action = &self.precision * &diff;
            let mut logp = 0f64;
            for ((g, &a), &d) in gradient.iter_mut().zip(action.iter()).zip(diff.iter()) {
                *g = -a;
                logp -= 0.5 * d * a;
            }
            Ok(logp)
        }
    }
}
