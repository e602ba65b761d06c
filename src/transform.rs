//! Coordinate transforms for Hamiltonian Monte Carlo.
//!
//! A transform maps a constrained parameter onto the real line. The sampler
//! moves in the unconstrained coordinates and targets the transformed
//! density, which includes the log determinant of the Jacobian of the
//! inverse map.

use crate::cpu_potential::CpuLogpFunc;
use crate::math::all_finite;
use crate::operator::{Result, SamplerError};

/// An elementwise bijection between a constrained interval and the real
/// line.
pub trait Transform: Send + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Constrained to unconstrained.
    fn transform(&self, value: f64) -> f64;

    /// Unconstrained to constrained.
    fn inverse(&self, value: f64) -> f64;

    /// `d inverse / d value`
    fn inverse_derivative(&self, value: f64) -> f64;

    /// `log |d inverse / d value|`
    fn log_jacobian(&self, value: f64) -> f64;

    /// Derivative of [`Transform::log_jacobian`].
    fn log_jacobian_gradient(&self, value: f64) -> f64;
}

/// `y = ln(x)` for positive parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransform;

impl Transform for LogTransform {
    fn name(&self) -> &'static str {
        "log"
    }

    fn transform(&self, value: f64) -> f64 {
        value.ln()
    }

    fn inverse(&self, value: f64) -> f64 {
        value.exp()
    }

    fn inverse_derivative(&self, value: f64) -> f64 {
        value.exp()
    }

    fn log_jacobian(&self, value: f64) -> f64 {
        value
    }

    fn log_jacobian_gradient(&self, _value: f64) -> f64 {
        1.
    }
}

/// Scaled logit for parameters in `(lower, upper)`.
#[derive(Debug, Clone, Copy)]
pub struct IntervalTransform {
    lower: f64,
    upper: f64,
}

impl IntervalTransform {
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        if !(lower.is_finite() && upper.is_finite() && lower < upper) {
            return Err(SamplerError::InvalidSettings(format!(
                "Invalid interval ({}, {}) for transform",
                lower, upper
            )));
        }
        Ok(IntervalTransform { lower, upper })
    }
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0. {
        1. / (1. + (-x).exp())
    } else {
        let e = x.exp();
        e / (1. + e)
    }
}

/// `ln(1 + exp(x))`
fn softplus(x: f64) -> f64 {
    x.max(0.) + (-x.abs()).exp().ln_1p()
}

impl Transform for IntervalTransform {
    fn name(&self) -> &'static str {
        "interval"
    }

    fn transform(&self, value: f64) -> f64 {
        let u = (value - self.lower) / (self.upper - self.lower);
        u.ln() - (-u).ln_1p()
    }

    fn inverse(&self, value: f64) -> f64 {
        self.lower + (self.upper - self.lower) * sigmoid(value)
    }

    fn inverse_derivative(&self, value: f64) -> f64 {
        let s = sigmoid(value);
        (self.upper - self.lower) * s * (1. - s)
    }

    fn log_jacobian(&self, value: f64) -> f64 {
        // ln(sigmoid(y)) + ln(1 - sigmoid(y)) = -softplus(-y) - softplus(y)
        (self.upper - self.lower).ln() - softplus(-value) - softplus(value)
    }

    fn log_jacobian_gradient(&self, value: f64) -> f64 {
        1. - 2. * sigmoid(value)
    }
}

/// Evaluates a constrained log density in unconstrained coordinates.
#[derive(Debug)]
pub struct TransformedTarget {
    transform: Box<dyn Transform>,
    constrained: Box<[f64]>,
    gradient: Box<[f64]>,
}

impl TransformedTarget {
    pub fn new(transform: Box<dyn Transform>, dim: usize) -> Self {
        TransformedTarget {
            transform,
            constrained: vec![0f64; dim].into(),
            gradient: vec![0f64; dim].into(),
        }
    }

    pub fn transform(&self) -> &dyn Transform {
        self.transform.as_ref()
    }

    pub fn to_unconstrained(&self, constrained: &[f64], out: &mut [f64]) -> Result<()> {
        out.iter_mut()
            .zip(constrained)
            .for_each(|(y, &x)| *y = self.transform.transform(x));
        if !all_finite(out) {
            return Err(SamplerError::InvalidOperatorState(
                "parameter lies outside of the domain of the transform",
            ));
        }
        Ok(())
    }

    pub fn to_constrained(&self, unconstrained: &[f64], out: &mut [f64]) {
        out.iter_mut()
            .zip(unconstrained)
            .for_each(|(x, &y)| *x = self.transform.inverse(y));
    }

    /// Log density and gradient of the transformed target at `unconstrained`.
    pub fn log_density<F: CpuLogpFunc>(
        &mut self,
        logp: &mut F,
        unconstrained: &[f64],
        gradient: &mut [f64],
    ) -> Result<f64> {
        let transform = self.transform.as_ref();
        self.constrained
            .iter_mut()
            .zip(unconstrained)
            .for_each(|(x, &y)| *x = transform.inverse(y));

        let mut value = logp
            .logp(&self.constrained, &mut self.gradient)
            .map_err(SamplerError::from_logp)?;

        for ((out, &g), &y) in gradient.iter_mut().zip(self.gradient.iter()).zip(unconstrained) {
            value += transform.log_jacobian(y);
            *out = g * transform.inverse_derivative(y) + transform.log_jacobian_gradient(y);
        }
        Ok(value)
    }
}
