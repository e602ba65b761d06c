use itertools::izip;
use multiversion::multiversion;

use crate::{
    math::{multiply, weighted_square_norm},
    operator::{Result, SamplerError},
};

/// Relates momentum to velocity.
///
/// Implementations are pure functions of the mass and never hold trajectory
/// state, so one preconditioner can be shared by every step of an operator.
pub trait MassPreconditioner {
    fn dim(&self) -> usize;

    /// The diagonal of the mass matrix.
    fn mass(&self) -> &[f64];

    /// `out = M^-1 momentum`
    fn velocity(&self, momentum: &[f64], out: &mut [f64]);

    fn velocity_at(&self, index: usize, momentum: &[f64]) -> f64;

    /// Replace the momenta of two colliding coordinates by their values
    /// after an elastic collision.
    ///
    /// The total momentum and the kinetic energy of the pair are conserved
    /// and the relative velocity changes sign.
    fn resolve_collision(&self, first: usize, second: usize, momentum: &mut [f64]);

    /// Draw a momentum from `N(0, M)`.
    fn randomize_momentum<R: rand::Rng + ?Sized>(&self, rng: &mut R, out: &mut [f64]);

    /// `0.5 * momentum^T M^-1 momentum`
    fn kinetic_energy(&self, momentum: &[f64]) -> f64;
}

#[derive(Debug, Clone)]
pub struct DiagMassMatrix {
    mass: Box<[f64]>,
    stds: Box<[f64]>,
    pub(crate) variance: Box<[f64]>,
}

impl DiagMassMatrix {
    pub fn new(mass: &[f64]) -> Result<Self> {
        if let Some((index, val)) = mass
            .iter()
            .enumerate()
            .find(|(_, &x)| !(x.is_finite() && x > 0f64))
        {
            return Err(SamplerError::InvalidSettings(format!(
                "Illegal value on mass matrix at {}: {}",
                index, val
            )));
        }
        let ndim = mass.len();
        let mut out = Self {
            mass: mass.into(),
            stds: vec![0f64; ndim].into(),
            variance: vec![0f64; ndim].into(),
        };
        update_diag(&mut out.variance, &mut out.stds, mass);
        Ok(out)
    }

    pub fn identity(ndim: usize) -> Self {
        Self {
            mass: vec![1f64; ndim].into(),
            stds: vec![1f64; ndim].into(),
            variance: vec![1f64; ndim].into(),
        }
    }
}

#[multiversion(targets("x86_64+avx+avx2+fma", "x86+sse"))]
fn update_diag(variance_out: &mut [f64], std_out: &mut [f64], mass: &[f64]) {
    izip!(variance_out, std_out, mass).for_each(|(var, std, &m)| {
        *var = m.recip();
        *std = m.sqrt();
    });
}

impl MassPreconditioner for DiagMassMatrix {
    fn dim(&self) -> usize {
        self.mass.len()
    }

    fn mass(&self) -> &[f64] {
        &self.mass
    }

    fn velocity(&self, momentum: &[f64], out: &mut [f64]) {
        multiply(&self.variance, momentum, out);
    }

    fn velocity_at(&self, index: usize, momentum: &[f64]) -> f64 {
        momentum[index] * self.variance[index]
    }

    fn resolve_collision(&self, first: usize, second: usize, momentum: &mut [f64]) {
        let (m1, m2) = (self.mass[first], self.mass[second]);
        let (p1, p2) = (momentum[first], momentum[second]);
        let total = m1 + m2;

        momentum[first] = ((m1 - m2) * p1 + 2. * m1 * p2) / total;
        momentum[second] = ((m2 - m1) * p2 + 2. * m2 * p1) / total;
    }

    fn randomize_momentum<R: rand::Rng + ?Sized>(&self, rng: &mut R, out: &mut [f64]) {
        let dist = rand_distr::StandardNormal;
        out.iter_mut().zip(self.stds.iter()).for_each(|(p, &s)| {
            let norm: f64 = rng.sample(dist);
            *p = s * norm;
        });
    }

    fn kinetic_energy(&self, momentum: &[f64]) -> f64 {
        0.5 * weighted_square_norm(momentum, &self.mass)
    }
}
