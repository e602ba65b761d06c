use crate::mass_matrix::MassPreconditioner;
use crate::math::{all_finite, axpy};
use crate::operator::{Result, SamplerError};
use crate::trajectory::ReflectiveUpdate;

/// A log density with gradient, as seen by the leapfrog integrator.
pub trait Potential {
    fn dim(&self) -> usize;

    /// Compute the log density at `position` and write its gradient.
    fn log_density(&mut self, position: &[f64], gradient: &mut [f64]) -> Result<f64>;
}

/// The drift part of a leapfrog step.
pub trait PositionUpdate {
    /// Move `position` for `step_size` units of time with the velocity
    /// implied by `momentum`. Returns the number of events on the way.
    fn update_position<M: MassPreconditioner>(
        &mut self,
        position: &mut [f64],
        momentum: &mut [f64],
        mass: &M,
        step_size: f64,
    ) -> Result<u64>;
}

/// Unconstrained straight-line motion.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreeFlight;

impl PositionUpdate for FreeFlight {
    fn update_position<M: MassPreconditioner>(
        &mut self,
        position: &mut [f64],
        momentum: &mut [f64],
        mass: &M,
        step_size: f64,
    ) -> Result<u64> {
        for (i, x) in position.iter_mut().enumerate() {
            *x += step_size * mass.velocity_at(i, momentum);
        }
        Ok(0)
    }
}

#[derive(Debug)]
pub enum PositionStep {
    Free(FreeFlight),
    Reflective(ReflectiveUpdate),
}

impl PositionUpdate for PositionStep {
    fn update_position<M: MassPreconditioner>(
        &mut self,
        position: &mut [f64],
        momentum: &mut [f64],
        mass: &M,
        step_size: f64,
    ) -> Result<u64> {
        match self {
            PositionStep::Free(update) => {
                update.update_position(position, momentum, mass, step_size)
            }
            PositionStep::Reflective(update) => {
                update.update_position(position, momentum, mass, step_size)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeapfrogResult {
    pub initial_log_density: f64,
    pub final_log_density: f64,
    pub events: u64,
}

/// Fixed-length leapfrog integration with half kicks around each drift.
#[derive(Debug)]
pub struct LeapfrogEngine {
    gradient: Box<[f64]>,
    active: Option<Box<[bool]>>,
}

impl LeapfrogEngine {
    pub fn new(dim: usize) -> Self {
        LeapfrogEngine {
            gradient: vec![0f64; dim].into(),
            active: None,
        }
    }

    pub fn set_active(&mut self, active: Option<&[bool]>) {
        self.active = active.map(|mask| mask.into());
    }

    fn kick(&self, momentum: &mut [f64], epsilon: f64) {
        match &self.active {
            None => axpy(&self.gradient, momentum, epsilon),
            Some(mask) => momentum
                .iter_mut()
                .zip(self.gradient.iter())
                .zip(mask.iter())
                .filter(|(_, &active)| active)
                .for_each(|((p, g), _)| *p += epsilon * g),
        }
    }

    fn evaluate<P: Potential + ?Sized>(
        &mut self,
        potential: &mut P,
        position: &[f64],
    ) -> Result<f64> {
        let logp = potential.log_density(position, &mut self.gradient)?;
        if !logp.is_finite() {
            return Err(SamplerError::instability(format!(
                "log density is {}",
                logp
            )));
        }
        if !all_finite(&self.gradient) {
            return Err(SamplerError::instability("non-finite gradient"));
        }
        Ok(logp)
    }

    /// Integrate `n_steps` leapfrog steps of size `step_size` in place.
    #[allow(clippy::too_many_arguments)]
    pub fn integrate<P, M, U>(
        &mut self,
        potential: &mut P,
        mass: &M,
        update: &mut U,
        position: &mut [f64],
        momentum: &mut [f64],
        step_size: f64,
        n_steps: u64,
    ) -> Result<LeapfrogResult>
    where
        P: Potential + ?Sized,
        M: MassPreconditioner,
        U: PositionUpdate,
    {
        let initial_log_density = self.evaluate(potential, position)?;
        let mut logp = initial_log_density;
        let mut events = 0;

        for _ in 0..n_steps {
            self.kick(momentum, 0.5 * step_size);
            events += update.update_position(position, momentum, mass, step_size)?;
            logp = self.evaluate(potential, position)?;
            self.kick(momentum, 0.5 * step_size);
        }

        Ok(LeapfrogResult {
            initial_log_density,
            final_log_density: logp,
            events,
        })
    }
}
