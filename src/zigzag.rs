use rand::Rng;
use rand_distr::Exp1;

use crate::bounds::{FixedBounds, ParameterBounds};
use crate::cpu_potential::{CpuLogpFunc, CpuPrecisionFunc};
use crate::mass_matrix::MassPreconditioner;
use crate::operator::{
    check_dim, handle_failure, InstabilityHandler, Operator, Result, SamplerError, StepOutcome,
};
use crate::trajectory::{IntegratorOptions, ZigZagTrajectory};
use crate::transform::Transform;

/// How long the particle travels in one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TravelTime {
    Fixed(f64),
    /// Uniform in `time * (1 ± fraction)`.
    Jittered { time: f64, fraction: f64 },
    Exponential { mean: f64 },
}

impl Default for TravelTime {
    fn default() -> Self {
        TravelTime::Fixed(1.)
    }
}

impl TravelTime {
    fn validate(&self) -> Result<()> {
        let valid = match *self {
            TravelTime::Fixed(time) => time.is_finite() && time > 0.,
            TravelTime::Jittered { time, fraction } => {
                time.is_finite() && time > 0. && (0. ..1.).contains(&fraction)
            }
            TravelTime::Exponential { mean } => mean.is_finite() && mean > 0.,
        };
        if !valid {
            return Err(SamplerError::InvalidSettings(format!(
                "Invalid travel time {:?}",
                self
            )));
        }
        Ok(())
    }

    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            TravelTime::Fixed(time) => time,
            TravelTime::Jittered { time, fraction } => {
                let u: f64 = rng.random();
                time * (1. + fraction * (2. * u - 1.))
            }
            TravelTime::Exponential { mean } => {
                let e: f64 = rng.sample(Exp1);
                mean * e
            }
        }
    }
}

/// Settings for the zig-zag operator
#[derive(Debug, Clone, Copy, Default)]
pub struct ZigZagSettings {
    pub travel_time: TravelTime,
    pub integrator: IntegratorOptions,
    pub instability: InstabilityHandler,
}

/// The zig-zag process for Gaussian targets.
///
/// Event times are computed exactly from the precision matrix, and every
/// step is accepted.
#[derive(Debug)]
pub struct IrreversibleZigZag<F, P, M>
where
    F: CpuLogpFunc,
    P: CpuPrecisionFunc,
    M: MassPreconditioner,
{
    logp: F,
    precision: P,
    mass: M,
    settings: ZigZagSettings,
    bounds: Option<FixedBounds>,
    active: Option<Box<[bool]>>,
    trajectory: ZigZagTrajectory,
    velocity: Box<[f64]>,
    gradient: Box<[f64]>,
    step_count: u64,
}

impl<F, P, M> IrreversibleZigZag<F, P, M>
where
    F: CpuLogpFunc,
    P: CpuPrecisionFunc,
    M: MassPreconditioner,
{
    pub fn new(logp: F, precision: P, mass: M, settings: ZigZagSettings) -> Result<Self> {
        settings.travel_time.validate()?;
        if settings.integrator.max_events == 0 {
            return Err(SamplerError::InvalidSettings(
                "maximum number of events must be positive".to_string(),
            ));
        }
        let dim = logp.dim();
        check_dim(dim, precision.dim())?;
        check_dim(dim, mass.dim())?;
        Ok(IrreversibleZigZag {
            logp,
            precision,
            mass,
            settings,
            bounds: None,
            active: None,
            trajectory: ZigZagTrajectory::new(dim, None, settings.integrator),
            velocity: vec![0f64; dim].into(),
            gradient: vec![0f64; dim].into(),
            step_count: 0,
        })
    }

    /// Bounce off fixed per-coordinate bounds.
    pub fn with_bounds(mut self, bounds: FixedBounds) -> Result<Self> {
        check_dim(self.dim(), bounds.dim())?;
        self.bounds = Some(bounds);
        Ok(self)
    }

    /// Zig-zag dynamics need the exact precision of the target, which a
    /// transform would change, so this always fails.
    pub fn with_transform(self, _transform: Box<dyn Transform>) -> Result<Self> {
        Err(SamplerError::InvalidOperatorState(
            "the zig-zag operator does not support coordinate transforms",
        ))
    }

    /// Only move the coordinates where `mask` is true.
    pub fn with_mask(mut self, mask: &[bool]) -> Result<Self> {
        check_dim(self.dim(), mask.len())?;
        self.active = Some(mask.into());
        self.trajectory = ZigZagTrajectory::new(self.dim(), Some(mask), self.settings.integrator);
        Ok(self)
    }

    pub fn settings(&self) -> &ZigZagSettings {
        &self.settings
    }

    fn draw_velocity<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mass = self.mass.mass();
        for (i, v) in self.velocity.iter_mut().enumerate() {
            let active = self.active.as_ref().map(|mask| mask[i]).unwrap_or(true);
            *v = if active {
                let speed = mass[i].sqrt().recip();
                if rng.random::<bool>() {
                    speed
                } else {
                    -speed
                }
            } else {
                0.
            };
        }
    }

    fn simulate<R: Rng + ?Sized>(&mut self, rng: &mut R, position: &[f64]) -> Result<()> {
        self.trajectory.reset_events();
        self.logp
            .logp(position, &mut self.gradient)
            .map_err(SamplerError::from_logp)?;
        self.draw_velocity(rng);
        let time = self.settings.travel_time.draw(rng);

        self.trajectory
            .start(&mut self.precision, position, &self.velocity, &self.gradient)?;
        let bounds = self.bounds.as_ref().map(|b| b as &dyn ParameterBounds);
        self.trajectory
            .integrate(rng, &mut self.precision, bounds, time)?;
        Ok(())
    }
}

impl<F, P, M> Operator for IrreversibleZigZag<F, P, M>
where
    F: CpuLogpFunc,
    P: CpuPrecisionFunc,
    M: MassPreconditioner,
{
    fn propose_step<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        position: &mut [f64],
    ) -> Result<StepOutcome> {
        check_dim(self.dim(), position.len())?;
        if let Some(bounds) = &self.bounds {
            bounds.check_contains(position)?;
        }
        self.step_count += 1;

        match self.simulate(rng, position) {
            Ok(()) => {
                position.copy_from_slice(self.trajectory.position());
                Ok(StepOutcome {
                    accepted: true,
                    log_acceptance: 0.,
                    events: self.trajectory.events(),
                    diverging: false,
                })
            }
            Err(err) => handle_failure(
                &self.operator_name(),
                self.settings.instability,
                err,
                self.trajectory.events(),
            ),
        }
    }

    fn operator_name(&self) -> String {
        "Irreversible zig-zag operator".to_string()
    }

    fn step_count(&self) -> u64 {
        self.step_count
    }

    fn dim(&self) -> usize {
        self.logp.dim()
    }
}
