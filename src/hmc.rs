use rand::Rng;

use crate::bounds::Bounds;
use crate::cpu_potential::CpuLogpFunc;
use crate::leapfrog::{FreeFlight, LeapfrogEngine, Potential, PositionStep};
use crate::mass_matrix::MassPreconditioner;
use crate::operator::{
    check_dim, handle_failure, InstabilityHandler, Operator, Result, SamplerError, StepOutcome,
};
use crate::trajectory::{IntegratorOptions, ReflectiveUpdate};
use crate::transform::{Transform, TransformedTarget};

/// Settings for (reflective) Hamiltonian Monte Carlo
#[derive(Debug, Clone, Copy)]
pub struct HmcSettings {
    pub step_size: f64,
    /// Number of leapfrog steps per proposal.
    pub n_steps: u64,
    pub integrator: IntegratorOptions,
    pub instability: InstabilityHandler,
}

impl Default for HmcSettings {
    fn default() -> Self {
        HmcSettings {
            step_size: 0.1,
            n_steps: 10,
            integrator: IntegratorOptions::default(),
            instability: InstabilityHandler::default(),
        }
    }
}

impl HmcSettings {
    fn validate(&self) -> Result<()> {
        if !(self.step_size.is_finite() && self.step_size > 0.) {
            return Err(SamplerError::InvalidSettings(format!(
                "step size must be positive, got {}",
                self.step_size
            )));
        }
        if self.n_steps == 0 {
            return Err(SamplerError::InvalidSettings(
                "number of leapfrog steps must be positive".to_string(),
            ));
        }
        if self.integrator.max_events == 0 {
            return Err(SamplerError::InvalidSettings(
                "maximum number of events must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Energies of one deterministic leapfrog trajectory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryResult {
    pub initial_energy: f64,
    pub final_energy: f64,
    /// `initial_energy - final_energy`
    pub log_acceptance: f64,
    pub events: u64,
}

struct HmcPotential<'a, F: CpuLogpFunc> {
    logp: &'a mut F,
    transform: Option<&'a mut TransformedTarget>,
}

impl<F: CpuLogpFunc> Potential for HmcPotential<'_, F> {
    fn dim(&self) -> usize {
        self.logp.dim()
    }

    fn log_density(&mut self, position: &[f64], gradient: &mut [f64]) -> Result<f64> {
        match self.transform.as_mut() {
            Some(target) => target.log_density(self.logp, position, gradient),
            None => self
                .logp
                .logp(position, gradient)
                .map_err(SamplerError::from_logp),
        }
    }
}

/// Hamiltonian Monte Carlo with a fixed number of leapfrog steps.
///
/// With bounds the drift of every leapfrog step bounces off the
/// constraints, which keeps the trajectory inside the bounded region.
#[derive(Debug)]
pub struct HamiltonianMonteCarlo<F: CpuLogpFunc, M: MassPreconditioner> {
    logp: F,
    mass: M,
    settings: HmcSettings,
    engine: LeapfrogEngine,
    update: PositionStep,
    transform: Option<TransformedTarget>,
    active: Option<Box<[bool]>>,
    momentum: Box<[f64]>,
    proposal: Box<[f64]>,
    step_count: u64,
}

impl<F: CpuLogpFunc, M: MassPreconditioner> HamiltonianMonteCarlo<F, M> {
    pub fn new(logp: F, mass: M, settings: HmcSettings) -> Result<Self> {
        settings.validate()?;
        let dim = logp.dim();
        check_dim(dim, mass.dim())?;
        Ok(HamiltonianMonteCarlo {
            logp,
            mass,
            settings,
            engine: LeapfrogEngine::new(dim),
            update: PositionStep::Free(FreeFlight),
            transform: None,
            active: None,
            momentum: vec![0f64; dim].into(),
            proposal: vec![0f64; dim].into(),
            step_count: 0,
        })
    }

    /// Reflect the trajectory off `bounds`.
    pub fn with_bounds(mut self, bounds: Bounds) -> Result<Self> {
        check_dim(self.dim(), bounds.dim())?;
        if self.transform.is_some() {
            return Err(SamplerError::InvalidOperatorState(
                "bounds and a coordinate transform cannot be combined",
            ));
        }
        self.update = PositionStep::Reflective(ReflectiveUpdate::new(
            bounds,
            self.active.as_deref(),
            self.settings.integrator,
        ));
        Ok(self)
    }

    /// Sample in the unconstrained coordinates of `transform`.
    pub fn with_transform(mut self, transform: Box<dyn Transform>) -> Result<Self> {
        if matches!(self.update, PositionStep::Reflective(_)) {
            return Err(SamplerError::InvalidOperatorState(
                "bounds and a coordinate transform cannot be combined",
            ));
        }
        self.transform = Some(TransformedTarget::new(transform, self.dim()));
        Ok(self)
    }

    /// Only update the coordinates where `mask` is true.
    pub fn with_mask(mut self, mask: &[bool]) -> Result<Self> {
        check_dim(self.dim(), mask.len())?;
        self.active = Some(mask.into());
        self.engine.set_active(Some(mask));
        if let PositionStep::Reflective(update) = &mut self.update {
            update.set_active(Some(mask));
        }
        Ok(self)
    }

    pub fn settings(&self) -> &HmcSettings {
        &self.settings
    }

    pub fn mass(&self) -> &M {
        &self.mass
    }

    /// Run the leapfrog integrator from `position` with `momentum`, both in
    /// the coordinates the sampler moves in, and update them in place.
    pub fn run_trajectory(
        &mut self,
        position: &mut [f64],
        momentum: &mut [f64],
    ) -> Result<TrajectoryResult> {
        check_dim(self.dim(), position.len())?;
        check_dim(self.dim(), momentum.len())?;

        let initial_kinetic = self.mass.kinetic_energy(momentum);
        let mut potential = HmcPotential {
            logp: &mut self.logp,
            transform: self.transform.as_mut(),
        };
        let result = self.engine.integrate(
            &mut potential,
            &self.mass,
            &mut self.update,
            position,
            momentum,
            self.settings.step_size,
            self.settings.n_steps,
        )?;

        let initial_energy = -result.initial_log_density + initial_kinetic;
        let final_energy = -result.final_log_density + self.mass.kinetic_energy(momentum);
        if !final_energy.is_finite() {
            return Err(SamplerError::instability(format!(
                "final energy is {}",
                final_energy
            )));
        }
        Ok(TrajectoryResult {
            initial_energy,
            final_energy,
            log_acceptance: initial_energy - final_energy,
            events: result.events,
        })
    }

    fn draw_momentum<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.mass.randomize_momentum(rng, &mut self.momentum);
        if let Some(mask) = &self.active {
            self.momentum
                .iter_mut()
                .zip(mask.iter())
                .filter(|(_, &active)| !active)
                .for_each(|(p, _)| *p = 0.);
        }
    }

    fn check_start(&self, position: &[f64]) -> Result<()> {
        if let PositionStep::Reflective(update) = &self.update {
            update.bounds().check_contains(position)?;
        }
        Ok(())
    }
}

impl<F: CpuLogpFunc, M: MassPreconditioner> Operator for HamiltonianMonteCarlo<F, M> {
    fn propose_step<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        position: &mut [f64],
    ) -> Result<StepOutcome> {
        check_dim(self.dim(), position.len())?;
        self.check_start(position)?;
        self.step_count += 1;

        match &self.transform {
            Some(target) => target.to_unconstrained(position, &mut self.proposal)?,
            None => self.proposal.copy_from_slice(position),
        }
        let mut proposal = std::mem::take(&mut self.proposal);

        self.draw_momentum(rng);
        let mut momentum = std::mem::take(&mut self.momentum);
        let result = self.run_trajectory(&mut proposal, &mut momentum);
        self.momentum = momentum;

        let result = match result {
            Ok(result) => result,
            Err(err) => {
                self.proposal = proposal;
                return handle_failure(&self.operator_name(), self.settings.instability, err, 0);
            }
        };

        let u: f64 = rng.random();
        let accepted = u.ln() < result.log_acceptance;
        if accepted {
            match &self.transform {
                Some(target) => target.to_constrained(&proposal, position),
                None => position.copy_from_slice(&proposal),
            }
        }
        self.proposal = proposal;

        Ok(StepOutcome {
            accepted,
            log_acceptance: result.log_acceptance,
            events: result.events,
            diverging: false,
        })
    }

    fn operator_name(&self) -> String {
        match (&self.update, &self.transform) {
            (PositionStep::Reflective(update), _) => {
                let kind = match update.bounds() {
                    Bounds::Fixed(_) => "fixed bounds",
                    Bounds::Graph(_) => "graph bounds",
                    Bounds::Curved(_) => "curved bounds",
                };
                format!("Reflective HMC operator ({})", kind)
            }
            (_, Some(target)) => format!("HMC operator ({} transform)", target.transform().name()),
            _ => "HMC operator".to_string(),
        }
    }

    fn step_count(&self) -> u64 {
        self.step_count
    }

    fn dim(&self) -> usize {
        self.logp.dim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::{Ball, FixedBounds, GraphBounds};
    use crate::cpu_potential::test_logps::NormalLogp;
    use crate::mass_matrix::DiagMassMatrix;
    use crate::transform::LogTransform;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn hmc(dim: usize) -> HamiltonianMonteCarlo<NormalLogp, DiagMassMatrix> {
        HamiltonianMonteCarlo::new(
            NormalLogp::new(dim, 0.),
            DiagMassMatrix::identity(dim),
            HmcSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn trajectory_from_rest_accepts() {
        let mut op = hmc(2);
        let mut position = [1., 1.];
        let mut momentum = [0., 0.];
        let result = op.run_trajectory(&mut position, &mut momentum).unwrap();

        let max_velocity = momentum.iter().map(|p| p.abs()).fold(0., f64::max);
        let distance = ((position[0] - 1.).powi(2) + (position[1] - 1.).powi(2)).sqrt();
        assert!(distance > 0.);
        assert!(distance < 10. * 0.1 * max_velocity);
        assert!(result.log_acceptance >= 0.);
        let outcome = StepOutcome {
            accepted: true,
            log_acceptance: result.log_acceptance,
            events: result.events,
            diverging: false,
        };
        assert_eq!(outcome.acceptance_probability(), 1.);
        assert_relative_eq!(position[0], 1f64.cos(), epsilon = 1e-2);
    }

    #[test]
    fn settings_are_validated() {
        let settings = HmcSettings {
            step_size: -1.,
            ..Default::default()
        };
        let op = HamiltonianMonteCarlo::new(NormalLogp::new(2, 0.), DiagMassMatrix::identity(2), settings);
        assert!(matches!(op, Err(SamplerError::InvalidSettings(_))));

        let op = HamiltonianMonteCarlo::new(
            NormalLogp::new(2, 0.),
            DiagMassMatrix::identity(3),
            HmcSettings::default(),
        );
        assert!(matches!(op, Err(SamplerError::DimensionMismatch { .. })));
    }

    #[test]
    fn transform_and_bounds_conflict() {
        let err = hmc(2)
            .with_bounds(Bounds::Fixed(FixedBounds::positive(2)))
            .unwrap()
            .with_transform(Box::new(LogTransform));
        assert!(matches!(err, Err(SamplerError::InvalidOperatorState(_))));

        let err = hmc(2)
            .with_transform(Box::new(LogTransform))
            .unwrap()
            .with_bounds(Bounds::Fixed(FixedBounds::positive(2)));
        assert!(matches!(err, Err(SamplerError::InvalidOperatorState(_))));
    }

    #[test]
    fn names() {
        assert_eq!(hmc(2).operator_name(), "HMC operator");
        let op = hmc(2)
            .with_bounds(Bounds::Graph(GraphBounds::ordered(FixedBounds::unbounded(2)).unwrap()))
            .unwrap();
        assert_eq!(op.operator_name(), "Reflective HMC operator (graph bounds)");
        let op = hmc(2).with_transform(Box::new(LogTransform)).unwrap();
        assert_eq!(op.operator_name(), "HMC operator (log transform)");
    }

    #[test]
    fn rejection_restores_position() {
        // A huge step size makes the trajectory diverge.
        let settings = HmcSettings {
            step_size: 50.,
            n_steps: 20,
            ..Default::default()
        };
        let mut op = HamiltonianMonteCarlo::new(
            NormalLogp::new(3, 0.),
            DiagMassMatrix::identity(3),
            settings,
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut rejected = 0;
        for _ in 0..20 {
            let mut position = [0.1, -0.3, 0.2];
            let outcome = op.propose_step(&mut rng, &mut position).unwrap();
            if !outcome.accepted {
                rejected += 1;
                assert_eq!(position, [0.1, -0.3, 0.2]);
            }
        }
        assert!(rejected > 0);
        assert_eq!(op.step_count(), 20);
    }

    #[test]
    fn reflective_steps_stay_inside() {
        let settings = HmcSettings {
            step_size: 0.3,
            ..Default::default()
        };
        let bounds = FixedBounds::new(&[0., -0.5], &[0.5, 0.5]).unwrap();
        let mut op = HamiltonianMonteCarlo::new(
            NormalLogp::new(2, 0.),
            DiagMassMatrix::identity(2),
            settings,
        )
        .unwrap()
        .with_bounds(Bounds::Fixed(bounds))
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut position = [0.25, 0.];
        let mut events = 0;
        for _ in 0..200 {
            let outcome = op.propose_step(&mut rng, &mut position).unwrap();
            events += outcome.events;
            assert!((0. ..=0.5).contains(&position[0]));
            assert!((-0.5..=0.5).contains(&position[1]));
        }
        assert!(events > 0);
    }

    #[test]
    fn curved_bounds_stay_inside() {
        let ball = Ball::new(&[0., 0.], 0.5).unwrap();
        let mut op = hmc(2).with_bounds(Bounds::Curved(Box::new(ball))).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut position = [0., 0.];
        for _ in 0..100 {
            op.propose_step(&mut rng, &mut position).unwrap();
            let r2 = position[0] * position[0] + position[1] * position[1];
            assert!(r2 <= 0.25 + 1e-9);
        }
    }

    #[test]
    fn start_outside_bounds_fails() {
        let mut op = hmc(2)
            .with_bounds(Bounds::Fixed(FixedBounds::positive(2)))
            .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut position = [1., -1.];
        let err = op.propose_step(&mut rng, &mut position);
        assert!(matches!(err, Err(SamplerError::OutOfBounds { index: 1, .. })));
        assert_eq!(op.step_count(), 0);
    }

    #[test]
    fn masked_coordinates_are_fixed() {
        let mut op = hmc(3).with_mask(&[true, false, true]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut position = [0.5, 2., -0.5];
        for _ in 0..50 {
            op.propose_step(&mut rng, &mut position).unwrap();
            assert_eq!(position[1], 2.);
        }
    }

    #[test]
    fn masked_neighbour_in_ordering_stays_put() {
        let bounds = GraphBounds::ordered(FixedBounds::unbounded(2)).unwrap();
        let mut op = HamiltonianMonteCarlo::new(
            NormalLogp::new(2, 3.),
            DiagMassMatrix::identity(2),
            HmcSettings::default(),
        )
        .unwrap()
        .with_bounds(Bounds::Graph(bounds))
        .unwrap()
        .with_mask(&[true, false])
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut position = [0.9, 1.];
        let mut events = 0;
        for _ in 0..200 {
            events += op.propose_step(&mut rng, &mut position).unwrap().events;
            assert_eq!(position[1], 1.);
            assert!(position[0] <= 1., "{:?}", position);
        }
        assert!(events > 0);
    }

    #[test]
    fn log_transform_keeps_positive() {
        let mut op = HamiltonianMonteCarlo::new(
            NormalLogp::new(2, 1.),
            DiagMassMatrix::identity(2),
            HmcSettings::default(),
        )
        .unwrap()
        .with_transform(Box::new(LogTransform))
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut position = [1., 0.5];
        let mut accepted = 0;
        for _ in 0..100 {
            if op.propose_step(&mut rng, &mut position).unwrap().accepted {
                accepted += 1;
            }
            assert!(position.iter().all(|&x| x > 0.));
        }
        assert!(accepted > 50);
    }
}
