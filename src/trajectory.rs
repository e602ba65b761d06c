//! Event-driven trajectory simulation.
//!
//! [`ZigZagTrajectory`] follows a zig-zag particle through a Gaussian
//! potential, switching velocities at exactly simulated event times.
//! [`ReflectiveUpdate`] replaces the drift step of a leapfrog integrator with
//! straight-line motion that bounces off hard constraints.

use rand::Rng;

use crate::bounds::{Bounds, ParameterBounds};
use crate::cpu_potential::CpuPrecisionFunc;
use crate::events::{
    first_collision, first_curved_reflection, first_fixed_bound_reflection, next_fixed_bound_event,
    next_gradient_event, EventType, MinimumTravelInformation,
};
use crate::leapfrog::PositionUpdate;
use crate::mass_matrix::MassPreconditioner;
use crate::math::{all_finite, axpy, multiply, update_dynamics};
use crate::operator::{Result, SamplerError};
use crate::reflection::{ReflectionEvent, ReflectionKind};

/// Settings shared by the event-driven integrators.
#[derive(Debug, Clone, Copy)]
pub struct IntegratorOptions {
    /// Fail the trajectory with [`SamplerError::TooManyEvents`] after this
    /// many events.
    pub max_events: u64,
    /// Log every event at debug level.
    pub debug_events: bool,
}

impl Default for IntegratorOptions {
    fn default() -> Self {
        IntegratorOptions {
            max_events: 100_000,
            debug_events: false,
        }
    }
}

/// Progress of a trajectory between two events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BounceState {
    pub remaining_time: f64,
    pub last_event: EventType,
    pub last_index: Option<usize>,
}

impl BounceState {
    pub fn new(total_time: f64) -> Self {
        BounceState {
            remaining_time: total_time,
            last_event: EventType::None,
            last_index: None,
        }
    }

    /// The terminal state.
    pub fn done() -> Self {
        BounceState {
            remaining_time: 0.,
            last_event: EventType::None,
            last_index: None,
        }
    }

    pub fn is_time_remaining(&self) -> bool {
        self.remaining_time > 0.
    }
}

#[inline]
fn is_active(active: Option<&[bool]>, index: usize) -> bool {
    active.map(|mask| mask[index]).unwrap_or(true)
}

/// The state of a zig-zag particle.
///
/// The gradient and action buffers are stored multiplied by the velocity.
/// Between events they are updated incrementally, so that an event costs
/// `O(dim)` plus one column of the precision matrix.
#[derive(Debug)]
pub struct ZigZagTrajectory {
    position: Box<[f64]>,
    velocity: Box<[f64]>,
    signed_gradient: Box<[f64]>,
    signed_action: Box<[f64]>,
    column: Box<[f64]>,
    active: Option<Box<[bool]>>,
    options: IntegratorOptions,
    events: u64,
}

impl ZigZagTrajectory {
    pub fn new(dim: usize, active: Option<&[bool]>, options: IntegratorOptions) -> Self {
        if let Some(mask) = active {
            assert!(mask.len() == dim);
        }
        ZigZagTrajectory {
            position: vec![0f64; dim].into(),
            velocity: vec![0f64; dim].into(),
            signed_gradient: vec![0f64; dim].into(),
            signed_action: vec![0f64; dim].into(),
            column: vec![0f64; dim].into(),
            active: active.map(|mask| mask.into()),
            options,
            events: 0,
        }
    }

    pub fn dim(&self) -> usize {
        self.position.len()
    }

    pub fn position(&self) -> &[f64] {
        &self.position
    }

    pub fn velocity(&self) -> &[f64] {
        &self.velocity
    }

    /// Gradient of the log density, multiplied by the velocity.
    pub fn signed_gradient(&self) -> &[f64] {
        &self.signed_gradient
    }

    pub fn signed_action(&self) -> &[f64] {
        &self.signed_action
    }

    /// Number of events since the last call to [`ZigZagTrajectory::start`].
    pub fn events(&self) -> u64 {
        self.events
    }

    pub(crate) fn reset_events(&mut self) {
        self.events = 0;
    }

    /// Place the particle at `position` with the given velocity and the
    /// gradient of the log density at that position.
    pub fn start<P: CpuPrecisionFunc + ?Sized>(
        &mut self,
        precision: &mut P,
        position: &[f64],
        velocity: &[f64],
        gradient: &[f64],
    ) -> Result<()> {
        let dim = self.dim();
        for found in [position.len(), velocity.len(), gradient.len(), precision.dim()] {
            if found != dim {
                return Err(SamplerError::DimensionMismatch {
                    expected: dim,
                    found,
                });
            }
        }
        if !all_finite(gradient) {
            return Err(SamplerError::instability("non-finite gradient at trajectory start"));
        }
        for (i, &v) in velocity.iter().enumerate() {
            if is_active(self.active.as_deref(), i) && (v == 0. || !v.is_finite()) {
                return Err(SamplerError::instability(format!(
                    "velocity {} on active coordinate {}",
                    v, i
                )));
            }
        }

        self.position.copy_from_slice(position);
        self.velocity.copy_from_slice(velocity);
        precision.product(&self.velocity, &mut self.signed_action);
        if !all_finite(&self.signed_action) {
            return Err(SamplerError::instability("non-finite precision product"));
        }
        self.signed_action
            .iter_mut()
            .zip(self.velocity.iter())
            .for_each(|(a, v)| *a *= v);
        multiply(gradient, &self.velocity, &mut self.signed_gradient);
        self.events = 0;
        Ok(())
    }

    /// The earliest gradient or boundary event from the current state.
    pub fn next_event<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        bounds: Option<&dyn ParameterBounds>,
    ) -> MinimumTravelInformation {
        let active = self.active.as_deref();
        let boundary = match bounds {
            Some(bounds) => next_fixed_bound_event(&self.position, &self.velocity, bounds, active),
            None => MinimumTravelInformation::none(),
        };
        let gradient = next_gradient_event(rng, &self.signed_gradient, &self.signed_action, active);
        boundary.earliest(gradient)
    }

    /// Advance to `first_bounce` if it happens within the remaining time,
    /// otherwise move to the end of the trajectory.
    pub fn do_bounce<P: CpuPrecisionFunc + ?Sized>(
        &mut self,
        precision: &mut P,
        state: BounceState,
        first_bounce: MinimumTravelInformation,
        bounds: Option<&dyn ParameterBounds>,
    ) -> Result<BounceState> {
        if !state.is_time_remaining() {
            return Ok(BounceState::done());
        }

        let remaining_time = state.remaining_time;
        let event_time = first_bounce.time;

        let index = match first_bounce.index {
            Some(index) if event_time < remaining_time => index,
            _ => {
                axpy(&self.velocity, &mut self.position, remaining_time);
                return Ok(BounceState::done());
            }
        };

        self.events += 1;
        if self.events > self.options.max_events {
            return Err(SamplerError::TooManyEvents {
                limit: self.options.max_events,
            });
        }

        let moving_up = self.velocity[index] > 0.;

        precision.column(index, &mut self.column);
        self.column
            .iter_mut()
            .zip(self.velocity.iter())
            .for_each(|(c, v)| *c *= v);

        update_dynamics(
            &mut self.position,
            &self.velocity,
            &mut self.signed_action,
            &mut self.signed_gradient,
            &self.column,
            event_time,
            index,
        );
        self.velocity[index] = -self.velocity[index];

        if first_bounce.kind == EventType::Boundary {
            if let Some(bounds) = bounds {
                self.position[index] = if moving_up {
                    bounds.fixed_upper_bound(index)
                } else {
                    bounds.fixed_lower_bound(index)
                };
            }
        }

        if !(self.signed_gradient[index].is_finite() && self.signed_action[index].is_finite()) {
            return Err(SamplerError::instability(format!(
                "non-finite gradient after event at coordinate {}",
                index
            )));
        }

        if self.options.debug_events {
            log::debug!(
                "{:?} event at coordinate {} after time {:e}, {:e} remaining",
                first_bounce.kind,
                index,
                event_time,
                remaining_time - event_time
            );
        }

        Ok(BounceState {
            remaining_time: remaining_time - event_time,
            last_event: first_bounce.kind,
            last_index: Some(index),
        })
    }

    /// Run the particle for `total_time`.
    pub fn integrate<R: Rng + ?Sized, P: CpuPrecisionFunc + ?Sized>(
        &mut self,
        rng: &mut R,
        precision: &mut P,
        bounds: Option<&dyn ParameterBounds>,
        total_time: f64,
    ) -> Result<BounceState> {
        let mut state = BounceState::new(total_time);
        while state.is_time_remaining() {
            let first_bounce = self.next_event(rng, bounds);
            state = self.do_bounce(precision, state, first_bounce, bounds)?;
        }
        Ok(state)
    }
}

/// Straight-line drift that bounces off the configured constraints.
#[derive(Debug)]
pub struct ReflectiveUpdate {
    bounds: Bounds,
    velocity: Box<[f64]>,
    active: Option<Box<[bool]>>,
    options: IntegratorOptions,
}

impl ReflectiveUpdate {
    pub fn new(bounds: Bounds, active: Option<&[bool]>, options: IntegratorOptions) -> Self {
        let dim = bounds.dim();
        ReflectiveUpdate {
            bounds,
            velocity: vec![0f64; dim].into(),
            active: active.map(|mask| mask.into()),
            options,
        }
    }

    pub fn set_active(&mut self, active: Option<&[bool]>) {
        self.active = active.map(|mask| mask.into());
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// The first event within `interval` from the current position.
    pub fn next_event<M: MassPreconditioner>(
        &mut self,
        position: &[f64],
        momentum: &[f64],
        mass: &M,
        interval: f64,
    ) -> ReflectionEvent {
        mass.velocity(momentum, &mut self.velocity);
        match &self.bounds {
            Bounds::Fixed(bounds) => {
                first_fixed_bound_reflection(position, &self.velocity, bounds, interval)
            }
            Bounds::Graph(bounds) => {
                let reflection =
                    first_fixed_bound_reflection(position, &self.velocity, bounds, interval);
                let collision = first_collision(
                    position,
                    &self.velocity,
                    bounds,
                    self.active.as_deref(),
                    interval,
                );
                if collision.time < reflection.time {
                    collision
                } else {
                    reflection
                }
            }
            Bounds::Curved(space) => {
                first_curved_reflection(position, &self.velocity, space.as_ref(), interval)
            }
        }
    }
}

impl PositionUpdate for ReflectiveUpdate {
    fn update_position<M: MassPreconditioner>(
        &mut self,
        position: &mut [f64],
        momentum: &mut [f64],
        mass: &M,
        step_size: f64,
    ) -> Result<u64> {
        let mut collapsed_time = 0f64;
        let mut events = 0u64;
        while collapsed_time < step_size {
            let event = self.next_event(position, momentum, mass, step_size - collapsed_time);
            event.apply(position, momentum, mass, self.active.as_deref());

            if event.is_none() {
                break;
            }

            if self.options.debug_events {
                match &event.kind {
                    ReflectionKind::Reflection { index, location } => log::debug!(
                        "Reflection of coordinate {} at {} after {:e}",
                        index,
                        location,
                        event.time
                    ),
                    ReflectionKind::Collision { first, second, .. } => log::debug!(
                        "Collision of coordinates {} and {} after {:e}",
                        first,
                        second,
                        event.time
                    ),
                    _ => log::debug!("Boundary reflection after {:e}", event.time),
                }
            }

            events += 1;
            if events > self.options.max_events {
                return Err(SamplerError::TooManyEvents {
                    limit: self.options.max_events,
                });
            }
            collapsed_time += event.time;
        }
        Ok(events)
    }
}
