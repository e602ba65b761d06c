//! Closed-form event times for piecewise-linear trajectories.

use rand::Rng;
use rand_distr::Exp1;

use crate::bounds::{BoundedSpace, ParameterBounds};
use crate::reflection::{ReflectionEvent, ReflectionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    None,
    Gradient,
    Boundary,
    Collision,
}

/// The first event of one kind along the current straight segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinimumTravelInformation {
    /// `f64::INFINITY` if there is no such event.
    pub time: f64,
    pub index: Option<usize>,
    pub kind: EventType,
}

impl MinimumTravelInformation {
    pub fn none() -> Self {
        MinimumTravelInformation {
            time: f64::INFINITY,
            index: None,
            kind: EventType::None,
        }
    }

    pub fn new(time: f64, index: usize, kind: EventType) -> Self {
        MinimumTravelInformation {
            time,
            index: Some(index),
            kind,
        }
    }

    /// The earlier of two events. `self` wins ties.
    pub fn earliest(self, other: Self) -> Self {
        if other.time < self.time {
            other
        } else {
            self
        }
    }
}

#[inline]
fn is_active(active: Option<&[bool]>, index: usize) -> bool {
    active.map(|mask| mask[index]).unwrap_or(true)
}

pub(crate) fn clamp_time(time: f64, what: &str) -> f64 {
    if time < 0. {
        log::warn!("Negative {} event time {:e} clamped to zero", what, time);
        0.
    } else {
        time
    }
}

/// Travel time until the integrated switching rate `max(0, a + b s)`
/// reaches `target`.
///
/// This is the smallest `t >= 0` with `a t + b t^2 / 2 = target` when
/// `a >= 0`. For `a < 0` the rate stays zero until `s = -a / b`. Returns
/// `f64::INFINITY` if the rate never accumulates `target`.
pub fn switch_time(a: f64, b: f64, target: f64) -> f64 {
    if b > 0. {
        if a < 0. {
            -a / b + (2. * target / b).sqrt()
        } else {
            2. * target / (a + (a * a + 2. * b * target).sqrt())
        }
    } else if b == 0. {
        if a > 0. {
            target / a
        } else {
            f64::INFINITY
        }
    } else if a <= 0. {
        f64::INFINITY
    } else {
        // The rate decreases and reaches zero at -a / b, with area a^2 / (-2 b).
        let disc = a * a + 2. * b * target;
        if disc < 0. {
            f64::INFINITY
        } else {
            2. * target / (a + disc.sqrt())
        }
    }
}

/// The first velocity switch of a zig-zag process.
///
/// `signed_gradient` and `signed_action` are the gradient of the log density
/// and the precision-velocity product, each multiplied by the velocity. One
/// exponential variate is drawn per active coordinate in index order.
pub fn next_gradient_event<R: Rng + ?Sized>(
    rng: &mut R,
    signed_gradient: &[f64],
    signed_action: &[f64],
    active: Option<&[bool]>,
) -> MinimumTravelInformation {
    assert!(signed_gradient.len() == signed_action.len());

    let mut first = MinimumTravelInformation::none();
    for (i, (&g, &a)) in signed_gradient.iter().zip(signed_action).enumerate() {
        if !is_active(active, i) {
            continue;
        }
        let target: f64 = rng.sample(Exp1);
        let time = switch_time(-g, a, target);
        if time < first.time {
            first = MinimumTravelInformation::new(time, i, EventType::Gradient);
        }
    }
    first
}

/// The first time a coordinate moving towards one of its fixed bounds
/// reaches it.
pub fn next_fixed_bound_event(
    position: &[f64],
    velocity: &[f64],
    bounds: &dyn ParameterBounds,
    active: Option<&[bool]>,
) -> MinimumTravelInformation {
    assert!(position.len() == velocity.len());

    let mut first = MinimumTravelInformation::none();
    for (i, (&x, &v)) in position.iter().zip(velocity).enumerate() {
        if !is_active(active, i) {
            continue;
        }
        let bound = if v > 0. {
            bounds.fixed_upper_bound(i)
        } else if v < 0. {
            bounds.fixed_lower_bound(i)
        } else {
            continue;
        };
        if !bound.is_finite() {
            continue;
        }
        let time = clamp_time((bound - x) / v, "boundary");
        if time < first.time {
            first = MinimumTravelInformation::new(time, i, EventType::Boundary);
        }
    }
    first
}

fn is_reflected(position: f64, intended: f64, bound: f64) -> bool {
    if position > bound {
        intended <= bound
    } else if position < bound {
        intended >= bound
    } else {
        false
    }
}

fn is_collision(position1: f64, intended1: f64, position2: f64, intended2: f64) -> bool {
    if position1 > position2 {
        intended1 <= intended2
    } else if position1 < position2 {
        intended1 >= intended2
    } else {
        false
    }
}

/// The first fixed bound hit within `interval`, or a `None` event covering
/// the whole interval.
pub fn first_fixed_bound_reflection(
    position: &[f64],
    velocity: &[f64],
    bounds: &dyn ParameterBounds,
    interval: f64,
) -> ReflectionEvent {
    let mut first = ReflectionEvent::none(interval);
    for (i, (&x, &v)) in position.iter().zip(velocity).enumerate() {
        if v == 0. {
            continue;
        }
        let intended = x + interval * v;
        let upper = bounds.fixed_upper_bound(i);
        let lower = bounds.fixed_lower_bound(i);
        let location = if is_reflected(x, intended, upper) {
            upper
        } else if is_reflected(x, intended, lower) {
            lower
        } else {
            continue;
        };
        let time = clamp_time((location - x) / v, "reflection");
        if time < first.time {
            first = ReflectionEvent {
                time,
                kind: ReflectionKind::Reflection { index: i, location },
            };
        }
    }
    first
}

/// The first meeting of two connected coordinates within `interval`.
///
/// A masked partner stays where it is and acts as a wall for the active
/// coordinate, which is reported as a plain reflection at the wall. Every
/// edge is checked once, which costs `O(dim * max_degree)` per call.
pub fn first_collision(
    position: &[f64],
    velocity: &[f64],
    bounds: &dyn ParameterBounds,
    active: Option<&[bool]>,
    interval: f64,
) -> ReflectionEvent {
    let mut first = ReflectionEvent::none(interval);
    for i in 0..position.len() {
        let v1 = velocity[i];
        let intended1 = position[i] + interval * v1;
        for &j in bounds.connected_indices(i) {
            if j <= i {
                continue;
            }
            let v2 = velocity[j];
            let intended2 = position[j] + interval * v2;
            let event = match (is_active(active, i), is_active(active, j)) {
                (true, true) => {
                    if !is_collision(position[i], intended1, position[j], intended2) {
                        continue;
                    }
                    let time = clamp_time((position[j] - position[i]) / (v1 - v2), "collision");
                    ReflectionEvent {
                        time,
                        kind: ReflectionKind::Collision {
                            first: i,
                            second: j,
                            location: position[i] + time * v1,
                        },
                    }
                }
                (true, false) => match wall_reflection(position, velocity, interval, i, j) {
                    Some(event) => event,
                    None => continue,
                },
                (false, true) => match wall_reflection(position, velocity, interval, j, i) {
                    Some(event) => event,
                    None => continue,
                },
                (false, false) => continue,
            };
            if event.time < first.time {
                first = event;
            }
        }
    }
    first
}

/// Coordinate `moving` running into the fixed coordinate `wall`.
fn wall_reflection(
    position: &[f64],
    velocity: &[f64],
    interval: f64,
    moving: usize,
    wall: usize,
) -> Option<ReflectionEvent> {
    let x = position[moving];
    let v = velocity[moving];
    let location = position[wall];
    if v == 0. || !is_reflected(x, x + interval * v, location) {
        return None;
    }
    Some(ReflectionEvent {
        time: clamp_time((location - x) / v, "collision"),
        kind: ReflectionKind::Reflection {
            index: moving,
            location,
        },
    })
}

/// The first exit from a curved region within `interval`.
pub fn first_curved_reflection(
    position: &[f64],
    velocity: &[f64],
    space: &dyn BoundedSpace,
    interval: f64,
) -> ReflectionEvent {
    let time = space.forward_distance_to_boundary(position, velocity);
    if time.is_nan() || time > interval {
        return ReflectionEvent::none(interval);
    }
    let time = clamp_time(time, "boundary");

    let location: Box<[f64]> = position
        .iter()
        .zip(velocity)
        .map(|(x, v)| x + time * v)
        .collect();
    let mut normal = vec![0f64; position.len()].into_boxed_slice();
    space.normal_at_boundary(&location, &mut normal);

    ReflectionEvent {
        time,
        kind: ReflectionKind::MultivariateReflection { location, normal },
    }
}
