use crate::mass_matrix::MassPreconditioner;

/// What happens at the end of a straight segment of a reflective trajectory.
#[derive(Debug, Clone, PartialEq)]
pub enum ReflectionKind {
    /// The segment ends without hitting a constraint.
    None,
    /// A single coordinate reaches a fixed bound.
    Reflection { index: usize, location: f64 },
    /// Two connected coordinates meet.
    Collision {
        first: usize,
        second: usize,
        location: f64,
    },
    /// The particle reaches the boundary of a curved region.
    MultivariateReflection {
        location: Box<[f64]>,
        normal: Box<[f64]>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReflectionEvent {
    /// Travel time until the event.
    pub time: f64,
    pub kind: ReflectionKind,
}

impl ReflectionEvent {
    pub fn none(time: f64) -> Self {
        ReflectionEvent {
            time,
            kind: ReflectionKind::None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self.kind, ReflectionKind::None)
    }

    /// Move the particle to the event and apply its effect on the momentum.
    ///
    /// Coordinates taking part in the event are set to the exact event
    /// location afterwards, so that repeated reflections do not drift out of
    /// the constrained region.
    pub fn apply<M: MassPreconditioner>(
        &self,
        position: &mut [f64],
        momentum: &mut [f64],
        mass: &M,
        active: Option<&[bool]>,
    ) {
        for (i, x) in position.iter_mut().enumerate() {
            *x += mass.velocity_at(i, momentum) * self.time;
        }

        match &self.kind {
            ReflectionKind::None => {}
            ReflectionKind::Reflection { index, location } => {
                momentum[*index] = -momentum[*index];
                position[*index] = *location;
            }
            ReflectionKind::Collision {
                first,
                second,
                location,
            } => {
                mass.resolve_collision(*first, *second, momentum);
                position[*first] = *location;
                position[*second] = *location;
            }
            ReflectionKind::MultivariateReflection { location, normal } => {
                let is_active = |i: usize| active.map(|mask| mask[i]).unwrap_or(true);

                // Reflect the velocity about the tangent plane in the metric
                // of the mass matrix, which keeps the kinetic energy.
                let mut vn = 0f64;
                let mut nn = 0f64;
                for i in (0..normal.len()).filter(|&i| is_active(i)) {
                    vn += mass.velocity_at(i, momentum) * normal[i];
                    nn += mass.velocity_at(i, normal) * normal[i];
                }
                if nn > 0. {
                    let c = 2. * vn / nn;
                    for i in (0..normal.len()).filter(|&i| is_active(i)) {
                        momentum[i] -= c * normal[i];
                        position[i] = location[i];
                    }
                }
            }
        }
    }
}
