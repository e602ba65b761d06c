//! Hard constraints on the parameter space.
//!
//! Fixed bounds confine each coordinate to an interval, graph bounds
//! additionally forbid connected coordinates from passing each other, and a
//! [`BoundedSpace`] describes a general convex region through its boundary.

use crate::math::vector_dot;
use crate::operator::{Result, SamplerError};

/// Per-coordinate bounds and the pairs of coordinates that must keep
/// their order.
pub trait ParameterBounds {
    fn dim(&self) -> usize;

    /// `f64::INFINITY` if the coordinate has no upper bound.
    fn fixed_upper_bound(&self, index: usize) -> f64;

    /// `f64::NEG_INFINITY` if the coordinate has no lower bound.
    fn fixed_lower_bound(&self, index: usize) -> f64;

    /// Coordinates that may not cross coordinate `index`.
    fn connected_indices(&self, _index: usize) -> &[usize] {
        &[]
    }

    /// Fails with [`SamplerError::OutOfBounds`] for the first coordinate
    /// outside of its fixed bounds.
    fn check_contains(&self, position: &[f64]) -> Result<()> {
        for (index, &value) in position.iter().enumerate() {
            let lower = self.fixed_lower_bound(index);
            let upper = self.fixed_upper_bound(index);
            if !(value >= lower && value <= upper) {
                return Err(SamplerError::OutOfBounds {
                    index,
                    value,
                    lower,
                    upper,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FixedBounds {
    lower: Box<[f64]>,
    upper: Box<[f64]>,
}

impl FixedBounds {
    pub fn new(lower: &[f64], upper: &[f64]) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(SamplerError::DimensionMismatch {
                expected: lower.len(),
                found: upper.len(),
            });
        }
        for (i, (lo, up)) in lower.iter().zip(upper).enumerate() {
            if lo.is_nan() || up.is_nan() || lo > up {
                return Err(SamplerError::InvalidSettings(format!(
                    "Invalid bounds [{}, {}] for coordinate {}",
                    lo, up, i
                )));
            }
        }
        Ok(Self {
            lower: lower.into(),
            upper: upper.into(),
        })
    }

    pub fn unbounded(dim: usize) -> Self {
        Self {
            lower: vec![f64::NEG_INFINITY; dim].into(),
            upper: vec![f64::INFINITY; dim].into(),
        }
    }

    /// Every coordinate bounded below by zero.
    pub fn positive(dim: usize) -> Self {
        Self {
            lower: vec![0.; dim].into(),
            upper: vec![f64::INFINITY; dim].into(),
        }
    }
}

impl ParameterBounds for FixedBounds {
    fn dim(&self) -> usize {
        self.lower.len()
    }

    fn fixed_upper_bound(&self, index: usize) -> f64 {
        self.upper[index]
    }

    fn fixed_lower_bound(&self, index: usize) -> f64 {
        self.lower[index]
    }
}

/// Fixed bounds plus a symmetric graph of coordinates that may not cross.
#[derive(Debug, Clone)]
pub struct GraphBounds {
    fixed: FixedBounds,
    connected: Box<[Box<[usize]>]>,
}

impl GraphBounds {
    /// Build from a list of undirected edges. Duplicate edges are merged.
    pub fn new(fixed: FixedBounds, edges: &[(usize, usize)]) -> Result<Self> {
        let dim = fixed.dim();
        let mut connected = vec![Vec::new(); dim];
        for &(i, j) in edges {
            if i >= dim || j >= dim {
                return Err(SamplerError::InvalidSettings(format!(
                    "Edge ({}, {}) out of range for dimension {}",
                    i, j, dim
                )));
            }
            if i == j {
                return Err(SamplerError::InvalidSettings(format!(
                    "Coordinate {} cannot be connected to itself",
                    i
                )));
            }
            connected[i].push(j);
            connected[j].push(i);
        }
        let connected = connected
            .into_iter()
            .map(|mut neighbours| {
                neighbours.sort_unstable();
                neighbours.dedup();
                neighbours.into_boxed_slice()
            })
            .collect();
        Ok(Self { fixed, connected })
    }

    /// Coordinates that must stay ordered: `x_0 <= x_1 <= ... <= x_{n-1}`.
    pub fn ordered(fixed: FixedBounds) -> Result<Self> {
        let edges: Vec<_> = (1..fixed.dim()).map(|i| (i - 1, i)).collect();
        Self::new(fixed, &edges)
    }
}

impl ParameterBounds for GraphBounds {
    fn dim(&self) -> usize {
        self.fixed.dim()
    }

    fn fixed_upper_bound(&self, index: usize) -> f64 {
        self.fixed.fixed_upper_bound(index)
    }

    fn fixed_lower_bound(&self, index: usize) -> f64 {
        self.fixed.fixed_lower_bound(index)
    }

    fn connected_indices(&self, index: usize) -> &[usize] {
        &self.connected[index]
    }
}

/// A convex region described through its boundary.
pub trait BoundedSpace: Send {
    fn dim(&self) -> usize;

    fn contains(&self, position: &[f64]) -> bool;

    /// Time until the ray `position + t * velocity` leaves the region.
    ///
    /// `f64::INFINITY` if it never does.
    fn forward_distance_to_boundary(&self, position: &[f64], velocity: &[f64]) -> f64;

    /// An outward normal of the boundary at `position` (not necessarily
    /// normalized).
    fn normal_at_boundary(&self, position: &[f64], out: &mut [f64]);
}

/// The ball `|x - center| <= radius`.
#[derive(Debug, Clone)]
pub struct Ball {
    center: Box<[f64]>,
    radius: f64,
}

impl Ball {
    pub fn new(center: &[f64], radius: f64) -> Result<Self> {
        if !(radius.is_finite() && radius > 0.) {
            return Err(SamplerError::InvalidSettings(format!(
                "Invalid radius {}",
                radius
            )));
        }
        Ok(Self {
            center: center.into(),
            radius,
        })
    }

    fn offset_norm_sq(&self, position: &[f64]) -> f64 {
        position
            .iter()
            .zip(self.center.iter())
            .map(|(x, c)| (x - c) * (x - c))
            .sum()
    }
}

impl BoundedSpace for Ball {
    fn dim(&self) -> usize {
        self.center.len()
    }

    fn contains(&self, position: &[f64]) -> bool {
        // Reflections place the particle on the sphere up to rounding.
        self.offset_norm_sq(position) <= self.radius * self.radius * (1. + 1e-12)
    }

    fn forward_distance_to_boundary(&self, position: &[f64], velocity: &[f64]) -> f64 {
        // |x - c + t v|^2 = r^2
        let a = vector_dot(velocity, velocity);
        if a == 0. {
            return f64::INFINITY;
        }
        let b: f64 = position
            .iter()
            .zip(self.center.iter())
            .zip(velocity)
            .map(|((x, c), v)| (x - c) * v)
            .sum();
        let c = self.offset_norm_sq(position) - self.radius * self.radius;
        let disc = (b * b - a * c).max(0.);
        if b > 0. {
            -c / (b + disc.sqrt())
        } else {
            (-b + disc.sqrt()) / a
        }
    }

    fn normal_at_boundary(&self, position: &[f64], out: &mut [f64]) {
        out.iter_mut()
            .zip(position.iter().zip(self.center.iter()))
            .for_each(|(n, (x, c))| *n = x - c);
    }
}

/// The constraint configured on a reflective operator.
pub enum Bounds {
    Fixed(FixedBounds),
    Graph(GraphBounds),
    Curved(Box<dyn BoundedSpace>),
}

impl Bounds {
    pub fn dim(&self) -> usize {
        match self {
            Bounds::Fixed(bounds) => bounds.dim(),
            Bounds::Graph(bounds) => bounds.dim(),
            Bounds::Curved(space) => space.dim(),
        }
    }

    pub fn contains(&self, position: &[f64]) -> bool {
        self.check_contains(position).is_ok()
    }

    pub(crate) fn check_contains(&self, position: &[f64]) -> Result<()> {
        match self {
            Bounds::Fixed(bounds) => bounds.check_contains(position),
            Bounds::Graph(bounds) => {
                bounds.check_contains(position)?;
                for i in 0..position.len() {
                    for &j in bounds.connected_indices(i) {
                        if j > i && position[i] > position[j] {
                            return Err(SamplerError::InvalidOperatorState(
                                "connected coordinates are out of order",
                            ));
                        }
                    }
                }
                Ok(())
            }
            Bounds::Curved(space) => {
                if space.contains(position) {
                    Ok(())
                } else {
                    Err(SamplerError::InvalidOperatorState(
                        "position lies outside of the bounded space",
                    ))
                }
            }
        }
    }
}

impl std::fmt::Debug for Bounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bounds::Fixed(bounds) => f.debug_tuple("Fixed").field(bounds).finish(),
            Bounds::Graph(bounds) => f.debug_tuple("Graph").field(bounds).finish(),
            Bounds::Curved(space) => f.debug_tuple("Curved").field(&space.dim()).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    #[test]
    fn graph_is_symmetric() {
        let bounds = GraphBounds::new(FixedBounds::unbounded(4), &[(0, 2), (2, 0), (3, 1)]).unwrap();
        assert_eq!(bounds.connected_indices(0), &[2]);
        assert_eq!(bounds.connected_indices(2), &[0]);
        assert_eq!(bounds.connected_indices(1), &[3]);
        assert!(GraphBounds::new(FixedBounds::unbounded(2), &[(0, 2)]).is_err());
        assert!(GraphBounds::new(FixedBounds::unbounded(2), &[(1, 1)]).is_err());
    }

    #[test]
    fn fixed_containment() {
        let bounds = FixedBounds::new(&[0., -1.], &[1., 1.]).unwrap();
        assert!(bounds.check_contains(&[0., 1.]).is_ok());
        match bounds.check_contains(&[0.5, 1.5]) {
            Err(SamplerError::OutOfBounds { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected {:?}", other),
        }
        assert!(FixedBounds::new(&[1.], &[0.]).is_err());
        assert!(bounds.connected_indices(1).is_empty());
    }

    #[test]
    fn ordered_bounds() {
        let bounds = Bounds::Graph(GraphBounds::ordered(FixedBounds::positive(3)).unwrap());
        assert!(bounds.contains(&[0., 1., 2.]));
        assert!(!bounds.contains(&[0., 2., 1.]));
        assert!(!bounds.contains(&[-1., 2., 3.]));
    }

    #[test]
    fn ball_distance() {
        let ball = Ball::new(&[0., 0.], 2.).unwrap();
        assert_relative_eq!(ball.forward_distance_to_boundary(&[0., 0.], &[1., 0.]), 2.);
        assert_relative_eq!(ball.forward_distance_to_boundary(&[1., 0.], &[-1., 0.]), 3.);
        // Leaving from the boundary itself takes no time, entering crosses the ball.
        assert_relative_eq!(ball.forward_distance_to_boundary(&[2., 0.], &[1., 0.]), 0.);
        assert_relative_eq!(ball.forward_distance_to_boundary(&[2., 0.], &[-2., 0.]), 2.);
        assert_eq!(
            ball.forward_distance_to_boundary(&[1., 1.], &[0., 0.]),
            f64::INFINITY
        );

        let mut normal = [0.; 2];
        ball.normal_at_boundary(&[0., 2.], &mut normal);
        assert_eq!(normal, [0., 2.]);
    }
}
