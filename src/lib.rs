pub(crate) mod bounds;
pub(crate) mod chain;
pub(crate) mod cpu_potential;
pub(crate) mod events;
pub(crate) mod hmc;
pub(crate) mod leapfrog;
pub(crate) mod mass_matrix;
pub(crate) mod math;
pub(crate) mod operator;
pub(crate) mod reflection;
pub(crate) mod trajectory;
pub(crate) mod transform;
pub(crate) mod zigzag;

pub use bounds::{Ball, BoundedSpace, Bounds, FixedBounds, GraphBounds, ParameterBounds};
pub use chain::{chain_rng, sample_parallel, ChainSettings, ChainTrace, OperatorChain, Progress};
pub use cpu_potential::{test_logps, CpuLogpFunc, CpuPrecisionFunc, DensePrecision};
pub use events::{
    first_collision, first_curved_reflection, first_fixed_bound_reflection,
    next_fixed_bound_event, next_gradient_event, switch_time, EventType, MinimumTravelInformation,
};
pub use hmc::{HamiltonianMonteCarlo, HmcSettings, TrajectoryResult};
pub use leapfrog::{FreeFlight, LeapfrogEngine, LeapfrogResult, Potential, PositionStep, PositionUpdate};
pub use mass_matrix::{DiagMassMatrix, MassPreconditioner};
pub use operator::{InstabilityHandler, LogpError, Operator, SamplerError, StepOutcome};
pub use reflection::{ReflectionEvent, ReflectionKind};
pub use trajectory::{BounceState, IntegratorOptions, ReflectiveUpdate, ZigZagTrajectory};
pub use transform::{IntervalTransform, LogTransform, Transform, TransformedTarget};
pub use zigzag::{IrreversibleZigZag, TravelTime, ZigZagSettings};
