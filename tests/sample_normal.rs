use pdmp_rs::{
    chain_rng, sample_parallel, test_logps::NormalLogp, Bounds, ChainSettings, CpuLogpFunc,
    DensePrecision, DiagMassMatrix, FixedBounds, GraphBounds, HamiltonianMonteCarlo, HmcSettings,
    IntegratorOptions, IrreversibleZigZag, LogTransform, LogpError, Operator, OperatorChain,
    SamplerError, TravelTime, ZigZagSettings,
};
use pretty_assertions::assert_eq;
use thiserror::Error;

fn moments(draws: &[Box<[f64]>], index: usize) -> (f64, f64) {
    let n = draws.len() as f64;
    let mean = draws.iter().map(|d| d[index]).sum::<f64>() / n;
    let var = draws.iter().map(|d| (d[index] - mean).powi(2)).sum::<f64>() / n;
    (mean, var)
}

fn zigzag(seed: u64, num_draws: usize) -> Vec<Box<[f64]>> {
    let op = IrreversibleZigZag::new(
        NormalLogp::new(2, 0.),
        DensePrecision::from_diagonal(&[1., 1.]),
        DiagMassMatrix::identity(2),
        ZigZagSettings {
            travel_time: TravelTime::Exponential { mean: 1. },
            ..Default::default()
        },
    )
    .unwrap();
    let mut chain = OperatorChain::new(op, chain_rng(seed, 0), 0, &[2., -2.]).unwrap();
    (0..num_draws).map(|_| chain.draw().unwrap().0).collect()
}

#[test]
fn zigzag_normal_moments() {
    let draws = zigzag(123, 4000);
    for i in 0..2 {
        let (mean, var) = moments(&draws[200..], i);
        assert!(mean.abs() < 0.15, "mean {} of coordinate {}", mean, i);
        assert!((var - 1.).abs() < 0.3, "variance {} of coordinate {}", var, i);
    }
}

#[test]
fn zigzag_is_deterministic() {
    assert_eq!(zigzag(5, 50), zigzag(5, 50));
    assert!(zigzag(5, 50) != zigzag(6, 50));
}

#[test]
fn parallel_hmc_moments() {
    let settings = ChainSettings {
        num_chains: 2,
        num_draws: 1500,
        seed: 42,
        num_threads: Some(2),
    };
    let traces = sample_parallel(
        &settings,
        |_| {
            HamiltonianMonteCarlo::new(
                NormalLogp::new(3, 2.),
                DiagMassMatrix::identity(3),
                HmcSettings::default(),
            )
        },
        &[0., 0., 0.],
    )
    .unwrap();

    assert_eq!(traces.len(), 2);
    for trace in traces.iter() {
        assert_eq!(trace.draws.len(), 1500);
        assert!(trace.acceptance_rate() > 0.9);
        assert_eq!(trace.diverging, 0);
        for i in 0..3 {
            let (mean, var) = moments(&trace.draws[100..], i);
            assert!((mean - 2.).abs() < 0.2, "mean {}", mean);
            assert!((var - 1.).abs() < 0.35, "variance {}", var);
        }
    }
}

#[test]
fn reflective_hmc_keeps_order() {
    let bounds = GraphBounds::ordered(FixedBounds::positive(3)).unwrap();
    let op = HamiltonianMonteCarlo::new(
        NormalLogp::new(3, 1.),
        DiagMassMatrix::identity(3),
        HmcSettings::default(),
    )
    .unwrap()
    .with_bounds(Bounds::Graph(bounds))
    .unwrap();
    let mut chain = OperatorChain::new(op, chain_rng(3, 0), 0, &[0.5, 1., 1.5]).unwrap();

    let mut events = 0;
    for _ in 0..500 {
        let (draw, progress) = chain.draw().unwrap();
        events += progress.events;
        assert!(draw.iter().all(|&x| x >= 0.));
        assert!(draw[0] <= draw[1] && draw[1] <= draw[2], "{:?}", draw);
    }
    assert!(events > 0);
    assert!(chain.acceptance_rate() > 0.5);
}

#[test]
fn two_dimensional_trajectory_from_rest() {
    let mut op = HamiltonianMonteCarlo::new(
        NormalLogp::new(2, 0.),
        DiagMassMatrix::identity(2),
        HmcSettings {
            step_size: 0.1,
            n_steps: 10,
            ..Default::default()
        },
    )
    .unwrap();

    let mut position = [1., 1.];
    let mut momentum = [0., 0.];
    let result = op.run_trajectory(&mut position, &mut momentum).unwrap();

    let max_velocity = momentum.iter().fold(0f64, |acc, p| acc.max(p.abs()));
    let distance = position
        .iter()
        .map(|x| (x - 1.) * (x - 1.))
        .sum::<f64>()
        .sqrt();
    assert!(distance < 10. * 0.1 * max_velocity);
    assert_eq!(result.log_acceptance.min(0.).exp(), 1.);
    assert_eq!(result.events, 0);
}

#[test]
fn transform_with_bounds_is_invalid() {
    let op = HamiltonianMonteCarlo::new(
        NormalLogp::new(2, 1.),
        DiagMassMatrix::identity(2),
        HmcSettings::default(),
    )
    .unwrap()
    .with_transform(Box::new(LogTransform))
    .unwrap()
    .with_bounds(Bounds::Fixed(FixedBounds::positive(2)));
    assert!(matches!(op, Err(SamplerError::InvalidOperatorState(_))));
}

#[test]
fn event_limit_rejects_and_continues() {
    let settings = HmcSettings {
        step_size: 0.5,
        integrator: IntegratorOptions {
            max_events: 2,
            debug_events: false,
        },
        ..Default::default()
    };
    let bounds = FixedBounds::new(&[-0.1, -0.1], &[0.1, 0.1]).unwrap();
    let op = HamiltonianMonteCarlo::new(NormalLogp::new(2, 0.), DiagMassMatrix::identity(2), settings)
        .unwrap()
        .with_bounds(Bounds::Fixed(bounds))
        .unwrap();
    let mut chain = OperatorChain::new(op, chain_rng(1, 0), 0, &[0., 0.]).unwrap();

    let mut diverging = 0;
    for _ in 0..20 {
        let (draw, progress) = chain.draw().unwrap();
        if progress.diverging {
            diverging += 1;
            assert!(!progress.accepted);
        }
        assert!(draw.iter().all(|x| x.abs() <= 0.1));
    }
    assert!(diverging > 0);
    assert_eq!(chain.draw_count(), 20);
}

#[derive(Debug, Error)]
#[error("the model broke")]
struct Broken;

impl LogpError for Broken {
    fn is_recoverable(&self) -> bool {
        false
    }
}

struct BrokenLogp;

impl CpuLogpFunc for BrokenLogp {
    type Err = Broken;

    fn dim(&self) -> usize {
        2
    }

    fn logp(&mut self, _position: &[f64], _gradient: &mut [f64]) -> Result<f64, Broken> {
        Err(Broken)
    }
}

#[test]
fn unrecoverable_logp_error_stops() {
    let op = HamiltonianMonteCarlo::new(BrokenLogp, DiagMassMatrix::identity(2), HmcSettings::default())
        .unwrap();
    let mut chain = OperatorChain::new(op, chain_rng(0, 0), 0, &[0., 0.]).unwrap();
    let err = chain.draw().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SamplerError>(),
        Some(SamplerError::LogpFailure(_))
    ));
    assert_eq!(chain.operator().step_count(), 1);
}
