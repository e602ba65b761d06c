use anyhow::{bail, Context, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::operator::Operator;

/// Diagnostic information about a single draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub draw: u64,
    pub chain: u64,
    pub accepted: bool,
    pub diverging: bool,
    pub events: u64,
}

/// Repeatedly applies one operator to its own copy of the position.
pub struct OperatorChain<O: Operator, R: Rng> {
    operator: O,
    rng: R,
    position: Box<[f64]>,
    chain: u64,
    draw_count: u64,
    accepted_count: u64,
}

impl<O: Operator, R: Rng> OperatorChain<O, R> {
    pub fn new(operator: O, rng: R, chain: u64, init: &[f64]) -> Result<Self> {
        if init.len() != operator.dim() {
            bail!(
                "Initial position has dimension {}, operator expects {}",
                init.len(),
                operator.dim()
            );
        }
        Ok(OperatorChain {
            operator,
            rng,
            position: init.into(),
            chain,
            draw_count: 0,
            accepted_count: 0,
        })
    }

    /// Draw a new sample and return the position and some diagnostic information.
    pub fn draw(&mut self) -> Result<(Box<[f64]>, Progress)> {
        let outcome = self
            .operator
            .propose_step(&mut self.rng, &mut self.position)
            .with_context(|| {
                format!(
                    "{} failed in draw {} of chain {}",
                    self.operator.operator_name(),
                    self.draw_count,
                    self.chain
                )
            })?;

        if outcome.accepted {
            self.accepted_count += 1;
        }
        let progress = Progress {
            draw: self.draw_count,
            chain: self.chain,
            accepted: outcome.accepted,
            diverging: outcome.diverging,
            events: outcome.events,
        };
        self.draw_count += 1;
        Ok((self.position.clone(), progress))
    }

    pub fn position(&self) -> &[f64] {
        &self.position
    }

    pub fn operator(&self) -> &O {
        &self.operator
    }

    pub fn draw_count(&self) -> u64 {
        self.draw_count
    }

    /// Fraction of accepted proposals so far.
    pub fn acceptance_rate(&self) -> f64 {
        if self.draw_count == 0 {
            return 0.;
        }
        self.accepted_count as f64 / self.draw_count as f64
    }
}

/// Settings for running several chains
#[derive(Debug, Clone, Copy)]
pub struct ChainSettings {
    pub num_chains: usize,
    pub num_draws: u64,
    pub seed: u64,
    /// Size of the thread pool. Defaults to the number of cpus.
    pub num_threads: Option<usize>,
}

impl Default for ChainSettings {
    fn default() -> Self {
        ChainSettings {
            num_chains: 4,
            num_draws: 1000,
            seed: 0,
            num_threads: None,
        }
    }
}

/// The draws and counters of one finished chain.
#[derive(Debug, Clone)]
pub struct ChainTrace {
    pub chain: u64,
    pub draws: Vec<Box<[f64]>>,
    pub accepted: u64,
    pub diverging: u64,
    pub events: u64,
}

impl ChainTrace {
    pub fn acceptance_rate(&self) -> f64 {
        if self.draws.is_empty() {
            return 0.;
        }
        self.accepted as f64 / self.draws.len() as f64
    }
}

/// The random number generator of a chain.
///
/// Every chain uses its own stream of the common seed, so chains can be
/// reproduced one by one.
pub fn chain_rng(seed: u64, chain: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(chain);
    rng
}

fn run_chain<O: Operator>(
    settings: &ChainSettings,
    chain: u64,
    operator: O,
    init: &[f64],
) -> Result<ChainTrace> {
    let rng = chain_rng(settings.seed, chain);
    let mut sampler = OperatorChain::new(operator, rng, chain, init)?;
    let mut trace = ChainTrace {
        chain,
        draws: Vec::with_capacity(settings.num_draws as usize),
        accepted: 0,
        diverging: 0,
        events: 0,
    };
    for _ in 0..settings.num_draws {
        let (draw, progress) = sampler.draw()?;
        trace.accepted += progress.accepted as u64;
        trace.diverging += progress.diverging as u64;
        trace.events += progress.events;
        trace.draws.push(draw);
    }
    if trace.diverging > 0 {
        log::warn!(
            "Chain {} had {} diverging steps out of {}",
            chain,
            trace.diverging,
            settings.num_draws
        );
    }
    log::info!(
        "Chain {} finished with acceptance rate {:.3}",
        chain,
        trace.acceptance_rate()
    );
    Ok(trace)
}

/// Run independent chains in parallel, each with an operator built by
/// `make_operator` for its chain index.
pub fn sample_parallel<O, F>(
    settings: &ChainSettings,
    make_operator: F,
    init: &[f64],
) -> Result<Vec<ChainTrace>>
where
    O: Operator,
    F: Fn(u64) -> crate::operator::Result<O> + Sync,
{
    let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("pdmp-worker-{}", i));
    if let Some(num_threads) = settings.num_threads {
        builder = builder.num_threads(num_threads);
    }
    let pool = builder.build().context("Could not start thread pool")?;

    pool.install(|| {
        (0..settings.num_chains as u64)
            .into_par_iter()
            .map(|chain| {
                let operator = make_operator(chain)
                    .with_context(|| format!("Could not create operator for chain {}", chain))?;
                run_chain(settings, chain, operator, init)
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_potential::test_logps::NormalLogp;
    use crate::hmc::{HamiltonianMonteCarlo, HmcSettings};
    use crate::mass_matrix::DiagMassMatrix;
    use pretty_assertions::assert_eq;

    fn hmc(_chain: u64) -> crate::operator::Result<HamiltonianMonteCarlo<NormalLogp, DiagMassMatrix>> {
        HamiltonianMonteCarlo::new(
            NormalLogp::new(3, 1.),
            DiagMassMatrix::identity(3),
            HmcSettings::default(),
        )
    }

    #[test]
    fn chain_draws() {
        let mut chain = OperatorChain::new(hmc(0).unwrap(), chain_rng(42, 0), 0, &[0., 0., 0.]).unwrap();
        for i in 0..10 {
            let (draw, progress) = chain.draw().unwrap();
            assert_eq!(progress.draw, i);
            assert_eq!(progress.chain, 0);
            assert_eq!(&draw[..], chain.position());
        }
        assert_eq!(chain.draw_count(), 10);
        assert!(chain.acceptance_rate() > 0.5);

        assert!(OperatorChain::new(hmc(0).unwrap(), chain_rng(42, 0), 0, &[0.]).is_err());
    }

    #[test]
    fn parallel_chains_are_reproducible() {
        let settings = ChainSettings {
            num_chains: 3,
            num_draws: 20,
            seed: 7,
            num_threads: Some(2),
        };
        let first = sample_parallel(&settings, hmc, &[0., 0., 0.]).unwrap();
        let second = sample_parallel(&settings, hmc, &[0., 0., 0.]).unwrap();

        assert_eq!(first.len(), 3);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.chain, b.chain);
            assert_eq!(a.draws, b.draws);
            assert_eq!(a.draws.len(), 20);
        }
        assert!(first[0].draws != first[1].draws);
    }
}
