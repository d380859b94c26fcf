//! Multi-objective parameter search over the SMA window lengths
//!
//! Trials run sequentially. Parameters are drawn uniformly from their integer
//! ranges by a seedable sampler; every objective is maximised and the study
//! reports the Pareto front of completed trials.

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Maximize,
    Minimize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialState {
    Complete,
    Fail,
}

#[derive(Debug, Clone)]
pub struct Trial {
    pub number: usize,
    pub params: BTreeMap<String, i64>,
    /// Objective values in study-direction order; empty for failed trials
    pub values: Vec<f64>,
    pub state: TrialState,
}

impl Trial {
    pub fn param(&self, name: &str) -> Option<i64> {
        self.params.get(name).copied()
    }

    /// `self` is at least as good on every objective and better on one
    fn dominates(&self, other: &Trial, directions: &[Direction]) -> bool {
        let mut strictly_better = false;
        for ((a, b), direction) in self.values.iter().zip(&other.values).zip(directions) {
            let (a, b) = match direction {
                Direction::Maximize => (*a, *b),
                Direction::Minimize => (-*a, -*b),
            };
            if a < b {
                return false;
            }
            if a > b {
                strictly_better = true;
            }
        }
        strictly_better
    }
}

/// Handed to the objective to draw parameters for one trial
pub struct TrialContext<'a> {
    rng: &'a mut StdRng,
    params: BTreeMap<String, i64>,
}

impl TrialContext<'_> {
    /// Uniform integer in `[low, high]`
    pub fn suggest_int(&mut self, name: &str, low: i64, high: i64) -> Result<i64> {
        if low > high {
            return Err(anyhow!("{}: empty range [{}, {}]", name, low, high));
        }
        let value = self.rng.gen_range(low..=high);
        self.params.insert(name.to_string(), value);
        Ok(value)
    }
}

pub struct Study {
    pub name: String,
    directions: Vec<Direction>,
    rng: StdRng,
    trials: Vec<Trial>,
}

impl Study {
    pub fn new(name: &str, directions: Vec<Direction>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            name: name.to_string(),
            directions,
            rng,
            trials: Vec::new(),
        }
    }

    pub fn directions(&self) -> &[Direction] {
        &self.directions
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    /// Run `n_trials` more trials. An objective error or a non-finite value
    /// fails that trial only.
    pub fn optimize<F>(&mut self, n_trials: usize, mut objective: F)
    where
        F: FnMut(&mut TrialContext<'_>) -> Result<Vec<f64>>,
    {
        for _ in 0..n_trials {
            let number = self.trials.len();
            let mut ctx = TrialContext {
                rng: &mut self.rng,
                params: BTreeMap::new(),
            };
            let outcome = objective(&mut ctx);
            let params = ctx.params;

            let (values, state) = match outcome {
                Ok(values)
                    if values.len() == self.directions.len()
                        && values.iter().all(|v| v.is_finite()) =>
                {
                    debug!("Trial {} finished with values {:?} and params {:?}", number, values, params);
                    (values, TrialState::Complete)
                }
                Ok(values) => {
                    warn!("Trial {} failed: objective returned {:?}", number, values);
                    (Vec::new(), TrialState::Fail)
                }
                Err(e) => {
                    warn!("Trial {} failed: {:#}", number, e);
                    (Vec::new(), TrialState::Fail)
                }
            };

            self.trials.push(Trial {
                number,
                params,
                values,
                state,
            });
        }
    }

    /// Completed trials not dominated by any other completed trial
    pub fn best_trials(&self) -> Vec<&Trial> {
        let complete: Vec<&Trial> = self
            .trials
            .iter()
            .filter(|t| t.state == TrialState::Complete)
            .collect();

        complete
            .iter()
            .filter(|t| !complete.iter().any(|o| o.dominates(t, &self.directions)))
            .copied()
            .collect()
    }
}

/// Search ranges for the SMA cross windows
#[derive(Debug, Clone, Copy)]
pub struct SmaSearchSpace {
    pub n_short_min: usize,
    pub n_short_max: usize,
    pub n_long_max: usize,
}

impl SmaSearchSpace {
    /// `n_short` in `[n_short_min, n_short_max]`, `n_long` in `[n_short + 1, n_long_max]`
    pub fn suggest(&self, ctx: &mut TrialContext<'_>) -> Result<(usize, usize)> {
        let n_short = ctx.suggest_int("n_short", self.n_short_min as i64, self.n_short_max as i64)?;
        let n_long = ctx.suggest_int("n_long", n_short + 1, self.n_long_max as i64)?;
        Ok((n_short as usize, n_long as usize))
    }
}

pub fn log_best_trials(study: &Study) {
    let best = study.best_trials();
    info!(
        "Optimization completed; Pareto-optimal trials: {} of {}",
        best.len(),
        study.trials().len()
    );
    for t in best {
        info!(
            "Trial #{}: Return={:.2}%, Sharpe={:.2}, n_short={}, n_long={}",
            t.number,
            t.values.first().copied().unwrap_or(f64::NAN),
            t.values.get(1).copied().unwrap_or(f64::NAN),
            t.param("n_short").unwrap_or_default(),
            t.param("n_long").unwrap_or_default()
        );
    }
}
