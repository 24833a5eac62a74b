//! A generic Metropolis annealer over reversibly mutable solutions.
//!
//! The annealer owns its solution exclusively for the duration of
//! [`Annealer::run`]. Candidate moves are applied in place via [`Perturb`];
//! rejected moves are rolled back with [`Perturb::revert`], and the
//! best-so-far solution is deep-snapshotted only on strict improvement.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A solution that can be perturbed in place and restored.
///
/// At most one perturbation may be pending at a time: every call to
/// [`Perturb::perturb`] replaces the pending undo record.
pub trait Perturb {
    /// Applies one random, reversible perturbation.
    fn perturb(&mut self, rng: &mut StdRng);

    /// Restores the state prior to the last [`Perturb::perturb`].
    ///
    /// # Panics
    ///
    /// Panics if no perturbation is pending.
    fn revert(&mut self);
}

/// Parameters of an annealing run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnnealOptions {
    /// The initial temperature.
    pub t_max: f64,
    /// The final temperature.
    pub t_min: f64,
    /// The number of proposals evaluated at each temperature.
    pub chain_length: usize,
    /// Stop once the best objective has been flat for this many outer
    /// iterations.
    pub max_stay: usize,
    /// Suppresses per-iteration progress logs.
    pub silent: bool,
    /// The seed of the run's random source.
    pub seed: u64,
}

impl Default for AnnealOptions {
    fn default() -> Self {
        Self {
            t_max: 100.0,
            t_min: 1e-7,
            chain_length: 300,
            max_stay: 150,
            silent: false,
            seed: 0,
        }
    }
}

impl AnnealOptions {
    /// The parameter set used for layout optimization.
    pub fn layout() -> Self {
        Self {
            t_max: 1e-2,
            t_min: 1e-10,
            chain_length: 10,
            max_stay: 150,
            ..Default::default()
        }
    }

    /// The parameter set used for routing optimization.
    pub fn routing() -> Self {
        Self {
            t_max: 1e-4,
            t_min: 1e-10,
            chain_length: 10,
            max_stay: 1000,
            ..Default::default()
        }
    }

    /// Sets the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the chain length.
    pub fn with_chain_length(mut self, chain_length: usize) -> Self {
        self.chain_length = chain_length;
        self
    }
}

/// The outcome of an annealing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnealOutcome<S> {
    /// The best solution found.
    pub solution: S,
    /// The objective value of the best solution.
    pub objective: f64,
    /// The best objective after each outer iteration, starting with the
    /// initial value.
    pub history: Vec<f64>,
}

/// A simulated annealing driver.
///
/// Generic over the solution type and the objective function; the objective
/// receives a mutable reference because evaluating it may refresh caches
/// (the routing objective decodes the pattern it scores).
pub struct Annealer<S, F> {
    objective: F,
    current: S,
    best: S,
    y_current: f64,
    y_best: f64,
    temp: f64,
    iter_cycle: u64,
    history: Vec<f64>,
    opts: AnnealOptions,
    rng: StdRng,
}

impl<S, F> Annealer<S, F>
where
    S: Perturb + Clone,
    F: FnMut(&mut S) -> f64,
{
    /// Creates a new annealer around an initial solution.
    ///
    /// Errors if the temperature range is not `t_max > t_min > 0` or if the
    /// initial objective evaluates to NaN.
    pub fn new(mut objective: F, mut x0: S, opts: AnnealOptions) -> Result<Self> {
        if !(opts.t_max > opts.t_min && opts.t_min > 0.0) {
            return Err(Error::Temperature {
                t_max: opts.t_max,
                t_min: opts.t_min,
            });
        }
        let y0 = objective(&mut x0);
        if y0.is_nan() {
            return Err(Error::NanObjective);
        }
        Ok(Self {
            objective,
            best: x0.clone(),
            current: x0,
            y_current: y0,
            y_best: y0,
            temp: opts.t_max,
            iter_cycle: 0,
            history: vec![y0],
            rng: StdRng::seed_from_u64(opts.seed),
            opts,
        })
    }

    /// Runs the annealing loop to termination.
    ///
    /// Terminates once the temperature drops below `t_min` or the best
    /// objective has stayed flat for more than `max_stay` outer iterations.
    pub fn run(mut self) -> Result<AnnealOutcome<S>> {
        let mut stay = 0usize;
        loop {
            if !self.opts.silent {
                tracing::debug!(
                    temperature = self.temp,
                    best = self.y_best,
                    stay,
                    "annealing"
                );
            }
            for _ in 0..self.opts.chain_length {
                self.current.perturb(&mut self.rng);
                let y_new = (self.objective)(&mut self.current);
                if y_new.is_nan() {
                    tracing::error!("objective function returned NaN, aborting");
                    return Err(Error::NanObjective);
                }

                // Metropolis
                let df = y_new - self.y_current;
                if df < 0.0 || (-df / self.temp).exp() > self.rng.gen::<f64>() {
                    self.y_current = y_new;
                    if y_new < self.y_best {
                        self.best = self.current.clone();
                        self.y_best = y_new;
                    }
                } else {
                    self.current.revert();
                }
            }

            self.iter_cycle += 1;
            self.cool_down();
            self.history.push(self.y_best);

            let n = self.history.len();
            if isclose(self.history[n - 1], self.history[n - 2]) {
                stay += 1;
            } else {
                stay = 0;
            }

            if self.temp < self.opts.t_min || stay > self.opts.max_stay {
                break;
            }
        }
        tracing::info!(
            best = self.y_best,
            iterations = self.iter_cycle,
            "annealing finished"
        );
        Ok(AnnealOutcome {
            solution: self.best,
            objective: self.y_best,
            history: self.history,
        })
    }

    fn cool_down(&mut self) {
        self.temp = self.opts.t_max / (1.0 + (1.0 + self.iter_cycle as f64).ln());
    }
}

fn isclose(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::max(1e-9 * f64::max(a.abs(), b.abs()), 1e-30)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A counter that can move up or down by one.
    #[derive(Debug, Clone)]
    struct Walk {
        value: i64,
        last_step: Option<i64>,
    }

    impl Perturb for Walk {
        fn perturb(&mut self, rng: &mut StdRng) {
            let step = if rng.gen::<bool>() { 1 } else { -1 };
            self.value += step;
            self.last_step = Some(step);
        }

        fn revert(&mut self) {
            let step = self.last_step.take().expect("no pending perturbation");
            self.value -= step;
        }
    }

    #[test]
    fn rejects_bad_temperature_range() {
        let x = Walk {
            value: 0,
            last_step: None,
        };
        let opts = AnnealOptions {
            t_max: 1e-7,
            t_min: 1.0,
            ..Default::default()
        };
        let err = Annealer::new(|w: &mut Walk| w.value as f64, x, opts)
            .err()
            .expect("expected a temperature error");
        assert!(matches!(err, Error::Temperature { .. }));
    }

    #[test]
    fn rejects_nan_objective() {
        let x = Walk {
            value: 0,
            last_step: None,
        };
        let err = Annealer::new(|_: &mut Walk| f64::NAN, x, AnnealOptions::default())
            .err()
            .expect("expected a NaN error");
        assert!(matches!(err, Error::NanObjective));
    }

    #[test]
    fn minimizes_quadratic_and_history_is_monotone() {
        let x = Walk {
            value: 40,
            last_step: None,
        };
        let opts = AnnealOptions {
            t_max: 10.0,
            t_min: 1e-3,
            chain_length: 50,
            max_stay: 30,
            silent: true,
            seed: 7,
        };
        let outcome = Annealer::new(|w: &mut Walk| (w.value * w.value) as f64, x, opts)
            .unwrap()
            .run()
            .unwrap();
        for pair in outcome.history.windows(2) {
            assert!(pair[1] <= pair[0]);
        }
        assert!(outcome.objective <= 1.0);
        assert_eq!(outcome.objective, (outcome.solution.value.pow(2)) as f64);
    }

    #[test]
    fn terminates_on_stay_counter() {
        // A constant objective can only stop via the stay counter.
        let x = Walk {
            value: 0,
            last_step: None,
        };
        let opts = AnnealOptions {
            t_max: 1.0,
            t_min: 1e-30,
            chain_length: 1,
            max_stay: 5,
            silent: true,
            seed: 0,
        };
        let outcome = Annealer::new(|_: &mut Walk| 1.0, x, opts)
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(outcome.history.len(), 7);
    }
}
