//! Optimisation and design-of-experiments drivers
//!
//! A driver only sees a box of design values and a [`Problem`] that maps a
//! candidate to objective and constraint values. Objectives are always
//! minimised; the routine flips signs for maximisation before they get here.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{self, DriverKind};
use crate::error::{Result, RoutineError};

/// Constraint violations are squared and scaled by this in the merit.
const PENALTY: f64 = 1.0e3;
/// Forward-difference step in normalised coordinates.
const FD_STEP: f64 = 1.0e-4;
const INITIAL_STEP: f64 = 0.25;
const MAX_HALVINGS: usize = 12;
/// Upper limit on the candidates a sampling driver will generate.
pub const MAX_POINTS: usize = 1_000_000;

/// Box the driver searches, one entry per free design variable.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DesignSpace {
    pub names: Vec<String>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub initial: Vec<f64>,
    /// Integer-valued dimensions move in whole units
    pub integer: Vec<bool>,
}

impl DesignSpace {
    pub fn dim(&self) -> usize {
        self.names.len()
    }

    pub fn push(&mut self, name: &str, lower: f64, upper: f64, initial: f64, integer: bool) {
        self.names.push(name.to_string());
        self.lower.push(lower);
        self.upper.push(upper);
        self.initial.push(initial.clamp(lower, upper));
        self.integer.push(integer);
    }

    fn to_unit(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .enumerate()
            .map(|(i, v)| (v - self.lower[i]) / (self.upper[i] - self.lower[i]))
            .collect()
    }

    fn from_unit(&self, u: &[f64]) -> Vec<f64> {
        u.iter()
            .enumerate()
            .map(|(i, t)| self.lower[i] + t.clamp(0.0, 1.0) * (self.upper[i] - self.lower[i]))
            .collect()
    }

    /// Finite-difference step of dimension `i` in normalised coordinates.
    fn fd_step(&self, i: usize) -> f64 {
        if self.integer[i] {
            1.0 / (self.upper[i] - self.lower[i])
        } else {
            FD_STEP
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConstraintSpec {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
}

impl ConstraintSpec {
    /// Distance outside `[lower, upper]`, relative to the bound's magnitude.
    pub fn violation(&self, value: f64) -> f64 {
        if value < self.lower {
            (self.lower - value) / self.lower.abs().max(1.0)
        } else if value > self.upper {
            (value - self.upper) / self.upper.abs().max(1.0)
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub objectives: Vec<f64>,
    pub constraints: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DriverReport {
    pub evaluations: usize,
    pub iterations: usize,
    pub converged: bool,
    pub best_x: Vec<f64>,
    /// Driver-facing (minimised) value of the first objective at `best_x`
    pub best_objective: Option<f64>,
}

pub trait Problem {
    fn evaluate(&mut self, x: &[f64]) -> Result<Evaluation>;
}

pub trait Driver {
    fn name(&self) -> &'static str;

    fn run(
        &mut self,
        space: &DesignSpace,
        constraints: &[ConstraintSpec],
        problem: &mut dyn Problem,
    ) -> Result<DriverReport>;
}

/// Driver for a `[driver]` config section.
pub fn from_config(cfg: &config::Driver) -> Box<dyn Driver> {
    if cfg.run_parallel {
        warn!("run_parallel is ignored, evaluations run sequentially");
    }
    match cfg.kind {
        DriverKind::Gradient => Box::new(GradientDriver {
            max_iter: cfg.max_iter,
            tol: cfg.tol,
        }),
        DriverKind::Uniform => Box::new(SamplingDriver::new(Sampling::Uniform, cfg.samples, cfg.seed)),
        DriverKind::LatinHypercube => {
            Box::new(SamplingDriver::new(Sampling::LatinHypercube, cfg.samples, cfg.seed))
        }
        DriverKind::FullFactorial => {
            Box::new(SamplingDriver::new(Sampling::FullFactorial, cfg.samples, cfg.seed))
        }
    }
}

/// Penalised merit and best-point bookkeeping shared by all drivers.
struct Tracker<'a> {
    constraints: &'a [ConstraintSpec],
    report: DriverReport,
    best_merit: f64,
}

impl<'a> Tracker<'a> {
    fn new(constraints: &'a [ConstraintSpec]) -> Self {
        Self {
            constraints,
            report: DriverReport::default(),
            best_merit: f64::INFINITY,
        }
    }

    fn merit(&self, eval: &Evaluation) -> f64 {
        let objective = eval.objectives.first().copied().unwrap_or(0.0);
        let penalty: f64 = self
            .constraints
            .iter()
            .zip(&eval.constraints)
            .map(|(c, v)| c.violation(*v).powi(2))
            .sum();
        objective + PENALTY * penalty
    }

    fn evaluate(&mut self, problem: &mut dyn Problem, x: &[f64]) -> Result<f64> {
        let eval = problem.evaluate(x)?;
        self.report.evaluations += 1;
        let merit = self.merit(&eval);
        if merit < self.best_merit {
            self.best_merit = merit;
            self.report.best_x = x.to_vec();
            self.report.best_objective = eval.objectives.first().copied();
        }
        Ok(merit)
    }
}

/// Projected finite-difference steepest descent with backtracking.
#[derive(Debug, Clone)]
pub struct GradientDriver {
    pub max_iter: usize,
    pub tol: f64,
}

impl Driver for GradientDriver {
    fn name(&self) -> &'static str {
        "gradient"
    }

    fn run(
        &mut self,
        space: &DesignSpace,
        constraints: &[ConstraintSpec],
        problem: &mut dyn Problem,
    ) -> Result<DriverReport> {
        let mut tracker = Tracker::new(constraints);
        let mut u = space.to_unit(&space.initial);
        let mut f = tracker.evaluate(problem, &space.initial)?;

        if space.dim() == 0 {
            tracker.report.converged = true;
            return Ok(tracker.report);
        }

        for iter in 1..=self.max_iter {
            tracker.report.iterations = iter;

            let mut grad = vec![0.0; space.dim()];
            for i in 0..space.dim() {
                let h = space.fd_step(i);
                // step inwards at the upper face
                let h = if u[i] + h > 1.0 { -h } else { h };
                let mut shifted = u.clone();
                shifted[i] += h;
                let fi = tracker.evaluate(problem, &space.from_unit(&shifted))?;
                grad[i] = (fi - f) / h;
            }

            let norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
            debug!(iter, merit = f, grad_norm = norm, "gradient step");
            if norm < self.tol {
                tracker.report.converged = true;
                break;
            }

            let mut step = INITIAL_STEP;
            let mut accepted = None;
            for _ in 0..MAX_HALVINGS {
                let trial: Vec<f64> = u
                    .iter()
                    .zip(&grad)
                    .map(|(ui, gi)| (ui - step * gi / norm).clamp(0.0, 1.0))
                    .collect();
                if trial == u {
                    break;
                }
                let ft = tracker.evaluate(problem, &space.from_unit(&trial))?;
                if ft < f {
                    accepted = Some((trial, ft));
                    break;
                }
                step *= 0.5;
            }

            match accepted {
                Some((trial, ft)) => {
                    let decrease = f - ft;
                    u = trial;
                    f = ft;
                    if decrease < self.tol * (1.0 + f.abs()) {
                        tracker.report.converged = true;
                        break;
                    }
                }
                None => {
                    // no descent along the projected gradient
                    tracker.report.converged = true;
                    break;
                }
            }
        }

        info!(
            evaluations = tracker.report.evaluations,
            iterations = tracker.report.iterations,
            converged = tracker.report.converged,
            "gradient driver finished"
        );
        Ok(tracker.report)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampling {
    Uniform,
    LatinHypercube,
    /// `samples` levels per dimension
    FullFactorial,
}

#[derive(Debug, Clone)]
pub struct SamplingDriver {
    pub method: Sampling,
    pub samples: usize,
    pub seed: u64,
}

impl SamplingDriver {
    pub fn new(method: Sampling, samples: usize, seed: u64) -> Self {
        Self {
            method,
            samples,
            seed,
        }
    }

    /// Number of candidates this driver generates over `space`.
    pub fn point_count(&self, space: &DesignSpace) -> Result<usize> {
        if space.dim() == 0 {
            return Ok(1);
        }
        let count = match self.method {
            Sampling::Uniform | Sampling::LatinHypercube => Some(self.samples),
            Sampling::FullFactorial => u32::try_from(space.dim())
                .ok()
                .and_then(|d| self.samples.checked_pow(d)),
        };
        match count {
            Some(n) if n <= MAX_POINTS => Ok(n),
            _ => Err(RoutineError::config(format!(
                "{} with {} samples over {} variables exceeds {MAX_POINTS} candidates",
                self.name(),
                self.samples,
                space.dim()
            ))),
        }
    }

    /// Candidate points in the order they are evaluated.
    pub fn points(&self, space: &DesignSpace) -> Result<Vec<Vec<f64>>> {
        let total = self.point_count(space)?;
        if space.dim() == 0 {
            return Ok(vec![Vec::new()]);
        }
        let unit = match self.method {
            Sampling::Uniform => uniform(space.dim(), total, self.seed),
            Sampling::LatinHypercube => latin_hypercube(space.dim(), total, self.seed),
            Sampling::FullFactorial => full_factorial(space.dim(), self.samples, total),
        };
        Ok(unit.iter().map(|u| space.from_unit(u)).collect())
    }
}

impl Driver for SamplingDriver {
    fn name(&self) -> &'static str {
        match self.method {
            Sampling::Uniform => "uniform",
            Sampling::LatinHypercube => "latin_hypercube",
            Sampling::FullFactorial => "full_factorial",
        }
    }

    fn run(
        &mut self,
        space: &DesignSpace,
        constraints: &[ConstraintSpec],
        problem: &mut dyn Problem,
    ) -> Result<DriverReport> {
        let points = self.points(space)?;
        info!(driver = self.name(), points = points.len(), "sampling design space");
        let mut tracker = Tracker::new(constraints);
        for x in &points {
            tracker.evaluate(problem, x)?;
        }
        tracker.report.iterations = points.len();
        tracker.report.converged = true;
        Ok(tracker.report)
    }
}

fn uniform(d: usize, n: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| (0..d).map(|_| rng.gen::<f64>()).collect()).collect()
}

/// One sample per stratum and dimension, strata paired at random.
fn latin_hypercube(d: usize, n: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut strata: Vec<Vec<usize>> = (0..d).map(|_| (0..n).collect()).collect();
    for dim in strata.iter_mut() {
        dim.shuffle(&mut rng);
    }
    (0..n)
        .map(|i| {
            (0..d)
                .map(|j| (strata[j][i] as f64 + rng.gen::<f64>()) / n as f64)
                .collect()
        })
        .collect()
}

/// Every combination of `levels` evenly spaced values; last dimension fastest.
/// `total` is `levels^d`, already checked by the caller.
fn full_factorial(d: usize, levels: usize, total: usize) -> Vec<Vec<f64>> {
    let level = |k: usize| {
        if levels > 1 {
            k as f64 / (levels - 1) as f64
        } else {
            0.0
        }
    };
    (0..total)
        .map(|mut idx| {
            let mut u = vec![0.0; d];
            for slot in u.iter_mut().rev() {
                *slot = level(idx % levels);
                idx /= levels;
            }
            u
        })
        .collect()
}
