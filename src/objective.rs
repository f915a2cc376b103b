//! Objective evaluation
//!
//! Objective strings are compiled once into [`Expr`] trees. Each call to
//! [`ObjectiveEvaluator::evaluate`] closes one iteration: bump the counter,
//! snapshot, refresh the registry from the shared file, evaluate, and move
//! the shared file on to the next run directory.

use tracing::{debug, info};

use crate::adapter::RoutineContext;
use crate::config::Direction;
use crate::error::{Result, RoutineError};
use crate::expr::{Expr, ExprError};

#[derive(Debug, Clone)]
pub struct Objective {
    pub source: String,
    pub expr: Expr,
    pub variables: Vec<String>,
}

/// Objective values of one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveValues {
    /// As the user wrote them
    pub raw: Vec<f64>,
    /// Sign-adjusted for a minimising driver
    pub signed: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct ObjectiveEvaluator {
    objectives: Vec<Objective>,
    direction: Direction,
    save_interval: u64,
}

impl ObjectiveEvaluator {
    pub fn compile(expressions: &[String], direction: Direction, save_interval: u64) -> Result<Self> {
        if expressions.is_empty() {
            return Err(RoutineError::config("at least one objective is required"));
        }
        if save_interval == 0 {
            return Err(RoutineError::config("save interval must be >= 1"));
        }
        let objectives = expressions
            .iter()
            .map(|src| -> Result<Objective> {
                let expr = Expr::parse(src)?;
                let variables = expr.variables();
                Ok(Objective {
                    source: src.clone(),
                    expr,
                    variables,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            objectives,
            direction,
            save_interval,
        })
    }

    pub fn objectives(&self) -> &[Objective] {
        &self.objectives
    }

    /// Every identifier used by any objective, deduplicated.
    pub fn tokens(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for obj in &self.objectives {
            for v in &obj.variables {
                if !out.contains(v) {
                    out.push(v.clone());
                }
            }
        }
        out
    }

    pub fn sign(&self) -> f64 {
        match self.direction {
            Direction::Min => 1.0,
            Direction::Max => -1.0,
        }
    }

    /// Fail fast when an objective names an unregistered variable.
    pub fn check(&self, ctx: &RoutineContext) -> Result<()> {
        for obj in &self.objectives {
            ctx.registry.check_objective(&obj.source, &obj.variables)?;
        }
        Ok(())
    }

    pub fn evaluate(&self, ctx: &mut RoutineContext) -> Result<ObjectiveValues> {
        ctx.counter += 1;
        let n = ctx.counter;

        if n % self.save_interval == 0 {
            ctx.store.copy_to(&ctx.layout.snapshot_path(n))?;
            debug!(iteration = n, "snapshot written");
        }

        ctx.registry.update_from(&ctx.store)?;

        let registry = &ctx.registry;
        let lookup = |name: &str| registry.latest_f64(name);
        let mut raw = Vec::with_capacity(self.objectives.len());
        for obj in &self.objectives {
            let value = obj.expr.eval(&lookup)?;
            if !value.is_finite() {
                return Err(ExprError::NonFinite(obj.source.clone()).into());
            }
            raw.push(value);
        }
        let sign = self.sign();
        let signed = raw.iter().map(|v| sign * v).collect();

        ctx.set_run_dir(n + 1)?;
        info!(iteration = n, objectives = ?raw, "iteration evaluated");
        Ok(ObjectiveValues { raw, signed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::WKDIR_PATH;
    use crate::layout::RoutineLayout;
    use crate::registry::{Role, VariableRegistry};
    use crate::store::{JsonTree, SharedFile};
    use crate::value::Value;

    fn exprs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn context(tmp: &tempfile::TempDir) -> RoutineContext {
        let mut store = JsonTree::new();
        store.set("/cl", &Value::Real(0.5)).unwrap();
        store.set("/cd", &Value::Real(0.025)).unwrap();
        let mut registry = VariableRegistry::new();
        registry.register("cl", Role::Objective, None, "/cl", "/cl").unwrap();
        registry.register("cd", Role::Objective, None, "/cd", "/cd").unwrap();
        let layout = RoutineLayout::at(tmp.path().join("Optim")).unwrap();
        RoutineContext::new(store, registry, layout).unwrap()
    }

    #[test]
    fn tokens_are_deduplicated() {
        let eval = ObjectiveEvaluator::compile(&exprs(&["-cl/cd", "cl*2 + oem"]), Direction::Min, 1).unwrap();
        assert_eq!(eval.tokens(), vec!["cl", "cd", "oem"]);
    }

    #[test]
    fn evaluates_and_signs() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context(&tmp);
        let eval = ObjectiveEvaluator::compile(&exprs(&["cl/cd"]), Direction::Max, 1).unwrap();
        eval.check(&ctx).unwrap();
        let values = eval.evaluate(&mut ctx).unwrap();
        assert!((values.raw[0] - 20.0).abs() < 1e-9);
        assert!((values.signed[0] + 20.0).abs() < 1e-9);
        assert_eq!(ctx.counter, 1);
        assert_eq!(ctx.registry.get("cl").unwrap().history.len(), 1);
        let wkdir = ctx.store.get(WKDIR_PATH).unwrap().to_string();
        assert!(wkdir.ends_with("Run2"));
    }

    #[test]
    fn snapshots_follow_save_interval() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context(&tmp);
        let eval = ObjectiveEvaluator::compile(&exprs(&["cl"]), Direction::Min, 2).unwrap();
        for _ in 0..5 {
            eval.evaluate(&mut ctx).unwrap();
        }
        for n in 1..=5 {
            assert_eq!(ctx.layout.snapshot_path(n).exists(), n % 2 == 0, "iteration {n}");
        }
    }

    #[test]
    fn unknown_objective_variable() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(&tmp);
        let eval = ObjectiveEvaluator::compile(&exprs(&["cl/oem"]), Direction::Min, 1).unwrap();
        assert!(matches!(
            eval.check(&ctx),
            Err(RoutineError::UnknownVariable { ref name, .. }) if name == "oem"
        ));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context(&tmp);
        ctx.store.set("/cd", &Value::Real(0.0)).unwrap();
        let eval = ObjectiveEvaluator::compile(&exprs(&["cl/cd"]), Direction::Min, 1).unwrap();
        assert!(matches!(
            eval.evaluate(&mut ctx),
            Err(RoutineError::Expression(ExprError::DivisionByZero(_)))
        ));
    }

    #[test]
    fn rejects_empty_objectives() {
        assert!(ObjectiveEvaluator::compile(&[], Direction::Min, 1).is_err());
        assert!(ObjectiveEvaluator::compile(&exprs(&["cl"]), Direction::Min, 0).is_err());
    }
}
