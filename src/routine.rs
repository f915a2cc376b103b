//! Routine orchestration
//!
//! A [`Routine`] is configured once from a routine file, then handed a
//! [`Driver`]. Every candidate the driver proposes runs the geometry step,
//! the module pipeline in order and the objective evaluator, and is recorded
//! as a case. Artifacts are exported when the driver finishes; on failure the
//! cases recorded so far are flushed and the error propagates.

use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::adapter::{Candidate, GeometryAdapter, ModuleAdapter, RoutineContext};
use crate::catalog::{ModuleCatalog, ModuleSpec};
use crate::config;
use crate::driver::{ConstraintSpec, DesignSpace, Driver, DriverReport, Evaluation, Problem};
use crate::error::{Result, RoutineError};
use crate::history::{Case, CaseRecorder, HistoryTable};
use crate::layout::RoutineLayout;
use crate::objective::ObjectiveEvaluator;
use crate::plot;
use crate::registry::{Role, VariableRegistry};
use crate::store::{JsonTree, SharedFile};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RoutineState {
    Configuring,
    Running,
    Completed,
    Failed,
}

/// What a finished routine produced.
#[derive(Debug, Clone, Serialize)]
pub struct RoutineOutcome {
    pub root: PathBuf,
    pub evaluations: usize,
    pub report: DriverReport,
    pub artifacts: Vec<PathBuf>,
    #[serde(skip)]
    pub history: HistoryTable,
}

#[derive(Debug)]
pub struct Routine {
    name: String,
    sampling: bool,
    state: RoutineState,
    ctx: RoutineContext,
    geometry: GeometryAdapter,
    modules: Vec<ModuleAdapter>,
    evaluator: ObjectiveEvaluator,
    recorder: CaseRecorder,
    space: DesignSpace,
    constraints: Vec<ConstraintSpec>,
    /// Every constraint-role variable, recorded whether bounded or not
    recorded_constraints: Vec<String>,
}

/// Load the initial shared file named in the routine section.
pub fn load_shared_file(cfg: &config::Routine) -> Result<JsonTree> {
    match &cfg.shared_file {
        Some(path) => JsonTree::load(path),
        None => {
            warn!("no shared_file given, starting from an empty document");
            Ok(JsonTree::new())
        }
    }
}

/// Registry a routine file would produce, without creating any directory.
pub fn preview_registry(cfg: &config::Root, catalog: &ModuleCatalog) -> Result<VariableRegistry> {
    let store = load_shared_file(&cfg.routine)?;
    let pipeline = catalog.resolve(&cfg.routine.modules)?;
    let evaluator = ObjectiveEvaluator::compile(&cfg.routine.objectives, cfg.routine.direction, cfg.routine.save_interval)?;
    let registry = VariableRegistry::build(&cfg.variables, &pipeline, &evaluator.tokens(), &store)?;
    for obj in evaluator.objectives() {
        registry.check_objective(&obj.source, &obj.variables)?;
    }
    check_design_consumed(&registry, &pipeline)?;
    Ok(registry)
}

/// A design variable nobody reads would be varied without effect.
fn check_design_consumed(registry: &VariableRegistry, pipeline: &[ModuleSpec]) -> Result<()> {
    for entry in registry.with_role(Role::Design) {
        let consumed = entry.geometry || pipeline.iter().any(|m| m.input(&entry.name).is_some());
        if !consumed {
            return Err(RoutineError::config(format!(
                "design variable '{}' is neither a geometry parameter nor an input of any module in the routine",
                entry.name
            )));
        }
    }
    Ok(())
}

fn design_space(registry: &VariableRegistry) -> Result<DesignSpace> {
    let mut space = DesignSpace::default();
    for entry in registry.with_role(Role::Design).filter(|e| e.is_free_design()) {
        let Some((lo, hi)) = entry.bounds.range() else {
            continue;
        };
        if !lo.is_finite() || !hi.is_finite() || lo >= hi {
            return Err(RoutineError::config(format!(
                "design variable '{}' needs finite bounds with lower < upper, got [{lo}, {hi}]",
                entry.name
            )));
        }
        let initial = entry.initial().and_then(Value::as_f64).unwrap_or(lo);
        let integer = matches!(entry.initial(), Some(Value::Int(_)));
        space.push(&entry.name, lo, hi, initial, integer);
    }
    Ok(space)
}

impl Routine {
    pub fn configure(cfg: &config::Root, catalog: &ModuleCatalog, layout: RoutineLayout) -> Result<Self> {
        info!(routine = %cfg.routine.name, state = ?RoutineState::Configuring, "routine state");

        let mut store = load_shared_file(&cfg.routine)?;
        let pipeline = catalog.resolve(&cfg.routine.modules)?;
        let evaluator = ObjectiveEvaluator::compile(
            &cfg.routine.objectives,
            cfg.routine.direction,
            cfg.routine.save_interval,
        )?;
        let registry = VariableRegistry::build(&cfg.variables, &pipeline, &evaluator.tokens(), &store)?;
        check_design_consumed(&registry, &pipeline)?;

        for entry in registry.with_role(Role::Design) {
            if let Some(value) = entry.initial() {
                store.set(&entry.write_path, value)?;
            }
        }
        registry.write_library(&layout.library_csv())?;

        let space = design_space(&registry)?;
        let mut constraints = Vec::new();
        let mut recorded_constraints = Vec::new();
        for entry in registry.with_role(Role::Constraint) {
            recorded_constraints.push(entry.name.clone());
            if let Some((lower, upper)) = entry.bounds.range() {
                constraints.push(ConstraintSpec {
                    name: entry.name.clone(),
                    lower,
                    upper,
                });
            }
        }
        let geometry = GeometryAdapter::new(
            registry
                .with_role(Role::Design)
                .filter(|e| e.geometry)
                .map(|e| e.name.clone())
                .collect(),
        );

        let ctx = RoutineContext::new(store, registry, layout)?;
        evaluator.check(&ctx)?;
        let modules = ModuleAdapter::pipeline(pipeline);

        info!(
            pipeline = ?modules.iter().map(ModuleAdapter::name).collect::<Vec<_>>(),
            variables = ctx.registry.len(),
            design = space.dim(),
            constraints = constraints.len(),
            objectives = evaluator.objectives().len(),
            "routine configured"
        );

        Ok(Self {
            name: cfg.routine.name.clone(),
            sampling: cfg.driver.kind.is_sampling(),
            state: RoutineState::Configuring,
            ctx,
            geometry,
            modules,
            evaluator,
            recorder: CaseRecorder::new(),
            space,
            constraints,
            recorded_constraints,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RoutineState {
        self.state
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.ctx.registry
    }

    pub fn layout(&self) -> &RoutineLayout {
        &self.ctx.layout
    }

    pub fn space(&self) -> &DesignSpace {
        &self.space
    }

    pub fn constraints(&self) -> &[ConstraintSpec] {
        &self.constraints
    }

    pub fn cases(&self) -> &[Case] {
        self.recorder.cases()
    }

    pub fn geometry(&self) -> &GeometryAdapter {
        &self.geometry
    }

    fn transition(&mut self, next: RoutineState) {
        info!(routine = %self.name, from = ?self.state, to = ?next, "routine state");
        self.state = next;
    }

    pub fn run(&mut self, driver: &mut dyn Driver) -> Result<RoutineOutcome> {
        if self.state != RoutineState::Configuring {
            return Err(RoutineError::config(format!(
                "routine '{}' already ran (state {:?})",
                self.name, self.state
            )));
        }
        self.transition(RoutineState::Running);
        info!(driver = driver.name(), "driver started");

        let mut problem = Evaluate {
            ctx: &mut self.ctx,
            geometry: &mut self.geometry,
            modules: &self.modules,
            evaluator: &self.evaluator,
            recorder: &mut self.recorder,
            names: &self.space.names,
            constraints: &self.constraints,
            recorded_constraints: &self.recorded_constraints,
        };
        let result = driver.run(&self.space, &self.constraints, &mut problem);

        match result.and_then(|report| self.finish(report)) {
            Ok(outcome) => {
                self.transition(RoutineState::Completed);
                Ok(outcome)
            }
            Err(e) => {
                error!(err = %e, cases = self.recorder.len(), "routine failed");
                if self.recorder.is_empty() {
                    warn!("no case completed before the failure");
                }
                if let Err(flush) = self.recorder.save_json(&self.ctx.layout.cases_json()) {
                    error!(err = %flush, "could not flush recorded cases");
                }
                self.transition(RoutineState::Failed);
                Err(e)
            }
        }
    }

    fn finish(&mut self, report: DriverReport) -> Result<RoutineOutcome> {
        let layout = &self.ctx.layout;
        let objectives: Vec<String> = self.evaluator.objectives().iter().map(|o| o.source.clone()).collect();
        let history = HistoryTable::from_cases(
            &objectives,
            &self.space.names,
            &self.recorded_constraints,
            self.recorder.cases(),
        );

        let mut artifacts = vec![layout.library_csv()];
        history.write_csv(&layout.history_csv())?;
        artifacts.push(layout.history_csv());
        self.recorder.save_json(&layout.cases_json())?;
        artifacts.push(layout.cases_json());

        let registry_json = serde_json::to_string_pretty(&self.ctx.registry)
            .map_err(|e| RoutineError::History(e.to_string()))?;
        fs::write(layout.registry_json(), registry_json).map_err(|e| RoutineError::io(layout.registry_json(), e))?;
        artifacts.push(layout.registry_json());

        artifacts.extend(plot::write_plots(&history, layout.root(), self.sampling)?);

        info!(
            evaluations = report.evaluations,
            converged = report.converged,
            root = %layout.root().display(),
            "routine artifacts written"
        );
        Ok(RoutineOutcome {
            root: layout.root().to_path_buf(),
            evaluations: self.recorder.len(),
            report,
            artifacts,
            history,
        })
    }
}

/// One evaluation of the pipeline, as the driver sees it.
struct Evaluate<'a> {
    ctx: &'a mut RoutineContext,
    geometry: &'a mut GeometryAdapter,
    modules: &'a [ModuleAdapter],
    evaluator: &'a ObjectiveEvaluator,
    recorder: &'a mut CaseRecorder,
    names: &'a [String],
    constraints: &'a [ConstraintSpec],
    recorded_constraints: &'a [String],
}

impl Evaluate<'_> {
    /// Value of `name` as the shared file holds it right now.
    fn current(&self, name: &str) -> Option<f64> {
        let entry = self.ctx.registry.get(name)?;
        self.ctx.store.get(&entry.read_path).as_ref().and_then(Value::as_f64)
    }
}

impl Problem for Evaluate<'_> {
    fn evaluate(&mut self, x: &[f64]) -> Result<Evaluation> {
        let candidate: Candidate = self.names.iter().cloned().zip(x.iter().copied()).collect();

        self.geometry.apply(self.ctx, &candidate)?;
        for module in self.modules {
            module.run(self.ctx, &candidate)?;
        }
        let values = self.evaluator.evaluate(self.ctx)?;

        let design = self
            .names
            .iter()
            .map(|n| (n.clone(), self.ctx.registry.latest_f64(n).unwrap_or(f64::NAN)))
            .collect();
        let recorded = self
            .recorded_constraints
            .iter()
            .map(|n| (n.clone(), self.current(n)))
            .collect();
        let constraints = self
            .constraints
            .iter()
            .map(|c| self.current(&c.name).unwrap_or(f64::NAN))
            .collect();
        let objectives = self
            .evaluator
            .objectives()
            .iter()
            .zip(&values.raw)
            .map(|(o, v)| (o.source.clone(), *v))
            .collect();

        self.recorder.record(Case {
            index: self.recorder.len(),
            design,
            constraints: recorded,
            objectives,
        });

        Ok(Evaluation {
            objectives: values.signed,
            constraints,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Root;

    const ROUTINE: &str = r#"
[routine]
modules = ["WeightEstimator", "AeroSolver"]
objectives = ["-cl/cd"]

[driver]
kind = "full_factorial"
samples = 2

[[variables]]
name = "wing_area"
initial = 40

[[variables]]
name = "mtom"
initial = 20000.0

[[variables]]
name = "oem"
"#;

    fn seeded(tmp: &tempfile::TempDir) -> PathBuf {
        let mut file = JsonTree::new();
        for (path, value) in [
            (crate::weight::FUSELAGE_LENGTH_PATH, Value::Real(25.0)),
            (crate::weight::FUSELAGE_WIDTH_PATH, Value::Real(2.8)),
            (crate::weight::WING_SPAN_PATH, Value::Real(27.0)),
            (crate::weight::TURBOPROP_PATH, Value::Bool(true)),
            (crate::aero::ALTITUDE_PATH, Value::Real(7000.0)),
            (crate::aero::MACH_PATH, Value::Real(0.5)),
        ] {
            file.set(path, &value).unwrap();
        }
        let path = tmp.path().join("aircraft.json");
        file.save(&path).unwrap();
        path
    }

    fn config(tmp: &tempfile::TempDir, text: &str) -> Root {
        let mut cfg: Root = toml::from_str(text).unwrap();
        cfg.routine.shared_file = Some(seeded(tmp));
        cfg.validate().unwrap();
        cfg
    }

    #[test]
    fn configure_derives_space_and_constraints() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(&tmp, ROUTINE);
        let layout = RoutineLayout::at(tmp.path().join("DoE")).unwrap();
        let routine = Routine::configure(&cfg, &ModuleCatalog::builtin(), layout).unwrap();
        assert_eq!(routine.state(), RoutineState::Configuring);
        assert_eq!(routine.space().names, vec!["wing_area", "mtom"]);
        assert_eq!(routine.space().lower, vec![32.0, 16000.0]);
        assert!(routine.space().integer[0]);
        // oem has no initial value: recorded but not bounded
        assert!(routine.constraints().is_empty());
        assert!(routine.layout().library_csv().is_file());
    }

    #[test]
    fn full_run_exports_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(&tmp, ROUTINE);
        let layout = RoutineLayout::at(tmp.path().join("DoE")).unwrap();
        let mut routine = Routine::configure(&cfg, &ModuleCatalog::builtin(), layout).unwrap();
        let mut driver = crate::driver::from_config(&cfg.driver);
        let outcome = routine.run(driver.as_mut()).unwrap();

        assert_eq!(routine.state(), RoutineState::Completed);
        assert_eq!(outcome.evaluations, 4);
        let oem = outcome.history.row("oem").unwrap();
        assert_eq!(oem.role, Role::Constraint);
        assert!(oem.values.iter().all(Option::is_some));
        for file in ["Variable_history.csv", "cases.json", "variable_history.json", "history.svg", "scatter_des.svg"] {
            assert!(outcome.root.join(file).is_file(), "{file}");
        }
        assert!(routine.run(driver.as_mut()).is_err());
    }

    #[test]
    fn unused_design_variable_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let text = format!(
            "{ROUTINE}\n[[variables]]\nname = \"sweep\"\ninitial = 25.0\nread_path = \"/aircraft/model/wings/wing/sweep\"\n"
        );
        let cfg = config(&tmp, &text);
        let layout = RoutineLayout::at(tmp.path().join("DoE")).unwrap();
        let err = Routine::configure(&cfg, &ModuleCatalog::builtin(), layout).unwrap_err();
        assert!(err.to_string().contains("sweep"));
    }

    #[test]
    fn preview_matches_configuration() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(&tmp, ROUTINE);
        let registry = preview_registry(&cfg, &ModuleCatalog::builtin()).unwrap();
        let names: Vec<&str> = registry.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["wing_area", "mtom", "oem", "cl", "cd"]);
    }
}
