//! Pipeline adapters
//!
//! A [`RoutineContext`] owns everything an evaluation mutates: the shared
//! file, the registry, the iteration counter and the stage pointer. Adapters
//! borrow it mutably one at a time, in pipeline order, so the shared file is
//! never touched by two adapters at once.

use std::fs;
use std::path::PathBuf;

use indexmap::IndexMap;
use tracing::{debug, error, info, instrument};

use crate::catalog::{Invocation, ModuleSpec};
use crate::error::{Result, RoutineError};
use crate::layout::RoutineLayout;
use crate::process::run_module_command;
use crate::registry::VariableRegistry;
use crate::store::{JsonTree, SharedFile};
use crate::value::Value;

/// Where the current evaluation's working directory is recorded.
pub const WKDIR_PATH: &str = "/settings/workdir";

/// Design values supplied by the driver for one evaluation.
pub type Candidate = IndexMap<String, f64>;

#[derive(Debug)]
pub struct RoutineContext {
    pub store: JsonTree,
    pub registry: VariableRegistry,
    pub layout: RoutineLayout,
    /// Completed evaluations
    pub counter: u64,
    /// Index of the module whose input the shared file currently is
    pub stage: usize,
    pub run_dir: PathBuf,
}

impl RoutineContext {
    pub fn new(store: JsonTree, registry: VariableRegistry, layout: RoutineLayout) -> Result<Self> {
        let mut ctx = Self {
            store,
            registry,
            run_dir: layout.run_dir(1),
            layout,
            counter: 0,
            stage: 0,
        };
        ctx.set_run_dir(1)?;
        Ok(ctx)
    }

    /// Point the shared file at the working directory of evaluation `n`.
    pub fn set_run_dir(&mut self, n: u64) -> Result<()> {
        self.run_dir = self.layout.run_dir(n);
        let text = self.run_dir.display().to_string();
        self.store.set(WKDIR_PATH, &Value::Str(text))
    }

    /// Write a driver value for `name`, keeping the variable's value kind.
    fn write_candidate(&mut self, name: &str, x: f64) -> Result<Value> {
        let entry = self
            .registry
            .get(name)
            .ok_or_else(|| RoutineError::config(format!("variable '{name}' is not registered")))?;
        let value = match entry.latest() {
            Some(template) => template.with_kind_of(x),
            None => Value::Real(x),
        };
        let path = entry.write_path.clone();
        self.store.set(&path, &value)?;
        Ok(value)
    }
}

/// One simulation module in the pipeline.
#[derive(Debug, Clone)]
pub struct ModuleAdapter {
    spec: ModuleSpec,
    position: usize,
    count: usize,
}

impl ModuleAdapter {
    pub fn new(spec: ModuleSpec, position: usize, count: usize) -> Self {
        Self {
            spec,
            position,
            count,
        }
    }

    /// Adapters for `specs`, in execution order.
    pub fn pipeline(specs: Vec<ModuleSpec>) -> Vec<ModuleAdapter> {
        let count = specs.len();
        specs
            .into_iter()
            .enumerate()
            .map(|(i, spec)| ModuleAdapter::new(spec, i, count))
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Write inputs, invoke the module, read registered outputs back.
    #[instrument(skip_all, fields(module = %self.spec.name))]
    pub fn run(&self, ctx: &mut RoutineContext, candidate: &Candidate) -> Result<IndexMap<String, Value>> {
        for port in &self.spec.inputs {
            if let Some(&x) = candidate.get(&port.var_name) {
                let value = ctx.write_candidate(&port.var_name, x)?;
                debug!(var = %port.var_name, %value, "input written");
            }
        }

        self.invoke(ctx)?;

        let mut outputs = IndexMap::new();
        for port in &self.spec.outputs {
            let Some(entry) = ctx.registry.get(&port.var_name) else {
                continue;
            };
            let value = ctx.store.get(&entry.read_path).ok_or_else(|| RoutineError::MissingOutput {
                module: self.spec.name.clone(),
                name: port.var_name.clone(),
                path: entry.read_path.clone(),
            })?;
            debug!(var = %port.var_name, %value, "output read");
            outputs.insert(port.var_name.clone(), value);
        }

        ctx.stage = (self.position + 1) % self.count.max(1);
        Ok(outputs)
    }

    fn invoke(&self, ctx: &mut RoutineContext) -> Result<()> {
        match &self.spec.invocation {
            Invocation::Builtin(run) => run(&mut ctx.store),
            Invocation::Command { program, args } => {
                let dir = ctx.run_dir.join(&self.spec.name);
                fs::create_dir_all(&dir).map_err(|e| RoutineError::io(&dir, e))?;
                let input = dir.join("ToolInput.json");
                let output = dir.join("ToolOutput.json");
                ctx.store.save(&input)?;

                let out = run_module_command(program, args, &input, &output, &ctx.run_dir)?;
                let log = dir.join("stdout.log");
                fs::write(&log, &out.stdout).map_err(|e| RoutineError::io(&log, e))?;
                if !out.status.success() {
                    error!(status = ?out.status.code(), "module failed");
                    return Err(RoutineError::ModuleFailed {
                        module: self.spec.name.clone(),
                        status: out.status.code(),
                        stderr: out.stderr_tail(),
                    });
                }
                ctx.store = JsonTree::load(&output)?;
                Ok(())
            }
        }
    }
}

/// Applies geometry parameters to the shared file ahead of the first module.
#[derive(Debug, Clone, Default)]
pub struct GeometryAdapter {
    params: Vec<String>,
    applied: Vec<IndexMap<String, Value>>,
}

impl GeometryAdapter {
    pub fn new(params: Vec<String>) -> Self {
        Self {
            params,
            applied: Vec::new(),
        }
    }

    /// Parameter sets applied so far, one per evaluation.
    pub fn applied(&self) -> &[IndexMap<String, Value>] {
        &self.applied
    }

    pub fn apply(&mut self, ctx: &mut RoutineContext, candidate: &Candidate) -> Result<()> {
        let mut set = IndexMap::new();
        for name in &self.params {
            if let Some(&x) = candidate.get(name) {
                let value = ctx.write_candidate(name, x)?;
                set.insert(name.clone(), value);
            }
        }
        if !set.is_empty() {
            info!(params = set.len(), "geometry updated");
        }
        self.applied.push(set);
        ctx.store.save(&ctx.run_dir.join("Geometry.json"))?;
        ctx.stage = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{aero_solver, ModuleSpec};
    use crate::registry::Role;
    use crate::weight::{MTOM_PATH, WING_AREA_PATH, WING_SPAN_PATH};

    fn context(tmp: &tempfile::TempDir) -> RoutineContext {
        context_at(tmp.path().join("Optim"))
    }

    fn context_at(root: std::path::PathBuf) -> RoutineContext {
        let mut store = JsonTree::new();
        store.set(MTOM_PATH, &Value::Real(20_000.0)).unwrap();
        store.set(WING_AREA_PATH, &Value::Int(40)).unwrap();
        store.set(WING_SPAN_PATH, &Value::Real(20.0)).unwrap();
        store.set(crate::aero::ALTITUDE_PATH, &Value::Real(8000.0)).unwrap();
        store.set(crate::aero::MACH_PATH, &Value::Real(0.6)).unwrap();
        let mut registry = VariableRegistry::new();
        registry
            .register("wing_area", Role::Design, Some(Value::Int(40)), WING_AREA_PATH, WING_AREA_PATH)
            .unwrap();
        registry
            .register("cl", Role::Objective, None, crate::aero::CL_PATH, crate::aero::CL_PATH)
            .unwrap();
        let layout = RoutineLayout::at(root).unwrap();
        RoutineContext::new(store, registry, layout).unwrap()
    }

    #[test]
    fn builtin_module_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context(&tmp);
        let adapters = ModuleAdapter::pipeline(vec![aero_solver()]);
        let mut candidate = Candidate::new();
        candidate.insert("wing_area".to_string(), 44.4);

        let outputs = adapters[0].run(&mut ctx, &candidate).unwrap();
        assert_eq!(ctx.store.get(WING_AREA_PATH), Some(Value::Int(44)));
        assert!(outputs.contains_key("cl"));
        assert!(!outputs.contains_key("cd"));
        assert_eq!(ctx.stage, 0);
    }

    #[test]
    fn missing_output_is_reported() {
        fn noop(_: &mut dyn SharedFile) -> Result<()> {
            Ok(())
        }
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context(&tmp);
        let spec = ModuleSpec::new("Dummy", "", Invocation::Builtin(noop)).add_output(
            "cl",
            crate::aero::CL_PATH,
            "-",
            "",
        );
        let adapters = ModuleAdapter::pipeline(vec![spec, aero_solver()]);
        let err = adapters[0].run(&mut ctx, &Candidate::new()).unwrap_err();
        assert!(matches!(err, RoutineError::MissingOutput { .. }));
    }

    #[test]
    fn stage_pointer_advances() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context(&tmp);
        let adapters = ModuleAdapter::pipeline(vec![aero_solver(), aero_solver()]);
        adapters[0].run(&mut ctx, &Candidate::new()).unwrap();
        assert_eq!(ctx.stage, 1);
        adapters[1].run(&mut ctx, &Candidate::new()).unwrap();
        assert_eq!(ctx.stage, 0);
    }

    #[test]
    fn geometry_adapter_records_applied_params() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context(&tmp);
        let mut geom = GeometryAdapter::new(vec!["wing_area".to_string()]);
        let mut candidate = Candidate::new();
        candidate.insert("wing_area".to_string(), 36.0);
        geom.apply(&mut ctx, &candidate).unwrap();
        assert_eq!(geom.applied().len(), 1);
        assert_eq!(geom.applied()[0]["wing_area"], Value::Int(36));
        assert!(ctx.run_dir.join("Geometry.json").is_file());
        assert_eq!(ctx.store.get(WKDIR_PATH), Some(Value::Str(ctx.run_dir.display().to_string())));
    }

    /// Copies its input to its output: outputs are whatever the input held.
    #[cfg(unix)]
    fn copier() -> ModuleSpec {
        ModuleSpec::new(
            "Copier",
            "",
            Invocation::Command {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "cp \"$1\" \"$2\"".to_string(), "copier".to_string()],
            },
        )
        .add_input("wing_area", WING_AREA_PATH, "m^2", "")
    }

    #[cfg(unix)]
    #[test]
    fn command_module_exchanges_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context(&tmp);
        let adapters = ModuleAdapter::pipeline(vec![copier()]);
        let mut candidate = Candidate::new();
        candidate.insert("wing_area".to_string(), 47.0);
        adapters[0].run(&mut ctx, &candidate).unwrap();
        assert_eq!(ctx.store.get(WING_AREA_PATH), Some(Value::Int(47)));
        assert!(ctx.run_dir.join("Copier/ToolOutput.json").is_file());
        assert!(ctx.run_dir.join("Copier/stdout.log").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn command_module_under_relative_routine_dir() {
        let cwd = std::env::current_dir().unwrap();
        let tmp = tempfile::tempdir_in(&cwd).unwrap();
        let relative = tmp.path().strip_prefix(&cwd).unwrap().join("routines/Routine_x/Optim");
        let mut ctx = context_at(relative);
        let adapters = ModuleAdapter::pipeline(vec![copier()]);
        let mut candidate = Candidate::new();
        candidate.insert("wing_area".to_string(), 38.0);
        adapters[0].run(&mut ctx, &candidate).unwrap();
        assert_eq!(ctx.store.get(WING_AREA_PATH), Some(Value::Int(38)));
        assert!(ctx.run_dir.is_absolute());
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_module() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context(&tmp);
        let spec = ModuleSpec::new(
            "Broken",
            "",
            Invocation::Command {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "echo diverged >&2; exit 1".to_string()],
            },
        );
        let adapters = ModuleAdapter::pipeline(vec![spec]);
        let err = adapters[0].run(&mut ctx, &Candidate::new()).unwrap_err();
        match err {
            RoutineError::ModuleFailed { module, status, stderr } => {
                assert_eq!(module, "Broken");
                assert_eq!(status, Some(1));
                assert_eq!(stderr, "diverged");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
