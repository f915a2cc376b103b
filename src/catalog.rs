//! Module catalog
//!
//! Each simulation module is described by data: the variables it reads from
//! and writes to the shared file, and how to invoke it. The pipeline is built
//! from these records; there is no per-module code in the orchestrator.

use std::fmt;

use indexmap::IndexMap;

use crate::aero;
use crate::config::{ModuleConfig, PortConfig};
use crate::error::{Result, RoutineError};
use crate::store::SharedFile;
use crate::value::Value;
use crate::weight;

/// In-process module body.
pub type BuiltinFn = fn(&mut dyn SharedFile) -> Result<()>;

#[derive(Clone)]
pub enum Invocation {
    /// Closed-form module run directly on the shared file.
    Builtin(BuiltinFn),
    /// External program, called as `program args... <input> <output>`.
    Command { program: String, args: Vec<String> },
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocation::Builtin(_) => write!(f, "Builtin"),
            Invocation::Command { program, args } => f
                .debug_struct("Command")
                .field("program", program)
                .field("args", args)
                .finish(),
        }
    }
}

/// One declared input or output of a module.
#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    pub var_name: String,
    pub path: String,
    pub unit: String,
    pub descr: String,
    pub default: Option<Value>,
}

impl From<&PortConfig> for Port {
    fn from(p: &PortConfig) -> Self {
        Self {
            var_name: p.var_name.clone(),
            path: p.path.clone(),
            unit: p.unit.clone(),
            descr: p.descr.clone(),
            default: p.default.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModuleSpec {
    pub name: String,
    pub description: String,
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
    pub invocation: Invocation,
}

impl ModuleSpec {
    pub fn new(name: &str, description: &str, invocation: Invocation) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            invocation,
        }
    }

    fn port(var_name: &str, path: &str, unit: &str, descr: &str) -> Port {
        Port {
            var_name: var_name.to_string(),
            path: path.to_string(),
            unit: unit.to_string(),
            descr: descr.to_string(),
            default: None,
        }
    }

    pub fn add_input(mut self, var_name: &str, path: &str, unit: &str, descr: &str) -> Self {
        self.inputs.push(Self::port(var_name, path, unit, descr));
        self
    }

    pub fn add_output(mut self, var_name: &str, path: &str, unit: &str, descr: &str) -> Self {
        self.outputs.push(Self::port(var_name, path, unit, descr));
        self
    }

    pub fn input(&self, var_name: &str) -> Option<&Port> {
        self.inputs.iter().find(|p| p.var_name == var_name)
    }

    pub fn output(&self, var_name: &str) -> Option<&Port> {
        self.outputs.iter().find(|p| p.var_name == var_name)
    }

    /// Port declaring `var_name`, inputs first.
    pub fn declares(&self, var_name: &str) -> Option<&Port> {
        self.input(var_name).or_else(|| self.output(var_name))
    }

    pub fn from_config(cfg: &ModuleConfig) -> Self {
        let (program, args) = match cfg.command.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => (String::new(), Vec::new()),
        };
        Self {
            name: cfg.name.clone(),
            description: cfg.description.clone(),
            inputs: cfg.inputs.iter().map(Port::from).collect(),
            outputs: cfg.outputs.iter().map(Port::from).collect(),
            invocation: Invocation::Command { program, args },
        }
    }
}

pub fn weight_estimator() -> ModuleSpec {
    ModuleSpec::new(
        "WeightEstimator",
        "Operating empty mass from maximum take-off mass (Raymer)",
        Invocation::Builtin(weight::run),
    )
    .add_input("mtom", weight::MTOM_PATH, "kg", "Maximum take-off mass")
    .add_input("fuselage_length", weight::FUSELAGE_LENGTH_PATH, "m", "Fuselage length")
    .add_input("fuselage_width", weight::FUSELAGE_WIDTH_PATH, "m", "Fuselage width")
    .add_input("wing_area", weight::WING_AREA_PATH, "m^2", "Reference wing area")
    .add_input("wing_span", weight::WING_SPAN_PATH, "m", "Wing span")
    .add_input("turboprop", weight::TURBOPROP_PATH, "-", "True for turboprop engines")
    .add_output("oem", weight::OEM_PATH, "kg", "Operating empty mass")
}

pub fn aero_solver() -> ModuleSpec {
    ModuleSpec::new(
        "AeroSolver",
        "Cruise lift and drag coefficients from a parabolic polar",
        Invocation::Builtin(aero::run),
    )
    .add_input("mtom", weight::MTOM_PATH, "kg", "Maximum take-off mass")
    .add_input("wing_area", weight::WING_AREA_PATH, "m^2", "Reference wing area")
    .add_input("wing_span", weight::WING_SPAN_PATH, "m", "Wing span")
    .add_input("altitude", aero::ALTITUDE_PATH, "m", "Cruise altitude")
    .add_input("mach", aero::MACH_PATH, "-", "Cruise Mach number")
    .add_output("cl", aero::CL_PATH, "-", "Lift coefficient")
    .add_output("cd", aero::CD_PATH, "-", "Drag coefficient")
}

#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    specs: IndexMap<String, ModuleSpec>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in closed-form modules.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.insert(weight_estimator());
        catalog.insert(aero_solver());
        catalog
    }

    /// Built-ins plus modules declared in a routine file; declared modules
    /// replace built-ins of the same name.
    pub fn with_config(modules: &[ModuleConfig]) -> Self {
        let mut catalog = Self::builtin();
        for m in modules {
            catalog.insert(ModuleSpec::from_config(m));
        }
        catalog
    }

    pub fn insert(&mut self, spec: ModuleSpec) {
        self.specs.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name: &str) -> Result<&ModuleSpec> {
        self.specs
            .get(name)
            .ok_or_else(|| RoutineError::UnknownModule(name.to_string()))
    }

    /// Specs for `names`, in the given order.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<ModuleSpec>> {
        names.iter().map(|n| self.get(n).cloned()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleSpec> {
        self.specs.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog() {
        let catalog = ModuleCatalog::builtin();
        let names: Vec<&str> = catalog.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["WeightEstimator", "AeroSolver"]);
        let aero = catalog.get("AeroSolver").unwrap();
        assert!(aero.output("cl").is_some());
        assert!(aero.input("cl").is_none());
        assert_eq!(aero.declares("wing_area").unwrap().path, weight::WING_AREA_PATH);
    }

    #[test]
    fn unknown_module() {
        let catalog = ModuleCatalog::builtin();
        assert!(matches!(
            catalog.get("SU2Run"),
            Err(RoutineError::UnknownModule(_))
        ));
    }

    #[test]
    fn resolve_keeps_order() {
        let catalog = ModuleCatalog::builtin();
        let specs = catalog
            .resolve(&["AeroSolver".to_string(), "WeightEstimator".to_string()])
            .unwrap();
        assert_eq!(specs[0].name, "AeroSolver");
        assert_eq!(specs[1].name, "WeightEstimator");
    }

    #[test]
    fn config_module_shadows_builtin() {
        let cfg = ModuleConfig {
            name: "AeroSolver".to_string(),
            description: "external vortex lattice".to_string(),
            command: vec!["vlm".to_string(), "--quiet".to_string()],
            inputs: Vec::new(),
            outputs: vec![PortConfig {
                var_name: "cl".to_string(),
                path: "/results/cl".to_string(),
                unit: String::new(),
                descr: String::new(),
                default: None,
            }],
        };
        let catalog = ModuleCatalog::with_config(&[cfg]);
        let spec = catalog.get("AeroSolver").unwrap();
        match &spec.invocation {
            Invocation::Command { program, args } => {
                assert_eq!(program, "vlm");
                assert_eq!(args, &vec!["--quiet".to_string()]);
            }
            Invocation::Builtin(_) => panic!("expected command module"),
        }
        assert_eq!(spec.output("cl").unwrap().path, "/results/cl");
    }
}
