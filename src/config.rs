use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::expr::Expr;
use crate::value::Value;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Root {
    pub routine: Routine,
    pub driver: Driver,
    #[serde(default)]
    pub variables: Vec<VariableConfig>,
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Routine {
    #[serde(default = "default_name")]
    pub name: String,
    /// Modules in execution order
    pub modules: Vec<String>,
    /// Objective expressions over variable names
    pub objectives: Vec<String>,
    #[serde(default)]
    pub direction: Direction,
    /// Snapshot the shared file every N evaluations
    #[serde(default = "default_save_interval")]
    pub save_interval: u64,
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// Initial aircraft file (JSON); empty document when absent
    pub shared_file: Option<PathBuf>,
}

fn default_name() -> String {
    "routine".to_string()
}

fn default_save_interval() -> u64 { 1 }

fn default_working_dir() -> PathBuf {
    PathBuf::from("routines")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    #[serde(alias = "minimize", alias = "minimise")]
    Min,
    #[serde(alias = "maximize", alias = "maximise")]
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// Projected finite-difference gradient descent
    Gradient,
    Uniform,
    LatinHypercube,
    FullFactorial,
}

impl DriverKind {
    pub fn is_sampling(&self) -> bool {
        !matches!(self, DriverKind::Gradient)
    }

    /// Routine family, also the routine directory name.
    pub fn routine_type(&self) -> &'static str {
        if self.is_sampling() {
            "DoE"
        } else {
            "Optim"
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Driver {
    pub kind: DriverKind,
    /// Iteration budget of the optimiser
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_tol")]
    pub tol: f64,
    /// Sample count (uniform, latin_hypercube) or levels per variable (full_factorial)
    #[serde(default = "default_samples")]
    pub samples: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Accepted for compatibility; evaluations always run sequentially
    #[serde(default)]
    pub run_parallel: bool,
}

fn default_max_iter() -> usize { 200 }
fn default_tol() -> f64 { 1e-6 }
fn default_samples() -> usize { 10 }
fn default_seed() -> u64 { 42 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VariableConfig {
    pub name: String,
    /// Overrides the value found in the shared file
    pub initial: Option<Value>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    /// Applied by the geometry step before the modules run
    #[serde(default)]
    pub geometry: bool,
    pub read_path: Option<String>,
    pub write_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModuleConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Program and leading arguments; input and output paths are appended
    pub command: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<PortConfig>,
    #[serde(default)]
    pub outputs: Vec<PortConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortConfig {
    #[serde(alias = "name")]
    pub var_name: String,
    pub path: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub descr: String,
    pub default: Option<Value>,
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Root {
    pub fn validate(&self) -> Result<()> {
        if self.routine.modules.is_empty() {
            bail!("routine.modules must list at least one module");
        }
        if self.routine.objectives.is_empty() {
            bail!("routine.objectives must contain at least one expression");
        }
        for obj in &self.routine.objectives {
            if let Err(e) = Expr::parse(obj) {
                bail!("routine.objectives: {e}");
            }
        }
        if self.routine.save_interval == 0 {
            bail!("routine.save_interval must be >= 1");
        }

        if self.driver.max_iter == 0 || self.driver.max_iter > 100_000 {
            bail!("driver.max_iter must be in [1, 100000]");
        }
        if self.driver.tol <= 0.0 {
            bail!("driver.tol must be positive");
        }
        if self.driver.kind.is_sampling() && self.driver.samples == 0 {
            bail!("driver.samples must be >= 1");
        }
        if self.driver.kind == DriverKind::Gradient && self.routine.objectives.len() > 1 {
            bail!("gradient driver supports a single objective, got {}", self.routine.objectives.len());
        }

        let mut seen = HashSet::new();
        for var in &self.variables {
            if !is_identifier(&var.name) {
                bail!("variables: '{}' is not a valid variable name", var.name);
            }
            if !seen.insert(var.name.as_str()) {
                bail!("variables: '{}' declared twice", var.name);
            }
            if let (Some(lo), Some(hi)) = (var.lower, var.upper) {
                if lo >= hi {
                    bail!("variables.{}: lower must be < upper", var.name);
                }
            }
        }

        for module in &self.modules {
            if module.command.is_empty() {
                bail!("modules.{}: command must not be empty", module.name);
            }
            for port in module.inputs.iter().chain(&module.outputs) {
                if !is_identifier(&port.var_name) {
                    bail!("modules.{}: '{}' is not a valid variable name", module.name, port.var_name);
                }
                if !port.path.starts_with('/') {
                    bail!("modules.{}.{}: path must start with '/'", module.name, port.var_name);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTINE: &str = r#"
[routine]
name = "wing_sizing"
modules = ["WeightEstimator", "AeroSolver"]
objectives = ["-cl/cd"]
direction = "minimize"
save_interval = 2

[driver]
kind = "full_factorial"
samples = 3

[[variables]]
name = "wing_area"
initial = 40
geometry = true

[[variables]]
name = "oem"
lower = 1000.0

[[modules]]
name = "Structures"
command = ["python", "structures.py"]
inputs = [{ name = "wing_span", path = "/aircraft/model/wings/wing/span", unit = "m" }]
"#;

    #[test]
    fn parse_routine_file() {
        let cfg: Root = toml::from_str(ROUTINE).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.routine.direction, Direction::Min);
        assert_eq!(cfg.routine.save_interval, 2);
        assert_eq!(cfg.driver.kind, DriverKind::FullFactorial);
        assert_eq!(cfg.driver.max_iter, 200);
        assert_eq!(cfg.variables[0].initial, Some(Value::Int(40)));
        assert!(cfg.variables[0].geometry);
        assert_eq!(cfg.variables[1].lower, Some(1000.0));
        assert_eq!(cfg.modules[0].inputs[0].var_name, "wing_span");
        assert_eq!(cfg.driver.kind.routine_type(), "DoE");
    }

    #[test]
    fn rejects_bad_objective() {
        let text = ROUTINE.replace("-cl/cd", "cl^2");
        let cfg: Root = toml::from_str(&text).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_multi_objective_gradient() {
        let text = ROUTINE
            .replace("\"-cl/cd\"", "\"-cl/cd\", \"oem\"")
            .replace("full_factorial", "gradient");
        let cfg: Root = toml::from_str(&text).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("single objective"));
    }

    #[test]
    fn rejects_duplicate_variable() {
        let text = ROUTINE.replace("name = \"oem\"", "name = \"wing_area\"");
        let cfg: Root = toml::from_str(&text).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_save_interval() {
        let text = ROUTINE.replace("save_interval = 2", "save_interval = 0");
        let cfg: Root = toml::from_str(&text).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("wing_area"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("wing-area"));
        assert!(!is_identifier(""));
    }
}
