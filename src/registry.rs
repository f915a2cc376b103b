//! Variable registry
//!
//! Name-keyed bookkeeping of every variable a routine touches: its role for
//! the driver, its bounds, where it lives in the shared file, and the value
//! it held at each iteration. Registration order is kept and shows up in
//! every exported artifact.
//!
//! A variable registered with an initial value keeps it as the first history
//! entry, so after N evaluations a design variable holds N + 1 values while
//! an output first produced by the pipeline holds N.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::ModuleSpec;
use crate::config::VariableConfig;
use crate::error::{Result, RoutineError};
use crate::store::SharedFile;
use crate::value::{Bounds, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Design,
    Constraint,
    Objective,
}

impl Role {
    pub fn tag(&self) -> &'static str {
        match self {
            Role::Design => "des",
            Role::Constraint => "const",
            Role::Objective => "obj",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Role> {
        match tag {
            "des" => Some(Role::Design),
            "const" => Some(Role::Constraint),
            "obj" => Some(Role::Objective),
            _ => None,
        }
    }

    /// Outputs are constraints unless the objective uses them; everything
    /// else is a design variable.
    pub fn assign(is_output: bool, in_objective: bool) -> Role {
        match (is_output, in_objective) {
            (true, true) => Role::Objective,
            (true, false) => Role::Constraint,
            (false, _) => Role::Design,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VariableEntry {
    pub name: String,
    pub role: Role,
    /// Initial value (if any) followed by one value per evaluation
    pub history: Vec<Value>,
    pub bounds: Bounds,
    pub read_path: String,
    pub write_path: String,
    pub geometry: bool,
}

impl VariableEntry {
    pub fn latest(&self) -> Option<&Value> {
        self.history.last()
    }

    pub fn initial(&self) -> Option<&Value> {
        self.history.first()
    }

    /// True when the driver can move this variable.
    pub fn is_free_design(&self) -> bool {
        self.role == Role::Design && self.bounds.range().is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VariableRegistry {
    entries: IndexMap<String, VariableEntry>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        role: Role,
        initial: Option<Value>,
        read_path: &str,
        write_path: &str,
    ) -> Result<&mut VariableEntry> {
        if self.entries.contains_key(name) {
            return Err(RoutineError::DuplicateVariable(name.to_string()));
        }
        let bounds = match &initial {
            Some(v) => v.default_bounds(name)?,
            None => Bounds::Unbounded,
        };
        debug!(name, role = role.tag(), ?bounds, "registered variable");
        let entry = VariableEntry {
            name: name.to_string(),
            role,
            history: initial.into_iter().collect(),
            bounds,
            read_path: read_path.to_string(),
            write_path: write_path.to_string(),
            geometry: false,
        };
        Ok(self.entries.entry(name.to_string()).or_insert(entry))
    }

    pub fn append_value(&mut self, name: &str, value: Value) -> Result<()> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| RoutineError::config(format!("variable '{name}' is not registered")))?;
        entry.history.push(value);
        Ok(())
    }

    pub fn bounds_for(&self, name: &str) -> Option<Bounds> {
        self.entries.get(name).map(|e| e.bounds)
    }

    pub fn get(&self, name: &str) -> Option<&VariableEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn latest_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|e| e.latest()).and_then(Value::as_f64)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableEntry> {
        self.entries.values()
    }

    pub fn with_role(&self, role: Role) -> impl Iterator<Item = &VariableEntry> {
        self.entries.values().filter(move |e| e.role == role)
    }

    /// Append the current shared-file value of every variable. Outputs not
    /// produced yet are skipped; a missing design variable is an error.
    pub fn update_from(&mut self, file: &dyn SharedFile) -> Result<()> {
        for entry in self.entries.values_mut() {
            match file.get(&entry.read_path) {
                Some(v) => entry.history.push(v),
                None if entry.role == Role::Design => {
                    return Err(RoutineError::Store(format!(
                        "design variable '{}' missing at {}",
                        entry.name, entry.read_path
                    )))
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Build the registry of a routine: every user-listed variable plus every
    /// module output the objectives use.
    pub fn build(
        variables: &[VariableConfig],
        pipeline: &[ModuleSpec],
        objective_tokens: &[String],
        file: &dyn SharedFile,
    ) -> Result<Self> {
        let outputs: HashSet<&str> = pipeline
            .iter()
            .flat_map(|m| m.outputs.iter().map(|p| p.var_name.as_str()))
            .collect();
        let in_objective = |name: &str| objective_tokens.iter().any(|t| t == name);
        let find_port = |name: &str| pipeline.iter().find_map(|m| m.declares(name));

        let mut registry = Self::new();

        for var in variables {
            let port = find_port(&var.name);
            let read_path = var
                .read_path
                .clone()
                .or_else(|| port.map(|p| p.path.clone()))
                .ok_or_else(|| {
                    RoutineError::config(format!(
                        "variable '{}' is not declared by any module and has no read_path",
                        var.name
                    ))
                })?;
            let write_path = var.write_path.clone().unwrap_or_else(|| read_path.clone());
            let role = Role::assign(outputs.contains(var.name.as_str()), in_objective(&var.name));
            let initial = var
                .initial
                .clone()
                .or_else(|| file.get(&read_path))
                .or_else(|| port.and_then(|p| p.default.clone()));

            if role == Role::Design && initial.is_none() {
                return Err(RoutineError::config(format!(
                    "design variable '{}' has no initial value",
                    var.name
                )));
            }
            if var.geometry && role != Role::Design {
                return Err(RoutineError::config(format!(
                    "'{}' is a module output and cannot be a geometry parameter",
                    var.name
                )));
            }

            let entry = registry.register(&var.name, role, initial, &read_path, &write_path)?;
            entry.bounds = entry.bounds.with_overrides(var.lower, var.upper);
            entry.geometry = var.geometry;
        }

        for token in objective_tokens {
            if registry.contains(token) || !outputs.contains(token.as_str()) {
                continue;
            }
            if let Some(port) = pipeline.iter().find_map(|m| m.output(token)) {
                let initial = file.get(&port.path).or_else(|| port.default.clone());
                registry.register(token, Role::Objective, initial, &port.path, &port.path)?;
            }
        }

        info!(
            design = registry.with_role(Role::Design).count(),
            constraints = registry.with_role(Role::Constraint).count(),
            objectives = registry.with_role(Role::Objective).count(),
            "variable registry built"
        );
        Ok(registry)
    }

    /// Fail fast when an objective refers to something unknown.
    pub fn check_objective(&self, expression: &str, tokens: &[String]) -> Result<()> {
        match tokens.iter().find(|t| !self.contains(t)) {
            Some(missing) => Err(RoutineError::UnknownVariable {
                name: missing.clone(),
                expression: expression.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Variable library: one row per variable with role, bounds and paths.
    pub fn write_library(&self, path: &Path) -> Result<()> {
        let io_err = |e| RoutineError::io(path, e);
        let f = File::create(path).map_err(io_err)?;
        let mut w = BufWriter::new(f);
        writeln!(w, "Name,type,value,min,max,getcmd,setcmd,geometry").map_err(io_err)?;
        for e in self.iter() {
            let value = e.initial().map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
            writeln!(
                w,
                "{},{},{},{},{},{},{},{}",
                e.name,
                e.role.tag(),
                value,
                e.bounds.lower_text(),
                e.bounds.upper_text(),
                e.read_path,
                e.write_path,
                e.geometry
            )
            .map_err(io_err)?;
        }
        w.flush().map_err(io_err)?;
        Ok(())
    }
}
