//! Recorded cases and the variable history table.
//!
//! Every evaluated candidate becomes a [`Case`]. After the run the cases are
//! pivoted into a [`HistoryTable`]: one row per objective, free design
//! variable and constraint, one column per case.
//!
//! CSV layout (`Variable_history.csv`):
//!
//! ```text
//! name,type,0,1,2
//! -cl/cd,obj,-17.2,-17.9,-18.3
//! wing_area,des,40,44,36
//! oem,const,-,30512.113,30498.7
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RoutineError};
use crate::registry::Role;

/// Written in place of a value a case did not produce.
pub const MISSING: &str = "-";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub index: usize,
    pub design: IndexMap<String, f64>,
    pub constraints: IndexMap<String, Option<f64>>,
    /// User-facing objective values, keyed by expression
    pub objectives: IndexMap<String, f64>,
}

#[derive(Debug, Default)]
pub struct CaseRecorder {
    cases: Vec<Case>,
}

impl CaseRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, case: Case) {
        debug!(case = case.index, "case recorded");
        self.cases.push(case);
    }

    pub fn cases(&self) -> &[Case] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.cases)
            .map_err(|e| RoutineError::History(e.to_string()))?;
        fs::write(path, json).map_err(|e| RoutineError::io(path, e))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub name: String,
    pub role: Role,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryTable {
    pub rows: Vec<HistoryRow>,
}

impl HistoryTable {
    /// Pivot `cases` into rows ordered objectives, design variables,
    /// constraints.
    pub fn from_cases(objectives: &[String], design: &[String], constraints: &[String], cases: &[Case]) -> Self {
        let mut rows = Vec::with_capacity(objectives.len() + design.len() + constraints.len());
        for name in objectives {
            rows.push(HistoryRow {
                name: name.clone(),
                role: Role::Objective,
                values: cases.iter().map(|c| c.objectives.get(name).copied()).collect(),
            });
        }
        for name in design {
            rows.push(HistoryRow {
                name: name.clone(),
                role: Role::Design,
                values: cases.iter().map(|c| c.design.get(name).copied()).collect(),
            });
        }
        for name in constraints {
            rows.push(HistoryRow {
                name: name.clone(),
                role: Role::Constraint,
                values: cases
                    .iter()
                    .map(|c| c.constraints.get(name).copied().flatten())
                    .collect(),
            });
        }
        Self { rows }
    }

    pub fn row(&self, name: &str) -> Option<&HistoryRow> {
        self.rows.iter().find(|r| r.name == name)
    }

    pub fn with_role(&self, role: Role) -> impl Iterator<Item = &HistoryRow> {
        self.rows.iter().filter(move |r| r.role == role)
    }

    /// Number of case columns.
    pub fn columns(&self) -> usize {
        self.rows.iter().map(|r| r.values.len()).max().unwrap_or(0)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut w = HistoryWriter::create(path)?;
        w.write_header(self.columns())?;
        for row in &self.rows {
            w.write_row(row)?;
        }
        w.flush()
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| RoutineError::io(path, e))?;
        let bad = |line: usize, what: String| {
            RoutineError::History(format!("{}:{}: {what}", path.display(), line + 1))
        };

        let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
        let (_, header) = lines.next().ok_or_else(|| bad(0, "empty file".to_string()))?;
        let columns = header.split(',').count();
        if columns < 2 || !header.starts_with("name,type") {
            return Err(bad(0, format!("unexpected header '{header}'")));
        }

        let mut rows = Vec::new();
        for (n, line) in lines {
            let mut fields = line.split(',');
            let name = fields.next().unwrap_or_default().to_string();
            let tag = fields.next().ok_or_else(|| bad(n, "missing type".to_string()))?;
            let role = Role::from_tag(tag).ok_or_else(|| bad(n, format!("unknown type '{tag}'")))?;
            let values = fields
                .map(|f| match f.trim() {
                    MISSING => Ok(None),
                    v => v
                        .parse::<f64>()
                        .map(Some)
                        .map_err(|_| bad(n, format!("'{v}' is not a number"))),
                })
                .collect::<Result<Vec<_>>>()?;
            if values.len() != columns - 2 {
                return Err(bad(n, format!("expected {} values, got {}", columns - 2, values.len())));
            }
            rows.push(HistoryRow { name, role, values });
        }
        Ok(Self { rows })
    }
}

struct HistoryWriter {
    w: BufWriter<File>,
    path: std::path::PathBuf,
}

impl HistoryWriter {
    fn create(path: &Path) -> Result<Self> {
        let f = File::create(path).map_err(|e| RoutineError::io(path, e))?;
        Ok(Self {
            w: BufWriter::new(f),
            path: path.to_path_buf(),
        })
    }

    fn write_header(&mut self, columns: usize) -> Result<()> {
        let mut line = String::from("name,type");
        for i in 0..columns {
            line.push_str(&format!(",{i}"));
        }
        writeln!(self.w, "{line}").map_err(|e| RoutineError::io(&self.path, e))
    }

    fn write_row(&mut self, row: &HistoryRow) -> Result<()> {
        let mut line = format!("{},{}", row.name, row.role.tag());
        for v in &row.values {
            match v {
                Some(x) => line.push_str(&format!(",{x}")),
                None => line.push_str(&format!(",{MISSING}")),
            }
        }
        writeln!(self.w, "{line}").map_err(|e| RoutineError::io(&self.path, e))
    }

    fn flush(&mut self) -> Result<()> {
        self.w.flush().map_err(|e| RoutineError::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(index: usize, area: f64, oem: Option<f64>, obj: f64) -> Case {
        Case {
            index,
            design: IndexMap::from([("wing_area".to_string(), area)]),
            constraints: IndexMap::from([("oem".to_string(), oem)]),
            objectives: IndexMap::from([("-cl/cd".to_string(), obj)]),
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn table() -> HistoryTable {
        let cases = vec![
            case(0, 40.0, None, -17.25),
            case(1, 44.0, Some(30512.113), -17.9),
            case(2, 36.0, Some(30498.7), -18.301),
        ];
        HistoryTable::from_cases(&names(&["-cl/cd"]), &names(&["wing_area"]), &names(&["oem"]), &cases)
    }

    #[test]
    fn rows_are_ordered_by_role() {
        let t = table();
        let roles: Vec<Role> = t.rows.iter().map(|r| r.role).collect();
        assert_eq!(roles, vec![Role::Objective, Role::Design, Role::Constraint]);
        assert_eq!(t.columns(), 3);
        assert_eq!(t.row("wing_area").unwrap().values, vec![Some(40.0), Some(44.0), Some(36.0)]);
        assert_eq!(t.row("oem").unwrap().values[0], None);
    }

    #[test]
    fn csv_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("Variable_history.csv");
        table().write_csv(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "name,type,0,1,2");
        assert_eq!(lines[1], "-cl/cd,obj,-17.25,-17.9,-18.301");
        assert_eq!(lines[2], "wing_area,des,40,44,36");
        assert_eq!(lines[3], "oem,const,-,30512.113,30498.7");
    }

    #[test]
    fn export_then_import_is_lossless() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("h.csv");
        let original = table();
        original.write_csv(&path).unwrap();
        let back = HistoryTable::read_csv(&path).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn empty_history_keeps_rows() {
        let t = HistoryTable::from_cases(&names(&["cl"]), &names(&["wing_area"]), &[], &[]);
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.columns(), 0);
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("h.csv");
        t.write_csv(&path).unwrap();
        assert_eq!(HistoryTable::read_csv(&path).unwrap(), t);
    }

    #[test]
    fn malformed_files_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.csv");
        fs::write(&path, "name,type,0\nx,param,1\n").unwrap();
        assert!(matches!(HistoryTable::read_csv(&path), Err(RoutineError::History(_))));
        fs::write(&path, "name,type,0\nx,des,abc\n").unwrap();
        assert!(HistoryTable::read_csv(&path).is_err());
        fs::write(&path, "name,type,0,1\nx,des,1\n").unwrap();
        assert!(HistoryTable::read_csv(&path).is_err());
    }

    #[test]
    fn recorder_dumps_cases() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rec = CaseRecorder::new();
        rec.record(case(0, 40.0, None, -1.0));
        rec.record(case(1, 41.0, Some(2.0), -1.5));
        let path = tmp.path().join("cases.json");
        rec.save_json(&path).unwrap();
        let back: Vec<Case> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, rec.cases());
    }
}
