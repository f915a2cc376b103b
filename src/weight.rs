//! Operating empty mass estimation.
//!
//! Raymer, D.P. "Aircraft design: a conceptual approach", AIAA Education
//! Series, 4th ed. (2006), empirical empty-weight fraction.

use crate::error::{Result, RoutineError};
use crate::store::SharedFile;
use crate::value::Value;

/// Gravitational acceleration [m/s^2]
pub const G: f64 = 9.81;
/// Variable-sweep wing factor (1.0 for fixed sweep)
const KC: f64 = 1.04;

pub const MTOM_PATH: &str = "/aircraft/model/analysisResults/massBreakdown/designMasses/mTOM/mass";
pub const OEM_PATH: &str = "/aircraft/model/analysisResults/massBreakdown/mOEM/massDescription/mass";
pub const FUSELAGE_LENGTH_PATH: &str = "/aircraft/model/fuselages/fuselage/length";
pub const FUSELAGE_WIDTH_PATH: &str = "/aircraft/model/fuselages/fuselage/width";
pub const WING_AREA_PATH: &str = "/aircraft/model/reference/area";
pub const WING_SPAN_PATH: &str = "/aircraft/model/wings/wing/span";
pub const TURBOPROP_PATH: &str = "/aircraft/model/engines/turboprop";

/// Operating empty mass [kg], rounded to grams.
pub fn operating_empty_mass(
    mtom: f64,
    fuse_length: f64,
    wing_span: f64,
    turboprop: bool,
) -> f64 {
    let (a, c) = if turboprop {
        let a = if fuse_length < 15.0 {
            0.96
        } else if fuse_length < 30.0 {
            1.07
        } else {
            1.0
        };
        (a, -0.05)
    } else {
        let a = if fuse_length < 30.0 {
            1.45
        } else if fuse_length < 35.0 {
            1.63
        } else if fuse_length < 60.0 {
            if wing_span > 61.0 {
                1.63
            } else {
                1.57
            }
        } else {
            1.63
        };
        (a, -0.08)
    };
    let oem = a * KC * (mtom * G).powf(c) * mtom;
    (oem * 1000.0).round() / 1000.0
}

pub(crate) fn require_f64(file: &dyn SharedFile, path: &str) -> Result<f64> {
    file.get(path)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| RoutineError::Store(format!("missing numeric value at {path}")))
}

/// In-process module body: reads the mass inputs, writes the OEM.
pub fn run(file: &mut dyn SharedFile) -> Result<()> {
    let mtom = require_f64(file, MTOM_PATH)?;
    let length = require_f64(file, FUSELAGE_LENGTH_PATH)?;
    let span = require_f64(file, WING_SPAN_PATH)?;
    let turboprop = matches!(file.get(TURBOPROP_PATH), Some(Value::Bool(true)));
    let oem = operating_empty_mass(mtom, length, span, turboprop);
    file.set(OEM_PATH, &Value::Real(oem))
}
