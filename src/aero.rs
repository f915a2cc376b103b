//! Cruise drag polar.
//!
//! Closed-form stand-in for an aerodynamic solver: ISA troposphere, lift
//! coefficient from weight, parabolic polar for drag.

use std::f64::consts::PI;

use crate::error::Result;
use crate::store::SharedFile;
use crate::value::Value;
use crate::weight::{require_f64, G, MTOM_PATH, WING_AREA_PATH, WING_SPAN_PATH};

pub const ALTITUDE_PATH: &str = "/aircraft/model/analysis/cruise/altitude";
pub const MACH_PATH: &str = "/aircraft/model/analysis/cruise/machNumber";
pub const CL_PATH: &str = "/aircraft/model/analysisResults/aero/cl";
pub const CD_PATH: &str = "/aircraft/model/analysisResults/aero/cd";

/// Zero-lift drag coefficient
const CD0: f64 = 0.02;
/// Oswald efficiency
const OSWALD: f64 = 0.8;

const T0: f64 = 288.15;
const RHO0: f64 = 1.225;
const LAPSE: f64 = 0.0065;
const GAMMA: f64 = 1.4;
const R_AIR: f64 = 287.053;
/// Tropopause altitude [m]; the model is clamped there.
const TROPOPAUSE: f64 = 11_000.0;

/// ISA temperature [K] and density [kg/m^3] at `altitude` metres.
pub fn isa(altitude: f64) -> (f64, f64) {
    let h = altitude.clamp(0.0, TROPOPAUSE);
    let t = T0 - LAPSE * h;
    let rho = RHO0 * (t / T0).powf(G / (LAPSE * R_AIR) - 1.0);
    (t, rho)
}

/// `(cl, cd)` for steady level cruise.
pub fn cruise_polar(mtom: f64, wing_area: f64, wing_span: f64, altitude: f64, mach: f64) -> (f64, f64) {
    let (t, rho) = isa(altitude);
    let speed = mach * (GAMMA * R_AIR * t).sqrt();
    let q = 0.5 * rho * speed * speed;
    let cl = mtom * G / (q * wing_area);
    let aspect_ratio = wing_span * wing_span / wing_area;
    let cd = CD0 + cl * cl / (PI * OSWALD * aspect_ratio);
    (cl, cd)
}

/// In-process module body: reads geometry and flight condition, writes cl/cd.
pub fn run(file: &mut dyn SharedFile) -> Result<()> {
    let mtom = require_f64(file, MTOM_PATH)?;
    let area = require_f64(file, WING_AREA_PATH)?;
    let span = require_f64(file, WING_SPAN_PATH)?;
    let altitude = require_f64(file, ALTITUDE_PATH)?;
    let mach = require_f64(file, MACH_PATH)?;
    let (cl, cd) = cruise_polar(mtom, area, span, altitude, mach);
    file.set(CL_PATH, &Value::Real(cl))?;
    file.set(CD_PATH, &Value::Real(cd))
}
