//! Variable values and bounds.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RoutineError};

/// Relative half-width of the default design window around an initial value.
pub const BOUND_FRACTION: f64 = 0.2;

/// A value read from or written to the shared file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(String),
}

impl Value {
    /// Parse a textual value the way the shared file stores leaf text.
    pub fn parse(text: &str) -> Self {
        let t = text.trim();
        match t {
            "True" | "true" => return Value::Bool(true),
            "False" | "false" => return Value::Bool(false),
            _ => {}
        }
        let digits = t.strip_prefix(['-', '+']).unwrap_or(t);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(i) = t.parse::<i64>() {
                return Value::Int(i);
            }
        }
        match t.parse::<f64>() {
            Ok(f) => Value::Real(f),
            Err(_) => Value::Str(t.to_string()),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Value::Int(i))
                } else {
                    n.as_f64().map(Value::Real)
                }
            }
            serde_json::Value::String(s) => Some(Value::parse(s)),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Real(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Real(f) => Some(*f),
            Value::Bool(_) | Value::Str(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Real(_) => "real",
            Value::Str(_) => "string",
        }
    }

    /// Build a value of the same kind as `self` from a driver candidate.
    pub fn with_kind_of(&self, x: f64) -> Value {
        match self {
            Value::Bool(_) => Value::Bool(x != 0.0),
            Value::Int(_) => Value::Int(x.round_ties_even() as i64),
            Value::Real(_) | Value::Str(_) => Value::Real(x),
        }
    }

    /// Default bounds: +/-20% of the value, forced one unit apart when the
    /// window collapses. Integer bounds are rounded; real bounds are left
    /// unrounded so small values keep a usable window.
    pub fn default_bounds(&self, name: &str) -> Result<Bounds> {
        match self {
            Value::Bool(_) => Ok(Bounds::Sentinel),
            Value::Int(v) => {
                let v = *v as f64;
                let half = (BOUND_FRACTION * v).abs();
                let mut lo = (v - half).round_ties_even() as i64;
                let mut hi = (v + half).round_ties_even() as i64;
                if lo == hi {
                    lo -= 1;
                    hi += 1;
                }
                Ok(Bounds::Integer(lo, hi))
            }
            Value::Real(v) => {
                let half = (BOUND_FRACTION * v).abs();
                let (mut lo, mut hi) = (v - half, v + half);
                if lo == hi {
                    lo -= 1.0;
                    hi += 1.0;
                }
                Ok(Bounds::Real(lo, hi))
            }
            Value::Str(_) => Err(RoutineError::UnsupportedBounds {
                name: name.to_string(),
                kind: self.kind(),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Real(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Search window of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Bounds {
    /// Boolean variables: no numeric range.
    Sentinel,
    Integer(i64, i64),
    Real(f64, f64),
    /// Output whose initial value was unknown and no bounds were given.
    Unbounded,
}

impl Bounds {
    /// Numeric `(lower, upper)` pair, if the bounds have one.
    pub fn range(&self) -> Option<(f64, f64)> {
        match self {
            Bounds::Integer(lo, hi) => Some((*lo as f64, *hi as f64)),
            Bounds::Real(lo, hi) => Some((*lo, *hi)),
            Bounds::Sentinel | Bounds::Unbounded => None,
        }
    }

    /// Replace either side with a user override, keeping the numeric kind
    /// where possible.
    pub fn with_overrides(self, lower: Option<f64>, upper: Option<f64>) -> Bounds {
        if lower.is_none() && upper.is_none() {
            return self;
        }
        match self {
            Bounds::Integer(lo, hi) => Bounds::Real(
                lower.unwrap_or(lo as f64),
                upper.unwrap_or(hi as f64),
            ),
            Bounds::Real(lo, hi) => Bounds::Real(lower.unwrap_or(lo), upper.unwrap_or(hi)),
            Bounds::Sentinel => Bounds::Sentinel,
            Bounds::Unbounded => Bounds::Real(
                lower.unwrap_or(f64::NEG_INFINITY),
                upper.unwrap_or(f64::INFINITY),
            ),
        }
    }

    fn side(&self, upper: bool) -> String {
        match self {
            Bounds::Integer(lo, hi) => (if upper { hi } else { lo }).to_string(),
            Bounds::Real(lo, hi) => (if upper { hi } else { lo }).to_string(),
            Bounds::Sentinel | Bounds::Unbounded => "-".to_string(),
        }
    }

    pub fn lower_text(&self) -> String {
        self.side(false)
    }

    pub fn upper_text(&self) -> String {
        self.side(true)
    }
}
