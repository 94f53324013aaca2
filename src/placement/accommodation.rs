//! Accommodation directives and their normalized form
//!
//! A scenario lists accommodation directives in order, each either a bare
//! flag (`pair`, `single_room`, ...) or a mapping of options
//! (`density: 2`, `zones: [nova]`). Normalizing folds them into one
//! [`Accommodation`], later directives winning.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flags understood by the agent generator
pub const KNOWN_FLAGS: &[&str] = &[
    "pair",
    "single_room",
    "double_room",
    "mixed_room",
    "cross_az",
    "best_effort",
];

/// Option keys understood by the agent generator
pub const KNOWN_OPTIONS: &[&str] = &["density", "zones", "compute_nodes", "best_effort"];

/// One entry of a scenario's accommodation list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccommodationDirective {
    Flag(String),
    Options(Map<String, Value>),
}

impl AccommodationDirective {
    pub fn flag(name: impl Into<String>) -> Self {
        AccommodationDirective::Flag(name.into())
    }

    pub fn option(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut map = Map::new();
        map.insert(key.into(), value.into());
        AccommodationDirective::Options(map)
    }
}

/// Process-wide values that take precedence over a scenario's accommodation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccommodationOverrides {
    pub zones: Option<Vec<String>>,
    pub compute_nodes: Option<u64>,
}

/// Normalized accommodation: option name to value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Accommodation {
    options: Map<String, Value>,
}

impl Accommodation {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.options.insert(key.into(), value.into());
    }

    /// A flag is set when its key is present and not explicitly `false`
    pub fn has(&self, flag: &str) -> bool {
        !matches!(self.options.get(flag), None | Some(Value::Bool(false)))
    }

    pub fn pair(&self) -> bool {
        self.has("pair")
    }

    pub fn single_room(&self) -> bool {
        self.has("single_room")
    }

    pub fn double_room(&self) -> bool {
        self.has("double_room")
    }

    pub fn cross_az(&self) -> bool {
        self.has("cross_az")
    }

    /// Best effort is read by value: a falsy value disables it
    pub fn best_effort(&self) -> bool {
        self.options.get("best_effort").map(is_truthy).unwrap_or(false)
    }

    /// Agents per node, at least 1
    pub fn density(&self) -> usize {
        match self.options.get("density").and_then(Value::as_u64) {
            Some(d) if d > 0 => usize::try_from(d).unwrap_or(usize::MAX),
            _ => 1,
        }
    }

    /// Requested compute node count; zero counts as unset
    pub fn compute_nodes(&self) -> Option<usize> {
        self.options
            .get("compute_nodes")
            .and_then(|v| match v {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .filter(|&n| n > 0)
            .map(|n| n as usize)
    }

    /// Zone restriction as a list of `zone` or `zone:host` entries.
    /// A comma-separated string is accepted as well.
    pub fn zones(&self) -> Option<Vec<String>> {
        let zones: Vec<String> = match self.options.get("zones")? {
            Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Value::String(s) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        if zones.is_empty() {
            None
        } else {
            Some(zones)
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// ============================================================================
// Pure normalization
// ============================================================================

/// Fold directives into a single accommodation, then apply overrides
pub fn normalize_accommodation(
    directives: &[AccommodationDirective],
    overrides: &AccommodationOverrides,
) -> Accommodation {
    let mut result = Accommodation::default();

    for directive in directives {
        match directive {
            AccommodationDirective::Options(options) => {
                for (key, value) in options {
                    result.set(key.clone(), value.clone());
                }
            }
            AccommodationDirective::Flag(flag) => result.set(flag.clone(), true),
        }
    }

    if let Some(ref zones) = overrides.zones {
        result.set("zones", zones.clone());
    }
    if let Some(count) = overrides.compute_nodes {
        result.set("compute_nodes", count);
    }

    result
}
