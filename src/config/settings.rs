//! Process settings
//!
//! Settings use upper-case keys (`FLAVOR_NAME`, `OS_AUTH_URL`, ...). They are
//! assembled once at start-up from YAML files in the config directory and the
//! process environment, then passed by reference to whoever needs them.

use std::fmt;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::placement::AccommodationOverrides;

/// Every key read from the environment
pub const SETTING_KEYS: &[&str] = &[
    "SCENARIOS",
    "SCENARIO_AVAILABILITY_ZONE",
    "SCENARIO_COMPUTE_NODES",
    "STACK_NAME",
    "STACK_CREATE_TIMEOUT",
    "FLAVOR_NAME",
    "IMAGE_NAME",
    "EXTERNAL_NET",
    "DNS_NAMESERVERS",
    "OS_AUTH_URL",
    "OS_USERNAME",
    "OS_PASSWORD",
    "OS_PROJECT_NAME",
    "OS_PROJECT_DOMAIN_NAME",
    "OS_USER_DOMAIN_NAME",
    "OS_REGION_NAME",
    "OS_INTERFACE",
    "OS_CA_CERT",
    "OS_INSECURE",
    "OS_API_VERSION",
    "OS_PROFILE",
];

/// Keys whose environment values are parsed as YAML rather than kept verbatim
const STRUCTURED_KEYS: &[&str] = &[
    "SCENARIOS",
    "SCENARIO_AVAILABILITY_ZONE",
    "SCENARIO_COMPUTE_NODES",
    "STACK_CREATE_TIMEOUT",
    "DNS_NAMESERVERS",
    "OS_INSECURE",
];

/// Default Heat stack creation timeout in seconds
pub const DEFAULT_STACK_CREATE_TIMEOUT: u64 = 3600;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Settings {
    /// Scenario files to run, in order
    #[serde(default, deserialize_with = "string_or_seq")]
    pub scenarios: Vec<String>,

    /// Overrides every scenario's `zones` accommodation
    #[serde(default, deserialize_with = "optional_string_or_seq")]
    pub scenario_availability_zone: Option<Vec<String>>,

    /// Overrides every scenario's `compute_nodes` accommodation
    #[serde(default)]
    pub scenario_compute_nodes: Option<u64>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub stack_name: Option<String>,

    #[serde(default)]
    pub stack_create_timeout: Option<u64>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub flavor_name: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub image_name: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub external_net: Option<String>,

    #[serde(default, deserialize_with = "string_or_seq")]
    pub dns_nameservers: Vec<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub os_auth_url: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub os_username: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub os_password: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub os_project_name: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub os_project_domain_name: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub os_user_domain_name: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub os_region_name: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub os_interface: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub os_ca_cert: Option<String>,

    #[serde(default)]
    pub os_insecure: bool,

    #[serde(default, deserialize_with = "lenient_string")]
    pub os_api_version: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub os_profile: Option<String>,
}

impl Settings {
    /// Build settings from a merged key/value map
    pub fn from_values(values: Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(values))
    }

    /// Values that override every scenario's accommodation
    pub fn accommodation_overrides(&self) -> AccommodationOverrides {
        AccommodationOverrides {
            zones: self.scenario_availability_zone.clone(),
            compute_nodes: self.scenario_compute_nodes,
        }
    }

    pub fn stack_create_timeout(&self) -> u64 {
        self.stack_create_timeout
            .unwrap_or(DEFAULT_STACK_CREATE_TIMEOUT)
    }
}

// ============================================================================
// SBIO: Pure merging of setting sources
// ============================================================================

/// Merge top-level keys of `layer` into `base`, `layer` winning
pub fn merge_values(base: &mut Map<String, Value>, layer: Map<String, Value>) {
    for (key, value) in layer {
        base.insert(key, value);
    }
}

/// Overlay environment values for every known setting key.
///
/// Values of structured keys are parsed as YAML, so `3` becomes a number and
/// `[a, b]` a list. Everything else, credentials included, is kept verbatim.
/// Empty values are ignored.
pub fn apply_env<F>(values: &mut Map<String, Value>, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    for key in SETTING_KEYS {
        let Some(raw) = lookup(key) else {
            continue;
        };
        if raw.trim().is_empty() {
            continue;
        }
        let value = if STRUCTURED_KEYS.contains(key) {
            serde_yaml::from_str::<Value>(&raw).unwrap_or(Value::String(raw))
        } else {
            Value::String(raw)
        };
        values.insert(key.to_string(), value);
    }
}

// ============================================================================
// Lenient field deserializers
// ============================================================================

/// Accept a string, number or bool where a string is expected
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "expected a scalar value, found {}",
            other
        ))),
    }
}

struct StringOrSeq;

impl<'de> Visitor<'de> for StringOrSeq {
    type Value = Vec<String>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a comma-separated string or a list of strings")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Vec::new())
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element::<Value>()? {
            match item {
                Value::String(s) => items.push(s),
                Value::Null => {}
                other => items.push(other.to_string()),
            }
        }
        Ok(items)
    }
}

fn string_or_seq<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(StringOrSeq)
}

fn optional_string_or_seq<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = deserializer.deserialize_any(StringOrSeq)?;
    Ok(if items.is_empty() { None } else { Some(items) })
}
