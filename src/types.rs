use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Message the crash service embeds when a segment's request URI is too long.
pub const CRASH_URI_TOO_LONG: &str = "Segment too long for crash API";

/// Placeholder the backend puts in `studies` when a user has none.
pub const NO_STUDIES_PLACEHOLDER: &str = "No studies have been created yet!";

/// Backend dataset partition a study was computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schema {
    /// Bike low-stress network.
    Lts,
    /// Pedestrian network.
    #[serde(alias = "sw")]
    Sidewalk,
}

impl Schema {
    /// Name used in API query strings and public links.
    pub fn as_str(&self) -> &'static str {
        match self {
            Schema::Lts => "lts",
            Schema::Sidewalk => "sidewalk",
        }
    }

    pub fn connection_type(&self) -> &'static str {
        match self {
            Schema::Lts => "bike",
            Schema::Sidewalk => "pedestrian",
        }
    }

    /// Short name used for legends and the base network layer id.
    pub fn short_name(&self) -> &'static str {
        match self {
            Schema::Lts => "bike",
            Schema::Sidewalk => "sw",
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown schema '{0}' (expected lts, sidewalk, sw, bike or pedestrian)")]
pub struct ParseSchemaError(pub String);

impl FromStr for Schema {
    type Err = ParseSchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lts" | "bike" => Ok(Schema::Lts),
            "sidewalk" | "sw" | "pedestrian" => Ok(Schema::Sidewalk),
            other => Err(ParseSchemaError(other.to_string())),
        }
    }
}

/// Identity of a study on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StudyKey {
    pub username: String,
    pub schema: Schema,
    pub seg_name: String,
}

impl StudyKey {
    pub fn new(username: impl Into<String>, schema: Schema, seg_name: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            schema,
            seg_name: seg_name.into(),
        }
    }
}

impl fmt::Display for StudyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.username, self.schema, self.seg_name)
    }
}

/// A saved analysis as returned by `get_user_studies`.
///
/// Every field tolerates being absent or `null`; counts also tolerate floats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Study {
    #[serde(default, deserialize_with = "null_as_default")]
    pub username: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub seg_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub shared: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub has_isochrone: bool,
    #[serde(default, deserialize_with = "miles")]
    pub miles: f64,

    #[serde(default, deserialize_with = "count")]
    pub total_pop: u64,
    #[serde(default, deserialize_with = "count")]
    pub disabled: u64,
    #[serde(default, deserialize_with = "count")]
    pub ethnic_minority: u64,
    #[serde(default, deserialize_with = "count")]
    pub female: u64,
    #[serde(default, deserialize_with = "count")]
    pub foreign_born: u64,
    #[serde(default, deserialize_with = "count")]
    pub lep: u64,
    #[serde(default, deserialize_with = "count")]
    pub low_income: u64,
    #[serde(default, deserialize_with = "count")]
    pub older_adult: u64,
    #[serde(default, deserialize_with = "count")]
    pub racial_minority: u64,
    #[serde(default, deserialize_with = "count")]
    pub youth: u64,
    #[serde(default, deserialize_with = "count")]
    pub total_jobs: u64,
    #[serde(default, deserialize_with = "count")]
    pub hisp_lat: u64,

    #[serde(default)]
    pub circuit_trails: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub bike_ped_crashes: Vec<CrashEntry>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub essential_services: Vec<FeatureCount>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rail_stations: Vec<FeatureCount>,
}

impl Study {
    pub fn key(&self, schema: Schema) -> StudyKey {
        StudyKey::new(self.username.clone(), schema, self.seg_name.clone())
    }

    /// Bike/pedestrian crash cells as shown in the study shelf.
    pub fn crash_summary(&self) -> CrashSummary {
        let too_long = self.bike_ped_crashes.iter().any(|entry| {
            matches!(entry, CrashEntry::Message(msg) if msg.contains("414"))
        });
        if too_long {
            return CrashSummary {
                bike: CRASH_URI_TOO_LONG.to_string(),
                pedestrian: CRASH_URI_TOO_LONG.to_string(),
            };
        }

        let (bike, pedestrian) = self
            .bike_ped_crashes
            .iter()
            .find_map(|entry| match entry {
                CrashEntry::Totals { bike, pedestrian } => Some((*bike, *pedestrian)),
                _ => None,
            })
            .unwrap_or((0, 0));

        CrashSummary {
            bike: bike.to_string(),
            pedestrian: pedestrian.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashSummary {
    pub bike: String,
    pub pedestrian: String,
}

/// One entry of `bike_ped_crashes`: either per-mode totals or a message
/// forwarded from the crash service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CrashEntry {
    Message(String),
    Totals {
        #[serde(rename = "Total Bike Crashes", default, deserialize_with = "count")]
        bike: u64,
        #[serde(rename = "Total Pedestrian Crashes", default, deserialize_with = "count")]
        pedestrian: u64,
    },
    Other(Value),
}

impl fmt::Display for CrashEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrashEntry::Message(msg) => f.write_str(msg),
            CrashEntry::Totals { bike, pedestrian } => {
                write!(f, "Bike: {}, Pedestrian: {}", bike, pedestrian)
            }
            CrashEntry::Other(value) => write!(f, "{}", value),
        }
    }
}

/// Nearby essential services / rail stations, counted by type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureCount {
    Typed {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default, deserialize_with = "count")]
        count: u64,
    },
    Other(Value),
}

impl fmt::Display for FeatureCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureCount::Typed { kind, count } => write!(f, "{}: {}", kind, count),
            FeatureCount::Other(Value::String(s)) => f.write_str(s),
            FeatureCount::Other(value) => write!(f, "{}", value),
        }
    }
}

/// Envelope of `get_user_studies`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudiesResponse {
    #[serde(default, deserialize_with = "studies_or_placeholder")]
    pub studies: Vec<Study>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_count(&value))
}

fn value_to_count(value: &Value) -> u64 {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() && f > 0.0 => f.round() as u64,
                    _ => 0,
                }
            }
        }
        Value::String(s) => s.trim().parse::<f64>().map(|f| value_to_count(&Value::from(f))).unwrap_or(0),
        _ => 0,
    }
}

fn miles<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

fn studies_or_placeholder<'de, D>(deserializer: D) -> Result<Vec<Study>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Value>> = Option::deserialize(deserializer)?;
    let mut studies = Vec::new();
    for item in raw.unwrap_or_default() {
        match item {
            Value::Object(_) => {
                let study = Study::deserialize(item).map_err(serde::de::Error::custom)?;
                studies.push(study);
            }
            // The "no studies yet" placeholder and any other stray scalar.
            _ => continue,
        }
    }
    Ok(studies)
}
