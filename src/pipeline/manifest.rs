//! Discovery manifest.
//!
//! The discovery agent writes `.forge/manifest.json` itself, and its JSON
//! drifts: camelCase or snake_case keys, numeric ids, missing fields, the
//! list under `items` or `modules`. [`Manifest::from_value`] accepts all of
//! that and fills defaults; everything downstream sees the normalized shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;
use tracing::warn;

use super::SubtaskStatus;
use crate::course::marker::write_atomic;
use crate::course::CoursePaths;
use crate::error::StateError;
use crate::utils::{extract_json_value, JsonExtractionError};

const DEFAULT_SIZE_CLASS: &str = "standard";

/// One sub-task found by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestItem {
    pub id: String,
    /// Transcript paths relative to the course directory.
    #[serde(rename = "sourceRefs", alias = "source_refs")]
    pub source_refs: Vec<String>,
    #[serde(rename = "sizeClass", alias = "size_class")]
    pub size_class: String,
    pub status: SubtaskStatus,
}

/// Normalized discovery result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub has_work: bool,
    pub items: Vec<ManifestItem>,
    /// Transcripts discovery deliberately left out.
    pub skipped: Vec<String>,
    pub reason: Option<String>,
}

impl Manifest {
    /// Decodes a manifest from arbitrary JSON. Never fails: anything
    /// unrecognizable becomes an empty manifest without work.
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::empty(Some("manifest is not a JSON object".to_string()));
        };

        let items: Vec<ManifestItem> = first_of(obj, &["items", "subtasks", "modules"])
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .enumerate()
                    .filter_map(|(i, v)| decode_item(i, v))
                    .collect()
            })
            .unwrap_or_default();

        let has_work = first_of(obj, &["has_work", "hasWork"])
            .and_then(as_lenient_bool)
            .unwrap_or(!items.is_empty());

        let skipped = first_of(obj, &["skipped", "skippedRefs", "skipped_refs"])
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(as_ref_string).collect())
            .unwrap_or_default();

        let reason = obj
            .get("reason")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Self {
            has_work,
            items,
            skipped,
            reason,
        }
    }

    /// Extracts and decodes a manifest from an agent's reply text.
    pub fn from_response(text: &str) -> Result<Self, JsonExtractionError> {
        extract_json_value(text).map(|value| Self::from_value(&value))
    }

    pub fn empty(reason: Option<String>) -> Self {
        Self {
            has_work: false,
            items: Vec::new(),
            skipped: Vec::new(),
            reason,
        }
    }

    /// True when there is at least one sub-task to generate.
    pub fn declares_work(&self) -> bool {
        self.has_work && !self.items.is_empty()
    }

    /// Sub-tasks still to generate, in manifest order.
    pub fn unfinished(&self) -> impl Iterator<Item = (usize, &ManifestItem)> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.status.is_finished())
    }

    pub fn set_status(&mut self, index: usize, status: SubtaskStatus) {
        if let Some(item) = self.items.get_mut(index) {
            item.status = status;
        }
    }

    /// Loads the persisted manifest. A missing or unparseable file is `None`
    /// so discovery runs again.
    pub async fn load(paths: &CoursePaths) -> Result<Option<Self>, StateError> {
        let path = paths.manifest();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(value) => Ok(Some(Self::from_value(&value))),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable manifest");
                Ok(None)
            }
        }
    }

    pub async fn save(&self, paths: &CoursePaths) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(&paths.manifest(), json.as_bytes()).await
    }
}

fn decode_item(index: usize, value: &Value) -> Option<ManifestItem> {
    let obj = value.as_object()?;

    let id = first_of(obj, &["id", "name", "title"])
        .and_then(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| format!("item-{}", index + 1));

    let source_refs = first_of(obj, &["sourceRefs", "source_refs", "sources", "files"])
        .map(|v| match v {
            Value::Array(arr) => arr.iter().filter_map(as_ref_string).collect(),
            Value::String(s) => vec![s.clone()],
            _ => Vec::new(),
        })
        .unwrap_or_default();

    let size_class = first_of(obj, &["sizeClass", "size_class", "size"])
        .and_then(Value::as_str)
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SIZE_CLASS.to_string());

    let status = obj
        .get("status")
        .and_then(Value::as_str)
        .map(SubtaskStatus::parse_lenient)
        .unwrap_or_default();

    Some(ManifestItem {
        id,
        source_refs,
        size_class,
        status,
    })
}

fn first_of<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

fn as_ref_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => first_of(obj, &["path", "file", "name"])
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn as_lenient_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
