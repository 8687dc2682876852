//! Bridge between plugin-declared filter schemas and the typed filter model
//!
//! Plugins describe their search filters as loose JSON objects keyed by filter
//! name. [`FilterSchemaBridge::convert_filters`] turns that into
//! [`FilterDefinition`]s the UI can render, and
//! [`FilterSchemaBridge::convert_filter_values`] turns UI selections back into
//! the shape the plugin expects. A malformed entry is dropped on its own; it
//! never disables the other filters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One selectable option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOption {
    pub label: String,
    pub value: String,
}

/// A renderable filter control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FilterDefinition {
    /// Single choice
    Picker {
        label: String,
        options: Vec<FilterOption>,
        default: String,
    },
    /// Free text
    TextInput { label: String, default: String },
    /// Multiple choice
    CheckboxGroup {
        label: String,
        options: Vec<FilterOption>,
        defaults: Vec<String>,
    },
    /// Multiple choice with an explicit exclude state per option
    ExcludableCheckboxGroup {
        label: String,
        options: Vec<FilterOption>,
        included: Vec<String>,
        excluded: Vec<String>,
    },
}

impl FilterDefinition {
    pub fn label(&self) -> &str {
        match self {
            FilterDefinition::Picker { label, .. }
            | FilterDefinition::TextInput { label, .. }
            | FilterDefinition::CheckboxGroup { label, .. }
            | FilterDefinition::ExcludableCheckboxGroup { label, .. } => label,
        }
    }

    pub fn options(&self) -> &[FilterOption] {
        match self {
            FilterDefinition::Picker { options, .. }
            | FilterDefinition::CheckboxGroup { options, .. }
            | FilterDefinition::ExcludableCheckboxGroup { options, .. } => options,
            FilterDefinition::TextInput { .. } => &[],
        }
    }

    /// The definition's own default, in plugin-native shape
    pub fn default_value(&self) -> Value {
        match self {
            FilterDefinition::Picker { default, .. } | FilterDefinition::TextInput { default, .. } => {
                Value::String(default.clone())
            }
            FilterDefinition::CheckboxGroup { defaults, .. } => string_array(defaults),
            FilterDefinition::ExcludableCheckboxGroup {
                included, excluded, ..
            } => excludable_value(included, excluded),
        }
    }

    /// `user` converted to plugin-native shape, or the default when the shape does not fit
    fn native_value(&self, user: Option<&Value>) -> Value {
        let Some(user) = user else {
            return self.default_value();
        };

        let converted = match self {
            FilterDefinition::Picker { .. } | FilterDefinition::TextInput { .. } => {
                user.as_str().map(|s| Value::String(s.to_string()))
            }
            FilterDefinition::CheckboxGroup { .. } => strings(user).map(|v| string_array(&v)),
            FilterDefinition::ExcludableCheckboxGroup { .. } => user.as_object().and_then(|obj| {
                let included = optional_strings(obj.get("included"))?;
                let excluded = optional_strings(obj.get("excluded"))?;
                Some(excludable_value(&included, &excluded))
            }),
        };

        converted.unwrap_or_else(|| {
            tracing::debug!(label = %self.label(), "Filter value has incompatible shape, using default");
            self.default_value()
        })
    }
}

/// Converts between raw plugin filter schemas and [`FilterDefinition`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterSchemaBridge;

impl FilterSchemaBridge {
    pub fn new() -> Self {
        Self
    }

    /// Convert a raw schema map into typed definitions
    ///
    /// Entries with an unknown `type`, a non-object body, or a choice control with
    /// no valid options are skipped.
    pub fn convert_filters(&self, raw_schema: &Map<String, Value>) -> BTreeMap<String, FilterDefinition> {
        raw_schema
            .iter()
            .filter_map(|(key, raw)| match convert_one(key, raw) {
                Some(def) => Some((key.clone(), def)),
                None => {
                    tracing::debug!(filter = %key, "Dropping unsupported or malformed filter");
                    None
                }
            })
            .collect()
    }

    /// Same as [`convert_filters`](Self::convert_filters) for an arbitrary JSON value
    pub fn convert_filters_value(&self, raw_schema: &Value) -> BTreeMap<String, FilterDefinition> {
        raw_schema
            .as_object()
            .map(|obj| self.convert_filters(obj))
            .unwrap_or_default()
    }

    /// Convert UI selections into the plugin-native value map
    ///
    /// Every defined filter gets a value; missing or ill-shaped user values fall
    /// back to the definition's default. User keys with no definition are ignored.
    pub fn convert_filter_values(
        &self,
        definitions: &BTreeMap<String, FilterDefinition>,
        user_values: &Map<String, Value>,
    ) -> Map<String, Value> {
        definitions
            .iter()
            .map(|(key, def)| (key.clone(), def.native_value(user_values.get(key))))
            .collect()
    }
}

fn convert_one(key: &str, raw: &Value) -> Option<FilterDefinition> {
    let obj = raw.as_object()?;
    let kind = obj.get("type")?.as_str()?;
    let label = obj
        .get("label")
        .and_then(Value::as_str)
        .unwrap_or(key)
        .to_string();

    match kind {
        "Picker" => {
            let options = parse_options(obj)?;
            let default = string_field(obj, &["defaultValue", "default"])
                .unwrap_or_else(|| options[0].value.clone());
            Some(FilterDefinition::Picker {
                label,
                options,
                default,
            })
        }
        "TextInput" | "Text" => Some(FilterDefinition::TextInput {
            label,
            default: string_field(obj, &["defaultValue", "default"]).unwrap_or_default(),
        }),
        "CheckboxGroup" => {
            let options = parse_options(obj)?;
            let defaults = ["defaultValues", "defaults", "defaultValue"]
                .iter()
                .find_map(|k| obj.get(*k).and_then(strings))
                .unwrap_or_default();
            Some(FilterDefinition::CheckboxGroup {
                label,
                options,
                defaults,
            })
        }
        "ExcludableCheckboxGroup" | "XCheckbox" => {
            let options = parse_options(obj)?;
            let nested = obj.get("defaultValue").and_then(Value::as_object);
            let list = |name: &str| {
                obj.get(name)
                    .or_else(|| nested.and_then(|n| n.get(name)))
                    .and_then(strings)
                    .unwrap_or_default()
            };
            Some(FilterDefinition::ExcludableCheckboxGroup {
                label,
                options,
                included: list("included"),
                excluded: list("excluded"),
            })
        }
        _ => None,
    }
}

/// Valid options, or `None` when there are none
fn parse_options(obj: &Map<String, Value>) -> Option<Vec<FilterOption>> {
    let options: Vec<FilterOption> = obj
        .get("options")?
        .as_array()?
        .iter()
        .filter_map(|opt| {
            let opt = opt.as_object()?;
            Some(FilterOption {
                label: scalar_string(opt.get("label")?)?,
                value: scalar_string(opt.get("value")?)?,
            })
        })
        .collect();

    if options.is_empty() {
        None
    } else {
        Some(options)
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str).map(str::to_string))
}

/// An array made only of strings
fn strings(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Absent is an empty list; present must be a string array
fn optional_strings(value: Option<&Value>) -> Option<Vec<String>> {
    match value {
        None | Some(Value::Null) => Some(Vec::new()),
        Some(v) => strings(v),
    }
}

fn string_array(values: &[String]) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}

fn excludable_value(included: &[String], excluded: &[String]) -> Value {
    let mut map = Map::new();
    map.insert("included".to_string(), string_array(included));
    map.insert("excluded".to_string(), string_array(excluded));
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn picker_defs() -> BTreeMap<String, FilterDefinition> {
        FilterSchemaBridge::new().convert_filters(&schema(json!({
            "sort": {
                "type": "Picker",
                "label": "Sort by",
                "options": [{"label": "a", "value": "1"}, {"label": "b", "value": "2"}],
                "defaultValue": "1"
            }
        })))
    }

    #[test]
    fn test_picker_round_trip() {
        let bridge = FilterSchemaBridge::new();
        let defs = picker_defs();

        let values = bridge.convert_filter_values(&defs, &Map::new());
        assert_eq!(values["sort"], json!("1"));

        let values = bridge.convert_filter_values(&defs, &schema(json!({"sort": "2"})));
        assert_eq!(values["sort"], json!("2"));
    }

    #[test]
    fn test_convert_all_variants() {
        let defs = FilterSchemaBridge::new().convert_filters(&schema(json!({
            "status": {
                "type": "Picker",
                "options": [{"label": "Any", "value": ""}, {"label": "Ongoing", "value": "ongoing"}]
            },
            "author": {"type": "Text", "label": "Author"},
            "genres": {
                "type": "CheckboxGroup",
                "label": "Genres",
                "options": [{"label": "Action", "value": "action"}, {"label": "Drama", "value": "drama"}],
                "defaultValues": ["drama"]
            },
            "tags": {
                "type": "XCheckbox",
                "label": "Tags",
                "options": [{"label": "Isekai", "value": "isekai"}],
                "excluded": ["isekai"]
            }
        })));

        assert_eq!(defs.len(), 4);
        assert_eq!(
            defs["status"],
            FilterDefinition::Picker {
                label: "status".to_string(),
                options: vec![
                    FilterOption { label: "Any".into(), value: "".into() },
                    FilterOption { label: "Ongoing".into(), value: "ongoing".into() },
                ],
                default: "".to_string(),
            }
        );
        assert_eq!(
            defs["author"],
            FilterDefinition::TextInput {
                label: "Author".to_string(),
                default: String::new(),
            }
        );
        assert_eq!(defs["genres"].default_value(), json!(["drama"]));
        assert_eq!(
            defs["tags"].default_value(),
            json!({"included": [], "excluded": ["isekai"]})
        );
    }

    #[test]
    fn test_malformed_entries_are_dropped_individually() {
        let defs = FilterSchemaBridge::new().convert_filters(&schema(json!({
            "unknown": {"type": "Slider", "min": 0},
            "untyped": {"label": "No type"},
            "not_an_object": 42,
            "empty_picker": {"type": "Picker", "options": []},
            "bad_options": {"type": "CheckboxGroup", "options": [{"label": "x"}, {"value": "y"}]},
            "ok": {"type": "TextInput", "defaultValue": "abc"}
        })));

        assert_eq!(defs.len(), 1);
        assert_eq!(defs["ok"].default_value(), json!("abc"));
    }

    #[test]
    fn test_options_missing_fields_are_skipped() {
        let defs = FilterSchemaBridge::new().convert_filters(&schema(json!({
            "order": {
                "type": "Picker",
                "options": [{"label": "broken"}, {"label": "Newest", "value": 1}]
            }
        })));

        assert_eq!(defs["order"].options().len(), 1);
        assert_eq!(defs["order"].options()[0].value, "1");
        assert_eq!(defs["order"].default_value(), json!("1"));
    }

    #[test]
    fn test_incompatible_user_values_fall_back() {
        let bridge = FilterSchemaBridge::new();
        let defs = bridge.convert_filters(&schema(json!({
            "sort": {"type": "Picker", "options": [{"label": "a", "value": "1"}]},
            "genres": {
                "type": "CheckboxGroup",
                "options": [{"label": "Action", "value": "action"}],
                "defaultValues": ["action"]
            },
            "tags": {
                "type": "ExcludableCheckboxGroup",
                "options": [{"label": "Isekai", "value": "isekai"}],
                "included": ["isekai"]
            }
        })));

        let values = bridge.convert_filter_values(
            &defs,
            &schema(json!({
                "sort": 7,
                "genres": ["action", 3],
                "tags": {"included": "isekai"},
                "stray": "ignored"
            })),
        );

        assert_eq!(values.len(), 3);
        assert_eq!(values["sort"], json!("1"));
        assert_eq!(values["genres"], json!(["action"]));
        assert_eq!(values["tags"], json!({"included": ["isekai"], "excluded": []}));
    }

    #[test]
    fn test_excludable_partial_user_value() {
        let bridge = FilterSchemaBridge::new();
        let defs = bridge.convert_filters(&schema(json!({
            "tags": {
                "type": "ExcludableCheckboxGroup",
                "options": [{"label": "A", "value": "a"}, {"label": "B", "value": "b"}]
            }
        })));

        let values = bridge.convert_filter_values(&defs, &schema(json!({"tags": {"excluded": ["b"]}})));
        assert_eq!(values["tags"], json!({"included": [], "excluded": ["b"]}));
    }

    #[test]
    fn test_definition_serialization_is_tagged() {
        let defs = picker_defs();
        let json = serde_json::to_value(&defs["sort"]).unwrap();
        assert_eq!(json["type"], "Picker");
        assert_eq!(json["default"], "1");

        let back: FilterDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back, defs["sort"]);
    }

    #[test]
    fn test_non_object_schema() {
        assert!(FilterSchemaBridge::new()
            .convert_filters_value(&json!(["not", "a", "map"]))
            .is_empty());
    }
}
