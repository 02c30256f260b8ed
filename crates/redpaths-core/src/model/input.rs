//! Execution input bundle handed to every module of an attack vector.

use std::collections::HashMap;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize};

use crate::error::InputError;

/// A structured target (host or network) supplied by the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub cidr: String,
}

/// One named input, tagged by kind. An untagged input decodes as `textInput`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum InputValue {
    #[serde(rename = "checkbox")]
    Checkbox { value: bool },
    #[serde(rename = "textInput")]
    TextInput { value: String },
    #[serde(rename = "targetInput")]
    TargetInput { value: Vec<Target> },
}

impl InputValue {
    pub fn kind(&self) -> &'static str {
        match self {
            InputValue::Checkbox { .. } => "checkbox",
            InputValue::TextInput { .. } => "textInput",
            InputValue::TargetInput { .. } => "targetInput",
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum TaggedInput {
    #[serde(rename = "checkbox")]
    Checkbox { value: bool },
    #[serde(rename = "textInput")]
    TextInput {
        #[serde(default)]
        value: String,
    },
    #[serde(rename = "targetInput")]
    TargetInput {
        #[serde(default)]
        value: Vec<Target>,
    },
}

impl From<TaggedInput> for InputValue {
    fn from(t: TaggedInput) -> Self {
        match t {
            TaggedInput::Checkbox { value } => InputValue::Checkbox { value },
            TaggedInput::TextInput { value } => InputValue::TextInput { value },
            TaggedInput::TargetInput { value } => InputValue::TargetInput { value },
        }
    }
}

impl<'de> Deserialize<'de> for InputValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut raw = serde_json::Value::deserialize(deserializer)?;
        if let Some(obj) = raw.as_object_mut() {
            obj.entry("type")
                .or_insert_with(|| serde_json::Value::from("textInput"));
        }
        TaggedInput::deserialize(raw)
            .map(InputValue::from)
            .map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(default)]
    pub project_uid: String,
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub inputs: HashMap<String, InputValue>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Parameter {
    pub fn new(project_uid: impl Into<String>) -> Self {
        Self {
            project_uid: project_uid.into(),
            ..Default::default()
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, InputError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn with_input(mut self, key: impl Into<String>, value: InputValue) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    pub fn text_input(&self, key: &str) -> Result<&str, InputError> {
        match self.input(key)? {
            InputValue::TextInput { value } => Ok(value),
            other => Err(wrong_type(key, "textInput", other)),
        }
    }

    pub fn checkbox(&self, key: &str) -> Result<bool, InputError> {
        match self.input(key)? {
            InputValue::Checkbox { value } => Ok(*value),
            other => Err(wrong_type(key, "checkbox", other)),
        }
    }

    pub fn target_input(&self, key: &str) -> Result<&[Target], InputError> {
        match self.input(key)? {
            InputValue::TargetInput { value } => Ok(value),
            other => Err(wrong_type(key, "targetInput", other)),
        }
    }

    /// Every target across all `targetInput` inputs, ordered by input key.
    pub fn all_targets(&self) -> Vec<Target> {
        let mut keys: Vec<&String> = self.inputs.keys().collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|k| match &self.inputs[k] {
                InputValue::TargetInput { value } => Some(value.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn input(&self, key: &str) -> Result<&InputValue, InputError> {
        self.inputs
            .get(key)
            .ok_or_else(|| InputError::Missing(key.to_string()))
    }
}

fn wrong_type(key: &str, expected: &'static str, actual: &InputValue) -> InputError {
    InputError::WrongType {
        key: key.to_string(),
        expected,
        actual: actual.kind(),
    }
}
