use serde::{Deserialize, Serialize};

/// Enumeration modules gather information; attack modules act on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleType {
    #[serde(rename = "EnumerationModule")]
    Enumeration,
    #[serde(rename = "AttackModule")]
    Attack,
}

impl ModuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Enumeration => "EnumerationModule",
            ModuleType::Attack => "AttackModule",
        }
    }
}

/// A named, versioned capability descriptor.
///
/// `dependency_vector` is derived on read (ordered ancestor keys) and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    pub module_type: ModuleType,
    /// Free-form category tag from the implementation metadata (e.g. "exploit simulation").
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub attack_id: String,
    #[serde(default)]
    pub execution_metric: String,
    #[serde(default)]
    pub loot_path: String,
    #[serde(default)]
    pub risk: u8,
    #[serde(default)]
    pub stealth: u8,
    #[serde(default)]
    pub complexity: u8,
    #[serde(default)]
    pub options: Vec<ModuleOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependency_vector: Vec<String>,
}

impl Module {
    pub fn new(key: impl Into<String>, module_type: ModuleType) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            version: String::new(),
            author: String::new(),
            description: String::new(),
            module_type,
            category: String::new(),
            attack_id: String::new(),
            execution_metric: String::new(),
            loot_path: String::new(),
            risk: 0,
            stealth: 0,
            complexity: 0,
            options: Vec::new(),
            dependency_vector: Vec::new(),
        }
    }

    /// Copy without the derived fields, the shape that gets persisted.
    pub fn stored(&self) -> Module {
        Module {
            options: Vec::new(),
            dependency_vector: Vec::new(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleOptionType {
    #[serde(rename = "checkbox")]
    Checkbox,
    #[serde(rename = "textInput")]
    TextInput,
    #[serde(rename = "userSelection")]
    UserSelection,
    #[serde(rename = "targetSelection")]
    TargetSelection,
}

impl std::str::FromStr for ModuleOptionType {
    type Err = crate::error::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkbox" => Ok(Self::Checkbox),
            "textInput" => Ok(Self::TextInput),
            "userSelection" => Ok(Self::UserSelection),
            "targetSelection" => Ok(Self::TargetSelection),
            other => Err(crate::error::ConfigError::InvalidOptionType(other.to_string())),
        }
    }
}

/// A typed, labeled input a module declares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleOption {
    pub key: String,
    #[serde(rename = "type")]
    pub option_type: ModuleOptionType,
    #[serde(default)]
    pub required: bool,
    pub module_key: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub placeholder: String,
}

/// Directed edge: `previous_module` must run before `next_module`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleDependency {
    pub previous_module: String,
    pub next_module: String,
}

impl ModuleDependency {
    pub fn new(previous: impl Into<String>, next: impl Into<String>) -> Self {
        Self {
            previous_module: previous.into(),
            next_module: next.into(),
        }
    }
}

/// Derived view over modules and edges: the whole registry or a neighborhood of one module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InheritanceGraph {
    pub nodes: Vec<Module>,
    pub edges: Vec<ModuleDependency>,
}

impl InheritanceGraph {
    pub fn node_keys(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.key.as_str()).collect()
    }
}
