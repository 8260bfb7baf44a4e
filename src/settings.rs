use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error type for settings operations
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(String),

    #[error("Python parse error: {0}")]
    PythonParse(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),

    #[error("Setting not found: {0}")]
    SettingNotFound(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Result type for settings operations
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Settings format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsFormat {
    /// TOML format
    Toml,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Python-style `KEY = VALUE` lines
    Python,
}

impl SettingsFormat {
    /// Detect the format from a file path
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension().and_then(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            match ext.as_str() {
                "toml" => Some(Self::Toml),
                "json" => Some(Self::Json),
                "yaml" | "yml" => Some(Self::Yaml),
                "py" => Some(Self::Python),
                _ => None,
            }
        })
    }
}

/// Parse a literal the way a Python settings file writes it.
///
/// Booleans, `None`, integers, floats, quoted strings and flat lists are
/// recognised; anything else is kept as a bare string.
pub fn parse_python_value(value: &str) -> Value {
    let value = value.trim();
    match value {
        "True" | "true" => return Value::Bool(true),
        "False" | "false" => return Value::Bool(false),
        "None" | "null" => return Value::Null,
        _ => {}
    }

    if let Ok(num) = value.parse::<i64>() {
        return Value::Number(num.into());
    }
    if let Ok(num) = value.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(num) {
            return Value::Number(num);
        }
    }

    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted {
        return Value::String(value[1..value.len() - 1].to_string());
    }

    let listed = value.len() >= 2
        && ((value.starts_with('[') && value.ends_with(']'))
            || (value.starts_with('(') && value.ends_with(')')));
    if listed {
        let items = value[1..value.len() - 1]
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_python_value)
            .collect();
        return Value::Array(items);
    }

    Value::String(value.to_string())
}

fn python_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(python_literal).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(_) => format!("'{}'", value),
    }
}

/// Flat key/value settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Raw settings as key-value pairs
    #[serde(flatten)]
    pub raw: BTreeMap<String, Value>,

    /// Path to the settings file, if loaded from a file
    #[serde(skip)]
    pub file_path: Option<PathBuf>,
}

impl Settings {
    /// Create a new empty settings object
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from a file, choosing the format by extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let format = SettingsFormat::from_path(path)
            .ok_or_else(|| SettingsError::UnknownFormat(path.to_string_lossy().to_string()))?;

        let contents = fs::read_to_string(path)?;
        let mut settings = match format {
            SettingsFormat::Toml => Self::from_toml(&contents)?,
            SettingsFormat::Json => Self::from_json(&contents)?,
            SettingsFormat::Yaml => Self::from_yaml(&contents)?,
            SettingsFormat::Python => Self::from_python(&contents)?,
        };

        settings.file_path = Some(path.to_path_buf());
        Ok(settings)
    }

    fn from_raw(raw: BTreeMap<String, Value>) -> Self {
        Self {
            raw,
            file_path: None,
        }
    }

    /// Load settings from TOML
    pub fn from_toml(contents: &str) -> Result<Self> {
        let raw = toml::from_str(contents).map_err(|e| SettingsError::TomlParse(e.to_string()))?;
        Ok(Self::from_raw(raw))
    }

    /// Load settings from JSON
    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(Self::from_raw(serde_json::from_str(contents)?))
    }

    /// Load settings from YAML
    pub fn from_yaml(_contents: &str) -> Result<Self> {
        #[cfg(feature = "yaml")]
        {
            let raw = serde_yaml::from_str(_contents)
                .map_err(|e| SettingsError::YamlParse(e.to_string()))?;
            Ok(Self::from_raw(raw))
        }

        #[cfg(not(feature = "yaml"))]
        {
            Err(SettingsError::YamlParse(
                "YAML support not enabled".to_string(),
            ))
        }
    }

    /// Load settings from Python-style `KEY = VALUE` lines
    pub fn from_python(contents: &str) -> Result<Self> {
        let mut raw = BTreeMap::new();

        for (number, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                SettingsError::PythonParse(format!("line {}: expected KEY = VALUE", number + 1))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(SettingsError::PythonParse(format!(
                    "line {}: missing setting name",
                    number + 1
                )));
            }
            raw.insert(key.to_string(), parse_python_value(value));
        }

        Ok(Self::from_raw(raw))
    }

    /// Get a setting as a specific type
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get_opt(key)?
            .ok_or_else(|| SettingsError::SettingNotFound(key.to_string()))
    }

    /// Get a setting if present; a present value of the wrong type is an error
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.raw.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| SettingsError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    /// Get a setting with a default value
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Set a setting
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.raw.insert(key.to_string(), value);
        Ok(())
    }

    /// Check if a setting exists
    pub fn contains(&self, key: &str) -> bool {
        self.raw.contains_key(key)
    }

    /// Remove a setting
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.raw.remove(key)
    }

    /// Overlay another set of settings on top of this one
    pub fn merge(&mut self, other: Settings) {
        self.raw.extend(other.raw);
    }

    /// Get all settings
    pub fn all(&self) -> &BTreeMap<String, Value> {
        &self.raw
    }

    /// Save settings to a file, choosing the format by extension
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let format = SettingsFormat::from_path(path)
            .ok_or_else(|| SettingsError::UnknownFormat(path.to_string_lossy().to_string()))?;

        let contents = match format {
            SettingsFormat::Toml => {
                toml::to_string(&self.raw).map_err(|e| SettingsError::TomlParse(e.to_string()))?
            }
            SettingsFormat::Json => serde_json::to_string_pretty(&self.raw)?,
            SettingsFormat::Yaml => {
                #[cfg(feature = "yaml")]
                {
                    serde_yaml::to_string(&self.raw)
                        .map_err(|e| SettingsError::YamlParse(e.to_string()))?
                }

                #[cfg(not(feature = "yaml"))]
                {
                    return Err(SettingsError::YamlParse(
                        "YAML support not enabled".to_string(),
                    ));
                }
            }
            SettingsFormat::Python => {
                let mut result = String::from("# crawlq settings\n\n");
                for (key, value) in &self.raw {
                    result.push_str(&format!("{} = {}\n", key, python_literal(value)));
                }
                result
            }
        };

        fs::write(path, contents)?;
        Ok(())
    }
}
