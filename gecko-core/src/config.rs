//! Configuration model.
//!
//! The engine is configured with a nested mapping. Top-level sections are
//! fixed; each component section maps an instance name to that instance's
//! own mapping:
//!
//! ```toml
//! [GECKO]
//! eventsCapacity = 16
//!
//! [INTERCEPTORS.auth]
//! type = "TokenInterceptor"
//! priority = 10
//! topics = ["/gate/#"]
//! ```
//!
//! Section and instance order is preserved; it defines registration order.

use crate::{
    error::{ConfigError, TopicError},
    topic::TopicExpr,
};
use serde_json::{Map, Value};

/// Name of the engine tunables section.
pub const SECTION_GECKO: &str = "GECKO";
/// Name of the shared globals section.
pub const SECTION_GLOBALS: &str = "GLOBALS";
/// Name of the pipelines section.
pub const SECTION_PIPELINES: &str = "PIPELINES";
/// Name of the interceptors section.
pub const SECTION_INTERCEPTORS: &str = "INTERCEPTORS";
/// Name of the drivers section.
pub const SECTION_DRIVERS: &str = "DRIVERS";
/// Name of the devices section.
pub const SECTION_DEVICES: &str = "DEVICES";
/// Name of the triggers section.
pub const SECTION_TRIGGERS: &str = "TRIGGERS";
/// Name of the plugins section.
pub const SECTION_PLUGINS: &str = "PLUGINS";

/// Read-only view over one configuration mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentConfig {
    values: Map<String, Value>,
}

impl ComponentConfig {
    /// Wrap an existing mapping.
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Raw value for `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// String value for `key`, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// String value for `key`, or an error naming the key.
    pub fn must_str(&self, key: &str) -> Result<&str, ConfigError> {
        self.get_str(key).ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "expected a string".to_string(),
        })
    }

    /// Integer value for `key`, if present and integral.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    /// Integer value for `key`, or `default` when absent.
    ///
    /// A present value of the wrong type is an error rather than silently
    /// replaced by the default.
    pub fn get_i64_or(&self, key: &str, default: i64) -> Result<i64, ConfigError> {
        match self.values.get(key) {
            None => Ok(default),
            Some(v) => v.as_i64().ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected an integer, found {v}"),
            }),
        }
    }

    /// Boolean value for `key`, or `default` when absent.
    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.values.get(key) {
            None => Ok(default),
            Some(v) => v.as_bool().ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected a boolean, found {v}"),
            }),
        }
    }

    /// List of strings for `key`; absent means empty.
    pub fn get_str_list(&self, key: &str) -> Result<Vec<String>, ConfigError> {
        let Some(value) = self.values.get(key) else {
            return Ok(Vec::new());
        };
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "expected a list of strings".to_string(),
        };
        value
            .as_array()
            .ok_or_else(invalid)?
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(invalid))
            .collect()
    }

    /// Nested mapping for `key`; absent means empty.
    pub fn get_map(&self, key: &str) -> ComponentConfig {
        self.values
            .get(key)
            .and_then(Value::as_object)
            .cloned()
            .map(ComponentConfig::new)
            .unwrap_or_default()
    }

    /// Compile the `topics` list into topic expressions.
    pub fn topic_exprs(&self) -> Result<Vec<TopicExpr>, TopicExprConfigError> {
        let topics = self.get_str_list("topics")?;
        Ok(TopicExpr::parse_all(topics)?)
    }

    /// The underlying mapping.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }
}

/// Error from [`ComponentConfig::topic_exprs`].
#[derive(thiserror::Error, Debug)]
pub enum TopicExprConfigError {
    /// `topics` is not a list of strings.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// One of the expressions does not compile.
    #[error(transparent)]
    Topic(#[from] TopicError),
}

/// One component instance declared in a section.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceConfig {
    /// Instance name (the key in its section).
    pub name: String,
    /// Instance configuration passed to `on_init`.
    pub config: ComponentConfig,
}

impl InstanceConfig {
    /// Factory name: the `type` key, defaulting to the instance name.
    pub fn type_name(&self) -> &str {
        self.config.get_str("type").unwrap_or(&self.name)
    }

    /// Whether the instance is switched off with `disabled = true`.
    pub fn is_disabled(&self) -> bool {
        self.config
            .get("disabled")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// The whole engine configuration, split into sections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeckoConfig {
    /// Engine tunables.
    pub gecko: ComponentConfig,
    /// Values shared with every component.
    pub globals: ComponentConfig,
    /// `PIPELINES` section, `None` if absent.
    pub pipelines: Option<Vec<InstanceConfig>>,
    /// `INTERCEPTORS` section, `None` if absent.
    pub interceptors: Option<Vec<InstanceConfig>>,
    /// `DRIVERS` section, `None` if absent.
    pub drivers: Option<Vec<InstanceConfig>>,
    /// `DEVICES` section, `None` if absent.
    pub devices: Option<Vec<InstanceConfig>>,
    /// `TRIGGERS` section, `None` if absent.
    pub triggers: Option<Vec<InstanceConfig>>,
    /// `PLUGINS` section, `None` if absent.
    pub plugins: Option<Vec<InstanceConfig>>,
}

impl GeckoConfig {
    /// Split a JSON value into sections.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let Value::Object(mut root) = value else {
            return Err(ConfigError::Parse("root must be a mapping".to_string()));
        };
        let mut plain = |name: &'static str| -> Result<ComponentConfig, ConfigError> {
            match root.remove(name) {
                None => Ok(ComponentConfig::default()),
                Some(Value::Object(map)) => Ok(ComponentConfig::new(map)),
                Some(_) => Err(not_a_mapping(name)),
            }
        };
        let gecko = plain(SECTION_GECKO)?;
        let globals = plain(SECTION_GLOBALS)?;
        Ok(Self {
            gecko,
            globals,
            pipelines: section(&mut root, SECTION_PIPELINES)?,
            interceptors: section(&mut root, SECTION_INTERCEPTORS)?,
            drivers: section(&mut root, SECTION_DRIVERS)?,
            devices: section(&mut root, SECTION_DEVICES)?,
            triggers: section(&mut root, SECTION_TRIGGERS)?,
            plugins: section(&mut root, SECTION_PLUGINS)?,
        })
    }

    /// Parse TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let value: Value = toml::from_str(text)?;
        Self::from_value(value)
    }
}

fn not_a_mapping(key: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: "expected a mapping".to_string(),
    }
}

fn section(
    root: &mut Map<String, Value>,
    name: &'static str,
) -> Result<Option<Vec<InstanceConfig>>, ConfigError> {
    let Some(value) = root.remove(name) else {
        return Ok(None);
    };
    let Value::Object(instances) = value else {
        return Err(not_a_mapping(name));
    };
    instances
        .into_iter()
        .map(|(instance, value)| match value {
            Value::Object(map) => Ok(InstanceConfig {
                name: instance,
                config: ComponentConfig::new(map),
            }),
            _ => Err(not_a_mapping(&format!("{name}.{instance}"))),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}
