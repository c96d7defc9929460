//! Backend-neutral create flags and the option bag handed to drivers

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::HostError;

/// Default value (and so the type) of a create flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagValue {
    Str(&'static str),
    Int(i64),
    Bool(bool),
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Str(s) => f.write_str(s),
            FlagValue::Int(n) => write!(f, "{n}"),
            FlagValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// One `--<name>` option a backend adds to `create`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateFlag {
    pub name: &'static str,
    pub usage: &'static str,
    pub default: FlagValue,
}

impl CreateFlag {
    pub const fn string(name: &'static str, usage: &'static str, default: &'static str) -> Self {
        Self {
            name,
            usage,
            default: FlagValue::Str(default),
        }
    }

    pub const fn int(name: &'static str, usage: &'static str, default: i64) -> Self {
        Self {
            name,
            usage,
            default: FlagValue::Int(default),
        }
    }

    pub const fn bool(name: &'static str, usage: &'static str) -> Self {
        Self {
            name,
            usage,
            default: FlagValue::Bool(false),
        }
    }
}

/// String-keyed option values for `configure_from_options`
///
/// Keys are flag names without the leading dashes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverOptions {
    values: BTreeMap<String, String>,
}

impl DriverOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options pre-populated with every flag's default
    pub fn with_defaults(flags: &[CreateFlag]) -> Self {
        let values = flags
            .iter()
            .map(|flag| (flag.name.to_string(), flag.default.to_string()))
            .collect();
        Self { values }
    }

    /// These options layered over the defaults of `flags`
    ///
    /// Keys missing here fall back to the flag default; keys present are kept
    /// as given.
    pub fn over_defaults(&self, flags: &[CreateFlag]) -> Self {
        let mut layered = Self::with_defaults(flags);
        layered.extend(self.iter());
        layered
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Overlay every entry of `other`
    pub fn extend<I, K, V>(&mut self, other: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in other {
            self.set(k, v);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Value of `key`, empty when unset
    pub fn string(&self, key: &str) -> String {
        self.values.get(key).cloned().unwrap_or_default()
    }

    /// Parsed value of `key`, `T::default()` when unset or empty
    pub fn number<T>(&self, key: &str) -> Result<T, HostError>
    where
        T: FromStr + Default,
        T::Err: fmt::Display,
    {
        match self.values.get(key).map(|v| v.trim()) {
            None | Some("") => Ok(T::default()),
            Some(raw) => raw.parse().map_err(|e: T::Err| HostError::InvalidOption {
                option: key.to_string(),
                reason: format!("{raw:?} is not a valid number: {e}"),
            }),
        }
    }

    /// Boolean value of `key`, `false` when unset
    pub fn bool(&self, key: &str) -> Result<bool, HostError> {
        match self
            .values
            .get(key)
            .map(|v| v.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("") | Some("false") | Some("0") | Some("no") => Ok(false),
            Some("true") | Some("1") | Some("yes") => Ok(true),
            Some(other) => Err(HostError::InvalidOption {
                option: key.to_string(),
                reason: format!("{other:?} is not a boolean"),
            }),
        }
    }

    /// Non-empty value of `key`, or `MissingRequiredOption` naming it
    pub fn require(&self, driver: &str, key: &str) -> Result<String, HostError> {
        let value = self.string(key);
        if value.trim().is_empty() {
            return Err(HostError::missing_option(driver, key));
        }
        Ok(value)
    }
}
