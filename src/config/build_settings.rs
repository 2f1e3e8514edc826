//! Ordered xcodebuild settings from the `[build]` table.

use std::fmt;

use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde::Serialize;

/// Key handled by the command builder itself; never taken from config.
pub(crate) const COVERAGE_SETTING: &str = "enableCodeCoverage";

/// xcodebuild settings in configuration-file order.
///
/// Each entry becomes a `-key value` argument pair. Order is preserved so
/// the resolved command line is reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildSettings(Vec<(String, String)>);

impl BuildSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a setting; a repeated key replaces the earlier value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The scheme identifier, if configured and non-empty.
    pub fn scheme(&self) -> Option<&str> {
        self.get("scheme").filter(|s| !s.trim().is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for BuildSettings
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut settings = BuildSettings::new();
        for (k, v) in iter {
            settings.insert(k, v);
        }
        settings
    }
}

/// Scalar setting value as written in TOML.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum SettingValue {
    Text(String),
    Flag(bool),
    Integer(i64),
}

impl SettingValue {
    fn into_string(self) -> String {
        match self {
            SettingValue::Text(s) => s,
            // xcodebuild spells booleans YES/NO
            SettingValue::Flag(true) => "YES".to_string(),
            SettingValue::Flag(false) => "NO".to_string(),
            SettingValue::Integer(n) => n.to_string(),
        }
    }
}

impl<'de> Deserialize<'de> for BuildSettings {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SettingsVisitor;

        impl<'de> Visitor<'de> for SettingsVisitor {
            type Value = BuildSettings;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a table of xcodebuild settings with string, boolean or integer values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut settings = BuildSettings::new();
                while let Some((key, value)) = map.next_entry::<String, SettingValue>()? {
                    settings.insert(key, value.into_string());
                }
                Ok(settings)
            }
        }

        deserializer.deserialize_map(SettingsVisitor)
    }
}
