use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt, Result};
use crate::store::PeerId;
use crate::transport::RemoteUrl;

/// default timeout for store and network operations
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// repository configuration stored in .dsv/config.toml
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserConfig>,
    /// command used to edit commit messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
    /// url of the dataset this repository syncs with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// peers connected whenever the store is opened
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<PeerId>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            peers: vec![],
        }
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// commit author identity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

impl Config {
    /// load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }

    /// author identity; both name and email must be set
    pub fn author(&self) -> Option<Author> {
        let user = self.user.as_ref()?;
        if user.name.trim().is_empty() || user.email.trim().is_empty() {
            return None;
        }
        Some(Author {
            name: user.name.trim().to_string(),
            email: user.email.trim().to_string(),
        })
    }

    /// parsed remote, if one is configured
    pub fn remote(&self) -> Result<Option<RemoteUrl>> {
        self.remote.as_deref().map(RemoteUrl::parse).transpose()
    }

    /// editor command, falling back to $EDITOR
    pub fn editor_command(&self) -> Option<String> {
        self.editor
            .clone()
            .filter(|e| !e.trim().is_empty())
            .or_else(|| std::env::var("EDITOR").ok().filter(|e| !e.trim().is_empty()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.store.timeout_secs)
    }

    /// value at a dotted key such as `user.name`
    pub fn get_path(&self, key: &str) -> Result<toml::Value> {
        let tree = toml::Value::try_from(self)?;
        let mut node = &tree;
        for part in split_key(key)? {
            node = node
                .get(part)
                .ok_or_else(|| Error::ConfigKey(key.to_string()))?;
        }
        Ok(node.clone())
    }

    /// set a dotted key, creating tables on the way
    ///
    /// `true`/`false` and numbers are stored typed when the field accepts
    /// them; the edited config must still decode or nothing changes.
    pub fn set_path(&mut self, key: &str, value: &str) -> Result<()> {
        let parts = split_key(key)?;

        match self.with_value(key, &parts, promote(value)) {
            Ok(config) => *self = config,
            Err(promoted_err) => match self.with_value(key, &parts, toml::Value::String(value.to_string())) {
                Ok(config) => *self = config,
                Err(_) => return Err(promoted_err),
            },
        }
        Ok(())
    }

    /// remove a dotted key
    pub fn delete_path(&mut self, key: &str) -> Result<()> {
        let parts = split_key(key)?;
        let mut tree = toml::Value::try_from(&*self)?;

        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| Error::ConfigKey(key.to_string()))?;
        let table = walk_tables(&mut tree, parents, key, false)?;
        if table.remove(*last).is_none() {
            return Err(Error::ConfigKey(key.to_string()));
        }

        *self = tree.try_into()?;
        Ok(())
    }

    fn with_value(&self, key: &str, parts: &[&str], value: toml::Value) -> Result<Config> {
        let mut tree = toml::Value::try_from(self)?;

        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| Error::ConfigKey(key.to_string()))?;
        let table = walk_tables(&mut tree, parents, key, true)?;
        table.insert((*last).to_string(), value);

        Ok(tree.try_into()?)
    }
}

fn split_key(key: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(Error::ConfigKey(key.to_string()));
    }
    Ok(parts)
}

/// descend through `parts`, returning the innermost table
fn walk_tables<'a>(
    tree: &'a mut toml::Value,
    parts: &[&str],
    key: &str,
    create: bool,
) -> Result<&'a mut toml::Table> {
    let mut node = tree;
    for part in parts {
        let table = node
            .as_table_mut()
            .ok_or_else(|| Error::ConfigKey(key.to_string()))?;
        if create && !table.contains_key(*part) {
            table.insert((*part).to_string(), toml::Value::Table(toml::Table::new()));
        }
        node = table
            .get_mut(*part)
            .ok_or_else(|| Error::ConfigKey(key.to_string()))?;
    }
    node.as_table_mut()
        .ok_or_else(|| Error::ConfigKey(key.to_string()))
}

/// typed value for a raw string: bool, then integer, then float
fn promote(raw: &str) -> toml::Value {
    if let Ok(b) = raw.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() => toml::Value::Float(f),
        _ => toml::Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn configured() -> Config {
        Config {
            user: Some(UserConfig {
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
            }),
            editor: Some("vi".to_string()),
            remote: Some("http://data.example/acme/weather".to_string()),
            store: StoreConfig {
                timeout_secs: 5,
                peers: vec![PeerId::new("http://mirror.example/")],
            },
        }
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = configured();

        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_config_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert!(config.author().is_none());
        assert!(config.remote().unwrap().is_none());
    }

    #[test]
    fn test_author_requires_both_fields() {
        let mut config = configured();
        assert_eq!(
            config.author().unwrap().to_string(),
            "Ada <ada@example.com>"
        );

        config.user.as_mut().unwrap().email = "  ".to_string();
        assert!(config.author().is_none());
    }

    #[test]
    fn test_remote_parsed() {
        let remote = configured().remote().unwrap().unwrap();
        assert_eq!(remote.org(), "acme");
        assert_eq!(remote.dataset(), "weather");

        let mut config = configured();
        config.remote = Some("nonsense".to_string());
        assert!(matches!(config.remote(), Err(Error::InvalidRemote { .. })));
    }

    #[test]
    fn test_editor_from_config() {
        assert_eq!(configured().editor_command().as_deref(), Some("vi"));
    }

    #[test]
    fn test_get_path() {
        let config = configured();
        assert_eq!(
            config.get_path("user.name").unwrap(),
            toml::Value::String("Ada".to_string())
        );
        assert_eq!(
            config.get_path("store.timeout_secs").unwrap(),
            toml::Value::Integer(5)
        );
        assert!(matches!(
            config.get_path("user.phone"),
            Err(Error::ConfigKey(_))
        ));
        assert!(matches!(config.get_path("user..name"), Err(Error::ConfigKey(_))));
    }

    #[test]
    fn test_set_path_creates_tables() {
        let mut config = Config::default();
        config.set_path("user.name", "Grace").unwrap();
        config.set_path("user.email", "grace@example.com").unwrap();

        assert_eq!(config.author().unwrap().name, "Grace");
    }

    #[test]
    fn test_set_path_promotes_numbers() {
        let mut config = Config::default();
        config.set_path("store.timeout_secs", "90").unwrap();
        assert_eq!(config.store.timeout_secs, 90);

        // numeric-looking strings stay strings where a string is expected
        config.set_path("user.name", "1234").unwrap();
        assert_eq!(config.user.unwrap().name, "1234");
    }

    #[test]
    fn test_huge_timeout_does_not_panic() {
        let mut config = Config::default();
        config
            .set_path("store.timeout_secs", "9223372036854775807")
            .unwrap();
        let deadline = crate::deadline::Deadline::after(config.timeout());
        assert!(deadline.check().is_ok());
    }

    #[test]
    fn test_set_path_rejects_invalid_edit() {
        let mut config = configured();
        assert!(config.set_path("store.timeout_secs", "soon").is_err());
        assert_eq!(config.store.timeout_secs, 5);

        assert!(config.set_path("remote.inner", "x").is_err());
    }

    #[test]
    fn test_delete_path() {
        let mut config = configured();
        config.delete_path("editor").unwrap();
        assert!(config.editor.is_none());

        config.delete_path("store.timeout_secs").unwrap();
        assert_eq!(config.store.timeout_secs, DEFAULT_TIMEOUT_SECS);

        assert!(matches!(
            config.delete_path("editor"),
            Err(Error::ConfigKey(_))
        ));
    }

    #[test]
    fn test_promote() {
        assert_eq!(promote("true"), toml::Value::Boolean(true));
        assert_eq!(promote("-3"), toml::Value::Integer(-3));
        assert_eq!(promote("2.5"), toml::Value::Float(2.5));
        assert_eq!(promote("inf"), toml::Value::String("inf".to_string()));
        assert_eq!(promote("hello"), toml::Value::String("hello".to_string()));
    }
}
