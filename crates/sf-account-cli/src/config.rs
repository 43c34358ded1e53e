use std::collections::BTreeMap;
use std::path::Path;

use ini::Ini;
use tracing::{info, warn};

use crate::error::ConfigError;

/// INI section holding the credentials.
pub const SECTION: &str = "salesforce";
pub const DEFAULT_DOMAIN: &str = "login";

const REQUIRED_KEYS: &[&str] = &["username", "password", "security_token"];

/// Config key -> environment variable consulted when the key is absent from the file.
const ENV_VARS: &[(&str, &str)] = &[
    ("username", "SF_USERNAME"),
    ("password", "SF_PASSWORD"),
    ("security_token", "SF_SECURITY_TOKEN"),
    ("domain", "SF_DOMAIN"),
    ("consumer_key", "SF_CONSUMER_KEY"),
    ("consumer_secret", "SF_CONSUMER_SECRET"),
];

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub security_token: String,
    pub domain: String,
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
}

impl Credentials {
    /// The connected-app key/secret, only when both halves are set.
    pub fn consumer_pair(&self) -> Option<(&str, &str)> {
        match (self.consumer_key.as_deref(), self.consumer_secret.as_deref()) {
            (Some(key), Some(secret)) if is_present(key) && is_present(secret) => {
                Some((key, secret))
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("security_token", &"[redacted]")
            .field("domain", &self.domain)
            .field("consumer_key", &self.consumer_key.as_ref().map(|_| "[redacted]"))
            .field(
                "consumer_secret",
                &self.consumer_secret.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}

/// A value counts as present when it is non-empty after trimming.
pub fn is_present(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Resolve credentials: `[salesforce]` section of the config file first, then
/// environment variables (after loading a local `.env`, if any).
pub fn resolve(config_path: Option<&Path>) -> Result<Credentials, ConfigError> {
    dotenvy::dotenv().ok();
    let file = load_section(config_path)?;
    resolve_with(&file, |k| std::env::var(k))
}

fn load_section(path: Option<&Path>) -> Result<BTreeMap<String, String>, ConfigError> {
    let Some(path) = path else {
        return Ok(BTreeMap::new());
    };
    if !path.exists() {
        warn!("Config file {} not found, using environment", path.display());
        return Ok(BTreeMap::new());
    }
    let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let values = section_values(&ini);
    if !values.is_empty() {
        info!("Loaded configuration from {}", path.display());
    }
    Ok(values)
}

/// Keys of the credentials section, lowercased.
fn section_values(ini: &Ini) -> BTreeMap<String, String> {
    ini.section(Some(SECTION))
        .map(|props| {
            props
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn resolve_with(
    file: &BTreeMap<String, String>,
    env_var: impl Fn(&str) -> Result<String, std::env::VarError>,
) -> Result<Credentials, ConfigError> {
    let mut values: BTreeMap<&str, String> = BTreeMap::new();
    for &(key, var) in ENV_VARS {
        if let Some(val) = file.get(key) {
            values.insert(key, val.clone());
        } else if let Ok(val) = env_var(var)
            && !val.is_empty()
        {
            values.insert(key, val);
        }
    }

    let missing: Vec<&'static str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|key| !values.get(key).is_some_and(|v| is_present(v)))
        .collect();
    if !missing.is_empty() {
        return Err(ConfigError::MissingKeys(missing));
    }

    let mut take = |key: &str| values.remove(key);
    Ok(Credentials {
        username: take("username").unwrap_or_default(),
        password: take("password").unwrap_or_default(),
        security_token: take("security_token").unwrap_or_default(),
        domain: take("domain")
            .filter(|d| is_present(d))
            .unwrap_or_else(|| DEFAULT_DOMAIN.to_string()),
        consumer_key: take("consumer_key"),
        consumer_secret: take("consumer_secret"),
    })
}
