use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::llm::provider::Provider;
use crate::workflow::ExhaustionPolicy;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub system: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub retry_delay: Option<u64>,
    pub output: Option<String>,
    pub history_limit: Option<usize>,
    pub on_exhaustion: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    profiles: Option<BTreeMap<String, ProfileConfig>>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot resolve config path: set RG_CONFIG or HOME/XDG_CONFIG_HOME.")]
    NoConfigPath,
    #[error("Failed to read config file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Config file '{}' does not contain a [profiles] section.", .path.display())]
    MissingProfiles { path: PathBuf },
    #[error("Profile '{name}' not found in config file '{}'.", .path.display())]
    ProfileNotFound { name: String, path: PathBuf },
    #[error("Invalid profile {field} '{value}' in profile '{profile}'. Supported values: {supported}.")]
    InvalidValue {
        profile: String,
        field: &'static str,
        value: String,
        supported: &'static str,
    },
}

pub fn load_profile(name: &str) -> Result<ProfileConfig, ConfigError> {
    let path = config_path()?;
    let profiles = read_profiles(&path)?;
    let profile = profiles
        .get(name)
        .cloned()
        .ok_or_else(|| ConfigError::ProfileNotFound {
            name: name.to_string(),
            path: path.clone(),
        })?;
    validate_profile(name, &profile)?;
    Ok(profile)
}

/// Parses the whole config file and checks every profile (or only `profile`).
pub fn validate_config(profile: Option<&str>) -> Result<PathBuf, ConfigError> {
    let path = config_path()?;
    let profiles = read_profiles(&path)?;

    match profile {
        Some(name) => {
            let config = profiles.get(name).ok_or_else(|| ConfigError::ProfileNotFound {
                name: name.to_string(),
                path: path.clone(),
            })?;
            validate_profile(name, config)?;
        }
        None => {
            for (name, config) in &profiles {
                validate_profile(name, config)?;
            }
        }
    }

    Ok(path)
}

fn read_profiles(path: &Path) -> Result<BTreeMap<String, ProfileConfig>, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: ConfigFile = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.profiles.ok_or_else(|| ConfigError::MissingProfiles {
        path: path.to_path_buf(),
    })
}

fn validate_profile(name: &str, profile: &ProfileConfig) -> Result<(), ConfigError> {
    let invalid = |field, value: &str, supported| ConfigError::InvalidValue {
        profile: name.to_string(),
        field,
        value: value.to_string(),
        supported,
    };

    if let Some(provider) = profile.provider.as_deref() {
        provider
            .parse::<Provider>()
            .map_err(|_| invalid("provider", provider, "openai, gemini"))?;
    }
    if let Some(output) = profile.output.as_deref() {
        if !matches!(output, "text" | "json") {
            return Err(invalid("output", output, "text, json"));
        }
    }
    if let Some(policy) = profile.on_exhaustion.as_deref() {
        policy
            .parse::<ExhaustionPolicy>()
            .map_err(|_| invalid("on_exhaustion", policy, "last-draft, fallback"))?;
    }
    Ok(())
}

fn config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = non_empty_env("RG_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    if let Some(xdg) = non_empty_env("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg).join("replygate").join("config.toml"));
    }
    let home = non_empty_env("HOME").ok_or(ConfigError::NoConfigPath)?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("replygate")
        .join("config.toml"))
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, ProfileConfig, validate_profile};

    #[test]
    fn valid_profile_passes() {
        let profile: ProfileConfig = toml::from_str(
            "provider = \"gemini\"\nmodel = \"gemini-2.5-flash\"\noutput = \"json\"\non_exhaustion = \"fallback\"\nhistory_limit = 4\n",
        )
        .unwrap();
        assert!(validate_profile("blog", &profile).is_ok());
        assert_eq!(profile.history_limit, Some(4));
    }

    #[test]
    fn invalid_provider_names_the_profile() {
        let profile = ProfileConfig {
            provider: Some("unknown".to_string()),
            ..ProfileConfig::default()
        };
        let err = validate_profile("blog", &profile).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "provider", .. }));
        assert_eq!(
            err.to_string(),
            "Invalid profile provider 'unknown' in profile 'blog'. Supported values: openai, gemini."
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<ProfileConfig>("temperature = 0.3\n").is_err());
    }
}
