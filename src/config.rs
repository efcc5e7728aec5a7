// merakictl - CLI for the Meraki Dashboard API
// Copyright (C) 2024 Mathias Uhl <mathiasuhl@gmx.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use anyhow::{Context, Result};
use chrono::FixedOffset;
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::paginate::DEFAULT_MAX_PAGES;

pub const DEFAULT_BASE_URL: &str = "https://api.meraki.com/api/v1";
pub const DEFAULT_UTC_OFFSET: &str = "+08:00";

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_pages: Option<usize>,
    pub utc_offset: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Local,
    User,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not locate a writable config directory for the current user")]
    MissingConfigDir,
    #[error(
        "API key is required; set it with `merakictl configure --key <key>`, --api-key or MERAKI_DASHBOARD_API_KEY"
    )]
    MissingApiKey,
    #[error("invalid utc_offset `{0}`; expected something like +08:00")]
    InvalidUtcOffset(String),
}

#[derive(Debug)]
pub struct EffectiveConfig {
    pub api_key: String,
    pub base_url: String,
    pub max_pages: usize,
    pub utc_offset: FixedOffset,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

pub fn config_path(scope: Scope, cwd: &Path) -> Result<PathBuf> {
    match scope {
        Scope::Local => Ok(cwd.join(".merakictl.yaml")),
        Scope::User => {
            if let Ok(custom) = env::var("MERAKICTL_CONFIG_DIR") {
                return Ok(PathBuf::from(custom).join("config.yaml"));
            }
            let base = config_dir().ok_or(ConfigError::MissingConfigDir)?;
            Ok(base.join("merakictl").join("config.yaml"))
        }
    }
}

pub fn load(cwd: &Path) -> Result<Config> {
    let user = read_if_exists(&config_path(Scope::User, cwd)?)?.unwrap_or_default();
    let local = read_if_exists(&config_path(Scope::Local, cwd)?)?.unwrap_or_default();
    Ok(merge(user, local))
}

pub fn load_scope(scope: Scope, cwd: &Path) -> Result<Config> {
    Ok(read_if_exists(&config_path(scope, cwd)?)?.unwrap_or_default())
}

pub fn save(scope: Scope, config: &Config, cwd: &Path) -> Result<PathBuf> {
    let path = config_path(scope, cwd)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    let serialized = serde_yaml::to_string(config).context("serializing config")?;
    fs::write(&path, serialized).with_context(|| format!("writing {:?}", path))?;
    Ok(path)
}

/// Merge config files with command-line overrides.
///
/// A missing API key is not resolved here; `prompt_key` is called instead so
/// the caller decides whether asking is possible.
pub fn resolve<F>(cwd: &Path, overrides: Overrides, prompt_key: F) -> Result<EffectiveConfig>
where
    F: FnOnce() -> Result<Option<String>>,
{
    let mut merged = load(cwd)?;

    if let Some(key) = overrides.api_key {
        merged.api_key = Some(key);
    }
    if let Some(url) = overrides.base_url {
        merged.base_url = Some(url);
    }

    let api_key = match merged.api_key.filter(|k| !k.trim().is_empty()) {
        Some(key) => key,
        None => prompt_key()?.ok_or(ConfigError::MissingApiKey)?,
    };
    let api_key = api_key.trim().to_string();
    if api_key.is_empty() {
        return Err(ConfigError::MissingApiKey.into());
    }

    let base_url = merged
        .base_url
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let max_pages = merged.max_pages.unwrap_or(DEFAULT_MAX_PAGES);
    let utc_offset = parse_offset(merged.utc_offset.as_deref().unwrap_or(DEFAULT_UTC_OFFSET))?;

    Ok(EffectiveConfig {
        api_key,
        base_url,
        max_pages,
        utc_offset,
    })
}

pub fn parse_offset(raw: &str) -> Result<FixedOffset, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("utc") || trimmed.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0).ok_or_else(|| ConfigError::InvalidUtcOffset(raw.into()));
    }
    trimmed
        .parse::<FixedOffset>()
        .map_err(|_| ConfigError::InvalidUtcOffset(raw.into()))
}

fn read_if_exists(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let config = serde_yaml::from_str(&contents).with_context(|| format!("parsing {:?}", path))?;
    Ok(Some(config))
}

fn merge(user: Config, local: Config) -> Config {
    Config {
        api_key: local.api_key.or(user.api_key),
        base_url: local.base_url.or(user.base_url),
        max_pages: local.max_pages.or(user.max_pages),
        utc_offset: local.utc_offset.or(user.utc_offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;
    use std::{env, fs};
    use tempfile::tempdir;

    static ENV_LOCK: OnceLock<std::sync::Mutex<()>> = OnceLock::new();

    fn isolated_dir() -> tempfile::TempDir {
        let cwd = tempdir().unwrap();
        unsafe {
            env::set_var("MERAKICTL_CONFIG_DIR", cwd.path().join("config"));
        }
        fs::create_dir_all(cwd.path().join("config")).unwrap();
        cwd
    }

    #[test]
    fn merges_user_and_local_and_overrides() {
        let _guard = ENV_LOCK
            .get_or_init(|| std::sync::Mutex::new(()))
            .lock()
            .unwrap();
        let cwd = isolated_dir();

        let user_cfg = Config {
            api_key: Some("user-key".into()),
            base_url: Some("https://example.test/api/v1".into()),
            max_pages: Some(50),
            utc_offset: Some("+02:00".into()),
        };
        save(Scope::User, &user_cfg, cwd.path()).unwrap();

        let local_cfg = Config {
            api_key: Some("local-key".into()),
            base_url: None,
            max_pages: None,
            utc_offset: Some("-05:00".into()),
        };
        save(Scope::Local, &local_cfg, cwd.path()).unwrap();

        let effective = resolve(cwd.path(), Overrides::default(), || Ok(None)).unwrap();
        assert_eq!(effective.api_key, "local-key");
        assert_eq!(effective.base_url, "https://example.test/api/v1");
        assert_eq!(effective.max_pages, 50);
        assert_eq!(effective.utc_offset.local_minus_utc(), -5 * 3600);

        let overridden = resolve(
            cwd.path(),
            Overrides {
                api_key: Some(" override \n".into()),
                base_url: Some("https://override.test".into()),
            },
            || Ok(None),
        )
        .unwrap();
        assert_eq!(overridden.api_key, "override");
        assert_eq!(overridden.base_url, "https://override.test");
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let _guard = ENV_LOCK
            .get_or_init(|| std::sync::Mutex::new(()))
            .lock()
            .unwrap();
        let cwd = isolated_dir();

        let effective = resolve(
            cwd.path(),
            Overrides {
                api_key: Some("k".into()),
                base_url: None,
            },
            || Ok(None),
        )
        .unwrap();
        assert_eq!(effective.base_url, DEFAULT_BASE_URL);
        assert_eq!(effective.max_pages, DEFAULT_MAX_PAGES);
        assert_eq!(effective.utc_offset.local_minus_utc(), 8 * 3600);
    }

    #[test]
    fn prompts_only_when_key_missing() {
        let _guard = ENV_LOCK
            .get_or_init(|| std::sync::Mutex::new(()))
            .lock()
            .unwrap();
        let cwd = isolated_dir();

        let effective =
            resolve(cwd.path(), Overrides::default(), || Ok(Some("typed".into()))).unwrap();
        assert_eq!(effective.api_key, "typed");

        let err = resolve(cwd.path(), Overrides::default(), || Ok(None)).unwrap_err();
        assert!(err.to_string().contains("API key is required"));
    }

    #[test]
    fn rejects_bad_offsets() {
        assert_eq!(parse_offset("UTC").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_offset("+05:30").unwrap().local_minus_utc(), 19800);
        assert!(matches!(
            parse_offset("Asia/Singapore"),
            Err(ConfigError::InvalidUtcOffset(_))
        ));
    }
}
