//! Client settings resolved from the command line, the environment and a `.env` file

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Production API endpoint
pub const DEFAULT_API_URL: &str = "https://portmap.io/api";

const TOKEN_ENV: &str = "PORTMAP_TOKEN";
const API_URL_ENV: &str = "PORTMAP_API_URL";

/// Read when no `--env-file` is given; may be absent
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Settings needed to talk to the resource API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub token: String,
    pub api_url: String,
}

impl Settings {
    /// Resolve `PORTMAP_TOKEN` / `PORTMAP_API_URL`. Flags win, then the
    /// process environment, then the env file.
    pub fn resolve(
        token: Option<String>,
        api_url: Option<String>,
        env_file: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let file_vars = load_env_file(env_file)?;
        Self::resolve_with(
            token,
            api_url,
            layered(|name| std::env::var(name).ok(), &file_vars),
        )
    }

    fn resolve_with<F>(
        token: Option<String>,
        api_url: Option<String>,
        env: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = token
            .or_else(|| env(TOKEN_ENV))
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingSetting {
                name: "API token".to_string(),
            })?;

        let api_url = api_url
            .or_else(|| env(API_URL_ENV))
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        Ok(Self {
            token: token.trim().to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Load `KEY=value` pairs without touching the process environment. An
/// explicitly named file must exist; the default one is optional.
pub fn load_env_file(path: Option<&Path>) -> Result<HashMap<String, String>, ConfigError> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_ENV_FILE), false),
    };
    let env_file_error = |e: dotenvy::Error| ConfigError::EnvFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    let entries = match dotenvy::from_path_iter(&path) {
        Ok(entries) => entries,
        Err(e) if !required && e.not_found() => return Ok(HashMap::new()),
        Err(e) => return Err(env_file_error(e)),
    };

    let vars = entries
        .collect::<Result<HashMap<_, _>, _>>()
        .map_err(env_file_error)?;
    tracing::debug!("Loaded {} entries from {}", vars.len(), path.display());
    Ok(vars)
}

/// Process environment first; blank values fall through to the file
fn layered<'a, F>(
    process_env: F,
    file_vars: &'a HashMap<String, String>,
) -> impl Fn(&str) -> Option<String> + 'a
where
    F: Fn(&str) -> Option<String> + 'a,
{
    move |name| {
        process_env(name)
            .filter(|v| !v.trim().is_empty())
            .or_else(|| file_vars.get(name).cloned())
    }
}
