#![forbid(unsafe_code)]

//! Runtime configuration for the vidtube server.
//!
//! Values are resolved in a fixed order: explicit CLI override, process
//! environment, the `.env` file, then the built-in default.

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_DATABASE_FILE: &str = "vidtube.db";
pub const DEFAULT_PRINCIPAL_HEADER: &str = "x-user-id";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub media_root: PathBuf,
    pub database_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub public_base_url: String,
    pub principal_header: String,
    pub log_level: String,
    pub log_format: String,
    pub debug_errors: bool,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub media_root: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_config(&file_vars, env_var_string, overrides)
}

fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeConfig> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let media_root = overrides
        .media_root
        .or_else(|| lookup("MEDIA_ROOT").map(PathBuf::from))
        .ok_or_else(|| anyhow!("MEDIA_ROOT not set"))?;
    let database_path = overrides
        .database_path
        .or_else(|| lookup("DATABASE_PATH").map(PathBuf::from))
        .unwrap_or_else(|| media_root.join(DEFAULT_DATABASE_FILE));
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("VIDTUBE_HOST"))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| lookup("VIDTUBE_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_PORT);
    let public_base_url = lookup("PUBLIC_BASE_URL")
        .map(|value| value.trim_end_matches('/').to_string())
        .unwrap_or_else(|| format!("http://{host}:{port}"));
    let principal_header = lookup("PRINCIPAL_HEADER")
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_PRINCIPAL_HEADER.to_string());
    let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
    let log_format = lookup("LOG_FORMAT").unwrap_or_else(|| "compact".to_string());
    let debug_errors = lookup("DEBUG_ERRORS")
        .and_then(|value| parse_bool(&value))
        .unwrap_or(false);
    let max_upload_bytes = lookup("MAX_UPLOAD_BYTES")
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

    Ok(RuntimeConfig {
        media_root,
        database_path,
        host,
        port,
        public_base_url,
        principal_header,
        log_level,
        log_format,
        debug_errors,
        max_upload_bytes,
    })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

/// Parses a dotenv-style file. A missing file yields an empty map.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn config_from(contents: &str) -> RuntimeConfig {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_config(&vars, |_| None, RuntimeOverrides::default()).unwrap()
    }

    #[test]
    fn defaults_fill_everything_but_media_root() {
        let config = config_from("MEDIA_ROOT=\"/srv/media\"\n");
        assert_eq!(config.media_root, PathBuf::from("/srv/media"));
        assert_eq!(config.database_path, PathBuf::from("/srv/media/vidtube.db"));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.public_base_url, "http://127.0.0.1:8000");
        assert_eq!(config.principal_header, DEFAULT_PRINCIPAL_HEADER);
        assert!(!config.debug_errors);
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }

    #[test]
    fn missing_media_root_is_an_error() {
        let err = build_runtime_config(&HashMap::new(), |_| None, RuntimeOverrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("MEDIA_ROOT"));
    }

    #[test]
    fn reads_port_host_and_flags() {
        let config = config_from(
            "MEDIA_ROOT=/m\nVIDTUBE_PORT=9090\nVIDTUBE_HOST=0.0.0.0\nDEBUG_ERRORS=yes\nPRINCIPAL_HEADER=X-Principal\nPUBLIC_BASE_URL=https://cdn.example/\n",
        );
        assert_eq!(config.port, 9090);
        assert_eq!(config.host, "0.0.0.0");
        assert!(config.debug_errors);
        assert_eq!(config.principal_header, "x-principal");
        assert_eq!(config.public_base_url, "https://cdn.example");
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = config_from("MEDIA_ROOT=/m\nVIDTUBE_PORT=nope\nMAX_UPLOAD_BYTES=0\n");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }

    #[test]
    fn env_wins_over_file_and_overrides_win_over_env() {
        let vars = read_env_file(make_config("MEDIA_ROOT=/file\nVIDTUBE_PORT=7000\n").path())
            .unwrap();
        let config = build_runtime_config(
            &vars,
            |key| match key {
                "MEDIA_ROOT" => Some("/env".to_string()),
                "VIDTUBE_PORT" => Some("7500".to_string()),
                _ => None,
            },
            RuntimeOverrides {
                port: Some(9000),
                host: Some("   ".into()),
                ..RuntimeOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.media_root, PathBuf::from("/env"));
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, DEFAULT_HOST);
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export MEDIA_ROOT="/media"
            DATABASE_PATH='/db/vt.db'
            LOG_LEVEL =  "debug"
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("MEDIA_ROOT").unwrap(), "/media");
        assert_eq!(vars.get("DATABASE_PATH").unwrap(), "/db/vt.db");
        assert_eq!(vars.get("LOG_LEVEL").unwrap(), "debug");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }
}
