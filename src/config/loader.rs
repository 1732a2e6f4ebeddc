//! TOML configuration loading, env-var overrides, and atomic saves.
//!
//! # Loading order
//! 1. Parse `~/.agent-core/config.toml` (or the path in `AGENT_CORE_CONFIG`)
//! 2. Apply `AGENT_CORE_*` environment variable overrides
//! 3. Fall back to [`AppConfig::default()`] if the file is missing
//!
//! # Atomic save
//! Writes to `<path>.tmp` → fsync → rename to `<path>` to avoid partial
//! writes corrupting the config file.

use std::{
    env,
    fs,
    path::{Path, PathBuf},
};

use super::schema::AppConfig;

// ─── default_config_path ─────────────────────────────────────────────────────

/// Return the default config file path: `~/.agent-core/config.toml`.
pub fn default_config_path() -> Result<PathBuf, String> {
    dirs::home_dir()
        .map(|h| h.join(".agent-core").join("config.toml"))
        .ok_or_else(|| "could not determine home directory".to_string())
}

// ─── load_config ─────────────────────────────────────────────────────────────

/// Load [`AppConfig`] from the given path, falling back to defaults if the
/// file does not exist, then applying environment variable overrides.
pub fn load_config(path: &Path) -> Result<AppConfig, String> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => toml::from_str::<AppConfig>(&content)
            .map_err(|e| format!("failed to parse config at {path:?}: {e}"))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => return Err(format!("failed to read config at {path:?}: {e}")),
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load config from the default path, creating the directory if needed.
pub fn load_default_config() -> AppConfig {
    let path = env::var("AGENT_CORE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path().unwrap_or_else(|_| PathBuf::from("config.toml")));

    load_config(&path).unwrap_or_default()
}

// ─── apply_env_overrides ─────────────────────────────────────────────────────

/// Apply `AGENT_CORE_*` environment variable overrides to `config`.
///
/// Supported overrides:
/// - `AGENT_CORE_PROVIDER_API_KEY`    → `provider.api_key`
/// - `AGENT_CORE_PROVIDER_BASE_URL`   → `provider.base_url`
/// - `AGENT_CORE_PROVIDER_MODEL`      → `provider.default_model`
/// - `AGENT_CORE_SANDBOX_ENDPOINT`    → `sandbox.endpoint`
/// - `AGENT_CORE_SANDBOX_API_KEY`     → `sandbox.api_key`
/// - `AGENT_CORE_MAX_ITERATIONS`      → `loop_.max_iterations`
/// - `AGENT_CORE_PLANNER_ENABLED`     → `planner.enabled` (1/0)
fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(v) = env::var("AGENT_CORE_PROVIDER_API_KEY") {
        config.provider.api_key = v;
    }
    if let Ok(v) = env::var("AGENT_CORE_PROVIDER_BASE_URL") {
        config.provider.base_url = v;
    }
    if let Ok(v) = env::var("AGENT_CORE_PROVIDER_MODEL") {
        config.provider.default_model = v;
    }
    if let Ok(v) = env::var("AGENT_CORE_SANDBOX_ENDPOINT") {
        config.sandbox.endpoint = v;
    }
    if let Ok(v) = env::var("AGENT_CORE_SANDBOX_API_KEY") {
        config.sandbox.api_key = v;
    }
    if let Ok(v) = env::var("AGENT_CORE_MAX_ITERATIONS") {
        if let Ok(n) = v.parse::<usize>() {
            config.loop_.max_iterations = n;
        }
    }
    if let Ok(v) = env::var("AGENT_CORE_PLANNER_ENABLED") {
        config.planner.enabled = v == "1" || v.eq_ignore_ascii_case("true");
    }
}

// ─── save_config ─────────────────────────────────────────────────────────────

/// Atomically save `config` to `path`.
///
/// Writes to `<path>.tmp`, creates a backup of the existing file as
/// `<path>.bak`, then renames the temp file to `<path>`.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), String> {
    let content = toml::to_string_pretty(config).map_err(|e| format!("failed to serialise config: {e}"))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("failed to create config dir: {e}"))?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &content).map_err(|e| format!("failed to write temp config: {e}"))?;

    if path.exists() {
        let bak_path = path.with_extension("toml.bak");
        fs::copy(path, &bak_path).map_err(|e| format!("failed to backup config: {e}"))?;
    }

    fs::rename(&tmp_path, path).map_err(|e| format!("failed to replace config file: {e}"))?;

    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unsafe_code)] // env::set_var / remove_var are unsafe in Rust 2024; tests are single-threaded.
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn load_partial_config_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[provider]
default_model = "claude-3-haiku"
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.provider.default_model, "claude-3-haiku");
        assert_eq!(config.loop_.max_iterations, 100);
        assert_eq!(config.sandbox.workspace_root, "/workspace");
    }

    #[test]
    fn load_full_config() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[provider]
base_url = "https://example.com/v1"
default_model = "gpt-4o"
request_timeout_secs = 30

[sandbox]
endpoint = "https://sandbox.example.com"
workspace_root = "/srv/workspace"

[loop_]
max_iterations = 50
suppression_strength = 80

[events]
subscriber_buffer = 512

[orchestrator]
default_concurrency = 4

[planner]
enabled = false
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.provider.default_model, "gpt-4o");
        assert_eq!(config.sandbox.workspace_root, "/srv/workspace");
        assert_eq!(config.loop_.max_iterations, 50);
        assert_eq!(config.events.subscriber_buffer, 512);
        assert_eq!(config.orchestrator.default_concurrency, 4);
        assert!(!config.planner.enabled);
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut original = AppConfig::default();
        original.provider.default_model = "claude-3-haiku".to_owned();
        original.loop_.max_iterations = 42;

        save_config(&path, &original).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, original, "config should round-trip through save/load");
    }

    #[test]
    fn save_creates_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        save_config(&path, &AppConfig::default()).unwrap();
        save_config(&path, &AppConfig::default()).unwrap();

        let bak = path.with_extension("toml.bak");
        assert!(bak.exists(), "backup file should exist after second save");
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let nested_path = dir.path().join("a").join("b").join("config.toml");
        save_config(&nested_path, &AppConfig::default()).unwrap();
        assert!(nested_path.exists(), "config should be created in nested dirs");
    }

    #[test]
    fn env_override_provider_model() {
        let key = "AGENT_CORE_PROVIDER_MODEL";
        // SAFETY: single-threaded test context; no other threads read this var.
        unsafe {
            env::set_var(key, "gpt-4-turbo");
        }
        let config = load_default_config();
        // SAFETY: same as set_var above.
        unsafe {
            env::remove_var(key);
        }
        assert_eq!(config.provider.default_model, "gpt-4-turbo");
    }

    #[test]
    fn env_override_max_iterations() {
        let key = "AGENT_CORE_MAX_ITERATIONS";
        // SAFETY: single-threaded test context; no other threads read this var.
        unsafe {
            env::set_var(key, "7");
        }
        let config = load_default_config();
        // SAFETY: same as set_var above.
        unsafe {
            env::remove_var(key);
        }
        assert_eq!(config.loop_.max_iterations, 7);
    }

    #[test]
    fn env_override_planner_disabled() {
        let key = "AGENT_CORE_PLANNER_ENABLED";
        // SAFETY: single-threaded test context; no other threads read this var.
        unsafe {
            env::set_var(key, "0");
        }
        let config = load_default_config();
        // SAFETY: same as set_var above.
        unsafe {
            env::remove_var(key);
        }
        assert!(!config.planner.enabled);
    }

    #[test]
    fn load_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "this is not valid toml!!!");
        let result = load_config(&path);
        assert!(result.is_err(), "invalid TOML should return an error");
    }
}
