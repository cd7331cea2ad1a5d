//! Settings loading: defaults, then the user file, then environment.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::QuorraSettings;

/// Directory override for the settings file.
pub const HOME_ENV_VAR: &str = "QUORRA_HOME";

/// `$QUORRA_HOME/settings.json`, else `~/.quorra/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Ok(home) = std::env::var(HOME_ENV_VAR) {
        return PathBuf::from(home).join("settings.json");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".quorra").join("settings.json")
}

/// Recursively merge `overlay` into `base`. Objects merge key by key;
/// anything else in `overlay` replaces the base value.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

/// Load from the default path with env overrides.
pub fn load_settings() -> Result<QuorraSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` with env overrides. A missing file yields defaults.
pub fn load_settings_from_path(path: &Path) -> Result<QuorraSettings> {
    let defaults = serde_json::to_value(QuorraSettings::default()).map_err(|source| {
        SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let merged = if path.exists() {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        tracing::debug!(?path, "no settings file, using defaults");
        defaults
    };

    let mut settings: QuorraSettings =
        serde_json::from_value(merged).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.validate();
    Ok(settings)
}

/// Settings for one process: `path` (or [`settings_path`]) when given.
///
/// An unusable file does not stop the process. The compiled defaults are
/// used instead, still with env overrides, and the load error comes back
/// alongside so the caller can report it once logging is up.
pub fn resolve_settings(path: Option<&Path>) -> (QuorraSettings, Option<SettingsError>) {
    let result = match path {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    };
    match result {
        Ok(settings) => (settings, None),
        Err(e) => {
            let mut settings = QuorraSettings::default();
            apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
            settings.validate();
            (settings, Some(e))
        }
    }
}

/// Apply `QUORRA_*` overrides using `lookup` to read variables.
///
/// Unparseable values are ignored with a warning.
pub fn apply_env_overrides<F>(settings: &mut QuorraSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = parse_var(&lookup, "QUORRA_MAX_AGENTS") {
        settings.orchestrator.max_agents = Some(v);
    }
    if let Some(v) = parse_var(&lookup, "QUORRA_LAUNCH_TIMEOUT_MS") {
        settings.orchestrator.launch_timeout_ms = v;
    }
    if let Some(v) = lookup("QUORRA_AGENT_EXECUTABLE") {
        settings.orchestrator.agent_executable = Some(v);
    }
    if let Some(v) = lookup("QUORRA_BIND_ADDRESS") {
        settings.orchestrator.bind_address = v;
    }
    if let Some(v) = parse_var(&lookup, "QUORRA_CONNECT_TIMEOUT_MS") {
        settings.agent.connect_timeout_ms = v;
    }
    if let Some(v) = lookup("QUORRA_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = parse_var(&lookup, "QUORRA_LOG_JSON") {
        settings.logging.json = v;
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn deep_merge_nested() {
        let base = json!({"a": {"x": 1, "y": 2}, "b": 3});
        let overlay = json!({"a": {"y": 20}, "c": 4});
        let merged = deep_merge(base, overlay);
        assert_eq!(merged, json!({"a": {"x": 1, "y": 20}, "b": 3, "c": 4}));
    }

    #[test]
    fn deep_merge_replaces_non_objects() {
        let merged = deep_merge(json!({"a": [1, 2]}), json!({"a": [3]}));
        assert_eq!(merged, json!({"a": [3]}));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let s = load_settings_from_path(Path::new("/nonexistent/quorra/settings.json")).unwrap();
        assert_eq!(s.orchestrator.launch_timeout_ms, 30_000);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"orchestrator": {"launchTimeoutMs": 500}, "logging": {"json": true}}"#,
        )
        .unwrap();

        let s = load_settings_from_path(&path).unwrap();
        assert_eq!(s.orchestrator.launch_timeout_ms, 500);
        assert!(s.logging.json);
        assert_eq!(s.orchestrator.bind_address, "127.0.0.1:0");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }

    #[test]
    fn malformed_file_resolves_to_defaults_with_the_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "[broken").unwrap();

        let (settings, error) = resolve_settings(Some(&path));
        assert!(matches!(
            error,
            Some(SettingsError::Parse { ref path, .. }) if path.ends_with("settings.json")
        ));
        assert_eq!(settings.orchestrator.launch_timeout_ms, 30_000);
        assert_eq!(settings.logging.level, QuorraSettings::default().logging.level);
    }

    #[test]
    fn good_file_resolves_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"orchestrator": {"launchTimeoutMs": 750}}"#).unwrap();

        let (settings, error) = resolve_settings(Some(&path));
        assert!(error.is_none());
        assert_eq!(settings.orchestrator.launch_timeout_ms, 750);
    }

    #[test]
    fn file_values_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"orchestrator": {"maxAgents": 0}}"#).unwrap();

        let s = load_settings_from_path(&path).unwrap();
        assert_eq!(s.orchestrator.max_agents, None);
    }

    #[test]
    fn env_overrides_win() {
        let vars: HashMap<&str, &str> = [
            ("QUORRA_MAX_AGENTS", "6"),
            ("QUORRA_LOG_LEVEL", "debug"),
            ("QUORRA_LOG_JSON", "true"),
            ("QUORRA_BIND_ADDRESS", "0.0.0.0:7000"),
        ]
        .into_iter()
        .collect();
        let mut s = QuorraSettings::default();
        apply_env_overrides(&mut s, |k| vars.get(k).map(ToString::to_string));

        assert_eq!(s.orchestrator.max_agents, Some(6));
        assert_eq!(s.logging.level, "debug");
        assert!(s.logging.json);
        assert_eq!(s.orchestrator.bind_address, "0.0.0.0:7000");
    }

    #[test]
    fn unparseable_env_values_are_ignored() {
        let mut s = QuorraSettings::default();
        apply_env_overrides(&mut s, |k| {
            (k == "QUORRA_MAX_AGENTS").then(|| "many".to_string())
        });
        assert_eq!(s.orchestrator.max_agents, None);
    }
}
