use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_BIND: &str = "127.0.0.1:8790";
pub const DEFAULT_PLANNER_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EMBEDDINGS_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 5;
pub const DEFAULT_HISTORY_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerSettings {
    pub base_url: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tool_rounds: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingSettings {
    pub base_url: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TutorSettings {
    pub bind: String,
    pub db_path: Option<String>,
    pub planner: PlannerSettings,
    pub embeddings: EmbeddingSettings,
    pub history_page_size: usize,
    pub dev_student_id: Option<String>,
}

impl Default for TutorSettings {
    fn default() -> Self {
        Self {
            bind: String::from(DEFAULT_BIND),
            db_path: None,
            planner: PlannerSettings {
                base_url: None,
                model: String::from(DEFAULT_PLANNER_MODEL),
                api_key: None,
                max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
                timeout_secs: 60,
            },
            embeddings: EmbeddingSettings {
                base_url: None,
                model: String::from(DEFAULT_EMBEDDINGS_MODEL),
                api_key: None,
            },
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            dev_student_id: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("failed to read tutor settings '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse tutor settings TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("tutor settings root must be a table")]
    RootMustBeTable,
    #[error("tutor settings field '{field}' has invalid type")]
    InvalidFieldType { field: String },
}

/// Defaults, then the TOML file, then `TUTOR_*` environment variables.
pub fn load_tutor_settings<F>(
    app_root: &Path,
    explicit_path: Option<&str>,
    env: F,
) -> Result<TutorSettings, SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = explicit_path
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .map(|p| if p.is_absolute() { p } else { app_root.join(p) })
        .unwrap_or_else(|| app_root.join("config/tutor.settings.toml"));

    let mut settings = TutorSettings::default();
    if let Some(file_value) = read_optional_toml(path.as_path())? {
        apply_settings_value(&mut settings, &file_value)?;
    }
    apply_env_overrides(&mut settings, env);
    Ok(settings)
}

pub fn load_tutor_settings_from_env(app_root: &Path) -> Result<TutorSettings, SettingsError> {
    let explicit = std::env::var("TUTOR_SETTINGS_PATH").ok();
    load_tutor_settings(app_root, explicit.as_deref(), |key| std::env::var(key).ok())
}

pub fn apply_settings_value(
    settings: &mut TutorSettings,
    value: &Value,
) -> Result<(), SettingsError> {
    let root = value.as_object().ok_or(SettingsError::RootMustBeTable)?;

    if let Some(server) = section(root.get("server"), "server")? {
        if let Some(v) = server.get("bind") {
            settings.bind = parse_string(v, "server.bind")?;
        }
        if let Some(v) = server.get("db_path") {
            settings.db_path = Some(parse_string(v, "server.db_path")?);
        }
        if let Some(v) = server.get("dev_student_id") {
            settings.dev_student_id = Some(parse_string(v, "server.dev_student_id")?);
        }
    }
    if let Some(planner) = section(root.get("planner"), "planner")? {
        if let Some(v) = planner.get("base_url") {
            settings.planner.base_url = Some(parse_url(v, "planner.base_url")?);
        }
        if let Some(v) = planner.get("model") {
            settings.planner.model = parse_string(v, "planner.model")?;
        }
        if let Some(v) = planner.get("api_key") {
            settings.planner.api_key = Some(parse_string(v, "planner.api_key")?);
        }
        if let Some(v) = planner.get("max_tool_rounds") {
            settings.planner.max_tool_rounds =
                parse_positive(v, "planner.max_tool_rounds")?.min(20) as usize;
        }
        if let Some(v) = planner.get("timeout_secs") {
            settings.planner.timeout_secs = parse_positive(v, "planner.timeout_secs")?;
        }
    }
    if let Some(embeddings) = section(root.get("embeddings"), "embeddings")? {
        if let Some(v) = embeddings.get("base_url") {
            settings.embeddings.base_url = Some(parse_url(v, "embeddings.base_url")?);
        }
        if let Some(v) = embeddings.get("model") {
            settings.embeddings.model = parse_string(v, "embeddings.model")?;
        }
        if let Some(v) = embeddings.get("api_key") {
            settings.embeddings.api_key = Some(parse_string(v, "embeddings.api_key")?);
        }
    }
    if let Some(history) = section(root.get("history"), "history")? {
        if let Some(v) = history.get("page_size") {
            settings.history_page_size = parse_positive(v, "history.page_size")?.min(500) as usize;
        }
    }
    Ok(())
}

fn apply_env_overrides<F>(settings: &mut TutorSettings, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |key: &str| {
        env(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    if let Some(v) = read("TUTOR_BACKEND_BIND") {
        settings.bind = v;
    }
    if let Some(v) = read("TUTOR_BACKEND_DB") {
        settings.db_path = Some(v);
    }
    if let Some(v) = read("TUTOR_PLANNER_BASE_URL") {
        settings.planner.base_url = Some(v);
    }
    if let Some(v) = read("TUTOR_PLANNER_MODEL") {
        settings.planner.model = v;
    }
    if let Some(v) = read("TUTOR_PLANNER_API_KEY") {
        settings.planner.api_key = Some(v);
    }
    if let Some(v) = read("TUTOR_EMBEDDINGS_BASE_URL") {
        settings.embeddings.base_url = Some(v);
    }
    if let Some(v) = read("TUTOR_EMBEDDINGS_MODEL") {
        settings.embeddings.model = v;
    }
    if let Some(v) = read("TUTOR_API_AUTH_DEV_STUDENT") {
        settings.dev_student_id = Some(v);
    }
    if settings.embeddings.api_key.is_none() {
        settings.embeddings.api_key = settings.planner.api_key.clone();
    }
}

fn read_optional_toml(path: &Path) -> Result<Option<Value>, SettingsError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|error| SettingsError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    let parsed =
        toml::from_str::<toml::Value>(raw.as_str()).map_err(|error| SettingsError::ParseToml {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
    serde_json::to_value(parsed)
        .map(Some)
        .map_err(|error| SettingsError::ParseToml {
            path: path.display().to_string(),
            message: error.to_string(),
        })
}

fn section<'a>(
    value: Option<&'a Value>,
    field: &str,
) -> Result<Option<&'a serde_json::Map<String, Value>>, SettingsError> {
    match value {
        None => Ok(None),
        Some(v) => v
            .as_object()
            .map(Some)
            .ok_or_else(|| SettingsError::InvalidFieldType {
                field: field.to_string(),
            }),
    }
}

fn parse_string(value: &Value, field: &str) -> Result<String, SettingsError> {
    value
        .as_str()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| SettingsError::InvalidFieldType {
            field: field.to_string(),
        })
}

fn parse_url(value: &Value, field: &str) -> Result<String, SettingsError> {
    let raw = parse_string(value, field)?;
    url::Url::parse(raw.as_str()).map_err(|_| SettingsError::InvalidFieldType {
        field: field.to_string(),
    })?;
    Ok(raw)
}

fn parse_positive(value: &Value, field: &str) -> Result<u64, SettingsError> {
    value
        .as_u64()
        .filter(|v| *v > 0)
        .ok_or_else(|| SettingsError::InvalidFieldType {
            field: field.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn temp_root() -> PathBuf {
        let root = std::env::temp_dir().join(format!("tutor_settings_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(root.join("config")).expect("config dir should be creatable");
        root
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        let root = temp_root();
        let settings = load_tutor_settings(root.as_path(), None, |_| None).expect("defaults");
        assert_eq!(settings, TutorSettings::default());
        assert_eq!(settings.history_page_size, 50);
        assert_eq!(settings.planner.max_tool_rounds, 5);
    }

    #[test]
    fn env_overrides_file_values() {
        let root = temp_root();
        fs::write(
            root.join("config/tutor.settings.toml"),
            r#"
[server]
bind = "0.0.0.0:9000"

[planner]
base_url = "https://llm.example.test/v1"
model = "file-model"
api_key = "file-key"
max_tool_rounds = 3

[history]
page_size = 20
"#,
        )
        .expect("settings file should be writable");

        let env = HashMap::from([("TUTOR_PLANNER_MODEL", "env-model")]);
        let settings = load_tutor_settings(root.as_path(), None, |key| {
            env.get(key).map(|v| v.to_string())
        })
        .expect("settings");

        assert_eq!(settings.bind, "0.0.0.0:9000");
        assert_eq!(settings.planner.model, "env-model");
        assert_eq!(settings.planner.max_tool_rounds, 3);
        assert_eq!(settings.history_page_size, 20);
        assert_eq!(settings.embeddings.api_key.as_deref(), Some("file-key"));
    }

    #[test]
    fn invalid_field_types_are_reported() {
        let mut settings = TutorSettings::default();
        let err = apply_settings_value(
            &mut settings,
            &serde_json::json!({"planner": {"base_url": "not a url"}}),
        )
        .expect_err("bad url should fail");
        assert_eq!(
            err,
            SettingsError::InvalidFieldType {
                field: String::from("planner.base_url")
            }
        );
    }
}
