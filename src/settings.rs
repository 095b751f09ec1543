use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SETTINGS_FILE_NAME: &str = "settings.json";
const CONFIG_DIR_NAME: &str = "lyra-voice";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Model identifier declared during session setup.
    pub model: String,

    /// Optional system instruction sent with the setup message.
    pub system_instruction: Option<String>,

    /// Upstream audio is batched into chunks of this duration before sending.
    pub chunk_duration_ms: u64,

    /// When set, captured microphone audio is also written to this WAV file
    /// for debugging.
    pub capture_dump_path: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            model: crate::live::protocol::DEFAULT_MODEL.to_string(),
            system_instruction: None,
            chunk_duration_ms: 100,
            capture_dump_path: None,
        }
    }
}

fn settings_path() -> Result<PathBuf, String> {
    let dir = dirs::config_dir().ok_or("Could not determine config directory")?;
    Ok(dir.join(CONFIG_DIR_NAME).join(SETTINGS_FILE_NAME))
}

pub fn load_settings() -> AppSettings {
    let path = match settings_path() {
        Ok(p) => p,
        Err(e) => {
            log::warn!("Settings: {}", e);
            return AppSettings::default();
        }
    };
    load_or_init(&path)
}

/// Load settings, writing the defaults to disk on first run so the user has
/// a file to edit.
fn load_or_init(path: &Path) -> AppSettings {
    let existed = path.exists();
    let settings = load_settings_from(path);
    if !existed {
        if let Err(e) = save_settings_to(path, &settings) {
            log::warn!("Settings: could not persist defaults: {}", e);
        }
    }
    settings
}

fn load_settings_from(path: &Path) -> AppSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                AppSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            AppSettings::default()
        }
    }
}

fn save_settings_to(path: &Path, settings: &AppSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Serialize settings: {}", e))?;

    // Write atomically: write to a temp file in the same directory, then rename.
    // This prevents partial/corrupt settings.json if the app crashes mid-write.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| format!("Write temp settings {:?}: {}", tmp_path, e))?;

    // On Unix, rename will atomically replace the destination. On Windows, rename
    // fails if the destination exists, so we remove it first (ignoring NotFound).
    if cfg!(windows) {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(format!("Remove existing settings file {:?}: {}", path, e));
                }
            }
        }
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("Rename temp settings {:?} to {:?}: {}", tmp_path, path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let settings = AppSettings::default();
        assert_eq!(settings.chunk_duration_ms, 100);
        assert!(settings.system_instruction.is_none());
        assert!(settings.capture_dump_path.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = load_settings_from(&path);
        assert_eq!(settings.model, AppSettings::default().model);
    }

    #[test]
    fn first_run_writes_the_defaults_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        assert!(!path.exists());

        let settings = load_or_init(&path);
        assert_eq!(settings.model, AppSettings::default().model);
        assert!(path.exists());

        // The persisted file parses back to the same defaults
        let reloaded = load_settings_from(&path);
        assert_eq!(reloaded.chunk_duration_ms, settings.chunk_duration_ms);
    }

    #[test]
    fn existing_file_is_not_rewritten_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"model": "models/custom"}"#).unwrap();

        let settings = load_or_init(&path);
        assert_eq!(settings.model, "models/custom");

        // User formatting untouched
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, r#"{"model": "models/custom"}"#);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = AppSettings {
            model: "models/custom".to_string(),
            system_instruction: Some("Be brief.".to_string()),
            chunk_duration_ms: 50,
            capture_dump_path: None,
        };
        save_settings_to(&path, &settings).unwrap();

        let loaded = load_settings_from(&path);
        assert_eq!(loaded.model, "models/custom");
        assert_eq!(loaded.system_instruction.as_deref(), Some("Be brief."));
        assert_eq!(loaded.chunk_duration_ms, 50);
    }

    #[test]
    fn unknown_fields_do_not_break_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"model": "models/x", "legacy_field": 42}"#).unwrap();

        let settings = load_settings_from(&path);
        assert_eq!(settings.model, "models/x");
    }
}
