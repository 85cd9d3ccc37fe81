//! Persisted user preferences.
//!
//! One JSON file under the platform config directory; the recognition API
//! key is kept out of it and stored in the OS keychain instead.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const KEYRING_SERVICE: &str = "lexilens";
const KEYRING_API_KEY: &str = "recognition-api-key";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error("Keychain error: {0}")]
    KeyringError(#[from] keyring::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageSettings {
    pub native_language_code: String,
    pub learning_language_code: String,
}

impl Default for LanguageSettings {
    fn default() -> Self {
        Self {
            native_language_code: "zh".to_string(),
            learning_language_code: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CloudSettings {
    pub sync_enabled: bool,
}

/// Settings for the remote recognition API. Consumed by the recognition
/// client, not by the record store.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecognitionSettings {
    pub base_url: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserSettings {
    pub language: LanguageSettings,
    pub cloud: CloudSettings,
    #[serde(default)]
    pub recognition: RecognitionSettings,
}

pub(crate) fn app_config_dir() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".config"));
    config_dir.join("lexilens")
}

fn get_settings_path() -> PathBuf {
    app_config_dir().join("settings.json")
}

pub fn load_settings() -> Result<UserSettings, SettingsError> {
    load_settings_from(&get_settings_path())
}

pub fn load_settings_from(path: &Path) -> Result<UserSettings, SettingsError> {
    if !path.exists() {
        return Ok(UserSettings::default());
    }

    let contents = std::fs::read_to_string(path)?;
    let settings = serde_json::from_str(&contents)?;
    Ok(settings)
}

pub fn save_settings(settings: &UserSettings) -> Result<(), SettingsError> {
    save_settings_to(&get_settings_path(), settings)
}

pub fn save_settings_to(path: &Path, settings: &UserSettings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, contents)?;

    log::info!("Settings saved to {:?}", path);
    Ok(())
}

/// Rewrites only the cloud-sync preference, leaving the rest of the settings
/// file untouched.
pub fn update_cloud_sync_preference_at(path: &Path, enabled: bool) -> Result<(), SettingsError> {
    let mut settings = load_settings_from(path)?;
    settings.cloud.sync_enabled = enabled;
    save_settings_to(path, &settings)
}

/// Store the recognition API key in the OS keychain.
pub fn store_api_key(api_key: &str) -> Result<(), SettingsError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_API_KEY)?;
    entry.set_password(api_key)?;
    Ok(())
}

/// Retrieve the recognition API key from the OS keychain.
pub fn get_api_key() -> Result<String, SettingsError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_API_KEY)?;
    Ok(entry.get_password()?)
}

/// Clear the stored recognition API key.
pub fn clear_api_key() -> Result<(), SettingsError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_API_KEY)?;
    entry.delete_password()?;
    Ok(())
}
