use anyhow::{Context, Result};
use chrono_tz::Tz;
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::ErrorKind,
    path::PathBuf,
    sync::{PoisonError, RwLock},
};

use crate::day_key::parse_timezone;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSettings {
    pub daily_goal_minutes: u32,
    /// IANA zone whose midnight resets the daily goal.
    pub timezone: String,
    pub user_id: String,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            daily_goal_minutes: 30,
            timezone: "UTC".into(),
            user_id: "local".into(),
        }
    }
}

impl ProgressSettings {
    pub fn tz(&self) -> Result<Tz> {
        parse_timezone(&self.timezone).map_err(Into::into)
    }
}

/// Hosted store connection. Left empty, the local SQLite file is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSettings {
    pub rest_url: Option<String>,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct UserSettings {
    progress: ProgressSettings,
    backend: BackendSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        let data = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring malformed settings at {}: {err}", path.display());
                UserSettings::default()
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => UserSettings::default(),
            Err(err) => {
                warn!("Ignoring unreadable settings at {}: {err}", path.display());
                UserSettings::default()
            }
        };

        Self {
            path,
            data: RwLock::new(data),
        }
    }

    pub fn progress(&self) -> ProgressSettings {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .progress
            .clone()
    }

    pub fn backend(&self) -> BackendSettings {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .backend
            .clone()
    }

    pub fn update_progress(&self, settings: ProgressSettings) -> Result<()> {
        settings
            .tz()
            .with_context(|| format!("Refusing to save timezone '{}'", settings.timezone))?;

        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.progress = settings;
        self.persist(&guard)
    }

    pub fn update_backend(&self, settings: BackendSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.backend = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
