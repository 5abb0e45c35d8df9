use crate::control_signals::DEFAULT_HORIZON;
use crate::errors::ValidationError;
use chrono_tz::Tz;
use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENVIRONMENT_PREFIX: &str = "HEATER_CONTROL";
const APPLICATION_NAME: &str = "HeaterControl";

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct HomeAssistantSettings {
    pub url: String,
    pub token: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LocationSettings {
    pub country: String,
    pub place: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PricingSettings {
    pub tax_percentage: f64,
    /// Seller's margin in c/kWh.
    pub margin: f64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Settings {
    pub home_assistant: HomeAssistantSettings,
    pub location: LocationSettings,
    pub pricing: PricingSettings,
    pub time_zone: String,
    pub horizon: usize,
    pub poll_interval_seconds: u64,
    pub elering_url: String,
    pub weather_url: Option<String>,
    pub store_path: Option<String>,
    pub listen_address: String,
}

impl Settings {
    pub fn time_zone(&self) -> Result<Tz, ValidationError> {
        self.time_zone.parse::<Tz>().map_err(|error| {
            ValidationError::new(format!("unknown time zone '{}': {}", self.time_zone, error))
        })
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }
    pub fn listen_address(&self) -> Result<SocketAddr, ValidationError> {
        self.listen_address.parse().map_err(|_| {
            ValidationError::new(format!("invalid listen address '{}'", self.listen_address))
        })
    }
    /// Store file from the settings or, failing that, the platform data directory.
    pub fn store_path(&self) -> Option<PathBuf> {
        match &self.store_path {
            Some(path) => Some(PathBuf::from(path)),
            None => project_dirs().map(|dirs| dirs.data_dir().join("store.json")),
        }
    }
}

pub fn map_from_environment_variables() -> HashMap<String, String> {
    let mut map = HashMap::<String, String>::new();
    for (key, value) in env::vars() {
        map.insert(key, value);
    }
    map
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APPLICATION_NAME)
}

pub fn make_settings_file_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.preference_dir().join("settings.toml"))
}

fn make_config_builder() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("home_assistant.url", "http://localhost:8123")?
        .set_default("location.country", "Finland")?
        .set_default("location.place", "Helsinki")?
        .set_default("pricing.tax_percentage", 25.5)?
        .set_default("pricing.margin", 0.0)?
        .set_default("time_zone", "Europe/Helsinki")?
        .set_default("horizon", DEFAULT_HORIZON as i64)?
        .set_default("poll_interval_seconds", 300)?
        .set_default("elering_url", "https://dashboard.elering.ee")?
        .set_default("listen_address", "127.0.0.1:3030")
}

/// Builds settings from defaults, then the optional TOML file, then
/// `HEATER_CONTROL_*` variables (`__` separates nested keys).
pub fn make_settings(
    environment_variables: &HashMap<String, String>,
    settings_file_path: Option<&Path>,
) -> Result<Settings, ConfigError> {
    let mut builder = make_config_builder()?;
    if let Some(path) = settings_file_path {
        builder = builder.add_source(
            config::File::from(path)
                .format(config::FileFormat::Toml)
                .required(false),
        );
    }
    let environment = config::Environment::with_prefix(ENVIRONMENT_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .source(Some(environment_variables.clone()));
    builder.add_source(environment).build()?.try_deserialize::<Settings>()
}
