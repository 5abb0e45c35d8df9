use crate::errors::ValidationError;
use crate::temperature_limits::{parse_wall_clock, parse_weekday};
use crate::TimeStamp;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
    /// Home Assistant temperature sensor measuring the room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor: Option<String>,
    pub default_max_temp: f64,
    pub default_min_temp: f64,
    #[serde(default)]
    pub exceptions: Vec<TemperatureException>,
}

impl Room {
    pub fn new(id: impl Into<String>, default_max_temp: f64, default_min_temp: f64) -> Self {
        Room {
            id: id.into(),
            width: None,
            length: None,
            sensor: None,
            default_max_temp,
            default_min_temp,
            exceptions: Vec::new(),
        }
    }
    pub fn with_exception(mut self, exception: TemperatureException) -> Self {
        self.exceptions.push(exception);
        self
    }
    pub fn default_limits(&self) -> TemperatureLimits {
        TemperatureLimits {
            max_temp: self.default_max_temp,
            min_temp: self.default_min_temp,
        }
    }
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::new("room id should not be empty"));
        }
        if self.default_max_temp < self.default_min_temp {
            return Err(ValidationError::new(format!(
                "room '{}': default max temperature cannot be lower than default min temperature",
                self.id
            )));
        }
        for exception in &self.exceptions {
            self.validate_exception(exception)?;
        }
        Ok(())
    }
    pub fn validate_exception(&self, exception: &TemperatureException) -> Result<(), ValidationError> {
        exception.validate()?;
        if exception.max_temp == self.default_max_temp && exception.min_temp == self.default_min_temp {
            return Err(ValidationError::new(format!(
                "room '{}': exception cannot have the same max and min temperatures as the room's defaults",
                self.id
            )));
        }
        Ok(())
    }
}

/// Recurring weekly override of a room's default temperature limits.
///
/// `end_time` at or before `start_time` means the window runs past midnight
/// into the following day.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureException {
    #[serde(default)]
    pub id: u64,
    pub days: Vec<String>,
    pub start_time: String,
    pub end_time: String,
    pub max_temp: f64,
    pub min_temp: f64,
}

impl TemperatureException {
    pub fn new(
        days: &[&str],
        start_time: &str,
        end_time: &str,
        max_temp: f64,
        min_temp: f64,
    ) -> Self {
        TemperatureException {
            id: 0,
            days: days.iter().map(|day| day.to_string()).collect(),
            start_time: start_time.to_string(),
            end_time: end_time.to_string(),
            max_temp,
            min_temp,
        }
    }
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.days.is_empty() {
            return Err(ValidationError::new("exception should apply to at least one day"));
        }
        for day in &self.days {
            parse_weekday(day)?;
        }
        parse_wall_clock(&self.start_time)?;
        parse_wall_clock(&self.end_time)?;
        if self.max_temp < self.min_temp {
            return Err(ValidationError::new(
                "exception max temperature cannot be lower than min temperature",
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Heater {
    /// Home Assistant entity id, e.g. `switch.living_room_heater`.
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Nominal power in kW. Not used for scheduling.
    #[serde(default)]
    pub capacity: f64,
    pub room_id: String,
    #[serde(default = "enabled_by_default")]
    pub is_enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl Heater {
    pub fn new(id: impl Into<String>, room_id: impl Into<String>, is_enabled: bool) -> Self {
        let id = id.into();
        Heater {
            name: id.clone(),
            id,
            capacity: 0.0,
            room_id: room_id.into(),
            is_enabled,
        }
    }
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::new("heater id should not be empty"));
        }
        if self.room_id.trim().is_empty() {
            return Err(ValidationError::new(format!(
                "heater '{}' should belong to a room",
                self.id
            )));
        }
        if !self.capacity.is_finite() || self.capacity < 0.0 {
            return Err(ValidationError::new(format!(
                "heater '{}': capacity should be a non-negative number",
                self.id
            )));
        }
        Ok(())
    }
}

/// Electricity price over the half-open interval `[start, end)`, in currency/MWh.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PriceEntry {
    pub start: TimeStamp,
    pub end: TimeStamp,
    pub price: f64,
}

impl PriceEntry {
    pub fn new(start: TimeStamp, end: TimeStamp, price: f64) -> Self {
        PriceEntry { start, end, price }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureLimits {
    pub max_temp: f64,
    pub min_temp: f64,
}
