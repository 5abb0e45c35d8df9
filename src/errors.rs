use thiserror::Error;

/// Invalid user supplied data such as a malformed `HH:MM` string
/// or a room whose maximum temperature is below its minimum.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("Validation Error: {0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        ValidationError(message.into())
    }
    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Errors from fetching electricity prices.
#[derive(Debug, Error)]
pub enum PriceFetchError {
    #[error("Network Error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unknown or unsupported country '{0}'")]
    UnsupportedCountry(String),
    #[error("Parsing Error: {0}")]
    Parsing(String),
}

/// Errors from fetching the weather forecast.
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("Network Error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("weather service returned status {status}: {message}")]
    Service { status: u16, message: String },
    #[error("Parsing Error: {0}")]
    Parsing(String),
}

/// Errors from talking to Home Assistant.
#[derive(Debug, Error)]
pub enum HomeAssistantError {
    #[error("Network Error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unsupported entity '{0}'")]
    UnsupportedEntity(String),
    #[error("authentication with Home Assistant failed")]
    AuthenticationFailed,
    #[error("Home Assistant returned status {status}: {message}")]
    Api { status: u16, message: String },
}

/// Errors from the room and heater store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} '{id}' already exists")]
    Duplicate { kind: &'static str, id: String },
    #[error("room '{room_id}' still has heaters")]
    InUse { room_id: String },
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization Error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            id: id.into(),
        }
    }
    pub fn duplicate(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::Duplicate {
            kind,
            id: id.into(),
        }
    }
}
