use crate::control_signals::ControlSignal;
use crate::errors::HomeAssistantError;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

/// Entity domains that can be driven by a control signal.
const VALID_DOMAINS: [&str; 6] = ["switch", "light", "climate", "number", "fan", "cover"];

#[derive(Clone, Debug, PartialEq)]
pub struct HeaterCommand {
    pub entity_id: String,
    pub signal: ControlSignal,
    /// Setpoint for `climate` entities.
    pub target_temperature: Option<f64>,
}

/// Applies control signals to heaters.
#[async_trait]
pub trait HeaterSwitch: Send + Sync {
    async fn switch(&self, command: &HeaterCommand) -> Result<(), HomeAssistantError>;
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Value,
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl EntityState {
    pub fn friendly_name(&self) -> &str {
        self.attributes
            .get("friendly_name")
            .and_then(Value::as_str)
            .unwrap_or(&self.entity_id)
    }
}

#[derive(Debug, PartialEq)]
pub struct ServiceCall {
    pub domain: String,
    pub service: &'static str,
    pub payload: Value,
}

/// Maps a command to the Home Assistant service that carries it out.
pub fn service_call_for(command: &HeaterCommand) -> Result<ServiceCall, HomeAssistantError> {
    let domain = match command.entity_id.split_once('.') {
        Some((domain, object_id)) if !object_id.is_empty() => domain,
        _ => return Err(HomeAssistantError::UnsupportedEntity(command.entity_id.clone())),
    };
    if !VALID_DOMAINS.contains(&domain) {
        return Err(HomeAssistantError::UnsupportedEntity(command.entity_id.clone()));
    }
    let on_off = if command.signal.is_on() {
        "turn_on"
    } else {
        "turn_off"
    };
    let call = match (domain, command.target_temperature) {
        ("climate", Some(temperature)) => ServiceCall {
            domain: domain.to_string(),
            service: "set_temperature",
            payload: json!({ "entity_id": command.entity_id, "temperature": temperature }),
        },
        _ => ServiceCall {
            domain: domain.to_string(),
            service: on_off,
            payload: json!({ "entity_id": command.entity_id }),
        },
    };
    Ok(call)
}

/// Home Assistant REST API client.
#[derive(Clone)]
pub struct HomeAssistantClient {
    base_url: String,
    token: String,
    client: Client,
}

impl HomeAssistantClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, HomeAssistantError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(HomeAssistantClient {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        })
    }

    async fn check(response: Response) -> Result<Response, HomeAssistantError> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                error!("authentication with Home Assistant failed");
                Err(HomeAssistantError::AuthenticationFailed)
            }
            status => {
                let message = response.text().await.unwrap_or_default();
                error!("Home Assistant returned status {}: {}", status, message);
                Err(HomeAssistantError::Api {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    pub async fn fetch_states(&self) -> Result<Vec<EntityState>, HomeAssistantError> {
        let url = format!("{}/api/states", self.base_url);
        debug!("fetching entity states from {}", url);
        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
        let states = Self::check(response).await?.json::<Vec<EntityState>>().await?;
        Ok(states)
    }

    pub async fn fetch_sensors(&self) -> Result<Vec<EntityState>, HomeAssistantError> {
        let states = self.fetch_states().await?;
        Ok(states
            .into_iter()
            .filter(|state| state.entity_id.starts_with("sensor."))
            .collect())
    }
}

#[async_trait]
impl HeaterSwitch for HomeAssistantClient {
    async fn switch(&self, command: &HeaterCommand) -> Result<(), HomeAssistantError> {
        let call = service_call_for(command)?;
        let url = format!(
            "{}/api/services/{}/{}",
            self.base_url, call.domain, call.service
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&call.payload)
            .send()
            .await?;
        Self::check(response).await?;
        info!(
            "sent {:?} to {} via {}/{}",
            command.signal, command.entity_id, call.domain, call.service
        );
        Ok(())
    }
}
