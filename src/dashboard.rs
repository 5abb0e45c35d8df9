use crate::control_signals::{ControlSignal, Schedule};
use crate::errors::ValidationError;
use crate::model::{PriceEntry, TemperatureLimits};
use crate::TimeStamp;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Limits of a single room, or why they could not be resolved.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RoomLimits {
    Resolved(TemperatureLimits),
    Failed { error: String },
}

impl From<Result<TemperatureLimits, ValidationError>> for RoomLimits {
    fn from(result: Result<TemperatureLimits, ValidationError>) -> Self {
        match result {
            Ok(limits) => RoomLimits::Resolved(limits),
            Err(error) => RoomLimits::Failed {
                error: error.to_string(),
            },
        }
    }
}

/// What was last sent to a heater and what it is due to get next.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStatus {
    pub last_signal: Option<ControlSignal>,
    pub last_sent_at: Option<TimeStamp>,
    pub next_signal: Option<ControlSignal>,
    pub next_at: Option<TimeStamp>,
    /// Failure of the most recent attempt; cleared by the next success.
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub prices: Vec<PriceEntry>,
    pub weather: Vec<(TimeStamp, f64)>,
    pub schedule: Schedule,
    pub limits: IndexMap<String, RoomLimits>,
    pub dispatch: IndexMap<String, DispatchStatus>,
    pub updated_at: Option<TimeStamp>,
    pub last_error: Option<String>,
}

/// Latest evaluation results, written by the control loop and read by the API.
#[derive(Clone, Default)]
pub struct DashboardState {
    snapshot: Arc<RwLock<DashboardSnapshot>>,
}

impl DashboardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> DashboardSnapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn publish(&self, snapshot: DashboardSnapshot) {
        *self.snapshot.write().await = snapshot;
    }
}
