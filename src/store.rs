use crate::errors::{StoreError, ValidationError};
use crate::model::{Heater, Room, TemperatureException};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct HomeData {
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub heaters: Vec<Heater>,
}

/// Rooms and heaters shared between the control loop and the HTTP API.
///
/// Clones share the same data. When the store was loaded from a file every
/// successful mutation is written back to it.
#[derive(Clone, Default)]
pub struct HomeStore {
    data: Arc<RwLock<HomeData>>,
    path: Option<Arc<PathBuf>>,
}

impl HomeStore {
    pub fn in_memory(data: HomeData) -> Self {
        HomeStore {
            data: Arc::new(RwLock::new(data)),
            path: None,
        }
    }

    /// Loads the store from `path`. A missing file gives an empty store.
    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        let data = match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let data: HomeData = serde_json::from_str(&content)?;
                for room in &data.rooms {
                    room.validate()?;
                }
                for heater in &data.heaters {
                    heater.validate()?;
                }
                data
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                info!("no store at {}, starting empty", path.display());
                HomeData::default()
            }
            Err(error) => return Err(error.into()),
        };
        Ok(HomeStore {
            data: Arc::new(RwLock::new(data)),
            path: Some(Arc::new(path.to_path_buf())),
        })
    }

    async fn persist(&self, data: &HomeData) -> Result<(), StoreError> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(data)?;
        tokio::fs::write(path.as_path(), content).await?;
        debug!("store saved to {}", path.display());
        Ok(())
    }

    pub async fn save(&self) -> Result<(), StoreError> {
        let data = self.data.read().await;
        self.persist(&data).await
    }

    pub async fn snapshot(&self) -> HomeData {
        self.data.read().await.clone()
    }

    pub async fn rooms(&self) -> Vec<Room> {
        self.data.read().await.rooms.clone()
    }

    pub async fn room(&self, room_id: &str) -> Option<Room> {
        self.data
            .read()
            .await
            .rooms
            .iter()
            .find(|room| room.id == room_id)
            .cloned()
    }

    /// Applies `change` to a copy of the data and swaps it in only once the
    /// copy has been written, so a failed write leaves the store untouched.
    async fn commit<T>(
        &self,
        change: impl FnOnce(&mut HomeData) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut data = self.data.write().await;
        let mut updated = data.clone();
        let value = change(&mut updated)?;
        self.persist(&updated).await?;
        *data = updated;
        Ok(value)
    }

    pub async fn add_room(&self, room: Room) -> Result<Room, StoreError> {
        room.validate()?;
        self.commit(|data| {
            if data.rooms.iter().any(|existing| existing.id == room.id) {
                return Err(StoreError::duplicate("room", room.id.clone()));
            }
            data.rooms.push(room.clone());
            Ok(room)
        })
        .await
    }

    /// Replaces the room with the same id.
    pub async fn update_room(&self, room: Room) -> Result<Room, StoreError> {
        room.validate()?;
        self.commit(|data| {
            let existing = data
                .rooms
                .iter_mut()
                .find(|existing| existing.id == room.id)
                .ok_or_else(|| StoreError::not_found("room", room.id.clone()))?;
            *existing = room.clone();
            Ok(room)
        })
        .await
    }

    pub async fn delete_room(&self, room_id: &str) -> Result<Room, StoreError> {
        self.commit(|data| {
            let index = data
                .rooms
                .iter()
                .position(|room| room.id == room_id)
                .ok_or_else(|| StoreError::not_found("room", room_id))?;
            if data.heaters.iter().any(|heater| heater.room_id == room_id) {
                return Err(StoreError::InUse {
                    room_id: room_id.to_string(),
                });
            }
            Ok(data.rooms.remove(index))
        })
        .await
    }

    /// Appends an exception to a room. An exception id of 0 is replaced with
    /// the next free id of that room.
    pub async fn add_exception(
        &self,
        room_id: &str,
        mut exception: TemperatureException,
    ) -> Result<TemperatureException, StoreError> {
        self.commit(|data| {
            let room = data
                .rooms
                .iter_mut()
                .find(|room| room.id == room_id)
                .ok_or_else(|| StoreError::not_found("room", room_id))?;
            room.validate_exception(&exception)?;
            if exception.id == 0 {
                let last_id = room.exceptions.iter().map(|e| e.id).max().unwrap_or(0);
                exception.id = last_id.checked_add(1).ok_or_else(|| {
                    ValidationError::new(format!(
                        "room '{}': no free exception id left",
                        room_id
                    ))
                })?;
            } else if room.exceptions.iter().any(|e| e.id == exception.id) {
                return Err(StoreError::duplicate("exception", exception.id.to_string()));
            }
            room.exceptions.push(exception.clone());
            Ok(exception)
        })
        .await
    }

    pub async fn remove_exception(
        &self,
        room_id: &str,
        exception_id: u64,
    ) -> Result<TemperatureException, StoreError> {
        self.commit(|data| {
            let room = data
                .rooms
                .iter_mut()
                .find(|room| room.id == room_id)
                .ok_or_else(|| StoreError::not_found("room", room_id))?;
            let index = room
                .exceptions
                .iter()
                .position(|e| e.id == exception_id)
                .ok_or_else(|| StoreError::not_found("exception", exception_id.to_string()))?;
            Ok(room.exceptions.remove(index))
        })
        .await
    }

    pub async fn heaters(&self) -> Vec<Heater> {
        self.data.read().await.heaters.clone()
    }

    pub async fn add_heater(&self, heater: Heater) -> Result<Heater, StoreError> {
        heater.validate()?;
        self.commit(|data| {
            if !data.rooms.iter().any(|room| room.id == heater.room_id) {
                return Err(StoreError::not_found("room", heater.room_id.clone()));
            }
            if data.heaters.iter().any(|existing| existing.id == heater.id) {
                return Err(StoreError::duplicate("heater", heater.id.clone()));
            }
            data.heaters.push(heater.clone());
            Ok(heater)
        })
        .await
    }

    pub async fn update_heater(&self, heater: Heater) -> Result<Heater, StoreError> {
        heater.validate()?;
        self.commit(|data| {
            if !data.rooms.iter().any(|room| room.id == heater.room_id) {
                return Err(StoreError::not_found("room", heater.room_id.clone()));
            }
            let existing = data
                .heaters
                .iter_mut()
                .find(|existing| existing.id == heater.id)
                .ok_or_else(|| StoreError::not_found("heater", heater.id.clone()))?;
            *existing = heater.clone();
            Ok(heater)
        })
        .await
    }

    pub async fn delete_heater(&self, heater_id: &str) -> Result<Heater, StoreError> {
        self.commit(|data| {
            let index = data
                .heaters
                .iter()
                .position(|heater| heater.id == heater_id)
                .ok_or_else(|| StoreError::not_found("heater", heater_id))?;
            Ok(data.heaters.remove(index))
        })
        .await
    }

    pub async fn set_heater_enabled(&self, heater_id: &str, enabled: bool) -> Result<Heater, StoreError> {
        self.commit(|data| {
            let heater = data
                .heaters
                .iter_mut()
                .find(|heater| heater.id == heater_id)
                .ok_or_else(|| StoreError::not_found("heater", heater_id))?;
            heater.is_enabled = enabled;
            Ok(heater.clone())
        })
        .await
    }
}
