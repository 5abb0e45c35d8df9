use crate::dashboard::DashboardState;
use crate::errors::StoreError;
use crate::model::{Heater, Room, TemperatureException};
use crate::store::HomeStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::reply::{Reply, Response};
use warp::{Filter, Rejection};

const MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(Debug, Deserialize, Serialize)]
pub struct EnabledRequest {
    pub enabled: bool,
}

fn store_error_status(error: &StoreError) -> StatusCode {
    match error {
        StoreError::Invalid(..) => StatusCode::BAD_REQUEST,
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::Duplicate { .. } | StoreError::InUse { .. } => StatusCode::CONFLICT,
        StoreError::Io(..) | StoreError::Serialization(..) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_reply(status: StatusCode, message: String) -> Response {
    warp::reply::with_status(warp::reply::json(&json!({ "error": message })), status)
        .into_response()
}

fn store_reply<T: Serialize>(result: Result<T, StoreError>, success: StatusCode) -> Response {
    match result {
        Ok(value) => warp::reply::with_status(warp::reply::json(&value), success).into_response(),
        Err(error) => {
            let status = store_error_status(&error);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                warn!("store operation failed: {}", error);
            }
            error_reply(status, error.to_string())
        }
    }
}

fn with_store(store: HomeStore) -> impl Filter<Extract = (HomeStore,), Error = Infallible> + Clone {
    warp::any().map(move || store.clone())
}

fn with_dashboard(
    dashboard: DashboardState,
) -> impl Filter<Extract = (DashboardState,), Error = Infallible> + Clone {
    warp::any().map(move || dashboard.clone())
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// Read-only views of the latest evaluation.
pub fn dashboard_routes(
    dashboard: DashboardState,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let full = warp::path!("dashboard")
        .and(warp::get())
        .and(with_dashboard(dashboard.clone()))
        .then(|dashboard: DashboardState| async move {
            warp::reply::json(&dashboard.snapshot().await)
        });
    let schedule = warp::path!("schedule")
        .and(warp::get())
        .and(with_dashboard(dashboard.clone()))
        .then(|dashboard: DashboardState| async move {
            warp::reply::json(&dashboard.snapshot().await.schedule)
        });
    let limits = warp::path!("limits")
        .and(warp::get())
        .and(with_dashboard(dashboard.clone()))
        .then(|dashboard: DashboardState| async move {
            warp::reply::json(&dashboard.snapshot().await.limits)
        });
    let prices = warp::path!("prices")
        .and(warp::get())
        .and(with_dashboard(dashboard))
        .then(|dashboard: DashboardState| async move {
            warp::reply::json(&dashboard.snapshot().await.prices)
        });
    full.or(schedule).or(limits).or(prices)
}

pub fn room_routes(store: HomeStore) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let list = warp::path!("rooms")
        .and(warp::get())
        .and(with_store(store.clone()))
        .then(|store: HomeStore| async move { warp::reply::json(&store.rooms().await) });
    let create = warp::path!("rooms")
        .and(warp::post())
        .and(json_body::<Room>())
        .and(with_store(store.clone()))
        .then(|room: Room, store: HomeStore| async move {
            store_reply(store.add_room(room).await, StatusCode::CREATED)
        });
    let update = warp::path!("rooms" / String)
        .and(warp::put())
        .and(json_body::<Room>())
        .and(with_store(store.clone()))
        .then(|room_id: String, mut room: Room, store: HomeStore| async move {
            room.id = room_id;
            store_reply(store.update_room(room).await, StatusCode::OK)
        });
    let delete = warp::path!("rooms" / String)
        .and(warp::delete())
        .and(with_store(store.clone()))
        .then(|room_id: String, store: HomeStore| async move {
            store_reply(store.delete_room(&room_id).await, StatusCode::OK)
        });
    let add_exception = warp::path!("rooms" / String / "exceptions")
        .and(warp::post())
        .and(json_body::<TemperatureException>())
        .and(with_store(store.clone()))
        .then(
            |room_id: String, exception: TemperatureException, store: HomeStore| async move {
                store_reply(
                    store.add_exception(&room_id, exception).await,
                    StatusCode::CREATED,
                )
            },
        );
    let remove_exception = warp::path!("rooms" / String / "exceptions" / u64)
        .and(warp::delete())
        .and(with_store(store))
        .then(|room_id: String, exception_id: u64, store: HomeStore| async move {
            store_reply(
                store.remove_exception(&room_id, exception_id).await,
                StatusCode::OK,
            )
        });
    list.or(create)
        .or(update)
        .or(delete)
        .or(add_exception)
        .or(remove_exception)
}

pub fn heater_routes(store: HomeStore) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let list = warp::path!("heaters")
        .and(warp::get())
        .and(with_store(store.clone()))
        .then(|store: HomeStore| async move { warp::reply::json(&store.heaters().await) });
    let create = warp::path!("heaters")
        .and(warp::post())
        .and(json_body::<Heater>())
        .and(with_store(store.clone()))
        .then(|heater: Heater, store: HomeStore| async move {
            store_reply(store.add_heater(heater).await, StatusCode::CREATED)
        });
    let update = warp::path!("heaters" / String)
        .and(warp::put())
        .and(json_body::<Heater>())
        .and(with_store(store.clone()))
        .then(|heater_id: String, mut heater: Heater, store: HomeStore| async move {
            heater.id = heater_id;
            store_reply(store.update_heater(heater).await, StatusCode::OK)
        });
    let delete = warp::path!("heaters" / String)
        .and(warp::delete())
        .and(with_store(store.clone()))
        .then(|heater_id: String, store: HomeStore| async move {
            store_reply(store.delete_heater(&heater_id).await, StatusCode::OK)
        });
    let enabled = warp::path!("heaters" / String / "enabled")
        .and(warp::post())
        .and(json_body::<EnabledRequest>())
        .and(with_store(store))
        .then(
            |heater_id: String, request: EnabledRequest, store: HomeStore| async move {
                store_reply(
                    store.set_heater_enabled(&heater_id, request.enabled).await,
                    StatusCode::OK,
                )
            },
        );
    list.or(create).or(update).or(delete).or(enabled)
}

pub fn shutdown_route(
    shutdown_sender: mpsc::Sender<()>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("shutdown").and(warp::post()).map(move || {
        info!("shutdown requested over HTTP");
        let _ = shutdown_sender.try_send(());
        warp::reply::json(&"Server is shutting down")
    })
}

/// All HTTP routes of the service.
pub fn routes(
    store: HomeStore,
    dashboard: DashboardState,
    shutdown_sender: mpsc::Sender<()>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    dashboard_routes(dashboard)
        .or(room_routes(store.clone()))
        .or(heater_routes(store))
        .or(shutdown_route(shutdown_sender))
        .with(warp::trace::request())
}

/// Binds the routes to `address`. The returned future serves until a message
/// arrives on `shutdown_receiver` and then lets in-flight requests finish.
pub fn serve(
    store: HomeStore,
    dashboard: DashboardState,
    address: SocketAddr,
    shutdown_sender: mpsc::Sender<()>,
    mut shutdown_receiver: mpsc::Receiver<()>,
) -> Result<(SocketAddr, impl Future<Output = ()>), warp::Error> {
    warp::serve(routes(store, dashboard, shutdown_sender)).try_bind_with_graceful_shutdown(
        address,
        async move {
            shutdown_receiver.recv().await;
            info!("shutting down server");
        },
    )
}
