use anyhow::Context;
use heater_control::api;
use heater_control::control_loop::{self, ControlContext};
use heater_control::dashboard::DashboardState;
use heater_control::electricity_price::{ElectricityPriceClient, PriceSource};
use heater_control::home_assistant::{HeaterSwitch, HomeAssistantClient};
use heater_control::settings::{self, Settings};
use heater_control::store::{HomeData, HomeStore};
use heater_control::weather::{ForecastSource, WeatherClient};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;

async fn open_store(settings: &Settings) -> anyhow::Result<HomeStore> {
    match settings.store_path() {
        Some(path) => {
            info!("using store {}", path.display());
            HomeStore::load(&path)
                .await
                .with_context(|| format!("failed to load store from {}", path.display()))
        }
        None => {
            warn!("no data directory available, rooms and heaters will not be saved");
            Ok(HomeStore::in_memory(HomeData::default()))
        }
    }
}

fn make_switch(settings: &Settings) -> anyhow::Result<Option<Arc<dyn HeaterSwitch>>> {
    match &settings.home_assistant.token {
        Some(token) => {
            let client = HomeAssistantClient::new(settings.home_assistant.url.clone(), token.clone())?;
            Ok(Some(Arc::new(client)))
        }
        None => {
            warn!("no Home Assistant token configured, heaters will not be switched");
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let settings_file_path = settings::make_settings_file_path();
    let settings = settings::make_settings(
        &settings::map_from_environment_variables(),
        settings_file_path.as_deref(),
    )
    .context("failed to read settings")?;
    let time_zone = settings.time_zone()?;
    let ip_address = settings.listen_address()?;
    let store = open_store(&settings).await?;
    let dashboard = DashboardState::new();

    let prices: Arc<dyn PriceSource> = Arc::new(ElectricityPriceClient::new(settings.elering_url.clone()));
    let weather = settings
        .weather_url
        .as_ref()
        .map(|url| Arc::new(WeatherClient::new(url.clone())) as Arc<dyn ForecastSource>);
    let switch = make_switch(&settings)?;
    let poll_interval = settings.poll_interval();
    let context = Arc::new(ControlContext {
        settings,
        store: store.clone(),
        dashboard: dashboard.clone(),
        prices,
        weather,
        switch,
        time_zone,
    });
    let (loop_stop_sender, loop_stop_receiver) = watch::channel(false);
    let control_task = tokio::spawn(control_loop::run(context, poll_interval, loop_stop_receiver));

    let (shutdown_sender, shutdown_receiver) = mpsc::channel::<()>(1);
    let (bound_address, server) = api::serve(
        store,
        dashboard,
        ip_address,
        shutdown_sender.clone(),
        shutdown_receiver,
    )
    .with_context(|| format!("failed to bind {}", ip_address))?;
    info!("server started at {}", bound_address);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C");
            let _ = shutdown_sender.send(()).await;
        }
    });
    server.await;

    let _ = loop_stop_sender.send(true);
    control_task.await.context("control loop panicked")?;
    info!("server has been shut down");
    Ok(())
}
