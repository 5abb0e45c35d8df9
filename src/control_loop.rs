use crate::control_signals::{
    current_signal, generate_control_signals_with_horizon, upcoming_prices, ControlSignal,
    Schedule,
};
use crate::dashboard::{DashboardSnapshot, DashboardState, DispatchStatus, RoomLimits};
use crate::electricity_price::{consumer_price, price_window_bounds, PriceSource};
use crate::home_assistant::{HeaterCommand, HeaterSwitch};
use crate::model::{Heater, PriceEntry};
use crate::settings::Settings;
use crate::store::HomeStore;
use crate::temperature_limits::resolve_all;
use crate::weather::ForecastSource;
use crate::TimeStamp;
use chrono::Utc;
use chrono_tz::Tz;
use futures::future::join_all;
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Everything one evaluation cycle reads from and writes to.
pub struct ControlContext {
    pub settings: Settings,
    pub store: HomeStore,
    pub dashboard: DashboardState,
    pub prices: Arc<dyn PriceSource>,
    pub weather: Option<Arc<dyn ForecastSource>>,
    pub switch: Option<Arc<dyn HeaterSwitch>>,
    pub time_zone: Tz,
}

async fn fetch_consumer_prices(
    ctx: &ControlContext,
    start: &TimeStamp,
    end: &TimeStamp,
) -> Result<Vec<PriceEntry>, String> {
    let pricing = &ctx.settings.pricing;
    let prices = ctx
        .prices
        .fetch_prices(&ctx.settings.location.country, start, end)
        .await
        .map_err(|error| format!("failed to fetch electricity prices: {}", error))?;
    Ok(prices
        .into_iter()
        .map(|entry| PriceEntry {
            price: consumer_price(entry.price, pricing.tax_percentage, pricing.margin),
            ..entry
        })
        .collect())
}

async fn fetch_weather(
    source: &dyn ForecastSource,
    place: &str,
    start: &TimeStamp,
    end: &TimeStamp,
) -> Result<Vec<(TimeStamp, f64)>, String> {
    source
        .fetch_forecast(place, start, end)
        .await
        .map_err(|error| format!("failed to fetch weather forecast: {}", error))
}

fn heater_command(
    heater: &Heater,
    schedule: &Schedule,
    limits: &IndexMap<String, RoomLimits>,
) -> HeaterCommand {
    let signal = current_signal(schedule, &heater.id).unwrap_or(ControlSignal::Off);
    let target_temperature = match limits.get(&heater.room_id) {
        Some(RoomLimits::Resolved(room_limits)) => Some(if signal.is_on() {
            room_limits.max_temp
        } else {
            room_limits.min_temp
        }),
        _ => None,
    };
    HeaterCommand {
        entity_id: heater.id.clone(),
        signal,
        target_temperature,
    }
}

/// Sends every command and records the outcome per heater. A heater whose
/// switch fails keeps the last signal that did go through.
async fn dispatch(
    switch: &dyn HeaterSwitch,
    commands: Vec<HeaterCommand>,
    schedule: &Schedule,
    next_at: Option<TimeStamp>,
    previous: &IndexMap<String, DispatchStatus>,
    now: TimeStamp,
) -> IndexMap<String, DispatchStatus> {
    let results = join_all(commands.iter().map(|command| switch.switch(command))).await;
    commands
        .iter()
        .zip(results)
        .map(|(command, result)| {
            let mut status = previous.get(&command.entity_id).cloned().unwrap_or_default();
            match result {
                Ok(()) => {
                    status.last_signal = Some(command.signal);
                    status.last_sent_at = Some(now);
                    status.error = None;
                }
                Err(error) => {
                    warn!("failed to switch {}: {}", command.entity_id, error);
                    status.error = Some(error.to_string());
                }
            }
            status.next_signal = Some(
                schedule
                    .get(&command.entity_id)
                    .and_then(|signals| signals.get(1).copied())
                    .unwrap_or(ControlSignal::Off),
            );
            status.next_at = next_at;
            (command.entity_id.clone(), status)
        })
        .collect()
}

/// Re-evaluates the schedule and room limits at `now`, drives the heaters
/// to the current slot and publishes the outcome.
pub async fn run_cycle(ctx: &ControlContext, now: TimeStamp) -> DashboardSnapshot {
    let horizon = ctx.settings.horizon;
    let (start, end) = price_window_bounds(&now, horizon);
    let mut errors = Vec::new();
    let prices = match fetch_consumer_prices(ctx, &start, &end).await {
        Ok(prices) => upcoming_prices(&prices, &now),
        Err(message) => {
            error!("{}", message);
            errors.push(message);
            Vec::new()
        }
    };
    let weather = match &ctx.weather {
        Some(source) => {
            match fetch_weather(source.as_ref(), &ctx.settings.location.place, &start, &end).await
            {
                Ok(forecast) => forecast,
                Err(message) => {
                    warn!("{}", message);
                    errors.push(message);
                    Vec::new()
                }
            }
        }
        None => Vec::new(),
    };
    let home = ctx.store.snapshot().await;
    let schedule = generate_control_signals_with_horizon(&home.heaters, &prices, horizon);
    let local_now = now.with_timezone(&ctx.time_zone);
    let limits: IndexMap<String, RoomLimits> = resolve_all(&home.rooms, &local_now)
        .into_iter()
        .map(|(room_id, result)| {
            if let Err(error) = &result {
                warn!("room '{}': {}", room_id, error);
            }
            (room_id, RoomLimits::from(result))
        })
        .collect();
    let dispatched = match &ctx.switch {
        Some(switch) => {
            let commands = home
                .heaters
                .iter()
                .map(|heater| heater_command(heater, &schedule, &limits))
                .collect();
            let previous = ctx.dashboard.snapshot().await.dispatch;
            let next_at = prices.first().map(|entry| entry.end);
            dispatch(switch.as_ref(), commands, &schedule, next_at, &previous, now).await
        }
        None => {
            debug!("no heater switch configured, skipping dispatch");
            IndexMap::new()
        }
    };
    let snapshot = DashboardSnapshot {
        prices,
        weather,
        schedule,
        limits,
        dispatch: dispatched,
        updated_at: Some(now),
        last_error: if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        },
    };
    ctx.dashboard.publish(snapshot.clone()).await;
    info!(
        "evaluated {} heaters and {} rooms",
        snapshot.schedule.len(),
        snapshot.limits.len()
    );
    snapshot
}

/// Runs a cycle every `interval` until `shutdown` turns true or its sender is dropped.
pub async fn run(ctx: Arc<ControlContext>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_cycle(&ctx, Utc::now()).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("control loop stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{HomeAssistantError, PriceFetchError, WeatherError};
    use crate::model::{Room, TemperatureException};
    use crate::settings::make_settings;
    use crate::store::HomeData;
    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FixedPrices(Vec<f64>);

    #[async_trait]
    impl PriceSource for FixedPrices {
        async fn fetch_prices(
            &self,
            _country: &str,
            start_time: &TimeStamp,
            _end_time: &TimeStamp,
        ) -> Result<Vec<PriceEntry>, PriceFetchError> {
            Ok(self
                .0
                .iter()
                .enumerate()
                .map(|(i, price)| {
                    let start = *start_time + TimeDelta::hours(i as i64);
                    PriceEntry::new(start, start + TimeDelta::hours(1), *price)
                })
                .collect())
        }
    }

    struct UnavailablePrices;

    #[async_trait]
    impl PriceSource for UnavailablePrices {
        async fn fetch_prices(
            &self,
            country: &str,
            _start_time: &TimeStamp,
            _end_time: &TimeStamp,
        ) -> Result<Vec<PriceEntry>, PriceFetchError> {
            Err(PriceFetchError::UnsupportedCountry(country.to_string()))
        }
    }

    struct BrokenWeather;

    #[async_trait]
    impl ForecastSource for BrokenWeather {
        async fn fetch_forecast(
            &self,
            _place: &str,
            _start_time: &TimeStamp,
            _end_time: &TimeStamp,
        ) -> Result<Vec<(TimeStamp, f64)>, WeatherError> {
            Err(WeatherError::Parsing("no data".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingSwitch {
        commands: Mutex<Vec<HeaterCommand>>,
        failing: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HeaterSwitch for RecordingSwitch {
        async fn switch(&self, command: &HeaterCommand) -> Result<(), HomeAssistantError> {
            self.commands.lock().unwrap().push(command.clone());
            let failing = self.failing.lock().unwrap().contains(&command.entity_id);
            if failing || command.entity_id.starts_with("fan.") {
                return Err(HomeAssistantError::AuthenticationFailed);
            }
            Ok(())
        }
    }

    fn home() -> HomeData {
        let room = Room::new("bedroom", 21.0, 18.0).with_exception(TemperatureException::new(
            &["Monday"],
            "08:00",
            "16:00",
            19.0,
            16.0,
        ));
        HomeData {
            rooms: vec![room, Room::new("hall", 20.0, 15.0)],
            heaters: vec![
                Heater::new("climate.bedroom", "bedroom", true),
                Heater::new("switch.hall", "hall", true),
                Heater::new("switch.garage", "hall", false),
            ],
        }
    }

    fn context(
        prices: Arc<dyn PriceSource>,
        weather: Option<Arc<dyn ForecastSource>>,
        switch: Option<Arc<dyn HeaterSwitch>>,
    ) -> ControlContext {
        let mut settings = make_settings(&HashMap::new(), None).expect("settings should work fine");
        settings.horizon = 4;
        settings.pricing.tax_percentage = 0.0;
        ControlContext {
            settings,
            store: HomeStore::in_memory(home()),
            dashboard: DashboardState::new(),
            prices,
            weather,
            switch,
            time_zone: chrono_tz::Europe::Helsinki,
        }
    }

    fn monday_morning() -> TimeStamp {
        // 10:30 in Helsinki.
        Utc.with_ymd_and_hms(2024, 11, 18, 8, 30, 0).unwrap()
    }

    mod run_cycle {
        use super::*;
        #[tokio::test]
        async fn publishes_schedule_and_limits() {
            let switch = Arc::new(RecordingSwitch::default());
            let ctx = context(
                Arc::new(FixedPrices(vec![10.0, 30.0, 20.0, 40.0, 5.0])),
                None,
                Some(switch.clone()),
            );
            let snapshot = run_cycle(&ctx, monday_morning()).await;
            assert_eq!(ctx.dashboard.snapshot().await, snapshot);
            assert_eq!(snapshot.prices.len(), 5);
            assert_eq!(snapshot.prices[0].price, 1.0);
            use crate::control_signals::ControlSignal::{Off, On};
            assert_eq!(snapshot.schedule["climate.bedroom"], vec![On, Off, On, Off]);
            assert_eq!(snapshot.schedule["switch.garage"], vec![Off, Off, Off, Off]);
            assert_eq!(
                snapshot.limits["bedroom"],
                RoomLimits::Resolved(crate::model::TemperatureLimits {
                    max_temp: 19.0,
                    min_temp: 16.0
                })
            );
            assert_eq!(snapshot.updated_at, Some(monday_morning()));
            assert_eq!(snapshot.last_error, None);
            let commands = switch.commands.lock().unwrap().clone();
            assert_eq!(commands.len(), 3);
            assert_eq!(commands[0].signal, On);
            assert_eq!(commands[0].target_temperature, Some(19.0));
            assert_eq!(commands[2].signal, Off);
            assert_eq!(commands[2].target_temperature, Some(15.0));
        }
        #[tokio::test]
        async fn price_failure_turns_everything_off() {
            let switch = Arc::new(RecordingSwitch::default());
            let ctx = context(Arc::new(UnavailablePrices), None, Some(switch.clone()));
            let snapshot = run_cycle(&ctx, monday_morning()).await;
            assert!(snapshot.prices.is_empty());
            for signals in snapshot.schedule.values() {
                assert_eq!(signals, &vec![ControlSignal::Off; 4]);
            }
            assert!(snapshot
                .last_error
                .as_deref()
                .is_some_and(|message| message.contains("electricity prices")));
            assert!(switch
                .commands
                .lock()
                .unwrap()
                .iter()
                .all(|command| command.signal == ControlSignal::Off));
        }
        #[tokio::test]
        async fn weather_failure_is_not_fatal() {
            let ctx = context(
                Arc::new(FixedPrices(vec![1.0, 2.0])),
                Some(Arc::new(BrokenWeather)),
                None,
            );
            let snapshot = run_cycle(&ctx, monday_morning()).await;
            assert!(snapshot.weather.is_empty());
            assert_eq!(snapshot.schedule["switch.hall"].len(), 2);
            assert!(snapshot
                .last_error
                .as_deref()
                .is_some_and(|message| message.contains("weather")));
        }
        #[tokio::test]
        async fn failed_dispatch_does_not_stop_others() {
            let switch = Arc::new(RecordingSwitch::default());
            let ctx = context(
                Arc::new(FixedPrices(vec![1.0, 2.0])),
                None,
                Some(switch.clone()),
            );
            ctx.store
                .add_heater(Heater::new("fan.bedroom", "bedroom", true))
                .await
                .expect("adding heater should succeed");
            let snapshot = run_cycle(&ctx, monday_morning()).await;
            assert_eq!(snapshot.schedule.len(), 4);
            assert_eq!(switch.commands.lock().unwrap().len(), 4);
            let hall = &snapshot.dispatch["switch.hall"];
            assert_eq!(hall.last_signal, Some(ControlSignal::On));
            assert_eq!(hall.last_sent_at, Some(monday_morning()));
            assert_eq!(hall.next_signal, Some(ControlSignal::Off));
            assert_eq!(hall.next_at, Some(Utc.with_ymd_and_hms(2024, 11, 18, 9, 0, 0).unwrap()));
            assert_eq!(hall.error, None);
            let fan = &snapshot.dispatch["fan.bedroom"];
            assert_eq!(fan.last_signal, None);
            assert_eq!(fan.last_sent_at, None);
            assert!(fan.error.is_some());
        }
        #[tokio::test]
        async fn failed_dispatch_keeps_last_sent_signal() {
            let switch = Arc::new(RecordingSwitch::default());
            let ctx = context(
                Arc::new(FixedPrices(vec![1.0, 2.0])),
                None,
                Some(switch.clone()),
            );
            let first = run_cycle(&ctx, monday_morning()).await;
            assert_eq!(first.dispatch["climate.bedroom"].last_signal, Some(ControlSignal::On));
            switch.failing.lock().unwrap().push("climate.bedroom".to_string());
            let later = monday_morning() + TimeDelta::minutes(5);
            let second = run_cycle(&ctx, later).await;
            let bedroom = &second.dispatch["climate.bedroom"];
            assert_eq!(bedroom.last_signal, Some(ControlSignal::On));
            assert_eq!(bedroom.last_sent_at, Some(monday_morning()));
            assert!(bedroom.error.is_some());
            assert_eq!(second.dispatch["switch.hall"].last_sent_at, Some(later));
        }
        #[tokio::test]
        async fn no_switch_means_no_dispatch_status() {
            let ctx = context(Arc::new(FixedPrices(vec![1.0, 2.0])), None, None);
            assert!(run_cycle(&ctx, monday_morning()).await.dispatch.is_empty());
        }
        #[tokio::test]
        async fn bad_room_is_reported_per_room() {
            let mut data = home();
            data.rooms.push(Room::new("sauna", 90.0, 60.0).with_exception(
                TemperatureException::new(&["Monday"], "8:00", "25:99", 80.0, 70.0),
            ));
            let ctx = ControlContext {
                store: HomeStore::in_memory(data),
                ..context(Arc::new(FixedPrices(vec![1.0])), None, None)
            };
            let snapshot = run_cycle(&ctx, monday_morning()).await;
            assert!(matches!(snapshot.limits["sauna"], RoomLimits::Failed { .. }));
            assert!(matches!(snapshot.limits["hall"], RoomLimits::Resolved(..)));
        }
    }

    mod run {
        use super::*;
        #[tokio::test]
        async fn stops_on_shutdown() {
            let ctx = Arc::new(context(Arc::new(FixedPrices(vec![1.0, 2.0])), None, None));
            let (sender, receiver) = watch::channel(false);
            let handle = tokio::spawn(run(ctx.clone(), Duration::from_secs(3600), receiver));
            time::sleep(Duration::from_millis(50)).await;
            sender.send(true).expect("control loop should be listening");
            time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("control loop should stop")
                .expect("control loop should not panic");
            assert!(ctx.dashboard.snapshot().await.updated_at.is_some());
        }
    }
}
