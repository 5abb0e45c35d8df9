use crate::model::{Heater, PriceEntry};
use crate::TimeStamp;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Number of price intervals scheduled when the caller does not say otherwise.
pub const DEFAULT_HORIZON: usize = 12;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum ControlSignal {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
}

impl ControlSignal {
    pub fn is_on(&self) -> bool {
        *self == ControlSignal::On
    }
}

/// Heater id to one signal per scheduled price interval, in heater input order.
pub type Schedule = IndexMap<String, Vec<ControlSignal>>;

pub fn generate_control_signals(heaters: &[Heater], prices: &[PriceEntry]) -> Schedule {
    generate_control_signals_with_horizon(heaters, prices, DEFAULT_HORIZON)
}

/// Turns heaters on for the intervals priced below the window average.
///
/// The window is the first `min(horizon, prices.len())` entries. Enabled
/// heaters always get at least one `On`: if no interval is below average the
/// cheapest one is switched on. Disabled heaters get only `Off`. Without any
/// prices every heater gets `horizon` `Off` signals.
pub fn generate_control_signals_with_horizon(
    heaters: &[Heater],
    prices: &[PriceEntry],
    horizon: usize,
) -> Schedule {
    let window = &prices[..horizon.min(prices.len())];
    if window.is_empty() {
        return heaters
            .iter()
            .map(|heater| (heater.id.clone(), vec![ControlSignal::Off; horizon]))
            .collect();
    }
    let enabled_signals = below_average_signals(window);
    heaters
        .iter()
        .map(|heater| {
            let signals = if heater.is_enabled {
                enabled_signals.clone()
            } else {
                vec![ControlSignal::Off; window.len()]
            };
            (heater.id.clone(), signals)
        })
        .collect()
}

fn below_average_signals(window: &[PriceEntry]) -> Vec<ControlSignal> {
    let average_price = window.iter().map(|entry| entry.price).sum::<f64>() / window.len() as f64;
    let mut signals: Vec<ControlSignal> = window
        .iter()
        .map(|entry| {
            if entry.price < average_price {
                ControlSignal::On
            } else {
                ControlSignal::Off
            }
        })
        .collect();
    if !signals.iter().any(ControlSignal::is_on) {
        if let Some(cheapest) = cheapest_index(window) {
            signals[cheapest] = ControlSignal::On;
        }
    }
    signals
}

/// Index of the lowest price, first occurrence on ties.
fn cheapest_index(window: &[PriceEntry]) -> Option<usize> {
    let mut cheapest: Option<(usize, f64)> = None;
    for (index, entry) in window.iter().enumerate() {
        match cheapest {
            Some((_, price)) if entry.price >= price => (),
            _ => cheapest = Some((index, entry.price)),
        }
    }
    cheapest.map(|(index, _)| index)
}

/// Skips entries that ended at or before `now`. Order is preserved.
pub fn upcoming_prices(prices: &[PriceEntry], now: &TimeStamp) -> Vec<PriceEntry> {
    prices
        .iter()
        .filter(|entry| entry.end > *now)
        .cloned()
        .collect()
}

/// The signal for the interval that is running now.
pub fn current_signal(schedule: &Schedule, heater_id: &str) -> Option<ControlSignal> {
    schedule
        .get(heater_id)
        .and_then(|signals| signals.first().copied())
}
