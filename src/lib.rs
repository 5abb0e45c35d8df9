pub mod api;
pub mod control_loop;
pub mod control_signals;
pub mod dashboard;
pub mod electricity_price;
pub mod errors;
pub mod home_assistant;
pub mod model;
pub mod settings;
pub mod store;
pub mod temperature_limits;
pub mod weather;

use chrono::{DateTime, Utc};

pub type TimeStamp = DateTime<Utc>;
