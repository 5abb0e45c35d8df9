use crate::errors::PriceFetchError;
use crate::model::PriceEntry;
use crate::TimeStamp;
use async_trait::async_trait;
use chrono::{DateTime, DurationRound, TimeDelta};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// Source of electricity prices ordered by time.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_prices(
        &self,
        country: &str,
        start_time: &TimeStamp,
        end_time: &TimeStamp,
    ) -> Result<Vec<PriceEntry>, PriceFetchError>;
}

/// Client for the Elering Nord Pool price API.
#[derive(Clone)]
pub struct ElectricityPriceClient {
    base_url: String,
    client: reqwest::Client,
}

impl ElectricityPriceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        ElectricityPriceClient {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PriceSource for ElectricityPriceClient {
    async fn fetch_prices(
        &self,
        country: &str,
        start_time: &TimeStamp,
        end_time: &TimeStamp,
    ) -> Result<Vec<PriceEntry>, PriceFetchError> {
        let elering_country = as_elering_country(country)?;
        let format_string = "%Y-%m-%dT%H:%M:%S%.3fZ";
        let start_time_str = start_time.format(format_string).to_string();
        let end_time_str = end_time.format(format_string).to_string();
        info!(
            "fetching electricity prices for {} from {} to {}",
            country, start_time_str, end_time_str
        );
        let url = format!("{}/api/nps/price", self.base_url);
        let response_text = self
            .client
            .get(&url)
            .query(&[("start", &start_time_str), ("end", &end_time_str)])
            .header("accept", "application/json")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let pairs = parse_elering_response(&response_text, elering_country)
            .map_err(PriceFetchError::Parsing)?;
        debug!("received {} price entries", pairs.len());
        Ok(pairs_to_entries(pairs))
    }
}

/// Start and end of the price window covering `horizon_hours` from the
/// beginning of the current hour.
pub fn price_window_bounds(now: &TimeStamp, horizon_hours: usize) -> (TimeStamp, TimeStamp) {
    let start = now.duration_trunc(TimeDelta::hours(1)).unwrap_or(*now);
    (start, start + TimeDelta::hours(horizon_hours as i64))
}

/// Converts a wholesale price in €/MWh to a consumer price in c/kWh.
pub fn consumer_price(price_eur_per_mwh: f64, tax_percentage: f64, margin: f64) -> f64 {
    price_eur_per_mwh * 0.1 * (1.0 + tax_percentage / 100.0) + margin
}

/// Each interval ends where the next one starts. The last interval reuses the
/// previous step, or one hour when there is nothing to compare against.
fn pairs_to_entries(pairs: Vec<(TimeStamp, f64)>) -> Vec<PriceEntry> {
    let mut entries = Vec::with_capacity(pairs.len());
    for (i, (start, price)) in pairs.iter().enumerate() {
        let end = match pairs.get(i + 1) {
            Some((next_start, _)) => *next_start,
            None => match i.checked_sub(1).and_then(|previous| pairs.get(previous)) {
                Some((previous_start, _)) => *start + (*start - *previous_start),
                None => *start + TimeDelta::hours(1),
            },
        };
        entries.push(PriceEntry::new(*start, end, *price));
    }
    entries
}

/// Body of `/api/nps/price`: price series keyed by lower-case country code.
#[derive(Debug, Deserialize)]
struct EleringResponse {
    success: bool,
    #[serde(default)]
    data: HashMap<String, Vec<EleringPrice>>,
}

#[derive(Debug, Deserialize)]
struct EleringPrice {
    /// Unix seconds.
    timestamp: i64,
    price: f64,
}

impl EleringPrice {
    fn to_pair(&self) -> Result<(TimeStamp, f64), String> {
        DateTime::from_timestamp(self.timestamp, 0)
            .map(|start| (start, self.price))
            .ok_or_else(|| format!("price time stamp {} is out of range", self.timestamp))
    }
}

fn parse_elering_response(
    response_text: &str,
    country_code: &str,
) -> Result<Vec<(TimeStamp, f64)>, String> {
    let response: EleringResponse = serde_json::from_str(response_text)
        .map_err(|error| format!("malformed price response: {}", error))?;
    if !response.success {
        return Err("price service reported an unsuccessful query".to_string());
    }
    response
        .data
        .get(country_code)
        .ok_or_else(|| format!("no prices for '{}' in response", country_code))?
        .iter()
        .map(EleringPrice::to_pair)
        .collect()
}

const COUNTRY_CODES: [(&str, &str); 4] = [
    ("Estonia", "ee"),
    ("Finland", "fi"),
    ("Lithuania", "lt"),
    ("Latvia", "lv"),
];

fn as_elering_country(country: &str) -> Result<&'static str, PriceFetchError> {
    COUNTRY_CODES
        .iter()
        .find(|(name, _)| *name == country)
        .map(|(_, code)| *code)
        .ok_or_else(|| PriceFetchError::UnsupportedCountry(country.to_string()))
}
