use crate::errors::WeatherError;
use crate::TimeStamp;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

#[async_trait]
pub trait ForecastSource: Send + Sync {
    async fn fetch_forecast(
        &self,
        place: &str,
        start_time: &TimeStamp,
        end_time: &TimeStamp,
    ) -> Result<Vec<(TimeStamp, f64)>, WeatherError>;
}

/// Client for the weather service that proxies FMI open data temperature
/// forecasts.
#[derive(Clone)]
pub struct WeatherClient {
    base_url: String,
    client: reqwest::Client,
}

impl WeatherClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        WeatherClient {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ForecastSource for WeatherClient {
    async fn fetch_forecast(
        &self,
        place: &str,
        start_time: &TimeStamp,
        end_time: &TimeStamp,
    ) -> Result<Vec<(TimeStamp, f64)>, WeatherError> {
        let format_string = "%Y-%m-%dT%H:%M:%SZ";
        let start_time_str = start_time.format(format_string).to_string();
        let end_time_str = end_time.format(format_string).to_string();
        info!("fetching weather forecast for {}", place);
        let response = self
            .client
            .get(format!("{}/get_weather_data", self.base_url))
            .query(&[
                ("start_time", start_time_str.as_str()),
                ("end_time", end_time_str.as_str()),
                ("place", place),
            ])
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(WeatherError::Service {
                status: status.as_u16(),
                message: text,
            });
        }
        let forecast = parse_weather_response(&text).map_err(WeatherError::Parsing)?;
        debug!("received {} forecast points", forecast.len());
        Ok(forecast)
    }
}

fn parse_time_stamp(stamp: &str) -> Result<TimeStamp, String> {
    if let Ok(date_time) = DateTime::parse_from_rfc3339(stamp) {
        return Ok(date_time.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(stamp.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S")
        .map(|date_time| date_time.and_utc())
        .map_err(|_| format!("failed to parse stamp from string {}", stamp))
}

fn parse_weather_response(output: &str) -> Result<Vec<(TimeStamp, f64)>, String> {
    let parsed_json: Value = serde_json::from_str(output)
        .map_err(|error| format!("failed to parse output: {}", error))?;
    let values = match parsed_json.get("weather_values") {
        Some(Value::Array(values)) => values,
        _ => return Err("'weather_values' array missing in response".to_string()),
    };
    let mut forecast = Vec::with_capacity(values.len());
    for row in values {
        let stamp = match row.get("time") {
            Some(Value::String(stamp)) => parse_time_stamp(stamp)?,
            _ => return Err("failed to parse time stamp".to_string()),
        };
        // Non-numeric values mark missing forecast points.
        if let Some(temperature) = row.get("value").and_then(Value::as_f64) {
            forecast.push((stamp, temperature));
        }
    }
    Ok(forecast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    mod parse_weather_response {
        use super::*;
        #[test]
        fn parses_data_correctly() {
            let output = r#"
                {
                    "place": "Helsinki",
                    "weather_values": [
                        {"time": "2024-11-08T11:00:00Z", "value": 6.5},
                        {"time": "2024-11-08T12:00:00", "value": 6.6},
                        {"time": "2024-11-08T13:00:00+00:00", "value": 6.2}
                    ]
                }"#;
            let forecast = parse_weather_response(output).expect("parsing output should not fail");
            let expected = [
                (Utc.with_ymd_and_hms(2024, 11, 8, 11, 0, 0).unwrap(), 6.5),
                (Utc.with_ymd_and_hms(2024, 11, 8, 12, 0, 0).unwrap(), 6.6),
                (Utc.with_ymd_and_hms(2024, 11, 8, 13, 0, 0).unwrap(), 6.2),
            ];
            assert_eq!(forecast, expected);
        }
        #[test]
        fn skips_non_numeric_values() {
            let output = r#"{"weather_values": [
                {"time": "2024-11-08T11:00:00Z", "value": "NaN"},
                {"time": "2024-11-08T12:00:00Z", "value": 1.5}
            ]}"#;
            let forecast = parse_weather_response(output).expect("parsing output should not fail");
            assert_eq!(forecast.len(), 1);
            assert_eq!(forecast[0].1, 1.5);
        }
        #[test]
        fn fails_on_error_payload() {
            assert!(parse_weather_response(r#"{"error": "Bad Request"}"#).is_err());
        }
        #[test]
        fn fails_on_bad_time_stamp() {
            let output = r#"{"weather_values": [{"time": "yesterday", "value": 1.0}]}"#;
            assert!(parse_weather_response(output).is_err());
        }
    }

    mod fetch_forecast {
        use super::*;
        #[tokio::test]
        async fn passes_query_to_service() {
            let mut server = mockito::Server::new_async().await;
            let mock = server
                .mock("GET", "/get_weather_data")
                .match_query(mockito::Matcher::AllOf(vec![
                    mockito::Matcher::UrlEncoded("place".into(), "Helsinki".into()),
                    mockito::Matcher::UrlEncoded("start_time".into(), "2024-11-08T11:00:00Z".into()),
                    mockito::Matcher::UrlEncoded("end_time".into(), "2024-11-08T23:00:00Z".into()),
                ]))
                .with_status(200)
                .with_body(r#"{"place":"Helsinki","weather_values":[{"time":"2024-11-08T11:00:00Z","value":-2.25}]}"#)
                .create_async()
                .await;
            let client = WeatherClient::new(server.url());
            let start = Utc.with_ymd_and_hms(2024, 11, 8, 11, 0, 0).unwrap();
            let end = Utc.with_ymd_and_hms(2024, 11, 8, 23, 0, 0).unwrap();
            let forecast = client
                .fetch_forecast("Helsinki", &start, &end)
                .await
                .expect("fetching forecast should succeed");
            mock.assert_async().await;
            assert_eq!(forecast, vec![(start, -2.25)]);
        }
        #[tokio::test]
        async fn service_error_carries_status() {
            let mut server = mockito::Server::new_async().await;
            let _mock = server
                .mock("GET", "/get_weather_data")
                .match_query(mockito::Matcher::Any)
                .with_status(400)
                .with_body(r#"{"error": "Bad Request: Missing parameters."}"#)
                .create_async()
                .await;
            let client = WeatherClient::new(server.url());
            let now = Utc.with_ymd_and_hms(2024, 11, 8, 11, 0, 0).unwrap();
            match client.fetch_forecast("Helsinki", &now, &now).await {
                Err(WeatherError::Service { status, .. }) => assert_eq!(status, 400),
                _ => panic!("fetching should have failed"),
            }
        }
    }
}
