use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;

use crate::config::FeedConfig;
use crate::fetch::auth::UrlParam;
use crate::fetch::{BasicClient, fetch_bytes};
use crate::parser::parse_feed;
use crate::services::vehicle_feed::VehicleFeed;

const SIRI_VERSION: &str = "2";

/// MTA BusTime SIRI Vehicle Monitoring client.
pub struct BusTimeClient {
    http: UrlParam<BasicClient>,
    url: String,
}

impl BusTimeClient {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let http = BasicClient::new(config.request_timeout).context("Failed to build HTTP client")?;
        Ok(Self {
            http: UrlParam::new(http, "key", config.api_key.clone()),
            url: request_url(config)?,
        })
    }
}

/// Query URL without the API key, which [`UrlParam`] appends per request.
pub fn request_url(config: &FeedConfig) -> Result<String> {
    let mut url = Url::parse(&config.base_url)
        .with_context(|| format!("Invalid feed URL {:?}", config.base_url))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("version", SIRI_VERSION);
        query.append_pair("VehicleMonitoringDetailLevel", &config.detail_level);
        if let Some(line) = &config.line_ref {
            query.append_pair("LineRef", line);
        }
        if let Some(direction) = &config.direction_ref {
            query.append_pair("DirectionRef", direction);
        }
    }
    Ok(url.into())
}

#[async_trait]
impl VehicleFeed for BusTimeClient {
    #[tracing::instrument(skip(self))]
    async fn fetch_payload(&self) -> Result<Value> {
        let bytes = fetch_bytes(&self.http, &self.url).await?;
        parse_feed(&bytes).context("Vehicle Monitoring response is not valid JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_BASE_URL;
    use std::time::Duration;

    fn feed_config() -> FeedConfig {
        FeedConfig {
            api_key: "secret".into(),
            base_url: DEFAULT_BASE_URL.into(),
            detail_level: "normal".into(),
            line_ref: None,
            direction_ref: None,
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_request_url_without_filters() {
        let url = request_url(&feed_config()).unwrap();
        assert_eq!(
            url,
            "https://bustime.mta.info/api/siri/vehicle-monitoring.json?version=2&VehicleMonitoringDetailLevel=normal"
        );
        assert!(!url.contains("secret"));
    }

    #[test]
    fn test_request_url_with_filters() {
        let mut config = feed_config();
        config.line_ref = Some("MTA NYCT_M5".into());
        config.direction_ref = Some("1".into());
        let url = Url::parse(&request_url(&config).unwrap()).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("LineRef".into(), "MTA NYCT_M5".into())));
        assert!(pairs.contains(&("DirectionRef".into(), "1".into())));
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let mut config = feed_config();
        config.base_url = "not a url".into();
        assert!(request_url(&config).is_err());
    }
}
