use crate::config::InfluxConfig;
use crate::error::{AppError, Result};
use crate::sink::{MetricsSink, Reading};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff between retries doubles up to this multiple of the initial delay.
const MAX_BACKOFF_FACTOR: u32 = 8;

/// Pushes readings to the InfluxDB v2 write API, one line per request.
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: String,
    measurement: String,
    max_retries: u32,
    retry_backoff: Duration,
}

impl InfluxSink {
    pub fn new(cfg: &InfluxConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Token {}", cfg.token))
            .map_err(|e| AppError::Config(format!("invalid InfluxDB token: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            write_url: write_url(cfg),
            measurement: cfg.measurement.clone(),
            max_retries: cfg.max_retries,
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
        })
    }

    async fn post_line(&self, line: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.write_url)
            .body(line.to_owned())
            .send()
            .await?;

        // InfluxDB answers an accepted write with 204; any other status means
        // the line may not have been stored.
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            debug!(status = status.as_u16(), "reading written to InfluxDB");
            Ok(())
        } else {
            Err(AppError::Sink {
                status: status.as_u16(),
                payload: line.to_owned(),
            })
        }
    }
}

fn write_url(cfg: &InfluxConfig) -> String {
    format!(
        "{}/api/v2/write?org={}&bucket={}&precision=s",
        cfg.url.trim_end_matches('/'),
        cfg.org,
        cfg.bucket
    )
}

#[async_trait]
impl MetricsSink for InfluxSink {
    async fn write(&self, reading: &Reading) -> Result<()> {
        let line = reading.to_line_protocol(&self.measurement);
        let mut backoff = self.retry_backoff;
        let max_backoff = self.retry_backoff * MAX_BACKOFF_FACTOR;
        let mut attempt = 0;

        loop {
            match self.post_line(&line).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        channel = %reading.channel,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "InfluxDB write failed; retrying in {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
