//! InfluxDB v2 write client
//!
//! Posts one line-protocol point per record to `/api/v2/write` with
//! nanosecond precision. Any non-2xx response is a [`SinkError::Status`].

use super::line_protocol::Point;
use super::TimeSeriesSink;
use crate::config::InfluxConfig;
use crate::storage::SinkError;
use crate::types::TelemetryRecord;
use async_trait::async_trait;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP time-series writer.
#[derive(Debug, Clone)]
pub struct InfluxWriter {
    http: reqwest::Client,
    write_url: reqwest::Url,
    token: Option<String>,
}

impl InfluxWriter {
    pub fn new(config: &InfluxConfig) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::try_from_secs_f64(config.timeout_secs).unwrap_or(DEFAULT_TIMEOUT))
            .build()?;

        let base = config.url.trim_end_matches('/');
        let write_url = reqwest::Url::parse_with_params(
            &format!("{}/api/v2/write", base),
            &[
                ("org", config.org.as_str()),
                ("bucket", config.bucket.as_str()),
                ("precision", "ns"),
            ],
        )
        .map_err(|e| SinkError::Rejected(format!("invalid InfluxDB URL '{}': {}", config.url, e)))?;

        Ok(Self {
            http,
            write_url,
            token: config.token.clone().filter(|t| !t.is_empty()),
        })
    }

    pub fn write_url(&self) -> &reqwest::Url {
        &self.write_url
    }

    async fn post_line(&self, line: String) -> Result<(), SinkError> {
        let mut request = self
            .http
            .post(self.write_url.clone())
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Token {}", token));
        }

        let resp = request.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        Err(SinkError::Status {
            status: status.as_u16(),
            body: body.chars().take(256).collect(),
        })
    }
}

#[async_trait]
impl TimeSeriesSink for InfluxWriter {
    async fn write(&mut self, record: &TelemetryRecord) -> Result<(), SinkError> {
        let line = Point::from(record)
            .to_line()
            .ok_or_else(|| SinkError::Rejected(format!("{} record has no finite fields", record.kind())))?;
        self.post_line(line).await
    }

    fn sink_name(&self) -> &str {
        "influxdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> InfluxConfig {
        InfluxConfig {
            enabled: true,
            url: url.to_string(),
            org: "my org".to_string(),
            bucket: "cranepdm_kpis".to_string(),
            token: Some(String::new()),
            timeout_secs: 5.0,
            queue_capacity: 16,
        }
    }

    #[test]
    fn test_write_url_carries_query() {
        let writer = InfluxWriter::new(&config("http://localhost:8086/")).unwrap();
        let url = writer.write_url();
        assert_eq!(url.path(), "/api/v2/write");
        let query: Vec<(String, String)> = url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
        assert!(query.contains(&("org".to_string(), "my org".to_string())));
        assert!(query.contains(&("bucket".to_string(), "cranepdm_kpis".to_string())));
        assert!(query.contains(&("precision".to_string(), "ns".to_string())));
        // empty token means anonymous
        assert!(writer.token.is_none());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = InfluxWriter::new(&config("not a url")).unwrap_err();
        assert!(matches!(err, SinkError::Rejected(_)));
    }
}
