//! Endpoint prober - one bounded request against one client endpoint
//!
//! ## Retry discipline
//!
//! Every request runs in an explicit bounded loop of `retries + 1` attempts.
//! Each attempt is wrapped in `tokio::time::timeout(system.timeout)` and
//! attempts are separated by a fixed backoff. Only transport failures
//! (timeouts, connection errors, body read errors) are retried. An endpoint
//! that answers with an error status has spoken and is recorded as-is.
//!
//! ```text
//! attempt 1 ──✗── backoff ── attempt 2 ──✗── ... ── attempt N ──✗──▶ Unreachable
//!     │                          │
//!     └──✓ (any HTTP answer)     └──✓ ──▶ classify response
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::StatusCode;
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument, trace, warn};

use crate::model::{ClientSystem, HealthSample, HealthStatus, MetricsSample, MetricsWindow};
use crate::{HealthReport, MetricsReport};

/// Uptime below this is classified as down when the endpoint reports no status
const DOWN_UPTIME_BELOW: f64 = 80.0;

/// Uptime below this is classified as degraded when the endpoint reports no status
const DEGRADED_UPTIME_BELOW: f64 = 95.0;

/// Failure of a metrics pull that leaves nothing to record
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeError {
    /// No attempt produced an HTTP answer
    Transport { attempts: u32, message: String },

    /// The endpoint answered with an error status
    Endpoint { status: u16 },
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Transport { attempts, message } => {
                write!(f, "endpoint unreachable after {attempts} attempts: {message}")
            }
            ProbeError::Endpoint { status } => write!(f, "endpoint answered with HTTP {status}"),
        }
    }
}

impl std::error::Error for ProbeError {}

/// Result of a metrics pull
#[derive(Debug, Clone, PartialEq)]
pub enum MetricsPull {
    Data(MetricsSample),
    /// The endpoint had nothing for the window; recorded as zero activity
    NoData,
}

/// Raw answer of one successful attempt
#[derive(Debug)]
struct Answer {
    status: StatusCode,
    body: String,
    elapsed: Duration,
}

/// Performs health probes and metrics pulls
#[derive(Debug, Clone)]
pub struct EndpointProber {
    /// HTTP client (reused across requests)
    client: reqwest::Client,

    /// Fixed delay between attempts
    backoff: Duration,
}

impl EndpointProber {
    pub fn new(backoff: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, backoff })
    }

    /// Probe the health endpoint of a system
    ///
    /// Always yields exactly one sample, regardless of how many attempts it took.
    #[instrument(skip(self, system), fields(system = %system.key()))]
    pub async fn probe(&self, system: &ClientSystem) -> HealthSample {
        let started_at = Utc::now();
        let started = Instant::now();
        let url = format!("{}/health", system.endpoint);

        let (status, latency_ms, error) = match self.request(system, &url, None).await {
            Ok(answer) => {
                let latency = answer.elapsed.as_secs_f64() * 1000.0;
                let (status, error) = classify_health(&answer);
                (status, latency, error)
            }
            Err(e) => (
                HealthStatus::Unreachable,
                started.elapsed().as_secs_f64() * 1000.0,
                Some(e.to_string()),
            ),
        };

        debug!("probe finished: {status} in {latency_ms:.1}ms");

        HealthSample {
            client_id: system.client_id.clone(),
            system_name: system.system_name.clone(),
            timestamp: started_at,
            status,
            latency_ms,
            error,
        }
    }

    /// Pull automation counters for `[window.start, window.end)`
    #[instrument(skip(self, system), fields(system = %system.key()))]
    pub async fn pull_metrics(
        &self,
        system: &ClientSystem,
        window: MetricsWindow,
    ) -> Result<MetricsPull, ProbeError> {
        let url = format!("{}/metrics", system.endpoint);
        let query = [
            ("start_date", window.start.to_rfc3339()),
            ("end_date", window.end.to_rfc3339()),
        ];

        let answer = self.request(system, &url, Some(&query)).await?;

        if answer.status == StatusCode::NO_CONTENT || answer.status == StatusCode::NOT_FOUND {
            trace!("no metrics for window ({})", answer.status);
            return Ok(MetricsPull::NoData);
        }
        if !answer.status.is_success() {
            return Err(ProbeError::Endpoint {
                status: answer.status.as_u16(),
            });
        }

        Ok(parse_metrics(system, window, &answer.body))
    }

    async fn request(
        &self,
        system: &ClientSystem,
        url: &str,
        query: Option<&[(&str, String)]>,
    ) -> Result<Answer, ProbeError> {
        let attempts = system.retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let mut request = self.client.get(url);
            if let Some(query) = query {
                request = request.query(query);
            }

            let started = Instant::now();
            let outcome = timeout(system.timeout, async {
                let response = request.send().await.context("failed to send HTTP request")?;
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .context("failed to read response body")?;
                anyhow::Ok((status, body))
            })
            .await;

            match outcome {
                Ok(Ok((status, body))) => {
                    trace!(attempt, "answered with {status}");
                    return Ok(Answer {
                        status,
                        body,
                        elapsed: started.elapsed(),
                    });
                }
                Ok(Err(e)) => last_error = format!("{e:#}"),
                Err(_) => last_error = format!("timed out after {:?}", system.timeout),
            }

            warn!("attempt {attempt}/{attempts} against {url} failed: {last_error}");

            if attempt < attempts {
                sleep(self.backoff).await;
            }
        }

        Err(ProbeError::Transport {
            attempts,
            message: last_error,
        })
    }
}

fn classify_health(answer: &Answer) -> (HealthStatus, Option<String>) {
    if !answer.status.is_success() {
        return (
            HealthStatus::Down,
            Some(format!("HTTP {}", answer.status.as_u16())),
        );
    }

    let report: HealthReport = match serde_json::from_str(&answer.body) {
        Ok(report) => report,
        Err(e) => {
            return (
                HealthStatus::Unreachable,
                Some(format!("malformed health response: {e}")),
            );
        }
    };

    if let Some(status) = report.status.as_deref() {
        return match status.to_ascii_lowercase().as_str() {
            "healthy" | "ok" | "up" => (HealthStatus::Healthy, None),
            "degraded" | "warning" => (HealthStatus::Degraded, None),
            "down" | "unhealthy" | "error" => (
                HealthStatus::Down,
                Some("endpoint reported itself down".to_string()),
            ),
            other => (
                HealthStatus::Unreachable,
                Some(format!("unrecognized health status '{other}'")),
            ),
        };
    }

    match report.uptime_percentage {
        Some(uptime) if uptime < DOWN_UPTIME_BELOW => (
            HealthStatus::Down,
            Some(format!("reported uptime {uptime:.1}%")),
        ),
        Some(uptime) if uptime < DEGRADED_UPTIME_BELOW => (HealthStatus::Degraded, None),
        Some(_) => (HealthStatus::Healthy, None),
        None => (
            HealthStatus::Unreachable,
            Some("health response carries neither status nor uptime".to_string()),
        ),
    }
}

fn parse_metrics(system: &ClientSystem, window: MetricsWindow, body: &str) -> MetricsPull {
    if body.trim().is_empty() {
        return MetricsPull::NoData;
    }

    let report: MetricsReport = match serde_json::from_str(body) {
        Ok(report) => report,
        Err(e) => {
            warn!("malformed metrics response, treating as no data: {e}");
            return MetricsPull::NoData;
        }
    };

    let (Some(total), Some(successful)) = (report.total_automations, report.successful_automations)
    else {
        trace!("metrics response without counters");
        return MetricsPull::NoData;
    };

    if successful > total {
        warn!("metrics response reports {successful} successes out of {total}, treating as no data");
        return MetricsPull::NoData;
    }

    MetricsPull::Data(MetricsSample {
        client_id: system.client_id.clone(),
        system_name: system.system_name.clone(),
        window,
        total_automations: total,
        successful_automations: successful,
        failed_automations: report
            .failed_automations
            .unwrap_or(total - successful),
        processing_time_sum: report.total_processing_time.unwrap_or(0.0).max(0.0),
        cost_savings: report.cost_savings.unwrap_or(0.0),
    })
}
