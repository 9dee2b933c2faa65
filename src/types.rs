use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ::time::{format_description::well_known, OffsetDateTime};

use crate::services;
use crate::validate::ValidationError;

/// Validated parameters for one scan of a single host over an inclusive port range.
///
/// Construct through [`ScanSpec::new`]; the fields cannot be changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSpec {
    host: String,
    start_port: u16,
    end_port: u16,
    max_concurrent: usize,
    timeout: Duration,
}

impl ScanSpec {
    /// Build a spec, enforcing `1 <= start <= end`, `max_concurrent >= 1` and a non-zero timeout.
    ///
    /// Host syntax and resolvability are not checked here; see [`crate::validate`].
    pub fn new(
        host: impl Into<String>,
        start_port: u16,
        end_port: u16,
        max_concurrent: usize,
        timeout: Duration,
    ) -> Result<Self, ValidationError> {
        if start_port == 0 {
            return Err(ValidationError::StartPortOutOfRange);
        }
        if end_port == 0 {
            return Err(ValidationError::EndPortOutOfRange);
        }
        if start_port > end_port {
            return Err(ValidationError::StartAfterEnd);
        }
        if max_concurrent == 0 {
            return Err(ValidationError::ZeroConcurrency);
        }
        if timeout.is_zero() {
            return Err(ValidationError::ZeroTimeout);
        }
        Ok(Self {
            host: host.into(),
            start_port,
            end_port,
            max_concurrent,
            timeout,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn start_port(&self) -> u16 {
        self.start_port
    }

    pub fn end_port(&self) -> u16 {
        self.end_port
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Per-attempt connect deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of ports in the range, `end - start + 1`.
    pub fn total_ports(&self) -> usize {
        usize::from(self.end_port - self.start_port) + 1
    }

    pub fn ports(&self) -> RangeInclusive<u16> {
        self.start_port..=self.end_port
    }
}

/// Raw result of a single connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortOutcome {
    pub port: u16,
    pub reachable: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
}

/// One open port, annotated with its well-known service name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortRecord {
    pub port: u16,
    pub service: String,
    pub state: PortState,
}

impl PortRecord {
    pub fn open(port: u16) -> Self {
        Self {
            port,
            service: services::service_name(port).to_string(),
            state: PortState::Open,
        }
    }
}

/// Final result of one scan, as returned to the CLI and HTTP layers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScanSummary {
    pub target: String,
    pub start_port: u16,
    pub end_port: u16,
    pub open_ports: Vec<PortRecord>,
    pub closed_ports: usize,
    pub total_ports: usize,
    #[serde(rename = "duration_seconds", with = "duration_secs")]
    pub elapsed: Duration,
    pub timestamp: String,
    /// Only ever set by a calling layer that rejected the request before scanning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanSummary {
    /// Error-only summary for a request that failed validation.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            target: String::new(),
            start_port: 0,
            end_port: 0,
            open_ports: Vec::new(),
            closed_ports: 0,
            total_ports: 0,
            elapsed: Duration::ZERO,
            timestamp: now_rfc3339(),
            error: Some(message.into()),
        }
    }
}

/// Scan request as received from the web API or assembled from CLI flags.
///
/// Every field is optional on the wire so missing values are reported by
/// validation rather than by the JSON decoder.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ScanRequest {
    pub host: String,
    pub start_port: i64,
    pub end_port: i64,
    pub max_concurrent: i64,
    pub timeout_ms: i64,
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

mod duration_secs {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
