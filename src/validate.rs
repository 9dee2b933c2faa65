//! Request validation and defaulting performed before the scan engine is invoked.
use std::net::IpAddr;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tokio::net::lookup_host;
use tokio::time;

use crate::types::{ScanRequest, ScanSpec};

pub const DEFAULT_MAX_CONCURRENT: usize = 100;
pub const DEFAULT_TIMEOUT_MS: u64 = 500;

/// Upper bound on the DNS lookup done while validating a hostname.
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// `None` only if the pattern fails to compile, in which case no name is accepted.
static HOSTNAME_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^([a-zA-Z0-9]+(-[a-zA-Z0-9]+)*\.)+[a-zA-Z]{2,}$").ok());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("host required")]
    MissingHost,
    #[error("invalid hostname or IP address")]
    InvalidHost,
    #[error("failed to resolve hostname: {0}")]
    Unresolvable(String),
    #[error("start port must be between 1 and 65535")]
    StartPortOutOfRange,
    #[error("end port must be between 1 and 65535")]
    EndPortOutOfRange,
    #[error("start port cannot be greater than end port")]
    StartAfterEnd,
    #[error("max concurrent must be at least 1")]
    ZeroConcurrency,
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
}

/// How a syntactically valid host was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    Ip(IpAddr),
    Name,
}

/// Validate a request and turn it into a [`ScanSpec`], applying defaults for
/// non-positive concurrency and timeout.
///
/// Checks run in order: host presence, host syntax, DNS resolution, port bounds.
pub async fn validate_request(req: &ScanRequest) -> Result<ScanSpec, ValidationError> {
    let host = req.host.trim();
    if let HostKind::Name = validate_host_syntax(host)? {
        resolve(host).await?;
    }
    let (start, end) = check_port_range(req.start_port, req.end_port)?;
    ScanSpec::new(
        host,
        start,
        end,
        effective_max_concurrent(req.max_concurrent),
        effective_timeout(req.timeout_ms),
    )
}

/// Accepts IP literals, `localhost`, and dotted names ending in an alphabetic TLD.
pub fn validate_host_syntax(host: &str) -> Result<HostKind, ValidationError> {
    if host.is_empty() {
        return Err(ValidationError::MissingHost);
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(HostKind::Ip(ip));
    }
    let dotted_name = HOSTNAME_RE.as_ref().is_some_and(|re| re.is_match(host));
    if host.eq_ignore_ascii_case("localhost") || dotted_name {
        return Ok(HostKind::Name);
    }
    Err(ValidationError::InvalidHost)
}

pub fn check_port_range(start: i64, end: i64) -> Result<(u16, u16), ValidationError> {
    let start = port_in_bounds(start).ok_or(ValidationError::StartPortOutOfRange)?;
    let end = port_in_bounds(end).ok_or(ValidationError::EndPortOutOfRange)?;
    if start > end {
        return Err(ValidationError::StartAfterEnd);
    }
    Ok((start, end))
}

pub fn effective_max_concurrent(requested: i64) -> usize {
    if requested <= 0 {
        DEFAULT_MAX_CONCURRENT
    } else {
        usize::try_from(requested).unwrap_or(usize::MAX)
    }
}

pub fn effective_timeout(timeout_ms: i64) -> Duration {
    match u64::try_from(timeout_ms) {
        Ok(ms) if ms > 0 => Duration::from_millis(ms),
        _ => Duration::from_millis(DEFAULT_TIMEOUT_MS),
    }
}

fn port_in_bounds(p: i64) -> Option<u16> {
    u16::try_from(p).ok().filter(|&p| p != 0)
}

async fn resolve(host: &str) -> Result<(), ValidationError> {
    let addrs = time::timeout(RESOLVE_TIMEOUT, lookup_host((host, 0)))
        .await
        .map_err(|_| ValidationError::Unresolvable("lookup timed out".into()))?
        .map_err(|e| ValidationError::Unresolvable(e.to_string()))?;
    if addrs.count() == 0 {
        return Err(ValidationError::Unresolvable("no addresses found".into()));
    }
    tracing::debug!(host, "hostname resolved");
    Ok(())
}
