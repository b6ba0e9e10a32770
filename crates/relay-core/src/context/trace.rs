//! W3C `traceparent` inject/extract.

use rand::Rng;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;

use super::Context;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceParent {
    pub version: String,
    pub trace_id: String,
    pub parent_id: String,
    pub flags: String,
}

#[derive(Debug, Error)]
pub enum TraceParentError {
    #[error("malformed traceparent header: {0}")]
    Malformed(String),
    #[error("unsupported traceparent version 'ff'")]
    UnsupportedVersion,
    #[error("all-zero trace-id or parent-id")]
    AllZero,
}

fn pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9a-fA-F]{2})-([0-9a-fA-F]{32})-([0-9a-fA-F]{16})-([0-9a-fA-F]{2})$")
            .expect("static traceparent regex is valid")
    })
}

/// Strict parse used when a caller wants to guarantee validity; throws on
/// any malformed, reserved-version, or all-zero id.
pub fn from_traceparent(s: &str) -> Result<TraceParent, TraceParentError> {
    let caps = pattern()
        .captures(s.trim())
        .ok_or_else(|| TraceParentError::Malformed(s.to_string()))?;
    let version = caps[1].to_lowercase();
    let trace_id = caps[2].to_lowercase();
    let parent_id = caps[3].to_lowercase();
    let flags = caps[4].to_lowercase();

    if version == "ff" {
        return Err(TraceParentError::UnsupportedVersion);
    }
    if trace_id == "0".repeat(32) || parent_id == "0".repeat(16) {
        return Err(TraceParentError::AllZero);
    }

    Ok(TraceParent {
        version,
        trace_id,
        parent_id,
        flags,
    })
}

/// Lenient variant: returns `None` instead of an error for any malformed or
/// rejected header, the shape `extract(headers)` needs when scanning
/// arbitrary inbound headers.
pub fn extract(header_value: &str) -> Option<TraceParent> {
    from_traceparent(header_value).ok()
}

/// Emits `00-<trace-id>-<parent-id>-01`. The parent id is the top of the
/// tracing span stack (`context.data['_tracing_spans']`) when non-empty,
/// otherwise a fresh random 64-bit hex value.
pub async fn inject(ctx: &Context) -> TraceParent {
    let trace_id_hex = ctx.trace_id().replace('-', "");
    // A UUID without dashes is 32 hex chars already; pad defensively in case
    // a caller constructed a context with a non-UUID trace id.
    let trace_id_hex = format!("{:0>32}", trace_id_hex)
        .chars()
        .take(32)
        .collect::<String>();

    let parent_id = {
        let data = ctx.data().lock().await;
        match data.get("_tracing_spans") {
            Some(Value::Array(spans)) => spans
                .last()
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            _ => None,
        }
    };
    let parent_id = parent_id.unwrap_or_else(random_parent_id);

    TraceParent {
        version: "00".to_string(),
        trace_id: trace_id_hex,
        parent_id,
        flags: "01".to_string(),
    }
}

fn random_parent_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 8] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl TraceParent {
    pub fn to_header(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.version, self.trace_id, self.parent_id, self.flags
        )
    }
}

/// Converts a 32-hex W3C trace id back into UUID-dashed form
/// (`8-4-4-4-12`) so logs agree with external systems.
pub fn hex32_to_uuid(hex32: &str) -> String {
    let h = hex32.to_lowercase();
    if h.len() != 32 || !h.chars().all(|c| c.is_ascii_hexdigit()) {
        // Not a valid 32-hex value; fall back to a fresh trace id rather
        // than fabricate a malformed one.
        return uuid::Uuid::new_v4().to_string();
    }
    format!(
        "{}-{}-{}-{}-{}",
        &h[0..8],
        &h[8..12],
        &h[12..16],
        &h[16..20],
        &h[20..32]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[tokio::test]
    async fn inject_extract_round_trip_preserves_trace_id() {
        let ctx = Context::root(None, None);
        let tp = inject(&ctx).await;
        let header = tp.to_header();
        let extracted = extract(&header).expect("valid header");
        let rebuilt = Context::root(None, Some(&extracted));
        assert_eq!(rebuilt.trace_id(), ctx.trace_id());
    }

    #[test]
    fn rejects_reserved_version_and_all_zero() {
        assert!(from_traceparent(&format!("ff-{}-{}-01", "a".repeat(32), "b".repeat(16))).is_err());
        assert!(from_traceparent(&format!("00-{}-{}-01", "0".repeat(32), "b".repeat(16))).is_err());
        assert!(from_traceparent(&format!("00-{}-{}-01", "a".repeat(32), "0".repeat(16))).is_err());
    }

    #[test]
    fn pattern_matcher_sentinels_are_exact() {
        assert!(from_traceparent(&format!("00-{}-{}-01", "a".repeat(32), "b".repeat(16))).is_ok());
    }
}
