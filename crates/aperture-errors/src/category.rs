use serde::{Deserialize, Serialize};

/// Classification of a failure, driving retry eligibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Transient,
    Permanent,
    Unknown,
}

impl ErrorCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

const TRANSIENT_MARKERS: &[&str] = &["timeout", "unavailable", "connection", "transient", "temporary"];
const TRANSIENT_STATUSES: &[u16] = &[408, 429, 503, 504];

const PERMANENT_MARKERS: &[&str] = &["unauthorized", "forbidden", "notfound", "invalid"];
const PERMANENT_STATUSES: &[u16] = &[400, 401, 403, 404];

/// Categorize a failure from its textual form and any HTTP status carried
/// with it. Transient markers win over permanent ones when both match.
pub fn categorize(message: &str, http_status: Option<u16>) -> ErrorCategory {
    let lowered = message.to_ascii_lowercase();

    let status_in = |set: &[u16]| http_status.map(|s| set.contains(&s)).unwrap_or(false);

    if TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m)) || status_in(TRANSIENT_STATUSES) {
        return ErrorCategory::Transient;
    }
    if PERMANENT_MARKERS.iter().any(|m| lowered.contains(m)) || status_in(PERMANENT_STATUSES) {
        return ErrorCategory::Permanent;
    }
    ErrorCategory::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_by_message() {
        assert_eq!(categorize("request Timeout talking to orders", None), ErrorCategory::Transient);
        assert_eq!(categorize("CONNECTION refused", None), ErrorCategory::Transient);
        assert_eq!(categorize("temporary hiccup", None), ErrorCategory::Transient);
    }

    #[test]
    fn transient_by_status() {
        for status in [408u16, 429, 503, 504] {
            assert_eq!(categorize("boom", Some(status)), ErrorCategory::Transient);
        }
    }

    #[test]
    fn permanent_by_message_and_status() {
        assert_eq!(categorize("Unauthorized", None), ErrorCategory::Permanent);
        assert_eq!(categorize("entity NotFound", None), ErrorCategory::Permanent);
        for status in [400u16, 401, 403, 404] {
            assert_eq!(categorize("boom", Some(status)), ErrorCategory::Permanent);
        }
    }

    #[test]
    fn transient_wins_over_permanent() {
        assert_eq!(categorize("timeout", Some(404)), ErrorCategory::Transient);
    }

    #[test]
    fn unknown_otherwise() {
        assert_eq!(categorize("something odd", None), ErrorCategory::Unknown);
        assert_eq!(categorize("boom", Some(500)), ErrorCategory::Unknown);
    }
}
