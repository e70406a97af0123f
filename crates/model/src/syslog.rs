//! Parsed syslog record
//!
//! The common record model every source normalizes into. Field names
//! follow RFC 5424; RFC 3164 messages map onto the same struct with
//! `version == 0` and empty msgid/structured data.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Syslog facility names, indexed by facility code
const FACILITIES: [&str; 24] = [
    "kern", "user", "mail", "daemon", "auth", "syslog", "lpr", "news", "uucp", "cron", "authpriv",
    "ftp", "ntp", "audit", "alert", "clock", "local0", "local1", "local2", "local3", "local4",
    "local5", "local6", "local7",
];

/// Syslog severity names, indexed by severity code
const SEVERITIES: [&str; 8] = [
    "emerg", "alert", "crit", "err", "warning", "notice", "info", "debug",
];

/// Syslog priority value (`facility * 8 + severity`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Build a priority from facility and severity codes
    pub fn new(facility: u8, severity: u8) -> Self {
        Self((facility << 3) | (severity & 0x7))
    }

    /// Facility code (0-23)
    #[inline]
    pub fn facility(self) -> u8 {
        self.0 >> 3
    }

    /// Severity code (0-7)
    #[inline]
    pub fn severity(self) -> u8 {
        self.0 & 0x7
    }

    /// Facility name, or "unknown" for out-of-range codes
    pub fn facility_name(self) -> &'static str {
        FACILITIES
            .get(self.facility() as usize)
            .copied()
            .unwrap_or("unknown")
    }

    /// Severity name
    pub fn severity_name(self) -> &'static str {
        SEVERITIES[self.severity() as usize]
    }
}

/// One structured-data element: `[id param="value" ...]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SdElement {
    /// SD-ID, e.g. `timeQuality` or `example@32473`
    pub id: String,
    /// Parameter name/value pairs in wire order
    pub params: Vec<(String, String)>,
}

/// A parsed syslog message
///
/// Produced by the format parsers, consumed by the stash. Timestamps are
/// UTC; `time_reported` is what the client claimed, `time_generated` is
/// when this gateway first saw the frame.
#[derive(Debug, Clone, Serialize)]
pub struct SyslogMessage {
    /// Priority value from the `<PRI>` header
    pub priority: Priority,
    /// Protocol version; 1 for RFC 5424, 0 for RFC 3164
    pub version: u8,
    /// Timestamp carried by the message, if any
    pub time_reported: Option<DateTime<Utc>>,
    /// Local receive timestamp
    pub time_generated: DateTime<Utc>,
    /// HOSTNAME field ("" when the client sent `-`)
    pub hostname: String,
    /// APP-NAME (RFC 5424) or TAG (RFC 3164)
    pub app_name: String,
    /// PROCID field
    pub proc_id: String,
    /// MSGID field
    pub msg_id: String,
    /// Structured data elements; empty when absent or parsing is disabled
    pub structured: Vec<SdElement>,
    /// Free-form MSG part
    pub message: String,
}

impl SyslogMessage {
    /// Create an empty message stamped with the current receive time
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            version: 0,
            time_reported: None,
            time_generated: Utc::now(),
            hostname: String::new(),
            app_name: String::new(),
            proc_id: String::new(),
            msg_id: String::new(),
            structured: Vec::new(),
            message: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_split() {
        // <134> = local0.info
        let pri = Priority(134);
        assert_eq!(pri.facility(), 16);
        assert_eq!(pri.severity(), 6);
        assert_eq!(pri.facility_name(), "local0");
        assert_eq!(pri.severity_name(), "info");
    }

    #[test]
    fn test_priority_new_roundtrip() {
        let pri = Priority::new(4, 2);
        assert_eq!(pri.0, 34);
        assert_eq!(pri.facility_name(), "auth");
        assert_eq!(pri.severity_name(), "crit");
    }

    #[test]
    fn test_priority_out_of_range_facility() {
        // facility 30 does not exist
        let pri = Priority::new(30, 7);
        assert_eq!(pri.facility_name(), "unknown");
    }

    #[test]
    fn test_new_message_is_empty() {
        let msg = SyslogMessage::new(Priority(13));
        assert_eq!(msg.version, 0);
        assert!(msg.time_reported.is_none());
        assert!(msg.hostname.is_empty());
        assert!(msg.structured.is_empty());
    }
}
