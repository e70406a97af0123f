//! RFC 3164 (BSD syslog) parser
//!
//! The wild west of syslog: `<PRI>TIMESTAMP HOSTNAME TAG[PID]: MSG`, with
//! every part optional in some device's interpretation. The parser takes
//! what it can identify and never rejects a message for missing header
//! parts - only an unusable priority or encoding is an error.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use encoding_rs::Encoding;
use spigot_model::{Priority, SyslogMessage};

use crate::decoders::decode;
use crate::rfc5424::parse_pri;
use crate::{ParseError, Parser};

/// Priority RFC 3164 tells a receiver to assume when none is on the wire
const DEFAULT_PRI: Priority = Priority(13);

/// BSD syslog parser
#[derive(Debug, Default)]
pub struct Rfc3164Parser;

impl Parser for Rfc3164Parser {
    fn name(&self) -> &'static str {
        "rfc3164"
    }

    fn parse(
        &self,
        raw: &[u8],
        encoding: &'static Encoding,
        _dont_parse_sd: bool,
    ) -> Result<Option<SyslogMessage>, ParseError> {
        let text = decode(raw, encoding)?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let (priority, rest) = if text.starts_with('<') {
            parse_pri(text)?
        } else {
            (DEFAULT_PRI, text)
        };
        let rest = rest.trim_start();

        let (time_reported, rest) = take_timestamp(rest);
        // Without a timestamp there is no way to tell a hostname from the
        // first word of the content; leave it empty.
        let (hostname, rest) = if time_reported.is_some() {
            take_hostname(rest)
        } else {
            ("", rest)
        };
        let (app_name, proc_id, message) = split_tag(rest);

        let mut msg = SyslogMessage::new(priority);
        msg.time_reported = time_reported;
        msg.hostname = hostname.to_owned();
        msg.app_name = app_name.to_owned();
        msg.proc_id = proc_id.to_owned();
        msg.message = message.to_owned();
        Ok(Some(msg))
    }
}

/// Try to take a leading timestamp: RFC 3339 or `MMM dd hh:mm:ss`
fn take_timestamp(s: &str) -> (Option<DateTime<Utc>>, &str) {
    // Some devices send RFC 3339 in an otherwise 3164 message
    if let Some((token, rest)) = s.split_once(' ') {
        if let Ok(ts) = DateTime::parse_from_rfc3339(token) {
            return (Some(ts.with_timezone(&Utc)), rest.trim_start());
        }
    }

    // Classic "Dec 20 12:34:56", day possibly space-padded
    let Some(([month, day, time], rest)) = take_tokens::<3>(s) else {
        return (None, s);
    };
    // The year is not on the wire; assume the current one
    let candidate = format!("{} {month} {day} {time}", Utc::now().year());
    match NaiveDateTime::parse_from_str(&candidate, "%Y %b %d %H:%M:%S") {
        Ok(naive) => (Some(Utc.from_utc_datetime(&naive)), rest),
        Err(_) => (None, s),
    }
}

/// Take N whitespace-delimited tokens plus the remainder
fn take_tokens<const N: usize>(s: &str) -> Option<([&str; N], &str)> {
    let mut tokens = [""; N];
    let mut rest = s;
    for token in &mut tokens {
        rest = rest.trim_start();
        let end = rest
            .find(char::is_whitespace)
            .unwrap_or(rest.len());
        if end == 0 {
            return None;
        }
        *token = &rest[..end];
        rest = &rest[end..];
    }
    Some((tokens, rest.trim_start()))
}

/// Take the hostname token, unless it already looks like the TAG
fn take_hostname(s: &str) -> (&str, &str) {
    let Some((token, rest)) = s.split_once(' ') else {
        return ("", s);
    };
    // "app[123]:" or "app:" in hostname position means the relay stripped
    // the hostname; keep the token for the tag pass
    if token.contains(':') || token.contains('[') {
        return ("", s);
    }
    (token, rest.trim_start())
}

/// Split `TAG[PID]: MSG` into app name, pid and message
fn split_tag(s: &str) -> (&str, &str, &str) {
    let Some(colon) = s.find(':') else {
        return ("", "", s);
    };
    let tag = &s[..colon];
    if tag.contains(' ') {
        // A space before any colon means there was no tag at all
        return ("", "", s);
    }
    let message = s[colon + 1..].trim_start();
    match tag.split_once('[') {
        Some((app, pid)) => (app, pid.trim_end_matches(']'), message),
        None => (tag, "", message),
    }
}

#[cfg(test)]
#[path = "rfc3164_test.rs"]
mod tests;
