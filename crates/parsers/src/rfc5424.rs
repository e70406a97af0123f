//! RFC 5424 (IETF syslog) parser
//!
//! `<PRI>VERSION SP TIMESTAMP SP HOSTNAME SP APP-NAME SP PROCID SP MSGID
//! SP STRUCTURED-DATA [SP MSG]`. Nil fields are `-`. Structured data is
//! always scanned (its end delimits the MSG part); whether the elements
//! are materialized depends on the `dont_parse_sd` hint.

use chrono::{DateTime, Utc};
use encoding_rs::Encoding;
use spigot_model::{Priority, SdElement, SyslogMessage};

use crate::decoders::decode;
use crate::{ParseError, Parser};

const FORMAT: &str = "rfc5424";

/// IETF syslog parser
#[derive(Debug, Default)]
pub struct Rfc5424Parser;

impl Parser for Rfc5424Parser {
    fn name(&self) -> &'static str {
        "rfc5424"
    }

    fn parse(
        &self,
        raw: &[u8],
        encoding: &'static Encoding,
        dont_parse_sd: bool,
    ) -> Result<Option<SyslogMessage>, ParseError> {
        let text = decode(raw, encoding)?;
        let text = text.trim_end_matches(['\r', '\n']);
        if text.trim().is_empty() {
            return Ok(None);
        }

        let (priority, rest) = parse_pri(text)?;
        let rest = rest.strip_prefix("1 ").ok_or_else(|| malformed("expected version '1'"))?;

        let (timestamp, rest) = next_field(rest, "timestamp")?;
        let (hostname, rest) = next_field(rest, "hostname")?;
        let (app_name, rest) = next_field(rest, "app-name")?;
        let (proc_id, rest) = next_field(rest, "procid")?;
        let (msg_id, rest) = next_field(rest, "msgid")?;

        let time_reported = match timestamp {
            "-" => None,
            ts => Some(
                DateTime::parse_from_rfc3339(ts)
                    .map_err(|e| malformed(format!("bad timestamp '{ts}': {e}")))?
                    .with_timezone(&Utc),
            ),
        };

        let (structured, rest) = parse_structured_data(rest, !dont_parse_sd)?;

        let message = match rest {
            "" => String::new(),
            m => {
                let m = m
                    .strip_prefix(' ')
                    .ok_or_else(|| malformed("junk after structured data"))?;
                m.trim_start_matches('\u{feff}').to_owned()
            }
        };

        let mut msg = SyslogMessage::new(priority);
        msg.version = 1;
        msg.time_reported = time_reported;
        msg.hostname = nil_to_empty(hostname);
        msg.app_name = nil_to_empty(app_name);
        msg.proc_id = nil_to_empty(proc_id);
        msg.msg_id = nil_to_empty(msg_id);
        msg.structured = structured;
        msg.message = message;
        Ok(Some(msg))
    }
}

fn malformed(reason: impl Into<String>) -> ParseError {
    ParseError::Malformed {
        format: FORMAT,
        reason: reason.into(),
    }
}

fn nil_to_empty(field: &str) -> String {
    if field == "-" {
        String::new()
    } else {
        field.to_owned()
    }
}

/// Parse the `<PRI>` header, returning the rest of the input
pub(crate) fn parse_pri(text: &str) -> Result<(Priority, &str), ParseError> {
    let inner = text
        .strip_prefix('<')
        .ok_or_else(|| ParseError::Priority("missing '<'".into()))?;
    let end = inner
        .find('>')
        .ok_or_else(|| ParseError::Priority("missing '>'".into()))?;
    if end == 0 || end > 3 {
        return Err(ParseError::Priority(format!(
            "priority must be 1-3 digits, got {end}"
        )));
    }
    let value: u16 = inner[..end]
        .parse()
        .map_err(|_| ParseError::Priority(format!("not a number: '{}'", &inner[..end])))?;
    if value > 191 {
        return Err(ParseError::Priority(format!("{value} out of range")));
    }
    Ok((Priority(value as u8), &inner[end + 1..]))
}

/// Split off the next SP-delimited header field
fn next_field<'a>(s: &'a str, what: &'static str) -> Result<(&'a str, &'a str), ParseError> {
    if s.is_empty() {
        return Err(malformed(format!("missing {what}")));
    }
    match s.split_once(' ') {
        Some((field, rest)) => Ok((field, rest)),
        None => Ok((s, "")),
    }
}

/// Scan the STRUCTURED-DATA part
///
/// Always consumes up to the end of the SD section so the caller can find
/// MSG; only materializes elements when `collect` is set.
fn parse_structured_data(
    s: &str,
    collect: bool,
) -> Result<(Vec<SdElement>, &str), ParseError> {
    if let Some(rest) = s.strip_prefix('-') {
        return Ok((Vec::new(), rest));
    }
    if !s.starts_with('[') {
        return Err(malformed("structured data must start with '-' or '['"));
    }

    let mut elements = Vec::new();
    let mut rest = s;
    while let Some(body) = rest.strip_prefix('[') {
        let (element, after) = parse_sd_element(body, collect)?;
        if collect {
            elements.push(element);
        }
        rest = after;
        if !rest.starts_with('[') {
            break;
        }
    }
    Ok((elements, rest))
}

/// Parse one `id (SP name="value")* ]` element body
fn parse_sd_element(body: &str, collect: bool) -> Result<(SdElement, &str), ParseError> {
    let id_end = body
        .find([' ', ']'])
        .ok_or_else(|| malformed("unterminated sd-element"))?;
    let mut element = SdElement::default();
    if collect {
        element.id = body[..id_end].to_owned();
    }

    let mut rest = &body[id_end..];
    loop {
        if let Some(after) = rest.strip_prefix(']') {
            return Ok((element, after));
        }
        let params = rest
            .strip_prefix(' ')
            .ok_or_else(|| malformed("expected space before sd-param"))?;
        let eq = params
            .find('=')
            .ok_or_else(|| malformed("sd-param without '='"))?;
        let name = &params[..eq];
        let value_body = params[eq + 1..]
            .strip_prefix('"')
            .ok_or_else(|| malformed("sd-param value must be quoted"))?;
        let (value, after) = parse_quoted_value(value_body)?;
        if collect {
            element.params.push((name.to_owned(), value));
        }
        rest = after;
    }
}

/// Parse a quoted param value handling `\"`, `\\` and `\]` escapes
fn parse_quoted_value(s: &str) -> Result<(String, &str), ParseError> {
    let mut value = String::new();
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((value, &s[i + 1..])),
            '\\' => match chars.next() {
                Some((_, escaped @ ('"' | '\\' | ']'))) => value.push(escaped),
                Some((_, other)) => {
                    value.push('\\');
                    value.push(other);
                }
                None => return Err(malformed("dangling escape in sd-param value")),
            },
            c => value.push(c),
        }
    }
    Err(malformed("unterminated sd-param value"))
}

#[cfg(test)]
#[path = "rfc5424_test.rs"]
mod tests;
