//! Character-set decoding
//!
//! Sources declare the encoding of their payloads; anything the WHATWG
//! label registry knows is accepted. Unknown labels fall back to UTF-8
//! rather than failing the whole source.

use encoding_rs::{Encoding, UTF_8};

use crate::ParseError;

/// Resolve an encoding label to a decoder
///
/// Empty labels and the usual UTF-8 spellings short-circuit; everything
/// else goes through the WHATWG label registry ("latin1", "windows-1252",
/// "koi8-r", ...).
pub fn select_decoder(label: &str) -> &'static Encoding {
    match label {
        "" | "utf8" | "utf-8" | "UTF-8" => UTF_8,
        other => Encoding::for_label(other.trim().as_bytes()).unwrap_or(UTF_8),
    }
}

/// Decode payload bytes with the given encoding
///
/// Malformed sequences are an error, not a replacement character: a
/// mis-declared encoding must NACK the message, not corrupt it.
pub fn decode(raw: &[u8], encoding: &'static Encoding) -> Result<String, ParseError> {
    let (text, _, had_errors) = encoding.decode(raw);
    if had_errors {
        return Err(ParseError::Encoding {
            encoding: encoding.name(),
        });
    }
    Ok(text.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::WINDOWS_1252;

    #[test]
    fn test_select_decoder_labels() {
        assert_eq!(select_decoder(""), UTF_8);
        assert_eq!(select_decoder("utf8"), UTF_8);
        assert_eq!(select_decoder("latin1"), WINDOWS_1252);
        assert_eq!(select_decoder("windows-1252"), WINDOWS_1252);
        assert_eq!(select_decoder("no-such-charset"), UTF_8);
    }

    #[test]
    fn test_decode_utf8() {
        assert_eq!(decode("héllo".as_bytes(), UTF_8).unwrap(), "héllo");
    }

    #[test]
    fn test_decode_latin1() {
        // 0xE9 = 'é' in latin1, invalid as UTF-8
        let raw = b"caf\xe9";
        assert_eq!(decode(raw, WINDOWS_1252).unwrap(), "café");
        assert!(decode(raw, UTF_8).is_err());
    }
}
