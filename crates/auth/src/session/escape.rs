//! Query-string escaping for session ids on the wire.
//!
//! Storage ids and wire ids are decoupled: the manager hands out the escaped
//! form and unescapes whatever the transport gives back.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

use super::SessionError;

const QUERY: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Escape with query-string rules (space becomes `+`).
pub fn query_escape(raw: &str) -> String {
    raw.split(' ')
        .map(|part| utf8_percent_encode(part, QUERY).to_string())
        .collect::<Vec<_>>()
        .join("+")
}

/// Reverse of [`query_escape`]. Malformed `%` sequences are rejected.
pub fn query_unescape(escaped: &str) -> Result<String, SessionError> {
    let bytes = escaped.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(SessionError::InvalidToken(escaped.to_string()));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    let spaced = escaped.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| SessionError::InvalidToken(escaped.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_pass_through_unchanged() {
        let id = "0b6f4e0e-5d4c-4c45-a1a2-3c1f0e9d8b7a";
        assert_eq!(query_escape(id), id);
        assert_eq!(query_unescape(id).unwrap(), id);
    }

    #[test]
    fn reserved_characters_are_escaped() {
        assert_eq!(query_escape("a b/c=d"), "a+b%2Fc%3Dd");
        assert_eq!(query_unescape("a+b%2Fc%3Dd").unwrap(), "a b/c=d");
    }

    #[test]
    fn malformed_escapes_are_rejected() {
        assert!(matches!(query_unescape("abc%2"), Err(SessionError::InvalidToken(_))));
        assert!(matches!(query_unescape("%zz"), Err(SessionError::InvalidToken(_))));
        assert!(matches!(query_unescape("%ff"), Err(SessionError::InvalidToken(_))));
    }
}
