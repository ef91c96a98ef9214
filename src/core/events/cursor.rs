//! Resumption cursors for the event log.
//!
//! A cursor is the pair (creation milliseconds, row sequence). The sequence
//! comes from the store's autoincrement rowid, so two events can never share
//! a cursor and cursor order matches append order within a tenant.

use chrono::DateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor {
    pub ms: i64,
    pub seq: i64,
}

#[derive(Debug, PartialEq, Eq)]
pub struct CursorError(pub String);

impl std::fmt::Display for CursorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid cursor: {}", self.0)
    }
}

impl std::error::Error for CursorError {}

impl Cursor {
    pub fn new(ms: i64, seq: i64) -> Self {
        Self { ms, seq }
    }

    /// Opaque token handed to clients. Clients echo it back verbatim.
    pub fn encode(self) -> String {
        format!("{}-{}", self.ms, self.seq)
    }

    /// Parse a client-supplied token. Accepts either an encoded cursor or,
    /// for older clients, a bare RFC3339 timestamp (mapped to sequence 0 so
    /// resumption never skips events sharing that millisecond).
    pub fn decode(token: &str) -> Result<Self, CursorError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(CursorError("empty token".to_string()));
        }

        if let Some((ms, seq)) = token.split_once('-')
            && let (Ok(ms), Ok(seq)) = (ms.parse::<i64>(), seq.parse::<i64>())
        {
            return Ok(Cursor::new(ms, seq));
        }

        if let Ok(ts) = DateTime::parse_from_rfc3339(token) {
            return Ok(Cursor::new(ts.timestamp_millis(), 0));
        }

        Err(CursorError(format!("unparseable token '{token}'")))
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let cursor = Cursor::new(1_755_900_000_123, 42);
        assert_eq!(Cursor::decode(&cursor.encode()), Ok(cursor));
    }

    #[test]
    fn rfc3339_timestamps_are_accepted_as_starting_points() {
        let cursor = Cursor::decode("2026-08-23T10:15:30Z").expect("timestamp accepted");
        assert_eq!(cursor.seq, 0);
        assert_eq!(
            cursor.ms,
            DateTime::parse_from_rfc3339("2026-08-23T10:15:30Z")
                .unwrap()
                .timestamp_millis()
        );
    }

    #[test]
    fn garbage_tokens_are_rejected_not_defaulted() {
        assert!(Cursor::decode("not-a-cursor").is_err());
        assert!(Cursor::decode("").is_err());
        assert!(Cursor::decode("12a-7").is_err());
    }

    #[test]
    fn cursor_order_is_ms_then_seq() {
        let a = Cursor::new(10, 5);
        let b = Cursor::new(10, 6);
        let c = Cursor::new(11, 0);
        assert!(a < b);
        assert!(b < c);
    }
}
