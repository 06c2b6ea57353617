//! Bounded-buffer JSON message codec.
//!
//! A [`JsonMessage`] always holds a syntactically closed `{...}` object
//! whose keys are single ASCII characters, capped at [`BUF_CAP`] bytes.
//! Parsing is hand-rolled rather than going through `serde_json`: the wire
//! schema is fixed (single-char keys, digit-or-quoted-string values, a
//! trailing checksum) and a generic JSON parser would both cost more than
//! this format needs and hide the truncation/corruption detection the
//! protocol depends on (`get_uint` rejecting a value with no `,`/`}`
//! terminator is how a corrupted buffer is told apart from a clean one).

use crate::codes::{Broadcast, MessageKind, TalkerMatch, ValueType};

/// Default capacity of a message buffer, in bytes.
pub const BUF_CAP: usize = 128;
/// Max length of a name-class field (`f`, `t`-as-name, `a`-as-name, ...).
pub const NAME_LEN: usize = 15;
/// Max length of a free-form string field.
pub const FREE_STR_LEN: usize = 63;
/// Combined name+description budget for one manifesto action.
pub const ACTION_BUDGET: usize = 40;
/// Max length of a manifesto class description.
pub const MANIFESTO_DESC_BUDGET: usize = 42;

const MIN_VALID_LEN: usize = 19; // {"m":0,"b":0,"i":0}

/// A single JSON object living in a bounded, ASCII-only buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonMessage {
    buf: String,
}

impl Default for JsonMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonMessage {
    /// The empty message `{}`.
    pub fn new() -> Self {
        JsonMessage {
            buf: "{}".to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() <= 2
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    // -----------------------------------------------------------------
    // Field location
    // -----------------------------------------------------------------

    /// Byte offset of the key character itself (the `X` in `"X":`), if present.
    fn key_byte_index(&self, key: char) -> Option<usize> {
        let bytes = self.buf.as_bytes();
        let key_byte = key as u8;
        if bytes.len() < 4 {
            return None;
        }
        let mut i = 1;
        while i + 3 <= bytes.len() - 1 {
            if bytes[i] == b'"' && bytes[i + 1] == key_byte && bytes[i + 2] == b'"' && bytes[i + 3] == b':' {
                return Some(i + 1);
            }
            i += 1;
        }
        None
    }

    /// Byte offset right after the colon, where the value begins.
    fn value_start(&self, key: char) -> Option<usize> {
        self.key_byte_index(key).map(|k| k + 3)
    }

    /// Exclusive end offset of the value starting at `value_start`, and its [`ValueType`].
    fn scan_value(&self, value_start: usize) -> (ValueType, usize) {
        let bytes = self.buf.as_bytes();
        if value_start >= bytes.len() {
            return (ValueType::Void, value_start);
        }
        if bytes[value_start] == b'"' {
            let mut i = value_start + 1;
            while i < bytes.len() && bytes[i] != b'"' {
                i += 1;
            }
            if i == bytes.len() {
                return (ValueType::Void, i);
            }
            (ValueType::String, i + 1)
        } else {
            let mut i = value_start;
            let mut other = false;
            while i < bytes.len() && bytes[i] != b',' && bytes[i] != b'}' {
                if !bytes[i].is_ascii_digit() {
                    other = true;
                }
                i += 1;
            }
            if i == bytes.len() {
                return (ValueType::Void, i);
            }
            if other || i == value_start {
                (ValueType::Other, i)
            } else {
                (ValueType::Int, i)
            }
        }
    }

    /// Whole-field byte span including a heading or trailing comma, for removal.
    fn field_span(&self, key: char) -> Option<std::ops::Range<usize>> {
        let key_pos = self.key_byte_index(key)?;
        let field_start = key_pos - 1; // the opening '"'
        let value_start = key_pos + 3;
        let (_, value_end) = self.scan_value(value_start);
        let bytes = self.buf.as_bytes();
        let mut start = field_start;
        let mut end = value_end;
        if start > 0 && bytes[start - 1] == b',' {
            start -= 1;
        } else if end < bytes.len() && bytes[end] == b',' {
            end += 1;
        }
        Some(start..end)
    }

    // -----------------------------------------------------------------
    // Readers
    // -----------------------------------------------------------------

    pub fn has(&self, key: char) -> bool {
        self.key_byte_index(key).is_some()
    }

    pub fn value_type(&self, key: char) -> ValueType {
        match self.value_start(key) {
            Some(vs) => self.scan_value(vs).0,
            None => ValueType::Void,
        }
    }

    fn is_valid_name_char(c: u8, position: usize) -> bool {
        let c = c as char;
        if position == 0 {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        }
    }

    /// Reads a string value, enforcing the name charset when `cap == NAME_LEN`.
    pub fn get_string(&self, key: char, cap: usize) -> Option<String> {
        let value_start = self.value_start(key)?;
        let bytes = self.buf.as_bytes();
        if bytes.get(value_start) != Some(&b'"') {
            return None;
        }
        let mut out = String::new();
        let mut i = value_start + 1;
        let mut pos = 0usize;
        loop {
            let b = *bytes.get(i)?;
            if b == b'"' {
                return Some(out);
            }
            if pos >= cap {
                return None;
            }
            if cap == NAME_LEN && !Self::is_valid_name_char(b, pos) {
                return None;
            }
            out.push(b as char);
            pos += 1;
            i += 1;
        }
    }

    /// Reads an unsigned integer, requiring a `,`/`}` terminator (detects truncation).
    pub fn get_uint(&self, key: char) -> Option<u32> {
        let value_start = self.value_start(key)?;
        let bytes = self.buf.as_bytes();
        let mut i = value_start;
        let mut n: u64 = 0;
        let mut digits = 0;
        while let Some(&b) = bytes.get(i) {
            if !b.is_ascii_digit() {
                break;
            }
            n = n * 10 + (b - b'0') as u64;
            digits += 1;
            if digits > 10 || n > u32::MAX as u64 {
                return None;
            }
            i += 1;
        }
        if digits == 0 {
            return None;
        }
        match bytes.get(i) {
            Some(b',') | Some(b'}') => Some(n as u32),
            _ => None,
        }
    }

    // -----------------------------------------------------------------
    // Writers
    // -----------------------------------------------------------------

    /// Removes `key` (and one adjacent comma) if present.
    pub fn remove(&mut self, key: char) -> bool {
        if let Some(span) = self.field_span(key) {
            self.buf.replace_range(span, "");
            true
        } else {
            false
        }
    }

    fn append_raw(&mut self, key: char, value: &str) -> bool {
        self.remove(key);
        let needs_comma = self.buf.len() > 2;
        let addition = if needs_comma {
            format!(",\"{key}\":{value}")
        } else {
            format!("\"{key}\":{value}")
        };
        if self.buf.len() + addition.len() > BUF_CAP {
            return false;
        }
        let insert_at = self.buf.len() - 1; // just before the closing '}'
        self.buf.insert_str(insert_at, &addition);
        true
    }

    pub fn set_uint(&mut self, key: char, n: u32) -> bool {
        self.append_raw(key, &n.to_string())
    }

    /// Sets a string value. For `cap == NAME_LEN` enforces the name charset
    /// and that the first char is not a digit.
    pub fn set_string(&mut self, key: char, s: &str, cap: usize) -> bool {
        if s.len() > cap {
            return false;
        }
        if cap == NAME_LEN {
            for (i, c) in s.bytes().enumerate() {
                if !Self::is_valid_name_char(c, i) {
                    return false;
                }
            }
        } else if !s.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
            return false;
        }
        let quoted = format!("\"{s}\"");
        self.append_raw(key, &quoted)
    }

    /// Single-character key rename, byte-exact (no structural change).
    pub fn replace_key(&mut self, old: char, new: char) -> bool {
        match self.key_byte_index(old) {
            Some(pos) => {
                // SAFETY: both are single ASCII bytes at a known offset.
                unsafe {
                    self.buf.as_bytes_mut()[pos] = new as u8;
                }
                true
            }
            None => false,
        }
    }

    /// Renames `t`→`f`, and if `f` already existed, renames it `t` (a true swap).
    pub fn swap_to_with_from(&mut self) {
        if let Some(to_pos) = self.key_byte_index('t') {
            let from_pos = self.key_byte_index('f');
            unsafe {
                self.buf.as_bytes_mut()[to_pos] = b'f';
            }
            if let Some(from_pos) = from_pos {
                unsafe {
                    self.buf.as_bytes_mut()[from_pos] = b't';
                }
            }
        }
    }

    /// Renames `f`→`t`, and if `t` already existed, renames it `f` (a true swap).
    pub fn swap_from_with_to(&mut self) {
        if let Some(from_pos) = self.key_byte_index('f') {
            let to_pos = self.key_byte_index('t');
            unsafe {
                self.buf.as_bytes_mut()[from_pos] = b't';
            }
            if let Some(to_pos) = to_pos {
                unsafe {
                    self.buf.as_bytes_mut()[to_pos] = b'f';
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------

    pub fn serialize(&self) -> &str {
        &self.buf
    }

    /// Bounds-checks only; no structural validation (callers run
    /// [`JsonMessage::validate_json`] at the socket ingress boundary).
    pub fn deserialize(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > BUF_CAP || bytes.is_empty() {
            return None;
        }
        let s = std::str::from_utf8(bytes).ok()?;
        Some(JsonMessage { buf: s.to_string() })
    }

    /// Trims trailing junk that isn't `}` (respecting a backslash-escaped
    /// `}`), then rejects buffers shorter than 19 bytes or not starting
    /// with `{`.
    pub fn validate_json(&mut self) -> bool {
        let bytes = self.buf.as_bytes();
        let mut end = bytes.len();
        while end > MIN_VALID_LEN {
            let last = bytes[end - 1];
            let escaped = end >= 2 && bytes[end - 2] == b'\\';
            if last == b'}' && !escaped {
                break;
            }
            end -= 1;
        }
        self.buf.truncate(end);
        if self.buf.len() < MIN_VALID_LEN {
            self.buf = "{}".to_string();
            return false;
        }
        if !self.buf.starts_with('{') {
            self.buf = "{}".to_string();
            return false;
        }
        true
    }

    /// XOR-fold of successive big-endian 16-bit words over the current
    /// buffer. An odd trailing byte is treated as `(byte << 8)`.
    pub fn generate_checksum(&self) -> u16 {
        let bytes = self.buf.as_bytes();
        let mut checksum: u16 = 0;
        let mut i = 0;
        while i < bytes.len() {
            let hi = bytes[i] as u16;
            let lo = if i + 1 < bytes.len() { bytes[i + 1] as u16 } else { 0 };
            checksum ^= (hi << 8) | lo;
            i += 2;
        }
        checksum
    }

    /// Reads `c` without removing it.
    pub fn get_checksum(&self) -> Option<u16> {
        self.get_uint('c').map(|v| v as u16)
    }

    /// Removes `c` if present, returning its value when it parsed cleanly.
    pub fn remove_checksum(&mut self) -> Option<u16> {
        let value = self.get_uint('c').map(|v| v as u16);
        self.remove('c');
        value
    }

    /// Removes `c`, recomputes the checksum over what remains, and compares.
    pub fn validate_checksum(&mut self) -> bool {
        match self.remove_checksum() {
            Some(received) => self.generate_checksum() == received,
            None => false,
        }
    }

    /// Removes any prior `c`, computes the checksum, appends `c` last.
    pub fn insert_checksum(&mut self) -> bool {
        self.remove('c');
        let checksum = self.generate_checksum();
        self.set_uint('c', checksum as u32)
    }

    /// Best-effort repair of corrupted `"k":` delimiters, assuming
    /// single-char keys. Used only as a last resort. Returns true if any
    /// repair was made.
    pub fn try_to_reconstruct(&mut self) -> bool {
        // SAFETY: every write stays within the existing byte length and
        // only ever replaces ASCII punctuation/quote bytes.
        let bytes = unsafe { self.buf.as_bytes_mut() };
        if bytes.len() < 6 {
            return false;
        }
        let mut repaired = false;
        bytes[0] = b'{';
        bytes[1] = b'"';
        bytes[3] = b'"';
        bytes[4] = b':';
        let len = bytes.len();
        let mut json_i = 6;
        while json_i < len {
            if json_i + 4 < len
                && bytes[json_i] == b','
                && bytes[json_i + 1] == b'"'
                && bytes[json_i + 3] == b'"'
            {
                bytes[json_i + 4] = b':';
                repaired = true;
            }
            if json_i + 1 < len
                && bytes[json_i] == b':'
                && (bytes[json_i - 1] == b'"'
                    || bytes[json_i + 1] == b'"'
                    || bytes[json_i + 1].is_ascii_digit())
            {
                if json_i >= 4 {
                    bytes[json_i - 4] = b',';
                }
                if json_i >= 3 {
                    bytes[json_i - 3] = b'"';
                }
                bytes[json_i - 1] = b'"';
                repaired = true;
            }
            json_i += 1;
        }
        bytes[len - 1] = b'}';
        repaired
    }

    // -----------------------------------------------------------------
    // Canonical field accessors
    // -----------------------------------------------------------------

    pub fn message_kind(&self) -> MessageKind {
        self.get_uint('m')
            .and_then(|v| MessageKind::from_u8(v as u8))
            .unwrap_or(MessageKind::Noise)
    }

    pub fn set_message_kind(&mut self, kind: MessageKind) -> bool {
        self.set_uint('m', kind as u32)
    }

    pub fn broadcast(&self) -> Option<Broadcast> {
        self.get_uint('b').and_then(|v| Broadcast::from_u8(v as u8))
    }

    pub fn set_broadcast(&mut self, b: Broadcast) -> bool {
        self.set_uint('b', b as u32)
    }

    pub fn identity(&self) -> Option<u16> {
        self.get_uint('i').map(|v| v as u16)
    }

    pub fn set_identity(&mut self, id: u16) -> bool {
        self.set_uint('i', id as u32)
    }

    pub fn from_name(&self) -> Option<String> {
        self.get_string('f', NAME_LEN)
    }

    pub fn set_from_name(&mut self, name: &str) -> bool {
        self.set_string('f', name, NAME_LEN)
    }

    pub fn to_name(&self) -> Option<String> {
        self.get_string('t', NAME_LEN)
    }

    pub fn to_channel(&self) -> Option<u8> {
        self.get_uint('t').map(|v| v as u8)
    }

    pub fn set_to_name(&mut self, name: &str) -> bool {
        self.set_string('t', name, NAME_LEN)
    }

    /// Positional payload fields `0`..`9` are addressed by digit char.
    fn nth_key(n: u8) -> char {
        (b'0' + n) as char
    }

    pub fn has_nth_value(&self, n: u8) -> bool {
        self.has(Self::nth_key(n))
    }

    /// Drops every positional field `0`..`9`, used before rebuilding a
    /// payload for the next entry of a many-to-one transmission loop
    /// (List enumeration, System socket iteration).
    pub fn remove_all_nth_values(&mut self) {
        for n in 0..10 {
            self.remove(Self::nth_key(n));
        }
    }

    pub fn is_no_reply(&self) -> bool {
        self.has('n')
    }

    pub fn set_no_reply(&mut self) -> bool {
        self.set_uint('n', 1)
    }

    /// Interprets `t` to determine how this message selects a destination
    /// Talker. Kinds strictly stricter than `Talk`/`Channel`/`Ping` may not
    /// be addressed to `Any` (prevents all-hands side effects).
    pub fn get_talker_match(&self) -> TalkerMatch {
        if self.to_name().is_some() {
            return TalkerMatch::ByName;
        }
        if self.value_type('t') == ValueType::Int {
            return TalkerMatch::ByChannel;
        }
        if self.has('t') {
            return TalkerMatch::Fail;
        }
        let kind = self.message_kind();
        let has_payload_zero = self.has('0');
        // A Talk/Channel/Ping carrying a positional `0` with no `t` is
        // rejected too — otherwise a channel-less Channel write would
        // land on every talker at once.
        if (kind as u8 > MessageKind::Ping as u8 || has_payload_zero) && kind != MessageKind::Error {
            return TalkerMatch::Fail;
        }
        TalkerMatch::Any
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::Broadcast;

    #[test]
    fn empty_message_round_trips() {
        let msg = JsonMessage::new();
        assert_eq!(msg.as_str(), "{}");
        assert!(!msg.has('m'));
    }

    #[test]
    fn set_then_get_roundtrip() {
        let mut msg = JsonMessage::new();
        assert!(msg.set_uint('m', 4));
        assert!(msg.set_string('f', "alice", NAME_LEN));
        assert_eq!(msg.get_uint('m'), Some(4));
        assert_eq!(msg.get_string('f', NAME_LEN), Some("alice".to_string()));
    }

    #[test]
    fn remove_then_has_is_false_and_shrinks() {
        let mut msg = JsonMessage::new();
        msg.set_uint('m', 4);
        let before = msg.len();
        assert!(msg.remove('m'));
        assert!(!msg.has('m'));
        assert!(msg.len() < before);
    }

    #[test]
    fn replace_key_mm_round_trip_is_identity() {
        let mut msg = JsonMessage::new();
        msg.set_uint('m', 4);
        let original = msg.as_str().to_string();
        assert!(msg.replace_key('m', 'M'));
        assert!(msg.replace_key('M', 'm'));
        assert_eq!(msg.as_str(), original);
    }

    #[test]
    fn name_charset_violation_rejected_without_mutation() {
        let mut msg = JsonMessage::new();
        let before = msg.as_str().to_string();
        assert!(!msg.set_string('f', "1bad", NAME_LEN));
        assert_eq!(msg.as_str(), before);
    }

    #[test]
    fn truncated_uint_is_rejected() {
        // Manually craft a buffer whose 'i' value has no terminator (corruption).
        let msg = JsonMessage::deserialize(br#"{"m":4,"i":12"#).unwrap();
        assert_eq!(msg.get_uint('i'), None);
    }

    #[test]
    fn insert_and_validate_checksum_round_trip() {
        let mut msg = JsonMessage::new();
        msg.set_uint('m', 4);
        msg.set_uint('i', 200);
        assert!(msg.insert_checksum());
        assert!(msg.validate_checksum());
    }

    #[test]
    fn single_bit_flip_changes_checksum() {
        let mut msg = JsonMessage::new();
        msg.set_uint('m', 4);
        msg.set_uint('i', 200);
        let original = msg.generate_checksum();
        let mut bytes = msg.as_str().as_bytes().to_vec();
        // Flip a bit inside the 'i' value's digits, not inside a future 'c' field.
        let idx = bytes.iter().position(|&b| b == b'2').unwrap();
        bytes[idx] ^= 0x01;
        let flipped = JsonMessage::deserialize(&bytes).unwrap();
        assert_ne!(flipped.generate_checksum(), original);
    }

    #[test]
    fn swap_from_with_to_true_swap() {
        let mut msg = JsonMessage::new();
        msg.set_string('f', "alice", NAME_LEN);
        msg.set_string('t', "bob", NAME_LEN);
        msg.swap_from_with_to();
        assert_eq!(msg.get_string('t', NAME_LEN), Some("alice".to_string()));
        assert_eq!(msg.get_string('f', NAME_LEN), Some("bob".to_string()));
    }

    #[test]
    fn talker_match_any_for_ping() {
        let mut msg = JsonMessage::new();
        msg.set_message_kind(MessageKind::Ping);
        msg.set_broadcast(Broadcast::Local);
        assert_eq!(msg.get_talker_match(), TalkerMatch::Any);
    }

    #[test]
    fn talker_match_fail_for_call_with_no_target() {
        let mut msg = JsonMessage::new();
        msg.set_message_kind(MessageKind::Call);
        msg.set_broadcast(Broadcast::Local);
        assert_eq!(msg.get_talker_match(), TalkerMatch::Fail);
    }

    #[test]
    fn talker_match_by_channel() {
        let mut msg = JsonMessage::new();
        msg.set_message_kind(MessageKind::Call);
        msg.set_uint('t', 7);
        assert_eq!(msg.get_talker_match(), TalkerMatch::ByChannel);
    }
}
