//! Wire-Level Protocol Rules
//!
//! The diagnostic device terminates every response with an ASCII `>`
//! prompt; there is no length prefix and no checksum. All three backends
//! honor this framing identically so they stay interchangeable.

/// Byte the device appends to signal the end of a response.
pub const RESPONSE_TERMINATOR: u8 = b'>';

/// A response is complete when the last accumulated byte is the
/// terminator prompt.
pub fn is_response_complete(buffer: &[u8]) -> bool {
    buffer.last() == Some(&RESPONSE_TERMINATOR)
}

/// Split a payload into ordered chunks of at most `max_chunk` bytes.
///
/// Used for MTU-bounded BLE writes; concatenating the chunks in order
/// yields exactly the input payload.
pub fn chunk_payload(payload: &[u8], max_chunk: usize) -> Vec<&[u8]> {
    if payload.is_empty() {
        return Vec::new();
    }
    payload.chunks(max_chunk.max(1)).collect()
}

/// Best-effort decode of a response into a trimmed string.
///
/// Empty or non-UTF-8 payloads degrade to `None` ("no data") rather than
/// an error.
pub fn decode_response(bytes: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_response_complete_only_on_trailing_prompt() {
        assert!(!is_response_complete(b""));
        assert!(!is_response_complete(b"41 0C 1A"));
        assert!(!is_response_complete(b"41 0C>1A"));
        assert!(is_response_complete(b"41 0C 1A>"));
        assert!(is_response_complete(b">"));
    }

    #[test]
    fn test_chunk_sizes_for_large_payload() {
        let payload = vec![0xAB; 500];
        let chunks = chunk_payload(&payload, 180);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![180, 180, 140]);
    }

    #[test]
    fn test_chunk_empty_payload() {
        assert!(chunk_payload(&[], 20).is_empty());
    }

    #[test]
    fn test_chunk_fits_in_single_write() {
        let payload = b"0100";
        let chunks = chunk_payload(payload, 20);
        assert_eq!(chunks, vec![&payload[..]]);
    }

    #[test]
    fn test_decode_trims_and_degrades() {
        assert_eq!(decode_response(b"  41 00 BE\r\n"), Some("41 00 BE".into()));
        assert_eq!(decode_response(b""), None);
        assert_eq!(decode_response(b"   \r\n"), None);
        assert_eq!(decode_response(&[0xFF, 0xFE]), None);
    }

    proptest! {
        #[test]
        fn chunk_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..2048), max in 1usize..512) {
            let chunks = chunk_payload(&payload, max);
            let rebuilt: Vec<u8> = chunks.concat();
            prop_assert_eq!(rebuilt, payload.clone());
            for chunk in chunks {
                prop_assert!(chunk.len() <= max);
                prop_assert!(!chunk.is_empty());
            }
        }
    }
}
