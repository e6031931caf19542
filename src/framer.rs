//! SLIP (RFC 1055) framing over a [`Transport`](crate::transport::Transport).
//!
//! Byte-stuffed, delimited packet format:
//!
//! ```text
//! END data-with-END-and-ESC-escaped END
//! ```
//!
//! Frames are delimited by `END` (`0xC0`); any literal `END` or `ESC` byte
//! inside the payload is escaped with `ESC` (`0xDB`) followed by a
//! substitute byte. Leading and duplicate `END` bytes are tolerated on
//! decode so that stray idle bytes on the line don't desynchronize framing.

use crate::error::BridgeError;
use crate::transport::Transport;

/// Marks the end of a packet.
pub const END: u8 = 0xC0;
/// Escapes a literal `END` or `ESC` byte that follows.
pub const ESC: u8 = 0xDB;
/// Substitute for a literal `END` byte, following an `ESC`.
pub const ESC_END: u8 = 0xDD;
/// Substitute for a literal `ESC` byte, following an `ESC`.
pub const ESC_ESC: u8 = 0xDE;

/// Encode a payload as one SLIP frame, including the leading and trailing `END`.
///
/// Substitution order matters: `ESC` bytes are escaped first, then `END`
/// bytes, so the `ESC` introduced to escape a literal `END` is never itself
/// re-escaped.
#[must_use]
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.push(END);
    for &byte in payload {
        match byte {
            ESC => {
                out.push(ESC);
                out.push(ESC_ESC);
            }
            END => {
                out.push(ESC);
                out.push(ESC_END);
            }
            other => out.push(other),
        }
    }
    out.push(END);
    out
}

/// Decode exactly one frame from `transport`, reading one byte at a time.
///
/// Leading and duplicate `END` bytes before any data are skipped. An
/// unescaped `END` following at least one accumulated byte terminates the
/// frame. A byte other than `ESC_ESC`/`ESC_END` following an `ESC` is
/// appended verbatim (permissive decoding, matching the remote's behavior).
///
/// A zero-length receive from the transport (peer closed) surfaces as
/// [`BridgeError::Eof`]; a receive that times out surfaces as
/// [`BridgeError::Timeout`] and propagates unchanged so the caller's
/// watchdog can decide whether to recover.
pub fn decode(transport: &mut dyn Transport) -> Result<Vec<u8>, BridgeError> {
    let mut accumulator = Vec::new();
    loop {
        let byte = recv_one(transport)?;
        match byte {
            END => {
                if !accumulator.is_empty() {
                    return Ok(accumulator);
                }
            }
            ESC => {
                let escaped = recv_one(transport)?;
                match escaped {
                    ESC_ESC => accumulator.push(ESC),
                    ESC_END => accumulator.push(END),
                    other => accumulator.push(other),
                }
            }
            other => accumulator.push(other),
        }
    }
}

fn recv_one(transport: &mut dyn Transport) -> Result<u8, BridgeError> {
    let bytes = transport.recv(1)?;
    bytes.first().copied().ok_or(BridgeError::Eof)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_empty_payload() {
        assert_eq!(encode(&[]), vec![END, END]);
    }

    #[test]
    fn encodes_literal_end() {
        assert_eq!(encode(&[END]), vec![END, ESC, ESC_END, END]);
    }

    #[test]
    fn encodes_literal_esc() {
        assert_eq!(encode(&[ESC]), vec![END, ESC, ESC_ESC, END]);
    }

    #[test]
    fn encodes_esc_then_end_without_double_escaping() {
        // The ESC introduced to escape END must not itself be re-escaped.
        assert_eq!(encode(&[ESC, END]), vec![END, ESC, ESC_ESC, ESC, ESC_END, END]);
    }

    #[test]
    fn encode_contains_exactly_two_unescaped_ends() {
        let payload: Vec<u8> = (0u8..=255).collect();
        let framed = encode(&payload);
        assert_eq!(framed[0], END);
        assert_eq!(*framed.last().unwrap(), END);

        let mut unescaped_ends = 0;
        let mut escaped = false;
        for (i, &b) in framed.iter().enumerate() {
            if escaped {
                escaped = false;
                continue;
            }
            if b == END && i != 0 {
                unescaped_ends += 1;
            }
            if b == ESC {
                escaped = true;
            }
        }
        // The trailing END at i == framed.len() - 1 is the only unescaped
        // one besides the leading one (which we excluded with i != 0).
        assert_eq!(unescaped_ends, 1);
    }

    /// A transport backed by an in-memory byte queue, for exercising
    /// `decode` without a real socket or serial line.
    struct MockTransport {
        bytes: std::collections::VecDeque<u8>,
    }

    impl MockTransport {
        fn new(data: &[u8]) -> Self {
            Self { bytes: data.iter().copied().collect() }
        }
    }

    impl Transport for MockTransport {
        fn send(&mut self, _data: &[u8]) -> Result<(), BridgeError> {
            unreachable!("decode tests never send")
        }

        fn recv(&mut self, max: usize) -> Result<Vec<u8>, BridgeError> {
            let mut out = Vec::new();
            for _ in 0..max {
                match self.bytes.pop_front() {
                    Some(b) => out.push(b),
                    None => break,
                }
            }
            Ok(out)
        }

        fn on_direction_change(&mut self, _dir: crate::transport::Direction) {}
    }

    #[test]
    fn decodes_leading_and_duplicate_ends() {
        let mut t = MockTransport::new(&[END, END, END, b'D', END]);
        assert_eq!(decode(&mut t).unwrap(), vec![b'D']);
    }

    #[test]
    fn round_trips_arbitrary_bytes() {
        let payload: Vec<u8> = vec![0, 1, END, ESC, ESC_END, ESC_ESC, 255, END, END, ESC];
        let framed = encode(&payload);
        let mut t = MockTransport::new(&framed[1..]); // decode starts past leading END
        assert_eq!(decode(&mut t).unwrap(), payload);
    }

    #[test]
    fn escape_round_trip_matches_spec_example() {
        let payload = [END, ESC, END];
        assert_eq!(
            encode(&payload),
            vec![END, ESC, ESC_END, ESC, ESC_ESC, ESC, ESC_END, END]
        );
    }

    #[test]
    fn zero_length_recv_is_eof() {
        let mut t = MockTransport::new(&[]);
        assert!(matches!(decode(&mut t), Err(BridgeError::Eof)));
    }
}
