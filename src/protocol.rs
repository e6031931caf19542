//! The fixed request/response command set and strict pairing discipline.
//!
//! All exchanges are host-initiated: the host sends exactly one request
//! frame and reads exactly one response frame before issuing anything else.
//! On a serial transport this pairing is also what keeps the half-duplex
//! line direction correct.

use crate::error::BridgeError;
use crate::framer;
use crate::transport::{Direction, Transport};

/// Probe the remote's identity; expects a banner in response.
pub const GET_CAPS: [u8; 2] = [0x00, 0x00];
/// Poll the remote for pending keystrokes.
pub const GET_KEYS: [u8; 2] = [0x01, 0x01];
/// Deliver a chunk of shell output to the remote.
pub const SEND_PTY: [u8; 2] = [0x02, 0x02];
/// Tell the remote to reset its state; no response is read.
pub const SIG_INT: [u8; 2] = [0x03, 0x03];

/// Wraps a [`Transport`] with the host-initiated request/response protocol.
pub struct Protocol<T: Transport> {
    pub(crate) transport: T,
}

impl<T: Transport> Protocol<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Send one SLIP-framed request. Pays the half-duplex turnaround
    /// penalty (on serial transports) before transmitting.
    fn send_packet(&mut self, payload: &[u8]) -> Result<(), BridgeError> {
        log::debug!(">>> {payload:02x?}");
        self.transport.on_direction_change(Direction::Out);
        let framed = framer::encode(payload);
        self.transport.send(&framed)
    }

    /// Read one SLIP-framed response. Pays the half-duplex turnaround
    /// penalty (on serial transports) before receiving.
    fn recv_packet(&mut self) -> Result<Vec<u8>, BridgeError> {
        self.transport.on_direction_change(Direction::In);
        let frame = framer::decode(&mut self.transport)?;
        log::debug!("<<< {frame:02x?}");
        Ok(frame)
    }

    /// Probe the remote and return its decoded, NUL-trimmed banner.
    pub fn get_caps(&mut self) -> Result<String, BridgeError> {
        self.send_packet(&GET_CAPS)?;
        let response = self.recv_packet()?;
        let banner = response.strip_prefix(&GET_CAPS[..]).unwrap_or(&response);
        let trimmed = banner
            .iter()
            .copied()
            .take_while(|&b| b != 0)
            .collect::<Vec<u8>>();
        Ok(String::from_utf8_lossy(&trimmed).trim().to_string())
    }

    /// Poll for pending keystrokes. A response whose tag isn't `GET_KEYS`
    /// is not an error — it degrades to an empty batch.
    pub fn get_keys(&mut self) -> Result<Vec<u8>, BridgeError> {
        self.send_packet(&GET_KEYS)?;
        let response = self.recv_packet()?;
        match response.strip_prefix(&GET_KEYS[..]) {
            Some(keys) => Ok(keys.to_vec()),
            None => {
                log::debug!("GET_KEYS response had an unexpected tag, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    /// Deliver up to `BUFSIZE` bytes of shell output. The response is read
    /// purely as an ack / turnaround marker; its tag is not inspected
    /// (permissive, for wire compatibility) but is logged at debug level.
    pub fn send_pty(&mut self, data: &[u8]) -> Result<(), BridgeError> {
        let mut payload = Vec::with_capacity(SEND_PTY.len() + data.len());
        payload.extend_from_slice(&SEND_PTY);
        payload.extend_from_slice(data);
        self.send_packet(&payload)?;
        let response = self.recv_packet()?;
        if !response.starts_with(&SEND_PTY[..]) {
            log::debug!("SEND_PTY ack carried an unexpected tag: {response:02x?}");
        }
        Ok(())
    }

    /// Tell the remote to reset. No response is expected; the connection
    /// is already being torn down.
    pub fn sig_int(&mut self) -> Result<(), BridgeError> {
        self.send_packet(&SIG_INT)
    }
}
