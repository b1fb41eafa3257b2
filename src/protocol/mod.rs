//! Framing protocols.
//!
//! Each protocol turns a duplex byte stream into a message-oriented
//! feed: it decides when buffered bytes become one complete message,
//! which control bytes go back to the peer, and when the conversation is
//! over. Protocols are written against the [`ByteStream`] abstraction,
//! so the same state machines drive TCP sessions in production and
//! in-memory pipes in tests.
//!
//! ## Dialects
//! - `raw`: transparent, one message per burst, idle-window flush
//! - `stx_etx`: `<STX>…<ETX>` bracketed frames
//! - `lis1a1`: LIS1-A1 (ASTM E1381) handshake, checksum and retry

pub mod lis1a1;
pub mod raw;
pub mod stx_etx;
pub mod util;

pub use lis1a1::{ContentionRole, Lis1A1Protocol, Lis1A1Settings};
pub use raw::{RawProtocol, RawSettings};
pub use stx_etx::{StxEtxProtocol, StxEtxSettings};

use crate::error::{Error, Result};
use crate::stream::ByteStream;
use std::time::{Duration, SystemTime};

/// One pass of a protocol's receive loop.
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// A complete message, framing stripped. `completed_at` is the wall
    /// clock at which its final byte arrived.
    Message {
        payload: Vec<u8>,
        completed_at: SystemTime,
    },
    /// The read deadline elapsed with nothing deliverable. The caller
    /// uses this window to observe shutdown signals and flush queued
    /// sends.
    Idle,
    /// The peer closed the stream.
    Eof,
}

/// Result of a protocol send.
#[derive(Debug)]
pub enum SendOutcome {
    /// Everything went on the wire; the count covers framing bytes too.
    Sent(usize),
    /// Contention was lost: the protocol yielded the line and is now
    /// receiving. The caller re-queues the records and resumes its
    /// receive loop.
    Yielded,
}

/// Which framing protocol a transport speaks, with its settings.
///
/// Validated once at startup; each session then gets its own
/// [`Protocol`] instance via [`ProtocolConfig::create`].
#[derive(Debug, Clone)]
pub enum ProtocolConfig {
    Raw(RawSettings),
    StxEtx(StxEtxSettings),
    Lis1A1(Lis1A1Settings),
}

impl ProtocolConfig {
    /// Reject settings that cannot work before any socket is opened.
    pub fn validate(&self) -> Result<()> {
        match self {
            ProtocolConfig::Raw(s) => {
                if s.flush_idle.is_zero() {
                    return Err(Error::Configuration(
                        "raw: flush_idle must be positive".to_string(),
                    ));
                }
                if s.max_receive_bytes == 0 {
                    return Err(Error::Configuration(
                        "raw: max_receive_bytes must be positive".to_string(),
                    ));
                }
            }
            ProtocolConfig::StxEtx(s) => {
                if s.start_byte == s.end_byte {
                    return Err(Error::Configuration(
                        "stx-etx: start and end byte must differ".to_string(),
                    ));
                }
            }
            ProtocolConfig::Lis1A1(s) => {
                if s.max_frame_payload == 0 {
                    return Err(Error::Configuration(
                        "lis1a1: max_frame_payload must be positive".to_string(),
                    ));
                }
                if s.max_retries == 0 {
                    return Err(Error::Configuration(
                        "lis1a1: max_retries must be positive".to_string(),
                    ));
                }
                if s.inter_frame_timeout.is_zero() {
                    return Err(Error::Configuration(
                        "lis1a1: inter_frame_timeout must be positive".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Instantiate the protocol for one session. `read_deadline` is the
    /// cadence at which an idle session wakes to observe shutdown.
    pub fn create(&self, read_deadline: Duration) -> Protocol {
        match self {
            ProtocolConfig::Raw(s) => Protocol::Raw(RawProtocol::new(s.clone())),
            ProtocolConfig::StxEtx(s) => {
                Protocol::StxEtx(StxEtxProtocol::new(s.clone(), read_deadline))
            }
            ProtocolConfig::Lis1A1(s) => {
                Protocol::Lis1A1(Lis1A1Protocol::new(s.clone(), read_deadline))
            }
        }
    }
}

/// A per-session protocol instance.
pub enum Protocol {
    Raw(RawProtocol),
    StxEtx(StxEtxProtocol),
    Lis1A1(Lis1A1Protocol),
}

impl Protocol {
    /// Drive reads until a complete message, an idle window, or EOF.
    pub async fn receive<S: ByteStream>(&mut self, stream: &mut S) -> Result<ReceiveOutcome> {
        match self {
            Protocol::Raw(p) => p.receive(stream).await,
            Protocol::StxEtx(p) => p.receive(stream).await,
            Protocol::Lis1A1(p) => p.receive(stream).await,
        }
    }

    /// Frame and transmit records.
    pub async fn send<S: ByteStream>(
        &mut self,
        stream: &mut S,
        records: &[&[u8]],
    ) -> Result<SendOutcome> {
        match self {
            Protocol::Raw(p) => p.send(stream, records).await,
            Protocol::StxEtx(p) => p.send(stream, records).await,
            Protocol::Lis1A1(p) => p.send(stream, records).await,
        }
    }
}
