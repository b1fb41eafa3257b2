//! Transparent framer for instruments that dump plain bytes.
//!
//! There is no wire format: one message is one inbound burst, delimited
//! by an idle window. Bytes are buffered until no new byte arrives for
//! `flush_idle`, then the buffer is delivered as a single message. EOF
//! flushes whatever is buffered.

use crate::error::{Error, Result};
use crate::protocol::{ReceiveOutcome, SendOutcome};
use crate::stream::ByteStream;
use bytes::BytesMut;
use std::time::{Duration, SystemTime};
use tokio::time::timeout;
use tracing::trace;

/// Settings for the raw protocol.
#[derive(Debug, Clone)]
pub struct RawSettings {
    /// Idle window after which buffered bytes are delivered as one
    /// message.
    pub flush_idle: Duration,
    /// Safety cap on the receive buffer. Exceeding it reports an error
    /// and resets the buffer; the session keeps running.
    pub max_receive_bytes: usize,
}

impl Default for RawSettings {
    fn default() -> Self {
        RawSettings {
            flush_idle: Duration::from_millis(100),
            max_receive_bytes: usize::MAX,
        }
    }
}

/// Raw protocol state: a rolling receive buffer plus the arrival time of
/// its newest byte.
pub struct RawProtocol {
    settings: RawSettings,
    buf: BytesMut,
    last_byte_at: Option<SystemTime>,
    eof: bool,
}

impl RawProtocol {
    pub fn new(settings: RawSettings) -> Self {
        RawProtocol {
            settings,
            buf: BytesMut::new(),
            last_byte_at: None,
            eof: false,
        }
    }

    /// Read until the idle window elapses with data buffered, then
    /// deliver the buffer as one message.
    pub async fn receive<S: ByteStream>(&mut self, stream: &mut S) -> Result<ReceiveOutcome> {
        if self.eof {
            return Ok(ReceiveOutcome::Eof);
        }

        let mut chunk = [0u8; 4096];
        loop {
            match timeout(self.settings.flush_idle, stream.read(&mut chunk)).await {
                // idle window elapsed
                Err(_) => {
                    return if self.buf.is_empty() {
                        Ok(ReceiveOutcome::Idle)
                    } else {
                        Ok(self.flush())
                    };
                }
                Ok(Ok(0)) => {
                    self.eof = true;
                    return if self.buf.is_empty() {
                        Ok(ReceiveOutcome::Eof)
                    } else {
                        Ok(self.flush())
                    };
                }
                Ok(Ok(n)) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    self.last_byte_at = Some(SystemTime::now());
                    if self.buf.len() > self.settings.max_receive_bytes {
                        self.buf.clear();
                        return Err(Error::MessageTooLarge {
                            limit: self.settings.max_receive_bytes,
                        });
                    }
                }
                Ok(Err(e)) => return Err(Error::Receive(e)),
            }
        }
    }

    /// Write the payloads verbatim.
    pub async fn send<S: ByteStream>(
        &mut self,
        stream: &mut S,
        records: &[&[u8]],
    ) -> Result<SendOutcome> {
        let mut written = 0;
        for record in records {
            stream.write_all(record).await.map_err(Error::Send)?;
            written += record.len();
        }
        Ok(SendOutcome::Sent(written))
    }

    fn flush(&mut self) -> ReceiveOutcome {
        let payload = self.buf.split().to_vec();
        trace!(bytes = payload.len(), "raw flush");
        ReceiveOutcome::Message {
            payload,
            completed_at: self.last_byte_at.take().unwrap_or_else(SystemTime::now),
        }
    }
}
