//! Framer for instruments that bracket each message in `<STX>…<ETX>`.
//!
//! Bytes outside a frame are dropped, so line noise between messages is
//! tolerated. A start byte inside a frame restarts it; an end byte
//! outside a frame is ignored. The delimiters are configurable for
//! instrument variants that bracket with other control bytes.

use crate::error::{Error, Result};
use crate::protocol::util::{ETX, STX};
use crate::protocol::{ReceiveOutcome, SendOutcome};
use crate::stream::ByteStream;
use bytes::{BufMut, BytesMut};
use std::collections::VecDeque;
use std::time::{Duration, SystemTime};
use tokio::time::timeout;
use tracing::trace;

/// Settings for the STX/ETX protocol.
#[derive(Debug, Clone)]
pub struct StxEtxSettings {
    /// Byte that opens a frame.
    pub start_byte: u8,
    /// Byte that closes a frame.
    pub end_byte: u8,
}

impl Default for StxEtxSettings {
    fn default() -> Self {
        StxEtxSettings {
            start_byte: STX,
            end_byte: ETX,
        }
    }
}

/// STX/ETX protocol state: the inside-frame flag and the frame buffer.
pub struct StxEtxProtocol {
    settings: StxEtxSettings,
    read_deadline: Duration,
    in_frame: bool,
    frame: BytesMut,
    ready: VecDeque<(Vec<u8>, SystemTime)>,
    eof: bool,
}

impl StxEtxProtocol {
    pub fn new(settings: StxEtxSettings, read_deadline: Duration) -> Self {
        StxEtxProtocol {
            settings,
            read_deadline,
            in_frame: false,
            frame: BytesMut::new(),
            ready: VecDeque::new(),
            eof: false,
        }
    }

    /// Read until a complete frame closes, then deliver its body with
    /// the delimiters stripped.
    pub async fn receive<S: ByteStream>(&mut self, stream: &mut S) -> Result<ReceiveOutcome> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some((payload, completed_at)) = self.ready.pop_front() {
                return Ok(ReceiveOutcome::Message {
                    payload,
                    completed_at,
                });
            }
            if self.eof {
                return Ok(ReceiveOutcome::Eof);
            }

            match timeout(self.read_deadline, stream.read(&mut chunk)).await {
                Err(_) => return Ok(ReceiveOutcome::Idle),
                Ok(Ok(0)) => {
                    // a partial frame dies with the stream
                    self.eof = true;
                    self.in_frame = false;
                    self.frame.clear();
                }
                Ok(Ok(n)) => self.scan(&chunk[..n]),
                Ok(Err(e)) => return Err(Error::Receive(e)),
            }
        }
    }

    /// Bracket each record in the configured delimiters and write it.
    pub async fn send<S: ByteStream>(
        &mut self,
        stream: &mut S,
        records: &[&[u8]],
    ) -> Result<SendOutcome> {
        let mut written = 0;
        let mut out = BytesMut::new();
        for record in records {
            out.clear();
            out.put_u8(self.settings.start_byte);
            out.extend_from_slice(record);
            out.put_u8(self.settings.end_byte);
            stream.write_all(&out).await.map_err(Error::Send)?;
            written += out.len();
        }
        Ok(SendOutcome::Sent(written))
    }

    fn scan(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if byte == self.settings.start_byte {
                // restart, tolerating junk before and inside frames
                self.in_frame = true;
                self.frame.clear();
            } else if byte == self.settings.end_byte {
                if self.in_frame {
                    let payload = self.frame.split().to_vec();
                    trace!(bytes = payload.len(), "frame closed");
                    self.ready.push_back((payload, SystemTime::now()));
                    self.in_frame = false;
                }
                // end byte outside a frame is dropped
            } else if self.in_frame {
                self.frame.put_u8(byte);
            }
            // bytes outside a frame are dropped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stx_etx() -> StxEtxProtocol {
        StxEtxProtocol::new(StxEtxSettings::default(), Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_frame_body_is_delivered_without_delimiters() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let mut protocol = stx_etx();

        ByteStream::write_all(&mut client, b"\x02Submitting data test\x03")
            .await
            .unwrap();

        match protocol.receive(&mut server).await.unwrap() {
            ReceiveOutcome::Message { payload, .. } => {
                assert_eq!(payload, b"Submitting data test")
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_junk_outside_frames_is_dropped() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let mut protocol = stx_etx();

        ByteStream::write_all(&mut client, b"noise\x03more\x02kept\x03trailing")
            .await
            .unwrap();

        match protocol.receive(&mut server).await.unwrap() {
            ReceiveOutcome::Message { payload, .. } => assert_eq!(payload, b"kept"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(matches!(
            protocol.receive(&mut server).await.unwrap(),
            ReceiveOutcome::Idle
        ));
    }

    #[tokio::test]
    async fn test_start_byte_inside_frame_restarts_it() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let mut protocol = stx_etx();

        ByteStream::write_all(&mut client, b"\x02discarded\x02kept\x03")
            .await
            .unwrap();

        match protocol.receive(&mut server).await.unwrap() {
            ReceiveOutcome::Message { payload, .. } => assert_eq!(payload, b"kept"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_two_frames_in_one_burst_stay_separate() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let mut protocol = stx_etx();

        ByteStream::write_all(&mut client, b"\x02one\x03\x02two\x03")
            .await
            .unwrap();

        let first = match protocol.receive(&mut server).await.unwrap() {
            ReceiveOutcome::Message { payload, .. } => payload,
            other => panic!("unexpected outcome: {:?}", other),
        };
        let second = match protocol.receive(&mut server).await.unwrap() {
            ReceiveOutcome::Message { payload, .. } => payload,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(first, b"one");
        assert_eq!(second, b"two");
    }

    #[tokio::test]
    async fn test_send_brackets_each_record() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let mut protocol = stx_etx();

        let outcome = protocol.send(&mut server, &[b"XXXXXXXX"]).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Sent(10)));

        let mut buf = [0u8; 32];
        let n = ByteStream::read(&mut client, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"\x02XXXXXXXX\x03");
    }

    #[tokio::test]
    async fn test_custom_delimiters() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let settings = StxEtxSettings {
            start_byte: b'[',
            end_byte: b']',
        };
        let mut protocol = StxEtxProtocol::new(settings, Duration::from_millis(20));

        ByteStream::write_all(&mut client, b"[variant]").await.unwrap();

        match protocol.receive(&mut server).await.unwrap() {
            ReceiveOutcome::Message { payload, .. } => assert_eq!(payload, b"variant"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
