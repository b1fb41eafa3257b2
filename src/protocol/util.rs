//! Control-byte constants, checksum arithmetic and the scripted-stream
//! test double shared by the framing protocols.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Start of text.
pub const STX: u8 = 0x02;
/// End of text.
pub const ETX: u8 = 0x03;
/// End of transmission.
pub const EOT: u8 = 0x04;
/// Enquiry: request to transmit.
pub const ENQ: u8 = 0x05;
/// Positive acknowledge.
pub const ACK: u8 = 0x06;
/// Carriage return.
pub const CR: u8 = 0x0D;
/// Line feed.
pub const LF: u8 = 0x0A;
/// Negative acknowledge.
pub const NAK: u8 = 0x15;
/// End of transmission block: frame continues in the next frame.
pub const ETB: u8 = 0x17;

/// LIS1-A1 frame checksum: the sum of frame-number digit, payload and
/// terminator bytes modulo 256, as two uppercase hex ASCII digits.
pub fn checksum(frame_number: u8, payload: &[u8], terminator: u8) -> [u8; 2] {
    let mut sum = frame_number as u32;
    for &b in payload {
        sum = sum.wrapping_add(b as u32);
    }
    sum = sum.wrapping_add(terminator as u32);
    let sum = (sum % 256) as u8;

    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    [HEX[(sum >> 4) as usize], HEX[(sum & 0x0F) as usize]]
}

enum Step {
    /// Bytes served to the protocol's reads.
    Feed(Vec<u8>),
    /// Bytes the protocol is expected to write, verbatim.
    Expect(Vec<u8>),
}

/// A duplex stream that replays one side of a wire conversation.
///
/// The script is an ordered list of feed/expect steps. Reads serve the
/// current feed step (EOF once the script is exhausted) and park while an
/// expect step is pending; writes are checked byte-for-byte against the
/// expect steps and fail the stream on any deviation.
pub struct ScriptedStream {
    steps: VecDeque<Step>,
    read_waker: Option<Waker>,
}

impl ScriptedStream {
    pub fn new() -> Self {
        ScriptedStream {
            steps: VecDeque::new(),
            read_waker: None,
        }
    }

    /// Append bytes the peer sends; subsequent reads return them.
    pub fn feed(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.steps.push_back(Step::Feed(bytes.as_ref().to_vec()));
        self
    }

    /// Append bytes the protocol under test must write next.
    pub fn expect(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.steps.push_back(Step::Expect(bytes.as_ref().to_vec()));
        self
    }

    /// True once every step has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Default for ScriptedStream {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.steps.pop_front() {
            None => Poll::Ready(Ok(())), // EOF
            Some(Step::Feed(mut bytes)) => {
                let n = bytes.len().min(buf.remaining());
                buf.put_slice(&bytes[..n]);
                if n < bytes.len() {
                    bytes.drain(..n);
                    self.steps.push_front(Step::Feed(bytes));
                }
                Poll::Ready(Ok(()))
            }
            Some(step @ Step::Expect(_)) => {
                // the protocol must write first
                self.steps.push_front(step);
                self.read_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut consumed = 0;
        while consumed < buf.len() {
            match self.steps.pop_front() {
                Some(Step::Expect(mut expected)) => {
                    let n = expected.len().min(buf.len() - consumed);
                    let incoming = &buf[consumed..consumed + n];
                    if incoming != &expected[..n] {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!(
                                "scripted stream: wrote {:02X?}, expected {:02X?}",
                                incoming,
                                &expected[..n]
                            ),
                        )));
                    }
                    consumed += n;
                    if n < expected.len() {
                        expected.drain(..n);
                        self.steps.push_front(Step::Expect(expected));
                    }
                }
                other => {
                    if let Some(step) = other {
                        self.steps.push_front(step);
                    }
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "scripted stream: unexpected write of {:02X?}",
                            &buf[consumed..]
                        ),
                    )));
                }
            }
        }
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
