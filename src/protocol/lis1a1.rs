//! LIS1-A1 (ASTM E1381 lower-layer) framing protocol.
//!
//! The interactive dialect spoken by most clinical analysers: a sender
//! opens with `<ENQ>`, transfers numbered `<STX>…<ETX|ETB>` frames each
//! carrying a two-hex-digit checksum and `<CR><LF>`, and closes with
//! `<EOT>`. The receiver answers every step with `<ACK>` or `<NAK>`.
//!
//! Both directions live in one state machine so a single instance can
//! hold a session: the receiver path assembles multi-frame messages and
//! the sender path drives handshake, retry and contention handling.
//! A single bad checksum or NAK is recovered in place and never
//! surfaced; exhausted retry budgets are.

use crate::error::{Error, Result};
use crate::protocol::util::{checksum, ACK, CR, ENQ, EOT, ETB, ETX, LF, NAK, STX};
use crate::protocol::{ReceiveOutcome, SendOutcome};
use crate::stream::ByteStream;
use bytes::{BufMut, BytesMut};
use std::collections::VecDeque;
use std::io;
use std::time::{Duration, SystemTime};
use tokio::time::{sleep, timeout};
use tracing::{debug, trace};

/// Who backs off when both sides raise `<ENQ>` at once.
///
/// The subordinate (`Low`) side yields the line and receives; the
/// dominant (`High`) side retries after a backoff interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentionRole {
    High,
    Low,
}

/// Settings for the LIS1-A1 protocol.
#[derive(Debug, Clone)]
pub struct Lis1A1Settings {
    /// Longest ASCII payload per frame; longer records are split across
    /// `<ETB>` frames.
    pub max_frame_payload: usize,
    /// When set, the receiver enforces the monotone frame-number wrap
    /// (1..7, 0, 1..). The sender always numbers its frames.
    pub frame_number_check: bool,
    /// Contention role of this side.
    pub contention_role: ContentionRole,
    /// How long to wait for the peer's next byte mid-conversation.
    pub inter_frame_timeout: Duration,
    /// Pause before re-raising `<ENQ>` after the peer NAKed it.
    pub nak_backoff: Duration,
    /// Pause before the dominant side re-raises `<ENQ>` after losing a
    /// contention round.
    pub contention_backoff: Duration,
    /// Consecutive failures allowed per frame and per establishment.
    pub max_retries: u32,
    /// Byte inserted after every record in the delivered message.
    pub record_separator: u8,
}

impl Default for Lis1A1Settings {
    fn default() -> Self {
        Lis1A1Settings {
            max_frame_payload: 240,
            frame_number_check: false,
            contention_role: ContentionRole::Low,
            inter_frame_timeout: Duration::from_secs(15),
            nak_backoff: Duration::from_secs(10),
            contention_backoff: Duration::from_secs(1),
            max_retries: 6,
            record_separator: CR,
        }
    }
}

impl Lis1A1Settings {
    /// Enforce monotone frame numbering on receive (ASTM E1394 /
    /// LIS2-A2 peers).
    pub fn enable_frame_number_check(mut self) -> Self {
        self.frame_number_check = true;
        self
    }

    /// Take the dominant contention role.
    pub fn high_priority(mut self) -> Self {
        self.contention_role = ContentionRole::High;
        self
    }

    /// Take the subordinate contention role.
    pub fn low_priority(mut self) -> Self {
        self.contention_role = ContentionRole::Low;
        self
    }
}

/// Receiver position within the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No conversation; awaiting `<ENQ>`.
    Idle,
    /// Conversation established; awaiting `<STX>` or `<EOT>`.
    AwaitFrame,
    /// `<STX>` seen; the next byte is the frame-number digit.
    FrameNumber,
    /// Collecting payload until `<ETX>` or `<ETB>`.
    Payload,
    /// First checksum digit.
    Checksum1,
    /// Second checksum digit.
    Checksum2,
    /// Trailing `<CR>`.
    AwaitCr,
    /// Trailing `<LF>`; the frame is judged here.
    AwaitLf,
}

/// LIS1-A1 protocol state.
pub struct Lis1A1Protocol {
    settings: Lis1A1Settings,
    read_deadline: Duration,
    phase: Phase,
    /// Assembled records, each followed by the record separator.
    message: BytesMut,
    /// Logical record being coalesced across `<ETB>` frames.
    record: BytesMut,
    /// Payload of the frame currently on the wire.
    frame: BytesMut,
    frame_digit: u8,
    terminator: u8,
    received_checksum: [u8; 2],
    /// Next frame number we expect, 0..=7.
    expected_frame: u8,
    consecutive_naks: u32,
    /// Bytes read but not yet fed through the state machine.
    inbuf: VecDeque<u8>,
    eof: bool,
}

impl Lis1A1Protocol {
    pub fn new(settings: Lis1A1Settings, read_deadline: Duration) -> Self {
        Lis1A1Protocol {
            settings,
            read_deadline,
            phase: Phase::Idle,
            message: BytesMut::new(),
            record: BytesMut::new(),
            frame: BytesMut::new(),
            frame_digit: 0,
            terminator: ETX,
            received_checksum: [0; 2],
            expected_frame: 1,
            consecutive_naks: 0,
            inbuf: VecDeque::new(),
            eof: false,
        }
    }

    /// Drive the receiver path until the peer completes a transmission
    /// with `<EOT>`, delivering the assembled records joined by the
    /// record separator.
    pub async fn receive<S: ByteStream>(&mut self, stream: &mut S) -> Result<ReceiveOutcome> {
        if self.eof {
            return Ok(ReceiveOutcome::Eof);
        }

        let mut chunk = [0u8; 4096];
        loop {
            while let Some(byte) = self.inbuf.pop_front() {
                if let Some(outcome) = self.step(byte, stream).await? {
                    return Ok(outcome);
                }
            }

            let deadline = if self.phase == Phase::Idle {
                self.read_deadline
            } else {
                self.settings.inter_frame_timeout
            };

            match timeout(deadline, stream.read(&mut chunk)).await {
                Err(_) => {
                    if self.phase == Phase::Idle {
                        return Ok(ReceiveOutcome::Idle);
                    }
                    self.reset_conversation();
                    return Err(Error::Timeout(
                        "peer went silent mid-transmission".to_string(),
                    ));
                }
                Ok(Ok(0)) => {
                    self.eof = true;
                    if self.phase == Phase::Idle {
                        return Ok(ReceiveOutcome::Eof);
                    }
                    self.reset_conversation();
                    return Err(Error::Receive(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "stream closed mid-transmission",
                    )));
                }
                Ok(Ok(n)) => self.inbuf.extend(&chunk[..n]),
                Ok(Err(e)) => return Err(Error::Receive(e)),
            }
        }
    }

    /// Transmit `records`, one logical record per `<ETX>` frame chain,
    /// splitting over `<ETB>` frames at `max_frame_payload`.
    ///
    /// Returns `Sent` with every byte put on the wire (`<ENQ>`, frames,
    /// `<EOT>`), or `Yielded` when the subordinate side lost contention:
    /// the line has been ACKed and the state machine is already
    /// receiving, so the caller re-queues the records and resumes its
    /// receive loop.
    pub async fn send<S: ByteStream>(
        &mut self,
        stream: &mut S,
        records: &[&[u8]],
    ) -> Result<SendOutcome> {
        let frames = self.build_frames(records);
        let mut written = 0usize;

        trace!(records = records.len(), frames = frames.len(), "tx ENQ");
        stream.write_all(&[ENQ]).await.map_err(Error::Send)?;
        written += 1;

        // establishment: wait for the peer to accept the line
        let mut attempts: u32 = 0;
        loop {
            match self.read_reply(stream).await? {
                ACK => break,
                NAK => {
                    attempts += 1;
                    if attempts >= self.settings.max_retries {
                        return Err(Error::Timeout(format!(
                            "peer refused the line {attempts} times"
                        )));
                    }
                    sleep(self.settings.nak_backoff).await;
                    trace!(attempts, "tx ENQ (retry)");
                    stream.write_all(&[ENQ]).await.map_err(Error::Send)?;
                    written += 1;
                }
                ENQ => match self.settings.contention_role {
                    ContentionRole::Low => {
                        trace!("contention: yielding the line");
                        stream.write_all(&[ACK]).await.map_err(Error::Send)?;
                        self.begin_conversation();
                        return Ok(SendOutcome::Yielded);
                    }
                    ContentionRole::High => {
                        attempts += 1;
                        if attempts >= self.settings.max_retries {
                            return Err(Error::Timeout(format!(
                                "contention unresolved after {attempts} attempts"
                            )));
                        }
                        sleep(self.settings.contention_backoff).await;
                        trace!(attempts, "contention: tx ENQ (retry)");
                        stream.write_all(&[ENQ]).await.map_err(Error::Send)?;
                        written += 1;
                    }
                },
                other => trace!(byte = other, "ignoring stray byte before ACK"),
            }
        }

        // numbered frames, each acknowledged individually
        let mut out = BytesMut::new();
        for (digit, payload, terminator) in &frames {
            let mut consecutive_naks: u32 = 0;
            'frame: loop {
                out.clear();
                out.put_u8(STX);
                out.put_u8(*digit);
                out.extend_from_slice(payload);
                out.put_u8(*terminator);
                out.extend_from_slice(&checksum(*digit, payload, *terminator));
                out.put_u8(CR);
                out.put_u8(LF);
                stream.write_all(&out).await.map_err(Error::Send)?;
                written += out.len();
                trace!(
                    frame = (*digit - b'0'),
                    bytes = payload.len(),
                    terminator = if *terminator == ETX { "ETX" } else { "ETB" },
                    "tx frame"
                );

                loop {
                    match self.read_reply(stream).await? {
                        ACK => break 'frame,
                        NAK => {
                            consecutive_naks += 1;
                            if consecutive_naks >= self.settings.max_retries {
                                return Err(Error::ChecksumMismatch(format!(
                                    "peer rejected frame {} {consecutive_naks} times",
                                    *digit - b'0'
                                )));
                            }
                            continue 'frame;
                        }
                        EOT => {
                            return Err(Error::Receive(io::Error::new(
                                io::ErrorKind::ConnectionAborted,
                                "peer aborted the transmission",
                            )))
                        }
                        other => trace!(byte = other, "ignoring stray byte awaiting ACK"),
                    }
                }
            }
        }

        trace!("tx EOT");
        stream.write_all(&[EOT]).await.map_err(Error::Send)?;
        written += 1;
        Ok(SendOutcome::Sent(written))
    }

    /// Split records into numbered frames. Numbering starts at 1 and
    /// wraps modulo 8; digits 8 and 9 never occur.
    fn build_frames<'a>(&self, records: &[&'a [u8]]) -> Vec<(u8, &'a [u8], u8)> {
        let mut frames = Vec::new();
        let mut number: u8 = 1;
        for record in records {
            let chunks: Vec<&[u8]> = if record.is_empty() {
                vec![&[][..]]
            } else {
                record.chunks(self.settings.max_frame_payload).collect()
            };
            let last = chunks.len() - 1;
            for (i, chunk) in chunks.into_iter().enumerate() {
                let terminator = if i == last { ETX } else { ETB };
                frames.push((b'0' + number, chunk, terminator));
                number = (number + 1) % 8;
            }
        }
        frames
    }

    async fn read_reply<S: ByteStream>(&mut self, stream: &mut S) -> Result<u8> {
        if let Some(byte) = self.inbuf.pop_front() {
            return Ok(byte);
        }
        let mut byte = [0u8; 1];
        match timeout(self.settings.inter_frame_timeout, stream.read(&mut byte)).await {
            Err(_) => Err(Error::Timeout("no reply from peer".to_string())),
            Ok(Ok(0)) => Err(Error::Receive(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream closed awaiting reply",
            ))),
            Ok(Ok(_)) => Ok(byte[0]),
            Ok(Err(e)) => Err(Error::Receive(e)),
        }
    }

    /// Feed one byte through the receiver path. `Some` carries a
    /// completed message.
    async fn step<S: ByteStream>(
        &mut self,
        byte: u8,
        stream: &mut S,
    ) -> Result<Option<ReceiveOutcome>> {
        match self.phase {
            Phase::Idle => {
                if byte == ENQ {
                    trace!("rx ENQ, tx ACK");
                    stream.write_all(&[ACK]).await.map_err(Error::Send)?;
                    self.begin_conversation();
                }
                // anything else outside a conversation is line noise
                Ok(None)
            }
            Phase::AwaitFrame => match byte {
                STX => {
                    self.frame.clear();
                    self.phase = Phase::FrameNumber;
                    Ok(None)
                }
                EOT => {
                    if !self.record.is_empty() {
                        // dangling ETB chain: deliver what arrived
                        let record = self.record.split();
                        self.message.extend_from_slice(&record);
                        self.message.put_u8(self.settings.record_separator);
                    }
                    let payload = self.message.split().to_vec();
                    debug!(bytes = payload.len(), "rx EOT, transmission complete");
                    self.reset_conversation();
                    Ok(Some(ReceiveOutcome::Message {
                        payload,
                        completed_at: SystemTime::now(),
                    }))
                }
                _ => Ok(None), // bytes between frames are dropped
            },
            Phase::FrameNumber => {
                self.frame_digit = byte;
                self.phase = Phase::Payload;
                Ok(None)
            }
            Phase::Payload => match byte {
                ETX | ETB => {
                    self.terminator = byte;
                    self.phase = Phase::Checksum1;
                    Ok(None)
                }
                STX => {
                    // garbled frame; start over from the new STX
                    self.frame.clear();
                    self.phase = Phase::FrameNumber;
                    Ok(None)
                }
                _ => {
                    self.frame.put_u8(byte);
                    Ok(None)
                }
            },
            Phase::Checksum1 => {
                self.received_checksum[0] = byte;
                self.phase = Phase::Checksum2;
                Ok(None)
            }
            Phase::Checksum2 => {
                self.received_checksum[1] = byte;
                self.phase = Phase::AwaitCr;
                Ok(None)
            }
            Phase::AwaitCr => {
                if byte == CR {
                    self.phase = Phase::AwaitLf;
                    Ok(None)
                } else {
                    self.reject_frame(stream).await.map(|_| None)
                }
            }
            Phase::AwaitLf => {
                if byte == LF && self.frame_is_good() {
                    self.accept_frame(stream).await.map(|_| None)
                } else {
                    self.reject_frame(stream).await.map(|_| None)
                }
            }
        }
    }

    fn frame_is_good(&self) -> bool {
        let digit_ok = match self.frame_digit {
            b'0'..=b'7' => {
                !self.settings.frame_number_check
                    || self.frame_digit == b'0' + self.expected_frame
            }
            // 8, 9 and non-digits are invalid in every mode
            _ => false,
        };
        digit_ok
            && checksum(self.frame_digit, &self.frame, self.terminator) == self.received_checksum
    }

    async fn accept_frame<S: ByteStream>(&mut self, stream: &mut S) -> Result<()> {
        self.consecutive_naks = 0;
        self.record.extend_from_slice(&self.frame);
        self.frame.clear();
        if self.terminator == ETX {
            let record = self.record.split();
            self.message.extend_from_slice(&record);
            self.message.put_u8(self.settings.record_separator);
        }
        self.expected_frame = (self.expected_frame + 1) % 8;
        trace!(
            frame = (self.frame_digit.saturating_sub(b'0')),
            "frame ok, tx ACK"
        );
        stream.write_all(&[ACK]).await.map_err(Error::Send)?;
        self.phase = Phase::AwaitFrame;
        Ok(())
    }

    async fn reject_frame<S: ByteStream>(&mut self, stream: &mut S) -> Result<()> {
        self.frame.clear();
        self.consecutive_naks += 1;
        if self.consecutive_naks >= self.settings.max_retries {
            let naks = self.consecutive_naks;
            self.reset_conversation();
            return Err(Error::ChecksumMismatch(format!(
                "discarded {naks} consecutive bad frames"
            )));
        }
        trace!("frame bad, tx NAK");
        stream.write_all(&[NAK]).await.map_err(Error::Send)?;
        self.phase = Phase::AwaitFrame;
        Ok(())
    }

    fn begin_conversation(&mut self) {
        self.phase = Phase::AwaitFrame;
        self.message.clear();
        self.record.clear();
        self.frame.clear();
        self.expected_frame = 1;
        self.consecutive_naks = 0;
    }

    fn reset_conversation(&mut self) {
        self.phase = Phase::Idle;
        self.record.clear();
        self.frame.clear();
        self.expected_frame = 1;
        self.consecutive_naks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::util::ScriptedStream;

    fn lis1a1(settings: Lis1A1Settings) -> Lis1A1Protocol {
        Lis1A1Protocol::new(settings, Duration::from_millis(20))
    }

    fn fast_settings() -> Lis1A1Settings {
        Lis1A1Settings {
            inter_frame_timeout: Duration::from_millis(200),
            nak_backoff: Duration::from_millis(5),
            contention_backoff: Duration::from_millis(5),
            ..Lis1A1Settings::default()
        }
    }

    #[tokio::test]
    async fn test_nak_once_resends_the_same_frame() {
        let frame: &[u8] = b"\x021H||||\x036C\r\n";
        let mut stream = ScriptedStream::new()
            .expect([ENQ])
            .feed([ACK])
            .expect(frame)
            .feed([NAK])
            .expect(frame)
            .feed([ACK])
            .expect([EOT]);

        let mut protocol = lis1a1(fast_settings());
        let outcome = protocol.send(&mut stream, &[b"H||||"]).await.unwrap();

        // ENQ + frame twice + EOT
        assert!(matches!(outcome, SendOutcome::Sent(26)));
        assert!(stream.is_exhausted());
    }

    #[tokio::test]
    async fn test_six_naks_fail_the_transfer() {
        let frame: &[u8] = b"\x021H||||\x036C\r\n";
        let mut stream = ScriptedStream::new().expect([ENQ]).feed([ACK]);
        for _ in 0..5 {
            stream = stream.expect(frame).feed([NAK]);
        }
        stream = stream.expect(frame).feed([NAK]);

        let mut protocol = lis1a1(fast_settings());
        let err = protocol.send(&mut stream, &[b"H||||"]).await.unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch(_)));
    }

    #[tokio::test]
    async fn test_enq_nak_backs_off_and_retries() {
        let mut stream = ScriptedStream::new()
            .expect([ENQ])
            .feed([NAK])
            .expect([ENQ])
            .feed([ACK])
            .expect(b"\x021H||||\x036C\r\n")
            .feed([ACK])
            .expect([EOT]);

        let mut protocol = lis1a1(fast_settings());
        let outcome = protocol.send(&mut stream, &[b"H||||"]).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Sent(15)));
        assert!(stream.is_exhausted());
    }

    #[tokio::test]
    async fn test_subordinate_yields_on_contention() {
        let mut stream = ScriptedStream::new()
            .expect([ENQ])
            .feed([ENQ]) // collision
            .expect([ACK]); // we yield and accept the peer's line

        let mut protocol = lis1a1(fast_settings().low_priority());
        let outcome = protocol.send(&mut stream, &[b"H||||"]).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Yielded));
        assert!(stream.is_exhausted());
        // the machine is now mid-conversation, awaiting the peer's frames
        assert_eq!(protocol.phase, Phase::AwaitFrame);
    }

    #[tokio::test]
    async fn test_dominant_retries_on_contention() {
        let mut stream = ScriptedStream::new()
            .expect([ENQ])
            .feed([ENQ]) // collision
            .expect([ENQ]) // we insist after the backoff
            .feed([ACK])
            .expect(b"\x021H||||\x036C\r\n")
            .feed([ACK])
            .expect([EOT]);

        let mut protocol = lis1a1(fast_settings().high_priority());
        let outcome = protocol.send(&mut stream, &[b"H||||"]).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Sent(15)));
        assert!(stream.is_exhausted());
    }

    #[tokio::test]
    async fn test_receive_assembles_records_with_separator() {
        let mut stream = ScriptedStream::new()
            .feed([ENQ])
            .expect([ACK])
            .feed(b"\x021H||||\x036C\r\n")
            .expect([ACK])
            .feed(b"\x022O|1|||||\x039D\r\n")
            .expect([ACK])
            .feed([EOT]);

        let mut protocol = lis1a1(fast_settings());
        match protocol.receive(&mut stream).await.unwrap() {
            ReceiveOutcome::Message { payload, .. } => {
                assert_eq!(payload, b"H||||\rO|1|||||\r");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(stream.is_exhausted());
    }

    #[tokio::test]
    async fn test_receive_naks_bad_checksum_then_accepts_resend() {
        let mut stream = ScriptedStream::new()
            .feed([ENQ])
            .expect([ACK])
            .feed(b"\x021H||||\x03FF\r\n") // wrong checksum
            .expect([NAK])
            .feed(b"\x021H||||\x036C\r\n")
            .expect([ACK])
            .feed([EOT]);

        let mut protocol = lis1a1(fast_settings());
        match protocol.receive(&mut stream).await.unwrap() {
            ReceiveOutcome::Message { payload, .. } => assert_eq!(payload, b"H||||\r"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(stream.is_exhausted());
    }

    #[tokio::test]
    async fn test_receive_coalesces_etb_frames() {
        // one logical record split over an ETB frame and an ETX frame
        let first = checksum(b'1', b"PART-A,", ETB);
        let second = checksum(b'2', b"PART-B", ETX);
        let mut stream = ScriptedStream::new()
            .feed([ENQ])
            .expect([ACK])
            .feed([STX, b'1'])
            .feed(b"PART-A,")
            .feed([ETB])
            .feed(first)
            .feed([CR, LF])
            .expect([ACK])
            .feed([STX, b'2'])
            .feed(b"PART-B")
            .feed([ETX])
            .feed(second)
            .feed([CR, LF])
            .expect([ACK])
            .feed([EOT]);

        let mut protocol = lis1a1(fast_settings());
        match protocol.receive(&mut stream).await.unwrap() {
            ReceiveOutcome::Message { payload, .. } => {
                assert_eq!(payload, b"PART-A,PART-B\r");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_receive_rejects_out_of_sequence_frame_number() {
        // frame numbered 3 when 1 is expected, checksum itself valid
        let cks = checksum(b'3', b"H||||", ETX);
        let good = checksum(b'1', b"H||||", ETX);
        let mut stream = ScriptedStream::new()
            .feed([ENQ])
            .expect([ACK])
            .feed([STX, b'3'])
            .feed(b"H||||")
            .feed([ETX])
            .feed(cks)
            .feed([CR, LF])
            .expect([NAK])
            .feed([STX, b'1'])
            .feed(b"H||||")
            .feed([ETX])
            .feed(good)
            .feed([CR, LF])
            .expect([ACK])
            .feed([EOT]);

        let mut protocol = lis1a1(fast_settings().enable_frame_number_check());
        match protocol.receive(&mut stream).await.unwrap() {
            ReceiveOutcome::Message { payload, .. } => assert_eq!(payload, b"H||||\r"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_receive_rejects_digits_eight_and_nine() {
        // digit 8 is outside the wrap alphabet even with checking off
        let cks = checksum(b'8', b"H||||", ETX);
        let mut stream = ScriptedStream::new()
            .feed([ENQ])
            .expect([ACK])
            .feed([STX, b'8'])
            .feed(b"H||||")
            .feed([ETX])
            .feed(cks)
            .feed([CR, LF])
            .expect([NAK]);

        let mut protocol = lis1a1(fast_settings());
        // the NAK leaves the conversation open; the next read hits EOF
        let err = protocol.receive(&mut stream).await.unwrap_err();
        assert!(matches!(err, Error::Receive(_)));
    }

    #[tokio::test]
    async fn test_sender_splits_long_records_over_etb_frames() {
        let long = vec![b'Q'; 500];
        let settings = Lis1A1Settings {
            max_frame_payload: 240,
            ..fast_settings()
        };

        let c1 = checksum(b'1', &long[..240], ETB);
        let c2 = checksum(b'2', &long[240..480], ETB);
        let c3 = checksum(b'3', &long[480..], ETX);

        let mut stream = ScriptedStream::new()
            .expect([ENQ])
            .feed([ACK])
            .expect([STX, b'1'])
            .expect(&long[..240])
            .expect([ETB])
            .expect(c1)
            .expect([CR, LF])
            .feed([ACK])
            .expect([STX, b'2'])
            .expect(&long[240..480])
            .expect([ETB])
            .expect(c2)
            .expect([CR, LF])
            .feed([ACK])
            .expect([STX, b'3'])
            .expect(&long[480..])
            .expect([ETX])
            .expect(c3)
            .expect([CR, LF])
            .feed([ACK])
            .expect([EOT]);

        let mut protocol = lis1a1(settings);
        let outcome = protocol.send(&mut stream, &[&long]).await.unwrap();
        // ENQ + 3 frames (payload + 7 framing bytes each) + EOT
        assert!(matches!(outcome, SendOutcome::Sent(523)));
        assert!(stream.is_exhausted());
    }

    #[tokio::test]
    async fn test_frame_numbers_wrap_seven_to_zero() {
        let records: Vec<Vec<u8>> = (0..9).map(|i| vec![b'A' + i as u8]).collect();
        let refs: Vec<&[u8]> = records.iter().map(|r| r.as_slice()).collect();

        let protocol = lis1a1(fast_settings());
        let frames = protocol.build_frames(&refs);
        let digits: Vec<u8> = frames.iter().map(|(d, _, _)| *d).collect();
        assert_eq!(
            digits,
            vec![b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'0', b'1']
        );
    }
}
