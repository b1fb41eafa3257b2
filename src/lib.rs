//! labwire: transport and framing for laboratory-instrument
//! interconnects.
//!
//! Moves byte streams between host software and analytic instruments
//! and turns them into complete messages:
//! - A multi-session TCP server with admission control, a session
//!   registry and a four-event handler contract
//! - Framing protocols injected per server: raw (idle-window flush),
//!   STX/ETX, and the full LIS1-A1 (ASTM E1381) handshake state machine
//! - A store-and-forward directory poller speaking the same handler
//!   contract, with filename generation and line-ending rewriting
//!
//! The framing protocols are written against a minimal byte-stream
//! abstraction, so the same state machines run over TCP sessions in
//! production and in-memory pipes in tests.

pub mod config;
pub mod error;
pub mod filepoll;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stream;

pub use error::{Error, ErrorKind, Result};
pub use filepoll::{FilePoller, FilePollerConfig, FilenamePattern, LineEnding};
pub use handler::Handler;
pub use protocol::{ProtocolConfig, ReceiveOutcome, SendOutcome};
pub use server::{accept_all, LoadBalancer, ServerConfig, TcpServer};
pub use session::{Session, TcpSession};
pub use stream::ByteStream;
