//! The four-event callback surface consumed by user code.

use crate::error::{Error, ErrorKind, Result};
use crate::session::Session;
use std::time::SystemTime;

/// Receives the lifecycle events of every session on a transport.
///
/// One handler instance is shared across all sessions, and sessions run
/// in parallel, so callbacks may be invoked concurrently; implementations
/// that need serialisation bring their own synchronisation.
///
/// Per session the ordering is strict: `connected` fires exactly once
/// before any `data_received`, and `disconnected` fires exactly once
/// after the last `data_received`, on every close path. `error` may fire
/// without a preceding `connected` (admission failures carry no session).
pub trait Handler: Send + Sync {
    /// A session was established. Returning `Err` rejects it: the
    /// session is closed and the rejection is reported through `error`.
    fn connected(&self, session: &dyn Session) -> Result<()>;

    /// One complete message, as delimited by the session's protocol.
    ///
    /// `payload` carries no framing bytes or checksums. `received_at` is
    /// the wall clock at the moment the final byte of the message
    /// arrived.
    fn data_received(&self, session: &dyn Session, payload: Vec<u8>, received_at: SystemTime);

    /// The session ended: peer close, server stop, or fatal error.
    fn disconnected(&self, session: &dyn Session);

    /// A reportable error. Transient per-frame conditions (a single NAK,
    /// a single bad checksum) are recovered inside the protocol and
    /// never reach this callback.
    fn error(&self, session: Option<&dyn Session>, kind: ErrorKind, cause: &Error);
}
