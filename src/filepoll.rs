//! Store-and-forward transport: a directory poller speaking the same
//! handler contract as the TCP server.
//!
//! Instruments that exchange files instead of live sessions drop their
//! output into a directory (a mounted share, or the local target of an
//! external FTP/SFTP fetch). The poller scans it on an interval, hands
//! every file matching the mask to the handler as one message, and
//! writes queued outbound records as generated files.

use crate::error::{Error, ErrorKind, Result};
use crate::handler::Handler;
use crate::session::Session;
use chrono::{DateTime, Datelike, Local, Timelike};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Line ending appended to each outbound record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Cr,
    CrLf,
    Lf,
}

impl LineEnding {
    pub fn bytes(self) -> &'static [u8] {
        match self {
            LineEnding::Cr => b"\r",
            LineEnding::CrLf => b"\r\n",
            LineEnding::Lf => b"\n",
        }
    }
}

/// Outbound filename generation.
///
/// The pattern substitutes `yyyy yy MM dd hh mm ss` (wall clock), `cc`
/// (milliseconds), `nn` (microseconds) and `#` (a monotonic counter).
/// The prefix is prepended; the suffix lands after the generated name,
/// before any extension.
#[derive(Debug, Clone)]
pub struct FilenamePattern {
    pub pattern: String,
    pub prefix: String,
    pub suffix: String,
}

impl Default for FilenamePattern {
    fn default() -> Self {
        FilenamePattern {
            pattern: "yyyyMMddhhmmss-#.dat".to_string(),
            prefix: "AUTO-".to_string(),
            suffix: String::new(),
        }
    }
}

/// File-drop transport configuration.
#[derive(Debug, Clone)]
pub struct FilePollerConfig {
    /// Directory to poll.
    pub path: PathBuf,
    /// Case-insensitive wildcard (`*`, `?`) mask for inbound files.
    pub filemask: String,
    /// Scan cadence.
    pub poll_interval: Duration,
    /// Remove an inbound file once the handler callback returned.
    pub delete_after_read: bool,
    /// Line ending terminating each outbound record.
    pub line_ending: LineEnding,
    /// Outbound filename generation.
    pub filename: FilenamePattern,
}

impl FilePollerConfig {
    pub fn new(path: impl Into<PathBuf>, filemask: impl Into<String>) -> Self {
        FilePollerConfig {
            path: path.into(),
            filemask: filemask.into(),
            poll_interval: Duration::from_secs(60),
            delete_after_read: true,
            line_ending: LineEnding::Lf,
            filename: FilenamePattern::default(),
        }
    }
}

/// The directory poller. It is its own [`Session`]: handler callbacks
/// can queue outbound files through it, and `close` stops the poll loop.
pub struct FilePoller {
    config: FilePollerConfig,
    counter: AtomicU64,
    outbox: Mutex<VecDeque<Vec<Vec<u8>>>>,
    closed: AtomicBool,
    stop: Notify,
    disconnect_reported: AtomicBool,
}

impl FilePoller {
    pub fn new(config: FilePollerConfig) -> Result<Arc<Self>> {
        if config.filemask.is_empty() {
            return Err(Error::Configuration("filemask must not be empty".to_string()));
        }
        if config.poll_interval.is_zero() {
            return Err(Error::Configuration(
                "poll_interval must be positive".to_string(),
            ));
        }
        Ok(Arc::new(FilePoller {
            config,
            counter: AtomicU64::new(0),
            outbox: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            stop: Notify::new(),
            disconnect_reported: AtomicBool::new(false),
        }))
    }

    /// Poll until [`Session::close`] is called. Inbound files go to the
    /// handler in name order; queued sends are written out each cycle.
    pub async fn run(&self, handler: Arc<dyn Handler>) -> Result<()> {
        // refuse to start against a directory we cannot list
        if let Err(e) = tokio::fs::read_dir(&self.config.path).await {
            let err = Error::Login(format!(
                "cannot access {}: {e}",
                self.config.path.display()
            ));
            handler.error(None, ErrorKind::Login, &err);
            return Err(err);
        }

        if let Err(cause) = handler.connected(self) {
            warn!(error = %cause, "poller rejected by handler");
            handler.error(Some(self), ErrorKind::Connect, &cause);
            self.finish(&handler);
            return Ok(());
        }

        info!(path = %self.config.path.display(), mask = %self.config.filemask, "poller started");

        while !self.is_closed() {
            self.scan_inbound(&handler).await;
            self.write_outbound(&handler).await;

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = self.stop.notified() => {}
            }
        }

        self.finish(&handler);
        Ok(())
    }

    async fn scan_inbound(&self, handler: &Arc<dyn Handler>) {
        let mut dir = match tokio::fs::read_dir(&self.config.path).await {
            Ok(dir) => dir,
            Err(e) => {
                handler.error(Some(self), ErrorKind::Receive, &Error::Receive(e));
                return;
            }
        };

        let mut names = Vec::new();
        while let Ok(Some(entry)) = dir.next_entry().await {
            if let Ok(file_type) = entry.file_type().await {
                if file_type.is_file() {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
        names.sort();

        for name in names {
            if self.is_closed() {
                return;
            }
            if !wildcard_match(&self.config.filemask, &name) {
                continue;
            }

            let path = self.config.path.join(&name);
            let payload = match tokio::fs::read(&path).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(file = %name, error = %e, "read failed");
                    handler.error(Some(self), ErrorKind::Receive, &Error::Receive(e));
                    continue;
                }
            };
            let received_at = tokio::fs::metadata(&path)
                .await
                .and_then(|m| m.modified())
                .unwrap_or_else(|_| SystemTime::now());

            debug!(file = %name, bytes = payload.len(), "inbound file");
            handler.data_received(self, payload, received_at);

            if self.config.delete_after_read {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(file = %name, error = %e, "delete failed");
                    let err = Error::Internal(format!("cannot delete {name}: {e}"));
                    handler.error(Some(self), ErrorKind::Internal, &err);
                }
            }
        }
    }

    async fn write_outbound(&self, handler: &Arc<dyn Handler>) {
        loop {
            let batch = match self.outbox.lock().unwrap().pop_front() {
                Some(batch) => batch,
                None => return,
            };

            let counter = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let name = generate_filename(
                &self.config.filename.pattern,
                &self.config.filename.prefix,
                &self.config.filename.suffix,
                counter,
                Local::now(),
            );

            let mut data = Vec::new();
            for record in &batch {
                data.extend_from_slice(record);
                data.extend_from_slice(self.config.line_ending.bytes());
            }

            let path = self.config.path.join(&name);
            match tokio::fs::write(&path, &data).await {
                Ok(()) => debug!(file = %name, bytes = data.len(), "outbound file written"),
                Err(e) => {
                    warn!(file = %name, error = %e, "write failed");
                    handler.error(Some(self), ErrorKind::Send, &Error::Send(e));
                }
            }
        }
    }

    fn finish(&self, handler: &Arc<dyn Handler>) {
        self.close();
        if !self.disconnect_reported.swap(true, Ordering::SeqCst) {
            handler.disconnected(self);
        }
    }
}

impl Session for FilePoller {
    fn remote_address(&self) -> String {
        self.config.path.display().to_string()
    }

    fn send(&self, records: &[&[u8]]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Send(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "poller is stopped",
            )));
        }
        let owned: Vec<Vec<u8>> = records.iter().map(|r| r.to_vec()).collect();
        self.outbox.lock().unwrap().push_back(owned);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.stop.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Case-insensitive `*`/`?` wildcard match.
fn wildcard_match(mask: &str, name: &str) -> bool {
    let mask: Vec<u8> = mask.to_ascii_uppercase().into_bytes();
    let name: Vec<u8> = name.to_ascii_uppercase().into_bytes();

    let (mut m, mut n) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;
    while n < name.len() {
        if m < mask.len() && (mask[m] == b'?' || mask[m] == name[n]) {
            m += 1;
            n += 1;
        } else if m < mask.len() && mask[m] == b'*' {
            star = Some(m);
            mark = n;
            m += 1;
        } else if let Some(s) = star {
            m = s + 1;
            mark += 1;
            n = mark;
        } else {
            return false;
        }
    }
    while m < mask.len() && mask[m] == b'*' {
        m += 1;
    }
    m == mask.len()
}

/// Substitute the timestamp tokens and counter, place the suffix before
/// the extension, and prepend the prefix.
fn generate_filename(
    pattern: &str,
    prefix: &str,
    suffix: &str,
    counter: u64,
    now: DateTime<Local>,
) -> String {
    let mut name = pattern.to_string();
    name = name.replace("yyyy", &format!("{:04}", now.year()));
    name = name.replace("yy", &format!("{:02}", now.year() % 100));
    name = name.replace("MM", &format!("{:02}", now.month()));
    name = name.replace("dd", &format!("{:02}", now.day()));
    name = name.replace("hh", &format!("{:02}", now.hour()));
    name = name.replace("mm", &format!("{:02}", now.minute()));
    name = name.replace("ss", &format!("{:02}", now.second()));
    name = name.replace("cc", &format!("{:03}", now.timestamp_subsec_millis()));
    name = name.replace("nn", &format!("{:06}", now.timestamp_subsec_micros()));
    name = name.replace('#', &counter.to_string());

    let name = if suffix.is_empty() {
        name
    } else {
        match name.rfind('.') {
            Some(dot) => format!("{}{}{}", &name[..dot], suffix, &name[dot..]),
            None => format!("{name}{suffix}"),
        }
    };

    format!("{prefix}{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::TimeZone;
    use std::sync::mpsc;

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*.dat", "orders.dat"));
        assert!(wildcard_match("*.DAT", "orders.dat"));
        assert!(wildcard_match("ORD?.dat", "ord1.DAT"));
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("a*b*c", "aXXbYYc"));
        assert!(!wildcard_match("*.dat", "orders.txt"));
        assert!(!wildcard_match("ORD?.dat", "orders.dat"));
        assert!(!wildcard_match("", "nonempty"));
    }

    #[test]
    fn test_generate_filename_tokens() {
        let now = Local.with_ymd_and_hms(2023, 10, 14, 16, 24, 27).unwrap();
        let name = generate_filename("yyyyMMddhhmmss-#.dat", "AUTO-", "", 7, now);
        assert_eq!(name, "AUTO-20231014162427-7.dat");

        let name = generate_filename("yyMMdd.txt", "", "", 1, now);
        assert_eq!(name, "231014.txt");
    }

    #[test]
    fn test_generate_filename_suffix_before_extension() {
        let now = Local.with_ymd_and_hms(2023, 10, 14, 16, 24, 27).unwrap();
        let name = generate_filename("result-#.dat", "", "-X", 3, now);
        assert_eq!(name, "result-3-X.dat");

        let name = generate_filename("result-#", "", "-X", 3, now);
        assert_eq!(name, "result-3-X");
    }

    struct RecordingHandler {
        events: mpsc::Sender<(String, Vec<u8>)>,
    }

    impl Handler for RecordingHandler {
        fn connected(&self, _session: &dyn Session) -> Result<()> {
            self.events.send(("connected".to_string(), Vec::new())).unwrap();
            Ok(())
        }

        fn data_received(&self, session: &dyn Session, payload: Vec<u8>, _at: SystemTime) {
            self.events.send(("data".to_string(), payload)).unwrap();
            session.send(&[b"R|1|ok"]).unwrap();
        }

        fn disconnected(&self, _session: &dyn Session) {
            self.events.send(("disconnected".to_string(), Vec::new())).unwrap();
        }

        fn error(&self, _session: Option<&dyn Session>, kind: ErrorKind, _cause: &Error) {
            self.events
                .send((format!("error:{kind:?}"), Vec::new()))
                .unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_poll_cycle_reads_sends_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("order1.dat"), b"O|1|sample").unwrap();
        std::fs::write(dir.path().join("ignored.txt"), b"not for us").unwrap();

        let mut config = FilePollerConfig::new(dir.path(), "*.dat");
        config.poll_interval = Duration::from_millis(20);
        config.line_ending = LineEnding::CrLf;
        // an extension the inbound mask does not match, so responses are
        // not read back on the next cycle
        config.filename.pattern = "response-#.out".to_string();
        config.filename.prefix = String::new();
        let poller = FilePoller::new(config).unwrap();

        let (tx, rx) = mpsc::channel();
        let handler = Arc::new(RecordingHandler { events: tx });

        let runner = {
            let poller = Arc::clone(&poller);
            let handler: Arc<dyn Handler> = handler;
            tokio::spawn(async move { poller.run(handler).await })
        };

        let (event, _) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, "connected");
        let (event, payload) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, "data");
        assert_eq!(payload, b"O|1|sample");

        // give the loop a cycle to delete and write the queued response
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!dir.path().join("order1.dat").exists());
        assert!(dir.path().join("ignored.txt").exists());

        let content = std::fs::read(dir.path().join("response-1.out")).unwrap();
        assert_eq!(content, b"R|1|ok\r\n");

        poller.close();
        runner.await.unwrap().unwrap();
        let (event, _) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, "disconnected");
    }

    #[tokio::test]
    async fn test_missing_directory_refuses_to_start() {
        let config = FilePollerConfig::new("/nonexistent/labwire-poll", "*.dat");
        let poller = FilePoller::new(config).unwrap();

        let (tx, rx) = mpsc::channel();
        let handler: Arc<dyn Handler> = Arc::new(RecordingHandler { events: tx });

        let err = poller.run(handler).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Login);
        let (event, _) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event, "error:Login");
    }
}
