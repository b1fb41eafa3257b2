//! Multi-session TCP server.
//!
//! Accepts connections up to a cap, wraps each in an isolated session,
//! and drives the configured framing protocol over the session's stream
//! in its own task. Complete messages, connects, disconnects and errors
//! are surfaced to one shared [`Handler`].

use crate::error::{Error, ErrorKind, Result};
use crate::handler::Handler;
use crate::protocol::{Protocol, ProtocolConfig, ReceiveOutcome, SendOutcome};
use crate::session::{Session, TcpSession};
use slab::Slab;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

/// Admission hook consulted for every accepted connection before a
/// session is created. Returning `false` closes the socket silently.
pub type LoadBalancer = fn(peer: SocketAddr, active_sessions: usize) -> bool;

/// The default load balancer: admit everyone (up to the session cap).
pub fn accept_all(_peer: SocketAddr, _active_sessions: usize) -> bool {
    true
}

/// TCP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind, e.g. `127.0.0.1:4001`. Port 0 picks a free port;
    /// see [`TcpServer::local_addr`].
    pub listen: String,
    /// Session cap. The `(max + 1)`-th concurrent connection is refused
    /// with a `MaxConnections` error event.
    pub max_connections: usize,
    /// Cadence at which an idle session wakes to observe shutdown and
    /// flush queued sends.
    pub read_deadline: Duration,
    /// Framing protocol every session speaks.
    pub protocol: ProtocolConfig,
}

impl ServerConfig {
    pub fn new(listen: impl Into<String>, protocol: ProtocolConfig) -> Self {
        ServerConfig {
            listen: listen.into(),
            max_connections: 100,
            read_deadline: Duration::from_millis(200),
            protocol,
        }
    }
}

/// Insertion-ordered collection of live sessions, bounded by the
/// configured maximum.
#[derive(Debug)]
struct SessionRegistry {
    sessions: Slab<Arc<TcpSession>>,
    max_sessions: usize,
}

impl SessionRegistry {
    fn new(max_sessions: usize) -> Self {
        SessionRegistry {
            sessions: Slab::with_capacity(max_sessions),
            max_sessions,
        }
    }

    /// Register a session. Returns `None` when the registry is full.
    fn insert(&mut self, session: Arc<TcpSession>) -> Option<usize> {
        if self.sessions.len() >= self.max_sessions {
            return None;
        }
        Some(self.sessions.insert(session))
    }

    fn remove(&mut self, key: usize) {
        if self.sessions.contains(key) {
            self.sessions.remove(key);
        }
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }

    fn all(&self) -> Vec<Arc<TcpSession>> {
        self.sessions.iter().map(|(_, s)| Arc::clone(s)).collect()
    }

    /// Sessions whose canonical host string contains `ip`.
    fn by_ip(&self, ip: &str) -> Vec<Arc<TcpSession>> {
        self.sessions
            .iter()
            .filter(|(_, s)| s.remote_address().contains(ip))
            .map(|(_, s)| Arc::clone(s))
            .collect()
    }
}

/// The TCP server: listener, admission control, session registry and
/// event dispatch.
#[derive(Debug)]
pub struct TcpServer {
    config: ServerConfig,
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    registry: Arc<Mutex<SessionRegistry>>,
    load_balancer: LoadBalancer,
    stop: Notify,
}

impl TcpServer {
    /// Validate the configuration and bind the listener. Configuration
    /// errors refuse to start here, before any client is accepted.
    pub async fn bind(config: ServerConfig) -> Result<TcpServer> {
        config.protocol.validate()?;
        if config.max_connections == 0 {
            return Err(Error::Configuration(
                "max_connections must be positive".to_string(),
            ));
        }
        if config.read_deadline.is_zero() {
            return Err(Error::Configuration(
                "read_deadline must be positive".to_string(),
            ));
        }

        let listener = TcpListener::bind(&config.listen)
            .await
            .map_err(|e| Error::Connect(format!("bind {}: {e}", config.listen)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::Connect(e.to_string()))?;

        let registry = Arc::new(Mutex::new(SessionRegistry::new(config.max_connections)));

        Ok(TcpServer {
            config,
            listener: Mutex::new(Some(listener)),
            local_addr,
            registry,
            load_balancer: accept_all,
            stop: Notify::new(),
        })
    }

    /// Replace the admission hook.
    pub fn load_balancer(mut self, load_balancer: LoadBalancer) -> Self {
        self.load_balancer = load_balancer;
        self
    }

    /// The bound listen address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept and serve until [`TcpServer::stop`] is called, then close
    /// every session, wait for all session tasks, and return.
    pub async fn run(&self, handler: Arc<dyn Handler>) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Internal("server is already running".to_string()))?;

        info!(address = %self.local_addr, "server listening");
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer, &handler, &mut tasks),
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        let err = Error::Connect(e.to_string());
                        handler.error(None, ErrorKind::Connect, &err);
                    }
                },
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                _ = self.stop.notified() => break,
            }
        }

        drop(listener);
        for session in self.registry.lock().unwrap().all() {
            session.close();
        }
        while tasks.join_next().await.is_some() {}
        info!("server stopped");
        Ok(())
    }

    /// Signal the accept loop to shut down. `run` drains every live
    /// session before returning.
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    /// Live sessions whose remote host matches `ip` (substring match on
    /// the canonical host portion only).
    pub fn find_sessions_by_ip(&self, ip: &str) -> Vec<Arc<TcpSession>> {
        self.registry.lock().unwrap().by_ip(ip)
    }

    fn admit(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        handler: &Arc<dyn Handler>,
        tasks: &mut JoinSet<()>,
    ) {
        let active = self.registry.lock().unwrap().len();
        if !(self.load_balancer)(peer, active) {
            debug!(peer = %peer, "connection declined by load balancer");
            return;
        }

        let (session, outbox) = TcpSession::new(peer);
        let key = match self.registry.lock().unwrap().insert(Arc::clone(&session)) {
            Some(key) => key,
            None => {
                warn!(peer = %peer, max = self.config.max_connections, "admission denied");
                let err = Error::MaxConnections {
                    max: self.config.max_connections,
                };
                handler.error(None, ErrorKind::MaxConnections, &err);
                return;
            }
        };

        debug!(peer = %peer, "session admitted");
        let protocol = self.config.protocol.create(self.config.read_deadline);
        let registry = Arc::clone(&self.registry);
        let handler = Arc::clone(handler);
        tasks.spawn(async move {
            drive_session(stream, Arc::clone(&session), outbox, protocol, handler).await;
            registry.lock().unwrap().remove(key);
            debug!(peer = %session.peer_addr(), "session ended");
        });
    }
}

/// One session's lifetime: the connected callback, the protocol-driven
/// read loop, queued-send flushing, and the single disconnect report.
async fn drive_session(
    mut stream: TcpStream,
    session: Arc<TcpSession>,
    mut outbox: mpsc::UnboundedReceiver<Vec<Vec<u8>>>,
    mut protocol: Protocol,
    handler: Arc<dyn Handler>,
) {
    // the handler may install per-session state before any read happens
    if let Err(cause) = handler.connected(session.as_ref()) {
        warn!(peer = %session.peer_addr(), error = %cause, "session rejected by handler");
        handler.error(Some(session.as_ref()), ErrorKind::Connect, &cause);
        finish_session(&mut stream, &session, &handler).await;
        return;
    }

    let mut pending: VecDeque<Vec<Vec<u8>>> = VecDeque::new();
    loop {
        if session.is_closed() {
            break;
        }
        tokio::select! {
            outcome = protocol.receive(&mut stream) => match outcome {
                Ok(ReceiveOutcome::Message { payload, completed_at }) => {
                    if session.is_closed() {
                        break;
                    }
                    trace!(peer = %session.peer_addr(), bytes = payload.len(), "message received");
                    handler.data_received(session.as_ref(), payload, completed_at);
                    if let Err(e) = flush_pending(&mut stream, &mut protocol, &mut outbox, &mut pending).await {
                        handler.error(Some(session.as_ref()), e.kind(), &e);
                        break;
                    }
                }
                Ok(ReceiveOutcome::Idle) => {
                    if let Err(e) = flush_pending(&mut stream, &mut protocol, &mut outbox, &mut pending).await {
                        handler.error(Some(session.as_ref()), e.kind(), &e);
                        break;
                    }
                }
                Ok(ReceiveOutcome::Eof) => break,
                Err(e) => {
                    handler.error(Some(session.as_ref()), e.kind(), &e);
                    if e.is_fatal() {
                        break;
                    }
                }
            },
            _ = session.closed() => break,
        }
    }

    finish_session(&mut stream, &session, &handler).await;
}

/// Frame and write every queued send. On a lost LIS1-A1 contention
/// round the batch goes back to the queue front and the caller returns
/// to receiving.
async fn flush_pending(
    stream: &mut TcpStream,
    protocol: &mut Protocol,
    outbox: &mut mpsc::UnboundedReceiver<Vec<Vec<u8>>>,
    pending: &mut VecDeque<Vec<Vec<u8>>>,
) -> Result<()> {
    while let Ok(batch) = outbox.try_recv() {
        pending.push_back(batch);
    }
    while let Some(batch) = pending.pop_front() {
        let records: Vec<&[u8]> = batch.iter().map(|r| r.as_slice()).collect();
        match protocol.send(stream, &records).await? {
            SendOutcome::Sent(bytes) => trace!(bytes, "queued send flushed"),
            SendOutcome::Yielded => {
                pending.push_front(batch);
                return Ok(());
            }
        }
    }
    Ok(())
}

async fn finish_session(
    stream: &mut TcpStream,
    session: &Arc<TcpSession>,
    handler: &Arc<dyn Handler>,
) {
    session.close();
    let _ = stream.shutdown().await;
    if session.take_disconnect_report() {
        handler.disconnected(session.as_ref());
    }
}
