//! Persistent session to the telemetry daemon.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use jetsight_common::Snapshot;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::backoff::Backoff;
use crate::config::SourceConfig;
use crate::source::TelemetrySource;
use crate::system::HostInfo;

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The source could not be reached or did not answer the first read.
    #[error("Failed to connect to telemetry source at {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    /// A read failed, timed out, or the session is no longer usable.
    #[error("Telemetry source unavailable: {0}")]
    SourceUnavailable(String),
}

/// Result of [`TelemetrySession::try_reconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Nothing to do, the session was ready.
    AlreadyReady,
    /// The handshake succeeded and the session is ready again.
    Reconnected,
    /// A handshake was attempted and failed.
    Failed,
    /// No attempt: reconnection disabled, session closed, or backoff pending.
    Skipped,
}

impl ReconnectOutcome {
    pub fn is_ready(self) -> bool {
        matches!(self, Self::AlreadyReady | Self::Reconnected)
    }
}

struct Transport {
    source: Box<dyn TelemetrySource>,
    backoff: Backoff,
    /// Set while a request is on the wire. Still set on entry means the
    /// previous caller was dropped mid-exchange and its reply may be pending.
    in_flight: bool,
}

impl Transport {
    /// Drop a connection left mid-exchange by a cancelled caller.
    async fn discard_abandoned(&mut self, endpoint: &str) {
        if self.in_flight {
            debug!(endpoint = %endpoint, "Discarding connection left by a cancelled read");
            self.source.close().await;
            self.in_flight = false;
        }
    }
}

/// Marks the session unready unless disarmed, so a read dropped before it
/// completes never leaves a ready session behind.
struct InFlightGuard<'a> {
    ready: &'a AtomicBool,
    endpoint: &'a str,
    armed: bool,
}

impl<'a> InFlightGuard<'a> {
    fn new(ready: &'a AtomicBool, endpoint: &'a str) -> Self {
        Self {
            ready,
            endpoint,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.ready.swap(false, Ordering::AcqRel) {
            warn!(endpoint = %self.endpoint, "Snapshot read cancelled; connection will be reset");
        }
    }
}

/// Owns the single connection to the telemetry source.
///
/// Reads are serialized through an async mutex. Readiness is an atomic flag
/// so it can be checked without waiting on an in-flight read.
pub struct TelemetrySession {
    transport: Mutex<Transport>,
    host: Box<dyn HostInfo>,
    endpoint: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    reconnect: bool,
    ready: AtomicBool,
    closed: AtomicBool,
    reads: AtomicU64,
}

impl TelemetrySession {
    /// Connect and perform one priming read.
    ///
    /// The session is ready once this returns. On failure the source is
    /// closed before the error is returned.
    pub async fn open(
        mut source: Box<dyn TelemetrySource>,
        host: Box<dyn HostInfo>,
        config: &SourceConfig,
    ) -> Result<Self, SessionError> {
        let endpoint = source.endpoint();
        let connect_timeout = config.connect_timeout();
        let read_timeout = config.read_timeout();

        info!(endpoint = %endpoint, "Opening telemetry session");

        if let Err(reason) = handshake(source.as_mut(), connect_timeout, read_timeout).await {
            source.close().await;
            return Err(SessionError::Connection { endpoint, reason });
        }

        info!(endpoint = %endpoint, "Telemetry session ready");

        Ok(Self {
            transport: Mutex::new(Transport {
                source,
                backoff: Backoff::new(&config.reconnect),
                in_flight: false,
            }),
            host,
            endpoint,
            connect_timeout,
            read_timeout,
            reconnect: config.reconnect.enabled,
            ready: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            reads: AtomicU64::new(1),
        })
    }

    /// Connection alive and at least one read succeeded since it was opened.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Successful reads, the priming reads included.
    pub fn successful_reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Read the current board state once.
    ///
    /// Failures and timeouts leave the session unready with its transport
    /// closed. Dropping the returned future before it completes does the
    /// same, so a late reply is never mistaken for a later read.
    pub async fn read_snapshot(&self) -> Result<Snapshot, SessionError> {
        if self.is_closed() {
            return Err(closed_error());
        }

        let reading = {
            let mut transport = self.transport.lock().await;
            if self.is_closed() {
                return Err(closed_error());
            }
            if transport.in_flight {
                let reason = "previous read was cancelled".to_string();
                self.mark_unavailable(&mut transport, &reason).await;
                return Err(SessionError::SourceUnavailable(reason));
            }

            let guard = InFlightGuard::new(&self.ready, &self.endpoint);
            transport.in_flight = true;
            let result = timeout(self.read_timeout, transport.source.fetch()).await;
            transport.in_flight = false;
            guard.disarm();

            match result {
                Ok(Ok(reading)) => reading,
                Ok(Err(e)) => {
                    let reason = e.to_string();
                    self.mark_unavailable(&mut transport, &reason).await;
                    return Err(SessionError::SourceUnavailable(reason));
                }
                Err(_) => {
                    let reason = format!("read timed out after {:?}", self.read_timeout);
                    self.mark_unavailable(&mut transport, &reason).await;
                    return Err(SessionError::SourceUnavailable(reason));
                }
            }
        };

        self.reads.fetch_add(1, Ordering::Relaxed);
        trace!(endpoint = %self.endpoint, "Telemetry snapshot read");

        Ok(Snapshot::assemble(reading, self.host.facts()))
    }

    /// Make one reconnection attempt if the backoff window allows it.
    ///
    /// Never attempts anything when reconnection is disabled or the session
    /// is closed.
    pub async fn try_reconnect(&self) -> ReconnectOutcome {
        if self.is_ready() {
            return ReconnectOutcome::AlreadyReady;
        }
        if !self.reconnect || self.is_closed() {
            return ReconnectOutcome::Skipped;
        }

        let mut transport = self.transport.lock().await;
        if self.is_closed() {
            return ReconnectOutcome::Skipped;
        }
        if self.is_ready() {
            return ReconnectOutcome::AlreadyReady;
        }

        if !transport.backoff.is_due(Instant::now()) {
            trace!(endpoint = %self.endpoint, "Reconnect deferred by backoff");
            return ReconnectOutcome::Skipped;
        }

        transport.discard_abandoned(&self.endpoint).await;
        debug!(endpoint = %self.endpoint, "Attempting to reconnect");

        transport.in_flight = true;
        let result =
            handshake(transport.source.as_mut(), self.connect_timeout, self.read_timeout).await;
        transport.in_flight = false;

        match result {
            Ok(()) => {
                transport.backoff.reset();
                self.reads.fetch_add(1, Ordering::Relaxed);
                self.ready.store(true, Ordering::Release);
                info!(endpoint = %self.endpoint, "Telemetry session reconnected");
                ReconnectOutcome::Reconnected
            }
            Err(reason) => {
                transport.source.close().await;
                let wait = transport.backoff.record_failure(Instant::now());
                warn!(
                    endpoint = %self.endpoint,
                    error = %reason,
                    failures = transport.backoff.failures(),
                    retry_in_ms = wait.as_millis() as u64,
                    "Reconnect failed"
                );
                ReconnectOutcome::Failed
            }
        }
    }

    /// Release the connection. Only the first call has an effect.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(endpoint = %self.endpoint, "Closing telemetry session");
        self.ready.store(false, Ordering::Release);

        let mut transport = self.transport.lock().await;
        transport.source.close().await;
    }

    async fn mark_unavailable(&self, transport: &mut Transport, reason: &str) {
        if self.ready.swap(false, Ordering::AcqRel) {
            warn!(endpoint = %self.endpoint, error = %reason, "Telemetry source lost");
        }
        transport.source.close().await;
        transport.in_flight = false;
    }
}

impl Drop for TelemetrySession {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            warn!(
                endpoint = %self.endpoint,
                "Telemetry session dropped without close; releasing connection"
            );
        }
    }
}

fn closed_error() -> SessionError {
    SessionError::SourceUnavailable("session is closed".to_string())
}

/// Connect, then require one successful fetch.
async fn handshake(
    source: &mut dyn TelemetrySource,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<(), String> {
    match timeout(connect_timeout, source.connect()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e.to_string()),
        Err(_) => return Err(format!("connect timed out after {:?}", connect_timeout)),
    }

    match timeout(read_timeout, source.fetch()).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(format!("initial read failed: {}", e)),
        Err(_) => Err(format!("initial read timed out after {:?}", read_timeout)),
    }
}
