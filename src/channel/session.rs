//! Secure control channel: session state, replay defense, timeouts
//!
//! One [`SecureChannel`] exists per connected peer. It owns the session key
//! and the per-session sequence cursor, wraps the codec with replay defense,
//! and enforces receive timeouts and idle closure. Key provisioning happens
//! before `open`; the key arrives pre-shared from the bootstrap mechanism.
//!
//! Errors are never retried here. The caller decides whether a failed
//! receive is worth a reconnect.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch, Mutex};

use super::codec::{self, CodecError, Message, SessionKey, MAX_PAYLOAD_LEN};
use crate::audit::{AuditRecord, AuditSink};
use crate::metrics;
use crate::monitor::event::Severity;
use crate::monitor::rate::RateLimiter;

/// Default bound on a single receive call.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default idle bound; a session quiet for longer is closed, not kept alive.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Channel-level failures surfaced to the caller.
#[derive(Debug)]
pub enum ChannelError {
    /// Framing or authentication failure from the codec
    Codec(CodecError),
    /// Sequence number at or below the last accepted one
    ReplayRejected { sequence: u64, last_seen: u64 },
    /// No frame arrived within the receive timeout
    ChannelTimeout,
    /// The daemon is shutting down; the in-flight receive was cancelled
    Cancelled,
    /// Session closed (idle bound exceeded or explicitly closed)
    SessionClosed,
    /// The peer transport hung up
    Disconnected,
    /// Outbound payload exceeds the wire maximum
    PayloadTooLarge(usize),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::Codec(e) => write!(f, "codec error: {}", e),
            ChannelError::ReplayRejected { sequence, last_seen } => write!(
                f,
                "replay rejected: sequence {} <= last seen {}",
                sequence, last_seen
            ),
            ChannelError::ChannelTimeout => write!(f, "receive timed out"),
            ChannelError::Cancelled => write!(f, "receive cancelled by shutdown"),
            ChannelError::SessionClosed => write!(f, "session closed"),
            ChannelError::Disconnected => write!(f, "peer disconnected"),
            ChannelError::PayloadTooLarge(len) => {
                write!(f, "payload of {} bytes exceeds {} maximum", len, MAX_PAYLOAD_LEN)
            }
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<CodecError> for ChannelError {
    fn from(e: CodecError) -> Self {
        ChannelError::Codec(e)
    }
}

/// One end of a byte-frame transport.
///
/// The daemon side hands raw frames to whatever socket binding hosts the
/// channel; `pair` builds a loopback for tests and in-process peers.
pub struct FrameTransport {
    pub tx: mpsc::Sender<Vec<u8>>,
    pub rx: mpsc::Receiver<Vec<u8>>,
}

impl FrameTransport {
    /// Two connected endpoints with the given frame queue depth.
    pub fn pair(depth: usize) -> (FrameTransport, FrameTransport) {
        let (a_tx, b_rx) = mpsc::channel(depth);
        let (b_tx, a_rx) = mpsc::channel(depth);
        (
            FrameTransport { tx: a_tx, rx: a_rx },
            FrameTransport { tx: b_tx, rx: b_rx },
        )
    }
}

/// Per-peer session state guarded by the channel's receive lock.
///
/// `last_sequence_seen` is the session's single mutable cursor;
/// concurrent receives on one session serialize on it.
#[derive(Debug)]
pub struct SecureSession {
    key: SessionKey,
    last_sequence_seen: u64,
    created_at: Instant,
    last_activity_at: Instant,
}

impl SecureSession {
    fn new(key: SessionKey) -> Self {
        let now = Instant::now();
        Self {
            key,
            last_sequence_seen: 0,
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn last_sequence_seen(&self) -> u64 {
        self.last_sequence_seen
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity_at.elapsed()
    }
}

/// Tunables for a channel instance.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub receive_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Authenticated, replay-defended channel to one peer.
pub struct SecureChannel {
    peer: String,
    /// Peer uid for rate accounting, from the socket binding's peer
    /// credentials; 0 until observers are attached
    peer_uid: u32,
    // Receive path: session cursor and inbound queue share one lock so
    // sequence checks are strictly serialized per session
    session: Mutex<SecureSession>,
    inbound: Mutex<mpsc::Receiver<Vec<u8>>>,
    outbound: mpsc::Sender<Vec<u8>>,
    next_sequence: AtomicU64,
    closed: AtomicBool,
    config: ChannelConfig,
    shutdown: watch::Receiver<bool>,
    audit: Option<Arc<AuditSink>>,
    rate: Option<Arc<RateLimiter>>,
}

impl SecureChannel {
    /// Establish session state over a connected transport.
    ///
    /// `shutdown` is the daemon-wide shutdown signal; a flipped value
    /// cancels in-flight receives with [`ChannelError::Cancelled`].
    pub fn open(
        peer: impl Into<String>,
        key: SessionKey,
        transport: FrameTransport,
        config: ChannelConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        metrics::ACTIVE_SESSIONS.inc();
        Self {
            peer: peer.into(),
            peer_uid: 0,
            session: Mutex::new(SecureSession::new(key)),
            inbound: Mutex::new(transport.rx),
            outbound: transport.tx,
            next_sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            config,
            shutdown,
            audit: None,
            rate: None,
        }
    }

    /// Attach the sinks that record rejected traffic.
    ///
    /// Malformed frames audit at Medium; authentication failures audit at
    /// High and count against `peer_uid` in the rate limiter; replays audit
    /// at High. Without observers rejections still fail the receive and
    /// bump metrics, but leave no audit trail.
    pub fn with_observers(
        mut self,
        audit: Arc<AuditSink>,
        rate: Arc<RateLimiter>,
        peer_uid: u32,
    ) -> Self {
        self.audit = Some(audit);
        self.rate = Some(rate);
        self.peer_uid = peer_uid;
        self
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the session. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            metrics::ACTIVE_SESSIONS.dec();
            tracing::debug!(peer = %self.peer, "secure channel closed");
        }
    }

    /// Encode and transmit one message with the next sequence number.
    pub async fn send(&self, msg_type: u8, payload: &[u8]) -> Result<u64, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::SessionClosed);
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ChannelError::PayloadTooLarge(payload.len()));
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let frame = {
            let session = self.session.lock().await;
            codec::encode(msg_type, sequence, payload, &session.key)
        };

        self.outbound
            .send(frame)
            .await
            .map_err(|_| ChannelError::Disconnected)?;
        Ok(sequence)
    }

    /// Receive, authenticate and replay-check one message.
    ///
    /// Blocks the calling task up to `timeout` (defaults to the configured
    /// receive timeout). On success the sequence cursor and activity clock
    /// advance; every failure leaves the cursor untouched.
    pub async fn receive(&self, timeout: Option<Duration>) -> Result<Message, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::SessionClosed);
        }

        let timeout = timeout.unwrap_or(self.config.receive_timeout);
        let mut inbound = self.inbound.lock().await;
        let mut shutdown = self.shutdown.clone();

        // Idle closure happens here, not in a background reaper: a session
        // past its idle bound is closed the next time anyone touches it
        {
            let session = self.session.lock().await;
            if session.idle_for() > self.config.idle_timeout {
                drop(session);
                self.close();
                return Err(ChannelError::SessionClosed);
            }
        }

        let frame = tokio::select! {
            frame = inbound.recv() => frame.ok_or(ChannelError::Disconnected)?,
            _ = tokio::time::sleep(timeout) => return Err(ChannelError::ChannelTimeout),
            _ = shutdown.changed() => return Err(ChannelError::Cancelled),
        };

        let mut session = self.session.lock().await;
        let message = match codec::decode(&frame, &session.key) {
            Ok(message) => message,
            Err(CodecError::AuthenticationFailed) => {
                metrics::AUTH_FAILURES.inc();
                // A forged tag counts as hostile traffic from this peer
                if let Some(rate) = &self.rate {
                    rate.record(self.peer_uid);
                }
                self.reject("authentication failed", Severity::High);
                return Err(ChannelError::Codec(CodecError::AuthenticationFailed));
            }
            Err(e) => {
                self.reject(&e.to_string(), Severity::Medium);
                return Err(ChannelError::Codec(e));
            }
        };

        // Replay defense: strictly increasing, any forward gap accepted
        if message.sequence <= session.last_sequence_seen {
            metrics::REPLAY_REJECTIONS.inc();
            self.reject(
                &format!(
                    "replayed sequence {} (last seen {})",
                    message.sequence, session.last_sequence_seen
                ),
                Severity::High,
            );
            return Err(ChannelError::ReplayRejected {
                sequence: message.sequence,
                last_seen: session.last_sequence_seen,
            });
        }

        session.last_sequence_seen = message.sequence;
        session.last_activity_at = Instant::now();
        Ok(message)
    }

    /// Snapshot of the session cursor, for observability.
    pub async fn last_sequence_seen(&self) -> u64 {
        self.session.lock().await.last_sequence_seen
    }

    fn reject(&self, reason: &str, severity: Severity) {
        if let Some(audit) = &self.audit {
            audit.emit(AuditRecord::channel_rejected(&self.peer, reason, severity));
        }
    }
}

impl Drop for SecureChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: SessionKey = [0x11u8; 32];

    fn shutdown_pair() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    fn channel_pair() -> (SecureChannel, SecureChannel, watch::Sender<bool>) {
        let (a, b) = FrameTransport::pair(16);
        let (tx, rx) = shutdown_pair();
        let left = SecureChannel::open("left", KEY, a, ChannelConfig::default(), rx.clone());
        let right = SecureChannel::open("right", KEY, b, ChannelConfig::default(), rx);
        (left, right, tx)
    }

    #[tokio::test]
    async fn test_send_receive() {
        let (left, right, _tx) = channel_pair();
        left.send(1, b"link up eth0").await.expect("send");
        let msg = right.receive(None).await.expect("receive");
        assert_eq!(msg.msg_type, 1);
        assert_eq!(msg.payload, b"link up eth0");
        assert_eq!(msg.sequence, 1);
    }

    #[tokio::test]
    async fn test_sequences_strictly_increase_on_send() {
        let (left, right, _tx) = channel_pair();
        for expected in 1..=5u64 {
            let seq = left.send(1, b"m").await.expect("send");
            assert_eq!(seq, expected);
            let msg = right.receive(None).await.expect("receive");
            assert_eq!(msg.sequence, expected);
        }
    }

    #[tokio::test]
    async fn test_replay_rejected() {
        let (a, b) = FrameTransport::pair(16);
        let (_tx, rx) = shutdown_pair();
        let receiver = SecureChannel::open("daemon", KEY, b, ChannelConfig::default(), rx);

        // Raw frames injected out-of-band to simulate a captured replay
        let frame = codec::encode(1, 3, b"configure", &KEY);
        a.tx.send(frame.clone()).await.unwrap();
        receiver.receive(None).await.expect("first delivery");

        a.tx.send(frame).await.unwrap();
        match receiver.receive(None).await {
            Err(ChannelError::ReplayRejected { sequence: 3, last_seen: 3 }) => {}
            other => panic!("expected replay rejection, got {:?}", other.map(|m| m.sequence)),
        }

        // Lower sequence also rejected
        a.tx.send(codec::encode(1, 2, b"older", &KEY)).await.unwrap();
        assert!(matches!(
            receiver.receive(None).await,
            Err(ChannelError::ReplayRejected { .. })
        ));

        // Forward gap accepted: strict +1 is not required
        a.tx.send(codec::encode(1, 10, b"newer", &KEY)).await.unwrap();
        let msg = receiver.receive(None).await.expect("gap accepted");
        assert_eq!(msg.sequence, 10);
    }

    #[tokio::test]
    async fn test_receive_timeout() {
        let (_left, right, _tx) = channel_pair();
        let result = right.receive(Some(Duration::from_millis(20))).await;
        assert!(matches!(result, Err(ChannelError::ChannelTimeout)));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_receive() {
        let (_left, right, tx) = channel_pair();
        let handle = tokio::spawn(async move {
            right.receive(Some(Duration::from_secs(30))).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(ChannelError::Cancelled)));
    }

    #[tokio::test]
    async fn test_idle_session_closed() {
        let (a, b) = FrameTransport::pair(4);
        let (_tx, rx) = shutdown_pair();
        let config = ChannelConfig {
            receive_timeout: Duration::from_millis(50),
            idle_timeout: Duration::from_millis(10),
        };
        let receiver = SecureChannel::open("daemon", KEY, b, config, rx);
        tokio::time::sleep(Duration::from_millis(30)).await;

        a.tx.send(codec::encode(1, 1, b"late", &KEY)).await.unwrap();
        assert!(matches!(
            receiver.receive(None).await,
            Err(ChannelError::SessionClosed)
        ));
        assert!(receiver.is_closed());
    }

    #[tokio::test]
    async fn test_oversized_payload_refused() {
        let (left, _right, _tx) = channel_pair();
        let big = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            left.send(1, &big).await,
            Err(ChannelError::PayloadTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_tampered_frame_is_auth_failure_not_replay() {
        let (a, b) = FrameTransport::pair(4);
        let (_tx, rx) = shutdown_pair();
        let receiver = SecureChannel::open("daemon", KEY, b, ChannelConfig::default(), rx);

        let mut frame = codec::encode(1, 1, b"payload", &KEY);
        frame[HEADER_TAMPER_OFFSET] ^= 0x01;
        a.tx.send(frame).await.unwrap();
        assert!(matches!(
            receiver.receive(None).await,
            Err(ChannelError::Codec(CodecError::AuthenticationFailed))
        ));
        // Cursor untouched by the failure
        assert_eq!(receiver.last_sequence_seen().await, 0);
    }

    const HEADER_TAMPER_OFFSET: usize = codec::HEADER_LEN; // first payload byte

    #[tokio::test]
    async fn test_rejections_audited_and_auth_failures_rate_counted() {
        use crate::audit::AuditKind;

        let (a, b) = FrameTransport::pair(16);
        let (_tx, rx) = shutdown_pair();
        let audit = Arc::new(AuditSink::new());
        let rate = Arc::new(RateLimiter::with_defaults());
        let receiver = SecureChannel::open("daemon", KEY, b, ChannelConfig::default(), rx)
            .with_observers(Arc::clone(&audit), Arc::clone(&rate), 1000);

        // Forged tag: audited High, counted against the peer uid
        let other: SessionKey = [0x77u8; 32];
        a.tx.send(codec::encode(1, 1, b"forged", &other)).await.unwrap();
        assert!(matches!(
            receiver.receive(None).await,
            Err(ChannelError::Codec(CodecError::AuthenticationFailed))
        ));
        assert_eq!(rate.count_for(1000), Some(1));

        // Malformed frame: audited Medium, not a rate observation
        a.tx.send(vec![0u8; 4]).await.unwrap();
        assert!(receiver.receive(None).await.is_err());
        assert_eq!(rate.count_for(1000), Some(1));

        // Verbatim replay: audited High
        let frame = codec::encode(1, 1, b"real", &KEY);
        a.tx.send(frame.clone()).await.unwrap();
        receiver.receive(None).await.expect("original delivery");
        a.tx.send(frame).await.unwrap();
        assert!(matches!(
            receiver.receive(None).await,
            Err(ChannelError::ReplayRejected { .. })
        ));

        let records = audit.recent(8);
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.kind == AuditKind::ChannelRejected));
        assert_eq!(records[0].severity, Severity::High); // forged tag
        assert_eq!(records[0].detail["peer"], "daemon");
        assert_eq!(records[1].severity, Severity::Medium); // malformed
        assert_eq!(records[2].severity, Severity::High); // replay
    }

    #[tokio::test]
    async fn test_without_observers_rejections_still_fail_cleanly() {
        let (a, b) = FrameTransport::pair(4);
        let (_tx, rx) = shutdown_pair();
        let receiver = SecureChannel::open("daemon", KEY, b, ChannelConfig::default(), rx);

        let other: SessionKey = [0x77u8; 32];
        a.tx.send(codec::encode(1, 1, b"forged", &other)).await.unwrap();
        assert!(matches!(
            receiver.receive(None).await,
            Err(ChannelError::Codec(CodecError::AuthenticationFailed))
        ));
    }
}
