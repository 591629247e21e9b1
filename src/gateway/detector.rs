//! Protocol detection
//!
//! [`DetectionSession`] is the synchronous state machine: bytes go in, and it
//! reports whether the connection is still undecided, matched and snooping,
//! ready to relay, or rejected. It never performs I/O, so split-read and
//! ceiling behaviour can be tested byte by byte.
//!
//! [`Detector`] drives a session from a [`Connection`](crate::transport::Connection)
//! until it reaches a terminal state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use crate::codec::DecodeError;
use crate::common::{GatewayError, Result};
use crate::protocol::{ConnectionParameters, MatchResult, ProtocolDescriptor, Snoop, Snooper};

/// Why a session gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No candidate left, or the ceiling was reached without a match
    NoProtocolMatched,
    /// The matched protocol's handshake violated its grammar
    Malformed {
        protocol: &'static str,
        error: DecodeError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Still comparing candidates
    Detecting,
    /// A protocol matched; its snooper waits for the rest of the handshake
    Matched(&'static str),
    /// Handshake read; the connection can be handed to a backend
    Relaying(ConnectionParameters),
    Rejected(Rejection),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Relaying(_) | Self::Rejected(_))
    }
}

/// Detection state of one connection
#[derive(Debug)]
pub struct DetectionSession {
    descriptors: Arc<[ProtocolDescriptor]>,
    /// Indices into `descriptors`, in priority order
    candidates: Vec<usize>,
    ceiling: usize,
    buffer: BytesMut,
    snooper: Option<Snooper>,
    state: SessionState,
}

impl DetectionSession {
    /// Start a session over the enabled protocols
    ///
    /// # Parameters
    ///
    /// * `descriptors` - Enabled protocols in priority order
    /// * `max_identification_length` - Global ceiling on buffered bytes before a match
    pub fn new(descriptors: Arc<[ProtocolDescriptor]>, max_identification_length: usize) -> Self {
        let protocol_max = descriptors
            .iter()
            .map(ProtocolDescriptor::max_identification_length)
            .max()
            .unwrap_or(0);
        let candidates = (0..descriptors.len()).collect();

        Self {
            descriptors,
            candidates,
            ceiling: max_identification_length.min(protocol_max),
            buffer: BytesMut::new(),
            snooper: None,
            state: SessionState::Detecting,
        }
    }

    /// Bytes buffered before a match is forced
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The matched protocol, if detection got that far
    pub fn protocol(&self) -> Option<&'static str> {
        match &self.state {
            SessionState::Matched(protocol) => Some(*protocol),
            SessionState::Relaying(params) => Some(params.protocol()),
            SessionState::Rejected(Rejection::Malformed { protocol, .. }) => Some(*protocol),
            SessionState::Detecting | SessionState::Rejected(Rejection::NoProtocolMatched) => None,
        }
    }

    /// Everything read from the client so far
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Append client bytes and advance
    ///
    /// Feeding a terminal session has no effect.
    pub fn feed(&mut self, bytes: &[u8]) -> &SessionState {
        if self.state.is_terminal() {
            return &self.state;
        }
        self.buffer.extend_from_slice(bytes);

        if self.state == SessionState::Detecting {
            self.identify();
        }
        if matches!(self.state, SessionState::Matched(_)) {
            self.snoop();
        }
        &self.state
    }

    fn identify(&mut self) {
        let mut undecided = false;
        let mut winner = None;
        let mut deferred = None;
        let mut remaining = Vec::with_capacity(self.candidates.len());

        for &index in &self.candidates {
            match self.descriptors[index].matches(&self.buffer) {
                MatchResult::NoMatch => {}
                // A higher priority protocol that is still undecided blocks this one
                MatchResult::Matched if !undecided => {
                    winner = Some(index);
                    break;
                }
                MatchResult::Matched => {
                    deferred.get_or_insert(index);
                    remaining.push(index);
                }
                MatchResult::NeedMore => {
                    undecided = true;
                    remaining.push(index);
                }
            }
        }

        if let Some(index) = winner {
            return self.select(index);
        }
        if self.buffer.len() >= self.ceiling {
            // Protocols still undecided at the ceiling lose to a settled match
            if let Some(index) = deferred {
                return self.select(index);
            }
            remaining.clear();
        }

        self.candidates = remaining;
        if self.candidates.is_empty() {
            trace!("No protocol matched {:02x?}", &self.buffer[..self.buffer.len().min(self.ceiling)]);
            self.state = SessionState::Rejected(Rejection::NoProtocolMatched);
        }
    }

    fn select(&mut self, index: usize) {
        let descriptor = &self.descriptors[index];
        debug!("Matched {} after {} bytes", descriptor.name(), self.buffer.len());
        self.snooper = Some(descriptor.snooper());
        self.candidates.clear();
        self.state = SessionState::Matched(descriptor.name());
    }

    fn snoop(&mut self) {
        let SessionState::Matched(protocol) = self.state else {
            return;
        };
        let Some(snooper) = self.snooper.as_mut() else {
            return;
        };

        match snooper.snoop(&self.buffer) {
            Ok(Some(params)) => {
                debug!("{} handshake read: {:?}", protocol, params.virtual_host());
                self.snooper = None;
                self.state = SessionState::Relaying(params);
            }
            Ok(None) => {}
            Err(error) => {
                debug!("Malformed {} handshake: {}", protocol, error);
                self.snooper = None;
                self.state = SessionState::Rejected(Rejection::Malformed { protocol, error });
            }
        }
    }

    /// Consume the session
    ///
    /// Returns the parameters and the buffered prefix once relaying, the
    /// rejection as an error, and `ConnectionClosed` for an unfinished session.
    pub fn finish(self) -> Result<(ConnectionParameters, Bytes)> {
        let buffered = self.buffer.len();
        match self.state {
            SessionState::Relaying(params) => Ok((params, self.buffer.freeze())),
            SessionState::Rejected(Rejection::NoProtocolMatched) => {
                Err(GatewayError::NoProtocolMatched { buffered })
            }
            SessionState::Rejected(Rejection::Malformed { protocol, error }) => {
                Err(GatewayError::MalformedHandshake { protocol, source: error })
            }
            SessionState::Detecting | SessionState::Matched(_) => {
                Err(GatewayError::ConnectionClosed { buffered })
            }
        }
    }
}

/// Outcome of a successful detection
#[derive(Debug, Clone)]
pub struct Detected {
    pub protocol: &'static str,
    pub params: ConnectionParameters,
    /// Bytes read during detection, to be replayed to the backend
    pub prefix: Bytes,
    pub elapsed: Duration,
}

/// What was learned about a connection, whether or not detection succeeded
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectionTrace {
    pub protocol: Option<&'static str>,
    pub elapsed: Duration,
}

/// Reads from a connection until its protocol and parameters are known
#[derive(Debug, Clone)]
pub struct Detector {
    descriptors: Arc<[ProtocolDescriptor]>,
    max_identification_length: usize,
    detection_timeout: Option<Duration>,
    read_size: usize,
}

impl Detector {
    pub fn new(descriptors: Arc<[ProtocolDescriptor]>, max_identification_length: usize) -> Self {
        Self {
            descriptors,
            max_identification_length,
            detection_timeout: None,
            read_size: 4096,
        }
    }

    /// Bound the whole detection, handshake included
    pub fn with_timeout(mut self, detection_timeout: Option<Duration>) -> Self {
        self.detection_timeout = detection_timeout;
        self
    }

    /// Size of each read from the client
    pub fn with_read_size(mut self, read_size: usize) -> Self {
        self.read_size = read_size.max(1);
        self
    }

    pub fn descriptors(&self) -> &Arc<[ProtocolDescriptor]> {
        &self.descriptors
    }

    /// A fresh session for one connection
    pub fn session(&self) -> DetectionSession {
        DetectionSession::new(Arc::clone(&self.descriptors), self.max_identification_length)
    }

    /// Detect the protocol of a connection
    ///
    /// # Parameters
    ///
    /// * `conn` - Client connection; only read from
    ///
    /// # Returns
    ///
    /// The matched protocol, its connection parameters and the consumed prefix
    pub async fn detect<C>(&self, conn: &mut C) -> Result<Detected>
    where
        C: AsyncRead + Unpin,
    {
        self.detect_traced(conn).await.0
    }

    /// Like [`detect`](Self::detect), also reporting how far detection got
    ///
    /// The trace is filled on failure too: a malformed handshake still names
    /// its protocol, and the elapsed time covers every outcome.
    pub async fn detect_traced<C>(&self, conn: &mut C) -> (Result<Detected>, DetectionTrace)
    where
        C: AsyncRead + Unpin,
    {
        let started = Instant::now();
        let mut session = self.session();

        let read = match self.detection_timeout {
            Some(limit) => timeout(limit, self.read_until_decided(conn, &mut session))
                .await
                .map_err(|_| GatewayError::DetectionTimeout(limit))
                .and_then(|read| read),
            None => self.read_until_decided(conn, &mut session).await,
        };

        let elapsed = started.elapsed();
        let trace = DetectionTrace {
            protocol: session.protocol(),
            elapsed,
        };
        let detected = read.and_then(|()| session.finish()).map(|(params, prefix)| Detected {
            protocol: params.protocol(),
            params,
            prefix,
            elapsed,
        });
        (detected, trace)
    }

    async fn read_until_decided<C>(&self, conn: &mut C, session: &mut DetectionSession) -> Result<()>
    where
        C: AsyncRead + Unpin,
    {
        let mut chunk = vec![0u8; self.read_size];
        loop {
            let n = conn.read(&mut chunk).await?;
            if n == 0 {
                // `finish` reports the unfinished session
                return Ok(());
            }
            trace!("Detection read {} bytes: {:02x?}", n, &chunk[..n]);
            if session.feed(&chunk[..n]).is_terminal() {
                return Ok(());
            }
        }
    }
}
