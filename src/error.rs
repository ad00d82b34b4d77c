use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::types::PeerId;

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Smoothing factor outside `(0, 1]`
    #[error("smoothing alpha must be in (0, 1], got {0}")]
    SmoothingAlpha(f32),

    /// Sync interval of zero
    #[error("sync interval must be non-zero")]
    ZeroSyncInterval,

    /// Resync interval of zero
    #[error("resync interval must be non-zero")]
    ZeroResyncInterval,

    /// Response timeout of zero
    #[error("response timeout must be non-zero")]
    ZeroResponseTimeout,

    /// Log interval of zero
    #[error("log interval must be non-zero")]
    ZeroLogInterval,

    /// Response timeout would overlap the next attempt
    #[error("response timeout {timeout_ms}ms must be shorter than interval {interval_ms}ms")]
    ResponseTimeoutTooLong {
        /// Configured response timeout
        timeout_ms: u32,
        /// The shorter of the sync and resync intervals
        interval_ms: u32,
    },

    /// Configuration replaced while a session is running
    #[error("configuration cannot be replaced while sync is running")]
    Running,

    /// Serialized configuration could not be parsed
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Transport bring-up and I/O errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Radio or socket could not be brought up
    #[error("transport setup failed: {message}")]
    Setup {
        /// Description of the failure
        message: String,
    },

    /// Address cannot be expressed as a peer identity
    #[error("unsupported peer address: {0}")]
    UnsupportedAddress(SocketAddr),

    /// Socket error
    #[error("network error: {0}")]
    Io(#[from] io::Error),
}

/// Errors returned by [`ClockSyncEngine::initialize`](crate::ClockSyncEngine::initialize)
#[derive(Debug, Error)]
pub enum InitError {
    /// Engine was already initialized
    #[error("engine already initialized")]
    AlreadyInitialized,

    /// Configuration failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// Client role requires the master's identity
    #[error("client role requires a master peer identity")]
    MissingPeer,

    /// Transport could not be brought up
    #[error("transport setup failed: {0}")]
    TransportSetup(#[from] TransportError),

    /// Master peer could not be registered with the transport
    #[error("failed to register peer {peer}")]
    PeerRegistration {
        /// The peer that was rejected
        peer: PeerId,
    },
}

/// Wire decoding errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MessageError {
    /// Payload length does not match the message kind
    #[error("wrong message size: expected {expected} bytes, got {actual}")]
    WrongSize {
        /// Exact size of the expected message
        expected: usize,
        /// Size actually received
        actual: usize,
    },
}

/// Pulse scheduler configuration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PulseError {
    /// Pulse interval of zero
    #[error("pulse interval must be non-zero")]
    ZeroInterval,

    /// Pulse would not fit inside its interval
    #[error("pulse width {pulse_width_us}us must be shorter than interval {interval_us}us")]
    PulseTooWide {
        /// Requested pulse width
        pulse_width_us: u64,
        /// Requested interval
        interval_us: u64,
    },

    /// Reconfiguration attempted while the pulse train is active
    #[error("pulse scheduler is running; stop it before reconfiguring")]
    Running,
}

/// Errors that can occur anywhere in the crate
#[derive(Debug, Error)]
pub enum TimeSyncError {
    /// Initialization error
    #[error(transparent)]
    Init(#[from] InitError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Malformed message
    #[error(transparent)]
    Message(#[from] MessageError),

    /// Pulse scheduler error
    #[error(transparent)]
    Pulse(#[from] PulseError),
}

impl TimeSyncError {
    /// Check if retrying the failed operation can succeed without changing inputs
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport(TransportError::Io(_) | TransportError::Setup { .. })
                | Self::Init(InitError::TransportSetup(_) | InitError::PeerRegistration { .. })
                | Self::Config(ConfigError::Running)
                | Self::Pulse(PulseError::Running)
        )
    }
}

/// Result type alias for crate operations
pub type Result<T> = std::result::Result<T, TimeSyncError>;
