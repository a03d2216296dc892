//! Error types used by the connvisor components.
//!
//! - [`ConfigError`]: invalid configuration, raised at construction before any I/O.
//! - [`ComponentError`]: lifecycle failures surfaced to the host ([`App`](crate::App)).
//! - [`BrokerError`]: failures reported by the broker client collaborator.
//! - [`ChannelError`]: failures of [`Channel`](crate::amqp::Channel) operations.
//! - [`HandlerError`]: failures of user consumer callbacks.
//! - [`StoreError`]: failures reported by the key-value store collaborator.
//!
//! Every enum exposes `as_label()`: a short stable snake_case label for logs/metrics.

use std::time::Duration;
use thiserror::Error;

/// AMQP reply code for `PRECONDITION_FAILED`, sent when a declare conflicts with
/// the attributes of an existing queue or exchange.
pub const ATTRIBUTE_MISMATCH: u16 = 406;

/// # Invalid configuration.
///
/// Always fatal and always raised before a connection attempt is made.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Two or more channels share the same non-empty name.
    #[error("channel names are not unique: {names:?}")]
    DuplicateChannelNames {
        /// Every name that appears more than once.
        names: Vec<String>,
    },

    /// `connect_max_attempts` was zero.
    #[error("connect_max_attempts must be at least 1")]
    ZeroAttempts,

    /// Pool bounds are inverted or empty.
    #[error("invalid pool bounds: min={min} max={max}")]
    PoolBounds {
        /// Configured minimum pool size.
        min: usize,
        /// Configured maximum pool size.
        max: usize,
    },

    /// Connection URL/DSN is empty.
    #[error("connection url is empty")]
    EmptyUrl,

    /// Connection URL/DSN does not parse or names an unsupported scheme.
    #[error("invalid connection url {url}: {reason}")]
    InvalidUrl {
        /// The URL with any credentials masked.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// `connect_retry_delay` was zero.
    #[error("connect_retry_delay must be greater than zero")]
    ZeroRetryDelay,
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::DuplicateChannelNames { .. } => "config_duplicate_channel_names",
            ConfigError::ZeroAttempts => "config_zero_attempts",
            ConfigError::PoolBounds { .. } => "config_pool_bounds",
            ConfigError::EmptyUrl => "config_empty_url",
            ConfigError::InvalidUrl { .. } => "config_invalid_url",
            ConfigError::ZeroRetryDelay => "config_zero_retry_delay",
        }
    }
}

/// # Lifecycle errors surfaced to the hosting application.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ComponentError {
    /// `prepare()` exhausted its connect budget. The host must abort startup.
    #[error("could not connect to {target} after {attempts} attempts")]
    Connect {
        /// Masked URL/DSN of the unreachable service.
        target: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A channel failed while starting.
    #[error("channel start failed: {0}")]
    Channel(#[from] ChannelError),

    /// Store failure during a lifecycle step.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    /// Components did not stop within the grace period.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Components that had not finished stopping.
        stuck: Vec<String>,
    },

    /// Waiting for the shutdown signal failed.
    #[error("shutdown signal: {0}")]
    Signal(#[from] std::io::Error),
}

impl ComponentError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ComponentError::Connect { .. } => "component_connect_failed",
            ComponentError::Config(_) => "component_config",
            ComponentError::Channel(_) => "component_channel",
            ComponentError::Store(_) => "component_store",
            ComponentError::GraceExceeded { .. } => "component_grace_exceeded",
            ComponentError::Signal(_) => "component_signal",
        }
    }
}

/// # Failure reported by the broker client.
///
/// `code` carries the AMQP reply code when the broker closed the channel or
/// connection with one (e.g. [`ATTRIBUTE_MISMATCH`]).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BrokerError {
    /// AMQP reply code, if the failure carried one.
    pub code: Option<u16>,
    /// Human-readable description.
    pub message: String,
}

impl BrokerError {
    /// Failure without a reply code (I/O, closed socket, ...).
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Channel/connection closed by the broker with `code`.
    pub fn closed(code: u16, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// True if the broker rejected a declare because attributes differ.
    pub fn is_attribute_mismatch(&self) -> bool {
        self.code == Some(ATTRIBUTE_MISMATCH)
    }
}

/// # Errors produced by channel operations.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ChannelError {
    /// The channel has no open broker handle (not started or already stopped).
    #[error("channel is not open")]
    NotOpen,

    /// The channel has no connection to open a handle from.
    #[error("no broker connection")]
    NotConnected,

    /// `consume` was called on a channel that already has a registration.
    #[error("channel already consuming with tag {tag}")]
    AlreadyConsuming {
        /// Consumer tag of the active registration.
        tag: String,
    },

    /// The broker rejected or failed the operation.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// A channel setup hook failed.
    #[error("channel setup failed: {0}")]
    Setup(String),
}

impl ChannelError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ChannelError::NotOpen => "channel_not_open",
            ChannelError::NotConnected => "channel_not_connected",
            ChannelError::AlreadyConsuming { .. } => "channel_already_consuming",
            ChannelError::Broker(_) => "channel_broker",
            ChannelError::Setup(_) => "channel_setup",
        }
    }
}

/// # Errors returned by consumer callbacks.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum HandlerError {
    /// Processing failed.
    #[error("handler failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// A channel operation (ack/nack/publish) inside the handler failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl HandlerError {
    /// Convenience constructor for [`HandlerError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        HandlerError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            HandlerError::Fail { .. } => "handler_failed",
            HandlerError::Channel(_) => "handler_channel",
        }
    }
}

/// # Failure reported by the key-value store client or its pool.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Pool creation or connection failure.
    #[error("store connection failed: {0}")]
    Connection(String),

    /// The server replied with an error to a command.
    #[error("store command failed: {0}")]
    Command(String),

    /// The pool was used before `prepare()` or after `stop()`.
    #[error("store pool is not available")]
    PoolUnavailable,
}

impl StoreError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::Connection(_) => "store_connection",
            StoreError::Command(_) => "store_command",
            StoreError::PoolUnavailable => "store_pool_unavailable",
        }
    }
}
