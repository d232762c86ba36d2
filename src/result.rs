/// Common result type
pub type Result<T> = core::result::Result<T, Error>;

/// Error classes driving the session's recovery policy.
///
/// Transport errors put the session back into `Disconnected` and are retried
/// with backoff. Protocol and integrity errors drop the offending frame and
/// continue. Logging errors skip the sample. None of them is fatal to the
/// process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Link-level failure (connect, subscribe, write, link drop)
    Transport,
    /// Malformed frame
    Protocol,
    /// Checksum mismatch
    Integrity,
    /// Sample persistence failure
    Logging,
    /// Everything else (formatting, bad settings)
    Other,
}

/// Common error type
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Input/output error
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
    /// Bluetooth error
    #[error("Bluetooth: {0}")]
    Bt(#[from] btleplug::Error),
    /// Timeout reached
    #[error("Timeout")]
    Timeout,
    /// Device, service or characteristic not found
    #[error("Not found")]
    NotFound,
    /// Connection lost
    #[error("Connection lost")]
    LostConnection,
    /// Frame shorter than the minimal frame length
    #[error("Frame too short: {0} bytes")]
    ShortFrame(usize),
    /// Missing start or end marker
    #[error("Bad frame markers")]
    BadMarker,
    /// Unknown frame type byte
    #[error("Unknown frame type: {0:#04x}")]
    UnknownFrameKind(u8),
    /// Payload shorter than the selected field layout
    #[error("Truncated payload: need {need} bytes, have {have}")]
    TruncatedPayload { need: usize, have: usize },
    /// Embedded checksum does not match the computed one
    #[error("Invalid checksum: embedded {embedded:#06x}, computed {computed:#06x}")]
    BadChecksum { embedded: u16, computed: u16 },
    /// Sample persistence failure
    #[error("Logging error: {0}")]
    Logging(#[source] std::io::Error),
    /// Json format error
    #[cfg(feature = "json")]
    #[error("JSON format error: {0}")]
    JsonEnc(#[from] serde_json::Error),
    /// Yaml format error
    #[cfg(feature = "yaml")]
    #[error("YAML format error: {0}")]
    YamlEnc(#[from] serde_yaml::Error),
    /// Toml format error
    #[cfg(feature = "toml")]
    #[error("TOML format error: {0}")]
    TomlEnc(#[from] serde_toml::ser::Error),
}

impl Error {
    /// Classify for the per-kind handling policy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Bt(_) | Self::Timeout | Self::NotFound | Self::LostConnection => {
                ErrorKind::Transport
            }
            Self::ShortFrame(_)
            | Self::BadMarker
            | Self::UnknownFrameKind(_)
            | Self::TruncatedPayload { .. } => ErrorKind::Protocol,
            Self::BadChecksum { .. } => ErrorKind::Integrity,
            Self::Logging(_) => ErrorKind::Logging,
            #[allow(unreachable_patterns)]
            _ => ErrorKind::Other,
        }
    }

    /// Whether the session has to drop the link and reconnect
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}
