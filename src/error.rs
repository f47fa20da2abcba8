use thiserror::Error;

/// Errors surfaced by the meshtap library.
///
/// Radio-side corruption never shows up here: bad frames are resynchronized inside
/// the decoder and undecodable payloads become `Unknown` packets.
#[derive(Debug, Error)]
pub enum MeshtapError {
    /// Wrapper around IO errors (serial handles, sockets, cache files).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be read, parsed or validated.
    #[error("configuration error: {0}")]
    Config(String),

    /// The streaming listener could not be bound. Fatal at startup.
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Serial device could not be opened or configured.
    #[cfg(feature = "serial")]
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),

    /// Wrapper around serde_json encode/decode errors (wire records, node cache).
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error (task join errors, unexpected conditions)
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, MeshtapError>;

#[cfg(feature = "serial")]
impl MeshtapError {
    /// Serial failures travel through the connector's `io::Result`; the kind is
    /// kept and the typed error stays reachable via `io::Error::get_ref`.
    pub(crate) fn serial_io(err: serialport::Error) -> std::io::Error {
        let kind = std::io::Error::from(err.clone()).kind();
        std::io::Error::new(kind, MeshtapError::Serial(err))
    }
}
