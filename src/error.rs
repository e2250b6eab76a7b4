/*!
 * Error hierarchy
 *
 * One typed enum covering every way a command's completion, or the
 * connection itself, can fail. Library code returns this type rather
 * than `anyhow::Error` since callers need to match on failure kind
 * (a `RemoteError` leaves the connection healthy; a `Protocol` error
 * does not).
 */

use bytes::Bytes;

#[derive(Debug, thiserror::Error)]
pub enum RedisError {
    /// The server produced bytes that are not valid RESP: an unknown
    /// type byte, a malformed numeric field, or a negative length other
    /// than `-1`. Fatal to the connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A `-` reply from the server. Delivered only to the completion
    /// that issued the failing command; the connection remains healthy.
    #[error("{}", String::from_utf8_lossy(.0))]
    RemoteError(Bytes),

    /// The transport became inactive (peer close, network error, or a
    /// local `disconnect`/`shutdown`). Delivered to every remaining
    /// in-flight completion, in FIFO order.
    #[error("connection closed")]
    ConnectionClosed,

    /// `submit` was called while the connection is in channel mode.
    #[error("cannot submit commands while in channel mode")]
    ModeViolation,

    /// A reply arrived with no completion waiting, or channel-mode
    /// traffic had an unexpected shape. Not delivered to a user
    /// callback; surfaced to whatever observes the reactor thread.
    #[error("protocol invariant violated: {0}")]
    InvariantViolation(String),

    /// A failure prior to having a connection at all: DNS resolution,
    /// `connect()`, or a failed non-blocking socket setup call.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RedisError {
    pub fn remote(text: impl Into<Bytes>) -> Self {
        RedisError::RemoteError(text.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        RedisError::Protocol(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        RedisError::InvariantViolation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, RedisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_display_is_verbatim_text() {
        let err = RedisError::remote(Bytes::from_static(b"WRONGTYPE bad op"));
        assert_eq!(err.to_string(), "WRONGTYPE bad op");
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: RedisError = io_err.into();
        assert!(matches!(err, RedisError::Io(_)));
    }
}
