//! WebSocket read error classification shared by server and client

use tokio_tungstenite::tungstenite::Error as WsError;

/// Classify a read error: `true` means the peer is gone and the read loop must
/// end, `false` means the frame is lost but the socket is still usable.
///
/// ```rust
/// use tokio_tungstenite::tungstenite::Error as WsError;
/// use wsrpc_core::is_connection_gone;
///
/// assert!(is_connection_gone(&WsError::ConnectionClosed));
/// assert!(!is_connection_gone(&WsError::Utf8));
/// ```
pub fn is_connection_gone(err: &WsError) -> bool {
    !matches!(
        err,
        WsError::Capacity(_) | WsError::Utf8 | WsError::WriteBufferFull(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::error::{CapacityError, ProtocolError};

    #[test]
    fn test_gone_errors() {
        assert!(is_connection_gone(&WsError::ConnectionClosed));
        assert!(is_connection_gone(&WsError::AlreadyClosed));
        assert!(is_connection_gone(&WsError::Io(std::io::ErrorKind::ConnectionReset.into())));
        assert!(is_connection_gone(&WsError::Protocol(
            ProtocolError::ResetWithoutClosingHandshake
        )));
    }

    #[test]
    fn test_transient_errors() {
        assert!(!is_connection_gone(&WsError::Utf8));
        assert!(!is_connection_gone(&WsError::Capacity(CapacityError::MessageTooLong {
            size: 10,
            max_size: 5,
        })));
    }
}
