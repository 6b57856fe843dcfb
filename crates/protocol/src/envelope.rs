//! JSON codec for [`PeerMessage`].
//!
//! Transports that carry text frames use [`encode`]/[`decode`]; transports
//! that carry structured values pass [`PeerMessage`] through unchanged.

use crate::messages::PeerMessage;

/// Errors produced while encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("message has no type field")]
    MissingType,

    /// A chunk count or index that does not fit the 32-bit wire field.
    #[error("chunk layout value {0} does not fit in 32 bits")]
    LayoutOverflow(u64),
}

/// Serializes a message to its JSON wire form.
pub fn encode(msg: &PeerMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(msg)?)
}

/// Parses a JSON wire frame.
///
/// Distinguishes an unknown `type` from a malformed payload so callers can
/// ignore messages from newer peers.
pub fn decode(text: &str) -> Result<PeerMessage, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let type_name = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(ProtocolError::MissingType)?
        .to_string();
    serde_json::from_value(value).map_err(|e| {
        if e.to_string().starts_with("unknown variant") {
            ProtocolError::UnknownType(type_name)
        } else {
            ProtocolError::Json(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{DisconnectNotification, KeepAlive};

    #[test]
    fn encode_decode_keep_alive() {
        let msg = PeerMessage::KeepAlive(KeepAlive {
            timestamp: 42,
            peer_id: "peer-a".into(),
        });
        let text = encode(&msg).unwrap();
        assert_eq!(text, r#"{"type":"keep-alive","timestamp":42,"peerId":"peer-a"}"#);
        assert_eq!(decode(&text).unwrap(), msg);
    }

    #[test]
    fn decode_disconnect_without_timestamp() {
        let msg = decode(r#"{"type":"disconnect-notification","peerId":"peer-a"}"#).unwrap();
        assert_eq!(
            msg,
            PeerMessage::DisconnectNotification(DisconnectNotification {
                peer_id: "peer-a".into(),
                timestamp: 0,
            })
        );
    }

    #[test]
    fn decode_unknown_type() {
        let err = decode(r#"{"type":"stream-start","fileId":"f"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(t) if t == "stream-start"));
    }

    #[test]
    fn decode_missing_type() {
        let err = decode(r#"{"fileId":"f"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingType));
    }

    #[test]
    fn decode_malformed_payload() {
        let err = decode(r#"{"type":"file-chunk","fileId":"f","data":"!!","offset":0,"total":1}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));
    }
}
