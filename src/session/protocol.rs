// SPDX-License-Identifier: MPL-2.0

//! JSON control messages received on a peer's data channel
//!
//! ```json
//! { "type": "cmd", "cmd": "sendfile", "file": { "name": "a.bin", "size": 4 } }
//! ```
//!
//! The `type` member names another member; a file transfer starts when that
//! member is the string `"sendfile"`.

use crate::errors::ProtocolError;
use serde::Deserialize;
use serde_json::Value;

const SEND_FILE: &str = "sendfile";

/// File announced by the remote peer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileOffer {
    pub name: String,
    #[serde(default)]
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    SendFile(FileOffer),
    /// Well-formed message with an unsupported command; carries the `type` value
    Unknown(String),
}

pub fn parse_control_message(text: &str) -> Result<ControlMessage, ProtocolError> {
    let root: Value = serde_json::from_str(text)?;
    let Value::Object(object) = root else {
        return Err(ProtocolError::NotAnObject);
    };
    let Some(kind) = object.get("type").and_then(Value::as_str) else {
        return Err(ProtocolError::MissingType);
    };

    if object.get(kind).and_then(Value::as_str) != Some(SEND_FILE) {
        return Ok(ControlMessage::Unknown(kind.to_string()));
    }

    let file = object
        .get("file")
        .cloned()
        .ok_or_else(|| ProtocolError::InvalidFile("missing \"file\" member".to_string()))?;
    let offer: FileOffer =
        serde_json::from_value(file).map_err(|err| ProtocolError::InvalidFile(err.to_string()))?;
    Ok(ControlMessage::SendFile(offer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sendfile_via_indirect_key() {
        let msg = r#"{"type":"cmd","cmd":"sendfile","file":{"name":"a.bin","size":4}}"#;
        assert_eq!(
            parse_control_message(msg).unwrap(),
            ControlMessage::SendFile(FileOffer {
                name: "a.bin".into(),
                size: 4,
            })
        );
    }

    #[test]
    fn test_missing_size_defaults_to_zero() {
        let msg = r#"{"type":"op","op":"sendfile","file":{"name":"x"}}"#;
        let ControlMessage::SendFile(offer) = parse_control_message(msg).unwrap() else {
            panic!("expected a file offer");
        };
        assert_eq!(offer.size, 0);
    }

    #[test]
    fn test_other_commands_are_unknown() {
        let msg = r#"{"type":"cmd","cmd":"ping"}"#;
        assert_eq!(
            parse_control_message(msg).unwrap(),
            ControlMessage::Unknown("cmd".into())
        );
    }

    #[test]
    fn test_malformed_messages() {
        assert!(matches!(parse_control_message("{oops"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(parse_control_message("[1,2]"), Err(ProtocolError::NotAnObject)));
        assert!(matches!(parse_control_message(r#"{"cmd":"sendfile"}"#), Err(ProtocolError::MissingType)));
        assert!(matches!(
            parse_control_message(r#"{"type":"cmd","cmd":"sendfile"}"#),
            Err(ProtocolError::InvalidFile(_))
        ));
    }
}
