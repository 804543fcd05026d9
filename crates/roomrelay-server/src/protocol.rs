//! JSON frames exchanged with chat clients.
//!
//! Every frame is a JSON object with a `type` discriminator. Clients send
//! `join` (first frame only) and `chat`; the server sends `system`, `chat`
//! and `error`. Fields that should be strings are accepted as any JSON
//! value and stringified, so `{"code": 123}` joins room `"123"`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{DisplayName, InvalidRoomCode, RoomCode};

/// Error text sent before closing a connection whose join code was refused.
pub const INVALID_CODE_MESSAGE: &str = "Invalid code (use letters/numbers, length 1–10)";

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Membership notice (`"<name> joined"`, `"<name> left"`).
    System {
        /// Human-readable notice.
        message: String,
        /// Room the notice concerns.
        code: RoomCode,
    },
    /// A relayed chat message.
    Chat {
        /// Sender's display name.
        name: DisplayName,
        /// Trimmed message text.
        text: String,
    },
    /// Sent once before a join is refused.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl ServerFrame {
    /// The error frame for a refused room code.
    pub fn invalid_code() -> Self {
        Self::Error {
            message: INVALID_CODE_MESSAGE.to_owned(),
        }
    }

    /// Serialize to the JSON text written on the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frames sent by clients. Unknown `type` values land in `Other`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame {
    Join {
        #[serde(default)]
        code: Value,
        #[serde(default)]
        name: Value,
    },
    Chat {
        #[serde(default)]
        text: Value,
    },
    #[serde(other)]
    Other,
}

/// A frame that could not be read as a client frame at all.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Not valid JSON.
    #[error("invalid frame: {0}")]
    Json(#[from] serde_json::Error),
    /// Valid JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// Object without a string `type` field.
    #[error("frame has no string `type` field")]
    MissingType,
}

/// Why a first frame did not produce a membership.
#[derive(Debug, Error)]
pub enum JoinError {
    /// Undecodable first frame.
    #[error(transparent)]
    Malformed(#[from] FrameError),
    /// Decodable, but not `type: "join"`.
    #[error("first frame must be a join")]
    UnexpectedType,
    /// Join with a code that failed validation.
    #[error(transparent)]
    InvalidCode(#[from] InvalidRoomCode),
}

/// A validated join request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// Room to join.
    pub code: RoomCode,
    /// Normalized display name.
    pub name: DisplayName,
}

fn decode(raw: &str) -> Result<ClientFrame, FrameError> {
    let value: Value = serde_json::from_str(raw)?;
    let Some(object) = value.as_object() else {
        return Err(FrameError::NotAnObject);
    };
    // serde would otherwise accept an integer tag as a variant index
    if !object.get("type").is_some_and(Value::is_string) {
        return Err(FrameError::MissingType);
    }
    Ok(serde_json::from_value(value)?)
}

/// Strings as-is, `null`/missing as empty, anything else as its JSON text.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Interpret the first frame of a connection.
pub fn decode_join(raw: &str) -> Result<JoinRequest, JoinError> {
    match decode(raw)? {
        ClientFrame::Join { code, name } => Ok(JoinRequest {
            code: RoomCode::parse(&stringify(&code))?,
            name: DisplayName::normalize(&stringify(&name)),
        }),
        ClientFrame::Chat { .. } | ClientFrame::Other => Err(JoinError::UnexpectedType),
    }
}

/// Interpret a frame from a joined client.
///
/// Returns the trimmed text of a non-empty chat frame, `None` for any other
/// frame type or for empty text.
pub fn decode_chat(raw: &str) -> Result<Option<String>, FrameError> {
    match decode(raw)? {
        ClientFrame::Chat { text } => {
            let text = stringify(&text);
            let text = text.trim();
            Ok((!text.is_empty()).then(|| text.to_owned()))
        }
        ClientFrame::Join { .. } | ClientFrame::Other => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_with_name() {
        let req = decode_join(r#"{"type":"join","code":"abc","name":"Ann"}"#).unwrap();
        assert_eq!(req.code.as_str(), "abc");
        assert_eq!(req.name.as_str(), "Ann");
    }

    #[test]
    fn join_without_name_is_anonymous() {
        let req = decode_join(r#"{"type":"join","code":"abc"}"#).unwrap();
        assert_eq!(req.name.as_str(), "Anonymous");
    }

    #[test]
    fn join_null_name_is_anonymous() {
        let req = decode_join(r#"{"type":"join","code":"abc","name":null}"#).unwrap();
        assert_eq!(req.name.as_str(), "Anonymous");
    }

    #[test]
    fn join_numeric_code_is_stringified() {
        let req = decode_join(r#"{"type":"join","code":123}"#).unwrap();
        assert_eq!(req.code.as_str(), "123");
    }

    #[test]
    fn join_trims_code() {
        let req = decode_join(r#"{"type":"join","code":"  xyz  "}"#).unwrap();
        assert_eq!(req.code.as_str(), "xyz");
    }

    #[test]
    fn join_extra_fields_ignored() {
        let req = decode_join(r#"{"type":"join","code":"a","name":"b","color":"red"}"#).unwrap();
        assert_eq!(req.code.as_str(), "a");
    }

    #[test]
    fn join_missing_code_is_invalid() {
        assert!(matches!(
            decode_join(r#"{"type":"join"}"#),
            Err(JoinError::InvalidCode(InvalidRoomCode::Empty))
        ));
    }

    #[test]
    fn join_long_code_is_invalid() {
        assert!(matches!(
            decode_join(r#"{"type":"join","code":"abcdefghijk"}"#),
            Err(JoinError::InvalidCode(InvalidRoomCode::TooLong(11)))
        ));
    }

    #[test]
    fn join_object_code_is_invalid() {
        assert!(matches!(
            decode_join(r#"{"type":"join","code":{"a":1}}"#),
            Err(JoinError::InvalidCode(_))
        ));
    }

    #[test]
    fn first_frame_chat_is_unexpected() {
        assert!(matches!(
            decode_join(r#"{"type":"chat","text":"hi"}"#),
            Err(JoinError::UnexpectedType)
        ));
    }

    #[test]
    fn first_frame_unknown_type_is_unexpected() {
        assert!(matches!(
            decode_join(r#"{"type":"ping"}"#),
            Err(JoinError::UnexpectedType)
        ));
    }

    #[test]
    fn first_frame_not_json_is_malformed() {
        assert!(matches!(
            decode_join("hello"),
            Err(JoinError::Malformed(FrameError::Json(_)))
        ));
    }

    #[test]
    fn first_frame_array_is_malformed() {
        assert!(matches!(
            decode_join(r#"["join","abc"]"#),
            Err(JoinError::Malformed(FrameError::NotAnObject))
        ));
    }

    #[test]
    fn first_frame_without_type_is_malformed() {
        assert!(matches!(
            decode_join(r#"{"code":"abc"}"#),
            Err(JoinError::Malformed(FrameError::MissingType))
        ));
    }

    #[test]
    fn first_frame_numeric_type_is_malformed() {
        assert!(matches!(
            decode_join(r#"{"type":0,"code":"abc"}"#),
            Err(JoinError::Malformed(FrameError::MissingType))
        ));
    }

    #[test]
    fn chat_text_is_trimmed() {
        assert_eq!(
            decode_chat(r#"{"type":"chat","text":"  hi there  "}"#).unwrap(),
            Some("hi there".to_owned())
        );
    }

    #[test]
    fn chat_empty_or_missing_text_is_none() {
        assert_eq!(decode_chat(r#"{"type":"chat","text":"   "}"#).unwrap(), None);
        assert_eq!(decode_chat(r#"{"type":"chat"}"#).unwrap(), None);
        assert_eq!(decode_chat(r#"{"type":"chat","text":null}"#).unwrap(), None);
    }

    #[test]
    fn chat_numeric_text_is_stringified() {
        assert_eq!(
            decode_chat(r#"{"type":"chat","text":42}"#).unwrap(),
            Some("42".to_owned())
        );
    }

    #[test]
    fn non_chat_frames_after_join_are_none() {
        assert_eq!(decode_chat(r#"{"type":"join","code":"b"}"#).unwrap(), None);
        assert_eq!(decode_chat(r#"{"type":"typing"}"#).unwrap(), None);
    }

    #[test]
    fn chat_garbage_is_error() {
        assert!(decode_chat("{not json").is_err());
    }

    #[test]
    fn server_frames_serialize_with_type_tag() {
        let code = RoomCode::parse("abc").unwrap();
        let system = ServerFrame::System {
            message: "Ann joined".into(),
            code,
        };
        assert_eq!(
            serde_json::to_value(&system).unwrap(),
            json!({"type": "system", "message": "Ann joined", "code": "abc"})
        );

        let chat = ServerFrame::Chat {
            name: DisplayName::normalize("Ann"),
            text: "hello".into(),
        };
        assert_eq!(
            serde_json::to_value(&chat).unwrap(),
            json!({"type": "chat", "name": "Ann", "text": "hello"})
        );
    }

    #[test]
    fn invalid_code_frame_text() {
        let value = serde_json::to_value(ServerFrame::invalid_code()).unwrap();
        assert_eq!(
            value,
            json!({"type": "error", "message": "Invalid code (use letters/numbers, length 1–10)"})
        );
    }
}
