//! Signaling messages for browser clients.
//!
//! Every message is a `{type, data}` envelope:
//!
//! ```json
//! { "type": "resume", "data": { "sessionId": "…", "resumeToken": "…" } }
//! ```
//!
//! `#[serde(tag = "type", content = "data")]` produces exactly that
//! "adjacently tagged" shape. Tags are `snake_case`, field names inside
//! `data` are `camelCase` to match what JavaScript clients expect.
//! Messages without fields (e.g. `list_groups`) carry no `data` key.

use serde::{Deserialize, Serialize};

use crate::{GroupId, GroupInfo, SessionId};

/// Values of `error.code` the server emits.
pub mod error_code {
    /// Resume token unknown, mismatched, or expired. The client should
    /// authenticate again on the same connection.
    pub const RESUME_FAILED: &str = "resume_failed";
    /// Credentials rejected by the authenticator.
    pub const AUTH_FAILED: &str = "auth_failed";
    /// A session message arrived before authenticate/resume succeeded.
    pub const NOT_AUTHENTICATED: &str = "not_authenticated";
    /// Authenticate or resume sent on an already-authenticated connection.
    pub const ALREADY_AUTHENTICATED: &str = "already_authenticated";
    /// The text frame was not a recognizable message.
    pub const INVALID_MESSAGE: &str = "invalid_message";
    /// A group operation failed (bad name, unknown group, not in a group).
    pub const GROUP_ERROR: &str = "group_error";
}

/// What the server hands a browser client after authenticate or resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGrant {
    /// Identifier of this particular connection (changes on resume).
    pub client_id: String,
    /// Stable session identity (survives resume).
    pub session_id: SessionId,
    /// Secret to present in a later `resume`.
    pub resume_token: String,
    /// How long after losing the connection a resume is accepted.
    pub resume_window_ms: u64,
    /// How often the client should send `heartbeat`.
    pub heartbeat_interval_ms: u64,
}

/// A signaling message, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SignalMessage {
    // -- Session lifecycle --
    /// Client → Server: full authentication.
    #[serde(rename_all = "camelCase")]
    Authenticate {
        username: String,
        #[serde(default)]
        auth_code: String,
    },

    /// Server → Client: authentication accepted.
    AuthSuccess(SessionGrant),

    /// Client → Server: recover a dropped session without re-authenticating.
    #[serde(rename_all = "camelCase")]
    Resume {
        session_id: SessionId,
        resume_token: String,
    },

    /// Server → Client: resume accepted, here is a fresh token.
    Resumed(SessionGrant),

    /// Server → Client: something went wrong. See [`error_code`].
    Error { code: String, message: String },

    /// Client → Server: intentional leave. The session is torn down
    /// immediately and cannot be resumed.
    Disconnect,

    // -- Liveness --
    /// Client → Server: "I'm still here." `timestamp` is echoed back.
    Heartbeat { timestamp: u64 },

    /// Server → Client: echo of the client's heartbeat timestamp.
    HeartbeatAck { timestamp: u64 },

    // -- Voice --
    /// Client → Server: one encoded audio frame, base64 in JSON.
    #[serde(rename_all = "camelCase")]
    Audio {
        #[serde(with = "base64_bytes")]
        audio_data: Vec<u8>,
    },

    /// Client → Server: the web client reports its own world position.
    #[serde(rename_all = "camelCase")]
    PositionUpdate {
        x: f64,
        y: f64,
        z: f64,
        world_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        yaw: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pitch: Option<f32>,
    },

    // -- Groups --
    /// Client → Server: create a group and join it.
    #[serde(rename_all = "camelCase")]
    CreateGroup {
        name: String,
        #[serde(default)]
        is_permanent: bool,
    },

    /// Client → Server: join an existing group (leaving any current one).
    #[serde(rename_all = "camelCase")]
    JoinGroup { group_id: GroupId },

    /// Client → Server: leave the current group.
    LeaveGroup,

    /// Client → Server: list all groups.
    ListGroups,

    /// Server → Client: the group you asked for exists now.
    GroupCreated(GroupInfo),

    /// Server → Client: you are now a member of this group.
    GroupJoined(GroupInfo),

    /// Server → Client: you left a group (`disbanded` if it was deleted).
    #[serde(rename_all = "camelCase")]
    GroupLeft { group_id: GroupId, disbanded: bool },

    /// Server → Client: answer to `list_groups`.
    GroupList { groups: Vec<GroupInfo> },

    /// Server → Client: membership of a group you belong to changed.
    #[serde(rename_all = "camelCase")]
    GroupMembersUpdated {
        group_id: GroupId,
        members: Vec<SessionId>,
    },
}

impl SignalMessage {
    /// Shorthand for an `error` message.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// `#[serde(with = "base64_bytes")]`: raw bytes as a standard base64 string.
mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The browser client parses these by hand, so the JSON shape is the
    //! contract. Most tests assert on `serde_json::Value` fields.

    use super::*;
    use serde_json::json;

    fn sid() -> SessionId {
        SessionId::from_bytes([0xab; 16])
    }

    fn grant() -> SessionGrant {
        SessionGrant {
            client_id: "conn-3".into(),
            session_id: sid(),
            resume_token: "f00d".into(),
            resume_window_ms: 30_000,
            heartbeat_interval_ms: 5_000,
        }
    }

    #[test]
    fn test_authenticate_parses_camel_case_fields() {
        let msg: SignalMessage = serde_json::from_value(json!({
            "type": "authenticate",
            "data": { "username": "alice", "authCode": "1234" }
        }))
        .unwrap();
        assert_eq!(
            msg,
            SignalMessage::Authenticate {
                username: "alice".into(),
                auth_code: "1234".into()
            }
        );
    }

    #[test]
    fn test_authenticate_auth_code_defaults_to_empty() {
        let msg: SignalMessage = serde_json::from_value(json!({
            "type": "authenticate",
            "data": { "username": "alice" }
        }))
        .unwrap();
        assert!(matches!(msg, SignalMessage::Authenticate { auth_code, .. } if auth_code.is_empty()));
    }

    #[test]
    fn test_auth_success_json_format() {
        let json = serde_json::to_value(SignalMessage::AuthSuccess(grant())).unwrap();

        assert_eq!(json["type"], "auth_success");
        assert_eq!(json["data"]["clientId"], "conn-3");
        assert_eq!(json["data"]["sessionId"], sid().to_string());
        assert_eq!(json["data"]["resumeToken"], "f00d");
        assert_eq!(json["data"]["resumeWindowMs"], 30_000);
        assert_eq!(json["data"]["heartbeatIntervalMs"], 5_000);
    }

    #[test]
    fn test_resumed_has_same_shape_as_auth_success() {
        let a = serde_json::to_value(SignalMessage::AuthSuccess(grant())).unwrap();
        let r = serde_json::to_value(SignalMessage::Resumed(grant())).unwrap();
        assert_eq!(r["type"], "resumed");
        assert_eq!(a["data"], r["data"]);
    }

    #[test]
    fn test_resume_failed_error_json_format() {
        let msg = SignalMessage::error(error_code::RESUME_FAILED, "token expired");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["data"]["code"], "resume_failed");
        assert_eq!(json["data"]["message"], "token expired");
    }

    #[test]
    fn test_audio_data_is_base64() {
        let msg = SignalMessage::Audio {
            audio_data: vec![0, 1, 2, 253, 254, 255],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["data"]["audioData"], "AAEC/f7/");

        let back: SignalMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_audio_with_invalid_base64_is_rejected() {
        let result: Result<SignalMessage, _> = serde_json::from_value(json!({
            "type": "audio",
            "data": { "audioData": "!!not base64!!" }
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_unit_messages_omit_data() {
        let json = serde_json::to_value(SignalMessage::ListGroups).unwrap();
        assert_eq!(json, json!({ "type": "list_groups" }));

        let parsed: SignalMessage =
            serde_json::from_value(json!({ "type": "leave_group" })).unwrap();
        assert_eq!(parsed, SignalMessage::LeaveGroup);
    }

    #[test]
    fn test_position_update_orientation_is_optional() {
        let msg: SignalMessage = serde_json::from_value(json!({
            "type": "position_update",
            "data": { "x": 1.0, "y": 2.0, "z": 3.0, "worldId": "nether" }
        }))
        .unwrap();
        assert!(matches!(
            msg,
            SignalMessage::PositionUpdate { yaw: None, pitch: None, ref world_id, .. } if world_id == "nether"
        ));
    }

    #[test]
    fn test_create_group_defaults_to_temporary() {
        let msg: SignalMessage = serde_json::from_value(json!({
            "type": "create_group",
            "data": { "name": "Squad" }
        }))
        .unwrap();
        assert!(matches!(msg, SignalMessage::CreateGroup { is_permanent: false, .. }));
    }

    #[test]
    fn test_group_members_updated_json_format() {
        let group_id = GroupId(uuid::Uuid::nil());
        let msg = SignalMessage::GroupMembersUpdated {
            group_id,
            members: vec![sid()],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "group_members_updated");
        assert_eq!(json["data"]["members"][0], sid().to_string());
        assert!(json["data"].get("groupId").is_some());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result: Result<SignalMessage, _> =
            serde_json::from_value(json!({ "type": "fly_to_moon", "data": {} }));
        assert!(result.is_err());
    }
}
