//! Wire records exchanged between clients and the relay.
//!
//! Every record is a JSON object carrying a `type` discriminant. The set of
//! discriminants is closed: anything else is rejected by [`decode`] and the
//! single record is dropped by the caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Wire value of `powerup` meaning "no powerup".
pub const NO_POWERUP: i32 = -1;

const KNOWN_TAGS: [&str; 10] = ["hi", "cl", "ir", "ad", "wd", "tm", "cn", "dc", "en", "kc"];

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("record is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("record has no string `type` discriminant")]
    MissingType,
    #[error("unknown record type `{0}`")]
    UnknownType(String),
    #[error("malformed `{tag}` record: {source}")]
    Malformed {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Welcome: assigned id, terrain seed and everyone already present.
    #[serde(rename = "hi")]
    Welcome {
        id: u32,
        seed: u32,
        #[serde(default)]
        wind: f32,
        #[serde(default)]
        running: bool,
        #[serde(default)]
        players: Vec<PlayerPayload>,
    },
    /// Full or partial player state.
    #[serde(rename = "cl")]
    State(PlayerPayload),
    /// One-off event from client `id`.
    #[serde(rename = "ir")]
    Irregular { id: u32, event: IrregularEvent },
    #[serde(rename = "ad")]
    Admin {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        command: AdminCommand,
    },
    #[serde(rename = "wd")]
    Wind { speed: f32 },
    /// Seconds left in the round.
    #[serde(rename = "tm")]
    Timer { remaining: u32 },
    #[serde(rename = "cn")]
    PeerConnected { id: u32 },
    #[serde(rename = "dc")]
    PeerDisconnected { id: u32 },
    #[serde(rename = "en")]
    GameOver { leaderboard: Vec<ScoreEntry> },
    #[serde(rename = "kc")]
    Kicked { reason: String },
}

impl Message {
    pub fn tag(&self) -> &'static str {
        match self {
            Message::Welcome { .. } => "hi",
            Message::State(_) => "cl",
            Message::Irregular { .. } => "ir",
            Message::Admin { .. } => "ad",
            Message::Wind { .. } => "wd",
            Message::Timer { .. } => "tm",
            Message::PeerConnected { .. } => "cn",
            Message::PeerDisconnected { .. } => "dc",
            Message::GameOver { .. } => "en",
            Message::Kicked { .. } => "kc",
        }
    }

    /// Whether a client may send this record to the relay.
    pub fn from_client_allowed(&self) -> bool {
        matches!(
            self,
            Message::State(_) | Message::Irregular { .. } | Message::Admin { .. }
        )
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

/// Parses one text record.
pub fn decode(text: &str) -> Result<Message, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::Json)?;
    let tag = match value.get("type") {
        Some(Value::String(tag)) => tag.clone(),
        _ => return Err(ProtocolError::MissingType),
    };
    if !KNOWN_TAGS.contains(&tag.as_str()) {
        return Err(ProtocolError::UnknownType(tag));
    }
    serde_json::from_value(value).map_err(|source| ProtocolError::Malformed { tag, source })
}

/// Network-visible player state. Every field but `id` is optional and an
/// absent field means "unchanged".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerPayload {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<[i32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rot: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flip: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i32>,
    /// Powerup wire id, [`NO_POWERUP`] clears it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub powerup: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<Vec<u16>>,
    /// Complete list of live snowballs; replaces the previous list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snowballs: Option<Vec<SnowballPayload>>,
}

impl PlayerPayload {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// True when no field besides `id` is present.
    pub fn is_empty_delta(&self) -> bool {
        self.field_names().is_empty()
    }

    /// Names of the optional fields present, in wire order.
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.name.is_some() {
            names.push("name");
        }
        if self.pos.is_some() {
            names.push("pos");
        }
        if self.rot.is_some() {
            names.push("rot");
        }
        if self.flip.is_some() {
            names.push("flip");
        }
        if self.frame.is_some() {
            names.push("frame");
        }
        if self.score.is_some() {
            names.push("score");
        }
        if self.powerup.is_some() {
            names.push("powerup");
        }
        if self.colors.is_some() {
            names.push("colors");
        }
        if self.snowballs.is_some() {
            names.push("snowballs");
        }
        names
    }

    /// Overlays the fields present in `delta` onto `self`.
    pub fn merge(&mut self, delta: &PlayerPayload) {
        fn overlay<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if let Some(value) = value {
                *slot = Some(value.clone());
            }
        }
        overlay(&mut self.name, &delta.name);
        overlay(&mut self.pos, &delta.pos);
        overlay(&mut self.rot, &delta.rot);
        overlay(&mut self.flip, &delta.flip);
        overlay(&mut self.frame, &delta.frame);
        overlay(&mut self.score, &delta.score);
        overlay(&mut self.powerup, &delta.powerup);
        overlay(&mut self.colors, &delta.colors);
        overlay(&mut self.snowballs, &delta.snowballs);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnowballPayload {
    pub id: u32,
    pub pos: [i32; 2],
    #[serde(default)]
    pub frame: u32,
    /// Variant id, see `SnowballKind` on the client.
    #[serde(rename = "type", default)]
    pub kind: u8,
}

/// At-most-once events carried on the irregular lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IrregularEvent {
    /// A snowball owned by the sender struck `target`.
    Hit {
        target: u32,
        /// Signed horizontal knockback factor.
        strength: f32,
        /// Visual size of the impact, 1 small or 2 large.
        size: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        powerup: Option<PowerupKind>,
    },
    /// A snowball touched the ground.
    Landed { snowball: u32 },
    /// The sender picked up powerup drop `drop`.
    Pickup { drop: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AdminCommand {
    /// Begin a round lasting `duration` seconds.
    Start { duration: u32 },
    Stop,
    Kick { id: u32 },
    /// Spawn powerup drop `id` above world `x`.
    Drop { id: u32, kind: PowerupKind, x: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum PowerupKind {
    Rapidfire,
    Strength,
    Clustershot,
}

impl PowerupKind {
    pub const ALL: [PowerupKind; 3] = [
        PowerupKind::Rapidfire,
        PowerupKind::Strength,
        PowerupKind::Clustershot,
    ];

    pub fn wire_id(self) -> i32 {
        match self {
            PowerupKind::Rapidfire => 0,
            PowerupKind::Strength => 1,
            PowerupKind::Clustershot => 2,
        }
    }

    /// Decodes a wire id, [`NO_POWERUP`] and unknown ids map to `None`.
    pub fn from_wire(id: i32) -> Option<Self> {
        PowerupKind::try_from(id).ok()
    }
}

impl From<PowerupKind> for i32 {
    fn from(kind: PowerupKind) -> i32 {
        kind.wire_id()
    }
}

impl TryFrom<i32> for PowerupKind {
    type Error = String;

    fn try_from(id: i32) -> Result<Self, Self::Error> {
        match id {
            0 => Ok(PowerupKind::Rapidfire),
            1 => Ok(PowerupKind::Strength),
            2 => Ok(PowerupKind::Clustershot),
            other => Err(format!("unknown powerup id {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub id: u32,
    pub name: String,
    pub score: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_match_wire_taxonomy() {
        let records = vec![
            Message::Welcome {
                id: 1,
                seed: 9,
                wind: 0.0,
                running: false,
                players: vec![],
            },
            Message::State(PlayerPayload::new(1)),
            Message::Irregular {
                id: 1,
                event: IrregularEvent::Landed { snowball: 3 },
            },
            Message::Admin {
                key: None,
                command: AdminCommand::Stop,
            },
            Message::Wind { speed: 10.0 },
            Message::Timer { remaining: 5 },
            Message::PeerConnected { id: 2 },
            Message::PeerDisconnected { id: 2 },
            Message::GameOver { leaderboard: vec![] },
            Message::Kicked {
                reason: "full".to_string(),
            },
        ];

        for record in records {
            let text = record.encode().unwrap();
            let value: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["type"], record.tag());
            assert!(KNOWN_TAGS.contains(&record.tag()));
        }
    }

    #[test]
    fn test_absent_fields_are_not_serialized() {
        let mut payload = PlayerPayload::new(4);
        payload.score = Some(7);
        let text = Message::State(payload).encode().unwrap();
        assert_eq!(text, r#"{"type":"cl","id":4,"score":7}"#);
    }

    #[test]
    fn test_decode_partial_state() {
        let message = decode(r#"{"type":"cl","id":2,"pos":[500,-30]}"#).unwrap();
        match message {
            Message::State(payload) => {
                assert_eq!(payload.id, 2);
                assert_eq!(payload.pos, Some([500, -30]));
                assert_eq!(payload.score, None);
                assert_eq!(payload.field_names(), vec!["pos"]);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_snowball_type_field() {
        let message = decode(
            r#"{"type":"cl","id":2,"snowballs":[{"id":1,"pos":[0,0],"frame":2,"type":1}]}"#,
        )
        .unwrap();
        let Message::State(payload) = message else {
            panic!("expected a state record");
        };
        let balls = payload.snowballs.unwrap();
        assert_eq!(balls[0].kind, 1);
        assert_eq!(balls[0].frame, 2);
    }

    #[test]
    fn test_decode_rejects_bad_records() {
        assert!(matches!(decode("not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(decode(r#"{"id":1}"#), Err(ProtocolError::MissingType)));
        assert!(matches!(decode(r#"{"type":7}"#), Err(ProtocolError::MissingType)));
        assert!(matches!(
            decode(r#"{"type":"zz"}"#),
            Err(ProtocolError::UnknownType(tag)) if tag == "zz"
        ));
        assert!(matches!(
            decode(r#"{"type":"cl","pos":[1,2]}"#),
            Err(ProtocolError::Malformed { tag, .. }) if tag == "cl"
        ));
    }

    #[test]
    fn test_irregular_and_admin_shapes() {
        let hit = Message::Irregular {
            id: 3,
            event: IrregularEvent::Hit {
                target: 5,
                strength: -1.0,
                size: 4,
                powerup: Some(PowerupKind::Strength),
            },
        };
        let value: Value = serde_json::from_str(&hit.encode().unwrap()).unwrap();
        assert_eq!(value["event"]["kind"], "hit");
        assert_eq!(value["event"]["powerup"], 1);
        assert_eq!(decode(&hit.encode().unwrap()).unwrap(), hit);

        let drop = decode(r#"{"type":"ad","key":"k","command":{"action":"drop","id":1,"kind":2,"x":-40.0}}"#)
            .unwrap();
        assert_eq!(
            drop,
            Message::Admin {
                key: Some("k".to_string()),
                command: AdminCommand::Drop {
                    id: 1,
                    kind: PowerupKind::Clustershot,
                    x: -40.0
                }
            }
        );
    }

    #[test]
    fn test_unknown_powerup_id_is_malformed() {
        let text = r#"{"type":"ad","command":{"action":"drop","id":1,"kind":9,"x":0.0}}"#;
        assert!(matches!(decode(text), Err(ProtocolError::Malformed { .. })));
        assert_eq!(PowerupKind::from_wire(NO_POWERUP), None);
        assert_eq!(PowerupKind::from_wire(0), Some(PowerupKind::Rapidfire));
    }

    #[test]
    fn test_client_direction() {
        assert!(Message::State(PlayerPayload::new(1)).from_client_allowed());
        assert!(!Message::Kicked {
            reason: String::new()
        }
        .from_client_allowed());
        assert!(!Message::PeerDisconnected { id: 1 }.from_client_allowed());
    }

    #[test]
    fn test_merge_overlays_present_fields_only() {
        let mut cached = PlayerPayload::new(1);
        cached.name = Some("ana".to_string());
        cached.score = Some(3);

        let mut delta = PlayerPayload::new(1);
        delta.pos = Some([10, 20]);
        cached.merge(&delta);

        assert_eq!(cached.name.as_deref(), Some("ana"));
        assert_eq!(cached.score, Some(3));
        assert_eq!(cached.pos, Some([10, 20]));
        assert!(PlayerPayload::new(1).is_empty_delta());
    }
}
