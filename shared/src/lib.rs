use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub const WORLD_SIZE: f32 = 2048.0;
pub const SPRITE_SIZE: f32 = 64.0;
pub const PANEL_WIDTH: f32 = 220.0;

/// Opaque participant identity assigned by the server.
///
/// The server may send ids as JSON strings or integers; both normalise to the
/// same string form so map keys and `playerId` fields compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl<'de> Deserialize<'de> for ParticipantId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(text) => Self(text),
            RawId::Unsigned(n) => Self(n.to_string()),
            RawId::Signed(n) => Self(n.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub facing: Direction,
    #[serde(default)]
    pub is_moving: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub animation_frame: usize,
    #[serde(default)]
    pub avatar: String,
}

impl Participant {
    pub fn new(id: impl Into<ParticipantId>, username: &str, x: f32, y: f32) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            facing: Direction::default(),
            is_moving: false,
            username: username.to_string(),
            animation_frame: 0,
            avatar: String::new(),
        }
    }

    /// Overwrites every field present in `update`, leaving the rest untouched.
    pub fn apply(&mut self, update: &ParticipantUpdate) {
        if let Some(x) = update.x {
            self.x = x;
        }
        if let Some(y) = update.y {
            self.y = y;
        }
        if let Some(facing) = update.facing {
            self.facing = facing;
        }
        if let Some(is_moving) = update.is_moving {
            self.is_moving = is_moving;
        }
        if let Some(frame) = update.animation_frame {
            self.animation_frame = frame;
        }
        if let Some(username) = &update.username {
            self.username.clone_from(username);
        }
        if let Some(avatar) = &update.avatar {
            self.avatar.clone_from(avatar);
        }
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Partial participant state carried by `players_moved`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facing: Option<Direction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_moving: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animation_frame: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Directional sprite frames, each entry an inline image reference
/// (`data:image/png;base64,...`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetSet {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub frames: BTreeMap<Direction, Vec<String>>,
}

impl AssetSet {
    pub fn frame(&self, direction: Direction, index: usize) -> Option<&str> {
        self.frames
            .get(&direction)
            .and_then(|frames| frames.get(index))
            .map(String::as_str)
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinGame { username: String },
    Move { direction: Direction },
    Stop,
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResult {
    pub success: bool,
    #[serde(default)]
    pub player_id: Option<ParticipantId>,
    #[serde(default)]
    pub players: HashMap<ParticipantId, Participant>,
    #[serde(default)]
    pub avatars: HashMap<String, AssetSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServerMessage {
    JoinGame(JoinResult),
    PlayerJoined {
        player: Participant,
        #[serde(default)]
        avatar: Option<AssetSet>,
    },
    PlayersMoved {
        players: HashMap<ParticipantId, ParticipantUpdate>,
    },
    PlayerLeft {
        #[serde(rename = "playerId")]
        player_id: ParticipantId,
    },
}

impl ServerMessage {
    pub const ACTIONS: [&'static str; 4] =
        ["join_game", "player_joined", "players_moved", "player_left"];
}

/// Result of classifying an inbound text frame by its `action` discriminator.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Known(ServerMessage),
    Unknown(String),
}

#[derive(Deserialize)]
struct Envelope {
    action: String,
}

/// Reads the discriminator first so an unknown action is reported as such
/// rather than as a malformed payload.
pub fn decode_server_message(text: &str) -> Result<Inbound, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;
    if ServerMessage::ACTIONS.contains(&envelope.action.as_str()) {
        serde_json::from_str(text).map(Inbound::Known)
    } else {
        Ok(Inbound::Unknown(envelope.action))
    }
}
