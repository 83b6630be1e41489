//! Connection lifecycle, inbound event classification and outbound intents
//!
//! The session never touches the socket directly. It consumes
//! [`TransportEvent`]s produced by the network task, applies the decoded
//! server messages to the [`EntityStore`], and pushes serialized intents onto
//! the outbound queue while the channel is open.

use crate::input::Intent;
use crate::network::TransportEvent;
use crate::store::EntityStore;
use log::{debug, error, info, warn};
use shared::{
    decode_server_message, ClientMessage, Direction, Inbound, JoinResult, ParticipantId,
    ServerMessage,
};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Open => "Connected",
            ConnectionState::Closed => "Connection closed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed server message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unrecognized server action '{0}'")]
    UnknownAction(String),

    #[error("join rejected: {0}")]
    JoinRejected(String),

    #[error("join succeeded without a player id")]
    MissingIdentity,
}

/// What a handled event changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    StateChanged(ConnectionState),
    Joined { local_id: ParticipantId, participants: usize },
    ParticipantJoined(ParticipantId),
    PositionsMerged { applied: usize },
    ParticipantLeft { id: ParticipantId, existed: bool },
}

impl Applied {
    /// Whether the change is visible on screen and warrants a repaint.
    pub fn requests_render(&self) -> bool {
        match self {
            Applied::StateChanged(_) | Applied::Joined { .. } | Applied::ParticipantJoined(_) => {
                true
            }
            Applied::PositionsMerged { applied } => *applied > 0,
            Applied::ParticipantLeft { existed, .. } => *existed,
        }
    }
}

pub struct ConnectionSession {
    username: String,
    state: ConnectionState,
    local_id: Option<ParticipantId>,
    last_error: Option<String>,
    outbound: mpsc::UnboundedSender<String>,
}

impl ConnectionSession {
    pub fn new(username: impl Into<String>, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            username: username.into(),
            state: ConnectionState::Disconnected,
            local_id: None,
            last_error: None,
            outbound,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn local_id(&self) -> Option<&ParticipantId> {
        self.local_id.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn handle_transport_event(
        &mut self,
        event: TransportEvent,
        store: &mut EntityStore,
    ) -> Result<Applied, SessionError> {
        match event {
            TransportEvent::Connecting => Ok(self.transition(ConnectionState::Connecting)),
            TransportEvent::Opened => {
                let applied = self.transition(ConnectionState::Open);
                self.last_error = None;
                self.send(ClientMessage::JoinGame {
                    username: self.username.clone(),
                });
                Ok(applied)
            }
            TransportEvent::Closed { reason } => {
                match &reason {
                    Some(reason) => warn!("Connection closed: {}", reason),
                    None => warn!("Connection closed"),
                }
                Ok(self.transition(ConnectionState::Closed))
            }
            TransportEvent::Failed { reason } => {
                error!("Connection failed: {}", reason);
                self.last_error = Some(reason);
                Ok(self.transition(ConnectionState::Disconnected))
            }
            TransportEvent::Message(text) => self.handle_message(&text, store),
        }
    }

    /// Decodes one text frame and applies it to the store.
    pub fn handle_message(
        &mut self,
        text: &str,
        store: &mut EntityStore,
    ) -> Result<Applied, SessionError> {
        let message = match decode_server_message(text)? {
            Inbound::Known(message) => message,
            Inbound::Unknown(action) => return Err(SessionError::UnknownAction(action)),
        };

        match message {
            ServerMessage::JoinGame(result) => self.handle_join(result, store),
            ServerMessage::PlayerJoined { player, avatar } => {
                let id = player.id.clone();
                info!("{} joined as {}", player.username, id);
                if let Some(avatar) = avatar {
                    store.register_asset_set(player.avatar.clone(), avatar);
                }
                store.upsert_participant(player);
                Ok(Applied::ParticipantJoined(id))
            }
            ServerMessage::PlayersMoved { players } => Ok(Applied::PositionsMerged {
                applied: store.merge_positions(&players),
            }),
            ServerMessage::PlayerLeft { player_id } => {
                let existed = store.remove_participant(&player_id).is_some();
                info!("Participant {} left", player_id);
                Ok(Applied::ParticipantLeft {
                    id: player_id,
                    existed,
                })
            }
        }
    }

    fn handle_join(
        &mut self,
        result: JoinResult,
        store: &mut EntityStore,
    ) -> Result<Applied, SessionError> {
        if !result.success {
            let reason = result
                .error
                .unwrap_or_else(|| "no reason given".to_string());
            self.last_error = Some(format!("Join rejected: {}", reason));
            return Err(SessionError::JoinRejected(reason));
        }

        let local_id = result.player_id.ok_or(SessionError::MissingIdentity)?;
        store.load_snapshot(result.players.into_values(), result.avatars);
        info!(
            "Joined as {} with {} participants",
            local_id,
            store.len()
        );

        self.local_id = Some(local_id.clone());
        Ok(Applied::Joined {
            local_id,
            participants: store.len(),
        })
    }

    pub fn send_intent(&mut self, intent: Intent) {
        match intent {
            Intent::Move(direction) => self.send_move(direction),
            Intent::Stop => self.send_stop(),
        }
    }

    pub fn send_move(&mut self, direction: Direction) {
        self.send(ClientMessage::Move { direction });
    }

    pub fn send_stop(&mut self) {
        self.send(ClientMessage::Stop);
    }

    // Stale intents are worthless, so anything sent while not open is dropped.
    fn send(&mut self, message: ClientMessage) {
        if !self.is_open() {
            debug!("Dropping {:?}: channel is {:?}", message, self.state);
            return;
        }

        match message.to_json() {
            Ok(text) => {
                if self.outbound.send(text).is_err() {
                    warn!("Outbound queue closed, dropping {:?}", message);
                }
            }
            Err(e) => error!("Failed to serialize {:?}: {}", message, e),
        }
    }

    fn transition(&mut self, next: ConnectionState) -> Applied {
        if next != ConnectionState::Open {
            self.local_id = None;
        }
        debug!("Connection state {:?} -> {:?}", self.state, next);
        self.state = next;
        Applied::StateChanged(next)
    }
}
