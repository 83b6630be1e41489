//! # Presence Client Library
//!
//! Client-side implementation of a real-time multiplayer presence world. The
//! client connects to a game server over a WebSocket, mirrors the participants
//! the server reports, draws them around the local participant, and forwards
//! directional key presses as movement intents.
//!
//! ## Architecture Overview
//!
//! The client is a passive renderer. It runs no physics and makes no
//! predictions: every position on screen is the last position the server
//! asserted. What it does have to get right is keeping a coherent local view
//! of a stream of partial, server-pushed updates and drawing that view without
//! stalling on images that decode in the background.
//!
//! ### Single Execution Context
//! All state lives in one [`app::ClientApp`] and is only mutated on the frame
//! loop thread. Socket I/O and image decoding run on a tokio runtime, but they
//! only talk to the frame loop through channels drained once per display
//! tick, so no update is ever observed half-applied.
//!
//! ### Coalesced Repaints
//! Inbound events that change something visible request a repaint. Requests
//! are an idempotent flag, so a burst of updates between two display ticks
//! costs one paint.
//!
//! ## Module Organization
//!
//! ### Store Module (`store`)
//! Participants and asset sets as last asserted by the server:
//! - Insert/replace and removal by participant id
//! - Partial position merges that ignore unknown ids
//! - Sprite frame resolution per facing and animation frame
//!
//! ### Session Module (`session`)
//! Connection lifecycle and protocol handling:
//! - `Disconnected → Connecting → Open → Closed` state machine
//! - Join request on open, snapshot load on join
//! - Classification of inbound events and dispatch into the store
//! - Outbound intents, dropped while the channel is not open
//!
//! ### Network Module (`network`)
//! WebSocket transport on the tokio runtime and pluggable reconnect policies.
//!
//! ### Input Module (`input`)
//! Raw window key events to movement intents, one `move` per newly held key
//! and one `stop` when the last key is released or focus is lost.
//!
//! ### Camera Module (`camera`)
//! Viewport centred on the local participant and clamped to the world.
//!
//! ### Assets Module (`assets`)
//! Inline `data:` URL sprites and the world backdrop, decoded off-thread and
//! cached as textures.
//!
//! ### Rendering Module (`rendering`)
//! Pure frame planning (backdrop, culled sprites, roster panel) and the
//! macroquad painter that executes a plan onto a persistent canvas.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::{Args, ClientConfig};
//! use clap::Parser;
//!
//! let config = ClientConfig::from_args(Args::parse())?;
//! let runtime = tokio::runtime::Runtime::new()?;
//! let handle = runtime.handle().clone();
//!
//! macroquad::Window::from_config(config.window_conf(), {
//!     let config = config.clone();
//!     async move { client::app::ClientApp::new(&config, handle).run().await }
//! });
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod app;
pub mod assets;
pub mod camera;
pub mod config;
pub mod input;
pub mod network;
pub mod rendering;
pub mod session;
pub mod store;
