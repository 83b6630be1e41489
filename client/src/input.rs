//! Key transitions to movement intents, with held-key debouncing

use macroquad::input::utils::{register_input_subscriber, repeat_all_miniquad_input};
use macroquad::input::KeyCode;
use macroquad::miniquad::{EventHandler, KeyMods};
use shared::Direction;

/// Movement request produced by the translator and sent by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Move(Direction),
    Stop,
}

/// Arrow keys and WASD.
pub fn direction_for(key: KeyCode) -> Option<Direction> {
    match key {
        KeyCode::Up | KeyCode::W => Some(Direction::Up),
        KeyCode::Down | KeyCode::S => Some(Direction::Down),
        KeyCode::Left | KeyCode::A => Some(Direction::Left),
        KeyCode::Right | KeyCode::D => Some(Direction::Right),
        _ => None,
    }
}

/// Tracks held direction keys and emits intents on transitions.
///
/// Releasing one key while another is still held emits nothing: the server
/// keeps moving in the last requested direction until every key is up.
#[derive(Debug, Default)]
pub struct InputTranslator {
    held: Vec<KeyCode>,
}

impl InputTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_key_down(&mut self, key: KeyCode) -> Option<Intent> {
        let direction = direction_for(key)?;
        if self.held.contains(&key) {
            return None;
        }
        self.held.push(key);
        Some(Intent::Move(direction))
    }

    pub fn on_key_up(&mut self, key: KeyCode) -> Option<Intent> {
        let position = self.held.iter().position(|held| *held == key)?;
        self.held.remove(position);

        if self.held.is_empty() {
            Some(Intent::Stop)
        } else {
            None
        }
    }

    pub fn on_focus_lost(&mut self) -> Intent {
        self.held.clear();
        Intent::Stop
    }

    pub fn held_keys(&self) -> &[KeyCode] {
        &self.held
    }

    pub fn is_idle(&self) -> bool {
        self.held.is_empty()
    }
}

/// Raw window events the frame loop cares about.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawInput {
    KeyDown(KeyCode),
    KeyUp(KeyCode),
    FocusLost,
}

/// Collects key and minimise events from the window each frame.
pub struct RawInputQueue {
    subscriber: usize,
    events: Vec<RawInput>,
}

impl RawInputQueue {
    pub fn new() -> Self {
        Self {
            subscriber: register_input_subscriber(),
            events: Vec::new(),
        }
    }

    /// Returns the events received since the previous call.
    pub fn drain(&mut self) -> Vec<RawInput> {
        let subscriber = self.subscriber;
        repeat_all_miniquad_input(self, subscriber);
        std::mem::take(&mut self.events)
    }
}

impl Default for RawInputQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for RawInputQueue {
    fn update(&mut self) {}

    fn draw(&mut self) {}

    fn key_down_event(&mut self, keycode: KeyCode, _keymods: KeyMods, repeat: bool) {
        if !repeat {
            self.events.push(RawInput::KeyDown(keycode));
        }
    }

    fn key_up_event(&mut self, keycode: KeyCode, _keymods: KeyMods) {
        self.events.push(RawInput::KeyUp(keycode));
    }

    // miniquad has no focus-lost event; minimising is the closest signal.
    fn window_minimized_event(&mut self) {
        self.events.push(RawInput::FocusLost);
    }
}
