//! Frame planning and painting
//!
//! [`Renderer::plan_frame`] turns the store and viewport into a flat list of
//! [`DrawCommand`]s without touching the graphics context. [`Painter`] then
//! executes a plan onto a persistent off-screen canvas, which is presented
//! every display tick whether or not anything was repainted.

use crate::assets::{AssetCache, AssetSource, AssetStatus};
use crate::camera::Viewport;
use crate::session::ConnectionState;
use crate::store::EntityStore;
use log::debug;
use macroquad::prelude::*;
use shared::{Direction, ParticipantId, PANEL_WIDTH, SPRITE_SIZE, WORLD_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackdropStatus {
    Loading,
    Ready,
    Failed,
}

impl From<AssetStatus> for BackdropStatus {
    fn from(status: AssetStatus) -> Self {
        match status {
            AssetStatus::Ready => BackdropStatus::Ready,
            AssetStatus::Failed => BackdropStatus::Failed,
            AssetStatus::Missing | AssetStatus::Loading => BackdropStatus::Loading,
        }
    }
}

/// A sprite draw with everything captured at dispatch time.
#[derive(Debug, Clone, PartialEq)]
pub struct SpriteDraw {
    pub frame: String,
    pub screen: Vec2,
    pub is_local: bool,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RosterRow {
    pub name: String,
    pub moving: bool,
    pub x: i32,
    pub y: i32,
    pub facing: Direction,
    pub is_local: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Backdrop { source: Rect, dest: Rect },
    Placeholder { dest: Rect, status: String },
    Sprite(SpriteDraw),
    RosterHeader { count: usize },
    RosterRow(RosterRow),
    ConnectionStatus { state: ConnectionState, error: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub display: Vec2,
    pub commands: Vec<DrawCommand>,
}

impl Frame {
    pub fn sprites(&self) -> impl Iterator<Item = &SpriteDraw> {
        self.commands.iter().filter_map(|command| match command {
            DrawCommand::Sprite(sprite) => Some(sprite),
            _ => None,
        })
    }

    pub fn roster(&self) -> impl Iterator<Item = &RosterRow> {
        self.commands.iter().filter_map(|command| match command {
            DrawCommand::RosterRow(row) => Some(row),
            _ => None,
        })
    }

    /// Commands drawn in the side panel, in order.
    pub fn panel(&self) -> impl Iterator<Item = &DrawCommand> {
        self.commands.iter().filter(|command| command.is_panel())
    }
}

impl DrawCommand {
    pub fn is_panel(&self) -> bool {
        matches!(
            self,
            DrawCommand::RosterHeader { .. }
                | DrawCommand::RosterRow(_)
                | DrawCommand::ConnectionStatus { .. }
        )
    }
}

/// Whether a sprite drawn at `sprite.screen` reaches into the side panel.
pub fn overlaps_panel(sprite: &SpriteDraw, display: Vec2) -> bool {
    sprite.screen.x + SPRITE_SIZE / 2.0 > display.x
}

/// Everything a frame is planned from.
pub struct FrameInputs<'a> {
    pub store: &'a EntityStore,
    pub viewport: Viewport,
    pub local_id: Option<&'a ParticipantId>,
    pub backdrop: BackdropStatus,
    pub connection: ConnectionState,
    pub last_error: Option<&'a str>,
}

/// Culling keeps anything within one sprite of the display so sprites
/// straddling an edge still draw.
pub fn is_visible(screen: Vec2, display: Vec2) -> bool {
    screen.x >= -SPRITE_SIZE
        && screen.x <= display.x + SPRITE_SIZE
        && screen.y >= -SPRITE_SIZE
        && screen.y <= display.y + SPRITE_SIZE
}

pub struct Renderer {
    display: Vec2,
}

impl Renderer {
    /// `display` is the world area only; the side panel sits to its right.
    pub fn new(display: Vec2) -> Self {
        Self { display }
    }

    pub fn display_size(&self) -> Vec2 {
        self.display
    }

    /// Recomputes the world area from a full window size.
    pub fn resize(&mut self, window_width: f32, window_height: f32) {
        self.display = vec2((window_width - PANEL_WIDTH).max(0.0), window_height.max(0.0));
    }

    pub fn plan_frame(&self, inputs: &FrameInputs<'_>) -> Frame {
        let mut commands = Vec::new();
        let dest = Rect::new(0.0, 0.0, self.display.x, self.display.y);

        commands.push(match inputs.backdrop {
            BackdropStatus::Ready => DrawCommand::Backdrop {
                source: inputs.viewport.as_rect(),
                dest,
            },
            BackdropStatus::Loading => DrawCommand::Placeholder {
                dest,
                status: "Loading world...".to_string(),
            },
            BackdropStatus::Failed => DrawCommand::Placeholder {
                dest,
                status: "World map unavailable".to_string(),
            },
        });

        let mut sprites: Vec<(f32, SpriteDraw)> = Vec::new();
        for participant in inputs.store.participants() {
            let screen = inputs
                .viewport
                .to_screen(vec2(participant.x, participant.y));
            if !is_visible(screen, self.display) {
                continue;
            }

            let Some(frame) = inputs.store.sprite_frame(participant) else {
                debug!(
                    "No {:?} frame {} for {}",
                    participant.facing, participant.animation_frame, participant.id
                );
                continue;
            };

            sprites.push((
                participant.y,
                SpriteDraw {
                    frame: frame.to_string(),
                    screen,
                    is_local: Some(&participant.id) == inputs.local_id,
                    label: participant.username.clone(),
                },
            ));
        }

        // Lower on screen draws later, so it overlaps what is behind it.
        sprites.sort_by(|a, b| a.0.total_cmp(&b.0));
        commands.extend(sprites.into_iter().map(|(_, sprite)| DrawCommand::Sprite(sprite)));

        commands.push(DrawCommand::RosterHeader {
            count: inputs.store.len(),
        });
        for participant in inputs.store.participants() {
            commands.push(DrawCommand::RosterRow(RosterRow {
                name: participant.username.clone(),
                moving: participant.is_moving,
                x: participant.x.round() as i32,
                y: participant.y.round() as i32,
                facing: participant.facing,
                is_local: Some(&participant.id) == inputs.local_id,
            }));
        }

        commands.push(DrawCommand::ConnectionStatus {
            state: inputs.connection,
            error: inputs.last_error.map(str::to_string),
        });

        Frame {
            display: self.display,
            commands,
        }
    }
}

/// Idempotent repaint flag; any number of requests before the next paint
/// produce one paint. Starts with a paint pending.
#[derive(Debug)]
pub struct FrameScheduler {
    requested: bool,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self { requested: true }
    }

    pub fn request(&mut self) {
        self.requested = true;
    }

    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.requested)
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

const BACKGROUND: Color = Color::new(0.10, 0.10, 0.10, 1.0);
const PLACEHOLDER_FILL: Color = Color::new(0.16, 0.22, 0.18, 1.0);
const PANEL_FILL: Color = Color::new(0.08, 0.08, 0.12, 1.0);
const LOCAL_ROW_FILL: Color = Color::new(0.20, 0.35, 0.20, 1.0);
const HIGHLIGHT: Color = Color::new(1.0, 0.85, 0.2, 1.0);
const ROW_HEIGHT: f32 = 40.0;
const PANEL_PADDING: f32 = 10.0;

struct DeferredSprite {
    source: AssetSource,
    draw: SpriteDraw,
}

/// Executes planned frames with macroquad onto an off-screen canvas.
pub struct Painter {
    canvas: RenderTarget,
    size: Vec2,
    backdrop: AssetSource,
    deferred: Vec<DeferredSprite>,
    // Panel of the last paint, redrawn over late sprites.
    panel: Frame,
}

impl Painter {
    pub fn new(window: Vec2, backdrop: AssetSource) -> Self {
        Self {
            canvas: Self::make_canvas(window),
            size: window,
            backdrop,
            deferred: Vec::new(),
            panel: Frame {
                display: window,
                commands: Vec::new(),
            },
        }
    }

    fn make_canvas(size: Vec2) -> RenderTarget {
        let canvas = render_target(size.x.max(1.0) as u32, size.y.max(1.0) as u32);
        canvas.texture.set_filter(FilterMode::Nearest);
        canvas
    }

    pub fn backdrop(&self) -> &AssetSource {
        &self.backdrop
    }

    pub fn resize(&mut self, window: Vec2) {
        if window != self.size {
            self.canvas = Self::make_canvas(window);
            self.size = window;
        }
    }

    fn bind_canvas(&self) {
        set_camera(&Camera2D {
            zoom: vec2(2.0 / self.size.x.max(1.0), 2.0 / self.size.y.max(1.0)),
            target: self.size / 2.0,
            render_target: Some(self.canvas.clone()),
            ..Default::default()
        });
    }

    pub fn paint(&mut self, frame: &Frame, assets: &mut AssetCache) {
        self.bind_canvas();
        clear_background(BACKGROUND);

        for command in &frame.commands {
            match command {
                DrawCommand::Backdrop { source, dest } => self.draw_backdrop(*source, *dest, assets),
                DrawCommand::Placeholder { dest, status } => draw_placeholder(*dest, status),
                DrawCommand::Sprite(sprite) => {
                    let source = AssetSource::inline(&sprite.frame);
                    match assets.request(&source) {
                        AssetStatus::Ready => {
                            if let Some(texture) = assets.texture(&source) {
                                draw_sprite(texture, sprite);
                            }
                        }
                        AssetStatus::Loading | AssetStatus::Missing => self.deferred.push(DeferredSprite {
                            source,
                            draw: sprite.clone(),
                        }),
                        AssetStatus::Failed => {}
                    }
                }
                _ => {}
            }
        }

        self.panel = Frame {
            display: frame.display,
            commands: frame.panel().cloned().collect(),
        };
        draw_panel(&self.panel);

        set_default_camera();
    }

    /// Draws deferred sprites whose image settled, at the position captured
    /// when they were dispatched, even if a later paint has since moved the
    /// participant. Failed images are dropped.
    pub fn flush_deferred(&mut self, settled: &[AssetSource], assets: &AssetCache) {
        if settled.is_empty() || self.deferred.is_empty() {
            return;
        }

        self.bind_canvas();
        let display = self.panel.display;
        let mut covered_panel = false;
        self.deferred.retain(|pending| {
            if !settled.contains(&pending.source) {
                return true;
            }
            if let Some(texture) = assets.texture(&pending.source) {
                draw_sprite(texture, &pending.draw);
                covered_panel |= overlaps_panel(&pending.draw, display);
            }
            false
        });
        if covered_panel {
            draw_panel(&self.panel);
        }
        set_default_camera();
    }

    pub fn present(&self) {
        clear_background(BACKGROUND);
        draw_texture_ex(
            &self.canvas.texture,
            0.0,
            0.0,
            WHITE,
            DrawTextureParams {
                dest_size: Some(self.size),
                ..Default::default()
            },
        );
    }

    fn draw_backdrop(&self, source: Rect, dest: Rect, assets: &AssetCache) {
        let Some(texture) = assets.texture(&self.backdrop) else {
            draw_placeholder(dest, "Loading world...");
            return;
        };

        let scale_x = texture.width() / WORLD_SIZE;
        let scale_y = texture.height() / WORLD_SIZE;
        draw_texture_ex(
            texture,
            dest.x,
            dest.y,
            WHITE,
            DrawTextureParams {
                dest_size: Some(dest.size()),
                source: Some(Rect::new(
                    source.x * scale_x,
                    source.y * scale_y,
                    source.w * scale_x,
                    source.h * scale_y,
                )),
                ..Default::default()
            },
        );
    }
}

fn draw_placeholder(dest: Rect, status: &str) {
    draw_rectangle(dest.x, dest.y, dest.w, dest.h, PLACEHOLDER_FILL);
    let size = measure_text(status, None, 24, 1.0);
    draw_text(
        status,
        dest.x + (dest.w - size.width) / 2.0,
        dest.y + dest.h / 2.0,
        24.0,
        LIGHTGRAY,
    );
}

fn draw_sprite(texture: &Texture2D, sprite: &SpriteDraw) {
    let half = SPRITE_SIZE / 2.0;
    let top_left = sprite.screen - vec2(half, half);

    if sprite.is_local {
        draw_circle(sprite.screen.x, sprite.screen.y, half + 6.0, Color::new(1.0, 0.85, 0.2, 0.25));
        draw_circle_lines(sprite.screen.x, sprite.screen.y, half + 4.0, 2.0, HIGHLIGHT);
    }

    draw_texture_ex(
        texture,
        top_left.x,
        top_left.y,
        WHITE,
        DrawTextureParams {
            dest_size: Some(vec2(SPRITE_SIZE, SPRITE_SIZE)),
            ..Default::default()
        },
    );

    let size = measure_text(&sprite.label, None, 16, 1.0);
    let color = if sprite.is_local { HIGHLIGHT } else { WHITE };
    draw_text(
        &sprite.label,
        sprite.screen.x - size.width / 2.0,
        top_left.y - 4.0,
        16.0,
        color,
    );
}

fn draw_panel(frame: &Frame) {
    let mut row_index = 0;
    for command in frame.panel() {
        match command {
            DrawCommand::RosterHeader { count } => draw_panel_header(frame.display, *count),
            DrawCommand::RosterRow(row) => {
                draw_roster_row(frame.display, row_index, row);
                row_index += 1;
            }
            DrawCommand::ConnectionStatus { state, error } => {
                draw_connection_status(frame.display, *state, error.as_deref())
            }
            _ => {}
        }
    }
}

fn draw_panel_header(display: Vec2, count: usize) {
    draw_rectangle(display.x, 0.0, PANEL_WIDTH, display.y, PANEL_FILL);
    draw_line(display.x, 0.0, display.x, display.y, 2.0, DARKGRAY);
    draw_text(
        &format!("Players ({})", count),
        display.x + PANEL_PADDING,
        28.0,
        24.0,
        WHITE,
    );
}

fn draw_roster_row(display: Vec2, index: usize, row: &RosterRow) {
    let x = display.x + PANEL_PADDING;
    let top = 44.0 + index as f32 * ROW_HEIGHT;

    if row.is_local {
        draw_rectangle(display.x + 4.0, top, PANEL_WIDTH - 8.0, ROW_HEIGHT - 4.0, LOCAL_ROW_FILL);
    }

    let name = if row.is_local {
        format!("{} (you)", row.name)
    } else {
        row.name.clone()
    };
    draw_text(&name, x, top + 15.0, 18.0, if row.is_local { HIGHLIGHT } else { WHITE });

    let status = if row.moving { "moving" } else { "idle" };
    let detail = format!("{} ({}, {}) {}", status, row.x, row.y, row.facing.label());
    draw_text(&detail, x, top + 31.0, 14.0, LIGHTGRAY);
}

fn draw_connection_status(display: Vec2, state: ConnectionState, error: Option<&str>) {
    let x = display.x + PANEL_PADDING;
    let bottom = display.y - PANEL_PADDING;
    let color = match state {
        ConnectionState::Open => GREEN,
        ConnectionState::Connecting => YELLOW,
        ConnectionState::Closed | ConnectionState::Disconnected => RED,
    };

    draw_circle(x + 5.0, bottom - 5.0, 5.0, color);
    draw_text(&state.to_string(), x + 16.0, bottom, 16.0, WHITE);

    if let Some(error) = error {
        draw_text(error, x, bottom - 20.0, 14.0, ORANGE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::recompute;
    use shared::{AssetSet, Participant};
    use std::collections::BTreeMap;

    const DISPLAY: Vec2 = Vec2::new(800.0, 600.0);

    fn store_with(participants: Vec<Participant>) -> EntityStore {
        let mut frames = BTreeMap::new();
        frames.insert(Direction::Down, vec!["down-0".to_string()]);
        let mut store = EntityStore::new();
        store.register_asset_set(
            "knight",
            AssetSet {
                name: "knight".to_string(),
                frames,
            },
        );
        for mut participant in participants {
            if participant.avatar.is_empty() {
                participant.avatar = "knight".to_string();
            }
            store.upsert_participant(participant);
        }
        store
    }

    fn plan(store: &EntityStore, viewport: Viewport, local: Option<&ParticipantId>) -> Frame {
        Renderer::new(DISPLAY).plan_frame(&FrameInputs {
            store,
            viewport,
            local_id: local,
            backdrop: BackdropStatus::Ready,
            connection: ConnectionState::Open,
            last_error: None,
        })
    }

    fn origin_viewport() -> Viewport {
        recompute(vec2(WORLD_SIZE, WORLD_SIZE), DISPLAY, Vec2::ZERO)
    }

    #[test]
    fn test_visibility_margin_includes_sprite_size() {
        assert!(is_visible(vec2(-SPRITE_SIZE, 0.0), DISPLAY));
        assert!(is_visible(vec2(DISPLAY.x + SPRITE_SIZE, DISPLAY.y + 10.0), DISPLAY));
        assert!(!is_visible(vec2(-SPRITE_SIZE - 1.0, 0.0), DISPLAY));
        assert!(!is_visible(vec2(0.0, DISPLAY.y + SPRITE_SIZE + 1.0), DISPLAY));
    }

    #[test]
    fn test_culled_participants_stay_in_roster() {
        let store = store_with(vec![
            Participant::new("near", "near", 100.0, 100.0),
            Participant::new("edge", "edge", 830.0, 300.0),
            Participant::new("far", "far", 1500.0, 1500.0),
        ]);
        let frame = plan(&store, origin_viewport(), None);

        let drawn: Vec<&str> = frame.sprites().map(|s| s.label.as_str()).collect();
        assert_eq!(drawn.len(), 2);
        assert!(drawn.contains(&"near"));
        assert!(drawn.contains(&"edge"));
        assert_eq!(frame.roster().count(), 3);
        assert!(frame
            .commands
            .contains(&DrawCommand::RosterHeader { count: 3 }));
    }

    #[test]
    fn test_screen_position_is_relative_to_viewport() {
        let store = store_with(vec![
            Participant::new("me", "ada", 500.0, 500.0),
            Participant::new("other", "bob", 100.0, 100.0),
        ]);
        let me = ParticipantId::new("me");
        let viewport = recompute(vec2(WORLD_SIZE, WORLD_SIZE), DISPLAY, vec2(500.0, 500.0));
        let frame = plan(&store, viewport, Some(&me));

        let local: Vec<&SpriteDraw> = frame.sprites().filter(|s| s.is_local).collect();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].screen, vec2(400.0, 300.0));

        // bob at (100,100) lands at (0,-100), beyond the one-sprite margin.
        assert!(frame.sprites().all(|s| s.label != "bob"));
        assert_eq!(frame.roster().count(), 2);
    }

    #[test]
    fn test_sprite_near_top_edge_is_offset_by_viewport() {
        let store = store_with(vec![
            Participant::new("me", "ada", 500.0, 500.0),
            Participant::new("other", "cy", 140.0, 170.0),
        ]);
        let me = ParticipantId::new("me");
        let viewport = recompute(vec2(WORLD_SIZE, WORLD_SIZE), DISPLAY, vec2(500.0, 500.0));
        let frame = plan(&store, viewport, Some(&me));

        let other = frame.sprites().find(|s| s.label == "cy").unwrap();
        assert_eq!(other.screen, vec2(40.0, -30.0));
        assert!(!other.is_local);
    }

    #[test]
    fn test_panel_commands_exclude_world_and_edge_sprites_reach_panel() {
        let store = store_with(vec![
            Participant::new("near", "near", 100.0, 100.0),
            Participant::new("edge", "edge", 830.0, 300.0),
        ]);
        let frame = plan(&store, origin_viewport(), None);

        let panel: Vec<&DrawCommand> = frame.panel().collect();
        assert_eq!(panel.len(), 4);
        assert_eq!(panel[0], &DrawCommand::RosterHeader { count: 2 });
        assert!(matches!(panel[3], DrawCommand::ConnectionStatus { .. }));
        assert!(panel.iter().all(|command| command.is_panel()));

        let edge = frame.sprites().find(|s| s.label == "edge").unwrap();
        let near = frame.sprites().find(|s| s.label == "near").unwrap();
        assert!(overlaps_panel(edge, frame.display));
        assert!(!overlaps_panel(near, frame.display));
    }

    #[test]
    fn test_missing_frame_skips_sprite_only() {
        let mut ghost = Participant::new("ghost", "ghost", 50.0, 50.0);
        ghost.facing = Direction::Left;
        let store = store_with(vec![ghost, Participant::new("ok", "ok", 60.0, 60.0)]);

        let frame = plan(&store, origin_viewport(), None);

        assert_eq!(frame.sprites().count(), 1);
        assert_eq!(frame.roster().count(), 2);
    }

    #[test]
    fn test_roster_rows_round_coordinates_and_mark_local() {
        let mut moving = Participant::new("me", "ada", 10.4, 19.6);
        moving.is_moving = true;
        moving.facing = Direction::Right;
        let store = store_with(vec![moving, Participant::new("zed", "zed", 0.0, 0.0)]);
        let me = ParticipantId::new("me");

        let frame = plan(&store, origin_viewport(), Some(&me));
        let rows: Vec<&RosterRow> = frame.roster().collect();

        assert_eq!(
            rows[0],
            &RosterRow {
                name: "ada".to_string(),
                moving: true,
                x: 10,
                y: 20,
                facing: Direction::Right,
                is_local: true,
            }
        );
        assert!(!rows[1].is_local);
        assert!(!rows[1].moving);
    }

    #[test]
    fn test_sprites_sorted_by_depth() {
        let store = store_with(vec![
            Participant::new("a", "low", 100.0, 400.0),
            Participant::new("b", "high", 100.0, 50.0),
        ]);
        let frame = plan(&store, origin_viewport(), None);
        let order: Vec<&str> = frame.sprites().map(|s| s.label.as_str()).collect();
        assert_eq!(order, vec!["high", "low"]);
    }

    #[test]
    fn test_backdrop_fallback_and_status_indicator() {
        let store = store_with(Vec::new());
        let frame = Renderer::new(DISPLAY).plan_frame(&FrameInputs {
            store: &store,
            viewport: origin_viewport(),
            local_id: None,
            backdrop: BackdropStatus::Failed,
            connection: ConnectionState::Closed,
            last_error: Some("connection reset"),
        });

        assert!(matches!(
            frame.commands.first(),
            Some(DrawCommand::Placeholder { .. })
        ));
        assert_eq!(
            frame.commands.last(),
            Some(&DrawCommand::ConnectionStatus {
                state: ConnectionState::Closed,
                error: Some("connection reset".to_string()),
            })
        );
    }

    #[test]
    fn test_backdrop_source_is_viewport() {
        let store = store_with(Vec::new());
        let viewport = recompute(vec2(WORLD_SIZE, WORLD_SIZE), DISPLAY, vec2(500.0, 500.0));
        let frame = plan(&store, viewport, None);

        assert_eq!(
            frame.commands[0],
            DrawCommand::Backdrop {
                source: Rect::new(100.0, 200.0, 800.0, 600.0),
                dest: Rect::new(0.0, 0.0, 800.0, 600.0),
            }
        );
    }

    #[test]
    fn test_resize_reserves_panel() {
        let mut renderer = Renderer::new(DISPLAY);
        renderer.resize(1020.0, 700.0);
        assert_eq!(renderer.display_size(), vec2(1020.0 - PANEL_WIDTH, 700.0));
        renderer.resize(100.0, 100.0);
        assert_eq!(renderer.display_size(), vec2(0.0, 100.0));
    }

    #[test]
    fn test_scheduler_coalesces_requests() {
        let mut scheduler = FrameScheduler::new();
        assert!(scheduler.take());
        assert!(!scheduler.take());

        scheduler.request();
        scheduler.request();
        scheduler.request();
        assert!(scheduler.take());
        assert!(!scheduler.take());
    }
}
