//! Viewport derivation from the local participant's world position

use macroquad::math::{vec2, Rect, Vec2};

/// World-space rectangle currently visible in the display area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn origin(&self) -> Vec2 {
        vec2(self.x, self.y)
    }

    pub fn to_screen(&self, world: Vec2) -> Vec2 {
        world - self.origin()
    }

    pub fn as_rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

/// Centres the viewport on `focus`, then clamps each axis into
/// `[0, max(0, world - display)]`.
pub fn recompute(world_size: Vec2, display_size: Vec2, focus: Vec2) -> Viewport {
    let max_x = (world_size.x - display_size.x).max(0.0);
    let max_y = (world_size.y - display_size.y).max(0.0);

    Viewport {
        x: clamp_axis(focus.x - display_size.x / 2.0, max_x),
        y: clamp_axis(focus.y - display_size.y / 2.0, max_y),
        width: display_size.x,
        height: display_size.y,
    }
}

// NaN focus (bad server data) collapses to the origin.
fn clamp_axis(value: f32, max: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, max)
}
