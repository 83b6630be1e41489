//! The client session context and its frame loop

use crate::assets::{AssetCache, AssetLoader, AssetSource};
use crate::camera::{self, Viewport};
use crate::config::ClientConfig;
use crate::input::{InputTranslator, RawInput, RawInputQueue};
use crate::network::{spawn_transport, TransportEvent};
use crate::rendering::{BackdropStatus, FrameInputs, FrameScheduler, Painter, Renderer};
use crate::session::{ConnectionSession, SessionError};
use crate::store::EntityStore;
use log::{info, warn};
use macroquad::prelude::*;
use shared::WORLD_SIZE;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Owns every piece of client state. All store mutation happens on the
/// thread running [`ClientApp::run`].
pub struct ClientApp {
    store: EntityStore,
    session: ConnectionSession,
    translator: InputTranslator,
    renderer: Renderer,
    scheduler: FrameScheduler,
    assets: AssetCache,
    painter: Painter,
    raw_input: RawInputQueue,
    window: WindowSize,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    transport_task: JoinHandle<()>,
}

impl ClientApp {
    /// Must be called from inside the macroquad window, after the graphics
    /// context exists.
    pub fn new(config: &ClientConfig, runtime: Handle) -> Self {
        let transport = spawn_transport(
            &runtime,
            config.server_url.clone(),
            config.reconnect_policy(),
        );

        let window = vec2(screen_width(), screen_height());
        let mut renderer = Renderer::new(window);
        renderer.resize(window.x, window.y);

        let backdrop = AssetSource::File(config.backdrop.clone());
        let mut assets = AssetCache::new(AssetLoader::new(runtime));
        assets.request(&backdrop);

        Self {
            store: EntityStore::new(),
            session: ConnectionSession::new(config.username.clone(), transport.outbound),
            translator: InputTranslator::new(),
            renderer,
            scheduler: FrameScheduler::new(),
            assets,
            painter: Painter::new(window, backdrop),
            raw_input: RawInputQueue::new(),
            window: WindowSize::new(window),
            transport_events: transport.events,
            transport_task: transport.task,
        }
    }

    pub async fn run(mut self) {
        prevent_quit();
        info!("Controls: arrow keys or WASD to move");

        loop {
            self.pump_transport();
            self.track_window_size();
            self.pump_input();
            self.pump_assets();
            self.repaint_if_requested();
            self.painter.present();

            if is_quit_requested() {
                break;
            }
            next_frame().await;
        }

        self.shutdown();
    }

    fn pump_transport(&mut self) {
        while let Ok(event) = self.transport_events.try_recv() {
            apply_transport_event(event, &mut self.session, &mut self.store, &mut self.scheduler);
        }
    }

    fn pump_input(&mut self) {
        for event in self.raw_input.drain() {
            apply_raw_input(event, &mut self.translator, &mut self.session);
        }
    }

    fn pump_assets(&mut self) {
        let settled = self.assets.poll();
        apply_settled_assets(&settled, self.painter.backdrop(), &mut self.scheduler);
        self.painter.flush_deferred(&settled, &self.assets);
    }

    fn track_window_size(&mut self) {
        if let Some(window) = self.window.update(vec2(screen_width(), screen_height())) {
            info!("Window resized to {}x{}", window.x, window.y);
            self.renderer.resize(window.x, window.y);
            self.painter.resize(window);
            self.scheduler.request();
        }
    }

    fn current_viewport(&self) -> Viewport {
        let focus = self
            .session
            .local_id()
            .and_then(|id| self.store.participant(id))
            .map(|participant| vec2(participant.x, participant.y))
            .unwrap_or(Vec2::ZERO);

        camera::recompute(
            vec2(WORLD_SIZE, WORLD_SIZE),
            self.renderer.display_size(),
            focus,
        )
    }

    fn repaint_if_requested(&mut self) {
        if !self.scheduler.take() {
            return;
        }

        let frame = self.renderer.plan_frame(&FrameInputs {
            store: &self.store,
            viewport: self.current_viewport(),
            local_id: self.session.local_id(),
            backdrop: BackdropStatus::from(self.assets.status(self.painter.backdrop())),
            connection: self.session.state(),
            last_error: self.session.last_error(),
        });
        self.painter.paint(&frame, &mut self.assets);
    }

    fn shutdown(self) {
        info!("Shutting down");
        // Dropping the session drops the last outbound sender, which closes
        // the socket from the transport side.
        drop(self.session);
        drop(self.transport_events);
        if self.transport_task.is_finished() {
            info!("Transport already stopped");
        }
    }
}

/// Applies one transport event, requesting a repaint when the view changed.
/// A rejected join repaints too, so the panel shows the reason.
pub fn apply_transport_event(
    event: TransportEvent,
    session: &mut ConnectionSession,
    store: &mut EntityStore,
    scheduler: &mut FrameScheduler,
) {
    match session.handle_transport_event(event, store) {
        Ok(applied) => {
            if applied.requests_render() {
                scheduler.request();
            }
        }
        Err(e @ SessionError::JoinRejected(_)) => {
            warn!("{}", e);
            scheduler.request();
        }
        Err(e) => warn!("Dropped server event: {}", e),
    }
}

pub fn apply_raw_input(
    event: RawInput,
    translator: &mut InputTranslator,
    session: &mut ConnectionSession,
) {
    let intent = match event {
        RawInput::KeyDown(key) => translator.on_key_down(key),
        RawInput::KeyUp(key) => translator.on_key_up(key),
        RawInput::FocusLost => Some(translator.on_focus_lost()),
    };

    if let Some(intent) = intent {
        session.send_intent(intent);
    }
}

/// Sprite images are flushed by the painter; only the backdrop needs a
/// fresh frame once it settles.
pub fn apply_settled_assets(
    settled: &[AssetSource],
    backdrop: &AssetSource,
    scheduler: &mut FrameScheduler,
) {
    if settled.contains(backdrop) {
        scheduler.request();
    }
}

/// Last seen window size. macroquad does not forward resize events to input
/// subscribers, so the frame loop polls the screen size instead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSize {
    last: Vec2,
}

impl WindowSize {
    pub fn new(initial: Vec2) -> Self {
        Self { last: initial }
    }

    /// Returns the new size when it differs from the last one seen.
    pub fn update(&mut self, current: Vec2) -> Option<Vec2> {
        if current == self.last {
            return None;
        }
        self.last = current;
        Some(current)
    }
}
