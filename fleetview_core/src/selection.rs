//! Focused-entity tracking and camera control.

use crate::config::{CameraConfig, CameraPreset};
use crate::registry::EntityRegistry;
use fleetview_env::{CameraMove, EntityId, GeoPoint, RenderSurface};
use tokio::sync::mpsc;
use tracing::debug;

impl CameraPreset {
    pub fn toward(&self, center: GeoPoint) -> CameraMove {
        CameraMove {
            center,
            zoom: self.zoom,
            pitch: self.pitch,
            duration_ms: self.duration_ms,
        }
    }
}

/// Sending half handed to marker click handlers.
#[derive(Clone)]
pub struct SelectionRequests(mpsc::UnboundedSender<EntityId>);

impl SelectionRequests {
    /// Fire-and-forget; a dropped controller just ignores the click.
    pub fn request(&self, id: EntityId) {
        let _ = self.0.send(id);
    }
}

/// Tracks which entity the operator is looking at.
pub struct SelectionController {
    focused: Option<EntityId>,

    /// Where the camera was last sent for the focused entity
    last_center: Option<GeoPoint>,

    camera: CameraConfig,

    requests_tx: mpsc::UnboundedSender<EntityId>,
    requests_rx: mpsc::UnboundedReceiver<EntityId>,
}

impl SelectionController {
    pub fn new(camera: CameraConfig) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        Self {
            focused: None,
            last_center: None,
            camera,
            requests_tx,
            requests_rx,
        }
    }

    /// A handle for click handlers to request a selection.
    pub fn requests(&self) -> SelectionRequests {
        SelectionRequests(self.requests_tx.clone())
    }

    pub fn focused(&self) -> Option<&EntityId> {
        self.focused.as_ref()
    }

    pub fn set_follow(&mut self, follow: bool) {
        self.camera.follow_selected = follow;
    }

    /// Focuses `id` and flies the camera to its current position.
    ///
    /// Unknown ids leave the selection unchanged.
    pub fn select<S>(&mut self, id: &EntityId, registry: &EntityRegistry, surface: &mut S) -> bool
    where
        S: RenderSurface + ?Sized,
    {
        let Some(entity) = registry.get(id) else {
            debug!("selection: ignoring unknown entity {}", id);
            return false;
        };

        let center = entity.position;
        self.focused = Some(id.clone());
        self.last_center = Some(center);
        if let Err(e) = surface.pan_to(&self.camera.focus.toward(center)) {
            debug!("selection: camera move deferred ({})", e);
        }
        true
    }

    pub fn clear(&mut self) {
        self.focused = None;
        self.last_center = None;
    }

    /// "My location": flies to a point without changing the focus.
    pub fn center_on<S>(&mut self, point: GeoPoint, surface: &mut S)
    where
        S: RenderSurface + ?Sized,
    {
        if let Err(e) = surface.pan_to(&self.camera.user.toward(point)) {
            debug!("selection: camera move deferred ({})", e);
        }
    }

    /// Runs after each reconciliation pass.
    ///
    /// Drops a selection whose entity vanished; in follow mode re-centers on
    /// the focused entity when it moved.
    pub fn refresh<S>(&mut self, registry: &EntityRegistry, surface: &mut S)
    where
        S: RenderSurface + ?Sized,
    {
        let Some(id) = &self.focused else {
            return;
        };

        let Some(entity) = registry.get(id) else {
            debug!("selection: {} left the registry, clearing", id);
            self.clear();
            return;
        };

        if self.camera.follow_selected && self.last_center != Some(entity.position) {
            let center = entity.position;
            if surface.pan_to(&self.camera.follow.toward(center)).is_ok() {
                self.last_center = Some(center);
            }
        }
    }

    /// Applies click requests queued since the last call; the last one wins.
    pub fn drain_requests<S>(&mut self, registry: &EntityRegistry, surface: &mut S) -> Option<EntityId>
    where
        S: RenderSurface + ?Sized,
    {
        let mut last = None;
        while let Ok(id) = self.requests_rx.try_recv() {
            last = Some(id);
        }
        let id = last?;
        self.select(&id, registry, surface).then_some(id)
    }
}
