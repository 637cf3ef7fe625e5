//! Rendering surface abstraction (map widget with marker objects).

use crate::error::SurfaceError;
use crate::types::{GeoPoint, MarkerId};
use serde::{Deserialize, Serialize};

/// Invoked by the surface when the user clicks a marker.
pub type ClickHandler = Box<dyn Fn() + Send>;

/// Everything a marker displays besides its position.
///
/// Compared by value to decide whether an in-place update is needed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarkerMeta {
    /// Headline (fleet number)
    pub title: String,

    /// Icon rotation in degrees
    pub heading: f64,

    /// Status badge text
    pub badge: String,

    /// Popup rows as (label, value)
    pub details: Vec<(String, String)>,
}

/// Camera transition request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraMove {
    pub center: GeoPoint,
    pub zoom: f64,
    pub pitch: f64,
    pub duration_ms: u64,
}

/// Built-in map controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    Navigation,
    Geolocate,
}

/// A stateful map that owns marker objects.
///
/// # Mount lifecycle
///
/// ```text
/// mounted(gen 1) ──unmount──► unmounted ──mount──► mounted(gen 2)
///    markers live             all markers gone      starts empty
/// ```
///
/// `mount_generation` changes every time the surface is (re)mounted, which
/// is how callers detect that previously created markers no longer exist.
pub trait RenderSurface: Send {
    /// Whether the container exists and the map is ready.
    fn is_mounted(&self) -> bool;

    /// Increments on every mount.
    fn mount_generation(&self) -> u64;

    fn create_marker(
        &mut self,
        position: GeoPoint,
        meta: &MarkerMeta,
        on_click: ClickHandler,
    ) -> Result<MarkerId, SurfaceError>;

    fn update_marker(
        &mut self,
        marker: MarkerId,
        position: GeoPoint,
        meta: &MarkerMeta,
    ) -> Result<(), SurfaceError>;

    /// Removes the marker and releases its resources (handler included).
    fn remove_marker(&mut self, marker: MarkerId) -> Result<(), SurfaceError>;

    fn pan_to(&mut self, camera: &CameraMove) -> Result<(), SurfaceError>;

    fn add_control(&mut self, kind: ControlKind) -> Result<(), SurfaceError>;
}
