//! In-memory map surface that records every call.

use fleetview_env::{
    CameraMove, ClickHandler, ControlKind, GeoPoint, MarkerId, MarkerMeta, RenderSurface,
    SurfaceError,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// One call made against the surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum SurfaceEvent {
    Created { marker: u64, title: String },
    Updated { marker: u64, title: String },
    Removed { marker: u64 },
    Camera { camera: CameraMove },
    Control { control: ControlKind },
    Mounted { generation: u64 },
    Unmounted,
}

/// A live marker as the surface currently shows it.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMarker {
    pub position: GeoPoint,
    pub meta: MarkerMeta,
}

pub struct RecordingSurface {
    mounted: bool,
    generation: u64,
    markers: BTreeMap<MarkerId, RenderedMarker>,
    handlers: BTreeMap<MarkerId, ClickHandler>,
    next_marker: u64,
    camera: Option<CameraMove>,
    events: Vec<SurfaceEvent>,
}

impl Default for RecordingSurface {
    fn default() -> Self {
        Self::mounted()
    }
}

impl RecordingSurface {
    /// A surface whose container is ready (generation 1).
    pub fn mounted() -> Self {
        Self {
            mounted: true,
            generation: 1,
            markers: BTreeMap::new(),
            handlers: BTreeMap::new(),
            next_marker: 0,
            camera: None,
            events: vec![SurfaceEvent::Mounted { generation: 1 }],
        }
    }

    /// Container removed; every marker is destroyed with it.
    pub fn unmount(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;
        self.markers.clear();
        self.handlers.clear();
        self.events.push(SurfaceEvent::Unmounted);
    }

    /// Container (re)created, empty, with a new generation.
    pub fn mount(&mut self) {
        if self.mounted {
            return;
        }
        self.mounted = true;
        self.generation += 1;
        self.events.push(SurfaceEvent::Mounted {
            generation: self.generation,
        });
    }

    /// Simulates a user click on a marker.
    pub fn click(&self, marker: MarkerId) -> bool {
        match self.handlers.get(&marker) {
            Some(handler) => {
                handler();
                true
            }
            None => false,
        }
    }

    pub fn markers(&self) -> &BTreeMap<MarkerId, RenderedMarker> {
        &self.markers
    }

    /// Marker whose title matches, if rendered.
    pub fn find(&self, title: &str) -> Option<MarkerId> {
        self.markers
            .iter()
            .find(|(_, m)| m.meta.title == title)
            .map(|(id, _)| *id)
    }

    pub fn camera(&self) -> Option<CameraMove> {
        self.camera
    }

    pub fn events(&self) -> &[SurfaceEvent] {
        &self.events
    }

    /// Events recorded since `offset`, for per-frame export.
    pub fn events_since(&self, offset: usize) -> &[SurfaceEvent] {
        self.events.get(offset..).unwrap_or(&[])
    }

    pub fn count(&self, pred: impl Fn(&SurfaceEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl RenderSurface for RecordingSurface {
    fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn mount_generation(&self) -> u64 {
        self.generation
    }

    fn create_marker(
        &mut self,
        position: GeoPoint,
        meta: &MarkerMeta,
        on_click: ClickHandler,
    ) -> Result<MarkerId, SurfaceError> {
        if !self.mounted {
            return Err(SurfaceError::NotMounted);
        }
        self.next_marker += 1;
        let marker = MarkerId(self.next_marker);
        self.markers.insert(
            marker,
            RenderedMarker {
                position,
                meta: meta.clone(),
            },
        );
        self.handlers.insert(marker, on_click);
        self.events.push(SurfaceEvent::Created {
            marker: marker.0,
            title: meta.title.clone(),
        });
        Ok(marker)
    }

    fn update_marker(
        &mut self,
        marker: MarkerId,
        position: GeoPoint,
        meta: &MarkerMeta,
    ) -> Result<(), SurfaceError> {
        if !self.mounted {
            return Err(SurfaceError::NotMounted);
        }
        let rendered = self
            .markers
            .get_mut(&marker)
            .ok_or(SurfaceError::UnknownMarker(marker))?;
        rendered.position = position;
        rendered.meta = meta.clone();
        self.events.push(SurfaceEvent::Updated {
            marker: marker.0,
            title: meta.title.clone(),
        });
        Ok(())
    }

    fn remove_marker(&mut self, marker: MarkerId) -> Result<(), SurfaceError> {
        if !self.mounted {
            return Err(SurfaceError::NotMounted);
        }
        self.markers
            .remove(&marker)
            .ok_or(SurfaceError::UnknownMarker(marker))?;
        self.handlers.remove(&marker);
        self.events.push(SurfaceEvent::Removed { marker: marker.0 });
        Ok(())
    }

    fn pan_to(&mut self, camera: &CameraMove) -> Result<(), SurfaceError> {
        if !self.mounted {
            return Err(SurfaceError::NotMounted);
        }
        self.camera = Some(*camera);
        self.events.push(SurfaceEvent::Camera { camera: *camera });
        Ok(())
    }

    fn add_control(&mut self, kind: ControlKind) -> Result<(), SurfaceError> {
        if !self.mounted {
            return Err(SurfaceError::NotMounted);
        }
        self.events.push(SurfaceEvent::Control { control: kind });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn meta(title: &str) -> MarkerMeta {
        MarkerMeta {
            title: title.to_string(),
            ..MarkerMeta::default()
        }
    }

    #[test]
    fn test_unmount_destroys_markers() {
        let mut surface = RecordingSurface::mounted();
        surface
            .create_marker(GeoPoint::new(31.0, 75.0), &meta("PB-001"), Box::new(|| {}))
            .unwrap();

        surface.unmount();
        assert!(surface.markers().is_empty());
        assert_eq!(
            surface.create_marker(GeoPoint::default(), &meta("x"), Box::new(|| {})),
            Err(SurfaceError::NotMounted)
        );

        surface.mount();
        assert_eq!(surface.mount_generation(), 2);
        assert!(surface.is_mounted());
    }

    #[test]
    fn test_click_invokes_handler() {
        let mut surface = RecordingSurface::mounted();
        let clicks = Arc::new(AtomicUsize::new(0));
        let counter = clicks.clone();
        let marker = surface
            .create_marker(
                GeoPoint::default(),
                &meta("PB-045"),
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert!(surface.click(marker));
        assert_eq!(clicks.load(Ordering::SeqCst), 1);
        assert_eq!(surface.find("PB-045"), Some(marker));
    }

    #[test]
    fn test_update_unknown_marker() {
        let mut surface = RecordingSurface::mounted();
        assert_eq!(
            surface.update_marker(MarkerId(9), GeoPoint::default(), &meta("x")),
            Err(SurfaceError::UnknownMarker(MarkerId(9)))
        );
    }
}
