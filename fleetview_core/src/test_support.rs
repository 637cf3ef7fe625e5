//! In-crate doubles for the environment capabilities.

use fleetview_env::{
    AcquisitionError, CameraMove, ClickHandler, Clock, ControlKind, ErrorCallback, Fix,
    FixCallback, GeoPoint, MarkerId, MarkerMeta, PositionProvider, RenderSurface, SurfaceError,
    WatchHandle, WatchOptions,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Manually advanced clock starting at 2024-01-01 00:00:00 UTC.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_704_067_200) + self.now()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceOp {
    Create(MarkerId, String),
    Update(MarkerId, String),
    Remove(MarkerId),
    Pan(CameraMove),
    Control(ControlKind),
}

/// Surface that records every call.
pub struct FakeSurface {
    pub mounted: bool,
    pub generation: u64,
    pub ops: Vec<SurfaceOp>,
    pub markers: BTreeMap<MarkerId, (GeoPoint, MarkerMeta)>,
    handlers: BTreeMap<MarkerId, ClickHandler>,
    next_marker: u64,
}

impl FakeSurface {
    pub fn mounted() -> Self {
        Self {
            mounted: true,
            generation: 1,
            ops: Vec::new(),
            markers: BTreeMap::new(),
            handlers: BTreeMap::new(),
            next_marker: 0,
        }
    }

    pub fn unmount(&mut self) {
        self.mounted = false;
        self.markers.clear();
        self.handlers.clear();
    }

    pub fn remount(&mut self) {
        self.unmount();
        self.mounted = true;
        self.generation += 1;
    }

    pub fn click(&self, marker: MarkerId) {
        if let Some(handler) = self.handlers.get(&marker) {
            handler();
        }
    }

    pub fn count(&self, pred: impl Fn(&SurfaceOp) -> bool) -> usize {
        self.ops.iter().filter(|op| pred(op)).count()
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }
}

impl RenderSurface for FakeSurface {
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
        let id = MarkerId(self.next_marker);
        self.markers.insert(id, (position, meta.clone()));
        self.handlers.insert(id, on_click);
        self.ops.push(SurfaceOp::Create(id, meta.title.clone()));
        Ok(id)
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
        let slot = self
            .markers
            .get_mut(&marker)
            .ok_or(SurfaceError::UnknownMarker(marker))?;
        *slot = (position, meta.clone());
        self.ops.push(SurfaceOp::Update(marker, meta.title.clone()));
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
        self.ops.push(SurfaceOp::Remove(marker));
        Ok(())
    }

    fn pan_to(&mut self, camera: &CameraMove) -> Result<(), SurfaceError> {
        if !self.mounted {
            return Err(SurfaceError::NotMounted);
        }
        self.ops.push(SurfaceOp::Pan(*camera));
        Ok(())
    }

    fn add_control(&mut self, kind: ControlKind) -> Result<(), SurfaceError> {
        if !self.mounted {
            return Err(SurfaceError::NotMounted);
        }
        self.ops.push(SurfaceOp::Control(kind));
        Ok(())
    }
}

/// Provider whose fixes and failures are pushed by the test.
#[derive(Default)]
pub struct FakeProvider {
    pub deny: bool,
    pub log: Vec<String>,
    pub max_active: usize,
    watches: BTreeMap<WatchHandle, (FixCallback, ErrorCallback)>,
    next_handle: u64,
}

impl FakeProvider {
    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    pub fn active(&self) -> usize {
        self.watches.len()
    }

    pub fn push_fix(&mut self, fix: Fix) {
        for (on_fix, _) in self.watches.values_mut() {
            on_fix(fix);
        }
    }

    pub fn push_error(&mut self, error: AcquisitionError) {
        for (_, on_error) in self.watches.values_mut() {
            on_error(error.clone());
        }
    }
}

impl PositionProvider for FakeProvider {
    fn watch(
        &mut self,
        _options: &WatchOptions,
        on_fix: FixCallback,
        on_error: ErrorCallback,
    ) -> Result<WatchHandle, AcquisitionError> {
        if self.deny {
            self.log.push("denied".to_string());
            return Err(AcquisitionError::PermissionDenied);
        }
        self.next_handle += 1;
        let handle = WatchHandle(self.next_handle);
        self.watches.insert(handle, (on_fix, on_error));
        self.max_active = self.max_active.max(self.watches.len());
        self.log.push(format!("watch {}", handle.0));
        Ok(handle)
    }

    fn cancel(&mut self, handle: WatchHandle) {
        if self.watches.remove(&handle).is_some() {
            self.log.push(format!("cancel {}", handle.0));
        }
    }

    fn current_fix(&mut self, _options: &WatchOptions) -> Result<Fix, AcquisitionError> {
        Err(AcquisitionError::Timeout(10_000))
    }
}
