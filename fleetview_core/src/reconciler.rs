//! Registry → render-surface synchronization.
//!
//! Every pass computes a three-way diff between the entity ids handed in and
//! the markers this reconciler created:
//!
//! ```text
//!   entities only  → create marker (+ click handler → selection)
//!   both           → update in place, only if position/meta changed
//!   markers only   → remove marker, release handle
//! ```
//!
//! Markers are never destroyed and recreated to apply an update; that would
//! flicker and close any open popup.

use crate::entity::Entity;
use crate::selection::SelectionRequests;
use fleetview_env::{EntityId, GeoPoint, MarkerId, MarkerMeta, RenderSurface, SurfaceError};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// What one applied pass did to the surface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: Vec<EntityId>,
    pub updated: Vec<EntityId>,
    pub removed: Vec<EntityId>,
}

impl SyncReport {
    /// No surface call was made.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Outcome of a `sync` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Applied(SyncReport),
    /// Surface not mounted; retried on the next pass
    Deferred,
}

/// Marker contents for an entity.
pub fn marker_meta(entity: &Entity) -> MarkerMeta {
    let passengers = entity
        .occupancy
        .map(|o| o.to_string())
        .unwrap_or_else(|| "-".to_string());

    MarkerMeta {
        title: entity.id.to_string(),
        heading: entity.heading,
        badge: entity.status.to_string(),
        details: vec![
            ("Route".to_string(), entity.label.clone()),
            ("Status".to_string(), entity.status.to_string()),
            ("Passengers".to_string(), passengers),
            ("Next Stop".to_string(), entity.next_stop.clone()),
            ("ETA".to_string(), entity.eta.clone()),
        ],
    }
}

struct TrackedMarker {
    marker: MarkerId,
    position: GeoPoint,
    meta: MarkerMeta,
}

/// Owns the entity-id → marker mapping for one surface.
pub struct MapSyncReconciler {
    markers: BTreeMap<EntityId, TrackedMarker>,

    /// Mount generation the tracked markers belong to
    generation: Option<u64>,

    selection: SelectionRequests,
}

impl MapSyncReconciler {
    pub fn new(selection: SelectionRequests) -> Self {
        Self {
            markers: BTreeMap::new(),
            generation: None,
            selection,
        }
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn marker_for(&self, id: &EntityId) -> Option<MarkerId> {
        self.markers.get(id).map(|t| t.marker)
    }

    /// Makes the surface's markers match `entities`.
    pub fn sync<'a, I, S>(&mut self, entities: I, surface: &mut S) -> SyncOutcome
    where
        I: IntoIterator<Item = &'a Entity>,
        S: RenderSurface + ?Sized,
    {
        if !surface.is_mounted() {
            self.forget("surface not mounted");
            return SyncOutcome::Deferred;
        }

        let generation = surface.mount_generation();
        if self.generation != Some(generation) {
            self.forget("surface remounted");
            self.generation = Some(generation);
        }

        match self.apply(entities, surface) {
            Ok(report) => {
                if !report.is_noop() {
                    debug!(
                        "sync: +{} ~{} -{} ({} markers)",
                        report.created.len(),
                        report.updated.len(),
                        report.removed.len(),
                        self.markers.len()
                    );
                }
                SyncOutcome::Applied(report)
            }
            Err(SurfaceError::NotMounted) => {
                self.forget("surface unmounted mid-pass");
                SyncOutcome::Deferred
            }
            Err(e) => {
                // apply() absorbs per-marker errors; anything else is unexpected
                warn!("sync: aborted ({})", e);
                SyncOutcome::Deferred
            }
        }
    }

    /// Removes every marker this reconciler created.
    pub fn teardown<S>(&mut self, surface: &mut S)
    where
        S: RenderSurface + ?Sized,
    {
        if surface.is_mounted() && self.generation == Some(surface.mount_generation()) {
            for tracked in self.markers.values() {
                let _ = surface.remove_marker(tracked.marker);
            }
        }
        self.markers.clear();
        self.generation = None;
    }

    fn apply<'a, I, S>(&mut self, entities: I, surface: &mut S) -> Result<SyncReport, SurfaceError>
    where
        I: IntoIterator<Item = &'a Entity>,
        S: RenderSurface + ?Sized,
    {
        let desired: BTreeMap<&EntityId, &Entity> =
            entities.into_iter().map(|e| (&e.id, e)).collect();
        let mut report = SyncReport::default();

        let stale: Vec<EntityId> = self
            .markers
            .keys()
            .filter(|id| !desired.contains_key(id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(tracked) = self.markers.remove(&id) {
                match surface.remove_marker(tracked.marker) {
                    Ok(()) | Err(SurfaceError::UnknownMarker(_)) => {}
                    Err(e) => return Err(e),
                }
                report.removed.push(id);
            }
        }

        let mut lost = BTreeSet::new();
        for (id, entity) in &desired {
            let Some(tracked) = self.markers.get_mut(*id) else {
                continue;
            };
            let meta = marker_meta(entity);
            if tracked.position == entity.position && tracked.meta == meta {
                continue;
            }
            match surface.update_marker(tracked.marker, entity.position, &meta) {
                Ok(()) => {
                    tracked.position = entity.position;
                    tracked.meta = meta;
                    report.updated.push((*id).clone());
                }
                Err(SurfaceError::UnknownMarker(marker)) => {
                    warn!("sync: {} vanished from surface, recreating", marker);
                    lost.insert((*id).clone());
                }
                Err(e) => return Err(e),
            }
        }
        for id in &lost {
            self.markers.remove(id);
        }

        for (id, entity) in desired {
            if self.markers.contains_key(id) {
                continue;
            }
            let meta = marker_meta(entity);
            let requests = self.selection.clone();
            let click_id = id.clone();
            let on_click = Box::new(move || requests.request(click_id.clone()));

            let marker = surface.create_marker(entity.position, &meta, on_click)?;
            self.markers.insert(
                id.clone(),
                TrackedMarker {
                    marker,
                    position: entity.position,
                    meta,
                },
            );
            report.created.push(id.clone());
        }

        Ok(report)
    }

    fn forget(&mut self, reason: &str) {
        if !self.markers.is_empty() {
            debug!("sync: dropping {} markers ({})", self.markers.len(), reason);
        }
        self.markers.clear();
        self.generation = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EntityRegistry;
    use crate::selection::SelectionController;
    use crate::config::CameraConfig;
    use crate::test_support::{FakeSurface, ManualClock, SurfaceOp};

    fn bus(id: &str, lat: f64) -> Entity {
        Entity::new(EntityId::new(id), format!("Route {}", id), GeoPoint::new(lat, 75.0))
            .with_motion(90.0, 40.0)
    }

    fn applied(outcome: SyncOutcome) -> SyncReport {
        match outcome {
            SyncOutcome::Applied(report) => report,
            SyncOutcome::Deferred => panic!("expected an applied pass"),
        }
    }

    fn setup() -> (MapSyncReconciler, SelectionController, EntityRegistry, FakeSurface) {
        let selection = SelectionController::new(CameraConfig::default());
        let reconciler = MapSyncReconciler::new(selection.requests());
        let registry = EntityRegistry::new(ManualClock::shared());
        (reconciler, selection, registry, FakeSurface::mounted())
    }

    #[test]
    fn test_sync_is_idempotent() {
        let (mut reconciler, _, mut registry, mut surface) = setup();
        registry.upsert(bus("A", 31.0));
        registry.upsert(bus("B", 31.1));

        let first = applied(reconciler.sync(registry.list(), &mut surface));
        assert_eq!(first.created.len(), 2);

        surface.clear_ops();
        let second = applied(reconciler.sync(registry.list(), &mut surface));
        assert!(second.is_noop());
        assert!(surface.ops.is_empty());
    }

    #[test]
    fn test_sync_three_way_diff() {
        let (mut reconciler, _, mut registry, mut surface) = setup();
        registry.upsert(bus("A", 31.0));
        registry.upsert(bus("B", 31.1));
        reconciler.sync(registry.list(), &mut surface);
        let marker_a = reconciler.marker_for(&EntityId::new("A")).unwrap();
        surface.clear_ops();

        registry.modify(&EntityId::new("A"), |e| e.position = GeoPoint::new(31.01, 75.0));
        registry.remove(&EntityId::new("B"));
        registry.upsert(bus("C", 31.2));
        let report = applied(reconciler.sync(registry.list(), &mut surface));

        assert_eq!(report.updated, vec![EntityId::new("A")]);
        assert_eq!(report.removed, vec![EntityId::new("B")]);
        assert_eq!(report.created, vec![EntityId::new("C")]);
        assert_eq!(surface.count(|op| matches!(op, SurfaceOp::Update(..))), 1);
        assert_eq!(surface.count(|op| matches!(op, SurfaceOp::Remove(_))), 1);
        assert_eq!(surface.count(|op| matches!(op, SurfaceOp::Create(..))), 1);
        // Updated in place, same handle
        assert_eq!(reconciler.marker_for(&EntityId::new("A")), Some(marker_a));
    }

    #[test]
    fn test_marker_count_matches_entities() {
        let (mut reconciler, _, mut registry, mut surface) = setup();
        for (i, id) in ["A", "B", "C", "D"].iter().enumerate() {
            registry.upsert(bus(id, 31.0 + i as f64 * 0.1));
        }
        reconciler.sync(registry.list(), &mut surface);
        assert_eq!(reconciler.marker_count(), 4);
        assert_eq!(surface.markers.len(), 4);

        registry.remove(&EntityId::new("C"));
        reconciler.sync(registry.list(), &mut surface);
        assert_eq!(reconciler.marker_count(), 3);
        assert_eq!(surface.markers.len(), 3);
    }

    #[test]
    fn test_unmounted_surface_defers() {
        let (mut reconciler, _, mut registry, mut surface) = setup();
        registry.upsert(bus("A", 31.0));
        surface.unmount();

        assert_eq!(reconciler.sync(registry.list(), &mut surface), SyncOutcome::Deferred);
        assert_eq!(reconciler.marker_count(), 0);
    }

    #[test]
    fn test_remount_rebuilds_all_markers() {
        let (mut reconciler, _, mut registry, mut surface) = setup();
        registry.upsert(bus("A", 31.0));
        registry.upsert(bus("B", 31.1));
        reconciler.sync(registry.list(), &mut surface);

        surface.remount();
        surface.clear_ops();
        let report = applied(reconciler.sync(registry.list(), &mut surface));

        assert_eq!(report.created.len(), 2);
        assert!(report.removed.is_empty());
        assert_eq!(surface.markers.len(), 2);
        assert_eq!(surface.count(|op| matches!(op, SurfaceOp::Remove(_))), 0);
    }

    #[test]
    fn test_marker_click_selects_entity() {
        let (mut reconciler, mut selection, mut registry, mut surface) = setup();
        registry.upsert(bus("A", 31.0));
        reconciler.sync(registry.list(), &mut surface);

        let marker = reconciler.marker_for(&EntityId::new("A")).unwrap();
        surface.click(marker);

        let chosen = selection.drain_requests(&registry, &mut surface);
        assert_eq!(chosen, Some(EntityId::new("A")));
    }

    #[test]
    fn test_teardown_releases_markers() {
        let (mut reconciler, _, mut registry, mut surface) = setup();
        registry.upsert(bus("A", 31.0));
        registry.upsert(bus("B", 31.1));
        reconciler.sync(registry.list(), &mut surface);

        reconciler.teardown(&mut surface);
        assert_eq!(reconciler.marker_count(), 0);
        assert!(surface.markers.is_empty());
    }

    #[test]
    fn test_meta_change_updates_marker() {
        let (mut reconciler, _, mut registry, mut surface) = setup();
        registry.upsert(bus("A", 31.0));
        reconciler.sync(registry.list(), &mut surface);

        registry.modify(&EntityId::new("A"), |e| e.eta = "4 min".to_string());
        let report = applied(reconciler.sync(registry.list(), &mut surface));
        assert_eq!(report.updated, vec![EntityId::new("A")]);

        let marker = reconciler.marker_for(&EntityId::new("A")).unwrap();
        let (_, meta) = &surface.markers[&marker];
        assert!(meta.details.contains(&("ETA".to_string(), "4 min".to_string())));
    }
}
