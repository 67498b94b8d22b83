use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::backend::Backend;
use crate::config::WritebackOptions;
use crate::events::{Notification, Notifier};
use crate::model::{FloatPatch, FloatWindow, Patch};
use crate::store::EntityStore;

/// Source of the physical-to-logical scale factor.
///
/// Queried at every event, never cached: a floating view dragged across
/// monitors with different pixel densities changes factor between events.
pub trait DisplayMetrics {
    fn scale_factor(&self) -> f64;
}

/// Identity metrics for hosts that already deliver logical coordinates.
pub struct LogicalMetrics;

impl DisplayMetrics for LogicalMetrics {
    fn scale_factor(&self) -> f64 {
        1.0
    }
}

/// Raw move/resize/visibility event as emitted by the windowing layer,
/// positions and sizes in physical pixels.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawGeometry {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub w: Option<f64>,
    pub h: Option<f64>,
    pub show: Option<bool>,
}

impl RawGeometry {
    pub fn moved_to(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    pub fn resized_to(w: f64, h: f64) -> Self {
        Self {
            w: Some(w),
            h: Some(h),
            ..Self::default()
        }
    }

    pub fn visibility(show: bool) -> Self {
        Self {
            show: Some(show),
            ..Self::default()
        }
    }

    fn to_logical(self, scale: f64) -> FloatPatch {
        let scale = if scale > 0.0 { scale } else { 1.0 };
        let field = |v: Option<f64>| match v {
            Some(value) => Patch::Set(value / scale),
            None => Patch::Keep,
        };
        FloatPatch {
            x: field(self.x),
            y: field(self.y),
            w: field(self.w),
            h: field(self.h),
            show: match self.show {
                Some(show) => Patch::Set(show),
                None => Patch::Keep,
            },
        }
    }
}

/// Per-entity write-back lane.
#[derive(Debug)]
struct Lane {
    /// Fields accumulated since the last flush started.
    pending: FloatPatch,
    /// Latest known geometry, updated synchronously on every event so a
    /// flush racing with new events never reports a stale position as final.
    live: FloatWindow,
    deadline: Option<Instant>,
    in_flight: bool,
}

impl Lane {
    fn new(live: FloatWindow) -> Self {
        Self {
            pending: FloatPatch::default(),
            live,
            deadline: None,
            in_flight: false,
        }
    }
}

/// Debounced, coalescing write-back of floating-window geometry.
///
/// A dragged or resized view emits events many times per second; persisting
/// each one would flood the backend and risks an older payload landing after
/// a newer one. Instead, events merge into a per-entity batch and a quiet
/// period must pass before the batch is flushed as one complete
/// `{x,y,w,h,show}` write. At most one write per entity is ever in flight:
/// a flush that finds one running reschedules itself instead of overlapping.
///
/// The host drives the pipeline by calling [`run_due`](Self::run_due) on its
/// tick (or sleeping until [`next_deadline`](Self::next_deadline)), and must
/// call [`flush_all`](Self::flush_all) on view teardown so a trailing drag is
/// not lost to an unexpired debounce window.
pub struct FloatWriteback<B: Backend> {
    store: Rc<EntityStore<B>>,
    notifier: Rc<Notifier>,
    metrics: Rc<dyn DisplayMetrics>,
    debounce: Duration,
    retry: Duration,
    lanes: RefCell<HashMap<String, Lane>>,
}

impl<B: Backend> FloatWriteback<B> {
    pub fn new(
        store: Rc<EntityStore<B>>,
        notifier: Rc<Notifier>,
        metrics: Rc<dyn DisplayMetrics>,
        options: &WritebackOptions,
    ) -> Self {
        Self {
            store,
            notifier,
            metrics,
            debounce: Duration::from_millis(options.debounce_ms),
            retry: Duration::from_millis(options.retry_ms),
            lanes: RefCell::new(HashMap::new()),
        }
    }

    /// Record a geometry event and (re)arm the debounce deadline. The live
    /// geometry is updated synchronously; nothing is sent yet.
    pub fn notify(&self, id: &str, event: RawGeometry) {
        let scale = self.metrics.scale_factor();
        let patch = event.to_logical(scale);
        if patch.is_empty() {
            return;
        }
        let mut lanes = self.lanes.borrow_mut();
        let lane = lanes.entry(id.to_string()).or_insert_with(|| {
            let known = self
                .store
                .record(id)
                .map(|record| record.float)
                .unwrap_or_default();
            Lane::new(known)
        });
        lane.live = patch.merge_over(lane.live);
        lane.pending.absorb(patch);
        lane.deadline = Some(Instant::now() + self.debounce);
    }

    /// Latest known geometry for an entity, including not-yet-flushed events.
    pub fn live_geometry(&self, id: &str) -> Option<FloatWindow> {
        self.lanes.borrow().get(id).map(|lane| lane.live)
    }

    /// Earliest pending deadline, for hosts that sleep instead of ticking.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.lanes
            .borrow()
            .values()
            .filter_map(|lane| lane.deadline)
            .min()
    }

    pub fn is_idle(&self) -> bool {
        self.lanes
            .borrow()
            .values()
            .all(|lane| lane.pending.is_empty() && !lane.in_flight)
    }

    /// Flush every lane whose debounce deadline has elapsed. Lanes with a
    /// write already in flight are pushed back by the retry interval rather
    /// than flushed concurrently.
    pub async fn run_due(&self) {
        loop {
            let now = Instant::now();
            let due = {
                let mut lanes = self.lanes.borrow_mut();
                let mut found = None;
                for (id, lane) in lanes.iter_mut() {
                    if lane.deadline.map_or(false, |deadline| deadline <= now) {
                        if lane.in_flight {
                            lane.deadline = Some(now + self.retry);
                        } else {
                            found = Some(id.clone());
                            break;
                        }
                    }
                }
                found
            };
            match due {
                Some(id) => self.flush(&id).await,
                None => break,
            }
        }
    }

    /// Flush one entity's pending batch immediately, ignoring the deadline.
    pub async fn flush_now(&self, id: &str) {
        self.flush(id).await;
    }

    /// Teardown flush: push out every pending batch without waiting for the
    /// debounce window. Call this when the floating view is disposed.
    pub async fn flush_all(&self) {
        let ids: Vec<String> = self
            .lanes
            .borrow()
            .iter()
            .filter(|(_, lane)| !lane.pending.is_empty() && !lane.in_flight)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            self.flush(&id).await;
        }
    }

    async fn flush(&self, id: &str) {
        let (payload, batch, hides) = {
            let mut lanes = self.lanes.borrow_mut();
            let Some(lane) = lanes.get_mut(id) else {
                return;
            };
            if lane.in_flight {
                lane.deadline = Some(Instant::now() + self.retry);
                return;
            }
            if lane.pending.is_empty() {
                lane.deadline = None;
                return;
            }
            let batch = std::mem::take(&mut lane.pending);
            lane.deadline = None;
            lane.in_flight = true;
            // The complete tuple: batch merged over the last known geometry,
            // so the backend never sees partial fields.
            let payload = batch.merge_over(lane.live);
            let hides = batch.show.value() == Some(&false);
            (payload, batch, hides)
        };

        let result = self.store.persist_geometry(id, payload).await;

        let mut lanes = self.lanes.borrow_mut();
        let Some(lane) = lanes.get_mut(id) else {
            return;
        };
        lane.in_flight = false;
        match result {
            Ok(()) => {
                drop(lanes);
                self.notifier.emit(Notification::EntityPositionChanged {
                    kind: self.store.kind(),
                    id: id.to_string(),
                    float: payload,
                });
                if hides {
                    self.notifier.emit(Notification::EntityHidden {
                        kind: self.store.kind(),
                        id: id.to_string(),
                    });
                }
            }
            Err(err) => {
                tracing::warn!(%id, %err, "geometry write-back failed, keeping batch for retry");
                // Events that arrived during the failed write are newer than
                // the batch; they win field by field.
                let mut recovered = batch;
                recovered.absorb(std::mem::take(&mut lane.pending));
                lane.pending = recovered;
                lane.deadline = Some(Instant::now() + self.retry);
            }
        }
    }
}
