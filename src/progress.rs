//! Progress-callback trait for per-stage and per-unit extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to follow a
//! job run as it happens. The library knows nothing about how events are
//! displayed; the CLI forwards them to an `indicatif` progress bar.
//!
//! # Example
//!
//! ```rust
//! use menu_extract::{ExtractionConfig, ExtractionProgressCallback, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counting(AtomicUsize);
//!
//! impl ExtractionProgressCallback for Counting {
//!     fn on_stage_complete(&self, stage: Stage, units: usize) {
//!         self.0.fetch_add(units, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(Counting(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::schema::{Stage, UnitId};
use std::sync::Arc;

/// Called by the stage drivers as units start and finish.
///
/// Units of one stage run concurrently, so the unit methods may be called
/// from several tasks at once. All methods default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// A stage is about to submit `units` units of work.
    fn on_stage_start(&self, stage: Stage, units: usize) {
        let _ = (stage, units);
    }

    /// A unit acquired its concurrency slot and is about to call the model.
    fn on_unit_start(&self, unit: &UnitId) {
        let _ = unit;
    }

    /// A unit produced a valid record after `attempts` attempts.
    fn on_unit_complete(&self, unit: &UnitId, attempts: u32) {
        let _ = (unit, attempts);
    }

    /// A unit exhausted its attempts. The stage will fail.
    fn on_unit_error(&self, unit: &UnitId, error: &str) {
        let _ = (unit, error);
    }

    /// Every unit of the stage succeeded and the document is assembled.
    fn on_stage_complete(&self, stage: Stage, units: usize) {
        let _ = (stage, units);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CategoryKey;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: Mutex<Vec<String>>,
        stages: Mutex<Vec<(Stage, usize)>>,
    }

    impl ExtractionProgressCallback for TrackingCallback {
        fn on_stage_start(&self, stage: Stage, units: usize) {
            self.stages.lock().unwrap().push((stage, units));
        }

        fn on_unit_start(&self, _unit: &UnitId) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_unit_complete(&self, _unit: &UnitId, _attempts: u32) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_unit_error(&self, unit: &UnitId, error: &str) {
            self.errors
                .lock()
                .unwrap()
                .push(format!("{}: {}", unit, error));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        let unit = UnitId::page(Stage::Categories, 1);
        cb.on_stage_start(Stage::Categories, 3);
        cb.on_unit_start(&unit);
        cb.on_unit_complete(&unit, 1);
        cb.on_unit_error(&unit, "timeout");
        cb.on_stage_complete(Stage::Categories, 3);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        let a = UnitId::category(Stage::Items, 1, CategoryKey::new(1, 1), "Soups");
        let b = UnitId::category(Stage::Items, 1, CategoryKey::new(1, 2), "Salads");

        tracker.on_stage_start(Stage::Items, 2);
        tracker.on_unit_start(&a);
        tracker.on_unit_start(&b);
        tracker.on_unit_complete(&a, 1);
        tracker.on_unit_error(&b, "malformed response");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(*tracker.stages.lock().unwrap(), vec![(Stage::Items, 2)]);
        let errors = tracker.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Salads"));
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_stage_start(Stage::Addons, 10);
    }
}
