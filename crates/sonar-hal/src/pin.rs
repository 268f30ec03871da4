//! Host output pins.

use crate::OutputPin;
use sonar_common::SonarResult;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// In-memory output pin.
///
/// Clones share the same level, so a clone kept by the board can observe a
/// pin owned by an activity.
#[derive(Debug, Clone)]
pub struct VirtualPin {
    label: Arc<str>,
    level: Arc<AtomicBool>,
    transitions: Arc<AtomicU64>,
}

impl VirtualPin {
    /// Create a pin driven low.
    #[must_use]
    pub fn new(label: &str) -> Self {
        Self {
            label: Arc::from(label),
            level: Arc::new(AtomicBool::new(false)),
            transitions: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Board label, e.g. `PC2`.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of level changes since creation.
    #[must_use]
    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }

    fn drive(&self, high: bool) {
        let was = self.level.swap(high, Ordering::AcqRel);
        if was != high {
            self.transitions.fetch_add(1, Ordering::Relaxed);
            trace!(pin = %self.label, high, "Pin level changed");
        }
    }
}

impl OutputPin for VirtualPin {
    fn set_high(&mut self) -> SonarResult<()> {
        self.drive(true);
        Ok(())
    }

    fn set_low(&mut self) -> SonarResult<()> {
        self.drive(false);
        Ok(())
    }

    fn is_set_high(&self) -> bool {
        self.level.load(Ordering::Acquire)
    }
}
