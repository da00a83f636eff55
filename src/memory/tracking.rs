use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use serde::Serialize;

/// Record count below which `track` never prunes
const PRUNE_FLOOR: usize = 64;

/// Per-category view of tracked objects
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTracking {
    pub tracked: u64,
    pub live: usize,
    pub released: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingStatistics {
    pub total_tracked: u64,
    pub total_live: usize,
    pub categories: BTreeMap<String, CategoryTracking>,
}

struct TrackedObject {
    category: String,
    handle: Weak<dyn Any + Send + Sync>,
}

/// Non-owning registry of shared objects
///
/// Holds only weak references, so tracking never extends an object's life.
/// Dead records are dropped whenever the record count reaches twice the
/// live count of the previous prune, which keeps `track` amortized O(1).
pub struct ObjectTracker {
    objects: Vec<TrackedObject>,
    tracked: BTreeMap<String, u64>,
    pruned: BTreeMap<String, u64>,
    prune_at: usize,
}

impl Default for ObjectTracker {
    fn default() -> Self {
        Self {
            objects: Vec::new(),
            tracked: BTreeMap::new(),
            pruned: BTreeMap::new(),
            prune_at: PRUNE_FLOOR,
        }
    }
}

impl ObjectTracker {
    pub fn track<T>(&mut self, object: &Arc<T>, category: &str)
    where
        T: Send + Sync + 'static,
    {
        if self.objects.len() >= self.prune_at {
            self.prune();
        }
        let weak: Weak<T> = Arc::downgrade(object);
        self.objects.push(TrackedObject {
            category: category.to_string(),
            handle: weak,
        });
        *self.tracked.entry(category.to_string()).or_insert(0) += 1;
    }

    /// Forget records whose object has been dropped; returns how many went away
    pub fn prune(&mut self) -> usize {
        let before = self.objects.len();
        let pruned = &mut self.pruned;
        self.objects.retain(|object| {
            let alive = object.handle.strong_count() > 0;
            if !alive {
                *pruned.entry(object.category.clone()).or_insert(0) += 1;
            }
            alive
        });
        self.prune_at = (self.objects.len() * 2).max(PRUNE_FLOOR);
        before - self.objects.len()
    }

    /// Records currently held, live or not yet pruned
    pub fn record_count(&self) -> usize {
        self.objects.len()
    }

    pub fn statistics(&self) -> TrackingStatistics {
        let mut categories: BTreeMap<String, CategoryTracking> = self
            .tracked
            .iter()
            .map(|(category, tracked)| {
                (
                    category.clone(),
                    CategoryTracking {
                        tracked: *tracked,
                        ..Default::default()
                    },
                )
            })
            .collect();

        for object in &self.objects {
            if object.handle.strong_count() > 0 {
                if let Some(entry) = categories.get_mut(&object.category) {
                    entry.live += 1;
                }
            }
        }
        for entry in categories.values_mut() {
            entry.released = entry.tracked - entry.live as u64;
        }

        TrackingStatistics {
            total_tracked: categories.values().map(|c| c.tracked).sum(),
            total_live: categories.values().map(|c| c.live).sum(),
            categories,
        }
    }

    pub fn pruned_total(&self) -> u64 {
        self.pruned.values().sum()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
        self.tracked.clear();
        self.pruned.clear();
        self.prune_at = PRUNE_FLOOR;
    }
}
