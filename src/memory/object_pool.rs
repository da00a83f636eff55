use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;
use serde::Serialize;

/// Object pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPoolStats {
    pub name: String,
    pub size: usize,
    pub capacity: usize,
    pub created: u64,
    pub reused: u64,
    pub discarded: u64,
}

/// Type-erased view the memory monitor keeps of each pool
pub trait ManagedPool: Send + Sync {
    fn name(&self) -> &str;
    fn size(&self) -> usize;
    fn capacity(&self) -> usize;
    /// Drop idle objects until at most `target` remain; returns how many were dropped
    fn shrink_to(&self, target: usize) -> usize;
    fn stats(&self) -> ObjectPoolStats;
}

/// Bounded freelist of reusable objects
///
/// `acquire` never fails: an empty pool falls back to the factory.
/// `release` resets the object and keeps it only while there is room.
pub struct ObjectPool<T: Send> {
    name: String,
    items: ArrayQueue<T>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    reset: Box<dyn Fn(&mut T) + Send + Sync>,
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

impl<T: Send> ObjectPool<T> {
    pub fn new<F, R>(name: impl Into<String>, max_size: usize, factory: F, reset: R) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            items: ArrayQueue::new(max_size.max(1)),
            factory: Box::new(factory),
            reset: Box::new(reset),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    pub fn acquire(&self) -> T {
        match self.items.pop() {
            Some(item) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                item
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                (self.factory)()
            }
        }
    }

    pub fn release(&self, mut item: T) {
        (self.reset)(&mut item);
        if self.items.push(item).is_err() {
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    /// Drop every idle object, returning how many were held
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.items.pop().is_some() {
            dropped += 1;
        }
        dropped
    }
}

impl<T: Send> ManagedPool for ObjectPool<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        self.items.len()
    }

    fn capacity(&self) -> usize {
        self.items.capacity()
    }

    fn shrink_to(&self, target: usize) -> usize {
        let mut dropped = 0;
        while self.items.len() > target {
            if self.items.pop().is_none() {
                break;
            }
            dropped += 1;
        }
        self.discarded.fetch_add(dropped as u64, Ordering::Relaxed);
        dropped
    }

    fn stats(&self) -> ObjectPoolStats {
        ObjectPoolStats {
            name: self.name.clone(),
            size: self.items.len(),
            capacity: self.items.capacity(),
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}
