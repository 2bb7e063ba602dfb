use super::tags::LoopTag;
use crate::space::{self, MemorySpace, SpaceGuard};
use log::{debug, trace};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A work-item that can be launched over an index range for the loop selected by `Tag`.
///
/// Work-items are shared by reference between worker threads. Each invocation must only write
/// to locations owned by its index, or use atomic accumulation.
pub trait Functor<Tag: LoopTag>: Sync {
    fn call(&self, tag: Tag, index: usize);
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Execution space entered by every work-item.
    pub space: MemorySpace,
    /// Lower bound on the number of consecutive indices run by one task.
    pub min_items_per_task: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            space: MemorySpace::Device,
            min_items_per_task: 16,
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct LaunchStats {
    pub launches: usize,
    pub elided: usize,
}

/// Launches work-items as parallel regions in a fixed execution space.
///
/// A launch returns once every index has completed. Writes of a region are visible to the
/// caller after [`fence`](Self::fence).
#[derive(Debug)]
pub struct Dispatcher {
    config: DispatchConfig,
    launches: AtomicUsize,
    elided: AtomicUsize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatchConfig::default())
    }
}

impl Dispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            launches: AtomicUsize::new(0),
            elided: AtomicUsize::new(0),
        }
    }

    pub fn host() -> Self {
        Self::new(DispatchConfig {
            space: MemorySpace::Host,
            ..DispatchConfig::default()
        })
    }

    pub fn device() -> Self {
        Self::new(DispatchConfig {
            space: MemorySpace::Device,
            ..DispatchConfig::default()
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn space(&self) -> MemorySpace {
        self.config.space
    }

    /// Runs `functor` for every index in `0..n` in parallel.
    pub fn parallel_for<Tag, F>(&self, functor: &F, n: usize)
    where
        Tag: LoopTag,
        F: Functor<Tag>,
    {
        self.launches.fetch_add(1, Ordering::Relaxed);
        let space = self.config.space;
        trace!("launching {} over {} items in {:?} space", Tag::NAME, n, space);
        (0..n)
            .into_par_iter()
            .with_min_len(self.config.min_items_per_task.max(1))
            .for_each_init(
                || SpaceGuard::enter(space),
                |_, index| functor.call(Tag::default(), index),
            );
    }

    /// Records that the `Tag` loop of `object` was not launched because the object does not
    /// provide it.
    pub fn skip<Tag: LoopTag>(&self, object: &str) {
        self.elided.fetch_add(1, Ordering::Relaxed);
        debug!("skipping {} of '{}'", Tag::NAME, object);
    }

    pub fn fence(&self) {
        space::fence();
    }

    pub fn stats(&self) -> LaunchStats {
        LaunchStats {
            launches: self.launches.load(Ordering::Relaxed),
            elided: self.elided.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.launches.store(0, Ordering::Relaxed);
        self.elided.store(0, Ordering::Relaxed);
    }
}
