//! Deoptimization statistics.
//!
//! Counts deoptimizations per site and per reason so that the handler can
//! decide when a "recompile if too many deopts" site has crossed its
//! threshold.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::{DeoptReason, SpeculationId};
use crate::types::MethodId;

// =============================================================================
// Deopt Site Key
// =============================================================================

/// Identifies a deoptimization site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeoptSiteKey {
    pub method: MethodId,
    pub speculation: SpeculationId,
}

impl DeoptSiteKey {
    #[inline]
    pub const fn new(method: MethodId, speculation: SpeculationId) -> Self {
        DeoptSiteKey {
            method,
            speculation,
        }
    }
}

// =============================================================================
// Deopt Site
// =============================================================================

#[derive(Debug)]
struct DeoptSite {
    count: AtomicU32,
    by_reason: [AtomicU32; DeoptReason::COUNT],
}

impl DeoptSite {
    fn new() -> Self {
        DeoptSite {
            count: AtomicU32::new(0),
            by_reason: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    /// Returns the site's count after recording.
    fn record(&self, reason: DeoptReason) -> u32 {
        self.by_reason[reason as usize].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn dominant_reason(&self) -> Option<DeoptReason> {
        let mut best = (0, None);
        for (i, counter) in self.by_reason.iter().enumerate() {
            let count = counter.load(Ordering::Relaxed);
            if count > best.0 {
                best = (count, DeoptReason::from_u8(i as u8));
            }
        }
        best.1
    }
}

/// Point-in-time view of one site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteSnapshot {
    pub total_count: u32,
    pub dominant_reason: Option<DeoptReason>,
}

// =============================================================================
// Deopt Stats
// =============================================================================

/// Thread-safe deoptimization counters.
#[derive(Debug)]
pub struct DeoptStats {
    sites: RwLock<FxHashMap<DeoptSiteKey, DeoptSite>>,
    total: AtomicU64,
    by_reason: [AtomicU64; DeoptReason::COUNT],
}

impl DeoptStats {
    pub fn new() -> Self {
        DeoptStats {
            sites: RwLock::new(FxHashMap::default()),
            total: AtomicU64::new(0),
            by_reason: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Record a deoptimization; returns the site's count afterwards.
    pub fn record(&self, key: DeoptSiteKey, reason: DeoptReason) -> u32 {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.by_reason[reason as usize].fetch_add(1, Ordering::Relaxed);

        if let Some(site) = self.sites.read().get(&key) {
            return site.record(reason);
        }
        let mut sites = self.sites.write();
        sites.entry(key).or_insert_with(DeoptSite::new).record(reason)
    }

    pub fn site(&self, key: DeoptSiteKey) -> Option<SiteSnapshot> {
        self.sites.read().get(&key).map(|site| SiteSnapshot {
            total_count: site.count.load(Ordering::Relaxed),
            dominant_reason: site.dominant_reason(),
        })
    }

    #[inline]
    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn count_for_reason(&self, reason: DeoptReason) -> u64 {
        self.by_reason[reason as usize].load(Ordering::Relaxed)
    }

    pub fn site_count(&self) -> usize {
        self.sites.read().len()
    }

    /// Sites that deoptimized at least `threshold` times.
    pub fn hot_sites(&self, threshold: u32) -> Vec<DeoptSiteKey> {
        self.sites
            .read()
            .iter()
            .filter(|(_, site)| site.count.load(Ordering::Relaxed) >= threshold)
            .map(|(key, _)| *key)
            .collect()
    }

    /// Forget every site of `method` (after it was recompiled).
    pub fn clear_method(&self, method: MethodId) {
        self.sites.write().retain(|key, _| key.method != method);
    }
}

impl Default for DeoptStats {
    fn default() -> Self {
        Self::new()
    }
}
