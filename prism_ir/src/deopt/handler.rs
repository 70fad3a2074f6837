//! Runtime reaction to deoptimization signals.

use std::sync::Arc;

use dashmap::DashSet;

use super::{DeoptAction, DeoptSignal, DeoptSiteKey, DeoptStats, SpeculationLog};
use crate::assume::InstalledCode;
use crate::profile::ProfileTable;
use crate::types::MethodId;

/// Default number of deopts a `RecompileIfTooManyDeopts` site tolerates.
pub const DEFAULT_RECOMPILE_THRESHOLD: u32 = 10;

/// What the handler did in response to one signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeoptResolution {
    /// The compiled code was flagged invalid by this signal.
    pub invalidated: bool,
    /// The method's profile was discarded.
    pub reprofiled: bool,
    /// The method should be queued for recompilation.
    pub recompile: bool,
    /// The method must not be compiled again.
    pub stop_compiling: bool,
    /// The speculation was added to the failure log.
    pub speculation_logged: bool,
}

/// Applies deoptimization actions to installed code.
#[derive(Debug)]
pub struct DeoptHandler {
    stats: DeoptStats,
    log: Arc<SpeculationLog>,
    profiles: Arc<ProfileTable>,
    not_compilable: DashSet<MethodId>,
    recompile_threshold: u32,
}

impl DeoptHandler {
    pub fn new(log: Arc<SpeculationLog>, profiles: Arc<ProfileTable>) -> Self {
        DeoptHandler {
            stats: DeoptStats::new(),
            log,
            profiles,
            not_compilable: DashSet::new(),
            recompile_threshold: DEFAULT_RECOMPILE_THRESHOLD,
        }
    }

    pub fn with_recompile_threshold(mut self, threshold: u32) -> Self {
        self.recompile_threshold = threshold.max(1);
        self
    }

    /// React to `signal` raised by `code`.
    pub fn handle(&self, code: &InstalledCode, signal: DeoptSignal) -> DeoptResolution {
        let method = code.method();
        let site_count = self
            .stats
            .record(DeoptSiteKey::new(method, signal.speculation), signal.reason);
        let mut resolution = DeoptResolution::default();

        if !signal.speculation.is_none() && !signal.action.retries_speculation() {
            resolution.speculation_logged = self.log.record_failure(signal.speculation);
        }

        let invalidate = match signal.action {
            DeoptAction::None => false,
            DeoptAction::RecompileIfTooManyDeopts => site_count >= self.recompile_threshold,
            DeoptAction::InvalidateReprofile
            | DeoptAction::InvalidateRecompile
            | DeoptAction::InvalidateStopCompiling => true,
        };
        if invalidate {
            resolution.invalidated = code.invalidate();
            resolution.recompile = true;
        }
        if signal.action == DeoptAction::InvalidateReprofile {
            self.profiles.reset(method);
            resolution.reprofiled = true;
        }
        if signal.action == DeoptAction::InvalidateStopCompiling {
            self.not_compilable.insert(method);
            resolution.recompile = false;
            resolution.stop_compiling = true;
        }

        tracing::debug!(
            %method,
            code = %code.id(),
            %signal,
            site_count,
            invalidated = resolution.invalidated,
            "deoptimization handled"
        );
        resolution
    }

    pub fn is_compilable(&self, method: MethodId) -> bool {
        !self.not_compilable.contains(&method)
    }

    pub fn stats(&self) -> &DeoptStats {
        &self.stats
    }

    pub fn speculation_log(&self) -> &SpeculationLog {
        &self.log
    }
}
