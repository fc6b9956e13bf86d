//! Phase controller
//!
//! Owns the single [`PhaseState`]. Map rebuilds feed it observations, operators
//! may force a phase, and every agent asks it for an effective weight before
//! computing its next interval. Reads take a short read lock and copy out, so
//! an agent sees at worst the phase from one observation ago.

use super::{next_phase, Phase, PhaseState, PhaseThresholds, PhaseTransition, TriggeredBy};
use crate::config::{AgentClass, PhaseSettings, WeightTable};
use crate::events::{LogSink, Notification, NotificationKind, NotificationSink};
use crate::metrics;
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Supplies an agent's phase-adjusted weight
pub trait WeightSource: Send + Sync {
    /// Effective weight in [0, 1] for an agent with `base` weight and `class`
    fn effective_weight(&self, base: f64, class: AgentClass) -> f64;
}

/// Read-only phase summary for status surfaces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseStatus {
    pub phase: Phase,
    pub total_tokens: usize,
    /// Tokens until the next automatic transition; negative when already past it
    pub headroom_to_next_transition: i64,
    pub convergence_tokens: usize,
    pub expansion_tokens: usize,
    pub transitions: usize,
}

impl PhaseStatus {
    fn from_state(state: &PhaseState, thresholds: &PhaseThresholds) -> Self {
        let total = state.total_tokens as i64;
        let headroom = match state.phase {
            Phase::Expansion => thresholds.convergence_tokens as i64 - total,
            Phase::Convergence => total - thresholds.expansion_tokens as i64,
        };
        Self {
            phase: state.phase,
            total_tokens: state.total_tokens,
            headroom_to_next_transition: headroom,
            convergence_tokens: thresholds.convergence_tokens,
            expansion_tokens: thresholds.expansion_tokens,
            transitions: state.history.len(),
        }
    }
}

/// Hysteresis controller over the project's total token count
pub struct PhaseController {
    state: RwLock<PhaseState>,
    thresholds: PhaseThresholds,
    weights: WeightTable,
    sink: Arc<dyn NotificationSink>,
    persist_path: Option<PathBuf>,
}

impl PhaseController {
    /// Controller starting in EXPANSION with no weight overrides
    pub fn new(thresholds: PhaseThresholds) -> Self {
        Self {
            state: RwLock::new(PhaseState::new()),
            thresholds,
            weights: WeightTable::new(),
            sink: Arc::new(LogSink),
            persist_path: None,
        }
    }

    /// Controller using configured thresholds and weight table
    pub fn from_settings(settings: &PhaseSettings) -> Self {
        Self::new(settings.thresholds()).with_weights(settings.weights.clone())
    }

    pub fn with_weights(mut self, weights: WeightTable) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Start from a previous state instead of EXPANSION
    pub fn with_state(self, state: PhaseState) -> Self {
        *self.write_state() = state;
        self
    }

    /// Persist state to `path` after every change, resuming from it if present
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(state) = PhaseState::load(&path)? {
            tracing::info!(
                path = %path.display(),
                phase = %state.phase,
                transitions = state.history.len(),
                "Resuming persisted phase state"
            );
            self = self.with_state(state);
        }
        self.persist_path = Some(path);
        Ok(self)
    }

    pub fn thresholds(&self) -> &PhaseThresholds {
        &self.thresholds
    }

    pub fn current_phase(&self) -> Phase {
        self.read_state().phase
    }

    pub fn total_tokens(&self) -> usize {
        self.read_state().total_tokens
    }

    /// Copy of the full state, history included
    pub fn snapshot(&self) -> PhaseState {
        self.read_state().clone()
    }

    pub fn status(&self) -> PhaseStatus {
        PhaseStatus::from_state(&self.read_state(), &self.thresholds)
    }

    /// Feed a new total; returns the transition if the phase changed
    ///
    /// With persistence, transitions another process recorded in the file
    /// (an operator's `phase force`) are adopted first. Blocks on file I/O.
    pub fn observe(&self, total_tokens: usize) -> Option<PhaseTransition> {
        let (transition, snapshot) = {
            let mut state = self.write_state();
            self.merge_persisted(&mut state);
            state.total_tokens = total_tokens;

            let to = next_phase(state.phase, total_tokens, &self.thresholds);
            let transition = if to != state.phase {
                let transition = PhaseTransition {
                    timestamp: Utc::now(),
                    from_phase: state.phase,
                    to_phase: to,
                    total_tokens,
                    triggered_by: TriggeredBy::Auto,
                };
                state.phase = to;
                state.last_transition_at = transition.timestamp;
                state.history.push(transition.clone());
                Some(transition)
            } else {
                None
            };
            (transition, state.clone())
        };

        metrics::set_total_tokens(total_tokens);
        if let Some(ref transition) = transition {
            self.announce(transition);
        }
        self.persist(&snapshot);
        transition
    }

    /// Operator override; always recorded, even when the phase is unchanged
    pub fn force_set(&self, phase: Phase) -> PhaseTransition {
        let (transition, snapshot) = {
            let mut state = self.write_state();
            self.merge_persisted(&mut state);
            let transition = PhaseTransition {
                timestamp: Utc::now(),
                from_phase: state.phase,
                to_phase: phase,
                total_tokens: state.total_tokens,
                triggered_by: TriggeredBy::Manual,
            };
            state.phase = phase;
            state.last_transition_at = transition.timestamp;
            state.history.push(transition.clone());
            (transition, state.clone())
        };

        self.announce(&transition);
        self.persist(&snapshot);
        transition
    }

    /// `base` scaled by the class multiplier for `phase`, clamped to [0, 1]
    ///
    /// Classes without an entry pass `base` through (still clamped).
    pub fn get_effective_weight(&self, base: f64, class: AgentClass, phase: Phase) -> f64 {
        let multiplier = self
            .weights
            .get(&phase)
            .and_then(|table| table.get(&class))
            .copied()
            .unwrap_or(1.0);
        let weight = base * multiplier;
        if weight.is_nan() {
            0.0
        } else {
            weight.clamp(0.0, 1.0)
        }
    }

    fn announce(&self, transition: &PhaseTransition) {
        tracing::info!(
            from = %transition.from_phase,
            to = %transition.to_phase,
            tokens = transition.total_tokens,
            triggered_by = %transition.triggered_by,
            "Phase transition"
        );
        metrics::set_current_phase(transition.to_phase);
        metrics::record_phase_transition(&transition.triggered_by.to_string());
        self.sink.publish(Notification::new(
            NotificationKind::PhaseTransition,
            json!({
                "from": transition.from_phase,
                "to": transition.to_phase,
                "total_tokens": transition.total_tokens,
                "triggered_by": transition.triggered_by,
            }),
        ));
    }

    /// Fold in history entries the persisted file has and `state` lacks
    ///
    /// The phase follows the newest entry, so nothing written by another
    /// controller on the same file is overwritten by the next save.
    fn merge_persisted(&self, state: &mut PhaseState) {
        let Some(ref path) = self.persist_path else {
            return;
        };
        let persisted = match PhaseState::load(path) {
            Ok(Some(persisted)) => persisted,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to reload phase state");
                return;
            }
        };

        let missing: Vec<PhaseTransition> = persisted
            .history
            .into_iter()
            .filter(|t| !state.history.contains(t))
            .collect();
        if missing.is_empty() {
            return;
        }

        state.history.extend(missing.iter().cloned());
        state.history.sort_by_key(|t| t.timestamp);
        if let Some(latest) = state.history.last() {
            state.phase = latest.to_phase;
            state.last_transition_at = latest.timestamp;
        }
        for t in &missing {
            tracing::info!(
                from = %t.from_phase,
                to = %t.to_phase,
                triggered_by = %t.triggered_by,
                "Adopted phase transition recorded by another process"
            );
        }
        metrics::set_current_phase(state.phase);
    }

    fn persist(&self, state: &PhaseState) {
        if let Some(ref path) = self.persist_path {
            if let Err(e) = state.save(path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to persist phase state");
            }
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, PhaseState> {
        // A panic while holding the lock cannot leave PhaseState half-written
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, PhaseState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Persisted state file, if any
    pub fn persist_path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }
}

impl WeightSource for PhaseController {
    fn effective_weight(&self, base: f64, class: AgentClass) -> f64 {
        self.get_effective_weight(base, class, self.current_phase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BroadcastSink;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn controller() -> PhaseController {
        PhaseController::new(PhaseThresholds::default())
    }

    #[test]
    fn test_starts_in_expansion() {
        let c = controller();
        assert_eq!(c.current_phase(), Phase::Expansion);
        assert!(c.snapshot().history.is_empty());
    }

    #[test]
    fn test_concrete_scenario() {
        let c = controller();

        assert!(c.observe(50_000).is_none());
        assert_eq!(c.current_phase(), Phase::Expansion);

        let t = c.observe(80_000).unwrap();
        assert_eq!(t.to_phase, Phase::Convergence);
        assert_eq!(t.triggered_by, TriggeredBy::Auto);
        assert_eq!(c.snapshot().history.len(), 1);

        assert!(c.observe(70_000).is_none());
        assert_eq!(c.current_phase(), Phase::Convergence);
        assert_eq!(c.snapshot().history.len(), 1);

        let t = c.observe(60_000).unwrap();
        assert_eq!(t.from_phase, Phase::Convergence);
        assert_eq!(t.to_phase, Phase::Expansion);
        assert_eq!(c.snapshot().history.len(), 2);
    }

    #[test]
    fn test_force_set_recorded_as_manual() {
        let c = controller();
        c.observe(10_000);

        let t = c.force_set(Phase::Convergence);
        assert_eq!(t.triggered_by, TriggeredBy::Manual);
        assert_eq!(t.total_tokens, 10_000);
        assert_eq!(c.current_phase(), Phase::Convergence);

        // Same phase again still leaves an audit entry
        c.force_set(Phase::Convergence);
        let history = c.snapshot().history;
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|h| h.triggered_by == TriggeredBy::Manual));
    }

    #[test]
    fn test_status_headroom() {
        let c = controller();
        c.observe(70_000);
        let status = c.status();
        assert_eq!(status.phase, Phase::Expansion);
        assert_eq!(status.headroom_to_next_transition, 6_800);

        // Forced into convergence below the expansion threshold: negative headroom
        c.force_set(Phase::Convergence);
        c.observe(70_000);
        assert_eq!(c.status().headroom_to_next_transition, 6_000);
        let forced = controller();
        forced.observe(10_000);
        forced.force_set(Phase::Convergence);
        assert_eq!(forced.status().headroom_to_next_transition, -54_000);
    }

    #[test]
    fn test_effective_weight_table() {
        let mut weights = WeightTable::new();
        weights.insert(
            Phase::Convergence,
            BTreeMap::from([(AgentClass::Validation, 2.0), (AgentClass::Production, 0.5)]),
        );
        let c = controller().with_weights(weights);

        // No override in expansion
        assert_eq!(c.get_effective_weight(0.6, AgentClass::Validation, Phase::Expansion), 0.6);
        // Scaled and clamped
        assert_eq!(c.get_effective_weight(0.6, AgentClass::Validation, Phase::Convergence), 1.0);
        assert_eq!(c.get_effective_weight(0.6, AgentClass::Production, Phase::Convergence), 0.3);
        // Unknown class passes through
        assert_eq!(c.get_effective_weight(0.4, AgentClass::General, Phase::Convergence), 0.4);
        // Out of range input clamped
        assert_eq!(c.get_effective_weight(-1.0, AgentClass::General, Phase::Expansion), 0.0);
        assert_eq!(c.get_effective_weight(f64::NAN, AgentClass::General, Phase::Expansion), 0.0);

        c.force_set(Phase::Convergence);
        assert_eq!(c.effective_weight(0.6, AgentClass::Production), 0.3);
    }

    #[tokio::test]
    async fn test_transitions_are_published() {
        let sink = Arc::new(BroadcastSink::new(16));
        let mut rx = sink.subscribe();
        let c = controller().with_sink(sink.clone());

        c.observe(90_000);
        c.force_set(Phase::Expansion);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, NotificationKind::PhaseTransition);
        assert_eq!(first.payload["to"], "convergence");
        assert_eq!(first.payload["triggered_by"], "AUTO");

        let second = rx.recv().await.unwrap();
        assert_eq!(second.payload["triggered_by"], "MANUAL");
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("phase.json");

        let c = controller().with_persistence(&path).unwrap();
        c.observe(100_000);
        assert!(path.exists());

        let resumed = controller().with_persistence(&path).unwrap();
        assert_eq!(resumed.current_phase(), Phase::Convergence);
        assert_eq!(resumed.total_tokens(), 100_000);
        assert_eq!(resumed.snapshot().history.len(), 1);
    }

    #[test]
    fn test_daemon_keeps_force_from_another_process() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("phase.json");

        let daemon = controller().with_persistence(&path).unwrap();
        daemon.observe(70_000);

        // `cadence phase force` runs its own controller on the same file
        let cli = controller().with_persistence(&path).unwrap();
        cli.force_set(Phase::Convergence);

        // Inside the dead band the forced phase sticks
        assert!(daemon.observe(70_500).is_none());
        assert_eq!(daemon.current_phase(), Phase::Convergence);

        let saved = PhaseState::load(&path).unwrap().unwrap();
        assert_eq!(saved.phase, Phase::Convergence);
        assert_eq!(saved.total_tokens, 70_500);
        assert_eq!(saved.history.len(), 1);
        assert_eq!(saved.history[0].triggered_by, TriggeredBy::Manual);
    }

    #[test]
    fn test_forced_entry_survives_later_auto_transition() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("phase.json");

        let daemon = controller().with_persistence(&path).unwrap();
        daemon.observe(10_000);
        controller()
            .with_persistence(&path)
            .unwrap()
            .force_set(Phase::Convergence);

        // Below the expansion threshold the daemon flips back, on the record
        let t = daemon.observe(10_500).unwrap();
        assert_eq!(t.from_phase, Phase::Convergence);
        assert_eq!(t.to_phase, Phase::Expansion);

        let saved = PhaseState::load(&path).unwrap().unwrap();
        let kinds: Vec<TriggeredBy> = saved.history.iter().map(|h| h.triggered_by).collect();
        assert_eq!(kinds, vec![TriggeredBy::Manual, TriggeredBy::Auto]);
        assert_eq!(saved.phase, Phase::Expansion);
    }

    #[test]
    fn test_merge_ignores_own_history() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("phase.json");

        let c = controller().with_persistence(&path).unwrap();
        c.observe(90_000);
        c.force_set(Phase::Expansion);
        c.observe(70_000);
        assert_eq!(c.snapshot().history.len(), 2);
        assert_eq!(PhaseState::load(&path).unwrap().unwrap().history.len(), 2);
    }
}
