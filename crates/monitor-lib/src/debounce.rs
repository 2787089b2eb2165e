//! Flap suppression for check results
//!
//! The effective status only flips after `debounce` consecutive raw
//! results disagree with it. A debounce of 0 or 1 flips immediately.

use crate::models::{CheckId, EffectiveStatus, StatusCheckResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// An effective-status flip for one check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChange {
    pub check_id: CheckId,
    pub old: EffectiveStatus,
    pub new: EffectiveStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceState {
    pub effective: EffectiveStatus,
    /// Trailing raw results that disagree with `effective`
    pub opposite_streak: u32,
}

impl Default for DebounceState {
    fn default() -> Self {
        Self {
            effective: EffectiveStatus::Passing,
            opposite_streak: 0,
        }
    }
}

impl DebounceState {
    /// Feed one raw result; returns the previous status if it flipped
    pub fn observe(&mut self, debounce: u32, succeeded: bool) -> Option<EffectiveStatus> {
        let raw = EffectiveStatus::from_succeeded(succeeded);
        if raw == self.effective {
            self.opposite_streak = 0;
            return None;
        }

        self.opposite_streak += 1;
        if self.opposite_streak >= debounce.max(1) {
            let old = self.effective;
            self.effective = raw;
            self.opposite_streak = 0;
            Some(old)
        } else {
            None
        }
    }
}

/// Effective status after replaying a time-ordered history from `initial`
pub fn effective_status(
    debounce: u32,
    initial: EffectiveStatus,
    history: &[StatusCheckResult],
) -> EffectiveStatus {
    let mut state = DebounceState {
        effective: initial,
        opposite_streak: 0,
    };
    for result in history {
        state.observe(debounce, result.succeeded);
    }
    state.effective
}

/// Per-check debounce state.
///
/// Updates for one check are serialised by the map's entry lock, so two
/// results for the same check can never race a flip.
#[derive(Debug, Default)]
pub struct DebounceEngine {
    states: DashMap<CheckId, DebounceState>,
}

impl DebounceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, debounce: u32, result: &StatusCheckResult) -> Option<StatusChange> {
        let mut state = self.states.entry(result.check_id).or_default();
        state
            .observe(debounce, result.succeeded)
            .map(|old| StatusChange {
                check_id: result.check_id,
                old,
                new: state.effective,
                at: result.time,
            })
    }

    /// Rebuild a check's state from stored history
    pub fn restore(&self, check_id: CheckId, debounce: u32, history: &[StatusCheckResult]) {
        let mut state = DebounceState::default();
        for result in history {
            state.observe(debounce, result.succeeded);
        }
        self.states.insert(check_id, state);
    }

    pub fn effective(&self, check_id: CheckId) -> EffectiveStatus {
        self.states
            .get(&check_id)
            .map(|s| s.effective)
            .unwrap_or(EffectiveStatus::Passing)
    }

    pub fn forget(&self, check_id: CheckId) {
        self.states.remove(&check_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::result;
    use chrono::Duration;

    fn history(pattern: &[bool]) -> Vec<StatusCheckResult> {
        let t0 = Utc::now();
        pattern
            .iter()
            .enumerate()
            .map(|(i, ok)| result(1, t0 + Duration::minutes(i as i64), *ok))
            .collect()
    }

    #[test]
    fn test_zero_and_one_flip_immediately() {
        for debounce in [0, 1] {
            let mut state = DebounceState::default();
            assert_eq!(state.observe(debounce, false), Some(EffectiveStatus::Passing));
            assert_eq!(state.effective, EffectiveStatus::Failing);
        }
    }

    #[test]
    fn test_fewer_than_n_never_flips() {
        for n in 2..6u32 {
            let mut state = DebounceState::default();
            for _ in 0..n - 1 {
                assert_eq!(state.observe(n, false), None);
            }
            assert_eq!(state.effective, EffectiveStatus::Passing);
            assert_eq!(state.observe(n, false), Some(EffectiveStatus::Passing));
            assert_eq!(state.effective, EffectiveStatus::Failing);
        }
    }

    #[test]
    fn test_agreeing_result_resets_streak() {
        let mut state = DebounceState::default();
        state.observe(3, false);
        state.observe(3, false);
        state.observe(3, true);
        state.observe(3, false);
        state.observe(3, false);
        assert_eq!(state.effective, EffectiveStatus::Passing);
        state.observe(3, false);
        assert_eq!(state.effective, EffectiveStatus::Failing);
    }

    #[test]
    fn test_recovery_also_debounced() {
        let status = effective_status(
            2,
            EffectiveStatus::Passing,
            &history(&[false, false, true]),
        );
        assert_eq!(status, EffectiveStatus::Failing);

        let status = effective_status(
            2,
            EffectiveStatus::Passing,
            &history(&[false, false, true, true]),
        );
        assert_eq!(status, EffectiveStatus::Passing);
    }

    #[test]
    fn test_engine_reports_change_once() {
        let engine = DebounceEngine::new();
        let results = history(&[false, false, false, false]);

        assert!(engine.observe(2, &results[0]).is_none());
        let change = engine.observe(2, &results[1]).unwrap();
        assert_eq!(change.old, EffectiveStatus::Passing);
        assert_eq!(change.new, EffectiveStatus::Failing);
        assert_eq!(change.at, results[1].time);
        assert!(engine.observe(2, &results[2]).is_none());
        assert!(engine.observe(2, &results[3]).is_none());
        assert_eq!(engine.effective(1), EffectiveStatus::Failing);
    }

    #[test]
    fn test_restore_matches_replay() {
        let engine = DebounceEngine::new();
        let results = history(&[true, false, false, false, true]);
        engine.restore(1, 3, &results);
        assert_eq!(
            engine.effective(1),
            effective_status(3, EffectiveStatus::Passing, &results)
        );
        assert_eq!(engine.effective(1), EffectiveStatus::Failing);
    }
}
