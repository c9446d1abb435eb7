//! Cron entry bookkeeping shared by every scheduler.
//!
//! Each scheduler holds a `CronSet` and reconciles it against the enabled
//! settings on every refresh. Reconciliation is diff-style and idempotent:
//! unchanged entries keep their computed next-fire time, edited expressions
//! are re-registered, vanished ids are dropped.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

struct CronEntry {
    expression: String,
    schedule: Schedule,
    next_fire: Option<DateTime<Utc>>,
}

/// Outcome of one reconcile pass, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub invalid: usize,
}

impl ReconcileOutcome {
    /// Whether the pass changed anything.
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }
}

/// A set of seconds-precision cron entries keyed by setting id.
#[derive(Default)]
pub struct CronSet {
    entries: HashMap<Uuid, CronEntry>,
}

impl CronSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.entries.contains_key(&id)
    }

    /// The expression currently registered for an id.
    pub fn expression_for(&self, id: Uuid) -> Option<&str> {
        self.entries.get(&id).map(|e| e.expression.as_str())
    }

    /// The next fire time computed for an id.
    pub fn next_fire(&self, id: Uuid) -> Option<DateTime<Utc>> {
        self.entries.get(&id).and_then(|e| e.next_fire)
    }

    /// Reconcile against the desired `(id, expression)` set.
    pub fn reconcile(&mut self, desired: &[(Uuid, String)], now: DateTime<Utc>) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        for (id, expression) in desired {
            let unchanged = self
                .entries
                .get(id)
                .is_some_and(|e| e.expression == *expression);
            if unchanged {
                continue;
            }
            let replacing = self.entries.contains_key(id);
            match Schedule::from_str(expression) {
                Ok(schedule) => {
                    let next_fire = schedule.after(&now).next();
                    self.entries.insert(
                        *id,
                        CronEntry {
                            expression: expression.clone(),
                            schedule,
                            next_fire,
                        },
                    );
                    if replacing {
                        outcome.updated += 1;
                    } else {
                        outcome.added += 1;
                    }
                }
                Err(e) => {
                    warn!(%id, expression, error = %e, "invalid cron expression; entry skipped");
                    if self.entries.remove(id).is_some() {
                        outcome.removed += 1;
                    }
                    outcome.invalid += 1;
                }
            }
        }

        let desired_ids: std::collections::HashSet<Uuid> =
            desired.iter().map(|(id, _)| *id).collect();
        let before = self.entries.len();
        self.entries.retain(|id, _| desired_ids.contains(id));
        outcome.removed += before - self.entries.len();

        outcome
    }

    /// Ids whose fire time has arrived. Each returned entry's next fire is
    /// advanced strictly past `now`.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut fired = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            let Some(next) = entry.next_fire else { continue };
            if next <= now {
                fired.push(*id);
                entry.next_fire = entry.schedule.after(&now).next();
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EVERY_MINUTE: &str = "0 * * * * *";
    const HOURLY: &str = "0 0 * * * *";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 30).unwrap()
    }

    #[test]
    fn reconcile_adds_and_removes() {
        let mut set = CronSet::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let outcome = set.reconcile(
            &[(a, EVERY_MINUTE.to_string()), (b, HOURLY.to_string())],
            t0(),
        );
        assert_eq!(outcome.added, 2);
        assert_eq!(set.len(), 2);

        let outcome = set.reconcile(&[(a, EVERY_MINUTE.to_string())], t0());
        assert_eq!(outcome.removed, 1);
        assert!(!set.contains(b));
    }

    #[test]
    fn reconcile_twice_is_noop() {
        let mut set = CronSet::new();
        let a = Uuid::new_v4();
        let desired = vec![(a, EVERY_MINUTE.to_string())];

        set.reconcile(&desired, t0());
        let next_before = set.next_fire(a);

        let outcome = set.reconcile(&desired, t0() + chrono::Duration::seconds(10));
        assert!(outcome.is_noop());
        // The kept entry's computed fire time is untouched.
        assert_eq!(set.next_fire(a), next_before);
    }

    #[test]
    fn reconcile_detects_expression_change() {
        let mut set = CronSet::new();
        let a = Uuid::new_v4();

        set.reconcile(&[(a, EVERY_MINUTE.to_string())], t0());
        let outcome = set.reconcile(&[(a, HOURLY.to_string())], t0());
        assert_eq!(outcome.updated, 1);
        assert_eq!(set.expression_for(a), Some(HOURLY));
    }

    #[test]
    fn invalid_expression_skipped() {
        let mut set = CronSet::new();
        let a = Uuid::new_v4();
        let outcome = set.reconcile(&[(a, "not a cron".to_string())], t0());
        assert_eq!(outcome.invalid, 1);
        assert!(!set.contains(a));
    }

    #[test]
    fn due_fires_and_advances_strictly() {
        let mut set = CronSet::new();
        let a = Uuid::new_v4();
        set.reconcile(&[(a, EVERY_MINUTE.to_string())], t0());

        // Next fire after 10:00:30 is 10:01:00.
        let fire = set.next_fire(a).unwrap();
        assert_eq!(fire, Utc.with_ymd_and_hms(2025, 6, 2, 10, 1, 0).unwrap());

        assert!(set.due(fire - chrono::Duration::seconds(1)).is_empty());

        let fired = set.due(fire);
        assert_eq!(fired, vec![a]);
        // Strictly greater than the fire instant.
        assert_eq!(
            set.next_fire(a).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 2, 10, 2, 0).unwrap()
        );
    }
}
