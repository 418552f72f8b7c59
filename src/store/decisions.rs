use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};

use crate::config::RetryPolicy;
use crate::error::{CoordError, Result};
use crate::instance_id::InstanceId;
use crate::model::{Decision, DecisionLog, MadeBy};
use crate::store::document::{DocumentStore, JsonFile};

pub const DECISION_LOG_FILE: &str = "decision-log.json";

/// Highest sequence that fits the 4-digit `DEC-YYYYMMDD-NNNN` format.
pub const MAX_DAILY_SEQUENCE: u32 = 9999;

/// Fields supplied by the caller for a new decision.
#[derive(Debug, Clone, Default)]
pub struct NewDecision {
    pub category: String,
    pub title: String,
    pub description: String,
    pub scope: String,
}

/// Filters for reading the log back (e.g. by an export adapter).
#[derive(Debug, Clone, Default)]
pub struct DecisionFilter {
    pub category: Option<String>,
    pub since: Option<NaiveDate>,
    pub made_by: Option<InstanceId>,
    /// Keep only the most recent N after filtering.
    pub limit: Option<usize>,
}

/// Append-only log of cross-instance decisions (`decision-log.json`).
pub struct DecisionStore<S = JsonFile<DecisionLog>> {
    doc: S,
}

impl DecisionStore {
    pub fn open(root: &Path, retry: RetryPolicy) -> Self {
        Self {
            doc: JsonFile::new(root.join(DECISION_LOG_FILE), retry),
        }
    }

    pub fn ensure(&self) -> Result<bool> {
        self.doc.ensure()
    }
}

impl<S: DocumentStore<DecisionLog>> DecisionStore<S> {
    pub fn with_store(doc: S) -> Self {
        Self { doc }
    }

    pub fn append(&self, made_by: &InstanceId, new: NewDecision) -> Result<Decision> {
        self.append_at(made_by, new, Utc::now())
    }

    /// Allocate the next id for `now`'s UTC day and append, in one transaction.
    pub fn append_at(
        &self,
        made_by: &InstanceId,
        new: NewDecision,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        let category = new.category.trim().to_string();
        let title = new.title.trim().to_string();
        if category.is_empty() {
            return Err(CoordError::InvalidDecision("category cannot be empty".into()));
        }
        if title.is_empty() {
            return Err(CoordError::InvalidDecision("title cannot be empty".into()));
        }

        let day = now.format("%Y%m%d").to_string();
        let decision = self.doc.transact(|log| {
            let seq = next_sequence(&log.decisions, &day)?;
            let decision = Decision {
                decision_id: format!("DEC-{day}-{seq:04}"),
                category,
                title,
                description: new.description.trim().to_string(),
                scope: new.scope.trim().to_string(),
                made_by: MadeBy {
                    instance_id: made_by.clone(),
                },
                timestamp: now,
            };
            log.decisions.push(decision.clone());
            Ok(decision)
        })?;

        tracing::info!(decision = %decision.decision_id, instance = %made_by, "decision logged");
        Ok(decision)
    }

    pub fn list(&self, filter: &DecisionFilter) -> Result<Vec<Decision>> {
        let mut decisions: Vec<Decision> = self
            .doc
            .snapshot()?
            .decisions
            .into_iter()
            .filter(|d| {
                filter
                    .category
                    .as_deref()
                    .is_none_or(|c| d.category.eq_ignore_ascii_case(c))
            })
            .filter(|d| filter.since.is_none_or(|since| d.timestamp.date_naive() >= since))
            .filter(|d| {
                filter
                    .made_by
                    .as_ref()
                    .is_none_or(|id| &d.made_by.instance_id == id)
            })
            .collect();
        if let Some(n) = filter.limit {
            let len = decisions.len();
            if len > n {
                decisions = decisions.split_off(len - n);
            }
        }
        Ok(decisions)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.doc.snapshot()?.decisions.len())
    }
}

/// One past the highest sequence already used on `day`.
fn next_sequence(decisions: &[Decision], day: &str) -> Result<u32> {
    let prefix = format!("DEC-{day}-");
    let max = decisions
        .iter()
        .filter_map(|d| d.decision_id.strip_prefix(&prefix))
        .filter_map(|seq| seq.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    let next = max + 1;
    if next > MAX_DAILY_SEQUENCE {
        return Err(CoordError::DecisionSequenceExhausted(day.to_string()));
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use std::fs;
    use tempfile::tempdir;

    fn id(suffix: &str) -> InstanceId {
        format!("claude-20250314-092653-{suffix}").parse().unwrap()
    }

    fn new(category: &str, title: &str) -> NewDecision {
        NewDecision {
            category: category.into(),
            title: title.into(),
            description: "because".into(),
            scope: "project".into(),
        }
    }

    fn setup() -> (tempfile::TempDir, DecisionStore) {
        let dir = tempdir().unwrap();
        let store = DecisionStore::open(dir.path(), RetryPolicy::default());
        store.ensure().unwrap();
        (dir, store)
    }

    #[test]
    fn ids_increase_within_a_day_and_restart_next_day() {
        let (_dir, store) = setup();
        let day1 = Utc.with_ymd_and_hms(2025, 3, 14, 10, 0, 0).unwrap();
        let a = store.append_at(&id("aaaaaaaa"), new("api", "one"), day1).unwrap();
        let b = store.append_at(&id("aaaaaaaa"), new("api", "two"), day1).unwrap();
        let c = store
            .append_at(&id("aaaaaaaa"), new("api", "three"), day1 + TimeDelta::days(1))
            .unwrap();

        assert_eq!(a.decision_id, "DEC-20250314-0001");
        assert_eq!(b.decision_id, "DEC-20250314-0002");
        assert_eq!(c.decision_id, "DEC-20250315-0001");
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn entries_carry_author_and_fields() {
        let (_dir, store) = setup();
        let d = store.append(&id("aaaaaaaa"), new(" database ", " Use sqlite ")).unwrap();
        assert_eq!(d.category, "database");
        assert_eq!(d.title, "Use sqlite");
        assert_eq!(d.made_by.instance_id, id("aaaaaaaa"));
        assert_eq!(store.list(&DecisionFilter::default()).unwrap(), vec![d]);
    }

    #[test]
    fn empty_title_or_category_rejected() {
        let (_dir, store) = setup();
        assert!(matches!(
            store.append(&id("aaaaaaaa"), new("", "t")).unwrap_err(),
            CoordError::InvalidDecision(_)
        ));
        assert!(matches!(
            store.append(&id("aaaaaaaa"), new("c", "  ")).unwrap_err(),
            CoordError::InvalidDecision(_)
        ));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn sequence_exhaustion_is_an_error_not_an_overflow() {
        let (dir, store) = setup();
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 10, 0, 0).unwrap();
        let mut log = DecisionLog::default();
        log.decisions.push(Decision {
            decision_id: "DEC-20250314-9999".into(),
            category: "api".into(),
            title: "last".into(),
            description: String::new(),
            scope: String::new(),
            made_by: MadeBy {
                instance_id: id("aaaaaaaa"),
            },
            timestamp: now,
        });
        fs::write(
            dir.path().join(DECISION_LOG_FILE),
            serde_json::to_string(&log).unwrap(),
        )
        .unwrap();

        let err = store.append_at(&id("aaaaaaaa"), new("api", "one more"), now).unwrap_err();
        assert!(matches!(err, CoordError::DecisionSequenceExhausted(_)));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn list_filters_and_limits() {
        let (_dir, store) = setup();
        let day1 = Utc.with_ymd_and_hms(2025, 3, 14, 10, 0, 0).unwrap();
        let day2 = day1 + TimeDelta::days(2);
        store.append_at(&id("aaaaaaaa"), new("api", "a1"), day1).unwrap();
        store.append_at(&id("bbbbbbbb"), new("database", "b1"), day1).unwrap();
        store.append_at(&id("aaaaaaaa"), new("API", "a2"), day2).unwrap();

        let api = store
            .list(&DecisionFilter {
                category: Some("api".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(api.len(), 2);

        let recent = store
            .list(&DecisionFilter {
                since: Some(day2.date_naive()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].title, "a2");

        let by_b = store
            .list(&DecisionFilter {
                made_by: Some(id("bbbbbbbb")),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_b.len(), 1);

        let last = store
            .list(&DecisionFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(last[0].title, "a2");
    }

    #[test]
    fn corrupt_log_surfaces_error() {
        let (dir, store) = setup();
        fs::write(dir.path().join(DECISION_LOG_FILE), "{ nope").unwrap();
        assert!(matches!(
            store.append(&id("aaaaaaaa"), new("api", "x")).unwrap_err(),
            CoordError::CorruptDocument(_, _)
        ));
    }
}
