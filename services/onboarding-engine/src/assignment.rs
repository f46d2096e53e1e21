//! Work queue ordering and reviewer assignment heuristics

use crate::models::{Reviewer, WorkItem, WorkItemKind, WorkItemStatus, WorkPriority};
use chrono::{DateTime, Duration, Utc};
use message_bus::IdempotencyStore;
use risk_engine::RiskLevel;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Redis key guarding auto-assignment across instances
pub const ASSIGNMENT_LOCK_KEY: &str = "kyc:assignment:lock";

impl WorkPriority {
    /// Priority of review work for a case at `level`
    pub fn from_risk(level: RiskLevel, kind: WorkItemKind) -> Self {
        let base = match level {
            RiskLevel::High => WorkPriority::Urgent,
            RiskLevel::MediumHigh => WorkPriority::High,
            RiskLevel::Medium => WorkPriority::Normal,
            _ => WorkPriority::Low,
        };
        if kind == WorkItemKind::Escalation {
            base.bump()
        } else {
            base
        }
    }

    /// One step more pressing, saturating at Urgent
    pub fn bump(self) -> Self {
        match self {
            WorkPriority::Low => WorkPriority::Normal,
            WorkPriority::Normal => WorkPriority::High,
            WorkPriority::High | WorkPriority::Urgent => WorkPriority::Urgent,
        }
    }

    pub fn sla(&self) -> Duration {
        match self {
            WorkPriority::Urgent => Duration::hours(4),
            WorkPriority::High => Duration::hours(24),
            WorkPriority::Normal => Duration::hours(72),
            WorkPriority::Low => Duration::hours(120),
        }
    }

    pub fn due_at(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        created_at + self.sla()
    }
}

/// Queue order: priority desc, due_at asc, created_at asc
pub fn queue_order(a: &WorkItem, b: &WorkItem) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.due_at.cmp(&b.due_at))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Whether the item needs a senior reviewer
pub fn requires_senior(item: &WorkItem) -> bool {
    item.priority == WorkPriority::Urgent || item.risk_level >= RiskLevel::MediumHigh
}

pub fn is_eligible(reviewer: &Reviewer, item: &WorkItem) -> bool {
    reviewer.active
        && reviewer.has_capacity()
        && (reviewer.senior || !requires_senior(item))
        && (reviewer.specialties.is_empty() || reviewer.is_specialist_for(item.entity_type))
}

/// Reviewer order for an item: specialist first, lower load, least recently
/// assigned (never assigned first), then id
pub fn reviewer_order(item: &WorkItem, a: &Reviewer, b: &Reviewer) -> Ordering {
    let specialist = |r: &Reviewer| r.is_specialist_for(item.entity_type);
    specialist(b)
        .cmp(&specialist(a))
        .then_with(|| a.load_ratio().total_cmp(&b.load_ratio()))
        .then_with(|| match (a.last_assigned_at, b.last_assigned_at) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => x.cmp(&y),
        })
        .then_with(|| a.id.cmp(&b.id))
}

/// Best eligible reviewer for an item
pub fn best_reviewer<'a>(item: &WorkItem, reviewers: &'a [Reviewer]) -> Option<&'a Reviewer> {
    reviewers
        .iter()
        .filter(|r| is_eligible(r, item))
        .min_by(|a, b| reviewer_order(item, a, b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PlannedAssignment {
    pub work_item_id: Uuid,
    pub reviewer_id: Uuid,
}

/// Greedy assignment of queued items in queue order
///
/// Loads and last-assigned times are updated as the plan grows so one
/// reviewer does not soak up the whole queue.
pub fn plan_assignments(
    items: &[WorkItem],
    reviewers: &[Reviewer],
    now: DateTime<Utc>,
) -> Vec<PlannedAssignment> {
    let mut queue: Vec<&WorkItem> = items
        .iter()
        .filter(|i| i.status == WorkItemStatus::Queued)
        .collect();
    queue.sort_by(|a, b| queue_order(a, b));

    let mut pool: Vec<Reviewer> = reviewers.to_vec();
    let mut plan = Vec::new();

    for item in queue {
        let Some(reviewer_id) = best_reviewer(item, &pool).map(|r| r.id) else {
            debug!("No eligible reviewer for work item {}", item.id);
            continue;
        };

        if let Some(reviewer) = pool.iter_mut().find(|r| r.id == reviewer_id) {
            reviewer.open_items += 1;
            reviewer.last_assigned_at = Some(now);
        }
        plan.push(PlannedAssignment {
            work_item_id: item.id,
            reviewer_id,
        });
    }

    plan
}

/// Per-reviewer count of a plan, for logging
pub fn plan_summary(plan: &[PlannedAssignment]) -> HashMap<Uuid, usize> {
    plan.iter().fold(HashMap::new(), |mut acc, a| {
        *acc.entry(a.reviewer_id).or_insert(0) += 1;
        acc
    })
}

/// Cluster-wide lock so only one instance runs auto-assignment at a time
#[derive(Clone)]
pub struct AssignmentLock {
    store: Arc<dyn IdempotencyStore>,
    ttl: std::time::Duration,
}

impl AssignmentLock {
    pub fn new(store: Arc<dyn IdempotencyStore>, ttl: std::time::Duration) -> Self {
        Self { store, ttl }
    }

    /// Returns the lock token when acquired
    pub async fn try_acquire(&self) -> message_bus::Result<Option<String>> {
        let token = Uuid::new_v4().to_string();
        if self.store.try_acquire(ASSIGNMENT_LOCK_KEY, &token, self.ttl).await? {
            Ok(Some(token))
        } else {
            Ok(None)
        }
    }

    pub async fn release(&self, token: &str) {
        if let Err(e) = self.store.release(ASSIGNMENT_LOCK_KEY, token).await {
            warn!("Failed to release assignment lock: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;
    use message_bus::InMemoryIdempotencyStore;

    fn item(priority: WorkPriority, risk: RiskLevel, created_offset_min: i64) -> WorkItem {
        let created_at = Utc::now() - Duration::minutes(created_offset_min);
        WorkItem {
            id: Uuid::new_v4(),
            case_id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            kind: WorkItemKind::InitialReview,
            priority,
            status: WorkItemStatus::Queued,
            entity_type: EntityType::PrivateCompany,
            risk_level: risk,
            assigned_to: None,
            due_at: priority.due_at(created_at),
            created_at,
            assigned_at: None,
            completed_at: None,
        }
    }

    fn reviewer(name: &str, senior: bool, capacity: i32, open_items: i64) -> Reviewer {
        Reviewer {
            id: Uuid::new_v4(),
            display_name: name.into(),
            email: format!("{}@example.com", name),
            active: true,
            senior,
            specialties: vec![],
            capacity,
            open_items,
            last_assigned_at: None,
        }
    }

    #[test]
    fn test_priority_from_risk() {
        use RiskLevel::*;
        let kind = WorkItemKind::InitialReview;
        assert_eq!(WorkPriority::from_risk(High, kind), WorkPriority::Urgent);
        assert_eq!(WorkPriority::from_risk(MediumHigh, kind), WorkPriority::High);
        assert_eq!(WorkPriority::from_risk(Medium, kind), WorkPriority::Normal);
        assert_eq!(WorkPriority::from_risk(MediumLow, kind), WorkPriority::Low);
        assert_eq!(WorkPriority::from_risk(Unknown, kind), WorkPriority::Low);

        let esc = WorkItemKind::Escalation;
        assert_eq!(WorkPriority::from_risk(Low, esc), WorkPriority::Normal);
        assert_eq!(WorkPriority::from_risk(High, esc), WorkPriority::Urgent);
    }

    #[test]
    fn test_sla() {
        assert_eq!(WorkPriority::Urgent.sla(), Duration::hours(4));
        assert_eq!(WorkPriority::High.sla(), Duration::hours(24));
        assert_eq!(WorkPriority::Normal.sla(), Duration::hours(72));
        assert_eq!(WorkPriority::Low.sla(), Duration::hours(120));
    }

    #[test]
    fn test_queue_order() {
        let low_old = item(WorkPriority::Low, RiskLevel::Low, 600);
        let urgent = item(WorkPriority::Urgent, RiskLevel::High, 1);
        let normal_new = item(WorkPriority::Normal, RiskLevel::Medium, 5);
        let normal_old = item(WorkPriority::Normal, RiskLevel::Medium, 50);

        let mut queue = vec![
            low_old.clone(),
            normal_new.clone(),
            urgent.clone(),
            normal_old.clone(),
        ];
        queue.sort_by(queue_order);

        let ids: Vec<Uuid> = queue.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![urgent.id, normal_old.id, normal_new.id, low_old.id]);
    }

    #[test]
    fn test_eligibility() {
        let routine = item(WorkPriority::Normal, RiskLevel::Medium, 0);
        let risky = item(WorkPriority::High, RiskLevel::MediumHigh, 0);

        let junior = reviewer("junior", false, 5, 0);
        let senior = reviewer("senior", true, 5, 0);
        let full = reviewer("full", true, 2, 2);
        let mut inactive = reviewer("inactive", true, 5, 0);
        inactive.active = false;
        let mut trust_only = reviewer("trust", true, 5, 0);
        trust_only.specialties = vec!["trust".into()];

        assert!(is_eligible(&junior, &routine));
        assert!(!is_eligible(&junior, &risky));
        assert!(is_eligible(&senior, &risky));
        assert!(!is_eligible(&full, &routine));
        assert!(!is_eligible(&inactive, &routine));
        assert!(!is_eligible(&trust_only, &routine));
    }

    #[test]
    fn test_reviewer_ranking() {
        let work = item(WorkPriority::Normal, RiskLevel::Medium, 0);

        let mut specialist = reviewer("specialist", false, 10, 8);
        specialist.specialties = vec!["private_company".into()];
        let idle = reviewer("idle", false, 10, 0);
        assert_eq!(
            best_reviewer(&work, &[idle.clone(), specialist.clone()]).unwrap().id,
            specialist.id
        );

        let busy = reviewer("busy", false, 10, 5);
        assert_eq!(
            best_reviewer(&work, &[busy.clone(), idle.clone()]).unwrap().id,
            idle.id
        );

        let mut recent = reviewer("recent", false, 10, 0);
        recent.last_assigned_at = Some(Utc::now());
        let mut earlier = reviewer("earlier", false, 10, 0);
        earlier.last_assigned_at = Some(Utc::now() - Duration::hours(3));
        assert_eq!(
            best_reviewer(&work, &[recent.clone(), earlier.clone()]).unwrap().id,
            earlier.id
        );
        assert_eq!(
            best_reviewer(&work, &[earlier.clone(), idle.clone()]).unwrap().id,
            idle.id
        );
    }

    #[test]
    fn test_plan_spreads_load() {
        let items: Vec<WorkItem> = (0..4)
            .map(|n| item(WorkPriority::Normal, RiskLevel::Medium, n))
            .collect();
        let reviewers = vec![reviewer("a", false, 2, 0), reviewer("b", false, 2, 0)];

        let plan = plan_assignments(&items, &reviewers, Utc::now());
        assert_eq!(plan.len(), 4);

        let summary = plan_summary(&plan);
        assert_eq!(summary.get(&reviewers[0].id), Some(&2));
        assert_eq!(summary.get(&reviewers[1].id), Some(&2));
    }

    #[test]
    fn test_plan_skips_ineligible() {
        let items = vec![
            item(WorkPriority::Urgent, RiskLevel::High, 0),
            item(WorkPriority::Low, RiskLevel::Low, 0),
        ];
        let junior = reviewer("junior", false, 1, 0);

        let plan = plan_assignments(&items, &[junior.clone()], Utc::now());
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].work_item_id, items[1].id);
    }

    #[test]
    fn test_plan_ignores_non_queued() {
        let mut assigned = item(WorkPriority::Normal, RiskLevel::Medium, 0);
        assigned.status = WorkItemStatus::Assigned;
        let plan = plan_assignments(&[assigned], &[reviewer("a", true, 5, 0)], Utc::now());
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_assignment_lock_is_exclusive() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let lock = AssignmentLock::new(store.clone(), std::time::Duration::from_secs(30));
        let other = AssignmentLock::new(store, std::time::Duration::from_secs(30));

        let token = lock.try_acquire().await.unwrap().expect("first acquire");
        assert!(other.try_acquire().await.unwrap().is_none());

        lock.release(&token).await;
        assert!(other.try_acquire().await.unwrap().is_some());
    }
}
