//! # Agent Directory Entry
//!
//! Agents self-register and heartbeat into the directory; the dispatcher
//! reads it to pick execution targets. Liveness is a sliding window over
//! `last_heartbeat`, so a stale entry simply stops matching rather than
//! needing explicit deregistration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One registered execution agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub team_id: Uuid,
    pub name: String,
    /// Key/value capability tags; tag-targeted tasks match on supersets.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub last_heartbeat: DateTime<Utc>,
    /// Concurrent-task capacity reported by the agent.
    pub max_active_tasks: u32,
    /// Tasks currently held, per the agent's last heartbeat.
    #[serde(default)]
    pub num_active_tasks: u32,
    /// When the dispatcher last assigned this agent a task. Tie-breaker for
    /// least-utilized selection.
    #[serde(default)]
    pub last_assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u64,
}

impl Agent {
    /// Heartbeat within the liveness window.
    pub fn is_live(&self, now: DateTime<Utc>, liveness_secs: i64) -> bool {
        (now - self.last_heartbeat).num_seconds() < liveness_secs
    }

    /// Whether this agent's tags are a superset of `required`.
    pub fn matches_tags(&self, required: &BTreeMap<String, String>) -> bool {
        required
            .iter()
            .all(|(k, v)| self.tags.get(k).is_some_and(|have| have == v))
    }

    /// Free capacity; saturates at zero when the agent is over-committed.
    pub fn available_capacity(&self) -> u32 {
        self.max_active_tasks.saturating_sub(self.num_active_tasks)
    }
}

/// Sort key for least-utilized agent selection: most free capacity first,
/// then least-recently-assigned.
pub fn least_utilized_order(a: &Agent, b: &Agent) -> std::cmp::Ordering {
    b.available_capacity()
        .cmp(&a.available_capacity())
        .then_with(|| a.last_assigned_at.cmp(&b.last_assigned_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn agent(tags: &[(&str, &str)]) -> Agent {
        Agent {
            id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            name: "worker".to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            last_heartbeat: Utc::now(),
            max_active_tasks: 10,
            num_active_tasks: 0,
            last_assigned_at: None,
            version: 0,
        }
    }

    #[test]
    fn test_liveness_window() {
        let now = Utc::now();
        let mut a = agent(&[]);
        a.last_heartbeat = now - Duration::seconds(179);
        assert!(a.is_live(now, 180));
        a.last_heartbeat = now - Duration::seconds(180);
        assert!(!a.is_live(now, 180));
    }

    #[test]
    fn test_tag_superset_match() {
        let a = agent(&[("os", "linux"), ("region", "us-east"), ("gpu", "true")]);
        let mut required = BTreeMap::new();
        required.insert("os".to_string(), "linux".to_string());
        assert!(a.matches_tags(&required));

        required.insert("region".to_string(), "eu-west".to_string());
        assert!(!a.matches_tags(&required));
    }

    #[test]
    fn test_empty_requirements_match_any_agent() {
        let a = agent(&[]);
        assert!(a.matches_tags(&BTreeMap::new()));
    }

    #[test]
    fn test_least_utilized_prefers_free_capacity_then_oldest_assignment() {
        let now = Utc::now();
        let mut busy = agent(&[]);
        busy.num_active_tasks = 8;
        let mut idle = agent(&[]);
        idle.num_active_tasks = 1;
        assert_eq!(least_utilized_order(&idle, &busy), std::cmp::Ordering::Less);

        let mut recent = agent(&[]);
        recent.last_assigned_at = Some(now);
        let mut stale = agent(&[]);
        stale.last_assigned_at = Some(now - Duration::minutes(5));
        assert_eq!(
            least_utilized_order(&stale, &recent),
            std::cmp::Ordering::Less
        );
    }
}
