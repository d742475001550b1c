//! # Definition Templates
//!
//! A `JobDefinition` is the reusable template: a set of `TaskDefinition` nodes
//! joined by regex-conditioned routes, each node carrying an ordered list of
//! `StepDefinition` payloads and an agent-targeting policy. Definitions are
//! immutable input to job instantiation; runtime entities snapshot what they
//! need and never reference a definition during execution.

use super::job::VarValue;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use uuid::Uuid;

/// Agent-targeting policy for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Any one live agent.
    SingleAgent,
    /// Every live agent; one outcome per agent.
    AllAgents,
    /// One live agent whose tags are a superset of `required_tags`.
    SingleAgentWithTags,
    /// Every live agent whose tags are a superset of `required_tags`.
    AllAgentsWithTags,
    /// The one agent pinned by `target_agent_id`.
    SingleSpecificAgent,
}

impl TargetKind {
    pub fn requires_tags(&self) -> bool {
        matches!(self, Self::SingleAgentWithTags | Self::AllAgentsWithTags)
    }

    /// Fan-out targets produce one outcome per matching agent.
    pub fn is_fan_out(&self) -> bool {
        matches!(self, Self::AllAgents | Self::AllAgentsWithTags)
    }
}

/// Condition attached to a routing edge, evaluated against the outcome
/// signature of the completing task.
///
/// `Default` is the unconditioned edge: it fires for every signature except
/// `fail`, so success-path graphs need no explicit patterns while failures
/// only travel edges that ask for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RoutePattern {
    Default,
    Pattern(CompiledPattern),
}

/// An explicit pattern with its lazily compiled regex. Equality and
/// serialization go through the raw pattern text; the compiled form is
/// memoized per instance so routing decisions never re-parse.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    raw: String,
    compiled: OnceLock<Option<regex::Regex>>,
}

impl CompiledPattern {
    fn new(raw: String) -> Self {
        Self {
            raw,
            compiled: OnceLock::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn regex(&self) -> Option<&regex::Regex> {
        self.compiled
            .get_or_init(|| regex::Regex::new(&self.raw).ok())
            .as_ref()
    }
}

impl PartialEq for CompiledPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for CompiledPattern {}

impl RoutePattern {
    /// Validate that an explicit pattern compiles. Called at definition-edit
    /// time so execution never sees an invalid pattern.
    pub fn validate(&self) -> Result<()> {
        if let Self::Pattern(p) = self {
            regex::Regex::new(&p.raw).map_err(|e| {
                EngineError::validation(format!("invalid route pattern {:?}: {e}", p.raw))
            })?;
        }
        Ok(())
    }

    /// Whether this edge fires for the given outcome signature.
    pub fn fires(&self, signature: &str) -> bool {
        match self {
            Self::Default => signature != "fail",
            Self::Pattern(p) => match p.regex() {
                Some(re) => re.is_match(signature),
                None => {
                    // Patterns are validated at edit time; an invalid one here
                    // means the snapshot predates validation. Never fire it.
                    tracing::warn!(pattern = %p.raw, "unparseable route pattern");
                    false
                }
            },
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Default => ".*",
            Self::Pattern(p) => p.as_str(),
        }
    }
}

impl From<String> for RoutePattern {
    fn from(raw: String) -> Self {
        if raw.is_empty() || raw == ".*" {
            Self::Default
        } else {
            Self::Pattern(CompiledPattern::new(raw))
        }
    }
}

impl From<RoutePattern> for String {
    fn from(pattern: RoutePattern) -> Self {
        pattern.as_str().to_string()
    }
}

impl From<&str> for RoutePattern {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

/// One directed, pattern-conditioned edge. Whether `task_name` is the source
/// or the target depends on which list the route sits in: `from_routes` name
/// predecessors, `to_routes` name successors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub task_name: String,
    pub pattern: RoutePattern,
}

impl Route {
    pub fn new(task_name: impl Into<String>, pattern: impl Into<RoutePattern>) -> Self {
        Self {
            task_name: task_name.into(),
            pattern: pattern.into(),
        }
    }
}

/// Ordered unit of work under a task. Opaque payload as far as the graph
/// engine is concerned; agents interpret it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    pub order: u32,
    pub command: String,
    #[serde(default)]
    pub arguments: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// One node in a job definition graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique within the parent definition; routes reference nodes by name.
    pub name: String,
    pub target: TargetKind,
    #[serde(default)]
    pub required_tags: BTreeMap<String, String>,
    /// Required when `target` is `SingleSpecificAgent`. May be a literal agent
    /// id or a `@var(name)` reference resolved at dispatch time.
    #[serde(default)]
    pub target_agent_id: Option<String>,
    /// Inbound edges: `(predecessor name, pattern)`.
    #[serde(default)]
    pub from_routes: Vec<Route>,
    /// Outbound edges: `(successor name, pattern)`.
    #[serde(default)]
    pub to_routes: Vec<Route>,
    #[serde(default)]
    pub artifact_ids: Vec<Uuid>,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default)]
    pub step_defs: Vec<StepDefinition>,
}

/// Reusable template describing a task graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: Uuid,
    pub team_id: Uuid,
    pub name: String,
    /// Monotonic run counter; bumped on every instantiation.
    pub last_run_id: u64,
    #[serde(default)]
    pub runtime_vars: BTreeMap<String, VarValue>,
    /// Per-definition retry budget override for auto-restart tasks.
    #[serde(default)]
    pub max_auto_restarts: Option<u32>,
    pub task_defs: Vec<TaskDefinition>,
}

impl JobDefinition {
    pub fn new(team_id: Uuid, name: impl Into<String>, task_defs: Vec<TaskDefinition>) -> Self {
        Self {
            id: Uuid::new_v4(),
            team_id,
            name: name.into(),
            last_run_id: 0,
            runtime_vars: BTreeMap::new(),
            max_auto_restarts: None,
            task_defs,
        }
    }

    pub fn task_def(&self, name: &str) -> Option<&TaskDefinition> {
        self.task_defs.iter().find(|t| t.name == name)
    }

    /// Names of root tasks: no inbound routes and not the target of any
    /// sibling's outbound route.
    pub fn root_task_names(&self) -> Vec<&str> {
        let outbound_targets: Vec<&str> = self
            .task_defs
            .iter()
            .flat_map(|t| t.to_routes.iter().map(|r| r.task_name.as_str()))
            .collect();

        self.task_defs
            .iter()
            .filter(|t| t.from_routes.is_empty() && !outbound_targets.contains(&t.name.as_str()))
            .map(|t| t.name.as_str())
            .collect()
    }

    /// Field-level validation: targeting policy coherence and route-pattern
    /// syntax. Graph-structural validation (unknown names, cycles) lives in
    /// the `graph` module and runs alongside this at definition-edit time.
    pub fn validate(&self) -> Result<()> {
        if self.task_defs.is_empty() {
            return Err(EngineError::validation("task definitions missing"));
        }

        let mut seen = std::collections::BTreeSet::new();
        for task in &self.task_defs {
            if !seen.insert(task.name.as_str()) {
                return Err(EngineError::validation(format!(
                    "duplicate task definition name \"{}\"",
                    task.name
                )));
            }

            if task.target == TargetKind::SingleSpecificAgent && task.target_agent_id.is_none() {
                return Err(EngineError::validation(format!(
                    "task \"{}\" target is single_specific_agent but target_agent_id is missing",
                    task.name
                )));
            }

            if task.target.requires_tags() && task.required_tags.is_empty() {
                return Err(EngineError::validation(format!(
                    "task \"{}\" target requires tags but no required tags are specified",
                    task.name
                )));
            }

            if task.auto_restart && task.target.is_fan_out() {
                return Err(EngineError::validation(format!(
                    "task \"{}\" has auto_restart but targets all agents - auto-restart tasks \
                     must target a single agent",
                    task.name
                )));
            }

            for route in task.from_routes.iter().chain(task.to_routes.iter()) {
                if route.task_name == task.name {
                    return Err(EngineError::validation(format!(
                        "task \"{}\" routes to itself",
                        task.name
                    )));
                }
                route.pattern.validate()?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, target: TargetKind) -> TaskDefinition {
        TaskDefinition {
            name: name.to_string(),
            target,
            required_tags: BTreeMap::new(),
            target_agent_id: None,
            from_routes: vec![],
            to_routes: vec![],
            artifact_ids: vec![],
            auto_restart: false,
            step_defs: vec![],
        }
    }

    #[test]
    fn test_default_pattern_fires_for_everything_but_fail() {
        let pattern = RoutePattern::Default;
        assert!(pattern.fires("ok"));
        assert!(pattern.fires("interrupt"));
        assert!(pattern.fires("custom-route"));
        assert!(!pattern.fires("fail"));
    }

    #[test]
    fn test_explicit_pattern_matches_signature() {
        let pattern = RoutePattern::from("^fail$");
        assert!(pattern.fires("fail"));
        assert!(!pattern.fires("ok"));
    }

    #[test]
    fn test_wildcard_and_empty_normalize_to_default() {
        assert_eq!(RoutePattern::from(".*"), RoutePattern::Default);
        assert_eq!(RoutePattern::from(""), RoutePattern::Default);
        assert!(matches!(RoutePattern::from("^ok$"), RoutePattern::Pattern(_)));
        assert_eq!(RoutePattern::from("^ok$").as_str(), "^ok$");
    }

    #[test]
    fn test_pattern_matches_repeatedly_and_survives_clone() {
        let pattern = RoutePattern::from("^deploy-[a-z]+$");
        assert!(pattern.fires("deploy-east"));
        assert!(pattern.fires("deploy-west"));
        assert!(!pattern.fires("rollback"));

        let snapshot = pattern.clone();
        assert_eq!(snapshot, pattern);
        assert!(snapshot.fires("deploy-east"));
    }

    #[test]
    fn test_root_detection_considers_both_route_directions() {
        let mut a = def("A", TargetKind::SingleAgent);
        let b = def("B", TargetKind::SingleAgent);
        let mut c = def("C", TargetKind::SingleAgent);
        // A -> B via A's outbound route; C declares an inbound route from B.
        a.to_routes.push(Route::new("B", ""));
        c.from_routes.push(Route::new("B", ""));

        let job_def = JobDefinition::new(Uuid::new_v4(), "roots", vec![a, b, c]);
        assert_eq!(job_def.root_task_names(), vec!["A"]);
    }

    #[test]
    fn test_validate_rejects_pinned_target_without_agent_id() {
        let job_def = JobDefinition::new(
            Uuid::new_v4(),
            "bad",
            vec![def("A", TargetKind::SingleSpecificAgent)],
        );
        assert!(job_def.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_auto_restart_fan_out() {
        let mut task = def("A", TargetKind::AllAgents);
        task.auto_restart = true;
        let job_def = JobDefinition::new(Uuid::new_v4(), "bad", vec![task]);
        assert!(job_def.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_tag_target_without_tags() {
        let job_def = JobDefinition::new(
            Uuid::new_v4(),
            "bad",
            vec![def("A", TargetKind::SingleAgentWithTags)],
        );
        assert!(job_def.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_self_route() {
        let mut task = def("A", TargetKind::SingleAgent);
        task.to_routes.push(Route::new("A", ""));
        let job_def = JobDefinition::new(Uuid::new_v4(), "bad", vec![task]);
        assert!(job_def.validate().is_err());
    }
}
