//! Declarative run goals.
//!
//! A [`Goal`] is a value object: "mutation" methods return a new version
//! rather than mutating in place, matching the session/episode immutability
//! convention used elsewhere in this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    /// Authored but not yet attached to a run.
    Draft,
    /// Currently being pursued by a run.
    Active,
    /// The run met its success criteria.
    Completed,
    /// The run gave up or was cancelled before completion.
    Failed,
}

/// One measurable condition for a goal's success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessCriterion {
    /// Unique within the goal.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// The memory key or metric name this criterion reads.
    pub metric: String,
    /// Target value, compared against the metric via the owning evaluator.
    pub target: serde_json::Value,
    /// Relative weight among sibling criteria.
    pub weight: f64,
    /// Whether this criterion has been satisfied.
    pub met: bool,
}

/// A hard or soft constraint the run must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintType {
    /// Violating this constraint fails the run outright.
    Hard,
    /// Violating this constraint is recorded but does not fail the run.
    Soft,
}

/// A single constraint attached to a goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraint {
    /// Unique within the goal.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Hard or soft.
    pub r#type: ConstraintType,
    /// Free-form grouping tag (e.g. "budget", "safety", "latency").
    pub category: String,
}

/// The declarative target of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    /// Unique id.
    pub id: String,
    /// Short name.
    pub name: String,
    /// Longer description of intent.
    pub description: String,
    /// Ordered success criteria.
    pub success_criteria: Vec<SuccessCriterion>,
    /// Ordered constraints.
    pub constraints: Vec<Constraint>,
    /// Lifecycle status.
    pub status: GoalStatus,
    /// Immutable creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-modified timestamp; bumped on every versioned mutation.
    pub updated_at: DateTime<Utc>,
}

impl Goal {
    /// Construct a new draft goal.
    pub fn new<S: Into<String>>(id: S, name: S, description: S) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            success_criteria: Vec::new(),
            constraints: Vec::new(),
            status: GoalStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    /// Produce a new version with an added success criterion.
    pub fn with_success_criterion(mut self, criterion: SuccessCriterion) -> Self {
        self.success_criteria.push(criterion);
        self.updated_at = Utc::now();
        self
    }

    /// Produce a new version with an added constraint.
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self.updated_at = Utc::now();
        self
    }

    /// Produce a new version transitioned to `status`.
    pub fn with_status(mut self, status: GoalStatus) -> Self {
        self.status = status;
        self.updated_at = Utc::now();
        self
    }

    /// Weighted fraction of success criteria currently marked `met`.
    pub fn progress(&self) -> f64 {
        let total_weight: f64 = self.success_criteria.iter().map(|c| c.weight).sum();
        if total_weight == 0.0 {
            return 0.0;
        }
        let met_weight: f64 = self
            .success_criteria
            .iter()
            .filter(|c| c.met)
            .map(|c| c.weight)
            .sum();
        met_weight / total_weight
    }

    /// Whether every hard constraint's category is absent from `violated_categories`.
    pub fn hard_constraints_satisfied(&self, violated_categories: &[String]) -> bool {
        self.constraints
            .iter()
            .filter(|c| c.r#type == ConstraintType::Hard)
            .all(|c| !violated_categories.contains(&c.category))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_is_weighted() {
        let goal = Goal::new("g1", "Goal", "desc")
            .with_success_criterion(SuccessCriterion {
                id: "c1".into(),
                description: "first".into(),
                metric: "x".into(),
                target: json!(1),
                weight: 1.0,
                met: true,
            })
            .with_success_criterion(SuccessCriterion {
                id: "c2".into(),
                description: "second".into(),
                metric: "y".into(),
                target: json!(2),
                weight: 3.0,
                met: false,
            });

        assert_eq!(goal.progress(), 0.25);
    }

    #[test]
    fn mutation_bumps_updated_at_without_mutating_created_at() {
        let goal = Goal::new("g1", "Goal", "desc");
        let created = goal.created_at;
        let goal = goal.with_status(GoalStatus::Active);
        assert_eq!(goal.created_at, created);
        assert_eq!(goal.status, GoalStatus::Active);
    }

    #[test]
    fn hard_constraints_block_violations() {
        let goal = Goal::new("g1", "Goal", "desc").with_constraint(Constraint {
            id: "c1".into(),
            description: "budget".into(),
            r#type: ConstraintType::Hard,
            category: "budget".into(),
        });
        assert!(!goal.hard_constraints_satisfied(&["budget".to_string()]));
        assert!(goal.hard_constraints_satisfied(&["other".to_string()]));
    }
}
