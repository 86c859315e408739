//! Success criteria for workflow modes.
//!
//! A criterion is either toggled manually by an operator or backed by a
//! validator that re-inspects the project. Required criteria gate mode
//! completion; optional ones are advisory.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::assess::ProjectAssessor;
use crate::assess::walker::any_exists;
use crate::modes::Mode;

/// Re-inspects the project to decide whether a criterion holds.
#[async_trait]
pub trait CriterionValidator: Send + Sync {
    async fn validate(&self, project_dir: &Path) -> bool;
}

/// A named condition that must hold for a mode to be considered finished.
#[derive(Clone)]
pub struct SuccessCriterion {
    pub id: String,
    pub description: String,
    pub required: bool,
    pub completed: bool,
    validator: Option<Arc<dyn CriterionValidator>>,
}

impl SuccessCriterion {
    pub fn manual(id: &str, description: &str, required: bool) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            required,
            completed: false,
            validator: None,
        }
    }

    pub fn validated(
        id: &str,
        description: &str,
        required: bool,
        validator: Arc<dyn CriterionValidator>,
    ) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            required,
            completed: false,
            validator: Some(validator),
        }
    }

    pub fn has_validator(&self) -> bool {
        self.validator.is_some()
    }

    /// Operator override for criteria without a validator.
    pub fn mark_completed(&mut self) {
        self.completed = true;
    }

    /// Evaluate the criterion. A validator re-inspects the project and can
    /// flip the flag in either direction; without one, the stored flag is
    /// the answer.
    pub async fn evaluate(&mut self, project_dir: &Path) -> bool {
        if let Some(ref validator) = self.validator {
            self.completed = validator.validate(project_dir).await;
        }
        self.completed
    }
}

impl std::fmt::Debug for SuccessCriterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuccessCriterion")
            .field("id", &self.id)
            .field("required", &self.required)
            .field("completed", &self.completed)
            .field("validated", &self.has_validator())
            .finish()
    }
}

/// Passes when the project has no unfinished-work markers left.
pub struct NoPartialWorkValidator;

#[async_trait]
impl CriterionValidator for NoPartialWorkValidator {
    async fn validate(&self, project_dir: &Path) -> bool {
        ProjectAssessor::with_defaults()
            .partial_work_markers(project_dir)
            .matches
            == 0
    }
}

/// Passes when a test layout exists.
pub struct TestsPresentValidator;

#[async_trait]
impl CriterionValidator for TestsPresentValidator {
    async fn validate(&self, project_dir: &Path) -> bool {
        any_exists(
            &crate::assess::walker::RealFs,
            project_dir,
            &["tests", "test", "__tests__", "spec"],
        )
    }
}

/// Default criteria set for each mode. Validator-backed where the condition
/// is mechanically checkable; manual otherwise.
pub fn default_criteria(mode: Mode) -> Vec<SuccessCriterion> {
    match mode {
        Mode::Foundation => vec![
            SuccessCriterion::manual("builds-clean", "Project builds from a clean checkout", true),
            SuccessCriterion::manual("dev-entry", "A dev entry point starts successfully", true),
            SuccessCriterion::validated(
                "smoke-tests",
                "A smoke test layout exists",
                false,
                Arc::new(TestsPresentValidator),
            ),
        ],
        Mode::Build => vec![
            SuccessCriterion::manual("features-done", "Planned features are implemented", true),
            SuccessCriterion::manual("suite-green", "The test suite passes", true),
        ],
        Mode::Completion => vec![
            SuccessCriterion::validated(
                "no-partial-work",
                "No TODO/FIXME or stub markers remain",
                true,
                Arc::new(NoPartialWorkValidator),
            ),
            SuccessCriterion::manual("suite-green", "The test suite passes", true),
        ],
        Mode::Cleanup => vec![
            SuccessCriterion::manual("no-warnings", "Build and lints run warning-free", true),
            SuccessCriterion::manual(
                "behavior-unchanged",
                "Behavior verified unchanged after cleanup",
                true,
            ),
        ],
        Mode::Validation => vec![
            SuccessCriterion::validated(
                "tests-present",
                "Test directories or configuration exist",
                true,
                Arc::new(TestsPresentValidator),
            ),
            SuccessCriterion::manual("coverage-ok", "Critical paths have test coverage", true),
            SuccessCriterion::manual("suite-green", "The full suite passes", true),
        ],
        Mode::Deployment => vec![
            SuccessCriterion::manual("reproducible", "Build is reproducible in a clean env", true),
            SuccessCriterion::manual("rollback", "A rollback path is documented", true),
            SuccessCriterion::manual("health-checks", "Health checks respond", false),
        ],
        Mode::Maintenance => vec![
            SuccessCriterion::manual("deps-current", "Dependencies updated, advisories clear", true),
            SuccessCriterion::manual("bugs-triaged", "Open bugs triaged or fixed", false),
        ],
        Mode::Enhancement => vec![
            SuccessCriterion::manual("additive", "New capability is additive and compatible", true),
            SuccessCriterion::validated(
                "tested",
                "New capability has tests",
                true,
                Arc::new(TestsPresentValidator),
            ),
        ],
    }
}
