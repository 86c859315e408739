//! Workflow modes.
//!
//! Eight statically defined development workflow states. Each mode is a pure
//! data bundle — display metadata, guard questions, allowed and forbidden
//! action lists, recommended successors, and a task factory — kept in one
//! table so every policy is inspectable in one place. Only the machine's
//! current pointer and transition history are runtime state (see `machine`).

pub mod criteria;
pub mod machine;

use serde::{Deserialize, Serialize};

use crate::orchestrator::engine::{StageDefinition, TaskSpec};
use crate::orchestrator::task::TaskPolicy;

/// The eight workflow states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Foundation,
    Build,
    Completion,
    Cleanup,
    Validation,
    Deployment,
    Maintenance,
    Enhancement,
}

impl Mode {
    pub const ALL: [Mode; 8] = [
        Mode::Foundation,
        Mode::Build,
        Mode::Completion,
        Mode::Cleanup,
        Mode::Validation,
        Mode::Deployment,
        Mode::Maintenance,
        Mode::Enhancement,
    ];

    /// The static policy bundle for this mode.
    pub fn profile(self) -> &'static ModeProfile {
        &PROFILES[self as usize]
    }

    /// Owned policy snapshot for stamping onto tasks at creation time.
    pub fn policy(self) -> TaskPolicy {
        let profile = self.profile();
        TaskPolicy {
            guard_questions: profile
                .guard_questions
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_actions: profile
                .allowed_actions
                .iter()
                .map(|s| s.to_string())
                .collect(),
            forbidden_actions: profile
                .forbidden_actions
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Factory for this mode's stage plan. Tasks carry instructions; the
    /// orchestrator stamps the policy on top.
    pub fn stage_plan(self) -> Vec<StageDefinition> {
        let spec = |name: &str, instruction: &str| TaskSpec::new(name).with_instruction(instruction);
        match self {
            Mode::Foundation => vec![
                StageDefinition::new(
                    "Survey",
                    vec![
                        spec(
                            "Audit repository layout",
                            "Map the repository layout and note missing scaffolding: build files, entry points, directory conventions.",
                        ),
                        spec(
                            "Inventory tooling gaps",
                            "List the build, lint, and dev tooling the project lacks for day-one development.",
                        ),
                    ],
                ),
                StageDefinition::new(
                    "Scaffold",
                    vec![
                        spec(
                            "Set up build tooling",
                            "Create or repair the build configuration so a clean checkout builds.",
                        ),
                        spec(
                            "Create dev entry point",
                            "Add a runnable dev entry point (dev script or equivalent) and document how to start it.",
                        ),
                        spec(
                            "Wire base configuration",
                            "Add baseline configuration files with sensible defaults and environment overrides.",
                        ),
                        spec(
                            "Add smoke test harness",
                            "Add a minimal test harness and one smoke test that exercises startup.",
                        ),
                    ],
                ),
            ],
            Mode::Build => vec![
                StageDefinition::new(
                    "Plan",
                    vec![
                        spec(
                            "Select next features",
                            "Choose the highest-value unimplemented features and write one-paragraph plans for each.",
                        ),
                        spec(
                            "Define interfaces",
                            "Sketch the types and interfaces the planned features need, keeping existing callers working.",
                        ),
                    ],
                ),
                StageDefinition::new(
                    "Implement",
                    vec![
                        spec("Implement feature slice 1", "Implement the first planned feature end to end, with tests."),
                        spec("Implement feature slice 2", "Implement the second planned feature end to end, with tests."),
                        spec("Implement feature slice 3", "Implement the third planned feature end to end, with tests."),
                        spec(
                            "Update documentation",
                            "Document the new features where the project keeps its docs.",
                        ),
                    ],
                ),
                StageDefinition::new(
                    "Stabilize",
                    vec![
                        spec(
                            "Reconcile integration points",
                            "Make the new features work together; fix any interface drift between them.",
                        ),
                        spec("Run and fix tests", "Run the whole test suite and fix every failure you introduced."),
                    ],
                ),
            ],
            Mode::Completion => vec![
                StageDefinition::new(
                    "Locate",
                    vec![
                        spec(
                            "Index unfinished work",
                            "Find every TODO, FIXME, stub, and placeholder; produce a prioritized list.",
                        ),
                        spec(
                            "Triage by risk",
                            "Order the unfinished items by user impact and risk of leaving them unfinished.",
                        ),
                    ],
                ),
                StageDefinition::new(
                    "Finish",
                    vec![
                        spec("Complete high-priority items", "Finish the top third of the unfinished-work list."),
                        spec("Complete remaining items", "Finish the rest of the unfinished-work list."),
                        spec(
                            "Fill error-handling gaps",
                            "Replace panics and ignored errors on the paths you touched with real handling.",
                        ),
                        spec(
                            "Backfill missing tests",
                            "Add tests for the completed work so it cannot silently regress.",
                        ),
                    ],
                ),
            ],
            Mode::Cleanup => vec![
                StageDefinition::new(
                    "Sweep",
                    vec![
                        spec("Remove dead code", "Delete unused code, files, and dependencies. Behavior must not change."),
                        spec("Fix warnings and lints", "Resolve compiler and linter warnings without suppressing them."),
                        spec("Normalize formatting", "Apply the project formatter and fix inconsistent naming."),
                    ],
                ),
                StageDefinition::new(
                    "Simplify",
                    vec![
                        spec(
                            "Flatten convoluted paths",
                            "Simplify the most convoluted code paths you can find, one at a time, verifying tests after each.",
                        ),
                        spec("Tidy imports and modules", "Reorganize imports and module boundaries for clarity."),
                        spec("Verify behavior unchanged", "Run the full test suite and confirm identical behavior."),
                    ],
                ),
            ],
            Mode::Validation => vec![
                StageDefinition::new(
                    "Cover",
                    vec![
                        spec("Map untested code", "Identify the modules with the weakest test coverage."),
                        spec("Write unit tests", "Add unit tests for the weakest modules, covering failure paths."),
                        spec("Write integration tests", "Add integration tests for the main user-facing flows."),
                        spec("Exercise edge cases", "Test boundary conditions: empty inputs, limits, concurrent use."),
                    ],
                ),
                StageDefinition::new(
                    "Repair",
                    vec![
                        spec("Fix revealed bugs", "Fix every bug the new tests revealed."),
                        spec("Stabilize flaky tests", "Find and fix nondeterministic tests."),
                        spec("Wire test tooling", "Make the whole suite runnable with one command."),
                    ],
                ),
            ],
            Mode::Deployment => vec![
                StageDefinition::new(
                    "Package",
                    vec![
                        spec("Make the build reproducible", "Ensure a clean environment can build the project from scratch."),
                        spec("Write container or package config", "Add the packaging configuration the project's platform expects."),
                        spec("Externalize secrets", "Move credentials and environment-specific values out of the repository."),
                    ],
                ),
                StageDefinition::new(
                    "Ship",
                    vec![
                        spec("Add health checks", "Add liveness/readiness endpoints or equivalent health probes."),
                        spec("Write deployment scripts", "Script the deploy and rollback paths."),
                        spec("Document the release process", "Write the runbook: deploy, verify, roll back."),
                    ],
                ),
            ],
            Mode::Maintenance => vec![
                StageDefinition::new(
                    "Upkeep",
                    vec![
                        spec("Update dependencies", "Update dependencies, reading changelogs for breaking changes."),
                        spec("Patch known vulnerabilities", "Resolve published advisories against the dependency set."),
                        spec("Fix reported bugs", "Work through the open bug list, smallest reproduction first."),
                    ],
                ),
                StageDefinition::new(
                    "Observe",
                    vec![
                        spec("Improve diagnostics", "Improve log messages and error diagnostics where debugging was painful."),
                        spec("Verify monitoring", "Confirm monitoring and alerting still reflect reality."),
                        spec("Record maintenance notes", "Write down what was changed and what to watch."),
                    ],
                ),
            ],
            Mode::Enhancement => vec![
                StageDefinition::new(
                    "Design",
                    vec![
                        spec("Select backlog items", "Pick the next backlog items and confirm they are additive."),
                        spec("Design compatible interfaces", "Design the new capability behind a clear, backward-compatible interface."),
                    ],
                ),
                StageDefinition::new(
                    "Extend",
                    vec![
                        spec("Implement enhancement 1", "Implement the first enhancement without touching existing behavior."),
                        spec("Implement enhancement 2", "Implement the second enhancement without touching existing behavior."),
                        spec("Test new capability", "Add tests proving the new capability and the old behavior both hold."),
                        spec("Update documentation", "Document the new capability."),
                    ],
                ),
            ],
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.profile().name)
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Mode::ALL
            .into_iter()
            .find(|m| m.profile().name.to_lowercase() == lower)
            .ok_or_else(|| {
                format!(
                    "unknown mode {:?}; expected one of: {}",
                    s,
                    Mode::ALL.map(|m| m.profile().name).join(", ")
                )
            })
    }
}

/// Static policy bundle for one mode.
#[derive(Debug)]
pub struct ModeProfile {
    pub mode: Mode,
    pub icon: &'static str,
    pub name: &'static str,
    pub summary: &'static str,
    /// Self-check strings injected into every task prompt.
    pub guard_questions: &'static [&'static str],
    pub allowed_actions: &'static [&'static str],
    pub forbidden_actions: &'static [&'static str],
    /// Advisory successors; `switch_to` accepts any target regardless.
    pub recommended_next: &'static [Mode],
}

static PROFILES: [ModeProfile; 8] = [
    ModeProfile {
        mode: Mode::Foundation,
        icon: "🏗️",
        name: "Foundation",
        summary: "Make the project buildable and runnable from a clean checkout",
        guard_questions: &[
            "Does the project build and run from a clean checkout?",
            "Is there a working dev entry point?",
            "Are the core directories and configs in place?",
        ],
        allowed_actions: &[
            "create project scaffolding",
            "add build and dev scripts",
            "add core configuration files",
            "write minimal smoke tests",
            "document setup steps",
        ],
        forbidden_actions: &[
            "implement product features",
            "optimize performance",
            "deploy anything",
            "refactor unrelated code",
        ],
        recommended_next: &[Mode::Build, Mode::Completion],
    },
    ModeProfile {
        mode: Mode::Build,
        icon: "🔨",
        name: "Build",
        summary: "Implement planned features on a working base",
        guard_questions: &[
            "Is this feature in scope for the current milestone?",
            "Does the change compile and pass existing tests?",
            "Is new code covered by at least one test?",
        ],
        allowed_actions: &[
            "implement planned features",
            "extend data models",
            "add feature tests",
            "update docs for new features",
        ],
        forbidden_actions: &[
            "large-scale refactors",
            "deployment changes",
            "deleting existing features",
            "drive-by style rewrites",
        ],
        recommended_next: &[Mode::Completion, Mode::Cleanup],
    },
    ModeProfile {
        mode: Mode::Completion,
        icon: "✅",
        name: "Completion",
        summary: "Finish partial work: TODOs, stubs, and placeholders",
        guard_questions: &[
            "Is this finishing existing partial work rather than starting new work?",
            "Did you search for TODO and FIXME markers before claiming done?",
            "Are stubs and placeholders fully replaced?",
        ],
        allowed_actions: &[
            "finish TODO and FIXME items",
            "replace stubs with real implementations",
            "fill gaps in error handling",
            "complete missing tests",
        ],
        forbidden_actions: &[
            "start brand-new features",
            "rewrite working code",
            "change public interfaces without need",
        ],
        recommended_next: &[Mode::Cleanup, Mode::Validation],
    },
    ModeProfile {
        mode: Mode::Cleanup,
        icon: "🧹",
        name: "Cleanup",
        summary: "Hygiene only: dead code, warnings, formatting",
        guard_questions: &[
            "Does every removal keep behavior identical?",
            "Are tests still green after each change?",
            "Is the diff limited to hygiene?",
        ],
        allowed_actions: &[
            "remove dead code",
            "fix lints and warnings",
            "normalize formatting",
            "simplify convoluted code paths",
            "tidy imports",
        ],
        forbidden_actions: &[
            "add features",
            "change observable behavior",
            "touch deployment config",
        ],
        recommended_next: &[Mode::Validation, Mode::Enhancement],
    },
    ModeProfile {
        mode: Mode::Validation,
        icon: "🧪",
        name: "Validation",
        summary: "Build out test coverage and fix what it reveals",
        guard_questions: &[
            "Does every module have meaningful test coverage?",
            "Do the tests exercise failure paths, not just happy paths?",
            "Do all tests pass locally?",
        ],
        allowed_actions: &[
            "write unit and integration tests",
            "fix bugs the tests reveal",
            "add test tooling and fixtures",
        ],
        forbidden_actions: &[
            "add features",
            "refactor beyond what a failing test requires",
            "deploy",
        ],
        recommended_next: &[Mode::Deployment],
    },
    ModeProfile {
        mode: Mode::Deployment,
        icon: "🚀",
        name: "Deployment",
        summary: "Package, ship, and document the release path",
        guard_questions: &[
            "Is the build reproducible from a clean environment?",
            "Are secrets kept out of the repository?",
            "Is there a rollback path?",
        ],
        allowed_actions: &[
            "add packaging and container files",
            "write deployment scripts",
            "add health checks",
            "document release steps",
        ],
        forbidden_actions: &[
            "change application features",
            "skip verification steps",
            "hardcode credentials",
        ],
        recommended_next: &[Mode::Maintenance],
    },
    ModeProfile {
        mode: Mode::Maintenance,
        icon: "🔧",
        name: "Maintenance",
        summary: "Keep a live system healthy: updates, fixes, diagnostics",
        guard_questions: &[
            "Is the change the smallest fix that resolves the issue?",
            "Are dependencies current and free of known advisories?",
            "Is behavior preserved unless a bug required changing it?",
        ],
        allowed_actions: &[
            "update dependencies",
            "fix reported bugs",
            "improve logs and diagnostics",
            "patch security issues",
        ],
        forbidden_actions: &[
            "feature work",
            "speculative rewrites",
            "breaking API changes",
        ],
        recommended_next: &[Mode::Enhancement],
    },
    ModeProfile {
        mode: Mode::Enhancement,
        icon: "✨",
        name: "Enhancement",
        summary: "Add new capability on top of stable code",
        guard_questions: &[
            "Is the new capability additive and backward compatible?",
            "Is it behind a clear interface?",
            "Is existing behavior untouched?",
        ],
        allowed_actions: &[
            "add new features on top of stable code",
            "extend public interfaces compatibly",
            "add tests for new capability",
            "update docs",
        ],
        forbidden_actions: &[
            "break existing interfaces",
            "destabilize tested behavior",
            "deploy untested work",
        ],
        recommended_next: &[Mode::Cleanup],
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_profiles_cover_all_modes_in_order() {
        for mode in Mode::ALL {
            assert_eq!(mode.profile().mode, mode);
        }
    }

    #[test]
    fn test_every_profile_is_fully_populated() {
        for mode in Mode::ALL {
            let profile = mode.profile();
            assert!(!profile.icon.is_empty());
            assert!(!profile.name.is_empty());
            assert!(!profile.guard_questions.is_empty());
            assert!(!profile.allowed_actions.is_empty());
            assert!(!profile.forbidden_actions.is_empty());
            assert!(!profile.recommended_next.is_empty());
        }
    }

    #[test]
    fn test_stage_plans_have_reasonable_task_counts() {
        for mode in Mode::ALL {
            let plan = mode.stage_plan();
            assert!(!plan.is_empty(), "{mode} has no stages");
            let tasks: usize = plan.iter().map(|s| s.tasks.len()).sum();
            assert!(
                (4..=25).contains(&tasks),
                "{mode} has {tasks} tasks, expected 4..=25"
            );
            for stage in &plan {
                for task in &stage.tasks {
                    assert!(task.instruction.is_some(), "{mode} task without instruction");
                }
            }
        }
    }

    #[test]
    fn test_policy_snapshot_matches_profile() {
        let policy = Mode::Cleanup.policy();
        let profile = Mode::Cleanup.profile();
        assert_eq!(policy.guard_questions.len(), profile.guard_questions.len());
        assert_eq!(policy.allowed_actions[0], profile.allowed_actions[0]);
        assert_eq!(
            policy.forbidden_actions.len(),
            profile.forbidden_actions.len()
        );
    }

    #[test]
    fn test_recommended_successor_graph() {
        assert_eq!(
            Mode::Foundation.profile().recommended_next,
            &[Mode::Build, Mode::Completion]
        );
        assert_eq!(Mode::Validation.profile().recommended_next, &[Mode::Deployment]);
        assert_eq!(Mode::Enhancement.profile().recommended_next, &[Mode::Cleanup]);
    }

    #[test]
    fn test_mode_parse_and_display_roundtrip() {
        for mode in Mode::ALL {
            let parsed = Mode::from_str(&mode.to_string()).unwrap();
            assert_eq!(parsed, mode);
        }
        assert_eq!(Mode::from_str("cleanup").unwrap(), Mode::Cleanup);
        assert!(Mode::from_str("warp-speed").is_err());
    }

    #[test]
    fn test_mode_serde_uses_lowercase() {
        let json = serde_json::to_string(&Mode::Deployment).unwrap();
        assert_eq!(json, "\"deployment\"");
        let parsed: Mode = serde_json::from_str("\"foundation\"").unwrap();
        assert_eq!(parsed, Mode::Foundation);
    }
}
