//! Project assessment heuristic.
//!
//! Derives a boolean feature vector from shallow, bounded file-system probes
//! and runs it through a fixed decision tree to recommend a workflow mode.
//! This is a recommendation engine, not a certifier: the output carries a
//! confidence score and a reasoning trail, and nothing downstream treats it
//! as a hard gate.

pub mod walker;

use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;

use crate::modes::Mode;
use walker::{FileSystem, MarkerScan, RealFs, ScanLimits, any_exists, count_markers, file_contains};

/// Markers that indicate unfinished work left in the code.
static PARTIAL_WORK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bTODO\b|\bFIXME\b|unimplemented!|todo!\(").expect("static pattern is valid")
});

/// Markers that indicate hygiene debt rather than missing features.
static HYGIENE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bHACK\b|\bXXX\b|console\.log\(|dbg!\(").expect("static pattern is valid")
});

/// Hygiene markers tolerated before the code stops counting as clean.
const CLEAN_MARKER_THRESHOLD: usize = 3;

/// Boolean feature vector produced by static inspection of a source tree.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FeatureVector {
    pub can_run_dev_server: bool,
    pub has_all_features: bool,
    pub is_code_clean: bool,
    pub has_been_tested: bool,
    pub is_live: bool,
    pub is_stable: bool,
    pub needs_new_features: bool,
}

/// Recommendation produced by the decision tree.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub mode: Mode,
    /// 0–100; best-effort estimate, higher for earlier tree exits.
    pub confidence: u8,
    /// Ordered trail of observations leading to the recommendation.
    pub reasoning: Vec<String>,
    pub alternatives: Vec<Mode>,
}

/// Assesses a project tree through an injected filesystem and scan limits.
pub struct ProjectAssessor {
    fs: Arc<dyn FileSystem>,
    limits: ScanLimits,
}

impl ProjectAssessor {
    pub fn new(fs: Arc<dyn FileSystem>, limits: ScanLimits) -> Self {
        Self { fs, limits }
    }

    /// Assessor over the real filesystem with default limits.
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(RealFs), ScanLimits::default())
    }

    /// Count unfinished-work markers. Also used by the Completion mode's
    /// entry guard.
    pub fn partial_work_markers(&self, root: &Path) -> MarkerScan {
        count_markers(self.fs.as_ref(), root, self.limits, &PARTIAL_WORK_PATTERN)
    }

    /// Derive the feature vector from bounded probes.
    pub fn features(&self, root: &Path) -> FeatureVector {
        let fs = self.fs.as_ref();
        let partial = self.partial_work_markers(root);
        let hygiene = count_markers(fs, root, self.limits, &HYGIENE_PATTERN);

        let can_run_dev_server = file_contains(fs, root, "package.json", "\"dev\"")
            || file_contains(fs, root, "package.json", "\"start\"")
            || file_contains(fs, root, "package.json", "\"serve\"")
            || fs.exists(&root.join("Cargo.toml")) && fs.exists(&root.join("src/main.rs"))
            || file_contains(fs, root, "Makefile", "run:")
            || any_exists(fs, root, &["docker-compose.yml", "docker-compose.yaml"]);

        let has_been_tested = any_exists(fs, root, &["tests", "test", "__tests__", "spec"])
            || any_exists(
                fs,
                root,
                &[
                    "jest.config.js",
                    "jest.config.ts",
                    "vitest.config.ts",
                    "pytest.ini",
                ],
            );

        let is_live = any_exists(
            fs,
            root,
            &[
                "Dockerfile",
                "fly.toml",
                "vercel.json",
                "netlify.toml",
                "Procfile",
                "k8s",
                "deploy",
            ],
        ) || fs.exists(&root.join(".github/workflows/deploy.yml"));

        let is_stable = any_exists(
            fs,
            root,
            &[
                "prometheus.yml",
                "grafana",
                "monitoring",
                "alerts.yml",
                "sentry.properties",
            ],
        );

        let needs_new_features = any_exists(
            fs,
            root,
            &["ROADMAP.md", "BACKLOG.md", "TODO.md", "docs/roadmap.md"],
        );

        FeatureVector {
            can_run_dev_server,
            has_all_features: partial.matches == 0,
            is_code_clean: hygiene.matches <= CLEAN_MARKER_THRESHOLD,
            has_been_tested,
            is_live,
            is_stable,
            needs_new_features,
        }
    }

    /// Run the full assessment: feature vector plus decision tree.
    pub fn assess(&self, root: &Path) -> Recommendation {
        let features = self.features(root);
        let recommendation = decide(&features);
        tracing::debug!(
            mode = %recommendation.mode,
            confidence = recommendation.confidence,
            "project assessment complete"
        );
        recommendation
    }
}

/// Fixed decision tree over the feature vector. Checked in order; the first
/// missing capability wins.
pub fn decide(features: &FeatureVector) -> Recommendation {
    let mut reasoning = Vec::new();

    if !features.can_run_dev_server {
        reasoning.push(
            "No dev server capability found: no dev/start script, runnable manifest, or compose file"
                .to_string(),
        );
        reasoning.push("The project needs groundwork before anything else".to_string());
        return Recommendation {
            mode: Mode::Foundation,
            confidence: 95,
            reasoning,
            alternatives: vec![Mode::Build],
        };
    }
    reasoning.push("Dev server capability detected".to_string());

    if !features.has_all_features {
        reasoning.push("Unfinished-work markers present in the source".to_string());
        return Recommendation {
            mode: Mode::Build,
            confidence: 85,
            reasoning,
            alternatives: vec![Mode::Completion],
        };
    }
    reasoning.push("No unfinished-work markers found".to_string());

    if !features.is_code_clean {
        reasoning.push("Hygiene markers exceed the cleanliness threshold".to_string());
        return Recommendation {
            mode: Mode::Cleanup,
            confidence: 80,
            reasoning,
            alternatives: vec![Mode::Validation],
        };
    }
    reasoning.push("Code hygiene looks acceptable".to_string());

    if !features.has_been_tested {
        reasoning.push("No test directories or test configuration found".to_string());
        return Recommendation {
            mode: Mode::Validation,
            confidence: 85,
            reasoning,
            alternatives: vec![Mode::Cleanup],
        };
    }
    reasoning.push("Test layout present".to_string());

    if !features.is_live {
        reasoning.push("No deployment configuration found".to_string());
        return Recommendation {
            mode: Mode::Deployment,
            confidence: 80,
            reasoning,
            alternatives: vec![Mode::Validation],
        };
    }
    reasoning.push("Deployment configuration present".to_string());

    if !features.is_stable {
        reasoning.push("No monitoring or alerting configuration found".to_string());
        return Recommendation {
            mode: Mode::Maintenance,
            confidence: 75,
            reasoning,
            alternatives: vec![Mode::Deployment],
        };
    }
    reasoning.push("Monitoring configuration present".to_string());

    if features.needs_new_features {
        reasoning.push("A feature backlog is on file".to_string());
        return Recommendation {
            mode: Mode::Enhancement,
            confidence: 70,
            reasoning,
            alternatives: vec![Mode::Maintenance],
        };
    }

    reasoning.push("Stable and feature-complete; routine upkeep applies".to_string());
    Recommendation {
        mode: Mode::Maintenance,
        confidence: 60,
        reasoning,
        alternatives: vec![Mode::Enhancement],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use walker::MemFs;

    fn assessor(fs: MemFs) -> ProjectAssessor {
        ProjectAssessor::new(Arc::new(fs), ScanLimits::default())
    }

    fn runnable_base() -> MemFs {
        MemFs::new().with_file(
            "proj/package.json",
            r#"{"scripts":{"dev":"vite","build":"vite build"}}"#,
        )
    }

    // =========================================
    // Decision tree scenarios
    // =========================================

    #[test]
    fn test_missing_dev_server_recommends_foundation_with_high_confidence() {
        let fs = MemFs::new().with_file("proj/notes.txt", "just notes");
        let rec = assessor(fs).assess(Path::new("proj"));

        assert_eq!(rec.mode, Mode::Foundation);
        assert!(rec.confidence >= 90);
        assert!(
            rec.reasoning[0].to_lowercase().contains("dev server"),
            "first reasoning entry should reference the missing dev server: {:?}",
            rec.reasoning[0]
        );
        assert_eq!(rec.alternatives, vec![Mode::Build]);
    }

    #[test]
    fn test_unfinished_markers_recommend_build() {
        let fs = runnable_base().with_file("proj/src/app.ts", "// TODO finish checkout flow");
        let rec = assessor(fs).assess(Path::new("proj"));
        assert_eq!(rec.mode, Mode::Build);
        assert!(rec.alternatives.contains(&Mode::Completion));
    }

    #[test]
    fn test_hygiene_debt_recommends_cleanup() {
        let fs = runnable_base().with_file(
            "proj/src/app.ts",
            "console.log(1)\nconsole.log(2)\nconsole.log(3)\nconsole.log(4)\n// XXX rework",
        );
        let rec = assessor(fs).assess(Path::new("proj"));
        assert_eq!(rec.mode, Mode::Cleanup);
    }

    #[test]
    fn test_missing_tests_recommend_validation() {
        let fs = runnable_base().with_file("proj/src/app.ts", "export const ok = 1;");
        let rec = assessor(fs).assess(Path::new("proj"));
        assert_eq!(rec.mode, Mode::Validation);
    }

    #[test]
    fn test_missing_deployment_recommends_deployment() {
        let fs = runnable_base()
            .with_file("proj/src/app.ts", "export const ok = 1;")
            .with_file("proj/tests/app.test.ts", "test('ok', () => {});");
        let rec = assessor(fs).assess(Path::new("proj"));
        assert_eq!(rec.mode, Mode::Deployment);
    }

    #[test]
    fn test_missing_monitoring_recommends_maintenance() {
        let fs = runnable_base()
            .with_file("proj/src/app.ts", "export const ok = 1;")
            .with_file("proj/tests/app.test.ts", "test('ok', () => {});")
            .with_file("proj/Dockerfile", "FROM node:22");
        let rec = assessor(fs).assess(Path::new("proj"));
        assert_eq!(rec.mode, Mode::Maintenance);
    }

    #[test]
    fn test_backlog_recommends_enhancement() {
        let fs = runnable_base()
            .with_file("proj/src/app.ts", "export const ok = 1;")
            .with_file("proj/tests/app.test.ts", "test('ok', () => {});")
            .with_file("proj/Dockerfile", "FROM node:22")
            .with_file("proj/monitoring/alerts.yml", "groups: []")
            .with_file("proj/ROADMAP.md", "- dark mode");
        let rec = assessor(fs).assess(Path::new("proj"));
        assert_eq!(rec.mode, Mode::Enhancement);
    }

    #[test]
    fn test_stable_complete_project_defaults_to_maintenance() {
        let fs = runnable_base()
            .with_file("proj/src/app.ts", "export const ok = 1;")
            .with_file("proj/tests/app.test.ts", "test('ok', () => {});")
            .with_file("proj/Dockerfile", "FROM node:22")
            .with_file("proj/monitoring/alerts.yml", "groups: []");
        let rec = assessor(fs).assess(Path::new("proj"));
        assert_eq!(rec.mode, Mode::Maintenance);
        assert_eq!(rec.confidence, 60);
    }

    #[test]
    fn test_reasoning_trail_accumulates_in_tree_order() {
        let fs = runnable_base().with_file("proj/src/app.ts", "export const ok = 1;");
        let rec = assessor(fs).assess(Path::new("proj"));
        // Dev server and marker checks pass before the failing test check.
        assert!(rec.reasoning.len() >= 4);
        assert!(rec.reasoning[0].contains("Dev server capability detected"));
        assert!(rec.reasoning.last().unwrap().contains("test"));
    }

    // =========================================
    // Feature derivation details
    // =========================================

    #[test]
    fn test_cargo_project_counts_as_runnable() {
        let fs = MemFs::new()
            .with_file("proj/Cargo.toml", "[package]\nname = \"x\"")
            .with_file("proj/src/main.rs", "fn main() {}");
        let features = assessor(fs).features(Path::new("proj"));
        assert!(features.can_run_dev_server);
    }

    #[test]
    fn test_partial_work_markers_exposed_for_entry_guards() {
        let fs = runnable_base().with_file("proj/src/a.ts", "// TODO one\n// FIXME two");
        let scan = assessor(fs).partial_work_markers(Path::new("proj"));
        assert_eq!(scan.matches, 2);
    }
}
