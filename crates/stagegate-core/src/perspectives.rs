//! Perspective catalogue: the analytical roles each stage fans out to.

use serde::Serialize;

use crate::domain::{Stage, WorkflowMode};

/// Model every built-in perspective runs on.
pub const DEFAULT_MODEL: &str = "sonnet";

/// A named analytical role with its focus areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Perspective {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub focus_areas: &'static [&'static str],
    pub model: &'static str,
}

macro_rules! perspective {
    ($id:literal, $name:literal, $desc:literal, [$($focus:literal),+ $(,)?]) => {
        Perspective {
            id: $id,
            name: $name,
            description: $desc,
            focus_areas: &[$($focus),+],
            model: DEFAULT_MODEL,
        }
    };
}

pub const PERSPECTIVES: &[Perspective] = &[
    // RESEARCH
    perspective!(
        "architecture",
        "Architecture Analyst",
        "Analyses system structure, design patterns and technology choices",
        ["System architecture", "Design patterns", "Technology stack", "Scalability", "Modularity"]
    ),
    perspective!(
        "cognitive",
        "Cognitive Researcher",
        "Studies user mental models, cognitive load and learning curve",
        ["User mental models", "Cognitive load", "Learning curve", "Error prevention", "Intuitiveness"]
    ),
    perspective!(
        "workflow",
        "Workflow Designer",
        "Designs operational flows, state transitions and error handling",
        ["Operational flow", "State management", "Error handling", "Edge cases", "Data flow"]
    ),
    perspective!(
        "industry",
        "Industry Practice Expert",
        "Compares against established tools, standards and proven practice",
        ["Comparable products", "Industry standards", "Proven practices", "Common pitfalls", "Adoption trends"]
    ),
    // PLAN
    perspective!(
        "system_architect",
        "System Architect",
        "Defines components, interfaces and deployment topology",
        ["Component boundaries", "Interface contracts", "Data model", "Deployment topology", "Technical debt"]
    ),
    perspective!(
        "ux_designer",
        "UX Designer",
        "Shapes interaction flows and the developer or end-user experience",
        ["Interaction flow", "Information architecture", "Accessibility", "Feedback and errors", "Consistency"]
    ),
    perspective!(
        "security_analyst",
        "Security Analyst",
        "Identifies threats, trust boundaries and required controls",
        ["Threat model", "Authentication and authorization", "Data protection", "Input validation", "Secrets handling"]
    ),
    perspective!(
        "quality_engineer",
        "Quality Engineer",
        "Plans testability, quality attributes and acceptance strategy",
        ["Testability", "Quality attributes", "Acceptance criteria", "Observability", "Release readiness"]
    ),
    // TASKS
    perspective!(
        "task_decomposer",
        "Task Decomposer",
        "Breaks the plan into small, verifiable tasks",
        ["Task granularity", "Clear deliverables", "Acceptance criteria", "Estimation", "Sequencing"]
    ),
    perspective!(
        "dependency_analyst",
        "Dependency Analyst",
        "Maps task dependencies and parallelisable waves",
        ["Dependency graph", "Critical path", "Parallel waves", "Cycle avoidance", "External dependencies"]
    ),
    perspective!(
        "test_planner",
        "Test Planner",
        "Pairs every feature task with a test-first task",
        ["Test-first pairing", "Test levels", "Fixtures and data", "Coverage targets", "Regression scope"]
    ),
    perspective!(
        "risk_preventor",
        "Risk Preventor",
        "Anticipates delivery risks and mitigation tasks",
        ["Technical risk", "Schedule risk", "Integration risk", "Mitigation tasks", "Rollback plans"]
    ),
    // IMPLEMENT
    perspective!(
        "developer",
        "Developer",
        "Implements tasks in small, working increments",
        ["Working code", "Incremental delivery", "Error handling", "Readability", "Task completion"]
    ),
    perspective!(
        "tdd_coach",
        "TDD Coach",
        "Keeps implementation test-driven: red, green, refactor",
        ["Failing test first", "Minimal implementation", "Refactoring", "Test isolation", "Test pass rate"]
    ),
    perspective!(
        "reviewer",
        "Inline Reviewer",
        "Reviews changes as they are written",
        ["Correctness", "Code style", "Naming", "Duplication", "Hidden side effects"]
    ),
    // REVIEW
    perspective!(
        "code_quality",
        "Code Quality Reviewer",
        "Assesses structure, clarity and adherence to conventions",
        ["Structure", "Clarity", "Conventions", "Complexity", "Dead code"]
    ),
    perspective!(
        "security",
        "Security Reviewer",
        "Audits the implementation for vulnerabilities",
        ["Injection", "Access control", "Sensitive data exposure", "Dependency vulnerabilities", "Unsafe defaults"]
    ),
    perspective!(
        "performance",
        "Performance Reviewer",
        "Looks for hot paths, wasted work and resource leaks",
        ["Algorithmic cost", "I/O patterns", "Memory usage", "Concurrency", "Resource leaks"]
    ),
    perspective!(
        "maintainability",
        "Maintainability Reviewer",
        "Judges how easy the change is to evolve and operate",
        ["Modularity", "Documentation", "Test coverage", "Coupling", "Operational simplicity"]
    ),
    // VERIFY
    perspective!(
        "functional_tester",
        "Functional Tester",
        "Verifies features behave as specified",
        ["Happy paths", "Edge cases", "Error paths", "Input validation", "Output correctness"]
    ),
    perspective!(
        "regression_tester",
        "Regression Tester",
        "Confirms existing behaviour is unchanged",
        ["Existing features", "Backward compatibility", "Performance regressions", "Configuration drift", "Data migration"]
    ),
    perspective!(
        "acceptance_validator",
        "Acceptance Validator",
        "Checks the result against the original acceptance criteria",
        ["Acceptance criteria", "User goals", "Completeness", "Documentation", "Release sign-off"]
    ),
];

fn stage_ids(stage: Stage, mode: WorkflowMode) -> &'static [&'static str] {
    match (mode, stage) {
        (WorkflowMode::Quick, Stage::Research) => &["architecture", "workflow"],
        (WorkflowMode::Quick, Stage::Plan) => &["system_architect", "quality_engineer"],
        (WorkflowMode::Quick, Stage::Tasks) => &["task_decomposer", "dependency_analyst"],
        (WorkflowMode::Quick, Stage::Implement) => &["developer", "reviewer"],
        (WorkflowMode::Quick, Stage::Review) => &["code_quality", "security"],
        (WorkflowMode::Quick, Stage::Verify) => &["functional_tester", "acceptance_validator"],
        (_, Stage::Research) => &["architecture", "cognitive", "workflow", "industry"],
        (_, Stage::Plan) => &[
            "system_architect",
            "ux_designer",
            "security_analyst",
            "quality_engineer",
        ],
        (_, Stage::Tasks) => &[
            "task_decomposer",
            "dependency_analyst",
            "test_planner",
            "risk_preventor",
        ],
        (_, Stage::Implement) => &["developer", "tdd_coach", "reviewer"],
        (_, Stage::Review) => &["code_quality", "security", "performance", "maintainability"],
        (_, Stage::Verify) => &["functional_tester", "regression_tester", "acceptance_validator"],
    }
}

pub fn find(id: &str) -> Option<&'static Perspective> {
    PERSPECTIVES.iter().find(|p| p.id == id)
}

/// Perspectives a stage fans out to in the given mode, in catalogue order.
pub fn perspectives_for(stage: Stage, mode: WorkflowMode) -> Vec<&'static Perspective> {
    stage_ids(stage, mode).iter().filter_map(|id| find(id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_stage_id_resolves() {
        for mode in [WorkflowMode::Quick, WorkflowMode::Normal, WorkflowMode::Deep] {
            for stage in Stage::ALL {
                assert_eq!(
                    perspectives_for(stage, mode).len(),
                    stage_ids(stage, mode).len(),
                    "{stage} {mode}"
                );
            }
        }
    }

    #[test]
    fn test_normal_mode_sizes() {
        assert_eq!(perspectives_for(Stage::Research, WorkflowMode::Normal).len(), 4);
        assert_eq!(perspectives_for(Stage::Implement, WorkflowMode::Normal).len(), 3);
        assert_eq!(perspectives_for(Stage::Verify, WorkflowMode::Normal).len(), 3);
    }

    #[test]
    fn test_quick_mode_uses_two_roles() {
        for stage in Stage::ALL {
            assert_eq!(perspectives_for(stage, WorkflowMode::Quick).len(), 2);
        }
        let ids: Vec<_> = perspectives_for(Stage::Review, WorkflowMode::Quick)
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["code_quality", "security"]);
    }

    #[test]
    fn test_deep_matches_normal() {
        for stage in Stage::ALL {
            assert_eq!(
                perspectives_for(stage, WorkflowMode::Deep),
                perspectives_for(stage, WorkflowMode::Normal)
            );
        }
    }

    #[test]
    fn test_catalogue_ids_unique_with_five_focus_areas() {
        let mut ids: Vec<_> = PERSPECTIVES.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), PERSPECTIVES.len());
        assert!(PERSPECTIVES.iter().all(|p| p.focus_areas.len() == 5));
    }
}
