//! Task dependency graph validation.
//!
//! Edges run `dependency → dependent`: a task's `depends_on` entries must
//! complete before it. [`validate_dag`] always runs every check so the report
//! lists all problems at once, and walks tasks in sorted id order so the same
//! input always produces the same report.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Prefixes exempt from orphan warnings.
const ORPHAN_EXEMPT_PREFIXES: [&str; 2] = ["SETUP-", "INIT-"];

const FEATURE_PREFIX: &str = "T-F-";
const TEST_PREFIX: &str = "TEST-";

fn task_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(T-[A-Z]+-[0-9]+|TEST-[0-9]+|SETUP-[0-9]+)$").expect("task id pattern")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    #[default]
    Feature,
    Test,
    Setup,
    Config,
    Docs,
}

/// A node in the task dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub task_type: TaskType,
    #[serde(default = "default_wave")]
    pub wave: u32,
    #[serde(default, alias = "blockedBy")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
}

fn default_wave() -> u32 {
    1
}

impl Task {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            task_type: TaskType::default(),
            wave: default_wave(),
            depends_on: Vec::new(),
            acceptance_criteria: Vec::new(),
            test_id: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagStats {
    pub total_tasks: usize,
    pub edge_count: usize,
    pub orphan_count: usize,
}

/// Outcome of [`validate_dag`]. Valid iff `errors` is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub stats: DagStats,
}

/// Validate a task dependency graph.
///
/// Errors: empty task list, unknown dependency ids, cycles (one per cycle,
/// naming the full path). Warnings: malformed ids, duplicate ids, feature
/// tasks without their paired test, orphan tasks.
pub fn validate_dag(tasks: &[Task]) -> DagReport {
    let mut report = DagReport {
        stats: DagStats {
            total_tasks: tasks.len(),
            ..DagStats::default()
        },
        ..DagReport::default()
    };

    if tasks.is_empty() {
        report.errors.push("task list is empty".to_string());
        return report;
    }

    let mut by_id: BTreeMap<&str, &Task> = BTreeMap::new();
    let mut duplicates: BTreeSet<&str> = BTreeSet::new();
    let mut unnamed = 0usize;
    for task in tasks {
        if task.id.is_empty() {
            unnamed += 1;
        } else if by_id.insert(task.id.as_str(), task).is_some() {
            duplicates.insert(task.id.as_str());
        }
    }
    if unnamed > 0 {
        report
            .warnings
            .push(format!("{unnamed} task(s) with empty id ignored"));
    }
    for &id in by_id.keys() {
        if !task_id_pattern().is_match(id) {
            report
                .warnings
                .push(format!("task id '{id}' does not match the expected pattern"));
        }
        if duplicates.contains(id) {
            report.warnings.push(format!("duplicate task id '{id}'"));
        }
    }

    // dependency → dependents; dependent → dependencies
    let mut downstream: BTreeMap<&str, BTreeSet<&str>> =
        by_id.keys().map(|id| (*id, BTreeSet::new())).collect();
    let mut upstream: BTreeMap<&str, BTreeSet<&str>> =
        by_id.keys().map(|id| (*id, BTreeSet::new())).collect();

    for (&id, task) in &by_id {
        for dep in &task.depends_on {
            if by_id.contains_key(dep.as_str()) {
                if let Some(set) = downstream.get_mut(dep.as_str()) {
                    set.insert(id);
                }
                if let Some(set) = upstream.get_mut(id) {
                    set.insert(dep.as_str());
                }
            } else {
                report
                    .errors
                    .push(format!("task '{id}' depends on unknown task '{dep}'"));
            }
        }
    }
    report.stats.edge_count = downstream.values().map(BTreeSet::len).sum();

    for cycle in find_cycles(&downstream) {
        report
            .errors
            .push(format!("dependency cycle: {}", cycle.join(" → ")));
    }

    report.warnings.extend(tdd_violations(tasks));

    if by_id.len() > 1 {
        for id in by_id.keys() {
            let exempt = ORPHAN_EXEMPT_PREFIXES.iter().any(|p| id.starts_with(p));
            let isolated = upstream[id].is_empty() && downstream[id].is_empty();
            if isolated && !exempt {
                report.stats.orphan_count += 1;
                report
                    .warnings
                    .push(format!("task '{id}' has no dependencies or dependents"));
            }
        }
    }

    report.valid = report.errors.is_empty();
    report
}

/// Feature tasks (`T-F-n`) lacking their paired `TEST-n`, either because the
/// test task is absent or because the feature does not depend on it.
pub fn tdd_violations(tasks: &[Task]) -> Vec<String> {
    let ids: BTreeSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    let mut features: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.id.starts_with(FEATURE_PREFIX))
        .collect();
    features.sort_by(|a, b| a.id.cmp(&b.id));

    let mut violations = Vec::new();
    for task in features {
        let number = &task.id[FEATURE_PREFIX.len()..];
        let test_id = format!("{TEST_PREFIX}{number}");
        if !ids.contains(test_id.as_str()) {
            violations.push(format!(
                "feature task '{}' has no matching test task '{}'",
                task.id, test_id
            ));
        } else if !task.depends_on.iter().any(|d| d == &test_id) {
            violations.push(format!(
                "feature task '{}' should depend on its test task '{}'",
                task.id, test_id
            ));
        }
    }
    violations
}

/// DFS over `dependency → dependents` edges. The walk keeps an explicit
/// frame stack, so chain length is bounded by memory rather than the call
/// stack. Each back edge yields one cycle path that starts and ends on the
/// same id.
fn find_cycles<'a>(downstream: &BTreeMap<&'a str, BTreeSet<&'a str>>) -> Vec<Vec<&'a str>> {
    let mut visited: BTreeSet<&str> = BTreeSet::new();
    let mut cycles = Vec::new();

    for &start in downstream.keys() {
        if !visited.insert(start) {
            continue;
        }
        // Current path, each id's position on it, and the unvisited
        // dependents of every node on the path.
        let mut path: Vec<&str> = vec![start];
        let mut on_path: BTreeMap<&str, usize> = BTreeMap::from([(start, 0)]);
        let mut frames = vec![downstream.get(start).into_iter().flatten()];

        while let Some(children) = frames.last_mut() {
            let Some(&child) = children.next() else {
                frames.pop();
                if let Some(done) = path.pop() {
                    on_path.remove(done);
                }
                continue;
            };
            if let Some(&pos) = on_path.get(child) {
                let mut cycle = path[pos..].to_vec();
                cycle.push(child);
                cycles.push(cycle);
            } else if visited.insert(child) {
                on_path.insert(child, path.len());
                path.push(child);
                frames.push(downstream.get(child).into_iter().flatten());
            }
        }
    }
    cycles
}
