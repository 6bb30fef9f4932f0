//! The fixed six-stage topology and workflow modes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::PipelineError;

/// One of the six pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Research,
    Plan,
    Tasks,
    Implement,
    Review,
    Verify,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 6] = [
        Stage::Research,
        Stage::Plan,
        Stage::Tasks,
        Stage::Implement,
        Stage::Review,
        Stage::Verify,
    ];

    /// 0-based position in the pipeline.
    pub fn index(self) -> usize {
        match self {
            Stage::Research => 0,
            Stage::Plan => 1,
            Stage::Tasks => 2,
            Stage::Implement => 3,
            Stage::Review => 4,
            Stage::Verify => 5,
        }
    }

    pub fn from_index(index: usize) -> Option<Stage> {
        Self::ALL.get(index).copied()
    }

    /// The immediate successor, or `None` for the last stage.
    pub fn next(self) -> Option<Stage> {
        Self::from_index(self.index() + 1)
    }

    /// The immediate predecessor, or `None` for the first stage.
    pub fn previous(self) -> Option<Stage> {
        self.index().checked_sub(1).and_then(Self::from_index)
    }

    pub fn is_first(self) -> bool {
        self.index() == 0
    }

    /// Canonical upper-case identifier, e.g. `"RESEARCH"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Research => "RESEARCH",
            Stage::Plan => "PLAN",
            Stage::Tasks => "TASKS",
            Stage::Implement => "IMPLEMENT",
            Stage::Review => "REVIEW",
            Stage::Verify => "VERIFY",
        }
    }

    /// Lower-case directory name used for stage artifacts.
    pub fn dir_name(self) -> &'static str {
        match self {
            Stage::Research => "research",
            Stage::Plan => "plan",
            Stage::Tasks => "tasks",
            Stage::Implement => "implement",
            Stage::Review => "review",
            Stage::Verify => "verify",
        }
    }

    /// Human-readable stage title.
    pub fn title(self) -> &'static str {
        match self {
            Stage::Research => "Research",
            Stage::Plan => "Planning",
            Stage::Tasks => "Task Decomposition",
            Stage::Implement => "Implementation",
            Stage::Review => "Review",
            Stage::Verify => "Verification",
        }
    }

    /// Default quality-gate threshold (0–100).
    pub fn default_threshold(self) -> f64 {
        match self {
            Stage::Research => 70.0,
            Stage::Plan => 75.0,
            Stage::Tasks => 80.0,
            Stage::Implement => 80.0,
            Stage::Review => 75.0,
            Stage::Verify => 85.0,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| PipelineError::UnknownStage(s.to_string()))
    }
}

/// How many perspectives each stage fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowMode {
    /// Two perspectives per stage.
    Quick,
    /// The full perspective set.
    #[default]
    Normal,
    /// Same perspective set as `Normal`.
    Deep,
}

impl WorkflowMode {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowMode::Quick => "quick",
            WorkflowMode::Normal => "normal",
            WorkflowMode::Deep => "deep",
        }
    }
}

impl fmt::Display for WorkflowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(WorkflowMode::Quick),
            "normal" => Ok(WorkflowMode::Normal),
            "deep" => Ok(WorkflowMode::Deep),
            _ => Err(PipelineError::UnknownMode(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_is_fixed() {
        for (i, stage) in Stage::ALL.iter().enumerate() {
            assert_eq!(stage.index(), i);
            assert_eq!(Stage::from_index(i), Some(*stage));
        }
        assert!(Stage::Research < Stage::Verify);
    }

    #[test]
    fn test_next_and_previous() {
        assert_eq!(Stage::Research.next(), Some(Stage::Plan));
        assert_eq!(Stage::Verify.next(), None);
        assert_eq!(Stage::Research.previous(), None);
        assert_eq!(Stage::Review.previous(), Some(Stage::Implement));
    }

    #[test]
    fn test_parse_stage_case_insensitive() {
        assert_eq!("tasks".parse::<Stage>().unwrap(), Stage::Tasks);
        assert_eq!(" VERIFY ".parse::<Stage>().unwrap(), Stage::Verify);
        assert!("deploy".parse::<Stage>().is_err());
    }

    #[test]
    fn test_stage_serde_uses_upper_case() {
        let json = serde_json::to_string(&Stage::Implement).unwrap();
        assert_eq!(json, "\"IMPLEMENT\"");
        let back: Stage = serde_json::from_str("\"REVIEW\"").unwrap();
        assert_eq!(back, Stage::Review);
    }

    #[test]
    fn test_default_thresholds() {
        assert_eq!(Stage::Research.default_threshold(), 70.0);
        assert_eq!(Stage::Tasks.default_threshold(), 80.0);
        assert_eq!(Stage::Verify.default_threshold(), 85.0);
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("Quick".parse::<WorkflowMode>().unwrap(), WorkflowMode::Quick);
        assert_eq!(WorkflowMode::default(), WorkflowMode::Normal);
        assert!("turbo".parse::<WorkflowMode>().is_err());
    }
}
