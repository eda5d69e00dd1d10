use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline status of a backtest request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum BacktestStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "generating_script")]
    GeneratingScript,
    #[sea_orm(string_value = "ready_for_validation")]
    ReadyForValidation,
    #[sea_orm(string_value = "validating")]
    Validating,
    #[sea_orm(string_value = "executing")]
    Executing,
    #[sea_orm(string_value = "generating_report")]
    GeneratingReport,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "validation_failed")]
    ValidationFailed,
    #[sea_orm(string_value = "execution_failed")]
    ExecutionFailed,
    #[sea_orm(string_value = "report_generation_failed")]
    ReportGenerationFailed,
}

impl BacktestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::GeneratingScript => "generating_script",
            Self::ReadyForValidation => "ready_for_validation",
            Self::Validating => "validating",
            Self::Executing => "executing",
            Self::GeneratingReport => "generating_report",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::ValidationFailed => "validation_failed",
            Self::ExecutionFailed => "execution_failed",
            Self::ReportGenerationFailed => "report_generation_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::Failed
                | Self::ValidationFailed
                | Self::ExecutionFailed
                | Self::ReportGenerationFailed
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Failed | Self::ValidationFailed | Self::ExecutionFailed | Self::ReportGenerationFailed
        )
    }

    /// The directed edge set of the pipeline. Anything not listed here is rejected by the
    /// repository before it reaches the database.
    pub fn can_transition_to(&self, next: BacktestStatus) -> bool {
        use BacktestStatus::*;
        match self {
            Pending => matches!(next, GeneratingScript),
            GeneratingScript => matches!(next, ReadyForValidation | Failed),
            ReadyForValidation => matches!(next, Validating),
            Validating => matches!(next, Executing | GeneratingScript | ValidationFailed),
            Executing => matches!(next, GeneratingReport | ExecutionFailed),
            GeneratingReport => matches!(next, Completed | ReportGenerationFailed),
            Completed | Failed | ValidationFailed | ExecutionFailed | ReportGenerationFailed => false,
        }
    }

    /// Terminal failure reached from this status when its stage gives up.
    /// `pending` and `ready_for_validation` have no failure edge.
    pub fn failure_state(&self) -> Option<BacktestStatus> {
        match self {
            Self::GeneratingScript => Some(Self::Failed),
            Self::Validating => Some(Self::ValidationFailed),
            Self::Executing => Some(Self::ExecutionFailed),
            Self::GeneratingReport => Some(Self::ReportGenerationFailed),
            _ => None,
        }
    }
}

impl fmt::Display for BacktestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Iterable;
    use BacktestStatus::*;

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in BacktestStatus::iter().filter(|s| s.is_terminal()) {
            for to in BacktestStatus::iter() {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn happy_path_is_connected() {
        let path = [
            Pending,
            GeneratingScript,
            ReadyForValidation,
            Validating,
            Executing,
            GeneratingReport,
            Completed,
        ];
        for w in path.windows(2) {
            assert!(w[0].can_transition_to(w[1]), "{} -> {}", w[0], w[1]);
        }
    }

    #[test]
    fn repair_arc_is_the_only_backward_edge() {
        assert!(Validating.can_transition_to(GeneratingScript));
        assert!(!Executing.can_transition_to(Validating));
        assert!(!ReadyForValidation.can_transition_to(GeneratingScript));
        assert!(!Pending.can_transition_to(Failed));
    }

    #[test]
    fn failure_states_are_reachable_edges() {
        for s in BacktestStatus::iter() {
            if let Some(f) = s.failure_state() {
                assert!(f.is_failure());
                assert!(s.can_transition_to(f));
            }
        }
        assert_eq!(Pending.failure_state(), None);
        assert_eq!(ReadyForValidation.failure_state(), None);
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ReportGenerationFailed).unwrap(),
            "\"report_generation_failed\""
        );
        assert_eq!(ValidationFailed.to_value(), "validation_failed");
    }
}
