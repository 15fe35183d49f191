//! Routing predicates that pick the next stage from the current run state.
//!
//! Routers are pure functions, evaluated exactly once per stage transition.

use serde::{Deserialize, Serialize};

use super::state::{ProcessingStatus, RunState};

/// Names of the stages in the processing graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    LoadImage,
    ExtractData,
    Validate,
    FraudCheck,
    Finalize,
    FlagFraud,
    NeedsReview,
    Error,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::LoadImage => "load_image",
            StageName::ExtractData => "extract_data",
            StageName::Validate => "validate",
            StageName::FraudCheck => "fraud_check",
            StageName::Finalize => "finalize",
            StageName::FlagFraud => "flag_fraud",
            StageName::NeedsReview => "needs_review",
            StageName::Error => "error",
        }
    }

    /// Parse the stable string form back into a stage name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "load_image" => Some(StageName::LoadImage),
            "extract_data" => Some(StageName::ExtractData),
            "validate" => Some(StageName::Validate),
            "fraud_check" => Some(StageName::FraudCheck),
            "finalize" => Some(StageName::Finalize),
            "flag_fraud" => Some(StageName::FlagFraud),
            "needs_review" => Some(StageName::NeedsReview),
            "error" => Some(StageName::Error),
            _ => None,
        }
    }

    /// True for stages with no outgoing edge.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageName::Finalize | StageName::FlagFraud | StageName::NeedsReview | StageName::Error
        )
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// After extraction: failed status or absent data goes to the error
/// handler, otherwise on to validation.
pub fn route_after_extraction(state: &RunState) -> StageName {
    if state.status == ProcessingStatus::Failed {
        return StageName::Error;
    }
    if state.extracted_data.is_none() {
        return StageName::Error;
    }
    StageName::Validate
}

/// After validation: more than 3 errors goes to manual review, otherwise
/// on to the fraud check. Exactly 3 still proceeds.
pub fn route_after_validation(state: &RunState) -> StageName {
    if state.validation_errors.len() > 3 {
        return StageName::NeedsReview;
    }
    StageName::FraudCheck
}

/// After the fraud check: score 70 and above gets flagged, below that the
/// run finalizes.
pub fn route_after_fraud_check(state: &RunState) -> StageName {
    if state.fraud_score >= 70 {
        return StageName::FlagFraud;
    }
    StageName::Finalize
}

/// Select the stage following `current`, or None once a terminal stage ran.
pub fn next_stage(current: StageName, state: &RunState) -> Option<StageName> {
    match current {
        StageName::LoadImage => Some(StageName::ExtractData),
        StageName::ExtractData => Some(route_after_extraction(state)),
        StageName::Validate => Some(route_after_validation(state)),
        StageName::FraudCheck => Some(route_after_fraud_check(state)),
        StageName::Finalize | StageName::FlagFraud | StageName::NeedsReview | StageName::Error => {
            None
        }
    }
}
