use serde::{Deserialize, Serialize};

/// Payment-processor onboarding state of a restaurant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentOnboardingStatus {
    Pending,
    Complete,
    Restricted,
    #[serde(other)]
    Unknown,
}

/// Result of asking whether a restaurant can receive funds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessCheck {
    Ready,
    NotReady,
    /// The check itself could not be answered.
    CheckFailed(String),
}

/// What checkout does with [`ReadinessCheck::CheckFailed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadinessFailurePolicy {
    #[default]
    FailOpen,
    FailClosed,
}
