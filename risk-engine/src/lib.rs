//! Risk Engine for KYC onboarding
//!
//! Weighted multi-factor risk scoring for onboarding cases

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod scoring;
pub mod types;

pub use error::{Error, Result};
pub use scoring::{weighted_score, RiskAssessment};
pub use types::*;
