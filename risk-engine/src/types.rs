//! Core types for risk engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Highest valid factor score
pub const MAX_SCORE: f64 = 100.0;

/// Risk factor category
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactorType {
    /// Politically exposed person match
    Pep,
    /// Sanctions list hit
    Sanctions,
    /// Negative news coverage
    AdverseMedia,
    /// Country of residence / incorporation
    Geography,
    /// Industry or business activity
    Industry,
    /// Expected or observed transaction behaviour
    TransactionPattern,
    /// Applicant profile (entity type, ownership structure)
    CustomerProfile,
    /// Problems with supplied documents
    DocumentRisk,
    /// Any other signal
    Other(String),
}

impl RiskFactorType {
    /// Fixed weight of this factor type in the overall score
    pub fn weight(&self) -> f64 {
        match self {
            RiskFactorType::Pep => 1.5,
            RiskFactorType::Sanctions => 2.0,
            RiskFactorType::AdverseMedia => 1.2,
            RiskFactorType::Geography => 1.0,
            RiskFactorType::Industry => 0.8,
            RiskFactorType::TransactionPattern => 1.3,
            RiskFactorType::CustomerProfile => 0.9,
            RiskFactorType::DocumentRisk => 1.1,
            RiskFactorType::Other(_) => 1.0,
        }
    }

    /// Stable string form
    pub fn as_str(&self) -> &str {
        match self {
            RiskFactorType::Pep => "pep",
            RiskFactorType::Sanctions => "sanctions",
            RiskFactorType::AdverseMedia => "adverse_media",
            RiskFactorType::Geography => "geography",
            RiskFactorType::Industry => "industry",
            RiskFactorType::TransactionPattern => "transaction_pattern",
            RiskFactorType::CustomerProfile => "customer_profile",
            RiskFactorType::DocumentRisk => "document_risk",
            RiskFactorType::Other(name) => name.as_str(),
        }
    }
}

impl fmt::Display for RiskFactorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskFactorType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "pep" => RiskFactorType::Pep,
            "sanctions" => RiskFactorType::Sanctions,
            "adverse_media" => RiskFactorType::AdverseMedia,
            "geography" => RiskFactorType::Geography,
            "industry" => RiskFactorType::Industry,
            "transaction_pattern" => RiskFactorType::TransactionPattern,
            "customer_profile" => RiskFactorType::CustomerProfile,
            "document_risk" => RiskFactorType::DocumentRisk,
            _ => RiskFactorType::Other(s.to_string()),
        })
    }
}

/// Risk level, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    /// No scored signal yet
    Unknown,
    /// Low risk
    Low,
    /// Medium-low risk
    MediumLow,
    /// Medium risk
    Medium,
    /// Medium-high risk
    MediumHigh,
    /// High risk
    High,
}

impl RiskLevel {
    /// Map a 0-100 score to a level
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 80.0 => RiskLevel::High,
            s if s >= 60.0 => RiskLevel::MediumHigh,
            s if s >= 40.0 => RiskLevel::Medium,
            s if s >= 20.0 => RiskLevel::MediumLow,
            s if s > 0.0 => RiskLevel::Low,
            _ => RiskLevel::Unknown,
        }
    }

    /// Stable string form
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Unknown => "Unknown",
            RiskLevel::Low => "Low",
            RiskLevel::MediumLow => "MediumLow",
            RiskLevel::Medium => "Medium",
            RiskLevel::MediumHigh => "MediumHigh",
            RiskLevel::High => "High",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unknown" => Ok(RiskLevel::Unknown),
            "Low" => Ok(RiskLevel::Low),
            "MediumLow" => Ok(RiskLevel::MediumLow),
            "Medium" => Ok(RiskLevel::Medium),
            "MediumHigh" => Ok(RiskLevel::MediumHigh),
            "High" => Ok(RiskLevel::High),
            other => Err(crate::Error::InvalidLevel(other.to_string())),
        }
    }
}

impl TryFrom<String> for RiskLevel {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A single scored risk signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    /// Factor ID
    pub id: Uuid,

    /// Factor category
    pub factor_type: RiskFactorType,

    /// Factor level
    pub level: RiskLevel,

    /// Score (0-100)
    pub score: f64,

    /// Human readable reason
    pub description: String,

    /// Where the signal came from (screening provider, reviewer, rule)
    pub source: String,

    /// When the factor was first recorded
    pub recorded_at: DateTime<Utc>,

    /// Last modification
    pub updated_at: DateTime<Utc>,
}

/// Input for a new factor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRiskFactor {
    /// Factor category
    pub factor_type: RiskFactorType,

    /// Score (0-100)
    pub score: f64,

    /// Explicit level; derived from the score when absent
    #[serde(default)]
    pub level: Option<RiskLevel>,

    /// Human readable reason
    #[serde(default)]
    pub description: String,

    /// Where the signal came from
    #[serde(default)]
    pub source: String,
}

impl NewRiskFactor {
    /// Factor with a derived level
    pub fn new(factor_type: RiskFactorType, score: f64, description: impl Into<String>) -> Self {
        Self {
            factor_type,
            score,
            level: None,
            description: description.into(),
            source: String::new(),
        }
    }

    /// Set the source
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// Partial update of an existing factor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskFactorUpdate {
    /// New score
    #[serde(default)]
    pub score: Option<f64>,

    /// New level
    #[serde(default)]
    pub level: Option<RiskLevel>,

    /// New description
    #[serde(default)]
    pub description: Option<String>,
}
