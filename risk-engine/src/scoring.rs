//! Risk scoring engine
//!
//! A [`RiskAssessment`] owns the scored factors of one onboarding case and
//! keeps its overall score in step with them.

use crate::{Error, NewRiskFactor, Result, RiskFactor, RiskFactorUpdate, RiskLevel, MAX_SCORE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Weighted average of factor scores: Σ(score × weight) / Σ(weight)
pub fn weighted_score(factors: &[RiskFactor]) -> f64 {
    let (weighted, total_weight) = factors.iter().fold((0.0, 0.0), |(sum, weights), f| {
        let w = f.factor_type.weight();
        (sum + f.score * w, weights + w)
    });

    if total_weight > 0.0 {
        weighted / total_weight
    } else {
        0.0
    }
}

fn validate_score(score: f64) -> Result<()> {
    if score.is_finite() && (0.0..=MAX_SCORE).contains(&score) {
        Ok(())
    } else {
        Err(Error::InvalidScore(score))
    }
}

/// Risk assessment of a single onboarding case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Assessment ID
    pub id: Uuid,

    /// Case being assessed
    pub case_id: Uuid,

    /// Scored signals
    pub factors: Vec<RiskFactor>,

    /// Weighted score (0-100)
    pub overall_score: f64,

    /// Level derived from the overall score
    pub risk_level: RiskLevel,

    /// Reviewer override
    pub override_level: Option<RiskLevel>,

    /// Justification for the override
    pub override_reason: Option<String>,

    /// Incremented on every recalculation
    pub version: i64,

    /// Last recalculation
    pub calculated_at: DateTime<Utc>,
}

impl RiskAssessment {
    /// Empty assessment for a case
    pub fn new(case_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            case_id,
            factors: Vec::new(),
            overall_score: 0.0,
            risk_level: RiskLevel::Unknown,
            override_level: None,
            override_reason: None,
            version: 0,
            calculated_at: Utc::now(),
        }
    }

    /// Add a factor and recompute
    pub fn add_factor(&mut self, input: NewRiskFactor) -> Result<&RiskFactor> {
        validate_score(input.score)?;

        let now = Utc::now();
        self.factors.push(RiskFactor {
            id: Uuid::new_v4(),
            level: input.level.unwrap_or_else(|| RiskLevel::from_score(input.score)),
            factor_type: input.factor_type,
            score: input.score,
            description: input.description,
            source: input.source,
            recorded_at: now,
            updated_at: now,
        });
        self.recalculate();

        let idx = self.factors.len() - 1;
        Ok(&self.factors[idx])
    }

    /// Update an existing factor and recompute
    pub fn update_factor(&mut self, factor_id: Uuid, update: RiskFactorUpdate) -> Result<&RiskFactor> {
        if let Some(score) = update.score {
            validate_score(score)?;
        }

        let idx = self.position(factor_id)?;
        let factor = &mut self.factors[idx];
        if let Some(score) = update.score {
            factor.score = score;
            // keep a derived level in step unless one was given explicitly
            if update.level.is_none() {
                factor.level = RiskLevel::from_score(score);
            }
        }
        if let Some(level) = update.level {
            factor.level = level;
        }
        if let Some(description) = update.description {
            factor.description = description;
        }
        factor.updated_at = Utc::now();

        self.recalculate();
        Ok(&self.factors[idx])
    }

    /// Update the factor with the same type and source, or add a new one
    pub fn upsert_factor(&mut self, input: NewRiskFactor) -> Result<&RiskFactor> {
        let existing = self
            .factors
            .iter()
            .find(|f| f.factor_type == input.factor_type && f.source == input.source)
            .map(|f| f.id);

        match existing {
            Some(id) => self.update_factor(
                id,
                RiskFactorUpdate {
                    score: Some(input.score),
                    level: input.level,
                    description: Some(input.description),
                },
            ),
            None => self.add_factor(input),
        }
    }

    /// Remove a factor and recompute
    pub fn remove_factor(&mut self, factor_id: Uuid) -> Result<RiskFactor> {
        let idx = self.position(factor_id)?;
        let removed = self.factors.remove(idx);
        self.recalculate();
        Ok(removed)
    }

    /// Recompute overall score and level from the current factors
    pub fn recalculate(&mut self) {
        self.overall_score = weighted_score(&self.factors);
        self.risk_level = RiskLevel::from_score(self.overall_score);
        self.version += 1;
        self.calculated_at = Utc::now();

        debug!(
            "Risk assessment {} recalculated: {:.2} ({}) from {} factors",
            self.id,
            self.overall_score,
            self.risk_level,
            self.factors.len()
        );
    }

    /// Reviewer override of the calculated level
    pub fn override_level(&mut self, level: RiskLevel, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(Error::MissingOverrideReason);
        }
        self.override_level = Some(level);
        self.override_reason = Some(reason);
        Ok(())
    }

    /// Drop a reviewer override
    pub fn clear_override(&mut self) {
        self.override_level = None;
        self.override_reason = None;
    }

    /// Override if present, calculated level otherwise
    pub fn effective_level(&self) -> RiskLevel {
        self.override_level.unwrap_or(self.risk_level)
    }

    /// MediumHigh and above need source of funds / wealth evidence
    pub fn requires_enhanced_due_diligence(&self) -> bool {
        self.effective_level() >= RiskLevel::MediumHigh
    }

    /// Factor by id
    pub fn factor(&self, factor_id: Uuid) -> Option<&RiskFactor> {
        self.factors.iter().find(|f| f.id == factor_id)
    }

    fn position(&self, factor_id: Uuid) -> Result<usize> {
        self.factors
            .iter()
            .position(|f| f.id == factor_id)
            .ok_or(Error::FactorNotFound(factor_id))
    }
}
