//! Risk factors derived from the applicant profile
//!
//! Every new case is scored on its country and legal form before any
//! screening result arrives.

use crate::models::EntityType;
use risk_engine::{NewRiskFactor, RiskFactorType};
use std::collections::HashMap;

/// Source tag of profile-derived factors
pub const PROFILE_SOURCE: &str = "profile";

/// Country score when no override is configured
pub const DEFAULT_COUNTRY_SCORE: f64 = 15.0;

/// Jurisdictions under call for action or increased monitoring
const COUNTRY_SCORES: &[(&str, f64)] = &[
    ("KP", 95.0),
    ("IR", 95.0),
    ("MM", 85.0),
    ("SY", 80.0),
    ("YE", 75.0),
    ("AF", 75.0),
    ("SS", 70.0),
    ("HT", 65.0),
    ("VE", 65.0),
    ("NG", 55.0),
    ("ZA", 45.0),
    ("VN", 45.0),
    ("AE", 35.0),
    ("TR", 35.0),
];

#[derive(Debug, Clone)]
pub struct ProfileScorer {
    country_scores: HashMap<String, f64>,
    default_country_score: f64,
}

impl Default for ProfileScorer {
    fn default() -> Self {
        Self {
            country_scores: COUNTRY_SCORES
                .iter()
                .map(|(code, score)| (code.to_string(), *score))
                .collect(),
            default_country_score: DEFAULT_COUNTRY_SCORE,
        }
    }
}

impl ProfileScorer {
    /// Override the score of one country
    pub fn set_country_score(&mut self, country: &str, score: f64) {
        self.country_scores.insert(country.to_ascii_uppercase(), score);
    }

    pub fn country_score(&self, country: &str) -> f64 {
        self.country_scores
            .get(&country.to_ascii_uppercase())
            .copied()
            .unwrap_or(self.default_country_score)
    }

    pub fn geography_factor(&self, country: &str) -> NewRiskFactor {
        let country = country.to_ascii_uppercase();
        NewRiskFactor::new(
            RiskFactorType::Geography,
            self.country_score(&country),
            format!("country of residence or incorporation: {}", country),
        )
        .with_source(PROFILE_SOURCE)
    }

    pub fn customer_profile_factor(&self, entity_type: EntityType) -> NewRiskFactor {
        NewRiskFactor::new(
            RiskFactorType::CustomerProfile,
            entity_score(entity_type),
            format!("legal form: {}", entity_type),
        )
        .with_source(PROFILE_SOURCE)
    }

    /// Factors every new case starts with
    pub fn initial_factors(&self, country: &str, entity_type: EntityType) -> [NewRiskFactor; 2] {
        [
            self.geography_factor(country),
            self.customer_profile_factor(entity_type),
        ]
    }
}

/// Opaque ownership structures score higher
fn entity_score(entity_type: EntityType) -> f64 {
    match entity_type {
        EntityType::Individual => 10.0,
        EntityType::PublicCompany => 15.0,
        EntityType::SoleTrader => 20.0,
        EntityType::PrivateCompany => 30.0,
        EntityType::Partnership => 30.0,
        EntityType::Charity => 45.0,
        EntityType::Trust => 55.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use risk_engine::{RiskAssessment, RiskLevel};
    use uuid::Uuid;

    #[test]
    fn test_country_lookup_is_case_insensitive() {
        let scorer = ProfileScorer::default();
        assert_eq!(scorer.country_score("ir"), 95.0);
        assert_eq!(scorer.country_score("GB"), DEFAULT_COUNTRY_SCORE);
    }

    #[test]
    fn test_override() {
        let mut scorer = ProfileScorer::default();
        scorer.set_country_score("gb", 5.0);
        assert_eq!(scorer.country_score("GB"), 5.0);
    }

    #[test]
    fn test_initial_assessment_levels() {
        let scorer = ProfileScorer::default();

        let mut low = RiskAssessment::new(Uuid::new_v4());
        for factor in scorer.initial_factors("GB", EntityType::Individual) {
            low.add_factor(factor).unwrap();
        }
        assert_eq!(low.risk_level, RiskLevel::Low);

        let mut high = RiskAssessment::new(Uuid::new_v4());
        for factor in scorer.initial_factors("KP", EntityType::Trust) {
            high.add_factor(factor).unwrap();
        }
        // (95*1.0 + 55*0.9) / 1.9
        assert!((high.overall_score - (95.0 + 49.5) / 1.9).abs() < 1e-9);
        assert_eq!(high.risk_level, RiskLevel::MediumHigh);
    }

    #[test]
    fn test_factors_are_tagged() {
        let scorer = ProfileScorer::default();
        let [geo, profile] = scorer.initial_factors("de", EntityType::Charity);
        assert_eq!(geo.factor_type, RiskFactorType::Geography);
        assert_eq!(geo.source, PROFILE_SOURCE);
        assert!(geo.description.ends_with("DE"));
        assert_eq!(profile.factor_type, RiskFactorType::CustomerProfile);
        assert_eq!(profile.score, 45.0);
    }
}
