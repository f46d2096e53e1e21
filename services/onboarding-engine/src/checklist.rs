//! Document checklists per entity type
//!
//! Every case starts from the template of its entity type. Cases whose
//! effective risk reaches MediumHigh also need the enhanced due diligence
//! items.

use crate::models::{ChecklistItem, ChecklistItemStatus, DocumentType, EntityType};
use risk_engine::RiskLevel;

/// Items added for enhanced due diligence
pub const ENHANCED_ITEMS: [DocumentType; 2] = [DocumentType::SourceOfFunds, DocumentType::SourceOfWealth];

/// Required documents for an entity type
pub fn template(entity_type: EntityType) -> &'static [DocumentType] {
    use DocumentType::*;
    match entity_type {
        EntityType::Individual => &[ProofOfIdentity, ProofOfAddress],
        EntityType::SoleTrader => &[ProofOfIdentity, ProofOfAddress, BusinessRegistration],
        EntityType::PrivateCompany => &[
            CertificateOfIncorporation,
            ArticlesOfAssociation,
            RegisterOfDirectors,
            RegisterOfShareholders,
            ProofOfAddress,
        ],
        EntityType::PublicCompany => &[
            CertificateOfIncorporation,
            RegisterOfDirectors,
            FinancialStatements,
        ],
        EntityType::Partnership => &[PartnershipAgreement, ProofOfIdentity, ProofOfAddress],
        EntityType::Trust => &[TrustDeed, ProofOfIdentity, ProofOfAddress],
        EntityType::Charity => &[CharityRegistration, RegisterOfDirectors, FinancialStatements],
    }
}

/// Whether a risk level triggers enhanced due diligence
pub fn requires_enhanced(level: RiskLevel) -> bool {
    level >= RiskLevel::MediumHigh
}

/// Enhanced items not yet on the checklist
pub fn missing_enhanced_items(items: &[ChecklistItem], level: RiskLevel) -> Vec<DocumentType> {
    if !requires_enhanced(level) {
        return Vec::new();
    }
    ENHANCED_ITEMS
        .iter()
        .copied()
        .filter(|doc| !items.iter().any(|item| item.document_type == *doc))
        .collect()
}

/// Read-only view over a case checklist
#[derive(Debug, Clone, Copy)]
pub struct Checklist<'a> {
    items: &'a [ChecklistItem],
}

impl<'a> Checklist<'a> {
    pub fn new(items: &'a [ChecklistItem]) -> Self {
        Self { items }
    }

    /// Every item received, verified or waived
    pub fn is_ready_for_submission(&self) -> bool {
        self.items.iter().all(|i| i.status.satisfies_submission())
    }

    /// Every item verified or waived
    pub fn is_ready_for_approval(&self) -> bool {
        self.items.iter().all(|i| i.status.satisfies_approval())
    }

    /// Items still waiting on the partner
    pub fn outstanding(&self) -> Vec<&'a ChecklistItem> {
        self.items
            .iter()
            .filter(|i| {
                matches!(
                    i.status,
                    ChecklistItemStatus::Outstanding | ChecklistItemStatus::Rejected
                )
            })
            .collect()
    }

    /// Items blocking approval
    pub fn unverified(&self) -> Vec<&'a ChecklistItem> {
        self.items
            .iter()
            .filter(|i| !i.status.satisfies_approval())
            .collect()
    }
}

/// Human readable list for error messages
pub fn describe(items: &[&ChecklistItem]) -> String {
    items
        .iter()
        .map(|i| format!("{} ({})", i.document_type, status_label(i.status)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn status_label(status: ChecklistItemStatus) -> &'static str {
    match status {
        ChecklistItemStatus::Outstanding => "outstanding",
        ChecklistItemStatus::Received => "received",
        ChecklistItemStatus::Verified => "verified",
        ChecklistItemStatus::Rejected => "rejected",
        ChecklistItemStatus::Waived => "waived",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn item(document_type: DocumentType, status: ChecklistItemStatus) -> ChecklistItem {
        ChecklistItem {
            id: Uuid::new_v4(),
            case_id: Uuid::nil(),
            document_type,
            enhanced: false,
            status,
            document_id: None,
            note: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_every_entity_type_has_a_template() {
        for entity_type in [
            EntityType::Individual,
            EntityType::SoleTrader,
            EntityType::PrivateCompany,
            EntityType::PublicCompany,
            EntityType::Partnership,
            EntityType::Trust,
            EntityType::Charity,
        ] {
            let docs = template(entity_type);
            assert!(!docs.is_empty(), "{}", entity_type);
            assert!(docs.iter().all(|d| !ENHANCED_ITEMS.contains(d)));
        }
        assert_eq!(
            template(EntityType::Individual),
            &[DocumentType::ProofOfIdentity, DocumentType::ProofOfAddress]
        );
    }

    #[test]
    fn test_submission_readiness() {
        let items = vec![
            item(DocumentType::ProofOfIdentity, ChecklistItemStatus::Received),
            item(DocumentType::ProofOfAddress, ChecklistItemStatus::Waived),
        ];
        let checklist = Checklist::new(&items);
        assert!(checklist.is_ready_for_submission());
        assert!(!checklist.is_ready_for_approval());
        assert!(checklist.outstanding().is_empty());
        assert_eq!(checklist.unverified().len(), 1);

        let items = vec![
            item(DocumentType::ProofOfIdentity, ChecklistItemStatus::Verified),
            item(DocumentType::ProofOfAddress, ChecklistItemStatus::Rejected),
        ];
        let checklist = Checklist::new(&items);
        assert!(!checklist.is_ready_for_submission());
        assert_eq!(checklist.outstanding().len(), 1);
        assert_eq!(
            describe(&checklist.outstanding()),
            "proof_of_address (rejected)"
        );
    }

    #[test]
    fn test_approval_readiness() {
        let items = vec![
            item(DocumentType::ProofOfIdentity, ChecklistItemStatus::Verified),
            item(DocumentType::ProofOfAddress, ChecklistItemStatus::Waived),
        ];
        assert!(Checklist::new(&items).is_ready_for_approval());
    }

    #[test]
    fn test_enhanced_items() {
        let mut items = vec![item(DocumentType::ProofOfIdentity, ChecklistItemStatus::Verified)];

        assert!(missing_enhanced_items(&items, RiskLevel::Medium).is_empty());
        assert_eq!(
            missing_enhanced_items(&items, RiskLevel::MediumHigh),
            vec![DocumentType::SourceOfFunds, DocumentType::SourceOfWealth]
        );

        items.push(item(DocumentType::SourceOfFunds, ChecklistItemStatus::Outstanding));
        assert_eq!(
            missing_enhanced_items(&items, RiskLevel::High),
            vec![DocumentType::SourceOfWealth]
        );
    }
}
