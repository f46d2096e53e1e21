use crate::errors::{OnboardingError, Result};
use chrono::{DateTime, Utc};
use risk_engine::{RiskFactorType, RiskLevel};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// Legal form of the applicant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum EntityType {
    Individual,
    SoleTrader,
    PrivateCompany,
    PublicCompany,
    Partnership,
    Trust,
    Charity,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Individual => "individual",
            EntityType::SoleTrader => "sole_trader",
            EntityType::PrivateCompany => "private_company",
            EntityType::PublicCompany => "public_company",
            EntityType::Partnership => "partnership",
            EntityType::Trust => "trust",
            EntityType::Charity => "charity",
        }
    }

    /// KYB rather than KYC
    pub fn is_business(&self) -> bool {
        !matches!(self, EntityType::Individual)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Onboarding case lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum CaseStatus {
    Draft,
    Submitted,
    InReview,
    PendingInformation,
    Approved,
    Rejected,
    Cancelled,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Draft => "draft",
            CaseStatus::Submitted => "submitted",
            CaseStatus::InReview => "in_review",
            CaseStatus::PendingInformation => "pending_information",
            CaseStatus::Approved => "approved",
            CaseStatus::Rejected => "rejected",
            CaseStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CaseStatus::Approved | CaseStatus::Rejected | CaseStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: CaseStatus) -> bool {
        use CaseStatus::*;
        matches!(
            (self, next),
            (Draft, Submitted)
                | (Draft, Cancelled)
                | (Submitted, InReview)
                | (Submitted, Cancelled)
                | (InReview, PendingInformation)
                | (InReview, Approved)
                | (InReview, Rejected)
                | (PendingInformation, Submitted)
                | (PendingInformation, Cancelled)
        )
    }

    /// Validated transition
    pub fn transition_to(&self, next: CaseStatus) -> Result<CaseStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(OnboardingError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Applicant details may only change while the partner holds the case
    pub fn is_editable(&self) -> bool {
        matches!(self, CaseStatus::Draft | CaseStatus::PendingInformation)
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OnboardingCase {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub external_reference: Option<String>,
    pub entity_type: EntityType,
    pub status: CaseStatus,
    pub applicant_name: String,
    pub country: String,
    pub industry: Option<String>,
    pub applicant_details: serde_json::Value,
    pub decision_reason: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateCaseRequest {
    #[validate(length(max = 128))]
    pub external_reference: Option<String>,
    pub entity_type: EntityType,
    #[validate(length(min = 1, max = 256))]
    pub applicant_name: String,
    /// ISO 3166-1 alpha-2
    #[validate(length(equal = 2))]
    pub country: String,
    #[validate(length(max = 128))]
    pub industry: Option<String>,
    #[serde(default)]
    pub applicant_details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct UpdateApplicantRequest {
    #[validate(length(min = 1, max = 256))]
    pub applicant_name: Option<String>,
    #[validate(length(equal = 2))]
    pub country: Option<String>,
    #[validate(length(max = 128))]
    pub industry: Option<String>,
    pub applicant_details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListCasesQuery {
    pub status: Option<CaseStatus>,
    pub tenant_id: Option<Uuid>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

impl ListCasesQuery {
    pub const MAX_LIMIT: i64 = 200;

    pub fn validate(&self) -> Result<()> {
        if self.limit <= 0 || self.limit > Self::MAX_LIMIT {
            return Err(OnboardingError::Validation(format!(
                "limit must be between 1 and {}",
                Self::MAX_LIMIT
            )));
        }
        if self.offset < 0 {
            return Err(OnboardingError::Validation("offset cannot be negative".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DecisionRequest {
    pub reason: Option<String>,
}

impl DecisionRequest {
    pub fn required_reason(&self) -> Result<String> {
        match self.reason.as_deref().map(str::trim) {
            Some(reason) if !reason.is_empty() => Ok(reason.to_string()),
            _ => Err(OnboardingError::Validation("reason is required".into())),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestInformationRequest {
    pub message: String,
    /// Documents the partner has to (re)supply
    #[serde(default)]
    pub document_types: Vec<DocumentType>,
}

/// Case with everything a caller needs on one screen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseDetail {
    #[serde(flatten)]
    pub case: OnboardingCase,
    pub risk_level: RiskLevel,
    pub checklist: Vec<ChecklistItem>,
}

/// Kind of supporting document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum DocumentType {
    ProofOfIdentity,
    ProofOfAddress,
    BusinessRegistration,
    CertificateOfIncorporation,
    ArticlesOfAssociation,
    RegisterOfDirectors,
    RegisterOfShareholders,
    FinancialStatements,
    PartnershipAgreement,
    TrustDeed,
    CharityRegistration,
    SourceOfFunds,
    SourceOfWealth,
    Other,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::ProofOfIdentity => "proof_of_identity",
            DocumentType::ProofOfAddress => "proof_of_address",
            DocumentType::BusinessRegistration => "business_registration",
            DocumentType::CertificateOfIncorporation => "certificate_of_incorporation",
            DocumentType::ArticlesOfAssociation => "articles_of_association",
            DocumentType::RegisterOfDirectors => "register_of_directors",
            DocumentType::RegisterOfShareholders => "register_of_shareholders",
            DocumentType::FinancialStatements => "financial_statements",
            DocumentType::PartnershipAgreement => "partnership_agreement",
            DocumentType::TrustDeed => "trust_deed",
            DocumentType::CharityRegistration => "charity_registration",
            DocumentType::SourceOfFunds => "source_of_funds",
            DocumentType::SourceOfWealth => "source_of_wealth",
            DocumentType::Other => "other",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ChecklistItemStatus {
    Outstanding,
    Received,
    Verified,
    Rejected,
    Waived,
}

impl ChecklistItemStatus {
    pub fn satisfies_submission(&self) -> bool {
        matches!(
            self,
            ChecklistItemStatus::Received | ChecklistItemStatus::Verified | ChecklistItemStatus::Waived
        )
    }

    pub fn satisfies_approval(&self) -> bool {
        matches!(self, ChecklistItemStatus::Verified | ChecklistItemStatus::Waived)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChecklistItem {
    pub id: Uuid,
    pub case_id: Uuid,
    pub document_type: DocumentType,
    pub enhanced: bool,
    pub status: ChecklistItemStatus,
    pub document_id: Option<Uuid>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WaiveItemRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    Verified,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub id: Uuid,
    pub case_id: Uuid,
    pub tenant_id: Uuid,
    pub document_type: DocumentType,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub storage_key: String,
    pub status: DocumentStatus,
    pub rejection_reason: Option<String>,
    pub uploaded_by: String,
    pub reviewed_by: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RegisterDocumentRequest {
    pub document_type: DocumentType,
    #[validate(length(min = 1, max = 255))]
    pub file_name: String,
    #[validate(length(min = 1, max = 127))]
    pub content_type: String,
    #[validate(range(min = 1, max = 52428800))]
    pub size_bytes: i64,
    #[validate(length(equal = 64))]
    pub sha256: String,
    #[validate(length(min = 1, max = 1024))]
    pub storage_key: String,
}

impl RegisterDocumentRequest {
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if !self.sha256.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(OnboardingError::Validation("sha256 must be hex encoded".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Verify,
    Reject,
}

impl ReviewDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewDecision::Verify => "verified",
            ReviewDecision::Reject => "rejected",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReviewDocumentRequest {
    pub decision: ReviewDecision,
    pub reason: Option<String>,
    /// Score of the resulting document risk factor on rejection
    pub risk_score: Option<f64>,
}

/// Admin view of a risk factor change
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AddRiskFactorRequest {
    pub factor_type: RiskFactorType,
    pub score: f64,
    pub level: Option<RiskLevel>,
    pub description: String,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OverrideRiskRequest {
    /// `None` clears the override
    pub level: Option<RiskLevel>,
    pub reason: Option<String>,
}

/// Partner view of a risk assessment
#[derive(Debug, Clone, Serialize)]
pub struct RiskSummary {
    pub case_id: Uuid,
    pub risk_level: RiskLevel,
}

/// Screening outcome published by the screening provider integration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScreeningCompleted {
    pub case_id: Uuid,
    pub provider: String,
    pub results: Vec<ScreeningResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningCheck {
    Pep,
    Sanctions,
    AdverseMedia,
}

impl ScreeningCheck {
    pub fn factor_type(&self) -> RiskFactorType {
        match self {
            ScreeningCheck::Pep => RiskFactorType::Pep,
            ScreeningCheck::Sanctions => RiskFactorType::Sanctions,
            ScreeningCheck::AdverseMedia => RiskFactorType::AdverseMedia,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScreeningResult {
    pub check: ScreeningCheck,
    pub score: f64,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum WorkItemKind {
    InitialReview,
    InformationReview,
    Escalation,
}

/// Ordered from least to most pressing
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum WorkPriority {
    Low,
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum WorkItemStatus {
    Queued,
    Assigned,
    Completed,
    Cancelled,
}

impl WorkItemStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, WorkItemStatus::Queued | WorkItemStatus::Assigned)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkItem {
    pub id: Uuid,
    pub case_id: Uuid,
    pub tenant_id: Uuid,
    pub kind: WorkItemKind,
    pub priority: WorkPriority,
    pub status: WorkItemStatus,
    pub entity_type: EntityType,
    #[sqlx(try_from = "String")]
    pub risk_level: RiskLevel,
    pub assigned_to: Option<Uuid>,
    pub due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkQueueQuery {
    pub status: Option<WorkItemStatus>,
    pub assigned_to: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssignWorkItemRequest {
    pub reviewer_id: Uuid,
}

/// Staff member who works the review queue
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Reviewer {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
    pub active: bool,
    pub senior: bool,
    /// Entity types this reviewer specialises in; empty means generalist
    pub specialties: Vec<String>,
    pub capacity: i32,
    /// Currently assigned open work items
    pub open_items: i64,
    pub last_assigned_at: Option<DateTime<Utc>>,
}

impl Reviewer {
    pub fn has_capacity(&self) -> bool {
        self.open_items < i64::from(self.capacity)
    }

    pub fn load_ratio(&self) -> f64 {
        if self.capacity <= 0 {
            return f64::INFINITY;
        }
        self.open_items as f64 / f64::from(self.capacity)
    }

    pub fn is_specialist_for(&self, entity_type: EntityType) -> bool {
        self.specialties.iter().any(|s| s == entity_type.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct UpsertReviewerRequest {
    #[validate(length(min = 1, max = 128))]
    pub display_name: String,
    #[validate(email)]
    pub email: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub senior: bool,
    #[serde(default)]
    pub specialties: Vec<EntityType>,
    #[validate(range(min = 1, max = 500))]
    pub capacity: i32,
}

fn default_true() -> bool {
    true
}

/// Which identity provider authenticated a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum Portal {
    Partner,
    Admin,
}

impl Portal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Portal::Partner => "partner",
            Portal::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CaseMessage {
    pub id: Uuid,
    pub case_id: Uuid,
    pub author: String,
    pub portal: Portal,
    pub body: String,
    pub internal: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostMessageRequest {
    pub body: String,
    #[serde(default)]
    pub internal: bool,
}

impl PostMessageRequest {
    pub const MAX_LEN: usize = 10_000;

    pub fn normalized_body(&self) -> Result<String> {
        let body = self.body.trim();
        if body.is_empty() {
            return Err(OnboardingError::Validation("message body cannot be empty".into()));
        }
        if body.len() > Self::MAX_LEN {
            return Err(OnboardingError::Validation(format!(
                "message body exceeds {} bytes",
                Self::MAX_LEN
            )));
        }
        Ok(body.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEntry {
    pub seq: i64,
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub case_id: Option<Uuid>,
    pub actor: String,
    pub action: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub previous_hash: String,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookEndpointRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub event_types: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<WebhookEndpointRow> for webhooks::WebhookEndpoint {
    fn from(row: WebhookEndpointRow) -> Self {
        webhooks::WebhookEndpoint {
            id: row.id,
            tenant_id: row.tenant_id,
            url: row.url,
            secret: row.secret,
            event_types: row.event_types,
            active: row.active,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RegisterEndpointRequest {
    #[validate(url)]
    pub url: String,
    #[validate(length(min = 16, max = 256))]
    pub secret: String,
    #[serde(default)]
    pub event_types: Vec<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct WebhookDeliveryRow {
    pub id: Uuid,
    pub endpoint_id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempt_count: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_status_code: Option<i32>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl TryFrom<WebhookDeliveryRow> for webhooks::WebhookDelivery {
    type Error = OnboardingError;

    fn try_from(row: WebhookDeliveryRow) -> Result<Self> {
        Ok(webhooks::WebhookDelivery {
            id: row.id,
            endpoint_id: row.endpoint_id,
            event_id: row.event_id,
            event_type: row.event_type,
            payload: row.payload,
            status: row.status.parse().map_err(OnboardingError::Internal)?,
            attempt_count: u32::try_from(row.attempt_count)
                .map_err(|e| OnboardingError::Internal(e.to_string()))?,
            next_attempt_at: row.next_attempt_at,
            last_status_code: row.last_status_code.and_then(|c| u16::try_from(c).ok()),
            last_error: row.last_error,
            created_at: row.created_at,
            delivered_at: row.delivered_at,
        })
    }
}

/// Domain event names shared by NATS subjects and webhook event types
pub mod events {
    pub const CASE_STATUS_CHANGED: &str = "case.status_changed";
    pub const DOCUMENT_REVIEWED: &str = "document.reviewed";
    pub const CASE_MESSAGE_POSTED: &str = "case.message_posted";
    pub const SCREENING_COMPLETED: &str = "screening.completed";

    /// Event types a webhook endpoint may subscribe to
    pub const WEBHOOK_EVENTS: [&str; 3] = [CASE_STATUS_CHANGED, DOCUMENT_REVIEWED, CASE_MESSAGE_POSTED];

    pub fn is_subscribable(event_type: &str) -> bool {
        event_type == "*" || WEBHOOK_EVENTS.contains(&event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        use CaseStatus::*;
        let allowed = [
            (Draft, Submitted),
            (Draft, Cancelled),
            (Submitted, InReview),
            (Submitted, Cancelled),
            (InReview, PendingInformation),
            (InReview, Approved),
            (InReview, Rejected),
            (PendingInformation, Submitted),
            (PendingInformation, Cancelled),
        ];
        let all = [
            Draft,
            Submitted,
            InReview,
            PendingInformation,
            Approved,
            Rejected,
            Cancelled,
        ];

        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_exit() {
        for status in [CaseStatus::Approved, CaseStatus::Rejected, CaseStatus::Cancelled] {
            assert!(status.is_terminal());
            let err = status.transition_to(CaseStatus::Submitted).unwrap_err();
            assert!(matches!(err, OnboardingError::InvalidTransition { .. }));
        }
    }

    #[test]
    fn test_reviewer_load() {
        let reviewer = Reviewer {
            id: Uuid::new_v4(),
            display_name: "R".into(),
            email: "r@example.com".into(),
            active: true,
            senior: false,
            specialties: vec!["trust".into()],
            capacity: 4,
            open_items: 1,
            last_assigned_at: None,
        };
        assert!(reviewer.has_capacity());
        assert_eq!(reviewer.load_ratio(), 0.25);
        assert!(reviewer.is_specialist_for(EntityType::Trust));
        assert!(!reviewer.is_specialist_for(EntityType::Charity));
    }

    #[test]
    fn test_message_body() {
        let req = PostMessageRequest {
            body: "   ".into(),
            internal: false,
        };
        assert!(req.normalized_body().is_err());

        let req = PostMessageRequest {
            body: " please upload a clearer passport scan ".into(),
            internal: false,
        };
        assert_eq!(
            req.normalized_body().unwrap(),
            "please upload a clearer passport scan"
        );
    }

    #[test]
    fn test_decision_reason_required() {
        assert!(DecisionRequest::default().required_reason().is_err());
        assert!(DecisionRequest {
            reason: Some(" ".into())
        }
        .required_reason()
        .is_err());
        assert_eq!(
            DecisionRequest {
                reason: Some("sanctions match".into())
            }
            .required_reason()
            .unwrap(),
            "sanctions match"
        );
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_value(CaseStatus::PendingInformation).unwrap(),
            "pending_information"
        );
        assert_eq!(
            serde_json::from_value::<EntityType>(serde_json::json!("private_company")).unwrap(),
            EntityType::PrivateCompany
        );
    }
}
