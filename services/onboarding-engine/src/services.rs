use crate::assignment::{self, AssignmentLock, PlannedAssignment};
use crate::audit::{self, ChainVerification, NewAuditEntry};
use crate::auth::{Principal, Role};
use crate::checklist::{self, Checklist};
use crate::database::Database;
use crate::errors::{OnboardingError, Result};
use crate::idempotency::IdempotentRequests;
use crate::metrics::{
    CASES_CREATED, CASE_TRANSITIONS, DB_QUERY_DURATION, DOCUMENTS_REVIEWED, QUEUED_WORK_ITEMS,
    WORK_ITEMS_ASSIGNED,
};
use crate::models::{
    events, AddRiskFactorRequest, AssignWorkItemRequest, CaseDetail, CaseMessage, CaseStatus,
    ChecklistItem, ChecklistItemStatus, CreateCaseRequest, DecisionRequest, Document,
    DocumentStatus, ListCasesQuery, OnboardingCase, OverrideRiskRequest, PostMessageRequest,
    RegisterDocumentRequest, RegisterEndpointRequest, RequestInformationRequest, ReviewDecision,
    ReviewDocumentRequest, Reviewer, RiskSummary, ScreeningCompleted, UpdateApplicantRequest,
    UpsertReviewerRequest, WaiveItemRequest, WebhookEndpointRow, WorkItem, WorkItemKind,
    WorkItemStatus, WorkQueueQuery,
};
use crate::nats::EventPublisher;
use crate::nats_consumer::ScreeningSink;
use crate::notifications;
use crate::profile::ProfileScorer;
use async_trait::async_trait;
use chrono::Utc;
use risk_engine::{NewRiskFactor, RiskAssessment, RiskFactorType, RiskFactorUpdate, RiskLevel};
use serde_json::json;
use sqlx::PgConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;
use webhooks::{WebhookDelivery, WebhookEvent};

/// Score of the document risk factor when the reviewer gives none
pub const DEFAULT_DOCUMENT_RISK_SCORE: f64 = 50.0;

const AUDIT_VERIFY_PAGE_SIZE: i64 = 1000;
const DELIVERY_LIST_LIMIT: i64 = 100;

pub struct OnboardingService {
    db: Arc<Database>,
    events: Arc<EventPublisher>,
    idempotency: IdempotentRequests,
    assignment_lock: AssignmentLock,
    profile: ProfileScorer,
}

impl OnboardingService {
    pub fn new(
        db: Arc<Database>,
        events: Arc<EventPublisher>,
        idempotency: IdempotentRequests,
        assignment_lock: AssignmentLock,
        profile: ProfileScorer,
    ) -> Self {
        OnboardingService {
            db,
            events,
            idempotency,
            assignment_lock,
            profile,
        }
    }

    pub async fn health(&self) -> Result<()> {
        self.db.health_check().await
    }

    // ===== Cases =====

    /// Create a case with its checklist and initial risk assessment
    pub async fn create_case(
        &self,
        principal: &Principal,
        idempotency_key: Option<&str>,
        request: CreateCaseRequest,
    ) -> Result<CaseDetail> {
        let tenant_id = principal.require_partner()?;
        request.validate()?;
        validate_country(&request.country)?;

        self.idempotency
            .run(tenant_id, "create_case", idempotency_key, || {
                self.insert_new_case(principal, tenant_id, &request)
            })
            .await
    }

    async fn insert_new_case(
        &self,
        principal: &Principal,
        tenant_id: Uuid,
        request: &CreateCaseRequest,
    ) -> Result<CaseDetail> {
        let timer = DB_QUERY_DURATION.with_label_values(&["create_case"]).start_timer();
        let mut tx = self.db.begin().await?;

        let case = self
            .db
            .insert_case(&mut tx, tenant_id, &principal.actor(), request)
            .await
            .map_err(|e| match e {
                OnboardingError::Database(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    OnboardingError::Conflict("external reference already used by another case".into())
                }
                other => other,
            })?;

        let mut assessment = RiskAssessment::new(case.id);
        for factor in self.profile.initial_factors(&case.country, case.entity_type) {
            assessment.add_factor(factor)?;
        }
        self.db.insert_assessment(&mut tx, &assessment).await?;

        self.db
            .insert_checklist_items(&mut tx, case.id, checklist::template(case.entity_type), false)
            .await?;
        let enhanced = checklist::missing_enhanced_items(&[], assessment.effective_level());
        self.db
            .insert_checklist_items(&mut tx, case.id, &enhanced, true)
            .await?;

        audit::append(
            &mut tx,
            NewAuditEntry::new(principal.actor(), "case.created")
                .case(tenant_id, case.id)
                .details(json!({
                    "entity_type": case.entity_type,
                    "country": case.country,
                    "external_reference": case.external_reference,
                    "risk_level": assessment.effective_level(),
                })),
        )
        .await?;

        tx.commit().await?;
        timer.observe_duration();

        CASES_CREATED
            .with_label_values(&[case.entity_type.as_str()])
            .inc();
        info!(
            "Case {} created for tenant {} ({}, risk {})",
            case.id,
            tenant_id,
            case.entity_type,
            assessment.effective_level()
        );

        self.detail(case).await
    }

    pub async fn get_case(&self, principal: &Principal, case_id: Uuid) -> Result<CaseDetail> {
        let case = self.case_for(principal, case_id).await?;
        self.detail(case).await
    }

    pub async fn list_cases(&self, principal: &Principal, query: ListCasesQuery) -> Result<Vec<OnboardingCase>> {
        query.validate()?;
        let tenant_id = if principal.is_staff() {
            query.tenant_id
        } else {
            Some(principal.require_partner()?)
        };

        self.db
            .list_cases(tenant_id, query.status, query.limit, query.offset)
            .await
    }

    /// Partner edits while the case is with them
    pub async fn update_applicant(
        &self,
        principal: &Principal,
        case_id: Uuid,
        request: UpdateApplicantRequest,
    ) -> Result<CaseDetail> {
        principal.require_partner()?;
        request.validate()?;
        if let Some(country) = &request.country {
            validate_country(country)?;
        }

        let mut tx = self.db.begin().await?;
        let case = self.lock_case_for(&mut tx, principal, case_id).await?;
        if !case.status.is_editable() {
            return Err(OnboardingError::PreconditionFailed(format!(
                "applicant details cannot change while the case is {}",
                case.status
            )));
        }

        let updated = self.db.update_applicant(&mut tx, case.id, &request).await?;
        if updated.country != case.country {
            let factor = self.profile.geography_factor(&updated.country);
            self.update_assessment(&mut tx, &updated, |a| {
                a.upsert_factor(factor)?;
                Ok(())
            })
            .await?;
        }

        audit::append(
            &mut tx,
            NewAuditEntry::new(principal.actor(), "case.applicant_updated")
                .case(case.tenant_id, case.id)
                .details(serde_json::to_value(&request)?),
        )
        .await?;
        tx.commit().await?;

        self.detail(updated).await
    }

    /// Hand the case to review; every checklist item must be supplied
    pub async fn submit_case(&self, principal: &Principal, case_id: Uuid) -> Result<OnboardingCase> {
        principal.require_partner()?;

        let mut tx = self.db.begin().await?;
        let case = self.lock_case_for(&mut tx, principal, case_id).await?;
        case.status.transition_to(CaseStatus::Submitted)?;

        let items = self.db.checklist_in_tx(&mut tx, case.id).await?;
        let checklist = Checklist::new(&items);
        if !checklist.is_ready_for_submission() {
            return Err(OnboardingError::PreconditionFailed(format!(
                "checklist incomplete: {}",
                checklist::describe(&checklist.outstanding())
            )));
        }

        let kind = if case.status == CaseStatus::PendingInformation {
            WorkItemKind::InformationReview
        } else {
            WorkItemKind::InitialReview
        };
        let level = self.level_in_tx(&mut tx, case.id).await?;

        let (updated, event) = self
            .change_status(&mut tx, &case, CaseStatus::Submitted, &principal.actor(), None)
            .await?;
        let item = self.db.insert_work_item(&mut tx, &updated, kind, level).await?;
        tx.commit().await?;

        debug!(
            "Queued {:?} work item {} for case {} ({:?}, due {})",
            item.kind, item.id, case.id, item.priority, item.due_at
        );
        self.announce(vec![event]).await;
        Ok(updated)
    }

    pub async fn start_review(&self, principal: &Principal, case_id: Uuid) -> Result<OnboardingCase> {
        principal.require_staff()?;

        let mut tx = self.db.begin().await?;
        let case = self.lock_case_for(&mut tx, principal, case_id).await?;
        let (updated, event) = self
            .change_status(&mut tx, &case, CaseStatus::InReview, &principal.actor(), None)
            .await?;
        tx.commit().await?;

        self.announce(vec![event]).await;
        Ok(updated)
    }

    /// Send the case back to the partner with a message and, optionally,
    /// documents to (re)supply
    pub async fn request_information(
        &self,
        principal: &Principal,
        case_id: Uuid,
        request: RequestInformationRequest,
    ) -> Result<OnboardingCase> {
        principal.require_staff()?;
        let message = request.message.trim();
        if message.is_empty() {
            return Err(OnboardingError::Validation("message is required".into()));
        }

        let mut tx = self.db.begin().await?;
        let case = self.lock_case_for(&mut tx, principal, case_id).await?;
        let (updated, status_event) = self
            .change_status(
                &mut tx,
                &case,
                CaseStatus::PendingInformation,
                &principal.actor(),
                Some(message),
            )
            .await?;

        for document_type in &request.document_types {
            self.db
                .insert_checklist_items(&mut tx, case.id, &[*document_type], false)
                .await?;
            self.db
                .set_checklist_status(
                    &mut tx,
                    case.id,
                    *document_type,
                    ChecklistItemStatus::Outstanding,
                    None,
                    Some(message),
                )
                .await?;
        }

        let posted = self
            .db
            .insert_message(&mut tx, case.id, &principal.actor(), principal.portal, message, false)
            .await?;
        let message_event = message_event(&case, &posted);
        notifications::enqueue(&self.db, &mut tx, &message_event).await?;

        self.db
            .close_work_items_for_case(&mut tx, case.id, WorkItemStatus::Completed)
            .await?;
        tx.commit().await?;

        self.announce(vec![status_event, message_event]).await;
        Ok(updated)
    }

    /// Approve an in-review case
    pub async fn approve_case(
        &self,
        principal: &Principal,
        case_id: Uuid,
        request: DecisionRequest,
    ) -> Result<OnboardingCase> {
        principal.require_staff()?;

        let mut tx = self.db.begin().await?;
        let case = self.lock_case_for(&mut tx, principal, case_id).await?;
        case.status.transition_to(CaseStatus::Approved)?;

        let items = self.db.checklist_in_tx(&mut tx, case.id).await?;
        let checklist = Checklist::new(&items);
        if !checklist.is_ready_for_approval() {
            return Err(OnboardingError::PreconditionFailed(format!(
                "checklist items not verified: {}",
                checklist::describe(&checklist.unverified())
            )));
        }

        let level = self.level_in_tx(&mut tx, case.id).await?;
        if level == RiskLevel::Unknown {
            return Err(OnboardingError::PreconditionFailed(
                "risk level must be assessed before approval".into(),
            ));
        }
        if level == RiskLevel::High && !principal.is_senior() {
            return Err(OnboardingError::Forbidden(
                "high risk cases need a senior reviewer".into(),
            ));
        }

        let reason = request.reason.as_deref().map(str::trim).filter(|r| !r.is_empty());
        let (updated, event) = self
            .change_status(&mut tx, &case, CaseStatus::Approved, &principal.actor(), reason)
            .await?;
        self.db
            .close_work_items_for_case(&mut tx, case.id, WorkItemStatus::Completed)
            .await?;
        tx.commit().await?;

        info!("Case {} approved at risk level {}", case.id, level);
        self.announce(vec![event]).await;
        Ok(updated)
    }

    pub async fn reject_case(
        &self,
        principal: &Principal,
        case_id: Uuid,
        request: DecisionRequest,
    ) -> Result<OnboardingCase> {
        principal.require_staff()?;
        let reason = request.required_reason()?;

        let mut tx = self.db.begin().await?;
        let case = self.lock_case_for(&mut tx, principal, case_id).await?;
        let (updated, event) = self
            .change_status(&mut tx, &case, CaseStatus::Rejected, &principal.actor(), Some(&reason))
            .await?;
        self.db
            .close_work_items_for_case(&mut tx, case.id, WorkItemStatus::Completed)
            .await?;
        tx.commit().await?;

        self.announce(vec![event]).await;
        Ok(updated)
    }

    /// Withdraw a case; partners of the tenant and staff may cancel
    pub async fn cancel_case(
        &self,
        principal: &Principal,
        case_id: Uuid,
        request: DecisionRequest,
    ) -> Result<OnboardingCase> {
        let mut tx = self.db.begin().await?;
        let case = self.lock_case_for(&mut tx, principal, case_id).await?;
        let reason = request.reason.as_deref().map(str::trim).filter(|r| !r.is_empty());
        let (updated, event) = self
            .change_status(&mut tx, &case, CaseStatus::Cancelled, &principal.actor(), reason)
            .await?;
        self.db
            .close_work_items_for_case(&mut tx, case.id, WorkItemStatus::Cancelled)
            .await?;
        tx.commit().await?;

        self.announce(vec![event]).await;
        Ok(updated)
    }

    // ===== Checklists & documents =====

    pub async fn checklist(&self, principal: &Principal, case_id: Uuid) -> Result<Vec<ChecklistItem>> {
        let case = self.case_for(principal, case_id).await?;
        self.db.checklist_for_case(case.id).await
    }

    /// Waive a checklist item; admin only
    pub async fn waive_item(
        &self,
        principal: &Principal,
        item_id: Uuid,
        request: WaiveItemRequest,
    ) -> Result<ChecklistItem> {
        principal.require_admin()?;
        let reason = request.reason.trim();
        if reason.is_empty() {
            return Err(OnboardingError::Validation("reason is required".into()));
        }

        let item = self
            .db
            .get_checklist_item(item_id)
            .await?
            .ok_or_else(|| OnboardingError::not_found("Checklist item", item_id))?;

        let mut tx = self.db.begin().await?;
        let case = self.lock_case_for(&mut tx, principal, item.case_id).await?;
        ensure_open(&case)?;

        let waived = self
            .db
            .set_checklist_status(
                &mut tx,
                case.id,
                item.document_type,
                ChecklistItemStatus::Waived,
                None,
                Some(reason),
            )
            .await?
            .ok_or_else(|| OnboardingError::not_found("Checklist item", item_id))?;

        audit::append(
            &mut tx,
            NewAuditEntry::new(principal.actor(), "checklist.item_waived")
                .case(case.tenant_id, case.id)
                .details(json!({
                    "item_id": item.id,
                    "document_type": item.document_type,
                    "previous_status": item.status,
                    "reason": reason,
                })),
        )
        .await?;
        tx.commit().await?;

        Ok(waived)
    }

    /// Register document metadata uploaded by the partner
    pub async fn register_document(
        &self,
        principal: &Principal,
        case_id: Uuid,
        request: RegisterDocumentRequest,
    ) -> Result<Document> {
        principal.require_partner()?;
        request.check()?;

        let mut tx = self.db.begin().await?;
        let case = self.lock_case_for(&mut tx, principal, case_id).await?;
        if !case.status.is_editable() {
            return Err(OnboardingError::PreconditionFailed(format!(
                "documents cannot be added while the case is {}",
                case.status
            )));
        }

        let document = self
            .db
            .insert_document(&mut tx, case.id, case.tenant_id, &principal.actor(), &request)
            .await?;
        let item = self
            .db
            .set_checklist_status(
                &mut tx,
                case.id,
                document.document_type,
                ChecklistItemStatus::Received,
                Some(document.id),
                None,
            )
            .await?;
        if item.is_none() {
            debug!(
                "Document {} ({}) is not on the checklist of case {}",
                document.id, document.document_type, case.id
            );
        }

        audit::append(
            &mut tx,
            NewAuditEntry::new(principal.actor(), "document.registered")
                .case(case.tenant_id, case.id)
                .details(json!({
                    "document_id": document.id,
                    "document_type": document.document_type,
                    "file_name": document.file_name,
                    "sha256": document.sha256,
                    "size_bytes": document.size_bytes,
                })),
        )
        .await?;
        tx.commit().await?;

        Ok(document)
    }

    pub async fn list_documents(&self, principal: &Principal, case_id: Uuid) -> Result<Vec<Document>> {
        let case = self.case_for(principal, case_id).await?;
        self.db.documents_for_case(case.id).await
    }

    /// Verify or reject a document; rejections feed the risk assessment
    pub async fn review_document(
        &self,
        principal: &Principal,
        document_id: Uuid,
        request: ReviewDocumentRequest,
    ) -> Result<Document> {
        principal.require_staff()?;
        let document = self
            .db
            .get_document(document_id)
            .await?
            .ok_or_else(|| OnboardingError::not_found("Document", document_id))?;

        let mut tx = self.db.begin().await?;
        let case = self.lock_case_for(&mut tx, principal, document.case_id).await?;
        ensure_open(&case)?;

        let (status, item_status, reason) = match request.decision {
            ReviewDecision::Verify => (DocumentStatus::Verified, ChecklistItemStatus::Verified, None),
            ReviewDecision::Reject => {
                let reason = request
                    .reason
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .ok_or_else(|| OnboardingError::Validation("reason is required to reject".into()))?;
                (DocumentStatus::Rejected, ChecklistItemStatus::Rejected, Some(reason))
            }
        };

        let reviewed = self
            .db
            .review_document(&mut tx, document.id, status, &principal.actor(), reason)
            .await?
            .ok_or_else(|| OnboardingError::Conflict(format!("document {} was already reviewed", document.id)))?;

        self.db
            .set_checklist_status(
                &mut tx,
                case.id,
                document.document_type,
                item_status,
                Some(document.id),
                reason,
            )
            .await?;

        if let Some(reason) = reason {
            let factor = NewRiskFactor::new(
                RiskFactorType::DocumentRisk,
                request.risk_score.unwrap_or(DEFAULT_DOCUMENT_RISK_SCORE),
                format!("{} rejected: {}", document.document_type, reason),
            )
            .with_source(format!("document:{}", document.document_type));
            self.update_assessment(&mut tx, &case, |a| {
                a.upsert_factor(factor)?;
                Ok(())
            })
            .await?;
        }

        audit::append(
            &mut tx,
            NewAuditEntry::new(principal.actor(), "document.reviewed")
                .case(case.tenant_id, case.id)
                .details(json!({
                    "document_id": document.id,
                    "document_type": document.document_type,
                    "decision": request.decision.as_str(),
                    "reason": reason,
                })),
        )
        .await?;

        let event = WebhookEvent::new(
            events::DOCUMENT_REVIEWED,
            case.tenant_id,
            json!({
                "case_id": case.id,
                "external_reference": case.external_reference,
                "document_id": document.id,
                "document_type": document.document_type,
                "decision": request.decision.as_str(),
                "reason": reason,
            }),
        );
        notifications::enqueue(&self.db, &mut tx, &event).await?;
        tx.commit().await?;

        DOCUMENTS_REVIEWED
            .with_label_values(&[request.decision.as_str()])
            .inc();
        self.announce(vec![event]).await;
        Ok(reviewed)
    }

    // ===== Risk =====

    /// Level only; what partners see
    pub async fn risk_summary(&self, principal: &Principal, case_id: Uuid) -> Result<RiskSummary> {
        let case = self.case_for(principal, case_id).await?;
        let assessment = self.assessment(case.id).await?;
        Ok(RiskSummary {
            case_id: case.id,
            risk_level: assessment.effective_level(),
        })
    }

    pub async fn risk_assessment(&self, principal: &Principal, case_id: Uuid) -> Result<RiskAssessment> {
        principal.require_staff()?;
        let case = self.case_for(principal, case_id).await?;
        self.assessment(case.id).await
    }

    pub async fn add_risk_factor(
        &self,
        principal: &Principal,
        case_id: Uuid,
        request: AddRiskFactorRequest,
    ) -> Result<RiskAssessment> {
        principal.require_staff()?;
        let details = serde_json::to_value(&request)?;
        let factor = NewRiskFactor {
            factor_type: request.factor_type,
            score: request.score,
            level: request.level,
            description: request.description,
            source: request.source.unwrap_or_else(|| principal.actor()),
        };

        self.modify_risk(principal, case_id, "risk.factor_added", details, |a| {
            a.add_factor(factor)?;
            Ok(())
        })
        .await
    }

    pub async fn update_risk_factor(
        &self,
        principal: &Principal,
        case_id: Uuid,
        factor_id: Uuid,
        update: RiskFactorUpdate,
    ) -> Result<RiskAssessment> {
        principal.require_staff()?;
        let details = json!({ "factor_id": factor_id, "update": update });

        self.modify_risk(principal, case_id, "risk.factor_updated", details, |a| {
            a.update_factor(factor_id, update)?;
            Ok(())
        })
        .await
    }

    pub async fn remove_risk_factor(
        &self,
        principal: &Principal,
        case_id: Uuid,
        factor_id: Uuid,
    ) -> Result<RiskAssessment> {
        principal.require_staff()?;
        let details = json!({ "factor_id": factor_id });

        self.modify_risk(principal, case_id, "risk.factor_removed", details, |a| {
            let removed = a.remove_factor(factor_id)?;
            debug!("Removed {} factor {}", removed.factor_type, removed.id);
            Ok(())
        })
        .await
    }

    /// Set or clear the reviewer override; senior reviewers only
    pub async fn override_risk(
        &self,
        principal: &Principal,
        case_id: Uuid,
        request: OverrideRiskRequest,
    ) -> Result<RiskAssessment> {
        if !principal.is_senior() {
            return Err(OnboardingError::Forbidden(
                "risk overrides need a senior reviewer".into(),
            ));
        }
        let details = serde_json::to_value(&request)?;

        self.modify_risk(principal, case_id, "risk.overridden", details, |a| {
            match request.level {
                Some(level) => a.override_level(level, request.reason.unwrap_or_default())?,
                None => a.clear_override(),
            }
            Ok(())
        })
        .await
    }

    async fn modify_risk<F>(
        &self,
        principal: &Principal,
        case_id: Uuid,
        action: &str,
        change: serde_json::Value,
        mutate: F,
    ) -> Result<RiskAssessment>
    where
        F: FnOnce(&mut RiskAssessment) -> Result<()>,
    {
        let mut tx = self.db.begin().await?;
        let case = self.lock_case_for(&mut tx, principal, case_id).await?;
        ensure_open(&case)?;

        let assessment = self.update_assessment(&mut tx, &case, mutate).await?;
        audit::append(
            &mut tx,
            NewAuditEntry::new(principal.actor(), action)
                .case(case.tenant_id, case.id)
                .details(risk_audit_details(change, &assessment)),
        )
        .await?;
        tx.commit().await?;

        Ok(assessment)
    }

    /// Load, mutate and store the assessment of a locked case, then add
    /// enhanced checklist items if the new level calls for them
    async fn update_assessment<F>(
        &self,
        conn: &mut PgConnection,
        case: &OnboardingCase,
        mutate: F,
    ) -> Result<RiskAssessment>
    where
        F: FnOnce(&mut RiskAssessment) -> Result<()>,
    {
        let mut assessment = self
            .db
            .assessment_in_tx(conn, case.id)
            .await?
            .ok_or_else(|| OnboardingError::not_found("Risk assessment", case.id))?;

        let expected_version = assessment.version;
        let before = assessment.effective_level();
        mutate(&mut assessment)?;
        // overrides do not recalculate
        if assessment.version == expected_version {
            assessment.version += 1;
        }

        if !self.db.save_assessment(conn, &assessment, expected_version).await? {
            return Err(OnboardingError::Conflict(format!(
                "risk assessment of case {} changed concurrently",
                case.id
            )));
        }

        let after = assessment.effective_level();
        if before != after {
            info!("Case {} risk level {} -> {}", case.id, before, after);
        }
        if !case.status.is_terminal() {
            self.sync_enhanced_items(conn, case.id, after).await?;
        }

        Ok(assessment)
    }

    async fn sync_enhanced_items(&self, conn: &mut PgConnection, case_id: Uuid, level: RiskLevel) -> Result<()> {
        let items = self.db.checklist_in_tx(conn, case_id).await?;
        let missing = checklist::missing_enhanced_items(&items, level);
        if !missing.is_empty() {
            info!(
                "Case {} reached {}: adding {} enhanced due diligence items",
                case_id,
                level,
                missing.len()
            );
            self.db.insert_checklist_items(conn, case_id, &missing, true).await?;
        }
        Ok(())
    }

    async fn assessment(&self, case_id: Uuid) -> Result<RiskAssessment> {
        self.db
            .get_assessment(case_id)
            .await?
            .ok_or_else(|| OnboardingError::not_found("Risk assessment", case_id))
    }

    async fn level_in_tx(&self, conn: &mut PgConnection, case_id: Uuid) -> Result<RiskLevel> {
        Ok(self
            .db
            .assessment_in_tx(conn, case_id)
            .await?
            .map(|a| a.effective_level())
            .unwrap_or(RiskLevel::Unknown))
    }

    // ===== Work queue =====

    pub async fn list_work_items(&self, principal: &Principal, query: WorkQueueQuery) -> Result<Vec<WorkItem>> {
        principal.require_staff()?;
        let mut items = self.db.list_work_items(&query).await?;
        items.sort_by(assignment::queue_order);
        Ok(items)
    }

    /// Assign a queued item to a named reviewer; senior reviewers only
    pub async fn assign_work_item(
        &self,
        principal: &Principal,
        item_id: Uuid,
        request: AssignWorkItemRequest,
    ) -> Result<WorkItem> {
        if !principal.is_senior() {
            return Err(OnboardingError::Forbidden(
                "assigning work needs a senior reviewer".into(),
            ));
        }
        self.assign(&principal.actor(), item_id, request.reviewer_id, "manual")
            .await
    }

    /// Caller takes a queued item for themselves
    pub async fn claim_work_item(&self, principal: &Principal, item_id: Uuid) -> Result<WorkItem> {
        let reviewer_id = principal.reviewer_id()?;
        self.assign(&principal.actor(), item_id, reviewer_id, "claim").await
    }

    async fn assign(&self, actor: &str, item_id: Uuid, reviewer_id: Uuid, mode: &str) -> Result<WorkItem> {
        let item = self
            .db
            .get_work_item(item_id)
            .await?
            .ok_or_else(|| OnboardingError::not_found("Work item", item_id))?;
        let reviewer = self
            .db
            .get_reviewer(reviewer_id)
            .await?
            .ok_or_else(|| OnboardingError::not_found("Reviewer", reviewer_id))?;

        if !assignment::is_eligible(&reviewer, &item) {
            return Err(OnboardingError::PreconditionFailed(format!(
                "reviewer {} is not eligible for work item {}",
                reviewer.id, item.id
            )));
        }

        let mut tx = self.db.begin().await?;
        let assigned = self
            .db
            .assign_work_item(&mut tx, item.id, reviewer.id)
            .await?
            .ok_or_else(|| OnboardingError::Conflict(format!("work item {} is not queued", item.id)))?;
        audit::append(&mut tx, assignment_audit(actor, &assigned, reviewer.id, mode)).await?;
        tx.commit().await?;

        WORK_ITEMS_ASSIGNED.with_label_values(&[mode]).inc();
        Ok(assigned)
    }

    /// Close an item; the assignee or an admin
    pub async fn complete_work_item(&self, principal: &Principal, item_id: Uuid) -> Result<WorkItem> {
        principal.require_staff()?;
        let item = self
            .db
            .get_work_item(item_id)
            .await?
            .ok_or_else(|| OnboardingError::not_found("Work item", item_id))?;

        let is_assignee = item.assigned_to.is_some() && principal.reviewer_id().ok() == item.assigned_to;
        if !is_assignee && !principal.has_role(Role::Admin) {
            return Err(OnboardingError::Forbidden(
                "only the assignee or an admin can complete a work item".into(),
            ));
        }

        let mut tx = self.db.begin().await?;
        let completed = self
            .db
            .complete_work_item(&mut tx, item.id)
            .await?
            .ok_or_else(|| OnboardingError::Conflict(format!("work item {} is already closed", item.id)))?;
        audit::append(
            &mut tx,
            NewAuditEntry::new(principal.actor(), "work_item.completed")
                .case(item.tenant_id, item.case_id)
                .details(json!({ "work_item_id": item.id, "kind": item.kind })),
        )
        .await?;
        tx.commit().await?;

        Ok(completed)
    }

    /// Close an item and queue an escalation for the same case
    pub async fn escalate_work_item(&self, principal: &Principal, item_id: Uuid) -> Result<WorkItem> {
        principal.require_staff()?;
        let item = self
            .db
            .get_work_item(item_id)
            .await?
            .ok_or_else(|| OnboardingError::not_found("Work item", item_id))?;

        let mut tx = self.db.begin().await?;
        let case = self.lock_case_for(&mut tx, principal, item.case_id).await?;
        ensure_open(&case)?;

        self.db
            .complete_work_item(&mut tx, item.id)
            .await?
            .ok_or_else(|| OnboardingError::Conflict(format!("work item {} is already closed", item.id)))?;
        let level = self.level_in_tx(&mut tx, case.id).await?;
        let escalation = self
            .db
            .insert_work_item(&mut tx, &case, WorkItemKind::Escalation, level)
            .await?;

        audit::append(
            &mut tx,
            NewAuditEntry::new(principal.actor(), "work_item.escalated")
                .case(case.tenant_id, case.id)
                .details(json!({
                    "work_item_id": item.id,
                    "escalation_id": escalation.id,
                    "priority": escalation.priority,
                })),
        )
        .await?;
        tx.commit().await?;

        Ok(escalation)
    }

    /// Assign queued work across reviewers; a no-op while another instance
    /// holds the assignment lock
    pub async fn auto_assign(&self) -> Result<Vec<PlannedAssignment>> {
        let Some(token) = self.assignment_lock.try_acquire().await? else {
            debug!("Auto-assignment running elsewhere, skipping");
            return Ok(Vec::new());
        };

        let result = self.run_auto_assignment().await;
        self.assignment_lock.release(&token).await;
        result
    }

    async fn run_auto_assignment(&self) -> Result<Vec<PlannedAssignment>> {
        let items = self.db.queued_work_items().await?;
        if items.is_empty() {
            QUEUED_WORK_ITEMS.set(0);
            return Ok(Vec::new());
        }

        let reviewers = self.db.list_reviewers().await?;
        let plan = assignment::plan_assignments(&items, &reviewers, Utc::now());

        let mut applied = Vec::with_capacity(plan.len());
        for planned in plan {
            let mut tx = self.db.begin().await?;
            let Some(assigned) = self
                .db
                .assign_work_item(&mut tx, planned.work_item_id, planned.reviewer_id)
                .await?
            else {
                // claimed manually since the queue was read
                continue;
            };
            audit::append(
                &mut tx,
                assignment_audit("system:auto_assign", &assigned, planned.reviewer_id, "auto"),
            )
            .await?;
            tx.commit().await?;

            WORK_ITEMS_ASSIGNED.with_label_values(&["auto"]).inc();
            applied.push(planned);
        }

        QUEUED_WORK_ITEMS.set((items.len() - applied.len()) as i64);
        if !applied.is_empty() {
            info!(
                "Auto-assigned {} of {} queued work items: {:?}",
                applied.len(),
                items.len(),
                assignment::plan_summary(&applied)
            );
        }
        Ok(applied)
    }

    /// Run auto-assignment every `interval`
    pub fn spawn_auto_assignment(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Auto-assignment loop started (every {:?})", interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Err(e) = self.auto_assign().await {
                    error!("Auto-assignment failed: {}", e);
                }
            }
        })
    }

    // ===== Reviewers =====

    pub async fn upsert_reviewer(
        &self,
        principal: &Principal,
        reviewer_id: Uuid,
        request: UpsertReviewerRequest,
    ) -> Result<Reviewer> {
        principal.require_admin()?;
        request.validate()?;

        let mut tx = self.db.begin().await?;
        self.db.upsert_reviewer(&mut tx, reviewer_id, &request).await?;
        audit::append(
            &mut tx,
            NewAuditEntry::new(principal.actor(), "reviewer.upserted")
                .details(json!({ "reviewer_id": reviewer_id, "profile": request })),
        )
        .await?;
        let reviewer = self
            .db
            .reviewer_in_tx(&mut tx, reviewer_id)
            .await?
            .ok_or_else(|| OnboardingError::not_found("Reviewer", reviewer_id))?;
        tx.commit().await?;

        Ok(reviewer)
    }

    pub async fn list_reviewers(&self, principal: &Principal) -> Result<Vec<Reviewer>> {
        principal.require_staff()?;
        self.db.list_reviewers().await
    }

    // ===== Messaging =====

    pub async fn post_message(
        &self,
        principal: &Principal,
        case_id: Uuid,
        request: PostMessageRequest,
    ) -> Result<CaseMessage> {
        let body = request.normalized_body()?;
        if request.internal && !principal.is_staff() {
            return Err(OnboardingError::Forbidden(
                "internal notes are for staff only".into(),
            ));
        }

        let case = self.case_for(principal, case_id).await?;
        let mut tx = self.db.begin().await?;
        let message = self
            .db
            .insert_message(&mut tx, case.id, &principal.actor(), principal.portal, &body, request.internal)
            .await?;

        audit::append(
            &mut tx,
            NewAuditEntry::new(principal.actor(), "message.posted")
                .case(case.tenant_id, case.id)
                .details(json!({ "message_id": message.id, "internal": message.internal })),
        )
        .await?;

        // partners are told about staff messages only
        let mut announced = Vec::new();
        if principal.is_staff() && !message.internal {
            let event = message_event(&case, &message);
            notifications::enqueue(&self.db, &mut tx, &event).await?;
            announced.push(event);
        }
        tx.commit().await?;

        self.announce(announced).await;
        Ok(message)
    }

    pub async fn list_messages(&self, principal: &Principal, case_id: Uuid) -> Result<Vec<CaseMessage>> {
        let case = self.case_for(principal, case_id).await?;
        self.db.list_messages(case.id, principal.is_staff()).await
    }

    // ===== Audit =====

    pub async fn audit_trail(&self, principal: &Principal, case_id: Uuid) -> Result<Vec<crate::models::AuditEntry>> {
        principal.require_staff()?;
        let case = self.case_for(principal, case_id).await?;
        let mut conn = self.db.pool().acquire().await?;
        audit::entries_for_case(&mut conn, case.id).await
    }

    pub async fn verify_audit_chain(&self, principal: &Principal) -> Result<ChainVerification> {
        principal.require_admin()?;
        let mut conn = self.db.pool().acquire().await?;
        let result = audit::verify_all(&mut conn, AUDIT_VERIFY_PAGE_SIZE).await?;
        if !result.valid {
            error!(
                "Audit chain broken at seq {:?} after {} entries",
                result.first_invalid_seq, result.entries_checked
            );
        }
        Ok(result)
    }

    // ===== Webhook endpoints =====

    pub async fn register_endpoint(
        &self,
        principal: &Principal,
        request: RegisterEndpointRequest,
    ) -> Result<WebhookEndpointRow> {
        let tenant_id = principal.require_partner()?;
        request.validate()?;
        if let Some(unknown) = request.event_types.iter().find(|t| !events::is_subscribable(t)) {
            return Err(OnboardingError::Validation(format!("unknown event type: {}", unknown)));
        }

        let mut tx = self.db.begin().await?;
        let endpoint = self.db.insert_endpoint(&mut tx, tenant_id, &request).await?;
        audit::append(
            &mut tx,
            NewAuditEntry::new(principal.actor(), "webhook.endpoint_registered")
                .tenant(tenant_id)
                .details(json!({
                    "endpoint_id": endpoint.id,
                    "url": endpoint.url,
                    "event_types": endpoint.event_types,
                })),
        )
        .await?;
        tx.commit().await?;

        Ok(endpoint)
    }

    pub async fn list_endpoints(&self, principal: &Principal) -> Result<Vec<WebhookEndpointRow>> {
        let tenant_id = principal.require_partner()?;
        self.db.list_endpoints(tenant_id).await
    }

    pub async fn deactivate_endpoint(&self, principal: &Principal, endpoint_id: Uuid) -> Result<()> {
        let endpoint = self.endpoint_for(principal, endpoint_id).await?;

        let mut tx = self.db.begin().await?;
        if self.db.deactivate_endpoint(&mut tx, endpoint.id).await? {
            audit::append(
                &mut tx,
                NewAuditEntry::new(principal.actor(), "webhook.endpoint_deactivated")
                    .tenant(endpoint.tenant_id)
                    .details(json!({ "endpoint_id": endpoint.id })),
            )
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    pub async fn list_deliveries(&self, principal: &Principal, endpoint_id: Uuid) -> Result<Vec<WebhookDelivery>> {
        let endpoint = self.endpoint_for(principal, endpoint_id).await?;
        self.db
            .list_deliveries(endpoint.id, DELIVERY_LIST_LIMIT)
            .await?
            .into_iter()
            .map(WebhookDelivery::try_from)
            .collect()
    }

    async fn endpoint_for(&self, principal: &Principal, endpoint_id: Uuid) -> Result<WebhookEndpointRow> {
        let tenant_id = principal.require_partner()?;
        match self.db.get_endpoint(endpoint_id).await? {
            Some(endpoint) if endpoint.tenant_id == tenant_id => Ok(endpoint),
            _ => Err(OnboardingError::not_found("Webhook endpoint", endpoint_id)),
        }
    }

    // ===== Helpers =====

    /// Case visible to the caller; other tenants' cases look missing
    async fn case_for(&self, principal: &Principal, case_id: Uuid) -> Result<OnboardingCase> {
        match self.db.get_case(case_id).await? {
            Some(case) if principal.can_access_tenant(case.tenant_id) => Ok(case),
            _ => Err(OnboardingError::not_found("Case", case_id)),
        }
    }

    async fn lock_case_for(
        &self,
        conn: &mut PgConnection,
        principal: &Principal,
        case_id: Uuid,
    ) -> Result<OnboardingCase> {
        match self.db.lock_case(conn, case_id).await? {
            Some(case) if principal.can_access_tenant(case.tenant_id) => Ok(case),
            _ => Err(OnboardingError::not_found("Case", case_id)),
        }
    }

    async fn detail(&self, case: OnboardingCase) -> Result<CaseDetail> {
        let checklist = self.db.checklist_for_case(case.id).await?;
        let risk_level = self
            .db
            .get_assessment(case.id)
            .await?
            .map(|a| a.effective_level())
            .unwrap_or(RiskLevel::Unknown);

        Ok(CaseDetail {
            case,
            risk_level,
            checklist,
        })
    }

    /// Validated status change with its audit entry and webhook deliveries
    async fn change_status(
        &self,
        conn: &mut PgConnection,
        case: &OnboardingCase,
        to: CaseStatus,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<(OnboardingCase, WebhookEvent)> {
        case.status.transition_to(to)?;

        let updated = self
            .db
            .update_case_status(conn, case.id, case.status, to, reason)
            .await?
            .ok_or_else(|| OnboardingError::Conflict(format!("case {} changed concurrently", case.id)))?;

        audit::append(
            conn,
            NewAuditEntry::new(actor, "case.status_changed")
                .case(case.tenant_id, case.id)
                .details(json!({ "from": case.status, "to": to, "reason": reason })),
        )
        .await?;

        let event = WebhookEvent::new(
            events::CASE_STATUS_CHANGED,
            case.tenant_id,
            json!({
                "case_id": case.id,
                "external_reference": case.external_reference,
                "from": case.status,
                "to": to,
                "reason": reason,
            }),
        );
        notifications::enqueue(&self.db, conn, &event).await?;

        CASE_TRANSITIONS
            .with_label_values(&[case.status.as_str(), to.as_str()])
            .inc();
        info!("Case {} {} -> {} by {}", case.id, case.status, to, actor);

        Ok((updated, event))
    }

    /// Publish committed events on NATS
    async fn announce(&self, events: Vec<WebhookEvent>) {
        for event in events {
            self.events
                .publish(&event.event_type, event.tenant_id, &event.data)
                .await;
        }
    }
}

#[async_trait]
impl ScreeningSink for OnboardingService {
    async fn apply_screening(&self, result: ScreeningCompleted) -> Result<()> {
        let mut tx = self.db.begin().await?;
        let case = self
            .db
            .lock_case(&mut tx, result.case_id)
            .await?
            .ok_or_else(|| OnboardingError::not_found("Case", result.case_id))?;

        if case.status.is_terminal() {
            warn!(
                "Screening result for closed case {} ({}) ignored",
                case.id, case.status
            );
            return Ok(());
        }

        let source = format!("screening:{}", result.provider);
        let factors: Vec<NewRiskFactor> = result
            .results
            .iter()
            .map(|r| NewRiskFactor::new(r.check.factor_type(), r.score, r.summary.clone()).with_source(&source))
            .collect();

        let assessment = self
            .update_assessment(&mut tx, &case, |a| {
                for factor in factors {
                    a.upsert_factor(factor)?;
                }
                Ok(())
            })
            .await?;

        audit::append(
            &mut tx,
            NewAuditEntry::new("system:screening", "risk.screening_applied")
                .case(case.tenant_id, case.id)
                .details(risk_audit_details(serde_json::to_value(&result)?, &assessment)),
        )
        .await?;
        tx.commit().await?;

        Ok(())
    }
}

fn validate_country(country: &str) -> Result<()> {
    if country.len() == 2 && country.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        Err(OnboardingError::Validation(format!(
            "country must be an ISO 3166-1 alpha-2 code, got {:?}",
            country
        )))
    }
}

fn ensure_open(case: &OnboardingCase) -> Result<()> {
    if case.status.is_terminal() {
        Err(OnboardingError::PreconditionFailed(format!(
            "case {} is {}",
            case.id, case.status
        )))
    } else {
        Ok(())
    }
}

fn message_event(case: &OnboardingCase, message: &CaseMessage) -> WebhookEvent {
    WebhookEvent::new(
        events::CASE_MESSAGE_POSTED,
        case.tenant_id,
        json!({
            "case_id": case.id,
            "external_reference": case.external_reference,
            "message_id": message.id,
            "author": message.author,
            "body": message.body,
        }),
    )
}

fn risk_audit_details(change: serde_json::Value, assessment: &RiskAssessment) -> serde_json::Value {
    json!({
        "change": change,
        "overall_score": assessment.overall_score,
        "risk_level": assessment.risk_level,
        "effective_level": assessment.effective_level(),
        "version": assessment.version,
    })
}

fn assignment_audit(actor: &str, item: &WorkItem, reviewer_id: Uuid, mode: &str) -> NewAuditEntry {
    NewAuditEntry::new(actor, "work_item.assigned")
        .case(item.tenant_id, item.case_id)
        .details(json!({
            "work_item_id": item.id,
            "reviewer_id": reviewer_id,
            "priority": item.priority,
            "mode": mode,
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;

    fn case(status: CaseStatus) -> OnboardingCase {
        let now = Utc::now();
        OnboardingCase {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            external_reference: Some("ACME-1".into()),
            entity_type: EntityType::PrivateCompany,
            status,
            applicant_name: "Acme Ltd".into(),
            country: "GB".into(),
            industry: None,
            applicant_details: json!({}),
            decision_reason: None,
            created_by: "partner:u1".into(),
            created_at: now,
            updated_at: now,
            submitted_at: None,
            decided_at: None,
        }
    }

    #[test]
    fn test_country_codes() {
        assert!(validate_country("GB").is_ok());
        assert!(validate_country("de").is_ok());
        assert!(validate_country("G1").is_err());
        assert!(validate_country("GBR").is_err());
    }

    #[test]
    fn test_closed_cases_reject_changes() {
        assert!(ensure_open(&case(CaseStatus::InReview)).is_ok());
        for status in [CaseStatus::Approved, CaseStatus::Rejected, CaseStatus::Cancelled] {
            assert!(matches!(
                ensure_open(&case(status)),
                Err(OnboardingError::PreconditionFailed(_))
            ));
        }
    }

    #[test]
    fn test_message_event_payload() {
        let case = case(CaseStatus::PendingInformation);
        let message = CaseMessage {
            id: Uuid::new_v4(),
            case_id: case.id,
            author: "admin:r1".into(),
            portal: crate::models::Portal::Admin,
            body: "Please upload a certified passport copy".into(),
            internal: false,
            created_at: Utc::now(),
        };

        let event = message_event(&case, &message);
        assert_eq!(event.event_type, events::CASE_MESSAGE_POSTED);
        assert_eq!(event.tenant_id, case.tenant_id);
        assert_eq!(event.data["case_id"], json!(case.id));
        assert_eq!(event.data["external_reference"], "ACME-1");
    }

    #[test]
    fn test_risk_audit_details_track_override() {
        let mut assessment = RiskAssessment::new(Uuid::new_v4());
        assessment
            .add_factor(NewRiskFactor::new(RiskFactorType::Pep, 70.0, "domestic PEP"))
            .unwrap();
        assessment.override_level(RiskLevel::High, "family ties").unwrap();

        let details = risk_audit_details(json!({"level": "High"}), &assessment);
        assert_eq!(details["risk_level"], "MediumHigh");
        assert_eq!(details["effective_level"], "High");
        assert_eq!(details["change"]["level"], "High");
    }
}
