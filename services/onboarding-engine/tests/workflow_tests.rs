// Workflow tests against Postgres
// Each test gets a fresh database with migrations applied; set DATABASE_URL

use async_trait::async_trait;
use message_bus::{IdempotencyStore, InMemoryIdempotencyStore, Publisher, PublisherConfig};
use onboarding_engine::{
    assignment::AssignmentLock,
    auth::{Principal, Role},
    database::Database,
    idempotency::IdempotentRequests,
    models::{
        AddRiskFactorRequest, CaseStatus, ChecklistItemStatus, CreateCaseRequest, DecisionRequest,
        DocumentType, EntityType, OverrideRiskRequest, Portal, RegisterDocumentRequest,
        RegisterEndpointRequest, RequestInformationRequest, ReviewDecision, ReviewDocumentRequest,
        ScreeningCheck, ScreeningCompleted, ScreeningResult, WorkItemKind, WorkQueueQuery,
    },
    nats::EventPublisher,
    nats_consumer::ScreeningSink,
    notifications::WebhookWorker,
    profile::ProfileScorer,
    services::OnboardingService,
    OnboardingError,
};
use risk_engine::{RiskFactorType, RiskLevel};
use sqlx::PgPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use webhooks::{DeliveryStatus, Dispatcher, OutgoingRequest, WebhookTransport};

/// Publishes into a client that never reaches a server; events are best-effort
async fn offline_events() -> Arc<EventPublisher> {
    let client = async_nats::ConnectOptions::new()
        .retry_on_initial_connect()
        .connect("nats://127.0.0.1:1")
        .await
        .unwrap();
    Arc::new(EventPublisher::new(Publisher::new(
        client,
        PublisherConfig {
            max_retry_attempts: 1,
            ..PublisherConfig::default()
        },
    )))
}

async fn service(pool: PgPool) -> (Arc<Database>, OnboardingService) {
    let db = Arc::new(Database::from_pool(pool));
    let store: Arc<dyn IdempotencyStore> = Arc::new(InMemoryIdempotencyStore::new());
    let service = OnboardingService::new(
        db.clone(),
        offline_events().await,
        IdempotentRequests::new(store.clone(), Duration::from_secs(30), Duration::from_secs(3600)),
        AssignmentLock::new(store, Duration::from_secs(60)),
        ProfileScorer::default(),
    );
    (db, service)
}

fn partner(tenant_id: Uuid) -> Principal {
    Principal {
        subject: "partner-user".into(),
        portal: Portal::Partner,
        tenant_id: Some(tenant_id),
        roles: vec![],
    }
}

fn staff(role: Role) -> Principal {
    Principal {
        subject: Uuid::new_v4().to_string(),
        portal: Portal::Admin,
        tenant_id: None,
        roles: vec![role],
    }
}

fn individual(reference: &str) -> CreateCaseRequest {
    CreateCaseRequest {
        external_reference: Some(reference.into()),
        entity_type: EntityType::Individual,
        applicant_name: "Jane Doe".into(),
        country: "GB".into(),
        industry: None,
        applicant_details: None,
    }
}

fn document(document_type: DocumentType) -> RegisterDocumentRequest {
    RegisterDocumentRequest {
        document_type,
        file_name: format!("{}.pdf", document_type),
        content_type: "application/pdf".into(),
        size_bytes: 2048,
        sha256: "ab".repeat(32),
        storage_key: format!("uploads/{}", Uuid::new_v4()),
    }
}

fn verify() -> ReviewDocumentRequest {
    ReviewDocumentRequest {
        decision: ReviewDecision::Verify,
        reason: None,
        risk_score: None,
    }
}

/// Upload every checklist document; returns their ids
async fn supply_documents(service: &OnboardingService, partner: &Principal, case_id: Uuid) -> Vec<Uuid> {
    let mut ids = Vec::new();
    for item in service.checklist(partner, case_id).await.unwrap() {
        let doc = service
            .register_document(partner, case_id, document(item.document_type))
            .await
            .unwrap();
        ids.push(doc.id);
    }
    ids
}

async fn open_kinds(service: &OnboardingService, case_id: Uuid) -> Vec<WorkItemKind> {
    service
        .list_work_items(
            &staff(Role::Reviewer),
            WorkQueueQuery {
                status: None,
                assigned_to: None,
            },
        )
        .await
        .unwrap()
        .into_iter()
        .filter(|i| i.case_id == case_id && i.status.is_open())
        .map(|i| i.kind)
        .collect()
}

#[sqlx::test(migrations = "./migrations")]
async fn test_happy_path_to_approval(pool: PgPool) {
    let (_, service) = service(pool).await;
    let partner = partner(Uuid::new_v4());
    let reviewer = staff(Role::Reviewer);

    let created = service.create_case(&partner, None, individual("JD-1")).await.unwrap();
    let case_id = created.case.id;
    assert_eq!(created.case.status, CaseStatus::Draft);
    assert_eq!(created.risk_level, RiskLevel::Low);
    assert_eq!(created.checklist.len(), 2);

    // nothing uploaded yet
    assert!(matches!(
        service.submit_case(&partner, case_id).await,
        Err(OnboardingError::PreconditionFailed(_))
    ));

    let documents = supply_documents(&service, &partner, case_id).await;
    let submitted = service.submit_case(&partner, case_id).await.unwrap();
    assert_eq!(submitted.status, CaseStatus::Submitted);
    assert_eq!(open_kinds(&service, case_id).await, vec![WorkItemKind::InitialReview]);

    service.start_review(&reviewer, case_id).await.unwrap();

    // received is not verified
    assert!(matches!(
        service.approve_case(&reviewer, case_id, DecisionRequest::default()).await,
        Err(OnboardingError::PreconditionFailed(_))
    ));

    for id in documents {
        service.review_document(&reviewer, id, verify()).await.unwrap();
    }
    let approved = service
        .approve_case(&reviewer, case_id, DecisionRequest::default())
        .await
        .unwrap();
    assert_eq!(approved.status, CaseStatus::Approved);
    assert!(approved.decided_at.is_some());
    assert!(open_kinds(&service, case_id).await.is_empty());
}

#[sqlx::test(migrations = "./migrations")]
async fn test_resubmission_queues_information_review(pool: PgPool) {
    let (_, service) = service(pool).await;
    let partner = partner(Uuid::new_v4());
    let reviewer = staff(Role::Reviewer);

    let case_id = service.create_case(&partner, None, individual("JD-2")).await.unwrap().case.id;
    supply_documents(&service, &partner, case_id).await;
    service.submit_case(&partner, case_id).await.unwrap();
    service.start_review(&reviewer, case_id).await.unwrap();

    let pending = service
        .request_information(
            &reviewer,
            case_id,
            RequestInformationRequest {
                message: "Please upload a recent utility bill".into(),
                document_types: vec![DocumentType::ProofOfAddress],
            },
        )
        .await
        .unwrap();
    assert_eq!(pending.status, CaseStatus::PendingInformation);
    assert!(open_kinds(&service, case_id).await.is_empty());

    let address = service
        .checklist(&partner, case_id)
        .await
        .unwrap()
        .into_iter()
        .find(|i| i.document_type == DocumentType::ProofOfAddress)
        .unwrap();
    assert_eq!(address.status, ChecklistItemStatus::Outstanding);

    service
        .register_document(&partner, case_id, document(DocumentType::ProofOfAddress))
        .await
        .unwrap();
    service.submit_case(&partner, case_id).await.unwrap();
    assert_eq!(
        open_kinds(&service, case_id).await,
        vec![WorkItemKind::InformationReview]
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn test_unknown_risk_blocks_approval(pool: PgPool) {
    let (_, service) = service(pool).await;
    let partner = partner(Uuid::new_v4());
    let reviewer = staff(Role::Reviewer);

    let case_id = service.create_case(&partner, None, individual("JD-3")).await.unwrap().case.id;
    let documents = supply_documents(&service, &partner, case_id).await;
    service.submit_case(&partner, case_id).await.unwrap();
    service.start_review(&reviewer, case_id).await.unwrap();
    for id in documents {
        service.review_document(&reviewer, id, verify()).await.unwrap();
    }

    let assessment = service.risk_assessment(&reviewer, case_id).await.unwrap();
    for factor in assessment.factors {
        service
            .remove_risk_factor(&reviewer, case_id, factor.id)
            .await
            .unwrap();
    }
    assert_eq!(
        service.risk_summary(&partner, case_id).await.unwrap().risk_level,
        RiskLevel::Unknown
    );

    assert!(matches!(
        service.approve_case(&reviewer, case_id, DecisionRequest::default()).await,
        Err(OnboardingError::PreconditionFailed(_))
    ));
}

#[sqlx::test(migrations = "./migrations")]
async fn test_high_risk_needs_senior_and_enhanced_items(pool: PgPool) {
    let (_, service) = service(pool).await;
    let partner = partner(Uuid::new_v4());
    let reviewer = staff(Role::Reviewer);
    let senior = staff(Role::SeniorReviewer);

    let case_id = service.create_case(&partner, None, individual("JD-4")).await.unwrap().case.id;

    let override_high = OverrideRiskRequest {
        level: Some(RiskLevel::High),
        reason: Some("adverse findings from correspondent bank".into()),
    };
    assert!(matches!(
        service.override_risk(&reviewer, case_id, override_high.clone()).await,
        Err(OnboardingError::Forbidden(_))
    ));
    let assessment = service.override_risk(&senior, case_id, override_high).await.unwrap();
    assert_eq!(assessment.effective_level(), RiskLevel::High);

    let checklist = service.checklist(&partner, case_id).await.unwrap();
    let enhanced: Vec<DocumentType> = checklist
        .iter()
        .filter(|i| i.enhanced)
        .map(|i| i.document_type)
        .collect();
    assert_eq!(enhanced.len(), 2);
    assert!(enhanced.contains(&DocumentType::SourceOfFunds));
    assert!(enhanced.contains(&DocumentType::SourceOfWealth));

    let documents = supply_documents(&service, &partner, case_id).await;
    assert_eq!(documents.len(), 4);
    service.submit_case(&partner, case_id).await.unwrap();
    service.start_review(&reviewer, case_id).await.unwrap();
    for id in documents {
        service.review_document(&reviewer, id, verify()).await.unwrap();
    }

    assert!(matches!(
        service.approve_case(&reviewer, case_id, DecisionRequest::default()).await,
        Err(OnboardingError::Forbidden(_))
    ));
    let approved = service
        .approve_case(&senior, case_id, DecisionRequest::default())
        .await
        .unwrap();
    assert_eq!(approved.status, CaseStatus::Approved);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_screening_hits_raise_risk_and_add_enhanced_items(pool: PgPool) {
    let (_, service) = service(pool).await;
    let partner = partner(Uuid::new_v4());
    let case_id = service.create_case(&partner, None, individual("JD-5")).await.unwrap().case.id;

    service
        .apply_screening(ScreeningCompleted {
            case_id,
            provider: "acme-screening".into(),
            results: vec![
                ScreeningResult {
                    check: ScreeningCheck::Sanctions,
                    score: 100.0,
                    summary: "listed on consolidated sanctions list".into(),
                },
                ScreeningResult {
                    check: ScreeningCheck::Pep,
                    score: 100.0,
                    summary: "foreign PEP".into(),
                },
            ],
        })
        .await
        .unwrap();

    let assessment = service
        .risk_assessment(&staff(Role::Reviewer), case_id)
        .await
        .unwrap();
    // (15*1.0 + 10*0.9 + 100*2.0 + 100*1.5) / 5.4
    assert_eq!(assessment.risk_level, RiskLevel::MediumHigh);
    assert!(assessment
        .factors
        .iter()
        .any(|f| f.factor_type == RiskFactorType::Sanctions && f.source == "screening:acme-screening"));

    let enhanced = service
        .checklist(&partner, case_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|i| i.enhanced && i.status == ChecklistItemStatus::Outstanding)
        .count();
    assert_eq!(enhanced, 2);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_other_tenant_sees_not_found(pool: PgPool) {
    let (_, service) = service(pool).await;
    let owner = partner(Uuid::new_v4());
    let stranger = partner(Uuid::new_v4());

    let case_id = service.create_case(&owner, None, individual("JD-6")).await.unwrap().case.id;

    assert!(matches!(
        service.get_case(&stranger, case_id).await,
        Err(OnboardingError::NotFound { .. })
    ));
    assert!(matches!(
        service.register_document(&stranger, case_id, document(DocumentType::ProofOfIdentity)).await,
        Err(OnboardingError::NotFound { .. })
    ));
    assert!(matches!(
        service.cancel_case(&stranger, case_id, DecisionRequest::default()).await,
        Err(OnboardingError::NotFound { .. })
    ));
    assert_eq!(
        service.get_case(&owner, case_id).await.unwrap().case.status,
        CaseStatus::Draft
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn test_audit_chain_verifies_after_round_trip(pool: PgPool) {
    let (_, service) = service(pool).await;
    let partner = partner(Uuid::new_v4());
    let reviewer = staff(Role::Reviewer);

    let case_id = service.create_case(&partner, None, individual("JD-7")).await.unwrap().case.id;
    service
        .add_risk_factor(
            &reviewer,
            case_id,
            AddRiskFactorRequest {
                factor_type: RiskFactorType::Industry,
                score: 37.5,
                level: None,
                description: "cash intensive business".into(),
                source: None,
            },
        )
        .await
        .unwrap();
    supply_documents(&service, &partner, case_id).await;
    service.submit_case(&partner, case_id).await.unwrap();

    let trail = service.audit_trail(&reviewer, case_id).await.unwrap();
    assert!(trail.len() >= 5);
    assert_eq!(trail[0].action, "case.created");

    let verification = service.verify_audit_chain(&staff(Role::Admin)).await.unwrap();
    assert!(verification.valid);
    assert_eq!(verification.entries_checked, trail.len());
    assert!(verification.first_invalid_seq.is_none());
}

/// Answers with a fixed status and counts requests
struct FixedStatus {
    status: u16,
    sent: AtomicUsize,
}

#[async_trait]
impl WebhookTransport for FixedStatus {
    async fn send(&self, _request: OutgoingRequest) -> webhooks::Result<u16> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(self.status)
    }
}

/// Register an endpoint and produce one `case.status_changed` delivery
async fn one_delivery(service: &OnboardingService, reference: &str) -> (Principal, Uuid) {
    let partner = partner(Uuid::new_v4());
    let endpoint = service
        .register_endpoint(
            &partner,
            RegisterEndpointRequest {
                url: "https://partner.example/hooks".into(),
                secret: "0123456789abcdef0123".into(),
                event_types: vec!["case.status_changed".into()],
            },
        )
        .await
        .unwrap();

    let case_id = service.create_case(&partner, None, individual(reference)).await.unwrap().case.id;
    service
        .cancel_case(&partner, case_id, DecisionRequest::default())
        .await
        .unwrap();
    (partner, endpoint.id)
}

#[sqlx::test(migrations = "./migrations")]
async fn test_claimed_deliveries_are_leased(pool: PgPool) {
    let (db, service) = service(pool).await;
    one_delivery(&service, "JD-8").await;

    let first = db.claim_due_deliveries(10, Duration::from_secs(60)).await.unwrap();
    assert_eq!(first.len(), 1);
    let leased_until = first[0].1.next_attempt_at.unwrap();
    assert!(leased_until > chrono::Utc::now());

    // still leased; another worker gets nothing
    let second = db.claim_due_deliveries(10, Duration::from_secs(60)).await.unwrap();
    assert!(second.is_empty());
}

#[sqlx::test(migrations = "./migrations")]
async fn test_worker_records_each_outcome(pool: PgPool) {
    let (db, service) = service(pool).await;
    let (partner, endpoint_id) = one_delivery(&service, "JD-9").await;

    let transport = Arc::new(FixedStatus {
        status: 200,
        sent: AtomicUsize::new(0),
    });
    let worker = WebhookWorker::new(
        db.clone(),
        Dispatcher::new(transport.clone()),
        10,
        Duration::from_secs(1),
        Duration::from_secs(60),
    );

    assert_eq!(worker.run_once().await.unwrap(), 1);
    assert_eq!(worker.run_once().await.unwrap(), 0);
    assert_eq!(transport.sent.load(Ordering::SeqCst), 1);

    let deliveries = service.list_deliveries(&partner, endpoint_id).await.unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, DeliveryStatus::Delivered);
    assert_eq!(deliveries[0].attempt_count, 1);
    assert_eq!(deliveries[0].last_status_code, Some(200));
}

#[sqlx::test(migrations = "./migrations")]
async fn test_worker_schedules_retry_on_server_error(pool: PgPool) {
    let (db, service) = service(pool).await;
    let (partner, endpoint_id) = one_delivery(&service, "JD-10").await;

    let transport = Arc::new(FixedStatus {
        status: 503,
        sent: AtomicUsize::new(0),
    });
    let worker = WebhookWorker::new(
        db.clone(),
        Dispatcher::new(transport.clone()),
        10,
        Duration::from_secs(1),
        Duration::from_secs(60),
    );

    assert_eq!(worker.run_once().await.unwrap(), 1);
    // next attempt is a minute out
    assert_eq!(worker.run_once().await.unwrap(), 0);

    let deliveries = service.list_deliveries(&partner, endpoint_id).await.unwrap();
    assert_eq!(deliveries[0].status, DeliveryStatus::Pending);
    assert_eq!(deliveries[0].attempt_count, 1);
    assert_eq!(deliveries[0].last_status_code, Some(503));
    assert!(deliveries[0].next_attempt_at.unwrap() > chrono::Utc::now());
}
