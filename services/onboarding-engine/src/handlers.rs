use crate::auth::Principal;
use crate::errors::OnboardingError;
use crate::idempotency::IDEMPOTENCY_HEADER;
use crate::metrics::metrics_handler;
use crate::models::{
    AddRiskFactorRequest, AssignWorkItemRequest, CreateCaseRequest, DecisionRequest,
    ListCasesQuery, OverrideRiskRequest, PostMessageRequest, RegisterDocumentRequest,
    RegisterEndpointRequest, RequestInformationRequest, ReviewDocumentRequest,
    UpdateApplicantRequest, UpsertReviewerRequest, WaiveItemRequest, WorkQueueQuery,
};
use crate::services::OnboardingService;
use actix_web::{web, HttpRequest, HttpResponse};
use risk_engine::RiskFactorUpdate;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

type Service = web::Data<Arc<OnboardingService>>;
type HandlerResult = Result<HttpResponse, OnboardingError>;

/// Health check endpoint
pub async fn health_check(service: Service) -> HttpResponse {
    match service.health().await {
        Ok(()) => HttpResponse::Ok().json(json!({
            "status": "healthy",
            "service": "onboarding-engine",
            "version": env!("CARGO_PKG_VERSION")
        })),
        Err(e) => {
            warn!("Health check failed: {}", e);
            HttpResponse::ServiceUnavailable().json(json!({
                "status": "unhealthy",
                "service": "onboarding-engine"
            }))
        }
    }
}

/// Prometheus scrape endpoint
pub async fn metrics() -> HttpResponse {
    match metrics_handler() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

fn idempotency_key(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
}

// ===== Cases =====

pub async fn create_case(
    service: Service,
    principal: Principal,
    req: HttpRequest,
    body: web::Json<CreateCaseRequest>,
) -> HandlerResult {
    let case = service
        .create_case(&principal, idempotency_key(&req), body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(case))
}

pub async fn list_cases(service: Service, principal: Principal, query: web::Query<ListCasesQuery>) -> HandlerResult {
    let cases = service.list_cases(&principal, query.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "total": cases.len(),
        "cases": cases
    })))
}

pub async fn get_case(service: Service, principal: Principal, case_id: web::Path<Uuid>) -> HandlerResult {
    let case = service.get_case(&principal, *case_id).await?;
    Ok(HttpResponse::Ok().json(case))
}

pub async fn update_applicant(
    service: Service,
    principal: Principal,
    case_id: web::Path<Uuid>,
    body: web::Json<UpdateApplicantRequest>,
) -> HandlerResult {
    let case = service
        .update_applicant(&principal, *case_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(case))
}

pub async fn submit_case(service: Service, principal: Principal, case_id: web::Path<Uuid>) -> HandlerResult {
    let case = service.submit_case(&principal, *case_id).await?;
    Ok(HttpResponse::Ok().json(case))
}

pub async fn start_review(service: Service, principal: Principal, case_id: web::Path<Uuid>) -> HandlerResult {
    let case = service.start_review(&principal, *case_id).await?;
    Ok(HttpResponse::Ok().json(case))
}

pub async fn request_information(
    service: Service,
    principal: Principal,
    case_id: web::Path<Uuid>,
    body: web::Json<RequestInformationRequest>,
) -> HandlerResult {
    let case = service
        .request_information(&principal, *case_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(case))
}

pub async fn approve_case(
    service: Service,
    principal: Principal,
    case_id: web::Path<Uuid>,
    body: Option<web::Json<DecisionRequest>>,
) -> HandlerResult {
    let request = body.map(web::Json::into_inner).unwrap_or_default();
    let case = service.approve_case(&principal, *case_id, request).await?;
    Ok(HttpResponse::Ok().json(case))
}

pub async fn reject_case(
    service: Service,
    principal: Principal,
    case_id: web::Path<Uuid>,
    body: web::Json<DecisionRequest>,
) -> HandlerResult {
    let case = service
        .reject_case(&principal, *case_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(case))
}

pub async fn cancel_case(
    service: Service,
    principal: Principal,
    case_id: web::Path<Uuid>,
    body: Option<web::Json<DecisionRequest>>,
) -> HandlerResult {
    let request = body.map(web::Json::into_inner).unwrap_or_default();
    let case = service.cancel_case(&principal, *case_id, request).await?;
    Ok(HttpResponse::Ok().json(case))
}

// ===== Checklist & documents =====

pub async fn get_checklist(service: Service, principal: Principal, case_id: web::Path<Uuid>) -> HandlerResult {
    let items = service.checklist(&principal, *case_id).await?;
    Ok(HttpResponse::Ok().json(items))
}

pub async fn waive_checklist_item(
    service: Service,
    principal: Principal,
    item_id: web::Path<Uuid>,
    body: web::Json<WaiveItemRequest>,
) -> HandlerResult {
    let item = service
        .waive_item(&principal, *item_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(item))
}

pub async fn register_document(
    service: Service,
    principal: Principal,
    case_id: web::Path<Uuid>,
    body: web::Json<RegisterDocumentRequest>,
) -> HandlerResult {
    let document = service
        .register_document(&principal, *case_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(document))
}

pub async fn list_documents(service: Service, principal: Principal, case_id: web::Path<Uuid>) -> HandlerResult {
    let documents = service.list_documents(&principal, *case_id).await?;
    Ok(HttpResponse::Ok().json(documents))
}

pub async fn review_document(
    service: Service,
    principal: Principal,
    document_id: web::Path<Uuid>,
    body: web::Json<ReviewDocumentRequest>,
) -> HandlerResult {
    let document = service
        .review_document(&principal, *document_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(document))
}

// ===== Risk =====

/// Partners get the level, staff the full assessment
pub async fn get_risk(service: Service, principal: Principal, case_id: web::Path<Uuid>) -> HandlerResult {
    if principal.is_staff() {
        let assessment = service.risk_assessment(&principal, *case_id).await?;
        Ok(HttpResponse::Ok().json(assessment))
    } else {
        let summary = service.risk_summary(&principal, *case_id).await?;
        Ok(HttpResponse::Ok().json(summary))
    }
}

pub async fn add_risk_factor(
    service: Service,
    principal: Principal,
    case_id: web::Path<Uuid>,
    body: web::Json<AddRiskFactorRequest>,
) -> HandlerResult {
    let assessment = service
        .add_risk_factor(&principal, *case_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(assessment))
}

pub async fn update_risk_factor(
    service: Service,
    principal: Principal,
    path: web::Path<(Uuid, Uuid)>,
    body: web::Json<RiskFactorUpdate>,
) -> HandlerResult {
    let (case_id, factor_id) = path.into_inner();
    let assessment = service
        .update_risk_factor(&principal, case_id, factor_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(assessment))
}

pub async fn remove_risk_factor(
    service: Service,
    principal: Principal,
    path: web::Path<(Uuid, Uuid)>,
) -> HandlerResult {
    let (case_id, factor_id) = path.into_inner();
    let assessment = service
        .remove_risk_factor(&principal, case_id, factor_id)
        .await?;
    Ok(HttpResponse::Ok().json(assessment))
}

pub async fn override_risk(
    service: Service,
    principal: Principal,
    case_id: web::Path<Uuid>,
    body: web::Json<OverrideRiskRequest>,
) -> HandlerResult {
    let assessment = service
        .override_risk(&principal, *case_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(assessment))
}

// ===== Messages & audit =====

pub async fn post_message(
    service: Service,
    principal: Principal,
    case_id: web::Path<Uuid>,
    body: web::Json<PostMessageRequest>,
) -> HandlerResult {
    let message = service
        .post_message(&principal, *case_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(message))
}

pub async fn list_messages(service: Service, principal: Principal, case_id: web::Path<Uuid>) -> HandlerResult {
    let messages = service.list_messages(&principal, *case_id).await?;
    Ok(HttpResponse::Ok().json(messages))
}

pub async fn audit_trail(service: Service, principal: Principal, case_id: web::Path<Uuid>) -> HandlerResult {
    let entries = service.audit_trail(&principal, *case_id).await?;
    Ok(HttpResponse::Ok().json(entries))
}

pub async fn verify_audit_chain(service: Service, principal: Principal) -> HandlerResult {
    let result = service.verify_audit_chain(&principal).await?;
    Ok(HttpResponse::Ok().json(result))
}

// ===== Work queue =====

pub async fn list_work_items(
    service: Service,
    principal: Principal,
    query: web::Query<WorkQueueQuery>,
) -> HandlerResult {
    let items = service.list_work_items(&principal, query.into_inner()).await?;
    Ok(HttpResponse::Ok().json(items))
}

pub async fn assign_work_item(
    service: Service,
    principal: Principal,
    item_id: web::Path<Uuid>,
    body: web::Json<AssignWorkItemRequest>,
) -> HandlerResult {
    let item = service
        .assign_work_item(&principal, *item_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(item))
}

pub async fn claim_work_item(service: Service, principal: Principal, item_id: web::Path<Uuid>) -> HandlerResult {
    let item = service.claim_work_item(&principal, *item_id).await?;
    Ok(HttpResponse::Ok().json(item))
}

pub async fn complete_work_item(service: Service, principal: Principal, item_id: web::Path<Uuid>) -> HandlerResult {
    let item = service.complete_work_item(&principal, *item_id).await?;
    Ok(HttpResponse::Ok().json(item))
}

pub async fn escalate_work_item(service: Service, principal: Principal, item_id: web::Path<Uuid>) -> HandlerResult {
    let item = service.escalate_work_item(&principal, *item_id).await?;
    Ok(HttpResponse::Created().json(item))
}

/// Run one auto-assignment pass now; admin only
pub async fn run_auto_assignment(service: Service, principal: Principal) -> HandlerResult {
    principal.require_admin()?;
    let plan = service.auto_assign().await?;
    Ok(HttpResponse::Ok().json(json!({
        "assigned": plan.len(),
        "assignments": plan
    })))
}

pub async fn list_reviewers(service: Service, principal: Principal) -> HandlerResult {
    let reviewers = service.list_reviewers(&principal).await?;
    Ok(HttpResponse::Ok().json(reviewers))
}

pub async fn upsert_reviewer(
    service: Service,
    principal: Principal,
    reviewer_id: web::Path<Uuid>,
    body: web::Json<UpsertReviewerRequest>,
) -> HandlerResult {
    let reviewer = service
        .upsert_reviewer(&principal, *reviewer_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(reviewer))
}

// ===== Webhook endpoints =====

pub async fn register_endpoint(
    service: Service,
    principal: Principal,
    body: web::Json<RegisterEndpointRequest>,
) -> HandlerResult {
    let endpoint = service
        .register_endpoint(&principal, body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(endpoint))
}

pub async fn list_endpoints(service: Service, principal: Principal) -> HandlerResult {
    let endpoints = service.list_endpoints(&principal).await?;
    Ok(HttpResponse::Ok().json(endpoints))
}

pub async fn deactivate_endpoint(service: Service, principal: Principal, endpoint_id: web::Path<Uuid>) -> HandlerResult {
    service.deactivate_endpoint(&principal, *endpoint_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn list_deliveries(service: Service, principal: Principal, endpoint_id: web::Path<Uuid>) -> HandlerResult {
    let deliveries = service.list_deliveries(&principal, *endpoint_id).await?;
    Ok(HttpResponse::Ok().json(deliveries))
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/metrics", web::get().to(metrics))
        .service(
            web::scope("/api/v1")
                .service(
                    web::scope("/cases")
                        .route("", web::post().to(create_case))
                        .route("", web::get().to(list_cases))
                        .route("/{id}", web::get().to(get_case))
                        .route("/{id}/applicant", web::put().to(update_applicant))
                        .route("/{id}/submit", web::post().to(submit_case))
                        .route("/{id}/start-review", web::post().to(start_review))
                        .route("/{id}/request-information", web::post().to(request_information))
                        .route("/{id}/approve", web::post().to(approve_case))
                        .route("/{id}/reject", web::post().to(reject_case))
                        .route("/{id}/cancel", web::post().to(cancel_case))
                        .route("/{id}/checklist", web::get().to(get_checklist))
                        .route("/{id}/documents", web::post().to(register_document))
                        .route("/{id}/documents", web::get().to(list_documents))
                        .route("/{id}/risk", web::get().to(get_risk))
                        .route("/{id}/risk/factors", web::post().to(add_risk_factor))
                        .route("/{id}/risk/factors/{factor_id}", web::patch().to(update_risk_factor))
                        .route("/{id}/risk/factors/{factor_id}", web::delete().to(remove_risk_factor))
                        .route("/{id}/risk/override", web::put().to(override_risk))
                        .route("/{id}/messages", web::post().to(post_message))
                        .route("/{id}/messages", web::get().to(list_messages))
                        .route("/{id}/audit", web::get().to(audit_trail)),
                )
                .route("/checklist-items/{id}/waive", web::post().to(waive_checklist_item))
                .route("/documents/{id}/review", web::post().to(review_document))
                .service(
                    web::scope("/webhooks/endpoints")
                        .route("", web::post().to(register_endpoint))
                        .route("", web::get().to(list_endpoints))
                        .route("/{id}", web::delete().to(deactivate_endpoint))
                        .route("/{id}/deliveries", web::get().to(list_deliveries)),
                )
                .service(
                    web::scope("/admin")
                        .route("/work-items", web::get().to(list_work_items))
                        .route("/work-items/auto-assign", web::post().to(run_auto_assignment))
                        .route("/work-items/{id}/assign", web::post().to(assign_work_item))
                        .route("/work-items/{id}/claim", web::post().to(claim_work_item))
                        .route("/work-items/{id}/complete", web::post().to(complete_work_item))
                        .route("/work-items/{id}/escalate", web::post().to(escalate_work_item))
                        .route("/reviewers", web::get().to(list_reviewers))
                        .route("/reviewers/{id}", web::put().to(upsert_reviewer))
                        .route("/audit/verify", web::post().to(verify_audit_chain)),
                ),
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test as actix_test, App};

    #[actix_web::test]
    async fn test_metrics_endpoint() {
        crate::metrics::QUEUED_WORK_ITEMS.set(3);
        let app = actix_test::init_service(App::new().route("/metrics", web::get().to(metrics))).await;

        let resp = actix_test::call_service(&app, actix_test::TestRequest::get().uri("/metrics").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = actix_test::read_body(resp).await;
        assert!(String::from_utf8_lossy(&body).contains("kyc_queued_work_items"));
    }

    #[test]
    fn test_idempotency_key_header() {
        let req = actix_test::TestRequest::post()
            .insert_header((IDEMPOTENCY_HEADER, "create-acme-1"))
            .to_http_request();
        assert_eq!(idempotency_key(&req), Some("create-acme-1"));

        let req = actix_test::TestRequest::post().to_http_request();
        assert_eq!(idempotency_key(&req), None);
    }
}
