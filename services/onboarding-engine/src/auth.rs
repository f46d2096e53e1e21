//! Bearer token authentication for the partner and admin portals
//!
//! Both portals issue HS256 tokens with their own secret and issuer. Partner
//! tokens carry the tenant they act for; admin tokens carry staff roles.

use crate::config::AuthConfig;
use crate::errors::{self, OnboardingError};
use crate::models::Portal;
use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    Error, FromRequest, HttpMessage, HttpRequest,
};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub exp: usize,
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Staff roles on the admin portal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Reviewer,
    SeniorReviewer,
    Admin,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reviewer" => Some(Role::Reviewer),
            "senior_reviewer" => Some(Role::SeniorReviewer),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Authenticated caller
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    pub subject: String,
    pub portal: Portal,
    pub tenant_id: Option<Uuid>,
    pub roles: Vec<Role>,
}

impl Principal {
    /// Audit/actor string
    pub fn actor(&self) -> String {
        format!("{}:{}", self.portal.as_str(), self.subject)
    }

    pub fn is_staff(&self) -> bool {
        self.portal == Portal::Admin
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Senior reviewers and admins may decide high-risk cases
    pub fn is_senior(&self) -> bool {
        self.is_staff() && (self.has_role(Role::SeniorReviewer) || self.has_role(Role::Admin))
    }

    pub fn require_staff(&self) -> errors::Result<()> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(OnboardingError::Forbidden("admin portal access required".into()))
        }
    }

    pub fn require_admin(&self) -> errors::Result<()> {
        if self.is_staff() && self.has_role(Role::Admin) {
            Ok(())
        } else {
            Err(OnboardingError::Forbidden("admin role required".into()))
        }
    }

    pub fn require_partner(&self) -> errors::Result<Uuid> {
        match (self.portal, self.tenant_id) {
            (Portal::Partner, Some(tenant_id)) => Ok(tenant_id),
            _ => Err(OnboardingError::Forbidden("partner portal access required".into())),
        }
    }

    /// Staff see every tenant; partners only their own
    pub fn can_access_tenant(&self, tenant_id: Uuid) -> bool {
        self.is_staff() || self.tenant_id == Some(tenant_id)
    }

    /// Reviewer id of a staff caller
    pub fn reviewer_id(&self) -> errors::Result<Uuid> {
        self.require_staff()?;
        Uuid::parse_str(&self.subject)
            .map_err(|_| OnboardingError::Forbidden("subject is not a reviewer id".into()))
    }
}

impl FromRequest for Principal {
    type Error = OnboardingError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<Principal>()
                .cloned()
                .ok_or_else(|| OnboardingError::Unauthorized("missing credentials".into())),
        )
    }
}

struct IssuerKey {
    issuer: String,
    portal: Portal,
    key: DecodingKey,
}

/// Validates tokens against the configured issuers
#[derive(Clone)]
pub struct TokenVerifier {
    issuers: Arc<Vec<IssuerKey>>,
}

impl TokenVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        let issuers = vec![
            IssuerKey {
                issuer: config.partner_issuer.clone(),
                portal: Portal::Partner,
                key: DecodingKey::from_secret(config.partner_jwt_secret.as_bytes()),
            },
            IssuerKey {
                issuer: config.admin_issuer.clone(),
                portal: Portal::Admin,
                key: DecodingKey::from_secret(config.admin_jwt_secret.as_bytes()),
            },
        ];
        Self {
            issuers: Arc::new(issuers),
        }
    }

    pub fn verify(&self, token: &str) -> errors::Result<Principal> {
        for issuer in self.issuers.iter() {
            let mut validation = Validation::new(Algorithm::HS256);
            validation.set_issuer(&[issuer.issuer.as_str()]);
            validation.set_required_spec_claims(&["exp", "iss", "sub"]);

            let claims = match decode::<Claims>(token, &issuer.key, &validation) {
                Ok(data) => data.claims,
                Err(_) => continue,
            };
            return principal_from_claims(claims, issuer.portal);
        }

        Err(OnboardingError::Unauthorized("invalid or expired token".into()))
    }
}

fn principal_from_claims(claims: Claims, portal: Portal) -> errors::Result<Principal> {
    let roles: Vec<Role> = claims.roles.iter().filter_map(|r| Role::parse(r)).collect();

    match portal {
        Portal::Partner if claims.tenant_id.is_none() => Err(OnboardingError::Unauthorized(
            "partner token without tenant".into(),
        )),
        Portal::Admin if roles.is_empty() => Err(OnboardingError::Unauthorized(
            "staff token without a known role".into(),
        )),
        Portal::Partner => Ok(Principal {
            subject: claims.sub,
            portal,
            tenant_id: claims.tenant_id,
            roles: Vec::new(),
        }),
        Portal::Admin => Ok(Principal {
            subject: claims.sub,
            portal,
            tenant_id: None,
            roles,
        }),
    }
}

pub struct JwtAuth {
    verifier: TokenVerifier,
}

impl JwtAuth {
    pub fn new(verifier: TokenVerifier) -> Self {
        Self { verifier }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthMiddleware {
            service: Rc::new(service),
            verifier: self.verifier.clone(),
        }))
    }
}

pub struct JwtAuthMiddleware<S> {
    service: Rc<S>,
    verifier: TokenVerifier,
}

impl<S, B> Service<ServiceRequest> for JwtAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // Skip auth for health and metrics endpoints
        if req.path() == "/health" || req.path() == "/metrics" {
            let fut = self.service.call(req);
            return Box::pin(async move { fut.await });
        }

        let token = match req
            .headers()
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
        {
            Some(value) => match value.strip_prefix("Bearer ") {
                Some(token) => token.trim().to_string(),
                None => {
                    return Box::pin(async {
                        Err(OnboardingError::Unauthorized("invalid auth header format".into()).into())
                    });
                }
            },
            None => {
                return Box::pin(async {
                    Err(OnboardingError::Unauthorized("missing Authorization header".into()).into())
                });
            }
        };

        match self.verifier.verify(&token) {
            Ok(principal) => {
                req.extensions_mut().insert(principal);
                let fut = self.service.call(req);
                Box::pin(async move { fut.await })
            }
            Err(err) => {
                tracing::warn!("JWT validation failed: {}", err);
                Box::pin(async move { Err(err.into()) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test as actix_test, web, App, HttpResponse};
    use jsonwebtoken::{encode, EncodingKey, Header};

    const PARTNER_SECRET: &str = "partner-secret-partner-secret-0123";
    const ADMIN_SECRET: &str = "admin-secret-admin-secret-admin-0123";

    fn auth_config() -> AuthConfig {
        AuthConfig {
            partner_issuer: "partner-portal".into(),
            partner_jwt_secret: PARTNER_SECRET.into(),
            admin_issuer: "admin-portal".into(),
            admin_jwt_secret: ADMIN_SECRET.into(),
        }
    }

    fn token(secret: &str, issuer: &str, tenant_id: Option<Uuid>, roles: &[&str]) -> String {
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            iss: issuer.into(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
            tenant_id,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    async fn whoami(principal: Principal) -> HttpResponse {
        HttpResponse::Ok().json(principal)
    }

    #[test]
    fn test_verify_partner_and_admin() {
        let verifier = TokenVerifier::new(&auth_config());
        let tenant = Uuid::new_v4();

        let partner = verifier
            .verify(&token(PARTNER_SECRET, "partner-portal", Some(tenant), &[]))
            .unwrap();
        assert_eq!(partner.portal, Portal::Partner);
        assert_eq!(partner.require_partner().unwrap(), tenant);
        assert!(partner.can_access_tenant(tenant));
        assert!(!partner.can_access_tenant(Uuid::new_v4()));
        assert!(partner.require_staff().is_err());

        let admin = verifier
            .verify(&token(ADMIN_SECRET, "admin-portal", None, &["senior_reviewer", "auditor"]))
            .unwrap();
        assert_eq!(admin.portal, Portal::Admin);
        assert_eq!(admin.roles, vec![Role::SeniorReviewer]);
        assert!(admin.is_senior());
        assert!(admin.require_admin().is_err());
        assert!(admin.can_access_tenant(tenant));
        assert!(admin.reviewer_id().is_ok());
    }

    #[test]
    fn test_rejects_cross_portal_and_bad_claims() {
        let verifier = TokenVerifier::new(&auth_config());

        // Right issuer, wrong secret
        assert!(verifier
            .verify(&token(ADMIN_SECRET, "partner-portal", Some(Uuid::new_v4()), &[]))
            .is_err());
        // Partner without tenant
        assert!(verifier
            .verify(&token(PARTNER_SECRET, "partner-portal", None, &[]))
            .is_err());
        // Staff without a known role
        assert!(verifier
            .verify(&token(ADMIN_SECRET, "admin-portal", None, &["intern"]))
            .is_err());
        assert!(verifier.verify("not-a-jwt").is_err());
    }

    #[actix_web::test]
    async fn test_middleware() {
        let app = actix_test::init_service(
            App::new()
                .wrap(JwtAuth::new(TokenVerifier::new(&auth_config())))
                .route("/health", web::get().to(|| async { HttpResponse::Ok().finish() }))
                .route("/api/v1/whoami", web::get().to(whoami)),
        )
        .await;

        let resp = actix_test::call_service(&app, actix_test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let err = actix_test::try_call_service(&app, actix_test::TestRequest::get().uri("/api/v1/whoami").to_request())
            .await
            .unwrap_err();
        assert_eq!(err.as_response_error().status_code(), StatusCode::UNAUTHORIZED);

        let err = actix_test::try_call_service(
            &app,
            actix_test::TestRequest::get()
                .uri("/api/v1/whoami")
                .insert_header(("Authorization", "Basic abc"))
                .to_request(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.as_response_error().status_code(), StatusCode::UNAUTHORIZED);

        let tenant = Uuid::new_v4();
        let req = actix_test::TestRequest::get()
            .uri("/api/v1/whoami")
            .insert_header((
                "Authorization",
                format!("Bearer {}", token(PARTNER_SECRET, "partner-portal", Some(tenant), &[])),
            ))
            .to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["portal"], "partner");
        assert_eq!(body["tenant_id"], tenant.to_string());
    }
}
