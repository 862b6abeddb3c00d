// ============================================================================
// AuthN - resolves a Principal from an API key or a bearer token
// ============================================================================
//
// Exactly one mode per request:
// - API-key mode when X-Api-Key is present: the key must be in the static
//   allow-list; forwarded trust headers enrich the principal, and a
//   recognized internal source-service synthesizes an admin service
//   principal.
// - Bearer mode otherwise: the token is introspected by the remote identity
//   provider through the TokenValidator seam; the request must name a
//   tenant the token has access to.
//
// Introspection failures are logged with detail but surface to the client
// as a plain Unauthorized.
//
// ============================================================================

use async_trait::async_trait;
use portico_error::GatewayError;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::context::{
    Principal, PrincipalKind, RequestContext, HEADER_API_KEY, HEADER_SOURCE_SERVICE,
    HEADER_TENANT_ID, HEADER_TENANT_NAME, HEADER_USER_EMAIL, HEADER_USER_ROLE,
};

const INTROSPECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// One tenant grant inside an introspected token
#[derive(Debug, Clone, Deserialize)]
pub struct UserAccess {
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    #[serde(rename = "tenantName", default)]
    pub tenant_name: Option<String>,
    #[serde(rename = "type", default)]
    pub access_type: String,
}

/// Identity-provider view of a validated token. Fields beyond this set are
/// ignored at deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct UserData {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "userAccess", default)]
    pub user_access: Vec<UserAccess>,
}

/// Narrow seam to the remote identity provider
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<UserData, GatewayError>;
}

/// HTTP introspection against the configured auth service
pub struct HttpTokenValidator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTokenValidator {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl TokenValidator for HttpTokenValidator {
    async fn validate(&self, token: &str) -> Result<UserData, GatewayError> {
        let url = format!("{}/auth/validate", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .timeout(INTROSPECTION_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "token introspection request failed");
                GatewayError::unauthorized("Authentication failed")
            })?;

        if !response.status().is_success() {
            tracing::warn!(
                status = %response.status(),
                "token introspection rejected the token"
            );
            return Err(GatewayError::unauthorized("Authentication failed"));
        }

        response.json::<UserData>().await.map_err(|e| {
            tracing::warn!(error = %e, "token introspection returned an unexpected body");
            GatewayError::unauthorized("Authentication failed")
        })
    }
}

/// AuthN stage: static keys, trust headers and the validator seam
pub struct Authenticator {
    static_tokens: Vec<String>,
    internal_services: Vec<String>,
    validator: std::sync::Arc<dyn TokenValidator>,
}

impl Authenticator {
    pub fn new(
        static_tokens: Vec<String>,
        internal_services: Vec<String>,
        validator: std::sync::Arc<dyn TokenValidator>,
    ) -> Self {
        Self {
            static_tokens,
            internal_services,
            validator,
        }
    }

    /// Resolve the caller identity for a non-public route
    pub async fn authenticate(&self, ctx: &RequestContext) -> Result<Principal, GatewayError> {
        if let Some(api_key) = ctx.header(HEADER_API_KEY) {
            return self.authenticate_api_key(ctx, api_key);
        }

        if let Some(authorization) = ctx.header("authorization") {
            return self.authenticate_bearer(ctx, authorization).await;
        }

        Err(GatewayError::unauthorized("Missing credentials"))
    }

    fn authenticate_api_key(
        &self,
        ctx: &RequestContext,
        api_key: &str,
    ) -> Result<Principal, GatewayError> {
        if !self.static_tokens.iter().any(|t| t == api_key) {
            tracing::warn!(path = %ctx.path, "rejected unknown API key");
            return Err(GatewayError::unauthorized("Invalid API key"));
        }

        let email = ctx.header(HEADER_USER_EMAIL).map(str::to_string);
        let role = ctx.header(HEADER_USER_ROLE).map(str::to_string);
        let tenant_id = ctx.header(HEADER_TENANT_ID).map(str::to_string);
        let tenant_name = ctx.header(HEADER_TENANT_NAME).map(str::to_string);
        let source_service = ctx.header(HEADER_SOURCE_SERVICE).map(str::to_string);

        // A recognized internal caller without user identity acts as an
        // admin service principal.
        if email.is_none() && role.is_none() {
            if let Some(service) = source_service
                .as_deref()
                .filter(|s| self.internal_services.iter().any(|known| known == s))
            {
                return Ok(Principal {
                    kind: PrincipalKind::Service,
                    id: service.to_string(),
                    tenant_id,
                    tenant_name,
                    roles: HashSet::from(["admin".to_string()]),
                    email: None,
                    source_service: source_service.clone(),
                });
            }
        }

        let roles: HashSet<String> = role
            .as_deref()
            .map(|r| HashSet::from([r.to_lowercase()]))
            .unwrap_or_default();

        Ok(Principal {
            kind: PrincipalKind::ApiKey,
            id: email.clone().unwrap_or_else(|| "api-key".to_string()),
            tenant_id,
            tenant_name,
            roles,
            email,
            source_service,
        })
    }

    async fn authenticate_bearer(
        &self,
        ctx: &RequestContext,
        authorization: &str,
    ) -> Result<Principal, GatewayError> {
        let token = authorization
            .strip_prefix("Bearer ")
            .ok_or_else(|| GatewayError::unauthorized("Invalid Authorization header format"))?;

        let tenant_id = ctx
            .header(HEADER_TENANT_ID)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| GatewayError::unauthorized("Missing tenant header"))?;

        let user = self.validator.validate(token).await?;

        let access = user
            .user_access
            .iter()
            .find(|a| a.tenant_id == tenant_id)
            .ok_or_else(|| {
                tracing::warn!(
                    user_id = %user.id,
                    tenant_id = %tenant_id,
                    "token has no access to the requested tenant"
                );
                GatewayError::unauthorized("No access to the requested tenant")
            })?;

        let roles = if access.access_type.eq_ignore_ascii_case("ADMIN") {
            HashSet::from(["admin".to_string()])
        } else {
            HashSet::from(["user".to_string()])
        };

        Ok(Principal {
            kind: PrincipalKind::User,
            id: user.id.clone(),
            tenant_id: Some(tenant_id),
            tenant_name: access.tenant_name.clone(),
            roles,
            email: user.email.clone(),
            source_service: None,
        })
    }
}
