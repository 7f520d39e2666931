//! Bearer-token authentication, role-based authorization and the per-tenant
//! rate gate.
//!
//! Every protected route runs [`authorize`] before its handler. The middleware
//! resolves the token to a tenant and role, checks that the role grants the
//! route's [`Permission`], consults the rate gate for the tenant, and inserts a
//! [`TenantContext`] into the request extensions. Handlers never see a request
//! that failed any of these steps.

use crate::error::ApiError;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use serde::{Deserialize, Serialize};
use shared::admission::AdmissionController;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// An action a role may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Run search queries.
    Query,
    /// Submit log records.
    Ingest,
    /// Delete stored data.
    Delete,
    /// Manage users.
    ManageUsers,
    /// Manage collection agents.
    ManageAgents,
}

impl Permission {
    /// Returns the permission name as written in policy files.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Ingest => "ingest",
            Self::Delete => "delete",
            Self::ManageUsers => "manage_users",
            Self::ManageAgents => "manage_agents",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tenant and role a token acts as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    /// Tenant the token belongs to.
    #[serde(rename = "tenant")]
    pub tenant_id: String,
    /// Role name; must exist in the policy's role table.
    pub role: String,
}

/// Errors loading an access policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The policy file could not be read.
    #[error("Failed to read policy file {path}: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The policy is not valid JSON.
    #[error("Invalid policy document: {0}")]
    Json(#[from] serde_json::Error),

    /// A token refers to a role the policy does not define.
    #[error("Token for tenant '{tenant_id}' refers to unknown role '{role}'")]
    UnknownRole {
        /// Tenant of the offending token.
        tenant_id: String,
        /// Missing role.
        role: String,
    },

    /// A token has an empty tenant.
    #[error("Token with role '{0}' has an empty tenant")]
    EmptyTenant(String),
}

/// Role table and token registry.
///
/// A policy document looks like:
///
/// ```json
/// {
///   "roles": { "admin": ["query", "ingest", "delete", "manage_users"] },
///   "tokens": { "sk_live_12345": { "tenant": "tenant-a", "role": "admin" } }
/// }
/// ```
///
/// `roles` may be omitted, in which case the built-in `admin`, `operator` and
/// `viewer` roles apply.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessPolicy {
    #[serde(default = "default_roles")]
    roles: HashMap<String, HashSet<Permission>>,
    #[serde(default)]
    tokens: HashMap<String, TokenGrant>,
}

fn default_roles() -> HashMap<String, HashSet<Permission>> {
    use Permission::{Delete, Ingest, ManageAgents, ManageUsers, Query};

    HashMap::from([
        (
            "admin".to_string(),
            HashSet::from([Query, Ingest, Delete, ManageUsers]),
        ),
        (
            "operator".to_string(),
            HashSet::from([Query, Ingest, ManageAgents]),
        ),
        ("viewer".to_string(), HashSet::from([Query])),
    ])
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            roles: default_roles(),
            tokens: HashMap::new(),
        }
    }
}

impl AccessPolicy {
    /// Parses and validates a policy document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or a token refers to an
    /// unknown role.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let policy: Self = serde_json::from_str(json)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Reads a policy document from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid policy.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Registers a token.
    #[must_use]
    pub fn with_token(
        mut self,
        token: impl Into<String>,
        tenant_id: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        self.tokens.insert(
            token.into(),
            TokenGrant {
                tenant_id: tenant_id.into(),
                role: role.into(),
            },
        );
        self
    }

    /// Looks up the grant for a token.
    #[must_use]
    pub fn resolve(&self, token: &str) -> Option<&TokenGrant> {
        self.tokens.get(token)
    }

    /// Returns whether `role` grants `permission`. Unknown roles grant nothing.
    #[must_use]
    pub fn allows(&self, role: &str, permission: Permission) -> bool {
        self.roles
            .get(role)
            .is_some_and(|granted| granted.contains(&permission))
    }

    /// Number of registered tokens.
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    fn validate(&self) -> Result<(), PolicyError> {
        for grant in self.tokens.values() {
            if grant.tenant_id.trim().is_empty() {
                return Err(PolicyError::EmptyTenant(grant.role.clone()));
            }
            if !self.roles.contains_key(&grant.role) {
                return Err(PolicyError::UnknownRole {
                    tenant_id: grant.tenant_id.clone(),
                    role: grant.role.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Identity attached to an authorized request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    /// Authenticated tenant.
    pub tenant_id: String,
    /// Role the token acts as.
    pub role: String,
    /// Peer address, when the server was started with connection info.
    pub remote_addr: Option<SocketAddr>,
}

/// State for the [`authorize`] middleware of one route group.
#[derive(Clone)]
pub struct AuthLayerState {
    policy: Arc<AccessPolicy>,
    admission: AdmissionController,
    permission: Permission,
}

impl AuthLayerState {
    /// Creates middleware state requiring `permission`.
    #[must_use]
    pub fn new(
        policy: Arc<AccessPolicy>,
        admission: AdmissionController,
        permission: Permission,
    ) -> Self {
        Self {
            policy,
            admission,
            permission,
        }
    }
}

/// Authenticates, authorizes and rate-limits a request.
///
/// # Errors
///
/// - 401 when the `Authorization` header is missing or not `Bearer <token>`
/// - 403 when the token is unknown or its role lacks the required permission
/// - 429 when the tenant's rate limit is exhausted or the rate store is down
pub async fn authorize(
    State(auth): State<AuthLayerState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers())?;

    let Some(grant) = auth.policy.resolve(token) else {
        tracing::warn!(path = %request.uri().path(), "Rejected unknown service token");
        return Err(ApiError::Forbidden("Invalid service token".to_string()));
    };

    if !auth.policy.allows(&grant.role, auth.permission) {
        tracing::warn!(
            tenant_id = %grant.tenant_id,
            role = %grant.role,
            permission = %auth.permission,
            "Permission denied"
        );
        return Err(ApiError::Forbidden(format!(
            "Role '{}' missing permission '{}'",
            grant.role, auth.permission
        )));
    }

    auth.admission.allow_request(&grant.tenant_id).await?;

    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    request.extensions_mut().insert(TenantContext {
        tenant_id: grant.tenant_id.clone(),
        role: grant.role.clone(),
        remote_addr,
    });

    Ok(next.run(request).await)
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;

    value
        .to_str()
        .ok()
        .and_then(|v| v.split_once(' '))
        .filter(|(scheme, token)| *scheme == "Bearer" && !token.is_empty())
        .map(|(_, token)| token)
        .ok_or_else(|| {
            ApiError::Unauthorized("Invalid Authorization header format".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_default_roles() {
        let policy = AccessPolicy::default();

        assert!(policy.allows("admin", Permission::Delete));
        assert!(!policy.allows("admin", Permission::ManageAgents));
        assert!(policy.allows("operator", Permission::Ingest));
        assert!(policy.allows("viewer", Permission::Query));
        assert!(!policy.allows("viewer", Permission::Ingest));
        assert!(!policy.allows("ghost", Permission::Query));
    }

    #[test]
    fn test_policy_from_json() {
        let policy = AccessPolicy::from_json(
            r#"{
                "tokens": {
                    "sk_live_12345": { "tenant": "tenant-a", "role": "admin" },
                    "sk_test_67890": { "tenant": "tenant-b", "role": "viewer" }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(policy.token_count(), 2);
        let grant = policy.resolve("sk_test_67890").unwrap();
        assert_eq!(grant.tenant_id, "tenant-b");
        assert_eq!(grant.role, "viewer");
        assert!(policy.resolve("sk_unknown").is_none());
    }

    #[test]
    fn test_policy_custom_roles() {
        let policy = AccessPolicy::from_json(
            r#"{
                "roles": { "reader": ["query"] },
                "tokens": { "t": { "tenant": "acme", "role": "reader" } }
            }"#,
        )
        .unwrap();

        assert!(policy.allows("reader", Permission::Query));
        assert!(!policy.allows("admin", Permission::Query));
    }

    #[test]
    fn test_policy_rejects_unknown_role() {
        let err = AccessPolicy::from_json(
            r#"{ "tokens": { "t": { "tenant": "acme", "role": "root" } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::UnknownRole { .. }));
    }

    #[test]
    fn test_policy_rejects_empty_tenant() {
        let err = AccessPolicy::from_json(
            r#"{ "tokens": { "t": { "tenant": " ", "role": "viewer" } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::EmptyTenant(_)));
    }

    #[test]
    fn test_policy_rejects_unknown_permission() {
        let err = AccessPolicy::from_json(r#"{ "roles": { "x": ["fly"] } }"#).unwrap_err();
        assert!(matches!(err, PolicyError::Json(_)));
    }

    #[test]
    fn test_policy_from_missing_file() {
        let err = AccessPolicy::from_file("/nonexistent/policy.json").unwrap_err();
        assert!(matches!(err, PolicyError::Io { .. }));
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&headers("Bearer abc")).unwrap(), "abc");
        assert!(bearer_token(&HeaderMap::new()).is_err());
        assert!(bearer_token(&headers("Basic abc")).is_err());
        assert!(bearer_token(&headers("Bearer")).is_err());
        assert!(bearer_token(&headers("Bearer ")).is_err());
    }
}
