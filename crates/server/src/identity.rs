//! Identity extraction middleware.
//!
//! The upstream authenticator validates credentials and forwards the caller's
//! identity in trusted headers; this layer turns those headers into an
//! [`Identity`] request extension and rejects requests that carry none. It
//! runs before any quota or routing work so unidentified callers are turned
//! away immediately.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::Body;
use config::{Identity, IdentityConfig, Plan};
use http::{HeaderMap, Request, Response, StatusCode};
use tower::Layer;

#[derive(Clone)]
pub(crate) struct IdentityLayer(Arc<IdentityConfig>);

impl IdentityLayer {
    pub(crate) fn new(config: IdentityConfig) -> Self {
        Self(Arc::new(config))
    }
}

impl<Service> Layer<Service> for IdentityLayer
where
    Service: Send + Clone,
{
    type Service = IdentityService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        IdentityService {
            next,
            config: self.0.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct IdentityService<Service> {
    next: Service,
    config: Arc<IdentityConfig>,
}

impl<Service> tower::Service<Request<Body>> for IdentityService<Service>
where
    Service: tower::Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
{
    type Response = Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut next = self.next.clone();
        let config = self.config.clone();

        Box::pin(async move {
            match extract_identity(req.headers(), &config) {
                Some(identity) => {
                    let (mut parts, body) = req.into_parts();
                    parts.extensions.insert(identity);
                    let req = Request::from_parts(parts, body);

                    next.call(req).await
                }
                None => {
                    // Generic response that doesn't leak which header was missing.
                    log::debug!("Access denied: no user identity forwarded with the request");

                    let response = Response::builder()
                        .status(StatusCode::UNAUTHORIZED)
                        .header("Content-Type", "application/json")
                        .body(Body::from(
                            r#"{"error":"unauthorized","error_description":"User identification required"}"#,
                        ))
                        .unwrap();

                    Ok(response)
                }
            }
        })
    }
}

/// Read the caller's identity from the configured headers.
///
/// The user id header is required; the plan header degrades to `free` when
/// absent or unknown; permissions are a comma-separated list.
fn extract_identity(headers: &HeaderMap, config: &IdentityConfig) -> Option<Identity> {
    let user_id = headers
        .get(config.user_id_header.as_ref())
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())?;

    let plan = headers
        .get(config.plan_header.as_ref())
        .and_then(|value| value.to_str().ok())
        .map(Plan::from_header)
        .unwrap_or(Plan::Free);

    let permissions = headers
        .get(config.permissions_header.as_ref())
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|permission| !permission.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(Identity {
        user_id: user_id.to_string(),
        plan,
        permissions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(entries: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();

        for (name, value) in entries {
            map.insert(
                http::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }

        map
    }

    #[test]
    fn missing_user_id_yields_no_identity() {
        let config = IdentityConfig::default();

        assert!(extract_identity(&headers(&[]), &config).is_none());
        assert!(extract_identity(&headers(&[("x-user-plan", "premium")]), &config).is_none());
        assert!(extract_identity(&headers(&[("x-user-id", "  ")]), &config).is_none());
    }

    #[test]
    fn plan_defaults_to_free() {
        let config = IdentityConfig::default();

        let identity = extract_identity(&headers(&[("x-user-id", "u-1")]), &config).unwrap();
        assert_eq!(identity.user_id, "u-1");
        assert_eq!(identity.plan, Plan::Free);
        assert!(identity.permissions.is_empty());
    }

    #[test]
    fn unknown_plan_degrades_to_free() {
        let config = IdentityConfig::default();

        let identity = extract_identity(&headers(&[("x-user-id", "u-1"), ("x-user-plan", "gold")]), &config).unwrap();
        assert_eq!(identity.plan, Plan::Free);
    }

    #[test]
    fn full_identity_is_extracted() {
        let config = IdentityConfig::default();

        let identity = extract_identity(
            &headers(&[
                ("x-user-id", "u-1"),
                ("x-user-plan", "enterprise"),
                ("x-user-permissions", "batch, export ,"),
            ]),
            &config,
        )
        .unwrap();

        assert_eq!(identity.plan, Plan::Enterprise);
        assert!(identity.permissions.contains("batch"));
        assert!(identity.permissions.contains("export"));
        assert_eq!(identity.permissions.len(), 2);
    }

    #[test]
    fn custom_header_names_are_honored() {
        let config: IdentityConfig = toml::from_str(
            r#"
            user_id_header = "X-Relay-User"
            plan_header = "X-Relay-Plan"
            permissions_header = "X-Relay-Permissions"
            "#,
        )
        .unwrap();

        let identity = extract_identity(
            &headers(&[("x-relay-user", "u-2"), ("x-relay-plan", "admin")]),
            &config,
        )
        .unwrap();

        assert_eq!(identity.user_id, "u-2");
        assert_eq!(identity.plan, Plan::Admin);
    }
}
