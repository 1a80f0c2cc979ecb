use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::Method,
    Error, HttpMessage,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use log::{debug, warn};
use std::sync::Arc;

use crate::auth::{AuthError, TokenCodec};
use crate::error::AppError;

/// 不需要 token 的路径前缀
pub const PUBLIC_URLS: &[&str] = &[
    "/user/login",
    "/user/register",
    "/user/resetPassword/",
    "/user/image/",
];

pub fn is_public(path: &str) -> bool {
    PUBLIC_URLS.iter().any(|prefix| path.starts_with(prefix))
}

pub fn bearer_token(req: &ServiceRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[derive(Clone)]
pub struct JwtAuthorization {
    codec: Arc<TokenCodec>,
}

impl JwtAuthorization {
    pub fn new(codec: Arc<TokenCodec>) -> Self {
        Self { codec }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtAuthorization
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = JwtAuthorizationService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthorizationService {
            service: Arc::new(service),
            codec: self.codec.clone(),
        }))
    }
}

pub struct JwtAuthorizationService<S> {
    service: Arc<S>,
    codec: Arc<TokenCodec>,
}

impl<S, B> Service<ServiceRequest> for JwtAuthorizationService<S>
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
        let codec = self.codec.clone();
        let service = self.service.clone();

        Box::pin(async move {
            if req.method() == Method::OPTIONS || is_public(req.path()) {
                return service.call(req).await;
            }

            let identity = match bearer_token(&req) {
                Some(token) => codec.verify(token),
                None => {
                    warn!("未提供认证 token: {}", req.path());
                    Err(AuthError::MissingToken)
                }
            }
            .map_err(AppError::from)?;

            debug!(
                "用户 {} 认证成功, token 有效期至 {}",
                identity.subject, identity.expires_at
            );
            req.extensions_mut().insert(identity);
            service.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_paths_are_recognised() {
        assert!(is_public("/user/login"));
        assert!(is_public("/user/resetPassword/a@b.com"));
        assert!(is_public("/user/image/profile/alice"));
        assert!(!is_public("/user/list"));
        assert!(!is_public("/user/delete/alice"));
    }
}
