//! Tower middleware that admits or rejects requests per bucket.

use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::BoxFuture;
use tower::{Layer, Service};

use crate::error::{ApiError, ErrorEnvelope};
use crate::identity::{authenticated_user, request_identity};
use crate::ratelimit::{Bucket, ConsumeOutcome, RateLimiter};

/// Layer charging every request to one bucket.
///
/// Apply one per route group, e.g. the auth bucket on login and register:
///
/// ```rust,ignore
/// let auth = Router::new()
///     .route("/login", post(login))
///     .route_layer(AdmissionLayer::new(limiter.clone(), Bucket::Auth));
/// ```
#[derive(Clone)]
pub struct AdmissionLayer {
    limiter: RateLimiter,
    bucket: Bucket,
}

impl AdmissionLayer {
    pub fn new(limiter: RateLimiter, bucket: Bucket) -> Self {
        Self { limiter, bucket }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            limiter: self.limiter.clone(),
            bucket: self.bucket,
        }
    }
}

/// Service produced by [`AdmissionLayer`].
#[derive(Clone)]
pub struct AdmissionService<S> {
    inner: S,
    limiter: RateLimiter,
    bucket: Bucket,
}

impl<S> Service<Request> for AdmissionService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        // The readied service goes with this request; keep a fresh clone.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let limiter = self.limiter.clone();
        let bucket = self.bucket;

        Box::pin(async move {
            let identity = if bucket == Bucket::User {
                match authenticated_user(&request) {
                    Some(id) => id.to_string(),
                    None => return inner.call(request).await,
                }
            } else {
                request_identity(&request)
            };

            match limiter.check(bucket, &identity).await {
                Ok(ConsumeOutcome::Allowed) => inner.call(request).await,
                Ok(outcome) => {
                    let fallback = limiter.policy(bucket).fallback_retry_secs;
                    let retry_after = outcome.retry_after_secs(fallback).unwrap_or(fallback);
                    Ok(rejection(bucket, retry_after))
                }
                Err(e) => Ok(ApiError::from(e).into_response()),
            }
        })
    }
}

/// 429 response for an exhausted bucket.
pub fn rejection(bucket: Bucket, retry_after_secs: u64) -> Response {
    let body = ErrorEnvelope::new(
        StatusCode::TOO_MANY_REQUESTS,
        bucket.error_code(),
        bucket.error_message(),
    )
    .with_retry_after(retry_after_secs);

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::error::StoreError;
    use crate::identity::AuthenticatedUser;
    use crate::ratelimit::{
        CounterKey, CounterSnapshot, CounterStore, MemoryStore, MockClock, PolicyTable,
        RateLimitPolicy,
    };

    fn app(limiter: RateLimiter, bucket: Bucket) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(AdmissionLayer::new(limiter, bucket))
    }

    fn mock_limiter(policies: PolicyTable) -> (RateLimiter, MockClock) {
        let clock = MockClock::new();
        let store = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
        (RateLimiter::new(store, policies), clock)
    }

    fn request_from(ip: &str) -> Request {
        axum::http::Request::builder()
            .uri("/")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn consume(
            &self,
            _key: &CounterKey,
            _policy: &RateLimitPolicy,
        ) -> Result<ConsumeOutcome, StoreError> {
            Err(StoreError::Timeout(Duration::from_millis(250)))
        }

        async fn delete(&self, _key: &CounterKey) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn inspect(
            &self,
            _key: &CounterKey,
            _policy: &RateLimitPolicy,
        ) -> Result<Option<CounterSnapshot>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_general_scenario_over_http() {
        let (limiter, clock) = mock_limiter(PolicyTable::with_general(3, 10).unwrap());
        let app = app(limiter, Bucket::General);

        for _ in 0..3 {
            let response = app.clone().oneshot(request_from("1.2.3.4")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        clock.advance(Duration::from_secs(1));
        let response = app.clone().oneshot(request_from("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "9");

        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "RATE_LIMIT_ERROR");
        assert_eq!(body["error"]["message"], "Rate limit exceeded");
        assert_eq!(body["error"]["status"], 429);
        assert_eq!(body["error"]["retryAfter"], 9);

        clock.advance(Duration::from_secs(10));
        let response = app.clone().oneshot(request_from("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_bucket_rejection_code() {
        let (limiter, _clock) = mock_limiter(PolicyTable::default());
        let app = app(limiter, Bucket::Auth);

        for _ in 0..5 {
            let response = app.clone().oneshot(request_from("203.0.113.9")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(request_from("203.0.113.9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "900");

        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "AUTH_RATE_LIMIT_ERROR");
        assert_eq!(body["error"]["retryAfter"], 900);
    }

    #[tokio::test]
    async fn test_retry_after_near_window_end_is_one_second() {
        let (limiter, clock) = mock_limiter(PolicyTable::default());
        let app = app(limiter, Bucket::Auth);

        for _ in 0..5 {
            app.clone().oneshot(request_from("203.0.113.9")).await.unwrap();
        }

        clock.advance(Duration::from_secs(900) - Duration::from_micros(400));
        let response = app.clone().oneshot(request_from("203.0.113.9")).await.unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "1");
    }

    #[tokio::test]
    async fn test_other_clients_unaffected() {
        let (limiter, _clock) = mock_limiter(PolicyTable::with_general(1, 60).unwrap());
        let app = app(limiter, Bucket::General);

        app.clone().oneshot(request_from("10.0.0.1")).await.unwrap();
        let blocked = app.clone().oneshot(request_from("10.0.0.1")).await.unwrap();
        let other = app.clone().oneshot(request_from("10.0.0.2")).await.unwrap();

        assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_user_bucket_skips_anonymous_requests() {
        let policies = PolicyTable::default()
            .with_policy(Bucket::User, RateLimitPolicy::new(1, 3600, 1800, 1800).unwrap());
        let (limiter, _clock) = mock_limiter(policies);
        let app = app(limiter.clone(), Bucket::User);

        for _ in 0..3 {
            let response = app.clone().oneshot(request_from("1.2.3.4")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert!(limiter.inspect(Bucket::User, "1.2.3.4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_user_bucket_keys_by_user_id() {
        let policies = PolicyTable::default()
            .with_policy(Bucket::User, RateLimitPolicy::new(1, 3600, 1800, 1800).unwrap());
        let (limiter, _clock) = mock_limiter(policies);
        let app = app(limiter, Bucket::User);

        let as_user = |id: &str, ip: &str| {
            let mut request = request_from(ip);
            request.extensions_mut().insert(AuthenticatedUser::new(id));
            request
        };

        let first = app.clone().oneshot(as_user("42", "1.1.1.1")).await.unwrap();
        // Same user from a different address shares the counter.
        let second = app.clone().oneshot(as_user("42", "2.2.2.2")).await.unwrap();
        let other_user = app.clone().oneshot(as_user("43", "1.1.1.1")).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(other_user.status(), StatusCode::OK);

        let body = json_body(second).await;
        assert_eq!(body["error"]["code"], "USER_RATE_LIMIT_ERROR");
    }

    #[tokio::test]
    async fn test_store_failure_is_not_admitted() {
        let limiter = RateLimiter::new(Arc::new(FailingStore), PolicyTable::default());
        let app = app(limiter, Bucket::Search);

        let response = app.oneshot(request_from("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
        assert!(body["error"].get("retryAfter").is_none());
    }

    #[test]
    fn test_rejection_sets_retry_after_header() {
        let response = rejection(Bucket::Upload, 1800);

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "1800");
    }
}
