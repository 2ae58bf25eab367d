use crate::clock::{Clock, SystemClock};
use crate::limiter::{Decision, Limiter};
use crate::middleware::{AllowedTransformation, DeniedResponse, RateLimiter};
use crate::store::CounterStore;
use actix_web::dev::ServiceRequest;
use actix_web::http::header::{ContentType, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use std::future::Future;
use std::rc::Rc;

pub static X_RATELIMIT_LIMIT: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-limit"));

pub static X_RATELIMIT_REMAINING: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-remaining"));

pub static X_RATELIMIT_RESET: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-reset"));

const DENIED_BODY: &str =
    r#"{"status":429,"error":"too many requests","message":"You have exceeded your request rate"}"#;

fn denied_response_with_body() -> HttpResponse {
    HttpResponse::TooManyRequests()
        .content_type(ContentType::json())
        .body(DENIED_BODY)
}

pub struct RateLimiterBuilder<ST, F>
where
    ST: CounterStore,
{
    limiter: Limiter<ST>,
    key_fn: F,
    fail_open: bool,
    allowed_transformation: Option<Rc<AllowedTransformation>>,
    denied_response: Rc<DeniedResponse>,
}

impl<ST, F, O> RateLimiterBuilder<ST, F>
where
    ST: CounterStore + 'static,
    F: Fn(&ServiceRequest) -> O,
    O: Future<Output = Result<String, actix_web::Error>>,
{
    pub(super) fn new(limiter: Limiter<ST>, key_fn: F) -> Self {
        Self {
            limiter,
            key_fn,
            fail_open: false,
            allowed_transformation: None,
            denied_response: Rc::new(|_| denied_response_with_body()),
        }
    }

    /// Choose whether to allow a request if the counter store returns a
    /// failure.
    ///
    /// Default is false.
    pub fn fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    /// Sets the [RateLimiterBuilder::request_allowed_transformation] and
    /// [RateLimiterBuilder::request_denied_response] functions, such that the
    /// following headers are set in both the allowed and denied responses:
    ///
    /// - `x-ratelimit-limit`\
    /// - `x-ratelimit-remaining`\
    /// - `x-ratelimit-reset` (Unix timestamp of the window end)
    /// - `retry-after` (denied only, seconds until the window end)
    pub fn add_headers(mut self) -> Self {
        self.allowed_transformation = Some(Rc::new(|map, decision| {
            if let Some(decision) = decision {
                insert_rate_limit_headers(map, decision);
            }
        }));
        self.denied_response = Rc::new(|decision| {
            let mut response = denied_response_with_body();
            let map = response.headers_mut();
            insert_rate_limit_headers(map, decision);
            let seconds = decision.seconds_until_reset(SystemClock.now_unix());
            map.insert(RETRY_AFTER, HeaderValue::from(seconds));
            response
        });
        self
    }

    /// In the event that the request is allowed:
    ///
    /// You can optionally mutate the response headers to include the rate
    /// limit status.
    ///
    /// By default no changes are made to the response.
    ///
    /// Note the [Decision] will be [None] if the counter store failed and
    /// [RateLimiterBuilder::fail_open] is enabled.
    pub fn request_allowed_transformation<M>(mut self, mutation: Option<M>) -> Self
    where
        M: Fn(&mut HeaderMap, Option<&Decision>) + 'static,
    {
        self.allowed_transformation = mutation.map(|m| Rc::new(m) as Rc<AllowedTransformation>);
        self
    }

    /// In the event that the request is denied, configure the [HttpResponse]
    /// returned.
    ///
    /// Defaults to a 429 with a JSON error body.
    pub fn request_denied_response<R>(mut self, denied_response: R) -> Self
    where
        R: Fn(&Decision) -> HttpResponse + 'static,
    {
        self.denied_response = Rc::new(denied_response);
        self
    }

    pub fn build(self) -> RateLimiter<ST, F> {
        RateLimiter {
            limiter: self.limiter,
            key_fn: Rc::new(self.key_fn),
            fail_open: self.fail_open,
            allowed_mutation: self.allowed_transformation,
            denied_response: self.denied_response,
        }
    }
}

fn insert_rate_limit_headers(map: &mut HeaderMap, decision: &Decision) {
    map.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(decision.limit));
    map.insert(
        X_RATELIMIT_REMAINING.clone(),
        HeaderValue::from(decision.remaining),
    );
    map.insert(
        X_RATELIMIT_RESET.clone(),
        HeaderValue::from(decision.reset_at),
    );
}
