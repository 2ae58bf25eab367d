use crate::limiter::{Limiter, Quota};
use crate::middleware::*;
use crate::store::{Counter, CounterStore};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::test::{read_body, TestRequest};
use actix_web::{get, test, App, HttpResponse, Responder};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[get("/200")]
async fn route_200() -> impl Responder {
    HttpResponse::Ok().body("Hello world!")
}

#[derive(Clone, Default)]
struct MockStore(Arc<MockStoreInner>);

#[derive(Default)]
struct MockStoreInner {
    counter: AtomicU64,
    fail: AtomicBool,
}

#[derive(Debug)]
struct MockError;

impl Display for MockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Mock store error")
    }
}

impl CounterStore for MockStore {
    type Error = MockError;

    async fn record(&self, _key: &str, _now: u64, window_end: u64) -> Result<Counter, MockError> {
        if self.0.fail.load(Ordering::Relaxed) {
            return Err(MockError);
        }
        Ok(Counter {
            hits: self.0.counter.fetch_add(1, Ordering::Relaxed) + 1,
            reset: window_end,
        })
    }

    async fn remove_key(&self, _key: &str) -> Result<(), MockError> {
        self.0.counter.store(0, Ordering::Relaxed);
        Ok(())
    }
}

fn limiter(limit: u64, period: u64) -> Limiter<MockStore> {
    Limiter::new(MockStore::default(), Quota::new(limit, period).unwrap())
}

#[actix_web::test]
async fn test_allow_deny() {
    let middleware = RateLimiter::builder(limiter(1, 60), |_req| async {
        Ok("key".to_string())
    })
    .build();
    let app = test::init_service(App::new().service(route_200).wrap(middleware)).await;
    assert!(
        test::call_service(&app, TestRequest::get().uri("/200").to_request())
            .await
            .status()
            .is_success()
    );
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    // The default denied response carries the JSON error body
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    let body = String::from_utf8(read_body(response).await.to_vec()).unwrap();
    assert!(body.contains("too many requests"));
}

#[actix_web::test]
async fn test_headers_added() {
    let middleware = RateLimiter::builder(limiter(2, 60), |_req| async {
        Ok("key".to_string())
    })
    .add_headers()
    .build();
    let app = test::init_service(App::new().service(route_200).wrap(middleware)).await;

    // First of 2: allowed, with the quota surfaced in the response headers
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "2");
    assert_eq!(
        response.headers().get("x-ratelimit-remaining").unwrap(),
        "1"
    );
    assert!(response.headers().contains_key("x-ratelimit-reset"));

    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(
        response.headers().get("x-ratelimit-remaining").unwrap(),
        "0"
    );

    // Third of 2: denied, same headers plus retry-after
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "2");
    assert_eq!(
        response.headers().get("x-ratelimit-remaining").unwrap(),
        "0"
    );
    assert!(response.headers().contains_key("retry-after"));
}

#[actix_web::test]
async fn test_custom_deny_response() {
    let middleware = RateLimiter::builder(limiter(0, 60), |_req| async {
        Ok("key".to_string())
    })
    .request_denied_response(|decision| {
        HttpResponse::ImATeapot().body(format!("limit was {}", decision.limit))
    })
    .build();
    let app = test::init_service(App::new().service(route_200).wrap(middleware)).await;
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    let body = String::from_utf8(read_body(response).await.to_vec()).unwrap();
    assert_eq!(body, "limit was 0");
}

#[actix_web::test]
async fn test_header_transformation() {
    let middleware = RateLimiter::builder(limiter(100, 60), |_req| async {
        Ok("key".to_string())
    })
    .request_allowed_transformation(Some(
        |headers: &mut HeaderMap, decision: Option<&Decision>| {
            assert!(
                decision.is_some(),
                "Store is working so the decision should be some"
            );
            headers.insert(
                HeaderName::from_static("test-header"),
                HeaderValue::from(decision.unwrap().remaining),
            );
        },
    ))
    .build();
    let app = test::init_service(App::new().service(route_200).wrap(middleware)).await;
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("test-header").unwrap(), "99");
}

#[actix_web::test]
async fn test_fail_open() {
    let store = MockStore::default();
    store.0.fail.store(true, Ordering::Relaxed);
    let failing_limiter = Limiter::new(store, Quota::new(1, 60).unwrap());

    // Without fail open the request is answered with a 500
    let middleware = RateLimiter::builder(failing_limiter.clone(), |_req| async {
        Ok("key".to_string())
    })
    .build();
    let app = test::init_service(App::new().service(route_200).wrap(middleware)).await;
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // With fail open enabled the request goes through, with no decision for
    // the header transformation to surface
    let middleware = RateLimiter::builder(failing_limiter, |_req| async {
        Ok("key".to_string())
    })
    .request_allowed_transformation(Some(
        |headers: &mut HeaderMap, decision: Option<&Decision>| {
            assert!(decision.is_none());
            headers.insert(
                HeaderName::from_static("custom-header"),
                HeaderValue::from_static(""),
            );
        },
    ))
    .fail_open(true)
    .build();
    let app = test::init_service(App::new().service(route_200).wrap(middleware)).await;
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("custom-header"));
}

#[cfg(feature = "dashmap")]
#[actix_web::test]
async fn test_key_builder_isolates_paths() {
    use crate::store::memory::InMemoryStore;
    let store = InMemoryStore::builder().with_sweep_interval(None).build();
    let middleware = RateLimiter::builder(
        Limiter::new(store, Quota::new(1, 60).unwrap()),
        key_builder::KeyBuilder::new().path_key().build(),
    )
    .build();
    let app = test::init_service(
        App::new()
            .service(route_200)
            .service(route_201)
            .wrap(middleware),
    )
    .await;
    assert!(
        test::call_service(&app, TestRequest::get().uri("/200").to_request())
            .await
            .status()
            .is_success()
    );
    // /200 has used up its quota, /201 has not
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let response = test::call_service(&app, TestRequest::get().uri("/201").to_request()).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[get("/201")]
async fn route_201() -> impl Responder {
    HttpResponse::Created().finish()
}
