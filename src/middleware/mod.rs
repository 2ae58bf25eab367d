pub mod builder;
pub mod key_builder;
#[cfg(test)]
mod tests;

use crate::limiter::{Decision, Limiter};
use crate::store::CounterStore;
use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::HeaderMap;
use actix_web::HttpResponse;
use builder::RateLimiterBuilder;
use futures::future::{ok, LocalBoxFuture, Ready};
use std::cell::RefCell;
use std::fmt::Display;
use std::{future::Future, rc::Rc};

type AllowedTransformation = dyn Fn(&mut HeaderMap, Option<&Decision>);
type DeniedResponse = dyn Fn(&Decision) -> HttpResponse;

/// Rate limit middleware.
///
/// Wraps a [Limiter] and calls [Limiter::check](crate::Limiter::check) before
/// invoking the handler; a denied decision short-circuits into the configured
/// denied response. Two routes can enforce different quotas over one shared
/// store by wrapping two limiters built on clones of the same store.
pub struct RateLimiter<ST, F>
where
    ST: CounterStore,
{
    limiter: Limiter<ST>,
    key_fn: Rc<F>,
    fail_open: bool,
    allowed_mutation: Option<Rc<AllowedTransformation>>,
    denied_response: Rc<DeniedResponse>,
}

impl<ST, F, O> Clone for RateLimiter<ST, F>
where
    ST: CounterStore + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<String, actix_web::Error>>,
{
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            key_fn: self.key_fn.clone(),
            fail_open: self.fail_open,
            allowed_mutation: self.allowed_mutation.clone(),
            denied_response: self.denied_response.clone(),
        }
    }
}

impl<ST, F, O> RateLimiter<ST, F>
where
    ST: CounterStore + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<String, actix_web::Error>>,
{
    /// # Arguments
    ///
    /// * `limiter`: The limiter enforcing the quota.
    /// * `key_fn`: A future that produces the rate limit key for the incoming
    ///   request, see [KeyBuilder](crate::KeyBuilder).
    pub fn builder(limiter: Limiter<ST>, key_fn: F) -> RateLimiterBuilder<ST, F> {
        RateLimiterBuilder::new(limiter, key_fn)
    }
}

impl<S, B, ST, E, F, O> Transform<S, ServiceRequest> for RateLimiter<ST, F>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
    ST: CounterStore<Error = E> + 'static,
    E: Display + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<String, actix_web::Error>>,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Transform = RateLimiterMiddleware<S, ST, F>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimiterMiddleware {
            service: Rc::new(RefCell::new(service)),
            limiter: self.limiter.clone(),
            key_fn: Rc::clone(&self.key_fn),
            fail_open: self.fail_open,
            allowed_transformation: self.allowed_mutation.clone(),
            denied_response: self.denied_response.clone(),
        })
    }
}

pub struct RateLimiterMiddleware<S, ST, F>
where
    ST: CounterStore,
{
    service: Rc<RefCell<S>>,
    limiter: Limiter<ST>,
    key_fn: Rc<F>,
    fail_open: bool,
    allowed_transformation: Option<Rc<AllowedTransformation>>,
    denied_response: Rc<DeniedResponse>,
}

impl<S, B, ST, E, F, O> Service<ServiceRequest> for RateLimiterMiddleware<S, ST, F>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
    ST: CounterStore<Error = E> + 'static,
    E: Display + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<String, actix_web::Error>>,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let limiter = self.limiter.clone();
        let key_fn = self.key_fn.clone();
        let fail_open = self.fail_open;
        let allowed_transformation = self.allowed_transformation.clone();
        let denied_response = self.denied_response.clone();

        Box::pin(async move {
            let key = match (key_fn)(&req).await {
                Ok(key) => key,
                Err(e) => {
                    log::error!("Rate limit key function failed: {e}");
                    return Ok(req.into_response(e.error_response()).map_into_right_body());
                }
            };

            let decision = match limiter.check(&key).await {
                // Able to successfully query the counter store
                Ok(decision) => {
                    if decision.is_denied() {
                        let response: HttpResponse = (denied_response)(&decision);
                        return Ok(req.into_response(response).map_into_right_body());
                    }
                    Some(decision)
                }
                // Unable to query the counter store
                Err(e) => {
                    if fail_open {
                        log::warn!("Rate limit check failed: {e}, allowing the request anyway");
                        None
                    } else {
                        log::error!("Rate limit check failed: {e}");
                        let response = HttpResponse::InternalServerError().finish();
                        return Ok(req.into_response(response).map_into_right_body());
                    }
                }
            };

            let mut service_response = service.call(req).await?;

            if let Some(transformation) = allowed_transformation {
                (transformation)(service_response.headers_mut(), decision.as_ref());
            }

            Ok(service_response.map_into_left_body())
        })
    }
}
