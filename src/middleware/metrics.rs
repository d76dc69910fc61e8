use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

/// Counts requests and errors, and times each endpoint.
///
/// Endpoints are keyed by route pattern (`GET /call-status/{call_sid}`) so
/// per-call URLs do not each get their own entry.
pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

fn endpoint_key(method: &str, pattern: Option<String>) -> String {
    format!("{} {}", method, pattern.as_deref().unwrap_or("unmatched"))
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let method = req.method().to_string();
        let app_state = req.app_data::<web::Data<AppState>>().cloned();

        if let Some(app_state) = &app_state {
            app_state.increment_request_count();
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            let Some(app_state) = app_state else {
                return result;
            };

            let (is_error, pattern) = match &result {
                Ok(response) => (
                    response.status().is_client_error() || response.status().is_server_error(),
                    response.request().match_pattern(),
                ),
                Err(_) => (true, None),
            };

            app_state.record_endpoint_request(&endpoint_key(&method, pattern), duration_ms, is_error);
            if is_error {
                app_state.increment_error_count();
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::testing::test_state;
    use actix_web::{test, App, HttpResponse};

    #[actix_web::test]
    async fn test_endpoints_are_keyed_by_route_pattern() {
        let state = web::Data::new(test_state(AppConfig::default()).state);
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .wrap(MetricsMiddleware)
                .route(
                    "/call-status/{call_sid}",
                    web::get().to(|| async { HttpResponse::NotFound().finish() }),
                ),
        )
        .await;

        for sid in ["CA1", "CA2"] {
            let req = test::TestRequest::get().uri(&format!("/call-status/{}", sid)).to_request();
            test::call_service(&app, req).await;
        }

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.error_count, 2);
        assert_eq!(snapshot.endpoint_metrics.len(), 1);
        assert_eq!(snapshot.endpoint_metrics["GET /call-status/{call_sid}"].error_count, 2);
    }

    #[actix_web::test]
    async fn test_unmatched_key() {
        assert_eq!(endpoint_key("GET", None), "GET unmatched");
    }
}
