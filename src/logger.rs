use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::future::LocalBoxFuture;
use log::{info, warn};
use std::rc::Rc;
use std::time::Instant;

/// Access log middleware
///
/// One line per request with method, path, status and latency. Whether a
/// bearer credential was present is logged; the credential itself never is.
pub struct LoggerMiddleware;

impl<S, B> Transform<S, ServiceRequest> for LoggerMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = LoggerMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(LoggerMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct LoggerMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for LoggerMiddlewareService<S>
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
        let start_time = Instant::now();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let authenticated = req.headers().contains_key("Authorization");

        let service = self.service.clone();

        Box::pin(async move {
            let result = service.call(req).await;
            let elapsed = start_time.elapsed().as_millis();

            match &result {
                Ok(res) if res.status().is_client_error() || res.status().is_server_error() => {
                    warn!(
                        "{} {} -> {} ({}ms, bearer: {})",
                        method,
                        path,
                        res.status().as_u16(),
                        elapsed,
                        authenticated
                    );
                }
                Ok(res) => {
                    info!(
                        "{} {} -> {} ({}ms, bearer: {})",
                        method,
                        path,
                        res.status().as_u16(),
                        elapsed,
                        authenticated
                    );
                }
                Err(e) => {
                    // Errors raised by inner middleware (e.g. JWT rejection)
                    warn!(
                        "{} {} -> {} ({}ms, bearer: {})",
                        method,
                        path,
                        e.as_response_error().status_code().as_u16(),
                        elapsed,
                        authenticated
                    );
                }
            }

            result
        })
    }
}
