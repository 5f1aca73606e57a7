use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

/// Caller identity as resolved by the outer auth middleware. The facade
/// trusts this value and uses it for telemetry only.
#[derive(Debug, Clone)]
pub struct CallerId(pub String);

impl CallerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Resolve the caller identity from `X-Caller-Id`.
pub async fn caller_identity(mut request: Request, next: Next) -> Response {
    let caller = request
        .headers()
        .get("x-caller-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or("anonymous")
        .to_string();
    request.extensions_mut().insert(CallerId(caller));
    next.run(request).await
}

/// Request ID injection: reuse the caller's `x-request-id` or mint one.
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    request.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = id.parse() {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Structured request logging with latency.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_default();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = %start.elapsed().as_millis(),
        request_id = %request_id,
        "request completed"
    );
    response
}
