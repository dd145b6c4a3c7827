use ttl_count::CountError;

/// Errors produced by the admission endpoint.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// The counter refused or gave up on an admission.
    ///
    /// `Saturated` converts to `429 Too Many Requests` with a `Retry-After`
    /// header and `Timeout` converts to `503 Service Unavailable`.
    #[error(transparent)]
    Admission(#[from] CountError),

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// Converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, headers) = match &self {
            Self::Admission(CountError::Saturated { retry_after, .. }) => {
                // Whole seconds, rounded up and never zero
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                let val = axum::http::HeaderValue::from(secs.max(1));
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Some((axum::http::header::RETRY_AFTER, val)),
                )
            }
            Self::Admission(CountError::Timeout { .. }) => (StatusCode::SERVICE_UNAVAILABLE, None),
            Self::Admission(CountError::Config(_)) | Self::Inner(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        let mut response = (status, body).into_response();
        if let Some((name, value)) = headers {
            response.headers_mut().insert(name, value);
        }
        response
    }
}

/// Convert errors raised by [`crate::AdmissionService`] into responses.
///
/// Intended for use with `axum::error_handling::HandleErrorLayer`.
pub async fn handle_admission_error(err: tower::BoxError) -> ApiError {
    match err.downcast::<CountError>() {
        Ok(err) => ApiError::Admission(*err),
        Err(err) => {
            tracing::error!(error = %err, "request failed inside admission layer");
            ApiError::Inner(err.to_string())
        }
    }
}
