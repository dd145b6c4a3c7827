use std::time::Duration;

use axum::Extension;
use axum::Json;
use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::extract::State;
use axum::routing::any;
use serde::Deserialize;
use serde::Serialize;
use tower::ServiceBuilder;
use ttl_count::RequestCounter;

use crate::error::handle_admission_error;
use crate::layer::AdmissionLayer;
use crate::layer::AdmissionPolicy;
use crate::service::Admitted;

/// Body returned for every admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    pub request_count: usize,
}

#[derive(Debug, Clone)]
struct AppState {
    processing_delay: Duration,
}

/// Build the counting endpoint.
///
/// Every method on every path is admitted into `counter` according to
/// `policy`. After admission the handler waits `processing_delay`, to
/// simulate work, and responds with the count observed at admission.
pub fn router(counter: RequestCounter, policy: AdmissionPolicy, processing_delay: Duration) -> Router {
    Router::new()
        .route("/", any(count_request))
        .route("/{*path}", any(count_request))
        .with_state(AppState { processing_delay })
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_admission_error))
                .layer(AdmissionLayer::new(counter).with_policy(policy)),
        )
}

/// Report the count observed at admission rather than re-reading it after
/// the processing delay.
async fn count_request(
    State(state): State<AppState>,
    Extension(admitted): Extension<Admitted>,
) -> Json<CountResponse> {
    if !state.processing_delay.is_zero() {
        tokio::time::sleep(state.processing_delay).await;
    }
    Json(CountResponse {
        request_count: admitted.count,
    })
}
