//! # ttl-count-server
//!
//! An HTTP front end for [`ttl_count::RequestCounter`].
//!
//! Every inbound request, whatever its method or path, is admitted into the
//! counter by the [`AdmissionLayer`] and answered with
//! `{"request_count": N}`, where `N` is the number of live admissions
//! including this one.
//!
//! ## Saturation
//!
//! The [`AdmissionPolicy`] decides what happens once `capacity` admissions
//! are live:
//!
//! 1. **Block**: wait until the sweeper expires an admission (the default).
//! 2. **Reject**: respond `429 Too Many Requests` with `Retry-After`.
//! 3. **Timeout**: wait a bounded time, then respond `503 Service Unavailable`.
//!
//! The layer is a plain `tower::Layer`, so it can be reused in front of any
//! other service; failures surface as `BoxError` wrapping
//! [`ttl_count::CountError`] and can be rendered with
//! [`handle_admission_error`].

pub mod api;
pub mod config;
mod error;
mod layer;
pub mod logging;
mod service;


pub use error::ApiError;
pub use error::handle_admission_error;
pub use layer::AdmissionLayer;
pub use layer::AdmissionPolicy;
pub use service::AdmissionService;
pub use service::Admitted;
