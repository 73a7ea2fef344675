//! HTTP client stack: transport abstraction, cancellation, retry/backoff,
//! request coalescing, and `call_api` request shaping (spec §4.1).

pub mod cancellation;
pub mod client;
pub mod coalescing;
pub mod retry;
pub mod transport;

pub use cancellation::{CancellationContext, CancellationToken};
pub use client::{ApiKeyProvider, ApiRequest, HttpClient, TokenProvider};
pub use retry::RetrySettings;
pub use transport::{Method, NetworkRequest, NetworkResponse, ReqwestTransport, Transport};
