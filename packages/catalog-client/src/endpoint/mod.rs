//! Endpoint resolution: `(catalog, api, version) -> base_url` (spec §4.2).

pub mod resolver;

pub use resolver::{EndpointResolver, EndpointResolving, HttpLookupService, LookupService};
