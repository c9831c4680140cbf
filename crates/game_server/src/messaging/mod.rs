//! Inbound frame handling: validation, parsing and hand-off to the registry.

pub mod router;

pub use router::route_client_message;
