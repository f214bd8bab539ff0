//! HTTP adapter: client identity, admission middleware and the host server.

mod identity;
mod middleware;
mod server;

pub use identity::{client_identity, ClientIp, UNKNOWN_IDENTITY};
pub use middleware::{enforce, rejection, AdmissionState, REJECTION_MESSAGE};
pub use server::{build_router, HttpServer};
