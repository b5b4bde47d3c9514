//! HTTP surface: admission middleware, admin routes and the server.

mod admin;
mod middleware;
mod server;

pub use admin::admin_router;
pub use middleware::{rejection, AdmissionLayer, AdmissionService};
pub use server::{build_router, HttpServer};
