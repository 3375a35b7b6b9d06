pub mod auth;
pub mod catalog;
pub mod cors;
pub mod handlers;
pub mod response;
pub mod router;

pub use router::build_router;
