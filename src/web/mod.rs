pub mod auth;
pub mod cards;
pub mod catalog;
pub mod error;
pub mod list;
pub mod middleware;
pub mod profile;
pub mod routes;
pub mod status;

pub use routes::create_router;
