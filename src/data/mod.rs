//! Database models and queries.

pub mod cards;
pub mod catalog;
pub mod health;
pub mod kv;
pub mod rates;
pub mod sessions;
pub mod users;
