//! # Middleware Module
//!
//! - `auth`: rejects requests without a signed-in user (401)

pub mod auth;
