//! Core abstractions for Tokenvault: key-value backend contracts and the auth data model.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod auth;
pub mod storage;
