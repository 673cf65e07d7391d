//! # filehub-entity
//!
//! Domain entity models for the FileHub job engine. `Job` is both the
//! storage row (`sqlx::FromRow`) and the wire shape returned by the API.

pub mod job;
