//! Core data models for the slide upload service.
//!
//! These entities map cleanly to database tables via `sqlx::FromRow` and
//! serialize naturally as JSON via `serde`.

pub mod slide_image;
