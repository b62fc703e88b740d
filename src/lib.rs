//! Screenshot cache library.
//!
//! Renders web pages to images in a headless browser and keeps every capture
//! in object storage, indexed in SQLite, so equivalent requests within a
//! capture's TTL are served without rendering again.

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod blocking;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod origin;
pub mod renderer;
pub mod request;
pub mod s3;
pub mod storage;
pub mod web;
