//! Core types and storage for redline.
//!
//! Provides the persisted job model ([`job::GenerationJob`]), the underline-heading
//! document segmenter, the per-document and global usage ledger, JSON file storage,
//! and the `.redline/config.toml` configuration layer.

pub mod config;
pub mod job;
pub mod segment;
pub mod storage;
pub mod usage;
