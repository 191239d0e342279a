//! # Sprig Support
//!
//! Shared utilities for the Sprig container crates.
//!
//! This crate provides:
//! - Text rendering for error messages (creation chains, name suggestions)
//! - Type-name shortening for diagnostics

pub mod rendering;
