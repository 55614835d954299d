//! # Graft Support
//!
//! Shared utilities for the Graft DI framework.
//!
//! This crate provides:
//! - Type-name shortening and list rendering for error messages and diagnostics
//! - "Did you mean?" suggestions for unregistered services

pub mod rendering;
