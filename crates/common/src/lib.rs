//! Common utilities and types shared across session client components.

#![warn(clippy::pedantic)]

/// Module for common identifier types
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;
