//! Common utilities shared across Echo Bot components.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for the one-shot HTTPS login exchange that yields bot credentials
pub mod login;
