//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the slidecast core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the dialogue and audio crates
//! depend on. It establishes the logging conventions, configuration defaults,
//! and event broadcasting mechanisms used throughout the system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
