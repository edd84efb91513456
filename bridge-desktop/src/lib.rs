//! # Desktop Bridge Implementations
//!
//! Native adapters for the slidecast bridge traits. Desktop shells get a
//! real HTTP transport out of the box; audio channels remain host-provided
//! since they must be routed into whatever audio engine the shell embeds.

pub mod http;

pub use http::ReqwestHttpClient;
