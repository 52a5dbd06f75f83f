//! Sanitizing OpenAI-compatible proxy for small-context local inference
//! servers such as hailo-ollama.
//!
//! Requests are reduced to a dialect the upstream survives, forwarded, and
//! the replies repaired into what OpenAI SDK clients expect, including
//! synthesized streaming and recovered tool calls.

#![deny(unsafe_code)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod facade;
pub mod forward;
pub mod gate;
pub mod models;
pub mod normalize;
pub mod sanitize;
pub mod server;
pub mod stream;
pub mod tools;
pub mod trace;

pub use catalog::{ModelCatalog, StaticCatalog, UpstreamCatalog};
pub use config::{ProxyConfig, SanitizerConfig, SecurityPolicy, TraceConfig};
pub use error::ProxyError;
pub use server::{ProxyState, app, build_router, serve};
