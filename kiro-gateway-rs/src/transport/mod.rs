//! HTTP transport and wire-format decoding for the Kiro API.

pub mod eventstream;
pub mod headers;
pub mod http;
pub mod sse;
