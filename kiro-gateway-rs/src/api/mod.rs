//! Public API surface: the fluent Messages builder, model listing, and the raw escape hatch.

pub mod messages;
pub mod models;
pub mod raw;

pub use messages::MessagesRequestBuilder;
