//! Client side of the engine streaming protocol.
//!
//! The engine answers a chat request with newline-delimited, `data:`-prefixed
//! JSON records. [`StreamDecoder`] turns arbitrary byte chunks into ordered
//! [`Frame`]s, and [`EngineClient`] drives one HTTP exchange end to end with
//! cooperative cancellation. Malformed records are never fatal: they surface as
//! [`Frame::Skip`] and are dropped.

pub mod client;
pub mod config;
pub mod decoder;
pub mod error;
pub mod events;
pub mod payload;
pub mod url;

pub use client::{CancellationSignal, EngineClient, StreamResult, StreamSummary};
pub use config::EngineClientConfig;
pub use decoder::{Frame, SkipReason, StreamDecoder};
pub use error::ClientError;
pub use payload::{ChatRequest, WireMessage};
pub use url::chat_url;
