//! Client code for recall.
//!
//! This crate provides the remote answer endpoint, the FIFO delivery queue,
//! and the cache-first retriever shared by the server.

pub mod context;
pub mod endpoint;
pub mod queue;
pub mod retriever;

pub use context::AppContext;
pub use endpoint::{AnswerEndpoint, AnswerPrompt, EndpointConfig, EndpointError, HttpEndpoint, ParsedAnswer};
pub use queue::{DeliveryQueue, LogEntry, QueueStatus, RequestStatus};
pub use retriever::{AnswerQuery, AnswerResult, AnswerRetriever, AnswerSource, RetrieverStats};
