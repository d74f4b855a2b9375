//! Reconnect-aware cloud RPC client: wire models, error taxonomy, the
//! `HttpCloudClient` implementation, and the chat-proxy SSE parser.

pub mod chat_stream;
pub mod client;
pub mod error;
pub mod model;

pub use chat_stream::consume_chat_stream;
pub use chat_stream::ChatStreamEvent;
pub use chat_stream::ChatStreamOutcome;
pub use client::BridgeSession;
pub use client::BuildDiagnostic;
pub use client::BuildRecordUpdate;
pub use client::CloudApi;
pub use client::FileChange;
pub use client::HttpCloudClient;
pub use client::PendingBuild;
pub use client::TokenSource;
pub use error::CloudError;
