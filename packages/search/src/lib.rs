//! The search service: a WebSocket endpoint that turns natural-language
//! queries into cited answers via LLM enhancement, vector retrieval, chunk
//! re-ranking, and LLM synthesis — streaming typed progress events the
//! whole way.

pub mod config;
pub mod events;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod server;
pub mod session;

pub use config::Config;
pub use events::{EventType, InboundFrame, SearchEvent};
pub use llm::{ChatApi, EnhancedQuery, HttpChatClient};
pub use pipeline::{EventSink, SearchPipeline};
pub use server::{router, AppState};
pub use session::{handle_socket, Session, WsSession};
