//! LLM integration for fact_forge.
//!
//! Extraction goes through an OpenAI-compatible chat-completions endpoint,
//! normally a self-hosted model server next to the reader workers.
//!
//! ```ignore
//! use fact_forge::llm::{ChatClient, GenerationRequest, LlmProvider, Message, ResponseFormat};
//!
//! let client = ChatClient::new("http://localhost:8080", None)?;
//! let request = GenerationRequest::new("llama", vec![Message::user("...")])
//!     .with_response_format(ResponseFormat::json_object());
//! let response = client.generate(request).await?;
//! ```

pub mod chat;

pub use chat::{
    ChatClient, Choice, GenerationRequest, GenerationResponse, LlmProvider, Message,
    ResponseFormat, Usage,
};
