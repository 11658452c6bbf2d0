//! HTTP adapters implementing `domain::ports::ModelProvider` for each
//! supported model backend. Grounded on the teacher's
//! `adapters::substrates` module, reduced to thin, stateless transports
//! since `services::model_gateway::ModelGateway` already owns retry,
//! rate limiting, and event publishing across every provider.

pub mod anthropic;
pub mod ollama;
pub mod openai;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
pub use ollama::{OllamaConfig, OllamaProvider};
pub use openai::{OpenAiConfig, OpenAiProvider};
