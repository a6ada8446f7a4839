//! Pagewright: generate HTML pages from chained natural-language instructions.
//!
//! Every instruction gets a fresh identifier and may point at the instruction
//! it was derived from. Generating the page for an identifier sends the whole
//! chain of earlier instructions to the model, so each revision builds on the
//! ones before it. Generated pages are stored and never regenerated.
//!
//! # Architecture
//!
//! - **Store**: flat `content:<id>:<field>` string storage (memory or Redis)
//! - **History**: walk `previous` links back to the first instruction
//! - **Compose**: turn history and the new instruction into one model instruction
//! - **Model**: OpenAI-compatible chat completions backend
//! - **Sanitize**: strip reasoning blocks and code fences from model output
//! - **Generate**: the create / fetch operations tying it all together

mod compose;
mod config;
mod generate;
mod history;
mod model;
mod prompt;
mod sanitize;
mod store;

pub use compose::compose_instruction;
pub use config::{
    Config, ConfigError, ContentPolicy, ModelConfig, ModelKind, StoreConfig, StoreKind,
};
pub use generate::{Error, Fetched, GenerationFailure, Generator, PAGE_CACHE_CONTROL, Page};
pub use history::{History, walk_history};
pub use model::{HttpModel, HttpModelConfig, Model, ModelBackend, ModelError, ModelRequest};
pub use prompt::system_prompt;
pub use sanitize::{SanitizeError, sanitize, sanitize_output};
pub use store::{ContentKey, Field, MemoryStore, RedisStore, Store, StoreBackend, StoreError};
