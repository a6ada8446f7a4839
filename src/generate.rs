//! Creating instructions and serving generated pages.
//!
//! A page is generated at most once per identifier: the first fetch calls the
//! model and stores the cleaned result, later fetches return the stored page.
//!
//! # States
//!
//! - **Cached**: a page is stored. It is returned as-is, the model is not called.
//! - **Missing**: no instruction is stored. The fetch fails with [`Error::NotFound`].
//! - **Generate**: an instruction is stored but no page. Earlier instructions
//!   are walked, the augmented instruction is sent to the model, the output is
//!   cleaned, then page and timestamp are stored.
//!
//! A client that already holds the page can pass a validator: either the time
//! it received the page, or the page's entity tag (the identifier itself).
//! When the time is not older than the stored generation time, or the tag
//! names this identifier, the fetch answers [`Fetched::NotModified`] without
//! reading the page.

use chrono::{DateTime, Local, SecondsFormat, Utc};
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::compose::compose_instruction;
use crate::config::ContentPolicy;
use crate::history::{History, walk_history};
use crate::model::{Model, ModelError, ModelRequest};
use crate::sanitize::sanitize_output;
use crate::store::{ContentKey, Field, Store, StoreError};

const MAX_LOG_CHARS: usize = 4_000;

/// `Cache-Control` value for served pages: a page never changes once stored.
pub const PAGE_CACHE_CONTROL: &str = "public, max-age=604800, immutable";

/// A page ready to be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub html: String,
    /// When the page was generated, if a valid timestamp is stored.
    pub last_modified: Option<DateTime<Utc>>,
    /// Quoted entity tag. Pages are immutable, so the identifier is the tag.
    pub etag: String,
    pub cache_control: &'static str,
}

impl Page {
    fn new(id: &str, html: String, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            html,
            last_modified,
            etag: format!("\"{id}\""),
            cache_control: PAGE_CACHE_CONTROL,
        }
    }

    /// `last_modified` as an HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`).
    pub fn last_modified_http(&self) -> Option<String> {
        self.last_modified
            .map(|t| t.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
    }
}

/// Outcome of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    Page(Page),
    /// The client's copy is current.
    NotModified,
}

/// Generates pages for instructions held in a [`Store`].
pub struct Generator<S, M> {
    store: S,
    model: M,
    policy: ContentPolicy,
}

enum Resolved {
    NotModified,
    Cached(Page),
    Generate { instruction: String },
}

impl<S: Store, M> Generator<S, M> {
    pub fn new(store: S, model: M, policy: ContentPolicy) -> Self {
        Self {
            store,
            model,
            policy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &ContentPolicy {
        &self.policy
    }

    /// Record a new instruction, optionally derived from `previous`, and
    /// return its fresh identifier.
    pub async fn create_instruction(
        &self,
        instruction: &str,
        previous: Option<&str>,
    ) -> Result<String, Error> {
        if instruction.trim().is_empty() {
            return Err(Error::EmptyInstruction);
        }

        let id = Uuid::new_v4().to_string();
        info!(id = %id, instruction = %truncate_for_log(instruction, MAX_LOG_CHARS), "submitting instruction");
        self.store
            .set_field(&id, Field::Prompt, instruction)
            .await?;

        if let Some(previous) = previous.filter(|p| !p.trim().is_empty()) {
            info!(id = %id, previous = %previous, "linking to previous content");
            self.store
                .set_field(&id, Field::Previous, previous)
                .await?;
        }

        Ok(id)
    }

    /// The instruction stored for `id`.
    pub async fn load_instruction(&self, id: &str) -> Result<String, Error> {
        self.store
            .get_field(id, Field::Prompt)
            .await?
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| Error::NotFound { id: id.to_string() })
    }

    /// The instructions that led to `id`, oldest first.
    pub async fn history(&self, id: &str) -> Result<History, Error> {
        self.load_instruction(id).await?;
        Ok(walk_history(&self.store, id, self.policy.reuse_content).await?)
    }
}

impl<S: Store, M: Model> Generator<S, M> {
    /// Return the page for `id`, generating it on first request.
    pub async fn fetch_artifact(
        &self,
        id: &str,
        validator: Option<&str>,
    ) -> Result<Fetched, Error> {
        let instruction = match self.resolve(id, validator).await? {
            Resolved::NotModified => return Ok(Fetched::NotModified),
            Resolved::Cached(page) => return Ok(Fetched::Page(page)),
            Resolved::Generate { instruction } => instruction,
        };

        info!(id = %id, "generating content");
        let page = async {
            let request = self.prepare(id, &instruction).await?;
            let raw = self.model.generate(&request).await?;
            self.finish(id, raw).await
        }
        .await
        .map_err(|source| Error::Generation {
            id: id.to_string(),
            source,
        })?;
        Ok(Fetched::Page(page))
    }

    /// Like [`fetch_artifact`](Self::fetch_artifact), forwarding model output
    /// to `on_chunk` as it is produced.
    ///
    /// Chunks are raw model output. A cached page is emitted as one chunk of
    /// the stored page.
    pub async fn stream_artifact<F>(
        &self,
        id: &str,
        validator: Option<&str>,
        mut on_chunk: F,
    ) -> Result<Fetched, Error>
    where
        F: FnMut(&str),
    {
        let instruction = match self.resolve(id, validator).await? {
            Resolved::NotModified => return Ok(Fetched::NotModified),
            Resolved::Cached(page) => {
                on_chunk(&page.html);
                return Ok(Fetched::Page(page));
            }
            Resolved::Generate { instruction } => instruction,
        };

        info!(id = %id, "generating content (streaming)");
        let page = async {
            let request = self.prepare(id, &instruction).await?;
            let raw = self
                .model
                .generate_streaming(&request, &mut on_chunk)
                .await?;
            self.finish(id, raw).await
        }
        .await
        .map_err(|source| Error::Generation {
            id: id.to_string(),
            source,
        })?;
        Ok(Fetched::Page(page))
    }

    async fn resolve(&self, id: &str, validator: Option<&str>) -> Result<Resolved, Error> {
        let generated_at = self.generated_at(id).await?;

        if let (Some(generated_at), Some(validator)) = (generated_at, validator) {
            if is_not_modified(id, generated_at, validator) {
                debug!(id = %id, "client copy is current");
                return Ok(Resolved::NotModified);
            }
        }

        if let Some(html) = self.store.get_field(id, Field::Source).await? {
            debug!(id = %id, "reusing existing content");
            return Ok(Resolved::Cached(Page::new(id, html, generated_at)));
        }

        match self.store.get_field(id, Field::Prompt).await? {
            Some(instruction) if !instruction.trim().is_empty() => {
                Ok(Resolved::Generate { instruction })
            }
            _ => Err(Error::NotFound { id: id.to_string() }),
        }
    }

    /// Stored generation time, `None` when absent or unparsable.
    async fn generated_at(&self, id: &str) -> Result<Option<DateTime<Utc>>, Error> {
        let Some(raw) = self.store.get_field(id, Field::Timestamp).await? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(t) => Ok(Some(t.with_timezone(&Utc))),
            Err(e) => {
                warn!(id = %id, timestamp = %raw, error = %e, "failed to parse content timestamp");
                Ok(None)
            }
        }
    }

    async fn prepare(&self, id: &str, instruction: &str) -> Result<ModelRequest, GenerationFailure> {
        let history = walk_history(&self.store, id, self.policy.reuse_content).await?;
        let today = Local::now().date_naive();
        let augmented = compose_instruction(instruction, &history, today);
        info!(
            id = %id,
            history_count = history.instructions.len(),
            reused_page = history.reused_page.is_some(),
            "augmented instruction prepared"
        );
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(id = %id, instruction = %truncate_for_log(&augmented, MAX_LOG_CHARS), "augmented instruction");
        }

        Ok(ModelRequest {
            system: self.policy.system_prompt.clone(),
            instruction: augmented,
        })
    }

    /// Clean the model output and store it; nothing is written unless the
    /// cleaned page is non-empty. Page and timestamp are written together so
    /// a failed write never leaves a page without its timestamp.
    async fn finish(&self, id: &str, raw: Option<String>) -> Result<Page, GenerationFailure> {
        let html = sanitize_output(raw.as_deref(), self.policy.sanitize)
            .map_err(|_| GenerationFailure::Empty)?;
        if html.trim().is_empty() {
            return Err(GenerationFailure::Empty);
        }

        info!(id = %id, html_len = html.len(), "content generated");
        trace!(id = %id, html = %truncate_for_log(&html, MAX_LOG_CHARS), "storing content");
        let now = Utc::now();
        self.store
            .set_many(&[
                (ContentKey::new(id, Field::Source).to_string(), html.clone()),
                (
                    ContentKey::new(id, Field::Timestamp).to_string(),
                    now.to_rfc3339_opts(SecondsFormat::Millis, true),
                ),
            ])
            .await?;

        Ok(Page::new(id, html, Some(now)))
    }
}

/// Whether a client validator shows the client holds the current page.
///
/// Accepts an `If-None-Match` tag list (quoted or bare identifiers, weak
/// tags, `*`), HTTP dates and RFC 3339. Dates are compared at one-second
/// resolution, as HTTP dates carry no fractions. Anything else never matches.
fn is_not_modified(id: &str, generated_at: DateTime<Utc>, validator: &str) -> bool {
    let validator = validator.trim();
    if matches_etag(id, validator) {
        return true;
    }
    let Some(client_time) = DateTime::parse_from_rfc2822(validator)
        .or_else(|_| DateTime::parse_from_rfc3339(validator))
        .ok()
    else {
        return false;
    };
    client_time.timestamp() >= generated_at.timestamp()
}

fn matches_etag(id: &str, validator: &str) -> bool {
    validator.split(',').map(str::trim).any(|tag| {
        let tag = tag.strip_prefix("W/").unwrap_or(tag);
        tag == "*" || tag.trim_matches('"') == id
    })
}

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", char_count));
    preview
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors surfaced to callers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("content not found: {id}")]
    NotFound { id: String },

    #[error("instruction must not be empty")]
    EmptyInstruction,

    #[error("failed to generate content {id}")]
    Generation {
        id: String,
        #[source]
        source: GenerationFailure,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why generating a page failed.
#[derive(Debug, Error)]
pub enum GenerationFailure {
    #[error("model returned no usable content")]
    Empty,

    #[error("model call failed")]
    Model(#[from] ModelError),

    #[error("store operation failed")]
    Store(#[from] StoreError),
}
