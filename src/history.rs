//! Walking the chain of earlier instructions.

use std::collections::HashSet;

use tracing::warn;

use crate::store::{Field, Store, StoreError};

/// The instructions that led up to an identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    /// Predecessor instructions, oldest first. Does not include the
    /// instruction of the identifier the walk started from.
    pub instructions: Vec<String>,

    /// Page generated for the nearest predecessor that has one, when reuse
    /// was requested.
    pub reused_page: Option<String>,
}

impl History {
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Follow `previous` links backwards from `id`.
///
/// A predecessor whose instruction is missing is skipped but the walk
/// continues through it. The walk stops at the first identifier without a
/// predecessor, or when a link points back at an identifier already visited.
pub async fn walk_history<S: Store>(
    store: &S,
    id: &str,
    reuse_content: bool,
) -> Result<History, StoreError> {
    let mut instructions = Vec::new();
    let mut reused_page = None;
    let mut visited = HashSet::from([id.to_string()]);
    let mut current = id.to_string();

    loop {
        let Some(previous) = store
            .get_field(&current, Field::Previous)
            .await?
            .filter(|p| !p.trim().is_empty())
        else {
            break;
        };

        if !visited.insert(previous.clone()) {
            warn!(id = %id, at = %current, previous = %previous, "cycle in previous links, stopping walk");
            break;
        }

        match store.get_field(&previous, Field::Prompt).await? {
            Some(instruction) => {
                if reuse_content && reused_page.is_none() {
                    reused_page = store.get_field(&previous, Field::Source).await?;
                }
                instructions.push(instruction);
            }
            None => {
                warn!(id = %id, previous = %previous, "predecessor has no instruction, skipping");
            }
        }

        current = previous;
    }

    instructions.reverse();
    Ok(History {
        instructions,
        reused_page,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn link(store: &MemoryStore, id: &str, prompt: &str, previous: Option<&str>) {
        store.set_field(id, Field::Prompt, prompt).await.unwrap();
        if let Some(previous) = previous {
            store.set_field(id, Field::Previous, previous).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_no_predecessor_yields_empty_history() {
        let store = MemoryStore::new();
        link(&store, "a", "first", None).await;

        let history = walk_history(&store, "a", true).await.unwrap();
        assert!(history.is_empty());
        assert_eq!(history.reused_page, None);
    }

    #[tokio::test]
    async fn test_history_is_oldest_first() {
        let store = MemoryStore::new();
        link(&store, "c", "oldest", None).await;
        link(&store, "b", "middle", Some("c")).await;
        link(&store, "a", "newest", Some("b")).await;

        let history = walk_history(&store, "a", false).await.unwrap();
        assert_eq!(history.instructions, vec!["oldest", "middle"]);
    }

    #[tokio::test]
    async fn test_reuse_takes_nearest_page() {
        let store = MemoryStore::new();
        link(&store, "c", "oldest", None).await;
        link(&store, "b", "middle", Some("c")).await;
        link(&store, "a", "newest", Some("b")).await;
        store.set_field("c", Field::Source, "<p>c</p>").await.unwrap();

        let history = walk_history(&store, "a", true).await.unwrap();
        assert_eq!(history.reused_page.as_deref(), Some("<p>c</p>"));

        store.set_field("b", Field::Source, "<p>b</p>").await.unwrap();
        let history = walk_history(&store, "a", true).await.unwrap();
        assert_eq!(history.reused_page.as_deref(), Some("<p>b</p>"));

        let history = walk_history(&store, "a", false).await.unwrap();
        assert_eq!(history.reused_page, None);
    }

    #[tokio::test]
    async fn test_dangling_link_is_skipped() {
        let store = MemoryStore::new();
        link(&store, "c", "oldest", None).await;
        link(&store, "b", "middle", Some("c")).await;
        link(&store, "a", "newest", Some("b")).await;
        store.remove("content:b:prompt").unwrap();

        let history = walk_history(&store, "a", false).await.unwrap();
        assert_eq!(history.instructions, vec!["oldest"]);
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let store = MemoryStore::new();
        link(&store, "a", "one", Some("b")).await;
        link(&store, "b", "two", Some("a")).await;

        let history = walk_history(&store, "a", false).await.unwrap();
        assert_eq!(history.instructions, vec!["two"]);
    }
}
