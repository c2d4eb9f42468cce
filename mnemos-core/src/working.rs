//! Session-scoped working memory
//!
//! Working items are ordinary memory nodes carrying a [`WorkingSlot`]; this
//! module adds capacity management and attention on top of the graph store.
//!
//! [`WorkingSlot`]: crate::node::WorkingSlot

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;

use crate::config::WorkingMemoryConfig;
use crate::error::{MemoryError, Result};
use crate::graph::{GraphStore, QueryPattern};
use crate::node::{Node, NodeId};

/// Bounded per-session attention buffer
pub struct WorkingMemory {
    store: Arc<GraphStore>,
    config: WorkingMemoryConfig,
    /// Serializes admission so concurrent adds cannot overfill a session
    admission: Mutex<()>,
}

impl WorkingMemory {
    pub fn new(store: Arc<GraphStore>, config: WorkingMemoryConfig) -> Self {
        Self {
            store,
            config,
            admission: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &WorkingMemoryConfig {
        &self.config
    }

    /// Items of a session, untracked
    pub async fn items(&self, session_id: &str) -> Result<Vec<Node>> {
        self.store
            .scan_nodes(&QueryPattern::SessionItems {
                session_id: session_id.to_string(),
            })
            .await
    }

    pub async fn len(&self, session_id: &str) -> Result<usize> {
        Ok(self.items(session_id).await?.len())
    }

    /// Add plain content with `priority` as priority and initial importance
    pub async fn add(&self, session_id: &str, content: &str, priority: f32) -> Result<Node> {
        let node = Node::builder()
            .working(session_id, priority)
            .content(content)
            .build()?;
        self.insert(node).await
    }

    /// Admit a prepared working node, evicting first if its session is full
    pub async fn insert(&self, node: Node) -> Result<Node> {
        self.admit(node).await.map(|(node, _)| node)
    }

    /// Like [`WorkingMemory::insert`], also returning the ids evicted to make room
    pub async fn admit(&self, node: Node) -> Result<(Node, Vec<NodeId>)> {
        let session_id = node
            .session_id()
            .ok_or_else(|| MemoryError::validation("working memory items need a session"))?
            .to_string();

        let _guard = self.admission.lock().await;
        let current = self.items(&session_id).await?;
        let mut evicted = Vec::new();
        if current.len() >= self.config.max_items {
            evicted = self.evict_from(&session_id, current).await?;
            if self.len(&session_id).await? >= self.config.max_items {
                return Err(MemoryError::validation(format!(
                    "working memory for session {session_id} is full of focused items"
                )));
            }
        }
        Ok((self.store.create(node).await?, evicted))
    }

    /// Up to `limit` items by focus, priority, then most recent access
    pub async fn get_context(&self, session_id: &str, limit: usize) -> Result<Vec<Node>> {
        let mut items = self.items(session_id).await?;
        items.sort_by(context_order);
        items.truncate(limit);
        Ok(items)
    }

    /// Move the session's focus to `ids`, boosting their priority
    pub async fn focus(&self, session_id: &str, ids: &[NodeId]) -> Result<Vec<Node>> {
        let items = self.items(session_id).await?;
        let members: HashSet<NodeId> = items.iter().map(|n| n.id).collect();
        if let Some(missing) = ids.iter().find(|id| !members.contains(id)) {
            return Err(MemoryError::not_found(format!(
                "{missing} is not in working memory for session {session_id}"
            )));
        }
        let targets: BTreeSet<NodeId> = ids.iter().copied().collect();
        let boost = self.config.focus_boost;

        let mut focused = Vec::with_capacity(targets.len());
        for item in items {
            let wanted = targets.contains(&item.id);
            if !wanted && !item.is_focused() {
                continue;
            }
            let updated = self
                .store
                .modify(item.id, |node| {
                    let Some(slot) = node.working_slot_mut() else {
                        return false;
                    };
                    slot.focused = wanted;
                    if wanted {
                        slot.boost(boost);
                    }
                    node.time.touch_updated();
                    true
                })
                .await?;
            if let (true, Some(node)) = (wanted, updated) {
                focused.push(node);
            }
        }
        Ok(focused)
    }

    /// Raise importance and priority by `amount`, capped at 1.0
    pub async fn reinforce(&self, id: NodeId, amount: f32) -> Result<Node> {
        self.store.reinforce(id, amount).await
    }

    /// Turn a working item into a long-term memory. Promoting an item that
    /// is already long-term changes nothing.
    pub async fn promote(&self, id: NodeId) -> Result<Node> {
        let node = self
            .store
            .modify(id, |node| node.promote_to_long_term())
            .await?
            .ok_or_else(|| MemoryError::not_found(id.to_string()))?;
        tracing::debug!(id = %id, "working item promoted");
        Ok(node)
    }

    /// Evict the lowest-scored unfocused items of a session
    pub async fn evict(&self, session_id: &str) -> Result<Vec<NodeId>> {
        let _guard = self.admission.lock().await;
        let items = self.items(session_id).await?;
        self.evict_from(session_id, items).await
    }

    async fn evict_from(&self, session_id: &str, items: Vec<Node>) -> Result<Vec<NodeId>> {
        let total = items.len();
        let mut unfocused: Vec<Node> = items.into_iter().filter(|n| !n.is_focused()).collect();
        if unfocused.is_empty() {
            return Ok(vec![]);
        }
        unfocused.sort_by(eviction_order);

        let by_fraction = (unfocused.len() as f32 * self.config.eviction_fraction).ceil() as usize;
        let overflow = (total + 1).saturating_sub(self.config.max_items);
        let count = by_fraction.max(overflow).max(1).min(unfocused.len());

        let mut evicted = Vec::with_capacity(count);
        for node in unfocused.into_iter().take(count) {
            match self.store.delete(node.id).await {
                Ok(()) | Err(MemoryError::NotFound(_)) => evicted.push(node.id),
                Err(e) => return Err(e),
            }
        }
        tracing::debug!(session = session_id, evicted = evicted.len(), "working memory evicted");
        Ok(evicted)
    }

    /// Delete every item of a session
    pub async fn clear(&self, session_id: &str) -> Result<usize> {
        let _guard = self.admission.lock().await;
        let mut cleared = 0;
        for node in self.items(session_id).await? {
            match self.store.delete(node.id).await {
                Ok(()) => cleared += 1,
                Err(MemoryError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(cleared)
    }

    /// Sessions with at least one item
    pub async fn sessions(&self) -> Result<Vec<String>> {
        let sessions: BTreeSet<String> = self
            .store
            .all_nodes()
            .await?
            .iter()
            .filter_map(|n| n.session_id().map(str::to_string))
            .collect();
        Ok(sessions.into_iter().collect())
    }

    /// Delete items older than `max_age` with importance below `max_importance`
    pub async fn prune_stale(&self, max_age: Duration, max_importance: f32) -> Result<Vec<NodeId>> {
        let stale = self
            .store
            .scan_nodes(&QueryPattern::StaleWorkingItems {
                created_before: Utc::now() - max_age,
                max_importance,
            })
            .await?;

        let mut pruned = Vec::with_capacity(stale.len());
        for node in stale {
            match self.store.delete(node.id).await {
                Ok(()) => pruned.push(node.id),
                Err(MemoryError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if !pruned.is_empty() {
            tracing::debug!(pruned = pruned.len(), "stale working items pruned");
        }
        Ok(pruned)
    }
}

fn context_order(a: &Node, b: &Node) -> Ordering {
    b.is_focused()
        .cmp(&a.is_focused())
        .then_with(|| b.priority().partial_cmp(&a.priority()).unwrap_or(Ordering::Equal))
        .then_with(|| b.time.accessed_at.cmp(&a.time.accessed_at))
}

fn eviction_order(a: &Node, b: &Node) -> Ordering {
    a.importance
        .partial_cmp(&b.importance)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.priority().partial_cmp(&b.priority()).unwrap_or(Ordering::Equal))
        .then_with(|| a.time.accessed_at.cmp(&b.time.accessed_at))
}
