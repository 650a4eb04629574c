//! In-memory handler catalog.
//!
//! Registration computes the handler's embedding once and builds the
//! reverse indices the router's keyword stage scans (compiled keyword and
//! regex patterns, lowercase prefixes). Reads are concurrent; definition
//! changes serialize through the write lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use uuid::Uuid;

use sw_domain::error::{Error, Result};
use sw_domain::trace::TraceEvent;
use sw_providers::EmbeddingProvider;

use crate::definition::{HandlerDefinition, PatternKind};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Indexed handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A registered handler plus the routing indices computed at registration.
pub struct IndexedHandler {
    pub def: HandlerDefinition,
    pub embedding: Vec<f32>,
    /// Whole-word keyword matchers with their boosts.
    pub keywords: Vec<(Regex, f32)>,
    /// Compiled `regex`-kind patterns with their boosts.
    pub regexes: Vec<(Regex, f32)>,
    /// Lowercased `prefix`-kind values with their boosts.
    pub prefixes: Vec<(String, f32)>,
}

impl IndexedHandler {
    fn build(def: HandlerDefinition, embedding: Vec<f32>) -> Result<Self> {
        let mut keywords = Vec::new();
        let mut regexes = Vec::new();
        let mut prefixes = Vec::new();

        for p in &def.patterns {
            match p.kind {
                PatternKind::Keyword => {
                    let pattern =
                        format!(r"(?i)\b{}\b", regex::escape(&p.value.to_lowercase()));
                    let re = Regex::new(&pattern).map_err(|e| {
                        Error::InvalidInput(format!("keyword '{}': {e}", p.value))
                    })?;
                    keywords.push((re, p.boost));
                }
                PatternKind::Regex => {
                    let re = Regex::new(&p.value).map_err(|e| {
                        Error::InvalidInput(format!("regex '{}': {e}", p.value))
                    })?;
                    regexes.push((re, p.boost));
                }
                PatternKind::Prefix => prefixes.push((p.value.to_lowercase(), p.boost)),
                // Semantic patterns only join the embedding text.
                PatternKind::Semantic => {}
            }
        }

        Ok(Self {
            def,
            embedding,
            keywords,
            regexes,
            prefixes,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Inner {
    by_id: HashMap<Uuid, Arc<IndexedHandler>>,
    by_name: HashMap<String, Uuid>,
}

/// Single-writer, many-reader handler catalog.
#[derive(Default)]
pub struct HandlerRegistry {
    inner: RwLock<Inner>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler: validate, embed its description text, build
    /// indices, and insert. Duplicate names are rejected.
    pub async fn register(
        &self,
        def: HandlerDefinition,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Uuid> {
        def.validate()?;

        let name_key = def.name.to_lowercase();
        if self.inner.read().by_name.contains_key(&name_key) {
            return Err(Error::InvalidInput(format!(
                "handler '{}' is already registered",
                def.name
            )));
        }

        // Embed outside the lock; the duplicate check repeats under the
        // write lock to close the race with a concurrent writer.
        let embedding = embedder.embed(&def.embedding_text()).await?;

        let id = def.id;
        let patterns = def.patterns.len();
        let slots = def.slots.len();
        let name = def.name.clone();
        let indexed = Arc::new(IndexedHandler::build(def, embedding)?);

        let mut inner = self.inner.write();
        if inner.by_name.contains_key(&name_key) {
            return Err(Error::InvalidInput(format!(
                "handler '{name}' is already registered"
            )));
        }
        inner.by_name.insert(name_key, id);
        inner.by_id.insert(id, indexed);
        drop(inner);

        TraceEvent::HandlerRegistered {
            handler_id: id.to_string(),
            name,
            patterns,
            slots,
        }
        .emit();

        Ok(id)
    }

    pub fn remove(&self, id: &Uuid) -> bool {
        let mut inner = self.inner.write();
        if let Some(handler) = inner.by_id.remove(id) {
            inner.by_name.remove(&handler.def.name.to_lowercase());
            true
        } else {
            false
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<IndexedHandler>> {
        self.inner.read().by_id.get(id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<IndexedHandler>> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(&name.to_lowercase())
            .and_then(|id| inner.by_id.get(id))
            .cloned()
    }

    pub fn all(&self) -> Vec<Arc<IndexedHandler>> {
        self.inner.read().by_id.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_id.is_empty()
    }
}
