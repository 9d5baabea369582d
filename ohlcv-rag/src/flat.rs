//! Exact flat-index vector store with optional on-disk snapshots.
//!
//! [`FlatIndexAdapter`] keeps L2-normalized vectors in a dense slot array
//! and scores them by inner product. Like append-only ANN indexes it has
//! no native delete or in-place update:
//!
//! - delete rebuilds the slot array without the removed ids,
//! - update is emulated as delete followed by reinsert,
//! - filters are applied as a post-filter over the exhaustive scan.
//!
//! When `persist_directory` is set, the whole index (vectors, id↔slot
//! mapping, model identity) is written to `<collection>.flat.json` after
//! every write and reloaded on open. A write is applied to a copy of the
//! index and only becomes visible once its snapshot is on disk.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::document::{Document, IndexedDocument, Metadata, SearchResult, sort_by_score};
use crate::embedding::{EmbeddingProvider, normalize};
use crate::error::{RagError, Result};
use crate::filter::FilterExpression;
use crate::similarity::{DistanceMetric, inner_product, to_similarity};
use crate::vectorstore::{
    AdapterContext, AdapterInfo, Capabilities, Scale, StoreInfo, VectorStoreAdapter, check_limit,
    check_update_lengths, embed_query, embed_texts, resolve_ids,
};

const BACKEND: &str = "flat";

/// Registered descriptor. `persistent` assumes a `persist_directory`.
pub const STORE_INFO: StoreInfo = StoreInfo {
    name: "Flat index",
    distance_metric: DistanceMetric::InnerProduct,
    capabilities: Capabilities {
        requires_server: false,
        persistent: true,
        supports_filtering: true,
        supports_updates: false,
    },
    scale: Scale::Medium,
};

/// Configuration for [`FlatIndexAdapter`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlatIndexConfig {
    /// Directory for index snapshots. `None` keeps the index in memory only.
    #[serde(default)]
    pub persist_directory: Option<PathBuf>,
}

impl FlatIndexConfig {
    /// Persist snapshots under `dir`.
    pub fn persistent(dir: impl Into<PathBuf>) -> Self {
        Self { persist_directory: Some(dir.into()) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SlotEntry {
    id: String,
    text: String,
    metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FlatIndex {
    embedding_model: String,
    dimensions: usize,
    vectors: Vec<Vec<f32>>,
    entries: Vec<SlotEntry>,
    #[serde(skip)]
    id_to_slot: HashMap<String, usize>,
}

impl FlatIndex {
    fn empty(embedding_model: &str, dimensions: usize) -> Self {
        Self {
            embedding_model: embedding_model.to_string(),
            dimensions,
            vectors: Vec::new(),
            entries: Vec::new(),
            id_to_slot: HashMap::new(),
        }
    }

    fn reindex(&mut self) {
        self.id_to_slot =
            self.entries.iter().enumerate().map(|(slot, e)| (e.id.clone(), slot)).collect();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Append `entry`, or overwrite its slot if the id is already present.
    fn upsert(&mut self, entry: SlotEntry, mut vector: Vec<f32>) {
        normalize(&mut vector);
        if let Some(&slot) = self.id_to_slot.get(&entry.id) {
            self.entries[slot] = entry;
            self.vectors[slot] = vector;
            return;
        }
        self.id_to_slot.insert(entry.id.clone(), self.entries.len());
        self.entries.push(entry);
        self.vectors.push(vector);
    }

    /// Rebuild the slot arrays without `ids`. Returns how many were removed.
    fn rebuild_without(&mut self, ids: &HashSet<&str>) -> usize {
        if !self.entries.iter().any(|e| ids.contains(e.id.as_str())) {
            return 0;
        }
        let before = self.entries.len();
        let entries = std::mem::take(&mut self.entries);
        let vectors = std::mem::take(&mut self.vectors);
        for (entry, vector) in entries.into_iter().zip(vectors) {
            if !ids.contains(entry.id.as_str()) {
                self.entries.push(entry);
                self.vectors.push(vector);
            }
        }
        self.reindex();
        before - self.entries.len()
    }

    fn search(
        &self,
        query: &[f32],
        n: usize,
        filter: Option<&FilterExpression>,
    ) -> Vec<SearchResult> {
        let mut query = query.to_vec();
        normalize(&mut query);

        let mut hits: Vec<SearchResult> = self
            .entries
            .iter()
            .zip(&self.vectors)
            .filter(|(entry, _)| filter.is_none_or(|f| f.matches(&entry.metadata)))
            .map(|(entry, vector)| {
                let raw = inner_product(vector, &query);
                SearchResult::new(
                    entry.id.clone(),
                    entry.text.clone(),
                    entry.metadata.clone(),
                    to_similarity(DistanceMetric::InnerProduct, raw),
                )
            })
            .collect();
        sort_by_score(&mut hits);
        hits.truncate(n);
        hits
    }
}

/// An embedded exact-search adapter with rebuild-style deletes.
///
/// Writers are serialized through a `tokio::sync::Mutex`: delete and
/// update rebuild the slot arrays and must not interleave.
pub struct FlatIndexAdapter {
    collection_name: String,
    embedder: Arc<dyn EmbeddingProvider>,
    dimensions: usize,
    snapshot_path: Option<PathBuf>,
    index: Mutex<FlatIndex>,
}

impl FlatIndexAdapter {
    /// Create an in-memory flat index.
    pub fn new(context: AdapterContext) -> Self {
        let dimensions = context.embedder.dimensions();
        let index = FlatIndex::empty(context.embedder.model_name(), dimensions);
        Self {
            collection_name: context.collection_name,
            embedder: context.embedder,
            dimensions,
            snapshot_path: None,
            index: Mutex::new(index),
        }
    }

    /// Open a flat index, loading an existing snapshot if one is present.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the snapshot was written with
    /// a different embedding model or dimension, and
    /// [`RagError::OperationError`] if it cannot be read.
    pub async fn open(context: AdapterContext, config: FlatIndexConfig) -> Result<Self> {
        let Some(dir) = config.persist_directory else {
            return Ok(Self::new(context));
        };

        let mut adapter = Self::new(context);
        let path = dir.join(format!("{}.flat.json", sanitize_file_stem(&adapter.collection_name)?));

        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| RagError::operation("open", BACKEND, e))?;
        if exists {
            let index = load_snapshot(&path).await?;
            let model = adapter.embedder.model_name();
            if index.embedding_model != model || index.dimensions != adapter.dimensions {
                return Err(RagError::ConfigError(format!(
                    "collection '{}' was indexed with model '{}' ({} dims), not '{}' ({} dims)",
                    adapter.collection_name,
                    index.embedding_model,
                    index.dimensions,
                    model,
                    adapter.dimensions
                )));
            }
            info!(
                collection = %adapter.collection_name,
                count = index.len(),
                path = %path.display(),
                "loaded flat index snapshot"
            );
            adapter.index = Mutex::new(index);
        } else {
            info!(
                collection = %adapter.collection_name,
                path = %path.display(),
                "created flat index"
            );
        }

        adapter.snapshot_path = Some(path);
        Ok(adapter)
    }

    /// Apply `change` to a copy of the index, write the copy's snapshot,
    /// then swap it in. On any error the live index is left untouched.
    async fn commit<T>(
        &self,
        operation: &str,
        change: impl FnOnce(&mut FlatIndex) -> Result<T>,
    ) -> Result<T> {
        let mut index = self.index.lock().await;
        let mut next = index.clone();
        let outcome = change(&mut next)?;
        self.save(&next, operation).await?;
        *index = next;
        Ok(outcome)
    }

    async fn save(&self, index: &FlatIndex, operation: &str) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        write_snapshot(path, index).await.map_err(|e| e.in_operation(operation, BACKEND))?;
        debug!(
            collection = %self.collection_name,
            count = index.len(),
            "wrote flat index snapshot"
        );
        Ok(())
    }
}

fn sanitize_file_stem(name: &str) -> Result<String> {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if sanitized.is_empty() {
        return Err(RagError::ConfigError("collection name must not be empty".to_string()));
    }
    Ok(sanitized)
}

async fn load_snapshot(path: &Path) -> Result<FlatIndex> {
    let bytes = tokio::fs::read(path).await.map_err(|e| RagError::operation("open", BACKEND, e))?;
    let mut index: FlatIndex = serde_json::from_slice(&bytes).map_err(|e| {
        RagError::operation("open", BACKEND, format!("corrupt snapshot {}: {e}", path.display()))
    })?;
    if index.vectors.len() != index.entries.len() {
        return Err(RagError::operation(
            "open",
            BACKEND,
            format!("corrupt snapshot {}: slot arrays differ in length", path.display()),
        ));
    }
    index.reindex();
    Ok(index)
}

async fn write_snapshot(path: &Path, index: &FlatIndex) -> Result<()> {
    let io_err = |e: std::io::Error| RagError::operation("persist", BACKEND, e);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let bytes =
        serde_json::to_vec(index).map_err(|e| RagError::operation("persist", BACKEND, e))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    Ok(())
}

#[async_trait]
impl VectorStoreAdapter for FlatIndexAdapter {
    async fn add_documents(
        &self,
        documents: &[Document],
        ids: Option<&[String]>,
    ) -> Result<Vec<String>> {
        let ids = resolve_ids(documents.len(), ids)?;
        if documents.is_empty() {
            return Ok(ids);
        }

        let texts: Vec<&str> = documents.iter().map(|d| d.text.as_str()).collect();
        let embeddings =
            embed_texts(self.embedder.as_ref(), &texts, self.dimensions, "add_documents", BACKEND)
                .await?;

        self.commit("add_documents", |index| {
            for ((id, document), embedding) in ids.iter().zip(documents).zip(embeddings) {
                let entry = SlotEntry {
                    id: id.clone(),
                    text: document.text.clone(),
                    metadata: document.metadata.clone(),
                };
                index.upsert(entry, embedding);
            }
            Ok(())
        })
        .await?;

        debug!(collection = %self.collection_name, count = ids.len(), "added documents");
        Ok(ids)
    }

    async fn search(
        &self,
        query: &str,
        n: usize,
        filter: Option<&FilterExpression>,
    ) -> Result<Vec<SearchResult>> {
        check_limit(n)?;
        let embedding = embed_query(self.embedder.as_ref(), query, self.dimensions, BACKEND).await?;
        let index = self.index.lock().await;
        Ok(index.search(&embedding, n, filter))
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<()> {
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let present = {
            let index = self.index.lock().await;
            ids.iter().any(|id| index.id_to_slot.contains_key(id))
        };
        let removed = if present {
            self.commit("delete_documents", |index| Ok(index.rebuild_without(&doomed))).await?
        } else {
            0
        };
        debug!(collection = %self.collection_name, removed, "rebuilt flat index after delete");
        Ok(())
    }

    async fn update_documents(
        &self,
        ids: &[String],
        documents: Option<&[String]>,
        metadatas: Option<&[Metadata]>,
    ) -> Result<()> {
        check_update_lengths(ids, documents, metadatas)?;

        let embeddings = match documents {
            Some(documents) => {
                let texts: Vec<&str> = documents.iter().map(String::as_str).collect();
                Some(
                    embed_texts(
                        self.embedder.as_ref(),
                        &texts,
                        self.dimensions,
                        "update_documents",
                        BACKEND,
                    )
                    .await?,
                )
            }
            None => None,
        };

        self.commit("update_documents", |index| {
            // Copy the current entries, then delete and reinsert them.
            let mut replacements = Vec::with_capacity(ids.len());
            for (i, id) in ids.iter().enumerate() {
                let slot = *index.id_to_slot.get(id).ok_or_else(|| {
                    let message = format!("document '{id}' does not exist");
                    RagError::operation("update_documents", BACKEND, message)
                })?;
                let mut entry = index.entries[slot].clone();
                let mut vector = index.vectors[slot].clone();
                if let (Some(documents), Some(embeddings)) = (documents, &embeddings) {
                    entry.text = documents[i].clone();
                    vector = embeddings[i].clone();
                }
                if let Some(metadatas) = metadatas {
                    entry.metadata = metadatas[i].clone();
                }
                replacements.push((entry, vector));
            }

            let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
            index.rebuild_without(&doomed);
            for (entry, vector) in replacements {
                index.upsert(entry, vector);
            }
            Ok(())
        })
        .await
    }

    async fn get_documents(&self, ids: &[String]) -> Result<Vec<IndexedDocument>> {
        let index = self.index.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| index.id_to_slot.get(id).map(|slot| &index.entries[*slot]))
            .map(|e| IndexedDocument {
                id: e.id.clone(),
                text: e.text.clone(),
                metadata: e.metadata.clone(),
            })
            .collect())
    }

    async fn get_document_count(&self) -> Result<usize> {
        Ok(self.index.lock().await.len())
    }

    async fn clear_collection(&self) -> Result<()> {
        let empty = FlatIndex::empty(self.embedder.model_name(), self.dimensions);
        self.commit("clear_collection", |index| {
            *index = empty;
            Ok(())
        })
        .await?;
        info!(collection = %self.collection_name, "cleared flat index");
        Ok(())
    }

    fn adapter_info(&self) -> AdapterInfo {
        AdapterInfo {
            name: STORE_INFO.name.to_string(),
            store_type: BACKEND.to_string(),
            collection_name: self.collection_name.clone(),
            embedding_model: self.embedder.model_name().to_string(),
            embedding_dimension: self.dimensions,
            distance_metric: STORE_INFO.distance_metric,
            capabilities: Capabilities {
                persistent: self.snapshot_path.is_some(),
                ..STORE_INFO.capabilities
            },
        }
    }

    async fn persist(&self) -> Result<()> {
        if self.snapshot_path.is_none() {
            return Err(RagError::capability(
                "persist",
                BACKEND,
                "no persist_directory configured",
            ));
        }
        let index = self.index.lock().await;
        self.save(&index, "persist").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> SlotEntry {
        SlotEntry { id: id.to_string(), text: id.to_string(), metadata: Metadata::new() }
    }

    #[test]
    fn rebuild_compacts_slots_and_remaps_ids() {
        let mut index = FlatIndex::empty("m", 2);
        index.upsert(entry("a"), vec![1.0, 0.0]);
        index.upsert(entry("b"), vec![0.0, 1.0]);
        index.upsert(entry("c"), vec![1.0, 1.0]);

        let removed = index.rebuild_without(&HashSet::from(["b"]));
        assert_eq!(removed, 1);
        assert_eq!(index.len(), 2);
        assert_eq!(index.id_to_slot["a"], 0);
        assert_eq!(index.id_to_slot["c"], 1);
        assert!(!index.id_to_slot.contains_key("b"));
        assert_eq!(index.vectors.len(), 2);
    }

    #[test]
    fn rebuild_without_unknown_ids_is_a_no_op() {
        let mut index = FlatIndex::empty("m", 2);
        index.upsert(entry("a"), vec![1.0, 0.0]);
        assert_eq!(index.rebuild_without(&HashSet::from(["zzz"])), 0);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn upsert_overwrites_existing_slot() {
        let mut index = FlatIndex::empty("m", 2);
        index.upsert(entry("a"), vec![1.0, 0.0]);
        index.upsert(entry("b"), vec![0.0, 1.0]);
        let mut replacement = entry("a");
        replacement.text = "replaced".to_string();
        index.upsert(replacement, vec![0.0, 2.0]);

        assert_eq!(index.len(), 2);
        assert_eq!(index.id_to_slot["a"], 0);
        assert_eq!(index.entries[0].text, "replaced");
        assert_eq!(index.vectors[0], vec![0.0, 1.0]);
    }

    #[test]
    fn search_scores_normalized_inner_product() {
        let mut index = FlatIndex::empty("m", 2);
        index.upsert(entry("x"), vec![3.0, 0.0]);
        index.upsert(entry("y"), vec![0.0, 2.0]);
        let hits = index.search(&[1.0, 0.0], 2, None);
        assert_eq!(hits[0].id, "x");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].score, 0.0);
    }

    #[test]
    fn sanitize_rejects_empty_names() {
        assert!(sanitize_file_stem("").is_err());
        assert_eq!(sanitize_file_stem("ohlcv/data").unwrap(), "ohlcv_data");
    }
}
