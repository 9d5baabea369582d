//! Property and behavior tests for the in-memory adapter.

mod common;

use std::sync::Arc;

use ohlcv_rag::{
    AdapterContext, Document, ErrorKind, FilterExpression, InMemoryAdapter, Metadata,
    VectorStoreAdapter,
};
use proptest::prelude::*;
use serde_json::json;

use common::{MisreportingEmbedder, hashing, ids, market_documents};

fn store() -> InMemoryAdapter {
    InMemoryAdapter::new(AdapterContext::new("test", hashing()))
}

/// Documents with a unique `docN` token each, so no two embed identically.
fn arb_documents() -> impl Strategy<Value = Vec<Document>> {
    proptest::collection::vec("[a-z]{3,8}( [a-z]{3,8}){0,5}", 1..15).prop_map(|texts| {
        texts
            .into_iter()
            .enumerate()
            .map(|(i, words)| {
                Document::new(format!("doc{i} {words}"))
                    .with_field("ticker", if i % 2 == 0 { "AAPL" } else { "MSFT" })
            })
            .collect()
    })
}

/// Search results are sorted by descending similarity, bounded by `n`,
/// and every score lies in `[0, 1]`.
mod prop_inmemory_search_ordering {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn results_ordered_descending_and_bounded(
            documents in arb_documents(),
            query in "[a-z]{3,8}( [a-z]{3,8}){0,3}",
            n in 1usize..20,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let results = rt.block_on(async {
                let store = store();
                store.add_documents(&documents, None).await.unwrap();
                store.search(&query, n, None).await.unwrap()
            });

            prop_assert!(results.len() <= n);
            prop_assert!(results.len() <= documents.len());
            for window in results.windows(2) {
                prop_assert!(window[0].score >= window[1].score);
            }
            for result in &results {
                prop_assert!((0.0..=1.0).contains(&result.score));
            }
        }

        #[test]
        fn first_document_round_trips(documents in arb_documents()) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (ids, results) = rt.block_on(async {
                let store = store();
                let ids = store.add_documents(&documents, None).await.unwrap();
                let results = store.search(&documents[0].text, 1, None).await.unwrap();
                (ids, results)
            });

            prop_assert_eq!(results.len(), 1);
            prop_assert_eq!(&results[0].id, &ids[0]);
            prop_assert!(results[0].score >= 0.95);
        }

        #[test]
        fn ticker_filter_only_returns_matches(documents in arb_documents(), n in 1usize..10) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let filter = FilterExpression::new().eq("ticker", "AAPL").unwrap();
            let results = rt.block_on(async {
                let store = store();
                store.add_documents(&documents, None).await.unwrap();
                store.search("doc0", n, Some(&filter)).await.unwrap()
            });

            for result in &results {
                prop_assert_eq!(result.metadata_str("ticker"), Some("AAPL"));
            }
        }
    }
}

#[tokio::test]
async fn caller_ids_are_kept_and_replaced_on_conflict() {
    let store = store();
    let ids = ids(&["w1", "w2"]);
    let returned = store
        .add_documents(&[Document::new("AAPL uptrend"), Document::new("MSFT flat")], Some(&ids))
        .await
        .unwrap();
    assert_eq!(returned, ids);

    store.add_documents(&[Document::new("AAPL reversal")], Some(&ids[..1])).await.unwrap();
    assert_eq!(store.get_document_count().await.unwrap(), 2);
    let docs = store.get_documents(&ids[..1]).await.unwrap();
    assert_eq!(docs[0].text, "AAPL reversal");
}

#[tokio::test]
async fn update_metadata_only_keeps_text() {
    let store = store();
    let ids = store.add_documents(&market_documents(), None).await.unwrap();
    let metadata: Metadata =
        serde_json::from_value(json!({"ticker": "AAPL", "trend": "up"})).unwrap();

    store.update_documents(&ids[1..2], None, Some(&[metadata.clone()])).await.unwrap();

    let doc = &store.get_documents(&ids[1..2]).await.unwrap()[0];
    assert_eq!(doc.text, "AAPL sideways consolidation ranging flat");
    assert_eq!(doc.metadata, metadata);
}

#[tokio::test]
async fn update_text_reembeds() {
    let store = store();
    let ids = store.add_documents(&[Document::new("alpha beta")], None).await.unwrap();
    store.update_documents(&ids, Some(&["gamma delta".to_string()]), None).await.unwrap();

    let results = store.search("gamma delta", 1, None).await.unwrap();
    assert_eq!(results[0].id, ids[0]);
    assert!(results[0].score > 0.99);
}

#[tokio::test]
async fn update_unknown_id_fails_without_partial_writes() {
    let store = store();
    let ids = store.add_documents(&[Document::new("alpha")], None).await.unwrap();
    let err = store
        .update_documents(
            &[ids[0].clone(), "missing".to_string()],
            Some(&["beta".to_string(), "gamma".to_string()]),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Operation);
    assert_eq!(store.get_documents(&ids).await.unwrap()[0].text, "alpha");
}

#[tokio::test]
async fn mismatched_update_lengths_are_config_errors() {
    let store = store();
    let err = store
        .update_documents(&ids(&["a", "b"]), Some(&["x".to_string()]), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn delete_ignores_unknown_ids() {
    let store = store();
    let ids = store.add_documents(&market_documents(), None).await.unwrap();
    store.delete_documents(&[ids[0].clone(), "missing".to_string()]).await.unwrap();
    assert_eq!(store.get_document_count().await.unwrap(), 4);
    assert!(store.get_documents(&ids[..1]).await.unwrap().is_empty());
}

#[tokio::test]
async fn clear_is_idempotent() {
    let store = store();
    store.add_documents(&market_documents(), None).await.unwrap();
    store.clear_collection().await.unwrap();
    assert_eq!(store.get_document_count().await.unwrap(), 0);
    store.clear_collection().await.unwrap();
    assert_eq!(store.get_document_count().await.unwrap(), 0);
}

#[tokio::test]
async fn zero_results_requested_is_a_config_error() {
    let err = store().search("AAPL", 0, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn dimension_mismatch_is_an_operation_error() {
    let store = InMemoryAdapter::new(AdapterContext::new("test", Arc::new(MisreportingEmbedder)));
    let err = store.add_documents(&[Document::new("AAPL")], None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Operation);
    assert!(err.to_string().contains("dimension mismatch"));
}

#[tokio::test]
async fn not_persistent() {
    let store = store();
    let info = store.adapter_info();
    assert!(!info.capabilities.persistent);
    assert!(!info.capabilities.requires_server);
    assert_eq!(info.embedding_model, "hashing-bow-384");
    assert_eq!(store.persist().await.unwrap_err().kind(), ErrorKind::Capability);
}

#[tokio::test]
async fn score_threshold_search_drops_weak_matches() {
    let store = store();
    store.add_documents(&market_documents(), None).await.unwrap();
    let results = store
        .similarity_search_with_score(
            "AAPL strong uptrend bullish momentum higher highs",
            5,
            None,
            0.9,
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].score >= 0.9);
}

#[tokio::test]
async fn batch_add_chunks_sequentially() {
    let store = store();
    let documents: Vec<Document> =
        (0..25).map(|i| Document::new(format!("window {i}"))).collect();
    let ids = store.batch_add_documents(&documents, 10).await.unwrap();
    assert_eq!(ids.len(), 25);
    assert_eq!(store.get_document_count().await.unwrap(), 25);
    assert_eq!(
        store.batch_add_documents(&documents, 0).await.unwrap_err().kind(),
        ErrorKind::Configuration
    );
}
