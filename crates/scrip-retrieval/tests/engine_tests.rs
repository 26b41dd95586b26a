use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;

use scrip_core::config::SearchSettings;
use scrip_core::deadline::{CancelToken, Deadline};
use scrip_core::error::{CatalogLoadError, Error};
use scrip_core::predicate::{FilterValue, Predicate, SupportRequirement};
use scrip_core::traits::Embedder;
use scrip_core::types::{Metadata, Record, SupportType};
use scrip_embed::FakeEmbedder;
use scrip_retrieval::{format, RetrievalEngine, RetrievalRequest, RetrievalResponse, ToolSurface};
use scrip_vector::{CatalogStore, DEFAULT_BATCH_SIZE, METADATA_FILE};

use SupportType::{Card, Mobile, Paper};

fn program(name: &str, major: &str, minor: &str, supported: &[SupportType], unsupported: &[SupportType]) -> Record {
    let metadata = Metadata {
        name: name.into(),
        region_major: major.into(),
        region_minor: minor.into(),
        supported: supported.iter().copied().collect(),
        unsupported: unsupported.iter().copied().collect(),
        detail_link: format!("http://example.test/{name}"),
        ..Default::default()
    };
    let labels = metadata.supported.labels().join(" ");
    Record::new(format!("{name} {major} {minor} {labels}"), metadata)
}

fn catalog() -> Vec<Record> {
    vec![
        program("수원사랑상품권", "경기", "수원시", &[Mobile], &[Card, Paper]),
        program("용인와이페이", "경기", "용인시", &[Mobile, Card], &[Paper]),
        program("경기지역화폐", "경기", "", &[Card], &[]),
        program("온누리상품권", "서울", "", &[Mobile, Card, Paper], &[]),
        program("동백전", "부산", "", &[Card], &[Mobile]),
        program("여민전", "세종", "", &[Mobile, Paper], &[]),
        program("대전사랑카드", "대전", "", &[Card, Mobile], &[]),
        program("탐나는전", "제주", "", &[Paper], &[]),
    ]
}

fn embedder() -> Arc<dyn Embedder> {
    Arc::new(FakeEmbedder::new(256))
}

fn engine_with(records: Vec<Record>) -> Result<RetrievalEngine> {
    Ok(RetrievalEngine::from_records(records, embedder(), SearchSettings::default(), DEFAULT_BATCH_SIZE)?)
}

fn names(results: &[scrip_core::SearchResult]) -> Vec<String> {
    results.iter().map(|r| r.record.metadata.name.clone()).collect()
}

#[test]
fn semantic_results_are_ranked_and_bounded() -> Result<()> {
    let engine = engine_with(catalog())?;
    for k in [1, 3, 8, 20] {
        let results = engine.semantic_search("경기 모바일 상품권", k, None, &Deadline::none())?;
        assert!(results.len() <= k);
        assert_eq!(results.len(), k.min(8));
        assert!(results.iter().enumerate().all(|(i, r)| r.rank == i + 1));
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(results.iter().all(|r| (-1.0..=1.0001).contains(&r.score)));
    }
    Ok(())
}

#[test]
fn self_query_scores_at_least_as_high_as_anything_else() -> Result<()> {
    let records = catalog();
    let engine = engine_with(records.clone())?;
    for record in &records {
        let results = engine.semantic_search(&record.content, records.len(), None, &Deadline::none())?;
        let own = results
            .iter()
            .find(|r| r.record.metadata.name == record.metadata.name)
            .expect("record retrieves itself");
        assert!(results.iter().all(|r| own.score >= r.score - 1e-6));
    }
    Ok(())
}

#[test]
fn filtered_semantic_search_never_pads_with_non_matches() -> Result<()> {
    let engine = engine_with(catalog())?;
    let only_busan = Predicate::new().with("region_major", FilterValue::text("부산"));
    let results = engine.semantic_search("경기 모바일", 5, Some(&only_busan), &Deadline::none())?;
    assert_eq!(names(&results), vec!["동백전"]);
    assert_eq!(results[0].rank, 1);

    let nobody = Predicate::new().with("region_major", FilterValue::text("평양"));
    assert!(engine.semantic_search("경기", 5, Some(&nobody), &Deadline::none())?.is_empty());
    Ok(())
}

/// Places record `i` (content `"i"`) at angle `i / 10` from the query, so
/// similarity falls strictly with the row number.
struct AngleEmbedder;

impl Embedder for AngleEmbedder {
    fn id(&self) -> &str { "angle" }
    fn dim(&self) -> usize { 2 }
    fn max_len(&self) -> usize { 16 }
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| match t.parse::<u16>() {
                Ok(i) => {
                    let angle = f32::from(i) * 0.1;
                    vec![angle.cos(), angle.sin()]
                }
                Err(_) => vec![1.0, 0.0],
            })
            .collect())
    }
}

#[test]
fn filtered_semantic_search_only_sees_the_oversampled_window() -> Result<()> {
    // Twelve records, best first; only the last one is in 제주.
    let records: Vec<Record> = (0..12u16)
        .map(|i| {
            let major = if i == 11 { "제주" } else { "경기" };
            let mut record = program(&format!("상품권{i}"), major, "", &[Mobile], &[]);
            record.content = i.to_string();
            record
        })
        .collect();
    let jeju = Predicate::new().with("region_major", FilterValue::text("제주"));
    let with_factor = |factor: usize| {
        let settings = SearchSettings { oversample_factor: factor, ..SearchSettings::default() };
        RetrievalEngine::from_records(records.clone(), Arc::new(AngleEmbedder), settings, DEFAULT_BATCH_SIZE)
    };

    let narrow = with_factor(5)?;
    let unfiltered = narrow.semantic_search("query", 12, None, &Deadline::none())?;
    assert_eq!(unfiltered.last().map(|r| r.record.metadata.name.as_str()), Some("상품권11"));
    // k = 1 looks at rows 0..5 only.
    assert!(narrow.semantic_search("query", 1, Some(&jeju), &Deadline::none())?.is_empty());
    // k = 3 widens the window to 15 rows, capped at the catalog size.
    let results = narrow.semantic_search("query", 3, Some(&jeju), &Deadline::none())?;
    assert_eq!(names(&results), vec!["상품권11"]);

    let wide = with_factor(12)?;
    let results = wide.semantic_search("query", 1, Some(&jeju), &Deadline::none())?;
    assert_eq!(names(&results), vec!["상품권11"]);
    assert_eq!(results[0].rank, 1);
    Ok(())
}

#[test]
fn support_search_excludes_by_the_supported_set() -> Result<()> {
    let engine = engine_with(catalog())?;
    let req = SupportRequirement::new(vec![Mobile], vec![Card]);
    let results = engine.support_type_search(&req, &Deadline::none())?;
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| !r.record.metadata.supported.contains(Card)));
    assert!(results.iter().all(|r| r.record.metadata.supported.contains(Mobile)));
    assert_eq!(names(&results), vec!["수원사랑상품권", "여민전"]);
    Ok(())
}

#[test]
fn region_search_matches_listing_subset_and_statistics() -> Result<()> {
    let engine = engine_with(catalog())?;
    let results = engine.region_search("경기", None, &Deadline::none())?;
    let expected: Vec<String> = engine
        .all_data()
        .into_iter()
        .filter(|r| r.record.metadata.region_major == "경기")
        .map(|r| r.record.metadata.name)
        .collect();
    assert_eq!(names(&results), expected);
    assert_eq!(Some(&results.len()), engine.statistics().region_counts.get("경기"));
    assert!(results.iter().all(|r| r.score == 1.0));
    Ok(())
}

#[test]
fn statistics_are_stable_between_rebuilds() -> Result<()> {
    let engine = engine_with(catalog())?;
    let first = engine.statistics();
    assert_eq!(first, engine.statistics());
    assert_eq!(first.total_count, 8);
    assert_eq!(first.support_counts.get("모바일"), Some(&5));

    engine.append(vec![program("인천e음", "인천", "", &[Card], &[])])?;
    let after = engine.statistics();
    assert_eq!(after.total_count, 9);
    assert_eq!(after.region_counts.get("인천"), Some(&1));
    Ok(())
}

#[test]
fn full_listing_renders_fifty_blocks_and_a_remainder() -> Result<()> {
    let records: Vec<Record> = (0..120)
        .map(|i| program(&format!("상품권{i:03}"), "경기", "", &[Mobile], &[]))
        .collect();
    let engine = engine_with(records)?;
    let all = engine.all_data();
    assert_eq!(all.len(), 120);

    let text = format::render_listing(&all, engine.settings().listing_cap);
    assert_eq!(text.matches("  - Details: ").count(), 50);
    assert!(text.trim_end().ends_with("... and 70 more"));
    assert_eq!(text.matches("... and").count(), 1);
    Ok(())
}

#[test]
fn suwon_region_search_end_to_end() -> Result<()> {
    let metadata = Metadata {
        name: "수원사랑상품권".into(),
        region_major: "경기".into(),
        region_minor: "수원시".into(),
        supported: [Mobile].into_iter().collect(),
        unsupported: [Card, Paper].into_iter().collect(),
        detail_link: "http://x".into(),
        ..Default::default()
    };
    let engine = engine_with(vec![Record::new("", metadata)])?;
    let request = RetrievalRequest::Region { region: "경기".into(), support_type: Some(Mobile) };

    let RetrievalResponse::Results(results) = engine.execute(&request, &Deadline::none())? else {
        panic!("region search returns results");
    };
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].rank, 1);
    assert_eq!(results[0].score, 1.0);
    assert_eq!(results[0].record.metadata.name, "수원사랑상품권");

    let response = RetrievalResponse::Results(results);
    let text = format::render(&request, &response, 50);
    assert!(text.starts_with("경기 (모바일 supported) programs (1):"));
    assert!(text.contains("1. 수원사랑상품권\n  - Region: 경기 수원시\n  - Supported: 모바일\n  - Unsupported: 카드형, 지류형\n  - Details: http://x\n"));
    Ok(())
}

#[test]
fn execute_dispatches_every_mode() -> Result<()> {
    let engine = engine_with(catalog())?;
    let none = Deadline::none();
    let count = |req: RetrievalRequest| -> Result<usize> {
        Ok(match engine.execute(&req, &none)? {
            RetrievalResponse::Results(r) => r.len(),
            RetrievalResponse::Statistics(s) => s.total_count,
        })
    };
    assert_eq!(count(RetrievalRequest::Semantic { query: "동백전".into(), k: Some(2), filter: None })?, 2);
    assert_eq!(count(RetrievalRequest::Semantic { query: "동백전".into(), k: None, filter: None })?, 8);
    assert_eq!(count(RetrievalRequest::FullListing)?, 8);
    assert_eq!(count(RetrievalRequest::Statistics)?, 8);
    let paper_only = Predicate::new().with("supported", FilterValue::text("paper"));
    assert_eq!(count(RetrievalRequest::MetadataFilter(paper_only))?, 3);
    Ok(())
}

#[test]
fn empty_catalog_answers_every_mode_with_nothing() -> Result<()> {
    let engine = engine_with(Vec::new())?;
    assert!(engine.semantic_search("anything", 10, None, &Deadline::none())?.is_empty());
    assert!(engine.region_search("경기", None, &Deadline::none())?.is_empty());
    assert!(engine.all_data().is_empty());
    assert_eq!(engine.statistics().total_count, 0);
    Ok(())
}

struct DownEmbedder;

impl Embedder for DownEmbedder {
    fn id(&self) -> &str { "down" }
    fn dim(&self) -> usize { 256 }
    fn max_len(&self) -> usize { 256 }
    fn embed_batch(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        anyhow::bail!("embedding service unreachable")
    }
}

#[test]
fn embedder_failure_is_an_error_not_an_empty_result() -> Result<()> {
    let records = catalog();
    let index = scrip_vector::embed_records(&records, &FakeEmbedder::new(256), 4)?;
    let engine = RetrievalEngine::new(
        scrip_vector::Catalog::new(records),
        index,
        Arc::new(DownEmbedder),
        SearchSettings::default(),
        None,
    );
    let err = engine.semantic_search("경기", 3, None, &Deadline::none()).expect_err("embedder down");
    assert!(matches!(err, Error::EmbeddingUnavailable(_)));

    let tools = ToolSurface::new(Arc::new(engine));
    assert!(tools.semantic_search("경기", Some(3)).starts_with("An error occurred during search:"));
    // Structured modes never touch the embedder.
    assert!(tools.region_search("경기", None).contains("수원사랑상품권"));
    Ok(())
}

#[test]
fn expired_or_cancelled_requests_stop() -> Result<()> {
    let engine = engine_with(catalog())?;
    let err = engine
        .semantic_search("경기", 3, None, &Deadline::after(Duration::ZERO))
        .expect_err("expired");
    assert!(matches!(err, Error::DeadlineExceeded));

    let token = CancelToken::new();
    token.cancel();
    let err = engine
        .region_search("경기", None, &Deadline::none().with_token(token))
        .expect_err("cancelled");
    assert!(matches!(err, Error::Cancelled));
    Ok(())
}

#[test]
fn persisted_engine_survives_reopen_and_rebuild() -> Result<()> {
    let dir = TempDir::new()?;
    let store = CatalogStore::new(dir.path());
    store.rebuild(catalog(), &FakeEmbedder::new(256))?;

    let engine = RetrievalEngine::open(CatalogStore::new(dir.path()), embedder(), SearchSettings::default())?;
    assert_eq!(engine.len(), 8);
    engine.rebuild(catalog().into_iter().take(3).collect())?;
    assert_eq!(engine.len(), 3);

    let reopened = RetrievalEngine::open(CatalogStore::new(dir.path()), embedder(), SearchSettings::default())?;
    assert_eq!(reopened.len(), 3);
    Ok(())
}

/// Remembers the largest batch it was asked to embed.
#[derive(Default)]
struct BatchWatcher {
    largest: AtomicUsize,
}

impl Embedder for BatchWatcher {
    fn id(&self) -> &str { "watcher" }
    fn dim(&self) -> usize { 8 }
    fn max_len(&self) -> usize { 256 }
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.largest.fetch_max(texts.len(), Ordering::SeqCst);
        FakeEmbedder::new(8).embed_batch(texts)
    }
}

#[test]
fn in_memory_writes_embed_in_the_configured_batch_size() -> Result<()> {
    let watcher = Arc::new(BatchWatcher::default());
    let engine = RetrievalEngine::from_records(catalog(), watcher.clone(), SearchSettings::default(), 3)?;
    assert_eq!(watcher.largest.load(Ordering::SeqCst), 3);

    watcher.largest.store(0, Ordering::SeqCst);
    engine.rebuild(catalog())?;
    assert_eq!(watcher.largest.load(Ordering::SeqCst), 3);

    watcher.largest.store(0, Ordering::SeqCst);
    engine.append(vec![program("인천e음", "인천", "", &[Card], &[])])?;
    assert_eq!(watcher.largest.load(Ordering::SeqCst), 3);
    assert_eq!(engine.len(), 9);

    let engine = engine.with_batch_size(5);
    watcher.largest.store(0, Ordering::SeqCst);
    engine.rebuild(catalog())?;
    assert_eq!(watcher.largest.load(Ordering::SeqCst), 5);
    Ok(())
}

#[test]
fn persisted_rebuilds_follow_the_store_batch_size() -> Result<()> {
    let dir = TempDir::new()?;
    let watcher = Arc::new(BatchWatcher::default());
    CatalogStore::new(dir.path()).rebuild(catalog(), watcher.as_ref())?;

    let store = CatalogStore::new(dir.path()).with_batch_size(2);
    let engine = RetrievalEngine::open(store, watcher.clone(), SearchSettings::default())?;
    watcher.largest.store(0, Ordering::SeqCst);
    engine.rebuild(catalog())?;
    assert_eq!(watcher.largest.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn opening_without_metadata_fails_loudly() -> Result<()> {
    let dir = TempDir::new()?;
    CatalogStore::new(dir.path()).rebuild(catalog(), &FakeEmbedder::new(256))?;
    std::fs::remove_file(dir.path().join(METADATA_FILE))?;

    let err = RetrievalEngine::open(CatalogStore::new(dir.path()), embedder(), SearchSettings::default())
        .err()
        .expect("load must fail");
    assert!(matches!(err, Error::CatalogLoad(CatalogLoadError::Incomplete { .. })));
    Ok(())
}

#[test]
fn readers_keep_their_snapshot_across_a_rebuild() -> Result<()> {
    let engine = Arc::new(engine_with(catalog())?);
    let before = engine.snapshot();

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.rebuild(vec![program("탐나는전", "제주", "", &[Paper], &[])]))
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.statistics().total_count)
        })
        .collect();

    writer.join().expect("writer thread")?;
    for r in readers {
        let total = r.join().expect("reader thread");
        assert!(total == 8 || total == 1);
    }
    assert_eq!(before.catalog.len(), 8);
    assert_eq!(engine.len(), 1);
    Ok(())
}

#[test]
fn tool_surface_renders_each_operation() -> Result<()> {
    let tools = ToolSurface::new(Arc::new(engine_with(catalog())?));
    assert!(tools.semantic_search("수원사랑상품권 경기", Some(2)).starts_with("'수원사랑상품권 경기' search results (2):"));
    assert!(tools.region_search("부산", Some("card")).contains("1. 동백전"));
    assert!(tools.region_search("부산", Some("coin")).starts_with("An error occurred"));
    assert!(tools.support_type_search(&["지류형"], &[]).starts_with("지류형 supported programs (3):"));
    assert!(tools.all_data().starts_with("All programs (8):"));
    assert!(tools.statistics().contains("Total programs: 8"));
    assert!(tools.metadata_filter_json(r#"{"region_major": ["서울", "세종"]}"#).starts_with("Filter results (2):"));
    assert!(tools.metadata_filter_json(r#"{"region_major": {"x": 1}}"#).starts_with("An error occurred during filtering"));
    Ok(())
}
