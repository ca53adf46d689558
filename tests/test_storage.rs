use std::sync::Arc;
use tempfile::TempDir;

use threadlens::{
    BatchAnalysis, JobPhase, JobState, RankedItem, Report, ResultAggregator, SqliteStorage,
    Storage, Thread, ThreadStatus,
};
use threadlens::types::{ContentItem, Message, Role};

async fn setup_file_storage() -> (Arc<SqliteStorage>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let storage = Arc::new(SqliteStorage::new(&db_path).await.unwrap());
    (storage, temp_dir)
}

fn thread(id: &str, text: &str) -> Thread {
    Thread::new(
        id,
        ThreadStatus::Active,
        vec![Message {
            role: Role::User,
            timestamp: Some("2024-03-01T09:00:00".to_string()),
            content: vec![ContentItem::text(text)],
        }],
    )
}

#[tokio::test]
async fn test_threads_round_trip_in_order() {
    let (storage, _dir) = setup_file_storage().await;

    let threads = vec![thread("b", "second"), thread("a", "first"), thread("c", "third")];
    storage.save_threads("s1", &threads).await.unwrap();

    let loaded = storage.load_threads("s1").await.unwrap();
    let ids: Vec<&str> = loaded.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a", "c"]);
    assert_eq!(loaded[1].messages[0].flattened_text(), "first");

    let single = storage.load_thread("s1", "c").await.unwrap().unwrap();
    assert_eq!(single.id, "c");
    assert!(storage.load_thread("s1", "zzz").await.unwrap().is_none());
    assert!(storage.load_thread("other", "a").await.unwrap().is_none());
}

#[tokio::test]
async fn test_resave_preserves_analyzed_flag() {
    let (storage, _dir) = setup_file_storage().await;

    storage
        .save_threads("s1", &[thread("a", "v1"), thread("b", "v1")])
        .await
        .unwrap();
    storage
        .mark_analyzed("s1", &["a".to_string()])
        .await
        .unwrap();

    // extracting again with updated content must not reset the flag
    storage
        .save_threads("s1", &[thread("a", "v2"), thread("b", "v2"), thread("c", "v1")])
        .await
        .unwrap();

    let (total, analyzed) = storage.count_threads("s1").await.unwrap();
    assert_eq!((total, analyzed), (3, 1));

    let pending = storage.load_unanalyzed_threads("s1").await.unwrap();
    let ids: Vec<&str> = pending.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "c"]);

    let reloaded = storage.load_thread("s1", "a").await.unwrap().unwrap();
    assert_eq!(reloaded.messages[0].flattened_text(), "v2");
}

#[tokio::test]
async fn test_list_threads_paginates() {
    let (storage, _dir) = setup_file_storage().await;

    let threads: Vec<Thread> = (0..5)
        .map(|i| thread(&format!("t{}", i), "body"))
        .collect();
    storage.save_threads("s1", &threads).await.unwrap();
    storage.mark_analyzed("s1", &["t1".to_string()]).await.unwrap();

    let page = storage.list_threads("s1", 1, 2).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].id, "t1");
    assert!(page[0].analyzed);
    assert_eq!(page[1].id, "t2");
    assert!(!page[1].analyzed);
    assert_eq!(page[0].message_count, 1);
    assert_eq!(page[0].preview, "body");
}

#[tokio::test]
async fn test_job_state_upserts() {
    let (storage, _dir) = setup_file_storage().await;

    assert!(storage.load_job_state("s1").await.unwrap().is_none());

    let mut state = JobState::new("s1");
    state.total_threads = 7;
    storage.save_job_state(&state).await.unwrap();

    state.phase = JobPhase::Analyzing;
    state.analyzed_count = 3;
    state.partials.push(BatchAnalysis {
        batch_index: 0,
        thread_ids: vec!["t0".to_string()],
        key_insights: vec![RankedItem::new("an insight")],
        ..Default::default()
    });
    storage.save_job_state(&state).await.unwrap();

    let loaded = storage.load_job_state("s1").await.unwrap().unwrap();
    assert_eq!(loaded.phase, JobPhase::Analyzing);
    assert_eq!(loaded.analyzed_count, 3);
    assert_eq!(loaded.total_threads, 7);
    assert_eq!(loaded.partials.len(), 1);
    assert_eq!(loaded.partials[0].key_insights[0].text, "an insight");
}

#[tokio::test]
async fn test_report_round_trip() {
    let (storage, _dir) = setup_file_storage().await;

    assert!(storage.load_report("s1").await.unwrap().is_none());

    let partial = BatchAnalysis {
        batch_index: 0,
        thread_ids: vec!["t0".to_string(), "t1".to_string()],
        key_insights: vec![RankedItem::new("insight")],
        quality_score: Some(8.0),
        ..Default::default()
    };
    let report: Report = ResultAggregator::aggregate(&[partial]);
    storage.save_report("s1", &report).await.unwrap();

    let loaded = storage.load_report("s1").await.unwrap().unwrap();
    assert_eq!(loaded.threads_analyzed, 2);
    assert_eq!(loaded.quality_score, Some(8.0));
    assert_eq!(loaded.key_insights[0].text, "insight");

    // overwriting replaces the stored report
    let bigger = ResultAggregator::aggregate(&[loaded.as_partial(), BatchAnalysis {
        batch_index: 1,
        thread_ids: vec!["t2".to_string()],
        ..Default::default()
    }]);
    storage.save_report("s1", &bigger).await.unwrap();
    let loaded = storage.load_report("s1").await.unwrap().unwrap();
    assert_eq!(loaded.threads_analyzed, 3);
}
