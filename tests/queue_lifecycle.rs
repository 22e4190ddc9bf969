mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeExtractor, FlakyStore, SlowRewriter};
use question_batch_queue::models::{
    BatchSubmission, JobFilters, JobStatus, PipelineOptions, UrlConfig, UrlStatus,
};
use question_batch_queue::services::ProgressStage;
use question_batch_queue::{AppError, Config};

fn url(name: &str) -> String {
    format!("https://site.test/prova/{}", name)
}

#[tokio::test]
async fn failed_url_is_recorded_and_batch_still_completes() {
    let h = common::start(
        common::test_config(),
        FakeExtractor::builder().fail(&url("b")),
    );
    let submission = BatchSubmission::new("u1", vec![url("a"), url("b"), url("c")]);
    let job_id = h.queue.submit_grouped(submission).await.unwrap();

    let record = h.wait_terminal(&job_id).await;
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.results.len(), 3);
    assert_eq!(record.results[0].status, UrlStatus::Success);
    assert_eq!(record.results[1].status, UrlStatus::Failed);
    assert!(record.results[1].error.is_some());
    assert_eq!(record.results[2].status, UrlStatus::Success);
    assert_eq!(record.progress.completed, 3);
    assert_eq!(record.progress.failed, 1);

    let view = h.queue.get_status(&job_id).await.unwrap().unwrap();
    assert_eq!(view.progress.percentage, 100);
    assert!(view.completed_at.is_some());
    assert!(view.current_url.is_none());

    let drafts = h.drafts.drafts.lock().unwrap();
    assert_eq!(drafts.len(), 2);
    for draft in drafts.values() {
        for item in &draft.items {
            assert!(item.comment.starts_with("reescrito:"));
            assert_eq!(item.category_tags, vec!["Clínica Médica".to_string()]);
        }
    }
}

#[tokio::test]
async fn cancel_stops_remaining_urls() {
    let mut h = common::start(
        common::test_config(),
        FakeExtractor::builder().hold(&url("b")),
    );
    let submission = BatchSubmission::new("u1", vec![url("a"), url("b"), url("c")]);
    let job_id = h.queue.submit_grouped(submission).await.unwrap();

    h.wait_started(&url("b")).await;
    h.queue.cancel(&job_id).await.unwrap();
    h.extractor.release();

    let record = h.wait_terminal(&job_id).await;
    assert_eq!(record.status, JobStatus::Cancelled);
    assert_eq!(record.results.len(), 1);
    assert_eq!(record.results[0].url, url("a"));
    assert_eq!(h.extractor.calls(), vec![url("a"), url("b")]);
    h.wait_mutex_free().await;
}

#[tokio::test]
async fn cancelling_a_queued_job_removes_it() {
    let config = Config {
        max_concurrent_jobs: 1,
        ..common::test_config()
    };
    let mut h = common::start(config, FakeExtractor::builder().hold(&url("a")));
    let ids = h
        .queue
        .submit_batch(BatchSubmission::new("u1", vec![url("a"), url("b")]))
        .await
        .unwrap();

    h.wait_started(&url("a")).await;
    h.queue.cancel(&ids[1]).await.unwrap();
    assert!(h.queue.get_status(&ids[1]).await.unwrap().is_none());

    h.extractor.release();
    assert_eq!(h.wait_terminal(&ids[0]).await.status, JobStatus::Completed);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.extractor.calls(), vec![url("a")]);
}

#[tokio::test]
async fn cancel_rejects_unknown_and_completed_jobs() {
    let h = common::start(common::test_config(), FakeExtractor::builder());
    let job_id = h
        .queue
        .submit_grouped(BatchSubmission::new("u1", vec![url("a")]))
        .await
        .unwrap();
    h.wait_terminal(&job_id).await;

    assert!(matches!(
        h.queue.cancel(&job_id).await,
        Err(AppError::InvalidState { reason, .. }) if reason == "cannot cancel completed job"
    ));
    assert!(matches!(
        h.queue.cancel("batch-0-nobody-0").await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn infrastructure_failure_is_retried_without_duplicate_results() {
    let h = common::start_with_store(
        common::test_config(),
        FakeExtractor::builder(),
        Arc::new(FlakyStore::failing_results(1)),
    );
    let job_id = h
        .queue
        .submit_grouped(BatchSubmission::new("u1", vec![url("a")]))
        .await
        .unwrap();

    let record = h.wait_terminal(&job_id).await;
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.attempts_made, 2);
    assert_eq!(record.results.len(), 1);
    assert_eq!(h.extractor.calls().len(), 2);
}

#[tokio::test]
async fn retries_stop_at_the_attempt_limit() {
    let h = common::start_with_store(
        common::test_config(),
        FakeExtractor::builder(),
        Arc::new(FlakyStore::failing_results(10)),
    );
    let submission = BatchSubmission::new("u1", vec![url("a")]).with_options(PipelineOptions {
        max_retries: Some(2),
        ..Default::default()
    });
    let job_id = h.queue.submit_grouped(submission).await.unwrap();

    let record = h.wait_terminal(&job_id).await;
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.attempts_made, 2);
    assert!(record
        .failed_reason
        .as_deref()
        .is_some_and(|r| r.contains("connection reset")));
}

#[tokio::test]
async fn cancelled_job_is_never_retried() {
    let mut h = common::start(
        common::test_config(),
        FakeExtractor::builder().hold(&url("a")),
    );
    let job_id = h
        .queue
        .submit_grouped(BatchSubmission::new("u1", vec![url("a")]))
        .await
        .unwrap();

    h.wait_started(&url("a")).await;
    h.queue.cancel(&job_id).await.unwrap();
    h.extractor.release();

    let record = h.wait_terminal(&job_id).await;
    assert_eq!(record.status, JobStatus::Cancelled);

    tokio::time::sleep(Duration::from_millis(500)).await;
    let record = h.record(&job_id).await.unwrap();
    assert_eq!(record.status, JobStatus::Cancelled);
    assert_eq!(record.attempts_made, 1);
    assert_eq!(h.extractor.calls().len(), 1);
}

#[tokio::test]
async fn invalid_submissions_create_no_jobs() {
    let h = common::start(common::test_config(), FakeExtractor::builder());

    for bad in [
        BatchSubmission::new("u1", vec!["http://localhost/prova/1".to_string()]),
        BatchSubmission::new("u1", vec!["https://site.test/blog/1".to_string()]),
        BatchSubmission::new("", vec![url("a")]),
        BatchSubmission::new("u1", vec![]),
    ] {
        assert!(matches!(
            h.queue.submit_batch(bad).await,
            Err(AppError::Validation(_))
        ));
    }

    let overview = h.queue.list_all_jobs_detailed().await.unwrap();
    assert!(overview.jobs.is_empty());
}

#[tokio::test]
async fn images_are_uploaded_and_working_files_removed() {
    let h = common::start(common::test_config(), FakeExtractor::builder().with_image());
    let job_id = h
        .queue
        .submit_grouped(BatchSubmission::new("u1", vec![url("a")]))
        .await
        .unwrap();

    let record = h.wait_terminal(&job_id).await;
    assert_eq!(record.results[0].status, UrlStatus::Success);

    let keys = h.uploader.keys.lock().unwrap().clone();
    assert_eq!(
        keys,
        vec![
            format!("questions/prova-teste-2024/{}-0-q1-1.png", job_id),
            format!("questions/prova-teste-2024/{}-0-q2-1.png", job_id),
        ]
    );

    let drafts = h.drafts.drafts.lock().unwrap();
    let draft = drafts.values().next().unwrap();
    assert!(draft
        .items
        .iter()
        .all(|q| q.images.iter().all(|i| i.starts_with("https://cdn.test/questions/"))));
    assert!(!h.work_dir().join(format!("{}-0", job_id)).exists());
}

#[tokio::test]
async fn missing_items_follow_the_expected_count() {
    let h = common::start(common::test_config(), FakeExtractor::builder());
    let submission = BatchSubmission::new("u1", vec![url("a")]).with_config(
        url("a"),
        UrlConfig {
            expected_items: Some(4),
            ..Default::default()
        },
    );
    let job_id = h.queue.submit_grouped(submission).await.unwrap();

    let record = h.wait_terminal(&job_id).await;
    assert_eq!(record.results[0].missing_items, Some(vec![3, 4]));
    assert_eq!(record.missing_items.get(&url("a")), Some(&vec![3, 4]));
}

#[tokio::test]
async fn list_jobs_pages_by_user_newest_first() {
    let h = common::start(common::test_config(), FakeExtractor::builder());
    let ids = h
        .queue
        .submit_batch(BatchSubmission::new("u1", vec![url("a"), url("b"), url("c")]))
        .await
        .unwrap();
    h.queue
        .submit_batch(BatchSubmission::new("u2", vec![url("d")]))
        .await
        .unwrap();

    let first = h
        .queue
        .list_jobs("u1", &JobFilters::default(), 1, 2)
        .await
        .unwrap();
    assert_eq!(first.total, 3);
    assert_eq!(first.jobs.len(), 2);
    assert_eq!(first.jobs[0].job_id, ids[2]);

    let second = h
        .queue
        .list_jobs("u1", &JobFilters::default(), 2, 2)
        .await
        .unwrap();
    assert_eq!(second.jobs.len(), 1);

    for id in &ids {
        h.wait_terminal(id).await;
    }
    let failed = JobFilters {
        status: Some(JobStatus::Failed),
        ..Default::default()
    };
    assert_eq!(h.queue.list_jobs("u1", &failed, 1, 10).await.unwrap().total, 0);
    let completed = JobFilters {
        status: Some(JobStatus::Completed),
        ..Default::default()
    };
    assert_eq!(h.queue.list_jobs("u1", &completed, 1, 10).await.unwrap().total, 3);
}

#[tokio::test]
async fn progress_events_are_published() {
    let h = common::start(common::test_config(), FakeExtractor::builder());
    let mut events = h.queue.subscribe();
    let job_id = h
        .queue
        .submit_grouped(BatchSubmission::new("u1", vec![url("a")]))
        .await
        .unwrap();
    h.wait_terminal(&job_id).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut stages = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.job_id, job_id);
        stages.push(event.stage);
    }
    assert_eq!(stages.first(), Some(&ProgressStage::Started));
    assert!(stages.contains(&ProgressStage::Extracting));
    assert!(stages.contains(&ProgressStage::DraftCreated));
    assert_eq!(stages.last(), Some(&ProgressStage::Completed));
}

#[tokio::test]
async fn repeated_url_in_one_submission_is_rejected() {
    let h = common::start(common::test_config(), FakeExtractor::builder());
    let repeated = BatchSubmission::new("u1", vec![url("a"), url("a")]);
    assert!(matches!(
        h.queue.submit_grouped(repeated.clone()).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        h.queue.submit_batch(repeated).await,
        Err(AppError::Validation(_))
    ));
    assert!(h.queue.list_all_jobs_detailed().await.unwrap().jobs.is_empty());
}

#[tokio::test]
async fn images_from_different_urls_get_distinct_objects() {
    let h = common::start(common::test_config(), FakeExtractor::builder().with_image());
    let ids = h
        .queue
        .submit_batch(BatchSubmission::new("u1", vec![url("a"), url("b")]))
        .await
        .unwrap();
    for id in &ids {
        assert_eq!(h.wait_terminal(id).await.status, JobStatus::Completed);
    }

    let mut keys = h.uploader.keys.lock().unwrap().clone();
    assert_eq!(keys.len(), 4);
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn extraction_timeout_fails_only_that_url() {
    let config = Config {
        extraction_timeout_secs: 1,
        ..common::test_config()
    };
    // a 一直不放行，只能靠超时结束
    let h = common::start(config, FakeExtractor::builder().hold(&url("a")));
    let job_id = h
        .queue
        .submit_grouped(BatchSubmission::new("u1", vec![url("a"), url("b")]))
        .await
        .unwrap();

    let record = h.wait_terminal(&job_id).await;
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.results.len(), 2);
    assert_eq!(record.results[0].status, UrlStatus::Failed);
    assert!(record.results[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("超时")));
    assert_eq!(record.results[1].status, UrlStatus::Success);
    assert_eq!(h.extractor.calls(), vec![url("a"), url("b")]);
    h.wait_mutex_free().await;
}

#[tokio::test(start_paused = true)]
async fn enrichment_timeout_still_saves_the_draft() {
    let config = Config {
        enrichment_timeout_secs: 1,
        ..common::test_config()
    };
    let h = common::start_with_rewriter(
        config,
        FakeExtractor::builder(),
        Arc::new(SlowRewriter {
            delay: Duration::from_secs(60),
        }),
    );
    let job_id = h
        .queue
        .submit_grouped(BatchSubmission::new("u1", vec![url("a")]))
        .await
        .unwrap();

    let record = h.wait_terminal(&job_id).await;
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.results[0].status, UrlStatus::Success);

    let drafts = h.drafts.drafts.lock().unwrap();
    assert_eq!(drafts.len(), 1);
    let draft = drafts.values().next().unwrap();
    for item in &draft.items {
        assert!(item.comment.starts_with("comentário"));
        assert_eq!(item.category_tags, vec!["Clínica Médica".to_string()]);
    }
}
