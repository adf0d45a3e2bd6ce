//! End-to-end and concurrency tests for the finalization pipeline
//!
//! Runs the pipeline as the worker endpoint would, against in-memory
//! SQLite, with a scripted extraction model.

mod helpers;

use cvr_common::config::DispatchMode;
use cvr_common::db::CompletionStatus;
use cvr_finalizer::db::usage;
use cvr_finalizer::services::{FinalizeOutcome, SummaryStatus, UsageStatus};
use helpers::*;
use std::sync::Arc;

const SUMMARY: &str = "```json\n{\"summary\": \"Spreadsheet user, search is the pain\", \"themes\": [\"search\"]}\n```";

#[tokio::test]
async fn test_end_to_end_completed_response() {
    let app = setup(test_config(Some(SECRET), DispatchMode::Http), ScriptedLlm::replying(SUMMARY)).await;
    seed_response(&app.store, "r1", "u1", Some(80.0)).await;

    let outcome = app.state.pipeline.run("r1").await.unwrap();
    let report = match outcome {
        FinalizeOutcome::Finalized(report) => report,
        other => panic!("expected finalized, got {:?}", other),
    };
    assert_eq!(report.completion_status, CompletionStatus::Completed);
    assert_eq!(report.usage, UsageStatus::Recorded);
    assert_eq!(report.summary, SummaryStatus::Generated);

    let stored = load(&app.store, "r1").await;
    assert_eq!(stored.completion_status, CompletionStatus::Completed);
    assert_eq!(stored.completion_percentage, 80);
    assert_eq!(stored.user_word_count, 7);
    assert_eq!(stored.finalized_at, Some(report.finalized_at));
    assert_eq!(stored.summary.as_ref().unwrap()["themes"][0], "search");
    assert!(stored.duration_minutes.unwrap() >= 9);
    assert_eq!(app.llm.calls(), 1);

    let counters = usage::load_counters(app.store.pool(), "u1").await.unwrap().unwrap();
    assert_eq!(counters.responses_used, 1);
    assert_eq!(counters.minutes_used, stored.duration_minutes.unwrap());

    // Second run: nothing changes, nothing is called
    let again = app.state.pipeline.run("r1").await.unwrap();
    assert!(matches!(again, FinalizeOutcome::AlreadyFinalized { .. }));
    assert_eq!(load(&app.store, "r1").await, stored);
    assert_eq!(app.llm.calls(), 1);
    assert_eq!(usage::count_usage_events(app.store.pool(), "u1").await.unwrap(), 1);
    assert_eq!(
        usage::load_counters(app.store.pool(), "u1").await.unwrap().unwrap(),
        counters
    );
}

#[tokio::test]
async fn test_one_percent_gets_summary_but_no_usage() {
    let app = setup(test_config(Some(SECRET), DispatchMode::Http), ScriptedLlm::replying(SUMMARY)).await;
    seed_response(&app.store, "r1", "u1", Some(1.0)).await;

    app.state.pipeline.run("r1").await.unwrap();

    let stored = load(&app.store, "r1").await;
    assert_eq!(stored.completion_status, CompletionStatus::InProgress);
    assert!(stored.summary.is_some());
    assert_eq!(app.llm.calls(), 1);
    assert_eq!(usage::count_usage_events(app.store.pool(), "u1").await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_finalizations_for_one_user() {
    let app = setup(test_config(Some(SECRET), DispatchMode::Http), ScriptedLlm::replying(SUMMARY)).await;
    for i in 0..8 {
        seed_response(&app.store, &format!("r{}", i), "u1", Some(90.0)).await;
    }

    let mut handles = Vec::new();
    for i in 0..8 {
        let pipeline = Arc::clone(&app.state.pipeline);
        handles.push(tokio::spawn(async move {
            pipeline.run(&format!("r{}", i)).await
        }));
    }
    for handle in handles {
        assert!(matches!(
            handle.await.unwrap().unwrap(),
            FinalizeOutcome::Finalized(_)
        ));
    }

    let counters = usage::load_counters(app.store.pool(), "u1").await.unwrap().unwrap();
    assert_eq!(counters.responses_used, 8);
    assert_eq!(app.state.locks.held_keys(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_runs_for_one_response_bill_once() {
    let app = setup(test_config(Some(SECRET), DispatchMode::Http), ScriptedLlm::replying(SUMMARY)).await;
    seed_response(&app.store, "r1", "u1", Some(90.0)).await;

    let first = {
        let pipeline = Arc::clone(&app.state.pipeline);
        tokio::spawn(async move { pipeline.run("r1").await })
    };
    let second = {
        let pipeline = Arc::clone(&app.state.pipeline);
        tokio::spawn(async move { pipeline.run("r1").await })
    };

    let outcomes = [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];
    let finalized = outcomes
        .iter()
        .filter(|o| matches!(o, FinalizeOutcome::Finalized(_)))
        .count();
    assert_eq!(finalized, 1);

    assert_eq!(usage::count_usage_events(app.store.pool(), "u1").await.unwrap(), 1);
    let counters = usage::load_counters(app.store.pool(), "u1").await.unwrap().unwrap();
    assert_eq!(counters.responses_used, 1);
}

#[tokio::test]
async fn test_quota_exhausted_still_finalizes() {
    let app = setup(test_config(Some(SECRET), DispatchMode::Http), ScriptedLlm::replying(SUMMARY)).await;
    usage::insert_profile(app.store.pool(), "u1", 1, 1000).await.unwrap();
    seed_response(&app.store, "r1", "u1", Some(90.0)).await;
    seed_response(&app.store, "r2", "u1", Some(90.0)).await;

    app.state.pipeline.run("r1").await.unwrap();
    let report = match app.state.pipeline.run("r2").await.unwrap() {
        FinalizeOutcome::Finalized(report) => report,
        other => panic!("expected finalized, got {:?}", other),
    };
    assert_eq!(report.usage, UsageStatus::Capped);

    let counters = usage::load_counters(app.store.pool(), "u1").await.unwrap().unwrap();
    assert_eq!(counters.responses_used, 1);
    assert!(load(&app.store, "r2").await.is_finalized());
}
