//! Integration tests for concurrent access patterns
//!
//! Runs against a file-backed database so that tasks really hold separate
//! SQLite connections.

mod helpers;

use chrono::Utc;
use flyer_common::events::EventBus;
use flyer_resolver::config::ResolverConfig;
use flyer_resolver::db;
use flyer_resolver::models::{ImageSource, ProjectStatus};
use flyer_resolver::services::{ProjectRunner, RunError};
use helpers::{add_products, create_file_db, create_project, insert_certified, ScriptedSearch, ScriptedValidator};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

fn shared_runner(pool: &sqlx::SqlitePool) -> Arc<ProjectRunner> {
    Arc::new(ProjectRunner::new(
        pool.clone(),
        EventBus::new(1000),
        Arc::new(ScriptedSearch::new()),
        Arc::new(ScriptedValidator::new()),
        ResolverConfig::default(),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_claim_project_once() {
    let (_temp_dir, pool) = create_file_db().await;
    let project_id = create_project(&pool, "Contended").await;
    add_products(&pool, project_id, &[("Pao", None)]).await;

    let runner = shared_runner(&pool);
    let mut join_set = JoinSet::new();
    for _ in 0..8 {
        let runner = Arc::clone(&runner);
        join_set.spawn(async move { runner.begin_run(project_id).await });
    }

    let mut claimed = 0;
    let mut refused = 0;
    while let Some(result) = join_set.join_next().await {
        match result.unwrap() {
            Ok(ticket) => {
                assert_eq!(ticket.project_id, project_id);
                claimed += 1;
            }
            Err(RunError::PreconditionFailed(id)) => {
                assert_eq!(id, project_id);
                refused += 1;
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(claimed, 1, "exactly one start may claim the project");
    assert_eq!(refused, 7);

    let project = db::projects::load_project(&pool, project_id).await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Processing);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_usage_updates_are_not_lost() {
    let (_temp_dir, pool) = create_file_db().await;
    let image = insert_certified(&pool, "Oleo de Soja", "https://bank/oleo.png").await;

    let mut join_set = JoinSet::new();
    for _ in 0..20 {
        let pool = pool.clone();
        join_set.spawn(async move { db::certified_images::record_usage(&pool, image.id, Utc::now()).await });
    }
    while let Some(result) = join_set.join_next().await {
        result.unwrap().unwrap();
    }

    let stored = db::certified_images::load_certified_image(&pool, image.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.usage_count, 20);
    assert!(stored.last_used_at.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_projects_share_bank_image() {
    let (_temp_dir, pool) = create_file_db().await;
    let image = insert_certified(&pool, "Feijao Preto 1kg", "https://bank/feijao.png").await;

    let first = create_project(&pool, "Loja A").await;
    let second = create_project(&pool, "Loja B").await;
    add_products(&pool, first, &[("Feijão Preto 1kg", None)]).await;
    add_products(&pool, second, &[("feijao preto 1KG", None)]).await;

    let runner = shared_runner(&pool);
    let mut join_set = JoinSet::new();
    for project_id in [first, second] {
        let runner = Arc::clone(&runner);
        join_set.spawn(async move { runner.run(project_id, CancellationToken::new()).await });
    }
    while let Some(result) = join_set.join_next().await {
        let outcome = result.unwrap().unwrap();
        assert_eq!(outcome.summary().status, ProjectStatus::Completed);
        assert_eq!(outcome.summary().counters.products_from_bank, 1);
    }

    for project_id in [first, second] {
        let products = db::products::list_products(&pool, project_id).await.unwrap();
        assert_eq!(products[0].image_source, Some(ImageSource::CertifiedBank));
        assert_eq!(products[0].image_url.as_deref(), Some(image.image_url.as_str()));
    }

    let stored = db::certified_images::load_certified_image(&pool, image.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.usage_count, 2);
}
