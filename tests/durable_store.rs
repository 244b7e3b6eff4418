use std::sync::Arc;

use sqlx::PgPool;
use tideline::application::persistence::PersistenceService;
use tideline::application::reconcile::ReconciliationService;
use tideline::application::repos::{HistoryRepo, PostRepo, RelationRepo};
use tideline::config::{ReconciliationSettings, WriteBehindSettings};
use tideline::domain::types::{PostId, RelationKind, UserId};
use tideline::fast::FastStore;
use tideline::infra::db::PostgresRepositories;

#[sqlx::test(migrations = "./migrations")]
async fn relation_rows_round_trip_through_every_kind(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);

    for kind in RelationKind::ALL {
        assert!(!repos.exists(kind, 1, 2).await.expect("exists"));
        repos.insert(kind, 1, 2).await.expect("insert");
        repos.insert(kind, 1, 2).await.expect("duplicate insert");
        assert!(repos.exists(kind, 1, 2).await.expect("exists"));

        repos.delete(kind, 1, 2).await.expect("delete");
        assert!(!repos.exists(kind, 1, 2).await.expect("exists"));
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn align_matches_rows_to_the_desired_state(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let kind = RelationKind::Follow;

    repos.align(kind, 1, 2, true).await.expect("align present");
    assert!(repos.exists(kind, 1, 2).await.expect("exists"));
    repos.align(kind, 1, 2, true).await.expect("align present again");

    repos.align(kind, 1, 2, false).await.expect("align absent");
    assert!(!repos.exists(kind, 1, 2).await.expect("exists"));
    repos.align(kind, 1, 2, false).await.expect("align absent again");
}

#[sqlx::test(migrations = "./migrations")]
async fn batch_operations_report_affected_rows(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let kind = RelationKind::Like;

    let written = repos
        .insert_batch(kind, &[(10, 1), (10, 2), (11, 1)])
        .await
        .expect("insert batch");
    assert_eq!(written, 3);

    // Re-inserting an overlapping batch only writes the new pair.
    let written = repos
        .insert_batch(kind, &[(10, 2), (11, 9)])
        .await
        .expect("overlapping insert batch");
    assert_eq!(written, 1);

    let existing = repos
        .existing_pairs(kind, &[(10, 1), (10, 9), (11, 9)])
        .await
        .expect("existing pairs");
    assert!(existing.contains(&(10, 1)));
    assert!(existing.contains(&(11, 9)));
    assert!(!existing.contains(&(10, 9)));

    let deleted = repos
        .delete_batch(kind, &[(10, 1), (10, 2), (99, 99)])
        .await
        .expect("delete batch");
    assert_eq!(deleted, 2);

    let mut objects = repos.objects_of(kind, 11).await.expect("objects");
    objects.sort_unstable();
    assert_eq!(objects, vec![1, 9]);
}

#[sqlx::test(migrations = "./migrations")]
async fn subject_pages_are_distinct_and_ordered(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let kind = RelationKind::Follow;
    repos
        .insert_batch(kind, &[(3, 1), (1, 2), (1, 3), (2, 1)])
        .await
        .expect("seed");

    let first = repos.subjects_page(kind, 0, 2).await.expect("page");
    assert_eq!(first, vec![1, 2]);
    let second = repos.subjects_page(kind, 2, 2).await.expect("page");
    assert_eq!(second, vec![3]);
    let empty = repos.subjects_page(kind, 3, 2).await.expect("page");
    assert!(empty.is_empty());
}

#[sqlx::test(migrations = "./migrations")]
async fn flush_then_reconcile_converges_on_the_fast_store(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));
    let store = Arc::new(FastStore::new());

    // A like reaches the fast store and the write-behind buffer.
    store.sadd("post:like:7", "1");
    let persistence = PersistenceService::new(
        Arc::clone(&repos) as Arc<dyn RelationRepo>,
        WriteBehindSettings {
            flush_delay_secs: 30,
            batch_threshold: 100,
        },
    );
    persistence.enqueue(RelationKind::Like, 7, 1, true).await;
    persistence.flush().await.expect("flush");
    assert!(repos.exists(RelationKind::Like, 7, 1).await.expect("exists"));

    // A stale durable row with no fast-store counterpart gets repaired.
    repos.insert(RelationKind::Like, 7, 2).await.expect("seed stale");
    let reconcile = ReconciliationService::new(
        store,
        Arc::clone(&repos) as Arc<dyn RelationRepo>,
        ReconciliationSettings {
            enabled: true,
            batch_size: 100,
            interval_secs: 1_800,
        },
    );
    let report = reconcile
        .validate(RelationKind::Like, 7)
        .await
        .expect("validate");
    assert_eq!(report.deleted, 1);
    assert_eq!(report.inserted, 0);

    let objects = repos.objects_of(RelationKind::Like, 7).await.expect("objects");
    assert_eq!(objects, vec![1]);
}

#[sqlx::test(migrations = "./migrations")]
async fn history_rows_upsert_and_exclude(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let user = UserId(5);

    repos.record(user, PostId(1), 100).await.expect("record");
    repos.record(user, PostId(2), 200).await.expect("record");
    // Re-viewing bumps the timestamp instead of duplicating the row.
    repos.record(user, PostId(1), 300).await.expect("re-record");

    let recent = repos
        .recent_excluding(user, &[], 0, 10)
        .await
        .expect("recent");
    assert_eq!(recent, vec![PostId(1), PostId(2)]);

    let filtered = repos
        .recent_excluding(user, &[PostId(1)], 0, 10)
        .await
        .expect("recent excluding");
    assert_eq!(filtered, vec![PostId(2)]);

    // The offset skips rows after exclusion, so deep pages keep moving.
    let offset = repos
        .recent_excluding(user, &[], 1, 10)
        .await
        .expect("recent offset");
    assert_eq!(offset, vec![PostId(2)]);

    HistoryRepo::clear(&repos, user).await.expect("clear");
    assert!(
        repos
            .recent_excluding(user, &[], 0, 10)
            .await
            .expect("recent")
            .is_empty()
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn post_author_lookups(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    sqlx::query("INSERT INTO posts (id, author_id, published_at) VALUES ($1, $2, $3)")
        .bind(1_i64)
        .bind(9_i64)
        .bind(100_i64)
        .execute(repos.pool())
        .await
        .expect("seed post");
    sqlx::query("INSERT INTO posts (id, author_id, published_at) VALUES ($1, $2, $3)")
        .bind(2_i64)
        .bind(9_i64)
        .bind(200_i64)
        .execute(repos.pool())
        .await
        .expect("seed post");

    assert_eq!(
        repos.author_of(PostId(1)).await.expect("author"),
        Some(UserId(9))
    );
    assert_eq!(repos.author_of(PostId(99)).await.expect("author"), None);

    let authors = repos
        .authors_of(&[PostId(1), PostId(2), PostId(99)])
        .await
        .expect("authors");
    assert_eq!(authors.len(), 2);

    let recent = repos
        .recent_by_author(UserId(9), 10)
        .await
        .expect("recent by author");
    assert_eq!(recent, vec![(PostId(2), 200), (PostId(1), 100)]);
}
