use std::{process, sync::Arc};

use async_trait::async_trait;
use tideline::{
    application::{
        error::AppError,
        notify::{HttpNotifier, NoopNotifier, Notifier},
        persistence::PersistenceService,
        queues::{DelayQueueService, DelayTaskHandler},
        ranking::RankingEngine,
        reconcile::ReconciliationService,
        relations::RelationService,
        repos::{PostRepo, RelationRepo},
        timeline::TimelineService,
    },
    config,
    fast::FastStore,
    infra::{db::PostgresRepositories, error::InfraError, telemetry},
};
use tokio::signal;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

/// Delay queue carrying scheduled post publications; each task payload is a
/// post id whose due time is the desired publish time.
const PUBLISH_QUEUE: &str = "timeline:publish";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let url = settings.database.url.as_deref().ok_or_else(|| {
        AppError::from(InfraError::configuration(
            "database.url is required to start the server",
        ))
    })?;
    let pool =
        PostgresRepositories::connect(url, settings.database.max_connections.get())
            .await
            .map_err(InfraError::from)?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(InfraError::from)?;
    let repositories = PostgresRepositories::new(pool);
    repositories
        .health_check()
        .await
        .map_err(InfraError::from)?;
    info!("Database connection established and migrations applied");

    let store = Arc::new(FastStore::new());
    let relation_repo: Arc<dyn RelationRepo> = Arc::new(repositories.clone());
    let post_repo: Arc<dyn PostRepo> = Arc::new(repositories.clone());

    let ranking = Arc::new(RankingEngine::new(Arc::clone(&store)));
    let persistence = Arc::new(PersistenceService::new(
        Arc::clone(&relation_repo),
        settings.write_behind.clone(),
    ));
    let notifier: Arc<dyn Notifier> = match (
        settings.notification.enabled,
        settings.notification.endpoint.as_deref(),
    ) {
        (true, Some(endpoint)) => {
            Arc::new(HttpNotifier::new(endpoint, settings.notification.timeout)?)
        }
        _ => Arc::new(NoopNotifier),
    };
    let relations = Arc::new(RelationService::new(
        Arc::clone(&store),
        Arc::clone(&ranking),
        Arc::clone(&persistence),
        Arc::clone(&post_repo),
        notifier,
    ));
    let timeline = Arc::new(TimelineService::new(
        Arc::clone(&store),
        Arc::clone(&relations),
        Arc::clone(&post_repo),
        settings.timeline.clone(),
    ));
    let reconcile = Arc::new(ReconciliationService::new(
        Arc::clone(&store),
        relation_repo,
        settings.reconciliation.clone(),
    ));
    let delay_queue = Arc::new(DelayQueueService::new(
        Arc::clone(&store),
        settings.delay_queue.clone(),
    ));

    let flush_handle = tokio::spawn(Arc::clone(&persistence).run_flush_ticker());
    let sweep_handle = tokio::spawn(Arc::clone(&reconcile).run());
    delay_queue.start(
        PUBLISH_QUEUE,
        Arc::new(ScheduledPublishHandler {
            timeline: Arc::clone(&timeline),
            posts: post_repo,
        }),
    );
    info!("tideline serving; press ctrl-c to stop");

    signal::ctrl_c()
        .await
        .map_err(|err| AppError::from(InfraError::Io(err)))?;
    info!("Shutdown requested");

    delay_queue.stop(PUBLISH_QUEUE);
    reconcile.stop();
    persistence.stop();
    // Drain whatever the buffer still holds before the process exits.
    if let Err(error) = persistence.flush().await {
        warn!(%error, "Final write-behind flush failed");
    }
    let shutdown = settings.server.graceful_shutdown;
    let _ = tokio::time::timeout(
        shutdown,
        futures::future::join_all([flush_handle, sweep_handle]),
    )
    .await;
    info!("Shutdown complete");
    Ok(())
}

struct ScheduledPublishHandler {
    timeline: Arc<TimelineService>,
    posts: Arc<dyn PostRepo>,
}

#[async_trait]
impl DelayTaskHandler for ScheduledPublishHandler {
    async fn handle(&self, task: &str) -> Result<bool, AppError> {
        let Ok(post_id) = task.parse::<i64>() else {
            warn!(task, "Discarding malformed publish task");
            return Ok(true);
        };
        let post = tideline::domain::types::PostId(post_id);
        match self.posts.author_of(post).await? {
            Some(author) => {
                let published_at =
                    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
                self.timeline.publish(author, post, published_at);
                Ok(true)
            }
            // Row not visible yet; try again after the short backoff.
            None => Ok(false),
        }
    }
}
