mod github;
mod runner;
mod sink;

use std::sync::Arc;

use ghtap_common::types::ServiceInfo;
use ghtap_config::{init_tracing, AppConfig};
use ghtap_db::offsets::memory::MemoryOffsetRepository;
use ghtap_db::offsets::pg_repository::PgOffsetRepository;
use ghtap_db::offsets::repositories::OffsetRepository;
use ghtap_polling::{EventEmitter, PollWorker, Poller, RateLimiter};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::github::client::{GitHubClient, GitHubClientConfig};
use crate::github::fetcher::IssueFetcher;
use crate::runner::RepositoryRunner;
use crate::sink::StdoutSink;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    init_tracing("info");

    let service = ServiceInfo::new("ghtap-ingest");
    tracing::info!(
        service = %service.name,
        version = %service.version,
        instance_id = %service.instance_id,
        "starting"
    );

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => panic!("configuration error (fail-fast): {e}"),
    };

    let client_config = GitHubClientConfig::from_settings(&config.github, &service.user_agent());
    let client = GitHubClient::new(client_config).expect("failed to create github client");
    if client.config().token.is_none() {
        tracing::warn!("GITHUB_TOKEN not set, using the unauthenticated rate limit");
    }

    let offsets: Arc<dyn OffsetRepository> = match &config.database_url {
        Some(database_url) => {
            let pool = ghtap_db::create_pool(database_url)
                .await
                .expect("failed to connect to database");
            ghtap_db::ensure_schema(&pool)
                .await
                .expect("failed to create offsets table");
            Arc::new(PgOffsetRepository::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, offsets are kept in memory only");
            Arc::new(MemoryOffsetRepository::new())
        }
    };

    let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    let sink = Arc::new(StdoutSink::stdout());
    let cancel = CancellationToken::new();

    tracing::info!(
        repositories = config.repositories.len(),
        api = %client.config().base_url,
        topic = %config.poll.topic,
        page_size = config.poll.page_limit,
        log_level = %config.log_level,
        "ingest configured"
    );

    let mut workers = JoinSet::new();
    for partition in &config.repositories {
        let saved = runner::load_offset(offsets.as_ref(), partition)
            .await
            .expect("failed to load offset");

        let fetcher = IssueFetcher::new(client.clone(), partition.clone(), config.poll.page_limit);
        let emitter = EventEmitter::new(partition.clone(), config.poll.topic.clone());
        let poller = Poller::new(fetcher, limiter.clone(), emitter, config.poll.page_limit);
        let worker = PollWorker::load(poller, saved, &config.poll);

        let repo_runner = RepositoryRunner::new(
            worker,
            sink.clone(),
            offsets.clone(),
            config.retry_backoff,
        );
        workers.spawn(repo_runner.run(cancel.clone()));
    }

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutting down");
                shutdown.cancel();
            }
            Err(e) => tracing::error!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(summary) => tracing::info!(
                partition = %summary.partition,
                cycles = summary.cycles,
                events = summary.events,
                failures = summary.failures,
                "worker finished"
            ),
            Err(e) => tracing::error!(error = %e, "worker panicked"),
        }
    }

    let stats = limiter.stats();
    tracing::info!(
        requests = stats.requests,
        throttled_ms = stats.throttled.as_millis() as u64,
        cooldowns = stats.cooldowns,
        "ingest service stopped"
    );
}
