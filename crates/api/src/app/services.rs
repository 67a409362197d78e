use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio_stream::{Stream, StreamExt};
use tracing::info;

use pantry_core::ClientId;
use pantry_infra::{
    SseNotifier,
    external::{Mailer, RecipeGenerator},
    jobs::{
        BrokerError, EMAIL_QUEUE, EmailJobHandler, EmailQueue, InMemoryJobBroker, JobBroker,
        JobWorker, JobWorkerConfig, JobWorkerHandle, RECIPE_GENERATION_QUEUE, RecipeGenerationQueue,
        RecipeJobHandler, RedisJobBroker,
    },
    rate_limit::{CounterStore, CounterStoreError, InMemoryCounterStore, RateLimiter, RedisCounterStore},
};

use crate::config::{Config, RateLimits};

pub const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Shared collaborators behind every handler.
pub struct AppServices {
    pub rate_limiter: RateLimiter<Arc<dyn CounterStore>>,
    pub rate_limits: RateLimits,
    pub broker: Arc<dyn JobBroker>,
    pub email_queue: EmailQueue,
    pub recipe_queue: RecipeGenerationQueue,
    pub notifier: Arc<SseNotifier>,
    pub public_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServicesError {
    #[error(transparent)]
    CounterStore(#[from] CounterStoreError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl AppServices {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        broker: Arc<dyn JobBroker>,
        config: &Config,
    ) -> Self {
        Self {
            rate_limiter: RateLimiter::new(counters),
            rate_limits: config.rate_limits.clone(),
            email_queue: EmailQueue::email(broker.clone()),
            recipe_queue: RecipeGenerationQueue::recipe_generation(broker.clone()),
            broker,
            notifier: SseNotifier::arc(),
            public_url: config.public_url.clone(),
        }
    }

    /// Process-local counters and broker; state is lost on restart.
    pub fn in_memory(config: &Config) -> Self {
        Self::new(InMemoryCounterStore::arc(), InMemoryJobBroker::arc(), config)
    }
}

/// Build services from config: Redis when `REDIS_URL` is set, memory otherwise.
pub async fn build_services(config: &Config) -> Result<AppServices, ServicesError> {
    match &config.redis_url {
        Some(url) => {
            info!("using redis for rate-limit counters and job queues");
            let counters = RedisCounterStore::connect(url).await?;
            let broker = RedisJobBroker::connect(url, None).await?;
            Ok(AppServices::new(Arc::new(counters), Arc::new(broker), config))
        }
        None => {
            info!("REDIS_URL not set; using in-memory counters and job queues");
            Ok(AppServices::in_memory(config))
        }
    }
}

/// Running queue workers.
#[derive(Debug)]
pub struct Workers {
    email: JobWorkerHandle,
    recipe: JobWorkerHandle,
}

impl Workers {
    pub async fn shutdown(self) {
        self.email.shutdown().await;
        self.recipe.shutdown().await;
    }
}

/// Start one worker per queue on the current runtime.
pub fn spawn_workers(
    services: &AppServices,
    mailer: Arc<dyn Mailer>,
    generator: Arc<dyn RecipeGenerator>,
    poll_interval: Duration,
) -> Workers {
    let email = JobWorker::new(
        EMAIL_QUEUE,
        services.broker.clone(),
        EmailJobHandler::new(mailer),
    )
    .spawn(
        JobWorkerConfig::default()
            .with_name("email-worker")
            .with_poll_interval(poll_interval),
    );

    let recipe = JobWorker::new(
        RECIPE_GENERATION_QUEUE,
        services.broker.clone(),
        RecipeJobHandler::new(generator, services.notifier.clone()),
    )
    .spawn(
        JobWorkerConfig::default()
            .with_name("recipe-worker")
            .with_poll_interval(poll_interval),
    );

    Workers { email, recipe }
}

/// Register `client_id` and stream its frames; dropping the response deregisters it.
pub fn client_sse_stream(
    services: &AppServices,
    client_id: ClientId,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>> + use<>> {
    let connection = services.notifier.connect(client_id);
    let stream = connection.map(|frame| Ok(SseEvent::default().event(frame.event).data(frame.data)));

    Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE))
}
