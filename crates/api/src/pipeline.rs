//! Assembles stores, bus, publisher and consumer into a running pipeline.

use std::sync::Arc;

use domain::OrderService;
use event_bus::{DeadLetterSink, EventBus, InMemoryEventBus, TopicDeadLetterSink};
use projections::{
    CachedReadModel, ConsumerConfig, ConsumerHandle, ConsumerState, InMemoryCache,
    InMemoryReadModelStore, OrderProjection, PostgresReadModelStore, ProjectionConsumer,
    ReadModelCache, ReadModelStore,
};
use publisher::OutboxPublisher;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use write_store::{InMemoryStore, OutboxStore, PostgresStore, WriteStore};

use crate::config::Config;
use crate::error::StartupError;

/// The outbox publisher as wired by the server.
pub type OrderPublisher = OutboxPublisher<Arc<dyn OutboxStore>, Arc<dyn EventBus>>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub orders: OrderService<Arc<dyn WriteStore>>,
    pub outbox: Arc<dyn OutboxStore>,
    pub read_models: Arc<dyn ReadModelStore>,
    pub publisher: Arc<OrderPublisher>,
}

/// Everything the server needs, built but not yet running.
pub struct Pipeline {
    state: Arc<AppState>,
    bus: Arc<dyn EventBus>,
    dead_letters: Arc<dyn DeadLetterSink>,
    consumer_config: ConsumerConfig,
}

/// Background tasks started by [`Pipeline::start`].
pub struct RunningPipeline {
    publisher: JoinHandle<()>,
    consumer: ConsumerHandle,
}

impl Pipeline {
    /// In-memory stores and bus; nothing survives a restart.
    pub fn in_memory(config: &Config) -> Self {
        Self::in_memory_with_bus(config, Arc::new(InMemoryEventBus::new()))
    }

    fn in_memory_with_bus(config: &Config, bus: Arc<dyn EventBus>) -> Self {
        let store = InMemoryStore::new();
        let cache: Arc<dyn ReadModelCache> = Arc::new(InMemoryCache::new(config.cache_ttl));
        let read_models = CachedReadModel::new(InMemoryReadModelStore::new(), cache);
        Self::assemble(
            config,
            Arc::new(store.clone()),
            Arc::new(store),
            Arc::new(read_models),
            bus,
        )
    }

    /// Picks the backends named by `config`: Postgres when `DATABASE_URL` is
    /// set, Kafka and Redis when their features are enabled and configured.
    pub async fn from_config(config: &Config) -> Result<Self, StartupError> {
        let Some(database_url) = &config.database_url else {
            tracing::info!("DATABASE_URL not set, using in-memory stores");
            return Ok(Self::in_memory_with_bus(config, event_bus(config)?));
        };

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        let store = PostgresStore::new(pool.clone());
        store.run_migrations().await.map_err(write_store::StoreError::from)?;
        let read_models = PostgresReadModelStore::new(pool);
        read_models.run_migrations().await?;
        tracing::info!("Connected to Postgres, migrations applied");

        let cache = read_model_cache(config).await?;
        let store = Arc::new(store);
        Ok(Self::assemble(
            config,
            store.clone(),
            store,
            Arc::new(CachedReadModel::new(read_models, cache)),
            event_bus(config)?,
        ))
    }

    fn assemble(
        config: &Config,
        write: Arc<dyn WriteStore>,
        outbox: Arc<dyn OutboxStore>,
        read_models: Arc<dyn ReadModelStore>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        let publisher = Arc::new(OutboxPublisher::new(
            Arc::clone(&outbox),
            Arc::clone(&bus),
            config.publisher_config(),
        ));
        let state = Arc::new(AppState {
            orders: OrderService::new(write),
            outbox,
            read_models,
            publisher,
        });

        Self {
            state,
            dead_letters: Arc::new(TopicDeadLetterSink::new(Arc::clone(&bus))),
            bus,
            consumer_config: config.consumer_config(),
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    pub fn bus(&self) -> Arc<dyn EventBus> {
        Arc::clone(&self.bus)
    }

    /// Spawns the outbox publisher loop and the projection consumer. Both
    /// stop when `shutdown` turns true.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> RunningPipeline {
        let publisher = Arc::clone(&self.state.publisher).spawn(shutdown.clone());

        let projection = OrderProjection::new(Arc::clone(&self.state.read_models));
        let consumer = ProjectionConsumer::new(
            self.consumer_config.clone(),
            Arc::clone(&self.bus),
            Arc::new(projection),
            Arc::clone(&self.dead_letters),
        )
        .spawn(shutdown);

        RunningPipeline {
            publisher,
            consumer,
        }
    }
}

impl RunningPipeline {
    pub fn consumer_state(&self) -> ConsumerState {
        self.consumer.state()
    }

    /// Waits until the consumer is subscribed and pulling.
    pub async fn wait_until_running(&mut self) -> bool {
        self.consumer.wait_for(ConsumerState::Running).await
    }

    /// Waits for both tasks after shutdown was signalled.
    pub async fn join(self) {
        if let Err(e) = self.publisher.await {
            tracing::error!(error = %e, "Outbox publisher task failed");
        }
        if let Err(e) = self.consumer.join().await {
            tracing::error!(error = %e, "Projection consumer ended with an error");
        }
    }
}

fn event_bus(config: &Config) -> Result<Arc<dyn EventBus>, StartupError> {
    #[cfg(feature = "kafka")]
    {
        if let Some(brokers) = &config.kafka_brokers {
            let bus = event_bus::KafkaEventBus::builder()
                .brokers(brokers.clone())
                .timeout(config.publish_timeout)
                .build()?;
            return Ok(Arc::new(bus));
        }
    }
    if config.kafka_brokers.is_some() {
        tracing::warn!("KAFKA_BROKERS is set but the kafka feature is disabled");
    }
    tracing::info!("Using in-memory event bus");
    Ok(Arc::new(InMemoryEventBus::new()))
}

async fn read_model_cache(config: &Config) -> Result<Arc<dyn ReadModelCache>, StartupError> {
    #[cfg(feature = "redis")]
    {
        if let Some(url) = &config.redis_url {
            let cache = projections::RedisCache::connect_with_ttl(url, config.cache_ttl).await?;
            tracing::info!("Using Redis read-model cache");
            return Ok(Arc::new(cache));
        }
    }
    Ok(Arc::new(InMemoryCache::new(config.cache_ttl)))
}
