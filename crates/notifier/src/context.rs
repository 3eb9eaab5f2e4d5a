//! Service wiring: one Redis connection manager, one Postgres pool, the three
//! queues with their producers, and the workers consuming them.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use sqlx::PgPool;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use herald_common::config::AppConfig;
use herald_queue::{Processor, Queue, RateLimit, Worker, WorkerOptions};

use crate::buffer::{NotificationBuffer, RedisBuffer};
use crate::email::{EmailProcessor, EmailSender, sender_from_config};
use crate::error::NotifierResult;
use crate::flush::{FLUSH_QUEUE, FlushProcessor, FlushScheduler};
use crate::producer::{EMAIL_QUEUE, EmailProducer, NOTIFICATION_QUEUE, NotificationProducer};
use crate::realtime::ChannelServerHandle;
use crate::store::{NotificationStore, PgNotificationStore};
use crate::worker::NotificationProcessor;

pub struct ServiceContext {
    config: AppConfig,
    pool: PgPool,
    channels: ChannelServerHandle,
    buffer: Arc<dyn NotificationBuffer>,
    store: Arc<dyn NotificationStore>,
    email_sender: Arc<dyn EmailSender>,
    notification_queue: Queue,
    flush_queue: Queue,
    email_queue: Queue,
    notifications: NotificationProducer,
    emails: EmailProducer,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceContext {
    pub fn new(config: AppConfig, redis: ConnectionManager, pool: PgPool) -> Self {
        let prefix = config.queue_prefix.clone();
        let notification_queue = Queue::new(redis.clone(), &prefix, NOTIFICATION_QUEUE);
        let flush_queue = Queue::new(redis.clone(), &prefix, FLUSH_QUEUE);
        let email_queue = Queue::new(redis.clone(), &prefix, EMAIL_QUEUE);
        let email_sender =
            sender_from_config(config.resend_api_key.as_deref(), config.email_from.as_deref());
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            buffer: Arc::new(RedisBuffer::new(redis)),
            store: Arc::new(PgNotificationStore::new(pool.clone())),
            email_sender,
            notifications: NotificationProducer::new(notification_queue.clone()),
            emails: EmailProducer::new(email_queue.clone()),
            notification_queue,
            flush_queue,
            email_queue,
            channels: ChannelServerHandle::new(),
            config,
            pool,
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Accessor for the active real-time channel server.
    pub fn channels(&self) -> &ChannelServerHandle {
        &self.channels
    }

    pub fn notifications(&self) -> &NotificationProducer {
        &self.notifications
    }

    pub fn emails(&self) -> &EmailProducer {
        &self.emails
    }

    pub fn buffer(&self) -> &Arc<dyn NotificationBuffer> {
        &self.buffer
    }

    pub fn queues(&self) -> [&Queue; 3] {
        [&self.notification_queue, &self.flush_queue, &self.email_queue]
    }

    pub fn queue(&self, name: &str) -> Option<&Queue> {
        self.queues().into_iter().find(|q| q.name() == name)
    }

    /// Register the recurring flush and spawn the notification, flush and email workers.
    pub async fn start(&self) -> NotifierResult<()> {
        FlushScheduler::new(
            self.flush_queue.clone(),
            Duration::from_millis(self.config.flush_interval_ms),
        )
        .schedule_recurring_flush()
        .await?;

        let notification_worker = Worker::new(
            self.notification_queue.clone(),
            Arc::new(NotificationProcessor::new(
                self.channels.clone(),
                self.buffer.clone(),
                self.store.clone(),
            )),
            WorkerOptions::new()
                .with_concurrency(self.config.notification_concurrency)
                .with_limiter(RateLimit::per_second(self.config.notification_rate_per_sec)),
        )?;

        let flush_worker = Worker::new(
            self.flush_queue.clone(),
            Arc::new(
                FlushProcessor::new(self.buffer.clone(), self.store.clone())
                    .with_batch_size(self.config.flush_batch_size),
            ),
            WorkerOptions::new(),
        )?;

        let email_worker = Worker::new(
            self.email_queue.clone(),
            Arc::new(EmailProcessor::new(self.email_sender.clone())),
            WorkerOptions::new()
                .with_concurrency(self.config.email_concurrency)
                .with_limiter(RateLimit::per_second(self.config.email_rate_per_sec)),
        )?;

        let mut workers = self.workers.lock().await;
        workers.push(self.spawn(notification_worker));
        workers.push(self.spawn(flush_worker));
        workers.push(self.spawn(email_worker));

        info!(
            queues = ?self.queues().map(|q| q.name().to_string()),
            email_provider = self.email_sender.name(),
            "Notification service started"
        );
        Ok(())
    }

    fn spawn<P: Processor>(&self, worker: Worker<P>) -> JoinHandle<()> {
        let shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = worker.run(shutdown).await {
                error!(queue = %worker.queue().name(), error = %e, "Worker exited with error");
            }
        })
    }

    /// Signal every worker to stop and wait for in-flight jobs to finish.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
            }
        }
        info!("Notification service stopped");
    }
}
