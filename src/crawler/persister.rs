//! Persister: keeps scheduler job tables in sync with the schedule store
//!
//! Writers of the store publish the id of every created, updated or deleted
//! schedule on one of three channels. A running scheduler's persister listens
//! on those channels and applies each change to the job table.
//!
//! The transport is checked once with a ping. If it is unreachable the
//! persister goes inert for the rest of the process: publishing and
//! subscribing become no-ops and the failure is logged once.

use super::scheduler::Scheduler;
use crate::config::PubSubConfig;
use crate::storage::{Backend, Schedule};
use crate::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const PING_TIMEOUT: Duration = Duration::from_secs(3);

/// Errors raised by a pub/sub transport
#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Transport unreachable")]
    Unreachable,

    #[error("Transport did not answer within {0:?}")]
    Timeout(Duration),
}

/// One message received from a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub payload: String,
}

pub type MessageStream = BoxStream<'static, Message>;

/// Pub/sub transport contract
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn ping(&self) -> std::result::Result<(), PubSubError>;

    async fn publish(&self, channel: &str, payload: &str) -> std::result::Result<(), PubSubError>;

    /// Subscribes to every channel in `channels`; the stream ends when the
    /// connection closes
    async fn subscribe(&self, channels: &[String])
        -> std::result::Result<MessageStream, PubSubError>;
}

/// Redis pub/sub transport
pub struct RedisPubSub {
    client: redis::Client,
}

impl RedisPubSub {
    pub fn open(url: &str) -> std::result::Result<Self, PubSubError> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn ping(&self) -> std::result::Result<(), PubSubError> {
        let ping = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
            Ok::<(), PubSubError>(())
        };
        tokio::time::timeout(PING_TIMEOUT, ping)
            .await
            .map_err(|_| PubSubError::Timeout(PING_TIMEOUT))?
    }

    async fn publish(&self, channel: &str, payload: &str) -> std::result::Result<(), PubSubError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        channels: &[String],
    ) -> std::result::Result<MessageStream, PubSubError> {
        let mut pubsub = self.client.get_async_connection().await?.into_pubsub();
        for channel in channels {
            pubsub.subscribe(channel.as_str()).await?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let messages = pubsub
                .on_message()
                .filter_map(|msg| async move {
                    match msg.get_payload::<String>() {
                        Ok(payload) => Some(Message {
                            channel: msg.get_channel_name().to_string(),
                            payload,
                        }),
                        Err(e) => {
                            warn!("Unreadable pub/sub payload: {}", e);
                            None
                        }
                    }
                })
                .boxed();
            forward_messages(messages, tx).await;
        });

        Ok(stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|m| (m, rx)) }).boxed())
    }
}

/// Pumps `source` into `tx` until either side goes away
///
/// Returns as soon as the receiver is dropped, even while `source` is idle, so
/// the connection behind `source` is released with it.
async fn forward_messages<S>(mut source: S, tx: mpsc::UnboundedSender<Message>)
where
    S: futures::Stream<Item = Message> + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = tx.closed() => break,
            next = source.next() => match next {
                Some(message) => message,
                None => break,
            },
        };
        if tx.send(message).is_err() {
            break;
        }
    }
    debug!("Pub/sub forwarder stopped");
}

/// In-process transport over a tokio broadcast channel
#[derive(Clone)]
pub struct MemoryPubSub {
    sender: broadcast::Sender<Message>,
    reachable: bool,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            sender,
            reachable: true,
        }
    }

    /// A transport whose ping always fails
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new()
        }
    }
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn ping(&self) -> std::result::Result<(), PubSubError> {
        if self.reachable {
            Ok(())
        } else {
            Err(PubSubError::Unreachable)
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> std::result::Result<(), PubSubError> {
        // no receivers is not an error
        let _ = self.sender.send(Message {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        channels: &[String],
    ) -> std::result::Result<MessageStream, PubSubError> {
        let wanted: Arc<HashSet<String>> = Arc::new(channels.iter().cloned().collect());
        let receiver = self.sender.subscribe();

        let messages = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => return Some((message, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Subscriber lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |message| {
            let keep = wanted.contains(&message.channel);
            async move { keep }
        });

        Ok(messages.boxed())
    }
}

/// Names of the three schedule channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channels {
    pub created: String,
    pub updated: String,
    pub deleted: String,
}

impl Channels {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            created: format!("{}:schedule:created", prefix),
            updated: format!("{}:schedule:updated", prefix),
            deleted: format!("{}:schedule:deleted", prefix),
        }
    }

    pub fn all(&self) -> Vec<String> {
        vec![
            self.created.clone(),
            self.updated.clone(),
            self.deleted.clone(),
        ]
    }
}

impl Default for Channels {
    fn default() -> Self {
        Self::with_prefix("newscover")
    }
}

/// Publishes schedule changes and applies received ones to a scheduler
#[derive(Clone)]
pub struct Persister {
    transport: Arc<dyn PubSub>,
    backend: Arc<dyn Backend>,
    channels: Arc<Channels>,
    available: Arc<OnceCell<bool>>,
}

impl Persister {
    pub fn new(transport: Arc<dyn PubSub>, backend: Arc<dyn Backend>, channels: Channels) -> Self {
        Self {
            transport,
            backend,
            channels: Arc::new(channels),
            available: Arc::new(OnceCell::new()),
        }
    }

    /// Uses Redis when a URL is configured, the in-process transport otherwise
    pub fn from_config(config: &PubSubConfig, backend: Arc<dyn Backend>) -> Result<Self> {
        let transport: Arc<dyn PubSub> = match &config.redis_url {
            Some(url) => Arc::new(RedisPubSub::open(url)?),
            None => Arc::new(MemoryPubSub::new()),
        };
        Ok(Self::new(
            transport,
            backend,
            Channels::with_prefix(&config.channel_prefix),
        ))
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    /// Whether the transport answered its first ping; checked once per process
    pub async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                match self.transport.ping().await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Pub/sub transport unavailable, schedule sync disabled: {}", e);
                        false
                    }
                }
            })
            .await
    }

    /// Announces a saved schedule; returns true if the message went out
    pub async fn notify_saved(&self, schedule: &Schedule, created: bool) -> bool {
        let channel = if created {
            &self.channels.created
        } else {
            &self.channels.updated
        };
        self.publish(channel, schedule.id).await
    }

    /// Announces a deleted schedule; returns true if the message went out
    pub async fn notify_deleted(&self, schedule: &Schedule) -> bool {
        self.publish(&self.channels.deleted, schedule.id).await
    }

    async fn publish(&self, channel: &str, schedule_id: i64) -> bool {
        if !self.is_available().await {
            return false;
        }

        match self
            .transport
            .publish(channel, &schedule_id.to_string())
            .await
        {
            Ok(()) => {
                debug!(channel, schedule_id, "Published schedule change");
                true
            }
            Err(e) => {
                warn!(channel, schedule_id, "Failed to publish schedule change: {}", e);
                false
            }
        }
    }

    /// Spawns the subscription loop feeding `scheduler`
    ///
    /// Returns `None` when the transport is unavailable.
    pub async fn listen(&self, scheduler: Scheduler) -> Option<JoinHandle<()>> {
        if !self.is_available().await {
            return None;
        }

        let mut messages = match self.transport.subscribe(&self.channels.all()).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Failed to subscribe to schedule channels: {}", e);
                return None;
            }
        };

        info!(channels = ?self.channels.all(), "Listening for schedule changes");
        let this = self.clone();
        Some(tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                if let Err(e) = this.apply(&scheduler, &message) {
                    warn!(
                        channel = %message.channel,
                        payload = %message.payload,
                        "Failed to apply schedule change: {}",
                        e
                    );
                }
            }
            debug!("Schedule subscription closed");
        }))
    }

    /// Applies one received message to the scheduler's job table
    ///
    /// Created and updated schedules are reloaded from the backend; an id
    /// that no longer exists there is treated as a delete.
    pub fn apply(&self, scheduler: &Scheduler, message: &Message) -> Result<()> {
        let schedule_id: i64 = match message.payload.trim().parse() {
            Ok(id) => id,
            Err(_) => {
                warn!(payload = %message.payload, "Ignoring malformed schedule id");
                return Ok(());
            }
        };

        if message.channel == self.channels.deleted {
            scheduler.remove(schedule_id);
            return Ok(());
        }

        let created = message.channel == self.channels.created;
        if !created && message.channel != self.channels.updated {
            debug!(channel = %message.channel, "Ignoring unknown channel");
            return Ok(());
        }

        match self.backend.get_schedule(schedule_id)? {
            Some(schedule) if created => {
                scheduler.add(&schedule);
            }
            Some(schedule) => scheduler.update(&schedule),
            None => {
                scheduler.remove(schedule_id);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Persister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persister")
            .field("channels", &self.channels)
            .field("available", &self.available.get())
            .finish()
    }
}
