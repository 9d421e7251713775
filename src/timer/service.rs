//! Durable timer service.
//!
//! The service is itself a GenServer: scheduling and cancellation are
//! calls, the periodic scan is a cast from a ticker task, so the entry
//! table never sees concurrent access. Entries persist through the
//! storage adapter and are reloaded at start; overdue entries fire on
//! the first tick (catch-up). Delivery is best-effort, at most once per
//! fire.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::entry::{storage_key, TimerEntry, TIMER_KEY_PREFIX};
use crate::persistence::{
    PersistenceConfig, PersistenceError, PersistenceManager, StorageAdapter,
};
use crate::registry::Registry;
use crate::server::{
    self, CallError, ExitReason, GenServer, ServerContext, ServerHandle, ServerOptions,
    SpawnError,
};
use crate::util::{ServerId, TimerId};

/// Default scan interval.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Errors raised by timer-service operations.
#[derive(Debug, Error)]
pub enum TimerError {
    /// Persisting or deleting an entry failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// The timer payload could not be serialized.
    #[error("failed to serialize timer message: {source}")]
    Serialization {
        #[source]
        source: serde_json::Error,
    },

    /// The service is not running.
    #[error("timer service {service_id} is not running")]
    NotRunning { service_id: ServerId },

    /// A request to the service timed out.
    #[error("request to timer service {service_id} timed out after {timeout:?}")]
    CallTimeout {
        service_id: ServerId,
        timeout: Duration,
    },

    /// Internal request/reply shape violation.
    #[error("timer service protocol violation: {reason}")]
    Protocol { reason: String },
}

/// Start-time configuration for a timer service.
#[derive(Debug, Clone)]
pub struct TimerServiceOptions {
    /// Scan interval for due entries. Default 1 second.
    pub tick_interval: Duration,

    /// Registry name for the service itself.
    pub name: Option<String>,

    /// Persistence configuration for the entry store.
    pub persistence: PersistenceConfig,
}

impl Default for TimerServiceOptions {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            name: None,
            persistence: PersistenceConfig::default(),
        }
    }
}

pub(crate) enum TimerCall<M> {
    Schedule {
        target: String,
        message: M,
        delay: Duration,
        repeat: Option<Duration>,
    },
    Cancel(TimerId),
    Get(TimerId),
    GetAll,
}

pub(crate) enum TimerReply {
    Scheduled(TimerId),
    Cancelled(bool),
    Entry(Option<TimerEntry>),
    Entries(Vec<TimerEntry>),
}

pub(crate) enum TimerCast {
    Tick,
}

/// In-memory entry table, reloaded from storage at init.
pub(crate) struct TimerTable {
    entries: HashMap<TimerId, TimerEntry>,
}

/// The timer-service behavior, generic over the cast payload type it
/// delivers to targets.
pub(crate) struct TimerServer<M> {
    manager: Arc<PersistenceManager>,
    _marker: PhantomData<fn(M)>,
}

impl<M> TimerServer<M>
where
    M: Serialize + DeserializeOwned + Send + 'static,
{
    async fn persist_entry(
        &self,
        ctx: &ServerContext<Self>,
        entry: &TimerEntry,
    ) -> Result<(), TimerError> {
        let value =
            serde_json::to_value(entry).map_err(|source| TimerError::Serialization { source })?;
        self.manager
            .save(&entry.storage_key(), value, ctx.server_id(), ctx.name())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<M> GenServer for TimerServer<M>
where
    M: Serialize + DeserializeOwned + Send + 'static,
{
    type State = TimerTable;
    type Call = TimerCall<M>;
    type Cast = TimerCast;
    type Reply = TimerReply;
    type Error = TimerError;

    /// Reload every persisted entry. Unreadable entries are logged and
    /// skipped rather than blocking recovery of the rest.
    async fn init(&mut self, _ctx: &mut ServerContext<Self>) -> Result<TimerTable, TimerError> {
        let mut entries = HashMap::new();
        for key in self.manager.list_keys(Some(TIMER_KEY_PREFIX)).await? {
            match self.manager.load(&key, None).await {
                Ok((value, _meta)) => match serde_json::from_value::<TimerEntry>(value) {
                    Ok(entry) => {
                        entries.insert(entry.id, entry);
                    }
                    Err(e) => warn!(key = %key, error = %e, "skipping undecodable timer entry"),
                },
                Err(e) => warn!(key = %key, error = %e, "skipping unreadable timer entry"),
            }
        }
        debug!(count = entries.len(), "timer entries recovered");
        Ok(TimerTable { entries })
    }

    async fn handle_call(
        &mut self,
        request: TimerCall<M>,
        state: &mut TimerTable,
        ctx: &mut ServerContext<Self>,
    ) -> Result<TimerReply, TimerError> {
        match request {
            TimerCall::Schedule {
                target,
                message,
                delay,
                repeat,
            } => {
                let message = serde_json::to_value(&message)
                    .map_err(|source| TimerError::Serialization { source })?;
                let fire_at = Utc::now()
                    + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::zero());
                let entry = TimerEntry {
                    id: TimerId::new(),
                    fire_at,
                    target,
                    message,
                    repeat_interval_ms: repeat.map(|r| r.as_millis() as u64),
                };

                // Persist before arming: a crash right after `schedule`
                // returns must not lose the timer.
                self.persist_entry(ctx, &entry).await?;
                let id = entry.id;
                state.entries.insert(id, entry);
                Ok(TimerReply::Scheduled(id))
            }

            TimerCall::Cancel(id) => {
                let existed = state.entries.remove(&id).is_some();
                let deleted = self.manager.delete(&storage_key(id)).await?;
                Ok(TimerReply::Cancelled(existed || deleted))
            }

            TimerCall::Get(id) => Ok(TimerReply::Entry(state.entries.get(&id).cloned())),

            TimerCall::GetAll => {
                let mut entries: Vec<TimerEntry> = state.entries.values().cloned().collect();
                entries.sort_by_key(|entry| entry.fire_at);
                Ok(TimerReply::Entries(entries))
            }
        }
    }

    /// One scan: fire every due entry, re-arm repeating ones, delete
    /// one-shot ones. Failures are logged, never retried, and never
    /// bring the service down.
    async fn handle_cast(
        &mut self,
        _message: TimerCast,
        state: &mut TimerTable,
        ctx: &mut ServerContext<Self>,
    ) -> Result<(), TimerError> {
        let now = Utc::now();
        let due: Vec<TimerId> = state
            .entries
            .values()
            .filter(|entry| entry.is_due(now))
            .map(|entry| entry.id)
            .collect();

        for id in due {
            let Some(mut entry) = state.entries.remove(&id) else {
                continue;
            };

            match serde_json::from_value::<M>(entry.message.clone()) {
                Ok(message) => match Registry::global().caster::<M>(&entry.target) {
                    Some(caster) => {
                        if !caster.cast(message) {
                            debug!(timer_id = %id, target = %entry.target, "timer target not accepting casts");
                        }
                    }
                    None => {
                        debug!(timer_id = %id, target = %entry.target, "timer target not registered, dropping fire");
                    }
                },
                Err(e) => {
                    warn!(timer_id = %id, error = %e, "timer payload no longer decodes, dropping fire");
                }
            }

            if let Some(repeat) = entry.repeat_interval() {
                entry.fire_at =
                    now + ChronoDuration::from_std(repeat).unwrap_or(ChronoDuration::zero());
                if let Err(e) = self.persist_entry(ctx, &entry).await {
                    warn!(timer_id = %id, error = %e, "failed to re-persist repeating timer");
                }
                state.entries.insert(id, entry);
            } else if let Err(e) = self.manager.delete(&storage_key(id)).await {
                warn!(timer_id = %id, error = %e, "failed to delete fired timer");
            }
        }
        Ok(())
    }
}

/// A running timer service delivering payloads of type `M`.
pub struct TimerService<M>
where
    M: Serialize + DeserializeOwned + Send + 'static,
{
    handle: ServerHandle<TimerServer<M>>,
    ticker: AbortHandle,
}

impl<M> TimerService<M>
where
    M: Serialize + DeserializeOwned + Send + 'static,
{
    /// Start the service over `adapter` and begin ticking.
    pub async fn start(
        adapter: Arc<dyn StorageAdapter>,
        options: TimerServiceOptions,
    ) -> Result<Self, SpawnError> {
        let manager = Arc::new(PersistenceManager::new(adapter, options.persistence));
        let behavior = TimerServer::<M> {
            manager,
            _marker: PhantomData,
        };

        let mut server_options = ServerOptions::new();
        if let Some(name) = options.name {
            server_options = server_options.name(name);
        }
        let handle = server::start_with(behavior, server_options).await?;

        let tick = options.tick_interval;
        let ticker_handle = handle.clone();
        let ticker = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + tick;
            let mut ticks = tokio::time::interval_at(start, tick);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if !ticker_handle.is_running() {
                    break;
                }
                ticker_handle.cast(TimerCast::Tick);
            }
        });

        Ok(Self {
            handle,
            ticker: ticker.abort_handle(),
        })
    }

    /// The service's server id.
    pub fn id(&self) -> ServerId {
        self.handle.id()
    }

    /// Non-blocking status probe.
    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Schedule a one-shot delivery of `message` to the server
    /// registered under `target`, `delay` from now. Persisted before the
    /// call returns.
    pub async fn schedule(
        &self,
        target: impl Into<String>,
        message: M,
        delay: Duration,
    ) -> Result<TimerId, TimerError> {
        self.schedule_inner(target.into(), message, delay, None).await
    }

    /// Schedule a repeating delivery: first fire after `delay`, then
    /// every `every`.
    pub async fn schedule_repeating(
        &self,
        target: impl Into<String>,
        message: M,
        delay: Duration,
        every: Duration,
    ) -> Result<TimerId, TimerError> {
        self.schedule_inner(target.into(), message, delay, Some(every))
            .await
    }

    /// Cancel a timer. Returns `true` if it existed. Synchronous with
    /// respect to future ticks; an in-flight delivery is not recalled.
    pub async fn cancel(&self, id: TimerId) -> Result<bool, TimerError> {
        match self.request(TimerCall::Cancel(id)).await? {
            TimerReply::Cancelled(existed) => Ok(existed),
            _ => Err(self.protocol_error("cancel")),
        }
    }

    /// Fetch one entry.
    pub async fn get(&self, id: TimerId) -> Result<Option<TimerEntry>, TimerError> {
        match self.request(TimerCall::Get(id)).await? {
            TimerReply::Entry(entry) => Ok(entry),
            _ => Err(self.protocol_error("get")),
        }
    }

    /// All pending entries, soonest first.
    pub async fn entries(&self) -> Result<Vec<TimerEntry>, TimerError> {
        match self.request(TimerCall::GetAll).await? {
            TimerReply::Entries(entries) => Ok(entries),
            _ => Err(self.protocol_error("entries")),
        }
    }

    /// Stop ticking and shut the service down. Entries stay in storage
    /// for the next service instance over the same adapter.
    pub async fn stop(&self) {
        self.ticker.abort();
        self.handle.stop(ExitReason::Normal).await;
    }

    async fn schedule_inner(
        &self,
        target: String,
        message: M,
        delay: Duration,
        repeat: Option<Duration>,
    ) -> Result<TimerId, TimerError> {
        match self
            .request(TimerCall::Schedule {
                target,
                message,
                delay,
                repeat,
            })
            .await?
        {
            TimerReply::Scheduled(id) => Ok(id),
            _ => Err(self.protocol_error("schedule")),
        }
    }

    async fn request(&self, call: TimerCall<M>) -> Result<TimerReply, TimerError> {
        self.handle.call(call).await.map_err(|e| match e {
            CallError::Handler(err) => err,
            CallError::Timeout { timeout, .. } => TimerError::CallTimeout {
                service_id: self.id(),
                timeout,
            },
            CallError::NotRunning { .. } => TimerError::NotRunning {
                service_id: self.id(),
            },
        })
    }

    fn protocol_error(&self, operation: &str) -> TimerError {
        TimerError::Protocol {
            reason: format!("unexpected reply to {operation}"),
        }
    }
}

impl<M> fmt::Debug for TimerService<M>
where
    M: Serialize + DeserializeOwned + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerService")
            .field("id", &self.handle.id())
            .field("status", &self.handle.status())
            .finish()
    }
}
