//! Server engine integration tests: ordering, timeouts, lifecycle and
//! termination semantics.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use async_trait::async_trait;
use gensrv::prelude::*;
use gensrv::registry::RegistryError;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
#[error("counter failure: {0}")]
struct CounterError(String);

struct Counter;

enum CounterCall {
    Get,
    Reject,
}

enum CounterCast {
    Increment,
    Boom,
    Finish,
}

#[async_trait]
impl GenServer for Counter {
    type State = u64;
    type Call = CounterCall;
    type Cast = CounterCast;
    type Reply = u64;
    type Error = CounterError;

    async fn init(&mut self, _ctx: &mut ServerContext<Self>) -> Result<u64, CounterError> {
        Ok(0)
    }

    async fn handle_call(
        &mut self,
        request: CounterCall,
        state: &mut u64,
        _ctx: &mut ServerContext<Self>,
    ) -> Result<u64, CounterError> {
        match request {
            CounterCall::Get => Ok(*state),
            CounterCall::Reject => Err(CounterError("rejected".into())),
        }
    }

    async fn handle_cast(
        &mut self,
        message: CounterCast,
        state: &mut u64,
        ctx: &mut ServerContext<Self>,
    ) -> Result<(), CounterError> {
        match message {
            CounterCast::Increment => {
                *state += 1;
                Ok(())
            }
            CounterCast::Boom => Err(CounterError("boom".into())),
            CounterCast::Finish => {
                ctx.stop(ExitReason::Normal);
                Ok(())
            }
        }
    }
}

/// Replies "ok" after sleeping, to exercise client-side deadlines.
struct Sleepy {
    delay: Duration,
}

#[async_trait]
impl GenServer for Sleepy {
    type State = ();
    type Call = ();
    type Cast = ();
    type Reply = String;
    type Error = CounterError;

    async fn init(&mut self, _ctx: &mut ServerContext<Self>) -> Result<(), CounterError> {
        Ok(())
    }

    async fn handle_call(
        &mut self,
        _request: (),
        _state: &mut (),
        _ctx: &mut ServerContext<Self>,
    ) -> Result<String, CounterError> {
        tokio::time::sleep(self.delay).await;
        Ok("ok".into())
    }

    async fn handle_cast(
        &mut self,
        _message: (),
        _state: &mut (),
        _ctx: &mut ServerContext<Self>,
    ) -> Result<(), CounterError> {
        Ok(())
    }
}

struct FailingInit {
    hang: bool,
}

#[async_trait]
impl GenServer for FailingInit {
    type State = ();
    type Call = ();
    type Cast = ();
    type Reply = ();
    type Error = CounterError;

    async fn init(&mut self, _ctx: &mut ServerContext<Self>) -> Result<(), CounterError> {
        if self.hang {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Err(CounterError("init refused".into()))
    }

    async fn handle_call(
        &mut self,
        _request: (),
        _state: &mut (),
        _ctx: &mut ServerContext<Self>,
    ) -> Result<(), CounterError> {
        Ok(())
    }

    async fn handle_cast(
        &mut self,
        _message: (),
        _state: &mut (),
        _ctx: &mut ServerContext<Self>,
    ) -> Result<(), CounterError> {
        Ok(())
    }
}

#[tokio::test]
async fn counter_via_casts_then_call() {
    let counter = server::start(Counter).await.unwrap();

    counter.cast(CounterCast::Increment);
    counter.cast(CounterCast::Increment);
    counter.cast(CounterCast::Increment);

    // The call queues behind the casts, so it observes all three.
    assert_eq!(counter.call(CounterCall::Get).await.unwrap(), 3);

    counter.stop(ExitReason::Normal).await;
}

#[tokio::test]
async fn per_sender_fifo_is_preserved() {
    let counter = server::start(Counter).await.unwrap();

    for _ in 0..100 {
        counter.cast(CounterCast::Increment);
    }
    assert_eq!(counter.call(CounterCall::Get).await.unwrap(), 100);

    counter.stop(ExitReason::Normal).await;
}

#[tokio::test]
async fn call_timeout_does_not_break_the_server() {
    let sleepy = server::start(Sleepy {
        delay: Duration::from_millis(200),
    })
    .await
    .unwrap();

    let err = sleepy
        .call_timeout((), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    // The server is still healthy; a patient caller succeeds even though
    // the first envelope is still being worked off.
    let reply = sleepy
        .call_timeout((), Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(reply, "ok");

    sleepy.stop(ExitReason::Normal).await;
}

#[tokio::test]
async fn call_handler_error_keeps_server_alive() {
    let counter = server::start(Counter).await.unwrap();

    let err = counter.call(CounterCall::Reject).await.unwrap_err();
    assert!(matches!(err, CallError::Handler(_)));

    assert!(counter.is_running());
    assert_eq!(counter.call(CounterCall::Get).await.unwrap(), 0);

    counter.stop(ExitReason::Normal).await;
}

#[tokio::test]
async fn cast_handler_error_crashes_server() {
    let counter = server::start(Counter).await.unwrap();

    counter.cast(CounterCast::Boom);
    let reason = counter.wait_exit().await;

    assert!(reason.is_error());
    assert!(!counter.is_running());

    let err = counter.call(CounterCall::Get).await.unwrap_err();
    assert!(err.is_not_running());
}

#[tokio::test]
async fn stop_resolves_after_full_termination() {
    let counter = server::start(Counter).await.unwrap();

    counter.stop(ExitReason::Normal).await;

    assert!(!counter.is_running());
    assert_eq!(counter.status(), ServerStatus::Stopped);

    // Subsequent traffic is rejected or dropped.
    let err = counter.call(CounterCall::Get).await.unwrap_err();
    assert!(err.is_not_running());
    counter.cast(CounterCast::Increment); // silent no-op
}

#[tokio::test]
async fn server_can_stop_itself_from_a_handler() {
    let counter = server::start(Counter).await.unwrap();

    counter.cast(CounterCast::Finish);
    let reason = counter.wait_exit().await;

    assert_eq!(reason, ExitReason::Normal);
}

#[tokio::test]
async fn send_after_delivers_and_cancel_prevents() {
    let counter = server::start(Counter).await.unwrap();

    counter.send_after(CounterCast::Increment, Duration::from_millis(50));
    let cancelled = counter.send_after(CounterCast::Increment, Duration::from_millis(50));
    cancelled.cancel();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(counter.call(CounterCall::Get).await.unwrap(), 1);

    counter.stop(ExitReason::Normal).await;
}

#[tokio::test]
async fn init_error_fails_start() {
    let err = server::start(FailingInit { hang: false }).await.unwrap_err();
    assert!(matches!(err, SpawnError::InitFailed { .. }));
    assert!(err.to_string().contains("init refused"));
}

#[tokio::test]
async fn init_deadline_fails_start() {
    let err = server::start_with(
        FailingInit { hang: true },
        ServerOptions::new().init_timeout(Duration::from_millis(50)),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SpawnError::InitTimeout { .. }));
}

#[tokio::test]
async fn named_server_registers_and_unregisters() {
    let name = format!("engine-named-{}", Uuid::new_v4());
    let counter = server::start_with(Counter, ServerOptions::new().name(&name))
        .await
        .unwrap();

    assert_eq!(counter.name(), Some(name.as_str()));
    let found = Registry::global().lookup::<Counter>(&name).unwrap();
    assert_eq!(found.id(), counter.id());

    // Second claim on the same name is rejected.
    let err = server::start_with(Counter, ServerOptions::new().name(&name))
        .await
        .unwrap_err();
    assert!(matches!(err, SpawnError::AlreadyRegistered { .. }));

    counter.stop(ExitReason::Normal).await;

    // The entry is purged within bounded time after termination.
    let mut gone = false;
    for _ in 0..50 {
        match Registry::global().lookup::<Counter>(&name) {
            Err(RegistryError::NotRegistered { .. }) => {
                gone = true;
                break;
            }
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    assert!(gone);
}

#[tokio::test]
async fn lifecycle_events_cover_start_and_crash() {
    let mut events = gensrv::events::subscribe();

    let counter = server::start(Counter).await.unwrap();
    let id = counter.id();
    counter.cast(CounterCast::Boom);
    counter.wait_exit().await;

    let mut started = false;
    let mut crashed = false;
    for _ in 0..200 {
        let Ok(event) = events.try_recv() else {
            tokio::time::sleep(Duration::from_millis(5)).await;
            continue;
        };
        if event.server_id != id {
            continue;
        }
        match event.kind {
            LifecycleEventKind::Started => started = true,
            LifecycleEventKind::Crashed { .. } => crashed = true,
            LifecycleEventKind::Terminated { .. } => {}
        }
        if started && crashed {
            break;
        }
    }
    assert!(started, "expected a started event");
    assert!(crashed, "expected a crashed event");
}

#[tokio::test]
async fn stats_track_processing() {
    let counter = server::start(Counter).await.unwrap();

    counter.cast(CounterCast::Increment);
    counter.cast(CounterCast::Increment);
    counter.call(CounterCall::Get).await.unwrap();

    let stats = counter.stats();
    assert_eq!(stats.messages_processed, 3);
    assert!(stats.last_message_at.is_some());
    assert_eq!(stats.queue_depth, 0);

    counter.stop(ExitReason::Normal).await;
}
