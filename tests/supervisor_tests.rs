//! Supervisor integration tests: strategies, intensity, auto-shutdown
//! and ordered shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gensrv::prelude::*;
use parking_lot::Mutex;

#[derive(Debug, thiserror::Error)]
#[error("worker failure: {0}")]
struct WorkerError(String);

type HandleLog = Arc<Mutex<HashMap<String, Vec<ServerHandle<Worker>>>>>;
type StopLog = Arc<Mutex<Vec<String>>>;

struct Worker {
    label: String,
    stop_log: Option<StopLog>,
    crash_on_start: bool,
}

impl Worker {
    fn plain(label: &str) -> Self {
        Self {
            label: label.into(),
            stop_log: None,
            crash_on_start: false,
        }
    }
}

enum WorkerCall {
    Ping,
}

enum WorkerCast {
    Boom,
    Finish,
}

#[async_trait]
impl GenServer for Worker {
    type State = ();
    type Call = WorkerCall;
    type Cast = WorkerCast;
    type Reply = String;
    type Error = WorkerError;

    async fn init(&mut self, ctx: &mut ServerContext<Self>) -> Result<(), WorkerError> {
        if self.crash_on_start {
            // Queue an immediate failure; the crash lands right after
            // the server goes running.
            ctx.caster().cast(WorkerCast::Boom);
        }
        Ok(())
    }

    async fn handle_call(
        &mut self,
        _request: WorkerCall,
        _state: &mut (),
        _ctx: &mut ServerContext<Self>,
    ) -> Result<String, WorkerError> {
        Ok("pong".into())
    }

    async fn handle_cast(
        &mut self,
        message: WorkerCast,
        _state: &mut (),
        ctx: &mut ServerContext<Self>,
    ) -> Result<(), WorkerError> {
        match message {
            WorkerCast::Boom => Err(WorkerError(format!("{} blew up", self.label))),
            WorkerCast::Finish => {
                ctx.stop(ExitReason::Normal);
                Ok(())
            }
        }
    }

    async fn terminate(
        &mut self,
        _reason: &ExitReason,
        _state: &mut (),
    ) -> Result<(), WorkerError> {
        if let Some(log) = &self.stop_log {
            log.lock().push(self.label.clone());
        }
        Ok(())
    }
}

/// Child spec whose factory records every started handle, so tests can
/// reach (and crash) the current incarnation.
fn logged_spec(id: &str, handles: &HandleLog) -> ChildSpec {
    let label = id.to_string();
    let handles = Arc::clone(handles);
    ChildSpec::new(id, move || {
        let handles = Arc::clone(&handles);
        let label = label.clone();
        async move {
            let handle = server::start(Worker::plain(&label)).await?;
            handles.lock().entry(label).or_default().push(handle.clone());
            Ok(handle)
        }
    })
}

fn crash_looping_spec(id: &str) -> ChildSpec {
    let label = id.to_string();
    ChildSpec::new(id, move || {
        let label = label.clone();
        async move {
            server::start(Worker {
                label,
                stop_log: None,
                crash_on_start: true,
            })
            .await
        }
    })
}

fn latest(handles: &HandleLog, id: &str) -> ServerHandle<Worker> {
    handles.lock().get(id).and_then(|v| v.last().cloned()).unwrap()
}

fn start_count(handles: &HandleLog, id: &str) -> usize {
    handles.lock().get(id).map_or(0, Vec::len)
}

/// Poll until `pred` holds or the deadline passes.
async fn wait_until<F: Fn() -> bool>(pred: F, deadline: Duration) -> bool {
    let started = tokio::time::Instant::now();
    while started.elapsed() < deadline {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    pred()
}

#[tokio::test]
async fn one_for_one_restarts_only_failed_child() {
    let handles: HandleLog = Arc::default();
    let sup = Supervisor::start(
        SupervisorOptions::new()
            .child(logged_spec("w", &handles))
            .child(logged_spec("other", &handles)),
    )
    .await
    .unwrap();

    let old = latest(&handles, "w");
    old.cast(WorkerCast::Boom);

    assert!(wait_until(|| start_count(&handles, "w") == 2, Duration::from_secs(2)).await);
    let fresh = latest(&handles, "w");

    assert!(!old.is_running());
    assert!(fresh.is_running());
    assert_ne!(old.id(), fresh.id());
    assert_eq!(start_count(&handles, "other"), 1);

    let info = sup.child("w").await.unwrap().unwrap();
    assert_eq!(info.restart_count, 1);
    assert_eq!(info.server_id, Some(fresh.id()));

    sup.stop(ExitReason::Shutdown).await;
}

#[tokio::test]
async fn rest_for_one_restarts_failed_child_and_later_siblings() {
    let handles: HandleLog = Arc::default();
    let sup = Supervisor::start(
        SupervisorOptions::new()
            .strategy(Strategy::RestForOne)
            .child(logged_spec("a", &handles))
            .child(logged_spec("b", &handles))
            .child(logged_spec("c", &handles)),
    )
    .await
    .unwrap();

    let old_b = latest(&handles, "b");
    let old_c = latest(&handles, "c");
    old_b.cast(WorkerCast::Boom);

    assert!(
        wait_until(
            || start_count(&handles, "b") == 2 && start_count(&handles, "c") == 2,
            Duration::from_secs(2)
        )
        .await
    );

    // A untouched; B and C replaced; C's old incarnation stopped.
    assert_eq!(start_count(&handles, "a"), 1);
    assert!(latest(&handles, "a").is_running());
    assert!(!old_b.is_running());
    assert!(!old_c.is_running());
    assert!(latest(&handles, "b").is_running());
    assert!(latest(&handles, "c").is_running());

    // Start order is stable across the cascade.
    let children = sup.children().await.unwrap();
    let ids: Vec<&str> = children.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, ["a", "b", "c"]);

    sup.stop(ExitReason::Shutdown).await;
}

#[tokio::test]
async fn one_for_all_restarts_every_child() {
    let handles: HandleLog = Arc::default();
    let sup = Supervisor::start(
        SupervisorOptions::new()
            .strategy(Strategy::OneForAll)
            .child(logged_spec("x", &handles))
            .child(logged_spec("y", &handles)),
    )
    .await
    .unwrap();

    let old_y = latest(&handles, "y");
    latest(&handles, "x").cast(WorkerCast::Boom);

    assert!(
        wait_until(
            || start_count(&handles, "x") == 2 && start_count(&handles, "y") == 2,
            Duration::from_secs(2)
        )
        .await
    );
    assert!(!old_y.is_running());
    assert!(latest(&handles, "x").is_running());
    assert!(latest(&handles, "y").is_running());

    sup.stop(ExitReason::Shutdown).await;
}

#[tokio::test]
async fn max_restarts_exceeded_terminates_supervisor() {
    let handles: HandleLog = Arc::default();
    let sup = Supervisor::start(
        SupervisorOptions::new()
            .restart_intensity(RestartIntensity::new(2, Duration::from_secs(1)))
            .child(logged_spec("stable", &handles))
            .child(crash_looping_spec("hopeless")),
    )
    .await
    .unwrap();

    // The crash loop burns through the intensity window on its own.
    let reason = sup.wait_exit().await;
    assert!(reason.is_error());
    assert!(format!("{reason}").contains("exceeded"));

    // Surviving children were stopped as part of the crash.
    assert!(!latest(&handles, "stable").is_running());
    assert!(!sup.is_running());
}

#[tokio::test]
async fn auto_shutdown_any_significant() {
    let handles: HandleLog = Arc::default();
    let significant = {
        let handles = Arc::clone(&handles);
        ChildSpec::new("s", move || {
            let handles = Arc::clone(&handles);
            async move {
                let handle = server::start(Worker::plain("s")).await?;
                handles.lock().entry("s".into()).or_default().push(handle.clone());
                Ok(handle)
            }
        })
        .restart(RestartPolicy::Temporary)
        .significant(true)
    };

    let sup = Supervisor::start(
        SupervisorOptions::new()
            .auto_shutdown(AutoShutdown::AnySignificant)
            .child(significant)
            .child(logged_spec("t", &handles)),
    )
    .await
    .unwrap();

    latest(&handles, "s").cast(WorkerCast::Finish);

    let reason = sup.wait_exit().await;
    assert_eq!(reason, ExitReason::Normal);
    // The non-significant sibling is down before the supervisor reports
    // stopped.
    assert!(!latest(&handles, "t").is_running());
}

#[tokio::test]
async fn auto_shutdown_all_significant_waits_for_the_last_one() {
    let handles: HandleLog = Arc::default();
    let significant = |id: &str| {
        let label = id.to_string();
        let handles = Arc::clone(&handles);
        ChildSpec::new(id, move || {
            let handles = Arc::clone(&handles);
            let label = label.clone();
            async move {
                let handle = server::start(Worker::plain(&label)).await?;
                handles.lock().entry(label).or_default().push(handle.clone());
                Ok(handle)
            }
        })
        .restart(RestartPolicy::Temporary)
        .significant(true)
    };

    let sup = Supervisor::start(
        SupervisorOptions::new()
            .auto_shutdown(AutoShutdown::AllSignificant)
            .child(significant("s1"))
            .child(significant("s2")),
    )
    .await
    .unwrap();

    latest(&handles, "s1").cast(WorkerCast::Finish);
    latest(&handles, "s1").wait_exit().await;

    // One significant child is still up; the supervisor keeps running.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sup.is_running());

    latest(&handles, "s2").cast(WorkerCast::Finish);
    let reason = sup.wait_exit().await;
    assert_eq!(reason, ExitReason::Normal);
}

#[tokio::test]
async fn shutdown_stops_children_in_reverse_start_order() {
    let stop_log: StopLog = Arc::default();
    let spec = |id: &str| {
        let label = id.to_string();
        let log = Arc::clone(&stop_log);
        ChildSpec::new(id, move || {
            let label = label.clone();
            let log = Arc::clone(&log);
            async move {
                server::start(Worker {
                    label,
                    stop_log: Some(log),
                    crash_on_start: false,
                })
                .await
            }
        })
    };

    let sup = Supervisor::start(
        SupervisorOptions::new()
            .child(spec("a"))
            .child(spec("b"))
            .child(spec("c")),
    )
    .await
    .unwrap();

    sup.stop(ExitReason::Shutdown).await;

    assert_eq!(*stop_log.lock(), vec!["c", "b", "a"]);
}

#[tokio::test]
async fn duplicate_child_id_is_rejected() {
    let handles: HandleLog = Arc::default();
    let sup = Supervisor::start(SupervisorOptions::new().child(logged_spec("w", &handles)))
        .await
        .unwrap();

    let err = sup.start_child(logged_spec("w", &handles)).await.unwrap_err();
    assert!(matches!(err, SupervisorError::DuplicateChild { .. }));
    assert_eq!(err.child_id(), Some("w"));

    sup.stop(ExitReason::Shutdown).await;
}

#[tokio::test]
async fn unknown_child_id_is_reported() {
    let sup = Supervisor::start(SupervisorOptions::new()).await.unwrap();

    let err = sup.terminate_child("ghost").await.unwrap_err();
    assert!(matches!(err, SupervisorError::ChildNotFound { .. }));
    let err = sup.restart_child("ghost").await.unwrap_err();
    assert!(matches!(err, SupervisorError::ChildNotFound { .. }));

    sup.stop(ExitReason::Shutdown).await;
}

#[tokio::test]
async fn terminate_child_restarts_permanent_children() {
    let handles: HandleLog = Arc::default();
    let sup = Supervisor::start(SupervisorOptions::new().child(logged_spec("w", &handles)))
        .await
        .unwrap();

    let old = latest(&handles, "w");
    sup.terminate_child("w").await.unwrap();

    // Permanent children come straight back.
    assert_eq!(start_count(&handles, "w"), 2);
    assert!(!old.is_running());
    assert!(latest(&handles, "w").is_running());

    sup.stop(ExitReason::Shutdown).await;
}

#[tokio::test]
async fn terminate_child_leaves_temporary_children_down() {
    let handles: HandleLog = Arc::default();
    let spec = logged_spec("w", &handles).restart(RestartPolicy::Temporary);
    let sup = Supervisor::start(SupervisorOptions::new().child(spec))
        .await
        .unwrap();

    sup.terminate_child("w").await.unwrap();

    assert_eq!(start_count(&handles, "w"), 1);
    let info = sup.child("w").await.unwrap().unwrap();
    assert!(!info.running);

    // An explicit restart revives it regardless of policy.
    let revived = sup.restart_child("w").await.unwrap();
    assert!(revived.is_running());
    assert_eq!(start_count(&handles, "w"), 2);

    sup.stop(ExitReason::Shutdown).await;
}

#[tokio::test]
async fn simple_one_for_one_stamps_children_from_template() {
    let template = ChildTemplate::new(|label: String| async move {
        server::start(Worker::plain(&label)).await
    });

    let sup = Supervisor::start(
        SupervisorOptions::new()
            .strategy(Strategy::SimpleOneForOne)
            .child_template(template),
    )
    .await
    .unwrap();

    let first = sup.start_child_with("one".to_string()).await.unwrap();
    let second = sup.start_child_with("two".to_string()).await.unwrap();
    assert!(first.is_running());
    assert!(second.is_running());
    assert_eq!(sup.count_children().await.unwrap(), 2);

    // Wrong argument type is caught at start time.
    let err = sup.start_child_with(42u32).await.unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::InvalidSimpleOneForOneConfig { .. }
    ));

    // Static specs are not accepted under this strategy.
    let handles: HandleLog = Arc::default();
    let err = sup.start_child(logged_spec("static", &handles)).await.unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::InvalidSimpleOneForOneConfig { .. }
    ));

    sup.stop(ExitReason::Shutdown).await;
}

#[tokio::test]
async fn simple_one_for_one_requires_a_template() {
    let err = Supervisor::start(
        SupervisorOptions::new().strategy(Strategy::SimpleOneForOne),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SupervisorError::Spawn(_)));
    assert!(err.to_string().contains("initialize"));
}

#[tokio::test]
async fn nested_supervisor_failure_propagates_upward() {
    let sub_starts: Arc<Mutex<u32>> = Arc::default();
    let counter = Arc::clone(&sub_starts);

    let sub_spec = ChildSpec::new_erased("subsystem", move || {
        let counter = Arc::clone(&counter);
        async move {
            *counter.lock() += 1;
            Supervisor::start(
                SupervisorOptions::new()
                    .restart_intensity(RestartIntensity::new(1, Duration::from_secs(1)))
                    .child(crash_looping_spec("doomed")),
            )
            .await
            .map(|sup| sup.server_ref())
            .map_err(|e| match e {
                SupervisorError::Spawn(spawn) => spawn,
                other => SpawnError::InitFailed {
                    server_id: ServerId::new(),
                    source: Box::new(other),
                },
            })
        }
    });

    let parent = Supervisor::start(
        SupervisorOptions::new()
            .restart_intensity(RestartIntensity::new(2, Duration::from_secs(5)))
            .child(sub_spec),
    )
    .await
    .unwrap();

    // Each sub-supervisor breaches its own intensity and dies with an
    // error exit; the parent restarts it until its own window breaches.
    let reason = parent.wait_exit().await;
    assert!(reason.is_error());
    assert!(*sub_starts.lock() >= 2);
}
