use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use tokio::task::LocalSet;
use tokio::time::{sleep, Instant};

use super::*;

type Module = &'static str;
type EventLog = Rc<RefCell<Vec<(u128, LoaderEvent<Module>)>>>;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn in_local_set<F: Future>(f: F) -> F::Output {
    init_logger();
    LocalSet::new().run_until(f).await
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// A factory settling with `result` after `millis`
fn delayed(millis: u64, result: Result<Module, &'static str>) -> Reference<Module> {
    Reference::factory(move || async move {
        sleep(ms(millis)).await;
        result
    })
}

fn controller() -> AsyncLoadController<Module> {
    AsyncLoadController::new(Rc::new(NoResolver), Rc::new(TokioLocalSpawner))
}

/// Keeps the join handles, so a test can tell a panicked task from a
/// cancelled one.
#[derive(Default)]
struct TrackingSpawner(RefCell<Vec<tokio::task::JoinHandle<()>>>);

impl Spawn for TrackingSpawner {
    fn spawn(&self, fut: futures_util::future::LocalBoxFuture<'static, ()>) -> SpawnedTask {
        let handle = tokio::task::spawn_local(fut);
        let abort = handle.abort_handle();
        self.0.borrow_mut().push(handle);
        SpawnedTask::new(move || abort.abort())
    }
}

impl TrackingSpawner {
    /// Waits for every task spawned so far, which must have ended or been cancelled.
    async fn assert_no_panic(&self) {
        let handles = std::mem::take(&mut *self.0.borrow_mut());
        for handle in handles {
            if let Err(err) = handle.await {
                assert!(!err.is_panic(), "task panicked: {err}");
            }
        }
    }
}

fn record(controller: &AsyncLoadController<Module>) -> EventLog {
    let started = Instant::now();
    let log: EventLog = Default::default();
    let sink = Rc::clone(&log);
    controller.on_event(move |event| {
        sink.borrow_mut()
            .push((started.elapsed().as_millis(), event.clone()));
    });
    log
}

fn count(log: &EventLog, pred: impl Fn(&LoaderEvent<Module>) -> bool) -> usize {
    log.borrow().iter().filter(|(_, e)| pred(e)).count()
}

fn at(log: &EventLog, pred: impl Fn(&LoaderEvent<Module>) -> bool) -> Option<u128> {
    log.borrow().iter().find(|(_, e)| pred(e)).map(|(t, _)| *t)
}

fn is_failed(e: &LoaderEvent<Module>) -> bool {
    matches!(e, LoaderEvent::Failed(_))
}

fn is_resolved(e: &LoaderEvent<Module>) -> bool {
    matches!(e, LoaderEvent::Resolved(_))
}

fn is_fallback(e: &LoaderEvent<Module>) -> bool {
    matches!(e, LoaderEvent::FallbackShown { .. })
}

fn is_pending(e: &LoaderEvent<Module>) -> bool {
    matches!(e, LoaderEvent::Pending { .. })
}

#[tokio::test(start_paused = true)]
async fn resolves_before_timeout() {
    in_local_set(async {
        let ctl = controller();
        let log = record(&ctl);
        let policy = LoadPolicy::default().with_timeout(ms(100));
        assert!(ctl.start(LoadRequest::new(delayed(50, Ok("comp-a")), policy)));
        assert_eq!(ctl.state(), LoadState::Pending);

        sleep(ms(500)).await;

        assert_eq!(ctl.state(), LoadState::Resolved("comp-a"));
        assert_eq!(at(&log, is_resolved), Some(50));
        assert_eq!(count(&log, is_failed), 0);
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn timeout_wins_and_late_resolution_is_discarded() {
    in_local_set(async {
        let ctl = controller();
        let log = record(&ctl);
        let policy = LoadPolicy::default().with_timeout(ms(50));
        ctl.start(LoadRequest::new(delayed(100, Ok("comp-a")), policy));

        sleep(ms(75)).await;
        assert_eq!(at(&log, is_failed), Some(50));
        let LoadState::Failed(error) = ctl.state() else {
            panic!("expected a failure, got {:?}", ctl.state());
        };
        assert!(error.is_timeout());
        assert_eq!(error.to_string(), "load factory timeout");
        let events_after_timeout = log.borrow().len();

        sleep(ms(200)).await;
        assert_eq!(log.borrow().len(), events_after_timeout);
        assert_eq!(count(&log, is_failed), 1);
        assert!(ctl.state().error().is_some_and(LoadError::is_timeout));
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn minimum_visible_time_holds_back_resolution() {
    in_local_set(async {
        let ctl = controller();
        let log = record(&ctl);
        let policy = LoadPolicy::default().with_minimum_visible_time(ms(300));
        ctl.start(LoadRequest::new(delayed(50, Ok("comp-a")), policy));

        sleep(ms(299)).await;
        assert_eq!(ctl.state(), LoadState::Pending);

        sleep(ms(100)).await;
        assert_eq!(at(&log, is_resolved), Some(300));
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn slow_fetch_is_not_delayed_further_by_minimum_time() {
    in_local_set(async {
        let ctl = controller();
        let log = record(&ctl);
        let policy = LoadPolicy::default().with_minimum_visible_time(ms(50));
        ctl.start(LoadRequest::new(delayed(120, Ok("comp-a")), policy));

        sleep(ms(500)).await;
        assert_eq!(at(&log, is_resolved), Some(120));
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn fast_fetch_never_shows_the_placeholder() {
    in_local_set(async {
        let ctl = controller();
        let log = record(&ctl);
        let policy = LoadPolicy::default().with_delay_before_loading(ms(100));
        ctl.start(LoadRequest::new(delayed(30, Ok("comp-a")), policy));
        assert!(!ctl.fallback_visible());

        sleep(ms(500)).await;
        assert_eq!(count(&log, is_fallback), 0);
        assert_eq!(at(&log, is_resolved), Some(30));
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn fast_fetch_with_minimum_time_still_skips_the_placeholder() {
    in_local_set(async {
        let ctl = controller();
        let log = record(&ctl);
        let policy = LoadPolicy::default()
            .with_delay_before_loading(ms(100))
            .with_minimum_visible_time(ms(200));
        ctl.start(LoadRequest::new(delayed(30, Ok("comp-a")), policy));

        sleep(ms(500)).await;
        assert_eq!(count(&log, is_fallback), 0);
        assert_eq!(at(&log, is_resolved), Some(200));
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn slow_fetch_shows_the_placeholder_after_the_delay() {
    in_local_set(async {
        let ctl = controller();
        let log = record(&ctl);
        let policy = LoadPolicy::default().with_delay_before_loading(ms(100));
        ctl.start(LoadRequest::new(delayed(250, Ok("comp-a")), policy));

        sleep(ms(150)).await;
        assert!(ctl.fallback_visible());

        sleep(ms(500)).await;
        assert_eq!(at(&log, is_fallback), Some(100));
        assert_eq!(at(&log, is_resolved), Some(250));
        assert!(!ctl.fallback_visible());
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn zero_delay_shows_the_placeholder_immediately() {
    in_local_set(async {
        let ctl = controller();
        let log = record(&ctl);
        ctl.start(LoadRequest::new(
            delayed(10, Ok("comp-a")),
            LoadPolicy::default(),
        ));
        assert!(ctl.fallback_visible());
        assert_eq!(
            log.borrow()
                .iter()
                .map(|(t, e)| (*t, e.clone()))
                .collect::<Vec<_>>(),
            vec![
                (0, LoaderEvent::Pending { attempt: 1 }),
                (0, LoaderEvent::FallbackShown { attempt: 1 }),
            ]
        );
        sleep(ms(50)).await;
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn retry_outside_failed_state_is_a_noop() {
    in_local_set(async {
        let ctl = controller();
        assert!(!ctl.retry());
        assert_eq!(ctl.state(), LoadState::Idle);

        let log = record(&ctl);
        ctl.start(LoadRequest::new(
            delayed(20, Ok("comp-a")),
            LoadPolicy::default(),
        ));
        assert!(!ctl.retry());
        assert_eq!(ctl.attempts(), 1);

        sleep(ms(50)).await;
        let events = log.borrow().len();
        assert!(!ctl.retry());
        assert_eq!(log.borrow().len(), events);
        assert_eq!(ctl.state(), LoadState::Resolved("comp-a"));
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn retry_is_refused_once_max_attempts_is_exceeded() {
    in_local_set(async {
        let ctl = controller();
        let log = record(&ctl);
        let policy = LoadPolicy::default()
            .with_max_attempts(1)
            .with_retry_predicate(|_, _| true);
        ctl.start(LoadRequest::new(delayed(10, Err("network down")), policy));

        sleep(ms(20)).await;
        assert!(ctl.state().error().is_some());
        assert!(ctl.retry());
        assert_eq!(ctl.attempts(), 2);
        assert_eq!(ctl.state(), LoadState::Pending);

        sleep(ms(20)).await;
        assert!(!ctl.retry());
        let Some(LoadError::RetryExhausted { attempts, last, .. }) = ctl.state().error().cloned()
        else {
            panic!("expected exhaustion, got {:?}", ctl.state());
        };
        assert_eq!(attempts, 2);
        assert_eq!(
            *last,
            LoadError::Failure {
                reference: "factory".into(),
                message: "network down".into()
            }
        );

        // Terminal: nothing happens anymore
        let events = log.borrow().len();
        assert!(!ctl.retry());
        sleep(ms(50)).await;
        assert_eq!(log.borrow().len(), events);
        assert_eq!(count(&log, is_pending), 2);
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn predicate_sees_the_error_and_attempt_count() {
    in_local_set(async {
        let ctl = controller();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let policy = LoadPolicy::default().with_retry_predicate(move |error, attempts| {
            sink.borrow_mut().push((error.clone(), attempts));
            false
        });
        ctl.start(LoadRequest::new(delayed(10, Err("boom")), policy));

        sleep(ms(20)).await;
        assert!(!ctl.retry());
        assert!(ctl.state().error().is_some_and(LoadError::is_terminal));
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].1, 1);
        assert_eq!(
            seen.borrow()[0].0.root_cause().to_string(),
            "load factory failed: boom"
        );
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn auto_retry_relaunches_after_linear_backoff() {
    in_local_set(async {
        let calls = Rc::new(Cell::new(0u32));
        let counter = Rc::clone(&calls);
        let flaky = Reference::factory(move || {
            counter.set(counter.get() + 1);
            let call = counter.get();
            async move {
                sleep(ms(10)).await;
                if call == 1 {
                    Err("flaky")
                } else {
                    Ok("comp-a")
                }
            }
        });
        let ctl = controller();
        let log = record(&ctl);
        let policy = LoadPolicy::default()
            .with_delay_before_loading(ms(1000))
            .with_auto_retry(ms(100));
        ctl.start(LoadRequest::new(flaky, policy));

        sleep(ms(500)).await;
        assert_eq!(calls.get(), 2);
        assert_eq!(ctl.state(), LoadState::Resolved("comp-a"));
        assert_eq!(
            log.borrow().clone(),
            vec![
                (0, LoaderEvent::Pending { attempt: 1 }),
                (
                    10,
                    LoaderEvent::Failed(LoadError::Failure {
                        reference: "factory".into(),
                        message: "flaky".into()
                    })
                ),
                (10, LoaderEvent::Retrying { attempt: 2 }),
                (110, LoaderEvent::Pending { attempt: 2 }),
                (120, LoaderEvent::Resolved("comp-a")),
            ]
        );
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn auto_retry_stops_at_max_attempts() {
    in_local_set(async {
        let ctl = controller();
        let log = record(&ctl);
        let policy = LoadPolicy::default()
            .with_max_attempts(2)
            .with_auto_retry(Duration::ZERO);
        ctl.start(LoadRequest::new(delayed(10, Err("down")), policy));

        sleep(ms(500)).await;
        assert_eq!(ctl.attempts(), 3);
        assert_eq!(count(&log, is_pending), 3);
        assert!(ctl.state().error().is_some_and(LoadError::is_terminal));
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn subscriber_can_retry_from_the_failed_event() {
    in_local_set(async {
        let calls = Rc::new(Cell::new(0u32));
        let counter = Rc::clone(&calls);
        let flaky = Reference::factory(move || {
            counter.set(counter.get() + 1);
            let call = counter.get();
            async move {
                sleep(ms(10)).await;
                if call < 3 {
                    Err("flaky")
                } else {
                    Ok("comp-a")
                }
            }
        });
        let ctl = controller();
        let retrier = ctl.clone();
        ctl.on_event(move |event| {
            if let LoaderEvent::Failed(error) = event {
                if !error.is_terminal() {
                    retrier.retry();
                }
            }
        });
        ctl.start(LoadRequest::new(flaky, LoadPolicy::default()));

        sleep(ms(100)).await;
        assert_eq!(ctl.state(), LoadState::Resolved("comp-a"));
        assert_eq!(ctl.attempts(), 3);
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn teardown_clears_pending_timers() {
    in_local_set(async {
        let ctl = controller();
        let log = record(&ctl);
        let policy = LoadPolicy::default()
            .with_timeout(ms(50))
            .with_delay_before_loading(ms(30));
        ctl.start(LoadRequest::new(delayed(100, Ok("comp-a")), policy.clone()));

        sleep(ms(20)).await;
        ctl.teardown();
        assert!(ctl.is_torn_down());

        sleep(ms(200)).await;
        assert_eq!(count(&log, is_fallback), 0);
        assert_eq!(count(&log, is_failed), 0);
        assert_eq!(count(&log, is_resolved), 0);
        assert_eq!(ctl.state(), LoadState::Pending);
        assert!(!ctl.start(LoadRequest::new(delayed(10, Ok("comp-b")), policy)));
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn restart_supersedes_the_attempt_in_flight() {
    in_local_set(async {
        let ctl = controller();
        let log = record(&ctl);
        ctl.start(LoadRequest::new(
            delayed(100, Ok("comp-a")),
            LoadPolicy::default(),
        ));
        sleep(ms(20)).await;
        ctl.start(LoadRequest::new(
            delayed(30, Ok("comp-b")),
            LoadPolicy::default(),
        ));
        assert_eq!(ctl.generation(), 2);
        assert_eq!(ctl.attempts(), 1);

        sleep(ms(200)).await;
        assert_eq!(ctl.state(), LoadState::Resolved("comp-b"));
        assert_eq!(count(&log, is_resolved), 1);
        assert_eq!(at(&log, is_resolved), Some(50));
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn path_references_go_through_the_resolver() {
    in_local_set(async {
        let resolver = RegistryResolver::default().register("~components/comp-a", "comp-a");
        let ctl: AsyncLoadController<Module> =
            AsyncLoadController::new(Rc::new(resolver), Rc::new(TokioLocalSpawner));
        ctl.start(LoadRequest::new(
            Reference::path("~components/comp-a"),
            LoadPolicy::default(),
        ));
        sleep(ms(1)).await;
        assert_eq!(ctl.state(), LoadState::Resolved("comp-a"));

        ctl.start(LoadRequest::new(
            Reference::path("~components/missing"),
            LoadPolicy::default(),
        ));
        sleep(ms(1)).await;
        assert_eq!(
            ctl.state(),
            LoadState::Failed(LoadError::Failure {
                reference: "~components/missing".into(),
                message: "cannot find module ~components/missing".into(),
            })
        );
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn path_without_resolver_fails() {
    in_local_set(async {
        let ctl = controller();
        ctl.start(LoadRequest::new(
            Reference::path("comp-a"),
            LoadPolicy::default(),
        ));
        sleep(ms(1)).await;
        let error = ctl.state().error().cloned();
        assert!(matches!(error, Some(LoadError::Failure { .. })));
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn inline_modules_honour_minimum_time() {
    in_local_set(async {
        let ctl = controller();
        let log = record(&ctl);
        let policy = LoadPolicy::default().with_minimum_visible_time(ms(200));
        ctl.start(LoadRequest::new(Reference::Inline("comp-a"), policy));

        sleep(ms(300)).await;
        assert_eq!(at(&log, is_resolved), Some(200));
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn create_loader_delivers_every_transition() {
    in_local_set(async {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = create_loader(
            LoadRequest::new(
                delayed(40, Ok("comp-a")),
                LoadPolicy::default().with_delay_before_loading(ms(10)),
            ),
            Rc::new(NoResolver),
            Rc::new(TokioLocalSpawner),
            move |event: &LoaderEvent<Module>| {
                let _ = tx.send(event.clone());
            },
        );
        let mut channel = handle.events();

        assert_eq!(rx.recv().await, Some(LoaderEvent::Pending { attempt: 1 }));
        assert_eq!(
            rx.recv().await,
            Some(LoaderEvent::FallbackShown { attempt: 1 })
        );
        assert_eq!(rx.recv().await, Some(LoaderEvent::Resolved("comp-a")));

        // Subscribed after start: only sees what came next
        assert_eq!(
            channel.recv().await,
            Some(LoaderEvent::FallbackShown { attempt: 1 })
        );
        assert_eq!(channel.recv().await, Some(LoaderEvent::Resolved("comp-a")));
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn retry_discards_the_late_resolution_of_the_previous_attempt() {
    in_local_set(async {
        let ctl = controller();
        let log = record(&ctl);
        let policy = LoadPolicy::default().with_timeout(ms(50));
        ctl.start(LoadRequest::new(delayed(100, Ok("old")), policy));

        sleep(ms(60)).await;
        assert!(ctl.state().error().is_some_and(LoadError::is_timeout));
        assert!(ctl.retry());

        // The first fetch settles at 100ms, while the second attempt runs
        sleep(ms(45)).await;
        assert_eq!(ctl.state(), LoadState::Pending);
        assert_eq!(ctl.attempts(), 2);
        assert_eq!(count(&log, is_resolved), 0);

        sleep(ms(15)).await;
        let failures: Vec<u128> = log
            .borrow()
            .iter()
            .filter(|(_, e)| is_failed(e))
            .map(|(t, _)| *t)
            .collect();
        assert_eq!(failures, vec![50, 110]);
        assert_eq!(count(&log, is_resolved), 0);
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn unbounded_minimum_time_keeps_the_attempt_pending() {
    in_local_set(async {
        let spawner = Rc::new(TrackingSpawner::default());
        let ctl: AsyncLoadController<Module> =
            AsyncLoadController::new(Rc::new(NoResolver), spawner.clone());
        let log = record(&ctl);
        let policy = LoadPolicy::default().with_minimum_visible_time(Duration::MAX);
        ctl.start(LoadRequest::new(delayed(10, Ok("comp-a")), policy));

        sleep(ms(100)).await;
        assert_eq!(ctl.state(), LoadState::Pending);
        assert_eq!(count(&log, is_resolved), 0);

        ctl.teardown();
        spawner.assert_no_panic().await;
    })
    .await
}
