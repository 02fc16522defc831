use crate::{
    Error, FnTask, Handle, MatVecRowsTask, PowTask, Server, ServerConfig, ServerState,
    ShutdownPolicy, SinTask, SqrtTask, Task, TaskError, row_blocks,
};
use core::f64::consts::PI;
use core::time::Duration;
use rand::Rng;
use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{scope, sleep};

/// A latch that tasks block on until the test opens it.
#[derive(Default)]
struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Default)]
struct GateState {
    open: bool,
    entered: usize,
}

impl Gate {
    fn pass(&self) {
        let mut state = self.state.lock().unwrap();
        state.entered += 1;
        self.changed.notify_all();
        let _state = self.changed.wait_while(state, |state| !state.open).unwrap();
    }

    /// Blocks until `count` tasks are parked at the gate.
    fn wait_entered(&self, count: usize) {
        let state = self.state.lock().unwrap();
        let _state = self
            .changed
            .wait_while(state, |state| state.entered < count)
            .unwrap();
    }

    fn open(&self) {
        self.state.lock().unwrap().open = true;
        self.changed.notify_all();
    }
}

fn gated(gate: &Arc<Gate>, value: u64) -> Arc<dyn Task<u64>> {
    let gate = Arc::clone(gate);
    Arc::new(FnTask::new("Gated", move || {
        gate.pass();
        Ok::<_, TaskError>(value)
    }))
}

fn constant(value: u64) -> Arc<dyn Task<u64>> {
    Arc::new(FnTask::new("Const", move || Ok::<_, TaskError>(value)))
}

/// Bumps the shared counter when the thread that owns it exits.
struct ExitGuard(Arc<AtomicUsize>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

thread_local! {
    static EXIT_GUARD: RefCell<Option<ExitGuard>> = const { RefCell::new(None) };
}

/// Plants an [`ExitGuard`] on each of the `workers` threads of `server` and
/// returns the counter they bump on exit.
fn watch_worker_exits(server: &Server<u64>, workers: usize) -> Arc<AtomicUsize> {
    let exits = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Gate::default());

    // Every task parks at the gate until all have arrived, so each one runs
    // on a different worker.
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let exits = Arc::clone(&exits);
            let gate = Arc::clone(&gate);
            let task = FnTask::new("WatchExit", move || {
                EXIT_GUARD.with(|guard| {
                    guard
                        .borrow_mut()
                        .get_or_insert_with(|| ExitGuard(Arc::clone(&exits)));
                });
                gate.pass();
                Ok::<_, TaskError>(0)
            });
            server.submit(Arc::new(task)).unwrap()
        })
        .collect();

    gate.wait_entered(workers);
    gate.open();
    for handle in handles {
        server.await_result(handle).unwrap();
    }
    exits
}

fn wait_for_state<V>(server: &Server<V>, state: ServerState) {
    while server.state() != state {
        sleep(Duration::from_millis(1));
    }
}

#[test]
fn round_trip_matches_direct_execution() {
    let server = Server::<f64>::new();
    server.start(3).unwrap();

    let kernels: Vec<Arc<dyn Task<f64>>> = vec![
        Arc::new(PowTask::new(5.0, 2.0)),
        Arc::new(SqrtTask::new(25.0)),
        Arc::new(SinTask::new(PI / 6.0)),
    ];
    let handles: Vec<_> = kernels
        .iter()
        .map(|task| server.submit(Arc::clone(task)).unwrap())
        .collect();

    assert_eq!(server.await_result(handles[0]).unwrap(), 25.0);
    assert_eq!(server.await_result(handles[1]).unwrap(), 5.0);
    assert!((server.await_result(handles[2]).unwrap() - 0.5).abs() < 1e-6);

    for task in &kernels {
        let handle = server.submit(Arc::clone(task)).unwrap();
        assert_eq!(server.await_result(handle).unwrap(), task.execute().unwrap());
    }
}

#[test]
fn row_blocked_matvec_matches_serial_product() {
    const ROWS: usize = 97;
    const COLS: usize = 31;

    let matrix: Arc<[f64]> = (0..ROWS)
        .flat_map(|i| (0..COLS).map(move |j| (i + j) as f64))
        .collect();
    let vector: Arc<[f64]> = (0..COLS).map(|j| j as f64).collect();
    let serial: Vec<f64> = (0..ROWS)
        .map(|i| (0..COLS).map(|j| matrix[i * COLS + j] * vector[j]).sum())
        .collect();

    let server = Server::<Vec<f64>>::new();
    server.start(4).unwrap();

    let handles: Vec<_> = row_blocks(ROWS, 10)
        .map(|rows| {
            let task = MatVecRowsTask::new(Arc::clone(&matrix), Arc::clone(&vector), rows);
            server.submit(Arc::new(task)).unwrap()
        })
        .collect();

    let parallel: Vec<f64> = handles
        .into_iter()
        .flat_map(|handle| server.await_result(handle).unwrap())
        .collect();
    assert_eq!(parallel, serial);
}

#[test]
fn outstanding_handles_are_pairwise_distinct() {
    const SUBMITTERS: usize = 4;
    const PER_SUBMITTER: u64 = 500;

    let gate = Arc::new(Gate::default());
    let server = Server::<u64>::new();
    server.start(2).unwrap();

    // Nothing completes while the gate is shut, so every handle stays
    // outstanding until all submissions are done.
    let handles: Vec<Handle> = scope(|s| {
        let submitters: Vec<_> = (0..SUBMITTERS)
            .map(|_| {
                s.spawn(|| {
                    (0..PER_SUBMITTER)
                        .map(|i| server.submit(gated(&gate, i)).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        submitters
            .into_iter()
            .flat_map(|submitter| submitter.join().unwrap())
            .collect()
    });

    let unique: HashSet<_> = handles.iter().copied().collect();
    assert_eq!(unique.len(), handles.len());

    gate.open();
    for handle in handles {
        server.await_result(handle).unwrap();
    }
}

#[test]
fn retrieved_handle_is_unknown_until_reissued() {
    let server = Server::<u64>::new();
    server.start(1).unwrap();

    let first = server.submit(constant(1)).unwrap();
    assert_eq!(server.await_result(first).unwrap(), 1);
    assert_eq!(
        server.await_result(first),
        Err(Error::UnknownHandle { handle: first })
    );

    // The recycled handle is issued again and now names the new task.
    let second = server.submit(constant(2)).unwrap();
    assert_eq!(second, first);
    assert_eq!(server.await_result(second).unwrap(), 2);
}

#[test]
fn never_issued_handle_is_unknown() {
    let server = Server::<u64>::new();
    assert_eq!(
        server.await_result(Handle::from_raw(12)),
        Err(Error::UnknownHandle {
            handle: Handle::from_raw(12)
        })
    );
}

#[test]
fn all_tasks_complete_with_fewer_workers_than_tasks() {
    const TASKS: u64 = 2_000;

    let server = Server::<u64>::new();
    server.start(4).unwrap();

    let mut rng = rand::rng();
    let handles: Vec<_> = (0..TASKS)
        .map(|i| {
            let micros = rng.random_range(0..50);
            let task = FnTask::new("Sleepy", move || {
                sleep(Duration::from_micros(micros));
                Ok::<_, TaskError>(i)
            });
            (i, server.submit(Arc::new(task)).unwrap())
        })
        .collect();

    for (expected, handle) in handles {
        let value = server
            .await_result_timeout(handle, Duration::from_secs(30))
            .unwrap();
        assert_eq!(value, expected);
    }
}

#[test]
fn stop_joins_workers_and_refuses_new_work() {
    let server = Server::<u64>::new();
    server.start(3).unwrap();
    assert_eq!(server.state(), ServerState::Running);
    assert_eq!(server.worker_count(), 3);

    let handle = server.submit(constant(9)).unwrap();
    assert_eq!(server.await_result(handle).unwrap(), 9);

    server.stop();
    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(server.worker_count(), 0);
    assert_eq!(server.submit(constant(1)), Err(Error::ServerNotRunning));

    // Idempotent.
    server.stop();
    assert_eq!(server.state(), ServerState::Stopped);
}

#[test]
fn submit_before_start_is_refused() {
    let server = Server::<u64>::new();
    assert_eq!(server.submit(constant(1)), Err(Error::ServerNotRunning));
}

#[test]
fn start_rejects_misuse() {
    let server = Server::<u64>::new();
    assert_eq!(
        server.start(0),
        Err(Error::InvalidWorkerCount { requested: 0 })
    );
    server.start(1).unwrap();
    assert_eq!(server.start(1), Err(Error::AlreadyRunning));
}

#[test]
fn slow_task_does_not_delay_faster_results() {
    let gate = Arc::new(Gate::default());
    let server = Server::<u64>::new();
    server.start(2).unwrap();

    let slow = server.submit(gated(&gate, 1)).unwrap();
    let fast = server.submit(constant(2)).unwrap();

    scope(|s| {
        let slow_waiter = s.spawn(|| server.await_result(slow));
        // Delivered while another caller is still blocked on `slow`.
        assert_eq!(server.await_result(fast).unwrap(), 2);
        assert!(!slow_waiter.is_finished());

        gate.open();
        assert_eq!(slow_waiter.join().unwrap().unwrap(), 1);
    });
}

#[test]
fn failing_and_panicking_tasks_do_not_kill_workers() {
    let server = Server::<f64>::new();
    server.start(1).unwrap();

    let failing = server.submit(Arc::new(SqrtTask::new(-4.0))).unwrap();
    match server.await_result(failing) {
        Err(Error::TaskExecution {
            handle,
            label,
            source,
        }) => {
            assert_eq!(handle, failing);
            assert_eq!(label, "SqrtTask");
            assert!(!source.panicked());
        }
        other => panic!("expected a task failure, got {other:?}"),
    }

    let panicking = server
        .submit(Arc::new(FnTask::new("Explodes", || -> Result<f64, TaskError> {
            panic!("kernel blew up")
        })))
        .unwrap();
    match server.await_result(panicking) {
        Err(Error::TaskExecution { label, source, .. }) => {
            assert_eq!(label, "Explodes");
            assert!(source.panicked());
            assert_eq!(source.message(), "kernel blew up");
        }
        other => panic!("expected a task failure, got {other:?}"),
    }

    // The single worker is still serving.
    let after = server.submit(Arc::new(PowTask::new(2.0, 3.0))).unwrap();
    assert_eq!(server.await_result(after).unwrap(), 8.0);

    let stats = server.stats();
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.retrieved, 3);
    assert_eq!(stats.unretrieved, 0);
}

#[test]
fn abandon_policy_fails_waiters_of_queued_tasks() {
    let gate = Arc::new(Gate::default());
    let server = Server::<u64>::new();
    server.start(1).unwrap();

    let running = server.submit(gated(&gate, 7)).unwrap();
    let queued: Vec<_> = (0..3).map(|i| server.submit(constant(i)).unwrap()).collect();
    gate.wait_entered(1);

    scope(|s| {
        // Already blocked when the stop happens.
        let early_waiter = s.spawn(|| server.await_result(queued[0]));
        let stopper = s.spawn(|| server.stop());

        wait_for_state(&server, ServerState::Stopping);
        sleep(Duration::from_millis(50));
        gate.open();

        stopper.join().unwrap();
        assert_eq!(
            early_waiter.join().unwrap(),
            Err(Error::ServerStopped { handle: queued[0] })
        );
    });

    assert_eq!(server.state(), ServerState::Stopped);
    // The task that was executing finished and its result survives the stop.
    assert_eq!(server.await_result(running).unwrap(), 7);
    for &handle in &queued[1..] {
        assert_eq!(
            server.await_result(handle),
            Err(Error::ServerStopped { handle })
        );
    }
    assert_eq!(server.stats().abandoned, 3);
}

#[test]
fn drain_policy_runs_queued_tasks_before_stopping() {
    let gate = Arc::new(Gate::default());
    let server =
        Server::<u64>::with_config(ServerConfig::default().with_shutdown_policy(ShutdownPolicy::Drain));
    server.start(1).unwrap();

    let first = server.submit(gated(&gate, 10)).unwrap();
    let queued: Vec<_> = (0..3).map(|i| server.submit(constant(i)).unwrap()).collect();
    gate.wait_entered(1);

    scope(|s| {
        let stopper = s.spawn(|| server.stop());
        wait_for_state(&server, ServerState::Stopping);
        assert_eq!(server.submit(constant(99)), Err(Error::ServerNotRunning));
        gate.open();
        stopper.join().unwrap();
    });

    assert_eq!(server.await_result(first).unwrap(), 10);
    for (i, handle) in queued.into_iter().enumerate() {
        assert_eq!(server.await_result(handle).unwrap(), i as u64);
    }
    assert_eq!(server.stats().abandoned, 0);
}

#[test]
fn concurrent_stop_calls_all_wait_for_shutdown() {
    let gate = Arc::new(Gate::default());
    let server = Server::<u64>::new();
    server.start(1).unwrap();
    let handle = server.submit(gated(&gate, 5)).unwrap();
    gate.wait_entered(1);

    scope(|s| {
        let stoppers: Vec<_> = (0..3).map(|_| s.spawn(|| server.stop())).collect();
        wait_for_state(&server, ServerState::Stopping);
        sleep(Duration::from_millis(20));
        assert!(stoppers.iter().all(|stopper| !stopper.is_finished()));

        gate.open();
        for stopper in stoppers {
            stopper.join().unwrap();
        }
    });

    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(server.await_result(handle).unwrap(), 5);
}

#[test]
fn restart_serves_again_without_aliasing_old_handles() {
    let server =
        Server::<u64>::with_config(ServerConfig::default().with_shutdown_policy(ShutdownPolicy::Drain));
    server.start(2).unwrap();
    let kept = server.submit(constant(1)).unwrap();
    let retrieved = server.submit(constant(2)).unwrap();
    assert_eq!(server.await_result(retrieved).unwrap(), 2);
    server.stop();

    server.start(2).unwrap();
    let fresh = server.submit(constant(3)).unwrap();
    assert_ne!(fresh, kept);
    assert_eq!(server.await_result(fresh).unwrap(), 3);
    // Published before the restart, still retrievable afterwards.
    assert_eq!(server.await_result(kept).unwrap(), 1);
}

#[test]
fn timeout_leaves_the_handle_redeemable() {
    let gate = Arc::new(Gate::default());
    let server = Server::<u64>::new();
    server.start(1).unwrap();
    let handle = server.submit(gated(&gate, 4)).unwrap();

    assert_eq!(
        server.await_result_timeout(handle, Duration::from_millis(20)),
        Err(Error::Timeout { handle })
    );

    gate.open();
    assert_eq!(server.await_result(handle).unwrap(), 4);
}

#[test]
fn drop_stops_a_running_server() {
    const WORKERS: usize = 2;

    let gate = Arc::new(Gate::default());
    let exits = {
        let server = Server::<u64>::new();
        server.start(WORKERS).unwrap();
        let exits = watch_worker_exits(&server, WORKERS);
        for i in 0..10 {
            server.submit(gated(&gate, i)).unwrap();
        }
        gate.open();
        exits
    };
    assert_eq!(exits.load(Ordering::SeqCst), WORKERS);
}

#[test]
fn stop_returns_after_every_worker_thread_exits() {
    const WORKERS: usize = 4;

    let server = Server::<u64>::new();
    server.start(WORKERS).unwrap();
    let exits = watch_worker_exits(&server, WORKERS);
    assert_eq!(exits.load(Ordering::SeqCst), 0);

    server.stop();
    assert_eq!(exits.load(Ordering::SeqCst), WORKERS);

    // A restarted pool runs on new threads that exit in turn.
    server.start(WORKERS).unwrap();
    let exits = watch_worker_exits(&server, WORKERS);
    drop(server);
    assert_eq!(exits.load(Ordering::SeqCst), WORKERS);
}

/// Errors on execute and panics when asked for its label.
struct UnlabelledTask;

impl Task<u64> for UnlabelledTask {
    fn execute(&self) -> Result<u64, TaskError> {
        Err(TaskError::new("no value"))
    }

    fn label(&self) -> &str {
        panic!("label unavailable")
    }
}

/// Succeeds, then panics when the worker releases it.
struct PanicsOnDrop;

impl Task<u64> for PanicsOnDrop {
    fn execute(&self) -> Result<u64, TaskError> {
        Ok(3)
    }

    fn label(&self) -> &str {
        "PanicsOnDrop"
    }
}

impl Drop for PanicsOnDrop {
    fn drop(&mut self) {
        panic!("drop failed");
    }
}

#[test]
fn panicking_label_or_drop_does_not_kill_the_worker() {
    let server = Server::<u64>::new();
    server.start(1).unwrap();

    let unlabelled = server.submit(Arc::new(UnlabelledTask)).unwrap();
    let dropped = server.submit(Arc::new(PanicsOnDrop)).unwrap();
    let after = server.submit(constant(5)).unwrap();

    match server.await_result_timeout(unlabelled, Duration::from_secs(10)) {
        Err(Error::TaskExecution { label, source, .. }) => {
            assert_eq!(label, "<unknown>");
            assert_eq!(source.message(), "no value");
            assert!(!source.panicked());
        }
        other => panic!("expected a task failure, got {other:?}"),
    }
    assert_eq!(
        server.await_result_timeout(dropped, Duration::from_secs(10)),
        Ok(3)
    );
    // The single worker survived both and is still serving.
    assert_eq!(
        server.await_result_timeout(after, Duration::from_secs(10)),
        Ok(5)
    );
    assert_eq!(server.worker_count(), 1);
}

#[test]
fn workers_use_the_configured_thread_names() {
    let server = Server::<String>::with_config(
        ServerConfig::default().with_thread_name_prefix("kernel"),
    );
    server.start(1).unwrap();
    let handle = server
        .submit(Arc::new(FnTask::new("WhoAmI", || {
            Ok::<_, TaskError>(std::thread::current().name().unwrap_or_default().to_owned())
        })))
        .unwrap();
    assert_eq!(server.await_result(handle).unwrap(), "kernel-0");
}

/// Ten workers, three submitting threads, 100,000 tasks per kernel.
#[test]
fn mixed_kernel_load_end_to_end() {
    const WORKERS: usize = 10;
    const TASKS_PER_KIND: usize = 100_000;

    let server = Server::<f64>::new();
    server.start(WORKERS).unwrap();

    let kinds: [(Arc<dyn Task<f64>>, f64); 3] = [
        (Arc::new(PowTask::new(5.0, 2.0)), 25.0),
        (Arc::new(SinTask::new(PI / 6.0)), 0.5),
        (Arc::new(SqrtTask::new(25.0)), 5.0),
    ];
    let outstanding = Mutex::new(HashSet::new());

    scope(|s| {
        for (task, expected) in &kinds {
            let server = &server;
            let outstanding = &outstanding;
            s.spawn(move || {
                let handles: Vec<_> = (0..TASKS_PER_KIND)
                    .map(|_| {
                        let handle = server.submit(Arc::clone(task)).unwrap();
                        assert!(
                            outstanding.lock().unwrap().insert(handle),
                            "{handle} issued while still outstanding"
                        );
                        handle
                    })
                    .collect();

                for handle in handles {
                    // Forget the handle before it can be recycled.
                    outstanding.lock().unwrap().remove(&handle);
                    let value = server.await_result(handle).unwrap();
                    assert!((value - expected).abs() < 1e-6);
                }
            });
        }
    });

    assert!(outstanding.lock().unwrap().is_empty());
    let stats = server.stats();
    assert_eq!(stats.submitted, 3 * TASKS_PER_KIND as u64);
    assert_eq!(stats.retrieved, 3 * TASKS_PER_KIND as u64);
    assert_eq!(stats.failed, 0);

    server.stop();
    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(server.worker_count(), 0);
}
