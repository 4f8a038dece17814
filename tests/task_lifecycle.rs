//! Task state transitions, cancellation, chaining, and idempotent observation.

use lockstep::test_utils::init_test_logging;
use lockstep::{
    BlockingWaiter, CaptureMode, ContextThread, Error, Scheduler, SchedulerConfig, TaskState,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn scheduler() -> Scheduler {
    Scheduler::new(SchedulerConfig::default().worker_threads(3)).expect("scheduler")
}

#[derive(Debug, thiserror::Error)]
#[error("step {0} failed")]
struct StepFailed(u32);

fn fail_step(step: u32) -> lockstep::Result<()> {
    Err(Error::body(StepFailed(step)))
}

#[test]
fn state_moves_through_suspension_to_completion() {
    init_test_logging();
    lockstep::test_phase!("state_moves_through_suspension_to_completion");
    let sched = scheduler();
    let task = sched.spawn(None, |cx| async move {
        cx.delay(Duration::from_millis(30), CaptureMode::NoCapture)
            .await?;
        Ok(())
    });
    assert_eq!(task.state(), TaskState::Suspended);
    assert!(task.captured_context().is_none());
    BlockingWaiter::new().wait(&task).expect("ok");
    assert_eq!(task.state(), TaskState::RanToCompletion);
    sched.shutdown();
}

#[test]
fn body_error_faults_and_skips_remaining_steps() {
    init_test_logging();
    let sched = scheduler();
    let steps = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&steps);
    let task: lockstep::Task<()> = sched.spawn(None, move |cx| async move {
        cx.delay(Duration::from_millis(5), CaptureMode::NoCapture)
            .await?;
        counted.fetch_add(1, Ordering::SeqCst);
        fail_step(1)?;
        cx.delay(Duration::from_millis(5), CaptureMode::NoCapture)
            .await?;
        counted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let err = BlockingWaiter::new().wait(&task).expect_err("faulted");
    assert_eq!(err.to_string(), "step 1 failed");
    assert_eq!(task.state(), TaskState::Faulted);
    assert_eq!(steps.load(Ordering::SeqCst), 1);
    sched.shutdown();
}

#[test]
fn fault_propagates_to_dependent_task() {
    init_test_logging();
    let sched = scheduler();
    let inner: lockstep::Task<u32> = sched.spawn(None, |cx| async move {
        cx.delay(Duration::from_millis(5), CaptureMode::NoCapture)
            .await?;
        fail_step(2)?;
        Ok(0)
    });
    let outer = sched.spawn(None, move |cx| async move {
        let value = cx.await_task(&inner, CaptureMode::NoCapture).await?;
        Ok(value + 1)
    });
    let err = BlockingWaiter::with_timeout(Duration::from_secs(5))
        .wait(&outer)
        .expect_err("faulted");
    assert_eq!(err.to_string(), "step 2 failed");
    sched.shutdown();
}

#[test]
fn multi_step_chain_passes_values() {
    init_test_logging();
    let sched = scheduler();
    let first = sched.spawn(None, |cx| async move {
        cx.delay(Duration::from_millis(5), CaptureMode::NoCapture)
            .await?;
        Ok(20_u32)
    });
    let second = sched.spawn(None, move |cx| async move {
        let a = cx.await_task(&first, CaptureMode::NoCapture).await?;
        cx.delay(Duration::from_millis(5), CaptureMode::NoCapture)
            .await?;
        Ok(a * 2 + 2)
    });
    assert_eq!(BlockingWaiter::new().wait(&second).expect("ok"), 42);
    sched.shutdown();
}

#[test]
fn cancelled_task_never_resumes() {
    init_test_logging();
    let sched = scheduler();
    let resumed = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&resumed);
    let task = sched.spawn(None, move |cx| async move {
        cx.delay(Duration::from_millis(50), CaptureMode::NoCapture)
            .await?;
        flag.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    assert!(task.cancel());
    assert!(!task.cancel());
    assert_eq!(task.state(), TaskState::Cancelled);
    assert!(BlockingWaiter::new().wait(&task).expect_err("cancelled").is_cancelled());

    thread::sleep(Duration::from_millis(150));
    assert_eq!(resumed.load(Ordering::SeqCst), 0);
    sched.shutdown();
}

#[test]
fn dependent_observes_cancellation() {
    init_test_logging();
    let sched = scheduler();
    let slow = sched.delay(Duration::from_secs(60));
    let watched = slow.clone();
    let watcher = sched.spawn(None, move |cx| async move {
        match cx.await_task(&watched, CaptureMode::NoCapture).await {
            Err(Error::Cancelled) => Ok("saw cancel"),
            other => Ok(if other.is_ok() { "completed" } else { "other error" }),
        }
    });
    assert!(slow.cancel());
    assert_eq!(
        BlockingWaiter::with_timeout(Duration::from_secs(5))
            .wait(&watcher)
            .expect("ok"),
        "saw cancel"
    );
    sched.shutdown();
}

#[test]
fn terminal_state_seen_identically_by_concurrent_observers() {
    init_test_logging();
    let sched = scheduler();
    let resumes = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&resumes);
    let task = sched.spawn(None, move |cx| async move {
        cx.delay(Duration::from_millis(30), CaptureMode::NoCapture)
            .await?;
        counted.fetch_add(1, Ordering::SeqCst);
        Ok(99_u64)
    });

    let waiters: Vec<_> = (0..6)
        .map(|_| {
            let task = task.clone();
            thread::spawn(move || BlockingWaiter::new().wait(&task))
        })
        .collect();
    let dependents: Vec<_> = (0..6)
        .map(|_| {
            let awaited = task.clone();
            sched.spawn(None, move |cx| async move {
                cx.await_task(&awaited, CaptureMode::NoCapture).await
            })
        })
        .collect();

    for waiter in waiters {
        assert_eq!(waiter.join().expect("waiter").expect("ok"), 99);
    }
    for dependent in &dependents {
        assert_eq!(BlockingWaiter::new().wait(dependent).expect("ok"), 99);
    }
    assert_eq!(resumes.load(Ordering::SeqCst), 1, "body resumed more than once");
    sched.shutdown();
}

#[test]
fn capturing_resume_runs_on_context_when_owner_is_free() {
    init_test_logging();
    let sched = scheduler();
    let ui = ContextThread::spawn("ui-free").expect("ui");
    let ctx = ui.context().clone();

    let (tx, rx) = mpsc::channel();
    let (sched2, ctx2) = (sched.clone(), ctx.clone());
    ctx.post(move || {
        let ui_ctx = ctx2.clone();
        let task = sched2.spawn(Some(&ctx2), move |cx| async move {
            cx.delay(Duration::from_millis(20), CaptureMode::CaptureContext)
                .await?;
            Ok(ui_ctx.current_thread_is_owner())
        });
        assert_eq!(task.captured_context().map(|c| c.id()), Some(ctx2.id()));
        // Return to the loop instead of blocking, so the resume can run.
        tx.send(task).expect("send");
    })
    .expect("post");

    let task = rx.recv_timeout(Duration::from_secs(5)).expect("task");
    assert!(BlockingWaiter::with_timeout(Duration::from_secs(5))
        .wait(&task)
        .expect("ok"));
    ui.shutdown_and_join().expect("join");
    sched.shutdown();
}

#[test]
fn capturing_resume_on_closed_context_reports_context_closed() {
    init_test_logging();
    let sched = scheduler();
    let ui = ContextThread::spawn("ui-closing").expect("ui");
    let ctx = ui.context().clone();

    let (tx, rx) = mpsc::channel();
    let (sched2, ctx2) = (sched.clone(), ctx.clone());
    ctx.post(move || {
        let task = sched2.spawn(Some(&ctx2), |cx| async move {
            cx.delay(Duration::from_millis(50), CaptureMode::CaptureContext)
                .await?;
            Ok(())
        });
        tx.send(task).expect("send");
    })
    .expect("post");
    let task = rx.recv_timeout(Duration::from_secs(5)).expect("task");
    ui.shutdown_and_join().expect("join");

    let err = BlockingWaiter::with_timeout(Duration::from_secs(5))
        .wait(&task)
        .expect_err("context gone");
    assert!(matches!(err, Error::ContextClosed(id) if id == ctx.id()));
    sched.shutdown();
}

#[test]
fn await_on_without_ambient_uses_worker() {
    init_test_logging();
    let sched = scheduler();
    let caller = thread::current().id();
    for _ in 0..500 {
        let done = sched.delay(Duration::ZERO);
        let suspend = sched.await_on(&done, CaptureMode::CaptureContext, None);
        assert!(suspend.captured_context().is_none());
        let task = sched.spawn(None, move |_cx| async move {
            suspend.await?;
            Ok(thread::current().id())
        });
        let resumed_on = BlockingWaiter::with_timeout(Duration::from_secs(5))
            .wait(&task)
            .expect("ok");
        assert_ne!(resumed_on, caller);
    }
    sched.shutdown();
}

#[test]
fn non_capturing_resume_of_finished_task_never_lands_on_owner() {
    init_test_logging();
    lockstep::test_phase!("non_capturing_resume_of_finished_task_never_lands_on_owner");
    let sched = scheduler();
    let ui = ContextThread::spawn("ui-finished").expect("ui");
    let ctx = ui.context().clone();

    let (tx, rx) = mpsc::channel();
    let (sched2, ctx2) = (sched.clone(), ctx.clone());
    ctx.post(move || {
        let mut tasks = Vec::new();
        for _ in 0..1_000 {
            let done = sched2.delay(Duration::ZERO);
            BlockingWaiter::new().wait(&done).expect("delay");
            let ui_ctx = ctx2.clone();
            tasks.push(sched2.spawn(Some(&ctx2), move |cx| async move {
                cx.await_task(&done, CaptureMode::NoCapture).await?;
                Ok(ui_ctx.current_thread_is_owner())
            }));
        }
        tx.send(tasks).expect("send");
    })
    .expect("post");

    let tasks = rx.recv_timeout(Duration::from_secs(30)).expect("tasks");
    let on_owner = tasks
        .iter()
        .map(|task| {
            BlockingWaiter::with_timeout(Duration::from_secs(5))
                .wait(task)
                .expect("ok")
        })
        .filter(|&owner| owner)
        .count();
    lockstep::assert_with_log!(
        on_owner == 0,
        "non-capturing resumes stay off the owner thread",
        0,
        on_owner
    );
    ui.shutdown_and_join().expect("join");
    sched.shutdown();
    lockstep::test_complete!("non_capturing_resume_of_finished_task_never_lands_on_owner");
}
