mod common;

use armada_runtime::prelude::*;
use common::Harness;

fn add_one() -> Task<JsonCodec> {
    Task::new("add_one", |args: TaskArgs<JsonCodec>| async move {
        Ok::<_, anyhow::Error>(*args.get::<i64>(0)? + 1)
    })
}

/// `add(a, b)` submits `add_one(b)` and delegates to `add(a - 1, <that handle>)`.
fn add() -> Task<JsonCodec> {
    Task::with_context("add", |ctx: ExecutionContext<JsonCodec>, args: TaskArgs<JsonCodec>| async move {
        let a = *args.get::<i64>(0)?;
        let b = *args.get::<i64>(1)?;
        if a <= 0 {
            return Ok::<_, anyhow::Error>(Outcome::Value(b));
        }
        let b_plus_one = ctx.invoke(&add_one(), ctx.args().value(&b)).await?;
        let step = ctx.args().value(&(a - 1)).handle(&b_plus_one);
        Ok(ctx.delegate(&add(), step).await?)
    })
}

/// Counts down to zero, returning the number of steps taken.
fn count_down() -> Task<JsonCodec> {
    Task::with_context("count_down", |ctx: ExecutionContext<JsonCodec>, args: TaskArgs<JsonCodec>| async move {
        let remaining = *args.get::<u32>(0)?;
        let steps = args.get_named_opt::<u32>("steps")?.copied().unwrap_or(0);
        tracing::info!(parent: ctx.span(), remaining, "Counting down");
        if remaining == 0 {
            return Ok::<_, anyhow::Error>(Outcome::Value(steps));
        }
        let next = ctx
            .args()
            .value(&(remaining - 1))
            .value(&(steps + 1))
            .named("steps");
        Ok(ctx.delegate(&count_down(), next).await?)
    })
}

/// Delegates to its own result.
fn ouroboros() -> Task<JsonCodec> {
    Task::with_context("ouroboros", |ctx: ExecutionContext<JsonCodec>, _args: TaskArgs<JsonCodec>| async move {
        Ok::<_, anyhow::Error>(Outcome::<u32>::Delegated(ctx.result_id().clone()))
    })
}

fn registry() -> TaskRegistry<JsonCodec> {
    TaskRegistry::new()
        .with_task(add_one())
        .with_task(add())
        .with_task(count_down())
        .with_task(ouroboros())
}

#[tokio::test]
async fn test_recursive_add_resolves_to_sum() {
    let harness = Harness::new();
    let worker = harness.spawn_worker(registry(), 1);

    let session = &harness.session;
    let handle = session
        .invoke(&add(), session.args().value(&8i64).value(&2i64))
        .await
        .unwrap();

    assert_eq!(handle.wait().await.unwrap().get::<i64>().unwrap(), 10);
    assert_ne!(handle.terminal_id(), Some(handle.result_id()));
    assert!(matches!(handle.state().await.unwrap(), HandleState::Delegated(_)));
    // Eight `add_one` siblings and eight delegated `add` steps behind the first call.
    assert_eq!(harness.backend.submission_count(), 17);
    assert_eq!(harness.backend.peak_running(), 1);
    worker.abort();
}

#[tokio::test]
async fn test_countdown_never_holds_more_than_one_slot() {
    let harness = Harness::new();
    let worker = harness.spawn_worker(registry(), 1);

    let session = &harness.session;
    let handle = session
        .invoke(&count_down(), session.args().value(&8u32))
        .await
        .unwrap();

    assert_eq!(handle.wait().await.unwrap().get::<u32>().unwrap(), 8);
    assert_eq!(harness.backend.submission_count(), 9);
    assert_eq!(harness.backend.peak_running(), 1);
    worker.abort();
}

#[tokio::test]
async fn test_countdown_from_zero_completes_directly() {
    let harness = Harness::new();
    let worker = harness.spawn_worker(registry(), 1);

    let session = &harness.session;
    let handle = session
        .invoke(&count_down(), session.args().value(&0u32))
        .await
        .unwrap();

    assert_eq!(handle.wait().await.unwrap().get::<u32>().unwrap(), 0);
    assert_eq!(handle.terminal_id(), Some(handle.result_id()));
    worker.abort();
}

#[tokio::test]
async fn test_self_delegation_is_a_cycle() {
    let harness = Harness::new();
    let worker = harness.spawn_worker(registry(), 1);

    let session = &harness.session;
    let handle = session.invoke(&ouroboros(), session.args()).await.unwrap();

    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, ArmadaError::Cycle { .. }), "unexpected error: {err}");
    assert!(!handle.is_resolved());
    worker.abort();
}
