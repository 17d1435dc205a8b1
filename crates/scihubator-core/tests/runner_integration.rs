mod common;

use std::sync::Arc;

use common::{MockRetrieval, ids, pipeline};
use scihubator_core::{
    BatchRunner, Phase, RunOutcome, RunRequest, RunState, SelectionMode, StartError,
};
use tokio::sync::Semaphore;

fn gated(gate: &Arc<Semaphore>) -> MockRetrieval {
    MockRetrieval {
        gate: Some(Arc::clone(gate)),
        ..MockRetrieval::reachable()
            .with_document("10.1/a", &["alpha"])
            .with_document("10.1/b", &["beta"])
    }
}

fn request() -> RunRequest {
    RunRequest::new(ids(&["10.1/a", "10.1/b"]), SelectionMode::Plain, "Runner")
}

#[tokio::test]
async fn second_start_is_rejected_while_running() {
    let staging = tempfile::tempdir().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let runner = BatchRunner::new(pipeline(Arc::new(gated(&gate)), staging.path()));

    let handle = runner.start(request()).unwrap();
    assert!(runner.is_running());
    assert_eq!(runner.start(request()).err(), Some(StartError::Busy));

    gate.add_permits(2);
    let outcome = handle.wait().await;
    assert!(matches!(outcome, RunOutcome::Completed(_)));
    assert!(!runner.is_running());

    // The runner is reusable once the previous run is over.
    gate.add_permits(2);
    let again = runner.start(request()).unwrap();
    assert!(matches!(again.wait().await, RunOutcome::Completed(_)));
}

#[tokio::test]
async fn cancel_through_handle_stops_the_run() {
    let staging = tempfile::tempdir().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let retrieval = Arc::new(gated(&gate));
    let runner = BatchRunner::new(pipeline(retrieval.clone(), staging.path()));

    let handle = runner.start(request()).unwrap();
    let mut state = handle.subscribe_state();
    handle.cancel();
    gate.add_permits(2);

    let outcome = handle.wait().await;
    assert!(matches!(outcome, RunOutcome::Cancelled));
    assert_eq!(*state.borrow_and_update(), RunState::Cancelled);
    assert!(retrieval.fetched().len() <= 1);
    assert!(!runner.is_running());
}

#[tokio::test]
async fn handle_streams_progress_until_the_run_ends() {
    let staging = tempfile::tempdir().unwrap();
    let runner = BatchRunner::new(pipeline(
        Arc::new(
            MockRetrieval::reachable()
                .with_document("10.1/a", &["alpha"])
                .with_document("10.1/b", &["beta"]),
        ),
        staging.path(),
    ));

    let mut handle = runner.start(request()).unwrap();
    let mut events = Vec::new();
    while let Some(event) = handle.next_progress().await {
        events.push(event);
    }
    assert_eq!(handle.state(), RunState::Completed);

    let RunOutcome::Completed(report) = handle.wait().await else {
        panic!("run should complete");
    };
    assert_eq!(report.result.len(), 2);
    assert_eq!(events.first().map(|e| e.phase), Some(Phase::Downloading));
    assert_eq!(events.last().map(|e| e.phase), Some(Phase::Assembling));
}
