use agentcore::action::AgentResponse;
use agentcore::agent_loop::AgentStatus;
use agentcore::orchestrator::{Orchestrator, OrchestratorError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn orchestrator() -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(16, Duration::from_millis(200), Duration::from_secs(1)))
}

#[tokio::test]
async fn failed_child_delivers_child_failed_to_the_parent() {
    let orch = orchestrator();
    let parent = orch.register("parent", None).await;
    let child = orch.register("worker", Some(parent.clone())).await;
    orch.launch(&child, CancellationToken::new(), async { AgentResponse::failed("it blew up", 3) })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let inbox = orch.bus().drain(&parent).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].payload, "it blew up");
    assert_eq!(inbox[0].kind, agentcore::message_bus::MessageKind::ChildFailed);
    assert!(matches!(orch.status(&child).await, Some(AgentStatus::Failed)));
}

#[tokio::test]
async fn result_is_queryable_after_completion() {
    let orch = orchestrator();
    let id = orch.register("solo", None).await;
    orch.launch(&id, CancellationToken::new(), async { AgentResponse::ok("the answer", 2) })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    let result = orch.result(&id).await.expect("result recorded after completion");
    assert_eq!(result.content, "the answer");
    assert_eq!(result.iterations, 2);
}

#[tokio::test]
async fn siblings_complete_independently() {
    let orch = orchestrator();
    let parent = orch.register("parent", None).await;
    let a = orch.register("worker", Some(parent.clone())).await;
    let b = orch.register("worker", Some(parent.clone())).await;
    orch.launch(&a, CancellationToken::new(), async { AgentResponse::ok("a done", 1) }).await.unwrap();
    orch.launch(&b, CancellationToken::new(), async { AgentResponse::failed("b broke", 2) }).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(orch.status(&a).await, Some(AgentStatus::Completed)));
    assert!(matches!(orch.status(&b).await, Some(AgentStatus::Failed)));
    let inbox = orch.bus().drain(&parent).await.unwrap();
    assert_eq!(inbox.len(), 2);
}

#[tokio::test]
async fn unknown_agent_status_is_none() {
    let orch = orchestrator();
    assert!(orch.status("ghost").await.is_none());
    assert!(!orch.is_alive("ghost").await);
    let err = orch.send("a", "ghost", "hi".into()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownAgent(_)));
}

#[tokio::test]
async fn a_panicking_child_is_marked_failed_and_notifies_the_parent() {
    let orch = orchestrator();
    let parent = orch.register("parent", None).await;
    let child = orch.register("worker", Some(parent.clone())).await;
    orch.launch(&child, CancellationToken::new(), async { panic!("tool body exploded") })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(orch.status(&child).await, Some(AgentStatus::Failed)));
    let result = orch.result(&child).await.expect("a panicking child still gets a recorded result");
    assert!(result.content.contains("panicked"));
    let inbox = orch.bus().drain(&parent).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, agentcore::message_bus::MessageKind::ChildFailed);
}

#[tokio::test]
async fn shutdown_cancels_cooperative_tasks_well_within_the_grace_period() {
    let orch = orchestrator();
    let id = orch.register("cooperative", None).await;
    let cancel = CancellationToken::new();
    let observed = cancel.clone();
    orch.launch(&id, cancel, async move {
        observed.cancelled().await;
        AgentResponse::failed("cancelled", 0)
    })
    .await
    .unwrap();

    // The test helper's grace period is 1s; a task that actually watches
    // its token should let `shutdown` return in a fraction of that.
    tokio::time::timeout(Duration::from_millis(200), orch.shutdown())
        .await
        .expect("a cooperative task should let shutdown finish well before the grace period elapses");
    assert!(matches!(orch.status(&id).await, Some(AgentStatus::Failed)));
}

#[tokio::test]
async fn shutdown_force_aborts_a_straggler_that_ignores_cancellation() {
    let orch = Arc::new(Orchestrator::new(16, Duration::from_millis(200), Duration::from_millis(50)));
    let id = orch.register("stuck", None).await;
    orch.launch(&id, CancellationToken::new(), async move {
        // Never checks its cancellation token — a host tool that ignores
        // cooperative cancellation, forcing the last-resort abort path.
        tokio::time::sleep(Duration::from_secs(60)).await;
        AgentResponse::ok("should never get here", 0)
    })
    .await
    .unwrap();

    orch.shutdown().await;
    assert!(matches!(orch.status(&id).await, Some(AgentStatus::Failed)));
    let result = orch.result(&id).await.expect("a forcibly aborted straggler still gets a recorded result");
    assert!(result.content.contains("forced abort"));
}

#[tokio::test]
async fn launched_subagents_reports_both_pending_and_completed_children() {
    let orch = orchestrator();
    let parent = orch.register("parent", None).await;
    let child = orch.register("weather", Some(parent.clone())).await;
    orch.set_task(&child, "get the forecast").await;
    orch.launch(&child, CancellationToken::new(), async { AgentResponse::ok("sunny", 1) })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let children = orch.launched_subagents(&parent).await;
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].subagent_name, "weather");
    assert_eq!(children[0].task, "get the forecast");
    assert_eq!(children[0].result_summary.as_deref(), Some("sunny"));
    assert!(matches!(children[0].status, AgentStatus::Completed));
}
