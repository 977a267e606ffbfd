//! Turn loop behaviour against a scripted completion service.

mod support;

use std::sync::Arc;
use std::time::Duration;

use codewright_agent::compaction::summary_message;
use codewright_agent::engine::CANCELLED_TOOL_OUTPUT;
use codewright_agent::estimate::estimate;
use codewright_agent::{
    CancellationToken, CompactionConfig, Engine, EngineConfig, Message, ToolRegistry, TurnEvent,
};

use support::{
    EchoTool, FailingTool, ScriptedService, StallTool, Step, assert_paired, call, drain, text,
};

fn engine(service: &Arc<ScriptedService>) -> Engine {
    let tools = ToolRegistry::new()
        .with(Arc::new(EchoTool))
        .with(Arc::new(FailingTool))
        .with(Arc::new(StallTool));
    Engine::new(EngineConfig::new("test-model"), service.clone()).with_tools(tools)
}

// ═══════════════════════════════════════════════════════════════════════
//  Plain answers
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn tool_free_reply_commits_one_assistant_message() {
    let service = ScriptedService::new()
        .reply(vec![text("Hello"), text(", world"), Step::Usage(12, 3)])
        .shared();
    let mut engine = engine(&service);

    let (events, error) = drain(engine.send("hi", CancellationToken::new())).await;

    assert!(error.is_none());
    assert_eq!(
        events,
        vec![
            TurnEvent::TextDelta("Hello".into()),
            TurnEvent::TextDelta(", world".into()),
            TurnEvent::UsageReport {
                input_tokens: 12,
                output_tokens: 3,
            },
            TurnEvent::AssistantMessage {
                text: "Hello, world".into(),
            },
        ]
    );
    assert_eq!(
        engine.history().all(),
        &[Message::user("hi"), Message::assistant("Hello, world")]
    );
    assert_eq!(service.request_count(), 1);
}

#[tokio::test]
async fn empty_reply_commits_nothing() {
    let service = ScriptedService::new().reply(vec![]).shared();
    let mut engine = engine(&service);

    let (events, error) = drain(engine.send("hi", CancellationToken::new())).await;

    assert!(error.is_none());
    assert!(events.is_empty());
    assert_eq!(engine.history().all(), &[Message::user("hi")]);
}

#[tokio::test]
async fn every_request_carries_full_history_and_tool_schemas() {
    let service = ScriptedService::new()
        .reply(vec![text("first")])
        .reply(vec![text("second")])
        .shared();
    let mut engine = engine(&service);

    engine
        .send("one", CancellationToken::new())
        .finish()
        .await
        .unwrap();
    engine
        .send("two", CancellationToken::new())
        .finish()
        .await
        .unwrap();

    let second = service.request(1);
    assert_eq!(second.model, "test-model");
    assert_eq!(
        second.input,
        vec![
            Message::user("one"),
            Message::assistant("first"),
            Message::user("two"),
        ]
    );
    let names: Vec<&str> = second.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "flaky", "stall"]);
}

// ═══════════════════════════════════════════════════════════════════════
//  Tool calls
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn tool_batch_runs_in_order_then_loops() {
    let service = ScriptedService::new()
        .reply(vec![
            text("Let me check."),
            call("c1", "echo", r#"{"text":"one"}"#),
            call("c2", "echo", r#"{"text":"two"}"#),
        ])
        .reply(vec![text("Done.")])
        .shared();
    let mut engine = engine(&service);

    let (events, error) = drain(engine.send("go", CancellationToken::new())).await;
    assert!(error.is_none());

    assert_eq!(
        events,
        vec![
            TurnEvent::TextDelta("Let me check.".into()),
            TurnEvent::AssistantMessage {
                text: "Let me check.".into(),
            },
            TurnEvent::ToolCallStarted {
                id: "c1".into(),
                name: "echo".into(),
                arguments: r#"{"text":"one"}"#.into(),
            },
            TurnEvent::ToolResultReady {
                id: "c1".into(),
                name: "echo".into(),
                output: "one".into(),
            },
            TurnEvent::ToolCallStarted {
                id: "c2".into(),
                name: "echo".into(),
                arguments: r#"{"text":"two"}"#.into(),
            },
            TurnEvent::ToolResultReady {
                id: "c2".into(),
                name: "echo".into(),
                output: "two".into(),
            },
            TurnEvent::TextDelta("Done.".into()),
            TurnEvent::AssistantMessage {
                text: "Done.".into(),
            },
        ]
    );

    assert_eq!(
        engine.history().all(),
        &[
            Message::user("go"),
            Message::assistant("Let me check."),
            Message::tool_call("c1", "echo", r#"{"text":"one"}"#),
            Message::tool_result("c1", "echo", "one"),
            Message::tool_call("c2", "echo", r#"{"text":"two"}"#),
            Message::tool_result("c2", "echo", "two"),
            Message::assistant("Done."),
        ]
    );
    assert_paired(engine.history().all());

    // The follow-up request saw both results.
    assert_eq!(service.request(1).input.len(), 6);
}

#[tokio::test]
async fn failing_tool_does_not_end_the_turn() {
    let service = ScriptedService::new()
        .reply(vec![call("c1", "flaky", "{}")])
        .reply(vec![call("c2", "flaky", "{}")])
        .reply(vec![text("Giving up on that tool.")])
        .shared();
    let mut engine = engine(&service);

    let (events, error) = drain(engine.send("try", CancellationToken::new())).await;

    assert!(error.is_none());
    assert_eq!(service.request_count(), 3);

    let outputs: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::ToolResultReady { output, .. } => Some(output.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        outputs,
        vec![
            "error: tool execution failed for `flaky`: disk on fire",
            "error: tool execution failed for `flaky`: disk on fire",
        ]
    );
    assert_paired(engine.history().all());
}

#[tokio::test]
async fn unknown_tool_result_is_error_text_and_loop_continues() {
    let service = ScriptedService::new()
        .reply(vec![call("c1", "frobnicate", "{}")])
        .reply(vec![text("Sorry.")])
        .shared();
    let mut engine = engine(&service);

    let (_, error) = drain(engine.send("do it", CancellationToken::new())).await;

    assert!(error.is_none());
    assert_eq!(
        engine.history().all()[2],
        Message::tool_result("c1", "frobnicate", "error: unknown tool frobnicate")
    );
    assert_eq!(service.request_count(), 2);
    assert_eq!(
        service.request(1).input.last(),
        Some(&Message::tool_result(
            "c1",
            "frobnicate",
            "error: unknown tool frobnicate"
        ))
    );
}

#[tokio::test]
async fn malformed_arguments_become_error_text() {
    let service = ScriptedService::new()
        .reply(vec![call("c1", "echo", "{\"text\": ")])
        .reply(vec![text("Oops.")])
        .shared();
    let mut engine = engine(&service);

    engine
        .send("echo", CancellationToken::new())
        .finish()
        .await
        .unwrap();

    match &engine.history().all()[2] {
        Message::ToolResult { output, .. } => {
            assert!(output.starts_with("error: failed to parse arguments: "), "{output}");
        }
        other => panic!("expected a tool result, got {other:?}"),
    }
}

#[tokio::test]
async fn registry_changes_apply_to_the_next_turn() {
    let service = ScriptedService::new()
        .reply(vec![text("a")])
        .reply(vec![text("b")])
        .shared();
    let mut engine = engine(&service);

    engine
        .send("first", CancellationToken::new())
        .finish()
        .await
        .unwrap();
    engine.tools_mut().remove("stall");
    engine
        .send("second", CancellationToken::new())
        .finish()
        .await
        .unwrap();

    assert_eq!(service.request(0).tools.len(), 3);
    assert_eq!(service.request(1).tools.len(), 2);
}

// ═══════════════════════════════════════════════════════════════════════
//  Transport errors
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn broken_stream_discards_partial_text() {
    let service = ScriptedService::new()
        .reply(vec![text("par"), text("tial"), Step::Fail("connection reset".into())])
        .shared();
    let mut engine = engine(&service);

    let (events, error) = drain(engine.send("hi", CancellationToken::new())).await;

    assert_eq!(
        events,
        vec![
            TurnEvent::TextDelta("par".into()),
            TurnEvent::TextDelta("tial".into()),
        ]
    );
    let error = error.expect("stream error surfaces");
    assert!(!error.is_cancelled());
    assert_eq!(error.to_string(), "llm stream error: connection reset");
    assert_eq!(engine.history().all(), &[Message::user("hi")]);
}

#[tokio::test]
async fn stream_error_after_tools_keeps_committed_pairs() {
    let service = ScriptedService::new()
        .reply(vec![call("c1", "echo", r#"{"text":"x"}"#)])
        .reply(vec![Step::Refuse("503 service unavailable".into())])
        .shared();
    let mut engine = engine(&service);

    let (_, error) = drain(engine.send("hi", CancellationToken::new())).await;

    assert!(error.is_some());
    assert_eq!(engine.history().len(), 3);
    assert_paired(engine.history().all());
}

// ═══════════════════════════════════════════════════════════════════════
//  Cancellation and early drop
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn cancel_while_streaming() {
    let service = ScriptedService::new()
        .reply(vec![text("thinking"), Step::Hang])
        .shared();
    let mut engine = engine(&service);
    let cancel = CancellationToken::new();

    let mut turn = engine.send("hi", cancel.clone());
    assert_eq!(
        turn.next().await.unwrap().unwrap(),
        TurnEvent::TextDelta("thinking".into())
    );

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let error = turn.next().await.unwrap().unwrap_err();
    assert!(error.is_cancelled());
    assert!(turn.next().await.is_none());
    drop(turn);

    assert_eq!(engine.history().all(), &[Message::user("hi")]);
}

#[tokio::test]
async fn cancel_during_tool_records_cancelled_result() {
    let service = ScriptedService::new()
        .reply(vec![call("c1", "stall", "{}"), call("c2", "echo", "{}")])
        .shared();
    let mut engine = engine(&service);
    let cancel = CancellationToken::new();

    let mut turn = engine.send("wait", cancel.clone());
    assert!(matches!(
        turn.next().await.unwrap().unwrap(),
        TurnEvent::ToolCallStarted { .. }
    ));

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let error = turn.next().await.unwrap().unwrap_err();
    assert!(error.is_cancelled());
    drop(turn);

    // The second call was never started.
    assert_eq!(
        engine.history().all(),
        &[
            Message::user("wait"),
            Message::tool_call("c1", "stall", "{}"),
            Message::tool_result("c1", "stall", CANCELLED_TOOL_OUTPUT),
        ]
    );
    assert_paired(engine.history().all());
}

#[tokio::test]
async fn dropping_turn_mid_batch_keeps_history_paired() {
    let service = ScriptedService::new()
        .reply(vec![call("c1", "echo", r#"{"text":"a"}"#), call("c2", "echo", "{}")])
        .reply(vec![text("unused")])
        .shared();
    let mut engine = engine(&service);

    {
        let mut turn = engine.send("go", CancellationToken::new());
        // c1 started, c1 finished, c2 started.
        for _ in 0..3 {
            turn.next().await.unwrap().unwrap();
        }
    }

    let history = engine.history().all();
    assert_eq!(history.len(), 5);
    assert_eq!(history[3], Message::tool_call("c2", "echo", "{}"));
    assert_eq!(
        history[4],
        Message::tool_result("c2", "echo", CANCELLED_TOOL_OUTPUT)
    );
    assert_paired(history);
    assert!(engine.history().dangling_tool_calls().is_empty());
}

#[tokio::test]
async fn engine_is_reusable_after_cancellation() {
    let service = ScriptedService::new().reply(vec![text("back")]).shared();
    let mut engine = engine(&service);
    let cancel = CancellationToken::new();

    let mut turn = engine.send("first", cancel.clone());
    cancel.cancel();
    assert!(turn.next().await.unwrap().unwrap_err().is_cancelled());
    drop(turn);
    assert_eq!(service.request_count(), 0);

    engine
        .send("second", CancellationToken::new())
        .finish()
        .await
        .unwrap();
    assert_eq!(
        engine.history().all().last(),
        Some(&Message::assistant("back"))
    );
}

#[tokio::test]
async fn abandoned_next_reports_cancellation() {
    let service = ScriptedService::new()
        .reply(vec![text("partial"), Step::Hang])
        .shared();
    let mut engine = engine(&service);

    let mut turn = engine.send("hi", CancellationToken::new());
    assert_eq!(
        turn.next().await.unwrap().unwrap(),
        TurnEvent::TextDelta("partial".into())
    );

    // The stream hangs, so the timeout drops the pending step.
    let timed_out = tokio::time::timeout(Duration::from_millis(20), turn.next()).await;
    assert!(timed_out.is_err());

    let error = turn.next().await.unwrap().unwrap_err();
    assert!(error.is_cancelled());
    assert!(turn.next().await.is_none());
    drop(turn);

    assert_eq!(engine.history().all(), &[Message::user("hi")]);
}

#[tokio::test]
async fn abandoned_tool_step_settles_the_call() {
    let service = ScriptedService::new()
        .reply(vec![call("c1", "stall", "{}")])
        .shared();
    let mut engine = engine(&service);

    let mut turn = engine.send("wait", CancellationToken::new());
    assert!(matches!(
        turn.next().await.unwrap().unwrap(),
        TurnEvent::ToolCallStarted { .. }
    ));

    let timed_out = tokio::time::timeout(Duration::from_millis(20), turn.next()).await;
    assert!(timed_out.is_err());

    assert!(turn.next().await.unwrap().unwrap_err().is_cancelled());
    assert!(turn.next().await.is_none());
    drop(turn);

    assert_eq!(
        engine.history().all(),
        &[
            Message::user("wait"),
            Message::tool_call("c1", "stall", "{}"),
            Message::tool_result("c1", "stall", CANCELLED_TOOL_OUTPUT),
        ]
    );
    assert_paired(engine.history().all());
}

// ═══════════════════════════════════════════════════════════════════════
//  Compaction inside a turn
// ═══════════════════════════════════════════════════════════════════════

fn compacting_engine(service: &Arc<ScriptedService>) -> Engine {
    let config = EngineConfig::new("test-model").with_compaction(CompactionConfig {
        max_context_tokens: 100,
        reserve_tokens: 0,
        keep_recent_tokens: 20,
    });
    Engine::new(config, service.clone())
}

#[tokio::test]
async fn oversized_history_is_compacted_before_the_request() {
    // 400 bytes of reply is 100 estimated tokens; the second query adds 50.
    let long_reply = "r".repeat(400);
    let second_query = "q".repeat(200);
    let service = ScriptedService::new()
        .reply(vec![text(&long_reply)])
        .reply(vec![text("ok")])
        .summary("user asked q, assistant answered at length")
        .shared();
    let mut engine = compacting_engine(&service);

    engine
        .send("q", CancellationToken::new())
        .finish()
        .await
        .unwrap();
    let (events, error) = drain(engine.send(second_query.clone(), CancellationToken::new())).await;
    assert!(error.is_none());

    let summary = summary_message("user asked q, assistant answered at length");
    let expected_tokens = estimate(&summary) + 50;
    assert_eq!(events[0], TurnEvent::CompactionStarted { from_tokens: 150 });
    assert_eq!(
        events[1],
        TurnEvent::CompactionFinished {
            from_tokens: 150,
            to_tokens: expected_tokens,
        }
    );

    // The summarized prefix was replaced before the completion request.
    assert_eq!(
        service.request(1).input,
        vec![summary.clone(), Message::user(second_query.clone())]
    );
    assert_eq!(
        engine.history().all(),
        &[
            summary,
            Message::user(second_query),
            Message::assistant("ok"),
        ]
    );

    let summary_requests = service.summary_requests.lock().unwrap();
    assert_eq!(summary_requests.len(), 1);
    assert_eq!(summary_requests[0].model, "test-model");
    assert!(summary_requests[0].input.starts_with("user: q\nassistant: rrrr"));
}

#[tokio::test]
async fn failed_summary_is_absorbed() {
    let long_reply = "r".repeat(400);
    let second_query = "q".repeat(200);
    let service = ScriptedService::new()
        .reply(vec![text(&long_reply)])
        .reply(vec![text("ok")])
        .summary_error("summarizer overloaded")
        .shared();
    let mut engine = compacting_engine(&service);

    engine
        .send("q", CancellationToken::new())
        .finish()
        .await
        .unwrap();
    let (events, error) = drain(engine.send(second_query.clone(), CancellationToken::new())).await;

    assert!(error.is_none());
    assert_eq!(
        events[1],
        TurnEvent::CompactionFinished {
            from_tokens: 150,
            to_tokens: 150,
        }
    );
    // The request went out with the uncompacted history.
    assert_eq!(
        service.request(1).input,
        vec![
            Message::user("q"),
            Message::assistant(long_reply),
            Message::user(second_query),
        ]
    );
    assert_eq!(engine.history().len(), 4);
}

#[tokio::test]
async fn uncuttable_history_reports_unchanged_size() {
    // A single oversized message cannot be cut.
    let service = ScriptedService::new().reply(vec![text("ok")]).shared();
    let mut engine = compacting_engine(&service);

    let (events, error) = drain(engine.send("x".repeat(800), CancellationToken::new())).await;

    assert!(error.is_none());
    assert_eq!(
        &events[..2],
        &[
            TurnEvent::CompactionStarted { from_tokens: 200 },
            TurnEvent::CompactionFinished {
                from_tokens: 200,
                to_tokens: 200,
            },
        ]
    );
    assert!(service.summary_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn compaction_disabled_never_summarizes() {
    let service = ScriptedService::new()
        .reply(vec![text(&"r".repeat(4000))])
        .reply(vec![text("ok")])
        .shared();
    let mut engine = engine(&service);

    engine
        .send("x".repeat(4000), CancellationToken::new())
        .finish()
        .await
        .unwrap();
    let (events, _) = drain(engine.send("again", CancellationToken::new())).await;

    assert!(!events.iter().any(|e| matches!(e, TurnEvent::CompactionStarted { .. })));
    assert!(service.summary_requests.lock().unwrap().is_empty());
}
