//! End-to-end pipeline tests: prompt → normalize → plan → execute →
//! summarize against a black-box Acme HTTP server, with a scripted mock LLM.

mod support;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use onemcp::{
    ChatCompletion, Engine, EngineConfig, ErrorCode, Handbook, MemoryGraphStore, MockLlm,
    PlanCache,
};
use stream_event::RunEvent;

async fn engine_with(replies: Vec<ChatCompletion>, base_url: &str) -> (Engine, Arc<PlanCache>) {
    let dir = tempfile::tempdir().unwrap();
    support::write_handbook(dir.path(), base_url);
    let handbook = Handbook::load(dir.path()).unwrap();
    let config = EngineConfig::from_agent(handbook.agent());
    let cache = Arc::new(PlanCache::in_memory());
    let engine = Engine::new(
        handbook,
        Arc::new(MockLlm::script(replies)),
        Arc::new(MemoryGraphStore::new()),
        cache.clone(),
        config,
    )
    .await
    .unwrap();
    (engine, cache)
}

/// **Scenario**: "Show total sales for 2024" produces a one-step plan that
/// invokes the Acme query operation exactly once; the response carries the
/// numeric total.
#[tokio::test]
async fn acme_total_sales_single_call() {
    let server = support::spawn_acme(0).await;
    let (engine, cache) = engine_with(
        vec![
            ChatCompletion::text(support::normalize_reply(false)),
            ChatCompletion::text(support::plan_reply()),
            ChatCompletion::text("Total sales for 2024 were $123,450.50."),
        ],
        &server.base_url,
    )
    .await;

    let outcome = engine
        .run("Show total sales for 2024", None, CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.cache_hit);
    assert!(outcome.summary.contains("123,450.50"));
    assert_eq!(outcome.variables["total_sales"], 123450.5);
    assert_eq!(server.calls(), 1, "exactly one Acme query call");
    assert_eq!(cache.len(), 1, "plan stored under the normalized key");
}

/// **Scenario**: five synonymous by-state prompts normalize to the same
/// cache key; the second through fifth replay the cached plan without a
/// planning call.
#[tokio::test]
async fn synonym_cluster_hits_cache() {
    let server = support::spawn_acme(0).await;

    // First run: normalize + plan + summarize. Later runs: normalize +
    // summarize only - a planning call would desynchronize the script and
    // fail the runs.
    let mut replies = vec![
        ChatCompletion::text(support::normalize_reply(true)),
        ChatCompletion::text(support::plan_reply()),
        ChatCompletion::text("Revenue by state computed."),
    ];
    for _ in 0..4 {
        replies.push(ChatCompletion::text(support::normalize_reply(true)));
        replies.push(ChatCompletion::text("Revenue by state computed."));
    }
    let (engine, cache) = engine_with(replies, &server.base_url).await;

    let prompts = [
        "Calculate total sales by state",
        "What's the total revenue per state?",
        "Sum up sales for each state",
        "Show me sales totals grouped by customer state",
        "Aggregate revenue by state",
    ];

    let first = engine
        .run(prompts[0], None, CancellationToken::new())
        .await
        .unwrap();
    assert!(!first.cache_hit);

    for prompt in &prompts[1..] {
        let outcome = engine
            .run(prompt, None, CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.cache_hit, "expected cache hit for {prompt:?}");
    }

    assert_eq!(cache.len(), 1, "all five prompts share one cache key");
    assert_eq!(server.calls(), 5, "every run executes the plan");
}

/// **Scenario**: cancelling during step execution aborts the in-flight
/// bridge call and surfaces CANCELLED; no step completes successfully.
#[tokio::test]
async fn cancellation_during_execution() {
    let server = support::spawn_acme(5_000).await;
    let (engine, _cache) = engine_with(
        vec![
            ChatCompletion::text(support::normalize_reply(false)),
            ChatCompletion::text(support::plan_reply()),
        ],
        &server.base_url,
    )
    .await;

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(64);

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        canceller.cancel();
    });

    let err = engine
        .run("Show total sales for 2024", Some(tx), cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Cancelled);

    let mut step_ended_ok = false;
    while let Ok(event) = rx.try_recv() {
        if let RunEvent::StepEnd { ok: true, .. } = event {
            step_ended_ok = true;
        }
    }
    assert!(!step_ended_ok, "no step may complete after cancellation");
}

/// **Scenario**: a parallel-fanout plan runs both siblings and merges their
/// outputs into the Value Store at the join.
#[tokio::test]
async fn parallel_fanout_merges_outputs() {
    let server = support::spawn_acme(0).await;
    let fanout_plan = serde_json::json!({
        "workflow": "parallel_fanout",
        "steps": [
            {
                "id": "total",
                "class_name": "steps.Total",
                "snippet": "use api.acme;\nuse std.json;\nlet res = acme.call(\"query\", {});\nout total_sales = json.get(res.body, \"total\");",
                "input_vars": [],
                "output_vars": ["total_sales"],
                "services_used": ["acme"]
            },
            {
                "id": "listing",
                "class_name": "steps.Listing",
                "snippet": "use api.acme;\nuse std.list;\nlet res = acme.call(\"listSales\", {});\nout sale_count = list.len(res.body);",
                "input_vars": [],
                "output_vars": ["sale_count"],
                "services_used": ["acme"]
            }
        ]
    })
    .to_string();

    let (engine, _cache) = engine_with(
        vec![
            ChatCompletion::text(support::normalize_reply(false)),
            ChatCompletion::text(fanout_plan),
            ChatCompletion::text("Both figures computed."),
        ],
        &server.base_url,
    )
    .await;

    let outcome = engine
        .run("Show totals and the number of sales", None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.variables["total_sales"], 123450.5);
    assert_eq!(outcome.variables["sale_count"], 2);
}

/// **Scenario**: events stream in pipeline order - normalize before plan
/// before execute before summarize, with step start/end around the call.
#[tokio::test]
async fn events_follow_pipeline_order() {
    let server = support::spawn_acme(0).await;
    let (engine, _cache) = engine_with(
        vec![
            ChatCompletion::text(support::normalize_reply(false)),
            ChatCompletion::text(support::plan_reply()),
            ChatCompletion::text("Done."),
        ],
        &server.base_url,
    )
    .await;

    let (tx, mut rx) = mpsc::channel(64);
    engine
        .run("Show total sales for 2024", Some(tx), CancellationToken::new())
        .await
        .unwrap();

    let mut stages = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            RunEvent::StageEnter { stage } => stages.push(format!("+{stage}")),
            RunEvent::StepStart { step_id } => stages.push(format!(">{step_id}")),
            RunEvent::StepEnd { step_id, ok } => stages.push(format!("<{step_id}:{ok}")),
            RunEvent::RunEnd { .. } => stages.push("end".to_string()),
            _ => {}
        }
    }
    assert_eq!(
        stages,
        vec![
            "+normalize",
            "+plan",
            "+execute",
            ">s1",
            "<s1:true",
            "+summarize",
            "end"
        ]
    );
}

/// **Scenario**: a prompt outside the dictionary fails with NORMALIZATION
/// and nothing is stored in the plan cache.
#[tokio::test]
async fn unknown_tokens_never_pollute_cache() {
    let server = support::spawn_acme(0).await;
    let bad_reply = serde_json::json!({
        "action": "aggregate",
        "entities": ["warehouse"],
        "fields": ["amount"]
    })
    .to_string();
    let (engine, cache) = engine_with(
        vec![ChatCompletion::text(bad_reply)],
        &server.base_url,
    )
    .await;

    let err = engine
        .run("Count warehouses", None, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Normalization);
    assert_eq!(cache.len(), 0);
}
