//! End-to-end tests driving real QuickJS contexts.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};

use loom_js_runtime::{
    CodeBundle, ContextConfig, ContextHandle, ContextServices, ExitReason, LogLevel, LogSink,
    RuntimeError, UiChannel, spawn_context,
};
use loom_modules::{
    Args, BoundModule, CallContext, MethodSchema, ModuleConfig, ModuleInfo, ModuleResult,
    ModuleSchema, NamespaceSchema, NativeModule,
};

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

struct Counter {
    counts: Mutex<std::collections::HashMap<String, i64>>,
}

impl NativeModule for Counter {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new("counter", semver::Version::new(0, 1, 0))
    }

    fn schema(&self) -> ModuleSchema {
        ModuleSchema::new()
            .method(MethodSchema::new("inc").param("by", "number").returns("number"))
            .namespace(NamespaceSchema::new("admin").method(MethodSchema::new("reset").returns("void")))
    }

    fn init(&self, _config: &ModuleConfig) -> ModuleResult<()> {
        Ok(())
    }

    fn call(&self, ctx: &CallContext<'_>, method: &str, args: Vec<Value>) -> ModuleResult<Value> {
        let args = Args::new("counter", method, &args);
        let mut counts = self.counts.lock();
        let count = counts.entry(ctx.project_id.to_string()).or_insert(0);
        match method {
            "inc" => {
                *count += args.value(0).as_i64().ok_or_else(|| args.error("by must be a number"))?;
                Ok(json!(*count))
            }
            "admin.reset" => {
                *count = 0;
                Ok(Value::Null)
            }
            _ => Err(args.unknown_method()),
        }
    }
}

fn counter() -> BoundModule {
    let module: Arc<dyn NativeModule> = Arc::new(Counter {
        counts: Mutex::new(Default::default()),
    });
    BoundModule {
        name: "counter".to_string(),
        schema: Arc::new(module.schema()),
        module,
    }
}

#[derive(Default)]
struct CapturedLogs(Mutex<Vec<(String, LogLevel, String)>>);

impl LogSink for CapturedLogs {
    fn emit(&self, project_id: &str, level: LogLevel, message: &str) {
        self.0.lock().push((project_id.to_string(), level, message.to_string()));
    }
}

#[derive(Default)]
struct CapturedUi(Mutex<Vec<(String, String, Value)>>);

impl UiChannel for CapturedUi {
    fn request(&self, _project_id: &str, session_id: &str, request_id: &str, schema: Value) -> bool {
        self.0.lock().push((session_id.to_string(), request_id.to_string(), schema));
        session_id != "refused"
    }
}

fn fast_config() -> ContextConfig {
    ContextConfig {
        sample_interval: Duration::from_millis(50),
        ..ContextConfig::default()
    }
}

async fn spawn(source: &str) -> Result<ContextHandle, RuntimeError> {
    spawn_context(
        "p1",
        CodeBundle::new("debug:main", source),
        vec![],
        ContextServices::default(),
        fast_config(),
    )
    .await
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn routes_are_invoked_and_counted() {
    let ctx = spawn(
        r#"
        service.route("GET", "/hello", (req) => ({ project: service.projectId, q: req.query }));
        service.route("POST", "/fail", () => { throw new Error("nope"); });
        "#,
    )
    .await
    .unwrap();

    let reply = ctx.invoke("get", "/hello", json!({ "query": { "a": "1" } })).await.unwrap();
    assert_eq!(reply, json!({ "project": "p1", "q": { "a": "1" } }));

    let err = ctx.invoke("POST", "/fail", json!({})).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Script(ref msg) if msg.contains("nope")), "{:?}", err);

    let err = ctx.invoke("GET", "/missing", json!({})).await.unwrap_err();
    assert!(matches!(err, RuntimeError::RouteNotFound { .. }));

    let stats = ctx.stats(chrono::Utc::now());
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.failed_requests, 2);
    assert_eq!(stats.route_hits.get("GET /hello"), Some(&1));
    assert_eq!(stats.route_hits.get("POST /fail"), Some(&1));

    tokio_test::assert_ok!(ctx.shutdown().await);
    assert!(matches!(ctx.invoke("GET", "/hello", json!({})).await, Err(RuntimeError::Terminated)));
}

#[tokio::test]
async fn syntax_error_is_a_compile_error() {
    let err = spawn("service.route(").await.err().unwrap();
    assert!(matches!(err, RuntimeError::Compile(_)), "{:?}", err);
}

#[tokio::test]
async fn throwing_hooks_fail_start() {
    let err = spawn(r#"service.onStart(() => { throw new Error("no start"); });"#)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RuntimeError::Hook { ref hook, ref message } if hook == "start" && message.contains("no start")));

    let err = spawn(r#"service.onBoot(() => { throw new Error("no boot"); });"#)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RuntimeError::Hook { ref hook, .. } if hook == "boot"));
}

#[tokio::test]
async fn shutdown_hook_error_is_reported_and_thread_exits() {
    let ctx = spawn(r#"service.onShutdown(() => { throw new Error("dirty"); });"#)
        .await
        .unwrap();
    let exit = ctx.take_exit_signal().unwrap();

    let err = ctx.shutdown().await.unwrap_err();
    assert!(matches!(err, RuntimeError::Hook { ref hook, .. } if hook == "shutdown"));

    let reason = tokio::time::timeout(Duration::from_secs(5), exit).await.unwrap().unwrap();
    assert_eq!(reason, ExitReason::Shutdown);
}

#[tokio::test]
async fn terminate_interrupts_a_busy_script() {
    let ctx = Arc::new(spawn(r#"service.route("GET", "/spin", () => { while (true) {} });"#).await.unwrap());
    let exit = ctx.take_exit_signal().unwrap();

    let spinning = {
        let ctx = ctx.clone();
        tokio::spawn(async move { ctx.invoke("GET", "/spin", json!({})).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    ctx.terminate();

    let result = tokio::time::timeout(Duration::from_secs(5), spinning).await.unwrap().unwrap();
    assert!(result.is_err());
    let reason = tokio::time::timeout(Duration::from_secs(5), exit).await.unwrap().unwrap();
    assert_eq!(reason, ExitReason::Abandoned);
}

#[tokio::test]
async fn full_command_queue_rejects_instead_of_piling_up() {
    let config = ContextConfig {
        command_queue: 1,
        ..fast_config()
    };
    let ctx = spawn_context(
        "p1",
        CodeBundle::new("debug:main", r#"service.route("GET", "/spin", () => { while (true) {} });"#),
        vec![],
        ContextServices::default(),
        config,
    )
    .await
    .map(Arc::new)
    .unwrap();

    let spinning = {
        let ctx = ctx.clone();
        tokio::spawn(async move { ctx.invoke("GET", "/spin", json!({})).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Takes the only slot behind the stuck handler
    let queued = {
        let ctx = ctx.clone();
        tokio::spawn(async move { ctx.invoke("GET", "/spin", json!({})).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = ctx.invoke("GET", "/spin", json!({})).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Busy), "{:?}", err);
    assert!(matches!(
        ctx.deliver_ui_response("r1".to_string(), Ok(Value::Null)),
        Err(RuntimeError::Busy)
    ));

    ctx.terminate();
    assert!(tokio::time::timeout(Duration::from_secs(5), spinning).await.unwrap().unwrap().is_err());
    assert!(tokio::time::timeout(Duration::from_secs(5), queued).await.unwrap().unwrap().is_err());
}

// ─────────────────────────────────────────────────────────────────────────────
// Host surface
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn modules_are_bound_from_their_schema() {
    let ctx = spawn_context(
        "p1",
        CodeBundle::new(
            "release:1.0.0",
            r#"
            const c = require("counter");
            service.route("GET", "/inc", () => modules.counter.inc(2));
            service.route("GET", "/reset", () => { c.admin.reset(); return c.inc(1); });
            service.route("GET", "/frozen", () => Object.isFrozen(modules.counter) && Object.isFrozen(modules.counter.admin));
            service.route("GET", "/bad", () => c.inc("x"));
            service.route("GET", "/unknown", () => require("nope"));
            "#,
        )
        .require("counter"),
        vec![counter()],
        ContextServices::default(),
        fast_config(),
    )
    .await
    .unwrap();

    assert_eq!(ctx.invoke("GET", "/inc", json!({})).await.unwrap(), json!(2));
    assert_eq!(ctx.invoke("GET", "/inc", json!({})).await.unwrap(), json!(4));
    assert_eq!(ctx.invoke("GET", "/reset", json!({})).await.unwrap(), json!(1));
    assert_eq!(ctx.invoke("GET", "/frozen", json!({})).await.unwrap(), json!(true));

    let err = ctx.invoke("GET", "/bad", json!({})).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Script(ref msg) if msg.contains("by must be a number")));
    let err = ctx.invoke("GET", "/unknown", json!({})).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Script(ref msg) if msg.contains("module not available")));

    ctx.shutdown().await.unwrap();
}

#[tokio::test]
async fn console_output_reaches_the_log_sink() {
    let logs = Arc::new(CapturedLogs::default());
    let ctx = spawn_context(
        "p7",
        CodeBundle::new("debug:dev", r#"console.log("booted", { n: 1 }); console.error("bad");"#),
        vec![],
        ContextServices {
            log: Some(logs.clone()),
            ui: None,
        },
        fast_config(),
    )
    .await
    .unwrap();

    let lines = logs.0.lock().clone();
    assert_eq!(
        lines,
        vec![
            ("p7".to_string(), LogLevel::Info, r#"booted {"n":1}"#.to_string()),
            ("p7".to_string(), LogLevel::Error, "bad".to_string()),
        ]
    );
    ctx.shutdown().await.unwrap();
}

#[tokio::test]
async fn ui_requests_round_trip_through_the_channel() {
    let ui = Arc::new(CapturedUi::default());
    let ctx = spawn_context(
        "p1",
        CodeBundle::new(
            "debug:dev",
            r#"
            let answer = null;
            service.route("POST", "/ask", (req) => ui.request(req.session, { title: "Name?" }, (data, err) => {
                answer = err ? { error: err } : { data };
            }));
            service.route("GET", "/answer", () => answer);
            "#,
        ),
        vec![],
        ContextServices {
            log: None,
            ui: Some(ui.clone()),
        },
        fast_config(),
    )
    .await
    .unwrap();

    let id = ctx.invoke("POST", "/ask", json!({ "session": "s1" })).await.unwrap();
    let (session, request_id, schema) = ui.0.lock()[0].clone();
    assert_eq!(session, "s1");
    assert_eq!(id, json!(request_id));
    assert_eq!(schema, json!({ "title": "Name?" }));

    ctx.deliver_ui_response(request_id.clone(), Ok(json!({ "name": "Ada" }))).unwrap();
    assert_eq!(
        ctx.invoke("GET", "/answer", json!({})).await.unwrap(),
        json!({ "data": { "name": "Ada" } })
    );

    // Second delivery for the same request is ignored
    ctx.deliver_ui_response(request_id, Err("late".to_string())).unwrap();
    assert_eq!(
        ctx.invoke("GET", "/answer", json!({})).await.unwrap(),
        json!({ "data": { "name": "Ada" } })
    );

    // Abandonment is delivered as an error
    let id = ctx.invoke("POST", "/ask", json!({ "session": "s2" })).await.unwrap();
    ctx.deliver_ui_response(id.as_str().unwrap().to_string(), Err("session disconnected".to_string()))
        .unwrap();
    assert_eq!(
        ctx.invoke("GET", "/answer", json!({})).await.unwrap(),
        json!({ "error": "session disconnected" })
    );

    // A synchronous refusal throws inside the script
    let err = ctx.invoke("POST", "/ask", json!({ "session": "refused" })).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Script(ref msg) if msg.contains("refused")));

    ctx.shutdown().await.unwrap();
}

#[tokio::test]
async fn jobs_fire_and_history_is_sampled() {
    let ctx = spawn(
        r#"
        let ticks = 0;
        service.every("tick", 20, () => { ticks += 1; });
        service.route("GET", "/ticks", () => ticks);
        "#,
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let ticks = ctx.invoke("GET", "/ticks", json!({})).await.unwrap();
    assert!(ticks.as_u64().unwrap() >= 3, "ticks = {}", ticks);

    let stats = ctx.stats(chrono::Utc::now());
    assert!(stats.job_runs.get("tick").copied().unwrap_or(0) >= 3);
    assert!(!stats.history.memory.is_empty());
    assert!(stats.memory_bytes > 0);

    ctx.shutdown().await.unwrap();
}

#[tokio::test]
async fn service_config_is_exposed() {
    let ctx = spawn_context(
        "p1",
        CodeBundle::new("release:2.0.0", r#"service.route("GET", "/cfg", () => service.config.greeting);"#)
            .with_config(json!({ "greeting": "hi" })),
        vec![],
        ContextServices::default(),
        fast_config(),
    )
    .await
    .unwrap();

    assert_eq!(ctx.invoke("GET", "/cfg", json!({})).await.unwrap(), json!("hi"));
    ctx.shutdown().await.unwrap();
}
