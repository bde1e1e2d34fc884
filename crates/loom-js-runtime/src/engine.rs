//! The QuickJS side of a context.
//!
//! Owns the engine runtime, the single context inside it and the module
//! bindings. Lives on the context thread and is never sent anywhere else.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rquickjs::function::IntoArgs;
use rquickjs::{CatchResultExt, Context, Ctx, Function, Object, Runtime};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use loom_modules::BoundModule;

use crate::binder::{Bindings, ModuleDispatch};
use crate::bundle::CodeBundle;
use crate::error::RuntimeError;
use crate::services::{ContextServices, LogLevel, LogSink, UiChannel};
use crate::spawn::ContextConfig;
use crate::stats::StatsRecorder;

const PRELUDE: &str = include_str!("prelude.js");

/// Everything needed to boot an engine, moved onto the context thread.
pub(crate) struct EngineSetup {
    pub project_id: String,
    pub bundle: CodeBundle,
    pub modules: Vec<BoundModule>,
    pub services: ContextServices,
    pub config: ContextConfig,
    pub interrupt: Arc<AtomicBool>,
    pub stats: Arc<StatsRecorder>,
}

/// A job registered with `service.every`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobSpec {
    pub name: String,
    pub interval_ms: u64,
}

impl JobSpec {
    pub(crate) fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    missing: bool,
}

enum Outcome {
    Ok(Value),
    Missing,
    Failed(String),
}

impl Envelope {
    fn parse(text: &str) -> Outcome {
        match serde_json::from_str::<Envelope>(text) {
            Ok(env) if env.ok => Outcome::Ok(env.value),
            Ok(env) if env.missing => Outcome::Missing,
            Ok(env) => Outcome::Failed(env.error.unwrap_or_else(|| "unknown script error".to_string())),
            Err(e) => Outcome::Failed(format!("malformed host reply: {}", e)),
        }
    }
}

/// Console bridge: `tracing` under `loom.script`, plus the late-bound sink.
struct ScriptLog {
    project_id: String,
    sink: Option<Arc<dyn LogSink>>,
}

impl ScriptLog {
    fn write(&self, level: &str, message: &str) {
        let level = level.parse().unwrap_or(LogLevel::Info);
        let project = self.project_id.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(target: "loom.script", project, "{}", message),
            LogLevel::Info => tracing::info!(target: "loom.script", project, "{}", message),
            LogLevel::Warn => tracing::warn!(target: "loom.script", project, "{}", message),
            LogLevel::Error => tracing::error!(target: "loom.script", project, "{}", message),
        }
        if let Some(sink) = &self.sink {
            sink.emit(project, level, message);
        }
    }
}

struct UiBridge {
    project_id: String,
    channel: Option<Arc<dyn UiChannel>>,
}

impl UiBridge {
    /// Returns the new request ID, or an empty string when refused.
    fn request(&self, session_id: &str, schema_json: &str) -> String {
        let Some(channel) = &self.channel else {
            tracing::warn!(project = %self.project_id, session = %session_id, "ui.request without an interactive channel");
            return String::new();
        };
        let schema = serde_json::from_str(schema_json).unwrap_or(Value::Null);
        let request_id = Uuid::new_v4().to_string();
        if channel.request(&self.project_id, session_id, &request_id, schema) {
            request_id
        } else {
            String::new()
        }
    }
}

fn install_natives(ctx: &Ctx<'_>, log: ScriptLog, dispatch: ModuleDispatch, ui: UiBridge) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    globals.set(
        "__loom_native_log",
        Function::new(ctx.clone(), move |level: String, message: String| {
            log.write(&level, &message);
        })?,
    )?;

    globals.set(
        "__loom_native_call",
        Function::new(ctx.clone(), move |module: String, method: String, args: String| {
            dispatch.call(&module, &method, &args)
        })?,
    )?;

    globals.set(
        "__loom_native_ui",
        Function::new(ctx.clone(), move |session: String, schema: String| {
            ui.request(&session, &schema)
        })?,
    )?;

    Ok(())
}

fn host_fn<'js>(ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Function<'js>> {
    let host: Object<'js> = ctx.globals().get("__loom")?;
    host.get(name)
}

fn engine_error(e: rquickjs::Error) -> RuntimeError {
    RuntimeError::Engine(e.to_string())
}

pub(crate) struct Engine {
    project_id: String,
    context: Context,
    runtime: Runtime,
    stats: Arc<StatsRecorder>,
    // Dropped last: unbinds modules once the engine is gone
    _bindings: Bindings,
}

impl Engine {
    /// Create the engine, bind modules, evaluate the bundle, then run the
    /// boot and start hooks. Any failure discards everything built so far.
    pub(crate) fn boot(setup: EngineSetup) -> Result<(Self, Vec<JobSpec>), RuntimeError> {
        let EngineSetup {
            project_id,
            bundle,
            modules,
            services,
            config,
            interrupt,
            stats,
        } = setup;

        let runtime = Runtime::new().map_err(engine_error)?;
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        runtime.set_max_stack_size(config.max_stack_size);
        runtime.set_interrupt_handler(Some(Box::new(move || interrupt.load(Ordering::Relaxed))));

        let context = Context::full(&runtime).map_err(engine_error)?;
        let bindings = Bindings::bind_all(&project_id, &modules)?;

        let log = ScriptLog {
            project_id: project_id.clone(),
            sink: services.log,
        };
        let dispatch = ModuleDispatch::new(&project_id, bindings.modules());
        let ui = UiBridge {
            project_id: project_id.clone(),
            channel: services.ui,
        };

        context.with(|ctx| -> Result<(), RuntimeError> {
            install_natives(&ctx, log, dispatch, ui).map_err(engine_error)?;
            ctx.eval::<rquickjs::Value, _>(PRELUDE)
                .catch(&ctx)
                .map_err(|e| RuntimeError::Engine(format!("prelude: {}", e)))?;

            let config_json = serde_json::to_string(&bundle.config)
                .map_err(|e| RuntimeError::Engine(e.to_string()))?;
            host_fn(&ctx, "configure")
                .and_then(|f| f.call::<_, rquickjs::Value>((project_id.clone(), config_json)))
                .catch(&ctx)
                .map_err(|e| RuntimeError::Engine(e.to_string()))?;

            for module in bindings.modules() {
                for path in module.schema.method_paths() {
                    host_fn(&ctx, "bindMethod")
                        .and_then(|f| f.call::<_, rquickjs::Value>((module.name.clone(), path)))
                        .catch(&ctx)
                        .map_err(|e| RuntimeError::ModuleBind {
                            module: module.name.clone(),
                            reason: e.to_string(),
                        })?;
                }
            }
            host_fn(&ctx, "seal")
                .and_then(|f| f.call::<_, rquickjs::Value>(()))
                .catch(&ctx)
                .map_err(|e| RuntimeError::Engine(e.to_string()))?;
            Ok(())
        })?;

        let engine = Engine {
            project_id,
            context,
            runtime,
            stats,
            _bindings: bindings,
        };

        let started = Instant::now();
        let evaluated = engine.context.with(|ctx| {
            ctx.eval::<rquickjs::Value, _>(bundle.source.as_str())
                .catch(&ctx)
                .map(|_| ())
                .map_err(|e| e.to_string())
        });
        engine.stats.add_busy(started.elapsed());
        evaluated.map_err(RuntimeError::Compile)?;
        engine.drain_pending();

        for hook in ["boot", "start"] {
            engine.run_hooks(hook).map_err(|message| RuntimeError::Hook {
                hook: hook.to_string(),
                message,
            })?;
        }

        let jobs = engine
            .call_host("jobs", ())
            .and_then(|json| serde_json::from_str(&json).map_err(|e| e.to_string()))
            .map_err(RuntimeError::Engine)?;

        tracing::debug!(project = %engine.project_id, label = %bundle.label, "engine booted");
        Ok((engine, jobs))
    }

    /// Call a `__loom` entry point; the reply is always a string.
    fn call_host<A>(&self, name: &str, args: A) -> Result<String, String>
    where
        A: for<'js> IntoArgs<'js>,
    {
        let started = Instant::now();
        let result = self.context.with(|ctx| {
            host_fn(&ctx, name)
                .and_then(|f| f.call::<A, String>(args))
                .catch(&ctx)
                .map_err(|e| e.to_string())
        });
        self.drain_pending();
        self.stats.add_busy(started.elapsed());
        result
    }

    /// Run queued promise reactions until the queue is empty.
    fn drain_pending(&self) {
        loop {
            match self.runtime.execute_pending_job() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(_) => {
                    tracing::warn!(project = %self.project_id, "pending job threw");
                }
            }
        }
    }

    pub(crate) fn run_hooks(&self, phase: &str) -> Result<(), String> {
        match Envelope::parse(&self.call_host("runHooks", (phase.to_string(),))?) {
            Outcome::Ok(_) => Ok(()),
            Outcome::Missing => Ok(()),
            Outcome::Failed(message) => Err(message),
        }
    }

    pub(crate) fn invoke(&self, method: &str, path: &str, request: &Value) -> Result<Value, RuntimeError> {
        let route = format!("{} {}", method.to_uppercase(), path);
        let request_json = serde_json::to_string(request).map_err(|e| RuntimeError::Script(e.to_string()))?;

        let reply = self.call_host("dispatchRoute", (method.to_string(), path.to_string(), request_json));
        let outcome = match reply {
            Ok(text) => Envelope::parse(&text),
            Err(message) => Outcome::Failed(message),
        };

        match outcome {
            Outcome::Ok(value) => {
                self.stats.record_request(Some(&route), true);
                Ok(value)
            }
            Outcome::Missing => {
                self.stats.record_request(None, false);
                Err(RuntimeError::RouteNotFound {
                    method: method.to_uppercase(),
                    path: path.to_string(),
                })
            }
            Outcome::Failed(message) => {
                self.stats.record_request(Some(&route), false);
                tracing::debug!(project = %self.project_id, route = %route, error = %message, "route handler failed");
                Err(RuntimeError::Script(message))
            }
        }
    }

    pub(crate) fn run_job(&self, name: &str) {
        let outcome = match self.call_host("runJob", (name.to_string(),)) {
            Ok(text) => Envelope::parse(&text),
            Err(message) => Outcome::Failed(message),
        };
        match outcome {
            Outcome::Ok(_) => self.stats.record_job(name, true),
            Outcome::Missing => tracing::warn!(project = %self.project_id, job = %name, "job vanished"),
            Outcome::Failed(message) => {
                self.stats.record_job(name, false);
                tracing::warn!(project = %self.project_id, job = %name, error = %message, "job failed");
            }
        }
    }

    pub(crate) fn resolve_ui(&self, request_id: &str, outcome: Result<Value, String>) {
        let (data, error) = match outcome {
            Ok(data) => (data.to_string(), None),
            Err(error) => ("null".to_string(), Some(error)),
        };
        let reply = self.call_host("resolveUi", (request_id.to_string(), data, error));
        match reply.map(|text| Envelope::parse(&text)) {
            Ok(Outcome::Ok(_)) => {}
            Ok(Outcome::Missing) => {
                tracing::debug!(project = %self.project_id, request = %request_id, "no pending ui request");
            }
            Ok(Outcome::Failed(message)) | Err(message) => {
                tracing::warn!(project = %self.project_id, request = %request_id, error = %message, "ui callback failed");
            }
        }
    }

    /// Sample memory and close the current stats bucket.
    pub(crate) fn sample(&self) {
        let usage = self.runtime.memory_usage();
        self.stats.sample(usage.memory_used_size.max(0) as u64);
    }
}
