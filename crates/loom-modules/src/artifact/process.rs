//! Process-hosted module
//!
//! Runs an artifact's executable as a child process and forwards the module
//! contract over the framed IPC protocol on its stdin/stdout. Calls are
//! synchronous request/response; a mutex keeps one exchange in flight.

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::ipc::{
    CallRequest, ErrorPayload, Frame, FrameReader, FrameWriter, InitRequest, LogPayload,
    MessageType, ResultPayload, ScopeRequest,
};
use super::manifest::ArtifactManifest;
use crate::error::{ModuleError, ModuleResult};
use crate::module::{CallContext, ModuleConfig, ModuleInfo, NativeModule};
use crate::schema::ModuleSchema;

/// How long a module process gets to exit after `Shutdown`.
const EXIT_GRACE: Duration = Duration::from_secs(2);

type Reader = FrameReader<BufReader<ChildStdout>>;

/// A running module process
struct ModuleProcess {
    child: Child,
    writer: FrameWriter<ChildStdin>,
    reader: Reader,
}

/// A module loaded from an artifact directory
pub struct ArtifactModule {
    dir: PathBuf,
    manifest: ArtifactManifest,
    process: Mutex<Option<ModuleProcess>>,
}

impl ArtifactModule {
    /// Read the artifact's manifest. The process is not started until `init`.
    pub fn open(dir: impl AsRef<Path>) -> ModuleResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let manifest = ArtifactManifest::read(&dir)?;
        Ok(Self {
            dir,
            manifest,
            process: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn name(&self) -> &str {
        &self.manifest.module.name
    }

    fn spawn(&self) -> ModuleResult<ModuleProcess> {
        let executable = self.manifest.executable(&self.dir);
        info!(module = %self.name(), "Spawning module process: {}", executable.display());

        let mut child = Command::new(&executable)
            .args(&self.manifest.artifact.args)
            .current_dir(&self.dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| self.init_error(format!("failed to spawn {}: {}", executable.display(), e)))?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                return Err(self.init_error("failed to capture module stdio"));
            }
        };

        let reader = FrameReader::new(BufReader::new(stdout));
        let timeout = Duration::from_secs(self.manifest.artifact.ready_timeout_secs);
        let reader = match wait_for_ready(reader, timeout) {
            Ok(reader) => reader,
            Err(reason) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(self.init_error(reason));
            }
        };

        debug!(module = %self.name(), "Module process is ready");
        Ok(ModuleProcess {
            child,
            writer: FrameWriter::new(stdin),
            reader,
        })
    }

    /// Send one request and wait for its `Result` or `Error` reply.
    fn exchange(&self, frame: &Frame) -> Result<Value, Exchange> {
        let mut guard = self.process.lock();
        let process = guard.as_mut().ok_or(Exchange::NotRunning)?;

        if let Err(e) = process.writer.send(frame) {
            self.discard(&mut guard);
            return Err(Exchange::Broken(format!("write failed: {}", e)));
        }

        loop {
            let reply = match process.reader.recv() {
                Ok(Some(reply)) => reply,
                Ok(None) => {
                    self.discard(&mut guard);
                    return Err(Exchange::Broken("module process exited".to_string()));
                }
                Err(e) => {
                    self.discard(&mut guard);
                    return Err(Exchange::Broken(e.to_string()));
                }
            };

            match reply.msg_type {
                MessageType::Log => forward_log(self.name(), &reply),
                MessageType::Result => {
                    let payload: ResultPayload = reply
                        .parse_json()
                        .map_err(|e| Exchange::Broken(e.to_string()))?;
                    return Ok(payload.value);
                }
                MessageType::Error => {
                    let payload: ErrorPayload = reply
                        .parse_json()
                        .map_err(|e| Exchange::Broken(e.to_string()))?;
                    return Err(Exchange::Rejected(payload.message));
                }
                other => {
                    warn!(module = %self.name(), "Unexpected {:?} frame from module process", other);
                }
            }
        }
    }

    fn discard(&self, guard: &mut Option<ModuleProcess>) {
        if let Some(mut process) = guard.take() {
            warn!(module = %self.name(), "Module process is gone; marking unavailable");
            let _ = process.child.kill();
            let _ = process.child.wait();
        }
    }

    fn init_error(&self, reason: impl Into<String>) -> ModuleError {
        ModuleError::Init {
            module: self.name().to_string(),
            reason: reason.into(),
        }
    }
}

/// Outcome of a failed request/response exchange
enum Exchange {
    NotRunning,
    /// The process answered with an `Error` frame
    Rejected(String),
    /// The channel is unusable
    Broken(String),
}

impl NativeModule for ArtifactModule {
    fn info(&self) -> ModuleInfo {
        self.manifest.module.clone()
    }

    fn schema(&self) -> ModuleSchema {
        self.manifest.schema.clone()
    }

    fn init(&self, config: &ModuleConfig) -> ModuleResult<()> {
        let process = self.spawn()?;
        *self.process.lock() = Some(process);

        let frame = Frame::json(
            MessageType::Init,
            &InitRequest {
                config: config.clone(),
            },
        )?;
        match self.exchange(&frame) {
            Ok(_) => Ok(()),
            Err(Exchange::Rejected(reason)) | Err(Exchange::Broken(reason)) => {
                let mut guard = self.process.lock();
                self.discard(&mut guard);
                Err(self.init_error(reason))
            }
            Err(Exchange::NotRunning) => Err(self.init_error("module process exited")),
        }
    }

    fn bind(&self, project_id: &str) -> ModuleResult<()> {
        let frame = Frame::json(
            MessageType::Bind,
            &ScopeRequest {
                project: project_id.to_string(),
            },
        )?;
        self.exchange(&frame).map(|_| ()).map_err(|e| ModuleError::Bind {
            module: self.name().to_string(),
            reason: e.reason(),
        })
    }

    fn unbind(&self, project_id: &str) {
        let frame = match Frame::json(
            MessageType::Unbind,
            &ScopeRequest {
                project: project_id.to_string(),
            },
        ) {
            Ok(frame) => frame,
            Err(_) => return,
        };
        if let Err(e) = self.exchange(&frame) {
            debug!(module = %self.name(), project = %project_id, "Unbind failed: {}", e.reason());
        }
    }

    fn call(&self, ctx: &CallContext<'_>, method: &str, args: Vec<Value>) -> ModuleResult<Value> {
        let frame = Frame::json(
            MessageType::Call,
            &CallRequest {
                project: ctx.project_id.to_string(),
                method: method.to_string(),
                args,
            },
        )?;
        self.exchange(&frame).map_err(|e| match e {
            Exchange::NotRunning => ModuleError::Unusable {
                module: self.name().to_string(),
                reason: "module process is not running".to_string(),
            },
            Exchange::Rejected(reason) => ModuleError::Call {
                module: self.name().to_string(),
                method: method.to_string(),
                reason,
            },
            Exchange::Broken(reason) => ModuleError::Ipc(reason),
        })
    }

    fn shutdown(&self) {
        let Some(mut process) = self.process.lock().take() else {
            return;
        };

        if let Err(e) = process.writer.send(&Frame::empty(MessageType::Shutdown)) {
            debug!(module = %self.name(), "Shutdown frame not delivered: {}", e);
        }
        drop(process.writer);

        let deadline = Instant::now() + EXIT_GRACE;
        loop {
            match process.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(module = %self.name(), "Module process exited: {}", status);
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                _ => break,
            }
        }

        warn!(module = %self.name(), "Module process did not exit in time; killing");
        let _ = process.child.kill();
        let _ = process.child.wait();
    }
}

impl Drop for ArtifactModule {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.get_mut().take() {
            let _ = process.child.kill();
            let _ = process.child.wait();
        }
    }
}

impl Exchange {
    fn reason(self) -> String {
        match self {
            Exchange::NotRunning => "module process is not running".to_string(),
            Exchange::Rejected(reason) | Exchange::Broken(reason) => reason,
        }
    }
}

/// Wait for the `Ready` frame on a helper thread so a silent process cannot
/// block initialization forever.
fn wait_for_ready(mut reader: Reader, timeout: Duration) -> Result<Reader, String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = reader.recv();
        let _ = tx.send((reader, result));
    });

    match rx.recv_timeout(timeout) {
        Ok((reader, Ok(Some(frame)))) if frame.msg_type == MessageType::Ready => Ok(reader),
        Ok((_, Ok(Some(frame)))) => Err(format!("expected Ready, got {:?}", frame.msg_type)),
        Ok((_, Ok(None))) => Err("module process closed before Ready".to_string()),
        Ok((_, Err(e))) => Err(format!("IPC error: {}", e)),
        Err(_) => Err(format!("timeout waiting for Ready after {:?}", timeout)),
    }
}

fn forward_log(module: &str, frame: &Frame) {
    let Ok(log) = frame.parse_json::<LogPayload>() else {
        return;
    };
    match log.level.as_str() {
        "trace" => tracing::trace!(target: "loom.module", module, "{}", log.message),
        "debug" => tracing::debug!(target: "loom.module", module, "{}", log.message),
        "warn" => tracing::warn!(target: "loom.module", module, "{}", log.message),
        "error" => tracing::error!(target: "loom.module", module, "{}", log.message),
        _ => tracing::info!(target: "loom.module", module, "{}", log.message),
    }
}
