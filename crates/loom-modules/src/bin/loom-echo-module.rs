//! Reference artifact module
//!
//! Speaks the module IPC protocol on stdin/stdout. Exposes `echo(value)`,
//! `greet(name)` and `stats.calls()`, the last one counting calls per
//! project. Setting `fail = true` in its init config makes init fail.

use std::collections::HashMap;
use std::io::{self, BufReader};

use anyhow::Result;
use serde_json::{Value, json};
use tracing::{debug, info};

use loom_modules::artifact::ipc::{
    CallRequest, ErrorPayload, FrameReader, FrameWriter, InitRequest, LogPayload, MessageType,
    ResultPayload, ScopeRequest,
};

struct EchoState {
    greeting: String,
    calls: HashMap<String, u64>,
}

fn main() -> Result<()> {
    // stdout carries frames, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut reader = FrameReader::new(BufReader::new(stdin.lock()));
    let mut writer = FrameWriter::new(stdout.lock());

    let mut state = EchoState {
        greeting: "Hello".to_string(),
        calls: HashMap::new(),
    };

    writer.send_json(MessageType::Ready, &json!({}))?;

    while let Some(frame) = reader.recv()? {
        match frame.msg_type {
            MessageType::Init => {
                let request: InitRequest = frame.parse_json()?;
                if request.config.get("fail").and_then(Value::as_bool) == Some(true) {
                    reply_error(&mut writer, "init refused by configuration")?;
                    continue;
                }
                if let Some(greeting) = request.config.get("greeting").and_then(Value::as_str) {
                    state.greeting = greeting.to_string();
                }
                writer.send_json(
                    MessageType::Log,
                    &LogPayload {
                        level: "info".to_string(),
                        message: format!("echo module initialized ({})", state.greeting),
                    },
                )?;
                reply(&mut writer, Value::Null)?;
            }
            MessageType::Bind => {
                let request: ScopeRequest = frame.parse_json()?;
                state.calls.entry(request.project).or_insert(0);
                reply(&mut writer, Value::Null)?;
            }
            MessageType::Unbind => {
                let request: ScopeRequest = frame.parse_json()?;
                state.calls.remove(&request.project);
                reply(&mut writer, Value::Null)?;
            }
            MessageType::Call => {
                let request: CallRequest = frame.parse_json()?;
                match handle_call(&mut state, request) {
                    Ok(value) => reply(&mut writer, value)?,
                    Err(message) => reply_error(&mut writer, &message)?,
                }
            }
            MessageType::Shutdown => {
                info!("echo module shutting down");
                break;
            }
            other => debug!("ignoring {:?} frame", other),
        }
    }

    Ok(())
}

fn handle_call(state: &mut EchoState, request: CallRequest) -> Result<Value, String> {
    let count = state.calls.entry(request.project).or_insert(0);
    *count += 1;

    match request.method.as_str() {
        "echo" => Ok(request.args.into_iter().next().unwrap_or(Value::Null)),
        "greet" => {
            let name = request
                .args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| "argument name must be a string".to_string())?;
            Ok(Value::String(format!("{}, {}", state.greeting, name)))
        }
        "stats.calls" => Ok(Value::from(*count)),
        other => Err(format!("no method {}", other)),
    }
}

fn reply<W: io::Write>(writer: &mut FrameWriter<W>, value: Value) -> Result<()> {
    writer.send_json(MessageType::Result, &ResultPayload { value })?;
    Ok(())
}

fn reply_error<W: io::Write>(writer: &mut FrameWriter<W>, message: &str) -> Result<()> {
    writer.send_json(
        MessageType::Error,
        &ErrorPayload {
            message: message.to_string(),
        },
    )?;
    Ok(())
}
