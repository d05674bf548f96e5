//! Process seam for kubectl. `ProcessRunner` spawns the real binary; `ScriptedRunner` and
//! `FakeCluster` are in-memory runners for tests and offline demos.

use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value as Json;

/// Result of one process invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { stdout: stdout.into(), stderr: String::new(), success: true }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self { stdout: String::new(), stderr: stderr.into(), success: false }
    }
}

#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput>;
}

/// Spawns the program with `tokio::process`, stdin closed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait::async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        let out = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            success: out.status.success(),
        })
    }
}

#[derive(Debug, Default)]
struct CallLog(Mutex<Vec<Vec<String>>>);

impl CallLog {
    fn record(&self, args: &[String]) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(args.to_vec());
    }

    fn all(&self) -> Vec<Vec<String>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn count_prefix(&self, prefix: &[&str]) -> usize {
        self.all()
            .iter()
            .filter(|call| call.len() >= prefix.len() && call.iter().zip(prefix).all(|(a, b)| a == b))
            .count()
    }
}

type Responder = dyn Fn(&[String]) -> CommandOutput + Send + Sync;

/// Answers every invocation with a closure and records the arguments.
pub struct ScriptedRunner {
    responder: Box<Responder>,
    delay: Duration,
    log: CallLog,
}

impl ScriptedRunner {
    pub fn new(responder: impl Fn(&[String]) -> CommandOutput + Send + Sync + 'static) -> Self {
        Self { responder: Box::new(responder), delay: Duration::ZERO, log: CallLog::default() }
    }

    /// Simulated latency per invocation, so concurrent callers overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.log.all()
    }

    /// Number of recorded invocations whose leading args equal `prefix`.
    pub fn count_prefix(&self, prefix: &[&str]) -> usize {
        self.log.count_prefix(prefix)
    }
}

#[async_trait::async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, _program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        self.log.record(args);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok((self.responder)(args))
    }
}

/// In-memory cluster answering `get <type> [name] --output=json` from a mutable object set.
/// Any other verb succeeds with empty output.
#[derive(Debug, Default)]
pub struct FakeCluster {
    objects: Mutex<Vec<Json>>,
    log: CallLog,
}

impl FakeCluster {
    pub fn new(objects: Vec<Json>) -> Self {
        Self { objects: Mutex::new(objects), log: CallLog::default() }
    }

    /// Insert or replace an object, keyed by kind + name.
    pub fn upsert(&self, obj: Json) {
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        let key = object_key(&obj);
        match objects.iter().position(|o| object_key(o) == key) {
            Some(idx) => objects[idx] = obj,
            None => objects.push(obj),
        }
    }

    pub fn remove(&self, kind: &str, name: &str) {
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        objects.retain(|o| object_key(o) != (kind.to_string(), name.to_string()));
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.log.all()
    }

    pub fn count_prefix(&self, prefix: &[&str]) -> usize {
        self.log.count_prefix(prefix)
    }

    fn respond(&self, args: &[String]) -> CommandOutput {
        let positional: Vec<&str> = args.iter().map(String::as_str).filter(|a| !a.starts_with("--")).collect();
        match positional.as_slice() {
            ["get", type_name] => {
                let items: Vec<Json> = self.matching(type_name).collect();
                CommandOutput::ok(serde_json::json!({"apiVersion": "v1", "kind": "List", "items": items}).to_string())
            }
            ["get", type_name, name] => {
                match self.matching(type_name).find(|o| vigil_core::json::name(o) == Some(*name)) {
                    Some(obj) => CommandOutput::ok(obj.to_string()),
                    None => CommandOutput::failed(format!(
                        "Error from server (NotFound): {} \"{}\" not found",
                        type_name.to_lowercase(),
                        name
                    )),
                }
            }
            _ => CommandOutput::ok(""),
        }
    }

    fn matching<'a>(&self, type_name: &'a str) -> impl Iterator<Item = Json> + 'a {
        let kind = type_name.split('.').next().unwrap_or(type_name);
        let objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner).clone();
        objects
            .into_iter()
            .filter(move |o| o.get("kind").and_then(|k| k.as_str()) == Some(kind))
    }
}

fn object_key(obj: &Json) -> (String, String) {
    (
        obj.get("kind").and_then(|k| k.as_str()).unwrap_or("").to_string(),
        vigil_core::json::name(obj).unwrap_or("").to_string(),
    )
}

#[async_trait::async_trait]
impl CommandRunner for FakeCluster {
    async fn run(&self, _program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        self.log.record(args);
        Ok(self.respond(args))
    }
}
