//! Vigil command executor: single kubectl invocations with context flags, bounded retry and
//! jittered backoff, not-found detection and failure metrics.

#![forbid(unsafe_code)]

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use metrics::{counter, histogram};
use regex::Regex;
use tracing::{debug, warn};

pub mod backoff;
pub mod context;
pub mod runner;

pub use backoff::BackoffPolicy;
pub use context::{resolve_target, ClusterTarget};
pub use runner::{CommandOutput, CommandRunner, FakeCluster, ProcessRunner, ScriptedRunner};

pub const KUBECTL: &str = "kubectl";
pub const DEFAULT_REQUEST_TIMEOUT: &str = "30s";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KubectlError {
    #[error("resource not found: {0}")]
    NotFound(String),
}

fn not_found_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"NotFound|the server could not find the requested resource").expect("not-found pattern compiles")
    })
}

fn deadline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"context deadline exceeded|Client\.Timeout exceeded while awaiting headers")
            .expect("deadline pattern compiles")
    })
}

pub fn is_not_found(stderr: &str) -> bool {
    not_found_re().is_match(stderr)
}

pub fn is_deadline_exceeded(stderr: &str) -> bool {
    deadline_re().is_match(stderr)
}

/// Per-call options. `Default` targets the configured namespace and context, one attempt.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Overrides the executor's default failure logging.
    pub log_failure: Option<bool>,
    pub use_namespace: bool,
    pub use_context: bool,
    pub output: Option<String>,
    pub raise_if_not_found: bool,
    pub attempts: u32,
    /// Never echo stdout/stderr (e.g. Secrets), even on failure.
    pub output_is_sensitive: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            log_failure: None,
            use_namespace: true,
            use_context: true,
            output: None,
            raise_if_not_found: false,
            attempts: 1,
            output_is_sensitive: false,
        }
    }
}

impl RunOptions {
    pub fn json() -> Self {
        Self { output: Some("json".to_string()), ..Self::default() }
    }

    pub fn attempts(mut self, n: u32) -> Self {
        self.attempts = n;
        self
    }

    pub fn raise_if_not_found(mut self, on: bool) -> Self {
        self.raise_if_not_found = on;
        self
    }

    pub fn log_failure(mut self, on: bool) -> Self {
        self.log_failure = Some(on);
        self
    }

    pub fn use_namespace(mut self, on: bool) -> Self {
        self.use_namespace = on;
        self
    }

    pub fn sensitive(mut self, on: bool) -> Self {
        self.output_is_sensitive = on;
        self
    }
}

/// kubectl bound to one namespace and context.
#[derive(Clone)]
pub struct Kubectl {
    runner: Arc<dyn CommandRunner>,
    namespace: String,
    context: String,
    request_timeout: String,
    log_failure_by_default: bool,
    backoff: BackoffPolicy,
}

impl std::fmt::Debug for Kubectl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kubectl")
            .field("namespace", &self.namespace)
            .field("context", &self.context)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Kubectl {
    pub fn new(runner: Arc<dyn CommandRunner>, namespace: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            runner,
            namespace: namespace.into(),
            context: context.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT.to_string(),
            log_failure_by_default: true,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.request_timeout = timeout.into();
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_default_log_failure(mut self, on: bool) -> Self {
        self.log_failure_by_default = on;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Full argument vector (without the program name) for `args` under `opts`.
    pub fn build_args(&self, args: &[&str], opts: &RunOptions) -> Vec<String> {
        let mut cmd: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        if opts.use_namespace {
            cmd.push(format!("--namespace={}", self.namespace));
        }
        if let Some(output) = &opts.output {
            cmd.push(format!("--output={}", output));
        }
        if opts.use_context {
            cmd.push(format!("--context={}", self.context));
        }
        cmd.push(format!("--request-timeout={}", self.request_timeout));
        cmd
    }

    /// Run kubectl with retry. Unsuccessful commands come back as `Ok` with `success == false`;
    /// only a requested not-found is an `Err`. A deadline-exceeded failure earns one extra attempt.
    pub async fn run(&self, args: &[&str], opts: RunOptions) -> Result<CommandOutput, KubectlError> {
        let cmd = self.build_args(args, &opts);
        let verb = args.first().copied().unwrap_or("").to_string();
        let log_failure = opts.log_failure.unwrap_or(self.log_failure_by_default);
        let mut budget = opts.attempts.max(1);
        let mut deadline_retry_granted = false;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let started = Instant::now();
            debug!(cmd = %render(&cmd), attempt, "running kubectl");
            let out = match self.runner.run(KUBECTL, &cmd).await {
                Ok(o) => o,
                Err(e) => CommandOutput::failed(format!("failed to spawn {}: {}", KUBECTL, e)),
            };
            if out.success {
                return Ok(out);
            }

            counter!("vigil_kubectl_errors_total", 1, "verb" => verb.clone());
            histogram!("vigil_kubectl_latency_ms", started.elapsed().as_secs_f64() * 1000.0, "verb" => verb.clone());

            if opts.raise_if_not_found && is_not_found(&out.stderr) {
                return Err(KubectlError::NotFound(args.get(1..).unwrap_or_default().join(" ")));
            }
            if !deadline_retry_granted && is_deadline_exceeded(&out.stderr) {
                deadline_retry_granted = true;
                budget += 1;
            }
            if log_failure {
                if opts.output_is_sensitive {
                    warn!(cmd = %render(&cmd), attempt, attempts = budget, "kubectl command failed (output suppressed)");
                } else {
                    warn!(cmd = %render(&cmd), attempt, attempts = budget, stderr = %out.stderr.trim(), "kubectl command failed");
                }
            }
            if attempt >= budget {
                return Ok(out);
            }
            tokio::time::sleep(self.backoff.delay(attempt)).await;
        }
    }
}

fn render(cmd: &[String]) -> String {
    format!("{} {}", KUBECTL, cmd.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kubectl(runner: Arc<dyn CommandRunner>) -> Kubectl {
        Kubectl::new(runner, "web", "prod").with_backoff(BackoffPolicy::none())
    }

    #[test]
    fn flags_follow_options() {
        let k = kubectl(Arc::new(ProcessRunner));
        let args = k.build_args(&["get", "Pod"], &RunOptions::json());
        assert_eq!(
            args,
            vec!["get", "Pod", "--namespace=web", "--output=json", "--context=prod", "--request-timeout=30s"]
        );
        let global = k.build_args(&["get", "ClusterRole"], &RunOptions::default().use_namespace(false));
        assert!(!global.iter().any(|a| a.starts_with("--namespace")));
    }

    #[test]
    fn error_patterns() {
        assert!(is_not_found("Error from server (NotFound): pods \"x\" not found"));
        assert!(is_not_found("error: the server could not find the requested resource"));
        assert!(is_deadline_exceeded("Unable to connect: context deadline exceeded"));
        assert!(!is_deadline_exceeded("connection refused"));
    }

    #[tokio::test]
    async fn success_returns_first_attempt() {
        let runner = Arc::new(ScriptedRunner::new(|_| CommandOutput::ok("{}")));
        let out = kubectl(runner.clone()).run(&["get", "Pod"], RunOptions::json().attempts(3)).await.unwrap();
        assert!(out.success);
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn retries_up_to_attempts() {
        let runner = Arc::new(ScriptedRunner::new(|_| CommandOutput::failed("connection refused")));
        let out = kubectl(runner.clone()).run(&["get", "Pod"], RunOptions::json().attempts(3)).await.unwrap();
        assert!(!out.success);
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test]
    async fn deadline_exceeded_gets_one_extra_attempt() {
        let runner = Arc::new(ScriptedRunner::new(|_| CommandOutput::failed("context deadline exceeded")));
        let out = kubectl(runner.clone()).run(&["get", "Pod"], RunOptions::json()).await.unwrap();
        assert!(!out.success);
        assert_eq!(runner.calls().len(), 2);

        let runner = Arc::new(ScriptedRunner::new(|_| CommandOutput::failed("context deadline exceeded")));
        kubectl(runner.clone()).run(&["get", "Pod"], RunOptions::json().attempts(3)).await.unwrap();
        assert_eq!(runner.calls().len(), 4);
    }

    #[tokio::test]
    async fn not_found_raises_only_when_asked() {
        let runner = Arc::new(ScriptedRunner::new(|_| {
            CommandOutput::failed("Error from server (NotFound): configmaps \"x\" not found")
        }));
        let k = kubectl(runner.clone());
        let err = k
            .run(&["get", "ConfigMap", "x"], RunOptions::json().raise_if_not_found(true).attempts(4))
            .await
            .unwrap_err();
        assert_eq!(err, KubectlError::NotFound("ConfigMap x".to_string()));
        assert_eq!(runner.calls().len(), 1);

        let out = k.run(&["get", "ConfigMap", "x"], RunOptions::json()).await.unwrap();
        assert!(!out.success);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let seen = std::sync::atomic::AtomicUsize::new(0);
        let runner = Arc::new(ScriptedRunner::new(move |_| {
            if seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                CommandOutput::failed("i/o timeout")
            } else {
                CommandOutput::ok("done")
            }
        }));
        let out = kubectl(runner.clone()).run(&["apply", "-f", "x.yaml"], RunOptions::default().attempts(2)).await.unwrap();
        assert_eq!(out.stdout, "done");
        assert_eq!(runner.calls().len(), 2);
    }

    struct BrokenRunner;

    #[async_trait::async_trait]
    impl CommandRunner for BrokenRunner {
        async fn run(&self, _program: &str, _args: &[String]) -> std::io::Result<CommandOutput> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"))
        }
    }

    #[tokio::test]
    async fn spawn_failure_is_an_unsuccessful_output() {
        let out = kubectl(Arc::new(BrokenRunner)).run(&["version"], RunOptions::default()).await.unwrap();
        assert!(!out.success);
        assert!(out.stderr.contains("failed to spawn kubectl"));
    }
}
