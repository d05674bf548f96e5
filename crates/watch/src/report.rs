//! Terminal buckets of one watch run and the aggregate verdict.

use std::time::Duration;

use serde::{Serialize, Serializer};
use tracing::{error, info, warn};
use vigil_core::duration::humanize;
use vigil_core::{exit, ResourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchResult {
    Success,
    Timeout,
    Failure,
}

impl WatchResult {
    pub fn exit_code(self) -> i32 {
        match self {
            WatchResult::Success => exit::SUCCESS,
            WatchResult::Timeout => exit::TIMEOUT,
            WatchResult::Failure => exit::FAILURE,
        }
    }
}

fn as_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceOutcome {
    pub id: ResourceId,
    pub status: String,
    /// Failure or timeout diagnostics; `None` for successes.
    pub detail: Option<String>,
    #[serde(rename = "elapsed_secs", serialize_with = "as_secs")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WatchReport {
    pub succeeded: Vec<ResourceOutcome>,
    pub failed: Vec<ResourceOutcome>,
    pub timed_out: Vec<ResourceOutcome>,
    #[serde(rename = "elapsed_secs", serialize_with = "as_secs")]
    pub elapsed: Duration,
}

impl WatchReport {
    /// Any failure outranks any timeout, which outranks success.
    pub fn result(&self) -> WatchResult {
        if !self.failed.is_empty() {
            WatchResult::Failure
        } else if !self.timed_out.is_empty() {
            WatchResult::Timeout
        } else {
            WatchResult::Success
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.result().exit_code()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.timed_out.len()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&serde_json::json!({
            "result": self.result(),
            "report": self,
        }))
    }

    pub fn log_summary(&self) {
        let names = |v: &[ResourceOutcome]| v.iter().map(|o| o.id.to_string()).collect::<Vec<_>>().join(", ");
        info!(
            result = ?self.result(),
            succeeded = self.succeeded.len(),
            failed = self.failed.len(),
            timed_out = self.timed_out.len(),
            elapsed = %humanize(self.elapsed),
            "watch finished"
        );
        if !self.succeeded.is_empty() {
            info!(resources = %names(&self.succeeded), "succeeded");
        }
        for o in &self.failed {
            error!(resource = %o.id, status = %o.status, detail = %o.detail.as_deref().unwrap_or(""), "failed");
        }
        for o in &self.timed_out {
            warn!(resource = %o.id, status = %o.status, detail = %o.detail.as_deref().unwrap_or(""), "timed out");
        }
    }

    /// Plain-text rendering for terminals.
    pub fn render(&self) -> String {
        let mut out = format!(
            "Result: {:?} after {} ({} succeeded, {} failed, {} timed out)\n",
            self.result(),
            humanize(self.elapsed),
            self.succeeded.len(),
            self.failed.len(),
            self.timed_out.len()
        );
        let sections = [("Succeeded", &self.succeeded), ("Failed", &self.failed), ("Timed out", &self.timed_out)];
        for (title, outcomes) in sections {
            if outcomes.is_empty() {
                continue;
            }
            out.push_str(&format!("\n{}:\n", title));
            for o in outcomes.iter() {
                out.push_str(&format!("  {} ({}) after {}\n", o.id, o.status, humanize(o.elapsed)));
                if let Some(detail) = &o.detail {
                    for line in detail.lines() {
                        out.push_str(&format!("      {}\n", line));
                    }
                }
            }
        }
        out
    }
}
