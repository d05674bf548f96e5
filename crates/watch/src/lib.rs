//! Vigil watch loop: repeatedly sync pending resources through one shared cache and move each
//! into a terminal bucket (failed, succeeded, timed out) until none are left.

#![forbid(unsafe_code)]

use std::time::Duration;

use metrics::counter;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use vigil_core::config::RuntimeDefaults;
use vigil_core::duration::humanize;
use vigil_resources::KubernetesResource;
use vigil_store::SyncMediator;

pub mod report;

pub use report::{ResourceOutcome, WatchReport, WatchResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    pub poll_delay: Duration,
    pub reminder_interval: Duration,
    /// Ceiling for the whole run, on top of each resource's own timeout.
    pub global_timeout: Option<Duration>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self::from_defaults(&RuntimeDefaults::default())
    }
}

impl WatchOptions {
    pub fn from_defaults(d: &RuntimeDefaults) -> Self {
        Self { poll_delay: d.poll_delay, reminder_interval: d.reminder_interval, global_timeout: None }
    }

    pub fn with_global_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.global_timeout = timeout;
        self
    }
}

type Resource = Box<dyn KubernetesResource>;

pub struct ResourceWatcher<'a> {
    cache: &'a SyncMediator,
    options: WatchOptions,
}

impl<'a> ResourceWatcher<'a> {
    pub fn new(cache: &'a SyncMediator, options: WatchOptions) -> Self {
        Self { cache, options }
    }

    /// Poll until every resource is terminal or the global ceiling is hit.
    pub async fn run(&self, resources: Vec<Resource>) -> WatchReport {
        let started = Instant::now();
        let mut last_reminder = started;
        let mut report = WatchReport::default();
        let mut pending = resources;
        info!(resources = pending.len(), global_timeout = ?self.options.global_timeout, "watching rollout");

        let mut iteration = 0u64;
        while !pending.is_empty() {
            iteration += 1;
            self.cache.clear();
            self.cache.sync_all(&mut pending).await;
            let elapsed = started.elapsed();
            debug!(iteration, pending = pending.len(), elapsed = %humanize(elapsed), "synced");

            pending = pending.into_iter().filter_map(|r| settle(r, elapsed, &mut report)).collect();
            if pending.is_empty() {
                break;
            }

            if let Some(ceiling) = self.options.global_timeout {
                if elapsed >= ceiling {
                    warn!(ceiling = %humanize(ceiling), pending = pending.len(), "global watch timeout reached");
                    for r in pending.drain(..) {
                        let detail = format!("Global watch timeout of {} reached.\n{}", humanize(ceiling), r.timeout_message());
                        record(&mut report.timed_out, &*r, Some(detail), elapsed, "timed_out");
                    }
                    break;
                }
            }

            let delay = match self.options.global_timeout {
                Some(ceiling) => self.options.poll_delay.min(ceiling.saturating_sub(started.elapsed())),
                None => self.options.poll_delay,
            };
            sleep(delay).await;

            if last_reminder.elapsed() >= self.options.reminder_interval {
                last_reminder = Instant::now();
                let names: Vec<String> = pending.iter().map(|r| format!("{} ({})", r.id(), r.status())).collect();
                info!(elapsed = %humanize(started.elapsed()), "still waiting for: {}", names.join(", "));
            }
        }

        report.elapsed = started.elapsed();
        report
    }
}

/// Judge one synced resource: failed, then succeeded, then timed out. `Some` keeps it pending.
fn settle(r: Resource, elapsed: Duration, report: &mut WatchReport) -> Option<Resource> {
    if !r.base().is_synced() {
        return Some(r);
    }
    if r.deploy_failed() {
        error!(resource = %r.id(), elapsed = %humanize(elapsed), "rollout failed");
        record(&mut report.failed, &*r, r.failure_message(), elapsed, "failed");
    } else if r.deploy_succeeded() {
        info!(resource = %r.id(), elapsed = %humanize(elapsed), "rollout succeeded");
        record(&mut report.succeeded, &*r, None, elapsed, "succeeded");
    } else if r.deploy_timed_out(elapsed) {
        warn!(resource = %r.id(), timeout = %humanize(r.base().timeout()), "rollout timed out");
        let detail = match r.failure_message() {
            Some(extra) => format!("{}\n{}", r.timeout_message(), extra),
            None => r.timeout_message(),
        };
        record(&mut report.timed_out, &*r, Some(detail), elapsed, "timed_out");
    } else {
        return Some(r);
    }
    None
}

fn record(bucket: &mut Vec<ResourceOutcome>, r: &dyn KubernetesResource, detail: Option<String>, elapsed: Duration, result: &'static str) {
    counter!("vigil_watch_outcome_total", 1, "result" => result, "kind" => r.id().kind.clone());
    bucket.push(ResourceOutcome { id: r.id().clone(), status: r.status(), detail, elapsed });
}
