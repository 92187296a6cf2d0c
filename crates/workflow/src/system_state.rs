//! System state detection.
//!
//! Four signals are probed concurrently: CI status of the main branch,
//! server health, open P0 issues, and disk pressure on the working
//! partition. A failing probe is logged at debug and never affects its
//! peers. Results are cached for a TTL so schedulers evaluating many
//! actions in a burst share one probe round.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use roost_core::SharedClock;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Default result cache TTL.
pub const DEFAULT_TTL_MS: i64 = 60_000;

/// Disk usage percentage that counts as pressure.
const DISK_PRESSURE_PERCENT: u32 = 90;

/// The states a probe round can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    Healthy,
    CiBroken,
    ServerDegraded,
    P0Open,
    DiskPressure,
}

impl SystemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::CiBroken => "ci_broken",
            Self::ServerDegraded => "server_degraded",
            Self::P0Open => "p0_open",
            Self::DiskPressure => "disk_pressure",
        }
    }
}

/// One probe round's outcome.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStateResult {
    /// Active states; `[healthy]` when nothing fired.
    pub states: Vec<SystemState>,
    /// Per-state details keyed by state tag.
    pub details: serde_json::Map<String, Value>,
    /// When this result was evaluated (ms since epoch).
    pub evaluated_at_ms: i64,
    /// Whether this result came from the cache.
    pub cached: bool,
}

/// One signal source.
///
/// A probe returns `Ok(Some((state, details)))` when its condition is
/// active, `Ok(None)` when clear, and `Err` when it could not tell.
#[async_trait]
pub trait SignalProbe: Send + Sync {
    fn name(&self) -> &'static str;
    async fn probe(&self) -> Result<Option<(SystemState, Value)>, String>;
}

/// Fans probes out concurrently and caches the combined result.
pub struct SystemStateDetector {
    probes: Vec<Arc<dyn SignalProbe>>,
    clock: SharedClock,
    ttl_ms: i64,
    cache: Mutex<Option<SystemStateResult>>,
}

impl SystemStateDetector {
    pub fn new(probes: Vec<Arc<dyn SignalProbe>>, clock: SharedClock) -> Self {
        Self {
            probes,
            clock,
            ttl_ms: DEFAULT_TTL_MS,
            cache: Mutex::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    /// Evaluate all probes, or return the cached result while it is fresh.
    pub async fn detect(&self) -> SystemStateResult {
        let now = self.clock.now_ms();

        if let Some(cached) = self.cache.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            if now - cached.evaluated_at_ms < self.ttl_ms {
                let mut hit = cached;
                hit.cached = true;
                return hit;
            }
        }

        let outcomes =
            futures::future::join_all(self.probes.iter().map(|p| async move {
                (p.name(), p.probe().await)
            }))
            .await;

        let mut states = Vec::new();
        let mut details = serde_json::Map::new();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(Some((state, detail))) => {
                    states.push(state);
                    details.insert(state.as_str().to_string(), detail);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(probe = name, error = %e, "State probe failed");
                }
            }
        }
        if states.is_empty() {
            states.push(SystemState::Healthy);
        }

        let result = SystemStateResult {
            states,
            details,
            evaluated_at_ms: now,
            cached: false,
        };
        *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = Some(result.clone());
        result
    }

    /// Drop the cached result; the next `detect` probes afresh.
    pub fn invalidate_cache(&self) {
        *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

// ── Built-in probes ─────────────────────────────────────────────────────

/// CI status of the main branch HEAD, via the `gh` CLI.
pub struct CiStatusProbe {
    pub branch: String,
}

#[async_trait]
impl SignalProbe for CiStatusProbe {
    fn name(&self) -> &'static str {
        "ci-status"
    }

    async fn probe(&self) -> Result<Option<(SystemState, Value)>, String> {
        let output = tokio::process::Command::new("gh")
            .args([
                "run",
                "list",
                "--branch",
                &self.branch,
                "--limit",
                "1",
                "--json",
                "conclusion,headSha",
            ])
            .output()
            .await
            .map_err(|e| format!("gh run list: {e}"))?;
        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).to_string());
        }
        Ok(parse_ci_runs(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn parse_ci_runs(stdout: &str) -> Option<(SystemState, Value)> {
    let runs: Vec<Value> = serde_json::from_str(stdout).ok()?;
    let run = runs.first()?;
    let conclusion = run["conclusion"].as_str().unwrap_or("");
    if conclusion == "failure" {
        Some((
            SystemState::CiBroken,
            serde_json::json!({ "head_sha": run["headSha"], "conclusion": conclusion }),
        ))
    } else {
        None
    }
}

/// Open issues labeled as P0, via the `gh` CLI.
pub struct P0IssueProbe;

const P0_LABELS: [&str; 3] = ["priority:p0", "critical", "P0"];

#[async_trait]
impl SignalProbe for P0IssueProbe {
    fn name(&self) -> &'static str {
        "p0-issues"
    }

    async fn probe(&self) -> Result<Option<(SystemState, Value)>, String> {
        let output = tokio::process::Command::new("gh")
            .args(["issue", "list", "--state", "open", "--json", "number,labels"])
            .output()
            .await
            .map_err(|e| format!("gh issue list: {e}"))?;
        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).to_string());
        }
        Ok(parse_p0_issues(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn parse_p0_issues(stdout: &str) -> Option<(SystemState, Value)> {
    let issues: Vec<Value> = serde_json::from_str(stdout).ok()?;
    let p0_numbers: Vec<i64> = issues
        .iter()
        .filter(|issue| {
            issue["labels"].as_array().is_some_and(|labels| {
                labels.iter().any(|l| {
                    l["name"]
                        .as_str()
                        .is_some_and(|name| P0_LABELS.contains(&name))
                })
            })
        })
        .filter_map(|issue| issue["number"].as_i64())
        .collect();

    if p0_numbers.is_empty() {
        None
    } else {
        Some((
            SystemState::P0Open,
            serde_json::json!({ "issues": p0_numbers }),
        ))
    }
}

/// Server health over HTTP.
pub struct ServerHealthProbe {
    pub url: String,
    client: reqwest::Client,
}

impl ServerHealthProbe {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl SignalProbe for ServerHealthProbe {
    fn name(&self) -> &'static str {
        "server-health"
    }

    async fn probe(&self) -> Result<Option<(SystemState, Value)>, String> {
        match self.client.get(&self.url).send().await {
            Ok(resp) if resp.status().is_success() => Ok(None),
            Ok(resp) => Ok(Some((
                SystemState::ServerDegraded,
                serde_json::json!({ "status": resp.status().as_u16() }),
            ))),
            Err(e) => Ok(Some((
                SystemState::ServerDegraded,
                serde_json::json!({ "error": e.to_string() }),
            ))),
        }
    }
}

/// Disk usage of the working directory's partition, via `df -P`.
pub struct DiskPressureProbe;

#[async_trait]
impl SignalProbe for DiskPressureProbe {
    fn name(&self) -> &'static str {
        "disk-pressure"
    }

    async fn probe(&self) -> Result<Option<(SystemState, Value)>, String> {
        let output = tokio::process::Command::new("df")
            .args(["-P", "."])
            .output()
            .await
            .map_err(|e| format!("df: {e}"))?;
        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).to_string());
        }
        Ok(parse_df_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn parse_df_output(stdout: &str) -> Option<(SystemState, Value)> {
    // POSIX df: header line, then one line whose fifth column is "NN%".
    let line = stdout.lines().nth(1)?;
    let used_percent: u32 = line
        .split_whitespace()
        .nth(4)?
        .trim_end_matches('%')
        .parse()
        .ok()?;

    if used_percent >= DISK_PRESSURE_PERCENT {
        Some((
            SystemState::DiskPressure,
            serde_json::json!({ "used_percent": used_percent }),
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roost_core::ManualClock;

    struct FixedProbe {
        name: &'static str,
        result: Result<Option<(SystemState, Value)>, String>,
    }

    #[async_trait]
    impl SignalProbe for FixedProbe {
        fn name(&self) -> &'static str {
            self.name
        }
        async fn probe(&self) -> Result<Option<(SystemState, Value)>, String> {
            self.result.clone()
        }
    }

    fn fires(state: SystemState) -> Arc<dyn SignalProbe> {
        Arc::new(FixedProbe {
            name: "fires",
            result: Ok(Some((state, serde_json::json!({"from": "test"})))),
        })
    }

    fn clear() -> Arc<dyn SignalProbe> {
        Arc::new(FixedProbe {
            name: "clear",
            result: Ok(None),
        })
    }

    fn failing() -> Arc<dyn SignalProbe> {
        Arc::new(FixedProbe {
            name: "failing",
            result: Err("probe exploded".into()),
        })
    }

    fn detector(probes: Vec<Arc<dyn SignalProbe>>) -> (SystemStateDetector, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        (
            SystemStateDetector::new(probes, Arc::new(clock.clone())),
            clock,
        )
    }

    #[tokio::test]
    async fn no_active_signal_means_healthy() {
        let (detector, _) = detector(vec![clear(), clear()]);
        let result = detector.detect().await;
        assert_eq!(result.states, vec![SystemState::Healthy]);
        assert!(!result.cached);
    }

    #[tokio::test]
    async fn active_states_and_details_are_collected() {
        let (detector, _) = detector(vec![
            fires(SystemState::CiBroken),
            clear(),
            fires(SystemState::DiskPressure),
        ]);
        let result = detector.detect().await;
        assert!(result.states.contains(&SystemState::CiBroken));
        assert!(result.states.contains(&SystemState::DiskPressure));
        assert!(!result.states.contains(&SystemState::Healthy));
        assert!(result.details.contains_key("ci_broken"));
        assert!(result.details.contains_key("disk_pressure"));
    }

    #[tokio::test]
    async fn probe_failure_does_not_affect_peers() {
        let (detector, _) = detector(vec![failing(), fires(SystemState::P0Open)]);
        let result = detector.detect().await;
        assert_eq!(result.states, vec![SystemState::P0Open]);
    }

    #[tokio::test]
    async fn results_are_cached_until_ttl() {
        let (detector, clock) = detector(vec![fires(SystemState::CiBroken)]);

        let first = detector.detect().await;
        assert!(!first.cached);

        clock.advance(30_000);
        let second = detector.detect().await;
        assert!(second.cached);
        assert_eq!(second.evaluated_at_ms, first.evaluated_at_ms);

        clock.advance(31_000);
        let third = detector.detect().await;
        assert!(!third.cached);
    }

    #[tokio::test]
    async fn invalidate_drops_the_cache() {
        let (detector, _) = detector(vec![clear()]);
        let first = detector.detect().await;
        detector.invalidate_cache();
        let second = detector.detect().await;
        assert!(!second.cached);
        assert_eq!(first.states, second.states);
    }

    #[test]
    fn df_parsing() {
        let output = "Filesystem 1024-blocks Used Available Capacity Mounted on\n\
                      /dev/sda1 100000 95000 5000 95% /\n";
        let (state, detail) = parse_df_output(output).unwrap();
        assert_eq!(state, SystemState::DiskPressure);
        assert_eq!(detail["used_percent"], 95);

        let calm = "Filesystem 1024-blocks Used Available Capacity Mounted on\n\
                    /dev/sda1 100000 40000 60000 40% /\n";
        assert!(parse_df_output(calm).is_none());
    }

    #[test]
    fn ci_run_parsing() {
        let broken = r#"[{"conclusion": "failure", "headSha": "abc123"}]"#;
        let (state, detail) = parse_ci_runs(broken).unwrap();
        assert_eq!(state, SystemState::CiBroken);
        assert_eq!(detail["head_sha"], "abc123");

        assert!(parse_ci_runs(r#"[{"conclusion": "success", "headSha": "abc"}]"#).is_none());
        assert!(parse_ci_runs("[]").is_none());
        assert!(parse_ci_runs("not json").is_none());
    }

    #[test]
    fn p0_issue_parsing() {
        let with_p0 = r#"[
            {"number": 7, "labels": [{"name": "bug"}, {"name": "priority:p0"}]},
            {"number": 8, "labels": [{"name": "enhancement"}]},
            {"number": 9, "labels": [{"name": "P0"}]}
        ]"#;
        let (state, detail) = parse_p0_issues(with_p0).unwrap();
        assert_eq!(state, SystemState::P0Open);
        assert_eq!(detail["issues"], serde_json::json!([7, 9]));

        let without = r#"[{"number": 8, "labels": [{"name": "bug"}]}]"#;
        assert!(parse_p0_issues(without).is_none());
    }
}
