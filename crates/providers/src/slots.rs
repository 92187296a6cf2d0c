//! Weighted slot scheduler for the local inference backend.
//!
//! Concurrent local completions are gated by weight so the host neither
//! thrashes on CPU inference nor runs out of VRAM on GPU. Weight derives
//! from the target model's parameter count. The scheduler starts serial
//! (max weight 1) and upgrades itself after the first release by probing
//! the backend for loaded-model VRAM; an explicit `OLLAMA_MAX_PARALLEL`
//! pins the limit and skips the probe, and `OLLAMA_NUM_GPU=0` forces CPU.
//!
//! Waiters queue FIFO on one-shot channels. The head waiter is always
//! admitted when nothing is active, so a lone large model makes progress
//! even under a conservative limit.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use roost_config::OllamaConfig;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const GIB: u64 = 1024 * 1024 * 1024;

/// Slot weight for a model, from its parameter count.
pub fn weight_for_model(model: &str) -> u32 {
    match param_billions(model) {
        Some(b) if b >= 14.0 => 3,
        Some(b) if b >= 8.0 => 2,
        _ => 1,
    }
}

/// Parse a parameter-count marker like `70b`, `8B`, or `3.8b` out of a model
/// name. Takes the largest marker when several appear.
fn param_billions(model: &str) -> Option<f64> {
    let lower = model.to_lowercase();
    let bytes = lower.as_bytes();
    let mut best: Option<f64> = None;

    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
            i += 1;
        }
        let starts_word = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        let ends_marker = i < bytes.len()
            && bytes[i] == b'b'
            && (i + 1 >= bytes.len() || !bytes[i + 1].is_ascii_alphanumeric());
        if starts_word && ends_marker {
            if let Ok(v) = lower[start..i].parse::<f64>() {
                best = Some(best.map_or(v, |prev: f64| prev.max(v)));
            }
        }
    }
    best
}

/// Async probe returning total VRAM bytes in use by loaded models, or None
/// when the backend is unreachable.
pub type VramProbe = Arc<dyn Fn() -> BoxFuture<'static, Option<u64>> + Send + Sync>;

/// Startup knobs derived from the Ollama environment settings.
#[derive(Debug, Clone, Default)]
pub struct SlotConfig {
    /// Positive value pins max weight and skips the GPU probe.
    pub max_parallel_override: Option<u32>,
    /// `OLLAMA_NUM_GPU=0`: stay serial, never probe.
    pub force_cpu: bool,
}

impl SlotConfig {
    pub fn from_ollama(cfg: &OllamaConfig) -> Self {
        Self {
            max_parallel_override: cfg.max_parallel.filter(|&n| n > 0),
            force_cpu: cfg.num_gpu == Some(0),
        }
    }
}

/// Outcome of a slot acquisition attempt.
pub enum SlotAcquire {
    Acquired(SlotPermit),
    /// The caller's abort signal fired while queued.
    Aborted,
}

impl SlotAcquire {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeState {
    Pending,
    InFlight,
    Done,
}

struct Waiter {
    id: u64,
    weight: u32,
    tx: oneshot::Sender<()>,
}

struct SlotState {
    max_weight: u32,
    active_weight: u32,
    queue: VecDeque<Waiter>,
    probe_state: ProbeState,
    next_waiter_id: u64,
}

struct SlotsInner {
    state: Mutex<SlotState>,
    probe: Option<VramProbe>,
}

/// The process-wide local-model slot scheduler.
#[derive(Clone)]
pub struct LocalSlots {
    inner: Arc<SlotsInner>,
}

impl LocalSlots {
    /// Build a scheduler. `probe` is consulted once, on the first release,
    /// unless the config pins parallelism or forces CPU.
    pub fn new(config: SlotConfig, probe: Option<VramProbe>) -> Self {
        let (max_weight, probe_state) = if let Some(n) = config.max_parallel_override {
            info!(max_weight = n, "Local slot limit pinned by override");
            (n, ProbeState::Done)
        } else if config.force_cpu {
            info!("GPU disabled by override, local inference stays serial");
            (1, ProbeState::Done)
        } else {
            (1, ProbeState::Pending)
        };

        Self {
            inner: Arc::new(SlotsInner {
                state: Mutex::new(SlotState {
                    max_weight,
                    active_weight: 0,
                    queue: VecDeque::new(),
                    probe_state,
                    next_waiter_id: 0,
                }),
                probe,
            }),
        }
    }

    /// Acquire a slot for a completion against `model`.
    ///
    /// Blocks while the request does not fit. If `cancel` fires while
    /// queued, the waiter is removed and `Aborted` is returned without
    /// touching the active weight.
    pub async fn acquire(&self, model: &str, cancel: &CancellationToken) -> SlotAcquire {
        let weight = weight_for_model(model);

        let queued = {
            let mut st = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if st.active_weight > 0 && st.active_weight + weight > st.max_weight {
                let (tx, rx) = oneshot::channel();
                let id = st.next_waiter_id;
                st.next_waiter_id += 1;
                st.queue.push_back(Waiter { id, weight, tx });
                debug!(model, weight, queue_len = st.queue.len(), "Queued for local slot");
                Some((id, rx))
            } else {
                st.active_weight += weight;
                None
            }
        };

        let Some((id, mut rx)) = queued else {
            return SlotAcquire::Acquired(SlotPermit {
                inner: self.inner.clone(),
                weight,
            });
        };

        tokio::select! {
            biased;
            res = &mut rx => match res {
                Ok(()) => SlotAcquire::Acquired(SlotPermit {
                    inner: self.inner.clone(),
                    weight,
                }),
                // Scheduler dropped out from under us.
                Err(_) => SlotAcquire::Aborted,
            },
            _ = cancel.cancelled() => {
                let still_queued = {
                    let mut st = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
                    let before = st.queue.len();
                    st.queue.retain(|w| w.id != id);
                    st.queue.len() != before
                };
                if !still_queued {
                    // A release admitted us while the abort was firing; give
                    // the weight straight back.
                    if rx.try_recv().is_ok() {
                        drop(SlotPermit {
                            inner: self.inner.clone(),
                            weight,
                        });
                    }
                }
                debug!(model, weight, "Slot acquisition aborted by caller");
                SlotAcquire::Aborted
            }
        }
    }

    /// Currently admitted weight.
    pub fn active_weight(&self) -> u32 {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner()).active_weight
    }

    /// Current weight ceiling.
    pub fn max_weight(&self) -> u32 {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner()).max_weight
    }

    /// Number of queued waiters.
    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner()).queue.len()
    }
}

impl SlotsInner {
    fn release(inner: &Arc<Self>, weight: u32) {
        let start_probe = {
            let mut st = inner.state.lock().unwrap_or_else(|e| e.into_inner());
            st.active_weight = st.active_weight.saturating_sub(weight);
            Self::drain_locked(&mut st);

            if st.probe_state == ProbeState::Pending && inner.probe.is_some() {
                st.probe_state = ProbeState::InFlight;
                true
            } else {
                false
            }
        };

        if start_probe {
            let probe = inner.probe.clone().expect("probe checked above");
            let inner = inner.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        let vram = probe().await;
                        inner.apply_probe(vram);
                    });
                }
                // Released outside a runtime; retry on the next release.
                Err(_) => {
                    let mut st = inner.state.lock().unwrap_or_else(|e| e.into_inner());
                    st.probe_state = ProbeState::Pending;
                }
            }
        }
    }

    fn apply_probe(&self, vram: Option<u64>) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.probe_state = ProbeState::Done;

        let Some(bytes) = vram else {
            debug!("GPU probe failed or backend unreachable, staying serial");
            return;
        };
        if bytes == 0 {
            info!("No models resident in VRAM, assuming CPU inference");
            return;
        }

        let new_max = if bytes > 40 * GIB {
            8
        } else if bytes >= 10 * GIB {
            5
        } else {
            3
        };
        if new_max > st.max_weight {
            info!(
                vram_gib = bytes / GIB,
                max_weight = new_max,
                "GPU detected, raising local parallelism"
            );
            st.max_weight = new_max;
            Self::drain_locked(&mut st);
        }
    }

    /// Admit queued waiters in FIFO order until one does not fit. The head
    /// is always admitted when nothing is active.
    fn drain_locked(st: &mut SlotState) {
        while let Some(head) = st.queue.front() {
            let fits = st.active_weight == 0 || st.active_weight + head.weight <= st.max_weight;
            if !fits {
                break;
            }
            let waiter = st.queue.pop_front().expect("front checked above");
            st.active_weight += waiter.weight;
            if waiter.tx.send(()).is_err() {
                // Receiver gave up; its weight goes straight back.
                st.active_weight -= waiter.weight;
            }
        }
    }
}

/// An admitted slot. Dropping it releases the weight and wakes waiters.
pub struct SlotPermit {
    inner: Arc<SlotsInner>,
    weight: u32,
}

impl SlotPermit {
    pub fn weight(&self) -> u32 {
        self.weight
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        SlotsInner::release(&self.inner, self.weight);
    }
}

/// Probe over the Ollama process list: sums `size_vram` across loaded models.
pub fn ollama_vram_probe(host: String, timeout: std::time::Duration) -> VramProbe {
    Arc::new(move || {
        let host = host.clone();
        let fut: BoxFuture<'static, Option<u64>> = Box::pin(async move {
            let client = reqwest::Client::builder().timeout(timeout).build().ok()?;
            let url = format!("{host}/api/ps");
            let resp = match client.get(&url).send().await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Ollama process-list probe failed");
                    return None;
                }
            };
            let body: serde_json::Value = resp.json().await.ok()?;
            let total = body["models"]
                .as_array()
                .map(|models| {
                    models
                        .iter()
                        .filter_map(|m| m["size_vram"].as_u64())
                        .sum::<u64>()
                })
                .unwrap_or(0);
            Some(total)
        });
        fut
    })
}
