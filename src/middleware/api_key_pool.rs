// Gemini API key rotation with per-key health tracking

use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const UNHEALTHY_AFTER: u32 = 3;
const DEGRADED_WINDOW: Duration = Duration::from_secs(60);
const RECOVERY_PROBE_AFTER: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug)]
struct KeySlot {
    key: String,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    requests: u64,
    failures: u64,
}

impl KeySlot {
    fn health(&self) -> KeyHealth {
        if self.consecutive_failures >= UNHEALTHY_AFTER {
            KeyHealth::Unhealthy
        } else if self.consecutive_failures > 0
            && self
                .last_failure
                .is_some_and(|at| at.elapsed() < DEGRADED_WINDOW)
        {
            KeyHealth::Degraded
        } else {
            KeyHealth::Healthy
        }
    }

    fn may_probe(&self) -> bool {
        self.last_failure
            .map_or(true, |at| at.elapsed() > RECOVERY_PROBE_AFTER)
    }
}

/// A key handed out for one request; report the result with its index.
#[derive(Debug, Clone)]
pub struct KeyLease {
    pub index: usize,
    pub key: String,
}

/// Per-key statistics exposed on /stats
#[derive(Debug, Clone, Serialize)]
pub struct KeyStats {
    pub index: usize,
    pub health: KeyHealth,
    pub requests: u64,
    pub failures: u64,
}

/// Round-robin pool preferring healthy keys, then degraded ones, then
/// unhealthy keys whose last failure is old enough to retry.
pub struct ApiKeyPool {
    slots: Mutex<Vec<KeySlot>>,
    cursor: Mutex<usize>,
}

impl ApiKeyPool {
    pub fn new(keys: Vec<String>) -> Self {
        let slots = keys
            .into_iter()
            .filter(|key| !key.trim().is_empty())
            .map(|key| KeySlot {
                key,
                consecutive_failures: 0,
                last_failure: None,
                requests: 0,
                failures: 0,
            })
            .collect();

        Self {
            slots: Mutex::new(slots),
            cursor: Mutex::new(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    pub fn total_keys(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn healthy_count(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|slot| slot.health() == KeyHealth::Healthy)
            .count()
    }

    /// Pick the next usable key, or None when every key is cooling down.
    pub fn acquire(&self) -> Option<KeyLease> {
        let slots = self.slots.lock();

        for wanted in [KeyHealth::Healthy, KeyHealth::Degraded, KeyHealth::Unhealthy] {
            let candidates: Vec<usize> = slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| {
                    slot.health() == wanted && (wanted != KeyHealth::Unhealthy || slot.may_probe())
                })
                .map(|(index, _)| index)
                .collect();

            if candidates.is_empty() {
                continue;
            }

            let mut cursor = self.cursor.lock();
            let index = candidates[*cursor % candidates.len()];
            *cursor = cursor.wrapping_add(1);

            match wanted {
                KeyHealth::Healthy => debug!("Using API key {} ({} healthy)", index, candidates.len()),
                KeyHealth::Degraded => warn!("No healthy API keys, using degraded key {}", index),
                KeyHealth::Unhealthy => warn!("All API keys unhealthy, probing key {}", index),
            }
            return Some(KeyLease {
                index,
                key: slots[index].key.clone(),
            });
        }

        warn!("No API keys available");
        None
    }

    pub fn record_success(&self, index: usize) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(index) {
            if slot.consecutive_failures >= UNHEALTHY_AFTER {
                info!("API key {} recovered", index);
            }
            slot.requests += 1;
            slot.consecutive_failures = 0;
            slot.last_failure = None;
        }
    }

    pub fn record_failure(&self, index: usize) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(index) {
            slot.requests += 1;
            slot.failures += 1;
            slot.consecutive_failures += 1;
            slot.last_failure = Some(Instant::now());
            if slot.consecutive_failures == UNHEALTHY_AFTER {
                warn!(
                    "API key {} marked unhealthy ({}/{} requests failed)",
                    index, slot.failures, slot.requests
                );
            }
        }
    }

    pub fn stats(&self) -> Vec<KeyStats> {
        self.slots
            .lock()
            .iter()
            .enumerate()
            .map(|(index, slot)| KeyStats {
                index,
                health: slot.health(),
                requests: slot.requests,
                failures: slot.failures,
            })
            .collect()
    }
}
