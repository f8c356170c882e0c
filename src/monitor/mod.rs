//! Resource monitor advising the worker pool.
//!
//! Samples memory and CPU pressure on a fixed interval and publishes a
//! target worker count over a watch channel. The pool treats the target as
//! advisory: it parks or unparks workers between items, never mid-item.

use std::time::Duration;

use serde::Deserialize;
use sysinfo::System;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub mem_high_water: f64,
    pub mem_low_water: f64,
    pub cpu_high_water: f64,
    pub cpu_low_water: f64,
    /// Consecutive calm samples required before raising the target.
    pub sustain_samples: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            mem_high_water: 0.85,
            mem_low_water: 0.70,
            cpu_high_water: 0.90,
            cpu_low_water: 0.60,
            sustain_samples: 3,
        }
    }
}

/// One observation of system pressure, both values normalized to 0.0..=1.0+.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureSample {
    pub mem_fraction: f64,
    pub cpu_fraction: f64,
}

impl PressureSample {
    fn is_high(&self, config: &MonitorConfig) -> bool {
        self.mem_fraction > config.mem_high_water || self.cpu_fraction > config.cpu_high_water
    }

    fn is_low(&self, config: &MonitorConfig) -> bool {
        self.mem_fraction < config.mem_low_water && self.cpu_fraction < config.cpu_low_water
    }
}

/// Publishes target worker counts derived from system pressure.
pub struct ResourceMonitor {
    rx: watch::Receiver<usize>,
}

impl ResourceMonitor {
    /// Start the sampling task. The target begins at `max_workers` and moves
    /// one step per decision, staying within 1..=max_workers.
    pub fn start(
        config: MonitorConfig,
        max_workers: usize,
        cancellation_token: CancellationToken,
    ) -> Self {
        let (tx, rx) = watch::channel(max_workers);

        info!(
            max_workers,
            poll_secs = config.poll_interval_secs,
            "resource monitor started"
        );

        tokio::spawn(async move {
            let poll_interval = Duration::from_secs(config.poll_interval_secs);
            let mut system = System::new();
            let cores = system.physical_core_count().unwrap_or(4);
            let mut target = max_workers;
            let mut calm_streak = 0u32;

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        debug!("resource monitor shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(poll_interval) => {
                        let sample = read_pressure(&mut system, cores);
                        let next = step_target(&config, target, max_workers, sample, &mut calm_streak);
                        if next != target {
                            info!(
                                from = target,
                                to = next,
                                mem = format!("{:.2}", sample.mem_fraction),
                                cpu = format!("{:.2}", sample.cpu_fraction),
                                "adjusting worker target"
                            );
                            target = next;
                            let _ = tx.send(target);
                        }
                    }
                }
            }
        });

        Self { rx }
    }

    pub fn current_target(&self) -> usize {
        *self.rx.borrow()
    }

    /// Receiver for the worker pool to observe target changes.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.rx.clone()
    }
}

fn read_pressure(system: &mut System, cores: usize) -> PressureSample {
    system.refresh_memory();
    let total = system.total_memory().max(1);
    let mem_fraction = system.used_memory() as f64 / total as f64;

    let load = System::load_average();
    let cpu_fraction = load.one / cores.max(1) as f64;

    PressureSample {
        mem_fraction,
        cpu_fraction,
    }
}

/// Decide the next worker target from one pressure sample.
///
/// High pressure drops the target immediately; raising it again requires
/// `sustain_samples` consecutive calm observations so the target does not
/// oscillate around the thresholds.
fn step_target(
    config: &MonitorConfig,
    current: usize,
    max_workers: usize,
    sample: PressureSample,
    calm_streak: &mut u32,
) -> usize {
    if sample.is_high(config) {
        *calm_streak = 0;
        return current.saturating_sub(1).max(1);
    }

    if sample.is_low(config) {
        *calm_streak += 1;
        if *calm_streak >= config.sustain_samples {
            *calm_streak = 0;
            return (current + 1).min(max_workers);
        }
    } else {
        *calm_streak = 0;
    }

    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(mem: f64, cpu: f64) -> PressureSample {
        PressureSample {
            mem_fraction: mem,
            cpu_fraction: cpu,
        }
    }

    #[test]
    fn test_high_pressure_steps_down_immediately() {
        let config = MonitorConfig::default();
        let mut streak = 2;
        assert_eq!(step_target(&config, 4, 4, sample(0.90, 0.10), &mut streak), 3);
        assert_eq!(streak, 0);
        assert_eq!(step_target(&config, 3, 4, sample(0.10, 0.95), &mut streak), 2);
    }

    #[test]
    fn test_target_never_drops_below_one() {
        let config = MonitorConfig::default();
        let mut streak = 0;
        assert_eq!(step_target(&config, 1, 4, sample(0.99, 0.99), &mut streak), 1);
    }

    #[test]
    fn test_step_up_requires_sustained_calm() {
        let config = MonitorConfig::default();
        let mut streak = 0;
        let calm = sample(0.30, 0.20);
        assert_eq!(step_target(&config, 2, 4, calm, &mut streak), 2);
        assert_eq!(step_target(&config, 2, 4, calm, &mut streak), 2);
        assert_eq!(step_target(&config, 2, 4, calm, &mut streak), 3);
    }

    #[test]
    fn test_middling_sample_resets_calm_streak() {
        let config = MonitorConfig::default();
        let mut streak = 0;
        let calm = sample(0.30, 0.20);
        let middling = sample(0.75, 0.20);
        step_target(&config, 2, 4, calm, &mut streak);
        step_target(&config, 2, 4, calm, &mut streak);
        assert_eq!(step_target(&config, 2, 4, middling, &mut streak), 2);
        assert_eq!(streak, 0);
    }

    #[test]
    fn test_target_capped_at_max_workers() {
        let config = MonitorConfig {
            sustain_samples: 1,
            ..MonitorConfig::default()
        };
        let mut streak = 0;
        assert_eq!(step_target(&config, 4, 4, sample(0.30, 0.20), &mut streak), 4);
    }
}
