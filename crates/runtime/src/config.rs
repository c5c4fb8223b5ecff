// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Board runtime configuration. Every field has a `--flag` and a `VENTO_*`
/// environment variable fallback, in the shape of `crates/cli/src/config.rs`
/// in the teacher repo.
#[derive(Debug, Parser, Clone)]
#[command(name = "vento-runtime", version, about)]
pub struct RuntimeConfig {
    /// Root directory holding `data/boards/<boardId>/...`.
    #[arg(long, env = "VENTO_DATA_DIR", default_value = "data/boards")]
    pub boards_dir: PathBuf,

    /// Ephemeral context time-to-live, in seconds (spec.md §3 default 1h).
    #[arg(long, env = "VENTO_CONTEXT_TTL_SECS", default_value = "3600")]
    pub context_ttl_secs: u64,

    /// Interval, in seconds, between ephemeral-context sweeps (spec.md §4.2 default 60s).
    #[arg(long, env = "VENTO_CONTEXT_SWEEP_SECS", default_value = "60")]
    pub context_sweep_secs: u64,

    /// Default history retention, in days, for cards with `keepHistory=true`.
    #[arg(long, env = "VENTO_HISTORY_RETENTION_DAYS", default_value = "30")]
    pub history_retention_days: u32,

    /// Interval, in seconds, between history-retention sweeps.
    #[arg(long, env = "VENTO_HISTORY_SWEEP_SECS", default_value = "3600")]
    pub history_sweep_secs: u64,

    /// Grace period after SIGTERM before SIGKILL when stopping an autopilot child.
    #[arg(long, env = "VENTO_AUTOPILOT_STOP_GRACE_MS", default_value = "500")]
    pub autopilot_stop_grace_ms: u64,

    /// Debounce window for autopilot source file-change bursts.
    #[arg(long, env = "VENTO_AUTOPILOT_DEBOUNCE_MS", default_value = "1000")]
    pub autopilot_debounce_ms: u64,

    /// Liveness poll interval for the autopilot supervisor's health check.
    #[arg(long, env = "VENTO_AUTOPILOT_POLL_SECS", default_value = "5")]
    pub autopilot_poll_secs: u64,

    /// Timeout applied to each pre/post link invocation (spec.md §9 recommends ≤30s).
    #[arg(long, env = "VENTO_LINK_TIMEOUT_SECS", default_value = "30")]
    pub link_timeout_secs: u64,

    /// Log format: json or text.
    #[arg(long, env = "VENTO_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "VENTO_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl RuntimeConfig {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.context_ttl_secs == 0 {
            anyhow::bail!("--context-ttl-secs must be greater than 0");
        }
        if self.context_sweep_secs == 0 {
            anyhow::bail!("--context-sweep-secs must be greater than 0");
        }
        if self.history_sweep_secs == 0 {
            anyhow::bail!("--history-sweep-secs must be greater than 0");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("unknown --log-format {other:?}, expected json or text"),
        }
        Ok(())
    }

    pub fn context_ttl(&self) -> Duration {
        Duration::from_secs(self.context_ttl_secs)
    }

    pub fn context_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.context_sweep_secs)
    }

    pub fn autopilot_stop_grace(&self) -> Duration {
        Duration::from_millis(self.autopilot_stop_grace_ms)
    }

    pub fn autopilot_debounce(&self) -> Duration {
        Duration::from_millis(self.autopilot_debounce_ms)
    }

    pub fn autopilot_poll_interval(&self) -> Duration {
        Duration::from_secs(self.autopilot_poll_secs)
    }

    pub fn link_timeout(&self) -> Duration {
        Duration::from_secs(self.link_timeout_secs)
    }

    pub fn history_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.history_sweep_secs)
    }
}

/// Initialize the global `tracing` subscriber per `log_format`/`log_level`,
/// mirroring the teacher's log bootstrap in `crates/cli/src/run.rs`.
pub fn init_tracing(config: &RuntimeConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if config.log_format == "json" {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
