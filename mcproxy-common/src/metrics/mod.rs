use crate::error::Error;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

/// Names of one command family. `hits` is the success outcome (stored for
/// storage commands), `misses` the not-found or not-stored outcome.
#[derive(Debug, Clone, Copy)]
pub struct CommandCounters {
    pub total: &'static str,
    pub total_l1: &'static str,
    pub hits: &'static str,
    pub hits_l1: &'static str,
    pub misses: &'static str,
    pub misses_l1: &'static str,
    pub errors: &'static str,
    pub errors_l1: &'static str,
}

impl CommandCounters {
    fn names(&self) -> [&'static str; 8] {
        [
            self.total,
            self.total_l1,
            self.hits,
            self.hits_l1,
            self.misses,
            self.misses_l1,
            self.errors,
            self.errors_l1,
        ]
    }
}

pub const CMD_GET: &str = "cmd_get";
pub const CMD_GET_L1: &str = "cmd_get_l1";
/// Keys requested by gets, a batch counts once in `cmd_get`
pub const CMD_GET_KEYS: &str = "cmd_get_keys";
pub const CMD_GET_KEYS_L1: &str = "cmd_get_keys_l1";
pub const CMD_GET_HITS: &str = "cmd_get_hits";
pub const CMD_GET_HITS_L1: &str = "cmd_get_hits_l1";
pub const CMD_GET_MISSES: &str = "cmd_get_misses";
pub const CMD_GET_MISSES_L1: &str = "cmd_get_misses_l1";
pub const CMD_GET_ERRORS: &str = "cmd_get_errors";
pub const CMD_GET_ERRORS_L1: &str = "cmd_get_errors_l1";
/// Latency of a whole L1 get batch, seconds
pub const HIST_GET_L1: &str = "get_l1";

pub const SET: CommandCounters = CommandCounters {
    total: "cmd_set",
    total_l1: "cmd_set_l1",
    hits: "cmd_set_success",
    hits_l1: "cmd_set_success_l1",
    misses: "cmd_set_not_stored",
    misses_l1: "cmd_set_not_stored_l1",
    errors: "cmd_set_errors",
    errors_l1: "cmd_set_errors_l1",
};

pub const ADD: CommandCounters = CommandCounters {
    total: "cmd_add",
    total_l1: "cmd_add_l1",
    hits: "cmd_add_stored",
    hits_l1: "cmd_add_stored_l1",
    misses: "cmd_add_not_stored",
    misses_l1: "cmd_add_not_stored_l1",
    errors: "cmd_add_errors",
    errors_l1: "cmd_add_errors_l1",
};

pub const REPLACE: CommandCounters = CommandCounters {
    total: "cmd_replace",
    total_l1: "cmd_replace_l1",
    hits: "cmd_replace_stored",
    hits_l1: "cmd_replace_stored_l1",
    misses: "cmd_replace_not_stored",
    misses_l1: "cmd_replace_not_stored_l1",
    errors: "cmd_replace_errors",
    errors_l1: "cmd_replace_errors_l1",
};

pub const APPEND: CommandCounters = CommandCounters {
    total: "cmd_append",
    total_l1: "cmd_append_l1",
    hits: "cmd_append_stored",
    hits_l1: "cmd_append_stored_l1",
    misses: "cmd_append_not_stored",
    misses_l1: "cmd_append_not_stored_l1",
    errors: "cmd_append_errors",
    errors_l1: "cmd_append_errors_l1",
};

pub const PREPEND: CommandCounters = CommandCounters {
    total: "cmd_prepend",
    total_l1: "cmd_prepend_l1",
    hits: "cmd_prepend_stored",
    hits_l1: "cmd_prepend_stored_l1",
    misses: "cmd_prepend_not_stored",
    misses_l1: "cmd_prepend_not_stored_l1",
    errors: "cmd_prepend_errors",
    errors_l1: "cmd_prepend_errors_l1",
};

pub const DELETE: CommandCounters = CommandCounters {
    total: "cmd_delete",
    total_l1: "cmd_delete_l1",
    hits: "cmd_delete_hits",
    hits_l1: "cmd_delete_hits_l1",
    misses: "cmd_delete_misses",
    misses_l1: "cmd_delete_misses_l1",
    errors: "cmd_delete_errors",
    errors_l1: "cmd_delete_errors_l1",
};

pub const TOUCH: CommandCounters = CommandCounters {
    total: "cmd_touch",
    total_l1: "cmd_touch_l1",
    hits: "cmd_touch_hits",
    hits_l1: "cmd_touch_hits_l1",
    misses: "cmd_touch_misses",
    misses_l1: "cmd_touch_misses_l1",
    errors: "cmd_touch_errors",
    errors_l1: "cmd_touch_errors_l1",
};

pub const GAT: CommandCounters = CommandCounters {
    total: "cmd_gat",
    total_l1: "cmd_gat_l1",
    hits: "cmd_gat_hits",
    hits_l1: "cmd_gat_hits_l1",
    misses: "cmd_gat_misses",
    misses_l1: "cmd_gat_misses_l1",
    errors: "cmd_gat_errors",
    errors_l1: "cmd_gat_errors_l1",
};

pub const CMD_NOOP: &str = "cmd_noop";
pub const CMD_QUIT: &str = "cmd_quit";
pub const CMD_VERSION: &str = "cmd_version";
pub const CMD_STAT: &str = "cmd_stat";
pub const CMD_UNKNOWN: &str = "cmd_unknown";

/// Keys handed to the background remote read
pub const BACKFILL_KEYS: &str = "backfill_keys";
/// Remote hits found by the background read
pub const BACKFILL_HITS: &str = "backfill_hits";
/// Successful writes into the local cluster
pub const BACKFILL_SETS: &str = "backfill_sets";
/// Remote read or local write failures
pub const BACKFILL_ERRORS: &str = "backfill_errors";

const GET_COUNTERS: [&str; 10] = [
    CMD_GET,
    CMD_GET_L1,
    CMD_GET_KEYS,
    CMD_GET_KEYS_L1,
    CMD_GET_HITS,
    CMD_GET_HITS_L1,
    CMD_GET_MISSES,
    CMD_GET_MISSES_L1,
    CMD_GET_ERRORS,
    CMD_GET_ERRORS_L1,
];

const MISC_COUNTERS: [&str; 9] = [
    CMD_NOOP,
    CMD_QUIT,
    CMD_VERSION,
    CMD_STAT,
    CMD_UNKNOWN,
    BACKFILL_KEYS,
    BACKFILL_HITS,
    BACKFILL_SETS,
    BACKFILL_ERRORS,
];

const FAMILIES: [CommandCounters; 8] = [SET, ADD, REPLACE, APPEND, PREPEND, DELETE, TOUCH, GAT];

/// Every counter the proxy reports.
pub fn counter_names() -> Vec<&'static str> {
    GET_COUNTERS
        .iter()
        .chain(MISC_COUNTERS.iter())
        .copied()
        .chain(FAMILIES.iter().flat_map(CommandCounters::names))
        .collect()
}

/// Destination of counters and histograms. Orchestrators receive one at
/// construction time and never touch a global registry themselves.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &'static str, value: u64);

    fn observe(&self, name: &'static str, value: f64);

    fn incr(&self, name: &'static str) {
        self.increment(name, 1);
    }
}

/// Forwards to the process-wide `metrics` recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderSink;

impl MetricsSink for RecorderSink {
    fn increment(&self, name: &'static str, value: u64) {
        counter!(name, value);
    }

    fn observe(&self, name: &'static str, value: f64) {
        histogram!(name, value);
    }
}

/// Keeps values in memory, isolated from the global recorder.
#[derive(Debug, Default)]
pub struct MemorySink {
    counters: Mutex<HashMap<&'static str, u64>>,
    histograms: Mutex<HashMap<&'static str, Vec<f64>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn observations(&self, name: &str) -> Vec<f64> {
        self.histograms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> HashMap<&'static str, u64> {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MetricsSink for MemorySink {
    fn increment(&self, name: &'static str, value: u64) {
        *self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name)
            .or_insert(0) += value;
    }

    fn observe(&self, name: &'static str, value: f64) {
        self.histograms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name)
            .or_default()
            .push(value);
    }
}

/// Registers every counter so the exporter reports zeros before traffic.
pub fn init_counters() {
    for name in counter_names() {
        register_counter!(name);
    }
    info!("metrics counters registered");
}

/// Installs the Prometheus recorder with its HTTP endpoint on `address`.
pub fn install_prometheus(address: SocketAddr) -> Result<(), Error> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .listen_address(address)
        .install()
        .map_err(|e| Error::config(format!("can't install prometheus exporter: {}", e)))?;
    info!("prometheus exporter listens on {}", address);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_counter_names_are_unique() {
        let names = counter_names();
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(names.len(), unique.len());
        assert!(unique.contains(&"cmd_get_hits"));
        assert!(unique.contains(&"cmd_touch_misses_l1"));
        assert!(unique.contains(&"backfill_sets"));
    }

    #[test]
    fn test_memory_sink_is_isolated() {
        let first = MemorySink::new();
        let second = MemorySink::new();
        first.incr(CMD_GET_HITS);
        first.increment(CMD_GET_KEYS, 3);
        first.observe(HIST_GET_L1, 0.5);
        assert_eq!(first.counter(CMD_GET_HITS), 1);
        assert_eq!(first.counter(CMD_GET_KEYS), 3);
        assert_eq!(first.observations(HIST_GET_L1), vec![0.5]);
        assert_eq!(second.counter(CMD_GET_HITS), 0);
        assert!(second.snapshot().is_empty());
    }
}
