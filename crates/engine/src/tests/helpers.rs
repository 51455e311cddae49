use config::EngineConfig;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub fn count_sst_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "sst")
                .unwrap_or(false)
        })
        .count()
}

/// A config with a tiny flush threshold and no compaction/back-pressure
/// surprises, for tests that want deterministic flush boundaries.
pub fn small_flush_config(flush_threshold_bytes: usize) -> EngineConfig {
    EngineConfig {
        flush_threshold_bytes,
        high_water_mark: 1000,
        low_water_mark: 0,
        backpressure_timeout: Duration::from_secs(5),
        ..EngineConfig::default()
    }
}
