//! The tier cost model: monthly storage rates, warming latencies, and
//! retrieval pricing.

use std::time::Duration;

use strata_core::model::{RestorePriority, StorageTier};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Monthly storage cost of `size_bytes` held in `tier`.
pub fn monthly_storage_cost(size_bytes: u64, tier: StorageTier) -> f64 {
    (size_bytes as f64 / BYTES_PER_GB) * tier.monthly_cost_per_gb()
}

/// Monthly saving from moving `size_bytes` between tiers. Negative when the
/// move goes toward a warmer (more expensive) tier.
pub fn estimated_monthly_savings(size_bytes: u64, from: StorageTier, to: StorageTier) -> f64 {
    monthly_storage_cost(size_bytes, from) - monthly_storage_cost(size_bytes, to)
}

/// Simulated warming latency for a cold restore.
pub fn warming_duration(tier: StorageTier, priority: RestorePriority) -> Duration {
    let hours = match (tier, priority) {
        (StorageTier::Cold, RestorePriority::Standard) => 5,
        (StorageTier::Cold, RestorePriority::Expedited) => 1,
        (StorageTier::Archive, RestorePriority::Standard) => 12,
        (StorageTier::Archive, RestorePriority::Expedited) => 3,
        // Hot and warm tiers are directly accessible.
        _ => 0,
    };
    Duration::from_secs(hours * 3600)
}

/// Retrieval cost in $/GB, doubled for expedited requests.
pub fn retrieval_cost(size_bytes: u64, tier: StorageTier, priority: RestorePriority) -> f64 {
    let per_gb = match tier {
        StorageTier::Cold => 0.01,
        StorageTier::Archive => 0.02,
        _ => 0.0,
    };
    let multiplier = match priority {
        RestorePriority::Standard => 1.0,
        RestorePriority::Expedited => 2.0,
    };
    (size_bytes as f64 / BYTES_PER_GB) * per_gb * multiplier
}
