//! The tiering scheduler: four cadenced jobs with per-job timeouts.
//!
//! - rule processing every 6 hours (2 hour budget)
//! - cost reports daily (30 minute budget)
//! - cold-restore progression every 15 minutes (10 minute budget)
//! - cold-restore expiry hourly (5 minute budget)

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use strata_core::error::{CoreError, Result};
use strata_core::store::Store;

use crate::cold_restore::ColdRestoreManager;
use crate::reports::{CostReporter, TierCostReport};
use crate::rules::{TieringEngine, TieringRunSummary};

/// Tiering scheduler cadences and budgets.
#[derive(Debug, Clone)]
pub struct TieringSchedulerConfig {
    pub rules_interval: Duration,
    pub rules_timeout: Duration,
    /// When the daily cost reports fire.
    pub reports_cron: String,
    pub reports_timeout: Duration,
    pub cold_restore_interval: Duration,
    pub cold_restore_timeout: Duration,
    pub expiration_interval: Duration,
    pub expiration_timeout: Duration,
}

impl Default for TieringSchedulerConfig {
    fn default() -> Self {
        Self {
            rules_interval: Duration::from_secs(6 * 3600),
            rules_timeout: Duration::from_secs(2 * 3600),
            reports_cron: "0 0 6 * * *".to_string(),
            reports_timeout: Duration::from_secs(30 * 60),
            cold_restore_interval: Duration::from_secs(15 * 60),
            cold_restore_timeout: Duration::from_secs(10 * 60),
            expiration_interval: Duration::from_secs(3600),
            expiration_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Drives tier rules, cost reports, and cold-restore lifecycles.
pub struct TieringScheduler {
    engine: TieringEngine,
    cold_restores: ColdRestoreManager,
    reporter: CostReporter,
    config: TieringSchedulerConfig,
    running: Arc<RwLock<bool>>,
    jobs: Mutex<Vec<JoinHandle<()>>>,
}

impl TieringScheduler {
    pub fn new(store: Arc<dyn Store>, config: TieringSchedulerConfig) -> Self {
        Self {
            engine: TieringEngine::new(store.clone()),
            cold_restores: ColdRestoreManager::new(store.clone()),
            reporter: CostReporter::new(store),
            config,
            running: Arc::new(RwLock::new(false)),
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Start the four job loops. Fails when already running or the reports
    /// cron expression does not parse.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let reports_schedule = Schedule::from_str(&self.config.reports_cron)
            .map_err(|e| CoreError::InvalidCron(e.to_string()))?;
        {
            let mut running = self.running.write().await;
            if *running {
                return Err(CoreError::AlreadyRunning("tiering scheduler".to_string()));
            }
            *running = true;
        }

        let mut jobs = self.jobs.lock().await;

        // Rule processing.
        let scheduler = Arc::clone(&self);
        jobs.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(scheduler.config.rules_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if !*scheduler.running.read().await {
                    break;
                }
                let budget = scheduler.config.rules_timeout;
                match tokio::time::timeout(budget, scheduler.engine.process_rules()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "tiering pass failed"),
                    Err(_) => warn!("tiering pass exceeded its time budget"),
                }
            }
        }));

        // Daily cost reports.
        let scheduler = Arc::clone(&self);
        jobs.push(tokio::spawn(async move {
            let mut next_fire: Option<DateTime<Utc>> =
                reports_schedule.after(&Utc::now()).next();
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if !*scheduler.running.read().await {
                    break;
                }
                let now = Utc::now();
                let Some(fire) = next_fire else { continue };
                if fire > now {
                    continue;
                }
                next_fire = reports_schedule.after(&now).next();
                let budget = scheduler.config.reports_timeout;
                match tokio::time::timeout(budget, scheduler.reporter.generate_all()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "cost report generation failed"),
                    Err(_) => warn!("cost report generation exceeded its time budget"),
                }
            }
        }));

        // Cold-restore progression.
        let scheduler = Arc::clone(&self);
        jobs.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(scheduler.config.cold_restore_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if !*scheduler.running.read().await {
                    break;
                }
                let budget = scheduler.config.cold_restore_timeout;
                match tokio::time::timeout(budget, scheduler.cold_restores.progress_requests())
                    .await
                {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "cold-restore progression failed"),
                    Err(_) => warn!("cold-restore progression exceeded its time budget"),
                }
            }
        }));

        // Cold-restore expiry.
        let scheduler = Arc::clone(&self);
        jobs.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(scheduler.config.expiration_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if !*scheduler.running.read().await {
                    break;
                }
                let budget = scheduler.config.expiration_timeout;
                match tokio::time::timeout(budget, scheduler.cold_restores.expire_requests())
                    .await
                {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "cold-restore expiry failed"),
                    Err(_) => warn!("cold-restore expiry exceeded its time budget"),
                }
            }
        }));

        info!("tiering scheduler started");
        Ok(())
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        for handle in self.jobs.lock().await.drain(..) {
            handle.abort();
        }
        info!("tiering scheduler stopped");
    }

    /// Run a rule-processing pass immediately.
    pub async fn trigger_rules(&self) -> Result<TieringRunSummary> {
        self.engine.process_rules().await
    }

    /// Generate all cost reports immediately.
    pub async fn trigger_reports(&self) -> Result<Vec<TierCostReport>> {
        self.reporter.generate_all().await
    }

    /// Advance cold-restore requests immediately.
    pub async fn trigger_cold_restore_progression(&self) -> Result<u64> {
        self.cold_restores.progress_requests().await
    }

    /// The cold-restore request surface.
    pub fn cold_restores(&self) -> &ColdRestoreManager {
        &self.cold_restores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::MemoryStore;

    #[tokio::test]
    async fn start_twice_is_already_running() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Arc::new(TieringScheduler::new(
            store,
            TieringSchedulerConfig::default(),
        ));
        scheduler.clone().start().await.unwrap();
        let err = scheduler.clone().start().await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyRunning(_)));
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn invalid_reports_cron_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Arc::new(TieringScheduler::new(
            store,
            TieringSchedulerConfig {
                reports_cron: "nope".to_string(),
                ..TieringSchedulerConfig::default()
            },
        ));
        let err = scheduler.start().await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidCron(_)));
    }

    #[tokio::test]
    async fn manual_triggers_run_empty_passes() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = TieringScheduler::new(store, TieringSchedulerConfig::default());

        let summary = scheduler.trigger_rules().await.unwrap();
        assert_eq!(summary.transitions_completed, 0);
        assert!(scheduler.trigger_reports().await.unwrap().is_empty());
        assert_eq!(scheduler.trigger_cold_restore_progression().await.unwrap(), 0);
    }
}
