//! Background reconciliation task
//!
//! A crash between transaction creation and commit leaves a `Pending`
//! record behind with no balance movement. This task periodically sweeps
//! each configured tenant and drives such orphans to `Failed` so the log
//! stays truthful without operator intervention.

use crate::{config::ReconcilerConfig, types::TenantId, LedgerEngine};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Handle for stopping the reconciler
pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Signal the task to stop and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

impl std::fmt::Debug for ReconcilerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcilerHandle").finish_non_exhaustive()
    }
}

/// Spawn the reconciliation loop for the given tenants
pub fn spawn_reconciler(
    engine: Arc<LedgerEngine>,
    tenants: Vec<TenantId>,
    config: ReconcilerConfig,
) -> ReconcilerHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    if !config.enabled {
        tracing::info!("Reconciler disabled, pending records will not be swept");
        let task = tokio::spawn(async move {
            let _ = shutdown_rx.changed().await;
        });
        return ReconcilerHandle {
            shutdown: shutdown_tx,
            task,
        };
    }

    let task = tokio::spawn(async move {
        let mut timer = interval(Duration::from_secs(config.interval_secs));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let max_age = chrono::Duration::seconds(config.max_pending_age_secs as i64);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    tracing::info!("Reconciler shutting down");
                    break;
                }

                _ = timer.tick() => {
                    for tenant in &tenants {
                        match engine.reconcile_pending(tenant, max_age) {
                            Ok(0) => {}
                            Ok(n) => {
                                tracing::info!(
                                    tenant_id = %tenant,
                                    reconciled = n,
                                    "Reconciled orphaned pending transactions"
                                );
                            }
                            Err(e) => {
                                // The next tick retries; never kill the loop
                                tracing::error!(
                                    tenant_id = %tenant,
                                    error = %e,
                                    "Reconciliation pass failed"
                                );
                            }
                        }
                    }
                }
            }
        }
    });

    ReconcilerHandle {
        shutdown: shutdown_tx,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Transaction, TransactionKind, TransactionStatus, UserId, WalletRef};
    use crate::Config;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_reconciler_sweeps_orphans() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let tenant = TenantId::new("marketplace-1");
        let engine = Arc::new(LedgerEngine::open(config).unwrap());
        let wallet = engine.create_wallet(&tenant, &UserId::new("alice")).unwrap();

        // Orphaned pending record from a "crashed" operation
        let mut orphan = Transaction::pending(
            tenant.clone(),
            TransactionKind::Deposit {
                to: WalletRef::of(&wallet),
                channel: "card".to_string(),
            },
            Decimal::from(25),
            HashMap::new(),
        );
        orphan.timestamp = Utc::now() - chrono::Duration::minutes(10);
        engine.storage().create_transaction(&orphan).unwrap();

        let handle = spawn_reconciler(
            engine.clone(),
            vec![tenant.clone()],
            ReconcilerConfig {
                enabled: true,
                interval_secs: 1,
                max_pending_age_secs: 60,
            },
        );

        // First tick fires immediately
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        handle.shutdown().await;

        let loaded = engine.storage().get_transaction(&tenant, orphan.id).unwrap();
        assert_eq!(loaded.status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_disabled_reconciler_leaves_pending_untouched() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let tenant = TenantId::new("marketplace-1");
        let engine = Arc::new(LedgerEngine::open(config).unwrap());
        let wallet = engine.create_wallet(&tenant, &UserId::new("alice")).unwrap();

        let mut orphan = Transaction::pending(
            tenant.clone(),
            TransactionKind::Deposit {
                to: WalletRef::of(&wallet),
                channel: "card".to_string(),
            },
            Decimal::from(25),
            HashMap::new(),
        );
        orphan.timestamp = Utc::now() - chrono::Duration::minutes(10);
        engine.storage().create_transaction(&orphan).unwrap();

        let handle = spawn_reconciler(
            engine.clone(),
            vec![tenant.clone()],
            ReconcilerConfig {
                enabled: false,
                interval_secs: 1,
                max_pending_age_secs: 60,
            },
        );

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        handle.shutdown().await;

        let loaded = engine.storage().get_transaction(&tenant, orphan.id).unwrap();
        assert_eq!(loaded.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_shutdown_is_clean() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let engine = Arc::new(LedgerEngine::open(config).unwrap());
        let handle = spawn_reconciler(
            engine,
            vec![TenantId::new("marketplace-1")],
            ReconcilerConfig::default(),
        );
        handle.shutdown().await;
    }
}
