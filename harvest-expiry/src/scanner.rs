use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use harvest_core::config::ExpiryConfig;
use harvest_core::events::{ExpiryEvent, NotifyEvent};
use harvest_core::store::Store;
use harvest_core::types::DonationStatus;
use harvest_notify::FanoutEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub matched: usize,
    pub notifications: usize,
}

/// Periodically alerts participants of donations about to expire.
pub struct ExpiryScanner {
    store: Arc<dyn Store>,
    fanout: FanoutEngine,
    interval: Duration,
    window: ChronoDuration,
    statuses: Vec<DonationStatus>,
}

impl ExpiryScanner {
    pub fn new(store: Arc<dyn Store>, fanout: FanoutEngine, config: &ExpiryConfig) -> Self {
        let mut statuses = vec![DonationStatus::Pending, DonationStatus::Accepted];
        if config.alert_in_transit {
            statuses.push(DonationStatus::InTransit);
        }
        ExpiryScanner {
            store,
            fanout,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            window: ChronoDuration::hours(config.window_hours.max(1)),
            statuses,
        }
    }

    /// One cycle over `(now, now + window]`. Each matching donation produces
    /// one expiry event; alerts repeat on later cycles while it still matches.
    pub async fn scan_once(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        let until = now + self.window;
        let donations = self
            .store
            .expiring_donations(now, until, &self.statuses)
            .await?;

        let mut report = ScanReport {
            matched: donations.len(),
            notifications: 0,
        };
        for donation in donations {
            let id = donation.id;
            let delivered = self
                .fanout
                .handle_event(NotifyEvent::Expiry(ExpiryEvent {
                    donation,
                    scanned_at: now,
                }))
                .await;
            tracing::debug!("Expiry alert for donation {} sent to {} recipient(s)", id, delivered.len());
            report.notifications += delivered.iter().filter(|r| r.notification_id.is_some()).count();
        }
        Ok(report)
    }
}

/// Runs forever. A cycle finishes before the next tick is taken, and ticks
/// missed while a cycle was running are skipped.
pub async fn run(scanner: ExpiryScanner) -> Result<()> {
    tracing::info!(
        "Starting expiry scanner (every {:?}, window {}h, statuses {:?})",
        scanner.interval,
        scanner.window.num_hours(),
        scanner.statuses
    );

    let mut ticker = tokio::time::interval(scanner.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        match scanner.scan_once(Utc::now()).await {
            Ok(report) if report.matched > 0 => {
                tracing::info!(
                    "Expiry scan matched {} donation(s), created {} notification(s)",
                    report.matched,
                    report.notifications
                );
            }
            Ok(_) => tracing::debug!("Expiry scan found nothing"),
            Err(e) => tracing::error!("Expiry scan failed: {}", e),
        }
    }
}
