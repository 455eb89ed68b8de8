//! Beacon serialization and the one-shot emitter
//!
//! Wire format: `GET <collectorUrl>?ets=name1:dur1,name2:dur2,...`. Names go
//! out as-is; they are expected to be simple identifiers.

use tracing::{debug, info, warn};

use crate::host::PageHost;
use crate::ledger::Ledger;

/// Build the `?ets=` query for the current measures, `None` when there are none
pub fn beacon_query(ledger: &Ledger) -> Option<String> {
    let tokens: Vec<String> = ledger
        .durations()
        .map(|(name, duration)| format!("{}:{}", name, duration))
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(format!("?ets={}", tokens.join(",")))
    }
}

/// Full beacon URL, `None` when there is nothing to send
pub fn beacon_url(collector_url: &str, ledger: &Ledger) -> Option<String> {
    beacon_query(ledger).map(|query| format!("{}{}", collector_url, query))
}

/// Parse the `ets` parameter out of a beacon query string.
///
/// Accepts the bare query with or without a leading `?`; other parameters
/// and malformed tokens are skipped.
pub fn parse_ets(query: &str) -> Vec<(String, i64)> {
    let query = query.strip_prefix('?').unwrap_or(query);
    query
        .split('&')
        .filter_map(|param| param.strip_prefix("ets="))
        .flat_map(|value| value.split(','))
        .filter_map(|token| {
            let (name, duration) = token.rsplit_once(':')?;
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), duration.parse::<i64>().ok()?))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconOutcome {
    /// Handed to the host transport
    Sent,
    /// The transport refused it; not retried
    Failed,
    /// No measures, nothing sent
    Empty,
    /// A beacon already went out for this page view
    AlreadySent,
}

/// Sends at most one beacon per page view
#[derive(Debug, Clone, Default)]
pub struct BeaconEmitter {
    sent: bool,
}

impl BeaconEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_sent(&self) -> bool {
        self.sent
    }

    pub fn reset(&mut self) {
        self.sent = false;
    }

    /// Fire the beacon for `ledger`. Failures are logged and swallowed.
    pub fn send<H: PageHost>(
        &mut self,
        host: &mut H,
        collector_url: &str,
        ledger: &Ledger,
    ) -> BeaconOutcome {
        if self.sent {
            debug!("beacon already sent for this page view");
            return BeaconOutcome::AlreadySent;
        }

        let Some(url) = beacon_url(collector_url, ledger) else {
            debug!("no measures, beacon not sent");
            return BeaconOutcome::Empty;
        };

        self.sent = true;
        match host.send_beacon(&url) {
            Ok(()) => {
                info!(url = %url, measures = ledger.measure_count(), "beacon sent");
                BeaconOutcome::Sent
            }
            Err(e) => {
                warn!(error = %e, "beacon failed");
                BeaconOutcome::Failed
            }
        }
    }
}
