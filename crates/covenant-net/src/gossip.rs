// Background gossip worker: periodically asks every known peer "do you have
// updates we don't", pulling in anything new via anti-entropy. Runs as a
// self-paced `tokio::task` that doubles its idle interval and resets to the
// base period the moment a peer yields something new.

use std::time::Duration;

use covenant_log::NodeId;
use tracing::{debug, warn};

use crate::adaptor::Adaptor;
use crate::exchange::Exchanger;

/// The interval doubles after a pass that found nothing new, capped at this
/// multiple of the configured base period, and resets to the base period
/// the instant any peer yields new entries.
const MAX_BACKOFF_MULTIPLIER: u32 = 64;

/// Compute the next sleep interval given whether the most recent pass found
/// any new entries. Pulled out as a pure function so the doubling/reset/cap
/// rule is unit-testable without running an actual background task.
pub fn next_period(current: Duration, base: Duration, any_new: bool) -> Duration {
    if any_new {
        base
    } else {
        std::cmp::min(current.saturating_mul(2), base.saturating_mul(MAX_BACKOFF_MULTIPLIER))
    }
}

pub struct GossipWorker<A: Adaptor> {
    exchanger: Exchanger<A>,
    peers: Vec<NodeId>,
    base_period: Duration,
}

impl<A: Adaptor> GossipWorker<A> {
    pub fn new(exchanger: Exchanger<A>, peers: Vec<NodeId>, base_period: Duration) -> Self {
        Self {
            exchanger,
            peers,
            base_period,
        }
    }

    /// One gossip pass over every peer, skipping blocked ones. Returns
    /// whether any peer had new entries, which the caller uses to decide
    /// whether to reset or back off the interval.
    pub async fn run_once(&self, now_unix_seconds: i64) -> bool {
        let mut any_new = false;
        for node_id in &self.peers {
            if self.exchanger.is_blocked(node_id) {
                continue;
            }
            match self.exchanger.any_new_log_entries_of_node(node_id).await {
                Ok(Some(version_info)) => {
                    any_new = true;
                    debug!(%node_id, hash = %version_info.hash_of_entry, stamp = %version_info.accept_stamp, "new updates found");
                    if let Err(err) = self.exchanger.anti_entropy(node_id, version_info, now_unix_seconds).await {
                        warn!(%node_id, %err, "anti-entropy pass failed");
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(%node_id, %err, "failed to check for new updates"),
            }
        }
        any_new
    }

    /// Run forever, sleeping `base_period` to start and adjusting per
    /// `next_period` after every pass. `now_unix_seconds` is a caller-owned
    /// clock, matching the rest of this crate's "no hidden clock" rule.
    pub async fn run(self, mut now_unix_seconds: impl FnMut() -> i64 + Send) -> ! {
        let mut period = self.base_period;
        loop {
            tokio::time::sleep(period).await;
            let any_new = self.run_once(now_unix_seconds()).await;
            period = next_period(period, self.base_period, any_new);
        }
    }
}
