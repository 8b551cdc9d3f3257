//! Trigger-driven polling subscriptions shared by the store implementations.

use super::Result;
use crate::utils::shutdown::wait_for_shutdown;
use std::collections::HashSet;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Buffer size of a subscription channel.
///
/// Kept small: consumers are sequential and items are re-read from the store.
pub(crate) const SUBSCRIPTION_BUFFER: usize = 16;

/// Delay before re-querying after a failed query when no trigger arrives.
const RETRY_AFTER_FAILURE: Duration = Duration::from_secs(2);

/// Spawn a task that feeds the rows returned by `fetch` into a channel.
///
/// `fetch` runs once immediately and again after every bump of `trigger`.
/// Rows already delivered by this subscription (by `key_of`) are skipped; keys
/// that no longer appear in a fetch are forgotten, so the set stays bounded by
/// the number of pending rows.
pub(crate) fn spawn_subscription<T, K, F, Fut>(
    name: &'static str,
    mut trigger: watch::Receiver<u64>,
    mut shutdown_rx: watch::Receiver<bool>,
    key_of: fn(&T) -> K,
    fetch: F,
) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    K: Eq + Hash + Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<T>>> + Send,
{
    let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

    tokio::spawn(async move {
        let mut delivered: HashSet<K> = HashSet::new();

        loop {
            // Mark the current trigger version as seen before querying, so a
            // bump during the query causes another round.
            trigger.borrow_and_update();

            let failed = match fetch().await {
                Ok(rows) => {
                    let keys: HashSet<K> = rows.iter().map(key_of).collect();
                    delivered.retain(|k| keys.contains(k));

                    for row in rows {
                        let key = key_of(&row);
                        if delivered.contains(&key) {
                            continue;
                        }
                        tokio::select! {
                            biased;
                            _ = wait_for_shutdown(&mut shutdown_rx) => return,
                            sent = tx.send(row) => {
                                if sent.is_err() {
                                    debug!(subscription = name, "Subscriber dropped");
                                    return;
                                }
                            }
                        }
                        delivered.insert(key);
                    }
                    false
                }
                Err(e) => {
                    warn!(subscription = name, error = %e, "Subscription query failed");
                    true
                }
            };

            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown_rx) => return,
                _ = tx.closed() => {
                    debug!(subscription = name, "Subscriber dropped");
                    return;
                }
                changed = trigger.changed() => {
                    if changed.is_err() {
                        debug!(subscription = name, "Store dropped, ending subscription");
                        return;
                    }
                }
                _ = tokio::time::sleep(RETRY_AFTER_FAILURE), if failed => {}
            }
        }
    });

    rx
}
