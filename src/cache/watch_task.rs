//! Generic seed-then-watch loop shared by every cache: fetch all keys under a
//! prefix to build the initial snapshot, then apply watch events as they
//! arrive. A dropped or erroring watch stream triggers a bounded-backoff
//! re-subscribe with a full-scan resync on resumption.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use crate::shutdown::Shutdown;
use crate::store::{KeyValue, StoreClient};

const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Runs forever (until `cancel` fires), invoking `on_snapshot` once per
/// (re)seed and `on_event` once per watch event whose key starts with
/// `prefix`.
pub async fn run<FSnap, FEvent>(
    store: Arc<dyn StoreClient>,
    prefix: &'static str,
    cancel: Shutdown,
    on_snapshot: FSnap,
    on_event: FEvent,
) where
    FSnap: Fn(Vec<KeyValue>) + Send + Sync,
    FEvent: Fn(&crate::store::WatchEvent) + Send + Sync,
{
    let mut backoff = MIN_BACKOFF;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let snapshot = match store.get_prefix(prefix).await {
            Ok(kvs) => kvs,
            Err(e) => {
                tracing::warn!(prefix, error = %e, "failed to seed cache, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return,
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };
        on_snapshot(snapshot);
        backoff = MIN_BACKOFF;

        let mut stream = match store.watch(prefix).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(prefix, error = %e, "failed to open watch, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return,
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                next = stream.next() => {
                    match next {
                        Some(Ok(event)) => on_event(&event),
                        Some(Err(e)) => {
                            tracing::warn!(prefix, error = %e, "watch interrupted, resyncing");
                            break;
                        }
                        None => {
                            tracing::warn!(prefix, "watch stream ended, resyncing");
                            break;
                        }
                    }
                }
            }
        }
    }
}
