//! Many-to-one channel merge.
//!
//! [`merge`] spawns one forwarding task per input receiver. Every task owns
//! a clone of the output sender, so the output closes exactly once: when
//! the last forwarder finishes and drops its clone.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Merge `streams` into a single receiver of capacity `capacity`.
///
/// Items from one input keep their relative order; items from different
/// inputs interleave arbitrarily. Forwarding stops when an input is
/// exhausted, when the output receiver is dropped, or when `cancel` fires.
/// With no inputs the returned receiver is already closed.
pub fn merge<T>(
    cancel: &CancellationToken,
    streams: Vec<mpsc::Receiver<T>>,
    capacity: usize,
) -> mpsc::Receiver<T>
where
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));

    for mut stream in streams {
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    item = stream.recv() => item,
                };
                let Some(item) = item else {
                    return;
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    sent = tx.send(item) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }

    rx
}
