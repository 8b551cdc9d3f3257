use tokio::sync::watch;

/// Resolves once shutdown has been signaled, or the signal sender is gone.
///
/// Resolves immediately if shutdown was already signaled before the call.
pub async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|shutdown| *shutdown).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn resolves_on_signal_and_on_dropped_sender() {
        let (tx, mut rx) = watch::channel(false);
        tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(&mut rx))
            .await
            .unwrap();
        assert!(*rx.borrow());

        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(&mut rx))
            .await
            .unwrap();
    }
}
