use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A cancellation token that fires when either of two parents fires.
///
/// The merged token is a child of `primary`, so cancelling the process scope
/// reaches it through the token tree without extra bookkeeping. Observing
/// `secondary` needs one watcher task, which lives exactly as long as the
/// merged token: it exits when the merged token is cancelled and is aborted
/// on drop.
///
/// Dropping (or calling [`MergedToken::dispose`]) cancels the merged token and
/// detaches it from both parents. Because this happens in `Drop`, it also runs
/// when the call that owns it unwinds.
#[derive(Debug)]
pub struct MergedToken {
    token: CancellationToken,
    watcher: Option<JoinHandle<()>>,
}

impl MergedToken {
    /// Merges `primary` and `secondary` into a single token.
    ///
    /// Must be called from within a Tokio runtime unless `secondary` is
    /// already cancelled.
    pub fn merge(primary: &CancellationToken, secondary: &CancellationToken) -> Self {
        let token = primary.child_token();

        if secondary.is_cancelled() {
            token.cancel();
            return Self {
                token,
                watcher: None,
            };
        }

        let watcher = {
            let token = token.clone();
            let secondary = secondary.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = secondary.cancelled() => token.cancel(),
                    () = token.cancelled() => {}
                }
            })
        };

        Self {
            token,
            watcher: Some(watcher),
        }
    }

    /// The merged token. Clones observe the same cancellation.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Tears the merge down. Equivalent to dropping it.
    pub fn dispose(self) {}
}

impl Drop for MergedToken {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}
