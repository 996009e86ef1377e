//! Administrative panels over the policy-administration service.
//!
//! Both panels refetch everything after a mutation and only replace their
//! cached lists when that refresh succeeds. A failed call leaves the cache as
//! it was and sets a banner message. Once unmounted, responses that arrive
//! late are dropped and surface as [`PanelError::Unmounted`].
mod groups;
mod permissions;

pub use groups::{GroupRow, PolicyGroupPanel, permissions_for};
pub use permissions::PermissionCatalogPanel;

use crate::api::{RequestError, RequestResult};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PanelError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("panel is no longer mounted")]
    Unmounted,
}

pub type PanelResult<T> = std::result::Result<T, PanelError>;

/// Mounted/unmounted flag shared with in-flight requests.
#[derive(Debug, Clone)]
pub struct MountSignal {
    unmounted: Arc<watch::Sender<bool>>,
}

impl Default for MountSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl MountSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            unmounted: Arc::new(tx),
        }
    }

    pub fn unmount(&self) {
        self.unmounted.send_replace(true);
    }

    pub fn is_mounted(&self) -> bool {
        !*self.unmounted.borrow()
    }

    /// Run `request` unless the panel unmounts first. A result that arrives
    /// after unmount is discarded.
    pub async fn run<T, F>(&self, request: F) -> PanelResult<T>
    where
        F: Future<Output = RequestResult<T>>,
    {
        if !self.is_mounted() {
            return Err(PanelError::Unmounted);
        }
        let mut rx = self.unmounted.subscribe();
        let unmounted = async move {
            let _ = rx.wait_for(|unmounted| *unmounted).await;
        };
        tokio::select! {
            biased;
            _ = unmounted => Err(PanelError::Unmounted),
            result = request => {
                if self.is_mounted() {
                    result.map_err(PanelError::from)
                } else {
                    Err(PanelError::Unmounted)
                }
            }
        }
    }
}

/// Latest failure message shown above a panel.
#[derive(Debug, Default)]
pub(crate) struct Banner(Option<String>);

impl Banner {
    pub(crate) fn record<T>(&mut self, result: &PanelResult<T>) {
        match result {
            Ok(_) => {}
            Err(PanelError::Request(err)) => self.0 = Some(err.message.clone()),
            Err(PanelError::Unmounted) => {}
        }
    }

    pub(crate) fn clear(&mut self) {
        self.0 = None;
    }

    pub(crate) fn message(&self) -> Option<String> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn run_passes_results_through_while_mounted() {
        let signal = MountSignal::new();
        let ok: PanelResult<u8> = signal.run(async { Ok(3) }).await;
        assert_eq!(ok, Ok(3));
        let err: PanelResult<u8> = signal
            .run(async { Err(RequestError::new(Some(500), "boom")) })
            .await;
        assert_eq!(err, Err(PanelError::Request(RequestError::new(Some(500), "boom"))));
    }

    #[tokio::test]
    async fn run_refuses_after_unmount() {
        let signal = MountSignal::new();
        signal.unmount();
        assert!(!signal.is_mounted());
        let result: PanelResult<u8> = signal.run(async { Ok(1) }).await;
        assert_eq!(result, Err(PanelError::Unmounted));
    }

    #[tokio::test]
    async fn unmount_discards_in_flight_result() {
        let signal = MountSignal::new();
        let pending = {
            let signal = signal.clone();
            tokio::spawn(async move {
                signal
                    .run(async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok::<_, RequestError>(5u8)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        signal.unmount();
        let result = pending.await.expect("join");
        assert_eq!(result, Err(PanelError::Unmounted));
    }

    #[test]
    fn banner_ignores_unmount() {
        let mut banner = Banner::default();
        banner.record::<()>(&Err(PanelError::Unmounted));
        assert_eq!(banner.message(), None);
        banner.record::<()>(&Err(PanelError::Request(RequestError::new(
            Some(409),
            "Group already exists",
        ))));
        assert_eq!(banner.message().as_deref(), Some("Group already exists"));
        banner.clear();
        assert_eq!(banner.message(), None);
    }
}
