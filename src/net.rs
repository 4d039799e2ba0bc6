//! Connectivity observation: a watchable online/offline state plus
//! subscriptions that fire on reconnect.

use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Source of truth for reachability. The daemon drives it from an HTTP
/// probe; tests drive it directly via [`ConnectivityMonitor::set_online`].
pub struct ConnectivityMonitor {
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = watch::channel(initially_online);
        Self { tx }
    }

    pub fn handle(&self) -> ConnectivityHandle {
        ConnectivityHandle {
            rx: self.tx.subscribe(),
        }
    }

    /// Publish a reachability reading. Listeners are only notified on an
    /// actual transition; repeated identical readings are absorbed.
    /// Returns true when the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let transitioned = self.tx.send_if_modified(|state| {
            if *state != online {
                *state = online;
                true
            } else {
                false
            }
        });
        if transitioned {
            info!(online, "connectivity changed");
        }
        transitioned
    }
}

/// Cheap cloneable view of the connectivity state.
#[derive(Clone)]
pub struct ConnectivityHandle {
    rx: watch::Receiver<bool>,
}

impl ConnectivityHandle {
    /// Current reachability; side-effect free.
    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    /// Invoke `callback` on every offline -> online transition, and once
    /// immediately when already online at registration time. The returned
    /// guard detaches exactly this observer when dropped or cancelled, so
    /// repeated subscribe/unsubscribe cycles do not leak.
    pub fn on_online<F>(&self, callback: F) -> OnlineListenerGuard
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut rx = self.rx.clone();
        let handle = tokio::spawn(async move {
            if *rx.borrow_and_update() {
                callback();
            }
            loop {
                // Err means the monitor is gone; the subscription ends.
                if rx.changed().await.is_err() {
                    break;
                }
                if *rx.borrow_and_update() {
                    callback();
                }
            }
        });
        OnlineListenerGuard { handle }
    }
}

/// Disposer for an `on_online` subscription.
pub struct OnlineListenerGuard {
    handle: JoinHandle<()>,
}

impl OnlineListenerGuard {
    pub fn cancel(self) {
        // Drop aborts the listener task.
    }
}

impl Drop for OnlineListenerGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Derive reachability from a periodic HEAD probe. Any HTTP response
/// counts as reachable; only transport failures count as offline.
pub fn spawn_probe(
    monitor: Arc<ConnectivityMonitor>,
    probe_url: reqwest::Url,
    interval: Duration,
) -> JoinHandle<()> {
    let http = Client::builder()
        .user_agent("stocksync/0.1")
        .timeout(Duration::from_secs(5))
        .build()
        .expect("reqwest client");
    tokio::spawn(async move {
        loop {
            let online = match http.head(probe_url.clone()).send().await {
                Ok(_) => true,
                Err(err) => {
                    debug!(?err, "connectivity probe failed");
                    false
                }
            };
            monitor.set_online(online);
            tokio::time::sleep(interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn listener_fires_on_each_reconnect() {
        let monitor = ConnectivityMonitor::new(false);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let _guard = monitor.handle().on_online(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        monitor.set_online(true);
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Going offline is absorbed; coming back fires again.
        monitor.set_online(false);
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        monitor.set_online(true);
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn listener_fires_immediately_when_already_online() {
        let monitor = ConnectivityMonitor::new(true);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let _guard = monitor.handle().on_online(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_guard_detaches_listener() {
        let monitor = ConnectivityMonitor::new(false);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let guard = monitor.handle().on_online(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        settle().await;
        drop(guard);
        settle().await;

        monitor.set_online(true);
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_readings_do_not_transition() {
        let monitor = ConnectivityMonitor::new(true);
        assert!(!monitor.set_online(true));
        assert!(monitor.set_online(false));
        assert!(!monitor.set_online(false));
        let handle = monitor.handle();
        assert!(!handle.is_online());
    }
}
