//! Connectivity monitor.
//!
//! Holds the single process-wide "online" flag. Only the platform signal
//! entry point ([`ConnectivityMonitor::set_online`]) mutates it; everything
//! else reads it or subscribes to its transitions.

use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::info;

/// A change of the online flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Online,
    Offline,
}

impl Transition {
    pub fn is_online(self) -> bool {
        self == Transition::Online
    }
}

struct MonitorState {
    online: bool,
    subscribers: Vec<mpsc::UnboundedSender<Transition>>,
}

/// Connectivity monitor.
///
/// Every transition is delivered to every live subscriber exactly once, in
/// the order the platform reported it, with no debouncing. A signal that
/// repeats the current state is not a transition.
pub struct ConnectivityMonitor {
    state: Mutex<MonitorState>,
}

impl ConnectivityMonitor {
    /// Create a monitor seeded from the platform's startup signal.
    pub fn new(initially_online: bool) -> Self {
        Self {
            state: Mutex::new(MonitorState {
                online: initially_online,
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_online(&self) -> bool {
        self.lock().online
    }

    /// Feed a platform connectivity signal.
    ///
    /// Returns `true` if the signal changed the state.
    pub fn set_online(&self, online: bool) -> bool {
        let mut state = self.lock();
        if state.online == online {
            return false;
        }
        state.online = online;

        let transition = if online {
            Transition::Online
        } else {
            Transition::Offline
        };
        info!("Connectivity changed: {:?}", transition);

        // Sending under the lock keeps concurrent signals in one order for
        // every subscriber.
        state
            .subscribers
            .retain(|subscriber| subscriber.send(transition).is_ok());
        true
    }

    /// Subscribe to future transitions.
    pub fn subscribe(&self) -> ConnectivitySubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        ConnectivitySubscription { rx }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|s| !s.is_closed());
        state.subscribers.len()
    }
}

/// Receiving end of [`ConnectivityMonitor::subscribe`].
#[derive(Debug)]
pub struct ConnectivitySubscription {
    rx: mpsc::UnboundedReceiver<Transition>,
}

impl ConnectivitySubscription {
    /// Wait for the next transition. Returns `None` once the monitor is gone.
    pub async fn recv(&mut self) -> Option<Transition> {
        self.rx.recv().await
    }

    /// Take the next transition if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Transition> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_signal_is_not_a_transition() {
        let monitor = ConnectivityMonitor::new(true);
        let mut sub = monitor.subscribe();

        assert!(!monitor.set_online(true));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_flapping_delivered_in_order_to_every_subscriber() {
        let monitor = ConnectivityMonitor::new(true);
        let mut first = monitor.subscribe();
        let mut second = monitor.subscribe();

        for online in [false, true, false, true] {
            assert!(monitor.set_online(online));
        }

        let expected = [
            Transition::Offline,
            Transition::Online,
            Transition::Offline,
            Transition::Online,
        ];
        for sub in [&mut first, &mut second] {
            for want in expected {
                assert_eq!(sub.recv().await, Some(want));
            }
            assert!(sub.try_recv().is_none());
        }
        assert!(monitor.is_online());
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let monitor = ConnectivityMonitor::new(false);
        let sub = monitor.subscribe();
        let _kept = monitor.subscribe();
        drop(sub);

        monitor.set_online(true);
        assert_eq!(monitor.subscriber_count(), 1);
    }
}
