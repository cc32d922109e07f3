//! Online/offline probing for the network-check hook.

use std::sync::atomic::{AtomicBool, Ordering};

/// Reports whether the device currently looks online.
pub trait ConnectivityProbe: Send + Sync {
    /// Whether a network is available.
    fn is_online(&self) -> bool;
}

/// Probes the host's network interfaces.
///
/// Online when at least one interface is up, is not a loopback device and
/// has an IP address assigned. This says nothing about reachability of any
/// particular server.
#[derive(Clone, Copy, Debug, Default)]
pub struct InterfaceProbe;

impl ConnectivityProbe for InterfaceProbe {
    fn is_online(&self) -> bool {
        netdev::get_interfaces().iter().any(|iface| {
            iface.is_up()
                && !iface.is_loopback()
                && (!iface.ipv4.is_empty() || !iface.ipv6.is_empty())
        })
    }
}

/// A probe with a fixed, switchable answer.
#[derive(Debug)]
pub struct StaticProbe {
    online: AtomicBool,
}

impl StaticProbe {
    /// Create a probe that answers `online`.
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    /// Change the answer.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }
}

impl ConnectivityProbe for StaticProbe {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }
}
