//! Controller Address Discovery
//!
//! A controller is addressed by its serial number, but UDP delivery needs its
//! IP address. When the address is unknown the session broadcasts a Search
//! command and waits for the controller whose serial matches to answer with
//! its network identity.
//!
//! # Overview
//!
//! [`DiscoveryCoordinator`] tracks one discovery attempt through
//! [`DiscoveryState`]:
//!
//! ```text
//! Idle --begin()--> Searching --matching Search reply--> Resolved(ip)
//! ```
//!
//! `Resolved` is terminal. Frames offered after resolution, frames from other
//! controllers and frames of other function codes are ignored. A new attempt
//! needs a new coordinator; replacing the coordinator releases every
//! [`DiscoveryHandle`] still waiting on the old one.
//!
//! # Example
//!
//! ```no_run
//! use accessctl::network::{DiscoveryCoordinator, DiscoveryState};
//!
//! let mut discovery = DiscoveryCoordinator::new(Some(223_000_123), None);
//! assert!(discovery.begin());
//! assert_eq!(discovery.state(), DiscoveryState::Searching);
//! ```

use std::net::Ipv4Addr;

use tokio::sync::watch;

use crate::service::Response;

/// Progress of one discovery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    /// Nothing sent yet
    Idle,
    /// Search broadcast, waiting for the matching reply
    Searching,
    /// Address learned
    Resolved(Ipv4Addr),
}

/// One-shot address discovery for a single controller serial
pub struct DiscoveryCoordinator {
    target: Option<u32>,
    state: DiscoveryState,
    result: watch::Sender<Option<Ipv4Addr>>,
}

impl DiscoveryCoordinator {
    /// Create a coordinator for `target`.
    ///
    /// A `known` address resolves the coordinator immediately and no search
    /// is ever sent.
    pub fn new(target: Option<u32>, known: Option<Ipv4Addr>) -> Self {
        let (result, _) = watch::channel(known);
        let state = match known {
            Some(ip) => DiscoveryState::Resolved(ip),
            None => DiscoveryState::Idle,
        };

        Self {
            target,
            state,
            result,
        }
    }

    /// Serial the coordinator is looking for
    pub fn target(&self) -> Option<u32> {
        self.target
    }

    /// Current state
    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    /// Learned address, once resolved
    pub fn resolved(&self) -> Option<Ipv4Addr> {
        match self.state {
            DiscoveryState::Resolved(ip) => Some(ip),
            _ => None,
        }
    }

    /// Move from `Idle` to `Searching`.
    ///
    /// Returns `true` when the caller must now broadcast a Search. Without a
    /// target serial there is nothing to match against and the coordinator
    /// stays idle.
    pub fn begin(&mut self) -> bool {
        if self.state != DiscoveryState::Idle || self.target.is_none() {
            return false;
        }
        self.state = DiscoveryState::Searching;
        true
    }

    /// Offer an inbound frame.
    ///
    /// Returns the learned address exactly once: on the first Search reply
    /// from the target serial while searching.
    pub fn offer(&mut self, response: &Response) -> Option<Ipv4Addr> {
        if self.state != DiscoveryState::Searching {
            return None;
        }
        let target = self.target?;
        if response.serial != target {
            return None;
        }
        let ip = response.search_reply()?.ip;

        self.state = DiscoveryState::Resolved(ip);
        self.result.send_replace(Some(ip));
        Some(ip)
    }

    /// Awaitable view of the result
    pub fn handle(&self) -> DiscoveryHandle {
        DiscoveryHandle {
            result: self.result.subscribe(),
        }
    }
}

/// Single-resolution result of a discovery attempt
#[derive(Debug, Clone)]
pub struct DiscoveryHandle {
    result: watch::Receiver<Option<Ipv4Addr>>,
}

impl DiscoveryHandle {
    /// Address if already resolved
    pub fn peek(&self) -> Option<Ipv4Addr> {
        *self.result.borrow()
    }

    /// Wait for the address.
    ///
    /// Stays pending while the controller does not answer; wrap in
    /// `tokio::time::timeout` to bound the wait. Returns `None` only when
    /// the attempt was abandoned unresolved, because its session was
    /// dropped or the controller address was reassigned.
    pub async fn resolved(mut self) -> Option<Ipv4Addr> {
        match self.result.wait_for(Option::is_some).await {
            Ok(ip) => *ip,
            Err(_) => None,
        }
    }
}
