//! Listener addressing.
//!
//! The host advertises itself through a display address of the form
//! `http://{bind}:{port}{root}/`, regenerated on demand from the current
//! configuration so mutations before a restart are always reflected.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::target::MountRoot;

/// How the listener binds to the local interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindMode {
    /// All interfaces, strong wildcard. Displayed as `*`.
    #[default]
    Any,
    /// All interfaces, weak wildcard. Displayed as `+`. The distinction is a
    /// registration detail of the legacy listener; both bind the unspecified
    /// address here.
    AnyWeak,
    /// Loopback only.
    Localhost,
}

impl BindMode {
    /// The host token used in the display address.
    pub fn token(self) -> &'static str {
        match self {
            Self::Any => "*",
            Self::AnyWeak => "+",
            Self::Localhost => "localhost",
        }
    }

    fn bind_ip(self) -> IpAddr {
        match self {
            Self::Any | Self::AnyWeak => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Self::Localhost => IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

/// The advertised address of a configured host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddress {
    mode: BindMode,
    port: u16,
    root: MountRoot,
}

impl HostAddress {
    pub fn new(mode: BindMode, port: u16, root: MountRoot) -> Self {
        Self { mode, port, root }
    }

    /// The concrete address the listener binds.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.mode.bind_ip(), self.port)
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.root.is_root() {
            write!(f, "http://{}:{}/", self.mode.token(), self.port)
        } else {
            write!(f, "http://{}:{}{}/", self.mode.token(), self.port, self.root)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_omits_the_bare_root() {
        let address = HostAddress::new(BindMode::Any, 8080, MountRoot::new("/"));
        assert_eq!(address.to_string(), "http://*:8080/");
    }

    #[test]
    fn display_includes_a_mount_root() {
        let address = HostAddress::new(BindMode::AnyWeak, 9000, MountRoot::new("/app"));
        assert_eq!(address.to_string(), "http://+:9000/app/");
    }

    #[test]
    fn localhost_binds_loopback() {
        let address = HostAddress::new(BindMode::Localhost, 8080, MountRoot::default());
        assert_eq!(address.to_string(), "http://localhost:8080/");
        assert_eq!(address.socket_addr(), "127.0.0.1:8080".parse().unwrap());
    }

    #[test]
    fn wildcards_bind_unspecified() {
        let address = HostAddress::new(BindMode::Any, 80, MountRoot::default());
        assert_eq!(address.socket_addr(), "0.0.0.0:80".parse().unwrap());
    }
}
