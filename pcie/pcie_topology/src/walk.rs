// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Endpoint-to-root-port walk over an abstract device hierarchy.

use crate::Bdf;
use thiserror::Error;

/// A source of parent/child relationships between PCI functions.
///
/// Production code uses the sysfs-backed provider; tests supply an in-memory
/// hierarchy. `Location` is whatever handle the provider needs to step upward
/// (a filesystem path for sysfs).
pub trait PciHierarchy {
    /// An opaque position within the hierarchy.
    type Location;

    /// Looks up the position of a device, if it is present at all.
    fn resolve(&self, addr: &Bdf) -> Option<Self::Location>;

    /// Steps to the parent position, or `None` at the top of the hierarchy.
    fn parent(&self, loc: &Self::Location) -> Option<Self::Location>;

    /// The device at a position, or `None` if the position is not a PCI
    /// function (e.g. the host bridge container).
    fn device_at(&self, loc: &Self::Location) -> Option<Bdf>;
}

/// The ordered bridge chain from an endpoint up to its root port.
///
/// Index 0 is always the endpoint and the last element the root port. The
/// two coincide only for a path of length one, which [`path_to_root`] can
/// produce for an endpoint sitting directly under the host bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPath(Vec<Bdf>);

impl LinkPath {
    /// A path from an explicit device list, endpoint first. `None` for an
    /// empty list.
    pub fn new(devices: Vec<Bdf>) -> Option<Self> {
        if devices.is_empty() {
            None
        } else {
            Some(Self(devices))
        }
    }

    /// All devices, endpoint first.
    pub fn devices(&self) -> &[Bdf] {
        &self.0
    }

    /// The endpoint the walk started from.
    pub fn endpoint(&self) -> Bdf {
        self.0[0]
    }

    /// The root port (the last device reached before leaving PCI).
    pub fn root_port(&self) -> Bdf {
        *self.0.last().expect("path is never empty")
    }

    /// The bridges strictly between endpoint and root port.
    pub fn interior(&self) -> &[Bdf] {
        if self.0.len() <= 2 {
            &[]
        } else {
            &self.0[1..self.0.len() - 1]
        }
    }

    /// Number of devices on the path.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Why a path could not be produced for an endpoint.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    /// The endpoint is not present in the hierarchy.
    #[error("device {0} not found")]
    NotFound(Bdf),
    /// The endpoint resolved, but nothing on the way up was a PCI function.
    #[error("no PCI devices found walking up from {0}")]
    NotAPciDevice(Bdf),
}

/// Walks from `endpoint` upward, collecting every position that names a PCI
/// function, until the first position that does not.
///
/// Read-only and idempotent. The walk is finite because every step moves
/// strictly toward the hierarchy root.
pub fn path_to_root<H: PciHierarchy>(
    hierarchy: &H,
    endpoint: Bdf,
) -> Result<LinkPath, TopologyError> {
    let mut loc = hierarchy
        .resolve(&endpoint)
        .ok_or(TopologyError::NotFound(endpoint))?;

    let mut path = Vec::new();
    while let Some(bdf) = hierarchy.device_at(&loc) {
        path.push(bdf);
        match hierarchy.parent(&loc) {
            Some(parent) => loc = parent,
            None => break,
        }
    }

    if path.is_empty() {
        return Err(TopologyError::NotAPciDevice(endpoint));
    }
    tracing::debug!(%endpoint, depth = path.len(), root_port = %path[path.len() - 1], "resolved link path");
    Ok(LinkPath(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A hierarchy expressed as one chain of components, root first. A
    /// location is an index into the chain.
    struct ChainHierarchy {
        components: Vec<&'static str>,
    }

    impl PciHierarchy for ChainHierarchy {
        type Location = usize;

        fn resolve(&self, addr: &Bdf) -> Option<usize> {
            self.components
                .iter()
                .position(|c| c.parse::<Bdf>().ok() == Some(*addr))
        }

        fn parent(&self, loc: &usize) -> Option<usize> {
            loc.checked_sub(1)
        }

        fn device_at(&self, loc: &usize) -> Option<Bdf> {
            self.components[*loc].parse().ok()
        }
    }

    fn bdf(s: &str) -> Bdf {
        s.parse().expect("test addresses are well formed")
    }

    #[test]
    fn walk_collects_endpoint_bridge_root() {
        let h = ChainHierarchy {
            components: vec![
                "sys",
                "devices",
                "pci0000:00",
                "0000:00:02.0",
                "0000:40:01.0",
                "0000:41:00.0",
            ],
        };
        let path = path_to_root(&h, bdf("0000:41:00.0")).expect("endpoint is present");
        assert_eq!(
            path.devices(),
            &[bdf("0000:41:00.0"), bdf("0000:40:01.0"), bdf("0000:00:02.0")],
            "path runs endpoint first, root port last"
        );
        assert_eq!(path.endpoint(), bdf("0000:41:00.0"));
        assert_eq!(path.root_port(), bdf("0000:00:02.0"));
        assert_eq!(path.interior(), &[bdf("0000:40:01.0")]);
    }

    #[test]
    fn walk_is_idempotent() {
        let h = ChainHierarchy {
            components: vec!["pci0000:00", "0000:00:02.0", "0000:41:00.0"],
        };
        let first = path_to_root(&h, bdf("0000:41:00.0")).unwrap();
        let second = path_to_root(&h, bdf("0000:41:00.0")).unwrap();
        assert_eq!(first, second, "walking twice yields the same path");
    }

    #[test]
    fn two_element_path_has_no_interior() {
        let h = ChainHierarchy {
            components: vec!["pci0000:00", "0000:00:02.0", "0000:01:00.0"],
        };
        let path = path_to_root(&h, bdf("0000:01:00.0")).unwrap();
        assert_eq!(path.len(), 2);
        assert!(path.interior().is_empty(), "a two-element path has no interior bridges");
        assert_eq!(path.root_port(), bdf("0000:00:02.0"));
    }

    #[test]
    fn missing_endpoint_is_not_found() {
        let h = ChainHierarchy {
            components: vec!["pci0000:00", "0000:00:02.0"],
        };
        assert_eq!(
            path_to_root(&h, bdf("0000:99:00.0")),
            Err(TopologyError::NotFound(bdf("0000:99:00.0")))
        );
    }
}
