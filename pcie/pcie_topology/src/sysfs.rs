// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The Linux sysfs hierarchy provider.

use crate::Bdf;
use crate::PciHierarchy;
use std::path::Path;
use std::path::PathBuf;

/// [`PciHierarchy`] backed by `/sys/bus/pci/devices`.
///
/// Resolving a device canonicalizes its sysfs symlink into the
/// `/sys/devices/pciDDDD:BB/...` tree, where each path component below the
/// host bridge is itself a device address; stepping to a parent is stepping
/// up one directory.
pub struct SysfsHierarchy {
    devices_root: PathBuf,
}

impl SysfsHierarchy {
    /// Provider over the standard sysfs mount.
    pub fn new() -> Self {
        Self::with_root("/sys/bus/pci/devices")
    }

    /// Provider over an alternate devices directory.
    pub fn with_root(devices_root: impl Into<PathBuf>) -> Self {
        Self {
            devices_root: devices_root.into(),
        }
    }
}

impl PciHierarchy for SysfsHierarchy {
    type Location = PathBuf;

    fn resolve(&self, addr: &Bdf) -> Option<PathBuf> {
        let link = self.devices_root.join(addr.to_string());
        match fs_err::canonicalize(&link) {
            Ok(real) => Some(real),
            Err(err) => {
                tracing::debug!(device = %addr, error = %err, "no sysfs entry");
                None
            }
        }
    }

    fn parent(&self, loc: &PathBuf) -> Option<PathBuf> {
        loc.parent().map(Path::to_path_buf)
    }

    fn device_at(&self, loc: &PathBuf) -> Option<Bdf> {
        loc.file_name()?.to_str()?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_at_parses_only_bdf_components() {
        let h = SysfsHierarchy::new();
        assert_eq!(
            h.device_at(&PathBuf::from("/sys/devices/pci0000:00/0000:00:02.0")),
            Some("0000:00:02.0".parse().unwrap())
        );
        assert_eq!(
            h.device_at(&PathBuf::from("/sys/devices/pci0000:00")),
            None,
            "the host bridge container is not a PCI function"
        );
    }

    #[test]
    fn parent_walks_toward_filesystem_root() {
        let h = SysfsHierarchy::new();
        let child = PathBuf::from("/sys/devices/pci0000:00/0000:00:02.0");
        assert_eq!(
            h.parent(&child),
            Some(PathBuf::from("/sys/devices/pci0000:00"))
        );
    }
}
