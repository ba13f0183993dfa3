// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! PCI device addressing and bridge-chain discovery.
//!
//! [`Bdf`] is the segment:bus:device.function address of a single PCI
//! function. [`path_to_root`] walks from an endpoint up through every bridge
//! to its root port, producing a [`LinkPath`]. The walk itself is pure; where
//! the hierarchy comes from is abstracted behind [`PciHierarchy`] so that the
//! sysfs-backed provider can be swapped for an in-memory one in tests.

#![forbid(unsafe_code)]

mod bdf;
mod sysfs;
mod walk;

pub use bdf::Bdf;
pub use bdf::ParseBdfError;
pub use sysfs::SysfsHierarchy;
pub use walk::LinkPath;
pub use walk::PciHierarchy;
pub use walk::TopologyError;
pub use walk::path_to_root;
