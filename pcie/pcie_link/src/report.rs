// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-device and per-link outcome reporting.

use pcie_topology::Bdf;
use pcie_topology::LinkPath;
use std::fmt;

/// Where a device sits on its link path.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceRole {
    /// The endpoint the path was resolved for.
    Endpoint,
    /// A bridge strictly between endpoint and root port.
    Bridge,
    /// The root port.
    RootPort,
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceRole::Endpoint => "endpoint",
            DeviceRole::Bridge => "bridge",
            DeviceRole::RootPort => "root port",
        })
    }
}

/// The role of the device at `index` within `path`. A single-device path is
/// its own root port but is reported as the endpoint.
pub(crate) fn role_of(path: &LinkPath, index: usize) -> DeviceRole {
    if index == 0 {
        DeviceRole::Endpoint
    } else if index == path.len() - 1 {
        DeviceRole::RootPort
    } else {
        DeviceRole::Bridge
    }
}

/// What happened to one device during an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The register was written (and, for strict operations, verified).
    Applied,
    /// The device already carried the requested value; nothing was written.
    AlreadyCorrect,
    /// The device is not in scope for this operation. Does not affect the
    /// overall result.
    Excluded {
        /// Why the device is out of scope.
        reason: String,
    },
    /// The device cannot take the requested change.
    Skipped {
        /// Why the change is not possible.
        reason: String,
    },
    /// The access failed.
    Failed {
        /// What went wrong.
        reason: String,
    },
}

/// One device's result within a [`LinkReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOutcome {
    /// The device.
    pub bdf: Bdf,
    /// Its position on the path.
    pub role: DeviceRole,
    /// Raw register value before the operation, where one was read.
    pub prior: Option<u32>,
    /// Raw register value after a write, where one was issued.
    pub updated: Option<u32>,
    /// What happened.
    pub outcome: Outcome,
}

impl DeviceOutcome {
    pub(crate) fn applied(bdf: Bdf, role: DeviceRole, prior: u32, updated: u32) -> Self {
        Self {
            bdf,
            role,
            prior: Some(prior),
            updated: Some(updated),
            outcome: Outcome::Applied,
        }
    }

    pub(crate) fn already_correct(bdf: Bdf, role: DeviceRole, prior: u32) -> Self {
        Self {
            bdf,
            role,
            prior: Some(prior),
            updated: None,
            outcome: Outcome::AlreadyCorrect,
        }
    }

    pub(crate) fn excluded(bdf: Bdf, role: DeviceRole, reason: impl Into<String>) -> Self {
        Self {
            bdf,
            role,
            prior: None,
            updated: None,
            outcome: Outcome::Excluded {
                reason: reason.into(),
            },
        }
    }

    pub(crate) fn skipped(
        bdf: Bdf,
        role: DeviceRole,
        prior: Option<u32>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            bdf,
            role,
            prior,
            updated: None,
            outcome: Outcome::Skipped {
                reason: reason.into(),
            },
        }
    }

    pub(crate) fn failed(
        bdf: Bdf,
        role: DeviceRole,
        prior: Option<u32>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            bdf,
            role,
            prior,
            updated: None,
            outcome: Outcome::Failed {
                reason: reason.into(),
            },
        }
    }
}

/// The aggregated result of one operation against one endpoint's link path,
/// devices in path order (endpoint first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReport {
    /// The endpoint the operation targeted.
    pub endpoint: Bdf,
    /// Short human-readable name of the operation.
    pub operation: &'static str,
    /// Per-device outcomes, path order.
    pub devices: Vec<DeviceOutcome>,
    /// A path-level failure that prevented (or cut short) the operation.
    pub failure: Option<String>,
}

impl LinkReport {
    pub(crate) fn new(endpoint: Bdf, operation: &'static str) -> Self {
        Self {
            endpoint,
            operation,
            devices: Vec::new(),
            failure: None,
        }
    }

    pub(crate) fn push(&mut self, outcome: DeviceOutcome) {
        self.devices.push(outcome);
    }

    /// Whether the operation fully took effect: no path-level failure, and no
    /// in-scope device failed or had to be skipped.
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
            && self.devices.iter().all(|d| {
                matches!(
                    d.outcome,
                    Outcome::Applied | Outcome::AlreadyCorrect | Outcome::Excluded { .. }
                )
            })
    }

    /// Whether any write was issued at all.
    pub fn changed_anything(&self) -> bool {
        self.devices
            .iter()
            .any(|d| matches!(d.outcome, Outcome::Applied))
    }
}
