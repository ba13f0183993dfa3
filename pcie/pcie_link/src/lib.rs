// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Link-wide tuning operations.
//!
//! Each operation takes a resolved [`LinkPath`](pcie_topology::LinkPath) and a
//! [`ConfigAccess`](pcie_cfg::ConfigAccess) implementation and applies one
//! parameter change across the devices its scope covers, producing a
//! [`LinkReport`] with one outcome per device.
//!
//! Two write disciplines exist:
//!
//! - **Strict** (Max Payload Size): the value must hold link-wide, so the
//!   request is validated against the minimum capability of every
//!   PCIe-capable device before anything is written, every write is read back
//!   and verified, and a failure aborts the remaining writes. Nothing is ever
//!   rolled back; partial application is the reported failure mode.
//! - **Best-effort** (everything else): each in-scope device is attempted
//!   independently and failures do not stop the rest.
//!
//! All operations are idempotent: a device already carrying the requested
//! value is left untouched and reported as such.

#![forbid(unsafe_code)]

mod ops;
mod report;
#[cfg(test)]
mod test_helpers;

pub use ops::enable_extended_tag;
pub use ops::set_acs;
pub use ops::set_completion_timeout_disable;
pub use ops::set_completion_timeout_range;
pub use ops::set_max_payload_size;
pub use ops::set_max_read_request_size;
pub use report::DeviceOutcome;
pub use report::DeviceRole;
pub use report::LinkReport;
pub use report::Outcome;
