// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Privileged config-space register access.
//!
//! [`ConfigAccess`] is the single seam through which the rest of the tool
//! touches hardware. The production implementation, [`SetpciAccess`], shells
//! out to `setpci` (via `sudo`) one register at a time; tests substitute an
//! in-memory implementation. Raw values only — decoding register contents is
//! `pcie_spec`'s job.

#![forbid(unsafe_code)]

mod setpci;

pub use setpci::SetpciAccess;

use pcie_spec::regs::offset;
use pcie_topology::Bdf;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The capability structure a register lives in, named the way `setpci`
/// names them.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CapabilityBase {
    /// The PCI Express capability (`CAP_EXP`).
    PciExpress,
    /// The ACS extended capability (`ECAP_ACS`).
    Acs,
}

impl CapabilityBase {
    fn as_str(&self) -> &'static str {
        match self {
            CapabilityBase::PciExpress => "CAP_EXP",
            CapabilityBase::Acs => "ECAP_ACS",
        }
    }
}

/// Access width of a single register operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessWidth {
    /// 8-bit access (`.b`).
    Byte,
    /// 16-bit access (`.w`).
    Word,
    /// 32-bit access (`.l`).
    Dword,
}

impl AccessWidth {
    fn suffix(&self) -> char {
        match self {
            AccessWidth::Byte => 'b',
            AccessWidth::Word => 'w',
            AccessWidth::Dword => 'l',
        }
    }

    /// Largest value representable at this width.
    pub fn max_value(&self) -> u32 {
        match self {
            AccessWidth::Byte => 0xff,
            AccessWidth::Word => 0xffff,
            AccessWidth::Dword => 0xffff_ffff,
        }
    }

    fn hex_digits(&self) -> usize {
        match self {
            AccessWidth::Byte => 2,
            AccessWidth::Word => 4,
            AccessWidth::Dword => 8,
        }
    }
}

/// A single addressable register: capability base, byte offset, width.
///
/// Renders in `setpci` syntax, e.g. `CAP_EXP+8.w`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RegisterSpec {
    /// Owning capability structure.
    pub base: CapabilityBase,
    /// Byte offset from the capability base.
    pub offset: u16,
    /// Access width.
    pub width: AccessWidth,
}

impl RegisterSpec {
    /// PCI Express Capabilities register.
    pub const PCIE_CAPS: Self = Self::cap_exp(offset::PCIE_CAPS, AccessWidth::Word);
    /// Device Capabilities register.
    pub const DEVICE_CAPS: Self = Self::cap_exp(offset::DEVICE_CAPS, AccessWidth::Dword);
    /// Device Control register.
    pub const DEVICE_CONTROL: Self = Self::cap_exp(offset::DEVICE_CONTROL, AccessWidth::Word);
    /// Link Capabilities register.
    pub const LINK_CAPS: Self = Self::cap_exp(offset::LINK_CAPS, AccessWidth::Dword);
    /// Link Control register.
    pub const LINK_CONTROL: Self = Self::cap_exp(offset::LINK_CONTROL, AccessWidth::Word);
    /// Link Status register.
    pub const LINK_STATUS: Self = Self::cap_exp(offset::LINK_STATUS, AccessWidth::Word);
    /// Device Capabilities 2 register.
    pub const DEVICE_CAPS_2: Self = Self::cap_exp(offset::DEVICE_CAPS_2, AccessWidth::Dword);
    /// Device Control 2 register.
    pub const DEVICE_CONTROL_2: Self = Self::cap_exp(offset::DEVICE_CONTROL_2, AccessWidth::Word);
    /// ACS Control register (low byte).
    pub const ACS_CONTROL: Self = Self {
        base: CapabilityBase::Acs,
        offset: offset::ACS_CONTROL,
        width: AccessWidth::Byte,
    };

    const fn cap_exp(offset: u16, width: AccessWidth) -> Self {
        Self {
            base: CapabilityBase::PciExpress,
            offset,
            width,
        }
    }
}

impl fmt::Display for RegisterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}+{:x}.{}",
            self.base.as_str(),
            self.offset,
            self.width.suffix()
        )
    }
}

/// A failed register access.
#[derive(Debug, Error)]
pub enum AccessError {
    /// A required external tool is not installed. Fatal for the whole run,
    /// not just one device.
    #[error("`{0}` not found; install pciutils and ensure sudo is available")]
    ToolMissing(String),
    /// The access did not complete within the deadline.
    #[error("access to {reg} on {bdf} timed out after {timeout:?}")]
    Timeout {
        /// Device being accessed.
        bdf: Bdf,
        /// Register being accessed.
        reg: RegisterSpec,
        /// The deadline that expired.
        timeout: Duration,
    },
    /// Insufficient privileges.
    #[error("access to {reg} on {bdf} not permitted, run as root")]
    NotPermitted {
        /// Device being accessed.
        bdf: Bdf,
        /// Register being accessed.
        reg: RegisterSpec,
    },
    /// The kernel or device refused the access because the device is busy.
    #[error("device {bdf} is busy")]
    DeviceBusy {
        /// Device being accessed.
        bdf: Bdf,
    },
    /// The access tool exited unsuccessfully. This is also how a missing
    /// capability shows up: `setpci` fails when asked for `ECAP_ACS` on a
    /// device without ACS.
    #[error("access to {reg} on {bdf} failed: {stderr}")]
    Rejected {
        /// Device being accessed.
        bdf: Bdf,
        /// Register being accessed.
        reg: RegisterSpec,
        /// Trimmed stderr of the tool.
        stderr: String,
    },
    /// The tool succeeded but printed something that is not a hex value.
    #[error("unparsable output reading {reg} on {bdf}: {output:?}")]
    UnparsableOutput {
        /// Device being accessed.
        bdf: Bdf,
        /// Register being accessed.
        reg: RegisterSpec,
        /// What the tool printed.
        output: String,
    },
    /// The value to write does not fit the register width.
    #[error("value {value:#x} does not fit {reg} on {bdf}")]
    ValueTooWide {
        /// Device being accessed.
        bdf: Bdf,
        /// Register being accessed.
        reg: RegisterSpec,
        /// The oversized value.
        value: u32,
    },
}

impl AccessError {
    /// Whether this failure dooms the entire run rather than one device.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AccessError::ToolMissing(_))
    }
}

/// Raw register access to a PCI function's config space.
///
/// No caching and no retry; every call is one access against the device.
pub trait ConfigAccess {
    /// Reads the register, returning its raw value zero-extended to 32 bits.
    fn read(&self, bdf: Bdf, reg: RegisterSpec) -> Result<u32, AccessError>;

    /// Writes the register.
    fn write(&self, bdf: Bdf, reg: RegisterSpec, value: u32) -> Result<(), AccessError>;
}
