// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Semantic codecs for the tunable link parameters.

use crate::regs::DeviceCapabilities2;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// ACS Control value that turns on the isolation feature set (source
/// validation, request/completion redirect, upstream forwarding).
pub const ACS_ENABLE: u8 = 0x1d;
/// ACS Control value with every feature off.
pub const ACS_DISABLE: u8 = 0x00;

/// Whether a raw PCI Express Capabilities register read indicates the
/// capability structure is actually implemented.
pub fn has_pcie_capability(pcie_caps: u16) -> bool {
    pcie_caps != 0
}

/// Rejected field encodings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    /// Payload/read-request code outside 0..=5.
    #[error("invalid payload size code {0}, expected 0..=5 (128..=4096 bytes)")]
    InvalidPayloadCode(u8),
    /// Unknown completion timeout range name.
    #[error("unknown completion timeout range `{0}`, expected one of Default, A_1, A_2, B_1, B_2, C_1, C_2, D_1, D_2")]
    UnknownTimeoutRange(String),
    /// 4-bit completion timeout code with no architected meaning.
    #[error("reserved completion timeout code {0:#06b}")]
    ReservedTimeoutCode(u8),
}

/// A 3-bit payload size code, shared by Max Payload Size and Max Read Request
/// Size: code `n` means `128 << n` bytes. Codes 6 and 7 are reserved.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PayloadSize(u8);

impl PayloadSize {
    /// Largest architected code (4096 bytes).
    pub const MAX_CODE: u8 = 5;

    /// Validates and wraps a raw 3-bit code.
    pub fn from_code(code: u8) -> Result<Self, FieldError> {
        if code > Self::MAX_CODE {
            return Err(FieldError::InvalidPayloadCode(code));
        }
        Ok(Self(code))
    }

    /// The raw register code.
    pub fn code(&self) -> u8 {
        self.0
    }

    /// The size in bytes.
    pub fn bytes(&self) -> u32 {
        128 << self.0
    }
}

impl fmt::Display for PayloadSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.bytes())
    }
}

/// One of the four completion timeout main ranges advertised in Device
/// Capabilities 2.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimeoutRangeGroup {
    /// Main range A (50us to 10ms).
    A,
    /// Main range B (16ms to 210ms).
    B,
    /// Main range C (260ms to 3.5s).
    C,
    /// Main range D (4s to 64s).
    D,
}

impl TimeoutRangeGroup {
    /// The device's support bit for this main range in
    /// `completion_timeout_ranges_supported`.
    pub fn support_bit(&self) -> u8 {
        match self {
            TimeoutRangeGroup::A => 1 << 0,
            TimeoutRangeGroup::B => 1 << 1,
            TimeoutRangeGroup::C => 1 << 2,
            TimeoutRangeGroup::D => 1 << 3,
        }
    }

    /// Range letter for messages.
    pub fn letter(&self) -> char {
        match self {
            TimeoutRangeGroup::A => 'A',
            TimeoutRangeGroup::B => 'B',
            TimeoutRangeGroup::C => 'C',
            TimeoutRangeGroup::D => 'D',
        }
    }
}

/// A programmable completion timeout range, the 4-bit value of
/// `DeviceControl2::completion_timeout_value`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompletionTimeoutRange {
    /// 50us to 50ms (the power-on default).
    Default,
    /// 50us to 100us.
    A1,
    /// 1ms to 10ms.
    A2,
    /// 16ms to 55ms.
    B1,
    /// 65ms to 210ms.
    B2,
    /// 260ms to 900ms.
    C1,
    /// 1s to 3.5s.
    C2,
    /// 4s to 13s.
    D1,
    /// 17s to 64s.
    D2,
}

impl CompletionTimeoutRange {
    /// Every range, in register code order.
    pub const ALL: [Self; 9] = [
        Self::Default,
        Self::A1,
        Self::A2,
        Self::B1,
        Self::B2,
        Self::C1,
        Self::C2,
        Self::D1,
        Self::D2,
    ];

    /// The 4-bit register encoding.
    pub fn code(&self) -> u8 {
        match self {
            Self::Default => 0b0000,
            Self::A1 => 0b0001,
            Self::A2 => 0b0010,
            Self::B1 => 0b0101,
            Self::B2 => 0b0110,
            Self::C1 => 0b1001,
            Self::C2 => 0b1010,
            Self::D1 => 0b1101,
            Self::D2 => 0b1110,
        }
    }

    /// Decodes a 4-bit register value, rejecting reserved encodings.
    pub fn from_code(code: u8) -> Result<Self, FieldError> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.code() == code)
            .ok_or(FieldError::ReservedTimeoutCode(code))
    }

    /// The main range this value belongs to. `Default` belongs to none and is
    /// always accepted.
    pub fn group(&self) -> Option<TimeoutRangeGroup> {
        match self {
            Self::Default => None,
            Self::A1 | Self::A2 => Some(TimeoutRangeGroup::A),
            Self::B1 | Self::B2 => Some(TimeoutRangeGroup::B),
            Self::C1 | Self::C2 => Some(TimeoutRangeGroup::C),
            Self::D1 | Self::D2 => Some(TimeoutRangeGroup::D),
        }
    }

    /// Whether a device advertising `caps2` can be programmed to this range.
    /// Devices with an all-zero support mask run at a fixed default range, so
    /// only `Default` passes for them.
    pub fn supported_by(&self, caps2: DeviceCapabilities2) -> bool {
        match self.group() {
            None => true,
            Some(group) => {
                caps2.completion_timeout_ranges_supported() & group.support_bit() != 0
            }
        }
    }

    /// The time window covered by this range.
    pub fn window(&self) -> &'static str {
        match self {
            Self::Default => "50us to 50ms",
            Self::A1 => "50us to 100us",
            Self::A2 => "1ms to 10ms",
            Self::B1 => "16ms to 55ms",
            Self::B2 => "65ms to 210ms",
            Self::C1 => "260ms to 900ms",
            Self::C2 => "1s to 3.5s",
            Self::D1 => "4s to 13s",
            Self::D2 => "17s to 64s",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::A1 => "A_1",
            Self::A2 => "A_2",
            Self::B1 => "B_1",
            Self::B2 => "B_2",
            Self::C1 => "C_1",
            Self::C2 => "C_2",
            Self::D1 => "D_1",
            Self::D2 => "D_2",
        }
    }
}

impl fmt::Display for CompletionTimeoutRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.window())
    }
}

impl FromStr for CompletionTimeoutRange {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| FieldError::UnknownTimeoutRange(s.to_owned()))
    }
}
