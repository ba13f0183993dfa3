// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The segment:bus:device.function address of a PCI function.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A fully-qualified PCI address, e.g. `0000:41:00.0`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bdf {
    /// PCI segment (domain) number.
    pub segment: u16,
    /// Bus number.
    pub bus: u8,
    /// Device number.
    pub device: u8,
    /// Function number.
    pub function: u8,
}

/// The input was not a `dddd:bb:dd.f` PCI address.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid PCI address `{0}`, expected dddd:bb:dd.f")]
pub struct ParseBdfError(pub String);

impl FromStr for Bdf {
    type Err = ParseBdfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseBdfError(s.to_owned());

        // Fixed shape: 4 hex digits, ':', 2 hex, ':', 2 hex, '.', 1 hex.
        let bytes = s.as_bytes();
        if bytes.len() != 12 || bytes[4] != b':' || bytes[7] != b':' || bytes[10] != b'.' {
            return Err(err());
        }
        let hex = |range: std::ops::Range<usize>| {
            let part = &s[range];
            if !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(err());
            }
            u16::from_str_radix(part, 16).map_err(|_| err())
        };
        Ok(Bdf {
            segment: hex(0..4)?,
            bus: hex(5..7)? as u8,
            device: hex(8..10)? as u8,
            function: hex(11..12)? as u8,
        })
    }
}

impl fmt::Display for Bdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.segment, self.bus, self.device, self.function
        )
    }
}
