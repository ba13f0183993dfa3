// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bit-level layouts of the tuned registers.
//!
//! Offsets are relative to the start of the owning capability structure, not
//! to the start of config space; the capability base is located by the access
//! layer.

/// Byte offsets into the PCI Express capability structure.
pub mod offset {
    /// PCI Express Capabilities register (word).
    pub const PCIE_CAPS: u16 = 0x02;
    /// Device Capabilities register (dword).
    pub const DEVICE_CAPS: u16 = 0x04;
    /// Device Control register (word).
    pub const DEVICE_CONTROL: u16 = 0x08;
    /// Link Capabilities register (dword).
    pub const LINK_CAPS: u16 = 0x0c;
    /// Link Control register (word).
    pub const LINK_CONTROL: u16 = 0x10;
    /// Link Status register (word).
    pub const LINK_STATUS: u16 = 0x12;
    /// Device Capabilities 2 register (dword).
    pub const DEVICE_CAPS_2: u16 = 0x24;
    /// Device Control 2 register (word).
    pub const DEVICE_CONTROL_2: u16 = 0x28;

    /// ACS Control register (byte), relative to the ACS extended capability.
    pub const ACS_CONTROL: u16 = 0x06;
}

use bitfield_struct::bitfield;

/// PCI Express Capabilities register. A read of all zeros means the device
/// function does not implement the PCI Express capability at all.
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct PciExpressCapabilities {
    #[bits(4)]
    pub capability_version: u8,
    #[bits(4)]
    pub device_port_type: u8,
    pub slot_implemented: bool,
    #[bits(5)]
    pub interrupt_message_number: u8,
    #[bits(2)]
    _rsvd: u8,
}

/// Device Capabilities register.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct DeviceCapabilities {
    #[bits(3)]
    pub max_payload_size_supported: u8,
    #[bits(2)]
    pub phantom_functions_supported: u8,
    pub extended_tag_supported: bool,
    #[bits(3)]
    pub endpoint_l0s_acceptable_latency: u8,
    #[bits(3)]
    pub endpoint_l1_acceptable_latency: u8,
    #[bits(3)]
    _rsvd: u8,
    pub role_based_error_reporting: bool,
    #[bits(2)]
    _rsvd2: u8,
    #[bits(8)]
    pub captured_slot_power_limit_value: u8,
    #[bits(2)]
    pub captured_slot_power_limit_scale: u8,
    pub function_level_reset_capable: bool,
    #[bits(3)]
    _rsvd3: u8,
}

/// Device Control register.
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct DeviceControl {
    pub correctable_error_reporting_enable: bool,
    pub non_fatal_error_reporting_enable: bool,
    pub fatal_error_reporting_enable: bool,
    pub unsupported_request_reporting_enable: bool,
    pub enable_relaxed_ordering: bool,
    #[bits(3)]
    pub max_payload_size: u8,
    pub extended_tag_enable: bool,
    pub phantom_functions_enable: bool,
    pub aux_power_pm_enable: bool,
    pub enable_no_snoop: bool,
    #[bits(3)]
    pub max_read_request_size: u8,
    pub initiate_function_level_reset: bool,
}

/// Device Capabilities 2 register.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct DeviceCapabilities2 {
    /// Bitmask of supported completion timeout main ranges: bit 0 = range A,
    /// bit 1 = B, bit 2 = C, bit 3 = D. Zero means the timeout is fixed at
    /// the default range and not programmable.
    #[bits(4)]
    pub completion_timeout_ranges_supported: u8,
    pub completion_timeout_disable_supported: bool,
    pub ari_forwarding_supported: bool,
    #[bits(26)]
    _rsvd: u32,
}

/// Device Control 2 register.
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct DeviceControl2 {
    #[bits(4)]
    pub completion_timeout_value: u8,
    pub completion_timeout_disable: bool,
    pub ari_forwarding_enable: bool,
    #[bits(10)]
    _rsvd: u16,
}

/// Link Capabilities register.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct LinkCapabilities {
    #[bits(4)]
    pub max_link_speed: u8,
    #[bits(6)]
    pub max_link_width: u8,
    #[bits(2)]
    pub aspm_support: u8,
    #[bits(3)]
    pub l0s_exit_latency: u8,
    #[bits(3)]
    pub l1_exit_latency: u8,
    #[bits(6)]
    _rsvd: u8,
    #[bits(8)]
    pub port_number: u8,
}

/// Link Control register.
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct LinkControl {
    #[bits(2)]
    pub aspm_control: u8,
    #[bits(14)]
    _rsvd: u16,
}

/// Link Status register.
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct LinkStatus {
    #[bits(4)]
    pub current_link_speed: u8,
    #[bits(6)]
    pub negotiated_link_width: u8,
    #[bits(6)]
    _rsvd: u8,
}

/// ACS Control register (low byte).
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct AcsControl {
    pub source_validation_enable: bool,
    pub translation_blocking_enable: bool,
    pub p2p_request_redirect_enable: bool,
    pub p2p_completion_redirect_enable: bool,
    pub upstream_forwarding_enable: bool,
    pub p2p_egress_control_enable: bool,
    pub direct_translated_p2p_enable: bool,
    _rsvd: bool,
}

/// Human-readable form of a 4-bit link speed code from Link Capabilities or
/// Link Status.
pub fn link_speed_str(code: u8) -> &'static str {
    match code {
        1 => "2.5 GT/s",
        2 => "5 GT/s",
        3 => "8 GT/s",
        4 => "16 GT/s",
        5 => "32 GT/s",
        6 => "64 GT/s",
        _ => "unknown",
    }
}

/// Human-readable form of a 2-bit ASPM control value from Link Control.
pub fn aspm_str(code: u8) -> &'static str {
    match code {
        0 => "Disabled",
        1 => "L0s",
        2 => "L1",
        3 => "L0s+L1",
        _ => "unknown",
    }
}
