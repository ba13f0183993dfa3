// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The `trace` diagnostic view: decoded link parameters for every
//! accelerator, plus the platform state that commonly affects them.

use crate::discover::Accelerator;
use pcie_cfg::AccessError;
use pcie_cfg::ConfigAccess;
use pcie_cfg::RegisterSpec;
use pcie_spec::fields::CompletionTimeoutRange;
use pcie_spec::regs;
use pcie_spec::regs::DeviceCapabilities;
use pcie_spec::regs::DeviceCapabilities2;
use pcie_spec::regs::DeviceControl;
use pcie_spec::regs::DeviceControl2;
use pcie_spec::regs::LinkCapabilities;
use pcie_spec::regs::LinkControl;
use pcie_spec::regs::LinkStatus;
use pcie_topology::Bdf;
use pcie_topology::LinkPath;
use pcie_topology::PciHierarchy;
use pcie_topology::path_to_root;

/// Prints the diagnostic view for every accelerator. Returns the number of
/// endpoints whose state could not be fully read.
pub fn run(
    access: &impl ConfigAccess,
    hierarchy: &impl PciHierarchy,
    accelerators: &[Accelerator],
) -> anyhow::Result<usize> {
    print_iommu_status();

    let mut failures = 0;
    for accel in accelerators {
        println!("\n{}", accel.description);
        let path = match path_to_root(hierarchy, accel.bdf) {
            Ok(path) => path,
            Err(err) => {
                println!("  {err}");
                failures += 1;
                continue;
            }
        };
        let chain = path
            .devices()
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(" -> ");
        println!("  path: {chain}");
        if !trace_path(access, &path)? {
            failures += 1;
        }
    }
    Ok(failures)
}

fn print_iommu_status() {
    // A populated /sys/class/iommu means the IOMMU is active. AI servers
    // typically want it disabled for peer-to-peer throughput.
    let enabled = fs_err::read_dir("/sys/class/iommu")
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false);
    if enabled {
        println!("IOMMU/SMMU: enabled (AI servers typically require it to be disabled)");
    } else {
        println!("IOMMU/SMMU: disabled");
    }
}

/// Prints every device of one path. Returns false if any register that
/// should be present could not be read. Only a fatal error (missing tool)
/// becomes `Err`.
fn trace_path(access: &impl ConfigAccess, path: &LinkPath) -> Result<bool, anyhow::Error> {
    let mut complete = true;
    let last = path.len() - 1;
    for (i, bdf) in path.devices().iter().copied().enumerate() {
        if i == 0 || i == last {
            let label = if i == 0 { "endpoint" } else { "root port" };
            println!("  {label} {bdf}:");
            complete &= trace_port(access, bdf)?;
        } else {
            println!("  bridge {bdf}:");
            trace_bridge_acs(access, bdf)?;
        }
    }
    Ok(complete)
}

/// Reads a register, demoting per-device failures to `None`.
fn try_read(
    access: &impl ConfigAccess,
    bdf: Bdf,
    reg: RegisterSpec,
) -> Result<Option<u32>, AccessError> {
    match access.read(bdf, reg) {
        Ok(v) => Ok(Some(v)),
        Err(err) if err.is_fatal() => Err(err),
        Err(_) => Ok(None),
    }
}

fn trace_port(access: &impl ConfigAccess, bdf: Bdf) -> Result<bool, anyhow::Error> {
    let mut complete = true;

    match (
        try_read(access, bdf, RegisterSpec::LINK_CAPS)?,
        try_read(access, bdf, RegisterSpec::LINK_STATUS)?,
    ) {
        (Some(caps), Some(status)) => {
            let caps = LinkCapabilities::from_bits(caps);
            let status = LinkStatus::from_bits(status as u16);
            println!(
                "    link: {} x{} (capable {} x{})",
                regs::link_speed_str(status.current_link_speed()),
                status.negotiated_link_width(),
                regs::link_speed_str(caps.max_link_speed()),
                caps.max_link_width(),
            );
        }
        _ => {
            println!("    link: unavailable");
            complete = false;
        }
    }

    match (
        try_read(access, bdf, RegisterSpec::DEVICE_CAPS)?,
        try_read(access, bdf, RegisterSpec::DEVICE_CONTROL)?,
    ) {
        (Some(caps), Some(ctl)) => {
            let caps = DeviceCapabilities::from_bits(caps);
            let ctl = DeviceControl::from_bits(ctl as u16);
            println!(
                "    max payload: {} bytes (capable {} bytes)",
                128u32 << ctl.max_payload_size(),
                128u32 << caps.max_payload_size_supported(),
            );
            println!(
                "    max read request: {} bytes",
                128u32 << ctl.max_read_request_size()
            );
            println!(
                "    extended tag: {}",
                if ctl.extended_tag_enable() { "enabled" } else { "disabled" }
            );
        }
        _ => {
            println!("    device control: unavailable");
            complete = false;
        }
    }

    match (
        try_read(access, bdf, RegisterSpec::DEVICE_CAPS_2)?,
        try_read(access, bdf, RegisterSpec::DEVICE_CONTROL_2)?,
    ) {
        (Some(caps2), Some(ctl2)) => {
            let caps2 = DeviceCapabilities2::from_bits(caps2);
            let ctl2 = DeviceControl2::from_bits(ctl2 as u16);
            let value = match CompletionTimeoutRange::from_code(ctl2.completion_timeout_value()) {
                Ok(range) => range.to_string(),
                Err(_) => format!("reserved code {:#06b}", ctl2.completion_timeout_value()),
            };
            println!(
                "    completion timeout: {value}, supported mask {:#06b}, disable {}{}",
                caps2.completion_timeout_ranges_supported(),
                if caps2.completion_timeout_disable_supported() {
                    "supported"
                } else {
                    "not supported"
                },
                if ctl2.completion_timeout_disable() {
                    ", currently disabled"
                } else {
                    ""
                },
            );
        }
        _ => {
            println!("    completion timeout: unavailable");
            complete = false;
        }
    }

    match try_read(access, bdf, RegisterSpec::LINK_CONTROL)? {
        Some(ctl) => {
            let ctl = LinkControl::from_bits(ctl as u16);
            println!("    aspm: {}", regs::aspm_str(ctl.aspm_control()));
        }
        None => {
            println!("    aspm: unavailable");
            complete = false;
        }
    }

    Ok(complete)
}

fn trace_bridge_acs(access: &impl ConfigAccess, bdf: Bdf) -> Result<(), anyhow::Error> {
    // Missing ACS is a normal condition for a bridge, not an error.
    match try_read(access, bdf, RegisterSpec::ACS_CONTROL)? {
        Some(ctl) => {
            let state = if ctl == 0 { "disabled" } else { "enabled" };
            println!("    acs: {ctl:#04x} ({state})");
        }
        None => println!("    acs: not implemented"),
    }
    Ok(())
}
