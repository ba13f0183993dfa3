// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The tuning operations themselves.

use crate::report::DeviceOutcome;
use crate::report::DeviceRole;
use crate::report::LinkReport;
use crate::report::role_of;
use pcie_cfg::AccessError;
use pcie_cfg::ConfigAccess;
use pcie_cfg::RegisterSpec;
use pcie_spec::fields;
use pcie_spec::fields::CompletionTimeoutRange;
use pcie_spec::fields::PayloadSize;
use pcie_spec::regs::DeviceCapabilities;
use pcie_spec::regs::DeviceCapabilities2;
use pcie_spec::regs::DeviceControl;
use pcie_spec::regs::DeviceControl2;
use pcie_topology::Bdf;
use pcie_topology::LinkPath;

/// Splits fatal access errors (which abort the whole run) from per-device
/// ones (which become that device's outcome).
fn guard<T>(res: Result<T, AccessError>) -> Result<Result<T, AccessError>, AccessError> {
    match res {
        Ok(v) => Ok(Ok(v)),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => Ok(Err(err)),
    }
}

/// The endpoint and root port of a path, deduplicated for the degenerate
/// single-device path.
fn path_ends(path: &LinkPath) -> Vec<(Bdf, DeviceRole)> {
    let mut ends = vec![(path.endpoint(), DeviceRole::Endpoint)];
    if path.len() > 1 {
        ends.push((path.root_port(), DeviceRole::RootPort));
    }
    ends
}

/// Sets Extended Tag Enable (Device Control bit 8) on every device of the
/// path. Best-effort: a failed device does not stop the others.
pub fn enable_extended_tag(
    access: &impl ConfigAccess,
    path: &LinkPath,
) -> Result<LinkReport, AccessError> {
    let mut report = LinkReport::new(path.endpoint(), "enable extended tag");
    for (i, bdf) in path.devices().iter().copied().enumerate() {
        let role = role_of(path, i);
        let prior = match guard(access.read(bdf, RegisterSpec::DEVICE_CONTROL))? {
            Ok(v) => v,
            Err(err) => {
                report.push(DeviceOutcome::failed(bdf, role, None, err.to_string()));
                continue;
            }
        };
        let ctl = DeviceControl::from_bits(prior as u16);
        if ctl.extended_tag_enable() {
            report.push(DeviceOutcome::already_correct(bdf, role, prior));
            continue;
        }
        let updated = ctl.with_extended_tag_enable(true).into_bits() as u32;
        match guard(access.write(bdf, RegisterSpec::DEVICE_CONTROL, updated))? {
            Ok(()) => {
                tracing::debug!(device = %bdf, %role, "extended tag enabled");
                report.push(DeviceOutcome::applied(bdf, role, prior, updated));
            }
            Err(err) => {
                report.push(DeviceOutcome::failed(bdf, role, Some(prior), err.to_string()))
            }
        }
    }
    Ok(report)
}

/// Sets Max Payload Size on every PCIe-capable device of the path, under the
/// strict discipline.
///
/// The request is first validated against the smallest Max Payload Size
/// capability on the path; if any device cannot take the requested value,
/// nothing at all is written. Devices without a PCI Express capability
/// structure (host bridges, typically) take no part in either the minimum or
/// the writes. Every write is read back and verified, and the first failure
/// aborts the remaining writes without undoing earlier ones.
pub fn set_max_payload_size(
    access: &impl ConfigAccess,
    path: &LinkPath,
    size: PayloadSize,
) -> Result<LinkReport, AccessError> {
    let mut report = LinkReport::new(path.endpoint(), "set max payload size");

    // Survey pass: per device, either its supported maximum code or the
    // reason it is out of scope.
    let mut survey: Vec<Result<u8, String>> = Vec::with_capacity(path.len());
    for bdf in path.devices().iter().copied() {
        let pcie_caps = match guard(access.read(bdf, RegisterSpec::PCIE_CAPS))? {
            Ok(v) => v,
            Err(err) => {
                survey.push(Err(format!("PCIe capability unreadable: {err}")));
                continue;
            }
        };
        if !fields::has_pcie_capability(pcie_caps as u16) {
            survey.push(Err("no PCIe capability structure".to_owned()));
            continue;
        }
        match guard(access.read(bdf, RegisterSpec::DEVICE_CAPS))? {
            Ok(v) => survey.push(Ok(DeviceCapabilities::from_bits(v).max_payload_size_supported())),
            Err(err) => survey.push(Err(format!("device capabilities unreadable: {err}"))),
        }
    }

    let min = survey.iter().filter_map(|s| s.as_ref().ok()).min().copied();
    tracing::debug!(endpoint = %path.endpoint(), requested = size.code(), link_min = ?min, "max payload size survey");
    let Some(min_code) = min else {
        for (i, (bdf, result)) in path.devices().iter().zip(&survey).enumerate() {
            let reason = result.as_ref().err().map(String::as_str).unwrap_or_default();
            report.push(DeviceOutcome::excluded(*bdf, role_of(path, i), reason));
        }
        report.failure = Some("no PCIe-capable devices found on path".to_owned());
        return Ok(report);
    };

    if size.code() > min_code {
        // Skip-before-write: one undersized device blocks the whole path.
        let limit = format!(
            "link-wide maximum of {} bytes (code {min_code})",
            128u32 << min_code
        );
        for (i, (bdf, result)) in path.devices().iter().zip(&survey).enumerate() {
            let role = role_of(path, i);
            match result {
                Ok(_) => report.push(DeviceOutcome::skipped(*bdf, role, None, limit.clone())),
                Err(reason) => report.push(DeviceOutcome::excluded(*bdf, role, reason.clone())),
            }
        }
        report.failure = Some(format!("requested max payload size {size} exceeds the {limit}"));
        return Ok(report);
    }

    // Write pass, endpoint first. A failure aborts the rest of the path but
    // leaves earlier writes in place.
    let mut aborted = false;
    for (i, (bdf, result)) in path.devices().iter().copied().zip(&survey).enumerate() {
        let role = role_of(path, i);
        if let Err(reason) = result {
            report.push(DeviceOutcome::excluded(bdf, role, reason.clone()));
            continue;
        }
        if aborted {
            report.push(DeviceOutcome::excluded(
                bdf,
                role,
                "not attempted after earlier failure",
            ));
            continue;
        }

        let prior = match guard(access.read(bdf, RegisterSpec::DEVICE_CONTROL))? {
            Ok(v) => v,
            Err(err) => {
                report.push(DeviceOutcome::failed(bdf, role, None, err.to_string()));
                aborted = true;
                continue;
            }
        };
        let ctl = DeviceControl::from_bits(prior as u16);
        if ctl.max_payload_size() == size.code() {
            report.push(DeviceOutcome::already_correct(bdf, role, prior));
            continue;
        }
        let updated = ctl.with_max_payload_size(size.code()).into_bits() as u32;
        if let Err(err) = guard(access.write(bdf, RegisterSpec::DEVICE_CONTROL, updated))? {
            report.push(DeviceOutcome::failed(bdf, role, Some(prior), err.to_string()));
            aborted = true;
            continue;
        }
        // Read-back verification, required by the strict discipline.
        match guard(access.read(bdf, RegisterSpec::DEVICE_CONTROL))? {
            Ok(verify) if DeviceControl::from_bits(verify as u16).max_payload_size() == size.code() => {
                report.push(DeviceOutcome::applied(bdf, role, prior, verify));
            }
            Ok(verify) => {
                report.push(DeviceOutcome::failed(
                    bdf,
                    role,
                    Some(prior),
                    format!("read-back mismatch: wrote {updated:#x}, read {verify:#x}"),
                ));
                aborted = true;
            }
            Err(err) => {
                report.push(DeviceOutcome::failed(
                    bdf,
                    role,
                    Some(prior),
                    format!("read-back failed: {err}"),
                ));
                aborted = true;
            }
        }
    }
    Ok(report)
}

/// Sets Max Read Request Size (Device Control bits 14:12) on the endpoint
/// only; bridges do not originate reads worth tuning.
pub fn set_max_read_request_size(
    access: &impl ConfigAccess,
    path: &LinkPath,
    size: PayloadSize,
) -> Result<LinkReport, AccessError> {
    let bdf = path.endpoint();
    let mut report = LinkReport::new(bdf, "set max read request size");
    let prior = match guard(access.read(bdf, RegisterSpec::DEVICE_CONTROL))? {
        Ok(v) => v,
        Err(err) => {
            report.push(DeviceOutcome::failed(
                bdf,
                DeviceRole::Endpoint,
                None,
                err.to_string(),
            ));
            return Ok(report);
        }
    };
    let ctl = DeviceControl::from_bits(prior as u16);
    if ctl.max_read_request_size() == size.code() {
        report.push(DeviceOutcome::already_correct(bdf, DeviceRole::Endpoint, prior));
        return Ok(report);
    }
    let updated = ctl.with_max_read_request_size(size.code()).into_bits() as u32;
    match guard(access.write(bdf, RegisterSpec::DEVICE_CONTROL, updated))? {
        Ok(()) => report.push(DeviceOutcome::applied(bdf, DeviceRole::Endpoint, prior, updated)),
        Err(err) => report.push(DeviceOutcome::failed(
            bdf,
            DeviceRole::Endpoint,
            Some(prior),
            err.to_string(),
        )),
    }
    Ok(report)
}

/// Sets or clears Completion Timeout Disable (Device Control 2 bit 4) on the
/// endpoint and its root port.
pub fn set_completion_timeout_disable(
    access: &impl ConfigAccess,
    path: &LinkPath,
    disable: bool,
) -> Result<LinkReport, AccessError> {
    let mut report = LinkReport::new(path.endpoint(), "set completion timeout disable");
    for (bdf, role) in path_ends(path) {
        let prior = match guard(access.read(bdf, RegisterSpec::DEVICE_CONTROL_2))? {
            Ok(v) => v,
            Err(err) => {
                report.push(DeviceOutcome::failed(bdf, role, None, err.to_string()));
                continue;
            }
        };
        let ctl2 = DeviceControl2::from_bits(prior as u16);
        if ctl2.completion_timeout_disable() == disable {
            report.push(DeviceOutcome::already_correct(bdf, role, prior));
            continue;
        }
        let updated = ctl2.with_completion_timeout_disable(disable).into_bits() as u32;
        match guard(access.write(bdf, RegisterSpec::DEVICE_CONTROL_2, updated))? {
            Ok(()) => report.push(DeviceOutcome::applied(bdf, role, prior, updated)),
            Err(err) => {
                report.push(DeviceOutcome::failed(bdf, role, Some(prior), err.to_string()))
            }
        }
    }
    Ok(report)
}

/// Programs the Completion Timeout range (Device Control 2 bits 3:0) on the
/// endpoint and its root port.
///
/// A device is skipped when it does not advertise the requested main range in
/// Device Capabilities 2, or while its completion timeout is disabled.
pub fn set_completion_timeout_range(
    access: &impl ConfigAccess,
    path: &LinkPath,
    range: CompletionTimeoutRange,
) -> Result<LinkReport, AccessError> {
    let mut report = LinkReport::new(path.endpoint(), "set completion timeout range");
    for (bdf, role) in path_ends(path) {
        let caps2 = match guard(access.read(bdf, RegisterSpec::DEVICE_CAPS_2))? {
            Ok(v) => DeviceCapabilities2::from_bits(v),
            Err(err) => {
                report.push(DeviceOutcome::failed(bdf, role, None, err.to_string()));
                continue;
            }
        };
        if !range.supported_by(caps2) {
            let reason = match range.group() {
                Some(group) => format!(
                    "main range {} not supported (mask {:#06b})",
                    group.letter(),
                    caps2.completion_timeout_ranges_supported()
                ),
                None => "completion timeout range not programmable".to_owned(),
            };
            report.push(DeviceOutcome::skipped(bdf, role, None, reason));
            continue;
        }

        let prior = match guard(access.read(bdf, RegisterSpec::DEVICE_CONTROL_2))? {
            Ok(v) => v,
            Err(err) => {
                report.push(DeviceOutcome::failed(bdf, role, None, err.to_string()));
                continue;
            }
        };
        let ctl2 = DeviceControl2::from_bits(prior as u16);
        if ctl2.completion_timeout_disable() {
            report.push(DeviceOutcome::skipped(
                bdf,
                role,
                Some(prior),
                "completion timeout is disabled; clear the disable bit first",
            ));
            continue;
        }
        if ctl2.completion_timeout_value() == range.code() {
            report.push(DeviceOutcome::already_correct(bdf, role, prior));
            continue;
        }
        let updated = ctl2.with_completion_timeout_value(range.code()).into_bits() as u32;
        match guard(access.write(bdf, RegisterSpec::DEVICE_CONTROL_2, updated))? {
            Ok(()) => report.push(DeviceOutcome::applied(bdf, role, prior, updated)),
            Err(err) => {
                report.push(DeviceOutcome::failed(bdf, role, Some(prior), err.to_string()))
            }
        }
    }
    Ok(report)
}

/// Enables or disables ACS isolation on the interior bridges of the path.
/// The endpoint and the root port never carry the isolation settings and are
/// reported as excluded; a bridge whose ACS capability cannot be read is
/// treated as not implementing ACS.
pub fn set_acs(
    access: &impl ConfigAccess,
    path: &LinkPath,
    enable: bool,
) -> Result<LinkReport, AccessError> {
    let target = u32::from(if enable {
        fields::ACS_ENABLE
    } else {
        fields::ACS_DISABLE
    });
    let operation = if enable { "enable acs" } else { "disable acs" };
    let mut report = LinkReport::new(path.endpoint(), operation);

    for (i, bdf) in path.devices().iter().copied().enumerate() {
        let role = role_of(path, i);
        if !matches!(role, DeviceRole::Bridge) {
            report.push(DeviceOutcome::excluded(
                bdf,
                role,
                "only interior bridges carry ACS isolation",
            ));
            continue;
        }
        let prior = match guard(access.read(bdf, RegisterSpec::ACS_CONTROL))? {
            Ok(v) => v,
            Err(AccessError::Rejected { .. }) => {
                report.push(DeviceOutcome::skipped(bdf, role, None, "no ACS capability"));
                continue;
            }
            Err(err) => {
                report.push(DeviceOutcome::failed(bdf, role, None, err.to_string()));
                continue;
            }
        };
        if prior == target {
            report.push(DeviceOutcome::already_correct(bdf, role, prior));
            continue;
        }
        match guard(access.write(bdf, RegisterSpec::ACS_CONTROL, target))? {
            Ok(()) => report.push(DeviceOutcome::applied(bdf, role, prior, target)),
            Err(err) => {
                report.push(DeviceOutcome::failed(bdf, role, Some(prior), err.to_string()))
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Outcome;
    use crate::test_helpers::FakeBus;
    use crate::test_helpers::link_path;

    fn bdf(s: &str) -> Bdf {
        s.parse().unwrap()
    }

    fn mps(code: u8) -> PayloadSize {
        PayloadSize::from_code(code).unwrap()
    }

    #[test]
    fn mps_request_above_link_minimum_writes_nothing() {
        // Max codes 5, 2, 4 along the path: the link-wide minimum is 2.
        let mut bus = FakeBus::new();
        bus.add_pcie_device(bdf("0000:41:00.0"), 5, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:40:01.0"), 2, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:00:02.0"), 4, 0, 0, 0);
        let path = link_path(&["0000:41:00.0", "0000:40:01.0", "0000:00:02.0"]);

        let report = set_max_payload_size(&bus, &path, mps(3)).unwrap();
        assert_eq!(bus.write_count(), 0, "no device may be written when one cannot comply");
        assert!(!report.succeeded());
        assert!(
            report.failure.as_deref().unwrap().contains("exceeds"),
            "failure names the link limit: {:?}",
            report.failure
        );
        for d in &report.devices {
            assert!(matches!(d.outcome, Outcome::Skipped { .. }));
        }
    }

    #[test]
    fn mps_within_link_minimum_writes_and_verifies_every_device() {
        let mut bus = FakeBus::new();
        bus.add_pcie_device(bdf("0000:41:00.0"), 5, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:40:01.0"), 2, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:00:02.0"), 4, 0, 0, 0);
        let path = link_path(&["0000:41:00.0", "0000:40:01.0", "0000:00:02.0"]);

        let report = set_max_payload_size(&bus, &path, mps(1)).unwrap();
        assert!(report.succeeded(), "all devices can take code 1: {report:?}");
        assert_eq!(bus.write_count(), 3);
        for d in &report.devices {
            assert_eq!(d.outcome, Outcome::Applied, "device {}", d.bdf);
            let ctl = DeviceControl::from_bits(d.updated.unwrap() as u16);
            assert_eq!(ctl.max_payload_size(), 1, "read-back value carries the new code");
        }
    }

    #[test]
    fn mps_second_invocation_is_idempotent() {
        let mut bus = FakeBus::new();
        bus.add_pcie_device(bdf("0000:41:00.0"), 5, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:00:02.0"), 4, 0, 0, 0);
        let path = link_path(&["0000:41:00.0", "0000:00:02.0"]);

        set_max_payload_size(&bus, &path, mps(2)).unwrap();
        let writes_after_first = bus.write_count();
        let report = set_max_payload_size(&bus, &path, mps(2)).unwrap();
        assert_eq!(bus.write_count(), writes_after_first, "second run must not write");
        assert!(report.succeeded());
        for d in &report.devices {
            assert_eq!(d.outcome, Outcome::AlreadyCorrect);
        }
    }

    #[test]
    fn mps_excludes_devices_without_pcie_capability() {
        let mut bus = FakeBus::new();
        bus.add_pcie_device(bdf("0000:41:00.0"), 3, 0, 0, 0);
        // Present but with a zero PCIe Capabilities register.
        bus.add_bare_device(bdf("0000:00:00.0"));
        let path = link_path(&["0000:41:00.0", "0000:00:00.0"]);

        let report = set_max_payload_size(&bus, &path, mps(3)).unwrap();
        assert!(report.succeeded(), "the bare device must not veto the write: {report:?}");
        assert_eq!(bus.writes_to(bdf("0000:00:00.0")), 0);
        assert_eq!(bus.writes_to(bdf("0000:41:00.0")), 1);
        assert!(matches!(report.devices[1].outcome, Outcome::Excluded { .. }));
    }

    #[test]
    fn mps_with_no_capable_devices_is_an_explicit_failure() {
        let mut bus = FakeBus::new();
        bus.add_bare_device(bdf("0000:41:00.0"));
        bus.add_bare_device(bdf("0000:00:02.0"));
        let path = link_path(&["0000:41:00.0", "0000:00:02.0"]);

        let report = set_max_payload_size(&bus, &path, mps(0)).unwrap();
        assert!(!report.succeeded());
        assert_eq!(
            report.failure.as_deref(),
            Some("no PCIe-capable devices found on path")
        );
        assert_eq!(bus.write_count(), 0);
    }

    #[test]
    fn mps_write_failure_aborts_rest_of_path_without_rollback() {
        let mut bus = FakeBus::new();
        bus.add_pcie_device(bdf("0000:41:00.0"), 5, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:40:01.0"), 5, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:00:02.0"), 5, 0, 0, 0);
        bus.fail_writes_to(bdf("0000:40:01.0"));
        let path = link_path(&["0000:41:00.0", "0000:40:01.0", "0000:00:02.0"]);

        let report = set_max_payload_size(&bus, &path, mps(2)).unwrap();
        assert!(!report.succeeded());
        assert_eq!(report.devices[0].outcome, Outcome::Applied, "endpoint write stays in place");
        assert!(matches!(report.devices[1].outcome, Outcome::Failed { .. }));
        assert!(
            matches!(report.devices[2].outcome, Outcome::Excluded { .. }),
            "root port is not attempted after the bridge failed"
        );
        assert_eq!(bus.writes_to(bdf("0000:00:02.0")), 0);
        // The endpoint keeps the new value: no rollback.
        let ctl = DeviceControl::from_bits(bus.reg(bdf("0000:41:00.0"), RegisterSpec::DEVICE_CONTROL) as u16);
        assert_eq!(ctl.max_payload_size(), 2);
    }

    #[test]
    fn extended_tag_covers_the_full_path_and_is_idempotent() {
        let mut bus = FakeBus::new();
        bus.add_pcie_device(bdf("0000:41:00.0"), 5, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:40:01.0"), 5, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:00:02.0"), 5, 0, 0, 0);
        let path = link_path(&["0000:41:00.0", "0000:40:01.0", "0000:00:02.0"]);

        let report = enable_extended_tag(&bus, &path).unwrap();
        assert!(report.succeeded());
        assert_eq!(bus.write_count(), 3, "every device on the path is written");
        for d in &report.devices {
            let ctl = DeviceControl::from_bits(bus.reg(d.bdf, RegisterSpec::DEVICE_CONTROL) as u16);
            assert!(ctl.extended_tag_enable());
        }

        let again = enable_extended_tag(&bus, &path).unwrap();
        assert_eq!(bus.write_count(), 3, "second run performs zero writes");
        for d in &again.devices {
            assert_eq!(d.outcome, Outcome::AlreadyCorrect);
        }
    }

    #[test]
    fn extended_tag_failure_on_one_device_does_not_stop_the_rest() {
        let mut bus = FakeBus::new();
        bus.add_pcie_device(bdf("0000:41:00.0"), 5, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:40:01.0"), 5, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:00:02.0"), 5, 0, 0, 0);
        bus.fail_writes_to(bdf("0000:40:01.0"));
        let path = link_path(&["0000:41:00.0", "0000:40:01.0", "0000:00:02.0"]);

        let report = enable_extended_tag(&bus, &path).unwrap();
        assert!(!report.succeeded());
        assert_eq!(report.devices[0].outcome, Outcome::Applied);
        assert!(matches!(report.devices[1].outcome, Outcome::Failed { .. }));
        assert_eq!(report.devices[2].outcome, Outcome::Applied, "best-effort continues past failures");
    }

    #[test]
    fn mrrs_touches_only_the_endpoint() {
        let mut bus = FakeBus::new();
        bus.add_pcie_device(bdf("0000:41:00.0"), 5, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:00:02.0"), 5, 0, 0, 0);
        let path = link_path(&["0000:41:00.0", "0000:00:02.0"]);

        let report = set_max_read_request_size(&bus, &path, mps(4)).unwrap();
        assert!(report.succeeded());
        assert_eq!(report.devices.len(), 1);
        assert_eq!(bus.writes_to(bdf("0000:00:02.0")), 0, "the root port is left alone");
        let ctl = DeviceControl::from_bits(bus.reg(bdf("0000:41:00.0"), RegisterSpec::DEVICE_CONTROL) as u16);
        assert_eq!(ctl.max_read_request_size(), 4);
    }

    #[test]
    fn timeout_disable_targets_endpoint_and_root_port() {
        let mut bus = FakeBus::new();
        bus.add_pcie_device(bdf("0000:41:00.0"), 5, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:40:01.0"), 5, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:00:02.0"), 5, 0, 0, 0);
        let path = link_path(&["0000:41:00.0", "0000:40:01.0", "0000:00:02.0"]);

        let report = set_completion_timeout_disable(&bus, &path, true).unwrap();
        assert!(report.succeeded());
        assert_eq!(report.devices.len(), 2, "endpoint and root port only");
        assert_eq!(bus.writes_to(bdf("0000:40:01.0")), 0);
        for target in [bdf("0000:41:00.0"), bdf("0000:00:02.0")] {
            let ctl2 = DeviceControl2::from_bits(bus.reg(target, RegisterSpec::DEVICE_CONTROL_2) as u16);
            assert!(ctl2.completion_timeout_disable());
        }
    }

    #[test]
    fn timeout_range_rejected_when_main_range_unsupported() {
        // Support mask 0b0011: ranges A and B only, so C_1 must be skipped.
        let caps2 = DeviceCapabilities2::new()
            .with_completion_timeout_ranges_supported(0b0011)
            .into_bits();
        let mut bus = FakeBus::new();
        bus.add_pcie_device(bdf("0000:41:00.0"), 5, 0, caps2, 0);
        bus.add_pcie_device(bdf("0000:00:02.0"), 5, 0, caps2, 0);
        let path = link_path(&["0000:41:00.0", "0000:00:02.0"]);

        let report =
            set_completion_timeout_range(&bus, &path, CompletionTimeoutRange::C1).unwrap();
        assert!(!report.succeeded());
        assert_eq!(bus.write_count(), 0);
        for d in &report.devices {
            assert!(
                matches!(&d.outcome, Outcome::Skipped { reason } if reason.contains("main range C")),
                "unexpected outcome: {:?}",
                d.outcome
            );
        }
    }

    #[test]
    fn timeout_range_refused_while_disable_bit_is_set() {
        let caps2 = DeviceCapabilities2::new()
            .with_completion_timeout_ranges_supported(0b1111)
            .into_bits();
        let ctl2 = DeviceControl2::new()
            .with_completion_timeout_disable(true)
            .into_bits() as u32;
        let mut bus = FakeBus::new();
        bus.add_pcie_device(bdf("0000:41:00.0"), 5, 0, caps2, ctl2);
        bus.add_pcie_device(bdf("0000:00:02.0"), 5, 0, caps2, ctl2);
        let path = link_path(&["0000:41:00.0", "0000:00:02.0"]);

        let report =
            set_completion_timeout_range(&bus, &path, CompletionTimeoutRange::B1).unwrap();
        assert_eq!(bus.write_count(), 0, "no write may happen while the timeout is disabled");
        for d in &report.devices {
            assert!(matches!(&d.outcome, Outcome::Skipped { reason } if reason.contains("disabled")));
        }
    }

    #[test]
    fn timeout_range_applies_and_is_idempotent() {
        let caps2 = DeviceCapabilities2::new()
            .with_completion_timeout_ranges_supported(0b1111)
            .into_bits();
        let mut bus = FakeBus::new();
        bus.add_pcie_device(bdf("0000:41:00.0"), 5, 0, caps2, 0);
        bus.add_pcie_device(bdf("0000:00:02.0"), 5, 0, caps2, 0);
        let path = link_path(&["0000:41:00.0", "0000:00:02.0"]);

        let report =
            set_completion_timeout_range(&bus, &path, CompletionTimeoutRange::D2).unwrap();
        assert!(report.succeeded(), "{report:?}");
        for target in [bdf("0000:41:00.0"), bdf("0000:00:02.0")] {
            let ctl2 = DeviceControl2::from_bits(bus.reg(target, RegisterSpec::DEVICE_CONTROL_2) as u16);
            assert_eq!(ctl2.completion_timeout_value(), CompletionTimeoutRange::D2.code());
        }

        let writes = bus.write_count();
        let again = set_completion_timeout_range(&bus, &path, CompletionTimeoutRange::D2).unwrap();
        assert_eq!(bus.write_count(), writes);
        for d in &again.devices {
            assert_eq!(d.outcome, Outcome::AlreadyCorrect);
        }
    }

    #[test]
    fn acs_writes_only_the_interior_bridge() {
        // Endpoint 0000:41:00.0 behind bridge 0000:40:01.0 behind root port
        // 0000:00:02.0: only the bridge may be touched.
        let mut bus = FakeBus::new();
        bus.add_pcie_device(bdf("0000:41:00.0"), 5, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:40:01.0"), 5, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:00:02.0"), 5, 0, 0, 0);
        bus.add_acs(bdf("0000:40:01.0"), 0x00);
        // The root port also has ACS, to prove exclusion is positional, not
        // capability driven.
        bus.add_acs(bdf("0000:00:02.0"), 0x00);
        let path = link_path(&["0000:41:00.0", "0000:40:01.0", "0000:00:02.0"]);

        let report = set_acs(&bus, &path, true).unwrap();
        assert!(report.succeeded(), "{report:?}");
        assert_eq!(bus.write_count(), 1);
        assert_eq!(bus.writes_to(bdf("0000:40:01.0")), 1);
        assert_eq!(bus.reg(bdf("0000:40:01.0"), RegisterSpec::ACS_CONTROL), 0x1d);
        assert_eq!(
            bus.reg(bdf("0000:00:02.0"), RegisterSpec::ACS_CONTROL),
            0x00,
            "the root port's ACS control is untouched"
        );
        assert!(matches!(report.devices[0].outcome, Outcome::Excluded { .. }));
        assert!(matches!(report.devices[2].outcome, Outcome::Excluded { .. }));
    }

    #[test]
    fn acs_disable_clears_the_control_byte() {
        let mut bus = FakeBus::new();
        bus.add_pcie_device(bdf("0000:41:00.0"), 5, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:40:01.0"), 5, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:00:02.0"), 5, 0, 0, 0);
        bus.add_acs(bdf("0000:40:01.0"), 0x1d);
        let path = link_path(&["0000:41:00.0", "0000:40:01.0", "0000:00:02.0"]);

        let report = set_acs(&bus, &path, false).unwrap();
        assert!(report.succeeded());
        assert_eq!(bus.reg(bdf("0000:40:01.0"), RegisterSpec::ACS_CONTROL), 0x00);
    }

    #[test]
    fn acs_bridge_without_capability_is_skipped() {
        let mut bus = FakeBus::new();
        bus.add_pcie_device(bdf("0000:41:00.0"), 5, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:40:01.0"), 5, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:00:02.0"), 5, 0, 0, 0);
        let path = link_path(&["0000:41:00.0", "0000:40:01.0", "0000:00:02.0"]);

        let report = set_acs(&bus, &path, true).unwrap();
        assert!(!report.succeeded(), "an unsupported bridge blocks the requested change");
        assert!(matches!(
            &report.devices[1].outcome,
            Outcome::Skipped { reason } if reason.contains("no ACS capability")
        ));
        assert_eq!(bus.write_count(), 0);
    }

    #[test]
    fn acs_on_two_element_path_has_nothing_to_do() {
        let mut bus = FakeBus::new();
        bus.add_pcie_device(bdf("0000:01:00.0"), 5, 0, 0, 0);
        bus.add_pcie_device(bdf("0000:00:02.0"), 5, 0, 0, 0);
        let path = link_path(&["0000:01:00.0", "0000:00:02.0"]);

        let report = set_acs(&bus, &path, true).unwrap();
        assert!(report.succeeded());
        assert!(!report.changed_anything());
    }
}
