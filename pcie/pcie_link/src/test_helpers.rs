// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory devices for exercising the operations without hardware.

use pcie_cfg::AccessError;
use pcie_cfg::ConfigAccess;
use pcie_cfg::RegisterSpec;
use pcie_spec::regs::DeviceCapabilities;
use pcie_topology::Bdf;
use pcie_topology::LinkPath;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// A bus of fake devices whose registers live in a map keyed by the
/// register's `setpci` rendering. Reads of absent registers fail the same
/// way `setpci` fails on a device without the capability.
pub(crate) struct FakeBus {
    devices: BTreeMap<Bdf, RefCell<BTreeMap<String, u32>>>,
    writes: RefCell<Vec<(Bdf, String, u32)>>,
    failing: BTreeSet<Bdf>,
}

impl FakeBus {
    pub fn new() -> Self {
        Self {
            devices: BTreeMap::new(),
            writes: RefCell::new(Vec::new()),
            failing: BTreeSet::new(),
        }
    }

    /// Adds a device with a PCI Express capability: the given Max Payload
    /// Size capability code plus raw initial values for Device Control,
    /// Device Capabilities 2 and Device Control 2.
    pub fn add_pcie_device(
        &mut self,
        bdf: Bdf,
        max_payload_code: u8,
        device_control: u32,
        device_caps2: u32,
        device_control2: u32,
    ) {
        let mut regs = BTreeMap::new();
        regs.insert(RegisterSpec::PCIE_CAPS.to_string(), 0x0002);
        regs.insert(
            RegisterSpec::DEVICE_CAPS.to_string(),
            DeviceCapabilities::new()
                .with_max_payload_size_supported(max_payload_code)
                .into_bits(),
        );
        regs.insert(RegisterSpec::DEVICE_CONTROL.to_string(), device_control);
        regs.insert(RegisterSpec::DEVICE_CAPS_2.to_string(), device_caps2);
        regs.insert(RegisterSpec::DEVICE_CONTROL_2.to_string(), device_control2);
        self.devices.insert(bdf, RefCell::new(regs));
    }

    /// Adds a device whose PCI Express Capabilities register reads as zero
    /// (no PCIe capability implemented).
    pub fn add_bare_device(&mut self, bdf: Bdf) {
        let mut regs = BTreeMap::new();
        regs.insert(RegisterSpec::PCIE_CAPS.to_string(), 0);
        self.devices.insert(bdf, RefCell::new(regs));
    }

    /// Gives an existing device an ACS control register.
    pub fn add_acs(&mut self, bdf: Bdf, control: u8) {
        self.devices
            .get(&bdf)
            .expect("device added before ACS")
            .borrow_mut()
            .insert(RegisterSpec::ACS_CONTROL.to_string(), control.into());
    }

    /// Makes every write to this device fail.
    pub fn fail_writes_to(&mut self, bdf: Bdf) {
        self.failing.insert(bdf);
    }

    /// Current raw value of a register.
    pub fn reg(&self, bdf: Bdf, reg: RegisterSpec) -> u32 {
        *self
            .devices
            .get(&bdf)
            .expect("device exists")
            .borrow()
            .get(&reg.to_string())
            .expect("register exists")
    }

    /// Total number of writes issued against the bus.
    pub fn write_count(&self) -> usize {
        self.writes.borrow().len()
    }

    /// Number of writes issued against one device.
    pub fn writes_to(&self, bdf: Bdf) -> usize {
        self.writes.borrow().iter().filter(|(b, _, _)| *b == bdf).count()
    }
}

impl ConfigAccess for FakeBus {
    fn read(&self, bdf: Bdf, reg: RegisterSpec) -> Result<u32, AccessError> {
        let device = self.devices.get(&bdf).ok_or(AccessError::Rejected {
            bdf,
            reg,
            stderr: "no such device".to_owned(),
        })?;
        device
            .borrow()
            .get(&reg.to_string())
            .copied()
            .ok_or(AccessError::Rejected {
                bdf,
                reg,
                stderr: "capability not found".to_owned(),
            })
    }

    fn write(&self, bdf: Bdf, reg: RegisterSpec, value: u32) -> Result<(), AccessError> {
        if self.failing.contains(&bdf) {
            return Err(AccessError::DeviceBusy { bdf });
        }
        let device = self.devices.get(&bdf).ok_or(AccessError::Rejected {
            bdf,
            reg,
            stderr: "no such device".to_owned(),
        })?;
        let mut regs = device.borrow_mut();
        if !regs.contains_key(&reg.to_string()) {
            return Err(AccessError::Rejected {
                bdf,
                reg,
                stderr: "capability not found".to_owned(),
            });
        }
        regs.insert(reg.to_string(), value);
        self.writes.borrow_mut().push((bdf, reg.to_string(), value));
        Ok(())
    }
}

/// Builds a path from string addresses, endpoint first.
pub(crate) fn link_path(addrs: &[&str]) -> LinkPath {
    LinkPath::new(
        addrs
            .iter()
            .map(|a| a.parse().expect("test addresses are well formed"))
            .collect(),
    )
    .expect("test paths are non-empty")
}
