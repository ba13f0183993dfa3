// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Register layouts and field semantics for the PCI Express capability
//! structures touched by link tuning: Device Capabilities/Control (1 and 2),
//! Link Capabilities/Control/Status, and the ACS extended capability control
//! byte.
//!
//! Everything in this crate is pure: raw register values in, typed views and
//! encoded values out. Reading and writing the registers of real devices is
//! the business of `pcie_cfg`.

#![forbid(unsafe_code)]

pub mod fields;
pub mod regs;
