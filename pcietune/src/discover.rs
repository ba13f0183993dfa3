// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Accelerator discovery via `lspci`, plus the vendor tool tables.

use anyhow::Context;
use anyhow::anyhow;
use anyhow::bail;
use pcie_topology::Bdf;
use std::process::Command;

/// An accelerator vendor the tool knows how to recognize and cross-reference.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Vendor {
    Nvidia,
    Huawei,
    Enrigin,
    MetaX,
    MooreThreads,
    Iluvatar,
    Hexaflake,
    Denglin,
}

impl Vendor {
    /// Every known vendor.
    pub const ALL: [Vendor; 8] = [
        Vendor::Nvidia,
        Vendor::Huawei,
        Vendor::Enrigin,
        Vendor::MetaX,
        Vendor::MooreThreads,
        Vendor::Iluvatar,
        Vendor::Hexaflake,
        Vendor::Denglin,
    ];

    /// The vendor name as `lspci` prints it.
    pub fn name(&self) -> &'static str {
        match self {
            Vendor::Nvidia => "NVIDIA",
            Vendor::Huawei => "Huawei",
            Vendor::Enrigin => "Enrigin",
            Vendor::MetaX => "MetaX",
            Vendor::MooreThreads => "Moore Threads",
            Vendor::Iluvatar => "Iluvatar",
            Vendor::Hexaflake => "Hexaflake",
            Vendor::Denglin => "Denglin",
        }
    }

    /// PCI vendor ID prefix as it appears in numeric `lspci` output.
    fn id_prefix(&self) -> &'static str {
        match self {
            Vendor::Nvidia => "10de:",
            Vendor::Huawei => "19e5:",
            Vendor::Enrigin => "1fbd:",
            Vendor::MetaX => "9999:",
            Vendor::MooreThreads => "1ed5:",
            Vendor::Iluvatar => "1e3e:",
            Vendor::Hexaflake => "1faa:",
            Vendor::Denglin => "1e27:",
        }
    }

    /// The vendor's device management CLI.
    pub fn management_tool(&self) -> &'static [&'static str] {
        match self {
            Vendor::Nvidia => &["nvidia-smi"],
            Vendor::Huawei => &["npu-smi", "info"],
            Vendor::Enrigin => &["ersmi"],
            Vendor::MetaX => &["mx-smi"],
            Vendor::MooreThreads => &["mthreads-gmi"],
            Vendor::Iluvatar => &["ixsmi"],
            Vendor::Hexaflake => &["hxsmi"],
            Vendor::Denglin => &["dlsmi"],
        }
    }

    /// The vendor's topology view command.
    pub fn topology_tool(&self) -> &'static [&'static str] {
        match self {
            Vendor::Nvidia => &["nvidia-smi", "topo", "-m"],
            Vendor::Huawei => &["npu-smi", "info", "-t", "--topo"],
            Vendor::Enrigin => &["ersmi", "--topo"],
            Vendor::MetaX => &["mx-smi", "topo", "-m"],
            Vendor::MooreThreads => &["mthreads-gmi", "topo", "-m"],
            Vendor::Iluvatar => &["ixsmi", "topo", "-m"],
            Vendor::Hexaflake => &["hxsmi", "topo"],
            Vendor::Denglin => &["dlsmi", "topo", "-m"],
        }
    }

    fn matches(&self, lspci_line: &str) -> bool {
        lspci_line.contains(self.name()) || lspci_line.contains(self.id_prefix())
    }
}

/// One accelerator function found by `lspci`.
#[derive(Debug, Clone)]
pub struct Accelerator {
    /// Its PCI address.
    pub bdf: Bdf,
    /// Which vendor matched.
    pub vendor: Vendor,
    /// The full `lspci` line, for display.
    pub description: String,
}

/// Runs `lspci` and returns every recognized accelerator, in bus order.
/// A missing `lspci` is fatal.
pub fn list_accelerators() -> anyhow::Result<Vec<Accelerator>> {
    // -D forces the domain into every address so the output parses as
    // fully-qualified BDFs on single-domain machines too.
    let output = Command::new("lspci").arg("-D").output().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            anyhow!("`lspci` not found; install pciutils")
        } else {
            anyhow!("failed to run lspci: {err}")
        }
    })?;
    if !output.status.success() {
        bail!(
            "lspci failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(parse_lspci(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_lspci(output: &str) -> Vec<Accelerator> {
    let mut found = Vec::new();
    for line in output.lines() {
        // HDMI audio functions of a GPU match the vendor keywords but are
        // not accelerators.
        if line.contains("Audio") {
            continue;
        }
        let Some(vendor) = Vendor::ALL.iter().copied().find(|v| v.matches(line)) else {
            continue;
        };
        let Some(addr) = line.split_whitespace().next() else {
            continue;
        };
        let Ok(bdf) = addr.parse::<Bdf>() else {
            continue;
        };
        found.push(Accelerator {
            bdf,
            vendor,
            description: line.to_owned(),
        });
    }
    found
}

/// Runs one of the vendor tool command lines. Returns `Ok(None)` when the
/// tool is simply not installed.
pub fn run_vendor_tool(argv: &'static [&'static str]) -> anyhow::Result<Option<String>> {
    let [tool, args @ ..] = argv else {
        bail!("empty vendor tool command");
    };
    match Command::new(tool).args(args).output() {
        Ok(out) if out.status.success() => {
            Ok(Some(String::from_utf8_lossy(&out.stdout).trim_end().to_owned()))
        }
        Ok(out) => bail!(
            "`{tool}` failed: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        ),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("running `{tool}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_picks_known_vendors_and_skips_audio() {
        let output = "\
0000:00:00.0 Host bridge: Intel Corporation Device 09a2
0000:41:00.0 3D controller: NVIDIA Corporation GA100 [A100 SXM4 80GB] (rev a1)
0000:41:00.1 Audio device: NVIDIA Corporation Device 10f9
0000:81:00.0 Processing accelerators: Huawei Technologies Co., Ltd. Device d802
0000:c1:00.0 Ethernet controller: Mellanox Technologies MT28908
";
        let found = parse_lspci(output);
        assert_eq!(found.len(), 2, "host bridge, audio and NIC are not accelerators");
        assert_eq!(found[0].vendor, Vendor::Nvidia);
        assert_eq!(found[0].bdf, "0000:41:00.0".parse().unwrap());
        assert_eq!(found[1].vendor, Vendor::Huawei);
    }

    #[test]
    fn parse_matches_on_vendor_id_prefix() {
        let output = "0000:17:00.0 Processing accelerators: Device 1e27:0001";
        let found = parse_lspci(output);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].vendor, Vendor::Denglin, "1e27: is the Denglin vendor ID");
    }

    #[test]
    fn parse_ignores_lines_without_a_valid_address() {
        let output = "garbage NVIDIA line without an address";
        assert!(parse_lspci(output).is_empty());
    }

    #[test]
    fn every_vendor_has_tools() {
        for vendor in Vendor::ALL {
            assert!(!vendor.management_tool().is_empty(), "{}", vendor.name());
            assert!(!vendor.topology_tool().is_empty(), "{}", vendor.name());
        }
    }
}
