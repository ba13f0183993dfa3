// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `pcietune` inspects and tunes the PCIe link parameters of accelerator
//! devices (GPUs/NPUs): extended tags, max payload size, max read request
//! size, completion timeouts and ACS isolation, across the full bridge chain
//! from each endpoint up to its root port.
//!
//! Requires `lspci`/`setpci` (pciutils) and root privileges for register
//! writes.

use anyhow::bail;
use clap::Parser;
use clap::Subcommand;
use pcie_cfg::AccessError;
use pcie_cfg::SetpciAccess;
use pcie_link::LinkReport;
use pcie_spec::fields::CompletionTimeoutRange;
use pcie_spec::fields::PayloadSize;
use pcie_topology::LinkPath;
use pcie_topology::SysfsHierarchy;
use pcie_topology::path_to_root;

mod discover;
mod report;
mod trace;

#[derive(Parser)]
#[clap(
    name = "pcietune",
    about = "Inspect and tune PCIe link parameters of accelerator devices"
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List discovered accelerator devices
    List {
        /// Also query each vendor's management tool
        #[clap(long)]
        vendor_tools: bool,
    },
    /// Show each vendor's device topology view
    Topo,
    /// Show decoded link parameters and platform state for every accelerator
    Trace,
    /// Enable ACS isolation on the bridges between each accelerator and its
    /// root port
    EnableAcs,
    /// Disable ACS isolation on the bridges between each accelerator and its
    /// root port
    DisableAcs,
    /// Enable extended tags on every device along each accelerator's path
    EnableExtendedTag,
    /// Set Max Payload Size link-wide (0=128B, 1=256B, 2=512B, 3=1KB, 4=2KB,
    /// 5=4KB)
    SetMps {
        /// Payload size code
        #[clap(value_parser = clap::value_parser!(u8).range(0..=5))]
        code: u8,
    },
    /// Set each accelerator's Max Read Request Size (0=128B .. 5=4KB)
    SetMrrs {
        /// Read request size code
        #[clap(value_parser = clap::value_parser!(u8).range(0..=5))]
        code: u8,
    },
    /// Set (1) or clear (0) Completion Timeout Disable on each accelerator
    /// and its root port
    SetTimeoutDisable {
        /// 1 to disable the completion timeout, 0 to re-enable it
        #[clap(value_parser = clap::value_parser!(u8).range(0..=1))]
        value: u8,
    },
    /// Program the Completion Timeout range on each accelerator and its root
    /// port
    SetTimeoutRange {
        /// One of: Default, A_1, A_2, B_1, B_2, C_1, C_2, D_1, D_2
        range: CompletionTimeoutRange,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::List { vendor_tools } => cmd_list(vendor_tools),
        Command::Topo => cmd_topo(),
        Command::Trace => cmd_trace(),
        Command::EnableAcs => apply(|access, path| pcie_link::set_acs(access, path, true)),
        Command::DisableAcs => apply(|access, path| pcie_link::set_acs(access, path, false)),
        Command::EnableExtendedTag => {
            apply(|access, path| pcie_link::enable_extended_tag(access, path))
        }
        Command::SetMps { code } => {
            let size = PayloadSize::from_code(code)?;
            apply(move |access, path| pcie_link::set_max_payload_size(access, path, size))
        }
        Command::SetMrrs { code } => {
            let size = PayloadSize::from_code(code)?;
            apply(move |access, path| pcie_link::set_max_read_request_size(access, path, size))
        }
        Command::SetTimeoutDisable { value } => apply(move |access, path| {
            pcie_link::set_completion_timeout_disable(access, path, value != 0)
        }),
        Command::SetTimeoutRange { range } => apply(move |access, path| {
            pcie_link::set_completion_timeout_range(access, path, range)
        }),
    }
}

/// Resolves every accelerator's path and applies one operation to each,
/// continuing past per-endpoint failures. Exits non-zero (via the returned
/// error) if any endpoint failed.
fn apply(
    op: impl Fn(&SetpciAccess, &LinkPath) -> Result<LinkReport, AccessError>,
) -> anyhow::Result<()> {
    let accelerators = discover::list_accelerators()?;
    if accelerators.is_empty() {
        println!("No accelerator devices found.");
        return Ok(());
    }

    let access = SetpciAccess::new();
    let hierarchy = SysfsHierarchy::new();
    let mut failures = 0;
    for accel in &accelerators {
        let path = match path_to_root(&hierarchy, accel.bdf) {
            Ok(path) => path,
            Err(err) => {
                println!("{}: {err}", accel.bdf);
                failures += 1;
                continue;
            }
        };
        // Only fatal errors (missing setpci) surface here; everything else
        // is folded into the report.
        let report = op(&access, &path)?;
        report::print(&report);
        if !report.succeeded() {
            failures += 1;
        }
    }

    if failures > 0 {
        bail!("{failures} device(s) failed");
    }
    Ok(())
}

fn cmd_list(vendor_tools: bool) -> anyhow::Result<()> {
    let accelerators = discover::list_accelerators()?;
    if accelerators.is_empty() {
        println!("No accelerator devices found.");
        return Ok(());
    }

    println!("Accelerators (from lspci):");
    for accel in &accelerators {
        println!("  {}", accel.description);
    }

    if vendor_tools {
        for vendor in vendors_of(&accelerators) {
            let argv = vendor.management_tool();
            match discover::run_vendor_tool(argv)? {
                Some(output) => {
                    println!("\n{} devices (via {}):", vendor.name(), argv[0]);
                    println!("{output}");
                }
                None => println!(
                    "\nWarning: {} management tool not installed, install {} first",
                    vendor.name(),
                    argv[0]
                ),
            }
        }
    }
    Ok(())
}

fn cmd_topo() -> anyhow::Result<()> {
    let accelerators = discover::list_accelerators()?;
    let vendors = vendors_of(&accelerators);
    if vendors.is_empty() {
        println!("No accelerator devices found.");
        return Ok(());
    }

    let mut shown = false;
    for vendor in vendors {
        let argv = vendor.topology_tool();
        match discover::run_vendor_tool(argv)? {
            Some(output) => {
                println!("{} topology:", vendor.name());
                println!("{output}");
                shown = true;
            }
            None => println!(
                "Error: {} topology tool ({}) is not installed.",
                vendor.name(),
                argv[0]
            ),
        }
    }
    if !shown {
        bail!("no vendor topology tool available");
    }
    Ok(())
}

fn cmd_trace() -> anyhow::Result<()> {
    let accelerators = discover::list_accelerators()?;
    if accelerators.is_empty() {
        println!("No accelerator devices found.");
        return Ok(());
    }
    let failures = trace::run(&SetpciAccess::new(), &SysfsHierarchy::new(), &accelerators)?;
    if failures > 0 {
        bail!("{failures} device(s) could not be fully traced");
    }
    Ok(())
}

/// The distinct vendors present, in a stable order.
fn vendors_of(accelerators: &[discover::Accelerator]) -> Vec<discover::Vendor> {
    let mut vendors: Vec<_> = accelerators.iter().map(|a| a.vendor).collect();
    vendors.sort();
    vendors.dedup();
    vendors
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_set_mps_code() {
        let cli = Cli::try_parse_from(["pcietune", "set-mps", "2"]).expect("valid invocation");
        match cli.command {
            Command::SetMps { code } => assert_eq!(code, 2),
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn rejects_out_of_range_mps_code() {
        assert!(
            Cli::try_parse_from(["pcietune", "set-mps", "6"]).is_err(),
            "codes above 5 are reserved"
        );
    }

    #[test]
    fn parses_timeout_range_names() {
        let cli = Cli::try_parse_from(["pcietune", "set-timeout-range", "C_1"]).unwrap();
        match cli.command {
            Command::SetTimeoutRange { range } => {
                assert_eq!(range, CompletionTimeoutRange::C1)
            }
            _ => panic!("wrong command parsed"),
        }
        assert!(Cli::try_parse_from(["pcietune", "set-timeout-range", "E_9"]).is_err());
    }

    #[test]
    fn timeout_disable_takes_only_zero_or_one() {
        assert!(Cli::try_parse_from(["pcietune", "set-timeout-disable", "1"]).is_ok());
        assert!(Cli::try_parse_from(["pcietune", "set-timeout-disable", "2"]).is_err());
    }

    #[test]
    fn list_accepts_vendor_tools_flag() {
        let cli = Cli::try_parse_from(["pcietune", "list", "--vendor-tools"]).unwrap();
        match cli.command {
            Command::List { vendor_tools } => assert!(vendor_tools),
            _ => panic!("wrong command parsed"),
        }
    }
}
