// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `ConfigAccess` over the `setpci` utility.

use crate::AccessError;
use crate::ConfigAccess;
use crate::RegisterSpec;
use pcie_topology::Bdf;
use std::io::Read;
use std::process::Child;
use std::process::Command;
use std::process::ExitStatus;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Register access via `sudo setpci -s <bdf> <reg>[=<value>]`, one process
/// per access, with a hard deadline on each invocation.
pub struct SetpciAccess {
    timeout: Duration,
}

impl SetpciAccess {
    /// Accessor with the standard 5 second per-access deadline.
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Accessor with a custom per-access deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn run(&self, bdf: Bdf, reg: RegisterSpec, arg: &str) -> Result<String, AccessError> {
        let mut child = Command::new("sudo")
            .arg("setpci")
            .arg("-s")
            .arg(bdf.to_string())
            .arg(arg)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => AccessError::ToolMissing("sudo".to_owned()),
                _ => AccessError::Rejected {
                    bdf,
                    reg,
                    stderr: err.to_string(),
                },
            })?;

        let status = self.wait_with_deadline(&mut child, bdf, reg)?;
        let stdout = read_pipe(child.stdout.take());
        let stderr = read_pipe(child.stderr.take());

        if !status.success() {
            tracing::debug!(device = %bdf, register = %reg, %stderr, "setpci failed");
            return Err(classify_failure(bdf, reg, stderr));
        }
        Ok(stdout)
    }

    fn wait_with_deadline(
        &self,
        child: &mut Child,
        bdf: Bdf,
        reg: RegisterSpec,
    ) -> Result<ExitStatus, AccessError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        // The child gets no grace period past the deadline;
                        // a wedged setpci usually means a wedged device.
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(AccessError::Timeout {
                            bdf,
                            reg,
                            timeout: self.timeout,
                        });
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(err) => {
                    return Err(AccessError::Rejected {
                        bdf,
                        reg,
                        stderr: err.to_string(),
                    });
                }
            }
        }
    }
}

impl ConfigAccess for SetpciAccess {
    fn read(&self, bdf: Bdf, reg: RegisterSpec) -> Result<u32, AccessError> {
        let output = self.run(bdf, reg, &reg.to_string())?;
        let value = parse_read_output(&output).ok_or_else(|| AccessError::UnparsableOutput {
            bdf,
            reg,
            output: output.clone(),
        })?;
        tracing::trace!(device = %bdf, register = %reg, value = format_args!("{value:#x}"), "register read");
        Ok(value)
    }

    fn write(&self, bdf: Bdf, reg: RegisterSpec, value: u32) -> Result<(), AccessError> {
        if value > reg.width.max_value() {
            return Err(AccessError::ValueTooWide { bdf, reg, value });
        }
        tracing::trace!(device = %bdf, register = %reg, value = format_args!("{value:#x}"), "register write");
        self.run(bdf, reg, &write_argument(reg, value))?;
        Ok(())
    }
}

fn write_argument(reg: RegisterSpec, value: u32) -> String {
    format!(
        "{}={:0digits$x}",
        reg,
        value,
        digits = reg.width.hex_digits()
    )
}

fn parse_read_output(output: &str) -> Option<u32> {
    u32::from_str_radix(output.trim(), 16).ok()
}

fn read_pipe(pipe: Option<impl Read>) -> String {
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buf);
    }
    buf.trim().to_owned()
}

fn classify_failure(bdf: Bdf, reg: RegisterSpec, stderr: String) -> AccessError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("command not found") || lower.contains("no such file") {
        AccessError::ToolMissing("setpci".to_owned())
    } else if lower.contains("not permitted") || lower.contains("permission denied") {
        AccessError::NotPermitted { bdf, reg }
    } else if lower.contains("busy") {
        AccessError::DeviceBusy { bdf }
    } else {
        AccessError::Rejected { bdf, reg, stderr }
    }
}
