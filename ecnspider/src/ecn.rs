// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Access to the kernel's TCP ECN negotiation setting.

use crate::Result;
use std::process::Command;

const SYSCTL: &str = "/sbin/sysctl";
const SYSCTL_KEY: &str = "net.ipv4.tcp_ecn";

/// Kernel ECN negotiation modes, matching the values `net.ipv4.tcp_ecn`
/// accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Never request ECN on outgoing connections (0).
    Never,
    /// Request ECN on every outgoing connection (1).
    Always,
    /// Enable ECN only when a peer requests it (2), the kernel default.
    OnDemand,
}

impl Mode {
    pub fn sysctl_value(self) -> u8 {
        match self {
            Mode::Never => 0,
            Mode::Always => 1,
            Mode::OnDemand => 2,
        }
    }

    pub fn from_sysctl_value(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Mode::Never),
            1 => Ok(Mode::Always),
            2 => Ok(Mode::OnDemand),
            other => Err(format!("unknown {} value {}", SYSCTL_KEY, other).into()),
        }
    }
}

/// Handle on the kernel ECN setting.
///
/// The setting is global to the host, so whoever holds this handle holds
/// authority over every connection the process opens. During a crawl only
/// the controller task calls [`set`](Self::set).
pub trait EcnCtl: Send + Sync {
    fn get(&self) -> Result<Mode>;
    fn set(&self, mode: Mode) -> Result<()>;
}

/// Drives the setting through sysctl. Writes go through `sudo -n`, so the
/// sudoers configuration has to allow the sysctl invocation without a
/// password prompt.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sysctl(());

impl EcnCtl for Sysctl {
    fn get(&self) -> Result<Mode> {
        let output = Command::new(SYSCTL).args(["-n", SYSCTL_KEY]).output()?;
        if !output.status.success() {
            return Err(format!(
                "{} -n {} failed: {}",
                SYSCTL,
                SYSCTL_KEY,
                String::from_utf8_lossy(&output.stderr).trim()
            )
            .into());
        }
        let value = String::from_utf8(output.stdout)?.trim().parse()?;
        Mode::from_sysctl_value(value)
    }

    fn set(&self, mode: Mode) -> Result<()> {
        let assignment = format!("{}={}", SYSCTL_KEY, mode.sysctl_value());
        let output = Command::new("sudo")
            .args(["-n", SYSCTL, "-w", &assignment])
            .output()?;
        if !output.status.success() {
            return Err(format!(
                "sudo -n {} -w {} failed: {}",
                SYSCTL,
                assignment,
                String::from_utf8_lossy(&output.stderr).trim()
            )
            .into());
        }
        Ok(())
    }
}

/// Verifies the setting can be read and moved through every mode, restoring
/// the value found on entry. Returning `Ok` means the controller will be
/// able to do its job.
pub fn check(ctl: &dyn EcnCtl) -> Result<()> {
    let state = ctl.get()?;
    ctl.set(state)?;

    ctl.set(Mode::Never)?;
    ctl.set(Mode::Always)?;
    ctl.set(Mode::OnDemand)?;

    ctl.set(state)?;
    Ok(())
}
