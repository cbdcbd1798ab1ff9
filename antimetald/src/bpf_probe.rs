//! Kernel feature detection for the eBPF exec tracer: BTF presence and the
//! CO-RE support level implied by the kernel version.

use serde::Serialize;
use std::fs;
use std::path::PathBuf;

use crate::config::CollectionConfig;
use crate::error::{AgentError, Result};

/// How far CO-RE relocation can be trusted on this kernel. 5.2 brought full
/// BTF-based relocation; 4.18 through 5.1 support a subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreSupport {
    Full,
    Partial,
    None,
}

#[derive(Debug, Clone)]
pub struct CoreProbe {
    /// Path to the kernel's BTF blob, when it exposes one.
    pub btf_path: Option<PathBuf>,
    pub support: CoreSupport,
    /// Raw contents of proc/version.
    pub kernel_version: String,
}

impl CoreProbe {
    pub fn detect(config: &CollectionConfig) -> Result<Self> {
        if cfg!(not(target_os = "linux")) {
            return Err(AgentError::Platform(
                "CO-RE probing requires a Linux kernel".to_string(),
            ));
        }

        let btf_candidate = config.sys_path("kernel/btf/vmlinux");
        let btf_path = btf_candidate.is_file().then_some(btf_candidate);

        let kernel_version = fs::read_to_string(config.proc_path("version"))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        let support = parse_kernel_version(&kernel_version)
            .map(|(major, minor)| support_for(major, minor))
            .unwrap_or(CoreSupport::None);

        Ok(Self {
            btf_path,
            support,
            kernel_version,
        })
    }
}

pub fn support_for(major: u32, minor: u32) -> CoreSupport {
    if (major, minor) >= (5, 2) {
        CoreSupport::Full
    } else if (major, minor) >= (4, 18) {
        CoreSupport::Partial
    } else {
        CoreSupport::None
    }
}

/// Accepts both the full `Linux version 5.15.0-91-generic (...)` banner and
/// a bare release string like `5.15.0-91`.
pub fn parse_kernel_version(raw: &str) -> Option<(u32, u32)> {
    let raw = raw.trim();
    let release = if let Some(rest) = raw.strip_prefix("Linux version ") {
        rest.split_whitespace().next()?
    } else {
        raw.split_whitespace().next()?
    };

    let version_part = release.split('-').next()?;
    let mut segments = version_part.split('.');
    let major = segments.next()?.parse().ok()?;
    let minor = segments.next().unwrap_or("0").parse().ok()?;
    Some((major, minor))
}
