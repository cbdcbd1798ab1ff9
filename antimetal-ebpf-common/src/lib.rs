#![cfg_attr(all(feature = "bpf", not(feature = "user")), no_std)]

use bytemuck::{Pod, Zeroable};

#[cfg(test)]
use core::mem::size_of;

/// Length of the kernel-supplied command name, including the NUL padding.
/// Matches TASK_COMM_LEN in the kernel; anything longer is truncated by the
/// kernel before it reaches us.
pub const TASK_COMM_LEN: usize = 16;

/// Name of the tracepoint program attached at execve entry.
pub const PROG_SYS_ENTER_EXECVE: &str = "tracepoint__syscalls__sys_enter_execve";
/// Name of the tracepoint program attached at execve exit.
pub const PROG_SYS_EXIT_EXECVE: &str = "tracepoint__syscalls__sys_exit_execve";
/// Name of the BPF ring buffer map the programs publish into.
pub const MAP_EVENTS: &str = "events";

/// Tracepoint category both execve programs attach under.
pub const TRACEPOINT_CATEGORY: &str = "syscalls";
pub const TRACEPOINT_SYS_ENTER_EXECVE: &str = "sys_enter_execve";
pub const TRACEPOINT_SYS_EXIT_EXECVE: &str = "sys_exit_execve";

/// Fixed-size header at the front of every exec event record.
///
/// The kernel side writes this with native (little-endian) byte order and
/// appends `args_size` bytes of NUL-separated argv strings directly after it.
/// Layout must stay free of implicit padding so the userspace reader can
/// decode it with a single Pod read.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[cfg_attr(
    all(feature = "user", not(target_os = "none")),
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct ExecEventHeader {
    pub pid: u32,
    pub ppid: u32,
    pub uid: u32,
    /// Return value of the execve syscall; negative on failure.
    pub retval: i32,
    /// Number of argv strings the kernel captured.
    pub args_count: u32,
    /// Byte length of the NUL-separated argv blob following the header.
    pub args_size: u32,
    /// Command name, truncated by the kernel to TASK_COMM_LEN - 1 bytes.
    pub comm: [u8; TASK_COMM_LEN],
}

/// Size in bytes of [`ExecEventHeader`] on the wire.
pub const EXEC_EVENT_HEADER_SIZE: usize = core::mem::size_of::<ExecEventHeader>();

impl ExecEventHeader {
    pub const fn zeroed() -> Self {
        Self {
            pid: 0,
            ppid: 0,
            uid: 0,
            retval: 0,
            args_count: 0,
            args_size: 0,
            comm: [0; TASK_COMM_LEN],
        }
    }

    /// The kernel comm with trailing NUL padding stripped. Lossy on invalid
    /// UTF-8, which the kernel does not normally produce.
    #[cfg(feature = "user")]
    pub fn comm_str(&self) -> &str {
        let end = self
            .comm
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TASK_COMM_LEN);
        core::str::from_utf8(&self.comm[..end]).unwrap_or("invalid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_packed() {
        // 6 scalar fields plus the 16-byte comm, no implicit padding.
        assert_eq!(size_of::<ExecEventHeader>(), 6 * 4 + TASK_COMM_LEN);
        assert_eq!(
            size_of::<ExecEventHeader>() % 4,
            0,
            "wire format should be 4-byte aligned"
        );
    }

    #[test]
    fn comm_str_strips_padding() {
        let mut header = ExecEventHeader::zeroed();
        header.comm[..4].copy_from_slice(b"bash");
        assert_eq!(header.comm_str(), "bash");

        let full = ExecEventHeader {
            comm: *b"very-long-cmd-na",
            ..ExecEventHeader::zeroed()
        };
        assert_eq!(full.comm_str(), "very-long-cmd-na");
    }

    #[cfg(feature = "user")]
    #[test]
    fn header_roundtrip() {
        let header = ExecEventHeader {
            pid: 9999,
            ppid: 1,
            uid: 1000,
            retval: 0,
            args_count: 3,
            args_size: 24,
            comm: *b"cat\0\0\0\0\0\0\0\0\0\0\0\0\0",
        };
        let json = serde_json::to_string(&header).expect("serialize header");
        let back: ExecEventHeader = serde_json::from_str(&json).expect("deserialize header");
        assert_eq!(back.pid, header.pid);
        assert_eq!(back.args_size, header.args_size);
        assert_eq!(back.comm, header.comm);
    }
}
