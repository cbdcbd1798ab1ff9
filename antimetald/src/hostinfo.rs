//! Process-global host facts read once and cached for the lifetime of the
//! agent: boot time, USER_HZ, and the page size. Collectors denominate CPU
//! counters in USER_HZ ticks and reconstruct kmsg wall-clock timestamps from
//! the boot time, so these must be stable across every reader.

use log::debug;
use once_cell::sync::OnceCell;
use std::fs;
use std::path::Path;

use crate::error::{AgentError, Result};

/// ELF auxiliary vector keys, per <elf.h>.
const AT_PAGESZ: u64 = 6;
const AT_CLKTCK: u64 = 17;

pub const FALLBACK_USER_HZ: u64 = 100;
pub const FALLBACK_PAGE_SIZE: u64 = 4096;

static BOOT_TIME: OnceCell<i64> = OnceCell::new();
static USER_HZ: OnceCell<u64> = OnceCell::new();
static PAGE_SIZE: OnceCell<u64> = OnceCell::new();

/// Boot time as Unix epoch seconds, from the `btime` line of `{proc}/stat`.
/// First successful read wins; later calls see the cached value even if the
/// underlying file changes.
pub fn boot_time_secs(proc_root: &Path) -> Result<i64> {
    if let Some(v) = BOOT_TIME.get() {
        return Ok(*v);
    }
    let path = proc_root.join("stat");
    let content = fs::read_to_string(&path).map_err(|e| AgentError::from_open(&path, &e))?;
    let parsed = parse_boot_time(&content)?;
    Ok(*BOOT_TIME.get_or_init(|| parsed))
}

/// Kernel clock tick rate from the auxiliary vector (AT_CLKTCK), falling
/// back to 100 when the auxv is unreadable.
pub fn user_hz(proc_root: &Path) -> u64 {
    *USER_HZ.get_or_init(|| {
        read_auxv_value(proc_root, AT_CLKTCK).unwrap_or_else(|| {
            debug!("auxv AT_CLKTCK unavailable, assuming USER_HZ={FALLBACK_USER_HZ}");
            FALLBACK_USER_HZ
        })
    })
}

/// System page size from the auxiliary vector (AT_PAGESZ), falling back to
/// 4096 when the auxv is unreadable.
pub fn page_size(proc_root: &Path) -> u64 {
    *PAGE_SIZE.get_or_init(|| {
        read_auxv_value(proc_root, AT_PAGESZ).unwrap_or_else(|| {
            debug!("auxv AT_PAGESZ unavailable, assuming page size {FALLBACK_PAGE_SIZE}");
            FALLBACK_PAGE_SIZE
        })
    })
}

fn read_auxv_value(proc_root: &Path, key: u64) -> Option<u64> {
    let bytes = fs::read(proc_root.join("self/auxv")).ok()?;
    parse_auxv(&bytes, key)
}

/// The auxv pseudo-file is a native-endian stream of (u64 key, u64 value)
/// pairs terminated by a zero key.
fn parse_auxv(bytes: &[u8], wanted: u64) -> Option<u64> {
    for pair in bytes.chunks_exact(16) {
        let key = u64::from_ne_bytes(pair[..8].try_into().ok()?);
        if key == 0 {
            break;
        }
        if key == wanted {
            return Some(u64::from_ne_bytes(pair[8..].try_into().ok()?));
        }
    }
    None
}

fn parse_boot_time(stat: &str) -> Result<i64> {
    for line in stat.lines() {
        let mut fields = line.split_whitespace();
        if fields.next() == Some("btime") {
            return fields
                .next()
                .and_then(|v| v.parse::<i64>().ok())
                .ok_or_else(|| AgentError::parse("malformed btime line in /proc/stat"));
        }
    }
    Err(AgentError::not_found("btime in /proc/stat"))
}
