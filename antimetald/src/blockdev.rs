//! Whole-device vs partition classification for block device names as they
//! appear in diskstats and /sys/block.

use std::path::Path;

/// Classify by name alone.
///
/// `loopN` and `dm-N` never have partition entries in diskstats, so they are
/// always whole devices. NVMe and MMC devices encode partitions with a `p`
/// suffix (`nvme0n1p1`); everything else follows the classic rule that a
/// trailing digit marks a partition (`sda1`, `hda3`).
pub fn is_partition(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    if name.starts_with("loop") || name.starts_with("dm-") {
        return false;
    }
    if name.contains("nvme") || name.contains("mmcblk") {
        return match name.rfind('p') {
            Some(idx) => {
                let suffix = &name[idx + 1..];
                !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit())
            }
            None => false,
        };
    }
    name.ends_with(|c: char| c.is_ascii_digit())
}

/// Inventory-time refinement: only treat a name as a partition when a parent
/// block device actually exists under `{sys_root}/block`. Software-RAID
/// devices like `md0` end in a digit but have no parent, so they stay whole.
pub fn is_partition_in_sysfs(sys_root: &Path, name: &str) -> bool {
    if !is_partition(name) {
        return false;
    }
    parent_device(name)
        .map(|parent| sys_root.join("block").join(parent).is_dir())
        .unwrap_or(false)
}

/// Candidate parent device for a partition-shaped name: strip the `pN`
/// suffix for nvme/mmcblk, the trailing digits otherwise.
fn parent_device(name: &str) -> Option<&str> {
    if name.contains("nvme") || name.contains("mmcblk") {
        let idx = name.rfind('p')?;
        return Some(&name[..idx]);
    }
    let stripped = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if stripped.is_empty() || stripped == name {
        None
    } else {
        Some(stripped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn whole_devices() {
        for name in ["loop0", "loop10", "dm-0", "nvme0n1", "mmcblk0", "sda", "vda", "xvda", ""] {
            assert!(!is_partition(name), "{name:?} should be whole");
        }
    }

    #[test]
    fn partitions() {
        for name in ["sda1", "nvme0n1p1", "mmcblk0p2", "hda3"] {
            assert!(is_partition(name), "{name:?} should be a partition");
        }
    }

    #[test]
    fn sysfs_refinement_keeps_md_whole() {
        let dir = tempfile::tempdir().unwrap();
        let block = dir.path().join("block");
        for dev in ["sda", "nvme0n1", "md0"] {
            fs::create_dir_all(block.join(dev)).unwrap();
        }

        // md0 ends in a digit but `md` is not a device, so it stays whole.
        assert!(!is_partition_in_sysfs(dir.path(), "md0"));
        assert!(is_partition_in_sysfs(dir.path(), "sda1"));
        assert!(is_partition_in_sysfs(dir.path(), "nvme0n1p1"));
        assert!(!is_partition_in_sysfs(dir.path(), "sda"));
        // A digit-suffixed name with no parent dir at all is not a partition.
        assert!(!is_partition_in_sysfs(dir.path(), "sdb1"));
    }

    #[test]
    fn parent_device_extraction() {
        assert_eq!(parent_device("sda1"), Some("sda"));
        assert_eq!(parent_device("nvme0n1p1"), Some("nvme0n1"));
        assert_eq!(parent_device("mmcblk0p2"), Some("mmcblk0"));
        assert_eq!(parent_device("sda"), None);
        assert_eq!(parent_device("1"), None);
    }
}
