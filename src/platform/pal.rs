//! Storage discovery adapter: the trait the synthesis pass reads candidate
//! storage through, plus the Linux (`/proc` + `statvfs`) and static
//! implementations.

#![allow(missing_docs)]

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, TcfError};
use crate::core::modes::DeviceClass;
use crate::core::size::gross_up_for_reservation;

/// One candidate storage resource. Read-only once obtained.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageResource {
    /// Mount path, possibly holding `$VAR` references expanded at build time.
    pub mount: String,
    pub available_bytes: u64,
    pub shared: bool,
    pub device_class: DeviceClass,
}

impl StorageResource {
    /// A user-declared device. `usable_bytes` is grossed up so the tier
    /// builder's 10% reservation lands exactly on it.
    #[must_use]
    pub fn declared(mount: &str, usable_bytes: u64) -> Self {
        Self {
            mount: mount.to_string(),
            available_bytes: gross_up_for_reservation(usable_bytes),
            shared: false,
            device_class: DeviceClass::Custom,
        }
    }
}

/// Source of candidate storage resources.
pub trait StorageDiscovery: Send + Sync {
    /// Candidate resources, fastest first. `require_root` widens the search to
    /// mounts only a privileged user can write.
    fn discover(&self, require_root: bool) -> Result<Vec<StorageResource>>;
}

/// Filesystem statistics for a mount.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsStats {
    pub available_bytes: u64,
    pub is_readonly: bool,
}

/// Mount-point metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountPoint {
    pub path: PathBuf,
    pub device: String,
    pub fs_type: String,
    pub is_ram_backed: bool,
}

/// Linux discovery using `/proc/self/mounts`, `statvfs`, and sysfs.
#[derive(Debug)]
pub struct LinuxDiscovery {
    mounts_cache: RwLock<Option<(Vec<MountPoint>, Instant)>>,
    cache_ttl: Duration,
    sysfs_root: PathBuf,
}

impl Default for LinuxDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxDiscovery {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mounts_cache: RwLock::new(None),
            cache_ttl: Duration::from_secs(5),
            sysfs_root: PathBuf::from("/sys"),
        }
    }

    pub fn mount_points(&self) -> Result<Vec<MountPoint>> {
        {
            let cache = self.mounts_cache.read();
            if let Some((mounts, collected_at)) = &*cache
                && collected_at.elapsed() < self.cache_ttl
            {
                return Ok(mounts.clone());
            }
        }

        let raw = fs::read_to_string("/proc/self/mounts").map_err(|source| TcfError::Io {
            path: PathBuf::from("/proc/self/mounts"),
            source,
        })?;
        let mounts = parse_proc_mounts(&raw);
        if mounts.is_empty() {
            return Err(TcfError::MountParse {
                details: "no parseable entries in /proc/self/mounts".to_string(),
            });
        }

        *self.mounts_cache.write() = Some((mounts.clone(), Instant::now()));
        Ok(mounts)
    }

    fn rotational(&self, block_device: &str) -> Option<bool> {
        let flag = self
            .sysfs_root
            .join("block")
            .join(block_device)
            .join("queue")
            .join("rotational");
        match fs::read_to_string(flag).ok()?.trim() {
            "0" => Some(false),
            "1" => Some(true),
            _ => None,
        }
    }
}

impl StorageDiscovery for LinuxDiscovery {
    fn discover(&self, require_root: bool) -> Result<Vec<StorageResource>> {
        let mounts = self.mount_points()?;
        Ok(select_mounts(
            mounts,
            require_root,
            is_user_writable,
            fs_stats,
            |dev| self.rotational(dev),
        ))
    }
}

/// Turn a mount table into candidate resources, fastest first.
///
/// A block device is claimed by the first accepted mount (shortest path), so
/// bind mounts of an accepted mount collapse onto it while a writable bind of
/// a rejected mount still counts.
pub fn select_mounts<W, S, R>(
    mut mounts: Vec<MountPoint>,
    require_root: bool,
    writable: W,
    stats_of: S,
    rotational: R,
) -> Vec<StorageResource>
where
    W: Fn(&Path) -> bool,
    S: Fn(&Path) -> Result<FsStats>,
    R: Fn(&str) -> Option<bool>,
{
    mounts.sort_by_key(|mount| mount.path.as_os_str().len());

    let mut seen_devices = HashSet::new();
    let mut resources = Vec::new();
    for mount in &mounts {
        if mount.is_ram_backed || is_pseudo_fs(&mount.fs_type) {
            continue;
        }
        let block_device = mount.device.starts_with("/dev/");
        if block_device && seen_devices.contains(&mount.device) {
            continue;
        }
        if !require_root && !writable(&mount.path) {
            continue;
        }
        let stats = match stats_of(&mount.path) {
            Ok(stats) => stats,
            Err(err) => {
                eprintln!("[TCF-WARN] skipping {}: {err}", mount.path.display());
                continue;
            }
        };
        if stats.is_readonly {
            continue;
        }
        if block_device {
            seen_devices.insert(mount.device.clone());
        }

        resources.push(StorageResource {
            mount: mount.path.to_string_lossy().into_owned(),
            available_bytes: stats.available_bytes,
            shared: is_shared_fs(&mount.fs_type),
            device_class: classify_mount(mount, &rotational),
        });
    }

    sort_fastest_first(&mut resources);
    resources
}

/// Fixed resource list, for tests and embedding callers that discover elsewhere.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    resources: Vec<StorageResource>,
}

impl StaticDiscovery {
    #[must_use]
    pub fn new(resources: Vec<StorageResource>) -> Self {
        Self { resources }
    }
}

impl StorageDiscovery for StaticDiscovery {
    fn discover(&self, _require_root: bool) -> Result<Vec<StorageResource>> {
        Ok(self.resources.clone())
    }
}

/// Detect the discovery implementation for this host.
pub fn detect_discovery() -> Result<Arc<dyn StorageDiscovery>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(LinuxDiscovery::new()))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(TcfError::UnsupportedPlatform {
            details: "storage discovery is only implemented for Linux; declare [dpe] devices"
                .to_string(),
        })
    }
}

#[cfg(unix)]
fn fs_stats(path: &Path) -> Result<FsStats> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(|error| TcfError::Discovery {
        path: path.to_path_buf(),
        details: error.to_string(),
    })?;
    let fragment = stat.fragment_size();
    Ok(FsStats {
        available_bytes: stat.blocks_available().saturating_mul(fragment),
        is_readonly: stat.flags().contains(nix::sys::statvfs::FsFlags::ST_RDONLY),
    })
}

#[cfg(not(unix))]
fn fs_stats(path: &Path) -> Result<FsStats> {
    Err(TcfError::Discovery {
        path: path.to_path_buf(),
        details: "statvfs unavailable on this platform".to_string(),
    })
}

#[cfg(unix)]
fn is_user_writable(path: &Path) -> bool {
    nix::unistd::access(path, nix::unistd::AccessFlags::W_OK).is_ok()
}

#[cfg(not(unix))]
fn is_user_writable(_path: &Path) -> bool {
    true
}

/// Deterministic order: device class speed, then mount path.
pub fn sort_fastest_first(resources: &mut [StorageResource]) {
    resources.sort_by(|left, right| {
        match left
            .device_class
            .speed_rank()
            .cmp(&right.device_class.speed_rank())
        {
            Ordering::Equal => left.mount.cmp(&right.mount),
            other => other,
        }
    });
}

/// Classify a mount by filesystem type and backing block device.
fn classify_mount<F>(mount: &MountPoint, rotational: &F) -> DeviceClass
where
    F: Fn(&str) -> Option<bool>,
{
    if is_shared_fs(&mount.fs_type) {
        return DeviceClass::Pfs;
    }
    let Some(name) = mount.device.strip_prefix("/dev/") else {
        return DeviceClass::Unknown;
    };
    if name.starts_with("nvme") {
        return DeviceClass::Nvme;
    }
    if name.starts_with("pmem") {
        return DeviceClass::Pmem;
    }
    let base = name.trim_end_matches(|c: char| c.is_ascii_digit());
    match rotational(base) {
        Some(false) => DeviceClass::Ssd,
        Some(true) => DeviceClass::Hdd,
        None => DeviceClass::Unknown,
    }
}

fn parse_proc_mounts(raw: &str) -> Vec<MountPoint> {
    let mut mounts = Vec::new();
    for line in raw.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            eprintln!("[TCF-WARN] skipping malformed /proc/self/mounts line: {line}");
            continue;
        }
        let fs_type = fields[2].to_string();
        mounts.push(MountPoint {
            path: unescape_mount_path(fields[1]),
            device: fields[0].to_string(),
            is_ram_backed: is_ram_fs(&fs_type),
            fs_type,
        });
    }
    mounts
}

fn is_ram_fs(fs_type: &str) -> bool {
    matches!(
        fs_type.to_ascii_lowercase().as_str(),
        "tmpfs" | "ramfs" | "devtmpfs"
    )
}

fn is_pseudo_fs(fs_type: &str) -> bool {
    matches!(
        fs_type,
        "proc"
            | "sysfs"
            | "cgroup"
            | "cgroup2"
            | "devpts"
            | "mqueue"
            | "debugfs"
            | "tracefs"
            | "securityfs"
            | "pstore"
            | "bpf"
            | "autofs"
            | "configfs"
            | "fusectl"
            | "hugetlbfs"
            | "binfmt_misc"
            | "nsfs"
            | "efivarfs"
            | "selinuxfs"
            | "rpc_pipefs"
            | "squashfs"
    )
}

fn is_shared_fs(fs_type: &str) -> bool {
    matches!(
        fs_type,
        "nfs"
            | "nfs4"
            | "lustre"
            | "beegfs"
            | "gpfs"
            | "orangefs"
            | "pvfs2"
            | "ceph"
            | "cephfs"
            | "glusterfs"
            | "fuse.glusterfs"
            | "cifs"
            | "smbfs"
    )
}

/// Decode octal escape sequences (`\NNN`) used by the Linux kernel.
fn unescape_mount_path(raw: &str) -> PathBuf {
    let mut bytes = Vec::with_capacity(raw.len());
    let raw_bytes = raw.as_bytes();
    let mut i = 0;
    while i < raw_bytes.len() {
        if raw_bytes[i] == b'\\' && i + 3 < raw_bytes.len() {
            let digits = &raw_bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let val = digits
                    .iter()
                    .fold(0_u16, |acc, digit| acc * 8 + u16::from(digit - b'0'));
                if let Ok(byte) = u8::try_from(val) {
                    bytes.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        bytes.push(raw_bytes[i]);
        i += 1;
    }

    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStringExt;
        PathBuf::from(std::ffi::OsString::from_vec(bytes))
    }
    #[cfg(not(unix))]
    {
        PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount(path: &str, device: &str, fs_type: &str) -> MountPoint {
        MountPoint {
            path: path.into(),
            device: device.to_string(),
            fs_type: fs_type.to_string(),
            is_ram_backed: is_ram_fs(fs_type),
        }
    }

    fn resource(mount: &str, class: DeviceClass) -> StorageResource {
        StorageResource {
            mount: mount.to_string(),
            available_bytes: 1,
            shared: false,
            device_class: class,
        }
    }

    #[test]
    fn parses_mount_table() {
        let sample = "/dev/nvme0n1p1 /mnt/nvme ext4 rw,relatime 0 0\n\
                      tmpfs /dev/shm tmpfs rw,nosuid,nodev 0 0\n\
                      garbage\n";
        let mounts = parse_proc_mounts(sample);
        assert_eq!(mounts.len(), 2);
        assert!(mounts.iter().any(|m| m.path == Path::new("/mnt/nvme")));
        assert!(mounts.iter().any(|m| m.is_ram_backed));
    }

    #[test]
    fn declared_device_grosses_up_for_reservation() {
        let res = StorageResource::declared("/mnt/nvme0", 900);
        assert_eq!(res.available_bytes, 1000);
        assert_eq!(res.device_class, DeviceClass::Custom);
        assert!(!res.shared);
    }

    #[test]
    fn classifies_by_device_name_and_rotational_flag() {
        let no_sysfs = |_: &str| None;
        assert_eq!(
            classify_mount(&mount("/a", "/dev/nvme0n1p2", "xfs"), &no_sysfs),
            DeviceClass::Nvme
        );
        assert_eq!(
            classify_mount(&mount("/b", "/dev/pmem0", "ext4"), &no_sysfs),
            DeviceClass::Pmem
        );
        assert_eq!(
            classify_mount(&mount("/c", "/dev/sda1", "ext4"), &|dev: &str| {
                assert_eq!(dev, "sda");
                Some(false)
            }),
            DeviceClass::Ssd
        );
        assert_eq!(
            classify_mount(&mount("/d", "/dev/sdb2", "ext4"), &|_: &str| Some(true)),
            DeviceClass::Hdd
        );
        assert_eq!(
            classify_mount(&mount("/e", "server:/export", "nfs4"), &no_sysfs),
            DeviceClass::Pfs
        );
        assert_eq!(
            classify_mount(&mount("/f", "overlay", "overlay"), &no_sysfs),
            DeviceClass::Unknown
        );
    }

    #[test]
    fn sorts_fastest_class_then_path() {
        let mut resources = vec![
            resource("/z/hdd", DeviceClass::Hdd),
            resource("/b/nvme", DeviceClass::Nvme),
            resource("/a/nvme", DeviceClass::Nvme),
            resource("/pfs", DeviceClass::Pfs),
            resource("/ssd", DeviceClass::Ssd),
        ];
        sort_fastest_first(&mut resources);
        let order: Vec<&str> = resources.iter().map(|r| r.mount.as_str()).collect();
        assert_eq!(order, ["/a/nvme", "/b/nvme", "/ssd", "/z/hdd", "/pfs"]);
    }

    #[test]
    fn pseudo_and_shared_filesystems_are_recognized() {
        assert!(is_pseudo_fs("proc"));
        assert!(is_pseudo_fs("cgroup2"));
        assert!(!is_pseudo_fs("ext4"));
        assert!(is_shared_fs("lustre"));
        assert!(!is_shared_fs("xfs"));
    }

    #[test]
    fn static_discovery_returns_its_list() {
        let discovery = StaticDiscovery::new(vec![resource("/mnt/a", DeviceClass::Ssd)]);
        let found = discovery.discover(false).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].mount, "/mnt/a");
    }

    #[test]
    fn unescapes_octal_sequences() {
        assert_eq!(
            unescape_mount_path("/mnt/my\\040dir"),
            PathBuf::from("/mnt/my dir")
        );
        assert_eq!(unescape_mount_path("/mnt/a\\04"), PathBuf::from("/mnt/a\\04"));
    }

    #[cfg(unix)]
    #[test]
    fn escapes_above_one_byte_are_kept_verbatim() {
        use std::os::unix::ffi::OsStringExt;

        assert_eq!(
            unescape_mount_path("/mnt/\\777x"),
            PathBuf::from("/mnt/\\777x")
        );
        assert_eq!(
            unescape_mount_path("/mnt/\\400"),
            PathBuf::from("/mnt/\\400")
        );
        assert_eq!(
            unescape_mount_path("/mnt/\\377"),
            PathBuf::from(std::ffi::OsString::from_vec(b"/mnt/\xff".to_vec()))
        );
    }

    fn writable_stats(_: &Path) -> Result<FsStats> {
        Ok(FsStats {
            available_bytes: 1 << 30,
            is_readonly: false,
        })
    }

    #[test]
    fn unwritable_root_does_not_hide_writable_bind_on_same_device() {
        let mounts = vec![
            mount("/", "/dev/vda", "ext4"),
            mount("/tmp/scratch", "/dev/vda", "ext4"),
            mount("/proc", "proc", "proc"),
        ];
        let found = select_mounts(
            mounts,
            false,
            |path| path == Path::new("/tmp/scratch"),
            writable_stats,
            |_| Some(false),
        );
        let paths: Vec<&str> = found.iter().map(|r| r.mount.as_str()).collect();
        assert_eq!(paths, ["/tmp/scratch"]);
    }

    #[test]
    fn accepted_mount_claims_its_device() {
        let mounts = vec![
            mount("/data/bind", "/dev/sdb1", "xfs"),
            mount("/data", "/dev/sdb1", "xfs"),
        ];
        let found = select_mounts(mounts, false, |_| true, writable_stats, |_| Some(true));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].mount, "/data");
        assert_eq!(found[0].device_class, DeviceClass::Hdd);
    }

    #[test]
    fn readonly_mount_does_not_claim_its_device() {
        let mounts = vec![
            mount("/ro", "/dev/sdc1", "ext4"),
            mount("/ro/rw-bind", "/dev/sdc1", "ext4"),
        ];
        let found = select_mounts(
            mounts,
            true,
            |_| true,
            |path| {
                Ok(FsStats {
                    available_bytes: 10,
                    is_readonly: path == Path::new("/ro"),
                })
            },
            |_| None,
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].mount, "/ro/rw-bind");
    }

    #[test]
    fn ram_and_stat_failures_are_skipped() {
        let mounts = vec![
            mount("/dev/shm", "tmpfs", "tmpfs"),
            mount("/gone", "/dev/sdd1", "ext4"),
        ];
        let found = select_mounts(
            mounts,
            true,
            |_| true,
            |path| {
                Err(TcfError::Discovery {
                    path: path.to_path_buf(),
                    details: "stale".to_string(),
                })
            },
            |_| None,
        );
        assert!(found.is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_discovery_reads_live_mount_table() {
        let discovery = LinuxDiscovery::new();
        let mounts = discovery.mount_points().expect("mount table readable");
        assert!(!mounts.is_empty());
        // Cached second read must agree.
        assert_eq!(discovery.mount_points().unwrap(), mounts);
    }
}
