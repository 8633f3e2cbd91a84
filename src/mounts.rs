//! Converges the machine's autofs mount table to a desired set of mounts
//!
//! Mounts are managed through an autofs direct map owned by this
//! application. Every reconciliation rebuilds the whole map from the mounts
//! it was given, so entries that are not added again are dropped.

use std::collections::BTreeMap;
use std::io::Write;
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};

use ex::fs::{create_dir_all, read, File};
use log::{error, info, warn};
use tempfile::NamedTempFile;

use crate::cmd;
use crate::endpoint::FilesystemInfo;
use crate::error::CharmError;
use crate::interfaces::mount_info::MountInfo;
use crate::paths;

/// Packages needed to mount every supported filesystem type
pub const PACKAGES: &[&str] = &["ceph-common", "nfs-common", "autofs"];

/// Flags applied to a mount, defaulting to the permissive choice on each axis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountOptions {
    pub noexec: bool,
    pub nosuid: bool,
    pub nodev: bool,
    pub read_only: bool,
}

impl MountOptions {
    pub fn to_options(&self) -> Vec<String> {
        vec![
            if self.noexec { "noexec" } else { "exec" },
            if self.nosuid { "nosuid" } else { "suid" },
            if self.nodev { "nodev" } else { "dev" },
            if self.read_only { "ro" } else { "rw" },
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
}

impl From<&MountInfo> for MountOptions {
    fn from(info: &MountInfo) -> Self {
        Self {
            noexec: info.noexec,
            nosuid: info.nosuid,
            nodev: info.nodev,
            read_only: info.read_only,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MountEntry {
    endpoint: String,
    options: Vec<String>,
}

/// Endpoint string and filesystem specific options for an autofs entry
fn endpoint_and_options(info: &FilesystemInfo) -> (String, Vec<String>) {
    match info {
        FilesystemInfo::Nfs {
            hostname,
            port,
            path,
        } => {
            let host = if hostname.parse::<Ipv6Addr>().is_ok() {
                format!("[{}]", hostname)
            } else {
                hostname.clone()
            };

            let mut options = vec![
                "fstype=nfs".to_string(),
                // Lets the client fall back to older versions the server supports
                "nfsvers=4".to_string(),
                "minorversion=2".to_string(),
            ];
            if let Some(p) = port {
                options.push(format!("port={}", p));
            }

            (format!("{}:{}", host, path), options)
        }
        FilesystemInfo::Cephfs {
            fsid,
            name,
            path,
            monitor_hosts,
            user,
            key,
        } => (
            format!("{}@{}.{}={}", user, fsid, name, path),
            vec![
                "fstype=ceph".to_string(),
                format!("mon_addr={}", monitor_hosts.join("/")),
                format!("secret={}", key),
            ],
        ),
        FilesystemInfo::Lustre { mgs_ids, fs_name } => (
            format!("{}:/{}", mgs_ids.join(":"), fs_name),
            vec!["fstype=lustre".to_string()],
        ),
    }
}

/// The desired set of mounts, keyed by mountpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mounts {
    entries: BTreeMap<String, MountEntry>,
}

impl Mounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a mount, replacing any earlier one at the same mountpoint
    ///
    /// Map entries are whitespace separated, so a mountpoint, endpoint or
    /// option containing whitespace is refused rather than written.
    pub fn add<P: AsRef<Path>>(
        &mut self,
        info: &FilesystemInfo,
        mountpoint: P,
        options: &MountOptions,
    ) -> Result<(), CharmError> {
        let mountpoint = mountpoint.as_ref().to_string_lossy().into_owned();
        if !mountpoint.starts_with('/') {
            return Err(CharmError::InvalidRecord(format!(
                "mountpoint `{}` is not an absolute path",
                mountpoint
            )));
        }

        let (endpoint, extra) = endpoint_and_options(info);
        let mut options = options.to_options();
        options.extend(extra);
        options.sort();

        let fields = std::iter::once(&mountpoint)
            .chain(std::iter::once(&endpoint))
            .chain(options.iter());
        for field in fields {
            if field.chars().any(char::is_whitespace) {
                return Err(CharmError::InvalidRecord(format!(
                    "`{}` contains whitespace and can't be written to the mount map",
                    field
                )));
            }
        }

        self.entries
            .insert(mountpoint, MountEntry { endpoint, options });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn mountpoints(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// Renders the autofs direct map, one line per mountpoint, in mountpoint order
    pub fn to_table(&self) -> String {
        self.entries
            .iter()
            .map(|(mountpoint, entry)| {
                format!(
                    "{} -{} {}",
                    mountpoint,
                    entry.options.join(","),
                    entry.endpoint
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Side effects needed to manage mounts on a machine
pub trait MountExecutor {
    /// Output of `systemd-detect-virt`
    fn virtualization(&self) -> Result<String, CharmError>;

    fn package_present(&self, name: &str) -> Result<bool, CharmError>;

    fn ensure_package(&mut self, name: &str) -> Result<(), CharmError>;

    /// Whether the autofs master entry and map exist
    fn tables_present(&self) -> bool;

    fn init_tables(&mut self) -> Result<(), CharmError>;

    /// The last applied map, empty if there is none
    fn read_table(&self) -> Result<String, CharmError>;

    fn create_mountpoint(&mut self, path: &str) -> Result<(), CharmError>;

    /// Replaces the map, either wholly or not at all
    fn write_table(&mut self, table: &str) -> Result<(), CharmError>;

    fn reload_service(&mut self) -> Result<(), CharmError>;
}

/// Executor backed by autofs, apt and systemd
#[derive(Debug, Clone)]
pub struct AutofsExecutor {
    master_file: PathBuf,
    map_file: PathBuf,
}

impl AutofsExecutor {
    /// Executor for the maps owned by the application `app`
    pub fn new(app: &str) -> Self {
        Self::with_paths(paths::autofs_master_file(app), paths::autofs_map_file(app))
    }

    pub fn with_paths<P: Into<PathBuf>, Q: Into<PathBuf>>(master_file: P, map_file: Q) -> Self {
        Self {
            master_file: master_file.into(),
            map_file: map_file.into(),
        }
    }

    fn write_file(path: &Path, contents: &str) -> Result<(), CharmError> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }

        File::create(path)?.write_all(contents.as_bytes())?;
        Ok(())
    }
}

impl MountExecutor for AutofsExecutor {
    fn virtualization(&self) -> Result<String, CharmError> {
        let output = cmd::get_output("systemd-detect-virt", &[] as &[&str])?;
        Ok(String::from_utf8_lossy(&output).trim().to_string())
    }

    fn package_present(&self, name: &str) -> Result<bool, CharmError> {
        match cmd::get_output("dpkg-query", &["-W", "-f=${Status}", name]) {
            Ok(status) => Ok(String::from_utf8_lossy(&status).contains("install ok installed")),
            Err(CharmError::HookToolError(..)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn ensure_package(&mut self, name: &str) -> Result<(), CharmError> {
        if self.package_present(name)? {
            return Ok(());
        }

        info!("Installing {}", name);
        cmd::run("apt-get", &["install", "--yes", "--quiet", name]).map_err(|err| {
            error!("failed to install {}: {}", name, err);
            CharmError::PackageError(name.to_string(), err.to_string())
        })
    }

    fn tables_present(&self) -> bool {
        self.master_file.exists() && self.map_file.exists()
    }

    fn init_tables(&mut self) -> Result<(), CharmError> {
        if !self.map_file.exists() {
            Self::write_file(&self.map_file, "")?;
        }

        let master = format!("/- {}", self.map_file.display());
        Self::write_file(&self.master_file, &master)
    }

    fn read_table(&self) -> Result<String, CharmError> {
        if !self.map_file.exists() {
            return Ok(String::new());
        }

        Ok(String::from_utf8_lossy(&read(&self.map_file)?).into_owned())
    }

    fn create_mountpoint(&mut self, path: &str) -> Result<(), CharmError> {
        Ok(create_dir_all(path)?)
    }

    fn write_table(&mut self, table: &str) -> Result<(), CharmError> {
        let dir = self
            .map_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut staged = NamedTempFile::new_in(dir)?;
        staged.write_all(table.as_bytes())?;
        staged
            .persist(&self.map_file)
            .map_err(|err| CharmError::MountError(err.error.to_string()))?;

        Ok(())
    }

    fn reload_service(&mut self) -> Result<(), CharmError> {
        if let Err(err) = cmd::run("systemctl", &["reload", "autofs"]) {
            warn!("reloading autofs failed, restarting it: {}", err);
            cmd::run("systemctl", &["restart", "autofs"])?;
        }

        Ok(())
    }
}

/// Applies `Mounts` to the machine through an executor
#[derive(Debug)]
pub struct MountsManager<E> {
    executor: E,
}

impl<E: MountExecutor> MountsManager<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    /// Whether filesystems can be mounted here at all
    ///
    /// LXD containers can't mount network filesystems. If the platform can't
    /// be detected, mounting is assumed to work.
    pub fn supported(&self) -> bool {
        match self.executor.virtualization() {
            Ok(virt) => !virt.contains("lxc"),
            Err(err) => {
                warn!("could not detect execution in virtualized environment: {}", err);
                true
            }
        }
    }

    /// Whether the packages and autofs maps are in place
    pub fn installed(&self) -> Result<bool, CharmError> {
        for pkg in PACKAGES {
            if !self.executor.package_present(pkg)? {
                return Ok(false);
            }
        }

        Ok(self.executor.tables_present())
    }

    pub fn install(&mut self) -> Result<(), CharmError> {
        for pkg in PACKAGES {
            self.executor.ensure_package(pkg)?;
        }

        self.executor.init_tables().map_err(|err| {
            error!("failed to create the required autofs files: {}", err);
            CharmError::MountError("failed to create the required autofs files".into())
        })
    }

    /// Makes `mounts` the only mounts managed on this machine
    ///
    /// Returns whether anything was applied. Unless `force` is set, nothing
    /// is touched when the rendered table matches the last applied one.
    pub fn reconcile(&mut self, mounts: &Mounts, force: bool) -> Result<bool, CharmError> {
        let table = mounts.to_table();
        let current = self.executor.read_table()?;

        if !force && table == current {
            return Ok(false);
        }

        let applied = self.apply(mounts, &table, &current);
        if let Err(err) = &applied {
            error!("failed to mount filesystems: {}", err);
        }

        applied
            .map(|_| true)
            .map_err(|err| match err {
                CharmError::MountError(_) => err,
                other => CharmError::MountError(other.to_string()),
            })
    }

    fn apply(&mut self, mounts: &Mounts, table: &str, previous: &str) -> Result<(), CharmError> {
        for mountpoint in mounts.mountpoints() {
            self.executor.create_mountpoint(mountpoint)?;
        }

        self.executor.write_table(table)?;

        // autofs still serves the previous map, so that is what stays on disk.
        // The next pass then sees a difference and reloads again.
        if let Err(err) = self.executor.reload_service() {
            if let Err(restore) = self.executor.write_table(previous) {
                warn!("failed to restore the previous autofs map: {}", restore);
            }
            return Err(err);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::testing::{Call, FakeExecutor};

    fn nfs(hostname: &str, port: Option<u16>) -> FilesystemInfo {
        FilesystemInfo::Nfs {
            hostname: hostname.into(),
            port,
            path: "/data".into(),
        }
    }

    #[test]
    fn test_nfs_entry() {
        let mut mounts = Mounts::new();
        mounts.add(&nfs("192.168.1.1", None), "/mnt/data", &MountOptions::default()).unwrap();

        assert_eq!(
            mounts.to_table(),
            "/mnt/data -dev,exec,fstype=nfs,minorversion=2,nfsvers=4,rw,suid 192.168.1.1:/data"
        );
    }

    #[test]
    fn test_nfs_ipv6_entry() {
        let mut mounts = Mounts::new();
        let options = MountOptions {
            read_only: true,
            ..MountOptions::default()
        };
        mounts.add(&nfs("2001:db8::2:1", Some(2049)), "/mnt/data", &options).unwrap();

        assert_eq!(
            mounts.to_table(),
            "/mnt/data -dev,exec,fstype=nfs,minorversion=2,nfsvers=4,port=2049,ro,suid [2001:db8::2:1]:/data"
        );
    }

    #[test]
    fn test_cephfs_entry() {
        let info = FilesystemInfo::Cephfs {
            fsid: "fsid".into(),
            name: "fs".into(),
            path: "/".into(),
            monitor_hosts: vec!["10.0.0.1:6789".into(), "10.0.0.2:6789".into()],
            user: "user".into(),
            key: "key".into(),
        };
        let options = MountOptions {
            noexec: true,
            nosuid: true,
            nodev: true,
            read_only: false,
        };

        let mut mounts = Mounts::new();
        mounts.add(&info, "/mnt/ceph", &options).unwrap();

        assert_eq!(
            mounts.to_table(),
            "/mnt/ceph -fstype=ceph,mon_addr=10.0.0.1:6789/10.0.0.2:6789,nodev,noexec,nosuid,rw,secret=key user@fsid.fs=/"
        );
    }

    #[test]
    fn test_lustre_entry() {
        let info = FilesystemInfo::Lustre {
            mgs_ids: vec!["10.0.0.1@tcp".into(), "10.0.0.2@tcp".into()],
            fs_name: "lustre".into(),
        };

        let mut mounts = Mounts::new();
        mounts.add(&info, "/mnt/lustre", &MountOptions::default()).unwrap();

        assert!(mounts.to_table().ends_with(" 10.0.0.1@tcp:10.0.0.2@tcp:/lustre"));
        assert!(mounts.to_table().contains("fstype=lustre"));
    }

    #[test]
    fn test_add_rejects_unwritable_entries() {
        let spaced = FilesystemInfo::Nfs {
            hostname: "host".into(),
            port: None,
            path: "/srv/my data".into(),
        };
        let cases: Vec<(FilesystemInfo, &str)> = vec![
            (nfs("host", None), "/mnt/my data"),
            (nfs("host", None), "/mnt/tab\tseparated"),
            (nfs("host", None), "mnt/data"),
            (nfs("host", None), ""),
            (spaced, "/mnt/data"),
        ];

        for (info, mountpoint) in cases {
            println!("Testing {:?} at {:?}", info, mountpoint);
            let mut mounts = Mounts::new();

            match mounts.add(&info, mountpoint, &MountOptions::default()) {
                Err(CharmError::InvalidRecord(_)) => {}
                other => panic!("unexpected result {:?}", other),
            }
            assert!(mounts.is_empty());
        }
    }

    #[test]
    fn test_table_sorted_by_mountpoint() {
        let mut mounts = Mounts::new();
        mounts.add(&nfs("b", None), "/srv/b", &MountOptions::default()).unwrap();
        mounts.add(&nfs("a", None), "/srv/a", &MountOptions::default()).unwrap();

        let table = mounts.to_table();
        let lines: Vec<_> = table.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("/srv/a "));
        assert!(lines[1].starts_with("/srv/b "));
    }

    #[test]
    fn test_reconcile_skips_unchanged() {
        let mut manager = MountsManager::new(FakeExecutor::default());
        let mut mounts = Mounts::new();
        mounts.add(&nfs("host", None), "/mnt/data", &MountOptions::default()).unwrap();

        assert!(manager.reconcile(&mounts, false).unwrap());
        assert!(!manager.reconcile(&mounts, false).unwrap());

        assert_eq!(manager.executor().count(&Call::Reload), 1);
        assert_eq!(manager.executor().count(&Call::WriteTable), 1);
    }

    #[test]
    fn test_reconcile_force() {
        let mut manager = MountsManager::new(FakeExecutor::default());
        let mounts = Mounts::new();

        assert!(manager.reconcile(&mounts, true).unwrap());
        assert!(manager.reconcile(&mounts, true).unwrap());
        assert_eq!(manager.executor().count(&Call::Reload), 2);
    }

    #[test]
    fn test_reconcile_removes_dropped_mounts() {
        let mut manager = MountsManager::new(FakeExecutor::default());
        let mut mounts = Mounts::new();
        mounts.add(&nfs("host", None), "/mnt/data", &MountOptions::default()).unwrap();
        manager.reconcile(&mounts, false).unwrap();

        assert!(manager.reconcile(&Mounts::new(), false).unwrap());
        assert_eq!(manager.executor().table, "");
    }

    #[test]
    fn test_failed_reload_is_retried() {
        let mut executor = FakeExecutor::default();
        executor.fail_reload = true;
        let mut manager = MountsManager::new(executor);

        let mut mounts = Mounts::new();
        mounts.add(&nfs("host", None), "/mnt/data", &MountOptions::default()).unwrap();

        match manager.reconcile(&mounts, false) {
            Err(CharmError::MountError(_)) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(manager.executor().table, "");

        manager.executor_mut().fail_reload = false;

        assert!(manager.reconcile(&mounts, false).unwrap());
        assert_eq!(manager.executor().count(&Call::Reload), 2);
        assert_eq!(manager.executor().table, mounts.to_table());
        assert!(!manager.reconcile(&mounts, false).unwrap());
    }

    #[test]
    fn test_supported() {
        let mut executor = FakeExecutor::default();
        executor.virtualization = Some("lxc".into());
        assert!(!MountsManager::new(executor).supported());

        let mut executor = FakeExecutor::default();
        executor.virtualization = Some("kvm".into());
        assert!(MountsManager::new(executor).supported());

        // Detection failing is not a reason to refuse mounting
        let mut executor = FakeExecutor::default();
        executor.virtualization = None;
        assert!(MountsManager::new(executor).supported());
    }

    #[test]
    fn test_install() {
        let mut manager = MountsManager::new(FakeExecutor::default());
        assert!(!manager.installed().unwrap());

        manager.install().unwrap();

        assert!(manager.installed().unwrap());
        for pkg in PACKAGES {
            assert!(manager.executor().packages.contains(*pkg));
        }
    }

    #[test]
    fn test_autofs_executor_tables() {
        let dir = TempDir::new().unwrap();
        let master = dir.path().join("auto.master.d").join("client.autofs");
        let map = dir.path().join("auto.client");
        let mut executor = AutofsExecutor::with_paths(&master, &map);

        assert!(!executor.tables_present());
        assert_eq!(executor.read_table().unwrap(), "");

        executor.init_tables().unwrap();
        assert!(executor.tables_present());
        assert_eq!(
            String::from_utf8(std::fs::read(&master).unwrap()).unwrap(),
            format!("/- {}", map.display())
        );

        executor.write_table("/mnt/data -rw host:/data").unwrap();
        assert_eq!(executor.read_table().unwrap(), "/mnt/data -rw host:/data");

        let mountpoint = dir.path().join("mnt").join("data");
        executor
            .create_mountpoint(mountpoint.to_str().unwrap())
            .unwrap();
        assert!(mountpoint.is_dir());
    }
}
