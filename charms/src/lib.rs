//! Charms built on `jujufs`
//!
//! Each module holds one charm. The binaries under `src/bin` only wire a
//! charm to the hook tools through `hook::run`.

pub mod cephfs_server_proxy;
pub mod filesystem_client;
pub mod hook;
pub mod lustre_server_proxy;
pub mod mount_client;
pub mod nfs_server_proxy;
