//! Juju charm publishing an external CephFS share

use failure::Error;

use fscharms::cephfs_server_proxy::CephfsServerProxy;
use fscharms::hook;

fn main() -> Result<(), Error> {
    hook::run(|_| CephfsServerProxy::new())
}
