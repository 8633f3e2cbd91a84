//! Juju charm publishing an external NFS export

use failure::Error;

use fscharms::hook;
use fscharms::nfs_server_proxy::NfsServerProxy;

fn main() -> Result<(), Error> {
    hook::run(|_| NfsServerProxy::new())
}
