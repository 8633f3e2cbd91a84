//! Juju charm publishing an external Lustre filesystem

use failure::Error;

use fscharms::hook;
use fscharms::lustre_server_proxy::LustreServerProxy;

fn main() -> Result<(), Error> {
    hook::run(|_| LustreServerProxy::new())
}
