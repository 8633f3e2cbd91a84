//! Juju charm requesting a mounted filesystem

use failure::Error;

use fscharms::hook;
use fscharms::mount_client::MountClient;

fn main() -> Result<(), Error> {
    hook::run(|_| MountClient::new())
}
