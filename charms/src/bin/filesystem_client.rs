//! Juju charm mounting the filesystem of its provider

use failure::Error;

use fscharms::filesystem_client::FilesystemClient;
use fscharms::hook;
use jujufs::model::Agent;
use jujufs::mounts::AutofsExecutor;

fn main() -> Result<(), Error> {
    hook::run(|model| FilesystemClient::new(AutofsExecutor::new(model.app_name())))
}
