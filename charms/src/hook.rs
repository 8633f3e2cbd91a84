//! Entry point shared by the charm binaries

use std::env;
use std::path::Path;

use env_logger::Env;
use failure::{format_err, Error};
use log::info;
use structopt::StructOpt;

use jujufs::charm::{dispatch, Charm};
use jujufs::event::{HookEnv, HostEvent};
use jujufs::hook_tools::HookTools;

#[derive(StructOpt, Debug)]
pub struct HookOpts {
    #[structopt(name = "HOOK")]
    #[structopt(help = "Hook to run. Defaults to the hook Juju is dispatching")]
    hook: Option<String>,
}

/// Name of the hook to run, e.g. `mount-relation-changed`
fn hook_name(opts: &HookOpts) -> Option<String> {
    opts.hook
        .clone()
        .or_else(|| env::var("JUJU_DISPATCH_PATH").ok())
        .or_else(|| env::args().next())
        .and_then(|path| {
            Path::new(&path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
}

/// Runs the current hook against the charm built by `make_charm`
pub fn run<C, F>(make_charm: F) -> Result<(), Error>
where
    C: Charm<HookTools>,
    F: FnOnce(&HookTools) -> C,
{
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let opts = HookOpts::from_args();
    let hook = hook_name(&opts).ok_or_else(|| format_err!("Couldn't determine the hook to run"))?;

    let event = match HostEvent::from_hook(&hook, &HookEnv::from_env())? {
        Some(event) => event,
        None => {
            info!("Nothing to do for `{}`", hook);
            return Ok(());
        }
    };

    let mut model = HookTools::from_env()?.for_event(&event);
    let mut charm = make_charm(&model);

    dispatch(&mut model, &mut charm, &event)?;

    Ok(())
}
