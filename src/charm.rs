//! Charm trait and event dispatch

use log::{debug, warn};

use crate::error::CharmError;
use crate::event::HostEvent;
use crate::model::Model;

/// What a handler did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Done,

    /// Deliver the event again on a later dispatch
    Defer,
}

/// A charm reacts to host events by reading and writing its model
pub trait Charm<M: Model> {
    fn handle(&mut self, model: &mut M, event: &HostEvent) -> Result<Handled, CharmError>;
}

fn deliver<M, C>(model: &mut M, charm: &mut C, event: &HostEvent) -> Result<(), CharmError>
where
    M: Model,
    C: Charm<M>,
{
    match charm.handle(model, event)? {
        Handled::Done => Ok(()),
        Handled::Defer => {
            debug!("deferring {:?}", event);
            model.defer(event)
        }
    }
}

fn redeliver<M, C>(model: &mut M, charm: &mut C, event: &HostEvent) -> Result<(), CharmError>
where
    M: Model,
    C: Charm<M>,
{
    // Events for relations that have since been torn down are dropped
    if let Some(relation) = event.relation() {
        if !model.relations(&relation.endpoint)?.contains(relation) {
            debug!("dropping deferred {:?}, relation is gone", event);
            return Ok(());
        }
    }

    debug!("re-emitting deferred {:?}", event);
    deliver(model, charm, event)
}

/// Runs one dispatch: previously deferred events first, oldest first, then `event`
///
/// If a deferred event fails, it stays queued along with every event after
/// it, and the error is returned.
pub fn dispatch<M, C>(model: &mut M, charm: &mut C, event: &HostEvent) -> Result<(), CharmError>
where
    M: Model,
    C: Charm<M>,
{
    let mut pending = model.take_deferred()?.into_iter();

    while let Some(deferred) = pending.next() {
        if let Err(err) = redeliver(model, charm, &deferred) {
            warn!("failed to re-emit deferred {:?}: {}", deferred, err);
            model.defer(&deferred)?;
            for rest in pending {
                model.defer(&rest)?;
            }
            return Err(err);
        }
    }

    deliver(model, charm, event)
}
