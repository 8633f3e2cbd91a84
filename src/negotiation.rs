//! Protocol state machines for both sides of a filesystem relation
//!
//! The relation interfaces classify each host event into an input, derive
//! the prior state from the cached snapshot of the observed scope, and step
//! the machine. Each step yields the next state and at most one signal,
//! which the interface turns into its own semantic event.

/// Provider side, per relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    /// No relation
    Idle,

    /// Related, but the requirer hasn't asked for anything yet
    AwaitingRequest,

    /// The requirer has asked, and nothing has been published in response
    Requested,

    /// A response has been published for the current request
    Served,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderInput {
    Joined,
    RequestAdded,
    RequestChanged,
    RequestWithdrawn,

    /// An unchanged request delivered again, after the handler deferred it
    Retry,
    Published,
    Broken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderSignal {
    Requested,
    Unrequested,
}

impl ProviderState {
    /// State implied by what is currently in the relation
    pub fn observe(requested: bool, served: bool) -> Self {
        match (requested, served) {
            (true, true) => ProviderState::Served,
            (true, false) => ProviderState::Requested,
            (false, _) => ProviderState::AwaitingRequest,
        }
    }

    pub fn step(self, input: ProviderInput) -> (Self, Option<ProviderSignal>) {
        use ProviderInput::*;
        use ProviderState::*;

        match (self, input) {
            (_, Broken) => (Idle, None),
            (Idle, Joined) => (AwaitingRequest, None),
            (state, Joined) => (state, None),
            (_, RequestAdded) | (_, RequestChanged) => (Requested, Some(ProviderSignal::Requested)),
            (Requested, RequestWithdrawn) | (Served, RequestWithdrawn) => {
                (AwaitingRequest, Some(ProviderSignal::Unrequested))
            }
            (state, RequestWithdrawn) => (state, None),
            (Requested, Retry) => (Requested, Some(ProviderSignal::Requested)),
            (state, Retry) => (state, None),
            (Requested, Published) | (Served, Published) => (Served, None),
            (state, Published) => (state, None),
        }
    }
}

/// Requirer side, per relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirerState {
    Disconnected,

    /// Related, and waiting for the provider to act on the request
    Connected,
    Mounted,
    Unmounted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirerInput {
    Created,

    /// The provider published what is needed to use the filesystem
    Ready,

    /// The provider withdrew it, or reported the filesystem as not mounted
    NotReady,
    Broken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirerSignal {
    Connected,
    Mounted,
    Unmounted,
    Disconnected,
}

impl RequirerState {
    /// State implied by the provider's last observed readiness
    pub fn observe(ready: Option<bool>) -> Self {
        match ready {
            None => RequirerState::Connected,
            Some(true) => RequirerState::Mounted,
            Some(false) => RequirerState::Unmounted,
        }
    }

    pub fn step(self, input: RequirerInput) -> (Self, Option<RequirerSignal>) {
        use RequirerInput::*;
        use RequirerState::*;

        match (self, input) {
            (_, Broken) => (Disconnected, Some(RequirerSignal::Disconnected)),
            (Disconnected, Created) => (Connected, Some(RequirerSignal::Connected)),
            (state, Created) => (state, None),
            // Re-published info is a new mount for the requirer
            (_, Ready) => (Mounted, Some(RequirerSignal::Mounted)),
            (Unmounted, NotReady) | (Disconnected, NotReady) => (self, None),
            (_, NotReady) => (Unmounted, Some(RequirerSignal::Unmounted)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_lifecycle() {
        let (state, signal) = ProviderState::Idle.step(ProviderInput::Joined);
        assert_eq!((state, signal), (ProviderState::AwaitingRequest, None));

        let (state, signal) = state.step(ProviderInput::RequestAdded);
        assert_eq!(
            (state, signal),
            (ProviderState::Requested, Some(ProviderSignal::Requested))
        );

        let (state, signal) = state.step(ProviderInput::Published);
        assert_eq!((state, signal), (ProviderState::Served, None));

        let (state, signal) = state.step(ProviderInput::RequestChanged);
        assert_eq!(
            (state, signal),
            (ProviderState::Requested, Some(ProviderSignal::Requested))
        );

        let (state, signal) = state.step(ProviderInput::RequestWithdrawn);
        assert_eq!(
            (state, signal),
            (ProviderState::AwaitingRequest, Some(ProviderSignal::Unrequested))
        );

        let (state, signal) = state.step(ProviderInput::Broken);
        assert_eq!((state, signal), (ProviderState::Idle, None));
    }

    #[test]
    fn test_provider_ignores_withdrawal_without_request() {
        let (state, signal) = ProviderState::AwaitingRequest.step(ProviderInput::RequestWithdrawn);

        assert_eq!((state, signal), (ProviderState::AwaitingRequest, None));
    }

    #[test]
    fn test_provider_publish_needs_request() {
        let (state, signal) = ProviderState::AwaitingRequest.step(ProviderInput::Published);

        assert_eq!((state, signal), (ProviderState::AwaitingRequest, None));
    }

    #[test]
    fn test_provider_retry_until_served() {
        let (state, signal) = ProviderState::Requested.step(ProviderInput::Retry);
        assert_eq!(
            (state, signal),
            (ProviderState::Requested, Some(ProviderSignal::Requested))
        );

        let (state, _) = state.step(ProviderInput::Published);
        assert_eq!(state.step(ProviderInput::Retry), (ProviderState::Served, None));
    }

    #[test]
    fn test_provider_observe() {
        assert_eq!(ProviderState::observe(false, true), ProviderState::AwaitingRequest);
        assert_eq!(ProviderState::observe(true, false), ProviderState::Requested);
        assert_eq!(ProviderState::observe(true, true), ProviderState::Served);
    }

    #[test]
    fn test_requirer_cycle() {
        let (state, signal) = RequirerState::Disconnected.step(RequirerInput::Created);
        assert_eq!(
            (state, signal),
            (RequirerState::Connected, Some(RequirerSignal::Connected))
        );

        let (state, signal) = state.step(RequirerInput::Ready);
        assert_eq!(
            (state, signal),
            (RequirerState::Mounted, Some(RequirerSignal::Mounted))
        );

        let (state, signal) = state.step(RequirerInput::NotReady);
        assert_eq!(
            (state, signal),
            (RequirerState::Unmounted, Some(RequirerSignal::Unmounted))
        );

        let (state, signal) = state.step(RequirerInput::NotReady);
        assert_eq!((state, signal), (RequirerState::Unmounted, None));

        let (state, signal) = state.step(RequirerInput::Ready);
        assert_eq!(
            (state, signal),
            (RequirerState::Mounted, Some(RequirerSignal::Mounted))
        );

        let (state, signal) = state.step(RequirerInput::Broken);
        assert_eq!(
            (state, signal),
            (RequirerState::Disconnected, Some(RequirerSignal::Disconnected))
        );
    }

    #[test]
    fn test_requirer_created_twice() {
        let (state, signal) = RequirerState::Connected.step(RequirerInput::Created);

        assert_eq!((state, signal), (RequirerState::Connected, None));
    }

    #[test]
    fn test_requirer_initially_not_mounted() {
        let (state, signal) = RequirerState::observe(None).step(RequirerInput::NotReady);

        assert_eq!(
            (state, signal),
            (RequirerState::Unmounted, Some(RequirerSignal::Unmounted))
        );
    }
}
