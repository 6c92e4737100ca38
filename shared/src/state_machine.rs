//! Session lifecycle state machine
//!
//! A streaming session starts `Active` and ends `Closed`. There is no way
//! back: reconnecting means building a new session.

/// Lifecycle state of one streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Active,
    Closed,
}

/// Events that can end a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Explicit close from the owner (remove, switch, teardown)
    CloseRequested,
    /// The transport dropped or errored underneath the session
    TransportLost { reason: String },
}

/// Result of feeding an event to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Active -> Closed happened just now
    Closed,
    /// Session was already closed, nothing changed
    AlreadyClosed,
}

#[derive(Debug, Default)]
pub struct SessionLifecycle {
    state: SessionState,
    close_reason: Option<LifecycleEvent>,
}

impl SessionLifecycle {
    /// Create a lifecycle in the Active state
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// The event that closed the session, if it is closed
    pub fn close_reason(&self) -> Option<&LifecycleEvent> {
        self.close_reason.as_ref()
    }

    /// Process an event. Only the first event that ends the session has an
    /// effect; later ones report `AlreadyClosed`.
    pub fn process_event(&mut self, event: LifecycleEvent) -> TransitionResult {
        match self.state {
            SessionState::Active => {
                self.state = SessionState::Closed;
                self.close_reason = Some(event);
                TransitionResult::Closed
            }
            SessionState::Closed => TransitionResult::AlreadyClosed,
        }
    }
}
