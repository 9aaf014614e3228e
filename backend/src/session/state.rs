use std::sync::atomic::{AtomicU64, Ordering};

use homestay_common::{AppUser, SessionSnapshot};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Authentication state of one session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// No auth-state change has been reconciled yet.
    Resolving,
    SignedOut,
    SignedIn(AppUser),
}

impl SessionState {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, SessionState::Resolving)
    }

    pub fn user(&self) -> Option<&AppUser> {
        match self {
            SessionState::SignedIn(user) => Some(user),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            resolved: self.is_resolved(),
            user: self.user().cloned(),
        }
    }
}

/// Generation handed out by [`SessionCell::begin`]. Only the holder of the
/// latest ticket may publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// Single-owner state cell with publish/subscribe.
pub struct SessionCell {
    tx: watch::Sender<SessionState>,
    generation: AtomicU64,
}

impl Default for SessionCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::Resolving);
        Self {
            tx,
            generation: AtomicU64::new(0),
        }
    }

    /// Start a new auth-state change, superseding every earlier ticket.
    pub fn begin(&self) -> Ticket {
        Ticket(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.0
    }

    /// Publish `state` if `ticket` is still the latest one.
    ///
    /// Returns false when the ticket was superseded. A resolved cell never
    /// goes back to [`SessionState::Resolving`].
    pub fn publish(&self, ticket: Ticket, state: SessionState) -> bool {
        self.tx.send_if_modified(|current| {
            // Checked under the channel's write lock so a concurrent begin()
            // either rejects this publish or is followed by its own.
            if !self.is_current(ticket) {
                return false;
            }
            if current.is_resolved() && !state.is_resolved() {
                return false;
            }
            *current = state;
            true
        })
    }

    pub fn current(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> SessionSubscription {
        SessionSubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Handle held by a consumer of session state. Dropping it (or calling
/// [`unsubscribe`](Self::unsubscribe)) ends the subscription.
pub struct SessionSubscription {
    rx: watch::Receiver<SessionState>,
}

impl SessionSubscription {
    pub fn current(&self) -> SessionState {
        self.rx.borrow().clone()
    }

    /// Wait for the next published state. `None` once the cell is gone.
    pub async fn changed(&mut self) -> Option<SessionState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until the session has left [`SessionState::Resolving`].
    pub async fn resolved(&mut self) -> Option<SessionState> {
        let state = self.rx.wait_for(SessionState::is_resolved).await.ok()?;
        Some(state.clone())
    }

    /// Stream of states, starting with the current one.
    pub fn into_stream(self) -> WatchStream<SessionState> {
        WatchStream::new(self.rx)
    }

    pub fn unsubscribe(self) {}
}
