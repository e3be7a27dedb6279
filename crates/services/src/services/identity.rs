//! Who is signed in, and notification when that changes.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

/// The authenticated user as reported by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(id: Uuid) -> Self {
        Self { id, email: None }
    }

    pub fn with_email(id: Uuid, email: impl Into<String>) -> Self {
        Self {
            id,
            email: Some(email.into()),
        }
    }
}

/// Source of the current identity. Implemented by whatever owns authentication.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<Identity>;

    /// Receiver that observes every sign-in, sign-out and user switch
    fn subscribe(&self) -> watch::Receiver<Option<Identity>>;
}

/// In-process identity provider driven by explicit sign-in / sign-out calls
#[derive(Debug)]
pub struct SessionIdentity {
    current: watch::Sender<Option<Identity>>,
}

impl SessionIdentity {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self { current }
    }

    pub fn signed_in(identity: Identity) -> Self {
        let (current, _) = watch::channel(Some(identity));
        Self { current }
    }

    /// Switch to `identity`. Subscribers are only notified when the user id changes.
    pub fn sign_in(&self, identity: Identity) {
        let user_id = identity.id;
        let changed = self.current.send_if_modified(|current| {
            let changed = current.as_ref().map(|c| c.id) != Some(identity.id);
            *current = Some(identity);
            changed
        });
        if changed {
            info!(user_id = %user_id, "Identity: signed in");
        }
    }

    pub fn sign_out(&self) {
        let changed = self.current.send_if_modified(|current| current.take().is_some());
        if changed {
            info!("Identity: signed out");
        }
    }
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_user(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }
}
