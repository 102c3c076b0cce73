//! Authentication boundary.
//!
//! Sign-in flows live outside this crate; they report their outcome through
//! an [`AuthProvider`], and the sync loop watches the resulting
//! [`AuthState`]. Nothing is subscribed until the state is `SignedIn`.

use tandem_shared::UserId;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// The auth layer has not resolved yet.
    Loading,
    SignedOut,
    SignedIn(UserId),
}

impl AuthState {
    pub fn user(&self) -> Option<&UserId> {
        match self {
            AuthState::SignedIn(id) => Some(id),
            _ => None,
        }
    }
}

pub struct AuthProvider {
    tx: watch::Sender<AuthState>,
}

impl AuthProvider {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AuthState::Loading);
        Self { tx }
    }

    pub fn sign_in(&self, user: UserId) {
        tracing::info!(user = %user.short(), "signed in");
        self.tx.send_replace(AuthState::SignedIn(user));
    }

    pub fn sign_out(&self) {
        tracing::info!("signed out");
        self.tx.send_replace(AuthState::SignedOut);
    }

    pub fn current(&self) -> AuthState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.tx.subscribe()
    }
}

impl Default for AuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let auth = AuthProvider::new();
        let mut rx = auth.subscribe();
        assert_eq!(*rx.borrow(), AuthState::Loading);

        auth.sign_in(UserId::from("1"));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().user(), Some(&UserId::from("1")));

        auth.sign_out();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), AuthState::SignedOut);
        assert_eq!(auth.current(), AuthState::SignedOut);
    }
}
