//! Application store: navigation plus the signed-in user.
//!
//! [`reduce`] is a pure `(state, action) -> state` function composed of the
//! navigation reducer and the auth reducer. [`Store`] owns the current state
//! and publishes a revision on every dispatch.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use chatty_common::{UserId, UserRef};

use crate::navigation::{app_navigator, navigation_reducer, NavAction, NavState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: UserId,
    pub username: String,
}

impl AuthUser {
    pub fn user_ref(&self) -> UserRef {
        UserRef { id: self.id, username: self.username.clone() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppState {
    pub nav: NavState,
    pub auth: Option<AuthUser>,
}

impl Default for AppState {
    fn default() -> Self {
        AppState { nav: app_navigator().initial_state().clone(), auth: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Nav(NavAction),
    LoggedIn(AuthUser),
    LoggedOut,
}

pub fn reduce(state: Option<&AppState>, action: &Action) -> AppState {
    let mut next = state.cloned().unwrap_or_default();
    match action {
        Action::Nav(nav) => next.nav = navigation_reducer(Some(&next.nav), nav),
        Action::LoggedIn(user) => next.auth = Some(user.clone()),
        Action::LoggedOut => next.auth = None,
    }
    next
}

#[derive(Clone)]
pub struct Store {
    state: Arc<RwLock<AppState>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(AppState::default())
    }
}

impl Store {
    pub fn new(state: AppState) -> Self {
        let (revision, _) = watch::channel(0);
        Store { state: Arc::new(RwLock::new(state)), revision: Arc::new(revision) }
    }

    pub fn dispatch(&self, action: Action) {
        {
            let mut state = self.state.write();
            let next = reduce(Some(&*state), &action);
            if next == *state {
                return;
            }
            *state = next;
        }
        tracing::debug!(?action, "store updated");
        self.revision.send_modify(|rev| *rev += 1);
    }

    pub fn state(&self) -> AppState {
        self.state.read().clone()
    }

    pub fn auth(&self) -> Option<AuthUser> {
        self.state.read().auth.clone()
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
