//! Navigation configuration and reducer.
//!
//! The app is a modal stack whose root is a tab set (`Chats`, `Settings`).
//! Conversation, group details and group creation screens are pushed on top
//! of it. [`Router::state_for_action`] is a pure reduction that answers
//! `None` for anything it does not handle; [`navigation_reducer`] turns that
//! into "keep the previous state", so an unrecognised transition can never
//! break the store.

use std::sync::OnceLock;

use chatty_common::GroupId;

/// Path resolved once at startup to build the initial state.
pub const DEFAULT_PATH: &str = "Main";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Chats,
    Settings,
}

impl Tab {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "Chats" => Some(Tab::Chats),
            "Settings" => Some(Tab::Settings),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Main { tab: Tab },
    Messages { group_id: GroupId, title: String, icon: Option<String> },
    GroupDetails { group_id: GroupId, title: String },
    NewGroup,
    FinalizeGroup,
}

impl Route {
    pub fn name(&self) -> &'static str {
        match self {
            Route::Main { .. } => "Main",
            Route::Messages { .. } => "Messages",
            Route::GroupDetails { .. } => "GroupDetails",
            Route::NewGroup => "NewGroup",
            Route::FinalizeGroup => "FinalizeGroup",
        }
    }

    fn apply_params(&mut self, params: &RouteParams) -> bool {
        match self {
            Route::Messages { title, icon, .. } => {
                if let Some(t) = &params.title {
                    *title = t.clone();
                }
                if let Some(i) = &params.icon {
                    *icon = Some(i.clone());
                }
                true
            }
            Route::GroupDetails { title, .. } => {
                if let Some(t) = &params.title {
                    *title = t.clone();
                }
                true
            }
            _ => false,
        }
    }
}

/// Parameters a screen may update on its own route.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteParams {
    pub title: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    pub key: String,
    pub route: Route,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavState {
    index: usize,
    routes: Vec<RouteEntry>,
}

impl NavState {
    fn root(tab: Tab) -> Self {
        NavState {
            index: 0,
            routes: vec![RouteEntry { key: "Main-0".into(), route: Route::Main { tab } }],
        }
    }

    /// The route on top of the stack.
    pub fn current(&self) -> &RouteEntry {
        &self.routes[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Stack entries, root first.
    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    fn is_well_formed(&self) -> bool {
        self.index < self.routes.len()
    }

    /// The selected tab of the root screen.
    pub fn tab(&self) -> Option<Tab> {
        match self.routes.first().map(|entry| &entry.route) {
            Some(Route::Main { tab }) => Some(*tab),
            _ => None,
        }
    }

    fn push(&mut self, route: Route) {
        let key = format!("{}-{}", route.name(), self.routes.len());
        self.routes.push(RouteEntry { key, route });
        self.index = self.routes.len() - 1;
    }

    fn truncate(&mut self, len: usize) {
        self.routes.truncate(len);
        self.index = len - 1;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NavAction {
    Init,
    Navigate(Route),
    /// Pop the top screen, or the screen with `key` and everything above it.
    Back { key: Option<String> },
    SetParams { key: String, params: RouteParams },
    SwitchTab(Tab),
    /// An action the router does not know, e.g. from another reducer.
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackMode {
    Card,
    Modal,
}

/// The app's stack configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Router {
    pub mode: StackMode,
}

impl Router {
    pub fn app() -> Self {
        Router { mode: StackMode::Modal }
    }

    /// Resolve a path such as `Main/Settings` or `Messages/42`.
    pub fn action_for_path(&self, path: &str) -> Option<NavAction> {
        let mut parts = path.trim_matches('/').split('/');
        let route = match (parts.next()?, parts.next()) {
            ("Main", None) => Route::Main { tab: Tab::Chats },
            ("Main", Some(tab)) => Route::Main { tab: Tab::parse(tab)? },
            ("Messages", Some(id)) => Route::Messages {
                group_id: GroupId(id.parse().ok()?),
                title: String::new(),
                icon: None,
            },
            ("GroupDetails", Some(id)) => Route::GroupDetails {
                group_id: GroupId(id.parse().ok()?),
                title: String::new(),
            },
            ("NewGroup", None) => Route::NewGroup,
            ("FinalizeGroup", None) => Route::FinalizeGroup,
            _ => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(NavAction::Navigate(route))
    }

    /// Pure reduction of `action` over `state`. `None` means unhandled.
    pub fn state_for_action(&self, action: &NavAction, state: Option<&NavState>) -> Option<NavState> {
        // A stack whose index points past its routes is reduced as if absent.
        let Some(state) = state.filter(|state| state.is_well_formed()) else {
            let root = NavState::root(Tab::Chats);
            return match action {
                NavAction::Init => Some(root),
                NavAction::Navigate(Route::Main { tab }) => Some(NavState::root(*tab)),
                other => self.state_for_action(other, Some(&root)).or(Some(root)),
            };
        };

        match action {
            NavAction::Init | NavAction::Other(_) => None,
            NavAction::Navigate(Route::Main { tab }) => switch_tab(state, *tab),
            NavAction::SwitchTab(tab) => switch_tab(state, *tab),
            NavAction::Navigate(route) => {
                if &state.current().route == route {
                    return None;
                }
                let mut next = state.clone();
                next.push(route.clone());
                Some(next)
            }
            NavAction::Back { key: None } => {
                if state.index == 0 {
                    return None;
                }
                let mut next = state.clone();
                next.truncate(state.index);
                Some(next)
            }
            NavAction::Back { key: Some(key) } => {
                let position = state.routes.iter().position(|entry| &entry.key == key)?;
                if position == 0 {
                    return None;
                }
                let mut next = state.clone();
                next.truncate(position);
                Some(next)
            }
            NavAction::SetParams { key, params } => {
                let mut next = state.clone();
                let entry = next.routes.iter_mut().find(|entry| &entry.key == key)?;
                if !entry.route.apply_params(params) || next == *state {
                    return None;
                }
                Some(next)
            }
        }
    }
}

fn switch_tab(state: &NavState, tab: Tab) -> Option<NavState> {
    if !matches!(state.routes.first()?.route, Route::Main { .. }) {
        return None;
    }
    if state.index == 0 && state.tab() == Some(tab) {
        return None;
    }
    let mut next = state.clone();
    next.truncate(1);
    next.routes[0].route = Route::Main { tab };
    Some(next)
}

/// Router plus the initial state derived from [`DEFAULT_PATH`].
#[derive(Debug, Clone)]
pub struct AppNavigator {
    router: Router,
    initial: NavState,
}

impl AppNavigator {
    pub fn new(router: Router) -> Self {
        let initial = router
            .action_for_path(DEFAULT_PATH)
            .and_then(|action| router.state_for_action(&action, None))
            .unwrap_or_else(|| NavState::root(Tab::Chats));
        AppNavigator { router, initial }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn initial_state(&self) -> &NavState {
        &self.initial
    }

    pub fn reduce(&self, state: Option<&NavState>, action: &NavAction) -> NavState {
        let state = state.unwrap_or(&self.initial);
        match self.router.state_for_action(action, Some(state)) {
            Some(next) => next,
            None => {
                tracing::trace!(?action, "navigation action left state unchanged");
                state.clone()
            }
        }
    }
}

/// The app navigator, built on first use.
pub fn app_navigator() -> &'static AppNavigator {
    static NAVIGATOR: OnceLock<AppNavigator> = OnceLock::new();
    NAVIGATOR.get_or_init(|| AppNavigator::new(Router::app()))
}

/// Reducer consumed by the store: `None` state starts from the initial
/// state, unhandled actions keep the previous state.
pub fn navigation_reducer(state: Option<&NavState>, action: &NavAction) -> NavState {
    app_navigator().reduce(state, action)
}
