// Console route table and navigation.
use lectern_authz::ADMIN_CAPABILITY;
use parking_lot::Mutex;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminScreen {
    Dashboard,
    Users,
    Books,
    Loans,
    Permissions,
    Groups,
}

impl AdminScreen {
    pub const ALL: [AdminScreen; 6] = [
        AdminScreen::Dashboard,
        AdminScreen::Users,
        AdminScreen::Books,
        AdminScreen::Loans,
        AdminScreen::Permissions,
        AdminScreen::Groups,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    Login,
    Signup,
    Profile,
    Loans,
    Book(i64),
    Admin(AdminScreen),
    AccessDenied,
}

impl Route {
    pub fn path(&self) -> String {
        match self {
            Route::Home => "/".to_string(),
            Route::Login => "/login".to_string(),
            Route::Signup => "/signup".to_string(),
            Route::Profile => "/profile".to_string(),
            Route::Loans => "/loans".to_string(),
            Route::Book(id) => format!("/books/{id}"),
            Route::Admin(AdminScreen::Dashboard) => "/admin".to_string(),
            Route::Admin(AdminScreen::Users) => "/admin/users".to_string(),
            Route::Admin(AdminScreen::Books) => "/admin/books".to_string(),
            Route::Admin(AdminScreen::Loans) => "/admin/loans".to_string(),
            Route::Admin(AdminScreen::Permissions) => "/admin/permissions".to_string(),
            Route::Admin(AdminScreen::Groups) => "/admin/groups".to_string(),
            Route::AccessDenied => "/access-denied".to_string(),
        }
    }

    pub fn parse(path: &str) -> Option<Route> {
        let trimmed = path.trim();
        let trimmed = if trimmed.len() > 1 {
            trimmed.trim_end_matches('/')
        } else {
            trimmed
        };
        let route = match trimmed {
            "/" | "" => Route::Home,
            "/login" => Route::Login,
            "/signup" => Route::Signup,
            "/profile" => Route::Profile,
            "/loans" => Route::Loans,
            "/admin" => Route::Admin(AdminScreen::Dashboard),
            "/admin/users" => Route::Admin(AdminScreen::Users),
            "/admin/books" => Route::Admin(AdminScreen::Books),
            "/admin/loans" => Route::Admin(AdminScreen::Loans),
            "/admin/permissions" => Route::Admin(AdminScreen::Permissions),
            "/admin/groups" => Route::Admin(AdminScreen::Groups),
            "/access-denied" => Route::AccessDenied,
            other => {
                let id = other.strip_prefix("/books/")?.parse().ok()?;
                Route::Book(id)
            }
        };
        Some(route)
    }

    /// Capability a session must hold to view this route. Every administrative
    /// screen requires the same one.
    pub fn required_capability(&self) -> Option<&'static str> {
        match self {
            Route::Admin(_) => Some(ADMIN_CAPABILITY),
            _ => None,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}

/// Navigator that records every visited route.
#[derive(Debug, Default)]
pub struct HistoryNavigator {
    history: Mutex<Vec<Route>>,
}

impl HistoryNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<Route> {
        self.history.lock().clone()
    }

    pub fn current(&self) -> Option<Route> {
        self.history.lock().last().copied()
    }
}

impl Navigator for HistoryNavigator {
    fn navigate(&self, route: Route) {
        tracing::debug!(route = %route, "navigate");
        self.history.lock().push(route);
    }
}
