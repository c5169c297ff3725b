//! Dashboard view helpers.

use crate::controller::Session;
use crate::user::LOGIN_ID_KEY;

/// Identifier the dashboard greets the user by: `email`, else `userEmail`.
#[must_use]
pub fn display_login_id(session: &Session) -> Option<&str> {
    let user = session.user.as_ref()?;
    user.str_field("email").or_else(|| user.str_field(LOGIN_ID_KEY))
}

#[must_use]
pub fn greeting(session: &Session) -> String {
    format!("Welcome, {}", display_login_id(session).unwrap_or_default())
}
