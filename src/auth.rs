use std::collections::HashSet;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

use crate::model::Actor;

/// Shared cleartext password for every login.
#[derive(Debug)]
pub struct MarqueeAuthSource {
    password: String,
}

impl MarqueeAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for MarqueeAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// Maps a login name to an [`Actor`]. Names listed as staff get the staff
/// role; everyone else is a customer.
#[derive(Debug, Clone, Default)]
pub struct Roles {
    staff: HashSet<String>,
}

impl Roles {
    pub fn new<I, S>(staff_users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            staff: staff_users
                .into_iter()
                .map(Into::into)
                .map(|s: String| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn actor_for(&self, user: &str) -> Actor {
        if self.staff.contains(user) {
            Actor::staff(user)
        } else {
            Actor::customer(user)
        }
    }
}
