use crate::config::Config;
use crate::issuance::Issuer;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub issuer: Arc<Issuer>,
    pub config: Arc<Config>,
}

impl AppState {
    /// True when no password is configured or `supplied` matches it.
    pub fn authorized(&self, supplied: Option<&str>) -> bool {
        match self.config.access_password.as_deref() {
            None => true,
            Some(expected) => supplied == Some(expected),
        }
    }
}
