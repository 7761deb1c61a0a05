use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Cleartext password check. One shared password for every user and
/// tenant database; tenants are isolated by name, not by credential.
#[derive(Debug)]
pub struct RollcallAuthSource {
    password: String,
}

impl RollcallAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for RollcallAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
