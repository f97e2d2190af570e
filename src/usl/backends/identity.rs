//! In-Memory Identity Management
//!
//! IAM user registry used for embedded runs and tests. Like the real
//! identity back-end it has no "get user" call, so account existence goes
//! through the default delete probe.

use crate::domain::ports::{IamUser, IdentityClient};
use crate::error::{Error, Result};
use crate::usl::backends::FaultSwitch;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct UserState {
    user: IamUser,
    login_profile: Option<LoginProfile>,
}

#[derive(Debug, Clone)]
struct LoginProfile {
    password: String,
    require_reset: bool,
}

/// In-memory [`IdentityClient`]
#[derive(Debug)]
pub struct InMemoryIdentity {
    account_id: String,
    users: DashMap<String, UserState>,
    faults: FaultSwitch,
}

impl Default for InMemoryIdentity {
    fn default() -> Self {
        Self::new("000000000000")
    }
}

impl InMemoryIdentity {
    /// Create a registry whose ARNs live in `account_id`
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            users: DashMap::new(),
            faults: FaultSwitch::new("iam"),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.faults.set_available(available);
    }

    pub fn faults(&self) -> &FaultSwitch {
        &self.faults
    }

    pub fn user_exists(&self, user_name: &str) -> bool {
        self.users.contains_key(user_name)
    }

    /// Whether `password` opens the user's login profile
    pub fn check_password(&self, user_name: &str, password: &str) -> bool {
        self.users
            .get(user_name)
            .and_then(|u| u.login_profile.as_ref().map(|p| p.password == password))
            .unwrap_or(false)
    }

    /// Whether the user must change the password at first login
    pub fn requires_reset(&self, user_name: &str) -> Option<bool> {
        self.users
            .get(user_name)
            .and_then(|u| u.login_profile.as_ref().map(|p| p.require_reset))
    }
}

#[async_trait]
impl IdentityClient for InMemoryIdentity {
    async fn create_user(&self, user_name: &str) -> Result<IamUser> {
        self.faults.check("create_user")?;
        if self.users.contains_key(user_name) {
            return Err(Error::conflict("IamUser", user_name));
        }

        let user = IamUser {
            user_name: user_name.to_string(),
            user_id: Uuid::new_v4().simple().to_string().to_uppercase(),
            arn: format!("arn:aws:iam::{}:user/{}", self.account_id, user_name),
        };
        self.users.insert(
            user_name.to_string(),
            UserState {
                user: user.clone(),
                login_profile: None,
            },
        );
        info!("Created IAM user: {}", user_name);
        Ok(user)
    }

    async fn create_login_profile(
        &self,
        user_name: &str,
        password: &str,
        require_reset: bool,
    ) -> Result<()> {
        self.faults.check("create_login_profile")?;
        let mut state = self
            .users
            .get_mut(user_name)
            .ok_or_else(|| Error::not_found("IamUser", user_name))?;
        if state.login_profile.is_some() {
            return Err(Error::conflict("LoginProfile", user_name));
        }
        state.login_profile = Some(LoginProfile {
            password: password.to_string(),
            require_reset,
        });
        Ok(())
    }

    async fn delete_user(&self, user_name: &str) -> Result<()> {
        self.faults.check("delete_user")?;
        self.users
            .remove(user_name)
            .map(|(_, state)| info!("Deleted IAM user: {}", state.user.user_name))
            .ok_or_else(|| Error::not_found("IamUser", user_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_user_lifecycle() {
        let iam = InMemoryIdentity::new("123456789012");

        let user = iam.create_user("udx-partner").await.unwrap();
        assert_eq!(user.arn, "arn:aws:iam::123456789012:user/udx-partner");
        assert_matches!(iam.create_user("udx-partner").await, Err(Error::Conflict { .. }));

        iam.create_login_profile("udx-partner", "s3cret", false).await.unwrap();
        assert!(iam.check_password("udx-partner", "s3cret"));
        assert_eq!(iam.requires_reset("udx-partner"), Some(false));

        iam.delete_user("udx-partner").await.unwrap();
        assert!(!iam.user_exists("udx-partner"));
        assert_matches!(iam.delete_user("udx-partner").await, Err(Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_probe_removes_existing_user() {
        let iam = InMemoryIdentity::default();
        iam.create_user("udx-partner").await.unwrap();

        assert!(iam.probe_exists_by_delete("udx-partner").await.unwrap().is_none());
        assert!(!iam.user_exists("udx-partner"));
        assert!(iam.probe_exists_by_delete("udx-partner").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_profile_requires_user() {
        let iam = InMemoryIdentity::default();
        assert_matches!(
            iam.create_login_profile("ghost", "pw", false).await,
            Err(Error::NotFound { .. })
        );
    }
}
