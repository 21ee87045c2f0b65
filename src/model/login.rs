use super::mapper::table_record;
use crate::keys::KeyHelper;

/// An external login as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLoginInfo {
    pub login_provider: String,
    pub provider_key: String,
    pub provider_display_name: Option<String>,
}

impl UserLoginInfo {
    pub fn new(login_provider: impl Into<String>, provider_key: impl Into<String>) -> Self {
        Self {
            login_provider: login_provider.into(),
            provider_key: provider_key.into(),
            provider_display_name: None,
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.provider_display_name = Some(name.into());
        self
    }
}

table_record! {
    /// Login row stored in the owner's partition.
    pub struct IdentityUserLogin {
        "UserId" => user_id: String,
        "LoginProvider" => login_provider: String,
        "ProviderKey" => provider_key: String,
        "ProviderDisplayName" => provider_display_name: Option<String>,
        "KeyVersion" => key_version: f64,
    }
}

impl IdentityUserLogin {
    pub fn new(keys: &KeyHelper, user_id: &str, login: &UserLoginInfo) -> Self {
        let mut record = Self {
            user_id: user_id.to_string(),
            login_provider: login.login_provider.clone(),
            provider_key: login.provider_key.clone(),
            provider_display_name: login.provider_display_name.clone(),
            key_version: keys.key_version(),
            ..Self::default()
        };
        record.row.partition_key = keys.user_id(user_id);
        record.row.row_key = keys.login(&login.login_provider, &login.provider_key);
        record
    }

    pub fn to_login_info(&self) -> UserLoginInfo {
        UserLoginInfo {
            login_provider: self.login_provider.clone(),
            provider_key: self.provider_key.clone(),
            provider_display_name: self.provider_display_name.clone(),
        }
    }
}
