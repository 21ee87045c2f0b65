use super::mapper::table_record;
use crate::keys::KeyHelper;
use chrono::{DateTime, Utc};
use uuid::Uuid;

table_record! {
    /// Profile row of a user aggregate.
    pub struct IdentityUser {
        "Id" => id: String,
        "UserName" => user_name: String,
        "NormalizedUserName" => normalized_user_name: Option<String>,
        "Email" => email: Option<String>,
        "NormalizedEmail" => normalized_email: Option<String>,
        "EmailConfirmed" => email_confirmed: bool,
        "PasswordHash" => password_hash: Option<String>,
        "SecurityStamp" => security_stamp: Option<String>,
        "ConcurrencyStamp" => concurrency_stamp: Option<String>,
        "PhoneNumber" => phone_number: Option<String>,
        "PhoneNumberConfirmed" => phone_number_confirmed: bool,
        "TwoFactorEnabled" => two_factor_enabled: bool,
        "LockoutEnd" => lockout_end: Option<DateTime<Utc>>,
        "LockoutEnabled" => lockout_enabled: bool,
        "AccessFailedCount" => access_failed_count: i32,
        "KeyVersion" => key_version: f64,
    }
}

impl IdentityUser {
    /// New user with a random id and fresh stamps.
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_name: user_name.into(),
            security_stamp: Some(Uuid::new_v4().to_string()),
            concurrency_stamp: Some(Uuid::new_v4().to_string()),
            ..Self::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Email when set to something other than whitespace.
    pub fn email_present(&self) -> Option<&str> {
        self.email.as_deref().filter(|email| !email.trim().is_empty())
    }

    /// Points the profile row at its own partition (`partition == row == user key`).
    pub fn generate_keys(&mut self, keys: &KeyHelper) {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        let user_key = keys.user_id(&self.id);
        self.row.partition_key = user_key.clone();
        self.row.row_key = user_key;
        self.key_version = keys.key_version();
    }
}
