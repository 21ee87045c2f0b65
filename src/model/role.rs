use super::mapper::table_record;
use crate::keys::KeyHelper;
use uuid::Uuid;

table_record! {
    /// Role definition in the role table.
    pub struct IdentityRole {
        "Id" => id: String,
        "Name" => name: String,
        "NormalizedName" => normalized_name: Option<String>,
        "ConcurrencyStamp" => concurrency_stamp: Option<String>,
        "KeyVersion" => key_version: f64,
    }
}

impl IdentityRole {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: Uuid::new_v4().to_string(),
            normalized_name: Some(name.to_uppercase()),
            name,
            concurrency_stamp: Some(Uuid::new_v4().to_string()),
            ..Self::default()
        }
    }

    /// Role rows are keyed by name so lookups by name are point reads.
    pub fn generate_keys(&mut self, keys: &KeyHelper) {
        let role_key = keys.role(&self.name);
        self.row.partition_key = role_key.clone();
        self.row.row_key = role_key;
        self.key_version = keys.key_version();
    }
}

table_record! {
    /// Membership row stored in the member's partition.
    pub struct IdentityUserRole {
        "UserId" => user_id: String,
        "RoleName" => role_name: String,
        "RoleId" => role_id: Option<String>,
        "KeyVersion" => key_version: f64,
    }
}

impl IdentityUserRole {
    pub fn new(keys: &KeyHelper, user_id: &str, role: &IdentityRole) -> Self {
        let mut record = Self {
            user_id: user_id.to_string(),
            role_name: role.name.clone(),
            role_id: Some(role.id.clone()),
            key_version: keys.key_version(),
            ..Self::default()
        };
        record.row.partition_key = keys.user_id(user_id);
        record.row.row_key = keys.role(&role.name);
        record
    }
}
