use super::mapper::table_record;
use crate::keys::KeyHelper;

table_record! {
    /// Authentication token row stored in the owner's partition.
    pub struct IdentityUserToken {
        "UserId" => user_id: String,
        "LoginProvider" => login_provider: String,
        "Name" => name: String,
        "Value" => value: Option<String>,
        "KeyVersion" => key_version: f64,
    }
}

impl IdentityUserToken {
    pub fn new(
        keys: &KeyHelper,
        user_id: &str,
        login_provider: &str,
        name: &str,
        value: Option<String>,
    ) -> Self {
        let mut record = Self {
            user_id: user_id.to_string(),
            login_provider: login_provider.to_string(),
            name: name.to_string(),
            value,
            key_version: keys.key_version(),
            ..Self::default()
        };
        record.row.partition_key = keys.user_id(user_id);
        record.row.row_key = keys.token(login_provider, name);
        record
    }
}
