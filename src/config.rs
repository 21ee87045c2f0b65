use crate::store::FanoutOptions;
use serde::Deserialize;

pub const DEFAULT_USER_TABLE: &str = "AspNetUsers";
pub const DEFAULT_INDEX_TABLE: &str = "AspNetIndex";
pub const DEFAULT_ROLE_TABLE: &str = "AspNetRoles";

/// Identity store configuration
///
/// Either a connection string or a storage URI must be given; a URI needs a
/// token credential to go with it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct IdentityConfiguration {
    /// Prepended to every table name
    pub table_prefix: Option<String>,

    pub storage_connection_string: Option<String>,

    pub storage_connection_uri: Option<String>,

    /// Opaque credential handed to the store client
    pub token_credential: Option<String>,

    pub index_table_name: Option<String>,

    pub user_table_name: Option<String>,

    pub role_table_name: Option<String>,

    /// Paging and concurrency bounds for cross-partition lookups
    pub fanout: FanoutOptions,
}

impl IdentityConfiguration {
    /// Configuration backed by a connection string
    pub fn new(connection_string: &str) -> Self {
        Self {
            storage_connection_string: Some(connection_string.to_string()),
            ..Self::default()
        }
    }

    /// Configuration backed by a storage URI and token credential
    pub fn with_uri(uri: &str, credential: &str) -> Self {
        Self {
            storage_connection_uri: Some(uri.to_string()),
            token_credential: Some(credential.to_string()),
            ..Self::default()
        }
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("Invalid configuration: {}", e))
    }

    pub fn table_prefix(mut self, prefix: &str) -> Self {
        self.table_prefix = Some(prefix.to_string());
        self
    }

    pub fn user_table_name(mut self, name: &str) -> Self {
        self.user_table_name = Some(name.to_string());
        self
    }

    pub fn index_table_name(mut self, name: &str) -> Self {
        self.index_table_name = Some(name.to_string());
        self
    }

    pub fn role_table_name(mut self, name: &str) -> Self {
        self.role_table_name = Some(name.to_string());
        self
    }

    pub fn fanout(mut self, fanout: FanoutOptions) -> Self {
        self.fanout = fanout;
        self
    }

    pub fn resolved_user_table(&self) -> String {
        self.with_prefix(self.user_table_name.as_deref(), DEFAULT_USER_TABLE)
    }

    pub fn resolved_index_table(&self) -> String {
        self.with_prefix(self.index_table_name.as_deref(), DEFAULT_INDEX_TABLE)
    }

    pub fn resolved_role_table(&self) -> String {
        self.with_prefix(self.role_table_name.as_deref(), DEFAULT_ROLE_TABLE)
    }

    fn with_prefix(&self, name: Option<&str>, default: &str) -> String {
        let base = name.filter(|n| !n.trim().is_empty()).unwrap_or(default);
        match self.table_prefix.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(prefix) => format!("{}{}", prefix, base),
            None => base.to_string(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        let has_connection_string = self
            .storage_connection_string
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty());

        if !has_connection_string {
            match &self.storage_connection_uri {
                None => {
                    return Err(
                        "Either storage_connection_string or storage_connection_uri is required"
                            .to_string(),
                    );
                }
                Some(_) if self.token_credential.is_none() => {
                    return Err(
                        "token_credential is required when storage_connection_uri is set"
                            .to_string(),
                    );
                }
                Some(_) => {}
            }
        }

        let names = [
            self.resolved_user_table(),
            self.resolved_index_table(),
            self.resolved_role_table(),
        ];
        for table in &names {
            validate_table_name(table)?;
        }
        if names[0] == names[1] || names[0] == names[2] || names[1] == names[2] {
            return Err("user, index and role tables must have distinct names".to_string());
        }

        self.fanout.validate()
    }
}

/// Table names are 3-63 alphanumeric characters starting with a letter.
fn validate_table_name(name: &str) -> Result<(), String> {
    let len = name.chars().count();
    if !(3..=63).contains(&len) {
        return Err(format!("Table name '{}' must be 3-63 characters", name));
    }
    if !name.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return Err(format!("Table name '{}' must start with a letter", name));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(format!("Table name '{}' must be alphanumeric", name));
    }
    Ok(())
}
