use crate::keys::KeyCategory;
use crate::model::{
    IdentityUser, IdentityUserClaim, IdentityUserLogin, IdentityUserRole, IdentityUserToken,
    TableRecord,
};
use crate::table::TableEntity;

/// A user reassembled from every row of its partition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserAggregate {
    pub user: IdentityUser,
    pub claims: Vec<IdentityUserClaim>,
    pub logins: Vec<IdentityUserLogin>,
    pub tokens: Vec<IdentityUserToken>,
    pub roles: Vec<IdentityUserRole>,
}

/// What a partition row holds, judged by its row key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Profile,
    Claim,
    Login,
    Token,
    Role,
    Unknown,
}

impl RowKind {
    pub fn of(entity: &TableEntity) -> Self {
        let row_key = entity.row_key.as_str();
        if row_key == entity.partition_key {
            Self::Profile
        } else if KeyCategory::Claim.owns(row_key) {
            Self::Claim
        } else if KeyCategory::Login.owns(row_key) {
            Self::Login
        } else if KeyCategory::Token.owns(row_key) {
            Self::Token
        } else if KeyCategory::Role.owns(row_key) {
            Self::Role
        } else {
            Self::Unknown
        }
    }
}

impl UserAggregate {
    /// Classifies the rows of one partition.
    ///
    /// Returns `None` when no profile row is present; orphaned subordinate
    /// rows do not make a user.
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a TableEntity>) -> Option<Self> {
        let mut user = None;
        let mut aggregate = Self::default();
        for entity in rows {
            match RowKind::of(entity) {
                RowKind::Profile => user = Some(IdentityUser::from_entity(entity)),
                RowKind::Claim => aggregate.claims.push(IdentityUserClaim::from_entity(entity)),
                RowKind::Login => aggregate.logins.push(IdentityUserLogin::from_entity(entity)),
                RowKind::Token => aggregate.tokens.push(IdentityUserToken::from_entity(entity)),
                RowKind::Role => aggregate.roles.push(IdentityUserRole::from_entity(entity)),
                RowKind::Unknown => {}
            }
        }
        aggregate.user = user?;
        Some(aggregate)
    }

    /// Number of rows the aggregate occupies.
    pub fn row_count(&self) -> usize {
        1 + self.claims.len() + self.logins.len() + self.tokens.len() + self.roles.len()
    }
}
