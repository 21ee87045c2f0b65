use super::mapper::table_record;
use crate::keys::KeyHelper;

/// A claim as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Claim {
    pub claim_type: String,
    pub value: String,
}

impl Claim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

table_record! {
    /// Claim row stored in the owner's partition.
    pub struct IdentityUserClaim {
        "UserId" => user_id: String,
        "ClaimType" => claim_type: String,
        "ClaimValue" => claim_value: String,
        "KeyVersion" => key_version: f64,
    }
}

impl IdentityUserClaim {
    pub fn new(keys: &KeyHelper, user_id: &str, claim: &Claim) -> Self {
        let mut record = Self {
            user_id: user_id.to_string(),
            claim_type: claim.claim_type.clone(),
            claim_value: claim.value.clone(),
            key_version: keys.key_version(),
            ..Self::default()
        };
        record.row.partition_key = keys.user_id(user_id);
        record.row.row_key = record.peek_row_key(keys);
        record
    }

    /// Row key this claim derives to under the current scheme.
    pub fn peek_row_key(&self, keys: &KeyHelper) -> String {
        keys.claim(&self.claim_type, &self.claim_value)
    }

    /// False for rows written under an older derivation scheme.
    pub fn has_current_key(&self, keys: &KeyHelper) -> bool {
        self.peek_row_key(keys) == self.row.row_key
    }

    pub fn to_claim(&self) -> Claim {
        Claim::new(self.claim_type.clone(), self.claim_value.clone())
    }
}
