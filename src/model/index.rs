use super::mapper::table_record;

table_record! {
    /// Denormalized "attribute -> owner" record.
    ///
    /// `id` holds the owner's user key.
    pub struct IdentityUserIndex {
        "Id" => id: String,
        "KeyVersion" => key_version: f64,
    }
}
