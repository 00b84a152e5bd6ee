/// Database row types. These map directly to SQLite rows.
/// Distinct from murmur-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub username: String,
    pub text: String,
    /// Epoch milliseconds. Never lower than any earlier stored message.
    pub timestamp: i64,
    pub image_data: Option<Vec<u8>>,
    pub image_type: Option<String>,
}
