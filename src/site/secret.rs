//! Random identifiers and credentials.
//!
//! Everything here draws from `rand::thread_rng` (ChaCha12, reseeded from the
//! OS), so each value carries at least 128 bits of entropy.

use rand::Rng;

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Printable ASCII minus the quote and backslash, so salts can sit inside a
/// single-quoted PHP string without escaping.
const SALT_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()-_ []{}<>~`+=,.;:/?|";

pub const DB_PASSWORD_LEN: usize = 32;
pub const ADMIN_PASSWORD_LEN: usize = 24;
pub const SALT_LEN: usize = 64;

/// Generate a site id: `site-` followed by 128 random bits in hex.
pub fn generate_site_id() -> String {
    let mut rng = rand::thread_rng();
    let high: u64 = rng.gen();
    let low: u64 = rng.gen();
    format!("site-{:016x}{:016x}", high, low)
}

/// Site ids are only ever generated here, but they also arrive from the CLI
/// and from records on disk, and are used to build paths.
pub fn is_valid_site_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn random_from(charset: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| charset[rng.gen_range(0..charset.len())] as char)
        .collect()
}

/// 32 alphanumeric characters (~190 bits).
pub fn generate_db_password() -> String {
    random_from(ALPHANUMERIC, DB_PASSWORD_LEN)
}

/// 24 alphanumeric characters (~142 bits).
pub fn generate_admin_password() -> String {
    random_from(ALPHANUMERIC, ADMIN_PASSWORD_LEN)
}

pub fn generate_salt() -> String {
    random_from(SALT_CHARSET, SALT_LEN)
}
