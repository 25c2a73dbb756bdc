//! Release-name derivation

use uuid::Uuid;

/// Derive the cluster-unique release name for a custom resource. A pure
/// function of `(name, uid)`, so every reconciliation of the same CR uses
/// the same release name.
pub fn release_name(name: &str, uid: &str) -> String {
    format!("{}-{}", name, shorten_uid(uid))
}

/// Base36-encode the 16 UUID bytes. A UID that does not parse as a UUID is
/// used as-is with dashes removed.
fn shorten_uid(uid: &str) -> String {
    match Uuid::parse_str(uid) {
        Ok(parsed) => base36_encode(parsed.as_u128()),
        Err(_) => uid.replace('-', ""),
    }
}

fn base36_encode(mut value: u128) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(ALPHABET[(value % 36) as usize] as char);
        value /= 36;
    }
    digits.iter().rev().collect()
}
