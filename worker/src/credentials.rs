//! Credentials for a freshly provisioned tenant.

use rand::distributions::{Alphanumeric, DistString};
use sha2::{Digest, Sha256};
use shared_types::TenantConfig;

const DB_NAME_HASH_LEN: usize = 16;
const PASSWORD_LEN: usize = 16;

/// `_` followed by the first 16 hex chars of SHA-256 of the tenant name.
/// Stable across runs and distinct per tenant.
pub fn db_name_for(tenant: &str) -> String {
    let digest = hex::encode(Sha256::digest(tenant.as_bytes()));
    format!("_{}", &digest[..DB_NAME_HASH_LEN])
}

pub fn random_password() -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), PASSWORD_LEN)
}

pub fn generate(tenant: &str) -> TenantConfig {
    TenantConfig::new(db_name_for(tenant), random_password())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_name_is_deterministic_and_tenant_specific() {
        let name = db_name_for("new-tenant");
        assert_eq!(name, db_name_for("new-tenant"));
        assert_ne!(name, db_name_for("other-tenant"));
        assert_eq!(name.len(), 1 + DB_NAME_HASH_LEN);
        assert!(name.starts_with('_'));
        assert!(name[1..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_passwords_are_random() {
        let a = random_password();
        assert_eq!(a.len(), PASSWORD_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, random_password());
    }
}
