//! Fingerprints of rule configurations.

use crate::engine::PolicyConfig;
use sha2::{Digest, Sha256};

/// Feeds a length-prefixed field, so no name or expression text can alias a boundary.
fn update_field(hasher: &mut Sha256, field: &str) {
    hasher.update((field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
}

/// Fingerprint of a single rule: `r:` + SHA-256 of its length-prefixed name and expression.
pub fn rule_fingerprint(name: &str, expression: &str) -> String {
    let mut hasher = Sha256::new();
    update_field(&mut hasher, name);
    update_field(&mut hasher, expression);
    format!("r:{}", hex::encode(hasher.finalize()))
}

/// Fingerprint of a whole configuration: `p:` + SHA-256 over the rules in name order.
pub fn policy_fingerprint(config: &PolicyConfig) -> String {
    let mut hasher = Sha256::new();
    hasher.update((config.len() as u64).to_le_bytes());
    for (name, expression) in config {
        update_field(&mut hasher, name);
        update_field(&mut hasher, expression);
    }
    format!("p:{}", hex::encode(hasher.finalize()))
}
