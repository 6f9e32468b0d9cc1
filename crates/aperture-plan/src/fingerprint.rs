use sha2::{Digest, Sha256};

/// Cache key for plans: one fingerprint per (intent, user) pair.
pub fn plan_fingerprint(intent: &str, user_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(intent.as_bytes());
    hasher.update(b"\n");
    hasher.update(user_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_for_same_inputs() {
        assert_eq!(plan_fingerprint("list orders", "u1"), plan_fingerprint("list orders", "u1"));
    }

    #[test]
    fn distinguishes_user_and_intent() {
        let base = plan_fingerprint("list orders", "u1");
        assert_ne!(base, plan_fingerprint("list orders", "u2"));
        assert_ne!(base, plan_fingerprint("list invoices", "u1"));
        // The separator keeps (intent, user) pairs from colliding on concatenation.
        assert_ne!(plan_fingerprint("ab", "c"), plan_fingerprint("a", "bc"));
    }
}
