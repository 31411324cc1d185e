//! Request Fingerprints
//!
//! Stable cache keys for structured requests: `namespace:<sha256 hex>` over
//! the ordered request parts.

use sha2::{Digest, Sha256};

/// Fingerprint `parts` under `namespace`.
///
/// Each part is length-prefixed before hashing, so `["ab", "c"]` and
/// `["a", "bc"]` never collide.
pub fn fingerprint<I, S>(namespace: &str, parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        let part = part.as_ref();
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    format!("{}:{}", namespace, hex::encode(hasher.finalize()))
}

/// Fingerprint of a serializable request body
pub fn fingerprint_json<T: serde::Serialize>(namespace: &str, request: &T) -> crate::Result<String> {
    let body = serde_json::to_vec(request)?;
    Ok(fingerprint(namespace, [body]))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint("llm", ["gpt-4", "What is Rust?", "temperature=0"]);
        let b = fingerprint("llm", ["gpt-4", "What is Rust?", "temperature=0"]);
        assert_eq!(a, b);
        assert!(a.starts_with("llm:"));
        assert_eq!(a.len(), "llm:".len() + 64);
    }

    #[test]
    fn test_fingerprint_separates_parts() {
        assert_ne!(fingerprint("ns", ["ab", "c"]), fingerprint("ns", ["a", "bc"]));
        assert_ne!(fingerprint("ns", ["x"]), fingerprint("other", ["x"]));
    }

    #[test]
    fn test_fingerprint_json() {
        #[derive(serde::Serialize)]
        struct Request<'a> {
            model: &'a str,
            prompt: &'a str,
        }

        let key = fingerprint_json(
            "chat",
            &Request {
                model: "m",
                prompt: "p",
            },
        )
        .unwrap();
        assert!(key.starts_with("chat:"));
    }
}
