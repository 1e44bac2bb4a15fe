//! Registry credential records and longest-prefix address resolution
//! (C4.7 in SPEC_FULL.md).

use crate::id::SecretId;
use crate::value::ordered_map::OrderedMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAuth {
    pub username: String,
    pub secret_id: SecretId,
}

/// Splits `registry.example.com/some/repo` into its host and repo-path
/// components for prefix comparison.
fn split_address(address: &str) -> (&str, Vec<&str>) {
    let mut parts = address.splitn(2, '/');
    let host = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("");
    let path: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    (host, path)
}

/// Resolves the best-matching registry auth for `address` by longest
/// registry/repo prefix: the host must match exactly, then the
/// candidate with the most matching leading repo-path components wins;
/// ties are broken by the longer configured address string.
pub fn resolve_auth<'a>(
    auths: &'a OrderedMap<String, RegistryAuth>,
    address: &str,
) -> Option<&'a RegistryAuth> {
    let (target_host, target_path) = split_address(address);

    let mut best: Option<(usize, usize, &RegistryAuth)> = None;
    for (configured_address, auth) in auths.iter() {
        let (host, path) = split_address(configured_address);
        if host != target_host {
            continue;
        }
        let matched = path
            .iter()
            .zip(target_path.iter())
            .take_while(|(a, b)| a == b)
            .count();
        if matched != path.len() {
            // the configured prefix must be fully contained in the target path
            continue;
        }
        let candidate = (matched, configured_address.len(), auth);
        best = match best {
            None => Some(candidate),
            Some(current) if candidate.0 > current.0 => Some(candidate),
            Some(current) if candidate.0 == current.0 && candidate.1 > current.1 => {
                Some(candidate)
            }
            Some(current) => Some(current),
        };
    }
    best.map(|(_, _, auth)| auth)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(secret: &str, user: &str) -> RegistryAuth {
        RegistryAuth {
            username: user.to_string(),
            secret_id: SecretId::of_value(&secret),
        }
    }

    #[test]
    fn exact_host_match_wins_with_no_repo_prefix() {
        let mut m = OrderedMap::new();
        m.insert("registry.example.com".to_string(), auth("s1", "u1"));
        let found = resolve_auth(&m, "registry.example.com/some/repo").unwrap();
        assert_eq!(found.username, "u1");
    }

    #[test]
    fn longest_repo_prefix_wins() {
        let mut m = OrderedMap::new();
        m.insert("registry.example.com".to_string(), auth("s1", "generic"));
        m.insert(
            "registry.example.com/some".to_string(),
            auth("s2", "specific"),
        );
        let found = resolve_auth(&m, "registry.example.com/some/repo").unwrap();
        assert_eq!(found.username, "specific");
    }

    #[test]
    fn different_host_does_not_match() {
        let mut m = OrderedMap::new();
        m.insert("other.example.com".to_string(), auth("s1", "u1"));
        assert!(resolve_auth(&m, "registry.example.com/some/repo").is_none());
    }

    #[test]
    fn non_prefix_path_does_not_match() {
        let mut m = OrderedMap::new();
        m.insert("registry.example.com/other".to_string(), auth("s1", "u1"));
        assert!(resolve_auth(&m, "registry.example.com/some/repo").is_none());
    }
}
