//! Snapshot and scratch-directory naming.
//!
//! Names are filtered to ASCII letters, digits and `_`, then made unique by
//! appending random suffixes until the caller reports the name as free.

use uuid::Uuid;

/// Length of the random suffix appended on collision.
pub const SUFFIX_LEN: usize = 6;

/// Keep only ASCII letters, digits and underscore.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Random alphanumeric string of `len` characters (at most 32).
pub fn random_suffix(len: usize) -> String {
    Uuid::new_v4().simple().to_string().chars().take(len).collect()
}

/// Sanitize `base` and append random suffixes until `is_taken` returns false.
pub fn unique_name<F>(base: &str, mut is_taken: F) -> String
where
    F: FnMut(&str) -> bool,
{
    let base = sanitize(base);
    let mut candidate = base.clone();
    while is_taken(&candidate) {
        candidate = format!("{}_{}", base, random_suffix(SUFFIX_LEN));
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sanitize_keeps_allowed_characters_only() {
        let cleaned = sanitize("temp_20220723T101500+0900/../ é-x");
        assert_eq!(cleaned, "temp_20220723T1015000900x");
        assert!(cleaned
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn test_random_suffix_is_alphanumeric() {
        let s = random_suffix(SUFFIX_LEN);
        assert_eq!(s.len(), SUFFIX_LEN);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_unique_name_without_collision() {
        assert_eq!(unique_name("snap@1", |_| false), "snap1");
    }

    #[test]
    fn test_unique_name_resolves_repeated_collisions() {
        let mut taken: HashSet<String> = HashSet::new();
        taken.insert("snap".to_string());
        let mut attempts = 0;

        let name = unique_name("snap", |candidate| {
            attempts += 1;
            // Reject the first few suffixed candidates too.
            taken.contains(candidate) || attempts < 4
        });

        assert!(name.starts_with("snap_"));
        assert!(!taken.contains(&name));
        assert_eq!(attempts, 4);
    }

    #[test]
    fn test_unique_name_against_filesystem() -> std::io::Result<()> {
        let dir = tempfile::TempDir::new()?;
        std::fs::create_dir(dir.path().join("snap"))?;

        let name = unique_name("snap", |c| dir.path().join(c).exists());
        assert_ne!(name, "snap");
        assert!(!dir.path().join(&name).exists());
        Ok(())
    }
}
