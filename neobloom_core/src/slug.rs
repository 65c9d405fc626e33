//! Human-readable identifiers for categories, tags and posts.
//!
//! Slugs are never auto-suffixed: a collision is rejected and the caller has
//! to pick another name or slug.

use crate::error::BlogError;

/// Lowercases, turns spaces into hyphens and drops everything outside `[a-z0-9_-]`.
pub fn normalize(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Picks the explicit slug when one is supplied, otherwise derives it from `name`.
pub fn assign(explicit: Option<&str>, name: &str) -> Result<String, BlogError> {
    let slug = match explicit {
        Some(candidate) if !candidate.is_empty() => normalize(candidate),
        _ => normalize(name),
    };

    if slug.is_empty() {
        return Err(BlogError::EmptySlug);
    }
    Ok(slug)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalizes_titles() {
        assert_eq!(normalize("Hello World"), "hello-world");
        assert_eq!(normalize("Next.js & React!"), "nextjs--react");
        assert_eq!(normalize("snake_case-Slug"), "snake_case-slug");
        assert_eq!(normalize("Café au lait"), "caf-au-lait");
    }

    #[test]
    fn test_explicit_slug_wins_over_name() {
        assert_eq!(assign(Some("My Slug"), "Other Name").unwrap(), "my-slug");
        assert_eq!(assign(None, "Artificial Intelligence").unwrap(), "artificial-intelligence");
        assert_eq!(assign(Some(""), "Fallback").unwrap(), "fallback");
    }

    #[test]
    fn test_empty_result_is_rejected() {
        assert!(matches!(assign(None, "!!!"), Err(BlogError::EmptySlug)));
        assert!(matches!(assign(Some("???"), "ignored"), Err(BlogError::EmptySlug)));
    }

    proptest! {
        #[test]
        fn test_normalize_is_idempotent(input in ".*") {
            let once = normalize(&input);
            prop_assert_eq!(normalize(&once), once.clone());
        }

        #[test]
        fn test_normalized_slugs_stay_in_the_url_safe_alphabet(input in ".*") {
            prop_assert!(normalize(&input)
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'));
        }
    }
}
