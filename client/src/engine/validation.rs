use crate::error::CommunityError;

/// Default maximum community display name length (characters).
pub const MAX_COMMUNITY_NAME_LENGTH: usize = 64;

/// Used when a display name has no characters a provider id can carry.
const FALLBACK_SLUG: &str = "community";

/// Validate a community display name and return it trimmed.
/// Must be non-empty after trimming and at most `max_len` characters.
pub fn validate_community_name(name: &str, max_len: usize) -> Result<String, CommunityError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CommunityError::InvalidName(
            "Community name cannot be empty".into(),
        ));
    }
    if trimmed.chars().count() > max_len {
        return Err(CommunityError::InvalidName(format!(
            "Community name too long (max {} characters)",
            max_len
        )));
    }
    Ok(trimmed.to_string())
}

/// Lowercase the name, collapse whitespace runs into `-`, and drop anything
/// the provider does not accept in a channel id.
pub fn normalize_channel_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.trim().chars() {
        if c.is_whitespace() {
            pending_dash = true;
            continue;
        }
        let c = c.to_ascii_lowercase();
        if !(c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            continue;
        }
        if pending_dash && !slug.is_empty() {
            slug.push('-');
        }
        pending_dash = false;
        slug.push(c);
    }

    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// Channel id for a user-created community: normalized name plus a
/// millisecond disambiguator. Unique only to millisecond resolution.
pub fn derive_channel_id(name: &str, millis: i64) -> String {
    format!("{}-{}", normalize_channel_slug(name), millis)
}
