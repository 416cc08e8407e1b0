//! Source-namespaced identifiers.
//!
//! Every anime and episode ID a source emits is prefixed with the source slug
//! (`<slug>-<native id>`) so that streaming calls can be routed back to the
//! source that produced the ID.

/// Lowercase slug for a source name. Whitespace and underscores become `-`.
pub fn slug(source_name: &str) -> String {
    source_name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() || c == '_' { '-' } else { c })
        .collect()
}

/// Prefixes a native ID with the source slug. Already-prefixed IDs are
/// returned unchanged.
pub fn namespaced(source_name: &str, native_id: &str) -> String {
    let prefix = format!("{}-", slug(source_name));
    if native_id.starts_with(&prefix) {
        native_id.to_string()
    } else {
        format!("{prefix}{native_id}")
    }
}

/// Removes the source prefix from an ID, returning the native ID. IDs that do
/// not carry this source's prefix are returned unchanged.
pub fn strip<'a>(source_name: &str, id: &'a str) -> &'a str {
    let prefix = format!("{}-", slug(source_name));
    id.strip_prefix(prefix.as_str()).unwrap_or(id)
}

/// Returns true when `id` carries the prefix of `source_name`.
pub fn is_owned_by(source_name: &str, id: &str) -> bool {
    let prefix = format!("{}-", slug(source_name));
    id.len() > prefix.len() && id.starts_with(&prefix)
}

/// Picks the owner of `id` among `candidates`. The longest matching slug
/// wins so that `anime-kai-x` is not claimed by a source named `anime`.
pub fn owner<'a, I>(id: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .filter(|name| is_owned_by(name, id))
        .max_by_key(|name| slug(name).len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_round_trip() {
        let id = namespaced("HiAnime", "naruto-677?ep=12352");
        assert_eq!(id, "hianime-naruto-677?ep=12352");
        assert_eq!(strip("HiAnime", &id), "naruto-677?ep=12352");
    }

    #[test]
    fn test_namespaced_is_idempotent() {
        let once = namespaced("Demo", "x1");
        assert_eq!(namespaced("Demo", &once), once);
    }

    #[test]
    fn test_owner_prefers_longest_slug() {
        let names = ["Anime", "Anime Kai", "Demo"];
        assert_eq!(owner("anime-kai-123", names), Some("Anime Kai"));
        assert_eq!(owner("anime-123", names), Some("Anime"));
        assert_eq!(owner("zoro-123", names), None);
    }

    #[test]
    fn test_bare_prefix_is_not_owned() {
        assert!(!is_owned_by("Demo", "demo-"));
        assert!(is_owned_by("Demo", "demo-1"));
    }
}
