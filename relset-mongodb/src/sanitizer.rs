//! Relation name sanitization for MongoDB collection names.
//!
//! Each relation is stored in its own collection. MongoDB forbids `$` and NUL in collection
//! names and treats dots as namespace separators, so relation names are escaped before use.

/// Maps relation names onto valid, collision-free collection names.
pub(crate) struct RelationNameSanitizer;

impl RelationNameSanitizer {
    /// Escape sequences, applied in order. `_` is escaped first so escapes cannot collide
    /// with literal input.
    const REPLACEMENTS: [(&'static str, &'static str); 4] = [
        ("_", "__"),
        (".", "_d"),
        ("$", "_s"),
        ("\0", "_0"),
    ];

    /// Prefix keeping relation collections out of the reserved `system.` namespace.
    const PREFIX: &'static str = "rel_";

    /// Returns the collection name used to store `relation`.
    pub(crate) fn collection_name(relation: &str) -> String {
        let escaped = Self::REPLACEMENTS
            .iter()
            .fold(relation.to_string(), |name, (target, replacement)| {
                name.replace(target, replacement)
            });

        format!("{}{escaped}", Self::PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_name() {
        assert_eq!(RelationNameSanitizer::collection_name("follows"), "rel_follows");
    }

    #[test]
    fn test_escapes_forbidden_characters() {
        let name = RelationNameSanitizer::collection_name("a.b$c\0");
        assert!(!name.contains(['.', '$', '\0']));
        assert_eq!(name, "rel_a_db_sc_0");
    }

    #[test]
    fn test_escapes_do_not_collide() {
        let names = ["a.b", "a_db", "a$b", "a_sb", "a__b"]
            .map(RelationNameSanitizer::collection_name);

        for (i, name) in names.iter().enumerate() {
            assert!(!names[i + 1..].contains(name), "{name} is not unique");
        }
    }

    #[test]
    fn test_system_prefix_is_avoided() {
        assert!(!RelationNameSanitizer::collection_name("system.views").starts_with("system."));
    }
}
