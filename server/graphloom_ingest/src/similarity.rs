//! Name normalization and string similarity.
//!
//! Both the in-document canonicalizer and the cross-graph resolver compare
//! entities through the same two primitives: a normalized name key and an
//! LCS-based similarity ratio. Keeping them in one place guarantees the two
//! stages can never disagree on what "the same name" means.

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Characters removed during name normalization: Latin punctuation, dashes
/// and underscores, plus the common CJK fullwidth variants. Whitespace is
/// removed separately, so `"Steel-500"`, `"steel 500"` and `"steel_500"`
/// all collapse to the same key.
const STRIPPED: &[char] = &[
    '-', '_', '.', ',', ';', ':', '!', '?', '\'', '"', '`', '(', ')', '[', ']', '{', '}', '/',
    '\\', '–', '—', '，', '。', '、', '；', '：', '！', '？', '（', '）', '【', '】', '《', '》',
    '「', '」', '『', '』', '“', '”', '‘', '’',
];

/// Normalize an entity name for key comparison: lowercase, then drop all
/// whitespace and every character in the fixed punctuation class.
///
/// The result can be empty (e.g., for a name that was all punctuation);
/// callers are expected to discard such candidates.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && !STRIPPED.contains(c))
        .collect()
}

/// Build the dedup key `normalized_name + "|" + type` used by both the
/// canonicalizer and the resolver's exact-match index.
///
/// The type half is trimmed and lowercased so key equality is
/// case-insensitive on both halves.
pub fn candidate_key(normalized_name: &str, entity_type: &str) -> String {
    format!("{}|{}", normalized_name, entity_type.trim().to_lowercase())
}

/// Type labels compare the way [`candidate_key`] builds them: trimmed and
/// lowercased. Similarity merging is only ever attempted between same-type
/// candidates.
pub fn same_type(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Similarity
// ---------------------------------------------------------------------------

/// Similarity ratio in [0, 1] between two strings, defined as
/// `2 * LCS(a, b) / (|a| + |b|)` over Unicode scalar values.
///
/// Two empty strings are identical (ratio 1.0); an empty string against a
/// non-empty one scores 0.0. The DP keeps two rows, so memory is O(min side)
/// and time O(|a| * |b|).
pub fn lcs_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            cur[j] = if a[i - 1] == b[j - 1] {
                prev[j - 1] + 1
            } else {
                prev[j].max(cur[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    let lcs = prev[b.len()];

    (2.0 * lcs as f64) / ((a.len() + b.len()) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_punctuation_and_whitespace() {
        assert_eq!(normalize_name("Steel-500"), "steel500");
        assert_eq!(normalize_name("  steel 500  "), "steel500");
        assert_eq!(normalize_name("steel_500"), "steel500");
        assert_eq!(normalize_name("SteelMaker Corp."), "steelmakercorp");
    }

    #[test]
    fn test_normalize_cjk_punctuation() {
        assert_eq!(normalize_name("（武田）製薬！"), "武田製薬");
        assert_eq!(normalize_name("データ、ベース。"), "データベース");
    }

    #[test]
    fn test_normalize_can_yield_empty() {
        assert_eq!(normalize_name(""), "");
        assert_eq!(normalize_name("--- !!"), "");
    }

    #[test]
    fn test_candidate_key_is_case_insensitive_on_type() {
        assert_eq!(candidate_key("steel500", "Material"), "steel500|material");
        assert_eq!(candidate_key("steel500", " material "), "steel500|material");
    }

    #[test]
    fn test_same_type_matches_key_semantics() {
        assert!(same_type("Material", " material"));
        assert!(!same_type("material", "equipment"));
    }

    #[test]
    fn test_lcs_ratio_extremes() {
        assert_eq!(lcs_ratio("alloy", "alloy"), 1.0);
        assert_eq!(lcs_ratio("abc", "xyz"), 0.0);
        assert_eq!(lcs_ratio("", "alloy"), 0.0);
        assert_eq!(lcs_ratio("", ""), 1.0);
    }

    #[test]
    fn test_lcs_ratio_known_value() {
        // LCS("acetone", "acetona") = "aceton" (6): 2*6 / 14.
        let ratio = lcs_ratio("acetone", "acetona");
        assert!((ratio - 12.0 / 14.0).abs() < 1e-12);
    }

    #[test]
    fn test_lcs_ratio_exact_threshold_boundary() {
        // 25 + 25 chars with an LCS of 23: 46/50 = 0.92 exactly, which must
        // count as a match under a `>= 0.92` rule.
        let a = "abcdefghijklmnopqrstuvwxy";
        let b = "abcdefghijklmnopqrstuvw12";
        let ratio = lcs_ratio(a, b);
        assert!((ratio - 0.92).abs() < 1e-12);
        assert!(ratio >= 0.92);
    }

    #[test]
    fn test_lcs_ratio_symmetric() {
        assert_eq!(lcs_ratio("boiler", "broiler"), lcs_ratio("broiler", "boiler"));
    }
}
