/// Canonical sponsor/team abbreviation pairs, checked in both directions.
/// Plain data, not logic — extend this table rather than special-casing
/// names in the scoring code.
pub const ABBREVIATIONS: &[(&str, &str)] = &[
    ("rb", "red bull"),
    ("mb", "mercedes"),
    ("amg", "mercedes amg"),
    ("vw", "volkswagen"),
    ("gm", "general motors"),
    ("hrt", "honda racing team"),
    ("bp", "british petroleum"),
    ("dhl", "dhl express"),
    ("stp", "scientifically treated petroleum"),
];

/// Case-insensitive lookup: does `a` expand to or abbreviate `b`?
pub fn is_known_abbreviation(a: &str, b: &str) -> bool {
    let a = a.trim().to_ascii_lowercase();
    let b = b.trim().to_ascii_lowercase();
    ABBREVIATIONS
        .iter()
        .any(|(short, long)| (a == *short && b == *long) || (a == *long && b == *short))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_abbreviation_matches_either_direction() {
        assert!(is_known_abbreviation("RB", "Red Bull"));
        assert!(is_known_abbreviation("red bull", "rb"));
    }

    #[test]
    fn test_unknown_pair_does_not_match() {
        assert!(!is_known_abbreviation("xyz", "acme corp"));
    }
}
