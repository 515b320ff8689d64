//! Payment card number detection.

use anyhow::Result;
use regex::Regex;

/// 13 to 19 digits (or `*` masks), optionally separated by spaces, dashes or
/// dots.
const CARD_REGEX: &str = r"(?:(\d|\*)[ .\-]*?){13,19}";

/// Known card number prefixes and their valid lengths.
const CARD_PREFIXES: &[(&str, &[usize])] = &[
    // American Express
    ("34", &[15]),
    ("37", &[15]),
    // Diners Club
    ("300", &[15]),
    ("301", &[15]),
    ("302", &[15]),
    ("303", &[15]),
    ("36", &[15]),
    ("38", &[15]),
    // Discover
    ("6011", &[16]),
    // enRoute
    ("2014", &[16]),
    ("2149", &[16]),
    // JCB
    ("2100", &[16]),
    ("1800", &[16]),
    ("3088", &[16]),
    ("3096", &[16]),
    ("3112", &[16]),
    ("3158", &[16]),
    ("3337", &[16]),
    ("3528", &[16]),
    // Mastercard
    ("51", &[16]),
    ("52", &[16]),
    ("53", &[16]),
    ("54", &[16]),
    ("55", &[16]),
    // Visa
    ("4", &[13, 16]),
    ("4539", &[16]),
    ("4556", &[16]),
    ("4916", &[16]),
    ("4532", &[16]),
    ("4929", &[16]),
    ("40240071", &[16]),
    ("4485", &[16]),
    ("4716", &[16]),
    // Voyager
    ("8699", &[13, 16]),
];

/// Finds card numbers in text.
pub(crate) struct CardMatcher {
    re: Regex,
}

impl CardMatcher {
    pub(crate) fn new() -> Result<CardMatcher> {
        Ok(CardMatcher {
            re: Regex::new(CARD_REGEX)?,
        })
    }

    /// Valid card numbers found in the text, normalized to their digits.
    pub(crate) fn find<'a>(&'a self, text: &'a str) -> impl Iterator<Item = String> + 'a {
        self.re
            .find_iter(text)
            .map(|m| normalize(m.as_str()))
            .filter(|card| is_valid(card))
    }
}

/// Keep the digits only.
pub(crate) fn normalize(card: &str) -> String {
    card.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Check a normalized card number against the known prefixes and lengths.
pub(crate) fn is_valid(card: &str) -> bool {
    CARD_PREFIXES
        .iter()
        .any(|(prefix, lengths)| card.starts_with(prefix) && lengths.contains(&card.len()))
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("4111111111111111", true ; "visa 16")]
    #[test_case("4222222222222", true ; "visa 13")]
    #[test_case("378282246310005", true ; "amex")]
    #[test_case("5555555555554444", true ; "mastercard")]
    #[test_case("6011111111111117", true ; "discover")]
    #[test_case("30569309025904", false ; "diners 14")]
    #[test_case("3782822463100050", false ; "amex too long")]
    #[test_case("9111111111111111", false ; "unknown prefix")]
    #[test_case("", false ; "empty")]
    fn validity(card: &str, valid: bool) {
        assert_eq!(is_valid(card), valid);
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize("4111-1111 1111.1111"), "4111111111111111");
        assert_eq!(normalize("**** **** **** 1111"), "1111");
    }

    #[test_case("pay with 4111111111111111 now", true ; "plain")]
    #[test_case("card: 4111 1111 1111 1111", true ; "spaces")]
    #[test_case("card: 4111-1111-1111-1111", true ; "dashes")]
    #[test_case("card: 4111.1111.1111.1111", true ; "dots")]
    #[test_case("card: **** **** **** 1111", false ; "masked")]
    #[test_case("order 123456 shipped", false ; "too short")]
    #[test_case("id 9999999999999999", false ; "unknown prefix")]
    fn find(text: &str, found: bool) {
        let matcher = CardMatcher::new().unwrap();
        assert_eq!(matcher.find(text).next().is_some(), found);
    }
}
