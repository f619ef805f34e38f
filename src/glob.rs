//! Shell-style wildcard patterns for source names.
//!
//! Supported syntax: `*` (any run, including empty), `?` (any one
//! character) and `[set]` with ranges (`a-z`) and negation (`[!..]` or
//! `[^..]`). A `[` without a closing `]` is a literal. Patterns are
//! translated to anchored regular expressions once, when loaded, and are
//! case-sensitive.

use std::fmt;

use regex::Regex;

use crate::error::{FilterError, FilterResult};

/// A compiled glob pattern.
///
/// ```
/// use mseed_filter::glob::Glob;
///
/// let glob = Glob::new("IU_*_BH?_D").unwrap();
/// assert!(glob.is_match("IU_ANMO_00_BHZ_D"));
/// assert!(!glob.is_match("IU_ANMO_00_LHZ_D"));
/// ```
#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
    regex: Regex,
}

impl Glob {
    pub fn new(pattern: &str) -> FilterResult<Self> {
        let regex = Regex::new(&to_regex(pattern))
            .map_err(|e| FilterError::parse(pattern, format!("invalid glob: {e}")))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Whether the whole of `text` matches.
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for Glob {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for Glob {}

impl fmt::Display for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

/// Translate a glob into an anchored regular expression.
pub fn to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^(?s:");
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => match set_to_class(&chars, i) {
                Some((class, next)) => {
                    out.push_str(&class);
                    i = next;
                    continue;
                }
                None => out.push_str(r"\["),
            },
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
        i += 1;
    }
    out.push_str(")$");
    out
}

/// Translate the set starting at `chars[start] == '['` into a regex class.
///
/// Returns the class and the index just past the closing `]`, or `None`
/// if the set is never closed.
fn set_to_class(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut i = start + 1;
    let negate = matches!(chars.get(i), Some('!' | '^'));
    if negate {
        i += 1;
    }

    let first = i;
    // A leading `]` is a member, not the end of the set.
    let close = (first..chars.len()).find(|&j| chars[j] == ']' && j > first)?;
    let members = &chars[first..close];

    let mut class = String::from(if negate { "[^" } else { "[" });
    for (idx, &c) in members.iter().enumerate() {
        let is_range = c == '-' && idx > 0 && idx + 1 < members.len();
        if is_range {
            class.push('-');
        } else {
            if matches!(c, '\\' | '[' | ']' | '^' | '&' | '~' | '-') {
                class.push('\\');
            }
            class.push(c);
        }
    }
    class.push(']');
    Some((class, close + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(text: &str, pattern: &str) -> bool {
        Glob::new(pattern).unwrap().is_match(text)
    }

    #[test]
    fn test_literal_is_reflexive() {
        for s in ["IU", "ANMO", "00", "BHZ", "", "a.b+c", "x(y)"] {
            assert!(matches(s, s), "{s}");
        }
        assert!(!matches("BHZ", "BHN"));
        assert!(!matches("BH", "BHZ"));
        assert!(!matches("BHZ", "BH"));
    }

    #[test]
    fn test_star() {
        assert!(matches("", "*"));
        assert!(matches("ANMO", "*"));
        assert!(matches("ANMO", "AN*"));
        assert!(matches("ANMO", "*MO"));
        assert!(matches("ANMO", "A*O"));
        assert!(matches("ANMO", "ANMO*"));
        assert!(matches("ANMO", "*ANMO"));
        assert!(!matches("ANMO", "*X*"));
        assert!(matches("abcbcd", "*bcd"));
    }

    #[test]
    fn test_question_mark() {
        assert!(matches("BHZ", "BH?"));
        assert!(matches("BHZ", "???"));
        assert!(!matches("BHZ", "??"));
        assert!(!matches("", "?"));
    }

    #[test]
    fn test_sets() {
        assert!(matches("BHZ", "BH[ZNE]"));
        assert!(!matches("BH1", "BH[ZNE]"));
        assert!(matches("BH1", "BH[0-9]"));
        assert!(matches("BH1", "BH[!ZNE]"));
        assert!(matches("BH1", "BH[^ZNE]"));
        assert!(!matches("BHZ", "BH[!ZNE]"));
        assert!(matches("]", "[]]"));
        assert!(matches("-", "[a-]"));
        assert!(matches("^", "[x^]"));
    }

    #[test]
    fn test_unterminated_set_is_literal() {
        assert!(matches("[ab", "[ab"));
        assert!(!matches("a", "[ab"));
    }

    #[test]
    fn test_case_sensitive() {
        assert!(!matches("bhz", "BHZ"));
        assert!(!matches("bhz", "BH?"));
    }

    #[test]
    fn test_translation_is_anchored() {
        assert_eq!(to_regex("BH?"), "^(?s:BH.)$");
        assert_eq!(to_regex("*_[!D]"), "^(?s:.*_[^D])$");
    }

    #[test]
    fn test_bad_range_is_parse_error() {
        assert!(matches!(Glob::new("[z-a]"), Err(FilterError::Parse { .. })));
    }
}
