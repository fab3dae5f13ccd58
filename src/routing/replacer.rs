//! Placeholder substitution into downstream templates.
//!
//! Literal `{name}` substitution: every occurrence is replaced, names are
//! matched case-insensitively, unknown placeholders are left untouched so the
//! caller can detect and report them.

use crate::routing::matcher::PlaceholderNameAndValue;

/// Replace every `{name}` in `template` with the matching placeholder value.
pub fn replace(template: &str, placeholders: &[PlaceholderNameAndValue]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        let Some(close) = after.find('}') else {
            out.push_str(after);
            return out;
        };

        let name = &after[1..close];
        match placeholders.iter().find(|p| p.name.eq_ignore_ascii_case(name)) {
            Some(found) => out.push_str(&found.value),
            None => out.push_str(&after[..=close]),
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

/// `{name}` tokens still present in `value`.
pub fn unresolved(value: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = value;
    while let Some(open) = rest.find('{') {
        let after = &rest[open..];
        match after.find('}') {
            Some(close) => {
                if close > 1 {
                    found.push(&after[..=close]);
                }
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(name: &str, value: &str) -> PlaceholderNameAndValue {
        PlaceholderNameAndValue::new(name, value)
    }

    #[test]
    fn test_replaces_all_occurrences() {
        let placeholders = vec![p("id", "42"), p("kind", "books")];
        assert_eq!(replace("/service/{id}", &placeholders), "/service/42");
        assert_eq!(replace("/{kind}/{id}/{kind}", &placeholders), "/books/42/books");
        assert_eq!(replace("/{ID}", &placeholders), "/42");
    }

    #[test]
    fn test_unknown_placeholders_are_kept() {
        let placeholders = vec![p("id", "42")];
        let out = replace("/users/{userId}/items/{id}", &placeholders);
        assert_eq!(out, "/users/{userId}/items/42");
        assert_eq!(unresolved(&out), vec!["{userId}"]);
    }

    #[test]
    fn test_catch_all_value_with_slashes() {
        let out = replace("/blob/{rest}", &[p("rest", "x/y/z")]);
        assert_eq!(out, "/blob/x/y/z");
        assert!(unresolved(&out).is_empty());
    }

    #[test]
    fn test_unbalanced_braces_pass_through() {
        assert_eq!(replace("/a/{id", &[p("id", "1")]), "/a/{id");
        assert!(unresolved("/a/{id").is_empty());
        assert!(unresolved("/a/{}").is_empty());
    }
}
