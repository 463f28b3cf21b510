//! Token substitution. The engine scans for literal `{% ns.ident %}`
//! occurrences with `ns` one of `resource`, `constant`, `system` and
//! replaces each from the variable map. It is line-agnostic and treats the
//! input as one stream.

use std::sync::OnceLock;

use regex::Regex;
use scs_core::error::{Result, ScsError};

use crate::resolver::VarMap;

/// What to do about a token whose variable is undefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPolicy {
    /// The first missing variable aborts (default for compilation).
    Strict,
    /// Every missing variable is reported; tokens collapse to the empty
    /// string and processing continues.
    Verbose,
    /// Like verbose with the reporting suppressed.
    Silent,
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{% (resource|constant|system)\.([^ ,]+) %\}").unwrap()
    })
}

/// Render `input`, substituting every token from `vars`.
///
/// Returns the rendered text and the list of missing variable names (empty
/// under `Strict`, which errors instead).
pub fn render(input: &str, vars: &VarMap, policy: MissingPolicy) -> Result<(String, Vec<String>)> {
    let mut missing = Vec::new();
    let mut out = String::with_capacity(input.len());
    let mut last = 0;

    for caps in token_re().captures_iter(input) {
        let whole = caps.get(0).unwrap();
        let name = format!("{}.{}", &caps[1], &caps[2]);
        out.push_str(&input[last..whole.start()]);
        match vars.get(&name) {
            Some(value) => out.push_str(value),
            None => {
                if policy == MissingPolicy::Strict {
                    return Err(ScsError::template(format!(
                        "undefined variable '{}'",
                        name.to_lowercase()
                    )));
                }
                if !missing.contains(&name) {
                    missing.push(name);
                }
            }
        }
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok((out, missing))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> VarMap {
        let mut map = VarMap::new();
        map.define("system.name", "web01");
        map.define("system.ip", "10.0.0.5");
        map.define("constant.loglevel", "warn");
        map.define("resource.vip", "10.0.0.41");
        map
    }

    #[test]
    fn test_substitution() {
        let (out, missing) = render(
            "host {% system.name %} at {% system.ip %} level {% constant.loglevel %}\n",
            &vars(),
            MissingPolicy::Strict,
        )
        .unwrap();
        assert_eq!(out, "host web01 at 10.0.0.5 level warn\n");
        assert!(missing.is_empty());
    }

    #[test]
    fn test_repeated_token_substitutes_every_occurrence() {
        let (out, _) = render(
            "{% system.name %} {% system.name %}",
            &vars(),
            MissingPolicy::Strict,
        )
        .unwrap();
        assert_eq!(out, "web01 web01");
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let (out, _) = render("{% SYSTEM.NAME %}", &vars(), MissingPolicy::Silent).unwrap();
        // upper-case namespace does not match the token grammar
        assert_eq!(out, "{% SYSTEM.NAME %}");

        let (out, _) = render("{% system.NAME %}", &vars(), MissingPolicy::Strict).unwrap();
        assert_eq!(out, "web01");
    }

    #[test]
    fn test_strict_errors_on_missing() {
        let err = render("{% constant.ghost %}", &vars(), MissingPolicy::Strict).unwrap_err();
        assert!(matches!(err, ScsError::Template(_)));
        assert!(err.to_string().contains("constant.ghost"));
    }

    #[test]
    fn test_verbose_collects_and_blanks() {
        let (out, missing) = render(
            "a={% constant.ghost %} b={% constant.ghost %} c={% system.name %}",
            &vars(),
            MissingPolicy::Verbose,
        )
        .unwrap();
        assert_eq!(out, "a= b= c=web01");
        assert_eq!(missing, vec!["constant.ghost"]);
    }

    #[test]
    fn test_unknown_namespace_left_alone() {
        let (out, missing) =
            render("{% foo.bar %}", &vars(), MissingPolicy::Verbose).unwrap();
        assert_eq!(out, "{% foo.bar %}");
        assert!(missing.is_empty());
    }

    #[test]
    fn test_malformed_tokens_left_alone() {
        for s in ["{%system.name%}", "{% system.name%}", "{% system %}", "{% system.a b %}"] {
            let (out, _) = render(s, &vars(), MissingPolicy::Silent).unwrap();
            assert_eq!(out, s, "token '{}' should not substitute", s);
        }
    }
}
