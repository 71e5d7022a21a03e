//! `${{ scope.key }}` expression rendering.
//!
//! Workflow strings reference matrix values and environment variables the
//! way hosted CI does: `${{ matrix.python-version }}`, `${{ env.CI }}`.
//! Only plain `scope.key` lookups are supported; anything else is rejected
//! at plan time so a typo never reaches a shell as a literal.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Named lookup tables available to expressions.
pub type Scopes<'a> = [(&'a str, &'a BTreeMap<String, String>)];

fn expression_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{\{(.*?)\}\}").expect("static expression regex"))
}

fn reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z0-9_][A-Za-z0-9_.\-]*)$")
            .expect("static reference regex")
    })
}

/// Render every `${{ scope.key }}` in `template`.
///
/// Unknown scopes, unknown keys, and malformed expressions are errors.
pub fn render(template: &str, scopes: &Scopes, field: &str) -> Result<String> {
    if !template.contains("${{") {
        return Ok(template.to_string());
    }

    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in expression_re().captures_iter(template) {
        let whole = caps.get(0).expect("group 0 always present");
        let inner = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();

        out.push_str(&template[last..whole.start()]);
        out.push_str(&resolve(inner, scopes, field)?);
        last = whole.end();
    }

    out.push_str(&template[last..]);

    if out.contains("${{") {
        return Err(Error::validation_invalid_argument(
            field,
            "Unterminated '${{' expression",
            Some(template.to_string()),
            None,
        ));
    }

    Ok(out)
}

fn resolve(expression: &str, scopes: &Scopes, field: &str) -> Result<String> {
    let caps = reference_re().captures(expression).ok_or_else(|| {
        Error::validation_invalid_argument(
            field,
            format!("Unsupported expression '{}' (expected scope.key)", expression),
            None,
            None,
        )
    })?;

    let scope_name = &caps[1];
    let key = &caps[2];

    let (_, table) = scopes
        .iter()
        .find(|(name, _)| *name == scope_name)
        .ok_or_else(|| {
            Error::validation_invalid_argument(
                field,
                format!("Unknown expression scope '{}'", scope_name),
                None,
                Some(scopes.iter().map(|(name, _)| name.to_string()).collect()),
            )
        })?;

    table.get(key).cloned().ok_or_else(|| {
        Error::validation_invalid_argument(
            field,
            format!("'{}.{}' is not defined", scope_name, key),
            None,
            Some(table.keys().cloned().collect()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> BTreeMap<String, String> {
        BTreeMap::from([("python-version".to_string(), "3.11".to_string())])
    }

    #[test]
    fn renders_matrix_reference_with_spaces() {
        let m = matrix();
        let out = render("Set up Python ${{ matrix.python-version }}", &[("matrix", &m)], "name").unwrap();
        assert_eq!(out, "Set up Python 3.11");
    }

    #[test]
    fn leaves_plain_strings_untouched() {
        let m = matrix();
        assert_eq!(render("echo $HOME", &[("matrix", &m)], "run").unwrap(), "echo $HOME");
    }

    #[test]
    fn unknown_key_lists_candidates() {
        let m = matrix();
        let err = render("${{ matrix.os }}", &[("matrix", &m)], "run").unwrap_err();
        assert_eq!(err.details["tried"][0], "python-version");
    }

    #[test]
    fn unknown_scope_is_rejected() {
        let m = matrix();
        assert!(render("${{ secrets.TOKEN }}", &[("matrix", &m)], "run").is_err());
    }

    #[test]
    fn function_calls_are_rejected() {
        let m = matrix();
        assert!(render("${{ toJSON(matrix) }}", &[("matrix", &m)], "run").is_err());
    }

    #[test]
    fn unterminated_expression_is_rejected() {
        let m = matrix();
        assert!(render("${{ matrix.python-version", &[("matrix", &m)], "run").is_err());
    }
}
