/// Escape a value for use inside single quotes.
/// Replaces `'` with `'\''` (end quote, escaped quote, start quote).
pub fn escape_single_quote_content(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Quote a single argument for shell execution.
/// Arguments without shell metacharacters are returned as-is.
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }

    const SHELL_META: &[char] = &[
        ' ', '\t', '\n', '\'', '"', '\\', '$', '`', '!', '*', '?', '[', ']', '(', ')', '{', '}',
        '<', '>', '|', '&', ';', '#', '~',
    ];

    if !arg.contains(SHELL_META) {
        return arg.to_string();
    }

    format!("'{}'", escape_single_quote_content(arg))
}

/// Quote and join multiple arguments.
pub fn quote_args<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| quote_arg(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render a program invocation as a copy-pasteable command line.
pub fn command_line<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    if args.is_empty() {
        return quote_arg(program);
    }
    format!("{} {}", quote_arg(program), quote_args(args))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_arg_leaves_plain_words() {
        assert_eq!(quote_arg("--quiet"), "--quiet");
        assert_eq!(quote_arg("3.11"), "3.11");
    }

    #[test]
    fn quote_arg_wraps_spaces_and_quotes() {
        assert_eq!(quote_arg("my repo"), "'my repo'");
        assert_eq!(quote_arg("it's"), "'it'\\''s'");
        assert_eq!(quote_arg(""), "''");
    }

    #[test]
    fn command_line_joins_program_and_args() {
        let line = command_line("git", &["clone", "/tmp/a b", "ws"]);
        assert_eq!(line, "git clone '/tmp/a b' ws");
        assert_eq!(command_line::<&str>("true", &[]), "true");
    }
}
