//! Argument string parsing
//!
//! Turns a user supplied string such as `"--config, --verbose, -var 'a=b c'"`
//! into an argv. Segments are separated by commas outside of quotes, then each
//! segment is tokenized with POSIX shell rules.

/// Marker whose value is always kept as a single token
const VAR_MARKER: &str = "-var";

/// Splits `input` on commas that are not quoted or escaped, keeping the quotes.
fn split_segments(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, ch) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match quote {
            Some(q) if ch == q => quote = None,
            Some('"') if ch == '\\' => escaped = true,
            Some(_) => {}
            None if ch == '\\' => escaped = true,
            None if ch == '"' || ch == '\'' => quote = Some(ch),
            None if ch == ',' => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            None => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

/// Tokenizes one segment. Unbalanced quotes fall back to whitespace splitting.
fn words(segment: &str) -> Vec<String> {
    match shell_words::split(segment) {
        Ok(words) => words,
        Err(e) => {
            tracing::warn!(segment, error = %e, "Unbalanced quotes in arguments");
            segment.split_whitespace().map(String::from).collect()
        }
    }
}

/// Parses an argument string into an ordered argv.
///
/// Empty tokens are discarded, so a blank input yields an empty list. A
/// segment starting with `-var ` produces `-var` followed by the remainder of
/// the segment as one token.
#[must_use]
pub fn parse_args(input: &str) -> Vec<String> {
    let mut argv = Vec::new();

    for segment in split_segments(input) {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }

        if let Some(rest) = segment
            .strip_prefix(VAR_MARKER)
            .filter(|rest| rest.starts_with(char::is_whitespace))
        {
            argv.push(VAR_MARKER.to_string());
            let value = words(rest).join(" ");
            if !value.is_empty() {
                argv.push(value);
            }
            continue;
        }

        argv.extend(words(segment).into_iter().filter(|token| !token.is_empty()));
    }

    argv
}

/// Renders an argv back into a shell-safe command line for display
#[must_use]
pub fn join_args<S: AsRef<str>>(argv: &[S]) -> String {
    shell_words::join(argv.iter().map(AsRef::as_ref))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_comma_separated_flags() {
        assert_eq!(
            parse_args("--config, --verbose, --handle-this=also"),
            vec!["--config", "--verbose", "--handle-this=also"]
        );
    }

    #[test]
    fn test_blank_input_is_empty() {
        assert!(parse_args("   ").is_empty());
        assert!(parse_args("").is_empty());
        assert!(parse_args(" , ,, ").is_empty());
    }

    #[test]
    fn test_whitespace_and_commas_mix() {
        assert_eq!(
            parse_args("build --rm,-t app   --pull"),
            vec!["build", "--rm", "-t", "app", "--pull"]
        );
    }

    #[test]
    fn test_quoted_segment_keeps_spaces() {
        assert_eq!(
            parse_args(r#"--message "hello world", --tag 'a, b'"#),
            vec!["--message", "hello world", "--tag", "a, b"]
        );
    }

    #[test]
    fn test_var_marker_keeps_value_whole() {
        assert_eq!(
            parse_args("-var region=eu west, -var 'name=my app', -lock=false"),
            vec!["-var", "region=eu west", "-var", "name=my app", "-lock=false"]
        );
    }

    #[test]
    fn test_var_prefix_without_space_is_plain_token() {
        assert_eq!(parse_args("-var-file=prod.tfvars"), vec!["-var-file=prod.tfvars"]);
    }

    #[test]
    fn test_shell_escapes_inside_segment() {
        assert_eq!(
            parse_args(r#"--msg "say \"hi\"", --path a\ b"#),
            vec!["--msg", r#"say "hi""#, "--path", "a b"]
        );
    }

    #[test]
    fn test_unbalanced_quote_splits_on_whitespace() {
        assert_eq!(
            parse_args(r#"--msg "oops here, --ok"#),
            vec!["--msg", "\"oops", "here,", "--ok"]
        );
    }

    #[test]
    fn test_join_args_quotes_spaces() {
        assert_eq!(join_args(&["echo", "a b"]), "echo 'a b'");
    }

    proptest! {
        #[test]
        fn prop_plain_tokens_survive_any_separator(
            tokens in proptest::collection::vec("[A-Za-z0-9=._/-]{1,10}", 0..8),
            use_commas in any::<bool>()
        ) {
            let tokens: Vec<String> = tokens.into_iter().filter(|t| t != VAR_MARKER).collect();
            let sep = if use_commas { ", " } else { "  " };
            prop_assert_eq!(parse_args(&tokens.join(sep)), tokens);
        }
    }
}
