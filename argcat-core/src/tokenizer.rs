//! Turns a raw command line into argument cells (§4.2).

/// The result of tokenizing a line: the argument vector (program name
/// discarded), and, when a completion cursor was supplied, which token it
/// falls in and the prefix up to the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokenized {
    pub args: Vec<String>,
    pub cursor_index: Option<usize>,
    pub cursor_prefix: Option<String>,
}

/// Tokenize a raw command line.
///
/// `cursor`, when given, is a byte offset into `line`; the token it falls
/// within is preserved along with its prefix up to the cursor, and a
/// trailing cursor past the last character yields an extra empty token.
/// Quote/escape handling only applies when no cursor is supplied, matching
/// the spec's note that quoting is "the strategy used when no completion
/// cursor" is given — completion tokenizes on raw whitespace so the partial
/// word under the cursor is preserved verbatim.
pub fn tokenize(line: &str, cursor: Option<usize>) -> Tokenized {
    match cursor {
        Some(pos) => tokenize_with_cursor(line, pos),
        None => tokenize_quoted(line),
    }
}

fn tokenize_quoted(line: &str) -> Tokenized {
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == '\\' {
                    if let Some(&next) = chars.peek() {
                        current.push(next);
                        chars.next();
                        continue;
                    }
                }
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => {
                if c == '\\' {
                    if let Some(&next) = chars.peek() {
                        current.push(next);
                        chars.next();
                        in_token = true;
                        continue;
                    }
                }
                if c == '\'' || c == '"' {
                    quote = Some(c);
                    in_token = true;
                } else if c.is_whitespace() {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                } else {
                    current.push(c);
                    in_token = true;
                }
            }
        }
    }
    if in_token || quote.is_some() {
        tokens.push(current);
    }

    let args = if tokens.is_empty() {
        Vec::new()
    } else {
        tokens.split_off(1)
    };

    Tokenized {
        args,
        cursor_index: None,
        cursor_prefix: None,
    }
}

fn tokenize_with_cursor(line: &str, cursor: usize) -> Tokenized {
    let cursor = cursor.min(line.len());
    let mut all_tokens: Vec<String> = Vec::new();
    let mut cursor_token_index: Option<usize> = None;
    let mut cursor_prefix: Option<String> = None;

    let mut start: Option<usize> = None;
    let mut boundaries: Vec<(usize, usize)> = Vec::new();
    let bytes = line.as_bytes();
    for (i, c) in line.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                boundaries.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        boundaries.push((s, bytes.len()));
    }

    for (s, e) in &boundaries {
        all_tokens.push(line[*s..*e].to_string());
    }

    for (idx, (s, e)) in boundaries.iter().enumerate() {
        if cursor >= *s && cursor <= *e {
            cursor_token_index = Some(idx);
            cursor_prefix = Some(line[*s..cursor].to_string());
            break;
        }
    }

    if cursor_token_index.is_none() {
        // Cursor sits in trailing whitespace (or an empty line): an extra
        // empty token is appended at the cursor position.
        let trailing = boundaries.last().map(|(_, e)| cursor >= *e).unwrap_or(true);
        if trailing {
            all_tokens.push(String::new());
            cursor_token_index = Some(all_tokens.len() - 1);
            cursor_prefix = Some(String::new());
        }
    }

    let args = if all_tokens.is_empty() {
        Vec::new()
    } else {
        all_tokens.split_off(1)
    };
    let cursor_index = cursor_token_index.map(|i| i.saturating_sub(1));

    Tokenized {
        args,
        cursor_index,
        cursor_prefix,
    }
}

/// Strip leading `NAME=VALUE` assignments (before the first non-assignment
/// token) from an argument vector, returning the stripped args and the
/// overlay of environment assignments to apply (without mutating the host
/// process environment), per §4.2.
pub fn strip_env_overlay(args: &[String]) -> (Vec<String>, Vec<(String, String)>) {
    let mut overlay = Vec::new();
    let mut rest_start = 0;
    for arg in args {
        if let Some(eq) = arg.find('=') {
            let (name, value) = arg.split_at(eq);
            let value = &value[1..];
            if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                overlay.push((name.to_string(), value.to_string()));
                rest_start += 1;
                continue;
            }
        }
        break;
    }
    (args[rest_start..].to_vec(), overlay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("prog -a -b", vec!["-a", "-b"])]
    #[case("prog   -a    -b  ", vec!["-a", "-b"])]
    #[case("prog", vec![])]
    #[case("", vec![])]
    fn whitespace_collapses(#[case] line: &str, #[case] expected: Vec<&str>) {
        let result = tokenize(line, None);
        assert_eq!(result.args, expected);
    }

    #[test]
    fn single_and_double_quotes_swallow_each_other() {
        let result = tokenize(r#"prog "it's fine" 'she said "hi"'"#, None);
        assert_eq!(result.args, vec!["it's fine", "she said \"hi\""]);
    }

    #[test]
    fn backslash_escapes() {
        let result = tokenize(r#"prog a\ b"#, None);
        assert_eq!(result.args, vec!["a b"]);
    }

    #[rstest]
    #[case("prog -s ", 8, 1, "")]
    #[case("prog -s val", 7, 0, "-s")]
    #[case("prog -s", 5, 0, "")]
    fn cursor_prefix(
        #[case] line: &str,
        #[case] cursor: usize,
        #[case] expected_index: usize,
        #[case] expected_prefix: &str,
    ) {
        let result = tokenize(line, Some(cursor));
        assert_eq!(result.cursor_index, Some(expected_index));
        assert_eq!(result.cursor_prefix.as_deref(), Some(expected_prefix));
    }

    #[test]
    fn trailing_cursor_yields_extra_empty_token() {
        let result = tokenize("prog -s ", Some(8));
        assert_eq!(result.args, vec!["-s", ""]);
        assert_eq!(result.cursor_index, Some(1));
        assert_eq!(result.cursor_prefix.as_deref(), Some(""));
    }

    #[test]
    fn env_overlay_stripped() {
        let args = vec![
            "FOO=bar".to_string(),
            "BAZ=1".to_string(),
            "cmd".to_string(),
            "FOO=notenv".to_string(),
        ];
        let (rest, overlay) = strip_env_overlay(&args);
        assert_eq!(rest, vec!["cmd".to_string(), "FOO=notenv".to_string()]);
        assert_eq!(
            overlay,
            vec![
                ("FOO".to_string(), "bar".to_string()),
                ("BAZ".to_string(), "1".to_string())
            ]
        );
    }
}

