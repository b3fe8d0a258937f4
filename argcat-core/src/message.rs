//! Styled, word-wrapped text building (§4.5): `TerminalString`, the
//! `wrap` renderer, and the tagged `Message` variants.

use unicode_width::UnicodeWidthStr;

#[cfg(feature = "tracing_debug")]
use tracing::debug;

/// Callback invoked by [`TerminalString::split`] for each format specifier
/// token (`%s`, `%n`, ...) it encounters.
pub type SplitFormatFn<'a> = &'a dyn Fn(&str, &mut TerminalString);

/// One appended fragment of a [`TerminalString`].
#[derive(Debug, Clone)]
enum Frag {
    /// A standalone word; a space is inserted before it unless the
    /// previous fragment was `Open`.
    Word(String),
    /// Glues to the next word with no separating space.
    Open(String),
    /// Glues to the previous word with no separating space.
    Close(String),
    /// Forces a newline.
    Break,
    /// A raw ANSI control sequence; contributes zero display width.
    Seq(String),
}

/// An append-only list of styled tokens, tracking indentation and an
/// optional right-alignment flag (§4.5).
#[derive(Debug, Clone, Default)]
pub struct TerminalString {
    frags: Vec<Frag>,
    pub indent: usize,
    pub right_align: bool,
}

fn display_width(s: &str) -> usize {
    // Width counts grapheme display width; common multi-codepoint emoji
    // (keycap sequences, ZWJ families, flags) are already 2+ columns wide
    // per `unicode_width`'s East-Asian-width-aware table.
    UnicodeWidthStr::width(s)
}

impl TerminalString {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    pub fn right_align(mut self, right_align: bool) -> Self {
        self.right_align = right_align;
        self
    }

    pub fn word(&mut self, s: impl Into<String>) -> &mut Self {
        self.frags.push(Frag::Word(s.into()));
        self
    }

    pub fn open(&mut self, s: impl Into<String>) -> &mut Self {
        self.frags.push(Frag::Open(s.into()));
        self
    }

    pub fn close(&mut self, s: impl Into<String>) -> &mut Self {
        self.frags.push(Frag::Close(s.into()));
        self
    }

    pub fn break_line(&mut self) -> &mut Self {
        self.frags.push(Frag::Break);
        self
    }

    pub fn seq(&mut self, esc: impl Into<String>) -> &mut Self {
        self.frags.push(Frag::Seq(esc.into()));
        self
    }

    /// Splits `text` on whitespace into words, starting a new line on
    /// blank-line (`"\n\n"`) paragraph breaks and on list-prefix tokens
    /// (`-`, `*`, `1.`, ...). `format` (if present) is invoked for tokens
    /// matching a `%s`/`%n`/... specifier so callers can append structured
    /// fragments (e.g. a styled option name) instead of plain words.
    pub fn split(&mut self, text: &str, format: Option<SplitFormatFn<'_>>) -> &mut Self {
        let mut first_line = true;
        for paragraph in text.split("\n\n") {
            if !first_line {
                self.break_line();
                self.break_line();
            }
            first_line = false;
            let mut first_word = true;
            for word in paragraph.split_whitespace() {
                if !first_word && starts_list_item(word) {
                    self.break_line();
                }
                first_word = false;
                if is_format_specifier(word) {
                    if let Some(f) = format {
                        f(word, self);
                        continue;
                    }
                }
                self.word(word);
            }
        }
        self
    }

    /// Appends `other`'s fragments directly onto `self`, with no separator.
    pub fn merge(&mut self, other: TerminalString) -> &mut Self {
        self.frags.extend(other.frags);
        self
    }

    /// Render-time width of this string, excluding SGR sequences.
    pub fn len(&self) -> usize {
        self.frags
            .iter()
            .map(|f| match f {
                Frag::Word(s) | Frag::Open(s) | Frag::Close(s) => display_width(s),
                Frag::Break | Frag::Seq(_) => 0,
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.frags.is_empty()
    }

    /// Render this string to `width` columns (greedy word-wrap; `0` means no
    /// wrapping), starting at `current_col`, optionally emitting ANSI
    /// sequences (`emit_styles`).
    pub fn wrap(&self, current_col: usize, width: usize, emit_styles: bool) -> String {
        #[cfg(feature = "tracing_debug")]
        debug!("wrap: width={width} emit_styles={emit_styles} indent={}", self.indent);

        let mut lines: Vec<Vec<Frag>> = vec![Vec::new()];
        let mut col = current_col;
        let indent = self.indent;
        let effective_indent = if width > 0 && indent * 2 > width {
            0
        } else {
            indent
        };

        let mut glue_next = false;
        for frag in &self.frags {
            match frag {
                Frag::Seq(s) => {
                    if emit_styles {
                        lines.last_mut().unwrap().push(Frag::Seq(s.clone()));
                    }
                }
                Frag::Break => {
                    lines.push(Vec::new());
                    col = effective_indent;
                    glue_next = false;
                }
                Frag::Open(s) => {
                    let w = display_width(s);
                    if width > 0 && col > effective_indent && col + w > width {
                        lines.push(Vec::new());
                        col = effective_indent;
                    }
                    lines.last_mut().unwrap().push(Frag::Open(s.clone()));
                    col += w;
                    glue_next = true;
                }
                Frag::Close(s) => {
                    lines.last_mut().unwrap().push(Frag::Close(s.clone()));
                    col += display_width(s);
                    glue_next = false;
                }
                Frag::Word(s) => {
                    let w = display_width(s);
                    if !glue_next && width > 0 && col > effective_indent && col + 1 + w > width {
                        lines.push(Vec::new());
                        col = effective_indent;
                    } else if !glue_next && col > effective_indent {
                        col += 1;
                    }
                    lines.last_mut().unwrap().push(Frag::Word(s.clone()));
                    col += w;
                    glue_next = false;
                }
            }
        }

        let right_align = self.right_align;
        lines
            .into_iter()
            .map(|line| render_line(&line, effective_indent, width, right_align, emit_styles))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn render_line(
    line: &[Frag],
    indent: usize,
    width: usize,
    right_align: bool,
    emit_styles: bool,
) -> String {
    let mut out = String::new();
    out.push_str(&" ".repeat(indent));
    let mut glue_next = false;
    let mut visible_len = indent;
    for frag in line {
        match frag {
            Frag::Seq(s) => out.push_str(s),
            Frag::Break => {}
            Frag::Open(s) => {
                if !glue_next && visible_len > indent {
                    out.push(' ');
                    visible_len += 1;
                }
                out.push_str(s);
                visible_len += display_width(s);
                glue_next = true;
            }
            Frag::Close(s) => {
                out.push_str(s);
                visible_len += display_width(s);
                glue_next = false;
            }
            Frag::Word(s) => {
                if !glue_next && visible_len > indent {
                    out.push(' ');
                    visible_len += 1;
                }
                out.push_str(s);
                visible_len += display_width(s);
                glue_next = false;
            }
        }
    }

    if right_align && width > 0 && visible_len < width {
        let pad = width - visible_len;
        if emit_styles {
            out.push_str(&format!("\x1b[{pad}C"));
        } else {
            out.push_str(&" ".repeat(pad));
        }
    }

    out
}

fn starts_list_item(word: &str) -> bool {
    word == "-" || word == "*" || (word.ends_with('.') && word[..word.len() - 1].chars().all(|c| c.is_ascii_digit()) && word.len() > 1)
}

fn is_format_specifier(word: &str) -> bool {
    word.len() == 2 && word.starts_with('%') && word.chars().nth(1).unwrap().is_alphabetic()
}

/// Tagged message variants (§4.5). All produce a `wrap(width)` rendering
/// suitable for terminal I/O; `Error` does not prepend a prefix when
/// stringified (§7).
pub enum Message {
    Ansi(TerminalString),
    Warn(TerminalString),
    Error(TerminalString),
    Completion(Vec<String>),
    Json(JsonValue),
}

impl Message {
    pub fn wrap(&self, width: usize) -> String {
        match self {
            Message::Ansi(s) | Message::Warn(s) | Message::Error(s) => s.wrap(0, width, false),
            Message::Completion(candidates) => candidates.join("\n"),
            Message::Json(v) => v.to_string(),
        }
    }
}

/// A minimal JSON value sufficient to carry completion/help data without
/// pulling in a JSON crate the teacher doesn't use (no JSON schema is
/// specified).
#[derive(Debug, Clone, PartialEq)]
pub enum JsonValue {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Array(Vec<JsonValue>),
    Object(Vec<(String, JsonValue)>),
}

impl std::fmt::Display for JsonValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonValue::Null => write!(f, "null"),
            JsonValue::Bool(b) => write!(f, "{b}"),
            JsonValue::Num(n) => write!(f, "{n}"),
            JsonValue::Str(s) => write!(f, "{:?}", s),
            JsonValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            JsonValue::Object(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{:?}:{v}", k)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn word_wrap_basic() {
        let mut ts = TerminalString::new();
        ts.word("something").word("pieces").word("full");
        assert_eq!(ts.wrap(0, 23, false), "something pieces full");
    }

    #[test]
    fn word_wrap_breaks_at_width() {
        let mut ts = TerminalString::new();
        ts.word("something").word("pieces").word("full").word("more").word("stuff");
        assert_eq!(
            ts.wrap(0, 23, false),
            "something pieces full\nmore stuff"
        );
    }

    #[test]
    fn zero_width_means_no_wrap() {
        let mut ts = TerminalString::new();
        ts.word("a").word("b").word("c");
        assert_eq!(ts.wrap(0, 0, false), "a b c");
    }

    #[test]
    fn open_close_glue() {
        let mut ts = TerminalString::new();
        ts.word("-f,").open("--flag");
        assert_eq!(ts.wrap(0, 0, false), "-f, --flag");
    }

    #[test]
    fn forced_break() {
        let mut ts = TerminalString::new();
        ts.word("a").break_line().word("b");
        assert_eq!(ts.wrap(0, 0, false), "a\nb");
    }

    #[test]
    fn wrap_preservation_sgr_strip_matches_unstyled() {
        let mut ts = TerminalString::new();
        ts.seq("\x1b[1m").word("bold").seq("\x1b[0m").word("plain");
        let with_styles = ts.wrap(0, 0, true);
        let without_styles = ts.wrap(0, 0, false);
        let stripped: String = with_styles
            .replace("\x1b[1m", "")
            .replace("\x1b[0m", "");
        assert_eq!(stripped, without_styles);
    }

    #[rstest]
    #[case("a b c", vec!["a", "b", "c"])]
    #[case("a\n\nb", vec!["a", "b"])]
    fn split_basic(#[case] text: &str, #[case] expected_words: Vec<&str>) {
        let mut ts = TerminalString::new();
        ts.split(text, None);
        let flat = ts.wrap(0, 0, false).replace('\n', " ");
        for w in expected_words {
            assert!(flat.contains(w));
        }
    }

    #[test]
    fn right_align_pads_to_width() {
        let mut ts = TerminalString::new().right_align(true);
        ts.word("abc");
        assert_eq!(ts.wrap(0, 10, false), format!("abc{}", " ".repeat(7)));
    }

    #[test]
    fn error_message_has_no_prefix() {
        let mut ts = TerminalString::new();
        ts.word("boom");
        let msg = Message::Error(ts);
        assert_eq!(msg.wrap(0), "boom");
    }

    #[test]
    fn completion_message_newline_joined() {
        let msg = Message::Completion(vec!["one".to_string(), "two".to_string()]);
        assert_eq!(msg.wrap(0), "one\ntwo");
    }
}
