//! Directives embedded in rule file comments.
//!
//! A directive is a YAML comment starting with the `promlint` prefix,
//! for example `# promlint disable promql/counter`. The `pint` prefix is
//! accepted as well, so files annotated for pint keep their meaning.
//!
//! `ignore/*` directives hide parts of the file from the YAML parser by
//! blanking them out, which keeps every remaining line at its original
//! number. `disable` and `snooze` directives switch checks off for the
//! rule they are attached to, their `file/` variants for every rule in
//! the file.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

const PREFIXES: [&str; 2] = ["promlint", "pint"];

/// A check switched off until a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snooze {
    pub until: DateTime<Utc>,
    /// Check name or description the snooze applies to.
    pub matcher: String,
}

impl Snooze {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.until > now
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    IgnoreFile,
    IgnoreLine,
    IgnoreBegin,
    IgnoreEnd,
    IgnoreNextLine,
    FileDisable(String),
    Disable(String),
    FileSnooze(Snooze),
    Snooze(Snooze),
    /// A directive that could not be understood, with the reason.
    Invalid(String),
}

impl Directive {
    /// Returns true for directives that apply to the rule they are
    /// attached to.
    pub fn is_rule_directive(&self) -> bool {
        matches!(self, Self::Disable(_) | Self::Snooze(_))
    }
}

/// A directive found on one line of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    /// 1-based line number.
    pub line: usize,
    /// Byte offset of the `#` within the line.
    pub offset: usize,
    pub directive: Directive,
}

/// A comment that looked like a directive but is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidComment {
    pub line: usize,
    pub message: String,
}

/// Parse the directive on `text`, the content of line number `line`.
/// Comments that do not start with a directive prefix yield `None`.
pub fn parse_comment(line: usize, text: &str) -> Option<Comment> {
    let offset = comment_start(text)?;
    let body = text[offset + 2..].trim_start();

    let (prefix, rest) = split_word(body);
    if !PREFIXES.contains(&prefix) {
        return None;
    }
    let (kind, value) = split_word(rest.trim_start());
    if !kind
        .chars()
        .all(|c| c.is_alphabetic() || c == '/' || c == '-')
    {
        return None;
    }
    let directive = directive(kind, value.trim())?;
    Some(Comment {
        line,
        offset,
        directive,
    })
}

/// Byte offset of a `# ` comment marker that starts a line or follows
/// whitespace.
fn comment_start(text: &str) -> Option<usize> {
    text.match_indices("# ")
        .map(|(i, _)| i)
        .find(|&i| i == 0 || text[..i].ends_with(char::is_whitespace))
}

fn split_word(text: &str) -> (&str, &str) {
    match text.find(char::is_whitespace) {
        Some(end) => (&text[..end], &text[end..]),
        None => (text, ""),
    }
}

fn directive(kind: &str, value: &str) -> Option<Directive> {
    let no_value = |directive: Directive| {
        if value.is_empty() {
            directive
        } else {
            Directive::Invalid(format!("unexpected comment suffix: {value:?}"))
        }
    };
    let required = |make: fn(String) -> Directive| {
        if value.is_empty() {
            Directive::Invalid(format!("missing {kind} value"))
        } else {
            make(value.to_owned())
        }
    };
    let snooze = |make: fn(Snooze) -> Directive| {
        if value.is_empty() {
            return Directive::Invalid(format!("missing {kind} value"));
        }
        match parse_snooze(value) {
            Ok(snooze) => make(snooze),
            Err(message) => Directive::Invalid(message),
        }
    };
    let directive = match kind {
        "ignore/file" => no_value(Directive::IgnoreFile),
        "ignore/line" => no_value(Directive::IgnoreLine),
        "ignore/begin" => no_value(Directive::IgnoreBegin),
        "ignore/end" => no_value(Directive::IgnoreEnd),
        "ignore/next-line" => no_value(Directive::IgnoreNextLine),
        "file/disable" => required(Directive::FileDisable),
        "disable" => required(Directive::Disable),
        "file/snooze" => snooze(Directive::FileSnooze),
        "snooze" => snooze(Directive::Snooze),
        _ => return None,
    };
    Some(directive)
}

/// Parse `$TIME $MATCH`, where the time is RFC 3339 or `YYYY-MM-DD`.
fn parse_snooze(value: &str) -> Result<Snooze, String> {
    let Some((time, matcher)) = value.split_once(' ') else {
        return Err(format!(
            "invalid snooze comment, expected '$TIME $MATCH' got {value:?}"
        ));
    };
    let until = DateTime::parse_from_rfc3339(time)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDate::parse_from_str(time, "%Y-%m-%d")
                .map(|date| date.and_time(chrono::NaiveTime::MIN).and_utc())
        })
        .map_err(|err| format!("invalid snooze timestamp: {err}"))?;
    Ok(Snooze {
        until,
        matcher: matcher.trim().to_owned(),
    })
}

// ---------------------------------------------------------------------------
// File content
// ---------------------------------------------------------------------------

/// A rule file with its `ignore/*` regions blanked out.
#[derive(Debug, Default)]
pub(crate) struct Content {
    /// Text to hand to the YAML parser, with the same line breaks as the
    /// input.
    pub body: String,
    /// Line of the `ignore/file` directive.
    pub ignored_at: Option<usize>,
    /// Every directive in the file, in line order.
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    None,
    NextLine,
    Region,
    File,
}

/// Replace everything before the directive on `line` with spaces, or the
/// whole line when `all` is set. Line endings are kept.
fn blank(line: &str, comment: Option<&Comment>, all: bool) -> String {
    let keep_from = match comment {
        Some(c) if !all => c.offset,
        _ => line.len(),
    };
    line.char_indices()
        .map(|(i, c)| match c {
            '\n' | '\r' => c,
            _ if i < keep_from => ' ',
            _ => c,
        })
        .collect()
}

pub(crate) fn read_content(text: &str) -> Content {
    let mut out = Content::default();
    let mut skip = Skip::None;

    for (index, line) in text.split_inclusive('\n').enumerate() {
        let comment = parse_comment(index + 1, line);
        let directive = comment.as_ref().map(|c| &c.directive);

        let blanked = match (skip, directive) {
            (Skip::File, _) => true,
            (_, Some(Directive::IgnoreFile)) => {
                out.ignored_at = Some(index + 1);
                skip = Skip::File;
                true
            }
            (Skip::Region, Some(Directive::IgnoreEnd)) => {
                skip = Skip::None;
                false
            }
            (Skip::Region, _) => true,
            (Skip::NextLine, _) => {
                skip = Skip::None;
                true
            }
            (_, Some(Directive::IgnoreLine)) => true,
            (_, Some(Directive::IgnoreBegin)) => {
                skip = Skip::Region;
                false
            }
            (_, Some(Directive::IgnoreNextLine)) => {
                skip = Skip::NextLine;
                false
            }
            _ => false,
        };

        // Regions and ignored files lose their comments too.
        let all = blanked
            && matches!(skip, Skip::Region | Skip::File)
            && !matches!(directive, Some(Directive::IgnoreFile));
        if blanked {
            out.body.push_str(&blank(line, comment.as_ref(), all));
        } else {
            out.body.push_str(line);
        }
        if !all {
            out.comments.extend(comment);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn directive(text: &str) -> Option<Directive> {
        parse_comment(1, text).map(|c| c.directive)
    }

    #[test]
    fn parse_directives() {
        assert_eq!(directive("# promlint ignore/line"), Some(Directive::IgnoreLine));
        assert_eq!(directive("  #   pint   ignore/next-line  "), Some(Directive::IgnoreNextLine));
        assert_eq!(
            directive("- alert: Foo # promlint disable promql/counter"),
            Some(Directive::Disable("promql/counter".into()))
        );
        assert_eq!(
            directive("# promlint file/disable promql/aggregate(job:true)"),
            Some(Directive::FileDisable("promql/aggregate(job:true)".into()))
        );
    }

    #[test]
    fn other_comments_are_not_directives() {
        assert_eq!(directive("# just a comment"), None);
        assert_eq!(directive("# promlintx disable foo"), None);
        assert_eq!(directive("# promlint unknown/thing"), None);
        assert_eq!(directive("# promlint"), None);
        assert_eq!(directive("expr: foo#promlint disable x"), None);
        assert_eq!(directive(r#"summary: "a#b""#), None);
    }

    #[test]
    fn malformed_directives() {
        assert_eq!(
            directive("# promlint ignore/line please"),
            Some(Directive::Invalid(r#"unexpected comment suffix: "please""#.into()))
        );
        assert_eq!(
            directive("# promlint disable"),
            Some(Directive::Invalid("missing disable value".into()))
        );
        assert!(matches!(
            directive("# promlint snooze promql/counter"),
            Some(Directive::Invalid(message)) if message.starts_with("invalid snooze comment")
        ));
        assert!(matches!(
            directive("# promlint snooze tomorrow promql/counter"),
            Some(Directive::Invalid(message)) if message.starts_with("invalid snooze timestamp")
        ));
    }

    #[test]
    fn snooze_timestamps() {
        let Some(Directive::Snooze(snooze)) = directive("# promlint snooze 2030-01-15 promql/counter")
        else {
            panic!("expected a snooze");
        };
        assert_eq!(snooze.matcher, "promql/counter");
        assert_eq!(snooze.until, Utc.with_ymd_and_hms(2030, 1, 15, 0, 0, 0).unwrap());
        assert!(snooze.is_active(Utc.with_ymd_and_hms(2030, 1, 14, 23, 0, 0).unwrap()));
        assert!(!snooze.is_active(Utc.with_ymd_and_hms(2030, 1, 15, 0, 0, 0).unwrap()));

        let Some(Directive::FileSnooze(snooze)) =
            directive("# promlint file/snooze 2030-01-15T10:00:00+02:00 rule/reuse")
        else {
            panic!("expected a file snooze");
        };
        assert_eq!(snooze.until, Utc.with_ymd_and_hms(2030, 1, 15, 8, 0, 0).unwrap());
    }

    #[test]
    fn ignore_line_keeps_the_comment() {
        let content = read_content("a: 1\nb: 2 # promlint ignore/line\nc: 3\n");
        assert_eq!(content.body, "a: 1\n     # promlint ignore/line\nc: 3\n");
        assert_eq!(content.body.len(), "a: 1\nb: 2 # promlint ignore/line\nc: 3\n".len());
    }

    #[test]
    fn ignore_next_line() {
        let content = read_content("# promlint ignore/next-line\nb: 2\nc: 3");
        assert_eq!(content.body, "# promlint ignore/next-line\n    \nc: 3");
    }

    #[test]
    fn ignore_region() {
        let text = "a: 1\n# promlint ignore/begin\nb: 2 # keep\nc: 3\n# promlint ignore/end\nd: 4\n";
        let content = read_content(text);
        let lines: Vec<&str> = content.body.lines().collect();
        assert_eq!(lines[0], "a: 1");
        assert_eq!(lines[2].trim(), "");
        assert_eq!(lines[3].trim(), "");
        assert_eq!(lines[5], "d: 4");
        assert_eq!(content.body.len(), text.len());
        assert_eq!(content.comments.len(), 2);
    }

    #[test]
    fn ignore_file() {
        let content = read_content("a: 1\n# promlint ignore/file\nb: 2\n");
        assert_eq!(content.ignored_at, Some(2));
        assert_eq!(content.body.lines().nth(2).map(str::trim), Some(""));
        assert_eq!(content.body.lines().next(), Some("a: 1"));
    }
}
