//! Scanner for the Go template syntax used in rule labels and annotations.
//!
//! Only what checks need is extracted: variable and field references with
//! their spans, `$x := ...` aliases and the identifiers called in each
//! action. Text outside `{{ ... }}` is ignored.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use promlint_promql::PosRange;
use regex::Regex;
use thiserror::Error;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([$.][A-Za-z_][A-Za-z0-9_]*)((?:\.[A-Za-z_][A-Za-z0-9_]*)*)")
        .expect("template reference regex is valid")
});

static DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\$[A-Za-z_][A-Za-z0-9_]*)\s*:=\s*([$.][A-Za-z_][A-Za-z0-9_]*)\s*$")
        .expect("template declaration regex is valid")
});

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s(|])([A-Za-z_][A-Za-z0-9_]*)").expect("template identifier regex is valid")
});

/// Variables Prometheus defines before expanding alert templates.
const PREDEFINED: &[(&str, &str)] = &[
    (".Labels", "$labels"),
    (".ExternalLabels", "$externalLabels"),
    (".ExternalURL", "$externalURL"),
    (".Value", "$value"),
];

pub const LABELS: &str = ".Labels";
pub const EXTERNAL_LABELS: &str = ".ExternalLabels";
pub const VALUE: &str = ".Value";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unclosed action")]
    UnclosedAction { offset: usize },
    #[error("unterminated quoted string")]
    UnterminatedString { offset: usize },
    #[error("unclosed left paren")]
    UnclosedParen { offset: usize },
    #[error("unexpected right paren")]
    UnexpectedParen { offset: usize },
}

impl TemplateError {
    pub fn offset(&self) -> usize {
        match self {
            Self::UnclosedAction { offset }
            | Self::UnterminatedString { offset }
            | Self::UnclosedParen { offset }
            | Self::UnexpectedParen { offset } => *offset,
        }
    }
}

/// A `$var.field` or `.Field.sub` reference inside an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Head variable followed by field names.
    pub path: Vec<String>,
    /// Span of the whole reference in the template text.
    pub span: PosRange,
}

#[derive(Debug, Clone, Default)]
struct Action {
    references: Vec<Reference>,
    identifiers: Vec<String>,
}

/// A scanned template.
#[derive(Debug, Clone)]
pub struct Template {
    actions: Vec<Action>,
    aliases: HashMap<String, BTreeSet<String>>,
}

impl Template {
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let mut template = Self {
            actions: Vec::new(),
            aliases: HashMap::new(),
        };
        for (source, alias) in PREDEFINED {
            template.add_alias(source, alias);
        }

        let mut rest = 0;
        while let Some(found) = text[rest..].find("{{") {
            let open = rest + found;
            let body_start = open + 2;
            let close = find_close(text, body_start)?;
            template.scan_action(text, body_start, close)?;
            rest = close + 2;
        }
        Ok(template)
    }

    fn add_alias(&mut self, source: &str, alias: &str) {
        self.aliases
            .entry(source.to_owned())
            .or_default()
            .insert(alias.to_owned());
    }

    fn scan_action(&mut self, text: &str, start: usize, end: usize) -> Result<(), TemplateError> {
        let masked = mask_literals(&text[start..end], start)?;

        let mut depth = 0usize;
        for (i, c) in masked.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or(TemplateError::UnexpectedParen { offset: start + i })?;
                }
                _ => {}
            }
        }
        if depth > 0 {
            return Err(TemplateError::UnclosedParen { offset: start });
        }

        let body = masked.trim_start_matches('-').trim_end_matches('-');
        if let Some(caps) = DECLARATION.captures(body) {
            self.add_alias(&caps[2], &caps[1]);
            return Ok(());
        }

        let mut action = Action::default();
        for caps in REFERENCE.captures_iter(&masked) {
            let whole = caps.get(0).map_or(PosRange::default(), |m| {
                PosRange::new(start + m.start(), start + m.end())
            });
            let mut path = vec![caps[1].to_owned()];
            path.extend(
                caps[2]
                    .split('.')
                    .filter(|part| !part.is_empty())
                    .map(str::to_owned),
            );
            action.references.push(Reference { path, span: whole });
        }
        for caps in IDENTIFIER.captures_iter(&masked) {
            action.identifiers.push(caps[1].to_owned());
        }
        self.actions.push(action);
        Ok(())
    }

    /// Every name that refers to `root`, including `root` itself and
    /// aliases of aliases.
    pub fn aliases_of(&self, root: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut pending = vec![root.to_owned()];
        while let Some(name) = pending.pop() {
            if !found.insert(name.clone()) {
                continue;
            }
            if let Some(aliases) = self.aliases.get(&name) {
                pending.extend(aliases.iter().cloned());
            }
        }
        found
    }

    /// References whose head is `root` or one of its aliases.
    pub fn references_to(&self, root: &str) -> Vec<&Reference> {
        let names = self.aliases_of(root);
        self.actions
            .iter()
            .flat_map(|a| a.references.iter())
            .filter(|r| names.contains(&r.path[0]))
            .collect()
    }

    /// Fields read from `root`, such as `job` for `$labels.job`, with the
    /// span of the whole reference.
    pub fn fields_of(&self, root: &str) -> Vec<(&str, PosRange)> {
        self.references_to(root)
            .into_iter()
            .filter_map(|r| r.path.get(1).map(|field| (field.as_str(), r.span)))
            .collect()
    }

    /// Returns true when some action that reads `root` also calls one of
    /// `functions`.
    pub fn calls_with(&self, root: &str, functions: &[&str]) -> bool {
        let names = self.aliases_of(root);
        self.actions.iter().any(|action| {
            action.references.iter().any(|r| names.contains(&r.path[0]))
                && action
                    .identifiers
                    .iter()
                    .any(|ident| functions.contains(&ident.as_str()))
        })
    }
}

fn find_close(text: &str, from: usize) -> Result<usize, TemplateError> {
    let bytes = text.as_bytes();
    let mut i = from;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == b'\\' && q != b'`' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'`' || b == b'\'' => quote = Some(b),
            None if text[i..].starts_with("}}") => return Ok(i),
            None => {}
        }
        i += 1;
    }
    Err(TemplateError::UnclosedAction {
        offset: from.saturating_sub(2),
    })
}

/// Copy of `body` with the contents of quoted literals and comments
/// replaced by spaces, so offsets stay valid.
fn mask_literals(body: &str, base: usize) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(body.len());
    let mut quote: Option<(char, usize)> = None;
    let mut escaped = false;
    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match quote {
            Some((q, _)) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' && q != '`' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                    out.push(c);
                    continue;
                }
                out.extend(std::iter::repeat_n(' ', c.len_utf8()));
            }
            None if c == '"' || c == '`' || c == '\'' => {
                quote = Some((c, i));
                out.push(c);
            }
            None if c == '/' && chars.peek().is_some_and(|&(_, next)| next == '*') => {
                let close = body[i..].find("*/").map_or(body.len(), |p| i + p + 2);
                out.extend(std::iter::repeat_n(' ', close - i));
                while chars.peek().is_some_and(|&(j, _)| j < close) {
                    chars.next();
                }
            }
            None => out.push(c),
        }
    }
    match quote {
        Some((_, start)) => Err(TemplateError::UnterminatedString {
            offset: base + start,
        }),
        None => Ok(out),
    }
}
