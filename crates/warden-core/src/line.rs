//! Parsed protocol lines.
//!
//! A [`Line`] is one IRC message with its source already split into
//! nick/ident/host, which is the shape every handler in this crate filters on.

use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// One parsed protocol line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Line {
    /// IRCv3 message tags, in wire order.
    pub tags: Vec<(String, Option<String>)>,
    /// The raw source prefix without the leading `:`.
    pub source: Option<String>,
    pub nick: String,
    pub ident: String,
    pub host: String,
    /// Upper-cased verb or three-digit numeric.
    pub command: String,
    pub args: Vec<String>,
}

impl Line {
    /// Build an outgoing line with no source.
    pub fn new<I, S>(command: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.to_ascii_uppercase(),
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Attach a source prefix, splitting it into nick/ident/host.
    pub fn with_source(mut self, source: &str) -> Self {
        let (nick, ident, host) = split_source(source);
        self.nick = nick;
        self.ident = ident;
        self.host = host;
        self.source = Some(source.to_string());
        self
    }

    /// The first argument, which is the target for most commands.
    pub fn target(&self) -> &str {
        self.arg(0).unwrap_or("")
    }

    /// Argument at `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// The last argument, usually the human-readable trailing text.
    pub fn trailing(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }

    /// The raw source, or an empty string for server-less lines.
    pub fn src(&self) -> &str {
        self.source.as_deref().unwrap_or("")
    }

    /// Look up a tag value by key.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_deref())
    }
}

/// Split a source prefix into `(nick, ident, host)`.
///
/// `nick!ident@host` yields all three parts. A bare token containing a dot is
/// taken to be a server name and lands in `host`; anything else is a nick.
pub fn split_source(source: &str) -> (String, String, String) {
    if !source.contains('!') && !source.contains('@') {
        if source.contains('.') {
            return (String::new(), String::new(), source.to_string());
        }
        return (source.to_string(), String::new(), String::new());
    }

    let (nick, rest) = match source.split_once('!') {
        Some((nick, rest)) => (nick, rest),
        None => ("", source),
    };
    let (ident, host) = match rest.split_once('@') {
        Some((ident, host)) => (ident, host),
        None => (rest, ""),
    };
    (nick.to_string(), ident.to_string(), host.to_string())
}

fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

impl FromStr for Line {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rest = s.trim_end_matches(['\r', '\n']);
        if rest.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        let mut line = Line::default();

        if let Some(stripped) = rest.strip_prefix('@') {
            let (tags, tail) = stripped.split_once(' ').unwrap_or((stripped, ""));
            line.tags = tags
                .split(';')
                .filter(|t| !t.is_empty())
                .map(|t| match t.split_once('=') {
                    Some((k, v)) => (k.to_string(), Some(unescape_tag_value(v))),
                    None => (t.to_string(), None),
                })
                .collect();
            rest = tail.trim_start_matches(' ');
        }

        if let Some(stripped) = rest.strip_prefix(':') {
            let (source, tail) = stripped.split_once(' ').unwrap_or((stripped, ""));
            line = line.with_source(source);
            rest = tail.trim_start_matches(' ');
        }

        let (command, mut params) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return Err(ParseError::MissingCommand(s.to_string()));
        }
        line.command = command.to_ascii_uppercase();

        loop {
            params = params.trim_start_matches(' ');
            if params.is_empty() {
                break;
            }
            if let Some(trailing) = params.strip_prefix(':') {
                line.args.push(trailing.to_string());
                break;
            }
            let (arg, tail) = params.split_once(' ').unwrap_or((params, ""));
            line.args.push(arg.to_string());
            params = tail;
        }

        Ok(line)
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, ":{} ", source)?;
        }
        f.write_str(&self.command)?;
        let last = self.args.len().saturating_sub(1);
        for (i, arg) in self.args.iter().enumerate() {
            let needs_colon = i == last && (arg.is_empty() || arg.contains(' ') || arg.starts_with(':'));
            if needs_colon {
                write!(f, " :{}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}
