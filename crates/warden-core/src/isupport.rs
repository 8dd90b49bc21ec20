//! ISUPPORT (RPL_ISUPPORT / 005) capability table.
//!
//! The table stores raw `KEY=VALUE` tokens as the server announces them and
//! derives typed views on demand. Missing or malformed tokens never produce an
//! error: accessors that have a protocol default return `(default, false)`,
//! the rest return `None`.
//!
//! # Reference
//! - Modern IRC documentation: <https://modern.ircdocs.horse/isupport.html>

use std::collections::HashMap;

use parking_lot::RwLock;

/// Channel prefixes assumed when the server sends no `CHANTYPES`.
pub const DEFAULT_CHANTYPES: &str = "#&";
/// Membership prefix letters assumed when `PREFIX` is absent or malformed.
pub const DEFAULT_PREFIX_LETTERS: &str = "ov";
/// Membership prefix symbols matching [`DEFAULT_PREFIX_LETTERS`].
pub const DEFAULT_PREFIX_SYMBOLS: &str = "@+";
/// Channel mode taxonomy assumed when `CHANMODES` is absent or malformed.
pub const DEFAULT_CHANMODES: &str = "beI,k,l,imnpst";
/// Modes per `MODE` line when `MODES` is absent or unparsable.
pub const DEFAULT_MODES_PER_LINE: u64 = 1;

/// Membership prefixes, ordered from most to least powerful.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prefixes {
    pub letters: Vec<char>,
    pub symbols: Vec<char>,
}

impl Default for Prefixes {
    fn default() -> Self {
        Self {
            letters: DEFAULT_PREFIX_LETTERS.chars().collect(),
            symbols: DEFAULT_PREFIX_SYMBOLS.chars().collect(),
        }
    }
}

impl Prefixes {
    /// Parse a `PREFIX` value like `(ov)@+`.
    ///
    /// Returns `None` when a bracket is missing or the symbol count does not
    /// match the letter count.
    pub fn parse(s: &str) -> Option<Self> {
        let inner = s.strip_prefix('(')?;
        let (letters, symbols) = inner.split_once(')')?;
        let letters: Vec<char> = letters.chars().collect();
        let symbols: Vec<char> = symbols.chars().collect();
        if letters.len() != symbols.len() {
            return None;
        }
        Some(Self { letters, symbols })
    }

    /// Returns the prefix symbol for a mode letter, e.g. `v` → `+`.
    pub fn letter_to_symbol(&self, letter: char) -> Option<char> {
        self.letters
            .iter()
            .position(|&c| c == letter)
            .map(|i| self.symbols[i])
    }

    /// Returns the mode letter for a prefix symbol, e.g. `@` → `o`.
    pub fn symbol_to_letter(&self, symbol: char) -> Option<char> {
        self.symbols
            .iter()
            .position(|&c| c == symbol)
            .map(|i| self.letters[i])
    }

    /// True if `letter` is a membership mode on this server.
    pub fn is_prefix_mode(&self, letter: char) -> bool {
        self.letters.contains(&letter)
    }
}

/// The four `CHANMODES` categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChanModeType {
    /// Type A: adds or removes an address to a list. Always has a parameter.
    List,
    /// Type B: changes a setting. Always has a parameter.
    Setting,
    /// Type C: changes a setting. Only has a parameter when set.
    SettingParamWhenSet,
    /// Type D: changes a setting. Never has a parameter.
    SettingNoParam,
}

/// Parsed `CHANMODES` token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChanModes {
    pub list: Vec<char>,
    pub setting: Vec<char>,
    pub param_when_set: Vec<char>,
    pub no_param: Vec<char>,
}

impl Default for ChanModes {
    fn default() -> Self {
        // DEFAULT_CHANMODES is a valid four-group string.
        Self::parse(DEFAULT_CHANMODES).unwrap_or(Self {
            list: vec!['b'],
            setting: vec!['k'],
            param_when_set: vec!['l'],
            no_param: Vec::new(),
        })
    }
}

impl ChanModes {
    /// Parse a `CHANMODES` value like `b,k,l,imnpst`.
    ///
    /// Returns `None` unless there are exactly four comma-separated groups.
    pub fn parse(s: &str) -> Option<Self> {
        let groups: Vec<&str> = s.split(',').collect();
        let [a, b, c, d] = groups.as_slice() else {
            return None;
        };
        Some(Self {
            list: a.chars().collect(),
            setting: b.chars().collect(),
            param_when_set: c.chars().collect(),
            no_param: d.chars().collect(),
        })
    }

    /// Classify a mode character, if the server announced it.
    pub fn classify(&self, mode: char) -> Option<ChanModeType> {
        if self.list.contains(&mode) {
            Some(ChanModeType::List)
        } else if self.setting.contains(&mode) {
            Some(ChanModeType::Setting)
        } else if self.param_when_set.contains(&mode) {
            Some(ChanModeType::SettingParamWhenSet)
        } else if self.no_param.contains(&mode) {
            Some(ChanModeType::SettingNoParam)
        } else {
            None
        }
    }
}

/// Server capability table fed by 005 lines.
///
/// Keys are stored upper-cased; a re-announced key overwrites the previous
/// value and a `-KEY` token removes it.
#[derive(Debug, Default)]
pub struct Isupport {
    data: RwLock<HashMap<String, String>>,
}

impl Isupport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest the arguments of one `RPL_ISUPPORT` line.
    ///
    /// The first argument (our nick) and a trailing human-readable text are skipped.
    pub fn update_from_args(&self, args: &[String]) {
        let Some((_, mut tokens)) = args.split_first() else {
            return;
        };
        if let Some((last, head)) = tokens.split_last() {
            if last.contains(' ') {
                tokens = head;
            }
        }
        self.update(tokens.iter().map(String::as_str));
    }

    /// Ingest `KEY` / `KEY=VALUE` / `-KEY` tokens.
    pub fn update<'a, I>(&self, tokens: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut data = self.data.write();
        for token in tokens {
            if token.is_empty() {
                continue;
            }
            if let Some(negated) = token.strip_prefix('-') {
                data.remove(&negated.to_ascii_uppercase());
                continue;
            }
            let (key, value) = token.split_once('=').unwrap_or((token, ""));
            data.insert(key.to_ascii_uppercase(), value.to_string());
        }
    }

    /// Raw value for `key`; `Some("")` for a bare key.
    pub fn get(&self, key: &str) -> Option<String> {
        self.data.read().get(&key.to_ascii_uppercase()).cloned()
    }

    /// Supported channel prefixes.
    pub fn chan_types(&self) -> (Vec<char>, bool) {
        match self.get("CHANTYPES") {
            Some(v) => (v.chars().collect(), true),
            None => (DEFAULT_CHANTYPES.chars().collect(), false),
        }
    }

    /// Membership prefixes from `PREFIX`, most powerful first.
    pub fn prefixes(&self) -> (Prefixes, bool) {
        match self.get("PREFIX").as_deref().and_then(Prefixes::parse) {
            Some(p) => (p, true),
            None => (Prefixes::default(), false),
        }
    }

    /// Channel mode taxonomy from `CHANMODES`.
    pub fn chan_modes(&self) -> (ChanModes, bool) {
        match self.get("CHANMODES").as_deref().and_then(ChanModes::parse) {
            Some(m) => (m, true),
            None => (ChanModes::default(), false),
        }
    }

    /// Maximum number of parameterized modes per `MODE` line.
    pub fn modes(&self) -> Option<u64> {
        self.get_u64("MODES")
    }

    /// [`Isupport::modes`] with the protocol default applied.
    pub fn modes_or_default(&self) -> u64 {
        self.modes().filter(|&n| n > 0).unwrap_or(DEFAULT_MODES_PER_LINE)
    }

    /// Maximum number of channels allowed to join (superseded by `CHANLIMIT`).
    pub fn max_channels(&self) -> Option<u64> {
        self.get_u64("MAXCHANNELS")
    }

    /// Maximum number of bans per channel (superseded by `MAXLIST`).
    pub fn max_bans(&self) -> Option<u64> {
        self.get_u64("MAXBANS")
    }

    /// Maximum number of channels allowed to join, by channel prefix.
    pub fn chan_limit(&self) -> Option<HashMap<char, u64>> {
        self.get("CHANLIMIT").as_deref().and_then(parse_char_limits)
    }

    /// Maximum number of entries per list mode.
    pub fn max_list(&self) -> Option<HashMap<char, u64>> {
        self.get("MAXLIST").as_deref().and_then(parse_char_limits)
    }

    /// Mode letter for ban exceptions, if supported (bare token means `e`).
    pub fn excepts(&self) -> Option<char> {
        self.single_char_or("EXCEPTS", 'e')
    }

    /// Mode letter for invite exceptions, if supported (bare token means `I`).
    pub fn invite_excepts(&self) -> Option<char> {
        self.single_char_or("INVEX", 'I')
    }

    /// Membership symbols that may prefix a message target.
    pub fn status_msg(&self) -> Option<Vec<char>> {
        self.get("STATUSMSG").map(|v| v.chars().collect())
    }

    /// Case mapping used for nick and channel comparison (e.g. `rfc1459`).
    pub fn case_mapping(&self) -> Option<String> {
        self.get("CASEMAPPING").filter(|v| !v.is_empty())
    }

    /// Split the leading channel-type prefixes off `target`.
    pub fn split_channel<'t>(&self, target: &'t str) -> (Vec<char>, &'t str) {
        let (types, _) = self.chan_types();
        split_prefix(target, &types)
    }

    /// Returns whether the target is a channel.
    pub fn is_channel(&self, target: &str) -> bool {
        !self.split_channel(target).0.is_empty()
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key)?.parse().ok()
    }

    fn single_char_or(&self, key: &str, default: char) -> Option<char> {
        let value = self.get(key)?;
        let mut chars = value.chars();
        match (chars.next(), chars.next()) {
            (None, _) => Some(default),
            (Some(c), None) => Some(c),
            _ => None,
        }
    }
}

/// Parse `b:100,eI:50` style limit lists.
///
/// Any malformed group invalidates the whole token.
fn parse_char_limits(s: &str) -> Option<HashMap<char, u64>> {
    let mut out = HashMap::new();
    for group in s.split(',') {
        let (chars, limit) = group.split_once(':')?;
        let limit: u64 = limit.parse().ok()?;
        for c in chars.chars() {
            out.insert(c, limit);
        }
    }
    Some(out)
}

/// Strip every leading character of `s` found in `available`.
///
/// Returns the stripped prefixes in order and the remainder. An empty input,
/// or one consisting only of prefixes, yields an empty remainder.
pub fn split_prefix<'s>(s: &'s str, available: &[char]) -> (Vec<char>, &'s str) {
    let rest = s.trim_start_matches(|c: char| available.contains(&c));
    let prefixes = s[..s.len() - rest.len()].chars().collect();
    (prefixes, rest)
}
