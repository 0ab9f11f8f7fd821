//! Command parsing for message handlers.
//!
//! A [`CmdParser`] splits message text of the form
//! `<cmd_start><name><sep>arg1<sep>arg2…` into named [`ParseArgs`]. A
//! parser may carry [`ArgFormatter`]s that coerce and validate each
//! positional argument, supply per-position defaults (optionally triggered
//! by a sentinel token), and invoke user callbacks on conversion,
//! validation or missing-argument failures.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{ParserError, ParserResult};

/// Characters that cannot appear in command start/separator tokens.
const BANNED_TOKEN_CHARS: &str = "'\"\\()[]{}\r\n\t";

// ============================================================================
// ParseArgs
// ============================================================================

/// The positional arguments parsed out of one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseArgs {
    /// Argument values; `None` when the command carried no arguments.
    pub vals: Option<Vec<Value>>,
    pub(crate) formatted: bool,
}

impl ParseArgs {
    /// Wraps raw argument strings.
    pub fn new(vals: Option<Vec<Value>>) -> Self {
        Self {
            vals,
            formatted: false,
        }
    }

    /// Whether the formatters already ran over these values.
    pub fn is_formatted(&self) -> bool {
        self.formatted
    }
}

// ============================================================================
// CmdParser
// ============================================================================

/// A command parser bound to a set of target command names.
pub struct CmdParser {
    id: String,
    targets: Vec<String>,
    start_regex: Regex,
    sep_regex: Regex,
    formatters: Vec<Option<ArgFormatter>>,
}

impl CmdParser {
    /// Creates a parser.
    ///
    /// # Errors
    ///
    /// Tokens containing quotes, brackets, backslashes, control characters,
    /// letters or digits are refused, as are overlapping start/separator
    /// token sets.
    pub fn new<I, J, S, T>(cmd_start: I, cmd_sep: J, targets: Vec<String>) -> ParserResult<Self>
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        let start_tokens: Vec<String> = cmd_start.into_iter().map(Into::into).collect();
        let sep_tokens: Vec<String> = cmd_sep.into_iter().map(Into::into).collect();

        for token in start_tokens.iter().chain(&sep_tokens) {
            let banned = token
                .chars()
                .any(|c| BANNED_TOKEN_CHARS.contains(c) || c.is_ascii_alphanumeric());
            if banned || token.is_empty() {
                return Err(ParserError::BannedToken(token.clone()));
            }
        }
        if start_tokens.iter().any(|s| sep_tokens.contains(s)) {
            return Err(ParserError::OverlappingTokens);
        }

        let join = |tokens: &[String]| {
            tokens
                .iter()
                .map(|t| regex::escape(t))
                .collect::<Vec<_>>()
                .join("|")
        };
        // The token classes are validated non-empty literals, so the
        // patterns always compile.
        let start_regex = Regex::new(&join(&start_tokens)).expect("escaped literal pattern");
        let sep_regex = Regex::new(&join(&sep_tokens)).expect("escaped literal pattern");

        Ok(Self {
            id: format!("{}\u{0}{}", start_tokens.join(""), sep_tokens.join("")),
            targets,
            start_regex,
            sep_regex,
            formatters: Vec::new(),
        })
    }

    /// Attaches per-position argument formatters (`None` skips a position).
    pub fn formatters(mut self, formatters: Vec<Option<ArgFormatter>>) -> ParserResult<Self> {
        for formatter in formatters.iter().flatten() {
            if formatter.default_replace_flag.is_some() && formatter.default.is_none() {
                return Err(ParserError::ReplaceFlagWithoutDefault);
            }
        }
        self.formatters = formatters;
        Ok(self)
    }

    /// A stable key identifying this parser's token configuration, used to
    /// memoize parse results on the event.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether this parser formats its arguments.
    pub fn need_format(&self) -> bool {
        !self.formatters.is_empty()
    }

    fn purify(text: &str) -> &str {
        text.trim_matches([' ', '\r', '\n'])
    }

    fn split<'a>(&self, text: &'a str, regex: &Regex, pop_first: bool) -> Vec<&'a str> {
        let mut parts: Vec<&str> = regex.split(text).collect();
        if pop_first && !parts.is_empty() {
            parts.remove(0);
        }
        parts.into_iter().filter(|p| !p.is_empty()).collect()
    }

    /// Parses every command occurrence out of the text.
    ///
    /// Returns `None` when the text contains no command at all.
    pub fn parse(&self, text: &str) -> Option<HashMap<String, ParseArgs>> {
        let pure = Self::purify(text);
        let commands = self.split(pure, &self.start_regex, true);
        let mut group = HashMap::new();
        for command in commands {
            let tokens = self.split(command, &self.sep_regex, false);
            let Some((name, args)) = tokens.split_first() else {
                continue;
            };
            let vals = if args.is_empty() {
                None
            } else {
                Some(args.iter().map(|a| Value::String((*a).to_string())).collect())
            };
            group.insert((*name).to_string(), ParseArgs::new(vals));
        }
        if group.is_empty() { None } else { Some(group) }
    }

    /// Tests a parse result against this parser's targets.
    pub fn test(&self, group: Option<&HashMap<String, ParseArgs>>) -> Option<(String, ParseArgs)> {
        let group = group?;
        for target in &self.targets {
            if let Some(args) = group.get(target) {
                return Some((target.clone(), args.clone()));
            }
        }
        None
    }

    /// Runs the formatters over the arguments. Returns false when any
    /// position fails (its failure callback has already run).
    pub async fn format(&self, cmd_name: &str, args: &mut ParseArgs) -> bool {
        if args.formatted || self.formatters.is_empty() {
            return true;
        }
        for (idx, formatter) in self.formatters.iter().enumerate() {
            let Some(formatter) = formatter else {
                continue;
            };
            if !formatter.format(cmd_name, args, idx).await {
                return false;
            }
        }
        if let Some(vals) = &mut args.vals {
            vals.truncate(self.formatters.len());
        }
        args.formatted = true;
        true
    }
}

/// Pre-bound start/separator tokens producing parsers per command name.
pub struct CmdParserFactory {
    cmd_start: Vec<String>,
    cmd_sep: Vec<String>,
}

impl CmdParserFactory {
    /// Stores the token configuration.
    pub fn new<I, J, S, T>(cmd_start: I, cmd_sep: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            cmd_start: cmd_start.into_iter().map(Into::into).collect(),
            cmd_sep: cmd_sep.into_iter().map(Into::into).collect(),
        }
    }

    /// Generates a parser for the given target names.
    pub fn r#gen(&self, targets: Vec<String>) -> ParserResult<CmdParser> {
        CmdParser::new(self.cmd_start.clone(), self.cmd_sep.clone(), targets)
    }
}

// ============================================================================
// ArgFormatter
// ============================================================================

/// Converts a raw argument into its typed value, or explains why not.
pub type ConvertFn = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

/// Validates a converted argument.
pub type VerifyFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// A failure callback.
pub type FormatCb = Arc<dyn Fn(FormatInfo) -> BoxFuture<'static, ()> + Send + Sync>;

/// Why formatting a position failed.
#[derive(Debug, Clone)]
pub enum FormatFailure {
    /// Conversion failed with the given reason.
    Convert(String),
    /// The converted value failed verification.
    Verify,
    /// The position had no argument and no default.
    ArgLack,
}

/// Everything a failure callback gets to see.
#[derive(Debug, Clone)]
pub struct FormatInfo {
    /// The offending source value (`None` for missing arguments).
    pub src: Option<Value>,
    /// Human description of the argument.
    pub src_desc: Option<String>,
    /// Human description of what was expected.
    pub src_expect: Option<String>,
    /// Zero-based argument position.
    pub idx: usize,
    /// The command being formatted.
    pub cmd_name: String,
    /// The failure class.
    pub failure: FormatFailure,
}

/// Coercion, validation and defaulting for one argument position.
#[derive(Default, Clone)]
pub struct ArgFormatter {
    convert: Option<ConvertFn>,
    verify: Option<VerifyFn>,
    src_desc: Option<String>,
    src_expect: Option<String>,
    default: Option<Value>,
    default_replace_flag: Option<String>,
    convert_fail: Option<FormatCb>,
    verify_fail: Option<FormatCb>,
    arg_lack: Option<FormatCb>,
}

impl ArgFormatter {
    /// An empty formatter (pass-through).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the conversion function.
    pub fn convert<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.convert = Some(Arc::new(f));
        self
    }

    /// Sets the validation predicate (runs after conversion).
    pub fn verify<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.verify = Some(Arc::new(f));
        self
    }

    /// Describes the argument and its expectation for failure reporting.
    pub fn describe(
        mut self,
        desc: impl Into<String>,
        expect: impl Into<String>,
    ) -> Self {
        self.src_desc = Some(desc.into());
        self.src_expect = Some(expect.into());
        self
    }

    /// Supplies a default for a missing argument.
    pub fn default_val(mut self, val: Value) -> Self {
        self.default = Some(val);
        self
    }

    /// A sentinel token that, when given literally, is replaced by the
    /// default value. Requires [`default_val`](Self::default_val).
    pub fn default_replace_flag(mut self, flag: impl Into<String>) -> Self {
        self.default_replace_flag = Some(flag.into());
        self
    }

    /// Callback for conversion failures.
    pub fn on_convert_fail(mut self, cb: FormatCb) -> Self {
        self.convert_fail = Some(cb);
        self
    }

    /// Callback for verification failures.
    pub fn on_verify_fail(mut self, cb: FormatCb) -> Self {
        self.verify_fail = Some(cb);
        self
    }

    /// Callback for missing arguments.
    pub fn on_arg_lack(mut self, cb: FormatCb) -> Self {
        self.arg_lack = Some(cb);
        self
    }

    fn take_src(&self, args: &mut ParseArgs, idx: usize) -> Option<Value> {
        match &self.default {
            None => args.vals.as_ref().and_then(|vals| vals.get(idx)).cloned(),
            Some(default) => {
                let vals = args.vals.get_or_insert_with(Vec::new);
                if vals.len() < idx + 1 {
                    vals.push(default.clone());
                }
                vals.get(idx).cloned()
            }
        }
    }

    async fn fail(&self, info: FormatInfo) {
        let cb = match &info.failure {
            FormatFailure::Convert(_) => &self.convert_fail,
            FormatFailure::Verify => &self.verify_fail,
            FormatFailure::ArgLack => &self.arg_lack,
        };
        match cb {
            Some(cb) => cb(info).await,
            None => warn!(
                cmd = %info.cmd_name,
                idx = info.idx,
                failure = ?info.failure,
                "command argument formatting failed"
            ),
        }
    }

    async fn format(&self, cmd_name: &str, args: &mut ParseArgs, idx: usize) -> bool {
        let info = |src: Option<Value>, failure: FormatFailure| FormatInfo {
            src,
            src_desc: self.src_desc.clone(),
            src_expect: self.src_expect.clone(),
            idx,
            cmd_name: cmd_name.to_string(),
            failure,
        };

        let Some(mut src) = self.take_src(args, idx) else {
            self.fail(info(None, FormatFailure::ArgLack)).await;
            return false;
        };

        if let (Some(flag), Some(default)) = (&self.default_replace_flag, &self.default) {
            if src.as_str() == Some(flag.as_str()) {
                src = default.clone();
            }
        }

        let converted = match &self.convert {
            Some(convert) => match convert(&src) {
                Ok(value) => value,
                Err(reason) => {
                    self.fail(info(Some(src), FormatFailure::Convert(reason))).await;
                    return false;
                }
            },
            None => src.clone(),
        };

        if let Some(verify) = &self.verify {
            if !verify(&converted) {
                self.fail(info(Some(src), FormatFailure::Verify)).await;
                return false;
            }
        }

        // take_src guarantees vals reaches this index.
        if let Some(vals) = &mut args.vals {
            vals[idx] = converted;
        }
        true
    }
}

// ============================================================================
// Tests
// ============================================================================
