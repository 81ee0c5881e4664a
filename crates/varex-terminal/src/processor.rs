//! Command table, dispatch, and the per-session line loop.
//!
//! A line is resolved to exactly one command invocation: the first token
//! names the command (optionally case-folded); if nothing matches, the
//! default command, when configured, receives the *whole* line as its
//! arguments. Each command declares its exact arity.

use std::collections::HashMap;
use std::io::{self, BufRead, Read, Write};
use std::sync::Arc;

use varex_types::config::{DEFAULT_MAX_LINE_LEN, LineConfig};
use varex_types::error::{Result, VarexError};

use crate::tokenizer::next_token;

/// Why a line could not be executed.
///
/// The protocol variants display as their wire labels.
#[derive(Debug, thiserror::Error)]
pub enum LineError {
    /// Malformed quoting or tokens glued together without a space.
    #[error("INVALID LINE")]
    InvalidLine,

    /// No command matched and no default is configured.
    #[error("NO SUCH COMMAND")]
    NoSuchCommand,

    /// Too few arguments, or unconsumed text after the last one.
    #[error("INVALID ARGUMENTS")]
    InvalidArgs,

    /// The command itself failed.
    #[error(transparent)]
    Handler(#[from] VarexError),
}

impl LineError {
    /// Whether this is a protocol-level error rather than a handler failure.
    pub fn is_protocol(&self) -> bool {
        !matches!(self, Self::Handler(_))
    }
}

/// A single protocol command.
pub trait Command: Send + Sync {
    /// The command name (what the client types).
    fn name(&self) -> &str;

    /// Exact number of arguments required.
    fn arity(&self) -> usize;

    /// One-line description.
    fn description(&self) -> &str {
        ""
    }

    /// Run the command. `args.len() == self.arity()` always holds.
    fn execute(&self, args: &[String]) -> Result<Vec<u8>>;
}

/// A command built from a closure.
pub struct FnCommand<F> {
    name: String,
    arity: usize,
    description: String,
    handler: F,
}

impl<F> FnCommand<F>
where
    F: Fn(&[String]) -> Result<Vec<u8>> + Send + Sync,
{
    pub fn new(name: impl Into<String>, arity: usize, handler: F) -> Self {
        Self {
            name: name.into(),
            arity,
            description: String::new(),
            handler,
        }
    }

    /// Set the text shown by `HELP`.
    pub fn with_description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }
}

impl<F> Command for FnCommand<F>
where
    F: Fn(&[String]) -> Result<Vec<u8>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn arity(&self) -> usize {
        self.arity
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn execute(&self, args: &[String]) -> Result<Vec<u8>> {
        (self.handler)(args)
    }
}

/// Name -> command mapping plus an optional default command.
#[derive(Default)]
pub struct CommandTable {
    commands: HashMap<String, Arc<dyn Command>>,
    default: Option<Arc<dyn Command>>,
}

impl CommandTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command. Replaces any existing command with the same name.
    pub fn register(&mut self, cmd: impl Command + 'static) {
        let cmd: Arc<dyn Command> = Arc::new(cmd);
        self.commands.insert(cmd.name().to_string(), cmd);
    }

    /// Remove a command. Clears the default if it was the removed command.
    pub fn unregister(&mut self, name: &str) -> bool {
        let Some(removed) = self.commands.remove(name) else {
            return false;
        };
        if self
            .default
            .as_ref()
            .is_some_and(|d| Arc::ptr_eq(d, &removed))
        {
            self.default = None;
        }
        true
    }

    /// Designate a registered command as the default.
    ///
    /// Returns `false` (and leaves the default unchanged) if `name` is not
    /// registered.
    pub fn set_default(&mut self, name: &str) -> bool {
        match self.commands.get(name) {
            Some(cmd) => {
                self.default = Some(Arc::clone(cmd));
                true
            },
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Command> {
        self.commands.get(name).map(|c| c.as_ref())
    }

    pub fn default_command(&self) -> Option<&dyn Command> {
        self.default.as_deref()
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Register `HELP`, which lists every command registered so far with
    /// its description. Call it after the other commands are in place.
    pub fn register_help(&mut self) {
        let mut lines: Vec<String> = self
            .names()
            .into_iter()
            .filter(|&name| name != HELP)
            .filter_map(|name| self.get(name))
            .map(|cmd| match cmd.description() {
                "" => cmd.name().to_string(),
                text => format!("{} - {text}", cmd.name()),
            })
            .collect();
        lines.push(format!("{HELP} - {HELP_DESCRIPTION}"));
        lines.sort_unstable();
        let text = lines.join("\n");
        self.register(
            FnCommand::new(HELP, 0, move |_: &[String]| Ok(text.clone().into_bytes()))
                .with_description(HELP_DESCRIPTION),
        );
    }
}

const HELP: &str = "HELP";
const HELP_DESCRIPTION: &str = "List commands";

/// Outcome of reading one line from the stream.
enum LineRead {
    Eof,
    Line,
    TooLong,
}

/// Resolves lines against a [`CommandTable`] and drives sessions.
pub struct LineProcessor {
    table: CommandTable,
    upper_name: bool,
    add_return: bool,
    max_line_len: usize,
}

impl LineProcessor {
    /// A processor with exact-case names and no trailing newline.
    pub fn new(table: CommandTable) -> Self {
        Self {
            table,
            upper_name: false,
            add_return: false,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }

    /// A processor configured from the `[line]` config section.
    pub fn with_config(mut table: CommandTable, config: &LineConfig) -> Self {
        if let Some(name) = &config.default_command
            && !table.set_default(name)
        {
            log::warn!("default command {name:?} is not registered");
        }
        Self {
            table,
            upper_name: config.upper_name,
            add_return: config.add_return,
            max_line_len: config.max_line_len,
        }
    }

    /// Case-fold command names to uppercase before lookup.
    pub fn upper_name(mut self, enable: bool) -> Self {
        self.upper_name = enable;
        self
    }

    /// Append a newline to successful replies.
    pub fn add_return(mut self, enable: bool) -> Self {
        self.add_return = enable;
        self
    }

    pub fn max_line_len(mut self, len: usize) -> Self {
        self.max_line_len = len;
        self
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut CommandTable {
        &mut self.table
    }

    /// Resolve a line to a command and its arguments.
    pub fn parse_command(&self, s: &str) -> std::result::Result<(&dyn Command, Vec<String>), LineError> {
        let (name, rest) = next_token(s).ok_or(LineError::InvalidLine)?;
        let name = if self.upper_name {
            name.to_uppercase()
        } else {
            name
        };

        let (cmd, mut remaining, mut lead_space) = match self.table.get(&name) {
            Some(cmd) => (cmd, rest, rest.starts_with(' ')),
            // The unmatched first word becomes the default command's first
            // argument.
            None => match self.table.default_command() {
                Some(cmd) => (cmd, s, true),
                None => return Err(LineError::NoSuchCommand),
            },
        };

        let mut args = Vec::with_capacity(cmd.arity());
        let mut wanted = cmd.arity();
        while wanted > 0 && !remaining.trim().is_empty() {
            if !lead_space {
                return Err(LineError::InvalidLine);
            }
            let (arg, rem) = next_token(remaining).ok_or(LineError::InvalidLine)?;
            args.push(arg);
            remaining = rem;
            lead_space = rem.starts_with(' ');
            wanted -= 1;
        }
        if wanted > 0 || !remaining.trim().is_empty() {
            return Err(LineError::InvalidArgs);
        }
        Ok((cmd, args))
    }

    /// Parse and run a single line.
    pub fn execute_line(&self, s: &str) -> std::result::Result<Vec<u8>, LineError> {
        let (cmd, args) = self.parse_command(s)?;
        Ok(cmd.execute(&args)?)
    }

    /// Reply for one raw input line, or `None` if the line is skipped.
    fn reply_for(&self, raw: &[u8]) -> Option<Vec<u8>> {
        let Ok(text) = std::str::from_utf8(raw) else {
            log::debug!("rejecting non-UTF-8 line");
            return Some(error_reply(&LineError::InvalidLine));
        };
        let line = text.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        match self.execute_line(line) {
            Ok(mut out) => {
                if self.add_return {
                    out.push(b'\n');
                }
                Some(out)
            },
            Err(err) => {
                if err.is_protocol() {
                    log::debug!("{line:?}: {err}");
                } else {
                    log::warn!("{line:?}: command failed: {err}");
                }
                Some(error_reply(&err))
            },
        }
    }

    /// Run one session: read lines from `reader` and write replies to
    /// `writer` until end of stream.
    ///
    /// Protocol and handler errors are answered in-band. Only I/O errors end
    /// the session early.
    pub fn execute<R: BufRead, W: Write>(&self, mut reader: R, mut writer: W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            let reply = match read_line(&mut reader, &mut buf, self.max_line_len)? {
                LineRead::Eof => return Ok(()),
                LineRead::TooLong => {
                    log::debug!("line longer than {} bytes", self.max_line_len);
                    Some(error_reply(&LineError::InvalidLine))
                },
                LineRead::Line => self.reply_for(&buf),
            };
            if let Some(reply) = reply {
                writer.write_all(&reply)?;
                writer.flush()?;
            }
        }
    }
}

fn error_reply(err: &LineError) -> Vec<u8> {
    let mut out = err.to_string().into_bytes();
    out.push(b'\n');
    out
}

/// Read up to `limit` bytes of one line into `buf`.
///
/// An overlong line is consumed through its newline and reported as
/// [`LineRead::TooLong`].
fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> io::Result<LineRead> {
    let n = Read::take(&mut *reader, limit as u64 + 1).read_until(b'\n', buf)?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.last() == Some(&b'\n') || buf.len() <= limit {
        return Ok(LineRead::Line);
    }
    skip_line(reader)?;
    Ok(LineRead::TooLong)
}

/// Discard input through the next newline or end of stream.
fn skip_line<R: BufRead>(reader: &mut R) -> io::Result<()> {
    loop {
        let (done, used) = {
            let available = match reader.fill_buf() {
                Ok(available) => available,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => (true, pos + 1),
                None => (available.is_empty(), available.len()),
            }
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use varex_types::error::VarError;

    use super::*;

    /// Records every invocation as "NAME a,b".
    fn recording_table(log: &Arc<Mutex<Vec<String>>>) -> CommandTable {
        let mut table = CommandTable::new();
        for (name, arity) in [("LIST", 0), ("GET", 1), ("SET", 2)] {
            let log = Arc::clone(log);
            table.register(FnCommand::new(name, arity, move |args: &[String]| {
                let entry = format!("{name} {}", args.join(","));
                log.lock().unwrap().push(entry.clone());
                Ok(entry.into_bytes())
            }));
        }
        table
    }

    fn processor() -> (LineProcessor, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = recording_table(&log);
        assert!(table.set_default("GET"));
        (LineProcessor::new(table), log)
    }

    fn run(p: &LineProcessor, input: &str) -> String {
        let mut out = Vec::new();
        p.execute(Cursor::new(input.as_bytes().to_vec()), &mut out)
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn dispatches_by_name() {
        let (p, _) = processor();
        assert_eq!(p.execute_line("LIST").unwrap(), b"LIST ");
        assert_eq!(p.execute_line("GET A").unwrap(), b"GET A");
        assert_eq!(p.execute_line("SET A 1").unwrap(), b"SET A,1");
    }

    #[test]
    fn default_command_receives_whole_line() {
        let (p, _) = processor();
        assert_eq!(p.execute_line("DEFAULT").unwrap(), b"GET DEFAULT");
    }

    #[test]
    fn default_command_with_extra_words_is_invalid_args() {
        let (p, _) = processor();
        assert!(matches!(
            p.execute_line("foo bar"),
            Err(LineError::InvalidArgs)
        ));
    }

    #[test]
    fn no_default_is_no_such_command() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let p = LineProcessor::new(recording_table(&log));
        assert!(matches!(
            p.execute_line("NOPE"),
            Err(LineError::NoSuchCommand)
        ));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn arity_mismatch() {
        let (p, log) = processor();
        assert!(matches!(p.execute_line("LIST 1"), Err(LineError::InvalidArgs)));
        assert!(matches!(p.execute_line("GET"), Err(LineError::InvalidArgs)));
        assert!(matches!(
            p.execute_line("SET onlyonearg"),
            Err(LineError::InvalidArgs)
        ));
        assert!(matches!(
            p.execute_line("SET a b c"),
            Err(LineError::InvalidArgs)
        ));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn trailing_space_without_token_is_invalid_args() {
        let (p, log) = processor();
        assert!(matches!(p.execute_line("GET "), Err(LineError::InvalidArgs)));
        assert!(matches!(p.execute_line("SET a   "), Err(LineError::InvalidArgs)));
        assert!(matches!(p.execute_line("SET a \t"), Err(LineError::InvalidArgs)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn session_missing_argument_with_trailing_spaces() {
        let (p, _) = processor();
        assert_eq!(run(&p, "SET a   \n"), "INVALID ARGUMENTS\n");
    }

    #[test]
    fn trailing_whitespace_after_last_arg_is_accepted() {
        let (p, _) = processor();
        assert_eq!(p.execute_line("LIST   ").unwrap(), b"LIST ");
    }

    #[test]
    fn glued_tokens_are_invalid_line() {
        let (p, _) = processor();
        assert!(matches!(
            p.execute_line(r#"SET "a"b 1"#),
            Err(LineError::InvalidLine)
        ));
        assert!(matches!(
            p.execute_line(r#"SET "a""b""#),
            Err(LineError::InvalidLine)
        ));
    }

    #[test]
    fn unterminated_quote_is_invalid_line() {
        let (p, _) = processor();
        assert!(matches!(
            p.execute_line(r#"SET a "b"#),
            Err(LineError::InvalidLine)
        ));
        assert!(matches!(p.execute_line(r#""GET"#), Err(LineError::InvalidLine)));
    }

    #[test]
    fn quoted_arguments() {
        let (p, _) = processor();
        assert_eq!(
            p.execute_line(r#"SET "my var" "a \"b\"""#).unwrap(),
            br#"SET my var,a "b""#
        );
    }

    #[test]
    fn upper_name_folds_case() {
        let (p, _) = processor();
        let p = p.upper_name(true);
        assert_eq!(p.execute_line("get x").unwrap(), b"GET x");
        let (exact, _) = processor();
        // Without folding, "get" falls through to the default command.
        assert!(matches!(
            exact.execute_line("get x"),
            Err(LineError::InvalidArgs)
        ));
    }

    #[test]
    fn handler_errors_pass_through() {
        let mut table = CommandTable::new();
        table.register(FnCommand::new("FAIL", 0, |_: &[String]| {
            Err(VarError::WriteUnsupported.into())
        }));
        let p = LineProcessor::new(table);
        let err = p.execute_line("FAIL").unwrap_err();
        assert!(!err.is_protocol());
        assert_eq!(err.to_string(), "write unsupported");
    }

    #[test]
    fn labels() {
        assert_eq!(LineError::InvalidLine.to_string(), "INVALID LINE");
        assert_eq!(LineError::NoSuchCommand.to_string(), "NO SUCH COMMAND");
        assert_eq!(LineError::InvalidArgs.to_string(), "INVALID ARGUMENTS");
        assert!(LineError::InvalidArgs.is_protocol());
    }

    #[test]
    fn table_default_management() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = recording_table(&log);
        assert!(!table.set_default("MISSING"));
        assert!(table.default_command().is_none());
        assert!(table.set_default("GET"));
        assert_eq!(table.default_command().unwrap().name(), "GET");
        assert!(table.unregister("GET"));
        assert!(table.default_command().is_none());
        assert!(!table.unregister("GET"));
        assert_eq!(table.names(), vec!["LIST", "SET"]);
    }

    #[test]
    fn help_lists_commands_with_descriptions() {
        let mut table = CommandTable::new();
        table.register(
            FnCommand::new("PING", 0, |_: &[String]| Ok(b"pong".to_vec()))
                .with_description("Answer pong"),
        );
        table.register(FnCommand::new("ECHO", 1, |args: &[String]| {
            Ok(args[0].clone().into_bytes())
        }));
        table.register_help();
        assert_eq!(table.names(), vec!["ECHO", "HELP", "PING"]);
        assert_eq!(table.get("HELP").unwrap().description(), "List commands");
        let p = LineProcessor::new(table);
        assert_eq!(
            p.execute_line("HELP").unwrap(),
            b"ECHO\nHELP - List commands\nPING - Answer pong"
        );
        assert!(matches!(p.execute_line("HELP x"), Err(LineError::InvalidArgs)));
    }

    #[test]
    fn help_registered_twice_is_not_listed_twice() {
        let mut table = CommandTable::new();
        table.register(FnCommand::new("PING", 0, |_: &[String]| Ok(Vec::new())));
        table.register_help();
        table.register_help();
        let p = LineProcessor::new(table);
        assert_eq!(p.execute_line("HELP").unwrap(), b"HELP - List commands\nPING");
    }

    #[test]
    fn with_config_applies_settings() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let p = LineProcessor::with_config(recording_table(&log), &LineConfig::default());
        assert_eq!(p.table().default_command().unwrap().name(), "GET");
        assert_eq!(run(&p, "list\n"), "LIST \n");
    }

    // -- Session loop --

    #[test]
    fn session_writes_replies_and_errors() {
        let (p, _) = processor();
        let p = p.add_return(true);
        let out = run(&p, "GET a\nLIST 1\nSET a \"b\n");
        assert_eq!(out, "GET a\nINVALID ARGUMENTS\nINVALID LINE\n");
    }

    #[test]
    fn session_skips_blank_and_comment_lines() {
        let (p, log) = processor();
        let out = run(&p, "\n   \n# GET a\n\t# also\n");
        assert_eq!(out, "");
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn session_without_add_return() {
        let (p, _) = processor();
        assert_eq!(run(&p, "GET a\nGET b\n"), "GET aGET b");
    }

    #[test]
    fn session_no_such_command() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let p = LineProcessor::new(recording_table(&log));
        assert_eq!(run(&p, "HELLO\n"), "NO SUCH COMMAND\n");
    }

    #[test]
    fn session_final_line_without_newline() {
        let (p, _) = processor();
        let p = p.add_return(true);
        assert_eq!(run(&p, "GET a\r\nGET b"), "GET a\nGET b\n");
    }

    #[test]
    fn session_handler_error_is_not_fatal() {
        let mut table = CommandTable::new();
        table.register(FnCommand::new("FAIL", 0, |_: &[String]| {
            Err(VarError::Parse("bad".into()).into())
        }));
        table.register(FnCommand::new("OK", 0, |_: &[String]| Ok(b"ok".to_vec())));
        let p = LineProcessor::new(table).add_return(true);
        assert_eq!(run(&p, "FAIL\nOK\n"), "parse error: bad\nok\n");
    }

    #[test]
    fn session_overlong_line_is_invalid() {
        let (p, log) = processor();
        let p = p.add_return(true).max_line_len(8);
        let input = format!("GET {}\nGET a\n", "x".repeat(32));
        assert_eq!(run(&p, &input), "INVALID LINE\nGET a\n");
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn session_line_at_limit_is_accepted() {
        let (p, _) = processor();
        let p = p.add_return(true).max_line_len(5);
        assert_eq!(run(&p, "GET a\nGET b"), "GET a\nGET b\n");
    }

    #[test]
    fn session_non_utf8_is_invalid_line() {
        let (p, _) = processor();
        let mut out = Vec::new();
        p.execute(Cursor::new(b"GET \xff\n".to_vec()), &mut out).unwrap();
        assert_eq!(out, b"INVALID LINE\n");
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn session_write_failure_is_fatal() {
        let (p, log) = processor();
        let err = p
            .execute(Cursor::new(b"GET a\nGET b\n".to_vec()), FailingWriter)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    struct FailingReader;

    impl io::Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
        }
    }

    #[test]
    fn overlong_line_is_skipped_across_small_buffers() {
        let (p, _) = processor();
        let p = p.add_return(true).max_line_len(5);
        let input = format!("GET {}\nGET a\n", "y".repeat(40));
        let reader = io::BufReader::with_capacity(3, Cursor::new(input.into_bytes()));
        let mut out = Vec::new();
        p.execute(reader, &mut out).unwrap();
        assert_eq!(out, b"INVALID LINE\nGET a\n");
    }

    #[test]
    fn overlong_final_line_without_newline() {
        let (p, _) = processor();
        let p = p.add_return(true).max_line_len(5);
        assert_eq!(run(&p, "GET a\nGET bbbbbbbb"), "GET a\nINVALID LINE\n");
    }

    #[test]
    fn session_read_failure_is_fatal() {
        let (p, _) = processor();
        let err = p
            .execute(io::BufReader::new(FailingReader), Vec::new())
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}
