// Command-line grammar and the script driver.
//
// Input is one command per line, `name(arg1,arg2,...)`. Blank lines and
// lines starting with `//` or `#` are comments and do not advance the
// logical clock; every other line, including a malformed one, advances it
// by exactly one tick. Malformed lines and unknown ids are reported to the
// diagnostic stream and skipped.

use std::io::{BufRead, Write};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::common::{SiteId, Tick, TransactionId, VariableId};
use crate::transaction::manager::TransactionManager;
use crate::transaction::error::TransactionResult;

static COMMAND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\w+)\s*\(\s*([^)]*)\)\s*$").expect("command pattern"));

/// A typed command fed to the transaction manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Begin(TransactionId),
    BeginRo(TransactionId),
    Read(TransactionId, VariableId),
    Write(TransactionId, VariableId, i64),
    End(TransactionId),
    Fail(SiteId),
    Recover(SiteId),
    Dump,
}

/// Errors raised while parsing a single line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed command line: '{0}'")]
    Malformed(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("command '{command}' expects {expected} argument(s), got {got}")]
    ArgumentCount {
        command: String,
        expected: usize,
        got: usize,
    },

    #[error("invalid argument '{0}'")]
    BadArgument(String),
}

/// Parses one input line. `Ok(None)` means the line is a comment or blank
/// and must not advance the tick.
pub fn parse_line(line: &str) -> Result<Option<Command>, ParseError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with("//") || line.starts_with('#') {
        return Ok(None);
    }
    let captures = COMMAND_RE
        .captures(line)
        .ok_or_else(|| ParseError::Malformed(line.to_owned()))?;
    let name = &captures[1];
    let args: Vec<&str> = if captures[2].trim().is_empty() {
        Vec::new()
    } else {
        captures[2].split(',').map(str::trim).collect()
    };

    let command = match name {
        "begin" => Command::Begin(txn_arg(name, &args, 0)?),
        "beginRO" => Command::BeginRo(txn_arg(name, &args, 0)?),
        "R" => {
            expect_args(name, &args, 2)?;
            Command::Read(txn_arg(name, &args, 0)?, var_arg(&args[1])?)
        }
        "W" => {
            expect_args(name, &args, 3)?;
            Command::Write(
                txn_arg(name, &args, 0)?,
                var_arg(&args[1])?,
                int_arg(args[2])?,
            )
        }
        "end" => Command::End(txn_arg(name, &args, 0)?),
        "fail" => Command::Fail(index_arg(name, &args)?),
        "recover" => Command::Recover(index_arg(name, &args)?),
        "dump" => {
            expect_args(name, &args, 0)?;
            Command::Dump
        }
        other => return Err(ParseError::UnknownCommand(other.to_owned())),
    };
    Ok(Some(command))
}

/// Dispatches one command at the given tick.
pub fn apply<W: Write>(
    manager: &mut TransactionManager<W>,
    command: Command,
    tick: Tick,
) -> TransactionResult<()> {
    match command {
        Command::Begin(tid) => manager.begin(tid, tick),
        Command::BeginRo(tid) => manager.begin_ro(tid, tick),
        Command::Read(tid, vid) => manager.read(tid, vid, tick),
        Command::Write(tid, vid, value) => manager.write(tid, vid, value, tick),
        Command::End(tid) => manager.end(tid, tick),
        Command::Fail(sid) => manager.fail(sid, tick),
        Command::Recover(sid) => manager.recover(sid, tick),
        Command::Dump => manager.dump(),
    }
}

/// Runs a whole script against a fresh manager and returns the output
/// sink. Parse failures and unknown ids are logged and skipped; only an
/// unreadable input stream or an unwritable output stream is fatal.
pub fn run_script<R: BufRead, W: Write>(input: R, out: W) -> std::io::Result<W> {
    let mut manager = TransactionManager::with_output(out);
    let mut tick: Tick = 0;

    for line in input.lines() {
        let line = line?;
        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(command)) => {
                tick += 1;
                if let Err(err) = apply(&mut manager, command, tick) {
                    match err {
                        crate::transaction::error::TransactionError::Output(io_err) => {
                            return Err(io_err)
                        }
                        other => warn!(tick, %other, "command skipped"),
                    }
                }
            }
            Err(err) => {
                tick += 1;
                warn!(tick, %err, "unparseable line skipped");
            }
        }
    }
    Ok(manager.into_output())
}

fn expect_args(command: &str, args: &[&str], expected: usize) -> Result<(), ParseError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(ParseError::ArgumentCount {
            command: command.to_owned(),
            expected,
            got: args.len(),
        })
    }
}

/// Parses a `T<k>` argument at `index`, also enforcing that single-id
/// commands got exactly one argument.
fn txn_arg(command: &str, args: &[&str], index: usize) -> Result<TransactionId, ParseError> {
    if args.len() <= index {
        return Err(ParseError::ArgumentCount {
            command: command.to_owned(),
            expected: index + 1,
            got: args.len(),
        });
    }
    let raw = args[index];
    let digits = raw
        .strip_prefix('T')
        .ok_or_else(|| ParseError::BadArgument(raw.to_owned()))?;
    digits
        .parse()
        .map_err(|_| ParseError::BadArgument(raw.to_owned()))
}

fn var_arg(raw: &str) -> Result<VariableId, ParseError> {
    let digits = raw
        .strip_prefix('x')
        .ok_or_else(|| ParseError::BadArgument(raw.to_owned()))?;
    digits
        .parse()
        .map_err(|_| ParseError::BadArgument(raw.to_owned()))
}

fn int_arg(raw: &str) -> Result<i64, ParseError> {
    raw.parse().map_err(|_| ParseError::BadArgument(raw.to_owned()))
}

fn index_arg(command: &str, args: &[&str]) -> Result<usize, ParseError> {
    expect_args(command, args, 1)?;
    int_arg(args[0]).and_then(|v| {
        usize::try_from(v).map_err(|_| ParseError::BadArgument(args[0].to_owned()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_every_command_form() {
        assert_eq!(parse_line("begin(T1)"), Ok(Some(Command::Begin(1))));
        assert_eq!(parse_line("beginRO(T7)"), Ok(Some(Command::BeginRo(7))));
        assert_eq!(parse_line("R(T2,x14)"), Ok(Some(Command::Read(2, 14))));
        assert_eq!(parse_line("W(T2, x3, 55)"), Ok(Some(Command::Write(2, 3, 55))));
        assert_eq!(parse_line("W(T2,x3,-5)"), Ok(Some(Command::Write(2, 3, -5))));
        assert_eq!(parse_line("end(T2)"), Ok(Some(Command::End(2))));
        assert_eq!(parse_line("fail(4)"), Ok(Some(Command::Fail(4))));
        assert_eq!(parse_line("recover(4)"), Ok(Some(Command::Recover(4))));
        assert_eq!(parse_line("dump()"), Ok(Some(Command::Dump)));
    }

    #[test]
    fn comments_and_blanks_are_skipped() {
        assert_eq!(parse_line(""), Ok(None));
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(parse_line("// a comment"), Ok(None));
        assert_eq!(parse_line("# another"), Ok(None));
    }

    #[test]
    fn malformed_lines_are_errors() {
        assert!(matches!(parse_line("begin T1"), Err(ParseError::Malformed(_))));
        assert!(matches!(
            parse_line("frobnicate(T1)"),
            Err(ParseError::UnknownCommand(_))
        ));
        assert!(matches!(
            parse_line("R(T1)"),
            Err(ParseError::ArgumentCount { .. })
        ));
        assert!(matches!(parse_line("R(x1,T1)"), Err(ParseError::BadArgument(_))));
        assert!(matches!(parse_line("fail(x)"), Err(ParseError::BadArgument(_))));
    }

    #[test]
    fn scripts_with_comments_run_clean() {
        let script = "\
begin(T1)
# interlude

// another comment
W(T1,x2,77)
end(T1)
beginRO(T2)
R(T2,x2)
end(T2)
";
        let out = run_script(Cursor::new(script), Vec::new()).expect("script runs");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("T2 reads x2: 77"));
        assert!(text.contains("T2 commits"));
    }

    #[test]
    fn bad_lines_are_skipped_but_consume_a_tick() {
        let script = "\
begin(T1)
W(T1,x2,9)
nonsense here
end(T1)
";
        let out = run_script(Cursor::new(script), Vec::new()).expect("script runs");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("T1 writes x2: 9"));
        assert!(text.contains("T1 commits"));
    }
}
