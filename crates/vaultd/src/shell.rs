// Copyright (c) 2025-2026 Zensical and contributors

// SPDX-License-Identifier: MIT
// All contributions are certified under the DCO

// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to
// deal in the Software without restriction, including without limitation the
// rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
// sell copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:

// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NON-INFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
// IN THE SOFTWARE.

// ----------------------------------------------------------------------------

//! The line-oriented command shell: quote-aware tokenising, then dispatch
//! to the registry. See `SPEC_FULL.md` §6.1/§10.1.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::UNIX_EPOCH;

use crate::error::{Error, Result};
use crate::registry::Registry;

/// Ceiling on a single token's length, matching a `PATH_MAX`-class bound.
const MAX_ARG_LEN: usize = 1024;

/// The prompt printed before each line of input.
const PROMPT: &str = "> ";

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// Splits one line of input into tokens, honouring single and double
/// quoting.
///
/// Single quotes admit no escapes (a backslash inside them is literal);
/// double quotes admit exactly `\"` and `\\`, any other backslash sequence
/// being a parse error, as is an unterminated quote or a token exceeding
/// [`MAX_ARG_LEN`] bytes.
///
/// # Errors
///
/// Returns [`Error::Parse`] for any of the conditions above.
pub fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut token = String::new();
        match chars.peek().copied() {
            Some('\'') => {
                chars.next();
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => push_bounded(&mut token, c)?,
                        None => return Err(Error::Parse("unterminated '\''".into())),
                    }
                }
            }
            Some('"') => {
                chars.next();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('"') => push_bounded(&mut token, '"')?,
                            Some('\\') => push_bounded(&mut token, '\\')?,
                            Some(other) => {
                                return Err(Error::Parse(format!(
                                    "unsupported escape sequence \\{other}"
                                )));
                            }
                            None => return Err(Error::Parse("unterminated escape".into())),
                        },
                        Some(c) => push_bounded(&mut token, c)?,
                        None => return Err(Error::Parse("unterminated \"".into())),
                    }
                }
            }
            _ => {
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    push_bounded(&mut token, c)?;
                    chars.next();
                }
            }
        }
        tokens.push(token);
    }
    Ok(tokens)
}

/// Appends `c` to `token`, rejecting it once the token exceeds
/// [`MAX_ARG_LEN`] bytes.
fn push_bounded(token: &mut String, c: char) -> Result {
    if token.len() + c.len_utf8() > MAX_ARG_LEN {
        return Err(Error::Parse(format!(
            "argument exceeds {MAX_ARG_LEN} bytes"
        )));
    }
    token.push(c);
    Ok(())
}

/// Runs the REPL to completion: reads lines from `input`, writes prompts
/// and command output to `output`, and returns once `exit` is issued,
/// `input` is exhausted, or `terminate` is observed set (a `SIGINT`/
/// `SIGTERM` delivered to the process — see `SPEC_FULL.md` §6.2/§10.2). In
/// every case the REPL falls through to the same `registry.shutdown()`
/// call, so a Ctrl-C takes the same orderly-shutdown path as `exit`.
///
/// # Errors
///
/// Returns an error if writing to `output` fails, or if the registry's
/// final `shutdown` fails.
pub fn run<R: BufRead, W: Write>(
    registry: &mut Registry,
    mut input: R,
    mut output: W,
    terminate: &AtomicBool,
) -> Result {
    'repl: loop {
        if terminate.load(Ordering::Relaxed) {
            break;
        }

        write!(output, "{PROMPT}")?;
        output.flush()?;

        let mut line = String::new();
        let n = loop {
            match input.read_line(&mut line) {
                Ok(n) => break n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {
                    // A signal other than the one we're watching for could
                    // also produce EINTR here; only a termination request
                    // ends the REPL, anything else just retries the read.
                    if terminate.load(Ordering::Relaxed) {
                        break 'repl;
                    }
                    line.clear();
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        };
        if n == 0 {
            break;
        }
        let line = line.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            continue;
        }

        let tokens = match tokenize(line) {
            Ok(tokens) => tokens,
            Err(err) => {
                writeln!(output, "error: {err}")?;
                continue;
            }
        };
        if dispatch(registry, &tokens, &mut output)? {
            break;
        }
    }
    registry.shutdown()
}

/// Dispatches one already-tokenised command line. Returns `true` if `exit`
/// was issued.
fn dispatch<W: Write>(registry: &mut Registry, tokens: &[String], output: &mut W) -> Result<bool> {
    let Some(cmd) = tokens.first() else {
        return Ok(false);
    };

    match cmd.as_str() {
        "help" => print_help(output)?,
        "list" => print_list(registry, output)?,
        "add" => cmd_add(registry, &tokens[1..], output)?,
        "end" => cmd_end(registry, &tokens[1..], output)?,
        "restore" => cmd_restore(registry, &tokens[1..], output)?,
        "exit" => return Ok(true),
        other => writeln!(output, "unrecognised command: {other}")?,
    }
    Ok(false)
}

fn print_help<W: Write>(output: &mut W) -> Result {
    writeln!(output, "commands:")?;
    writeln!(output, "  help                                print this message")?;
    writeln!(output, "  list                                 list active and ended backups")?;
    writeln!(output, "  add <source> <target>...             start mirroring source into each target")?;
    writeln!(output, "  end <source> <target>...              stop mirroring, keeping each mirror")?;
    writeln!(output, "  restore <source> <target>...          reconstruct source from each mirror")?;
    writeln!(output, "  exit                                 stop all workers and quit")?;
    Ok(())
}

fn print_list<W: Write>(registry: &mut Registry, output: &mut W) -> Result {
    let mut any = false;
    for record in registry.list() {
        any = true;
        let status = if record.active { "active" } else { "ended" };
        let created = record
            .created_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        writeln!(
            output,
            "{} -> {} [{status}] created_at={created}",
            record.src.display(),
            record.dst.display()
        )?;
    }
    if !any {
        writeln!(output, "no backups")?;
    }
    Ok(())
}

fn cmd_add<W: Write>(registry: &mut Registry, args: &[String], output: &mut W) -> Result {
    let [source, targets @ ..] = args else {
        writeln!(output, "usage: add <source> <target>...")?;
        return Ok(());
    };
    if targets.is_empty() {
        writeln!(output, "usage: add <source> <target>...")?;
        return Ok(());
    }
    for target in targets {
        if let Err(err) = registry.add(Path::new(source), Path::new(target)) {
            writeln!(output, "error: {err}")?;
        }
    }
    Ok(())
}

fn cmd_end<W: Write>(registry: &mut Registry, args: &[String], output: &mut W) -> Result {
    let [source, targets @ ..] = args else {
        writeln!(output, "usage: end <source> <target>...")?;
        return Ok(());
    };
    if targets.is_empty() {
        writeln!(output, "usage: end <source> <target>...")?;
        return Ok(());
    }
    for target in targets {
        if let Err(err) = registry.end(Path::new(source), Path::new(target)) {
            writeln!(output, "error: {err}")?;
        }
    }
    Ok(())
}

fn cmd_restore<W: Write>(registry: &mut Registry, args: &[String], output: &mut W) -> Result {
    let [source, targets @ ..] = args else {
        writeln!(output, "usage: restore <source> <target>...")?;
        return Ok(());
    };
    if targets.is_empty() {
        writeln!(output, "usage: restore <source> <target>...")?;
        return Ok(());
    }
    for target in targets {
        if let Err(err) = registry.restore(Path::new(source), Path::new(target)) {
            writeln!(output, "error: {err}")?;
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_on_whitespace() {
        assert_eq!(tokenize("add /src /dst").unwrap(), vec!["add", "/src", "/dst"]);
    }

    #[test]
    fn tokenize_honours_single_quotes_without_escapes() {
        let tokens = tokenize(r"add 'my src' '\n'").unwrap();
        assert_eq!(tokens, vec!["add", "my src", r"\n"]);
    }

    #[test]
    fn tokenize_honours_double_quote_escapes() {
        let tokens = tokenize(r#"add "a \"quoted\" path" "back\\slash""#).unwrap();
        assert_eq!(tokens, vec!["add", "a \"quoted\" path", "back\\slash"]);
    }

    #[test]
    fn tokenize_rejects_unsupported_escape() {
        assert!(tokenize(r#""a\nb""#).is_err());
    }

    #[test]
    fn tokenize_rejects_unterminated_quote() {
        assert!(tokenize("'unterminated").is_err());
        assert!(tokenize("\"unterminated").is_err());
    }

    #[test]
    fn tokenize_rejects_oversized_argument() {
        let long = "a".repeat(MAX_ARG_LEN + 1);
        assert!(tokenize(&long).is_err());
    }

    #[test]
    fn empty_line_is_ignored() {
        assert_eq!(tokenize("   ").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn run_handles_help_list_and_exit() {
        let mut registry = Registry::new();
        let input = b"help\nlist\nexit\n" as &[u8];
        let mut output = Vec::new();
        run(&mut registry, input, &mut output, &AtomicBool::new(false)).unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("commands:"));
        assert!(text.contains("no backups"));
    }

    #[test]
    fn run_reports_unrecognised_command() {
        let mut registry = Registry::new();
        let input = b"bogus\nexit\n" as &[u8];
        let mut output = Vec::new();
        run(&mut registry, input, &mut output, &AtomicBool::new(false)).unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("unrecognised command: bogus"));
    }

    #[test]
    fn run_stops_when_terminate_flag_is_already_set() {
        // Stands in for a SIGINT/SIGTERM observed before (or instead of) any
        // line being read: the REPL must still fall through to
        // `registry.shutdown()` rather than block on `input`.
        let mut registry = Registry::new();
        let input = b"" as &[u8];
        let mut output = Vec::new();
        run(&mut registry, input, &mut output, &AtomicBool::new(true)).unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(!text.contains(PROMPT));
    }

    #[test]
    fn run_add_end_restore_round_trip() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), b"hello").unwrap();
        let dst_parent = tempfile::tempdir().unwrap();
        let dst = dst_parent.path().join("mirror");

        let mut registry = Registry::new();
        let input = format!(
            "add {} {}\nend {} {}\nlist\nexit\n",
            src.path().display(),
            dst.display(),
            src.path().display(),
            dst.display(),
        );
        let mut output = Vec::new();
        run(
            &mut registry,
            input.as_bytes(),
            &mut output,
            &AtomicBool::new(false),
        )
        .unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("[ended]"));
        assert!(!text.contains("error:"));
    }
}
