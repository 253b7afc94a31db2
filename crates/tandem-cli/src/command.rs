//! REPL command parsing

use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Show,
    Insert { position: usize, text: String },
    /// Characters to remove
    Delete(Range<usize>),
    Append(String),
    Users,
    Language(Option<String>),
    Name { name: String, hue: Option<u32> },
    Status,
    Help,
    Quit,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command '{0}', try 'help'")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("'{0}' is not a number")]
    NotANumber(String),

    #[error("Range out of bounds")]
    OutOfRange,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim_start()),
            None => (line, ""),
        };

        match word.to_lowercase().as_str() {
            "show" => Ok(Command::Show),
            "insert" => {
                let (position, text) = split_number(rest, "insert <pos> <text>")?;
                if text.is_empty() {
                    return Err(CommandError::Usage("insert <pos> <text>"));
                }
                Ok(Command::Insert {
                    position,
                    text: text.to_string(),
                })
            }
            "delete" | "del" => {
                let (position, rest) = split_number(rest, "delete <pos> <len>")?;
                let (len, _) = split_number(rest, "delete <pos> <len>")?;
                let end = position.checked_add(len).ok_or(CommandError::OutOfRange)?;
                Ok(Command::Delete(position..end))
            }
            "append" => {
                if rest.is_empty() {
                    return Err(CommandError::Usage("append <text>"));
                }
                Ok(Command::Append(rest.to_string()))
            }
            "users" => Ok(Command::Users),
            "lang" | "language" => Ok(Command::Language(
                (!rest.is_empty()).then(|| rest.to_string()),
            )),
            "name" => {
                let mut parts = rest.split_whitespace();
                let name = parts.next().ok_or(CommandError::Usage("name <name> [hue]"))?;
                let hue = parts.next().map(parse_number).transpose()?;
                Ok(Command::Name {
                    name: name.to_string(),
                    hue: hue.map(|h| h as u32),
                })
            }
            "status" => Ok(Command::Status),
            "help" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            _ => Err(CommandError::Unknown(word.to_string())),
        }
    }
}

fn split_number<'a>(input: &'a str, usage: &'static str) -> Result<(usize, &'a str), CommandError> {
    let (number, rest) = match input.split_once(char::is_whitespace) {
        Some((number, rest)) => (number, rest),
        None => (input, ""),
    };
    if number.is_empty() {
        return Err(CommandError::Usage(usage));
    }
    Ok((parse_number(number)?, rest))
}

fn parse_number(s: &str) -> Result<usize, CommandError> {
    s.parse().map_err(|_| CommandError::NotANumber(s.to_string()))
}
