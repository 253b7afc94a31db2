//! tandem CLI Client
//!
//! Joins a shared document on a tandem server and edits it line by line.
//!
//! # Usage
//!
//! ```bash
//! # Join a session on a local server
//! tandem --session notes
//!
//! # Remote server, explicit identity
//! tandem --host example.com --port 7070 --session notes --name Ada --hue 200
//! ```

mod command;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tandem_client::{ClientEvent, Connection, ConnectionState};
use tandem_core::{CursorData, SessionId, TextEdit, UserInfo};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use crate::command::Command;

/// tandem Command Line Interface
#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(author, version, about = "tandem CLI - collaborative plain-text editing")]
struct Args {
    /// Server hostname
    #[arg(short = 'H', long, default_value = "127.0.0.1", env = "TANDEM_HOST")]
    host: String,

    /// Server TCP port
    #[arg(short, long, default_value = "7070", env = "TANDEM_PORT")]
    port: u16,

    /// Session to join
    #[arg(short, long, env = "TANDEM_SESSION")]
    session: String,

    /// Display name shown to other participants
    #[arg(short, long, env = "TANDEM_NAME", default_value = "anonymous")]
    name: String,

    /// Display color as a hue angle; random when omitted
    #[arg(long, env = "TANDEM_HUE")]
    hue: Option<u32>,

    /// Quiet mode (no banner)
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let addr = format!("{}:{}", args.host, args.port);
    let session = SessionId::new(&args.session)?;
    let info = UserInfo::new(args.name.clone(), args.hue.unwrap_or_else(random_hue));

    let conn = Connection::connect(&addr, &session, info)
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;

    if !args.quiet {
        println!(
            "{}",
            format!(
                r#"
  tandem CLI    Connected to {} / {}
                Type 'help' for commands, 'quit' to exit
"#,
                addr, session
            )
            .cyan()
        );
    }

    tokio::spawn(report_events(conn.subscribe()));

    let mut lines = spawn_readline();
    while let Some(line) = lines.recv().await {
        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{} {}", "Error:".red(), e);
                continue;
            }
        };

        if command == Command::Quit {
            break;
        }
        if let Err(e) = execute(&conn, command) {
            eprintln!("{} {}", "Error:".red(), e);
        }
    }

    conn.close();
    Ok(())
}

/// Read lines on a blocking thread so the connection keeps running
fn spawn_readline() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("Error: {:?}", e);
                return;
            }
        };
        let history_path = dirs_next::home_dir()
            .map(|p| p.join(".tandem_history"))
            .unwrap_or_default();
        let _ = rl.load_history(&history_path);

        loop {
            let prompt = format!("{}> ", "tandem".green());
            match rl.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(line);
                    if tx.send(line.to_string()).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!("^D");
                    break;
                }
                Err(err) => {
                    eprintln!("Error: {:?}", err);
                    break;
                }
            }
        }

        let _ = rl.save_history(&history_path);
    });

    rx
}

fn execute(conn: &Connection, command: Command) -> Result<()> {
    match command {
        Command::Show => {
            let revision = conn.revision();
            println!("{}", format!("-- revision {} --", revision).dimmed());
            println!("{}", conn.text());
        }
        Command::Insert { position, text } => {
            let end = position + text.chars().count();
            conn.replace(&[TextEdit::new(position..position, text)])?;
            conn.set_cursor(CursorData::at(end as u32));
        }
        Command::Delete(range) => {
            let position = range.start;
            conn.replace(&[TextEdit::new(range, "")])?;
            conn.set_cursor(CursorData::at(position as u32));
        }
        Command::Append(text) => {
            conn.replace_with(|c| {
                let end = c.text().chars().count();
                vec![TextEdit::new(end..end, text)]
            })?;
        }
        Command::Users => {
            let participants = conn.participants();
            if participants.is_empty() {
                println!("{}", "(nobody else here)".dimmed());
            }
            for p in participants {
                let name = p
                    .info
                    .map(|i| format!("{} (hue {})", i.name, i.hue))
                    .unwrap_or_else(|| "(unnamed)".into());
                let cursor = p
                    .cursor
                    .and_then(|c| c.cursors.first().copied())
                    .map(|pos| format!(" at {}", pos))
                    .unwrap_or_default();
                println!("{}) {}{}", p.id, name, cursor);
            }
        }
        Command::Language(Some(language)) => conn.set_language(language),
        Command::Language(None) => match conn.language() {
            Some(language) => println!("{}", language.yellow()),
            None => println!("{}", "(none)".dimmed()),
        },
        Command::Name { name, hue } => {
            let hue = hue.unwrap_or_else(|| conn.with_client(|c| c.info().hue));
            conn.set_info(UserInfo::new(name, hue));
        }
        Command::Status => {
            let (state, id, revision, idle) =
                conn.with_client(|c| (c.state(), c.id(), c.revision(), c.outbox().is_idle()));
            println!(
                "{} id={} revision={} pending={}",
                paint_state(state),
                id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
                revision,
                !idle
            );
        }
        Command::Help => print_help(),
        Command::Quit => {}
    }
    Ok(())
}

async fn report_events(mut events: broadcast::Receiver<ClientEvent>) {
    loop {
        match events.recv().await {
            Ok(ClientEvent::StateChanged(state)) => println!("{}", paint_state(state)),
            Ok(ClientEvent::DocumentChanged { remote: true, .. }) => {
                println!("{}", "(document changed remotely, 'show' to view)".dimmed())
            }
            Ok(ClientEvent::LanguageChanged(language)) => {
                println!("{}", format!("language: {}", language).blue())
            }
            Ok(ClientEvent::Desynchronized { reason }) => {
                eprintln!(
                    "{} {}\n{}",
                    "Desynchronized:".red().bold(),
                    reason,
                    "Edits from now on stay local. Restart to rejoin.".red()
                );
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn paint_state(state: ConnectionState) -> ColoredString {
    let text = format!("[{}]", state);
    match state {
        ConnectionState::Connecting => text.yellow(),
        ConnectionState::Connected => text.green(),
        ConnectionState::Disconnected | ConnectionState::Desynchronized => text.red(),
    }
}

fn random_hue() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .subsec_nanos()
        % 360
}

fn print_help() {
    println!(
        r#"
{}

{}
  show                                   Print the document
  insert <pos> <text>                    Insert text at a character offset
  delete <pos> <len>                     Delete characters
  append <text>                          Add text at the end

{}
  users                                  List other participants
  lang [language]                        Show or set the session language
  name <name> [hue]                      Change display name and color
  status                                 Connection state and revision

{}
  help                                   Show this help
  quit/exit                              Exit CLI
"#,
        "tandem Commands".cyan().bold(),
        "Editing".yellow().bold(),
        "Session".yellow().bold(),
        "Local".yellow().bold(),
    );
}

// Minimal dirs_next replacement for home directory
mod dirs_next {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    }
}
