//! Interactive reconciliation console
//!
//! Stands in for the operator screen: every input line is either a command
//! (`:load KEY`, `:verify`, `:status`, `:quit`) or a tag read. Status lines
//! are printed whenever the session publishes a change.

use crate::source::parse_line;
use tagrec_core::report::{generate_report, ReportFormat};
use tagrec_core::{SessionHandle, SessionSnapshot};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{error, warn};

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Load(String),
    Verify,
    Status,
    Quit,
    Help,
    Scan(String),
}

pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let Some(command) = line.strip_prefix(':') else {
        return Some(ConsoleCommand::Scan(line.to_string()));
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    Some(match name {
        "load" | "l" => ConsoleCommand::Load(arg.to_string()),
        "verify" | "v" => ConsoleCommand::Verify,
        "status" | "s" => ConsoleCommand::Status,
        "quit" | "q" | "exit" => ConsoleCommand::Quit,
        _ => ConsoleCommand::Help,
    })
}

pub fn format_status(snapshot: &SessionSnapshot) -> String {
    let receipt = snapshot
        .record_key
        .as_ref()
        .map(|k| k.as_str())
        .unwrap_or("-");
    let mut line = format!(
        "[{}] receipt {} | expected items: {} | scanned items: {}",
        snapshot.phase, receipt, snapshot.expected_count, snapshot.scanned_count
    );
    if let Some(message) = &snapshot.message {
        line.push_str(" | ");
        line.push_str(message);
    }
    line
}

const HELP: &str = "Commands: :load <receipt>  :verify  :status  :quit  (any other line is a tag UID)";

/// Run the console until EOF or `:quit`
pub async fn run<R: AsyncBufRead + Unpin>(session: SessionHandle, input: R) {
    let mut updates = session.subscribe();
    let watcher = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            eprintln!("{}", format_status(&snapshot));
        }
    });

    println!("{}", HELP);
    let mut lines = input.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        };

        let Some(command) = parse_command(&line) else {
            continue;
        };

        match command {
            ConsoleCommand::Load(key) => {
                let loader = session.clone();
                // Scans keep flowing while the fetch is in flight
                tokio::spawn(async move {
                    match loader.load(key).await {
                        Ok(outcome) => println!("{}", outcome.message),
                        Err(e) => println!("{}", e.user_message()),
                    }
                });
            }
            ConsoleCommand::Verify => match session.verify().await {
                Ok(report) => match generate_report(&report, ReportFormat::Text) {
                    Ok(text) => print!("{}", text),
                    Err(e) => error!("Failed to generate report: {}", e),
                },
                Err(e) => println!("{}", e.user_message()),
            },
            ConsoleCommand::Status => match session.snapshot().await {
                Ok(snapshot) => println!("{}", format_status(&snapshot)),
                Err(e) => warn!("{}", e),
            },
            ConsoleCommand::Quit => break,
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Scan(raw) => {
                if let Some(raw) = parse_line(&raw) {
                    if let Err(e) = session.record_scan(raw).await {
                        warn!("{}", e);
                        break;
                    }
                }
            }
        }
    }

    session.shutdown().await;
    watcher.abort();
}
