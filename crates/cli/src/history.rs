use anyhow::{bail, Result};
use chrono::{DateTime, Local};
use clap::Subcommand;
use devmate_core::{ChatSession, HistoryStore};

#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    /// List saved sessions, newest first
    List,
    /// Print one session's transcript
    Show { id: String },
    /// Delete one session
    Delete { id: String },
    /// Delete every session
    Clear,
}

pub fn run(action: &HistoryAction, store: &dyn HistoryStore) -> Result<()> {
    match action {
        HistoryAction::List => {
            let sessions = store.load();
            if sessions.is_empty() {
                println!("No saved sessions.");
            }
            for session in sessions.iter().rev() {
                println!("{}", summary_line(session));
            }
        }
        HistoryAction::Show { id } => {
            let Some(session) = store.get(id) else {
                bail!("no saved session '{id}'");
            };
            print!("{}", transcript(&session));
        }
        HistoryAction::Delete { id } => {
            if store.get(id).is_none() {
                bail!("no saved session '{id}'");
            }
            store.delete(id);
            println!("Deleted {id}");
        }
        HistoryAction::Clear => {
            store.clear();
            println!("History cleared");
        }
    }
    Ok(())
}

fn created(session: &ChatSession) -> String {
    DateTime::from_timestamp_millis(session.created_at)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn summary_line(session: &ChatSession) -> String {
    format!(
        "{}  {}  {:<11}  {:>3} turns  {}",
        session.id,
        created(session),
        session.model.as_str(),
        session.turns(),
        session.title
    )
}

fn transcript(session: &ChatSession) -> String {
    let mut out = format!("# {}\n{} | {}\n", session.title, created(session), session.model);
    if let Some(system) = &session.system {
        out.push_str(&format!("\n[system] {system}\n"));
    }
    for message in &session.messages {
        out.push_str(&format!("\n[{}] {}\n", message.role.as_str(), message.content));
    }
    out
}
