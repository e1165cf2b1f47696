use crate::config::Config;
use crate::contact_store::{self, ContactDirectory};
use crate::identity::{Participant, ParticipantId};
use crate::messenger_types::{SessionEvent, ViewSnapshot};
use crate::message_store::MessageStatus;
use crate::presence::PresenceState;
use crate::session::SessionHandle;
use crate::Timestamp;
use colored::*;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

/// One line of REPL input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    List,
    Search(String),
    Open(ParticipantId),
    Close,
    Send { to: ParticipantId, body: String },
    /// Plain text, sent to the open conversation
    Say(String),
    Online(ParticipantId),
    Offline(ParticipantId),
    /// Write the contact directory; `None` means the file it was loaded from
    Save(Option<PathBuf>),
    Help,
    Quit,
    Empty,
}

/// Parse a REPL line
pub fn parse_command(line: &str) -> std::result::Result<ReplCommand, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ReplCommand::Empty);
    }
    if !line.starts_with('/') {
        return Ok(ReplCommand::Say(line.to_string()));
    }

    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    let need_id = |usage: &str| -> std::result::Result<ParticipantId, String> {
        if rest.is_empty() {
            Err(format!("Usage: {}", usage))
        } else {
            Ok(ParticipantId::new(rest))
        }
    };

    match command {
        "/list" | "/ls" => Ok(ReplCommand::List),
        "/search" => Ok(ReplCommand::Search(rest.to_string())),
        "/open" => need_id("/open <id>").map(ReplCommand::Open),
        "/close" => Ok(ReplCommand::Close),
        "/send" => match rest.split_once(char::is_whitespace) {
            Some((to, body)) => Ok(ReplCommand::Send {
                to: ParticipantId::new(to),
                body: body.trim().to_string(),
            }),
            None => Err("Usage: /send <id> <message>".to_string()),
        },
        "/online" => need_id("/online <id>").map(ReplCommand::Online),
        "/offline" => need_id("/offline <id>").map(ReplCommand::Offline),
        "/save" => Ok(ReplCommand::Save(
            Some(rest).filter(|p| !p.is_empty()).map(PathBuf::from),
        )),
        "/help" | "/?" => Ok(ReplCommand::Help),
        "/quit" | "/exit" => Ok(ReplCommand::Quit),
        other => Err(format!("Unknown command: {}", other)),
    }
}

/// Contact directory as currently shown, ready to be written to disk
pub fn directory_from_snapshot(snapshot: &ViewSnapshot, local: &Participant) -> ContactDirectory {
    ContactDirectory {
        local: Some(local.clone()),
        contacts: snapshot
            .contacts
            .iter()
            .map(|c| Participant {
                id: c.id.clone(),
                display_name: c.name.clone(),
                avatar_ref: c.avatar_ref.clone(),
            })
            .collect(),
    }
}

/// Interactive loop on stdin until `/quit` or EOF
pub async fn run(handle: SessionHandle, config: &Config) -> anyhow::Result<()> {
    print_usage();
    print_contacts(&handle.snapshot());

    let printer = {
        let mut events = handle.subscribe_events();
        let handle = handle.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => print_event(&event, &handle.snapshot()),
                    Err(RecvError::Lagged(n)) => {
                        eprintln!("{} skipped {} events", "!".yellow(), n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{} {}", "✗".red().bold(), e);
                continue;
            }
        };
        if command == ReplCommand::Quit {
            break;
        }
        if let Err(e) = execute(&handle, config, command).await {
            eprintln!("{} {}", "✗".red().bold(), e);
        }
    }

    handle.shutdown().await.ok();
    printer.abort();
    Ok(())
}

async fn execute(
    handle: &SessionHandle,
    config: &Config,
    command: ReplCommand,
) -> anyhow::Result<()> {
    match command {
        ReplCommand::List => print_contacts(&handle.snapshot()),
        ReplCommand::Search(term) => {
            for contact in handle.search(&term) {
                println!("  {} {}", contact.id.to_string().cyan(), contact.name);
            }
        }
        ReplCommand::Open(id) => {
            handle.select_conversation(id).await?;
            print_thread(&handle.snapshot());
        }
        ReplCommand::Close => {
            if handle.close_conversation().await?.is_none() {
                println!("No conversation is open");
            }
        }
        ReplCommand::Send { to, body } => {
            handle.send_message(to, body).await?;
        }
        ReplCommand::Say(body) => {
            let to = handle
                .snapshot()
                .active
                .map(|a| a.counterparty)
                .ok_or_else(|| anyhow::anyhow!("Open a conversation first (/open <id>)"))?;
            handle.send_message(to, body).await?;
        }
        ReplCommand::Online(id) => {
            handle
                .ingress()
                .deliver(crate::TransportEvent::PresenceOnline { participant_id: id })
                .await?;
        }
        ReplCommand::Offline(id) => {
            handle
                .ingress()
                .deliver(crate::TransportEvent::PresenceOffline {
                    participant_id: id,
                    at: chrono::Utc::now(),
                })
                .await?;
        }
        ReplCommand::Save(path) => {
            let path = path
                .or_else(|| config.contacts_file.clone())
                .ok_or_else(|| anyhow::anyhow!("No contacts file loaded; use /save <path>"))?;
            let directory = directory_from_snapshot(&handle.snapshot(), &config.local);
            contact_store::save_contacts(&path, &directory)?;
            println!("  {} saved {} contacts to {}", "✓".green(), directory.contacts.len(), path.display());
        }
        ReplCommand::Help => print_usage(),
        ReplCommand::Quit | ReplCommand::Empty => {}
    }
    Ok(())
}

fn print_usage() {
    println!("{}", "💬 Duet chat".bright_cyan().bold());
    println!();
    println!("{}", "Commands:".bright_white().bold());
    println!("  {}                  List contacts", "/list".cyan());
    println!("  {} <term>         Filter contacts by name", "/search".cyan());
    println!("  {} <id>             Open a conversation", "/open".cyan());
    println!("  {}                 Close the open conversation", "/close".cyan());
    println!("  {} <id> <message>   Send to a contact", "/send".cyan());
    println!("  {}               Send to the open conversation", "<text>".cyan());
    println!("  {} <id> | {} <id>  Simulate presence", "/online".cyan(), "/offline".cyan());
    println!("  {} [path]           Save contacts", "/save".cyan());
    println!("  {}                  Exit", "/quit".cyan());
    println!();
}

fn print_contacts(snapshot: &ViewSnapshot) {
    for contact in &snapshot.contacts {
        let unread = if contact.unread_count > 0 {
            format!(" ({})", contact.unread_count).bright_green().bold().to_string()
        } else {
            String::new()
        };
        println!(
            "  {} {}{}  {}",
            contact.id.to_string().cyan(),
            contact.name.bright_white(),
            unread,
            presence_label(&contact.presence).dimmed()
        );
        if let Some(preview) = &contact.last_preview {
            println!("      {}", preview.dimmed());
        }
    }
}

fn print_thread(snapshot: &ViewSnapshot) {
    let Some(active) = &snapshot.active else {
        return;
    };
    for message in &active.messages {
        let who = if message.is_local {
            "you".bright_blue()
        } else {
            active.counterparty.to_string().bright_magenta()
        };
        println!(
            "  [{}] {}: {} {}",
            clock(&message.timestamp),
            who,
            message.body,
            status_tick(message.status, message.is_local)
        );
    }
}

fn print_event(event: &SessionEvent, snapshot: &ViewSnapshot) {
    match event {
        SessionEvent::MessageAppended { message } if message.is_inbound() => {
            let name = snapshot
                .contact(&message.conversation_id)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| message.conversation_id.to_string());
            println!(
                "  [{}] {}: {}",
                clock(&message.created_at),
                name.bright_magenta(),
                message.body
            );
        }
        SessionEvent::StatusChanged {
            message_id, status, ..
        } => {
            println!("  {} message {} {}", "·".dimmed(), message_id, status.as_str().dimmed());
        }
        SessionEvent::PresenceChanged {
            participant_id,
            presence,
        } => {
            println!(
                "  {} {} {}",
                "·".dimmed(),
                participant_id.to_string().cyan(),
                presence_label(presence).dimmed()
            );
        }
        _ => {}
    }
}

fn presence_label(presence: &PresenceState) -> String {
    if presence.is_online() {
        "online".to_string()
    } else {
        match presence.last_seen_at {
            Some(at) => format!("last seen {}", clock(&at)),
            None => "offline".to_string(),
        }
    }
}

fn status_tick(status: MessageStatus, is_local: bool) -> ColoredString {
    if !is_local {
        return "".normal();
    }
    match status {
        MessageStatus::Sent => "✓".dimmed(),
        MessageStatus::Delivered => "✓✓".normal(),
        MessageStatus::Read => "✓✓".bright_blue(),
    }
}

fn clock(at: &Timestamp) -> String {
    at.with_timezone(&chrono::Local).format("%H:%M").to_string()
}
