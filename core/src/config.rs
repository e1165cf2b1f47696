/// Configuration management
use crate::contact_store;
use crate::error::{ChatError, Result};
use crate::identity::{Participant, LOCAL_PARTICIPANT_ID};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_REPLY: &str = "Thanks for your message! I'll get back to you soon.";
const AVATAR_BASE: &str = "https://api.dicebear.com/7.x/avataaars/svg";

/// Behaviour of the simulated counterparty used by the demo binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopbackConfig {
    pub enabled: bool,

    /// Delay before the delivered ack, and again before the read ack
    pub ack_delay: Duration,

    /// Delay between the read ack and the reply
    pub reply_delay: Duration,

    /// Reply body; `None` disables replies
    pub reply: Option<String>,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ack_delay: Duration::from_millis(300),
            reply_delay: Duration::from_millis(1000),
            reply: Some(DEFAULT_REPLY.to_string()),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The local participant (id is always the reserved local id)
    pub local: Participant,

    /// Counterparties to register at startup
    pub contacts: Vec<Participant>,

    /// Contacts file the directory was loaded from, if any
    pub contacts_file: Option<PathBuf>,

    /// Bound of the session's command inbox
    pub command_capacity: usize,

    /// Buffer of the session event broadcast
    pub event_capacity: usize,

    pub loopback: LoopbackConfig,

    /// Seed the demo contacts with a short history and presence at startup
    pub demo_history: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local: Participant::local("You"),
            contacts: demo_contacts(),
            contacts_file: None,
            command_capacity: 256,
            event_capacity: 1024,
            loopback: LoopbackConfig::default(),
            demo_history: true,
        }
    }
}

fn demo_contacts() -> Vec<Participant> {
    [
        ("1", "Alex Johnson", "Alex", "1e293b"),
        ("2", "Sarah Miller", "Sarah", "0f172a"),
        ("3", "Michael Chen", "Michael", "1e293b"),
        ("4", "Emma Wilson", "Emma", "0f172a"),
        ("5", "David Brown", "David", "1e293b"),
    ]
    .into_iter()
    .map(|(id, name, seed, bg)| {
        Participant::new(id, name)
            .with_avatar(format!("{}?seed={}&backgroundColor={}", AVATAR_BASE, seed, bg))
    })
    .collect()
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Config::default();
        let mut contacts_file: Option<PathBuf> = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--contacts" => {
                    let path = flag_value(args, i, "--contacts requires a path argument")?;
                    contacts_file = Some(PathBuf::from(path));
                    i += 2;
                }
                "--name" => {
                    let name = flag_value(args, i, "--name requires a display name")?;
                    config.local = Participant::local(name);
                    i += 2;
                }
                "--no-demo" => {
                    config.demo_history = false;
                    i += 1;
                }
                "--no-loopback" => {
                    config.loopback.enabled = false;
                    i += 1;
                }
                "--reply" => {
                    let reply = flag_value(args, i, "--reply requires a text argument")?;
                    config.loopback.reply = if reply.is_empty() {
                        None
                    } else {
                        Some(reply.to_string())
                    };
                    i += 2;
                }
                "--reply-delay-ms" => {
                    let ms = flag_value(args, i, "--reply-delay-ms requires a number")?;
                    config.loopback.reply_delay = parse_millis(ms, "--reply-delay-ms")?;
                    i += 2;
                }
                "--ack-delay-ms" => {
                    let ms = flag_value(args, i, "--ack-delay-ms requires a number")?;
                    config.loopback.ack_delay = parse_millis(ms, "--ack-delay-ms")?;
                    i += 2;
                }
                other => {
                    return Err(ChatError::Config(format!(
                        "Unknown argument: {}\nUsage: {} [--contacts <path>] [--name <display name>] [--no-demo] [--no-loopback] [--reply <text>] [--reply-delay-ms <ms>] [--ack-delay-ms <ms>]",
                        other,
                        args.first().map(String::as_str).unwrap_or("duet")
                    )));
                }
            }
        }

        // Env overrides (nice for scripts)
        if contacts_file.is_none() {
            contacts_file = std::env::var("DUET_CONTACTS").ok().map(PathBuf::from);
        }
        if std::env::var("DUET_NO_LOOPBACK").is_ok() {
            config.loopback.enabled = false;
        }

        if let Some(path) = contacts_file {
            let directory = contact_store::load_contacts(&path)?;
            if let Some(local) = directory.local {
                config.local = Participant::local(local.display_name);
            }
            config.contacts = directory.contacts;
            config.contacts_file = Some(path);
            // The demo history only fits the bundled contacts
            config.demo_history = false;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject directories the registry would refuse at startup
    pub fn validate(&self) -> Result<()> {
        if !self.local.id.is_local() {
            return Err(ChatError::Config(format!(
                "Local participant must use the reserved id '{}'",
                LOCAL_PARTICIPANT_ID
            )));
        }
        if self.command_capacity == 0 || self.event_capacity == 0 {
            return Err(ChatError::Config("Channel capacities must be non-zero".to_string()));
        }

        let mut seen = HashSet::new();
        for contact in &self.contacts {
            if contact.id.as_str().trim().is_empty() {
                return Err(ChatError::Config(format!(
                    "Contact '{}' has an empty id",
                    contact.display_name
                )));
            }
            if contact.id.is_local() {
                return Err(ChatError::Config(format!(
                    "Contact '{}' uses the reserved local id",
                    contact.display_name
                )));
            }
            if !seen.insert(&contact.id) {
                return Err(ChatError::Config(format!("Duplicate contact id: {}", contact.id)));
            }
        }
        Ok(())
    }
}

fn flag_value<'a>(args: &'a [String], i: usize, missing: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| ChatError::Config(missing.to_string()))
}

fn parse_millis(raw: &str, flag: &str) -> Result<Duration> {
    raw.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ChatError::Config(format!("{} must be a valid number of milliseconds", flag)))
}
