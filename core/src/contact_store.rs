/// Contact directory file: versioned JSON list of counterparties
use crate::error::{ChatError, Result};
use crate::identity::Participant;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const CONTACTS_FILE_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContactsFileV1 {
    version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    local: Option<Participant>,
    contacts: Vec<Participant>,
}

/// Directory loaded from disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactDirectory {
    /// Only the display name is used; the id is always the reserved local id
    pub local: Option<Participant>,
    pub contacts: Vec<Participant>,
}

/// Load a contacts file
pub fn load_contacts(path: &Path) -> Result<ContactDirectory> {
    let raw = fs::read_to_string(path)?;
    let parsed: ContactsFileV1 = serde_json::from_str(&raw)?;
    if parsed.version != CONTACTS_FILE_VERSION {
        return Err(ChatError::Config(format!(
            "Unsupported contacts file version: {}",
            parsed.version
        )));
    }
    Ok(ContactDirectory {
        local: parsed.local,
        contacts: parsed.contacts,
    })
}

/// Write a contacts file, creating parent directories
pub fn save_contacts(path: &Path, directory: &ContactDirectory) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = ContactsFileV1 {
        version: CONTACTS_FILE_VERSION,
        local: directory.local.clone(),
        contacts: directory.contacts.clone(),
    };
    let json = serde_json::to_string_pretty(&file)?;
    fs::write(path, json)?;
    Ok(())
}
