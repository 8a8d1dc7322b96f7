//! Per-identity secret vault.
//!
//! Entry metadata is stored in clear so listings never decrypt anything.
//! The category fields are serialised to JSON and sealed with the same
//! [`SecretCipher`] that protects embeddings.

use facevault_engine::{EngineError, IdentityId, SecretCipher};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::storage::{read_postcard, write_postcard};

const VAULT_FILE: &str = "vault.bin";

pub const CATEGORIES: [&str; 5] = ["credit_card", "email", "id", "login", "medical"];

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("category must be one of: {}", CATEGORIES.join(", "))]
    UnknownCategory(String),
    #[error("invalid {category} fields: {reason}")]
    InvalidFields { category: String, reason: String },
    #[error("a valid email address is required")]
    InvalidEmail,
    #[error("entry name must not be empty")]
    EmptyName,
    #[error("no vault entry {0}")]
    NotFound(Uuid),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("vault storage: {0:#}")]
    Storage(anyhow::Error),
}

pub type Result<T, E = VaultError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginFields {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailFields {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditCardFields {
    pub cardholder_name: String,
    pub number: String,
    pub expiry_month: String,
    pub expiry_year: String,
    pub cvv: String,
    #[serde(default)]
    pub network: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdFields {
    pub document_type: String,
    pub id_number: String,
    pub country: String,
    #[serde(default)]
    pub expiration_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalFields {
    pub provider: String,
    pub member_id: String,
    #[serde(default)]
    pub plan_name: Option<String>,
    #[serde(default)]
    pub group_number: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Typed secret payload, one variant per category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", content = "fields", rename_all = "snake_case")]
pub enum SecretFields {
    Login(LoginFields),
    Email(EmailFields),
    CreditCard(CreditCardFields),
    Id(IdFields),
    Medical(MedicalFields),
}

impl SecretFields {
    /// Validates raw fields against the schema of `category`.
    pub fn parse(category: &str, fields: Value) -> Result<Self> {
        let category = normalize_category(category)?;
        let tagged = serde_json::json!({ "category": category, "fields": fields });
        let parsed: SecretFields =
            serde_json::from_value(tagged).map_err(|e| VaultError::InvalidFields {
                category: category.to_string(),
                reason: e.to_string(),
            })?;
        if let SecretFields::Email(f) = &parsed {
            let domain = f.email.rsplit('@').next().unwrap_or_default();
            if !f.email.contains('@') || !domain.contains('.') {
                return Err(VaultError::InvalidEmail);
            }
        }
        Ok(parsed)
    }

    pub fn category(&self) -> &'static str {
        match self {
            SecretFields::Login(_) => "login",
            SecretFields::Email(_) => "email",
            SecretFields::CreditCard(_) => "credit_card",
            SecretFields::Id(_) => "id",
            SecretFields::Medical(_) => "medical",
        }
    }

    /// Short, non-secret label shown in listings.
    pub fn identifier(&self) -> String {
        let id = match self {
            SecretFields::Login(f) => f.username.clone(),
            SecretFields::Email(f) => f.email.clone(),
            SecretFields::CreditCard(f) => {
                let digits: Vec<char> = f.number.chars().filter(char::is_ascii_digit).collect();
                let last4: String = digits[digits.len().saturating_sub(4)..].iter().collect();
                if last4.is_empty() {
                    "Card".to_string()
                } else {
                    format!("•••• {last4}")
                }
            }
            SecretFields::Id(f) => format!("{} {}", f.document_type.to_uppercase(), f.id_number),
            SecretFields::Medical(f) if !f.member_id.is_empty() => f.member_id.clone(),
            SecretFields::Medical(f) => f.provider.clone(),
        };
        match id.trim() {
            "" => self.category().to_uppercase(),
            trimmed => trimmed.to_string(),
        }
    }

    /// The bare field object, without the category tag.
    pub fn fields(&self) -> Value {
        let value = match self {
            SecretFields::Login(f) => serde_json::to_value(f),
            SecretFields::Email(f) => serde_json::to_value(f),
            SecretFields::CreditCard(f) => serde_json::to_value(f),
            SecretFields::Id(f) => serde_json::to_value(f),
            SecretFields::Medical(f) => serde_json::to_value(f),
        };
        value.unwrap_or(Value::Null)
    }
}

pub fn normalize_category(category: &str) -> Result<&'static str> {
    let normalized = category.trim().to_lowercase();
    CATEGORIES
        .iter()
        .copied()
        .find(|c| *c == normalized)
        .ok_or(VaultError::UnknownCategory(normalized))
}

/// Stored entry. Only `secret` is encrypted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub id: Uuid,
    pub owner: IdentityId,
    pub name: String,
    pub category: String,
    pub identifier: String,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
    secret: String,
}

/// Decrypted payload of an entry.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenedSecret {
    Typed(SecretFields),
    /// Decrypted to something other than a valid field set for the
    /// entry's category.
    Untyped(Map<String, Value>),
}

impl OpenedSecret {
    pub fn to_json(&self) -> Value {
        match self {
            OpenedSecret::Typed(fields) => fields.fields(),
            OpenedSecret::Untyped(map) => Value::Object(map.clone()),
        }
    }
}

fn open_payload(category: &str, plaintext: Vec<u8>) -> OpenedSecret {
    let raw = String::from_utf8_lossy(&plaintext).into_owned();
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => match SecretFields::parse(category, Value::Object(map.clone())) {
            Ok(fields) => OpenedSecret::Typed(fields),
            Err(_) => OpenedSecret::Untyped(map),
        },
        _ => {
            let mut map = Map::new();
            map.insert("secret".to_string(), Value::String(raw));
            OpenedSecret::Untyped(map)
        }
    }
}

/// File-backed vault shared by every identity under one data directory.
pub struct Vault {
    file: PathBuf,
    cipher: SecretCipher,
    lock: Mutex<()>,
}

impl Vault {
    pub fn open(data_dir: &Path, cipher: SecretCipher) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            file: data_dir.join(VAULT_FILE),
            cipher,
            lock: Mutex::new(()),
        })
    }

    pub fn put(&self, owner: IdentityId, name: &str, fields: &SecretFields) -> Result<VaultEntry> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VaultError::EmptyName);
        }
        let plaintext = serde_json::to_vec(&fields.fields()).map_err(|e| {
            VaultError::InvalidFields {
                category: fields.category().to_string(),
                reason: e.to_string(),
            }
        })?;
        let entry = VaultEntry {
            id: Uuid::new_v4(),
            owner,
            name: name.to_string(),
            category: fields.category().to_string(),
            identifier: fields.identifier(),
            created_at: now_secs(),
            secret: self.cipher.encrypt(&plaintext)?,
        };

        let _guard = self.guard();
        let mut entries = self.load()?;
        entries.push(entry.clone());
        self.save(&entries)?;
        debug!("vault entry {} stored for identity {owner}", entry.id);
        Ok(entry)
    }

    /// Entries owned by `owner`, newest first. Nothing is decrypted.
    pub fn list(&self, owner: IdentityId) -> Result<Vec<VaultEntry>> {
        let _guard = self.guard();
        // File order is insertion order; reversing it first keeps entries
        // created within the same second newest first after the stable sort.
        let mut entries: Vec<VaultEntry> = self
            .load()?
            .into_iter()
            .rev()
            .filter(|e| e.owner == owner)
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    pub fn get(&self, owner: IdentityId, id: Uuid) -> Result<(VaultEntry, OpenedSecret)> {
        let entry = self
            .list(owner)?
            .into_iter()
            .find(|e| e.id == id)
            .ok_or(VaultError::NotFound(id))?;
        let plaintext = self.cipher.decrypt(&entry.secret).map_err(|err| {
            warn!("vault entry {id} failed to decrypt");
            err
        })?;
        let opened = open_payload(&entry.category, plaintext);
        Ok((entry, opened))
    }

    pub fn delete(&self, owner: IdentityId, id: Uuid) -> Result<()> {
        let _guard = self.guard();
        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|e| !(e.owner == owner && e.id == id));
        if entries.len() == before {
            return Err(VaultError::NotFound(id));
        }
        self.save(&entries)
    }

    /// Drops every entry of `owner`. Returns how many were removed.
    pub fn purge_owner(&self, owner: IdentityId) -> Result<usize> {
        let _guard = self.guard();
        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|e| e.owner != owner);
        let removed = before - entries.len();
        if removed > 0 {
            self.save(&entries)?;
        }
        Ok(removed)
    }

    fn load(&self) -> Result<Vec<VaultEntry>> {
        Ok(read_postcard(&self.file)
            .map_err(VaultError::Storage)?
            .unwrap_or_default())
    }

    fn save(&self, entries: &[VaultEntry]) -> Result<()> {
        write_postcard(&self.file, &entries).map_err(VaultError::Storage)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
