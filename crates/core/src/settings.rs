use serde::{Deserialize, Serialize};

use crate::local_store::{KeyValueStore, StoreError};
use crate::protocol::QueryConfig;

pub const SETTINGS_KEY: &str = "app-settings";
pub const HISTORY_KEY: &str = "chatMessages";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub llm: String,
}

impl UserSettings {
    #[must_use]
    pub fn new(database: impl Into<String>, llm: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            llm: llm.into(),
        }
    }

    #[must_use]
    pub fn to_query_config(&self) -> Option<QueryConfig> {
        QueryConfig::from_settings(&self.database, &self.llm)
    }

    pub fn load(store: &impl KeyValueStore) -> Result<Self, StoreError> {
        Ok(store.load(SETTINGS_KEY)?.unwrap_or_default())
    }

    pub fn save(&self, store: &impl KeyValueStore) -> Result<(), StoreError> {
        store.save(SETTINGS_KEY, self)
    }
}

/// Persisted form of one chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sender: String,
    pub text: String,
}

pub fn load_history(store: &impl KeyValueStore) -> Result<Vec<HistoryEntry>, StoreError> {
    Ok(store.load(HISTORY_KEY)?.unwrap_or_default())
}

pub fn save_history(store: &impl KeyValueStore, entries: &[HistoryEntry]) -> Result<(), StoreError> {
    store.save(HISTORY_KEY, &entries)
}

/// Settings editor state: edits go to a draft that is committed on save or
/// dropped on cancel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsDialog {
    committed: UserSettings,
    draft: Option<UserSettings>,
    database_options: Vec<String>,
    llm_options: Vec<String>,
}

impl SettingsDialog {
    #[must_use]
    pub fn new(committed: UserSettings, database_options: Vec<String>, llm_options: Vec<String>) -> Self {
        Self {
            committed,
            draft: None,
            database_options,
            llm_options,
        }
    }

    #[must_use]
    pub fn committed(&self) -> &UserSettings {
        &self.committed
    }

    #[must_use]
    pub fn draft(&self) -> Option<&UserSettings> {
        self.draft.as_ref()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.draft.is_some()
    }

    #[must_use]
    pub fn database_options(&self) -> &[String] {
        &self.database_options
    }

    #[must_use]
    pub fn llm_options(&self) -> &[String] {
        &self.llm_options
    }

    pub fn open(&mut self) {
        self.draft = Some(self.committed.clone());
    }

    pub fn cycle_database(&mut self) {
        if let Some(draft) = self.draft.as_mut() {
            draft.database = next_option(&self.database_options, &draft.database);
        }
    }

    pub fn cycle_llm(&mut self) {
        if let Some(draft) = self.draft.as_mut() {
            draft.llm = next_option(&self.llm_options, &draft.llm);
        }
    }

    /// Commits the draft. Returns the new settings when the dialog was open.
    pub fn save(&mut self) -> Option<&UserSettings> {
        let draft = self.draft.take()?;
        self.committed = draft;
        Some(&self.committed)
    }

    pub fn cancel(&mut self) {
        self.draft = None;
    }
}

/// Option after `current`, wrapping; an empty entry sits before the first
/// option so a setting can be cleared.
fn next_option(options: &[String], current: &str) -> String {
    match options.iter().position(|option| option == current) {
        Some(index) => options.get(index + 1).cloned().unwrap_or_default(),
        None if current.is_empty() => options.first().cloned().unwrap_or_default(),
        None => String::new(),
    }
}
