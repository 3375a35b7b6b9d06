//! C3: credential records and the on-disk pool. One JSON file per account
//! under `./auths/`, named after a sanitized e-mail.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::{AppError, AppResult};
use crate::refresher::RefreshTimer;

pub const AUTH_DIR: &str = "auths";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
    #[serde(rename = "expiryMs")]
    pub expiry_ms: i64,
    #[serde(rename = "tokenType", default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "projectId", default)]
    pub project_id: Option<String>,
}

impl CredentialRecord {
    /// I1: loadable iff it has a token pair and at least one of tokenType/scope.
    fn is_loadable(&self) -> bool {
        !self.access_token.is_empty()
            && !self.refresh_token.is_empty()
            && (self.token_type.is_some() || self.scope.is_some())
    }
}

/// In-memory wrapper around a [`CredentialRecord`] plus transient,
/// single-flight state (I3).
pub struct Account {
    pub file_path: PathBuf,
    pub record: RwLock<CredentialRecord>,
    pub refresh_lock: Mutex<()>,
    pub project_id_lock: Mutex<()>,
    pub refresh_timer: Arc<RefreshTimer>,
}

impl Account {
    fn new(file_path: PathBuf, record: CredentialRecord) -> Self {
        Self {
            file_path,
            record: RwLock::new(record),
            refresh_lock: Mutex::new(()),
            project_id_lock: Mutex::new(()),
            refresh_timer: Arc::new(RefreshTimer::new()),
        }
    }
}

#[derive(Default)]
struct RotationCursors {
    claude: usize,
    gemini: usize,
}

pub enum Group {
    Claude,
    Gemini,
}

/// The account pool plus per-group round-robin cursors (I4).
pub struct CredentialStore {
    dir: PathBuf,
    pub(crate) accounts: RwLock<Vec<Arc<Account>>>,
    cursors: Mutex<RotationCursors>,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            accounts: RwLock::new(Vec::new()),
            cursors: Mutex::new(RotationCursors::default()),
        }
    }

    pub fn with_default_dir() -> Self {
        Self::new(AUTH_DIR)
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    /// Load: scan `*.json`, skipping `package*.json`/`tsconfig.json`, discard
    /// unparsable or ineligible files, reset both cursors to 0.
    pub async fn load(&self) -> AppResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut loaded = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(".json") || name.starts_with("package") || name == "tsconfig.json" {
                continue;
            }
            let Ok(text) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            let Ok(record) = serde_json::from_str::<CredentialRecord>(&text) else {
                continue;
            };
            if !record.is_loadable() {
                continue;
            }
            loaded.push(Arc::new(Account::new(path, record)));
        }
        *self.accounts.write().await = loaded;
        let mut cursors = self.cursors.lock().await;
        cursors.claude = 0;
        cursors.gemini = 0;
        Ok(())
    }

    fn sanitize_email(email: &str) -> String {
        email
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '@' || c == '.' { c } else { '_' })
            .collect()
    }

    fn placeholder_name() -> String {
        let now = time::OffsetDateTime::now_utc();
        format!(
            "account-{:04}{:02}{:02}{:02}{:02}{:02}.json",
            now.year(),
            u8::from(now.month()),
            now.day(),
            now.hour(),
            now.minute(),
            now.second()
        )
    }

    fn file_name_for(record: &CredentialRecord) -> String {
        match &record.email {
            Some(email) if !email.is_empty() => format!("{}.json", Self::sanitize_email(email)),
            _ => Self::placeholder_name(),
        }
    }

    /// Persist: write-through to the file named after the account's e-mail
    /// (or its existing placeholder name).
    pub async fn persist(&self, index: usize) -> AppResult<()> {
        let accounts = self.accounts.read().await;
        let account = accounts.get(index).ok_or(AppError::PoolEmpty)?;
        let record = account.record.read().await;
        let text = serde_json::to_string_pretty(&*record)?;
        tokio::fs::write(&account.file_path, text).await?;
        Ok(())
    }

    fn sanitize_delete_name(name: &str) -> AppResult<&str> {
        if name.contains('/') || name.contains('\\') || name.contains("..") || !name.ends_with(".json")
        {
            return Err(AppError::Internal(format!("unsafe credential filename: {name}")));
        }
        Ok(name)
    }

    /// Delete by filename, adjusting both rotation cursors per §4.3's rule.
    pub async fn delete(&self, file_name: &str) -> AppResult<()> {
        let file_name = Self::sanitize_delete_name(file_name)?;
        let mut accounts = self.accounts.write().await;
        let Some(index) = accounts.iter().position(|account| {
            account.file_path.file_name().and_then(|n| n.to_str()) == Some(file_name)
        }) else {
            return Ok(());
        };
        let removed = accounts.remove(index);
        removed.refresh_timer.cancel().await;
        let _ = tokio::fs::remove_file(&removed.file_path).await;
        let new_len = accounts.len();
        drop(accounts);

        let mut cursors = self.cursors.lock().await;
        Self::adjust_cursor_on_delete(&mut cursors.claude, index, new_len);
        Self::adjust_cursor_on_delete(&mut cursors.gemini, index, new_len);
        Ok(())
    }

    fn adjust_cursor_on_delete(cursor: &mut usize, deleted_index: usize, new_len: usize) {
        if deleted_index < *cursor {
            *cursor = cursor.saturating_sub(1);
        } else if deleted_index == *cursor {
            *cursor = 0;
        }
        let bound = new_len.max(1);
        if *cursor >= bound {
            *cursor = 0;
        }
    }

    /// Add: reuse the slot with a matching e-mail, else append; rename the
    /// file on e-mail mismatch; reset both cursors to 0 only if the pool was
    /// empty before.
    pub async fn add(&self, record: CredentialRecord) -> AppResult<usize> {
        let mut accounts = self.accounts.write().await;
        let was_empty = accounts.is_empty();

        if let Some(email) = &record.email {
            if let Some(index) = index_by_email(&accounts, email).await {
                let account = &accounts[index];
                *account.record.write().await = record;
                drop(accounts);
                self.persist(index).await?;
                return Ok(index);
            }
        }

        let file_name = Self::file_name_for(&record);
        let path = self.dir.join(file_name);
        accounts.push(Arc::new(Account::new(path, record)));
        let index = accounts.len() - 1;
        drop(accounts);

        if was_empty {
            let mut cursors = self.cursors.lock().await;
            cursors.claude = 0;
            cursors.gemini = 0;
        }
        self.persist(index).await?;
        Ok(index)
    }

    pub async fn current_index(&self, group: &Group) -> Option<usize> {
        let len = self.len().await;
        if len == 0 {
            return None;
        }
        let cursors = self.cursors.lock().await;
        let idx = match group {
            Group::Claude => cursors.claude,
            Group::Gemini => cursors.gemini,
        };
        Some(idx.min(len.saturating_sub(1)))
    }

    /// Rotate(group): advance modulo pool size; no-op for pools of size ≤ 1.
    pub async fn rotate(&self, group: &Group) {
        let len = self.len().await;
        if len <= 1 {
            return;
        }
        let mut cursors = self.cursors.lock().await;
        let cursor = match group {
            Group::Claude => &mut cursors.claude,
            Group::Gemini => &mut cursors.gemini,
        };
        *cursor = (*cursor + 1) % len;
    }

    pub async fn with_account<R>(
        &self,
        index: usize,
        f: impl FnOnce(&Account) -> R,
    ) -> AppResult<R> {
        let accounts = self.accounts.read().await;
        let account = accounts.get(index).ok_or(AppError::PoolEmpty)?;
        Ok(f(account.as_ref()))
    }

    /// A clone of the `Arc` for use across an `.await` point (e.g. to hand
    /// to a spawned refresh timer), bypassing the closure-scoped borrow of
    /// [`Self::with_account`].
    pub async fn account_arc(&self, index: usize) -> AppResult<Arc<Account>> {
        let accounts = self.accounts.read().await;
        accounts.get(index).cloned().ok_or(AppError::PoolEmpty)
    }

    pub async fn index_of_path(&self, file_path: &Path) -> Option<usize> {
        self.accounts
            .read()
            .await
            .iter()
            .position(|account| account.file_path == file_path)
    }
}

async fn index_by_email(accounts: &[Arc<Account>], email: &str) -> Option<usize> {
    for (index, account) in accounts.iter().enumerate() {
        if account.record.read().await.email.as_deref() == Some(email) {
            return Some(index);
        }
    }
    None
}

pub fn account_key(record: &CredentialRecord) -> String {
    record.email.clone().unwrap_or_else(|| "unknown".to_string())
}

pub fn auth_dir_path() -> &'static Path {
    Path::new(AUTH_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(email: &str) -> CredentialRecord {
        CredentialRecord {
            access_token: "at".into(),
            refresh_token: "rt".into(),
            expiry_ms: 0,
            token_type: Some("Bearer".into()),
            scope: None,
            email: Some(email.to_string()),
            project_id: None,
        }
    }

    #[test]
    fn rejects_unloadable_without_token_type_or_scope() {
        let mut r = record("a@b.com");
        r.token_type = None;
        r.scope = None;
        assert!(!r.is_loadable());
    }

    #[test]
    fn sanitizes_email_for_filename() {
        assert_eq!(CredentialStore::sanitize_email("a+b@c.com"), "a_b@c.com");
    }

    #[test]
    fn delete_cursor_adjustment_rules() {
        let mut cursor = 2usize;
        CredentialStore::adjust_cursor_on_delete(&mut cursor, 0, 3);
        assert_eq!(cursor, 1);

        let mut cursor = 1usize;
        CredentialStore::adjust_cursor_on_delete(&mut cursor, 1, 2);
        assert_eq!(cursor, 0);

        let mut cursor = 0usize;
        CredentialStore::adjust_cursor_on_delete(&mut cursor, 5, 0);
        assert_eq!(cursor, 0);
    }

    #[test]
    fn rejects_unsafe_delete_filenames() {
        assert!(CredentialStore::sanitize_delete_name("../x.json").is_err());
        assert!(CredentialStore::sanitize_delete_name("a/b.json").is_err());
        assert!(CredentialStore::sanitize_delete_name("a.txt").is_err());
        assert!(CredentialStore::sanitize_delete_name("good.json").is_ok());
    }
}
