use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const USERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
const TOKEN_LEN: usize = 32;
const TOKEN_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    pub token: String,
    pub user_id: String,
    pub expires_at: u64,
}

#[derive(Debug)]
pub enum AuthError {
    InvalidUsername,
    InvalidPassword,
    UserExists,
    DbError(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidUsername => write!(f, "username must be letters, digits, '-' or '_'"),
            AuthError::InvalidPassword => write!(f, "password must not be empty"),
            AuthError::UserExists => write!(f, "username already taken"),
            AuthError::DbError(message) => write!(f, "auth db error: {}", message),
        }
    }
}

impl std::error::Error for AuthError {}

fn db_err(err: impl std::fmt::Display) -> AuthError {
    AuthError::DbError(err.to_string())
}

/// Users and bearer sessions. Shares the track index database.
#[derive(Clone)]
pub struct AuthStore {
    db: Arc<Database>,
    session_ttl: Duration,
}

impl AuthStore {
    pub fn new(db: Arc<Database>, session_ttl: Duration) -> Self {
        Self { db, session_ttl }
    }

    pub fn init_tables(&self) -> Result<(), AuthError> {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            write_txn.open_table(USERS_TABLE).map_err(db_err)?;
            write_txn.open_table(SESSIONS_TABLE).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        Ok(())
    }

    pub fn has_any_user(&self) -> Result<bool, AuthError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(USERS_TABLE).map_err(db_err)?;
        Ok(table.len().map_err(db_err)? > 0)
    }

    pub fn create_user(&self, username: &str, password: &str) -> Result<AuthUser, AuthError> {
        let username = username.trim();
        if !is_valid_username(username) {
            return Err(AuthError::InvalidUsername);
        }
        if password.is_empty() {
            return Err(AuthError::InvalidPassword);
        }

        let user = AuthUser {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash: hash_password(password),
            created_at: now_secs(),
        };

        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(USERS_TABLE).map_err(db_err)?;
            for item in table.iter().map_err(db_err)? {
                let (_, value) = item.map_err(db_err)?;
                let existing: AuthUser = bincode::deserialize(value.value()).map_err(db_err)?;
                if existing.username.eq_ignore_ascii_case(username) {
                    return Err(AuthError::UserExists);
                }
            }
            let bytes = bincode::serialize(&user).map_err(db_err)?;
            table
                .insert(user.id.as_str(), bytes.as_slice())
                .map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;
        Ok(user)
    }

    pub fn authenticate(&self, username: &str, password: &str) -> Result<Option<AuthUser>, AuthError> {
        match self.find_user(username)? {
            Some(user) if verify_password(password, &user.password_hash) => Ok(Some(user)),
            _ => Ok(None),
        }
    }

    pub fn create_session(&self, user_id: &str) -> Result<SessionToken, AuthError> {
        let session = SessionToken {
            token: generate_token(),
            user_id: user_id.to_string(),
            expires_at: now_secs() + self.session_ttl.as_secs(),
        };

        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(SESSIONS_TABLE).map_err(db_err)?;
            let bytes = bincode::serialize(&session).map_err(db_err)?;
            table
                .insert(session.token.as_str(), bytes.as_slice())
                .map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;
        Ok(session)
    }

    pub fn revoke_session(&self, token: &str) -> Result<(), AuthError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(SESSIONS_TABLE).map_err(db_err)?;
            table.remove(token).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;
        Ok(())
    }

    /// Resolves a bearer token. Expired tokens resolve to nobody.
    pub fn user_from_token(&self, token: &str) -> Result<Option<AuthUser>, AuthError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let sessions = read_txn.open_table(SESSIONS_TABLE).map_err(db_err)?;
        let session: SessionToken = match sessions.get(token).map_err(db_err)? {
            Some(value) => bincode::deserialize(value.value()).map_err(db_err)?,
            None => return Ok(None),
        };
        if session.expires_at < now_secs() {
            return Ok(None);
        }

        let users = read_txn.open_table(USERS_TABLE).map_err(db_err)?;
        let user = match users.get(session.user_id.as_str()).map_err(db_err)? {
            Some(value) => Some(bincode::deserialize(value.value()).map_err(db_err)?),
            None => None,
        };
        Ok(user)
    }

    /// Case-insensitive username lookup.
    pub fn find_user(&self, username: &str) -> Result<Option<AuthUser>, AuthError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(USERS_TABLE).map_err(db_err)?;
        for item in table.iter().map_err(db_err)? {
            let (_, value) = item.map_err(db_err)?;
            let user: AuthUser = bincode::deserialize(value.value()).map_err(db_err)?;
            if user.username.eq_ignore_ascii_case(username.trim()) {
                return Ok(Some(user));
            }
        }
        Ok(None)
    }
}

/// Usernames double as owner ids in media paths and public URLs.
fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username.len() <= 64
        && username
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password);
    format!("{:x}", hasher.finalize())
}

fn verify_password(password: &str, hash: &str) -> bool {
    hash_password(password) == hash
}

fn generate_token() -> String {
    let mut rng = rand::rng();
    (0..TOKEN_LEN)
        .map(|_| TOKEN_CHARS[rng.random_range(0..TOKEN_CHARS.len())] as char)
        .collect()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_secs())
        .unwrap_or(0)
}
