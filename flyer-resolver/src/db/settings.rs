//! Settings database operations
//!
//! Key-value accessors for the `settings` table. Collaborator credentials
//! stored here take priority over environment and TOML values.

use flyer_common::{Error, Result};
use sqlx::{Pool, Sqlite};

pub const GOOGLE_API_KEY: &str = "google_api_key";
pub const GOOGLE_SEARCH_ENGINE_ID: &str = "google_search_engine_id";
pub const GEMINI_API_KEY: &str = "gemini_api_key";

/// Every key a client may read or write through the settings API
pub const CREDENTIAL_KEYS: [&str; 3] = [GOOGLE_API_KEY, GOOGLE_SEARCH_ENGINE_ID, GEMINI_API_KEY];

/// Get a credential, `None` if unset
pub async fn get_credential(db: &Pool<Sqlite>, key: &str) -> Result<Option<String>> {
    get_setting::<String>(db, key).await
}

pub async fn set_credential(db: &Pool<Sqlite>, key: &str, value: String) -> Result<()> {
    if !CREDENTIAL_KEYS.contains(&key) {
        return Err(Error::InvalidInput(format!("Unknown setting: {}", key)));
    }
    set_setting(db, key, value).await
}

async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting {} failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}
