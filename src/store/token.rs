//! Bearer tokens captured by the auth callback.

use super::{Result, Store};

impl Store {
    /// Stores or replaces the token for a download.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the upsert fails.
    pub async fn set_token(&self, download_id: &str, token: &str) -> Result<()> {
        sqlx::query(
            r"INSERT INTO token (download_id, token) VALUES (?, ?)
              ON CONFLICT (download_id) DO UPDATE SET token = excluded.token",
        )
        .bind(download_id)
        .bind(token)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Returns the token for a download, if one was captured.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    pub async fn token(&self, download_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT token FROM token WHERE download_id = ?")
            .bind(download_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|(token,)| token))
    }
}
