//! PostgreSQL prompt template store
//!
//! Templates are data, keyed by `(name, entry_type)` with a monotone
//! `version`. The active template for an entry type is the active row with
//! the highest version.

use sqlx::{postgres::PgRow, PgPool, Row};

use vv_domain::PromptTemplate;
use vv_ports::{TemplateStore, TemplateStoreError};

pub struct PostgresTemplateStore {
    pool: PgPool,
    schema: String,
}

impl PostgresTemplateStore {
    pub fn new(pool: PgPool, schema: &str) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
        }
    }
}

fn storage_error(e: sqlx::Error) -> TemplateStoreError {
    TemplateStoreError::Storage {
        message: e.to_string(),
    }
}

fn row_to_template(row: &PgRow) -> PromptTemplate {
    PromptTemplate {
        id: row.get("id"),
        name: row.get("name"),
        entry_type: row.get("entry_type"),
        prompt_text: row.get("prompt_text"),
        description: row.get("description"),
        is_active: row.get("is_active"),
        version: row.get("version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

impl TemplateStore for PostgresTemplateStore {
    async fn active_for_entry_type(
        &self,
        entry_type: &str,
    ) -> Result<Option<PromptTemplate>, TemplateStoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT * FROM {schema}.prompt_templates
            WHERE entry_type = $1 AND is_active = TRUE
            ORDER BY version DESC
            LIMIT 1
            "#,
            schema = self.schema
        ))
        .bind(entry_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.as_ref().map(row_to_template))
    }

    async fn find(
        &self,
        name: &str,
        entry_type: &str,
    ) -> Result<Option<PromptTemplate>, TemplateStoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT * FROM {schema}.prompt_templates
            WHERE name = $1 AND entry_type = $2
            "#,
            schema = self.schema
        ))
        .bind(name)
        .bind(entry_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.as_ref().map(row_to_template))
    }

    async fn get(&self, id: i32) -> Result<Option<PromptTemplate>, TemplateStoreError> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {schema}.prompt_templates WHERE id = $1",
            schema = self.schema
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.as_ref().map(row_to_template))
    }
}
