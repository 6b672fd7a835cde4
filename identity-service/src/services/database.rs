//! PostgreSQL implementation of the persistence contracts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, Postgres};
use sqlx::{FromRow, Transaction};

use crate::models::{
    AccessGroup, AuthenticationTokens, AuthorizationRule, ConfigurationRecord, Contact,
    ContactGroup, ContactTemplate, LocalAccount, LockoutState, NewContact, NewProviderToken,
    PasswordRecord, ProviderToken, RefreshedTokens, SecurityPolicy,
};
use crate::services::repositories::{
    AclStore, AclTransaction, ConfigurationReader, ContactRepository, HealthCheck,
    LoginAttemptRepository, TokenRepository,
};
use crate::services::ServiceError;

const CONFIGURATION_COLUMNS: &str =
    "id, name, type, custom_configuration::text AS custom_configuration, is_active, is_forced";

const CONTACT_COLUMNS: &str = "contact_id, alias, name, email, is_admin, template_id";

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_provider_token(
        tx: &mut Transaction<'static, Postgres>,
        token: &NewProviderToken,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO security_token (token, created_utc, expiry_utc)
            VALUES ($1, $2, $3)
            RETURNING token_id
            "#,
        )
        .bind(token.token())
        .bind(token.created_utc())
        .bind(token.expiry_utc())
        .fetch_one(&mut **tx)
        .await
    }
}

#[async_trait]
impl HealthCheck for Database {
    async fn health_check(&self) -> Result<(), ServiceError> {
        crate::db::health_check(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            ServiceError::Database(e)
        })?;
        Ok(())
    }
}

// ==================== Provider Configurations ====================

#[derive(FromRow)]
struct AuthorizationRuleRow {
    claim_value: String,
    access_group_id: i64,
    name: String,
}

#[async_trait]
impl ConfigurationReader for Database {
    async fn find_configuration_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ConfigurationRecord>, ServiceError> {
        let query = format!(
            "SELECT {} FROM provider_configuration WHERE name = $1",
            CONFIGURATION_COLUMNS
        );
        Ok(sqlx::query_as::<_, ConfigurationRecord>(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_configuration_by_id(
        &self,
        id: i64,
    ) -> Result<Option<ConfigurationRecord>, ServiceError> {
        let query = format!(
            "SELECT {} FROM provider_configuration WHERE id = $1",
            CONFIGURATION_COLUMNS
        );
        Ok(sqlx::query_as::<_, ConfigurationRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_configurations(&self) -> Result<Vec<ConfigurationRecord>, ServiceError> {
        let query = format!(
            "SELECT {} FROM provider_configuration ORDER BY id",
            CONFIGURATION_COLUMNS
        );
        Ok(sqlx::query_as::<_, ConfigurationRecord>(&query)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn find_excluded_user_aliases(
        &self,
        configuration_id: i64,
    ) -> Result<Vec<String>, ServiceError> {
        Ok(sqlx::query_scalar::<_, String>(
            r#"
            SELECT c.alias
            FROM password_expiration_excluded_users e
            INNER JOIN contact c ON c.contact_id = e.contact_id
            WHERE e.provider_configuration_id = $1
            ORDER BY c.alias
            "#,
        )
        .bind(configuration_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn find_contact_template(
        &self,
        contact_template_id: i64,
    ) -> Result<Option<ContactTemplate>, ServiceError> {
        Ok(sqlx::query_as::<_, ContactTemplate>(
            "SELECT contact_id AS contact_template_id, name FROM contact WHERE contact_id = $1",
        )
        .bind(contact_template_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_contact_group(
        &self,
        contact_group_id: i64,
    ) -> Result<Option<ContactGroup>, ServiceError> {
        Ok(sqlx::query_as::<_, ContactGroup>(
            "SELECT contact_group_id, name FROM contactgroup WHERE contact_group_id = $1",
        )
        .bind(contact_group_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_authorization_rules(
        &self,
        configuration_id: i64,
    ) -> Result<Vec<AuthorizationRule>, ServiceError> {
        let rows = sqlx::query_as::<_, AuthorizationRuleRow>(
            r#"
            SELECT r.claim_value, g.access_group_id, g.name
            FROM security_provider_access_group_relation r
            INNER JOIN acl_group g ON g.access_group_id = r.access_group_id
            WHERE r.provider_configuration_id = $1
            ORDER BY r.claim_value, g.access_group_id
            "#,
        )
        .bind(configuration_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| AuthorizationRule {
                claim_value: row.claim_value,
                access_group: AccessGroup {
                    access_group_id: row.access_group_id,
                    name: row.name,
                },
            })
            .collect())
    }
}

// ==================== Authentication Tokens ====================

#[derive(FromRow)]
struct AuthenticationTokensRow {
    token: String,
    provider_configuration_id: i64,
    contact_id: i64,
    provider_token_id: i64,
    provider_token: String,
    provider_token_created_utc: DateTime<Utc>,
    provider_token_expiry_utc: DateTime<Utc>,
    refresh_token_id: Option<i64>,
    refresh_token: Option<String>,
    refresh_token_created_utc: Option<DateTime<Utc>>,
    refresh_token_expiry_utc: Option<DateTime<Utc>>,
}

impl From<AuthenticationTokensRow> for AuthenticationTokens {
    fn from(row: AuthenticationTokensRow) -> Self {
        let provider_refresh_token = match (
            row.refresh_token_id,
            row.refresh_token,
            row.refresh_token_created_utc,
            row.refresh_token_expiry_utc,
        ) {
            (Some(token_id), Some(token), Some(created_utc), Some(expiry_utc)) => {
                Some(ProviderToken {
                    token_id,
                    token,
                    created_utc,
                    expiry_utc,
                })
            }
            _ => None,
        };

        AuthenticationTokens {
            session_token: row.token,
            provider_configuration_id: row.provider_configuration_id,
            contact_id: row.contact_id,
            provider_token: ProviderToken {
                token_id: row.provider_token_id,
                token: row.provider_token,
                created_utc: row.provider_token_created_utc,
                expiry_utc: row.provider_token_expiry_utc,
            },
            provider_refresh_token,
        }
    }
}

#[async_trait]
impl TokenRepository for Database {
    async fn create_authentication_tokens(
        &self,
        token: &str,
        provider_configuration_id: i64,
        contact_id: i64,
        provider_token: &NewProviderToken,
        provider_refresh_token: Option<&NewProviderToken>,
    ) -> Result<(), ServiceError> {
        let mut tx = self.pool.begin().await?;

        let provider_token_id = Self::insert_provider_token(&mut tx, provider_token).await?;
        let refresh_token_id = match provider_refresh_token {
            Some(refresh) => Some(Self::insert_provider_token(&mut tx, refresh).await?),
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO security_authentication_tokens
                (token, provider_token_id, provider_token_refresh_id, provider_configuration_id, contact_id)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(token)
        .bind(provider_token_id)
        .bind(refresh_token_id)
        .bind(provider_configuration_id)
        .bind(contact_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// A token is expired once `expiry_utc <= NOW()`; `NOW()` is fixed for
    /// the whole transaction.
    async fn delete_expired_tokens(&self) -> Result<u64, ServiceError> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            r#"
            DELETE FROM security_authentication_tokens sat
            USING security_token pt
            WHERE pt.token_id = sat.provider_token_id
              AND pt.expiry_utc <= NOW()
              AND NOT EXISTS (
                  SELECT 1 FROM security_token rt
                  WHERE rt.token_id = sat.provider_token_refresh_id
                    AND rt.expiry_utc > NOW()
              )
            "#,
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            r#"
            DELETE FROM security_token st
            WHERE st.expiry_utc <= NOW()
              AND NOT EXISTS (
                  SELECT 1 FROM security_authentication_tokens sat
                  WHERE sat.provider_token_id = st.token_id
                     OR sat.provider_token_refresh_id = st.token_id
              )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(deleted)
    }

    async fn find_authentication_tokens(
        &self,
        token: &str,
    ) -> Result<Option<AuthenticationTokens>, ServiceError> {
        let row = sqlx::query_as::<_, AuthenticationTokensRow>(
            r#"
            SELECT sat.token, sat.provider_configuration_id, sat.contact_id,
                   pt.token_id AS provider_token_id,
                   pt.token AS provider_token,
                   pt.created_utc AS provider_token_created_utc,
                   pt.expiry_utc AS provider_token_expiry_utc,
                   rt.token_id AS refresh_token_id,
                   rt.token AS refresh_token,
                   rt.created_utc AS refresh_token_created_utc,
                   rt.expiry_utc AS refresh_token_expiry_utc
            FROM security_authentication_tokens sat
            INNER JOIN security_token pt ON pt.token_id = sat.provider_token_id
            LEFT JOIN security_token rt ON rt.token_id = sat.provider_token_refresh_id
            WHERE sat.token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(AuthenticationTokens::from))
    }

    async fn update_provider_tokens(
        &self,
        token: &str,
        refreshed: &RefreshedTokens,
    ) -> Result<(), ServiceError> {
        let mut tx = self.pool.begin().await?;

        let provider_token_id =
            Self::insert_provider_token(&mut tx, &refreshed.provider_token).await?;
        let refresh_token_id = match &refreshed.provider_refresh_token {
            Some(refresh) => Some(Self::insert_provider_token(&mut tx, refresh).await?),
            None => None,
        };

        let updated = sqlx::query(
            r#"
            UPDATE security_authentication_tokens
            SET provider_token_id = $2,
                provider_token_refresh_id = COALESCE($3, provider_token_refresh_id)
            WHERE token = $1
            "#,
        )
        .bind(token)
        .bind(provider_token_id)
        .bind(refresh_token_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Err(ServiceError::InvalidToken);
        }

        tx.commit().await?;
        Ok(())
    }
}

// ==================== Contacts ====================

#[async_trait]
impl ContactRepository for Database {
    async fn find_local_account(&self, alias: &str) -> Result<Option<LocalAccount>, ServiceError> {
        let Some(contact) = self.find_contact_by_alias(alias).await? else {
            return Ok(None);
        };

        let password = sqlx::query_as::<_, PasswordRecord>(
            r#"
            SELECT contact_id, password_hash, created_utc
            FROM contact_password
            WHERE contact_id = $1
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(contact.contact_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(Some(LocalAccount { contact, password }))
    }

    async fn find_contact_by_alias(&self, alias: &str) -> Result<Option<Contact>, ServiceError> {
        let query = format!("SELECT {} FROM contact WHERE alias = $1", CONTACT_COLUMNS);
        Ok(sqlx::query_as::<_, Contact>(&query)
            .bind(alias)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_contact_by_id(&self, contact_id: i64) -> Result<Option<Contact>, ServiceError> {
        let query = format!(
            "SELECT {} FROM contact WHERE contact_id = $1",
            CONTACT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Contact>(&query)
            .bind(contact_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_contact(&self, contact: &NewContact) -> Result<Contact, ServiceError> {
        let query = format!(
            r#"
            INSERT INTO contact (alias, name, email, is_admin, template_id)
            VALUES ($1, $2, $3, FALSE, $4)
            RETURNING {}
            "#,
            CONTACT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Contact>(&query)
            .bind(&contact.alias)
            .bind(&contact.name)
            .bind(&contact.email)
            .bind(contact.template_id)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn update_contact(&self, contact: &Contact) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            UPDATE contact
            SET name = $2, email = $3, template_id = $4
            WHERE contact_id = $1
            "#,
        )
        .bind(contact.contact_id)
        .bind(&contact.name)
        .bind(&contact.email)
        .bind(contact.template_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_password_history(
        &self,
        contact_id: i64,
        limit: usize,
    ) -> Result<Vec<PasswordRecord>, ServiceError> {
        Ok(sqlx::query_as::<_, PasswordRecord>(
            r#"
            SELECT contact_id, password_hash, created_utc
            FROM contact_password
            WHERE contact_id = $1
            ORDER BY created_utc DESC
            LIMIT $2
            "#,
        )
        .bind(contact_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn add_password(
        &self,
        contact_id: i64,
        password_hash: &str,
        created_utc: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            "INSERT INTO contact_password (contact_id, password_hash, created_utc) VALUES ($1, $2, $3)",
        )
        .bind(contact_id)
        .bind(password_hash)
        .bind(created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ==================== Login Attempts ====================

#[async_trait]
impl LoginAttemptRepository for Database {
    async fn find_lockout_state(&self, contact_id: i64) -> Result<LockoutState, ServiceError> {
        let state = sqlx::query_as::<_, LockoutState>(
            r#"
            SELECT failed_attempts, first_failure_utc, blocked_until_utc
            FROM contact_login_attempt
            WHERE contact_id = $1
            "#,
        )
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(state.unwrap_or_default())
    }

    async fn record_failed_attempt(
        &self,
        contact_id: i64,
        policy: &SecurityPolicy,
        now: DateTime<Utc>,
    ) -> Result<LockoutState, ServiceError> {
        if !policy.is_lockout_enabled() {
            return Ok(LockoutState::default());
        }
        let attempts = policy.attempts.unwrap_or_default() as i32;
        let window_seconds = policy
            .blocking_duration
            .map_or(0.0, |window| window.num_milliseconds() as f64 / 1000.0);

        // Single upsert: the row lock taken by ON CONFLICT serializes
        // concurrent failures for one contact.
        let state = sqlx::query_as::<_, LockoutState>(
            r#"
            INSERT INTO contact_login_attempt AS cla
                (contact_id, failed_attempts, first_failure_utc, blocked_until_utc)
            VALUES ($1, 1, $2, CASE WHEN $3 <= 1 THEN $2 + make_interval(secs => $4) END)
            ON CONFLICT (contact_id) DO UPDATE
            SET failed_attempts = CASE
                    WHEN cla.first_failure_utc > $2 - make_interval(secs => $4)
                    THEN cla.failed_attempts + 1
                    ELSE 1
                END,
                first_failure_utc = CASE
                    WHEN cla.first_failure_utc > $2 - make_interval(secs => $4)
                    THEN cla.first_failure_utc
                    ELSE $2
                END,
                blocked_until_utc = CASE
                    WHEN (CASE
                            WHEN cla.first_failure_utc > $2 - make_interval(secs => $4)
                            THEN cla.failed_attempts + 1
                            ELSE 1
                          END) >= $3
                    THEN $2 + make_interval(secs => $4)
                END
            RETURNING failed_attempts, first_failure_utc, blocked_until_utc
            "#,
        )
        .bind(contact_id)
        .bind(now)
        .bind(attempts)
        .bind(window_seconds)
        .fetch_one(&self.pool)
        .await?;
        Ok(state)
    }

    async fn clear_lockout_state(&self, contact_id: i64) -> Result<(), ServiceError> {
        sqlx::query("DELETE FROM contact_login_attempt WHERE contact_id = $1")
            .bind(contact_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ==================== ACL ====================

/// ACL unit of work on a PostgreSQL transaction; rolled back when dropped.
pub struct PgAclTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AclStore for Database {
    async fn begin(&self) -> Result<Box<dyn AclTransaction>, ServiceError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgAclTransaction { tx }))
    }
}

#[async_trait]
impl AclTransaction for PgAclTransaction {
    async fn delete_access_groups_for_user(
        &mut self,
        contact_id: i64,
    ) -> Result<(), ServiceError> {
        sqlx::query("DELETE FROM acl_group_contact_relation WHERE contact_id = $1")
            .bind(contact_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_access_groups_for_user(
        &mut self,
        contact_id: i64,
        access_groups: &[AccessGroup],
    ) -> Result<(), ServiceError> {
        for group in access_groups {
            sqlx::query(
                r#"
                INSERT INTO acl_group_contact_relation (access_group_id, contact_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(group.access_group_id)
            .bind(contact_id)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn delete_contact_groups_for_user(
        &mut self,
        contact_id: i64,
    ) -> Result<(), ServiceError> {
        sqlx::query("DELETE FROM contactgroup_contact_relation WHERE contact_id = $1")
            .bind(contact_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_contact_group_for_user(
        &mut self,
        contact_id: i64,
        contact_group: &ContactGroup,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            "INSERT INTO contactgroup_contact_relation (contact_group_id, contact_id) VALUES ($1, $2)",
        )
        .bind(contact_group.contact_group_id)
        .bind(contact_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), ServiceError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    async fn database() -> Database {
        let config = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/identity_test".to_string()),
            max_connections: 2,
            min_connections: 1,
        };
        let pool = crate::db::create_pool(&config).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        Database::new(pool)
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn purge_keeps_live_tokens() {
        let db = database().await;
        let contact = db
            .create_contact(&NewContact {
                alias: format!("purge-{}", uuid::Uuid::new_v4()),
                name: "Purge".to_string(),
                email: None,
                template_id: None,
            })
            .await
            .unwrap();
        let configuration_id: i64 = sqlx::query_scalar(
            "INSERT INTO provider_configuration (type, name) VALUES ('local', $1) RETURNING id",
        )
        .bind(format!("local-{}", uuid::Uuid::new_v4()))
        .fetch_one(db.pool())
        .await
        .unwrap();

        let now = Utc::now();
        let live = NewProviderToken::new("live".into(), now, now + chrono::Duration::hours(1))
            .unwrap();
        let dead = NewProviderToken::new(
            "dead".into(),
            now - chrono::Duration::hours(2),
            now - chrono::Duration::hours(1),
        )
        .unwrap();
        let live_token = uuid::Uuid::new_v4().to_string();
        let dead_token = uuid::Uuid::new_v4().to_string();
        db.create_authentication_tokens(&live_token, configuration_id, contact.contact_id, &live, None)
            .await
            .unwrap();
        db.create_authentication_tokens(&dead_token, configuration_id, contact.contact_id, &dead, None)
            .await
            .unwrap();

        assert!(db.delete_expired_tokens().await.unwrap() >= 1);
        assert!(db.find_authentication_tokens(&live_token).await.unwrap().is_some());
        assert!(db.find_authentication_tokens(&dead_token).await.unwrap().is_none());
    }
}
