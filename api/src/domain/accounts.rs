//! Account domain - DB queries for network sets and their connections
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for transactions).

use sqlx::{Executor, Postgres};

use crate::models::Network;

/// A set of linked network connections owned by one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSet {
    pub id: String,
    /// Networks with a live connection
    pub networks: Vec<Network>,
}

/// Find the account's network set: the requested one, or the default set
pub async fn find_network_set_id<'e, E>(
    executor: E,
    account_id: &str,
    target_set_id: Option<&str>,
) -> Result<Option<String>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar(
        r#"
        SELECT id FROM network_sets
        WHERE account_id = $1
          AND (($2::text IS NULL AND is_default) OR id = $2)
        ORDER BY created_at ASC
        LIMIT 1
        "#,
    )
    .bind(account_id)
    .bind(target_set_id)
    .fetch_optional(executor)
    .await
}

/// Network names with an active (not revoked) connection in a set
pub async fn list_connected_networks<'e, E>(
    executor: E,
    network_set_id: &str,
) -> Result<Vec<String>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar(
        r#"
        SELECT network FROM network_connections
        WHERE network_set_id = $1 AND revoked_at IS NULL
        ORDER BY network ASC
        "#,
    )
    .bind(network_set_id)
    .fetch_all(executor)
    .await
}
