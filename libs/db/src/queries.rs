//! The transaction-history, key-store, and terminal-key queries this
//! gateway issues.
//!
//! Queries use runtime-bound `sqlx::query`/`query_as` rather than the
//! `sqlx::query!` compile-time macro — the macro requires either a live
//! database or a checked-in `.sqlx` offline cache at build time, neither
//! of which this workspace carries, so the explicit bind-and-fetch form
//! is the portable choice here (see DESIGN.md).

use chrono::{DateTime, FixedOffset};
use sqlx::{MySql, Pool, Row};
use tracing::debug;

use crate::error::DbError;
use crate::models::{NewTransaction, ReversalLookup, TransactionRow};

pub type DbPool = Pool<MySql>;

pub async fn insert_transaction(pool: &DbPool, row: &NewTransaction) -> Result<i64, DbError> {
    let result = sqlx::query(
        "INSERT INTO transaction_history \
         (mti, procode, tid, mid, pan, amount, trx_date, stan, stan_host, rrn, merchant_name, iso_req, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&row.mti)
    .bind(&row.procode)
    .bind(&row.tid)
    .bind(&row.mid)
    .bind(&row.pan)
    .bind(row.amount)
    .bind(row.trx_date)
    .bind(&row.stan)
    .bind(&row.stan_host)
    .bind(&row.rrn)
    .bind(&row.merchant_name)
    .bind(&row.iso_req)
    .bind(row.created_at)
    .execute(pool)
    .await?;

    let trx_id = result.last_insert_id() as i64;
    debug!(trx_id, tid = %row.tid, stan_host = %row.stan_host, "inserted transaction history row");
    Ok(trx_id)
}

pub async fn update_transaction_response(
    pool: &DbPool,
    id: i64,
    response_code: &str,
    iso_res_hex: &str,
    updated_at: DateTime<FixedOffset>,
) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE transaction_history SET response_code = ?, iso_res = ?, updated_at = ? WHERE id = ?",
    )
    .bind(response_code)
    .bind(iso_res_hex)
    .bind(updated_at)
    .bind(id)
    .execute(pool)
    .await?;

    debug!(trx_id = id, response_code, "recorded transaction response");
    Ok(())
}

/// Looks up the most recent `stan_host` for an original `0200` matching
/// `lookup`'s correlation key. Absent rows return `Ok(None)`, not an error.
pub async fn lookup_host_stan_for_reversal(
    pool: &DbPool,
    lookup: &ReversalLookup,
) -> Result<Option<String>, DbError> {
    let row = sqlx::query(
        "SELECT stan_host FROM transaction_history \
         WHERE mti = '0200' AND procode = ? AND amount = ? AND stan = ? AND tid = ? AND mid = ? AND trx_date <=> ? \
         ORDER BY stan_host DESC LIMIT 1",
    )
    .bind(&lookup.procode)
    .bind(lookup.amount)
    .bind(&lookup.stan)
    .bind(&lookup.tid)
    .bind(&lookup.mid)
    .bind(lookup.trx_date)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.get::<String, _>("stan_host")))
}

pub async fn get_zmk(pool: &DbPool) -> Result<String, DbError> {
    get_key_field(pool, "zmk").await
}

pub async fn get_zpk(pool: &DbPool) -> Result<String, DbError> {
    get_key_field(pool, "zpk").await
}

pub async fn get_tmk(pool: &DbPool) -> Result<String, DbError> {
    get_key_field(pool, "tmk").await
}

async fn get_key_field(pool: &DbPool, field: &'static str) -> Result<String, DbError> {
    let query = format!("SELECT {field} FROM `key` LIMIT 1");
    let row = sqlx::query(&query)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::RowMissing("key"))?;
    Ok(row.get::<String, _>(field))
}

/// Updates the global (single-row) Zone PIN Key.
pub async fn update_zpk(pool: &DbPool, zpk_hex: &str) -> Result<(), DbError> {
    sqlx::query("UPDATE `key` SET zpk = ?")
        .bind(zpk_hex)
        .execute(pool)
        .await?;
    Ok(())
}

/// Insert-or-update the per-terminal TPK.
pub async fn upsert_terminal_key(
    pool: &DbPool,
    tid: &str,
    tpk_hex: &str,
    now: DateTime<FixedOffset>,
) -> Result<(), DbError> {
    let existing: Option<i64> = sqlx::query("SELECT id FROM terminal_key WHERE tid = ?")
        .bind(tid)
        .fetch_optional(pool)
        .await?
        .map(|r| r.get::<i64, _>("id"));

    match existing {
        Some(_) => {
            sqlx::query("UPDATE terminal_key SET tpk = ?, updated_at = ? WHERE tid = ?")
                .bind(tpk_hex)
                .bind(now)
                .bind(tid)
                .execute(pool)
                .await?;
        }
        None => {
            sqlx::query(
                "INSERT INTO terminal_key (tid, tpk, created_at) VALUES (?, ?, ?)",
            )
            .bind(tid)
            .bind(tpk_hex)
            .bind(now)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

/// Absent rows return an empty string, not an error.
pub async fn get_tpk(pool: &DbPool, tid: &str) -> Result<String, DbError> {
    let row = sqlx::query("SELECT tpk FROM terminal_key WHERE tid = ?")
        .bind(tid)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.get::<String, _>("tpk")).unwrap_or_default())
}

/// Hydrates a full row, used only by tests and diagnostics — the live
/// code paths only ever need the subset of fields each query above
/// returns.
#[allow(dead_code)]
pub(crate) fn row_to_transaction(row: &sqlx::mysql::MySqlRow) -> TransactionRow {
    TransactionRow {
        id: row.get("id"),
        mti: row.get("mti"),
        procode: row.get("procode"),
        tid: row.get("tid"),
        mid: row.get("mid"),
        pan: row.get("pan"),
        amount: row.get("amount"),
        trx_date: row.get("trx_date"),
        stan: row.get("stan"),
        stan_host: row.get("stan_host"),
        rrn: row.get("rrn"),
        merchant_name: row.get("merchant_name"),
        response_code: row.get("response_code"),
        iso_req: row.get("iso_req"),
        iso_res: row.get("iso_res"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
