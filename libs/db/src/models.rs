//! Row shapes for the three tables this gateway touches: `transaction_history`,
//! `key` (a singleton row), and `terminal_key` (unique by `tid`). A
//! `services` table exists in the schema but is unused by the gateway and
//! is not modeled here.

use chrono::{DateTime, FixedOffset};

/// A transaction history row as it is inserted — the ID and response-side
/// fields are filled in later by [`crate::queries::update_transaction_response`].
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub mti: String,
    pub procode: String,
    pub tid: String,
    pub mid: String,
    /// Masked PAN — the caller is responsible for masking before this
    /// point; this crate stores whatever string it is given.
    pub pan: String,
    pub amount: i64,
    pub trx_date: Option<DateTime<FixedOffset>>,
    /// Client-supplied STAN, 6 digits.
    pub stan: String,
    /// Gateway-allocated host STAN, 12 digits.
    pub stan_host: String,
    pub rrn: String,
    pub merchant_name: String,
    pub iso_req: String,
    pub created_at: DateTime<FixedOffset>,
}

/// A fully hydrated transaction history row, as read back.
#[derive(Debug, Clone)]
pub struct TransactionRow {
    pub id: i64,
    pub mti: String,
    pub procode: String,
    pub tid: String,
    pub mid: String,
    pub pan: String,
    pub amount: i64,
    pub trx_date: Option<DateTime<FixedOffset>>,
    pub stan: String,
    pub stan_host: String,
    pub rrn: String,
    pub merchant_name: String,
    pub response_code: String,
    pub iso_req: String,
    pub iso_res: String,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
}

/// The lookup key used to find the host STAN assigned to an original 0200
/// when a matching 0400 reversal arrives.
#[derive(Debug, Clone)]
pub struct ReversalLookup {
    pub procode: String,
    pub amount: i64,
    pub stan: String,
    pub tid: String,
    pub mid: String,
    pub trx_date: Option<DateTime<FixedOffset>>,
}
