//! Persistence: the transaction-history/key-store queries and the STAN
//! counter file. Both live in one crate because both are the gateway's
//! durable state — one row in MySQL, one counter in a JSON file.

mod error;
mod models;
mod pool;
mod queries;
mod stan;

pub use error::DbError;
pub use models::{NewTransaction, ReversalLookup, TransactionRow};
pub use pool::connect;
pub use queries::{
    get_tmk, get_tpk, get_zmk, get_zpk, insert_transaction, lookup_host_stan_for_reversal,
    update_transaction_response, update_zpk, upsert_terminal_key, DbPool,
};
pub use stan::StanAllocator;
