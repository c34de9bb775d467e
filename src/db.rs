//! Database initialization.

use rusqlite::{Connection, Transaction as SqlTransaction};

use crate::{budget, category, transaction, user};

/// Create the application's tables if they do not exist.
///
/// All tables are created in a single exclusive SQL transaction so a partial
/// schema is never left behind. Foreign key enforcement is switched on for
/// the connection; SQLite leaves it off by default.
pub fn initialize(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.pragma_update(None, "foreign_keys", "ON")?;

    let sql_transaction =
        SqlTransaction::new_unchecked(connection, rusqlite::TransactionBehavior::Exclusive)?;

    user::create_user_table(&sql_transaction)?;
    category::create_category_table(&sql_transaction)?;
    budget::create_budget_table(&sql_transaction)?;
    transaction::create_transaction_table(&sql_transaction)?;

    sql_transaction.commit()?;

    Ok(())
}
