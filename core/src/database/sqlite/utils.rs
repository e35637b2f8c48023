//! Query boilerplate helpers, mirroring the teacher's
//! `database::sqlite::utils` module.

/// Perform a set of modifications to the database inside a single
/// transaction.
pub fn db_exec<F>(conn: &mut rusqlite::Connection, modifications: F) -> rusqlite::Result<()>
where
    F: FnOnce(&rusqlite::Transaction) -> rusqlite::Result<()>,
{
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    modifications(&tx)?;
    tx.commit()
}

pub fn db_query<P, F, T>(
    conn: &rusqlite::Connection,
    stmt_str: &str,
    params: P,
    f: F,
) -> rusqlite::Result<Vec<T>>
where
    P: rusqlite::Params,
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
{
    conn.prepare(stmt_str)?
        .query_map(params, f)?
        .collect::<rusqlite::Result<Vec<T>>>()
}
