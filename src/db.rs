use std::path::Path;

use rusqlite::Connection;

use crate::record::Record;

/// Open (or create) the store and make sure the `products` table exists.
pub fn connect(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS products (
            title         TEXT    NOT NULL CHECK(length(title) > 0),
            price         REAL    NOT NULL CHECK(price >= 0),
            availability  INTEGER NOT NULL CHECK(availability IN (0, 1)),
            rating        INTEGER CHECK(rating BETWEEN 1 AND 5)
        );
        ",
    )
}

// ── Writing ──

/// Replace the whole table with `records`, in order, inside one transaction.
pub fn replace_products(conn: &Connection, records: &[Record]) -> rusqlite::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        tx.execute("DELETE FROM products", [])?;
        let mut stmt = tx.prepare(
            "INSERT INTO products (title, price, availability, rating) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for r in records {
            count += stmt.execute(rusqlite::params![r.title, r.price, r.availability, r.rating])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

// ── Reading ──

#[derive(Debug, Default)]
pub struct ProductFilter {
    pub available_only: bool,
    pub min_rating: Option<u8>,
    pub limit: Option<usize>,
}

/// Stored products in insertion (crawl) order.
pub fn fetch_products(conn: &Connection, filter: &ProductFilter) -> rusqlite::Result<Vec<Record>> {
    let mut conditions = Vec::new();
    if filter.available_only {
        conditions.push("availability = 1".to_string());
    }
    if let Some(min) = filter.min_rating {
        conditions.push(format!("rating >= {}", min));
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    let limit_clause = match filter.limit {
        Some(n) => format!(" LIMIT {}", n),
        None => String::new(),
    };

    let sql = format!(
        "SELECT title, price, availability, rating FROM products{} ORDER BY rowid{}",
        where_clause, limit_clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Record {
                title: row.get(0)?,
                price: row.get(1)?,
                availability: row.get(2)?,
                rating: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub available: usize,
    pub avg_price: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    /// Index 0 counts unrated products, 1..=5 the rest.
    pub ratings: [usize; 6],
}

pub fn get_stats(conn: &Connection) -> rusqlite::Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))?;
    let available: usize = conn.query_row(
        "SELECT COUNT(*) FROM products WHERE availability = 1",
        [],
        |r| r.get(0),
    )?;
    let (avg_price, min_price, max_price) = conn.query_row(
        "SELECT AVG(price), MIN(price), MAX(price) FROM products",
        [],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;

    let mut ratings = [0usize; 6];
    let mut stmt = conn.prepare("SELECT COALESCE(rating, 0), COUNT(*) FROM products GROUP BY 1")?;
    let counts = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, usize>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (rating, n) in counts {
        if let Some(slot) = usize::try_from(rating).ok().and_then(|i| ratings.get_mut(i)) {
            *slot = n;
        }
    }

    Ok(Stats {
        total,
        available,
        avg_price,
        min_price,
        max_price,
        ratings,
    })
}
