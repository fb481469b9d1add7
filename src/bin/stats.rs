use anyhow::Result;
use kycgraph::db::Db;
use kycgraph::error::KycError;
use kycgraph::model::{is_canonical_lei, lei_checksum_valid};
use kycgraph::Config;

/// Rows listed per anomaly before the report elides the rest.
const SAMPLE_ROWS: usize = 10;

struct Anomaly {
    label: &'static str,
    rows: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let config = Config::load()?;
    let db = Db::new(config.db_path());

    println!("\n=== kycgraph Ownership Graph Statistics ===\n");

    let counts = db
        .with_connection(|conn| {
            let count = |sql: &str| conn.query_row(sql, [], |row| row.get::<_, i64>(0));
            Ok::<_, KycError>(vec![
                ("Legal entities", count("SELECT COUNT(*) FROM legal_entities")?),
                ("Ownership edges", count("SELECT COUNT(*) FROM ownership_edges")?),
                (
                    "Active edges",
                    count(
                        "SELECT COUNT(*) FROM ownership_edges
                         WHERE (end_date IS NULL OR end_date = '')
                           AND UPPER(COALESCE(relationship_status, 'ACTIVE')) != 'INACTIVE'",
                    )?,
                ),
                ("Adverse media records", count("SELECT COUNT(*) FROM adverse_media")?),
                (
                    "Jurisdictions",
                    count("SELECT COUNT(DISTINCT UPPER(jurisdiction)) FROM legal_entities WHERE jurisdiction IS NOT NULL")?,
                ),
            ])
        })
        .await?;

    println!("{:-<50}", "");
    for (label, value) in &counts {
        println!("{:<30} {:>15}", label, value);
    }
    println!("{:-<50}", "");

    let top_jurisdictions = db
        .with_connection(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT COALESCE(UPPER(jurisdiction), '(none)') AS j, COUNT(*) AS n
                FROM legal_entities
                GROUP BY j
                ORDER BY n DESC, j ASC
                LIMIT 10
                "#,
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
            Ok::<_, KycError>(rows)
        })
        .await?;

    if !top_jurisdictions.is_empty() {
        println!("\nEntities by Jurisdiction (top 10):\n");
        for (jurisdiction, n) in &top_jurisdictions {
            println!("  {:<10} {:>10}", jurisdiction, n);
        }
    }

    let anomalies = db.with_connection(|conn| collect_anomalies(conn)).await?;

    println!("\nStructural Anomalies:\n");
    let mut total = 0;
    for anomaly in &anomalies {
        total += anomaly.rows.len();
        let marker = if anomaly.rows.is_empty() { "✓" } else { "⚠" };
        println!("{} {:<40} {:>8}", marker, anomaly.label, anomaly.rows.len());
        for row in anomaly.rows.iter().take(SAMPLE_ROWS) {
            println!("    {}", row);
        }
        if anomaly.rows.len() > SAMPLE_ROWS {
            println!("    ... and {} more", anomaly.rows.len() - SAMPLE_ROWS);
        }
    }

    if total == 0 {
        println!("\n✓ No anomalies found");
    } else {
        println!("\n⚠ {} anomalies found; affected edges are skipped at query time", total);
    }

    Ok(())
}

fn collect_anomalies(conn: &mut rusqlite::Connection) -> kycgraph::Result<Vec<Anomaly>> {
    let strings = |sql: &str| -> kycgraph::Result<Vec<String>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(rows)
    };

    let duplicates = strings(
        r#"
        SELECT parent_lei || ' -> ' || child_lei || ' (' || COUNT(*) || ' active rows)'
        FROM ownership_edges
        WHERE (end_date IS NULL OR end_date = '')
          AND UPPER(COALESCE(relationship_status, 'ACTIVE')) != 'INACTIVE'
        GROUP BY parent_lei, child_lei
        HAVING COUNT(*) > 1
        ORDER BY parent_lei, child_lei
        "#,
    )?;

    let malformed = strings(
        r#"
        SELECT parent_lei || ' -> ' || child_lei || ': ' || COALESCE(CAST(ownership_pct AS TEXT), 'NULL')
        FROM ownership_edges
        WHERE ownership_pct IS NULL
           OR typeof(ownership_pct) NOT IN ('real', 'integer')
           OR ownership_pct < 0
           OR ownership_pct > 100
        ORDER BY edge_id
        "#,
    )?;

    let dangling = strings(
        r#"
        SELECT e.parent_lei || ' -> ' || e.child_lei
        FROM ownership_edges e
        LEFT JOIN legal_entities p ON p.lei = e.parent_lei
        LEFT JOIN legal_entities c ON c.lei = e.child_lei
        WHERE p.lei IS NULL OR c.lei IS NULL
        ORDER BY e.edge_id
        "#,
    )?;

    let self_loops = strings(
        "SELECT parent_lei FROM ownership_edges WHERE parent_lei = child_lei ORDER BY edge_id",
    )?;

    let leis = strings("SELECT lei FROM legal_entities ORDER BY lei")?;
    let non_canonical = leis
        .into_iter()
        .filter_map(|lei| {
            if !is_canonical_lei(&lei) {
                Some(format!("{} (not a 20-character LEI)", lei))
            } else if !lei_checksum_valid(&lei) {
                Some(format!("{} (check digits fail)", lei))
            } else {
                None
            }
        })
        .collect();

    Ok(vec![
        Anomaly { label: "Duplicate active edges", rows: duplicates },
        Anomaly { label: "Malformed ownership percentages", rows: malformed },
        Anomaly { label: "Dangling edges", rows: dangling },
        Anomaly { label: "Self-ownership edges", rows: self_loops },
        Anomaly { label: "Non-canonical LEIs", rows: non_canonical },
    ])
}
