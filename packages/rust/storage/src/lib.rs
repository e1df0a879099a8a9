//! Turso Embedded / libSQL storage layer for reconciled castles.
//!
//! The [`Storage`] struct wraps a libSQL database holding one row per castle,
//! keyed by `(country code, lowercase filtered name)`, plus a tag table used
//! as a coarse lookup index.
//!
//! **Access rules:**
//! - Pipeline runs: read-write via [`Storage::open`]
//! - Listing: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use castlefinder_shared::{
    Castle, CastleFinderError, Contact, Country, PropertyCondition, Result, VisitingInfo,
};
use chrono::Utc;
use libsql::{Connection, Database, Value, params};

/// Columns read back into a [`Castle`], in [`row_to_castle`] order.
const CASTLE_COLUMNS: &str = "country, name, state, city, district, foundation_period, \
     property_condition, coordinates, picture_url, contact_json, visiting_info_json, sources_json";

/// Upsert that never replaces a populated column with an empty value.
const UPSERT_CASTLE: &str = "INSERT INTO castles (country, name, state, city, district, foundation_period,
        property_condition, coordinates, picture_url, contact_json, visiting_info_json,
        sources_json, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
     ON CONFLICT(country, name) DO UPDATE SET
       state = COALESCE(NULLIF(excluded.state, ''), castles.state),
       city = COALESCE(NULLIF(excluded.city, ''), castles.city),
       district = COALESCE(NULLIF(excluded.district, ''), castles.district),
       foundation_period = COALESCE(NULLIF(excluded.foundation_period, ''), castles.foundation_period),
       property_condition = COALESCE(NULLIF(excluded.property_condition, 'unknown'), castles.property_condition),
       coordinates = COALESCE(NULLIF(excluded.coordinates, ''), castles.coordinates),
       picture_url = COALESCE(NULLIF(excluded.picture_url, ''), castles.picture_url),
       contact_json = COALESCE(excluded.contact_json, castles.contact_json),
       visiting_info_json = COALESCE(excluded.visiting_info_json, castles.visiting_info_json),
       sources_json = COALESCE(NULLIF(excluded.sources_json, '[]'), castles.sources_json),
       updated_at = excluded.updated_at";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CastleFinderError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| CastleFinderError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| CastleFinderError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` without running migrations.
    /// Every write is rejected.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CastleFinderError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| CastleFinderError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| CastleFinderError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        CastleFinderError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(CastleFinderError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Upsert every castle of `castles` in one transaction and rewrite its
    /// tag rows from the stored result. Returns the number of rows written.
    ///
    /// Castles whose filtered name is empty have no key and are skipped.
    pub async fn save_castles(&self, castles: &[Castle]) -> Result<usize> {
        self.check_writable()?;
        if castles.is_empty() {
            return Ok(0);
        }

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| CastleFinderError::Storage(e.to_string()))?;

        let now = Utc::now().to_rfc3339();
        let mut saved = 0;
        for castle in castles {
            let key = castle.filtered_name();
            if key.is_empty() {
                tracing::warn!(name = %castle.name, country = %castle.country, "skipping castle without a name");
                continue;
            }
            let country = castle.country.code();

            tx.execute(
                UPSERT_CASTLE,
                params![
                    country,
                    key.as_str(),
                    castle.state.as_str(),
                    castle.city.as_str(),
                    castle.district.as_str(),
                    castle.foundation_period.as_str(),
                    castle.property_condition.as_str(),
                    castle.coordinates.as_str(),
                    castle.picture_url.as_str(),
                    to_json(&castle.contact)?,
                    to_json(&castle.visiting_info)?,
                    serde_json::to_string(&castle.sources)
                        .map_err(|e| CastleFinderError::Storage(e.to_string()))?,
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| CastleFinderError::Storage(e.to_string()))?;

            // Tags follow the stored row, which may keep fields this castle lacks.
            let mut rows = tx
                .query(
                    &format!("SELECT {CASTLE_COLUMNS} FROM castles WHERE country = ?1 AND name = ?2"),
                    params![country, key.as_str()],
                )
                .await
                .map_err(|e| CastleFinderError::Storage(e.to_string()))?;
            let stored = match rows.next().await {
                Ok(Some(row)) => row_to_castle(&row)?,
                Ok(None) => {
                    return Err(CastleFinderError::Storage(format!(
                        "castle [{country}-{key}] vanished after upsert"
                    )));
                }
                Err(e) => return Err(CastleFinderError::Storage(e.to_string())),
            };

            tx.execute(
                "DELETE FROM castle_tags WHERE country = ?1 AND name = ?2",
                params![country, key.as_str()],
            )
            .await
            .map_err(|e| CastleFinderError::Storage(e.to_string()))?;
            for tag in stored.matching_tags() {
                tx.execute(
                    "INSERT OR IGNORE INTO castle_tags (country, name, tag) VALUES (?1, ?2, ?3)",
                    params![country, key.as_str(), tag],
                )
                .await
                .map_err(|e| CastleFinderError::Storage(e.to_string()))?;
            }
            saved += 1;
        }

        tx.commit()
            .await
            .map_err(|e| CastleFinderError::Storage(e.to_string()))?;
        tracing::debug!(saved, "castles upserted");
        Ok(saved)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Stored castles that plausibly match any castle of `batch`.
    ///
    /// A stored row is returned when it shares the country and its name
    /// contains the batch castle's filtered name, or is one of its matching
    /// tags, or is one of the lowercase words of its raw name. This is a
    /// superset: callers must still apply the match predicate. Rows come
    /// back in insertion order.
    pub async fn find_similar(&self, batch: &[Castle]) -> Result<Vec<Castle>> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        for castle in batch {
            let filtered = castle.filtered_name();
            if filtered.is_empty() {
                continue;
            }

            let mut names = castle.matching_tags();
            for word in castle.name.to_lowercase().split_whitespace() {
                if !names.iter().any(|n| n == word) {
                    names.push(word.to_string());
                }
            }

            let placeholders = vec!["?"; names.len()].join(", ");
            clauses.push(format!(
                "(country = ? AND (instr(name, ?) > 0 OR name IN ({placeholders})))"
            ));
            values.push(Value::Text(castle.country.code().to_string()));
            values.push(Value::Text(filtered));
            values.extend(names.into_iter().map(Value::Text));
        }

        if clauses.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {CASTLE_COLUMNS} FROM castles WHERE {} ORDER BY rowid",
            clauses.join(" OR ")
        );
        let mut rows = self
            .conn
            .query(&sql, libsql::params_from_iter(values))
            .await
            .map_err(|e| CastleFinderError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| CastleFinderError::Storage(e.to_string()))?
        {
            results.push(row_to_castle(&row)?);
        }
        Ok(results)
    }

    /// All stored castles, optionally restricted to one country, ordered by
    /// country and name.
    pub async fn list_castles(&self, country: Option<Country>) -> Result<Vec<Castle>> {
        let mut rows = match country {
            Some(c) => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {CASTLE_COLUMNS} FROM castles WHERE country = ?1 ORDER BY name"
                        ),
                        params![c.code()],
                    )
                    .await
            }
            None => {
                self.conn
                    .query(
                        &format!("SELECT {CASTLE_COLUMNS} FROM castles ORDER BY country, name"),
                        params![],
                    )
                    .await
            }
        }
        .map_err(|e| CastleFinderError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| CastleFinderError::Storage(e.to_string()))?
        {
            results.push(row_to_castle(&row)?);
        }
        Ok(results)
    }

    /// Number of stored castles.
    pub async fn count_castles(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM castles", params![])
            .await
            .map_err(|e| CastleFinderError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map(|n| n.max(0) as u64)
                .map_err(|e| CastleFinderError::Storage(e.to_string())),
            Ok(None) => Ok(0),
            Err(e) => Err(CastleFinderError::Storage(e.to_string())),
        }
    }

    /// Tags indexed for the castle stored under `country` and `name`.
    pub async fn castle_tags(&self, country: Country, name: &str) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT tag FROM castle_tags WHERE country = ?1 AND name = ?2 ORDER BY tag",
                params![country.code(), name],
            )
            .await
            .map_err(|e| CastleFinderError::Storage(e.to_string()))?;

        let mut tags = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| CastleFinderError::Storage(e.to_string()))?
        {
            tags.push(
                row.get::<String>(0)
                    .map_err(|e| CastleFinderError::Storage(e.to_string()))?,
            );
        }
        Ok(tags)
    }
}

fn to_json<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(|e| CastleFinderError::Storage(e.to_string())))
        .transpose()
}

/// Convert a database row selected with [`CASTLE_COLUMNS`] to a [`Castle`].
fn row_to_castle(row: &libsql::Row) -> Result<Castle> {
    let text = |idx: i32| -> Result<String> {
        row.get::<String>(idx)
            .map_err(|e| CastleFinderError::Storage(e.to_string()))
    };
    let json = |idx: i32| -> Result<Option<String>> {
        row.get::<Option<String>>(idx)
            .map_err(|e| CastleFinderError::Storage(e.to_string()))
    };

    let country: Country = text(0)?
        .parse()
        .map_err(|e: CastleFinderError| CastleFinderError::Storage(e.to_string()))?;

    let contact = json(9)?
        .map(|s| serde_json::from_str::<Contact>(&s))
        .transpose()
        .map_err(|e| CastleFinderError::Storage(format!("invalid contact: {e}")))?;
    let visiting_info = json(10)?
        .map(|s| serde_json::from_str::<VisitingInfo>(&s))
        .transpose()
        .map_err(|e| CastleFinderError::Storage(format!("invalid visiting info: {e}")))?;
    let sources: Vec<String> = serde_json::from_str(&text(11)?)
        .map_err(|e| CastleFinderError::Storage(format!("invalid sources: {e}")))?;

    let mut castle = Castle::new(text(1)?, country);
    castle.state = text(2)?;
    castle.city = text(3)?;
    castle.district = text(4)?;
    castle.foundation_period = text(5)?;
    castle.property_condition = PropertyCondition::from_stored(&text(6)?);
    castle.coordinates = text(7)?;
    castle.picture_url = text(8)?;
    castle.contact = contact;
    castle.visiting_info = visiting_info;
    castle.sources = sources;
    Ok(castle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use castlefinder_shared::Facilities;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("cf_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn castle(name: &str, country: Country) -> Castle {
        Castle::new(name, country)
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("cf_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn save_keys_by_country_and_filtered_name() {
        let storage = test_storage().await;
        let mut trim = castle("Trim Castle", Country::Ireland);
        trim.city = "trim".into();
        trim.sources = vec!["https://heritageireland.ie/trim".into()];

        assert_eq!(storage.save_castles(&[trim.clone()]).await.unwrap(), 1);
        assert_eq!(storage.save_castles(&[trim]).await.unwrap(), 1);
        assert_eq!(storage.count_castles().await.unwrap(), 1);

        let stored = storage.list_castles(None).await.unwrap();
        assert_eq!(stored[0].name, "trim");
        assert_eq!(stored[0].country, Country::Ireland);
        assert_eq!(stored[0].sources, vec!["https://heritageireland.ie/trim".to_string()]);
    }

    #[tokio::test]
    async fn upsert_never_blanks_populated_fields() {
        let storage = test_storage().await;
        let mut full = castle("guimaraes", Country::Portugal);
        full.state = "braga".into();
        full.property_condition = PropertyCondition::Intact;
        full.contact = Some(Contact {
            phone: "1234567".into(),
            email: String::new(),
        });
        full.visiting_info = Some(VisitingInfo {
            working_hours: "10:00 - 18:00".into(),
            facilities: Facilities {
                parking: true,
                ..Facilities::default()
            },
        });
        full.sources = vec!["https://castelos.pt/guimaraes".into()];
        storage.save_castles(&[full]).await.unwrap();

        let mut sparse = castle("guimaraes", Country::Portugal);
        sparse.city = "guimarães".into();
        storage.save_castles(&[sparse]).await.unwrap();

        let stored = storage
            .list_castles(Some(Country::Portugal))
            .await
            .unwrap()
            .remove(0);
        assert_eq!(stored.state, "braga");
        assert_eq!(stored.city, "guimarães");
        assert_eq!(stored.property_condition, PropertyCondition::Intact);
        assert_eq!(stored.contact.unwrap().phone, "1234567");
        assert!(stored.visiting_info.unwrap().facilities.parking);
        assert_eq!(stored.sources, vec!["https://castelos.pt/guimaraes".to_string()]);
    }

    #[tokio::test]
    async fn tags_follow_the_stored_row() {
        let storage = test_storage().await;
        let mut first = castle("Ross Castle", Country::Ireland);
        first.city = "killarney".into();
        storage.save_castles(&[first]).await.unwrap();

        let mut second = castle("Ross Castle", Country::Ireland);
        second.state = "co. kerry".into();
        storage.save_castles(&[second]).await.unwrap();

        let tags = storage.castle_tags(Country::Ireland, "ross").await.unwrap();
        assert!(tags.contains(&"killarney".to_string()));
        assert!(tags.contains(&"co.".to_string()));
        assert!(tags.contains(&"ie".to_string()));
        assert!(!tags.contains(&"castle".to_string()));
    }

    #[tokio::test]
    async fn tags_of_an_unknown_castle_are_empty() {
        let storage = test_storage().await;
        storage
            .save_castles(&[castle("Ross Castle", Country::Ireland)])
            .await
            .unwrap();

        let tags = storage.castle_tags(Country::Uk, "ross").await.unwrap();
        assert!(tags.is_empty());
    }

    #[tokio::test]
    async fn find_similar_is_a_country_scoped_superset() {
        let storage = test_storage().await;
        storage
            .save_castles(&[
                castle("guimaraes", Country::Portugal),
                castle("braga", Country::Portugal),
                castle("kirby muxloe castle", Country::Uk),
                castle("guimaraes", Country::Uk),
            ])
            .await
            .unwrap();

        // Name contains the filtered name.
        let found = storage
            .find_similar(&[castle("Castelo de Guimaraes", Country::Portugal)])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].country, Country::Portugal);

        // Stored name is one of the raw name's words.
        let found = storage
            .find_similar(&[castle("kirby castle", Country::Uk)])
            .await
            .unwrap();
        assert!(found.iter().all(|c| c.country == Country::Uk));
        assert!(found.iter().any(|c| c.name == "kirby muxloe"));

        let found = storage
            .find_similar(&[castle("alnwick", Country::Uk)])
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn find_similar_returns_insertion_order() {
        let storage = test_storage().await;
        storage
            .save_castles(&[
                castle("torre de belem", Country::Portugal),
                castle("belem", Country::Portugal),
            ])
            .await
            .unwrap();

        let found = storage
            .find_similar(&[castle("belem", Country::Portugal)])
            .await
            .unwrap();
        let names: Vec<&str> = found.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["de belem", "belem"]);
    }

    #[tokio::test]
    async fn empty_batch_queries_nothing() {
        let storage = test_storage().await;
        assert!(storage.find_similar(&[]).await.unwrap().is_empty());
        assert_eq!(storage.save_castles(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("cf_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.save_castles(&[castle("trim", Country::Ireland)])
            .await
            .unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.count_castles().await.unwrap(), 1);
        let result = ro.save_castles(&[castle("adare", Country::Ireland)]).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
