//! SQLite persistence for spaces, saves and snapshots.
//!
//! All helpers take a pool and return `anyhow::Result`; the service layer maps
//! failures into `BackpocketError::Store`. Status transitions are conditional
//! updates so concurrent runs and refreshes for one save cannot interleave.
use crate::clock::{from_millis, to_millis};
use crate::patch::SnapshotPatch;
use crate::{NewSave, SaveRecord, SnapshotRecord, SpaceRecord};
use anyhow::{Context as _, Result};
use backpocket_common::{BlockedReason, SnapshotStatus, Visibility};
use backpocket_config::DatabaseConfig;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

const SNAPSHOT_COLUMNS: &str = r#"
    id, save_id, space_id, status, blocked_reason, attempts, next_attempt_at,
    fetched_at, canonical_url, title, byline, excerpt, site_name, word_count,
    language, content_sha256, description, image_url, content_html, content_text,
    error_message, created_at, updated_at
"#;

/// Open (creating if needed) the database named in config and run migrations.
pub async fn connect(cfg: &DatabaseConfig) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(&cfg.url)
        .with_context(|| format!("invalid database url {}", cfg.url))?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(cfg.max_connections.max(1))
        .connect_with(opts)
        .await
        .with_context(|| format!("connecting to {}", cfg.url))?;
    migrate(&pool).await?;
    info!(url=%cfg.url, max_connections=cfg.max_connections, "store.connect");
    Ok(pool)
}

/// Private in-memory database. One connection that never expires, since
/// every new connection to `sqlite::memory:` would see an empty schema.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("running migrations")?;
    Ok(())
}

// ---------- spaces ----------

pub async fn insert_space(
    pool: &SqlitePool,
    owner_id: &str,
    slug: &str,
    visibility: Visibility,
    now: DateTime<Utc>,
) -> Result<SpaceRecord> {
    let rec = SpaceRecord {
        id: Uuid::new_v4(),
        owner_id: owner_id.to_string(),
        slug: slug.to_string(),
        visibility,
        created_at: now,
    };
    sqlx::query(
        r#"INSERT INTO spaces (id, owner_id, slug, visibility, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)"#,
    )
    .bind(rec.id.to_string())
    .bind(rec.owner_id.as_str())
    .bind(rec.slug.as_str())
    .bind(rec.visibility.as_str())
    .bind(to_millis(now))
    .execute(pool)
    .await
    .with_context(|| format!("inserting space {slug}"))?;
    info!(space_id=%rec.id, slug=%rec.slug, visibility=%rec.visibility.as_str(), "store.insert_space");
    Ok(rec)
}

pub async fn get_space(pool: &SqlitePool, id: Uuid) -> Result<Option<SpaceRecord>> {
    let row = sqlx::query(
        "SELECT id, owner_id, slug, visibility, created_at FROM spaces WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(space_from_row).transpose()
}

pub async fn get_space_by_slug(pool: &SqlitePool, slug: &str) -> Result<Option<SpaceRecord>> {
    let row = sqlx::query(
        "SELECT id, owner_id, slug, visibility, created_at FROM spaces WHERE slug = ?",
    )
    .bind(slug)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(space_from_row).transpose()
}

// ---------- saves ----------

pub async fn insert_save(
    pool: &SqlitePool,
    space_id: Uuid,
    new: NewSave,
    now: DateTime<Utc>,
) -> Result<SaveRecord> {
    let rec = SaveRecord {
        id: Uuid::new_v4(),
        space_id,
        url: new.url,
        title: new.title,
        description: new.description,
        site_name: None,
        image_url: None,
        visibility: new.visibility,
        created_at: now,
    };
    sqlx::query(
        r#"INSERT INTO saves (id, space_id, url, title, description, visibility, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
    )
    .bind(rec.id.to_string())
    .bind(space_id.to_string())
    .bind(rec.url.as_str())
    .bind(rec.title.as_deref())
    .bind(rec.description.as_deref())
    .bind(rec.visibility.as_str())
    .bind(to_millis(now))
    .execute(pool)
    .await?;
    info!(save_id=%rec.id, space_id=%space_id, url=%rec.url, "store.insert_save");
    Ok(rec)
}

pub async fn get_save(pool: &SqlitePool, id: Uuid) -> Result<Option<SaveRecord>> {
    let row = sqlx::query(
        r#"SELECT id, space_id, url, title, description, site_name, image_url, visibility, created_at
           FROM saves WHERE id = ?"#,
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(save_from_row).transpose()
}

/// Delete a save and every snapshot that points at it, atomically.
pub async fn delete_save_cascade(pool: &SqlitePool, save_id: Uuid) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let snaps = sqlx::query("DELETE FROM snapshots WHERE save_id = ?")
        .bind(save_id.to_string())
        .execute(&mut *tx)
        .await?;
    let saves = sqlx::query("DELETE FROM saves WHERE id = ?")
        .bind(save_id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    info!(
        save_id=%save_id,
        snapshots=snaps.rows_affected(),
        saves=saves.rows_affected(),
        "store.delete_save"
    );
    Ok(saves.rows_affected() > 0)
}

/// Display fields copied from a `ready` snapshot onto its save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveBackfill {
    pub title: Option<String>,
    pub description: Option<String>,
    pub site_name: Option<String>,
    pub image_url: Option<String>,
}

impl SaveBackfill {
    /// Description falls back to the excerpt.
    pub fn from_snapshot(rec: &SnapshotRecord) -> Self {
        Self {
            title: rec.title.clone(),
            description: rec.description.clone().or_else(|| rec.excerpt.clone()),
            site_name: rec.site_name.clone(),
            image_url: rec.image_url.clone(),
        }
    }
}

/// Fill save fields that are NULL or blank. Populated fields are never touched.
pub async fn backfill_save(pool: &SqlitePool, save_id: Uuid, fill: &SaveBackfill) -> Result<u64> {
    let res = sqlx::query(
        r#"UPDATE saves SET
             title       = CASE WHEN (title IS NULL OR trim(title) = '') AND ?1 IS NOT NULL THEN ?1 ELSE title END,
             description = CASE WHEN (description IS NULL OR trim(description) = '') AND ?2 IS NOT NULL THEN ?2 ELSE description END,
             site_name   = CASE WHEN (site_name IS NULL OR trim(site_name) = '') AND ?3 IS NOT NULL THEN ?3 ELSE site_name END,
             image_url   = CASE WHEN (image_url IS NULL OR trim(image_url) = '') AND ?4 IS NOT NULL THEN ?4 ELSE image_url END
           WHERE id = ?5"#,
    )
    .bind(fill.title.as_deref())
    .bind(fill.description.as_deref())
    .bind(fill.site_name.as_deref())
    .bind(fill.image_url.as_deref())
    .bind(save_id.to_string())
    .execute(pool)
    .await?;
    debug!(save_id=%save_id, rows=res.rows_affected(), "store.backfill_save");
    Ok(res.rows_affected())
}

// ---------- snapshots ----------

/// Insert a fresh `pending` snapshot for a save.
pub async fn insert_snapshot(
    pool: &SqlitePool,
    save_id: Uuid,
    space_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO snapshots (id, save_id, space_id, status, attempts, created_at, updated_at)
           VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?4)"#,
    )
    .bind(id.to_string())
    .bind(save_id.to_string())
    .bind(space_id.to_string())
    .bind(to_millis(now))
    .execute(pool)
    .await
    .with_context(|| format!("inserting snapshot for save {save_id}"))?;
    info!(snapshot_id=%id, save_id=%save_id, "store.insert_snapshot");
    Ok(id)
}

pub async fn get_snapshot(pool: &SqlitePool, id: Uuid) -> Result<Option<SnapshotRecord>> {
    let sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(snapshot_from_row).transpose()
}

/// Most recently created snapshot for a save.
pub async fn latest_snapshot_for_save(
    pool: &SqlitePool,
    save_id: Uuid,
) -> Result<Option<SnapshotRecord>> {
    let sql = format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE save_id = ? \
         ORDER BY created_at DESC, rowid DESC LIMIT 1"
    );
    let row = sqlx::query(&sql)
        .bind(save_id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(snapshot_from_row).transpose()
}

/// `pending -> processing`, counting the attempt. False when another run
/// already holds the record or it is not pending.
pub async fn claim_snapshot(pool: &SqlitePool, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let res = sqlx::query(
        r#"UPDATE snapshots
           SET status = 'processing', attempts = attempts + 1, updated_at = ?1
           WHERE id = ?2 AND status = 'pending'"#,
    )
    .bind(to_millis(now))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    let claimed = res.rows_affected() == 1;
    debug!(snapshot_id=%id, claimed, "store.claim_snapshot");
    Ok(claimed)
}

/// Apply a terminal patch to a `processing` snapshot.
pub async fn apply_patch(
    pool: &SqlitePool,
    id: Uuid,
    patch: &SnapshotPatch,
    now: DateTime<Utc>,
) -> Result<bool> {
    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE snapshots SET status = ");
    qb.push_bind(patch.status.as_str());
    qb.push(", updated_at = ").push_bind(to_millis(now));
    patch.push_assignments(&mut qb);
    qb.push(" WHERE id = ")
        .push_bind(id.to_string())
        .push(" AND status = 'processing'");
    let res = qb
        .build()
        .execute(pool)
        .await
        .with_context(|| format!("writing {} patch for snapshot {id}", patch.status))?;
    let applied = res.rows_affected() == 1;
    debug!(snapshot_id=%id, status=%patch.status, applied, "store.apply_patch");
    Ok(applied)
}

/// Back to `pending` for a refresh. Refuses a snapshot that is mid-run.
pub async fn reset_for_refresh(pool: &SqlitePool, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let res = sqlx::query(
        r#"UPDATE snapshots
           SET status = 'pending', blocked_reason = NULL, error_message = NULL,
               content_html = NULL, content_text = NULL, updated_at = ?1
           WHERE id = ?2 AND status <> 'processing'"#,
    )
    .bind(to_millis(now))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    let reset = res.rows_affected() == 1;
    info!(snapshot_id=%id, reset, "store.reset_for_refresh");
    Ok(reset)
}

// ---------- row mapping ----------

fn uuid_col(r: &SqliteRow, col: &str) -> Result<Uuid> {
    let raw: String = r.try_get(col)?;
    Uuid::parse_str(&raw).with_context(|| format!("bad uuid in {col}: {raw}"))
}

fn time_col(r: &SqliteRow, col: &str) -> Result<DateTime<Utc>> {
    Ok(from_millis(r.try_get::<i64, _>(col)?))
}

fn opt_time_col(r: &SqliteRow, col: &str) -> Result<Option<DateTime<Utc>>> {
    Ok(r.try_get::<Option<i64>, _>(col)?.map(from_millis))
}

fn space_from_row(r: &SqliteRow) -> Result<SpaceRecord> {
    Ok(SpaceRecord {
        id: uuid_col(r, "id")?,
        owner_id: r.try_get("owner_id")?,
        slug: r.try_get("slug")?,
        visibility: Visibility::from_str(&r.try_get::<String, _>("visibility")?)?,
        created_at: time_col(r, "created_at")?,
    })
}

fn save_from_row(r: &SqliteRow) -> Result<SaveRecord> {
    Ok(SaveRecord {
        id: uuid_col(r, "id")?,
        space_id: uuid_col(r, "space_id")?,
        url: r.try_get("url")?,
        title: r.try_get("title")?,
        description: r.try_get("description")?,
        site_name: r.try_get("site_name")?,
        image_url: r.try_get("image_url")?,
        visibility: Visibility::from_str(&r.try_get::<String, _>("visibility")?)?,
        created_at: time_col(r, "created_at")?,
    })
}

fn snapshot_from_row(r: &SqliteRow) -> Result<SnapshotRecord> {
    let blocked_reason = r
        .try_get::<Option<String>, _>("blocked_reason")?
        .map(|s| BlockedReason::from_str(&s))
        .transpose()?;
    Ok(SnapshotRecord {
        id: uuid_col(r, "id")?,
        save_id: uuid_col(r, "save_id")?,
        space_id: uuid_col(r, "space_id")?,
        status: SnapshotStatus::from_str(&r.try_get::<String, _>("status")?)?,
        blocked_reason,
        attempts: r.try_get("attempts")?,
        next_attempt_at: opt_time_col(r, "next_attempt_at")?,
        fetched_at: opt_time_col(r, "fetched_at")?,
        canonical_url: r.try_get("canonical_url")?,
        title: r.try_get("title")?,
        byline: r.try_get("byline")?,
        excerpt: r.try_get("excerpt")?,
        site_name: r.try_get("site_name")?,
        word_count: r.try_get("word_count")?,
        language: r.try_get("language")?,
        content_sha256: r.try_get("content_sha256")?,
        description: r.try_get("description")?,
        image_url: r.try_get("image_url")?,
        content_html: r.try_get("content_html")?,
        content_text: r.try_get("content_text")?,
        error_message: r.try_get("error_message")?,
        created_at: time_col(r, "created_at")?,
        updated_at: time_col(r, "updated_at")?,
    })
}
