//! SQLite store: connections, fixture import, and table statistics.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, Transaction, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::migrate::current_version;
use crate::timestamp::MwTimestamp;
use crate::title::{NS_CATEGORY, Title, text_to_dbkey};

pub const STORE_TABLES: &[&str] = &[
    "page",
    "revision",
    "archive",
    "categorylinks",
    "pagelinks",
    "recentchanges",
];

pub fn open_connection(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    connection
        .busy_timeout(Duration::from_secs(5))
        .context("failed to set sqlite busy timeout")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys pragma")?;
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL journal mode")?;
    Ok(connection)
}

/// A snapshot of wiki rows in import form. Titles are free text and
/// timestamps may be 14-digit or ISO 8601.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WikiFixture {
    #[serde(default)]
    pub pages: Vec<PageFixture>,
    #[serde(default)]
    pub revisions: Vec<RevisionFixture>,
    #[serde(default)]
    pub deleted_revisions: Vec<DeletedRevisionFixture>,
    #[serde(default)]
    pub category_links: Vec<CategoryLinkFixture>,
    #[serde(default)]
    pub page_links: Vec<PageLinkFixture>,
    #[serde(default)]
    pub recent_changes: Vec<RecentChangeFixture>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PageFixture {
    pub id: i64,
    pub namespace: i64,
    pub title: String,
    #[serde(default)]
    pub redirect: bool,
    #[serde(default)]
    pub length: i64,
    #[serde(default)]
    pub latest: i64,
    pub touched: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RevisionFixture {
    pub id: i64,
    pub page: i64,
    pub timestamp: String,
    pub user: String,
    #[serde(default)]
    pub minor: bool,
    #[serde(default)]
    pub length: i64,
    #[serde(default)]
    pub parent: i64,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeletedRevisionFixture {
    pub id: i64,
    pub namespace: i64,
    pub title: String,
    pub timestamp: String,
    pub user: String,
    pub rev_id: i64,
    #[serde(default)]
    pub page_id: i64,
    #[serde(default)]
    pub minor: bool,
    #[serde(default)]
    pub length: i64,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CategoryLinkFixture {
    pub from: i64,
    pub category: String,
    /// Defaults to the uppercased prefix, or the member's title text.
    #[serde(default)]
    pub sortkey: Option<String>,
    #[serde(default)]
    pub sortkey_prefix: String,
    pub timestamp: String,
    #[serde(default = "default_member_type", rename = "type")]
    pub member_type: String,
}

fn default_member_type() -> String {
    "page".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PageLinkFixture {
    pub from: i64,
    pub namespace: i64,
    pub title: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecentChangeFixture {
    pub id: i64,
    pub timestamp: String,
    pub namespace: i64,
    pub title: String,
    #[serde(default)]
    pub page_id: i64,
    #[serde(default)]
    pub rev_id: i64,
    pub user: String,
    #[serde(rename = "type")]
    pub change_type: String,
    #[serde(default)]
    pub minor: bool,
    #[serde(default)]
    pub bot: bool,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub inserted: BTreeMap<String, usize>,
}

impl ImportReport {
    pub fn total(&self) -> usize {
        self.inserted.values().sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub schema_version: u32,
    pub tables: BTreeMap<String, usize>,
}

pub fn load_fixture(path: &Path) -> Result<WikiFixture> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn import_fixture_file(connection: &mut Connection, path: &Path) -> Result<ImportReport> {
    let fixture = load_fixture(path)?;
    import_fixture(connection, &fixture)
}

/// Inserts every fixture row in one transaction; any failure leaves the store unchanged.
pub fn import_fixture(connection: &mut Connection, fixture: &WikiFixture) -> Result<ImportReport> {
    let transaction = connection
        .transaction()
        .context("failed to start import transaction")?;
    let mut report = ImportReport::default();

    report
        .inserted
        .insert("page".to_string(), insert_pages(&transaction, &fixture.pages)?);
    report.inserted.insert(
        "revision".to_string(),
        insert_revisions(&transaction, &fixture.revisions)?,
    );
    report.inserted.insert(
        "archive".to_string(),
        insert_archive(&transaction, &fixture.deleted_revisions)?,
    );
    report.inserted.insert(
        "categorylinks".to_string(),
        insert_category_links(&transaction, &fixture.category_links)?,
    );
    report.inserted.insert(
        "pagelinks".to_string(),
        insert_page_links(&transaction, &fixture.page_links)?,
    );
    report.inserted.insert(
        "recentchanges".to_string(),
        insert_recent_changes(&transaction, &fixture.recent_changes)?,
    );

    transaction
        .commit()
        .context("failed to commit import transaction")?;
    info!(rows = report.total(), "imported fixture");
    Ok(report)
}

fn insert_pages(transaction: &Transaction<'_>, pages: &[PageFixture]) -> Result<usize> {
    let mut statement = transaction
        .prepare(
            "INSERT INTO page (page_id, page_namespace, page_title, page_is_redirect, page_len, page_latest, page_touched)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .context("failed to prepare page insert")?;
    for page in pages {
        statement
            .execute(params![
                page.id,
                page.namespace,
                required_dbkey(&page.title)?,
                page.redirect,
                page.length,
                page.latest,
                normalize_timestamp(&page.touched)?,
            ])
            .with_context(|| format!("failed to insert page {}", page.id))?;
    }
    Ok(pages.len())
}

fn insert_revisions(transaction: &Transaction<'_>, revisions: &[RevisionFixture]) -> Result<usize> {
    let mut statement = transaction
        .prepare(
            "INSERT INTO revision (rev_id, rev_page, rev_timestamp, rev_user_text, rev_minor_edit, rev_len, rev_parent_id, rev_comment)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .context("failed to prepare revision insert")?;
    for revision in revisions {
        statement
            .execute(params![
                revision.id,
                revision.page,
                normalize_timestamp(&revision.timestamp)?,
                normalize_user(&revision.user),
                revision.minor,
                revision.length,
                revision.parent,
                revision.comment,
            ])
            .with_context(|| format!("failed to insert revision {}", revision.id))?;
    }
    Ok(revisions.len())
}

fn insert_archive(
    transaction: &Transaction<'_>,
    revisions: &[DeletedRevisionFixture],
) -> Result<usize> {
    let mut statement = transaction
        .prepare(
            "INSERT INTO archive (ar_id, ar_namespace, ar_title, ar_timestamp, ar_user_text, ar_rev_id, ar_page_id, ar_minor_edit, ar_len, ar_comment)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .context("failed to prepare archive insert")?;
    for revision in revisions {
        statement
            .execute(params![
                revision.id,
                revision.namespace,
                required_dbkey(&revision.title)?,
                normalize_timestamp(&revision.timestamp)?,
                normalize_user(&revision.user),
                revision.rev_id,
                revision.page_id,
                revision.minor,
                revision.length,
                revision.comment,
            ])
            .with_context(|| format!("failed to insert deleted revision {}", revision.id))?;
    }
    Ok(revisions.len())
}

fn insert_category_links(
    transaction: &Transaction<'_>,
    links: &[CategoryLinkFixture],
) -> Result<usize> {
    let mut statement = transaction
        .prepare(
            "INSERT INTO categorylinks (cl_from, cl_to, cl_sortkey, cl_sortkey_prefix, cl_timestamp, cl_type)
             SELECT ?1, ?2, COALESCE(?3, upper(COALESCE(NULLIF(?4, ''), replace(page_title, '_', ' ')))), ?4, ?5, ?6
             FROM page WHERE page_id = ?1",
        )
        .context("failed to prepare categorylinks insert")?;
    for link in links {
        let inserted = statement
            .execute(params![
                link.from,
                category_dbkey(&link.category)?,
                link.sortkey,
                link.sortkey_prefix,
                normalize_timestamp(&link.timestamp)?,
                link.member_type,
            ])
            .with_context(|| {
                format!(
                    "failed to insert category link {} -> {}",
                    link.from, link.category
                )
            })?;
        if inserted != 1 {
            bail!(
                "category link {} -> {} references a missing page",
                link.from,
                link.category
            );
        }
    }
    Ok(links.len())
}

fn insert_page_links(transaction: &Transaction<'_>, links: &[PageLinkFixture]) -> Result<usize> {
    let mut statement = transaction
        .prepare(
            "INSERT INTO pagelinks (pl_from, pl_from_namespace, pl_namespace, pl_title)
             SELECT ?1, page_namespace, ?2, ?3 FROM page WHERE page_id = ?1",
        )
        .context("failed to prepare pagelinks insert")?;
    for link in links {
        let inserted = statement
            .execute(params![link.from, link.namespace, required_dbkey(&link.title)?])
            .with_context(|| format!("failed to insert page link {} -> {}", link.from, link.title))?;
        if inserted != 1 {
            bail!(
                "page link {} -> {} references a missing page",
                link.from,
                link.title
            );
        }
    }
    Ok(links.len())
}

fn insert_recent_changes(
    transaction: &Transaction<'_>,
    changes: &[RecentChangeFixture],
) -> Result<usize> {
    let mut statement = transaction
        .prepare(
            "INSERT INTO recentchanges (rc_id, rc_timestamp, rc_namespace, rc_title, rc_cur_id, rc_this_oldid, rc_user_text, rc_type, rc_minor, rc_bot, rc_comment)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .context("failed to prepare recentchanges insert")?;
    for change in changes {
        statement
            .execute(params![
                change.id,
                normalize_timestamp(&change.timestamp)?,
                change.namespace,
                required_dbkey(&change.title)?,
                change.page_id,
                change.rev_id,
                normalize_user(&change.user),
                change.change_type,
                change.minor,
                change.bot,
                change.comment,
            ])
            .with_context(|| format!("failed to insert recent change {}", change.id))?;
    }
    Ok(changes.len())
}

pub fn store_stats(connection: &Connection) -> Result<StoreStats> {
    let mut tables = BTreeMap::new();
    for table in STORE_TABLES {
        let count: i64 = connection
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .with_context(|| format!("failed to count rows in {table}"))?;
        tables.insert(
            (*table).to_string(),
            usize::try_from(count).context("count does not fit into usize")?,
        );
    }
    let schema_version = current_version(connection)?;
    debug!(schema_version, "collected store stats");
    Ok(StoreStats {
        schema_version,
        tables,
    })
}

fn normalize_timestamp(value: &str) -> Result<String> {
    MwTimestamp::parse(value)
        .map(|timestamp| timestamp.as_mw().to_string())
        .ok_or_else(|| anyhow::anyhow!("invalid timestamp {value:?}"))
}

fn required_dbkey(text: &str) -> Result<String> {
    let dbkey = text_to_dbkey(text);
    if dbkey.is_empty() {
        bail!("empty title in fixture");
    }
    Ok(dbkey)
}

/// User names are stored in text form, with spaces.
fn normalize_user(name: &str) -> String {
    text_to_dbkey(name).replace('_', " ")
}

fn category_dbkey(text: &str) -> Result<String> {
    match Title::parse(text) {
        Some(title) if title.namespace == NS_CATEGORY => Ok(title.dbkey),
        _ => required_dbkey(text),
    }
}
