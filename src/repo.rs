use async_trait::async_trait;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("no fields to update")] EmptyUpdate,
    #[error("storage error: {0}")] Storage(#[from] sqlx::Error),
    #[error("corrupt json column: {0}")] Corrupt(#[from] serde_json::Error),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait PresentationRepo: Send + Sync {
    async fn create_presentation(&self, new: NewPresentation) -> RepoResult<Presentation>;
    /// Inserts the presentation and all of its file rows as one unit.
    async fn create_upload(&self, new: NewPresentation, files: Vec<NewFile>) -> RepoResult<Presentation>;
    async fn list_presentations(&self, filters: &PresentationFilters) -> RepoResult<Vec<Presentation>>;
    /// Number of rows matching `filters`, ignoring limit/offset.
    async fn count_presentations(&self, filters: &PresentationFilters) -> RepoResult<i64>;
    async fn get_presentation(&self, id: &str) -> RepoResult<Presentation>;
    async fn update_presentation(&self, id: &str, upd: UpdatePresentation) -> RepoResult<Presentation>;
    async fn delete_presentation(&self, id: &str) -> RepoResult<()>;
    async fn increment_view_count(&self, id: &str) -> RepoResult<()>;
    async fn increment_download_count(&self, id: &str) -> RepoResult<()>;
    async fn category_summaries(&self) -> RepoResult<Vec<CategorySummary>>;
    async fn content_totals(&self) -> RepoResult<ContentTotals>;
}

#[async_trait]
pub trait FileRepo: Send + Sync {
    async fn create_file(&self, new: NewFile) -> RepoResult<FileRecord>;
    async fn get_file(&self, id: &str) -> RepoResult<FileRecord>;
    /// Primary file first, then by upload time ascending.
    async fn list_files(&self, presentation_id: &str) -> RepoResult<Vec<FileRecord>>;
    async fn delete_file(&self, id: &str) -> RepoResult<()>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment>;
    async fn list_comments(&self, presentation_id: &str) -> RepoResult<Vec<Comment>>;
}

#[async_trait]
pub trait AnalyticsRepo: Send + Sync {
    async fn record_event(&self, event: NewEvent) -> RepoResult<i64>;
    /// Counts per (event_type, day) inside the timeframe, newest day first.
    async fn event_stats(&self, presentation_id: Option<&str>, timeframe: Timeframe) -> RepoResult<Vec<DailyStat>>;
    async fn recent_events(&self, limit: i64) -> RepoResult<Vec<AnalyticsEvent>>;
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn ping(&self) -> RepoResult<()>;
}

pub trait Repo: PresentationRepo + FileRepo + CommentRepo + AnalyticsRepo + HealthCheck {}

impl<T> Repo for T where T: PresentationRepo + FileRepo + CommentRepo + AnalyticsRepo + HealthCheck {}

pub mod sqlite {
    use super::*;
    use std::str::FromStr;
    use std::time::Duration;

    use chrono::{DateTime, NaiveDate, Utc};
    use serde_json::Value;
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use sqlx::{Executor, QueryBuilder, Sqlite, SqlitePool};
    use tracing::info;
    use uuid::Uuid;

    static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

    const PRESENTATION_COLUMNS: &str = "id, title, description, author, date_created, date_presented, \
        category, tags, file_path, file_type, file_size, thumbnail_path, metadata, is_public, \
        view_count, download_count";

    const FILE_COLUMNS: &str = "id, presentation_id, original_name, file_path, file_type, file_size, \
        mime_type, upload_date, is_primary";

    /// Open (creating if needed) the database and bring the schema up to date.
    pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
        let opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        if !in_memory {
            if let Some(dir) = opts.clone().get_filename().parent() {
                if !dir.as_os_str().is_empty() {
                    std::fs::create_dir_all(dir)?;
                }
            }
        }
        // every in-memory connection is its own database
        let max = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new().max_connections(max).connect_with(opts).await?;
        MIGRATOR.run(&pool).await?;
        info!(database_url, "database ready");
        Ok(pool)
    }

    #[derive(Clone)]
    pub struct SqliteRepo { pool: SqlitePool }

    impl SqliteRepo {
        pub fn new(pool: SqlitePool) -> Self { Self { pool } }
    }

    #[async_trait]
    impl HealthCheck for SqliteRepo {
        async fn ping(&self) -> RepoResult<()> {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        }
    }

    // ---- row types: JSON blobs stay text until they cross this boundary ----

    #[derive(sqlx::FromRow)]
    struct PresentationRow {
        id: String,
        title: String,
        description: Option<String>,
        author: String,
        date_created: DateTime<Utc>,
        date_presented: Option<NaiveDate>,
        category: Option<String>,
        tags: Option<String>,
        file_path: String,
        file_type: String,
        file_size: Option<i64>,
        thumbnail_path: Option<String>,
        metadata: Option<String>,
        is_public: bool,
        view_count: i64,
        download_count: i64,
    }

    impl TryFrom<PresentationRow> for Presentation {
        type Error = RepoError;
        fn try_from(r: PresentationRow) -> Result<Self, Self::Error> {
            Ok(Presentation {
                tags: decode_json(r.tags.as_deref(), Vec::new)?,
                metadata: decode_json(r.metadata.as_deref(), || Value::Object(Default::default()))?,
                id: r.id,
                title: r.title,
                description: r.description,
                author: r.author,
                date_created: r.date_created,
                date_presented: r.date_presented,
                category: r.category,
                file_path: r.file_path,
                file_type: r.file_type,
                file_size: r.file_size.unwrap_or(0),
                thumbnail_path: r.thumbnail_path,
                is_public: r.is_public,
                view_count: r.view_count,
                download_count: r.download_count,
            })
        }
    }

    #[derive(sqlx::FromRow)]
    struct EventRow {
        id: i64,
        presentation_id: Option<String>,
        event_type: String,
        user_agent: Option<String>,
        ip_address: Option<String>,
        timestamp: DateTime<Utc>,
        metadata: Option<String>,
    }

    impl TryFrom<EventRow> for AnalyticsEvent {
        type Error = RepoError;
        fn try_from(r: EventRow) -> Result<Self, Self::Error> {
            Ok(AnalyticsEvent {
                metadata: decode_json(r.metadata.as_deref(), || Value::Object(Default::default()))?,
                id: r.id,
                presentation_id: r.presentation_id,
                event_type: r.event_type,
                user_agent: r.user_agent,
                ip_address: r.ip_address,
                timestamp: r.timestamp,
            })
        }
    }

    fn decode_json<T, F>(raw: Option<&str>, empty: F) -> RepoResult<T>
    where
        T: serde::de::DeserializeOwned,
        F: FnOnce() -> T,
    {
        match raw.map(str::trim) {
            None | Some("") => Ok(empty()),
            Some(text) => Ok(serde_json::from_str(text)?),
        }
    }

    /// `%needle%` with LIKE wildcards in the needle escaped (pair with `ESCAPE '\'`).
    pub(crate) fn like_pattern(needle: &str) -> String {
        let mut out = String::with_capacity(needle.len() + 2);
        out.push('%');
        for c in needle.chars() {
            if matches!(c, '%' | '_' | '\\') { out.push('\\'); }
            out.push(c);
        }
        out.push('%');
        out
    }

    fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, f: &PresentationFilters) {
        qb.push(" WHERE 1 = 1");
        if !f.include_private {
            qb.push(" AND is_public = 1");
        }
        if let Some(category) = &f.category {
            qb.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(author) = &f.author {
            qb.push(" AND author LIKE ").push_bind(like_pattern(author)).push(" ESCAPE '\\'");
        }
        if let Some(search) = &f.search {
            let pattern = like_pattern(search);
            qb.push(" AND (title LIKE ").push_bind(pattern.clone()).push(" ESCAPE '\\'")
                .push(" OR description LIKE ").push_bind(pattern.clone()).push(" ESCAPE '\\'")
                .push(" OR tags LIKE ").push_bind(pattern).push(" ESCAPE '\\')");
        }
    }

    fn order_clause(sort: SortKey, order: SortOrder) -> String {
        let column = match sort {
            SortKey::DateCreated => "date_created",
            SortKey::Title => "title COLLATE NOCASE",
            SortKey::Views => "view_count",
            SortKey::Downloads => "download_count",
            SortKey::Popularity => "(view_count + 2 * download_count)",
        };
        let dir = match order { SortOrder::Asc => "ASC", SortOrder::Desc => "DESC" };
        // rowid keeps rows inserted within the same instant in a stable order
        format!(" ORDER BY {column} {dir}, date_created DESC, rowid DESC")
    }

    async fn insert_presentation<'e, E>(exec: E, new: &NewPresentation, now: DateTime<Utc>) -> RepoResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "INSERT INTO presentations (id, title, description, author, date_created, date_presented, \
             category, tags, file_path, file_type, file_size, thumbnail_path, metadata, is_public) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&new.id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.author)
        .bind(now)
        .bind(new.date_presented)
        .bind(&new.category)
        .bind(serde_json::to_string(&new.tags)?)
        .bind(&new.file_path)
        .bind(&new.file_type)
        .bind(new.file_size)
        .bind(&new.thumbnail_path)
        .bind(serde_json::to_string(&new.metadata)?)
        .bind(new.is_public)
        .execute(exec)
        .await?;
        Ok(())
    }

    async fn insert_file<'e, E>(exec: E, new: &NewFile, now: DateTime<Utc>) -> RepoResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "INSERT INTO files (id, presentation_id, original_name, file_path, file_type, file_size, \
             mime_type, upload_date, is_primary) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&new.id)
        .bind(&new.presentation_id)
        .bind(&new.original_name)
        .bind(&new.file_path)
        .bind(&new.file_type)
        .bind(new.file_size)
        .bind(&new.mime_type)
        .bind(now)
        .bind(new.is_primary)
        .execute(exec)
        .await?;
        Ok(())
    }

    #[async_trait]
    impl PresentationRepo for SqliteRepo {
        async fn create_presentation(&self, new: NewPresentation) -> RepoResult<Presentation> {
            insert_presentation(&self.pool, &new, Utc::now()).await?;
            self.get_presentation(&new.id).await
        }

        async fn create_upload(&self, new: NewPresentation, files: Vec<NewFile>) -> RepoResult<Presentation> {
            let now = Utc::now();
            let mut tx = self.pool.begin().await?;
            insert_presentation(&mut *tx, &new, now).await?;
            for file in &files {
                insert_file(&mut *tx, file, now).await?;
            }
            tx.commit().await?;
            self.get_presentation(&new.id).await
        }

        async fn list_presentations(&self, filters: &PresentationFilters) -> RepoResult<Vec<Presentation>> {
            let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {PRESENTATION_COLUMNS} FROM presentations"));
            push_filters(&mut qb, filters);
            qb.push(order_clause(filters.sort, filters.order));
            match (filters.limit, filters.offset) {
                (Some(limit), offset) => {
                    qb.push(" LIMIT ").push_bind(limit);
                    qb.push(" OFFSET ").push_bind(offset.unwrap_or(0));
                }
                (None, Some(offset)) => {
                    qb.push(" LIMIT -1 OFFSET ").push_bind(offset);
                }
                (None, None) => {}
            }
            let rows = qb.build_query_as::<PresentationRow>().fetch_all(&self.pool).await?;
            rows.into_iter().map(Presentation::try_from).collect()
        }

        async fn count_presentations(&self, filters: &PresentationFilters) -> RepoResult<i64> {
            let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM presentations");
            push_filters(&mut qb, filters);
            let (count,) = qb.build_query_as::<(i64,)>().fetch_one(&self.pool).await?;
            Ok(count)
        }

        async fn get_presentation(&self, id: &str) -> RepoResult<Presentation> {
            let row = sqlx::query_as::<_, PresentationRow>(&format!(
                "SELECT {PRESENTATION_COLUMNS} FROM presentations WHERE id = ?"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound)?;
            row.try_into()
        }

        async fn update_presentation(&self, id: &str, upd: UpdatePresentation) -> RepoResult<Presentation> {
            if upd.is_empty() {
                return Err(RepoError::EmptyUpdate);
            }
            let mut qb = QueryBuilder::<Sqlite>::new("UPDATE presentations SET ");
            let mut set = qb.separated(", ");
            if let Some(title) = upd.title { set.push("title = ").push_bind_unseparated(title); }
            if let Some(description) = upd.description { set.push("description = ").push_bind_unseparated(description); }
            if let Some(author) = upd.author { set.push("author = ").push_bind_unseparated(author); }
            if let Some(date) = upd.date_presented { set.push("date_presented = ").push_bind_unseparated(date); }
            if let Some(category) = upd.category { set.push("category = ").push_bind_unseparated(category); }
            if let Some(tags) = upd.tags { set.push("tags = ").push_bind_unseparated(serde_json::to_string(&tags)?); }
            if let Some(is_public) = upd.is_public { set.push("is_public = ").push_bind_unseparated(is_public); }
            qb.push(" WHERE id = ").push_bind(id.to_string());
            let res = qb.build().execute(&self.pool).await?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            self.get_presentation(id).await
        }

        async fn delete_presentation(&self, id: &str) -> RepoResult<()> {
            // files/comments cascade, analytics rows are nulled by the schema
            let res = sqlx::query("DELETE FROM presentations WHERE id = ?").bind(id).execute(&self.pool).await?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }

        async fn increment_view_count(&self, id: &str) -> RepoResult<()> {
            let res = sqlx::query("UPDATE presentations SET view_count = view_count + 1 WHERE id = ?")
                .bind(id).execute(&self.pool).await?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }

        async fn increment_download_count(&self, id: &str) -> RepoResult<()> {
            let res = sqlx::query("UPDATE presentations SET download_count = download_count + 1 WHERE id = ?")
                .bind(id).execute(&self.pool).await?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }

        async fn category_summaries(&self) -> RepoResult<Vec<CategorySummary>> {
            let recs = sqlx::query_as::<_, CategorySummary>(
                "SELECT COALESCE(NULLIF(category, ''), 'uncategorized') AS name, COUNT(*) AS count, \
                 MAX(date_created) AS latest \
                 FROM presentations WHERE is_public = 1 \
                 GROUP BY COALESCE(NULLIF(category, ''), 'uncategorized') \
                 ORDER BY count DESC, name ASC",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(recs)
        }

        async fn content_totals(&self) -> RepoResult<ContentTotals> {
            let totals = sqlx::query_as::<_, ContentTotals>(
                "SELECT COUNT(*) AS total_presentations, \
                 COALESCE(SUM(view_count), 0) AS total_views, \
                 COALESCE(SUM(download_count), 0) AS total_downloads \
                 FROM presentations WHERE is_public = 1",
            )
            .fetch_one(&self.pool)
            .await?;
            Ok(totals)
        }
    }

    #[async_trait]
    impl FileRepo for SqliteRepo {
        async fn create_file(&self, new: NewFile) -> RepoResult<FileRecord> {
            insert_file(&self.pool, &new, Utc::now()).await?;
            self.get_file(&new.id).await
        }

        async fn get_file(&self, id: &str) -> RepoResult<FileRecord> {
            sqlx::query_as::<_, FileRecord>(&format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(RepoError::NotFound)
        }

        async fn list_files(&self, presentation_id: &str) -> RepoResult<Vec<FileRecord>> {
            let recs = sqlx::query_as::<_, FileRecord>(&format!(
                "SELECT {FILE_COLUMNS} FROM files WHERE presentation_id = ? \
                 ORDER BY is_primary DESC, upload_date ASC, rowid ASC"
            ))
            .bind(presentation_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(recs)
        }

        async fn delete_file(&self, id: &str) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM files WHERE id = ?").bind(id).execute(&self.pool).await?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl CommentRepo for SqliteRepo {
        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            let id = Uuid::new_v4().to_string();
            let rec = sqlx::query_as::<_, Comment>(
                "INSERT INTO comments (id, presentation_id, author_name, author_email, content, date_created) \
                 VALUES (?, ?, ?, ?, ?, ?) \
                 RETURNING id, presentation_id, author_name, author_email, content, date_created, is_approved",
            )
            .bind(&id)
            .bind(&new.presentation_id)
            .bind(&new.author_name)
            .bind(&new.author_email)
            .bind(&new.content)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await?;
            Ok(rec)
        }

        async fn list_comments(&self, presentation_id: &str) -> RepoResult<Vec<Comment>> {
            let recs = sqlx::query_as::<_, Comment>(
                "SELECT id, presentation_id, author_name, author_email, content, date_created, is_approved \
                 FROM comments WHERE presentation_id = ? ORDER BY date_created ASC",
            )
            .bind(presentation_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(recs)
        }
    }

    #[async_trait]
    impl AnalyticsRepo for SqliteRepo {
        async fn record_event(&self, event: NewEvent) -> RepoResult<i64> {
            let res = sqlx::query(
                "INSERT INTO analytics (presentation_id, event_type, user_agent, ip_address, timestamp, metadata) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&event.presentation_id)
            .bind(&event.event_type)
            .bind(&event.user_agent)
            .bind(&event.ip_address)
            .bind(Utc::now())
            .bind(serde_json::to_string(&event.metadata)?)
            .execute(&self.pool)
            .await?;
            Ok(res.last_insert_rowid())
        }

        async fn event_stats(&self, presentation_id: Option<&str>, timeframe: Timeframe) -> RepoResult<Vec<DailyStat>> {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "SELECT event_type, DATE(timestamp) AS date, COUNT(*) AS count FROM analytics WHERE timestamp >= ",
            );
            qb.push_bind(timeframe.cutoff(Utc::now()));
            if let Some(id) = presentation_id {
                qb.push(" AND presentation_id = ").push_bind(id.to_string());
            }
            qb.push(" GROUP BY event_type, DATE(timestamp) ORDER BY date DESC, event_type ASC");
            let recs = qb.build_query_as::<DailyStat>().fetch_all(&self.pool).await?;
            Ok(recs)
        }

        async fn recent_events(&self, limit: i64) -> RepoResult<Vec<AnalyticsEvent>> {
            let rows = sqlx::query_as::<_, EventRow>(
                "SELECT id, presentation_id, event_type, user_agent, ip_address, timestamp, metadata \
                 FROM analytics ORDER BY id DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter().map(AnalyticsEvent::try_from).collect()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::like_pattern;

        #[test]
        fn like_pattern_escapes_wildcards() {
            assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
            assert_eq!(like_pattern("rust"), "%rust%");
        }
    }
}
