//! Embedded libSQL document store for leadflow.
//!
//! The [`Storage`] struct keeps projects, leads, configuration documents,
//! blacklists and delivery bookkeeping. Leads and projects are stored as
//! validated JSON documents next to the handful of columns the pipeline
//! filters, orders and locks on.
//!
//! Operations that several stages race on are single statements:
//! [`Storage::try_lock_lead`], [`Storage::reserve_send_slot`] and
//! [`Storage::commit_delivery`].

mod migrations;

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use leadflow_shared::{
    BlacklistScope, EmailType, GlobalConfig, Lead, LeadId, LeadStatus, LeadflowError, Project,
    ProjectConfig, ProjectId, Result, normalize_email,
};
use libsql::{Connection, Database, params};
use serde::Serialize;

/// Scope key of the global configuration document.
const GLOBAL_SCOPE: &str = "global";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// One blacklist row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlacklistEntry {
    pub scope: String,
    pub email: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A successful send, recorded under its idempotency key.
#[derive(Debug, Clone)]
pub struct DeliveryRecord<'a> {
    pub idempotency_key: &'a str,
    pub email_type: EmailType,
    pub ordinal: u32,
    pub sent_at: DateTime<Utc>,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LeadflowError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` for reporting commands.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

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
                        LeadflowError::Storage(format!(
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

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(LeadflowError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------------

    /// Insert a new project. Names are unique.
    pub async fn insert_project(&self, project: &Project) -> Result<()> {
        self.check_writable()?;
        project.validate()?;
        let doc = serde_json::to_string(project)?;
        self.conn
            .execute(
                "INSERT INTO projects (id, name, active, created_at_ms, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    project.id.to_string(),
                    project.name.as_str(),
                    project.active as i64,
                    project.created_at.timestamp_millis(),
                    doc
                ],
            )
            .await
            .map_err(|e| {
                if e.to_string().contains("UNIQUE") {
                    LeadflowError::Conflict(format!("project '{}' already exists", project.name))
                } else {
                    storage_err(e)
                }
            })?;
        Ok(())
    }

    /// Replace a project's document.
    pub async fn update_project(&self, project: &Project) -> Result<()> {
        self.check_writable()?;
        project.validate()?;
        let doc = serde_json::to_string(project)?;
        let changed = self
            .conn
            .execute(
                "UPDATE projects SET name = ?2, active = ?3, doc = ?4 WHERE id = ?1",
                params![
                    project.id.to_string(),
                    project.name.as_str(),
                    project.active as i64,
                    doc
                ],
            )
            .await
            .map_err(storage_err)?;
        if changed == 0 {
            return Err(LeadflowError::not_found(format!("project {}", project.id)));
        }
        Ok(())
    }

    pub async fn get_project(&self, id: ProjectId) -> Result<Option<Project>> {
        let mut rows = self
            .conn
            .query(
                "SELECT doc FROM projects WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_doc(&row, "project")?)),
            None => Ok(None),
        }
    }

    pub async fn find_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        let mut rows = self
            .conn
            .query("SELECT doc FROM projects WHERE name = ?1", params![name])
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_doc(&row, "project")?)),
            None => Ok(None),
        }
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let mut rows = self
            .conn
            .query("SELECT doc FROM projects ORDER BY name", params![])
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_doc(&row, "project")?);
        }
        Ok(results)
    }

    /// Recompute `lead_count` from the lead table. Returns the new count.
    pub async fn refresh_lead_count(&self, project_id: ProjectId) -> Result<u64> {
        self.check_writable()?;
        let count = self.count_leads(project_id).await?;
        self.conn
            .execute(
                "UPDATE projects SET doc = json_set(doc, '$.lead_count', ?2) WHERE id = ?1",
                params![project_id.to_string(), count as i64],
            )
            .await
            .map_err(storage_err)?;
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Leads
    // -----------------------------------------------------------------------

    /// Insert a lead unless `(project_id, email)` already exists.
    /// Returns `true` when a row was created.
    pub async fn insert_lead(&self, lead: &Lead) -> Result<bool> {
        self.check_writable()?;
        let doc = serde_json::to_string(lead)?;
        let inserted = self
            .conn
            .execute(
                "INSERT INTO leads (id, project_id, email, status, created_at_ms, last_contacted_ms, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(project_id, email) DO NOTHING",
                params![
                    lead.id.to_string(),
                    lead.project_id.to_string(),
                    lead.email.as_str(),
                    lead.status.as_str(),
                    lead.created_at.timestamp_millis(),
                    lead.last_contacted.map(|t| t.timestamp_millis()),
                    doc
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(inserted == 1)
    }

    /// Overwrite a lead document without regard to its lock.
    pub async fn update_lead(&self, lead: &Lead) -> Result<()> {
        self.check_writable()?;
        let doc = serde_json::to_string(lead)?;
        let changed = self
            .conn
            .execute(
                "UPDATE leads SET status = ?2, last_contacted_ms = ?3, doc = ?4 WHERE id = ?1",
                params![
                    lead.id.to_string(),
                    lead.status.as_str(),
                    lead.last_contacted.map(|t| t.timestamp_millis()),
                    doc
                ],
            )
            .await
            .map_err(storage_err)?;
        if changed == 0 {
            return Err(LeadflowError::not_found(format!("lead {}", lead.id)));
        }
        Ok(())
    }

    /// Write a lead held under `owner`'s lock and release the lock in the same
    /// statement. Fails with `Conflict` if the lock was lost.
    ///
    /// A stored lead that reached a terminal status while locked (blacklist,
    /// reply, bounce) is never overwritten: the lock is released and `false`
    /// is returned.
    pub async fn commit_lead(&self, lead: &Lead, owner: &str) -> Result<bool> {
        self.check_writable()?;
        let doc = serde_json::to_string(lead)?;
        let changed = self
            .conn
            .execute(
                COMMIT_LEAD_SQL,
                params![
                    lead.id.to_string(),
                    lead.status.as_str(),
                    lead.last_contacted.map(|t| t.timestamp_millis()),
                    doc,
                    owner
                ],
            )
            .await
            .map_err(storage_err)?;
        if changed == 1 {
            return Ok(true);
        }
        if self.is_terminal(lead.id).await? {
            self.unlock_lead(lead.id, owner).await?;
            return Ok(false);
        }
        Err(LeadflowError::Conflict(format!(
            "lead {} is no longer locked by {owner}",
            lead.id
        )))
    }

    async fn is_terminal(&self, id: LeadId) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT status FROM leads WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => {
                let status: String = row.get(0).map_err(storage_err)?;
                Ok(status.parse::<LeadStatus>()?.is_terminal())
            }
            None => Ok(false),
        }
    }

    pub async fn get_lead(&self, id: LeadId) -> Result<Option<Lead>> {
        let mut rows = self
            .conn
            .query(
                "SELECT doc, status FROM leads WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_lead(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn find_lead_by_email(
        &self,
        project_id: ProjectId,
        email: &str,
    ) -> Result<Option<Lead>> {
        let mut rows = self
            .conn
            .query(
                "SELECT doc, status FROM leads WHERE project_id = ?1 AND email = ?2",
                params![project_id.to_string(), normalize_email(email)],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_lead(&row)?)),
            None => Ok(None),
        }
    }

    /// List a project's leads in creation order, optionally by status.
    pub async fn list_leads(
        &self,
        project_id: ProjectId,
        status: Option<LeadStatus>,
    ) -> Result<Vec<Lead>> {
        let mut rows = self
            .conn
            .query(
                "SELECT doc, status FROM leads
                 WHERE project_id = ?1 AND (?2 IS NULL OR status = ?2)
                 ORDER BY created_at_ms, id",
                params![project_id.to_string(), status.map(|s| s.as_str())],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_lead(&row)?);
        }
        Ok(results)
    }

    pub async fn count_leads(&self, project_id: ProjectId) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM leads WHERE project_id = ?1",
                params![project_id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)? as u64),
            None => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Per-lead in-flight locks
    // -----------------------------------------------------------------------

    /// Acquire the advisory lock on a lead iff it is unlocked or its lock has
    /// expired. Returns `false` if another owner holds it.
    pub async fn try_lock_lead(
        &self,
        id: LeadId,
        owner: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<bool> {
        self.check_writable()?;
        let now_ms = now.timestamp_millis();
        let expires_ms = (now + ttl).timestamp_millis();
        let changed = self
            .conn
            .execute(
                "UPDATE leads SET lock_owner = ?2, lock_expires_at_ms = ?3
                 WHERE id = ?1
                   AND (lock_owner IS NULL OR lock_owner = ?2 OR lock_expires_at_ms <= ?4)",
                params![id.to_string(), owner, expires_ms, now_ms],
            )
            .await
            .map_err(storage_err)?;
        Ok(changed == 1)
    }

    /// Release a lock held by `owner`. Releasing a lock someone else holds is a no-op.
    pub async fn unlock_lead(&self, id: LeadId, owner: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE leads SET lock_owner = NULL, lock_expires_at_ms = NULL
                 WHERE id = ?1 AND lock_owner = ?2",
                params![id.to_string(), owner],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Configuration documents
    // -----------------------------------------------------------------------

    /// Load and validate the global configuration document.
    pub async fn get_global_config(&self) -> Result<Option<GlobalConfig>> {
        let Some(doc) = self.get_config_doc(GLOBAL_SCOPE).await? else {
            return Ok(None);
        };
        let config: GlobalConfig = serde_json::from_str(&doc)
            .map_err(|e| LeadflowError::config(format!("malformed global config: {e}")))?;
        config.validate()?;
        Ok(Some(config))
    }

    pub async fn put_global_config(&self, config: &GlobalConfig) -> Result<()> {
        config.validate()?;
        self.put_config_doc(GLOBAL_SCOPE, &serde_json::to_string(config)?)
            .await
    }

    /// Load and validate a project's configuration document.
    pub async fn get_project_config(&self, project_id: ProjectId) -> Result<Option<ProjectConfig>> {
        let scope = BlacklistScope::Project(project_id).storage_key();
        let Some(doc) = self.get_config_doc(&scope).await? else {
            return Ok(None);
        };
        let config: ProjectConfig = serde_json::from_str(&doc).map_err(|e| {
            LeadflowError::config(format!("malformed config for project {project_id}: {e}"))
        })?;
        config.validate()?;
        Ok(Some(config))
    }

    pub async fn put_project_config(
        &self,
        project_id: ProjectId,
        config: &ProjectConfig,
    ) -> Result<()> {
        config.validate()?;
        let scope = BlacklistScope::Project(project_id).storage_key();
        self.put_config_doc(&scope, &serde_json::to_string(config)?)
            .await
    }

    async fn get_config_doc(&self, scope: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT doc FROM config_documents WHERE scope = ?1",
                params![scope],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    async fn put_config_doc(&self, scope: &str, doc: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO config_documents (scope, doc, updated_at_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT(scope) DO UPDATE SET
                   doc = excluded.doc,
                   updated_at_ms = excluded.updated_at_ms",
                params![scope, doc, Utc::now().timestamp_millis()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Blacklist
    // -----------------------------------------------------------------------

    /// Add an email to a blacklist scope and move matching non-terminal leads
    /// to `blacklisted`. Returns the number of leads moved.
    pub async fn add_to_blacklist(
        &self,
        scope: BlacklistScope,
        email: &str,
        reason: Option<&str>,
    ) -> Result<u64> {
        self.check_writable()?;
        let email = normalize_email(email);
        let tx = self.conn.transaction().await.map_err(storage_err)?;

        tx.execute(
            "INSERT INTO blacklist (scope, email, reason, created_at_ms) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(scope, email) DO UPDATE SET reason = excluded.reason",
            params![
                scope.storage_key(),
                email.as_str(),
                reason,
                Utc::now().timestamp_millis()
            ],
        )
        .await
        .map_err(storage_err)?;

        let project = match scope {
            BlacklistScope::Global => None,
            BlacklistScope::Project(id) => Some(id.to_string()),
        };
        let moved = tx
            .execute(
                "UPDATE leads
                 SET status = 'blacklisted', doc = json_set(doc, '$.status', 'blacklisted')
                 WHERE email = ?1
                   AND (?2 IS NULL OR project_id = ?2)
                   AND status NOT IN ('responded', 'bounced', 'blacklisted')",
                params![email.as_str(), project],
            )
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(moved)
    }

    /// Remove an email from a blacklist scope. Lead statuses are not restored.
    pub async fn remove_from_blacklist(&self, scope: BlacklistScope, email: &str) -> Result<bool> {
        self.check_writable()?;
        let removed = self
            .conn
            .execute(
                "DELETE FROM blacklist WHERE scope = ?1 AND email = ?2",
                params![scope.storage_key(), normalize_email(email)],
            )
            .await
            .map_err(storage_err)?;
        Ok(removed == 1)
    }

    pub async fn list_blacklist(&self, scope: BlacklistScope) -> Result<Vec<BlacklistEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT scope, email, reason, created_at_ms FROM blacklist
                 WHERE scope = ?1 ORDER BY email",
                params![scope.storage_key()],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(BlacklistEntry {
                scope: row.get::<String>(0).map_err(storage_err)?,
                email: row.get::<String>(1).map_err(storage_err)?,
                reason: row.get::<String>(2).ok(),
                created_at: millis_to_datetime(row.get::<i64>(3).map_err(storage_err)?)?,
            });
        }
        Ok(results)
    }

    /// Emails blocked for a project: the global list plus the project's own.
    pub async fn blacklisted_emails(&self, project_id: ProjectId) -> Result<HashSet<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT email FROM blacklist WHERE scope = ?1 OR scope = ?2",
                params![
                    GLOBAL_SCOPE,
                    BlacklistScope::Project(project_id).storage_key()
                ],
            )
            .await
            .map_err(storage_err)?;

        let mut results = HashSet::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.insert(row.get::<String>(0).map_err(storage_err)?);
        }
        Ok(results)
    }

    pub async fn is_blacklisted(&self, project_id: ProjectId, email: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM blacklist WHERE email = ?1 AND (scope = ?2 OR scope = ?3) LIMIT 1",
                params![
                    normalize_email(email),
                    GLOBAL_SCOPE,
                    BlacklistScope::Project(project_id).storage_key()
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(rows.next().await.map_err(storage_err)?.is_some())
    }

    // -----------------------------------------------------------------------
    // Daily send counters
    // -----------------------------------------------------------------------

    /// Atomically take one send slot for `day` if fewer than `limit` are used.
    /// Returns the new count, or `None` when the limit is reached.
    pub async fn reserve_send_slot(
        &self,
        project_id: ProjectId,
        day: &str,
        limit: u32,
    ) -> Result<Option<u32>> {
        self.check_writable()?;
        if limit == 0 {
            return Ok(None);
        }
        let mut rows = self
            .conn
            .query(
                "INSERT INTO send_counters (project_id, day, count) VALUES (?1, ?2, 1)
                 ON CONFLICT(project_id, day) DO UPDATE SET count = count + 1
                 WHERE send_counters.count < ?3
                 RETURNING count",
                params![project_id.to_string(), day, limit],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row.get::<u32>(0).map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    /// Give back a slot taken by [`Storage::reserve_send_slot`].
    pub async fn release_send_slot(&self, project_id: ProjectId, day: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE send_counters SET count = count - 1
                 WHERE project_id = ?1 AND day = ?2 AND count > 0",
                params![project_id.to_string(), day],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    pub async fn sends_on_day(&self, project_id: ProjectId, day: &str) -> Result<u32> {
        let mut rows = self
            .conn
            .query(
                "SELECT count FROM send_counters WHERE project_id = ?1 AND day = ?2",
                params![project_id.to_string(), day],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<u32>(0).map_err(storage_err)?),
            None => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Deliveries
    // -----------------------------------------------------------------------

    pub async fn delivery_exists(&self, idempotency_key: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM deliveries WHERE idempotency_key = ?1",
                params![idempotency_key],
            )
            .await
            .map_err(storage_err)?;
        Ok(rows.next().await.map_err(storage_err)?.is_some())
    }

    /// Record a successful send and write the updated lead (releasing its
    /// lock) in one transaction. A duplicate key fails with `Conflict` and
    /// leaves the lead untouched. Returns `false` when the lead turned
    /// terminal while locked: the delivery is kept and only the lock released.
    pub async fn commit_delivery(
        &self,
        lead: &Lead,
        owner: &str,
        delivery: &DeliveryRecord<'_>,
    ) -> Result<bool> {
        self.check_writable()?;
        let doc = serde_json::to_string(lead)?;
        let tx = self.conn.transaction().await.map_err(storage_err)?;

        let inserted = tx
            .execute(
                "INSERT INTO deliveries (idempotency_key, lead_id, project_id, email_type, ordinal, sent_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(idempotency_key) DO NOTHING",
                params![
                    delivery.idempotency_key,
                    lead.id.to_string(),
                    lead.project_id.to_string(),
                    delivery.email_type.as_str(),
                    delivery.ordinal,
                    delivery.sent_at.timestamp_millis()
                ],
            )
            .await
            .map_err(storage_err)?;
        if inserted == 0 {
            return Err(LeadflowError::Conflict(format!(
                "delivery {} already recorded",
                delivery.idempotency_key
            )));
        }

        let changed = tx
            .execute(
                COMMIT_LEAD_SQL,
                params![
                    lead.id.to_string(),
                    lead.status.as_str(),
                    lead.last_contacted.map(|t| t.timestamp_millis()),
                    doc,
                    owner
                ],
            )
            .await
            .map_err(storage_err)?;
        if changed == 1 {
            tx.commit().await.map_err(storage_err)?;
            return Ok(true);
        }

        // The mail went out; keep the delivery even if the lead turned terminal.
        let released = tx
            .execute(
                "UPDATE leads SET lock_owner = NULL, lock_expires_at_ms = NULL
                 WHERE id = ?1 AND lock_owner = ?2
                   AND status IN ('responded', 'bounced', 'blacklisted')",
                params![lead.id.to_string(), owner],
            )
            .await
            .map_err(storage_err)?;
        if released == 0 {
            return Err(LeadflowError::Conflict(format!(
                "lead {} is no longer locked by {owner}",
                lead.id
            )));
        }
        tx.commit().await.map_err(storage_err)?;
        Ok(false)
    }

    /// Record a delivery key on its own, without touching the lead. Used when
    /// a message went out but the full commit failed, so that the key still
    /// blocks a resend. Returns `false` if the key was already present.
    pub async fn record_delivery_key(
        &self,
        lead: &Lead,
        delivery: &DeliveryRecord<'_>,
    ) -> Result<bool> {
        self.check_writable()?;
        let inserted = self
            .conn
            .execute(
                "INSERT INTO deliveries (idempotency_key, lead_id, project_id, email_type, ordinal, sent_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(idempotency_key) DO NOTHING",
                params![
                    delivery.idempotency_key,
                    lead.id.to_string(),
                    lead.project_id.to_string(),
                    delivery.email_type.as_str(),
                    delivery.ordinal,
                    delivery.sent_at.timestamp_millis()
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(inserted == 1)
    }
}

/// Write a locked lead and release its lock. Terminal rows are left alone.
const COMMIT_LEAD_SQL: &str = "UPDATE leads
     SET status = ?2, last_contacted_ms = ?3, doc = ?4,
         lock_owner = NULL, lock_expires_at_ms = NULL
     WHERE id = ?1 AND lock_owner = ?5
       AND status NOT IN ('responded', 'bounced', 'blacklisted')";

fn storage_err(e: libsql::Error) -> LeadflowError {
    LeadflowError::Storage(e.to_string())
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| LeadflowError::Storage(format!("invalid timestamp: {ms}")))
}

/// Decode the JSON document in column 0, rejecting malformed records.
fn row_to_doc<T: serde::de::DeserializeOwned>(row: &libsql::Row, kind: &str) -> Result<T> {
    let doc: String = row.get(0).map_err(storage_err)?;
    serde_json::from_str(&doc)
        .map_err(|e| LeadflowError::validation(format!("malformed {kind} record: {e}")))
}

/// Convert a `(doc, status)` row to a [`Lead`]. The status column is authoritative.
fn row_to_lead(row: &libsql::Row) -> Result<Lead> {
    let mut lead: Lead = row_to_doc(row, "lead")?;
    let status: String = row.get(1).map_err(storage_err)?;
    lead.status = status.parse()?;
    Ok(lead)
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_shared::{EmailRecord, RawCandidate, SchedulingConfig};
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("lf_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    async fn seeded_project(storage: &Storage) -> Project {
        let project = Project::new(format!("project-{}", Uuid::now_v7()));
        storage.insert_project(&project).await.expect("insert project");
        project
    }

    fn lead_for(project: &Project, email: &str, company: &str) -> Lead {
        let candidate = RawCandidate {
            name: "Grace Hopper".into(),
            company: company.into(),
            email: Some(email.into()),
            ..Default::default()
        };
        Lead::from_candidate(project.id, &candidate, normalize_email(email))
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("lf_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn project_crud_and_unique_name() {
        let storage = test_storage().await;
        let mut project = seeded_project(&storage).await;

        let found = storage.get_project(project.id).await.unwrap().unwrap();
        assert_eq!(found.name, project.name);

        let dup = Project::new(project.name.clone());
        let err = storage.insert_project(&dup).await.unwrap_err();
        assert!(matches!(err, LeadflowError::Conflict(_)));

        project.brief = "We build tools for clinics.".into();
        storage.update_project(&project).await.expect("update");
        let found = storage
            .find_project_by_name(&project.name)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.brief, "We build tools for clinics.");
        assert_eq!(storage.list_projects().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lead_insert_is_unique_per_project() {
        let storage = test_storage().await;
        let project = seeded_project(&storage).await;
        let other = seeded_project(&storage).await;

        assert!(storage.insert_lead(&lead_for(&project, "a@x.com", "X")).await.unwrap());
        assert!(!storage.insert_lead(&lead_for(&project, "a@x.com", "X")).await.unwrap());
        assert!(storage.insert_lead(&lead_for(&other, "a@x.com", "X")).await.unwrap());

        assert_eq!(storage.count_leads(project.id).await.unwrap(), 1);
        assert_eq!(storage.refresh_lead_count(project.id).await.unwrap(), 1);
        let project = storage.get_project(project.id).await.unwrap().unwrap();
        assert_eq!(project.lead_count, 1);
    }

    #[tokio::test]
    async fn lead_roundtrip_and_status_filter() {
        let storage = test_storage().await;
        let project = seeded_project(&storage).await;
        let mut lead = lead_for(&project, "b@y.com", "Y");
        storage.insert_lead(&lead).await.unwrap();

        lead.status = LeadStatus::Enriched;
        lead.email_history.push(EmailRecord {
            email_type: EmailType::Outreach,
            subject: "Hello".into(),
            body: "Body".into(),
            created_at: Utc::now(),
            sent_at: None,
        });
        storage.update_lead(&lead).await.expect("update lead");

        let found = storage.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(found, lead);

        let enriched = storage
            .list_leads(project.id, Some(LeadStatus::Enriched))
            .await
            .unwrap();
        assert_eq!(enriched.len(), 1);
        let new = storage
            .list_leads(project.id, Some(LeadStatus::New))
            .await
            .unwrap();
        assert!(new.is_empty());

        let by_email = storage
            .find_lead_by_email(project.id, " B@Y.com ")
            .await
            .unwrap();
        assert!(by_email.is_some());
    }

    #[tokio::test]
    async fn lead_lock_excludes_second_owner() {
        let storage = test_storage().await;
        let project = seeded_project(&storage).await;
        let lead = lead_for(&project, "c@z.com", "Z");
        storage.insert_lead(&lead).await.unwrap();

        let now = Utc::now();
        let ttl = chrono::Duration::minutes(15);
        assert!(storage.try_lock_lead(lead.id, "run-1", now, ttl).await.unwrap());
        assert!(!storage.try_lock_lead(lead.id, "run-2", now, ttl).await.unwrap());

        // Expired locks can be taken over.
        let later = now + chrono::Duration::minutes(16);
        assert!(storage.try_lock_lead(lead.id, "run-2", later, ttl).await.unwrap());

        // commit by a stale owner fails, by the holder succeeds
        let err = storage.commit_lead(&lead, "run-1").await.unwrap_err();
        assert!(matches!(err, LeadflowError::Conflict(_)));
        storage.commit_lead(&lead, "run-2").await.expect("commit");
        assert!(storage.try_lock_lead(lead.id, "run-3", later, ttl).await.unwrap());
        storage.unlock_lead(lead.id, "run-3").await.unwrap();
        assert!(storage.try_lock_lead(lead.id, "run-4", later, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn config_documents_roundtrip_and_validate() {
        let storage = test_storage().await;
        let project = seeded_project(&storage).await;

        assert!(storage.get_global_config().await.unwrap().is_none());
        let global = GlobalConfig::with_defaults();
        storage.put_global_config(&global).await.unwrap();
        assert_eq!(storage.get_global_config().await.unwrap(), Some(global));

        let project_config = ProjectConfig {
            use_global_scheduling: false,
            scheduling: Some(SchedulingConfig {
                daily_email_limit: 5,
                ..Default::default()
            }),
            ..Default::default()
        };
        storage
            .put_project_config(project.id, &project_config)
            .await
            .unwrap();
        assert_eq!(
            storage.get_project_config(project.id).await.unwrap(),
            Some(project_config)
        );

        let invalid = GlobalConfig {
            scheduling: Some(SchedulingConfig {
                daily_email_limit: 0,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(storage.put_global_config(&invalid).await.is_err());
    }

    #[tokio::test]
    async fn malformed_config_document_is_rejected_on_read() {
        let storage = test_storage().await;
        storage
            .put_config_doc(GLOBAL_SCOPE, r#"{"scheduling": {"timezone": "Nowhere/Land"}}"#)
            .await
            .unwrap();
        let err = storage.get_global_config().await.unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn blacklist_moves_matching_leads() {
        let storage = test_storage().await;
        let project = seeded_project(&storage).await;
        let other = seeded_project(&storage).await;
        let lead = lead_for(&project, "d@w.com", "W");
        let other_lead = lead_for(&other, "d@w.com", "W");
        storage.insert_lead(&lead).await.unwrap();
        storage.insert_lead(&other_lead).await.unwrap();

        let moved = storage
            .add_to_blacklist(BlacklistScope::Project(project.id), "D@W.com", Some("asked"))
            .await
            .unwrap();
        assert_eq!(moved, 1);

        let found = storage.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(found.status, LeadStatus::Blacklisted);
        let untouched = storage.get_lead(other_lead.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, LeadStatus::New);

        assert!(storage.is_blacklisted(project.id, "d@w.com").await.unwrap());
        assert!(!storage.is_blacklisted(other.id, "d@w.com").await.unwrap());

        storage
            .add_to_blacklist(BlacklistScope::Global, "e@v.com", None)
            .await
            .unwrap();
        let emails = storage.blacklisted_emails(other.id).await.unwrap();
        assert!(emails.contains("e@v.com"));
        assert!(!emails.contains("d@w.com"));

        let entries = storage
            .list_blacklist(BlacklistScope::Project(project.id))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reason.as_deref(), Some("asked"));

        assert!(storage
            .remove_from_blacklist(BlacklistScope::Project(project.id), "d@w.com")
            .await
            .unwrap());
        assert!(!storage.is_blacklisted(project.id, "d@w.com").await.unwrap());
    }

    #[tokio::test]
    async fn send_slots_never_exceed_limit() {
        let storage = test_storage().await;
        let project = seeded_project(&storage).await;
        let day = "2026-03-02";

        assert_eq!(storage.reserve_send_slot(project.id, day, 2).await.unwrap(), Some(1));
        assert_eq!(storage.reserve_send_slot(project.id, day, 2).await.unwrap(), Some(2));
        assert_eq!(storage.reserve_send_slot(project.id, day, 2).await.unwrap(), None);
        assert_eq!(storage.sends_on_day(project.id, day).await.unwrap(), 2);

        storage.release_send_slot(project.id, day).await.unwrap();
        assert_eq!(storage.sends_on_day(project.id, day).await.unwrap(), 1);
        assert_eq!(storage.reserve_send_slot(project.id, day, 2).await.unwrap(), Some(2));

        // A new day starts from zero.
        assert_eq!(
            storage.reserve_send_slot(project.id, "2026-03-03", 2).await.unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn commit_delivery_rejects_duplicate_key() {
        let storage = test_storage().await;
        let project = seeded_project(&storage).await;
        let mut lead = lead_for(&project, "f@u.com", "U");
        storage.insert_lead(&lead).await.unwrap();

        let now = Utc::now();
        let ttl = chrono::Duration::minutes(15);
        assert!(storage.try_lock_lead(lead.id, "run", now, ttl).await.unwrap());

        lead.status = LeadStatus::Emailed;
        lead.last_contacted = Some(now);
        let record = DeliveryRecord {
            idempotency_key: "key-1",
            email_type: EmailType::Outreach,
            ordinal: 0,
            sent_at: now,
        };
        storage
            .commit_delivery(&lead, "run", &record)
            .await
            .expect("first delivery");
        assert!(storage.delivery_exists("key-1").await.unwrap());

        assert!(storage.try_lock_lead(lead.id, "run", now, ttl).await.unwrap());
        let err = storage
            .commit_delivery(&lead, "run", &record)
            .await
            .unwrap_err();
        assert!(matches!(err, LeadflowError::Conflict(_)));

        let found = storage.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(found.status, LeadStatus::Emailed);
    }

    #[tokio::test]
    async fn blacklist_during_lock_survives_commit() {
        let storage = test_storage().await;
        let project = seeded_project(&storage).await;
        let mut lead = lead_for(&project, "g@t.com", "T");
        storage.insert_lead(&lead).await.unwrap();

        let now = Utc::now();
        let ttl = chrono::Duration::minutes(15);
        assert!(storage.try_lock_lead(lead.id, "enrich:1", now, ttl).await.unwrap());
        storage
            .add_to_blacklist(BlacklistScope::Project(project.id), "g@t.com", None)
            .await
            .unwrap();

        lead.status = LeadStatus::Enriched;
        let written = storage.commit_lead(&lead, "enrich:1").await.unwrap();
        assert!(!written);
        let found = storage.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(found.status, LeadStatus::Blacklisted);
        // lock was released
        assert!(storage.try_lock_lead(lead.id, "other", now, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn delivery_to_blacklisted_lead_is_kept_without_overwrite() {
        let storage = test_storage().await;
        let project = seeded_project(&storage).await;
        let mut lead = lead_for(&project, "h@s.com", "S");
        storage.insert_lead(&lead).await.unwrap();

        let now = Utc::now();
        let ttl = chrono::Duration::minutes(15);
        assert!(storage.try_lock_lead(lead.id, "dispatch:1", now, ttl).await.unwrap());
        storage
            .add_to_blacklist(BlacklistScope::Global, "h@s.com", None)
            .await
            .unwrap();

        lead.status = LeadStatus::Emailed;
        let record = DeliveryRecord {
            idempotency_key: "key-2",
            email_type: EmailType::Outreach,
            ordinal: 0,
            sent_at: now,
        };
        let written = storage
            .commit_delivery(&lead, "dispatch:1", &record)
            .await
            .unwrap();
        assert!(!written);
        assert!(storage.delivery_exists("key-2").await.unwrap());
        let found = storage.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(found.status, LeadStatus::Blacklisted);
    }

    #[tokio::test]
    async fn delivery_key_can_be_recorded_alone() {
        let storage = test_storage().await;
        let project = seeded_project(&storage).await;
        let lead = lead_for(&project, "i@r.com", "R");
        storage.insert_lead(&lead).await.unwrap();

        let record = DeliveryRecord {
            idempotency_key: "key-3",
            email_type: EmailType::Outreach,
            ordinal: 0,
            sent_at: Utc::now(),
        };
        assert!(storage.record_delivery_key(&lead, &record).await.unwrap());
        assert!(!storage.record_delivery_key(&lead, &record).await.unwrap());
        assert!(storage.delivery_exists("key-3").await.unwrap());
        let found = storage.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(found.status, LeadStatus::New);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("lf_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        let project = seeded_project(&rw).await;
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert!(ro.get_project(project.id).await.unwrap().is_some());
        let result = ro.insert_project(&Project::new("another")).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
