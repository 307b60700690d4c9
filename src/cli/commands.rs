//! CLI command handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use casegate::acl::{
    AccessManager, AccessSnapshot, AccessStorage, CaseAccessLevel, CaseId, MemoryAccessStorage,
    UserId,
};
use casegate::Config;

use super::output;

/// Store loaded from a snapshot file, plus the manager driving it.
pub struct Session {
    storage: Arc<MemoryAccessStorage>,
    manager: AccessManager,
    snapshot_path: PathBuf,
}

impl Session {
    /// Load the snapshot at `path`. A missing file starts an empty store.
    pub fn open(config: &Config, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let storage = if path.exists() {
            let snapshot = AccessSnapshot::read_from(path)
                .with_context(|| format!("failed to read snapshot {}", path.display()))?;
            MemoryAccessStorage::from_snapshot(snapshot)
                .with_context(|| format!("inconsistent snapshot {}", path.display()))?
        } else {
            tracing::info!("Snapshot {} not found, starting empty", path.display());
            MemoryAccessStorage::new()
        };

        let storage = Arc::new(storage);
        let shared: Arc<dyn AccessStorage> = storage.clone();
        Ok(Self {
            manager: AccessManager::new(shared, config.access.clone()),
            storage,
            snapshot_path: path.to_path_buf(),
        })
    }

    /// Write the store back to the snapshot file.
    pub fn save(&self) -> Result<()> {
        self.storage
            .snapshot()
            .write_to(&self.snapshot_path)
            .with_context(|| format!("failed to write snapshot {}", self.snapshot_path.display()))?;
        tracing::debug!("Wrote snapshot {}", self.snapshot_path.display());
        Ok(())
    }

    pub fn manager(&self) -> &AccessManager {
        &self.manager
    }
}

/// Run the resolve command.
pub async fn run_resolve(
    session: &Session,
    user_id: i64,
    case_id: Option<i64>,
    json_output: bool,
) -> Result<()> {
    let resolver = session.manager().resolver();
    match case_id {
        Some(case_id) => {
            let resolution = resolver.explain(UserId(user_id), CaseId(case_id)).await?;
            output::print_resolution(UserId(user_id), CaseId(case_id), &resolution, json_output)
        }
        None => {
            let access = resolver.resolve(UserId(user_id)).await?;
            output::print_access_map(UserId(user_id), &access, json_output)
        }
    }
}

/// Run the check command.
pub async fn run_check(
    session: &Session,
    user_id: i64,
    case_id: i64,
    require: Vec<String>,
    json_output: bool,
) -> Result<()> {
    let required = CaseAccessLevel::from_names(&require)?;
    let granted = session
        .manager()
        .check_case_access(UserId(user_id), CaseId(case_id), required)
        .await?;
    output::print_check(UserId(user_id), CaseId(case_id), required, granted, json_output)
}

/// Run the sync command.
pub async fn run_sync(session: &Session, user_id: Option<i64>, json_output: bool) -> Result<()> {
    match user_id {
        Some(user_id) => {
            let report = session.manager().synchronize(UserId(user_id)).await?;
            session.save()?;
            output::print_sync_report(&report, json_output)
        }
        None => {
            let summary = session.manager().synchronize_all().await?;
            session.save()?;
            output::print_sync_summary(&summary, json_output)
        }
    }
}

/// Run the rebuild command.
pub async fn run_rebuild(session: &Session, json_output: bool) -> Result<()> {
    let summary = session.manager().rebuild_all().await?;
    session.save()?;
    output::print_sync_summary(&summary, json_output)
}

/// Run the verify command.
///
/// Fails when any cached row disagrees with the resolver.
pub async fn run_verify(session: &Session, user_id: Option<i64>, json_output: bool) -> Result<()> {
    let materializer = session.manager().materializer();
    let drift = match user_id {
        Some(user_id) => {
            let drift = materializer.verify(UserId(user_id)).await?;
            let mut all = std::collections::BTreeMap::new();
            if !drift.is_empty() {
                all.insert(UserId(user_id), drift);
            }
            all
        }
        None => materializer.verify_all().await?,
    };

    output::print_drift(&drift, json_output)?;
    if !drift.is_empty() {
        anyhow::bail!("effective access cache is out of date for {} user(s)", drift.len());
    }
    Ok(())
}

/// Run the bootstrap command.
pub async fn run_bootstrap(session: &Session, json_output: bool) -> Result<()> {
    let report = session.manager().bootstrap().await?;
    session.save()?;
    output::print_bootstrap(&report, json_output)
}
