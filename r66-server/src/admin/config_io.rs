//! Configuration export and import
//!
//! Export writes one JSON array per selected table into the archive
//! directory, named `<host id>_<table>.json`. Import reads the same files
//! (relative paths resolve under the configuration directory). Each table is
//! loaded in its own transaction, so a table that fails to load keeps its
//! previous content.

use std::path::{Path, PathBuf};

use r66_common::ErrorCode;
use r66_common::packet::{ConfigImportRequest, ConfigSelection, ControlAnswer, ImportSource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{info, warn};

use crate::constants::*;
use crate::context::ServerContext;
use crate::db::aliases::AliasRecord;
use crate::db::hosts::HostRecord;
use crate::db::roles::RoleRecord;
use crate::db::rules::RuleRecord;
use crate::error::{R66Error, Result};

/// Write the selected tables into the archive directory
///
/// # Errors
///
/// Returns [`R66Error::IncorrectCommand`] for an empty selection, or the
/// database or I/O error that stopped the export.
pub async fn export_config(
    ctx: &ServerContext,
    selection: &ConfigSelection,
) -> Result<ControlAnswer> {
    if selection.is_empty() {
        return Err(R66Error::IncorrectCommand("nothing selected for export".into()));
    }
    let dir = ctx.config.arch_path();
    tokio::fs::create_dir_all(&dir).await?;
    let prefix = &ctx.config.host_id;
    let db = &ctx.db;

    let mut files = Vec::new();
    if selection.hosts {
        files.push(write_json(&dir, prefix, EXPORT_HOSTS_SUFFIX, &db.hosts.list().await?).await?);
    }
    if selection.rules {
        files.push(write_json(&dir, prefix, EXPORT_RULES_SUFFIX, &db.rules.list().await?).await?);
    }
    if selection.business {
        let rows = db.business.list().await?;
        files.push(write_json(&dir, prefix, EXPORT_BUSINESS_SUFFIX, &rows).await?);
    }
    if selection.aliases {
        let rows = db.aliases.list().await?;
        files.push(write_json(&dir, prefix, EXPORT_ALIASES_SUFFIX, &rows).await?);
    }
    if selection.roles {
        files.push(write_json(&dir, prefix, EXPORT_ROLES_SUFFIX, &db.roles.list().await?).await?);
    }

    let names: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
    info!(files = names.len(), dir = %dir.display(), "configuration exported");
    Ok(ControlAnswer::new(ErrorCode::CompleteOk, names.join(" "))
        .with_result(json!({ "files": names })))
}

async fn write_json<T: Serialize>(
    dir: &Path,
    prefix: &str,
    suffix: &str,
    rows: &[T],
) -> Result<PathBuf> {
    let path = dir.join(format!("{prefix}{suffix}"));
    let text = serde_json::to_string_pretty(rows)?;
    tokio::fs::write(&path, text).await?;
    Ok(path)
}

/// Outcome of each requested table, in request order
#[derive(Debug, Default)]
struct ImportReport {
    entries: Vec<(&'static str, bool)>,
}

impl ImportReport {
    fn record(&mut self, label: &'static str, outcome: Result<usize>) {
        match outcome {
            Ok(count) => {
                info!(table = label, rows = count, "configuration imported");
                self.entries.push((label, true));
            }
            Err(e) => {
                warn!(table = label, error = %e, "configuration import failed");
                self.entries.push((label, false));
            }
        }
    }

    /// `Host:OK Rule:KO ...`
    fn message(&self) -> String {
        self.entries
            .iter()
            .map(|(label, ok)| format!("{label}:{}", if *ok { "OK" } else { "KO" }))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Complete when every table loaded, warning when some did
    fn code(&self) -> ErrorCode {
        let loaded = self.entries.iter().filter(|(_, ok)| *ok).count();
        if loaded == self.entries.len() {
            ErrorCode::CompleteOk
        } else if loaded > 0 {
            ErrorCode::Warning
        } else {
            ErrorCode::IncorrectCommand
        }
    }
}

/// Load the requested tables from JSON files
///
/// # Errors
///
/// Returns [`R66Error::IncorrectCommand`] when no table is named. Failures
/// of single tables are reported in the answer instead.
pub async fn import_config(
    ctx: &ServerContext,
    request: &ConfigImportRequest,
) -> Result<ControlAnswer> {
    if request.is_empty() {
        return Err(R66Error::IncorrectCommand("nothing selected for import".into()));
    }
    let db = &ctx.db;
    let mut report = ImportReport::default();

    if let Some(source) = &request.hosts {
        let outcome = match read_json::<HostRecord>(ctx, source).await {
            Ok(rows) => db
                .hosts
                .replace_all(&rows, source.purge)
                .await
                .map(|()| rows.len())
                .map_err(R66Error::from),
            Err(e) => Err(e),
        };
        report.record("Host", outcome);
    }
    if let Some(source) = &request.rules {
        let outcome = match read_json::<RuleRecord>(ctx, source).await {
            Ok(rows) => db
                .rules
                .replace_all(&rows, source.purge)
                .await
                .map(|()| rows.len())
                .map_err(R66Error::from),
            Err(e) => Err(e),
        };
        report.record("Rule", outcome);
    }
    if let Some(source) = &request.business {
        let outcome = match read_json::<String>(ctx, source).await {
            Ok(rows) => db
                .business
                .replace_all(&rows, source.purge)
                .await
                .map(|()| rows.len())
                .map_err(R66Error::from),
            Err(e) => Err(e),
        };
        report.record("Business", outcome);
    }
    if let Some(source) = &request.aliases {
        let outcome = match read_json::<AliasRecord>(ctx, source).await {
            Ok(rows) => db
                .aliases
                .replace_all(&rows, source.purge)
                .await
                .map(|()| rows.len())
                .map_err(R66Error::from),
            Err(e) => Err(e),
        };
        report.record("Alias", outcome);
    }
    if let Some(source) = &request.roles {
        let outcome = match read_json::<RoleRecord>(ctx, source).await {
            Ok(rows) => db
                .roles
                .replace_all(&rows, source.purge)
                .await
                .map(|()| rows.len())
                .map_err(R66Error::from),
            Err(e) => Err(e),
        };
        report.record("Role", outcome);
    }

    Ok(ControlAnswer::new(report.code(), report.message()))
}

async fn read_json<T: DeserializeOwned>(
    ctx: &ServerContext,
    source: &ImportSource,
) -> Result<Vec<T>> {
    let path = Path::new(&source.path);
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        ctx.config.config_path().join(path)
    };
    let text = tokio::fs::read_to_string(&path).await?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::context::testing::create_test_context;
    use crate::db::roles::Role;
    use r66_common::packet::TransferMode;
    use std::sync::Arc;

    async fn context(dir: &Path) -> Arc<ServerContext> {
        create_test_context(ServerConfig {
            host_id: "hostA".into(),
            base_dir: dir.to_path_buf(),
            ..ServerConfig::default()
        })
        .await
    }

    async fn seed(ctx: &ServerContext) {
        let db = &ctx.db;
        db.hosts
            .upsert(&HostRecord {
                host_id: "hostB".into(),
                address: "10.0.0.2".into(),
                port: 6666,
                ssl: true,
                host_key: "ab".into(),
                admin: true,
                client: false,
                proxified: false,
                active: true,
            })
            .await
            .unwrap();
        db.rules
            .upsert(&RuleRecord {
                rule_id: "r1".into(),
                mode: TransferMode::SendDigest,
                host_ids: vec!["hostB".into()],
                recv_path: "in/r1".into(),
                send_path: String::new(),
                archive_path: String::new(),
                work_path: String::new(),
            })
            .await
            .unwrap();
        db.business.replace_all(&["hostB".to_string()], false).await.unwrap();
        db.aliases
            .replace_all(
                &[AliasRecord {
                    alias: "b".into(),
                    host_id: "hostB".into(),
                }],
                false,
            )
            .await
            .unwrap();
        db.roles
            .replace_all(
                &[RoleRecord {
                    host_id: "hostB".into(),
                    role: Role::ConfigAdmin,
                }],
                false,
            )
            .await
            .unwrap();
    }

    fn import_all(purge: bool) -> ConfigImportRequest {
        let source = |suffix: &str| {
            Some(ImportSource {
                path: format!("hostA{suffix}"),
                purge,
            })
        };
        ConfigImportRequest {
            hosts: source(EXPORT_HOSTS_SUFFIX),
            rules: source(EXPORT_RULES_SUFFIX),
            business: source(EXPORT_BUSINESS_SUFFIX),
            aliases: source(EXPORT_ALIASES_SUFFIX),
            roles: source(EXPORT_ROLES_SUFFIX),
        }
    }

    /// Move exported files where import looks for them
    fn stage_exports(ctx: &ServerContext) {
        std::fs::create_dir_all(ctx.config.config_path()).unwrap();
        for entry in std::fs::read_dir(ctx.config.arch_path()).unwrap() {
            let path = entry.unwrap().path();
            std::fs::copy(&path, ctx.config.config_path().join(path.file_name().unwrap())).unwrap();
        }
    }

    #[tokio::test]
    async fn test_export_then_import_reproduces_tables() {
        let dir = tempfile::tempdir().unwrap();
        let source = context(dir.path()).await;
        seed(&source).await;
        let answer = export_config(&source, &ConfigSelection::all()).await.unwrap();
        assert_eq!(answer.code, ErrorCode::CompleteOk);
        assert_eq!(answer.result.unwrap()["files"].as_array().unwrap().len(), 5);

        let target = context(dir.path()).await;
        stage_exports(&source);
        let answer = import_config(&target, &import_all(true)).await.unwrap();
        assert_eq!(answer.code, ErrorCode::CompleteOk);
        assert_eq!(answer.message, "Host:OK Rule:OK Business:OK Alias:OK Role:OK");

        assert_eq!(target.db.hosts.list().await.unwrap(), source.db.hosts.list().await.unwrap());
        assert_eq!(target.db.rules.list().await.unwrap(), source.db.rules.list().await.unwrap());
        assert_eq!(
            target.db.business.list().await.unwrap(),
            source.db.business.list().await.unwrap()
        );
        assert_eq!(
            target.db.aliases.list().await.unwrap(),
            source.db.aliases.list().await.unwrap()
        );
        assert_eq!(target.db.roles.list().await.unwrap(), source.db.roles.list().await.unwrap());
    }

    #[tokio::test]
    async fn test_reimport_without_purge_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        seed(&ctx).await;
        export_config(&ctx, &ConfigSelection::all()).await.unwrap();
        stage_exports(&ctx);
        let before = ctx.db.hosts.list().await.unwrap();

        let answer = import_config(&ctx, &import_all(false)).await.unwrap();
        assert_eq!(answer.code, ErrorCode::CompleteOk);
        assert_eq!(ctx.db.hosts.list().await.unwrap(), before);
        assert_eq!(ctx.db.rules.list().await.unwrap().len(), 1);
        assert_eq!(ctx.db.roles.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_import_is_warning_and_keeps_old_rows() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        seed(&ctx).await;
        export_config(&ctx, &ConfigSelection::all()).await.unwrap();
        stage_exports(&ctx);
        std::fs::write(ctx.config.config_path().join("broken_rules.json"), "not json").unwrap();

        let request = ConfigImportRequest {
            rules: Some(ImportSource {
                path: "broken_rules.json".into(),
                purge: true,
            }),
            ..import_all(true)
        };
        let answer = import_config(&ctx, &request).await.unwrap();
        assert_eq!(answer.code, ErrorCode::Warning);
        assert_eq!(answer.message, "Host:OK Rule:KO Business:OK Alias:OK Role:OK");
        assert_eq!(ctx.db.rules.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_requests_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        assert!(matches!(
            export_config(&ctx, &ConfigSelection::default()).await,
            Err(R66Error::IncorrectCommand(_))
        ));
        assert!(matches!(
            import_config(&ctx, &ConfigImportRequest::default()).await,
            Err(R66Error::IncorrectCommand(_))
        ));
    }
}
