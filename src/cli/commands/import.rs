//! Legacy cache import command.

use std::path::Path;
use std::sync::Arc;

use console::style;
use serde_json::{json, Value};

use crate::config::Settings;
use crate::models::{decode_stored_entry, CacheEntry, Credentials};
use crate::store::{keys, CacheStore, KeyValueStore, SqliteStore, CACHE_KEY_PREFIX};

/// Storage keys used for credentials by older releases.
const LEGACY_QUERY_ID: &str = "queryId";
const LEGACY_BEARER_TOKEN: &str = "bearerToken";

/// What a dump contains.
#[derive(Debug, Default)]
pub struct ImportPlan {
    /// Handle, normalized entry, and whether it was in a legacy shape.
    pub entries: Vec<(String, CacheEntry, bool)>,
    pub credentials: Credentials,
    /// Cache keys whose values could not be decoded.
    pub skipped: Vec<String>,
}

/// Sort a dump's keys into cache entries, credentials, and rejects.
/// Keys that are neither are ignored.
pub fn plan_import(dump: &Value) -> anyhow::Result<ImportPlan> {
    let Some(object) = dump.as_object() else {
        anyhow::bail!("Expected a JSON object of storage keys to values");
    };

    let mut plan = ImportPlan::default();
    for (key, value) in object {
        if let Some(handle) = key.strip_prefix(CACHE_KEY_PREFIX) {
            match decode_stored_entry(value) {
                Some(stored) if !handle.is_empty() => {
                    let legacy = stored.is_legacy();
                    plan.entries
                        .push((handle.to_string(), stored.into_entry(), legacy));
                }
                _ => plan.skipped.push(key.clone()),
            }
            continue;
        }

        let text = value.as_str().filter(|s| !s.is_empty()).map(str::to_string);
        match key.as_str() {
            LEGACY_QUERY_ID | keys::QUERY_ID => plan.credentials.query_id = text,
            LEGACY_BEARER_TOKEN | keys::BEARER_TOKEN => plan.credentials.bearer_token = text,
            keys::CSRF_TOKEN => plan.credentials.csrf_token = text,
            _ => {}
        }
    }

    plan.entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(plan)
}

/// Import a JSON dump of cached entries, normalizing legacy shapes.
pub async fn cmd_import(settings: &Settings, file: &Path, dry_run: bool) -> anyhow::Result<()> {
    let contents = tokio::fs::read_to_string(file).await?;
    let dump: Value = serde_json::from_str(&contents)?;
    let plan = plan_import(&dump)?;

    let legacy = plan.entries.iter().filter(|(_, _, l)| *l).count();
    println!(
        "{} {} entries ({} in legacy format), {} unreadable",
        style("→").cyan(),
        plan.entries.len(),
        legacy,
        plan.skipped.len()
    );
    for key in &plan.skipped {
        println!("  {} {}", style("skip").dim(), key);
    }

    if dry_run {
        println!("{} Dry run; nothing written", style("!").yellow());
        return Ok(());
    }

    settings.ensure_directories()?;
    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&settings.database_path())?);
    let cache = CacheStore::new(Arc::clone(&store));

    for (handle, entry, _) in &plan.entries {
        cache.put_entry(handle, entry).await;
    }

    let mut credential_count = 0;
    for (key, value) in [
        (keys::QUERY_ID, &plan.credentials.query_id),
        (keys::BEARER_TOKEN, &plan.credentials.bearer_token),
        (keys::CSRF_TOKEN, &plan.credentials.csrf_token),
    ] {
        if let Some(value) = value {
            store.set(key, &json!(value)).await?;
            credential_count += 1;
        }
    }

    println!(
        "{} Imported {} entries{}",
        style("✓").green(),
        plan.entries.len(),
        if credential_count > 0 {
            format!(" and {} credentials", credential_count)
        } else {
            String::new()
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_import_sorts_keys() {
        let dump = json!({
            "u_bob": {"value": "Chile", "timestamp": 1_700_000_000_000i64},
            "u_alice": {"version": 2, "value": {"country": "Japan"}, "written_at": 1_700_000_000_000i64},
            "u_broken": {"value": 7},
            "queryId": "Q",
            "bearerToken": "Bearer T",
            "rateLimitUntil": 0
        });

        let plan = plan_import(&dump).unwrap();

        let handles: Vec<&str> = plan.entries.iter().map(|(h, _, _)| h.as_str()).collect();
        assert_eq!(handles, vec!["alice", "bob"]);
        assert!(!plan.entries[0].2);
        assert!(plan.entries[1].2);
        assert_eq!(plan.entries[1].1.value.country.as_deref(), Some("Chile"));
        assert_eq!(plan.skipped, vec!["u_broken".to_string()]);
        assert_eq!(plan.credentials.query_id.as_deref(), Some("Q"));
        assert_eq!(plan.credentials.bearer_token.as_deref(), Some("Bearer T"));
        assert!(plan.credentials.csrf_token.is_none());
    }

    #[test]
    fn test_plan_import_rejects_non_object() {
        assert!(plan_import(&json!(["u_a"])).is_err());
    }

    #[tokio::test]
    async fn test_import_writes_normalized_entries() {
        let dir = tempfile::tempdir().unwrap();
        let dump_path = dir.path().join("dump.json");
        std::fs::write(
            &dump_path,
            r#"{"u_carol": {"country": "Peru", "timestamp": 1700000000000}, "queryId": "Q"}"#,
        )
        .unwrap();

        let settings = Settings {
            data_dir: dir.path().join("data"),
            database_filename: "test.db".to_string(),
        };
        cmd_import(&settings, &dump_path, false).await.unwrap();

        let store = SqliteStore::open(&settings.database_path()).unwrap();
        let raw = store.get("u_carol").await.unwrap().unwrap();
        assert_eq!(raw["version"], json!(2));
        assert_eq!(raw["value"]["country"], json!("Peru"));
        assert_eq!(
            store.get(keys::QUERY_ID).await.unwrap(),
            Some(json!("Q"))
        );
    }
}
