//! Running plugins over hive inputs.
//!
//! Each input is opened, classified and scanned with its own
//! [`CollectingContext`]; inputs share nothing, so several are scanned in
//! parallel with rayon.

use crate::config::ScanConfig;
use crate::context::{CollectingContext, Diagnostic, ParserContext};
use crate::events::EventEnvelope;
use crate::plugins::task_cache::TaskCachePlugin;
use crate::plugins::{PluginDescriptor, PLUGINS};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use winreg::{HiveFile, HiveSnapshot, HiveType, RegistryKey, RegistryResult};

/// How an input file is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// A regf hive file.
    Regf,
    /// A JSON [`HiveSnapshot`].
    Snapshot,
}

/// Everything produced for one input.
#[derive(Debug)]
pub struct ScanOutcome {
    pub source: PathBuf,
    pub registry_type: HiveType,
    pub events: Vec<EventEnvelope>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Open `path` and run every applicable plugin over it.
pub fn scan_path(path: &Path, kind: InputKind, config: &ScanConfig) -> RegistryResult<ScanOutcome> {
    let mut ctx = CollectingContext::new();
    let registry_type = match kind {
        InputKind::Regf => {
            let hive = HiveFile::open(path)?;
            if hive.base_block().is_dirty() {
                info!(
                    "{}: hive is dirty, transaction logs are not applied",
                    path.display()
                );
            }
            let registry_type = config.registry_type.unwrap_or_else(|| hive.hive_type());
            scan_root(&hive.root_key()?, registry_type, config, &mut ctx);
            registry_type
        }
        InputKind::Snapshot => {
            let snapshot = HiveSnapshot::load(path)?;
            let registry_type = config
                .registry_type
                .or(snapshot.hive_type)
                .unwrap_or_else(|| {
                    let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
                    HiveType::from_hive_name(name.as_deref().unwrap_or_default())
                });
            scan_root(&snapshot.root_key(), registry_type, config, &mut ctx);
            registry_type
        }
    };

    info!(
        "{}: {} hive, {} records, {} diagnostics",
        path.display(),
        registry_type,
        ctx.events.len(),
        ctx.diagnostics.len()
    );

    Ok(ScanOutcome {
        source: path.to_path_buf(),
        registry_type,
        events: ctx.events,
        diagnostics: ctx.diagnostics,
    })
}

/// Scan several inputs in parallel. Results keep the input order.
pub fn scan_all(
    paths: &[PathBuf],
    kind: InputKind,
    config: &ScanConfig,
) -> Vec<(PathBuf, RegistryResult<ScanOutcome>)> {
    paths
        .par_iter()
        .map(|path| (path.clone(), scan_path(path, kind, config)))
        .collect()
}

/// Route the hive's keys to the plugins that registered for them.
///
/// A configured `registry_type` forces every plugin to run whatever the hive
/// looks like; a configured `key_path` replaces the registered paths.
pub fn scan_root<K: RegistryKey>(
    root: &K,
    registry_type: HiveType,
    config: &ScanConfig,
    ctx: &mut dyn ParserContext,
) {
    let forced = config.registry_type.is_some();
    for descriptor in PLUGINS {
        match &config.key_path {
            Some(key_path) => {
                if forced || descriptor.registry_type == registry_type {
                    scan_key(root, key_path, descriptor, registry_type, config, ctx);
                } else {
                    info!(
                        "[{}] skipping {} hive, plugin expects {}",
                        descriptor.name, registry_type, descriptor.registry_type
                    );
                }
            }
            None => {
                for key_path in descriptor.key_paths {
                    if forced || descriptor.applies_to(key_path, registry_type) {
                        scan_key(root, key_path, descriptor, registry_type, config, ctx);
                    } else {
                        info!(
                            "[{}] skipping {} hive, plugin expects {}",
                            descriptor.name, registry_type, descriptor.registry_type
                        );
                    }
                }
            }
        }
    }
}

fn scan_key<K: RegistryKey>(
    root: &K,
    key_path: &str,
    descriptor: &PluginDescriptor,
    registry_type: HiveType,
    config: &ScanConfig,
    ctx: &mut dyn ParserContext,
) {
    let key = match root.open_path(key_path) {
        Some(key) => key,
        None => {
            info!("[{}] key {} not present", descriptor.name, key_path);
            return;
        }
    };
    match descriptor.name {
        TaskCachePlugin::NAME => TaskCachePlugin::new()
            .with_max_tree_depth(config.max_tree_depth)
            .get_entries(&key, Some(registry_type), ctx),
        other => debug!("no parser for plugin {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskCacheError;
    use crate::events::EventRecord;
    use crate::plugins::task_cache::dynamic_info::DynamicInfo;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use winreg::hive::HBASE_BLOCK_SIZE;
    use winreg::key::encode_utf16le_nul;
    use winreg::reg_types;
    use winreg::test_support::HiveBuilder;
    use winreg::KeyBuilder;

    const GUID_A: &str = "{ABCDEF01-2345-6789-ABCD-EF0123456789}";

    fn software_root() -> winreg::MemoryKey {
        let info = DynamicInfo {
            version: 3,
            last_registered_time: 100,
            launch_time: 200,
            reserved: [0; 8],
        };
        let task_cache = KeyBuilder::new("TaskCache")
            .subkey(
                KeyBuilder::new("Tree")
                    .subkey(KeyBuilder::new("Updater").string_value("Id", GUID_A)),
            )
            .subkey(
                KeyBuilder::new("Tasks")
                    .subkey(KeyBuilder::new(GUID_A).binary_value("DynamicInfo", info.to_bytes())),
            );
        KeyBuilder::new("ROOT")
            .subkey(
                KeyBuilder::new("Microsoft").subkey(
                    KeyBuilder::new("Windows NT").subkey(
                        KeyBuilder::new("CurrentVersion")
                            .subkey(KeyBuilder::new("Schedule").subkey(task_cache)),
                    ),
                ),
            )
            .build()
    }

    #[test]
    fn test_scan_root_finds_registered_path() {
        let mut ctx = CollectingContext::new();
        scan_root(&software_root(), HiveType::Software, &ScanConfig::default(), &mut ctx);
        assert_eq!(ctx.events.len(), 3);
        assert!(ctx.diagnostics.is_empty());
    }

    #[test]
    fn test_scan_root_skips_other_hive_types() {
        let mut ctx = CollectingContext::new();
        scan_root(&software_root(), HiveType::System, &ScanConfig::default(), &mut ctx);
        assert!(ctx.events.is_empty());

        let config = ScanConfig {
            registry_type: Some(HiveType::System),
            ..ScanConfig::default()
        };
        scan_root(&software_root(), HiveType::System, &config, &mut ctx);
        assert_eq!(ctx.events.len(), 3);
    }

    #[test]
    fn test_scan_root_key_path_override() {
        let config = ScanConfig {
            key_path: Some("Microsoft\\Windows NT\\CurrentVersion".to_string()),
            ..ScanConfig::default()
        };
        let mut ctx = CollectingContext::new();
        scan_root(&software_root(), HiveType::Software, &config, &mut ctx);
        assert!(ctx.events.is_empty());
        assert_eq!(ctx.diagnostics.len(), 1);
        assert_eq!(ctx.diagnostics[0].error, TaskCacheError::MissingContainer);
    }

    #[test]
    fn test_scan_root_key_path_override_checks_hive_type() {
        let config = ScanConfig {
            key_path: Some("Microsoft\\Windows NT\\CurrentVersion\\Schedule\\TaskCache".to_string()),
            ..ScanConfig::default()
        };
        let mut ctx = CollectingContext::new();
        scan_root(&software_root(), HiveType::Ntuser, &config, &mut ctx);
        assert!(ctx.events.is_empty());
        scan_root(&software_root(), HiveType::Software, &config, &mut ctx);
        assert_eq!(ctx.events.len(), 3);
    }

    #[test]
    fn test_scan_root_missing_key_is_quiet() {
        let root = KeyBuilder::new("ROOT").build();
        let mut ctx = CollectingContext::new();
        scan_root(&root, HiveType::Software, &ScanConfig::default(), &mut ctx);
        assert!(ctx.events.is_empty());
        assert!(ctx.diagnostics.is_empty());
    }

    fn write_snapshot(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const SNAPSHOT: &str = r#"{
        "hive_type": "SOFTWARE",
        "root": { "name": "ROOT", "subkeys": [
            { "name": "Microsoft", "subkeys": [
                { "name": "Windows NT", "subkeys": [
                    { "name": "CurrentVersion", "subkeys": [
                        { "name": "Schedule", "subkeys": [
                            { "name": "TaskCache", "last_written": 7, "subkeys": [
                                { "name": "Tree", "subkeys": [
                                    { "name": "Updater", "values": [
                                        { "name": "Id", "string": "{ABCDEF01-2345-6789-ABCD-EF0123456789}" }
                                    ] }
                                ] },
                                { "name": "Tasks", "subkeys": [
                                    { "name": "{ABCDEF01-2345-6789-ABCD-EF0123456789}", "values": [
                                        { "name": "DynamicInfo", "data": [
                                            3, 0, 0, 0,
                                            100, 0, 0, 0, 0, 0, 0, 0,
                                            0, 0, 0, 0, 0, 0, 0, 0,
                                            0, 0, 0, 0, 0, 0, 0, 0
                                        ] }
                                    ] }
                                ] }
                            ] }
                        ] }
                    ] }
                ] }
            ] }
        ] }
    }"#;

    #[test]
    fn test_scan_snapshot_file() {
        let file = write_snapshot(SNAPSHOT);
        let outcome = scan_path(file.path(), InputKind::Snapshot, &ScanConfig::default()).unwrap();
        assert_eq!(outcome.registry_type, HiveType::Software);
        assert_eq!(outcome.events.len(), 2);
        match &outcome.events[1].record {
            EventRecord::TaskCache(e) => {
                assert_eq!(e.task_name, "Updater");
                assert_eq!(e.timestamp, 100);
                assert_eq!(e.timestamp_desc, "Last registered time");
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_scan_all_keeps_order_and_errors() {
        let good = write_snapshot(SNAPSHOT);
        let paths = vec![
            PathBuf::from("/nonexistent/SOFTWARE.json"),
            good.path().to_path_buf(),
        ];
        let results = scan_all(&paths, InputKind::Snapshot, &ScanConfig::default());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, paths[0]);
        assert!(results[0].1.is_err());
        assert_eq!(results[1].1.as_ref().unwrap().events.len(), 2);
    }

    #[test]
    fn test_scan_regf_rejects_non_hive() {
        let file = write_snapshot("this is not a hive");
        assert!(scan_path(file.path(), InputKind::Regf, &ScanConfig::default()).is_err());
    }

    /// `\Microsoft\Windows NT\CurrentVersion\Schedule\TaskCache` with one
    /// named task. Returns the image and the TaskCache cell offset.
    fn build_task_cache_hive(file_name: &str) -> (Vec<u8>, u32) {
        let info = DynamicInfo {
            version: 3,
            last_registered_time: 0x01D9_1234_5678_9ABC,
            launch_time: 0,
            reserved: [0; 8],
        };
        let mut h = HiveBuilder::new();
        let id = h.value("Id", reg_types::REG_SZ, &encode_utf16le_nul(GUID_A));
        let my_task = h.key("MyTask", 0, 0, &[], &[id]);
        let tree = h.key("Tree", 0, 0, &[my_task], &[]);
        let dynamic_info = h.value("DynamicInfo", reg_types::REG_BINARY, &info.to_bytes());
        let task = h.key(GUID_A, 0, 0, &[], &[dynamic_info]);
        let tasks = h.key("Tasks", 0, 0, &[task], &[]);
        let task_cache = h.key("TaskCache", 0, 0x01D9_0000_0000_0000, &[tree, tasks], &[]);
        let schedule = h.key("Schedule", 0, 0, &[task_cache], &[]);
        let current_version = h.key("CurrentVersion", 0, 0, &[schedule], &[]);
        let windows_nt = h.key("Windows NT", 0, 0, &[current_version], &[]);
        let microsoft = h.key("Microsoft", 0, 0, &[windows_nt], &[]);
        let root = h.root("ROOT", &[microsoft], &[]);
        (h.finish(root, file_name), task_cache)
    }

    fn write_hive(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_scan_regf_hive() {
        let (bytes, task_cache) = build_task_cache_hive("\\SystemRoot\\System32\\Config\\SOFTWARE");
        let file = write_hive(&bytes);
        let outcome = scan_path(file.path(), InputKind::Regf, &ScanConfig::default()).unwrap();
        assert_eq!(outcome.registry_type, HiveType::Software);
        assert!(outcome.diagnostics.is_empty());
        assert_eq!(outcome.events.len(), 2);

        match &outcome.events[0].record {
            EventRecord::RegistryKey(e) => {
                assert_eq!(
                    e.key_path,
                    "\\Microsoft\\Windows NT\\CurrentVersion\\Schedule\\TaskCache"
                );
                assert_eq!(e.offset, (HBASE_BLOCK_SIZE as u64) + task_cache as u64);
                assert_eq!(e.timestamp, 0x01D9_0000_0000_0000);
                assert_eq!(e.registry_type, Some(HiveType::Software));
                assert_eq!(
                    e.values.get("Task: MyTask").map(String::as_str),
                    Some("[ID: {ABCDEF01-2345-6789-ABCD-EF0123456789}]")
                );
            }
            other => panic!("unexpected record {:?}", other),
        }
        match &outcome.events[1].record {
            EventRecord::TaskCache(e) => {
                assert_eq!(e.task_name, "MyTask");
                assert_eq!(e.task_identifier, GUID_A);
                assert_eq!(e.timestamp, 0x01D9_1234_5678_9ABC);
                assert_eq!(e.timestamp_desc, "Last registered time");
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_scan_regf_other_hive_type_is_skipped() {
        let (bytes, _) = build_task_cache_hive("\\SystemRoot\\System32\\Config\\SYSTEM");
        let file = write_hive(&bytes);
        let outcome = scan_path(file.path(), InputKind::Regf, &ScanConfig::default()).unwrap();
        assert_eq!(outcome.registry_type, HiveType::System);
        assert!(outcome.events.is_empty());

        let config = ScanConfig {
            registry_type: Some(HiveType::Software),
            ..ScanConfig::default()
        };
        let outcome = scan_path(file.path(), InputKind::Regf, &config).unwrap();
        assert_eq!(outcome.events.len(), 2);
    }
}
