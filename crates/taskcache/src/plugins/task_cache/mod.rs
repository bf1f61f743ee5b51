//! Task Scheduler cache plugin.
//!
//! Parses `\Microsoft\Windows NT\CurrentVersion\Schedule\TaskCache` in the
//! SOFTWARE hive. The key holds two collections keyed independently:
//!
//! - `Tree\<folder>\...\<task name>`: carries an `Id` value with the task identifier
//! - `Tasks\<identifier>`: carries a `DynamicInfo` value with registration/launch times
//!
//! For every task this emits a key record naming the task, plus one record
//! per recorded timestamp. The `Triggers` value is not parsed.

pub mod dynamic_info;
pub mod tree;

use crate::context::ParserContext;
use crate::error::TaskCacheError;
use crate::events::{timestamp_desc, EventRecord, RegistryKeyEvent, TaskCacheEvent};
use crate::plugins::PluginDescriptor;
use crate::time::filetime_to_iso;
use dynamic_info::{DynamicInfo, DYNAMIC_INFO_SIZE, DYNAMIC_INFO_VALUE_NAME};
use std::collections::BTreeMap;
use tracing::{debug, error};
use tree::{id_values, IdentifierMap, TaskId, DEFAULT_MAX_TREE_DEPTH};
use winreg::{HiveType, RegistryKey};

const TASKS_KEY_NAME: &str = "Tasks";
const TREE_KEY_NAME: &str = "Tree";

/// Correlates `Tasks` and `Tree` under a Task Cache key.
#[derive(Debug, Clone)]
pub struct TaskCachePlugin {
    max_tree_depth: usize,
}

impl Default for TaskCachePlugin {
    fn default() -> Self {
        TaskCachePlugin {
            max_tree_depth: DEFAULT_MAX_TREE_DEPTH,
        }
    }
}

/// One `Tasks` subkey, while its records are being produced.
struct TaskCacheEntry<'a> {
    task_name: &'a str,
    task_identifier: &'a str,
    key_path: &'a str,
    offset: u64,
}

impl TaskCacheEntry<'_> {
    fn event(
        &self,
        timestamp: u64,
        desc: &'static str,
        registry_type: Option<HiveType>,
    ) -> EventRecord {
        EventRecord::TaskCache(TaskCacheEvent {
            timestamp,
            date_time: filetime_to_iso(timestamp),
            timestamp_desc: desc,
            task_name: self.task_name.to_string(),
            task_identifier: self.task_identifier.to_string(),
            key_path: self.key_path.to_string(),
            offset: self.offset,
            registry_type,
        })
    }
}

impl TaskCachePlugin {
    pub const NAME: &'static str = "winreg_task_cache";

    pub const DESCRIPTOR: PluginDescriptor = PluginDescriptor {
        name: Self::NAME,
        description: "Parser for Task Scheduler cache Registry data",
        registry_type: HiveType::Software,
        key_paths: &["\\Microsoft\\Windows NT\\CurrentVersion\\Schedule\\TaskCache"],
        urls: &["https://code.google.com/p/winreg-kb/wiki/TaskSchedulerKeys"],
    };

    pub fn new() -> Self {
        Self::default()
    }

    /// Limit how deep the `Tree` walk descends below each top-level folder.
    pub fn with_max_tree_depth(mut self, max_tree_depth: usize) -> Self {
        self.max_tree_depth = max_tree_depth;
        self
    }

    /// Parse a Task Cache key, sending records and diagnostics to `ctx`.
    pub fn get_entries<K: RegistryKey>(
        &self,
        key: &K,
        registry_type: Option<HiveType>,
        ctx: &mut dyn ParserContext,
    ) {
        let (tasks_key, tree_key) = match (key.subkey(TASKS_KEY_NAME), key.subkey(TREE_KEY_NAME)) {
            (Some(tasks), Some(tree)) => (tasks, tree),
            _ => {
                ctx.report(Self::NAME, TaskCacheError::MissingContainer);
                return;
            }
        };

        let task_names = self.build_identifier_map(&tree_key, ctx);
        debug!(
            "task_cache: {} task names declared under {}",
            task_names.len(),
            tree_key.path()
        );

        for sub_key in tasks_key.subkeys() {
            self.process_task(key, &sub_key, &task_names, registry_type, ctx);
        }
    }

    /// Fold the `Id` values of every key below `Tree` into one map.
    fn build_identifier_map<K: RegistryKey>(
        &self,
        tree_key: &K,
        ctx: &mut dyn ParserContext,
    ) -> IdentifierMap {
        let mut task_names = IdentifierMap::new();
        for sub_key in tree_key.subkeys() {
            for (value_key, id_value) in id_values(sub_key, self.max_tree_depth) {
                match TaskId::from_value_data(&id_value.raw_data) {
                    Ok(id) => {
                        if let Some(previous) = task_names.insert(id, value_key.name()) {
                            debug!(
                                "task_cache: {} redeclared by {} (was {})",
                                id,
                                value_key.path(),
                                previous
                            );
                        }
                    }
                    Err(e) => ctx.report(Self::NAME, e),
                }
            }
        }
        task_names
    }

    fn process_task<K: RegistryKey>(
        &self,
        key: &K,
        sub_key: &K,
        task_names: &IdentifierMap,
        registry_type: Option<HiveType>,
        ctx: &mut dyn ParserContext,
    ) {
        let entry = TaskCacheEntry {
            task_name: task_names.name_or_identifier(sub_key.name()),
            task_identifier: sub_key.name(),
            key_path: sub_key.path(),
            offset: sub_key.offset(),
        };

        let mut values = BTreeMap::new();
        values.insert(
            format!("Task: {}", entry.task_name),
            format!("[ID: {}]", entry.task_identifier),
        );
        ctx.produce_event(
            Self::NAME,
            EventRecord::RegistryKey(RegistryKeyEvent::new(
                key.last_written_timestamp(),
                key.path(),
                key.offset(),
                registry_type,
                values,
            )),
        );

        let dynamic_info_value = match sub_key.value(DYNAMIC_INFO_VALUE_NAME) {
            Some(value) => value,
            None => return,
        };

        let size = dynamic_info_value.raw_data.len();
        if size != DYNAMIC_INFO_SIZE {
            ctx.report(Self::NAME, TaskCacheError::UnsupportedRecordSize { size });
            return;
        }

        let dynamic_info = match DynamicInfo::parse(&dynamic_info_value.raw_data) {
            Ok(info) => info,
            Err(e) => {
                error!("[{}] {} in {}", Self::NAME, e, sub_key.path());
                return;
            }
        };

        if dynamic_info.last_registered_time != 0 {
            ctx.produce_event(
                Self::NAME,
                entry.event(
                    dynamic_info.last_registered_time,
                    timestamp_desc::LAST_REGISTERED,
                    registry_type,
                ),
            );
        }

        if dynamic_info.launch_time != 0 {
            ctx.produce_event(
                Self::NAME,
                entry.event(dynamic_info.launch_time, timestamp_desc::LAUNCH, registry_type),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CollectingContext;
    use winreg::{KeyBuilder, MemoryKey};

    const TASK_CACHE_PATH: &str = "\\Microsoft\\Windows NT\\CurrentVersion\\Schedule";
    const GUID_A: &str = "{ABCDEF01-2345-6789-ABCD-EF0123456789}";
    const GUID_B: &str = "{11111111-2222-3333-4444-555555555555}";
    const CONTAINER_TIME: u64 = 0x01D9_0000_0000_0000;
    const CONTAINER_OFFSET: u64 = 0x2000;

    fn dynamic_info(last_registered_time: u64, launch_time: u64) -> Vec<u8> {
        DynamicInfo {
            version: 3,
            last_registered_time,
            launch_time,
            reserved: [0; 8],
        }
        .to_bytes()
        .to_vec()
    }

    fn container(tree: KeyBuilder, tasks: KeyBuilder) -> MemoryKey {
        KeyBuilder::new("TaskCache")
            .last_written(CONTAINER_TIME)
            .offset(CONTAINER_OFFSET)
            .subkey(tree)
            .subkey(tasks)
            .build_under(TASK_CACHE_PATH)
    }

    fn run(key: &MemoryKey) -> CollectingContext {
        let mut ctx = CollectingContext::new();
        TaskCachePlugin::new().get_entries(key, Some(HiveType::Software), &mut ctx);
        ctx
    }

    fn task_events(ctx: &CollectingContext) -> Vec<&TaskCacheEvent> {
        ctx.records()
            .filter_map(|r| match r {
                EventRecord::TaskCache(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn key_events(ctx: &CollectingContext) -> Vec<&RegistryKeyEvent> {
        ctx.records()
            .filter_map(|r| match r {
                EventRecord::RegistryKey(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_resolved_task_with_last_registered_only() {
        let key = container(
            KeyBuilder::new("Tree").subkey(
                KeyBuilder::new("Microsoft")
                    .subkey(KeyBuilder::new("MyTask").string_value("Id", GUID_A)),
            ),
            KeyBuilder::new("Tasks")
                .subkey(KeyBuilder::new(GUID_A).binary_value("DynamicInfo", dynamic_info(100, 0))),
        );
        let ctx = run(&key);
        assert!(ctx.diagnostics.is_empty());
        assert_eq!(ctx.events.len(), 2);
        assert!(ctx.events.iter().all(|e| e.plugin == "winreg_task_cache"));

        let generic = key_events(&ctx);
        assert_eq!(generic.len(), 1);
        assert_eq!(generic[0].timestamp, CONTAINER_TIME);
        assert_eq!(generic[0].offset, CONTAINER_OFFSET);
        assert_eq!(
            generic[0].key_path,
            "\\Microsoft\\Windows NT\\CurrentVersion\\Schedule\\TaskCache"
        );
        assert_eq!(generic[0].registry_type, Some(HiveType::Software));
        assert_eq!(
            generic[0].values.get("Task: MyTask").map(String::as_str),
            Some(format!("[ID: {}]", GUID_A).as_str())
        );

        let tasks = task_events(&ctx);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].timestamp, 100);
        assert_eq!(tasks[0].timestamp_desc, "Last registered time");
        assert_eq!(tasks[0].task_name, "MyTask");
        assert_eq!(tasks[0].task_identifier, GUID_A);
        assert!(tasks[0].key_path.ends_with(&format!("\\Tasks\\{}", GUID_A)));
    }

    #[test]
    fn test_both_timestamps_emitted_in_order() {
        let key = container(
            KeyBuilder::new("Tree").subkey(KeyBuilder::new("Backup").string_value("Id", GUID_A)),
            KeyBuilder::new("Tasks")
                .subkey(KeyBuilder::new(GUID_A).binary_value("DynamicInfo", dynamic_info(100, 200))),
        );
        let ctx = run(&key);
        let tasks = task_events(&ctx);
        assert_eq!(tasks.len(), 2);
        assert_eq!((tasks[0].timestamp_desc, tasks[0].timestamp), ("Last registered time", 100));
        assert_eq!((tasks[1].timestamp_desc, tasks[1].timestamp), ("Launch time", 200));
        assert!(matches!(ctx.events[0].record, EventRecord::RegistryKey(_)));
    }

    #[test]
    fn test_zero_timestamps_not_emitted() {
        let key = container(
            KeyBuilder::new("Tree"),
            KeyBuilder::new("Tasks")
                .subkey(KeyBuilder::new(GUID_A).binary_value("DynamicInfo", dynamic_info(0, 0)))
                .subkey(KeyBuilder::new(GUID_B).binary_value("DynamicInfo", dynamic_info(0, 7))),
        );
        let ctx = run(&key);
        let tasks = task_events(&ctx);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].timestamp_desc, "Launch time");
        assert_eq!(tasks[0].task_identifier, GUID_B);
        assert_eq!(key_events(&ctx).len(), 2);
    }

    #[test]
    fn test_unresolved_task_uses_identifier_as_name() {
        let key = container(
            KeyBuilder::new("Tree").subkey(KeyBuilder::new("Other").string_value("Id", GUID_B)),
            KeyBuilder::new("Tasks")
                .subkey(KeyBuilder::new(GUID_A).binary_value("DynamicInfo", dynamic_info(5, 0))),
        );
        let ctx = run(&key);
        let generic = key_events(&ctx);
        assert!(generic[0].values.contains_key(&format!("Task: {}", GUID_A)));
        assert_eq!(task_events(&ctx)[0].task_name, GUID_A);
    }

    #[test]
    fn test_missing_tasks_or_tree() {
        for key in [
            KeyBuilder::new("TaskCache").subkey(KeyBuilder::new("Tree")).build(),
            KeyBuilder::new("TaskCache").subkey(KeyBuilder::new("Tasks")).build(),
            KeyBuilder::new("TaskCache").build(),
        ] {
            let ctx = run(&key);
            assert!(ctx.events.is_empty());
            assert_eq!(ctx.diagnostics.len(), 1);
            assert_eq!(ctx.diagnostics[0].error, TaskCacheError::MissingContainer);
        }
    }

    #[test]
    fn test_wrong_dynamic_info_size() {
        let key = container(
            KeyBuilder::new("Tree"),
            KeyBuilder::new("Tasks")
                .subkey(KeyBuilder::new(GUID_A).binary_value("DynamicInfo", vec![1u8; 30]))
                .subkey(KeyBuilder::new(GUID_B).binary_value("DynamicInfo", dynamic_info(9, 0))),
        );
        let ctx = run(&key);
        assert_eq!(
            ctx.diagnostics.iter().map(|d| d.error.clone()).collect::<Vec<_>>(),
            vec![TaskCacheError::UnsupportedRecordSize { size: 30 }]
        );
        // Both tasks still get their key record; only the valid one has a timestamp.
        assert_eq!(key_events(&ctx).len(), 2);
        let tasks = task_events(&ctx);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_identifier, GUID_B);
    }

    #[test]
    fn test_task_without_dynamic_info() {
        let key = container(
            KeyBuilder::new("Tree"),
            KeyBuilder::new("Tasks").subkey(KeyBuilder::new(GUID_A).string_value("Path", "\\x")),
        );
        let ctx = run(&key);
        assert!(ctx.diagnostics.is_empty());
        assert_eq!(ctx.events.len(), 1);
        assert_eq!(key_events(&ctx).len(), 1);
    }

    #[test]
    fn test_bad_id_sizes_are_reported_and_skipped() {
        let key = container(
            KeyBuilder::new("Tree")
                .subkey(KeyBuilder::new("Short").binary_value("Id", vec![0u8; 10]))
                .subkey(KeyBuilder::new("Good").string_value("Id", GUID_A)),
            KeyBuilder::new("Tasks")
                .subkey(KeyBuilder::new(GUID_A).binary_value("DynamicInfo", dynamic_info(1, 0))),
        );
        let ctx = run(&key);
        assert_eq!(ctx.diagnostics.len(), 1);
        assert_eq!(
            ctx.diagnostics[0].error,
            TaskCacheError::UnsupportedIdSize { size: 10 }
        );
        assert_eq!(task_events(&ctx)[0].task_name, "Good");
    }

    #[test]
    fn test_last_tree_declaration_wins() {
        let key = container(
            KeyBuilder::new("Tree")
                .subkey(KeyBuilder::new("First").string_value("Id", GUID_A))
                .subkey(KeyBuilder::new("Second").string_value("Id", GUID_A)),
            KeyBuilder::new("Tasks")
                .subkey(KeyBuilder::new(GUID_A).binary_value("DynamicInfo", dynamic_info(1, 0))),
        );
        let ctx = run(&key);
        assert_eq!(task_events(&ctx)[0].task_name, "Second");
    }

    #[test]
    fn test_tree_root_id_is_ignored() {
        // Only keys below Tree's children are walked, never Tree itself.
        let key = container(
            KeyBuilder::new("Tree").string_value("Id", GUID_A),
            KeyBuilder::new("Tasks")
                .subkey(KeyBuilder::new(GUID_A).binary_value("DynamicInfo", dynamic_info(1, 0))),
        );
        let ctx = run(&key);
        assert_eq!(task_events(&ctx)[0].task_name, GUID_A);
    }

    #[test]
    fn test_depth_limit_applies_below_each_folder() {
        let deep = KeyBuilder::new("Deep").string_value("Id", GUID_A);
        let key = container(
            KeyBuilder::new("Tree").subkey(KeyBuilder::new("Folder").subkey(deep)),
            KeyBuilder::new("Tasks")
                .subkey(KeyBuilder::new(GUID_A).binary_value("DynamicInfo", dynamic_info(1, 0))),
        );
        let mut ctx = CollectingContext::new();
        TaskCachePlugin::new()
            .with_max_tree_depth(0)
            .get_entries(&key, None, &mut ctx);
        assert_eq!(task_events(&ctx)[0].task_name, GUID_A);

        let ctx = run(&key);
        assert_eq!(task_events(&ctx)[0].task_name, "Deep");
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let key = container(
            KeyBuilder::new("Tree")
                .subkey(KeyBuilder::new("A").string_value("Id", GUID_A))
                .subkey(KeyBuilder::new("B").string_value("Id", GUID_B)),
            KeyBuilder::new("Tasks")
                .subkey(KeyBuilder::new(GUID_A).binary_value("DynamicInfo", dynamic_info(1, 2)))
                .subkey(KeyBuilder::new(GUID_B).binary_value("DynamicInfo", dynamic_info(3, 4))),
        );
        assert_eq!(run(&key).events, run(&key).events);
    }
}
