//! Registry plugins.
//!
//! Each plugin declares the hive type and key paths it understands so the
//! scanner can route keys to it.

pub mod task_cache;

use winreg::HiveType;

/// What a plugin applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub registry_type: HiveType,
    /// Key paths relative to the hive root, e.g. `\Microsoft\...`.
    pub key_paths: &'static [&'static str],
    pub urls: &'static [&'static str],
}

impl PluginDescriptor {
    /// Whether the plugin handles the key at `key_path` in a hive of
    /// `registry_type`. Paths compare case-insensitively.
    pub fn applies_to(&self, key_path: &str, registry_type: HiveType) -> bool {
        if registry_type != self.registry_type {
            return false;
        }
        let wanted = normalize_key_path(key_path);
        self.key_paths
            .iter()
            .any(|p| normalize_key_path(p).eq_ignore_ascii_case(&wanted))
    }
}

/// Every registered plugin.
pub static PLUGINS: &[PluginDescriptor] = &[task_cache::TaskCachePlugin::DESCRIPTOR];

pub fn find_plugin(name: &str) -> Option<&'static PluginDescriptor> {
    PLUGINS.iter().find(|p| p.name == name)
}

/// `Microsoft\Foo\` and `\Microsoft\Foo` both become `\Microsoft\Foo`.
fn normalize_key_path(path: &str) -> String {
    format!("\\{}", path.trim_matches('\\'))
}
