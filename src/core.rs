/*
 * The platform-agnostic logic of the application: the binary shortcuts-file codec and
 * record mapping, shortcut identity, executable discovery, the match cascade, launch
 * target resolution, the import/export coordinator and the debounced write-back
 * scheduler. Collaborators (catalog, settings store, discovery, manual selection,
 * configuration) are reached through `*Operations` traits so hosts and tests can
 * substitute their own implementations.
 */
pub mod app_id;
pub mod catalog;
pub mod config;
pub mod exe_discovery;
pub mod kv_binary;
pub mod launch_target;
pub mod matcher;
pub mod path_utils;
pub mod reconcile;
pub mod shortcuts;
pub mod sync_state;
pub mod write_back;

// Re-export the codec
pub use kv_binary::{FormatError, KvTree, KvValue};

// Re-export shortcuts file items
pub use shortcuts::{ShortcutFileError, ShortcutRecord, read_shortcuts_file, write_shortcuts_file};

// Re-export catalog related items
pub use catalog::{
    ActionKind, CatalogError, CatalogOperations, CatalogRecord, CoreCatalog, LaunchAction,
};

// Re-export sync state related items
pub use sync_state::{
    CoreSettingsStore, IdentifierMapping, MemorySettingsStore, SettingsStoreOperations, SyncState,
};

// Re-export discovery related items
pub use exe_discovery::{CoreExecutableDiscovery, DiscoveryOutcome, ExecutableDiscoveryOperations};

pub use matcher::{MatchContext, MatchResult, MatchStep, exists_any_match, find_match};

pub use launch_target::{
    DeclineManualSelection, LaunchTarget, LaunchTargetChain, ManualSelectionOperations, SkipReason,
};

pub use reconcile::{ExportOutcome, ImportOutcome, Reconciler, SyncContext, SyncError};

pub use write_back::WriteBackScheduler;

// Re-export config related items
pub use config::{ConfigError, ConfigManagerOperations, CoreConfigManager, SyncConfig};
