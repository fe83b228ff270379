/// Constants used throughout the quotevault codebase
// Schema
pub const SCHEMA_VERSION: u32 = 3;

// Environment variable names
pub const QUOTEVAULT_LOG_VAR: &str = "QUOTEVAULT_LOG";
pub const QUOTEVAULT_DATA_DIR_VAR: &str = "QUOTEVAULT_DATA_DIR";
pub const QUOTEVAULT_MAX_CONCURRENT_VAR: &str = "QUOTEVAULT_MAX_CONCURRENT";
pub const QUOTEVAULT_MAX_BACKUPS_VAR: &str = "QUOTEVAULT_MAX_BACKUPS";
pub const QUOTEVAULT_QUOTA_BYTES_VAR: &str = "QUOTEVAULT_QUOTA_BYTES";
pub const QUOTEVAULT_FALLBACK_ONLY_VAR: &str = "QUOTEVAULT_FALLBACK_ONLY";

// On-disk layout
pub const PRIMARY_DIR_NAME: &str = "primary";
pub const FALLBACK_FILE_NAME: &str = "fallback.json";
pub const BACKUP_JOURNAL_NAME: &str = "backups.journal";
pub const CONFIG_FILE_NAME: &str = "config.json";

// Payload field names with fixed meaning
pub const TIMESTAMP_FIELD: &str = "timestamp";
pub const FALLBACK_FLAG_FIELD: &str = "isFallback";
pub const MIGRATED_FLAG_FIELD: &str = "migratedFromFallback";
