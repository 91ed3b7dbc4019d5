/// Application name, used for data and cache directories.
pub const APP_NAME: &str = "stratus";

/// Length of the truncated content hash used to identify synthesized programs.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Prefix marking program outputs that exist only so variables can be resolved.
pub const INTERNAL_KEY_PREFIX: &str = "__stratus";

/// Home item holding the record of the last successful deployment.
pub const DEPLOYMENT_RECORD_FILE: &str = "deployment.json";

/// Bucket name prefix used by object-storage homes.
pub const ASSETS_BUCKET_PREFIX: &str = "stratus-assets";

/// Engine program file written to the stage work directory.
pub const PROGRAM_FILE: &str = "Pulumi.yaml";

/// Stage used when none is configured.
pub const DEFAULT_STAGE: &str = "development";

pub const ENV_DATA_DIR: &str = "STRATUS_DATA_DIR";
pub const ENV_STAGE: &str = "STRATUS_STAGE";
pub const ENV_PARALLELISM: &str = "STRATUS_PARALLELISM";
pub const ENV_BACKEND_URL: &str = "STRATUS_BACKEND_URL";
