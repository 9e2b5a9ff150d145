pub mod quota;
pub mod run;
pub mod seed;

pub use quota::{StageQuotaStatus, apply_quota_command, quota_status};
pub use run::{InitialSeed, run_pipeline, select_stages};
pub use seed::seed_file;
