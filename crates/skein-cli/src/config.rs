//! CLI-level configuration resolution.

use anyhow::Result;

use skein_db::config::DbConfig;

/// Resolved configuration for a single CLI invocation.
pub struct SkeinConfig {
    pub db_config: DbConfig,
}

impl SkeinConfig {
    /// Resolve configuration: an explicit `--database-url` flag wins over
    /// `SKEIN_DATABASE_URL`, which wins over the compiled-in default.
    pub fn resolve(cli_database_url: Option<&str>) -> Result<Self> {
        let db_config = match cli_database_url {
            Some(url) => DbConfig::new(url.to_string()),
            None => DbConfig::from_env(),
        };
        Ok(Self { db_config })
    }
}
