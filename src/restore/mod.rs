pub(crate) mod db_restore;
pub(crate) mod logic;

use anyhow::Result;

use crate::config::Settings;

pub use db_restore::{DatabaseAdmin, PgAdmin, PsqlLoader};
pub use logic::{import_backup, ImportSpec};

/// Public entry point for the import process (`--import`).
pub async fn run_import_flow(settings: &Settings) -> Result<()> {
    let spec = ImportSpec::from(&settings.import);
    let loader = PsqlLoader::new(settings.tools.psql.clone(), settings.import.stop_on_error);

    import_backup(&spec, &PgAdmin, &loader).await?;
    Ok(())
}
