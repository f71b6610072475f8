//! Data directory and database initialization.

use console::style;

use crate::config::Settings;

/// Create the data directory, the object store layout, and the schema.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    std::fs::create_dir_all(&settings.data_dir)?;
    std::fs::create_dir_all(settings.objects_dir().join("incoming"))?;
    std::fs::create_dir_all(settings.objects_dir().join("processed"))?;

    let ctx = settings.create_db_context();
    ctx.init_schema().await?;

    println!(
        "{} Initialized finpipe data directory at {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    println!("  Database: {}", settings.database_path().display());
    println!("  Objects:  {}", settings.objects_dir().display());
    Ok(())
}
