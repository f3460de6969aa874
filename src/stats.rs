//! Index inspection for the `cqa stats` command.

use chrono::DateTime;

use crate::config::Config;
use crate::index::Index;

/// CLI entry point for `cqa stats`.
pub async fn run_stats(config: &Config) -> anyhow::Result<()> {
    let index = Index::load(&config.index.path).await?;

    let built = DateTime::from_timestamp(index.built_at(), 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| index.built_at().to_string());

    println!("corpus-qa — Index Stats");
    println!("=======================");
    println!();
    println!("  Index:       {}", config.index.path.display());
    println!("  Built:       {}", built);
    println!("  Model:       {}", index.model());
    println!("  Metric:      {}", index.metric().as_str());
    println!("  Dims:        {}", index.dims());
    println!();
    println!("  Documents:   {}", index.document_count());
    println!("  Fragments:   {}", index.fragment_count());

    Ok(())
}
