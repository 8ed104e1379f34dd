// src/pipeline/archive.rs

//! Full listing export.

use std::path::Path;

use crate::error::Result;
use crate::pipeline::run::prepare_current;
use crate::services::HttpSource;
use crate::storage::local::write_json_atomic;

/// Scrape up to `max_pages` listing pages and write every posting to `output`.
///
/// Returns the number of postings written.
pub async fn run_archive(source: &HttpSource, max_pages: usize, output: &Path) -> Result<usize> {
    log::info!("Archiving up to {} listing pages", max_pages);

    let items = prepare_current(source.fetch_pages(max_pages).await?);
    write_json_atomic(output, &items).await?;

    log::info!("Saved {} postings to {}", items.len(), output.display());
    Ok(items.len())
}
