use std::env;
use std::path::{Path, PathBuf};

use common::ScopeMode;
use library::Library;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let mode = match args.next().as_deref() {
        Some("single-user") => ScopeMode::SingleUser,
        Some("multi-user") => ScopeMode::MultiUser,
        _ => return Err("usage: reconcile_slugs <single-user|multi-user> [index_path]".into()),
    };
    let index_path = args
        .next()
        .or_else(|| env::var("INDEX_PATH").ok())
        .unwrap_or_else(|| "audiotracks.redb".to_string());
    let media_root = env::var("MEDIA_ROOT").unwrap_or_else(|_| "media".to_string());

    let db = Library::open_db(Path::new(&index_path))?;
    let library = Library::open_for_reconcile(PathBuf::from(media_root), db, mode)?;
    let report = library.reconcile_scope()?;

    for renamed in &report.renamed {
        println!("track {}: {} -> {}", renamed.track_id, renamed.from, renamed.to);
    }
    println!(
        "Reindexed {} tracks in {} mode, {} slugs renamed",
        report.tracks,
        mode,
        report.renamed.len()
    );
    Ok(())
}
