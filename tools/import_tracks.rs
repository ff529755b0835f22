use std::env;
use std::path::{Path, PathBuf};

use common::ScopeMode;
use library::{Library, Upload};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "oga", "opus", "wav", "m4a", "aiff"];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let source = args
        .next()
        .ok_or("usage: import_tracks <dir> [owner]")?;
    let owner = args.next().or_else(|| env::var("IMPORT_OWNER").ok());
    let media_root = env::var("MEDIA_ROOT").unwrap_or_else(|_| "media".to_string());
    let index_path = env::var("INDEX_PATH").unwrap_or_else(|_| "audiotracks.redb".to_string());
    let mode = ScopeMode::from_multi_user(env::var("MULTI_USER").map_or(false, |v| v == "1"));

    let library = Library::open(PathBuf::from(media_root), Path::new(&index_path), mode)?;

    let mut imported = 0usize;
    let mut failed = 0usize;
    for entry in WalkDir::new(&source)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() || !is_audio(entry.path()) {
            continue;
        }
        let upload = Upload {
            path: entry.path().to_path_buf(),
            filename: entry.file_name().to_string_lossy().into_owned(),
            content_type: None,
        };
        match library.upload_track(owner.as_deref(), &upload) {
            Ok(track) => {
                imported += 1;
                info!("{} -> {}", entry.path().display(), track.slug);
            }
            Err(err) => {
                failed += 1;
                warn!("Skipping {}: {}", entry.path().display(), err);
            }
        }
    }

    let stats = library.stats()?;
    println!(
        "Imported {} tracks ({} failed); library holds {} tracks from {} owners",
        imported, failed, stats.tracks, stats.owners
    );
    Ok(())
}

fn is_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
