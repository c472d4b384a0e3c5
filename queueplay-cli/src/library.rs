use std::{ fs, io, path::{ Path, PathBuf } };

const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a", "aac"];

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Supported audio files directly inside `dir`, sorted by name.
pub fn audio_files_in(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_supported(path))
        .collect();

    files.sort_by_key(|path| {
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_lowercase()
    });
    Ok(files)
}

/// Turn command line arguments into queue locators. Directories expand to
/// the audio files they contain; anything else is taken as given.
pub fn expand(args: &[String]) -> Vec<String> {
    let mut urls = Vec::new();
    for arg in args {
        let path = Path::new(arg);
        if path.is_dir() {
            match audio_files_in(path) {
                Ok(files) => {
                    log::info!("Adding {} files from {}", files.len(), path.display());
                    urls.extend(files.into_iter().map(|f| f.to_string_lossy().into_owned()));
                }
                Err(e) => log::warn!("Cannot read directory {}: {}", path.display(), e),
            }
        } else {
            urls.push(arg.clone());
        }
    }
    urls
}
