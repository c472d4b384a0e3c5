use std::{ path::{ Path, PathBuf }, sync::Arc };

use anyhow::Context;
use async_trait::async_trait;
use lofty::{ file::{ AudioFile, TaggedFileExt }, probe::Probe, tag::{ Accessor, ItemKey } };

use crate::{
    error::{ PlayerError, PlayerResult },
    item::{ ItemResolver, ResolvedAsset },
    metadata::ItemMeta,
};

/// Resolves local audio files. The asset handed to the engine is the file path.
#[derive(Debug, Default, Clone)]
pub struct LocalFileResolver;

impl LocalFileResolver {
    pub fn new() -> Self {
        Self
    }

    fn path_of(url: &str) -> PathBuf {
        PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
    }

    /// Get tag metadata (title, artist, album, lyrics, artwork) and duration of a file
    fn read_item_meta(path: &Path) -> anyhow::Result<ItemMeta> {
        let tagged_file = Probe::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?
            .read()
            .with_context(|| format!("Failed to read tags of {}", path.display()))?;

        let mut meta = ItemMeta {
            duration: Some(tagged_file.properties().duration()),
            ..Default::default()
        };

        if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
            meta.title = tag.title().map(|s| s.to_string());
            meta.artist = tag.artist().map(|s| s.to_string());
            meta.album = tag.album().map(|s| s.to_string());
            meta.lyrics = tag.get_string(&ItemKey::Lyrics).map(|s| s.to_string());
            meta.artwork = tag.pictures().first().map(|p| Arc::new(p.data().to_vec()));
        }

        if meta.title.is_none() {
            meta.title = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.to_string());
        }

        log::info!("Metadata loaded: {:?} by {:?}", meta.title, meta.artist);
        Ok(meta)
    }
}

#[async_trait]
impl ItemResolver for LocalFileResolver {
    async fn resolve(&self, url: &str) -> PlayerResult<ResolvedAsset> {
        let path = Self::path_of(url);
        let url = url.to_string();

        let read = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || Self::read_item_meta(&path)).await
        };

        let meta = match read {
            Ok(Ok(meta)) => meta,
            Ok(Err(e)) => {
                log::warn!("Failed to read metadata: {:#}", e);
                return Err(PlayerError::ItemMetadataResolutionFailed(format!("{}: {:#}", url, e)));
            }
            Err(e) => {
                return Err(PlayerError::Internal(format!("metadata reader for {} panicked: {}", url, e)));
            }
        };

        Ok(ResolvedAsset { meta, asset: Arc::new(path) })
    }
}
