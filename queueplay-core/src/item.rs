use std::{ any::Any, fmt, sync::Arc };

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::{ error::PlayerResult, metadata::ItemMeta };

/// Opaque asset produced by an [`ItemResolver`] and understood by the engine.
pub type Asset = Arc<dyn Any + Send + Sync>;

/// Result of resolving an item: its metadata plus the loaded asset.
#[derive(Clone)]
pub struct ResolvedAsset {
    pub meta: ItemMeta,
    pub asset: Asset,
}

impl fmt::Debug for ResolvedAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedAsset").field("meta", &self.meta).finish_non_exhaustive()
    }
}

/// A fresh engine-loadable handle, materialized from a cached asset.
#[derive(Clone)]
pub struct PlayableHandle {
    pub url: String,
    pub meta: ItemMeta,
    pub asset: Asset,
}

impl fmt::Debug for PlayableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayableHandle").field("url", &self.url).finish_non_exhaustive()
    }
}

/// Loads metadata and an asset for an item locator.
#[async_trait]
pub trait ItemResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> PlayerResult<ResolvedAsset>;
}

/// A single entry of the play queue.
///
/// Resolution is cached: once an item resolved successfully, further loads
/// only hand out new handles over the same asset. Failed resolutions are not
/// cached and may be retried.
pub struct PlayerItem {
    url: String,
    prefetched: Option<ItemMeta>,
    resolved: OnceCell<ResolvedAsset>,
}

impl PlayerItem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            prefetched: None,
            resolved: OnceCell::new(),
        }
    }

    /// Create an item whose metadata is already known (e.g. from a catalog).
    pub fn with_meta(url: impl Into<String>, meta: ItemMeta) -> Self {
        Self {
            prefetched: Some(meta),
            ..Self::new(url)
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.initialized()
    }

    /// Best metadata currently known: resolved fields win, prefetched ones fill the gaps.
    pub fn meta(&self) -> Option<ItemMeta> {
        match (self.resolved.get(), &self.prefetched) {
            (Some(resolved), Some(prefetched)) => {
                let mut meta = resolved.meta.clone();
                meta.duration = meta.duration.or(prefetched.duration);
                meta.title = meta.title.or_else(|| prefetched.title.clone());
                meta.album = meta.album.or_else(|| prefetched.album.clone());
                meta.artist = meta.artist.or_else(|| prefetched.artist.clone());
                meta.lyrics = meta.lyrics.or_else(|| prefetched.lyrics.clone());
                meta.artwork = meta.artwork.or_else(|| prefetched.artwork.clone());
                Some(meta)
            }
            (Some(resolved), None) => Some(resolved.meta.clone()),
            (None, prefetched) => prefetched.clone(),
        }
    }

    /// Resolve the item (once) and materialize a new playable handle.
    pub async fn load(&self, resolver: &dyn ItemResolver) -> PlayerResult<PlayableHandle> {
        let resolved = self
            .resolved
            .get_or_try_init(|| async {
                log::debug!("Resolving item {}", self.url);
                resolver.resolve(&self.url).await
            })
            .await?;

        Ok(PlayableHandle {
            url: self.url.clone(),
            meta: self.meta().unwrap_or_else(|| resolved.meta.clone()),
            asset: Arc::clone(&resolved.asset),
        })
    }
}

impl fmt::Debug for PlayerItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerItem")
            .field("url", &self.url)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
