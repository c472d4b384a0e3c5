use std::{ fmt::Display, sync::Arc, time::Duration };

/// Metadata resolved for a queue item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemMeta {
    /// Item duration (if known)
    pub duration: Option<Duration>,
    /// Track title (if any)
    pub title: Option<String>,
    /// Album of the track (if any)
    pub album: Option<String>,
    /// Track artist (if any, multiple artists separated by semicolon)
    pub artist: Option<String>,
    /// Unsynchronised lyrics (if any)
    pub lyrics: Option<String>,
    /// Encoded artwork image bytes (if any)
    pub artwork: Option<Arc<Vec<u8>>>,
}

impl ItemMeta {
    pub fn duration_display(&self) -> String {
        display_time(self.duration.unwrap_or_default())
    }
}

impl Display for ItemMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let title = self.title.as_deref().unwrap_or("Unknown Title");
        let artist = self.artist.as_deref().unwrap_or("Unknown Artist");
        let album = self.album.as_deref().unwrap_or("Unknown Album");

        writeln!(f, "Track:  {} - {}", title, artist)?;
        writeln!(f, "Album:  {}", album)?;
        writeln!(f, "Length: {}", self.duration_display())?;
        if self.lyrics.is_some() {
            writeln!(f, "Lyrics: available")?;
        }

        Ok(())
    }
}

/// Format a play time as `mm:ss`, or `hh:mm:ss` from one hour up.
///
/// Seconds are rounded to the nearest whole second.
pub fn display_time(time: Duration) -> String {
    let total = time.as_secs_f64().round() as u64;
    let hours = total / 3600;
    let mins = (total % 3600) / 60;
    let secs = total % 60;
    if hours == 0 {
        format!("{:02}:{:02}", mins, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, mins, secs)
    }
}
