use std::sync::Mutex;

use queueplay_core::{
    metadata::display_time,
    nowplaying::{ NowPlayingInfo, RemoteCommands, TransportControl, TransportSurface },
};

/// Prints the now-playing line whenever it changes.
#[derive(Default)]
pub struct ConsoleTransport {
    last_line: Mutex<Option<String>>,
}

impl ConsoleTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn render(info: &NowPlayingInfo) -> String {
        let title = info.title.as_deref().unwrap_or("Unknown");
        let artist = info.artist.as_deref().unwrap_or("Unknown artist");
        let length = info.duration.map(display_time).unwrap_or_else(|| "--:--".to_string());
        let state = if info.rate > 0.0 { "▶" } else { "⏸" };
        format!(
            "{} [{}/{}] {} - {} ({})",
            state,
            info.queue_index + 1,
            info.queue_count,
            title,
            artist,
            length
        )
    }
}

impl TransportSurface for ConsoleTransport {
    fn register(&self, _remote: RemoteCommands) {
        log::debug!("Console transport registered");
    }

    fn set_enabled(&self, control: TransportControl, enabled: bool) {
        log::debug!("Transport control {} enabled: {}", control, enabled);
    }

    fn set_now_playing(&self, info: Option<&NowPlayingInfo>) {
        let line = info.map(Self::render);
        let mut last = self.last_line.lock().unwrap_or_else(|e| e.into_inner());
        if *last != line {
            if let Some(line) = &line {
                println!("{}", line);
            }
            *last = line;
        }
    }
}
