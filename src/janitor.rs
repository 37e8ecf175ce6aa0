use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::SystemTime,
};

use tokio::{
    task::JoinHandle,
    time::{Duration, MissedTickBehavior, interval},
};
use tracing::{info, warn};

// The first tick fires immediately, so leftovers from a previous run go at startup.
pub fn spawn(dir: PathBuf, every: Duration, max_age: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let removed = sweep(&dir, max_age).await;
            if removed > 0 {
                info!("Sweep removed {removed} stale file(s) from {:?}", dir);
            }
        }
    })
}

pub async fn sweep(dir: &Path, max_age: Duration) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("Could not open {:?} for cleanup: {error}", dir);
            }
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;

    loop {
        let maybe_entry = match entries.next_entry().await {
            Ok(value) => value,
            Err(error) => {
                warn!("Could not iterate {:?} for cleanup: {error}", dir);
                break;
            }
        };

        let Some(entry) = maybe_entry else {
            break;
        };

        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(error) => {
                warn!("Could not read metadata of {:?}: {error}", path);
                continue;
            }
        };

        let modified_at = match metadata.modified() {
            Ok(value) => value,
            Err(error) => {
                warn!("Could not read modification time of {:?}: {error}", path);
                continue;
            }
        };

        // Clock skew can put mtime in the future; treat that as fresh.
        let age = now.duration_since(modified_at).unwrap_or_default();
        if age <= max_age {
            continue;
        }

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };

        match result {
            Ok(()) => {
                removed += 1;
                info!("Cleaned up old file: {}", entry.file_name().to_string_lossy());
            }
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("Could not delete {:?}: {error}", path),
        }
    }

    removed
}
