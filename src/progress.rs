use std::path::{Path, PathBuf};
use std::time::Duration;

use sysinfo::Networks;
use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::units;

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One polling tick's view of an in-flight download. Transient; owned by the
/// monitor loop and published through a watch channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub downloaded_bytes: u64,
    pub expected_bytes: Option<u64>,
    pub percent: Option<u8>,
    pub speed_bytes_per_sec: u64,
}

impl ProgressSnapshot {
    pub fn speed_readable(&self) -> String {
        units::format_speed(self.speed_bytes_per_sec)
    }

    pub fn downloaded_readable(&self) -> String {
        units::format_bytes(self.downloaded_bytes)
    }
}

/// Integer-truncated percentage, capped at 100. Unknown or zero expected
/// size yields no percentage rather than a division fault.
pub fn percent(downloaded: u64, expected: Option<u64>) -> Option<u8> {
    match expected {
        Some(total) if total > 0 => Some((downloaded * 100 / total).min(100) as u8),
        _ => None,
    }
}

/// Bytes across entries directly inside `path`. A folder that does not exist
/// yet reads as zero; SteamCMD creates it lazily.
pub fn directory_size(path: &Path) -> u64 {
    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    entries
        .flatten()
        .filter_map(|entry| entry.metadata().ok())
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
        .sum()
}

/// Polls the download folder and host network counters once per second,
/// publishing a snapshot per tick until the token is canceled. The loop exits
/// at the cancel signal without a further tick.
pub async fn monitor(
    download_folder: PathBuf,
    expected_bytes: Option<u64>,
    progress_tx: watch::Sender<Option<ProgressSnapshot>>,
    cancel_token: CancellationToken,
) {
    let mut networks = Networks::new_with_refreshed_list();
    let mut interval = time::interval(POLL_INTERVAL);
    // the first tick fires immediately; use it to prime the counters
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("progress monitor stopped");
                return;
            }
            _ = interval.tick() => {
                networks.refresh();
                let received: u64 = networks.iter().map(|(_, data)| data.received()).sum();

                let downloaded = directory_size(&download_folder);
                let snapshot = ProgressSnapshot {
                    downloaded_bytes: downloaded,
                    expected_bytes,
                    percent: percent(downloaded, expected_bytes),
                    speed_bytes_per_sec: received,
                };
                progress_tx.send_replace(Some(snapshot));
            }
        }
    }
}
