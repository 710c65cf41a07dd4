use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

use crate::download::WorkshopId;
use crate::error::SteamCmdError;

/// Steam application id of the game whose workshop items are fetched.
pub const WORKSHOP_APP_ID: &str = "311210";

pub const STEAMCMD_ARCHIVE_URL: &str =
    "https://steamcdn-a.akamaihd.net/client/installer/steamcmd.zip";

// SteamCMD self-updates on first launch; an executable smaller than this is
// still the bootstrap stub.
const INITIALIZED_MIN_BYTES: u64 = 3 * 1024 * 1024;

/// Platform path of the SteamCMD entry point inside its install directory.
pub fn executable(steamcmd_dir: &Path) -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        steamcmd_dir.join("steamcmd.exe")
    }
    #[cfg(not(target_os = "windows"))]
    {
        steamcmd_dir.join("steamcmd.sh")
    }
}

pub fn is_installed(steamcmd_dir: &Path) -> bool {
    executable(steamcmd_dir).exists()
}

/// Whether SteamCMD has completed its first-run self-update. Before that the
/// executable is only the small bootstrap and downloads stall for a while.
pub fn is_initialized(steamcmd_dir: &Path) -> bool {
    std::fs::metadata(executable(steamcmd_dir))
        .map(|meta| meta.len() >= INITIALIZED_MIN_BYTES)
        .unwrap_or(false)
}

/// Folder SteamCMD writes partial downloads into while an item is in flight.
pub fn download_dir(steamcmd_dir: &Path, id: &WorkshopId) -> PathBuf {
    steamcmd_dir
        .join("steamapps")
        .join("workshop")
        .join("downloads")
        .join(WORKSHOP_APP_ID)
        .join(id.as_str())
}

/// Folder holding the finished item content after SteamCMD exits.
pub fn content_dir(steamcmd_dir: &Path, id: &WorkshopId) -> PathBuf {
    steamcmd_dir
        .join("steamapps")
        .join("workshop")
        .join("content")
        .join(WORKSHOP_APP_ID)
        .join(id.as_str())
}

/// Anonymous fetch of one workshop item: `+login anonymous
/// +workshop_download_item 311210 <id> +quit`.
pub fn build_command(steamcmd_exe: &Path, id: &WorkshopId) -> Command {
    let mut command = Command::new(steamcmd_exe);

    // Hide command window on Windows
    #[cfg(target_os = "windows")]
    {
        #[allow(unused_imports)]
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        command.creation_flags(CREATE_NO_WINDOW);
    }

    command.arg("+login").arg("anonymous");
    command
        .arg("+workshop_download_item")
        .arg(WORKSHOP_APP_ID)
        .arg(id.as_str());
    command.arg("+quit");
    command
}

/// Fetches the SteamCMD archive and extracts it into `steamcmd_dir`,
/// verifying the executable is present afterwards.
pub async fn acquire(steamcmd_dir: &Path) -> Result<PathBuf, SteamCmdError> {
    acquire_from(&reqwest::Client::new(), STEAMCMD_ARCHIVE_URL, steamcmd_dir).await
}

pub async fn acquire_from(
    http: &reqwest::Client,
    archive_url: &str,
    steamcmd_dir: &Path,
) -> Result<PathBuf, SteamCmdError> {
    tokio::fs::create_dir_all(steamcmd_dir)
        .await
        .map_err(|source| SteamCmdError::Io { source })?;

    let archive_path = steamcmd_dir.join("steamcmd.zip");
    info!("downloading steamcmd from {archive_url}");

    let response = http
        .get(archive_url)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|source| SteamCmdError::Download { source })?;

    let mut file = File::create(&archive_path)
        .await
        .map_err(|source| SteamCmdError::SaveFailed {
            path: archive_path.clone(),
            source,
        })?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| SteamCmdError::Download { source })?;
        file.write_all(&chunk)
            .await
            .map_err(|source| SteamCmdError::SaveFailed {
                path: archive_path.clone(),
                source,
            })?;
    }
    file.flush()
        .await
        .map_err(|source| SteamCmdError::SaveFailed {
            path: archive_path.clone(),
            source,
        })?;
    drop(file);

    extract_archive(&archive_path, steamcmd_dir).await?;
    tokio::fs::remove_file(&archive_path)
        .await
        .map_err(|source| SteamCmdError::Io { source })?;

    let exe = executable(steamcmd_dir);
    if !exe.exists() {
        return Err(SteamCmdError::NotFoundAfterExtract(exe));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = tokio::fs::metadata(&exe)
            .await
            .map_err(|source| SteamCmdError::Io { source })?
            .permissions();
        perms.set_mode(0o755);
        tokio::fs::set_permissions(&exe, perms)
            .await
            .map_err(|source| SteamCmdError::Io { source })?;
    }

    info!("steamcmd installed at {}", exe.display());
    Ok(exe)
}

async fn extract_archive(archive_path: &Path, dest: &Path) -> Result<(), SteamCmdError> {
    let archive_path = archive_path.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&archive_path)
            .map_err(|source| SteamCmdError::Io { source })?;
        let mut archive = zip::ZipArchive::new(std::io::BufReader::new(file)).map_err(
            |source| SteamCmdError::Extract {
                path: archive_path.clone(),
                source,
            },
        )?;

        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|source| SteamCmdError::Extract {
                    path: archive_path.clone(),
                    source,
                })?;
            let outpath = match entry.enclosed_name() {
                Some(path) => dest.join(path),
                None => continue,
            };

            if entry.name().ends_with('/') {
                std::fs::create_dir_all(&outpath)
                    .map_err(|source| SteamCmdError::Io { source })?;
            } else {
                if let Some(parent) = outpath.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|source| SteamCmdError::Io { source })?;
                }
                let mut outfile = std::fs::File::create(&outpath)
                    .map_err(|source| SteamCmdError::Io { source })?;
                std::io::copy(&mut entry, &mut outfile)
                    .map_err(|source| SteamCmdError::Io { source })?;
            }
        }

        Ok::<(), SteamCmdError>(())
    })
    .await
    .map_err(|source| SteamCmdError::Io {
        source: std::io::Error::new(std::io::ErrorKind::Other, source),
    })??;

    Ok(())
}
