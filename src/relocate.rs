use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::RelocateError;

/// Descriptor file SteamCMD leaves inside the fetched content folder.
pub const DESCRIPTOR_FILE_NAME: &str = "workshop.json";

pub const MODS_SUBFOLDER: &str = "mods";
pub const USERMAPS_SUBFOLDER: &str = "usermaps";
pub const ZONE_SUBFOLDER: &str = "zone";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Mod,
    Map,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Mod => "mod",
            ContentType::Map => "map",
        }
    }

    fn subfolder(&self) -> &'static str {
        match self {
            ContentType::Mod => MODS_SUBFOLDER,
            ContentType::Map => USERMAPS_SUBFOLDER,
        }
    }
}

impl FromStr for ContentType {
    type Err = RelocateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mod" => Ok(ContentType::Mod),
            "map" => Ok(ContentType::Map),
            other => Err(RelocateError::UnrecognizedType(other.to_string())),
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    #[serde(rename = "Type")]
    content_type: String,
    #[serde(rename = "FolderName")]
    folder_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentDescriptor {
    pub content_type: ContentType,
    pub folder_name: String,
}

impl ContentDescriptor {
    /// Reads and validates the descriptor inside `fetched_folder`.
    pub fn read_from(fetched_folder: &Path) -> Result<Self, RelocateError> {
        let path = fetched_folder.join(DESCRIPTOR_FILE_NAME);
        if !path.exists() {
            return Err(RelocateError::DescriptorMissing(path));
        }
        let content = fs::read_to_string(&path).map_err(|source| RelocateError::DescriptorRead {
            path: path.clone(),
            source,
        })?;
        let raw: RawDescriptor =
            serde_json::from_str(&content).map_err(|source| RelocateError::DescriptorParse {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            content_type: raw.content_type.parse()?,
            folder_name: raw.folder_name,
        })
    }
}

/// Result of one relocation. Individual copy failures do not abort the batch;
/// the paths that could not be copied are reported here.
#[derive(Debug, Clone)]
pub struct RelocateReport {
    pub target: PathBuf,
    pub content_type: ContentType,
    pub failed: Vec<PathBuf>,
}

impl RelocateReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Copies the fetched content tree into the game subfolder named by its
/// descriptor: `<root>/mods/<name>/zone` for mods, `<root>/usermaps/<name>/zone`
/// for maps. Existing files at the destination are overwritten (merge, not
/// replace).
pub fn relocate(
    fetched_folder: &Path,
    destination_root: &Path,
) -> Result<RelocateReport, RelocateError> {
    let descriptor = ContentDescriptor::read_from(fetched_folder)?;
    let target = destination_root
        .join(descriptor.content_type.subfolder())
        .join(&descriptor.folder_name)
        .join(ZONE_SUBFOLDER);

    fs::create_dir_all(&target).map_err(|source| RelocateError::CreateDir {
        path: target.clone(),
        source,
    })?;

    let mut failed = Vec::new();
    copy_tree(fetched_folder, &target, &mut failed);

    info!(
        content_type = %descriptor.content_type,
        target = %target.display(),
        failed = failed.len(),
        "relocated workshop content"
    );

    Ok(RelocateReport {
        target,
        content_type: descriptor.content_type,
        failed,
    })
}

fn copy_tree(src: &Path, dest: &Path, failed: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(src) {
        Ok(entries) => entries,
        Err(error) => {
            warn!("failed to read directory {}: {error}", src.display());
            failed.push(src.to_path_buf());
            return;
        }
    };

    for entry in entries.flatten() {
        let src_path = entry.path();
        let dest_path = dest.join(entry.file_name());
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

        if is_dir {
            if let Err(error) = fs::create_dir_all(&dest_path) {
                warn!("failed to create {}: {error}", dest_path.display());
                failed.push(src_path);
                continue;
            }
            copy_tree(&src_path, &dest_path, failed);
        } else if let Err(error) = fs::copy(&src_path, &dest_path) {
            warn!("failed to copy {}: {error}", src_path.display());
            failed.push(src_path);
        }
    }
}
