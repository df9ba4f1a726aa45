use std::io::{Cursor, Read, Write as _};

use log::{debug, info};
use plugwatch_model::{Release, ReleaseId, ResolveError};

use crate::fetch::AssetKind;
use crate::probe::ExportProbe;
use crate::version_info::extract_release;

struct Candidate {
    name: String,
    bytes: Vec<u8>,
}

/// Find the addon binary inside a zip archive and identify it.
///
/// Candidates are tried in archive order and the first one the probe accepts
/// wins; later entries are not looked at.
///
/// # Errors
/// Returns `InvalidArchive` when the archive cannot be read,
/// `NoValidAssetInArchive` when no candidate passes the probe, or the
/// extraction error of the accepted candidate.
pub async fn locate_in_archive(
    archive: &[u8],
    id: ReleaseId,
    download_url: &str,
    probe: &dyn ExportProbe,
) -> Result<Release, ResolveError> {
    let candidates = binary_candidates(archive)?;
    debug!(
        "Archive {download_url} has {} candidate binaries",
        candidates.len()
    );

    for candidate in candidates {
        if probe_candidate(&candidate, probe).await? {
            info!("Using {} from {download_url}", candidate.name);
            return extract_release(&candidate.bytes, id, download_url);
        }
        debug!("Skipping {}: required exports missing", candidate.name);
    }

    Err(ResolveError::NoValidAssetInArchive)
}

fn binary_candidates(archive: &[u8]) -> Result<Vec<Candidate>, ResolveError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(archive)).map_err(ResolveError::invalid_archive)?;

    let mut candidates = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(ResolveError::invalid_archive)?;
        if entry.is_dir() || AssetKind::from_file_name(entry.name()) != Some(AssetKind::Binary) {
            continue;
        }

        let mut bytes = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or_default());
        entry
            .read_to_end(&mut bytes)
            .map_err(ResolveError::invalid_archive)?;
        candidates.push(Candidate {
            name: entry.name().to_string(),
            bytes,
        });
    }
    Ok(candidates)
}

/// Write the candidate to a temporary file for the probe. The file is removed
/// when the guard drops, whichever way this returns.
async fn probe_candidate(
    candidate: &Candidate,
    probe: &dyn ExportProbe,
) -> Result<bool, ResolveError> {
    let mut file = tempfile::Builder::new()
        .prefix("plugwatch-")
        .suffix(".dll")
        .tempfile()?;
    file.write_all(&candidate.bytes)?;
    file.flush()?;

    let path = file.into_temp_path();
    let valid = probe.is_valid(&path).await;
    path.close()?;
    Ok(valid)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use super::*;
    use crate::fixture::{ImageBuilder, addon_image, zip_archive};
    use plugwatch_model::Version;

    const URL: &str = "https://example.org/bundle.zip";

    fn id() -> ReleaseId {
        ReleaseId::Hash("abc".to_string())
    }

    #[tokio::test]
    async fn first_accepted_candidate_wins() {
        let first = addon_image("Helper", [1, 0, 0, 0]);
        let second = addon_image("Boon Table", [2, 0, 0, 0]);
        let third = addon_image("Other Addon", [3, 0, 0, 0]);
        let archive = zip_archive(&[
            ("readme.txt", b"hello".as_slice()),
            ("bin/helper.dll", first.as_slice()),
            ("bin/boon_table.dll", second.as_slice()),
            ("bin/other.dll", third.as_slice()),
        ]);

        let seen = Mutex::new(Vec::<PathBuf>::new());
        let probe = |path: &Path| {
            let mut seen = seen.lock().unwrap();
            assert!(path.exists(), "candidate should exist while probed");
            seen.push(path.to_path_buf());
            seen.len() == 2
        };

        let release = locate_in_archive(&archive, id(), URL, &probe)
            .await
            .expect("second candidate should be accepted");

        assert_eq!(release.name, "Boon Table");
        assert_eq!(release.version, Version::new(2, 0, 0, 0));
        assert_eq!(release.id, id());
        assert_eq!(release.download_url, URL);

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 2, "probing stops at the first accepted binary");
        for path in &seen {
            assert!(!path.exists(), "{} should be removed", path.display());
        }
    }

    #[tokio::test]
    async fn temporary_files_are_removed_when_every_probe_fails() {
        let archive = zip_archive(&[
            ("a.dll", addon_image("A", [1, 0, 0, 0]).as_slice()),
            ("b.DLL", addon_image("B", [1, 0, 0, 0]).as_slice()),
            ("c.dll", addon_image("C", [1, 0, 0, 0]).as_slice()),
        ]);

        let seen = Mutex::new(Vec::<PathBuf>::new());
        let probe = |path: &Path| {
            seen.lock().unwrap().push(path.to_path_buf());
            false
        };

        let result = locate_in_archive(&archive, id(), URL, &probe).await;
        assert_eq!(result, Err(ResolveError::NoValidAssetInArchive));

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|path| !path.exists()));
    }

    #[tokio::test]
    async fn accepted_candidate_without_version_reports_extraction_error() {
        let broken = ImageBuilder::new().string("ProductName", "Unversioned").build();
        let archive = zip_archive(&[
            ("broken.dll", broken.as_slice()),
            ("fine.dll", addon_image("Fine", [1, 0, 0, 0]).as_slice()),
        ]);

        let result = locate_in_archive(&archive, id(), URL, &|_: &Path| true).await;
        assert_eq!(result, Err(ResolveError::NoVersionFound));
    }

    #[tokio::test]
    async fn archive_without_binaries_has_no_valid_asset() {
        let archive = zip_archive(&[("notes.txt", b"nothing here".as_slice())]);
        let result = locate_in_archive(&archive, id(), URL, &|_: &Path| true).await;
        assert_eq!(result, Err(ResolveError::NoValidAssetInArchive));
    }

    #[tokio::test]
    async fn unreadable_archive_is_reported() {
        let result =
            locate_in_archive(b"definitely not a zip", id(), URL, &|_: &Path| true).await;
        assert!(matches!(result, Err(ResolveError::InvalidArchive { .. })));
    }
}
