//! Firmware manifest parsing, chunked download, and MD5 verification
//! (design §4.7), grounded in `examples/original_source/src/FWU_FirmwareUpdate.c`.

use std::path::Path;

use md5::{Digest, Md5};
use serde::Deserialize;

use crate::error::RemoteServerStatus;

#[derive(Debug, Clone, Deserialize)]
pub struct FirmwareManifest {
    pub revision: u32,
    #[serde(rename = "fwUrl")]
    pub fw_url: String,
    #[serde(rename = "fwMd5")]
    pub fw_md5: String,
    #[serde(rename = "rfRevision")]
    pub rf_revision: u32,
    #[serde(rename = "rfUrl")]
    pub rf_url: String,
    #[serde(rename = "rfMd5")]
    pub rf_md5: String,
    #[serde(rename = "releaseDate")]
    pub release_date: String,
    #[serde(rename = "nextUpdate")]
    pub next_update_minutes: u32,
}

/// Compare the manifest's advertised host/radio revisions against what's
/// currently installed, returning `(host_is_newer, radio_is_newer)`.
pub fn is_newer(manifest: &FirmwareManifest, current_host_revision: u32, current_radio_revision: u32) -> (bool, bool) {
    (manifest.revision > current_host_revision, manifest.rf_revision > current_radio_revision)
}

/// Stream `url`'s body to `dest` (design §4.7: "stream response body to a
/// file, parsing `Content-Length`"; `reqwest` handles the length/chunking
/// internally, so this is a straight copy).
pub fn download_file(client: &reqwest::blocking::Client, url: &str, dest: &Path) -> Result<(), RemoteServerStatus> {
    let mut response = client.get(url).send().map_err(|_| RemoteServerStatus::CannotRetrieveFile)?;
    if !response.status().is_success() {
        return Err(RemoteServerStatus::CannotRetrieveFile);
    }
    let mut file = std::fs::File::create(dest).map_err(|_| RemoteServerStatus::CannotCreateLocalFile)?;
    response.copy_to(&mut file).map_err(|_| RemoteServerStatus::DownloadIncomplete)?;
    Ok(())
}

/// Read the radio co-processor's last-committed firmware revision from its
/// sidecar file. Unlike the host (which always restarts on update, so its
/// own compiled-in revision is authoritative), the radio firmware lives on
/// a separate chip the host never restarts, so its revision has to be
/// tracked on disk.
pub fn read_radio_revision(path: &Path) -> u32 {
    std::fs::read_to_string(path).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(0)
}

/// Commit the radio co-processor's newly verified revision, atomically.
pub fn write_radio_revision(path: &Path, revision: u32) -> Result<(), RemoteServerStatus> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, revision.to_string()).map_err(|_| RemoteServerStatus::CannotWriteVersionFile)?;
    std::fs::rename(&tmp, path).map_err(|_| RemoteServerStatus::CannotWriteVersionFile)?;
    Ok(())
}

/// Compute the MD5 digest of `path` as a lowercase hex string.
pub fn file_md5_hex(path: &Path) -> Result<String, RemoteServerStatus> {
    let bytes = std::fs::read(path).map_err(|_| RemoteServerStatus::CannotComputeMd5)?;
    let digest = Md5::new().chain_update(&bytes).finalize();
    Ok(hex::encode(digest))
}

/// Verify `path` against `expected_hex`, case-insensitively, and commit by
/// writing the verification sidecar atomically (temp file + rename) only
/// on a match — the sidecar is the commit marker, so a partial or
/// mismatched download is never mistaken for a good one (design §4.7,
/// §8's "MD5 mismatch non-commit" property).
pub fn verify_and_commit(path: &Path, expected_hex: &str, sidecar: &Path) -> Result<(), RemoteServerStatus> {
    let actual = file_md5_hex(path)?;
    if !actual.eq_ignore_ascii_case(expected_hex) {
        return Err(RemoteServerStatus::Md5CheckError);
    }
    let tmp = sidecar.with_extension("tmp");
    std::fs::write(&tmp, expected_hex).map_err(|_| RemoteServerStatus::CannotWriteVersionFile)?;
    std::fs::rename(&tmp, sidecar).map_err(|_| RemoteServerStatus::CannotWriteVersionFile)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_parses_expected_fields() {
        let json = r#"{
            "revision": 7, "fwUrl": "http://host/fw.hex", "fwMd5": "abc123",
            "rfRevision": 3, "rfUrl": "http://host/rf.bin", "rfMd5": "def456",
            "releaseDate": "2026-01-01", "nextUpdate": 30
        }"#;
        let manifest: FirmwareManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.revision, 7);
        assert_eq!(manifest.rf_revision, 3);
        assert_eq!(manifest.next_update_minutes, 30);
    }

    #[test]
    fn is_newer_compares_each_component_independently() {
        let manifest = FirmwareManifest {
            revision: 5,
            fw_url: String::new(),
            fw_md5: String::new(),
            rf_revision: 2,
            rf_url: String::new(),
            rf_md5: String::new(),
            release_date: String::new(),
            next_update_minutes: 30,
        };
        assert_eq!(is_newer(&manifest, 4, 2), (true, false));
        assert_eq!(is_newer(&manifest, 5, 1), (false, true));
    }

    #[test]
    fn md5_mismatch_does_not_create_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.hex");
        std::fs::write(&path, b"payload").unwrap();
        let sidecar = dir.path().join("app.md5");

        let result = verify_and_commit(&path, "0000000000000000000000000000000", &sidecar);
        assert!(result.is_err());
        assert!(!sidecar.exists());
    }

    #[test]
    fn missing_radio_revision_file_reads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_radio_revision(&dir.path().join("rf.ver")), 0);
    }

    #[test]
    fn radio_revision_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rf.ver");
        write_radio_revision(&path, 42).unwrap();
        assert_eq!(read_radio_revision(&path), 42);
    }

    #[test]
    fn matching_digest_commits_sidecar_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.hex");
        std::fs::write(&path, b"payload").unwrap();
        let digest = file_md5_hex(&path).unwrap();
        let sidecar = dir.path().join("app.md5");

        verify_and_commit(&path, &digest.to_uppercase(), &sidecar).unwrap();
        assert!(sidecar.exists());
    }
}
