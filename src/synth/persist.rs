//! Writing the server and client documents into the shared directory.
//!
//! Documents are rendered deterministically and written atomically (`.tmp`
//! then `rename()`), so a host reading the shared directory mid-pass sees
//! either the old document or the new one, never a torn file.

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::errors::{Result, TcfError};
use crate::core::size::MAX_SIZE_BYTES;
use crate::synth::client::ClientConfig;
use crate::synth::server::ServerConfig;

pub const SERVER_DOC_NAME: &str = "hermes_server.toml";
pub const CLIENT_DOC_NAME: &str = "hermes_client.toml";

/// Where the documents went and whether either changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistedPaths {
    pub server_path: PathBuf,
    pub client_path: PathBuf,
    pub server_digest: String,
    pub client_digest: String,
    pub server_changed: bool,
    pub client_changed: bool,
}

/// Outcome of one atomic document write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenDocument {
    pub digest: String,
    pub changed: bool,
    pub size_bytes: u64,
}

/// Both documents rendered and ready to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocuments {
    pub server: String,
    pub client: String,
}

impl RenderedDocuments {
    /// Render both documents; any failure here happens before a host is touched.
    pub fn render(server: &ServerConfig, client: &ClientConfig) -> Result<Self> {
        Ok(Self {
            server: render_server(server)?,
            client: render_client(client)?,
        })
    }

    /// Write both documents under `output_dir`.
    pub fn persist(&self, output_dir: &Path) -> Result<PersistedPaths> {
        let server_path = output_dir.join(SERVER_DOC_NAME);
        let client_path = output_dir.join(CLIENT_DOC_NAME);
        let server_doc = write_document(&server_path, &self.server)?;
        let client_doc = write_document(&client_path, &self.client)?;

        Ok(PersistedPaths {
            server_path,
            client_path,
            server_digest: server_doc.digest,
            client_digest: client_doc.digest,
            server_changed: server_doc.changed,
            client_changed: client_doc.changed,
        })
    }
}

/// Persist both documents under `output_dir`.
pub fn persist(
    server: &ServerConfig,
    client: &ClientConfig,
    output_dir: &Path,
) -> Result<PersistedPaths> {
    RenderedDocuments::render(server, client)?.persist(output_dir)
}

/// Render the server document. Refuses a document without tiers, and tiers
/// whose sizes a TOML integer cannot hold.
pub fn render_server(server: &ServerConfig) -> Result<String> {
    if server.devices.is_empty() {
        return Err(TcfError::NoUsableStorage {
            details: "refusing to persist a server document with zero tiers".to_string(),
        });
    }
    for (name, tier) in &server.devices {
        let largest = tier
            .slab_sizes
            .iter()
            .copied()
            .chain([tier.capacity_bytes, tier.block_size_bytes])
            .max()
            .unwrap_or_default();
        if largest > MAX_SIZE_BYTES {
            return Err(TcfError::InvalidSize {
                raw: largest.to_string(),
                details: format!("tier {name} exceeds {MAX_SIZE_BYTES} bytes"),
            });
        }
    }
    Ok(toml::to_string(server)?)
}

/// Render the client document.
pub fn render_client(client: &ClientConfig) -> Result<String> {
    if client.file_page_size > MAX_SIZE_BYTES {
        return Err(TcfError::InvalidSize {
            raw: client.file_page_size.to_string(),
            details: format!("file page size exceeds {MAX_SIZE_BYTES} bytes"),
        });
    }
    Ok(toml::to_string(client)?)
}

pub fn load_server(path: &Path) -> Result<ServerConfig> {
    let mut server: ServerConfig = toml::from_str(&read_document(path)?)?;
    server.restore_tier_names();
    Ok(server)
}

pub fn load_client(path: &Path) -> Result<ClientConfig> {
    Ok(toml::from_str(&read_document(path)?)?)
}

fn read_document(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| TcfError::io(path, source))
}

/// Atomically replace `path` with `contents`, reporting whether it differed.
pub fn write_document(path: &Path, contents: &str) -> Result<WrittenDocument> {
    let digest = sha256_hex(contents.as_bytes());
    let previous = fs::read(path).ok().map(|bytes| sha256_hex(&bytes));
    let changed = previous.as_deref() != Some(digest.as_str());

    if changed {
        write_atomic(path, contents.as_bytes())?;
    }
    Ok(WrittenDocument {
        digest,
        changed,
        size_bytes: contents.len() as u64,
    })
}

/// Write to `<path>.tmp`, fsync, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| TcfError::io(parent, source))?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let result = (|| -> std::io::Result<()> {
        {
            let mut opts = OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o644);
            }
            let mut file = opts.open(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)
    })();

    if let Err(source) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(TcfError::io(path, source));
    }
    Ok(())
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::modes::{FlushingMode, PlacementPolicy};
    use crate::platform::pal::StorageResource;
    use crate::synth::client::build_client;
    use crate::synth::server::{OrganizerParams, assemble};
    use crate::synth::tier::{TierBuild, build_memory_tier, build_tier_with};

    fn sample_server() -> ServerConfig {
        let mut tiers = vec![build_memory_tier(1 << 30, 0.5, 4096).unwrap()];
        let res = StorageResource::declared("/mnt/nvme0", 1 << 34);
        if let TierBuild::Built { tier, .. } = build_tier_with(&res, 0, 4096, |_| None) {
            tiers.push(tier);
        }
        assemble(
            tiers,
            OrganizerParams {
                recency_max: 2.5,
                flush_period: 1000,
            },
            PlacementPolicy::MinimizeIoTime,
        )
        .unwrap()
    }

    fn sample_client() -> ClientConfig {
        build_client(
            &["/data".to_string()],
            &["/data/tmp".to_string()],
            FlushingMode::Async,
            1 << 20,
        )
    }

    #[test]
    fn persist_load_persist_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let first = persist(&sample_server(), &sample_client(), dir.path()).unwrap();
        assert!(first.server_changed && first.client_changed);
        let server_bytes = fs::read(&first.server_path).unwrap();
        let client_bytes = fs::read(&first.client_path).unwrap();

        let server = load_server(&first.server_path).unwrap();
        let client = load_client(&first.client_path).unwrap();
        assert_eq!(server, sample_server());
        assert_eq!(client, sample_client());

        let second = persist(&server, &client, dir.path()).unwrap();
        assert!(!second.server_changed);
        assert!(!second.client_changed);
        assert_eq!(second.server_digest, first.server_digest);
        assert_eq!(fs::read(&second.server_path).unwrap(), server_bytes);
        assert_eq!(fs::read(&second.client_path).unwrap(), client_bytes);
    }

    #[test]
    fn zero_tier_server_is_never_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = sample_server();
        server.devices.clear();
        let err = persist(&server, &sample_client(), dir.path()).unwrap_err();
        assert_eq!(err.code(), "TCF-1010");
        assert!(!dir.path().join(SERVER_DOC_NAME).exists());
    }

    #[test]
    fn oversized_tier_fails_render_as_user_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = sample_server();
        if let Some(tier) = server.devices.get_mut("custom_0") {
            tier.capacity_bytes = MAX_SIZE_BYTES + 1;
        }
        let err = RenderedDocuments::render(&server, &sample_client()).unwrap_err();
        assert_eq!(err.code(), "TCF-1005");
        assert!(persist(&server, &sample_client(), dir.path()).is_err());
        assert!(!dir.path().join(SERVER_DOC_NAME).exists());
        assert!(!dir.path().join(CLIENT_DOC_NAME).exists());
    }

    #[test]
    fn largest_signed_size_renders() {
        let mut server = sample_server();
        if let Some(tier) = server.devices.get_mut("custom_0") {
            tier.capacity_bytes = MAX_SIZE_BYTES;
        }
        let rendered = RenderedDocuments::render(&server, &sample_client()).unwrap();
        assert!(rendered.server.contains(&MAX_SIZE_BYTES.to_string()));
    }

    #[test]
    fn changed_flag_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.toml");
        assert!(write_document(&path, "a = 1\n").unwrap().changed);
        assert!(!write_document(&path, "a = 1\n").unwrap().changed);
        assert!(write_document(&path, "a = 2\n").unwrap().changed);
        assert!(!dir.path().join("doc.toml.tmp").exists());
    }

    #[test]
    fn sha256_known_value() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn load_missing_document_is_io_error() {
        let err = load_client(Path::new("/nonexistent/hermes_client.toml")).unwrap_err();
        assert_eq!(err.code(), "TCF-3002");
    }
}
