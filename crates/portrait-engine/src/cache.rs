//! Cache directory of generated portraits and the identity lookup on top of
//! it.
//!
//! Everything here runs on the single thread that owns the cache, so the
//! collision search and the store update for one portrait cannot interleave
//! with another portrait's.

use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat};
use portrait_contracts::events::{EventKind, EventPayload, EventWriter};
use portrait_contracts::store::IdentityStore;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::error::PortraitError;
use crate::request::GeneratedPayload;
use crate::transport::Transport;
use crate::{error_chain_text, truncate_text};

const DOWNLOAD_PROVIDER: &str = "download";
const STYLE_REFERENCE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// A decoded portrait plus the PNG bytes it is stored as. `file_name` is
/// `None` when the image could not be written to the cache.
#[derive(Debug, Clone)]
pub struct Portrait {
    pub image: DynamicImage,
    pub png_bytes: Vec<u8>,
    pub file_name: Option<String>,
}

impl Portrait {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

pub struct PortraitCache<S: IdentityStore> {
    cache_dir: PathBuf,
    store: S,
    transport: Arc<dyn Transport>,
    events: Option<EventWriter>,
}

impl<S: IdentityStore> PortraitCache<S> {
    pub fn new(cache_dir: impl Into<PathBuf>, store: S, transport: Arc<dyn Transport>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            store,
            transport,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Loads, fetches or decodes the portrait for `identity`. Failures are
    /// logged and reported as `None`.
    pub fn resolve(
        &mut self,
        payload: Option<&GeneratedPayload>,
        identity: &str,
        base_name: Option<&str>,
        force_refresh: bool,
    ) -> Option<Portrait> {
        match self.try_resolve(payload, identity, base_name, force_refresh) {
            Ok(Some(portrait)) => Some(portrait),
            Ok(None) => {
                self.emit(
                    EventKind::PortraitMissing,
                    json!({ "identity": identity, "force_refresh": force_refresh }),
                );
                None
            }
            Err(err) => {
                error!(identity, kind = err.kind(), error = %err, "portrait unavailable");
                self.emit(
                    EventKind::PortraitMissing,
                    json!({ "identity": identity, "error": err.to_string(), "error_kind": err.kind() }),
                );
                None
            }
        }
    }

    /// Same as [`resolve`](Self::resolve) for host-supplied strings that carry
    /// no tag; the string is classified by shape.
    pub fn resolve_raw(
        &mut self,
        raw_payload: Option<&str>,
        identity: &str,
        base_name: Option<&str>,
        force_refresh: bool,
    ) -> Option<Portrait> {
        let payload = raw_payload
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(GeneratedPayload::classify);
        self.resolve(payload.as_ref(), identity, base_name, force_refresh)
    }

    pub fn try_resolve(
        &mut self,
        payload: Option<&GeneratedPayload>,
        identity: &str,
        base_name: Option<&str>,
        force_refresh: bool,
    ) -> Result<Option<Portrait>, PortraitError> {
        if let Err(err) = fs::create_dir_all(&self.cache_dir) {
            warn!(
                cache_dir = %self.cache_dir.display(),
                error = %err,
                "could not create cache directory"
            );
        }

        let stored = self.store.get(identity);
        let Some(payload) = payload else {
            if force_refresh {
                warn!(identity, "refresh requested without a new image");
                return Ok(None);
            }
            return self.load_cached(identity, stored.as_deref());
        };

        let image = match payload {
            GeneratedPayload::Base64(data) => decode_base64_image(data)?,
            GeneratedPayload::Url(url) => self.download_image(url)?,
        };
        Ok(Some(self.persist(identity, base_name, image)?))
    }

    fn load_cached(
        &self,
        identity: &str,
        stored: Option<&str>,
    ) -> Result<Option<Portrait>, PortraitError> {
        if let Some(file_name) = stored {
            if !is_plain_file_name(file_name) {
                warn!(identity, file_name, "ignoring stored file name that is not a plain file name");
            } else if self.cache_dir.join(file_name).is_file() {
                return self.load_file(file_name).map(Some);
            } else {
                debug!(identity, file_name, "stored portrait file is missing");
            }
        }

        let legacy_name = legacy_file_name(identity);
        if self.cache_dir.join(&legacy_name).is_file() {
            debug!(identity, file_name = legacy_name.as_str(), "using legacy portrait file");
            return self.load_file(&legacy_name).map(Some);
        }
        Ok(None)
    }

    fn load_file(&self, file_name: &str) -> Result<Portrait, PortraitError> {
        let path = self.cache_dir.join(file_name);
        let bytes = fs::read(&path)
            .map_err(|err| PortraitError::io(format!("read {}", path.display()), err))?;
        let image = image::load_from_memory(&bytes)
            .map_err(|err| PortraitError::Decode(format!("{file_name}: {err}")))?;
        Ok(Portrait {
            image,
            png_bytes: bytes,
            file_name: Some(file_name.to_string()),
        })
    }

    fn download_image(&self, url: &str) -> Result<DynamicImage, PortraitError> {
        let reply = self.transport.get(url).map_err(|err| {
            let message = error_chain_text(&err, 512);
            error!(url, error = %message, "image download failed");
            PortraitError::Transport {
                provider: DOWNLOAD_PROVIDER.to_string(),
                status: None,
                message,
                body: None,
            }
        })?;
        if !reply.is_success() {
            let body = reply.text();
            error!(url, status = reply.status, "image download returned an error");
            return Err(PortraitError::Transport {
                provider: DOWNLOAD_PROVIDER.to_string(),
                status: Some(reply.status),
                message: truncate_text(&body, 512),
                body: Some(body),
            });
        }
        image::load_from_memory(&reply.body)
            .map_err(|err| PortraitError::Decode(format!("downloaded image: {err}")))
    }

    /// Writes the image and records it for `identity`. A write failure keeps
    /// the decoded image and drops the file name.
    fn persist(
        &mut self,
        identity: &str,
        base_name: Option<&str>,
        image: DynamicImage,
    ) -> Result<Portrait, PortraitError> {
        let png_bytes = encode_png(&image)?;
        let written = match base_name
            .map(sanitize_file_name)
            .filter(|base| !base.trim().is_empty())
        {
            Some(base) => write_new_file(&self.cache_dir, &base, &png_bytes),
            None => write_legacy_file(&self.cache_dir, identity, &png_bytes),
        };

        let file_name = match written {
            Ok(file_name) => file_name,
            Err(err) => {
                error!(identity, error = %err, "failed to write portrait to cache");
                return Ok(Portrait {
                    image,
                    png_bytes,
                    file_name: None,
                });
            }
        };

        if let Err(err) = self.store.set(identity, &file_name) {
            error!(
                identity,
                file_name = file_name.as_str(),
                error = %error_chain_text(&err, 512),
                "failed to record portrait file name"
            );
        }
        info!(identity, file_name = file_name.as_str(), bytes = png_bytes.len(), "portrait saved");
        self.emit(
            EventKind::PortraitSaved,
            json!({
                "identity": identity,
                "file_name": file_name,
                "bytes": png_bytes.len(),
                "sha256": hex::encode(Sha256::digest(&png_bytes)),
                "width": image.width(),
                "height": image.height(),
            }),
        );
        Ok(Portrait {
            image,
            png_bytes,
            file_name: Some(file_name),
        })
    }

    pub fn style_references(&self) -> Vec<PathBuf> {
        list_style_references(&self.cache_dir)
    }

    fn emit(&self, kind: EventKind, payload: Value) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events.emit(kind, event_payload(payload)) {
            warn!(event = kind.as_str(), error = %err, "failed to write event");
        }
    }
}

/// Replaces characters that are not valid in file names on common
/// filesystems with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|ch| match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect()
}

/// Image files usable as a style reference, sorted by file name. A missing
/// directory has none.
pub fn list_style_references(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_style_reference_extension(path))
        .collect();
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    paths
}

/// Reads a subject or style reference image and re-encodes it as PNG for
/// upload.
pub fn load_reference_image(path: &Path) -> Result<Vec<u8>, PortraitError> {
    let bytes = fs::read(path)
        .map_err(|err| PortraitError::io(format!("read {}", path.display()), err))?;
    let image = image::load_from_memory(&bytes)
        .map_err(|err| PortraitError::Decode(format!("{}: {err}", path.display())))?;
    encode_png(&image)
}

fn has_style_reference_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            STYLE_REFERENCE_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

fn decode_base64_image(data: &str) -> Result<DynamicImage, PortraitError> {
    let bytes = BASE64
        .decode(data.trim())
        .map_err(|err| PortraitError::Decode(format!("invalid base64: {err}")))?;
    image::load_from_memory(&bytes).map_err(|err| PortraitError::Decode(err.to_string()))
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, PortraitError> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|err| PortraitError::Decode(format!("png encode failed: {err}")))?;
    Ok(bytes)
}

fn legacy_file_name(identity: &str) -> String {
    format!("{}.png", sanitize_file_name(identity))
}

/// A single normal path component. Dots inside the name are fine; `.`, `..`
/// and anything with a separator are not.
fn is_plain_file_name(name: &str) -> bool {
    if name.trim().is_empty() || name.contains('\\') {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Writes `bytes` to a temporary file in `dir`. The file is removed again if
/// it is dropped before being persisted.
fn stage_file(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile, PortraitError> {
    let mut staged = NamedTempFile::new_in(dir)
        .map_err(|err| PortraitError::io(format!("stage file in {}", dir.display()), err))?;
    staged
        .write_all(bytes)
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|err| PortraitError::io(format!("write {}", staged.path().display()), err))?;
    Ok(staged)
}

/// Moves the staged image to `<base>.png`, or the first free `<base>(n).png`.
/// Existing files are never replaced.
fn write_new_file(dir: &Path, base: &str, bytes: &[u8]) -> Result<String, PortraitError> {
    let mut staged = stage_file(dir, bytes)?;
    let mut suffix = 0u32;
    loop {
        let file_name = if suffix == 0 {
            format!("{base}.png")
        } else {
            format!("{base}({suffix}).png")
        };
        let path = dir.join(&file_name);
        match staged.persist_noclobber(&path) {
            Ok(_) => return Ok(file_name),
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                staged = err.file;
                suffix = suffix.checked_add(1).ok_or_else(|| {
                    PortraitError::io(
                        format!("no free file name for {base}"),
                        io::Error::from(io::ErrorKind::AlreadyExists),
                    )
                })?;
            }
            Err(err) => {
                return Err(PortraitError::io(format!("persist {}", path.display()), err.error));
            }
        }
    }
}

/// Replaces `<identity>.png` in one rename, so a failed write leaves the
/// previous portrait intact.
fn write_legacy_file(dir: &Path, identity: &str, bytes: &[u8]) -> Result<String, PortraitError> {
    let file_name = legacy_file_name(identity);
    let path = dir.join(&file_name);
    stage_file(dir, bytes)?
        .persist(&path)
        .map_err(|err| PortraitError::io(format!("persist {}", path.display()), err.error))?;
    Ok(file_name)
}

pub(crate) fn event_payload(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use base64::Engine as _;
    use portrait_contracts::events::EventWriter;
    use portrait_contracts::store::{IdentityStore, PortraitIndex};

    use super::test_images::{pattern_png_bytes, png_bytes};
    use super::{
        is_plain_file_name, list_style_references, load_reference_image, sanitize_file_name,
        PortraitCache, BASE64,
    };
    use crate::request::GeneratedPayload;
    use crate::transport::stub::StubTransport;

    fn cache_in(dir: &std::path::Path) -> PortraitCache<PortraitIndex> {
        PortraitCache::new(dir.join("Cache"), PortraitIndex::new(), Arc::new(StubTransport::new()))
    }

    fn red_pixel() -> GeneratedPayload {
        GeneratedPayload::Base64(BASE64.encode(png_bytes(1, 1, [255, 0, 0, 255])))
    }

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_file_name(r#"a<b>c:d"e/f\g|h?i*j"#), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_file_name("tab\there"), "tab_here");
        assert_eq!(sanitize_file_name("Ser Édouard (2)"), "Ser Édouard (2)");
    }

    #[test]
    fn base_name_collisions_get_numbered_suffixes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut cache = cache_in(temp.path());
        std::fs::create_dir_all(cache.cache_dir())?;
        std::fs::write(cache.cache_dir().join("Foo.png"), b"existing")?;

        let first = cache.resolve(Some(&red_pixel()), "Pawn_1", Some("Foo"), false);
        let second = cache.resolve(Some(&red_pixel()), "Pawn_2", Some("Foo"), false);

        assert_eq!(first.and_then(|p| p.file_name).as_deref(), Some("Foo(1).png"));
        assert_eq!(second.and_then(|p| p.file_name).as_deref(), Some("Foo(2).png"));
        assert_eq!(std::fs::read(cache.cache_dir().join("Foo.png"))?, b"existing");
        assert_eq!(std::fs::read_dir(cache.cache_dir())?.count(), 3);
        assert_eq!(cache.store().get("Pawn_2").as_deref(), Some("Foo(2).png"));
        Ok(())
    }

    #[test]
    fn base_name_is_sanitized() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut cache = cache_in(temp.path());
        let portrait = cache.resolve(Some(&red_pixel()), "Pawn_1", Some("Ser/Bob?"), false);
        assert_eq!(portrait.and_then(|p| p.file_name).as_deref(), Some("Ser_Bob_.png"));
        Ok(())
    }

    #[test]
    fn saved_portrait_redisplays_identical_bytes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut cache = cache_in(temp.path());
        let saved = cache
            .resolve(Some(&red_pixel()), "Pawn_7", Some("Alice"), false)
            .ok_or_else(|| anyhow::anyhow!("portrait was not saved"))?;
        let shown = cache
            .resolve(None, "Pawn_7", None, false)
            .ok_or_else(|| anyhow::anyhow!("portrait was not redisplayed"))?;

        assert_eq!(shown.file_name.as_deref(), Some("Alice.png"));
        assert_eq!(shown.png_bytes, saved.png_bytes);
        assert_eq!((shown.width(), shown.height()), (1, 1));
        Ok(())
    }

    #[test]
    fn same_image_stored_twice_keeps_index_stable() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut cache = cache_in(temp.path());
        cache.resolve(Some(&red_pixel()), "Pawn_7", None, false);
        cache.resolve(Some(&red_pixel()), "Pawn_7", None, false);
        assert_eq!(cache.store().len(), 1);
        assert_eq!(cache.store().get("Pawn_7").as_deref(), Some("Pawn_7.png"));
        Ok(())
    }

    #[test]
    fn legacy_identity_file_is_used_without_index_entry() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut cache = cache_in(temp.path());
        std::fs::create_dir_all(cache.cache_dir())?;
        let bytes = png_bytes(2, 3, [0, 0, 255, 255]);
        std::fs::write(cache.cache_dir().join("Pawn_9.png"), &bytes)?;

        let portrait = cache
            .resolve(None, "Pawn_9", None, false)
            .ok_or_else(|| anyhow::anyhow!("legacy portrait not found"))?;
        assert_eq!(portrait.png_bytes, bytes);
        assert_eq!((portrait.width(), portrait.height()), (2, 3));
        assert!(cache.store().get("Pawn_9").is_none());
        Ok(())
    }

    #[test]
    fn missing_portrait_is_absent_and_refresh_without_payload_is_absent() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut cache = cache_in(temp.path());
        assert!(cache.resolve(None, "Nobody", None, false).is_none());

        cache.resolve(Some(&red_pixel()), "Pawn_1", None, false);
        assert!(cache.resolve(None, "Pawn_1", None, true).is_none());
        assert!(cache.cache_dir().is_dir());
        Ok(())
    }

    #[test]
    fn undecodable_payload_writes_nothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut cache = cache_in(temp.path());
        let payloads = [
            GeneratedPayload::Base64("aGVsbG8=".to_string()),
            GeneratedPayload::Base64("not base64!".to_string()),
        ];
        for payload in &payloads {
            let err = cache.try_resolve(Some(payload), "Pawn_42", None, false).err();
            assert_eq!(err.map(|err| err.kind()), Some("decode"));
        }
        assert!(cache.store().get("Pawn_42").is_none());
        assert_eq!(std::fs::read_dir(cache.cache_dir())?.count(), 0);
        Ok(())
    }

    #[test]
    fn write_failure_still_returns_image() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blocked = temp.path().join("Cache");
        std::fs::write(&blocked, b"not a directory")?;
        let mut cache =
            PortraitCache::new(&blocked, PortraitIndex::new(), Arc::new(StubTransport::new()));

        let portrait = cache
            .resolve(Some(&red_pixel()), "Pawn_1", Some("Foo"), false)
            .ok_or_else(|| anyhow::anyhow!("decoded image was dropped"))?;
        assert_eq!(portrait.file_name, None);
        assert_eq!((portrait.width(), portrait.height()), (1, 1));
        assert!(cache.store().is_empty());
        Ok(())
    }

    #[test]
    fn url_payload_is_downloaded_and_saved() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let stub = Arc::new(StubTransport::new().reply(200, png_bytes(4, 4, [0, 255, 0, 255])));
        let mut cache = PortraitCache::new(temp.path().join("Cache"), PortraitIndex::new(), stub.clone());

        let payload = GeneratedPayload::Url("https://x/y.png".to_string());
        let portrait = cache
            .resolve(Some(&payload), "Pawn_3", None, false)
            .ok_or_else(|| anyhow::anyhow!("download failed"))?;

        assert_eq!(portrait.file_name.as_deref(), Some("Pawn_3.png"));
        assert_eq!((portrait.width(), portrait.height()), (4, 4));
        let requests = stub.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "GET");
        assert_eq!(requests[0].url, "https://x/y.png");
        Ok(())
    }

    #[test]
    fn failed_download_is_transport_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let stub = Arc::new(StubTransport::new().reply(404, "gone"));
        let mut cache = PortraitCache::new(temp.path().join("Cache"), PortraitIndex::new(), stub);
        let payload = GeneratedPayload::Url("https://x/expired.png".to_string());
        let err = cache.try_resolve(Some(&payload), "Pawn_3", None, false).err();
        assert_eq!(err.map(|err| err.kind()), Some("transport"));
        assert!(cache.store().get("Pawn_3").is_none());
        Ok(())
    }

    #[test]
    fn raw_payload_is_classified_by_shape() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let png = pattern_png_bytes(16);
        let stub = Arc::new(StubTransport::new().reply(200, png.clone()));
        let mut cache = PortraitCache::new(temp.path().join("Cache"), PortraitIndex::new(), stub.clone());

        let encoded = BASE64.encode(&png);
        assert!(encoded.len() >= 100);
        assert!(cache.resolve_raw(Some(&encoded), "Inline", None, false).is_some());
        assert!(stub.requests().is_empty());

        assert!(cache
            .resolve_raw(Some("https://x/y.png"), "Remote", None, false)
            .is_some());
        assert_eq!(stub.requests().len(), 1);
        Ok(())
    }

    #[test]
    fn dotted_base_name_round_trips() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut cache = cache_in(temp.path());
        for (identity, base, expected) in [
            ("Pawn_1", "Wait...", "Wait....png"),
            ("Pawn_2", "Mr.. Bob", "Mr.. Bob.png"),
        ] {
            let saved = cache
                .resolve(Some(&red_pixel()), identity, Some(base), false)
                .ok_or_else(|| anyhow::anyhow!("portrait was not saved"))?;
            assert_eq!(saved.file_name.as_deref(), Some(expected));

            let shown = cache
                .resolve(None, identity, None, false)
                .ok_or_else(|| anyhow::anyhow!("{expected} was not redisplayed"))?;
            assert_eq!(shown.file_name.as_deref(), Some(expected));
            assert_eq!(shown.png_bytes, saved.png_bytes);
        }
        Ok(())
    }

    #[test]
    fn plain_file_names_are_single_components() {
        assert!(is_plain_file_name("Foo.png"));
        assert!(is_plain_file_name("Wait....png"));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name("."));
        assert!(!is_plain_file_name("../outside.png"));
        assert!(!is_plain_file_name("nested/Foo.png"));
        assert!(!is_plain_file_name("/abs.png"));
        assert!(!is_plain_file_name(r"nested\Foo.png"));
        assert!(!is_plain_file_name("  "));
    }

    #[test]
    fn legacy_file_is_replaced_whole() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut cache = cache_in(temp.path());
        std::fs::create_dir_all(cache.cache_dir())?;
        std::fs::write(cache.cache_dir().join("Pawn_1.png"), png_bytes(3, 3, [0, 0, 0, 255]))?;

        let saved = cache
            .resolve(Some(&red_pixel()), "Pawn_1", None, true)
            .ok_or_else(|| anyhow::anyhow!("portrait was not saved"))?;
        assert_eq!(saved.file_name.as_deref(), Some("Pawn_1.png"));
        assert_eq!(std::fs::read(cache.cache_dir().join("Pawn_1.png"))?, saved.png_bytes);
        assert_eq!(std::fs::read_dir(cache.cache_dir())?.count(), 1);
        Ok(())
    }

    #[test]
    fn failed_write_leaves_no_partial_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut cache = cache_in(temp.path());
        // A directory where the legacy file would go makes the final rename fail.
        std::fs::create_dir_all(cache.cache_dir().join("Pawn_1.png"))?;

        let portrait = cache
            .resolve(Some(&red_pixel()), "Pawn_1", None, true)
            .ok_or_else(|| anyhow::anyhow!("decoded image was dropped"))?;
        assert_eq!(portrait.file_name, None);
        assert!(cache.store().get("Pawn_1").is_none());

        let names: Vec<String> = std::fs::read_dir(cache.cache_dir())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["Pawn_1.png"]);
        assert!(cache.cache_dir().join("Pawn_1.png").is_dir());
        assert!(cache.style_references().is_empty());
        Ok(())
    }

    #[test]
    fn unsafe_stored_name_is_ignored() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut cache = cache_in(temp.path());
        std::fs::create_dir_all(cache.cache_dir())?;
        std::fs::write(temp.path().join("outside.png"), png_bytes(1, 1, [0, 0, 0, 255]))?;
        cache.store_mut().set("Pawn_5", "../outside.png")?;

        assert!(cache.resolve(None, "Pawn_5", None, false).is_none());
        Ok(())
    }

    #[test]
    fn saved_portrait_is_journaled_with_digest() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let mut cache = cache_in(temp.path()).with_events(EventWriter::new(&events_path, "s1"));
        cache.resolve(Some(&red_pixel()), "Pawn_1", None, false);
        cache.resolve(None, "Nobody", None, false);

        let lines: Vec<serde_json::Value> = std::fs::read_to_string(&events_path)?
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "portrait_saved");
        assert_eq!(lines[0]["file_name"], "Pawn_1.png");
        assert_eq!(lines[0]["sha256"].as_str().map(str::len), Some(64));
        assert_eq!(lines[1]["type"], "portrait_missing");
        assert_eq!(lines[1]["identity"], "Nobody");
        Ok(())
    }

    #[test]
    fn style_references_are_filtered_and_sorted() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let dir = temp.path();
        for name in ["b.JPG", "a.png", "c.jpeg", "notes.txt", "d.gif"] {
            std::fs::write(dir.join(name), png_bytes(1, 1, [1, 2, 3, 255]))?;
        }
        std::fs::create_dir(dir.join("nested.png"))?;

        let names: Vec<String> = list_style_references(dir)
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .map(str::to_string)
            .collect();
        assert_eq!(names, vec!["a.png", "b.JPG", "c.jpeg"]);
        assert!(list_style_references(&dir.join("missing")).is_empty());

        let bytes = load_reference_image(&dir.join("b.JPG"))?;
        assert!(image::load_from_memory(&bytes).is_ok());
        Ok(())
    }
}
