/// On-disk thumbnail cache.
///
/// A path preview is stored as three files sharing one base name,
/// `<cache_dir>/resthumb-<md5 of globalized path>`:
///
/// - `<base>.png`: the full preview
/// - `<base>_small.png`: the small preview, when there is one
/// - `<base>.txt`: four lines, thumbnail size, has-small (`0`/`1`), source
///   modified time in epoch seconds, hex MD5 of the source

use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use image::RgbaImage;
use crate::error::Result;
use crate::{engine_debug, engine_error};
use super::asset::{md5_hex, AssetSource};

const SOURCE: &str = "culling::PreviewDiskCache";

/// Contents of a `<base>.txt` sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Sidecar {
    pub thumbnail_size: u32,
    pub has_small: bool,
    pub modified_time: u64,
    pub md5: String,
}

impl Sidecar {
    /// Parse the four sidecar lines. `None` if any field is malformed.
    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines().map(str::trim);
        let thumbnail_size = lines.next()?.parse().ok()?;
        let has_small = match lines.next()? {
            "0" => false,
            "1" => true,
            _ => return None,
        };
        let modified_time = lines.next()?.parse().ok()?;
        let md5 = lines.next().unwrap_or_default().to_string();
        Some(Self {
            thumbnail_size,
            has_small,
            modified_time,
            md5,
        })
    }

    pub fn to_text(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n",
            self.thumbnail_size,
            u8::from(self.has_small),
            self.modified_time,
            self.md5
        )
    }
}

/// Base path of the cache files for an asset.
pub(crate) fn cache_base(cache_dir: &Path, globalized_path: &str) -> PathBuf {
    cache_dir.join(format!("resthumb-{}", md5_hex(globalized_path.as_bytes())))
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(base.as_os_str());
    path.push(suffix);
    PathBuf::from(path)
}

pub(crate) fn sidecar_path(base: &Path) -> PathBuf {
    with_suffix(base, ".txt")
}

pub(crate) fn preview_path(base: &Path) -> PathBuf {
    with_suffix(base, ".png")
}

pub(crate) fn small_preview_path(base: &Path) -> PathBuf {
    with_suffix(base, "_small.png")
}

/// Read the sidecar at `base`. `Ok(None)` when there is no sidecar or it
/// cannot be parsed.
pub(crate) fn read_sidecar(base: &Path) -> Result<Option<Sidecar>> {
    match fs::read_to_string(sidecar_path(base)) {
        Ok(text) => Ok(Sidecar::parse(&text)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn write_sidecar(base: &Path, sidecar: &Sidecar) -> Result<()> {
    fs::write(sidecar_path(base), sidecar.to_text())?;
    Ok(())
}

/// Write the preview PNGs and their sidecar.
pub(crate) fn store(
    base: &Path,
    preview: &RgbaImage,
    small_preview: Option<&RgbaImage>,
    sidecar: &Sidecar,
) -> Result<()> {
    if let Some(dir) = base.parent() {
        fs::create_dir_all(dir)?;
    }
    preview.save(preview_path(base))?;
    if let Some(small) = small_preview {
        small.save(small_preview_path(base))?;
    }
    write_sidecar(base, sidecar)
}

/// Previews decoded from a valid disk cache entry.
pub(crate) struct CachedPreview {
    pub preview: RgbaImage,
    pub small_preview: Option<RgbaImage>,
}

/// Load the cached previews of `path` if they are still current.
///
/// The entry is current when its thumbnail size matches and either the
/// source's modified time matches or, failing that, its MD5 does. In the
/// MD5 case the sidecar is rewritten with the new modified time. Returns
/// `None` whenever the previews must be regenerated.
pub(crate) fn load_current(
    base: &Path,
    thumbnail_size: u32,
    assets: &dyn AssetSource,
    path: &str,
) -> Option<CachedPreview> {
    let sidecar = match read_sidecar(base) {
        Ok(Some(sidecar)) => sidecar,
        Ok(None) => return None,
        Err(err) => {
            engine_error!(SOURCE, "Cannot read preview sidecar for '{}': {}", path, err);
            return None;
        }
    };

    if sidecar.thumbnail_size != thumbnail_size {
        engine_debug!(
            SOURCE,
            "Stale preview of '{}': thumbnail size {} != {}",
            path,
            sidecar.thumbnail_size,
            thumbnail_size
        );
        return None;
    }

    let modified_time = assets.modified_time(path);
    if sidecar.modified_time != modified_time {
        let md5 = assets.md5(path).unwrap_or_default();
        if md5 != sidecar.md5 {
            engine_debug!(SOURCE, "Stale preview of '{}': content changed", path);
            return None;
        }
        let refreshed = Sidecar {
            modified_time,
            md5,
            ..sidecar.clone()
        };
        if let Err(err) = write_sidecar(base, &refreshed) {
            engine_error!(
                SOURCE,
                "Cannot create file '{}': {}",
                sidecar_path(base).display(),
                err
            );
        }
    }

    let preview = image::open(preview_path(base)).ok()?.to_rgba8();
    let small_preview = if sidecar.has_small {
        Some(image::open(small_preview_path(base)).ok()?.to_rgba8())
    } else {
        None
    };
    Some(CachedPreview {
        preview,
        small_preview,
    })
}

#[cfg(test)]
#[path = "disk_cache_tests.rs"]
mod tests;
