//! Encoding catalog: every enrolled face as a named encoding.
//!
//! The catalog is rebuilt from scratch on each training pass and persisted
//! as a single bincode file holding two index-aligned lists. Each rebuild
//! replaces the previous file wholesale.

use crate::encoder::FaceEncoder;
use crate::enrollment::{read_sidecar, split_key};
use crate::types::Encoding;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog encode failed: {0}")]
    Encode(bincode::Error),
    #[error("catalog file {path} is unreadable: {source}")]
    Decode {
        path: String,
        #[source]
        source: bincode::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodingEntry {
    pub name: String,
    pub encoding: Encoding,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodingCatalog {
    entries: Vec<EncodingEntry>,
}

impl EncodingCatalog {
    pub fn new(entries: Vec<EncodingEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[EncodingEntry] {
        &self.entries
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// On-disk layout: `encodings[i]` belongs to `names[i]`.
#[derive(Serialize, Deserialize)]
struct CatalogFile {
    encodings: Vec<Vec<f32>>,
    names: Vec<String>,
}

/// An image found by the training sweep, with the name it trains under.
#[derive(Debug)]
struct Candidate {
    name: String,
    path: PathBuf,
}

/// Fixed-location catalog file.
pub struct CatalogStore {
    path: PathBuf,
}

impl CatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encode every stored image under `storage_root` and replace the catalog.
    ///
    /// Per-image failures (undecodable file, no face, encoder error) are
    /// logged and skipped. A missing root yields an empty catalog and leaves
    /// the existing file in place.
    pub fn rebuild<E>(
        &self,
        storage_root: &Path,
        encoder: &mut E,
    ) -> Result<EncodingCatalog, CatalogError>
    where
        E: FaceEncoder + ?Sized,
    {
        tracing::info!(root = %storage_root.display(), "training started");

        if !storage_root.is_dir() {
            tracing::error!(root = %storage_root.display(), "training image directory not found");
            return Ok(EncodingCatalog::default());
        }

        let mut entries = Vec::new();
        for candidate in sweep(storage_root)? {
            let path = candidate.path.display();
            let image = match decode_rgb(&candidate.path) {
                Ok(img) => img,
                Err(e) => {
                    tracing::error!(%path, error = %e, "failed to decode image");
                    continue;
                }
            };

            let encodings = match encoder.encode(&image) {
                Ok(encs) => encs,
                Err(e) => {
                    tracing::error!(%path, error = %e, "failed to encode image");
                    continue;
                }
            };

            let Some(encoding) = encodings.into_iter().next() else {
                tracing::warn!(%path, "no face detected in image");
                continue;
            };

            tracing::info!(%path, name = %candidate.name, "processed image");
            entries.push(EncodingEntry {
                name: candidate.name,
                encoding,
            });
        }

        let catalog = EncodingCatalog::new(entries);
        self.save(&catalog)?;
        tracing::info!(faces = catalog.len(), path = %self.path.display(), "training completed");
        Ok(catalog)
    }

    /// Load the last persisted catalog. A missing file yields an empty catalog.
    pub fn load(&self) -> Result<EncodingCatalog, CatalogError> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::error!(path = %self.path.display(), "no trained faces found");
                return Ok(EncodingCatalog::default());
            }
            Err(e) => return Err(e.into()),
        };

        let file: CatalogFile = bincode::deserialize(&bytes).map_err(|source| CatalogError::Decode {
            path: self.path.display().to_string(),
            source,
        })?;

        if file.encodings.len() != file.names.len() {
            tracing::warn!(
                encodings = file.encodings.len(),
                names = file.names.len(),
                "catalog lists differ in length; extra items ignored"
            );
        }

        let entries = file
            .names
            .into_iter()
            .zip(file.encodings)
            .map(|(name, values)| EncodingEntry {
                name,
                encoding: Encoding::new(values),
            })
            .collect::<Vec<_>>();

        tracing::debug!(faces = entries.len(), path = %self.path.display(), "catalog loaded");
        Ok(EncodingCatalog::new(entries))
    }

    fn save(&self, catalog: &EncodingCatalog) -> Result<(), CatalogError> {
        let file = CatalogFile {
            encodings: catalog.entries.iter().map(|e| e.encoding.values.clone()).collect(),
            names: catalog.entries.iter().map(|e| e.name.clone()).collect(),
        };
        let bytes = bincode::serialize(&file).map_err(CatalogError::Encode)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, bytes)?;
        Ok(())
    }
}

/// Decode by content, so a misnamed extension still loads.
fn decode_rgb(path: &Path) -> Result<image::RgbImage, image::ImageError> {
    let reader = image::ImageReader::open(path)?.with_guessed_format()?;
    Ok(reader.decode()?.to_rgb8())
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// Collect trainable images directly under `root`, sorted by file name.
///
/// Key directories contribute their capture (name from the sidecar, falling
/// back to the directory name); loose `{id}_{name}.jpg` files are named by
/// their first underscore token.
fn sweep(root: &Path) -> Result<Vec<Candidate>, CatalogError> {
    let mut found = Vec::new();

    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };

        if path.is_dir() {
            let Some(image) = dir_capture(&path) else {
                tracing::debug!(dir = %path.display(), "no capture in key directory");
                continue;
            };
            let name = match read_sidecar(&path) {
                Some(s) => s.user_id,
                None => split_key(&file_name).0.to_string(),
            };
            found.push((file_name, Candidate { name, path: image }));
        } else if is_image(&path) {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let name = split_key(&stem).0.to_string();
            found.push((file_name, Candidate { name, path }));
        }
    }

    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found.into_iter().map(|(_, c)| c).collect())
}

/// The capture image inside a key directory, if any.
fn dir_capture(dir: &Path) -> Option<PathBuf> {
    let mut images: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_image(p))
        .collect();
    images.sort();
    images.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrollment::EnrollmentStore;
    use crate::testing::{solid, MeanColorEncoder, TwoFaceEncoder};

    struct Fixture {
        _tmp: tempfile::TempDir,
        enrollment: EnrollmentStore,
        catalog: CatalogStore,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let enrollment = EnrollmentStore::new(tmp.path().join("TrainingImage"));
        let catalog = CatalogStore::new(tmp.path().join("trained_faces.bin"));
        Fixture {
            _tmp: tmp,
            enrollment,
            catalog,
        }
    }

    #[test]
    fn test_capture_then_rebuild_names_entry_by_user_id() {
        let f = fixture();
        f.enrollment.capture("42", "Ada", &solid([200, 40, 40])).unwrap();

        let catalog = f.catalog.rebuild(f.enrollment.root(), &mut MeanColorEncoder).unwrap();
        assert_eq!(catalog.names(), vec!["42"]);
        assert_eq!(catalog.entries()[0].encoding.len(), 3);
    }

    #[test]
    fn test_rebuild_uses_sidecar_for_underscore_ids() {
        let f = fixture();
        f.enrollment.capture("emp_42", "Ada", &solid([200, 40, 40])).unwrap();

        let catalog = f.catalog.rebuild(f.enrollment.root(), &mut MeanColorEncoder).unwrap();
        assert_eq!(catalog.names(), vec!["emp_42"]);
    }

    #[test]
    fn test_rebuild_falls_back_to_directory_name() {
        let f = fixture();
        let record = f.enrollment.capture("42", "Ada", &solid([200, 40, 40])).unwrap();
        let key_dir = record.image_path.parent().unwrap();
        fs::remove_file(key_dir.join(crate::enrollment::SIDECAR_FILE_NAME)).unwrap();

        let catalog = f.catalog.rebuild(f.enrollment.root(), &mut MeanColorEncoder).unwrap();
        assert_eq!(catalog.names(), vec!["42"]);
    }

    #[test]
    fn test_rebuild_missing_root_is_empty_and_keeps_file() {
        let f = fixture();
        fs::write(f.catalog.path(), b"previous").unwrap();

        let missing = Path::new("/nonexistent/TrainingImage");
        let catalog = f.catalog.rebuild(missing, &mut MeanColorEncoder).unwrap();
        assert!(catalog.is_empty());
        assert_eq!(fs::read(f.catalog.path()).unwrap(), b"previous");
    }

    #[test]
    fn test_rebuild_empty_root_writes_empty_catalog() {
        let f = fixture();
        fs::create_dir_all(f.enrollment.root()).unwrap();

        let catalog = f.catalog.rebuild(f.enrollment.root(), &mut MeanColorEncoder).unwrap();
        assert!(catalog.is_empty());
        assert!(f.catalog.load().unwrap().is_empty());
    }

    #[test]
    fn test_rebuild_skips_faceless_and_undecodable_images() {
        let f = fixture();
        f.enrollment.capture("1", "Dark", &solid([0, 0, 0])).unwrap();
        f.enrollment.capture("2", "Lit", &solid([180, 180, 180])).unwrap();
        fs::write(f.enrollment.root().join("3_Broken.jpg"), b"not a jpeg").unwrap();
        fs::write(f.enrollment.root().join("notes.txt"), b"ignored").unwrap();

        let catalog = f.catalog.rebuild(f.enrollment.root(), &mut MeanColorEncoder).unwrap();
        assert_eq!(catalog.names(), vec!["2"]);
    }

    #[test]
    fn test_rebuild_keeps_first_of_several_faces() {
        let f = fixture();
        let record = f.enrollment.capture("42", "Ada", &solid([200, 40, 40])).unwrap();

        let catalog = f.catalog.rebuild(f.enrollment.root(), &mut TwoFaceEncoder).unwrap();
        assert_eq!(catalog.names(), vec!["42"]);

        let stored = &catalog.entries()[0].encoding;
        let stored_image = decode_rgb(&record.image_path).unwrap();
        let faces = TwoFaceEncoder.encode(&stored_image).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(stored, &faces[0]);
        assert_ne!(stored, &faces[1]);
    }

    #[test]
    fn test_rebuild_reads_loose_images() {
        let f = fixture();
        fs::create_dir_all(f.enrollment.root()).unwrap();
        solid([50, 150, 250])
            .save_with_format(f.enrollment.root().join("17_Linus.PNG"), image::ImageFormat::Png)
            .unwrap();

        let catalog = f.catalog.rebuild(f.enrollment.root(), &mut MeanColorEncoder).unwrap();
        assert_eq!(catalog.names(), vec!["17"]);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let f = fixture();
        f.enrollment.capture("42", "Ada", &solid([200, 40, 40])).unwrap();
        f.enrollment.capture("7", "Grace", &solid([40, 200, 40])).unwrap();

        let first = f.catalog.rebuild(f.enrollment.root(), &mut MeanColorEncoder).unwrap();
        let second = f.catalog.rebuild(f.enrollment.root(), &mut MeanColorEncoder).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn test_load_after_rebuild_matches() {
        let f = fixture();
        f.enrollment.capture("42", "Ada", &solid([200, 40, 40])).unwrap();
        f.enrollment.capture("7", "Grace", &solid([40, 200, 40])).unwrap();

        let built = f.catalog.rebuild(f.enrollment.root(), &mut MeanColorEncoder).unwrap();
        let loaded = f.catalog.load().unwrap();
        assert_eq!(built, loaded);
    }

    #[test]
    fn test_rebuild_replaces_previous_catalog() {
        let f = fixture();
        f.enrollment.capture("42", "Ada", &solid([200, 40, 40])).unwrap();
        f.catalog.rebuild(f.enrollment.root(), &mut MeanColorEncoder).unwrap();

        fs::remove_dir_all(f.enrollment.root().join("42_Ada")).unwrap();
        f.enrollment.capture("7", "Grace", &solid([40, 200, 40])).unwrap();
        f.catalog.rebuild(f.enrollment.root(), &mut MeanColorEncoder).unwrap();

        assert_eq!(f.catalog.load().unwrap().names(), vec!["7"]);
    }

    #[test]
    fn test_recapture_yields_single_entry() {
        let f = fixture();
        f.enrollment.capture("42", "Ada", &solid([200, 40, 40])).unwrap();
        f.enrollment.capture("42", "Ada", &solid([40, 40, 200])).unwrap();

        let catalog = f.catalog.rebuild(f.enrollment.root(), &mut MeanColorEncoder).unwrap();
        assert_eq!(catalog.names(), vec!["42"]);
        // Blue dominates: the second capture is the one encoded.
        let v = &catalog.entries()[0].encoding.values;
        assert!(v[2] > v[0], "{v:?}");
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let store = CatalogStore::new("/nonexistent/rollcall/trained_faces.bin");
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_load_corrupt_file_is_error() {
        let f = fixture();
        fs::write(f.catalog.path(), [0xffu8; 3]).unwrap();
        assert!(matches!(f.catalog.load(), Err(CatalogError::Decode { .. })));
    }

    #[test]
    fn test_load_truncates_misaligned_lists() {
        let f = fixture();
        let file = CatalogFile {
            encodings: vec![vec![0.1, 0.2], vec![0.3, 0.4]],
            names: vec!["only".into()],
        };
        fs::write(f.catalog.path(), bincode::serialize(&file).unwrap()).unwrap();

        let catalog = f.catalog.load().unwrap();
        assert_eq!(catalog.names(), vec!["only"]);
        assert_eq!(catalog.entries()[0].encoding.values, vec![0.1, 0.2]);
    }
}
