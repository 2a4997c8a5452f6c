//! Checkpoints: save/load the full store image and its manifest.

use crate::error::{EngineError, Result};
use crate::persistence::serialization::{self, Manifest, StoreImage, FORMAT_VERSION};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

const IMAGE_FILE: &str = "records.bin";
const IMAGE_TEMP_FILE: &str = "records.bin.tmp";
const MANIFEST_FILE: &str = "manifest.json";

/// Manages the checkpoint image and manifest inside a data directory.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn image_path(&self) -> PathBuf {
        self.dir.join(IMAGE_FILE)
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// Write the image atomically (temp file + rename), then refresh the manifest.
    pub fn save(&self, image: &StoreImage) -> Result<()> {
        let data = serialization::to_bincode(image)?;
        let temp_path = self.dir.join(IMAGE_TEMP_FILE);
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, self.image_path())?;

        self.write_manifest(&Manifest {
            format_version: image.format_version,
            dimension: image.dimension,
            metric: image.metric,
            record_count: image.records.len(),
            last_seq: image.last_seq,
        })
    }

    /// Load the image, or return None if no checkpoint has been taken yet.
    pub fn load(&self) -> Result<Option<StoreImage>> {
        let path = self.image_path();
        if !path.exists() {
            return Ok(None);
        }

        let data = fs::read(&path)?;
        let image: StoreImage = serialization::from_bincode(&data)?;
        if image.format_version != FORMAT_VERSION {
            return Err(EngineError::Serialization(format!(
                "unsupported store format version {} (expected {})",
                image.format_version, FORMAT_VERSION
            )));
        }
        Ok(Some(image))
    }

    pub fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        fs::write(self.manifest_path(), serialization::to_json(manifest)?)?;
        Ok(())
    }

    pub fn load_manifest(&self) -> Result<Option<Manifest>> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(serialization::from_json(&bytes)?))
    }

    /// Check if a checkpoint image exists.
    pub fn exists(&self) -> bool {
        self.image_path().exists()
    }
}
