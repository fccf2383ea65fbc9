//! On-disk dataset storage.
//!
//! ```text
//! <root>/dataset_<unix-seconds>[_<n>]/
//!     metadata.json
//!     reference/000000-color.jpg ...
//!     reference_data/text_prompt.txt
//!     verification/...
//!     preprocessing_bundle.pkl
//!     inference.log
//! ```

use crate::error::{Result, SupervisorError};
use crate::types::{DatasetId, ImageBlob, Timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::fs;

pub const ID_PREFIX: &str = "dataset_";
pub const METADATA_FILE: &str = "metadata.json";
pub const REFERENCE_DIR: &str = "reference";
pub const REFERENCE_DATA_DIR: &str = "reference_data";
pub const TEXT_PROMPT_FILE: &str = "text_prompt.txt";
pub const VERIFICATION_DIR: &str = "verification";
pub const BUNDLE_FILE: &str = "preprocessing_bundle.pkl";
pub const LOG_FILE: &str = "inference.log";

const IMAGE_EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub id: DatasetId,
    pub description: String,
    pub timestamp: Timestamp,
    #[serde(rename = "imageCount")]
    pub image_count: usize,
}

/// An uploaded image. `index` decides its file name.
#[derive(Clone, Debug)]
pub struct NewImage {
    pub index: u32,
    pub data: ImageBlob,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageKind {
    Reference,
    Verification,
}

impl ImageKind {
    fn dir_name(self) -> &'static str {
        match self {
            ImageKind::Reference => REFERENCE_DIR,
            ImageKind::Verification => VERIFICATION_DIR,
        }
    }
}

impl std::str::FromStr for ImageKind {
    type Err = SupervisorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            REFERENCE_DIR => Ok(ImageKind::Reference),
            VERIFICATION_DIR => Ok(ImageKind::Verification),
            _ => Err(SupervisorError::InvalidInput(
                r#"Invalid image type. Must be "reference" or "verification""#.into(),
            )),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DatasetImages {
    pub reference_images: Vec<String>,
    pub verification_images: Vec<String>,
}

pub fn reference_image_name(index: u32) -> String {
    format!("{index:06}-color.jpg")
}

/// Dataset ids end up in paths, so only a conservative alphabet is accepted.
pub fn validate_id(dataset_id: &str) -> Result<()> {
    let valid = !dataset_id.is_empty()
        && dataset_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(SupervisorError::InvalidInput(format!(
            "invalid dataset id: {dataset_id:?}"
        )))
    }
}

fn is_image(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

#[derive(Clone, Debug)]
pub struct DatasetStore {
    root: PathBuf,
}

impl DatasetStore {
    /// Open the store, creating `root` if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dataset_dir(&self, dataset_id: &str) -> Result<PathBuf> {
        validate_id(dataset_id)?;
        Ok(self.root.join(dataset_id))
    }

    pub fn reference_dir(&self, dataset_id: &str) -> Result<PathBuf> {
        Ok(self.dataset_dir(dataset_id)?.join(REFERENCE_DIR))
    }

    pub fn log_path(&self, dataset_id: &str) -> Result<PathBuf> {
        Ok(self.dataset_dir(dataset_id)?.join(LOG_FILE))
    }

    /// Directory of an existing dataset.
    async fn existing_dir(&self, dataset_id: &str) -> Result<PathBuf> {
        let dir = self.dataset_dir(dataset_id)?;
        if fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            Ok(dir)
        } else {
            Err(SupervisorError::dataset_not_found())
        }
    }

    /// Materialize a new dataset from uploaded images. The description is
    /// taken as given, empty included.
    pub async fn create(
        &self,
        description: &str,
        images: Vec<NewImage>,
    ) -> Result<DatasetMetadata> {
        if images.is_empty() {
            return Err(SupervisorError::InvalidInput("No images provided".into()));
        }

        let (id, dir) = self.allocate().await?;
        let metadata = DatasetMetadata {
            id,
            description: description.to_string(),
            timestamp: Utc::now(),
            image_count: images.len(),
        };
        if let Err(err) = write_dataset(&dir, &metadata, &images).await {
            // leave nothing half-written behind
            let _ = fs::remove_dir_all(&dir).await;
            return Err(err);
        }
        tracing::info!(
            dataset_id = %metadata.id,
            image_count = metadata.image_count,
            "dataset created"
        );
        Ok(metadata)
    }

    /// Claim a fresh directory. Ids are time based; exclusive creation keeps
    /// two uploads in the same second apart.
    async fn allocate(&self) -> Result<(DatasetId, PathBuf)> {
        let base = format!("{ID_PREFIX}{}", Utc::now().timestamp());
        let mut suffix = 0u32;
        loop {
            let id = if suffix == 0 {
                base.clone()
            } else {
                format!("{base}_{suffix}")
            };
            let dir = self.root.join(&id);
            match fs::create_dir(&dir).await {
                Ok(()) => return Ok((id, dir)),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => suffix += 1,
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub async fn get(&self, dataset_id: &str) -> Result<DatasetMetadata> {
        let path = self.dataset_dir(dataset_id)?.join(METADATA_FILE);
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(SupervisorError::dataset_not_found())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Metadata of every dataset. Directories without readable metadata get
    /// a synthesized entry.
    pub async fn list(&self) -> Result<Vec<DatasetMetadata>> {
        let mut datasets = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(ID_PREFIX) || !entry.file_type().await?.is_dir() {
                continue;
            }
            let metadata = match self.get(&name).await {
                Ok(metadata) => metadata,
                Err(err) => {
                    if !matches!(err, SupervisorError::NotFound(_)) {
                        tracing::warn!(dataset_id = %name, error = %err, "unreadable metadata");
                    }
                    synthesize_metadata(&name, &entry.path()).await?
                }
            };
            datasets.push(metadata);
        }
        datasets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(datasets)
    }

    /// Remove the dataset and everything under it.
    pub async fn delete(&self, dataset_id: &str) -> Result<()> {
        let dir = self.existing_dir(dataset_id).await?;
        fs::remove_dir_all(&dir).await?;
        tracing::info!(dataset_id, "dataset deleted");
        Ok(())
    }

    /// Where the bundle artifact for the dataset is expected. Whether it is
    /// actually there is for the caller to check.
    pub async fn locate_bundle(&self, dataset_id: &str) -> Result<PathBuf> {
        Ok(self.existing_dir(dataset_id).await?.join(BUNDLE_FILE))
    }

    pub async fn text_prompt(&self, dataset_id: &str) -> Result<String> {
        let path = self
            .dataset_dir(dataset_id)?
            .join(REFERENCE_DATA_DIR)
            .join(TEXT_PROMPT_FILE);
        match fs::read_to_string(&path).await {
            Ok(text) => Ok(text.trim().to_string()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(SupervisorError::NotFound("Text prompt file not found".into()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Rewrite the text prompt, and the metadata description along with it.
    pub async fn update_description(&self, dataset_id: &str, text: &str) -> Result<()> {
        let dir = self.existing_dir(dataset_id).await?;
        let prompt_dir = dir.join(REFERENCE_DATA_DIR);
        fs::create_dir_all(&prompt_dir).await?;
        fs::write(prompt_dir.join(TEXT_PROMPT_FILE), text).await?;

        match self.get(dataset_id).await {
            Ok(mut metadata) => {
                metadata.description = text.to_string();
                write_metadata(&dir, &metadata).await?;
            }
            Err(SupervisorError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
        Ok(())
    }

    pub async fn list_images(&self, dataset_id: &str) -> Result<DatasetImages> {
        let dir = self.existing_dir(dataset_id).await?;
        let reference_images = list_file_names(&dir.join(REFERENCE_DIR))
            .await?
            .into_iter()
            .filter(|name| is_image(name) && name.contains("-color"))
            .collect();
        let verification_images = list_file_names(&dir.join(VERIFICATION_DIR))
            .await?
            .into_iter()
            .filter(|name| is_image(name))
            .collect();
        Ok(DatasetImages {
            reference_images,
            verification_images,
        })
    }

    /// Resolve a single image file, refusing anything that would escape the
    /// image directory.
    pub async fn image_path(
        &self,
        dataset_id: &str,
        kind: ImageKind,
        filename: &str,
    ) -> Result<PathBuf> {
        let escapes = filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename == "."
            || filename == "..";
        if escapes {
            return Err(SupervisorError::InvalidInput("Invalid filename".into()));
        }
        let path = self
            .dataset_dir(dataset_id)?
            .join(kind.dir_name())
            .join(filename);
        if fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
            Ok(path)
        } else {
            Err(SupervisorError::NotFound("Image not found".into()))
        }
    }
}

async fn write_dataset(dir: &Path, metadata: &DatasetMetadata, images: &[NewImage]) -> Result<()> {
    let reference = dir.join(REFERENCE_DIR);
    fs::create_dir_all(&reference).await?;
    for image in images {
        fs::write(reference.join(reference_image_name(image.index)), &image.data).await?;
    }
    write_metadata(dir, metadata).await
}

async fn write_metadata(dir: &Path, metadata: &DatasetMetadata) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(metadata)?;
    fs::write(dir.join(METADATA_FILE), bytes).await?;
    Ok(())
}

async fn synthesize_metadata(id: &str, dir: &Path) -> Result<DatasetMetadata> {
    let timestamp = fs::metadata(dir)
        .await?
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    let image_count = list_file_names(&dir.join(REFERENCE_DIR))
        .await?
        .iter()
        .filter(|name| name.ends_with(".jpg"))
        .count();
    Ok(DatasetMetadata {
        id: id.to_string(),
        description: "Unknown".into(),
        timestamp,
        image_count,
    })
}

/// Sorted plain-file names in `dir`; a missing directory is empty.
async fn list_file_names(dir: &Path) -> Result<Vec<String>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
