use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, ImageReader};

use crate::error::{Error, Result};
use crate::models::Stage;

/// Name of the data subdirectory inside a workspace root.
pub const WORKDIR: &str = "wellscan";

/// File extensions (lowercase) recognized as workspace images.
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// On-disk layout of one workspace.
///
/// Images live directly under the root; everything wellscan produces lives
/// under `<root>/wellscan/`: the template raster, the class catalog, one
/// sidecar directory per stage and the model checkpoints.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Open a workspace root, creating the data directory tree if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::Configuration(format!(
                "workspace root {} is not a directory",
                root.display()
            )));
        }
        let ws = Self { root };
        for stage in Stage::ALL {
            fs::create_dir_all(ws.stage_dir(stage))?;
        }
        fs::create_dir_all(ws.model_dir())?;
        if !ws.class_path().exists() {
            fs::write(ws.class_path(), "")?;
        }
        Ok(ws)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(WORKDIR)
    }

    pub fn template_path(&self) -> PathBuf {
        self.data_dir().join("template.png")
    }

    pub fn class_path(&self) -> PathBuf {
        self.data_dir().join("class.txt")
    }

    pub fn stage_dir(&self, stage: Stage) -> PathBuf {
        self.data_dir().join(stage.dir_name())
    }

    /// Sidecar path for one (image, stage) pair, e.g.
    /// `wellscan/extraction/plate_03.jpg.txt`.
    pub fn stage_path(&self, image: &str, stage: Stage) -> PathBuf {
        self.stage_dir(stage).join(format!("{image}.txt"))
    }

    pub fn model_dir(&self) -> PathBuf {
        self.data_dir().join("model")
    }

    /// Checkpoint path stem for a (model kind, run timestamp) pair. The
    /// recorder appends its own file extension.
    pub fn checkpoint_path(&self, kind_name: &str, timestamp: i64) -> PathBuf {
        self.model_dir().join(format!("{kind_name}_{timestamp}"))
    }

    pub fn image_path(&self, image: &str) -> PathBuf {
        self.root.join(image)
    }

    /// Decode a workspace image.
    pub fn load_image(&self, image: &str) -> Result<DynamicImage> {
        let path = self.image_path(image);
        ImageReader::open(&path)
            .map_err(|e| Error::ImageRead {
                path: path.clone(),
                source: image::ImageError::IoError(e),
            })?
            .decode()
            .map_err(|e| Error::ImageRead { path, source: e })
    }

    pub fn has_template(&self) -> bool {
        self.template_path().exists()
    }

    /// Persist an operator-cropped raster as the workspace template.
    ///
    /// Stale extraction sidecars are not invalidated; the operator is
    /// expected to re-extract after changing the template.
    pub fn save_template(&self, cropped: &DynamicImage) -> Result<()> {
        cropped
            .save(self.template_path())
            .map_err(|e| Error::Configuration(format!("failed to save template: {e}")))
    }

    /// Load the template as grayscale, failing fast when it is missing or
    /// undecodable.
    pub fn load_template(&self) -> Result<GrayImage> {
        let path = self.template_path();
        if !path.exists() {
            return Err(Error::Configuration(format!(
                "no template image at {}",
                path.display()
            )));
        }
        let img = ImageReader::open(&path)
            .map_err(|e| Error::Configuration(format!("failed to open template: {e}")))?
            .decode()
            .map_err(|e| Error::Configuration(format!("failed to decode template: {e}")))?;
        Ok(img.to_luma8())
    }

    /// Load the class catalog: one name per line, blank lines skipped.
    /// A missing catalog reads as empty.
    pub fn load_classes(&self) -> Result<Vec<String>> {
        let path = self.class_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(path)?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// Atomically rewrite the whole class catalog.
    ///
    /// Labels on disk are bare indices into this list: reordering or removing
    /// entries silently remaps the meaning of every stored label.
    pub fn reset_classes(&self, class_names: &[String]) -> Result<()> {
        let path = self.class_path();
        let tmp = path.with_extension("txt.tmp");
        let mut text = class_names.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// All candidate images directly under the workspace root, sorted
    /// lexicographically so batch scopes are reproducible across runs.
    pub fn list_images(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let ext = Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase);
            if ext.is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str())) {
                names.push(name.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
