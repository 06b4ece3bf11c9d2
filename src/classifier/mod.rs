pub mod augment;

use std::path::Path;

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu};
use burn::record::CompactRecorder;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use image::{DynamicImage, RgbImage, imageops::FilterType};

use crate::error::{Error, Result};
use crate::models::Region;

/// Backend used for inference (and, wrapped in autodiff, for training).
#[cfg(feature = "wgpu")]
pub type InferBackend = burn::backend::Wgpu;
#[cfg(not(feature = "wgpu"))]
pub type InferBackend = burn::backend::NdArray;

/// Autodiff-wrapped backend for the training loop.
pub type TrainBackend = burn::backend::Autodiff<InferBackend>;

/// True when no accelerator backend is compiled in. Callers are expected to
/// warn the operator that batch jobs will be slow before starting one.
pub fn using_fallback_device() -> bool {
    cfg!(not(feature = "wgpu"))
}

pub fn default_device() -> <InferBackend as Backend>::Device {
    Default::default()
}

/// Square window every well crop is resized to before entering the network.
pub const CROP_SIZE: u32 = 32;

/// Network architecture selected by name.
///
/// The names mirror the torchvision backbones the tool historically offered;
/// here each maps to a stack of strided conv blocks of different depth and
/// width behind the same classifier contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    MobileNet,
    ResNet18,
    ResNet50,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [ModelKind::MobileNet, ModelKind::ResNet18, ModelKind::ResNet50];

    pub fn name(self) -> &'static str {
        match self {
            ModelKind::MobileNet => "MobileNet",
            ModelKind::ResNet18 => "ResNet18",
            ModelKind::ResNet50 => "ResNet50",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name))
    }

    /// Recover the architecture from a checkpoint file name of the form
    /// `<kind>_<timestamp>[.ext]`.
    pub fn from_checkpoint_path(path: &Path) -> Result<Self> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::Configuration(format!("bad model path {}", path.display())))?;
        let prefix = stem.split('_').next().unwrap_or(stem);
        Self::from_name(prefix).ok_or_else(|| {
            Error::Configuration(format!("unknown model kind in file name {stem:?}"))
        })
    }

    /// Output channels of each conv block.
    fn widths(self) -> &'static [usize] {
        match self {
            ModelKind::MobileNet => &[16, 32, 64],
            ModelKind::ResNet18 => &[32, 64, 128],
            ModelKind::ResNet50 => &[32, 64, 128, 256],
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Module, Debug)]
struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

/// Well crop classifier: strided conv blocks, global average pooling, one
/// linear head sized to the class count.
#[derive(Module, Debug)]
pub struct WellNet<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    pool: AdaptiveAvgPool2d,
    head: Linear<B>,
    activation: Relu,
}

impl<B: Backend> WellNet<B> {
    pub fn new(kind: ModelKind, num_classes: usize, device: &B::Device) -> Self {
        let mut blocks = Vec::new();
        let mut in_channels = 3;
        for &out_channels in kind.widths() {
            blocks.push(ConvBlock {
                conv: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                    .with_stride([2, 2])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(device),
                norm: BatchNormConfig::new(out_channels).init(device),
            });
            in_channels = out_channels;
        }
        Self {
            blocks,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            head: LinearConfig::new(in_channels, num_classes).init(device),
            activation: Relu::new(),
        }
    }

    /// Batch of normalized crops in, class logits out.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = input;
        for block in &self.blocks {
            x = self.activation.forward(block.norm.forward(block.conv.forward(x)));
        }
        let x = self.pool.forward(x);
        let x = x.flatten::<2>(1, 3);
        self.head.forward(x)
    }

    /// Persist architecture weights under `path` (extension supplied by the
    /// recorder).
    pub fn save_checkpoint(&self, path: &Path) -> Result<()> {
        self.clone()
            .save_file(path, &CompactRecorder::new())
            .map_err(|e| Error::Model(format!("failed to save checkpoint: {e}")))
    }

    /// Load weights saved by [`WellNet::save_checkpoint`] into a freshly
    /// constructed net of the same kind and class count.
    pub fn load_checkpoint(
        kind: ModelKind,
        num_classes: usize,
        path: &Path,
        device: &B::Device,
    ) -> Result<Self> {
        Self::new(kind, num_classes, device)
            .load_file(path, &CompactRecorder::new(), device)
            .map_err(|e| {
                Error::Model(format!(
                    "failed to load checkpoint {}: {e}",
                    path.display()
                ))
            })
    }
}

/// Crop a region out of an image and resize it to the network window.
pub fn prepare_crop(image: &DynamicImage, region: &Region) -> Option<RgbImage> {
    let crop = region.crop_from(image)?;
    Some(
        crop.resize_exact(CROP_SIZE, CROP_SIZE, FilterType::Triangle)
            .to_rgb8(),
    )
}

/// Stack prepared crops into an NCHW float tensor normalized to [-1, 1].
pub fn batch_to_tensor<B: Backend>(crops: &[RgbImage], device: &B::Device) -> Tensor<B, 4> {
    let side = CROP_SIZE as usize;
    let mut data = Vec::with_capacity(crops.len() * 3 * side * side);
    for crop in crops {
        for channel in 0..3 {
            for y in 0..CROP_SIZE {
                for x in 0..CROP_SIZE {
                    let v = crop.get_pixel(x, y)[channel] as f32 / 255.0;
                    data.push((v - 0.5) / 0.5);
                }
            }
        }
    }
    Tensor::from_data(TensorData::new(data, [crops.len(), 3, side, side]), device)
}

/// Arg-max class index per row of a logits tensor.
pub fn predicted_labels<B: Backend>(logits: Tensor<B, 2>) -> Result<Vec<i32>> {
    let data = logits.argmax(1).into_data().convert::<i64>();
    let indices: Vec<i64> = data
        .to_vec()
        .map_err(|e| Error::Model(format!("argmax readback failed: {e:?}")))?;
    Ok(indices.into_iter().map(|i| i as i32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn kind_parses_from_names_and_checkpoint_paths() {
        assert_eq!(ModelKind::from_name("mobilenet"), Some(ModelKind::MobileNet));
        assert_eq!(ModelKind::from_name("ResNet50"), Some(ModelKind::ResNet50));
        assert_eq!(ModelKind::from_name("vgg"), None);

        let path = PathBuf::from("/tmp/ws/wellscan/model/ResNet18_1724500000.mpk");
        assert_eq!(ModelKind::from_checkpoint_path(&path).unwrap(), ModelKind::ResNet18);
        assert!(ModelKind::from_checkpoint_path(Path::new("vgg_1.mpk")).is_err());
    }

    #[test]
    fn forward_produces_one_logit_row_per_crop() {
        let device = default_device();
        let net = WellNet::<InferBackend>::new(ModelKind::MobileNet, 4, &device);
        let crops = vec![RgbImage::new(CROP_SIZE, CROP_SIZE); 3];
        let logits = net.forward(batch_to_tensor(&crops, &device));
        assert_eq!(logits.dims(), [3, 4]);
        assert_eq!(predicted_labels(logits).unwrap().len(), 3);
    }

    #[test]
    fn checkpoint_round_trips_predictions() {
        let device = default_device();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("MobileNet_1");

        let net = WellNet::<InferBackend>::new(ModelKind::MobileNet, 3, &device);
        let crop = prepare_crop(
            &DynamicImage::new_rgb8(40, 40),
            &Region::new(0, 0, 40, 40),
        )
        .unwrap();
        let before = predicted_labels(net.forward(batch_to_tensor(&[crop.clone()], &device))).unwrap();

        net.save_checkpoint(&path).unwrap();
        let restored =
            WellNet::<InferBackend>::load_checkpoint(ModelKind::MobileNet, 3, &path, &device)
                .unwrap();
        let after = predicted_labels(restored.forward(batch_to_tensor(&[crop], &device))).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn prepare_crop_resizes_to_the_network_window() {
        let img = DynamicImage::new_rgb8(100, 80);
        let crop = prepare_crop(&img, &Region::new(10, 10, 40, 40)).unwrap();
        assert_eq!((crop.width(), crop.height()), (CROP_SIZE, CROP_SIZE));
        assert!(prepare_crop(&img, &Region::new(200, 200, 10, 10)).is_none());
    }
}
