//! Optimizer
//!
//! Shrinks the book without touching its content. The image pass re-encodes
//! raster assets (grayscale, lower JPEG quality, lossless PNG recompression)
//! and the container pass recompresses the finished archive.
//!
//! Both passes fail open: any problem is logged as an [`OptimizationWarning`]
//! and the original bytes are kept. A candidate is also dropped when it is
//! larger than its source or no longer sniffs as the same media type.

pub mod tools;

use std::{fs, io::Cursor, thread, time::Duration};

use image::{DynamicImage, ImageFormat, codecs::jpeg::JpegEncoder};
use log::{debug, info, warn};

use crate::{
    container::verify_container,
    error::{ConfigError, ContentError, EpubError, OptimizationWarning},
    optimizer::tools::{ADVZIP, NoOp, Recompressor, ZOPFLIPNG},
    types::{Asset, MediaType},
};

/// JPEG quality used when only grayscale conversion is requested
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Optimizer options
///
/// With every option off the optimizer is the identity.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    pub grayscale: bool,

    /// Target quality of re-encoded JPEG images, 1 to 100
    pub jpeg_quality: Option<u8>,

    /// Run the external lossless optimizers over PNG images and the container
    pub zopfli: bool,

    /// Number of worker threads, 0 means one per available core
    pub jobs: usize,

    /// Upper bound for a single external tool invocation
    pub tool_timeout: Duration,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            grayscale: false,
            jpeg_quality: None,
            zopfli: false,
            jobs: 0,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

impl OptimizerConfig {
    pub fn set_grayscale(&mut self, grayscale: bool) -> &mut Self {
        self.grayscale = grayscale;
        self
    }

    pub fn set_jpeg_quality(&mut self, quality: Option<u8>) -> &mut Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn set_zopfli(&mut self, zopfli: bool) -> &mut Self {
        self.zopfli = zopfli;
        self
    }

    pub fn set_jobs(&mut self, jobs: usize) -> &mut Self {
        self.jobs = jobs;
        self
    }

    pub fn set_tool_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.tool_timeout = timeout;
        self
    }

    /// Whether the image pass may change anything
    pub fn is_enabled(&self) -> bool {
        self.grayscale || self.jpeg_quality.is_some() || self.zopfli
    }

    /// Number of worker threads for `count` assets
    pub fn workers(&self, count: usize) -> usize {
        let jobs = match self.jobs {
            0 => thread::available_parallelism().map_or(1, |n| n.get()),
            jobs => jobs,
        };

        jobs.clamp(1, count.max(1))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(quality) = self.jpeg_quality {
            if !(1..=100).contains(&quality) {
                return Err(ConfigError::InvalidOption {
                    option: "jpeg-quality".to_string(),
                    reason: format!("{} is not between 1 and 100", quality),
                });
            }
        }

        if self.tool_timeout.is_zero() {
            return Err(ConfigError::InvalidOption {
                option: "tool-timeout".to_string(),
                reason: "the timeout must be positive".to_string(),
            });
        }

        Ok(())
    }
}

/// Optimizer
///
/// Holds the options and the external tools, detected once per run.
pub struct Optimizer {
    config: OptimizerConfig,
    png_tool: Box<dyn Recompressor>,
    zip_tool: Box<dyn Recompressor>,
}

impl Optimizer {
    /// Creates an optimizer, looking up the external tools only when needed
    pub fn new(config: OptimizerConfig) -> Self {
        let (png_tool, zip_tool): (Box<dyn Recompressor>, Box<dyn Recompressor>) = if config.zopfli
        {
            (
                tools::zopflipng(config.tool_timeout),
                tools::advzip(config.tool_timeout),
            )
        } else {
            (Box::new(NoOp::new(ZOPFLIPNG)), Box::new(NoOp::new(ADVZIP)))
        };

        Self::with_tools(config, png_tool, zip_tool)
    }

    /// Creates an optimizer with explicit recompressors
    pub fn with_tools(
        config: OptimizerConfig,
        png_tool: Box<dyn Recompressor>,
        zip_tool: Box<dyn Recompressor>,
    ) -> Self {
        Self {
            config,
            png_tool,
            zip_tool,
        }
    }

    /// Reads every asset and runs the image pass over it
    ///
    /// # Parameters
    /// - `assets`: Assets in catalog order
    ///
    /// # Return
    /// - `Ok(Vec<Vec<u8>>)`: Final bytes of each asset, in the same order
    /// - `Err(EpubError)`: An asset could not be read
    pub fn load_assets(&self, assets: &[Asset]) -> Result<Vec<Vec<u8>>, EpubError> {
        let mut data = assets
            .iter()
            .map(|asset| {
                fs::read(&asset.source_path).map_err(|err| ContentError::UnreadableAsset {
                    file: asset.path.clone(),
                    reason: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if !self.config.is_enabled() || assets.is_empty() {
            return Ok(data);
        }

        let workers = self.config.workers(assets.len());
        debug!("Optimizing {} assets on {} threads", assets.len(), workers);

        let updates = thread::scope(|scope| {
            let data = &data;
            let handles = (0..workers)
                .map(|worker| {
                    scope.spawn(move || {
                        (worker..assets.len())
                            .step_by(workers)
                            .filter_map(|index| {
                                self.optimize_asset(&assets[index], &data[index])
                                    .map(|bytes| (index, bytes))
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(updates) => updates,
                    Err(_) => {
                        warn!("An optimizer worker panicked, keeping its original assets");
                        vec![]
                    }
                })
                .collect::<Vec<_>>()
        });

        for (index, bytes) in updates {
            data[index] = bytes;
        }

        Ok(data)
    }

    /// Runs the image pass over one asset
    ///
    /// # Return
    /// - `Some(Vec<u8>)`: A smaller encoding of the same media type
    /// - `None`: The original bytes are to be kept
    pub fn optimize_asset(&self, asset: &Asset, original: &[u8]) -> Option<Vec<u8>> {
        if !asset.media_type.is_raster() {
            return None;
        }

        let mut candidate = match self.reencode(asset, original) {
            Ok(candidate) => candidate,
            Err(warning) => {
                warn!("{}", warning);
                None
            }
        };

        if asset.media_type == MediaType::Png && self.png_tool.is_available() {
            let input = candidate.as_deref().unwrap_or(original);
            match self.png_tool.recompress(input) {
                Ok(bytes) => candidate = Some(bytes),
                Err(warning) => warn!("{}", warning),
            }
        }

        let candidate = candidate?;

        let expected = asset.media_type.mime();
        if infer::get(&candidate).map(|kind| kind.mime_type()) != Some(expected) {
            warn!(
                "{}",
                OptimizationWarning::MediaTypeChanged {
                    asset: asset.path.clone(),
                    expected: expected.to_string(),
                }
            );
            return None;
        }

        if candidate.len() > original.len() {
            debug!(
                "Keeping '{}', the optimized version is larger ({} > {} bytes)",
                asset.path,
                candidate.len(),
                original.len()
            );
            return None;
        }

        debug!(
            "Optimized '{}': {} -> {} bytes",
            asset.path,
            original.len(),
            candidate.len()
        );
        Some(candidate)
    }

    /// Decodes and re-encodes an image when an option asks for it
    fn reencode(&self, asset: &Asset, data: &[u8]) -> Result<Option<Vec<u8>>, OptimizationWarning> {
        let grayscale = self.config.grayscale;

        let encode_warning = |err: image::ImageError| OptimizationWarning::Encode {
            asset: asset.path.clone(),
            reason: err.to_string(),
        };

        let mut out = Vec::new();
        match asset.media_type {
            MediaType::Jpeg if grayscale || self.config.jpeg_quality.is_some() => {
                let image = decode(asset, data, ImageFormat::Jpeg)?;
                let quality = self.config.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY);

                let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
                let result = if grayscale {
                    encoder.encode_image(&image.to_luma8())
                } else {
                    encoder.encode_image(&image.to_rgb8())
                };
                result.map_err(encode_warning)?;
            }

            MediaType::Png if grayscale => {
                let image = decode(asset, data, ImageFormat::Png)?.grayscale();
                image
                    .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
                    .map_err(encode_warning)?;
            }

            // only the first frame of an animation survives
            MediaType::Gif if grayscale => {
                let image = decode(asset, data, ImageFormat::Gif)?.grayscale();
                DynamicImage::ImageRgba8(image.to_rgba8())
                    .write_to(&mut Cursor::new(&mut out), ImageFormat::Gif)
                    .map_err(encode_warning)?;
            }

            _ => return Ok(None),
        }

        Ok(Some(out))
    }

    /// Runs the container pass
    ///
    /// The recompressed archive replaces the original only if it keeps the
    /// same entries in the same order, a valid `mimetype` entry and a size
    /// no larger than before.
    pub fn optimize_container(&self, archive: Vec<u8>) -> Vec<u8> {
        if !self.zip_tool.is_available() {
            return archive;
        }

        let expected = match verify_container(&archive) {
            Ok(names) => names,
            Err(err) => {
                warn!(
                    "{}",
                    OptimizationWarning::InvalidContainer {
                        reason: err.to_string()
                    }
                );
                return archive;
            }
        };

        let candidate = match self.zip_tool.recompress(&archive) {
            Ok(candidate) => candidate,
            Err(warning) => {
                warn!("{}", warning);
                return archive;
            }
        };

        let reason = match verify_container(&candidate) {
            Ok(names) if names != expected => "the entry list changed".to_string(),
            Ok(_) if candidate.len() > archive.len() => {
                debug!("Keeping the container, recompression made it larger");
                return archive;
            }
            Ok(_) => {
                info!(
                    "Recompressed the container with '{}': {} -> {} bytes",
                    self.zip_tool.name(),
                    archive.len(),
                    candidate.len()
                );
                return candidate;
            }
            Err(err) => err.to_string(),
        };

        warn!("{}", OptimizationWarning::InvalidContainer { reason });
        archive
    }
}

fn decode(asset: &Asset, data: &[u8], format: ImageFormat) -> Result<DynamicImage, OptimizationWarning> {
    image::load_from_memory_with_format(data, format).map_err(|err| OptimizationWarning::Decode {
        asset: asset.path.clone(),
        reason: err.to_string(),
    })
}
