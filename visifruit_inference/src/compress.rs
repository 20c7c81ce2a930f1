//! Frame preparation: channel normalization, downscaling, JPEG encoding.

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage, imageops};
use tracing::{debug, warn};

use crate::error::InferenceError;
use visifruit::clock::TimestampUs;
use visifruit::frame::{ChannelOrder, Frame};
use visifruit::inference::CompressionConfig;

/// Samples per axis used by the channel-order heuristic.
const CHANNEL_SAMPLE_GRID: u32 = 64;

/// Blue-over-red ratio above which an RGB frame is treated as swapped.
const SWAP_BLUE_RED_RATIO: f64 = 1.3;

/// Minimum blue mean for the swap heuristic to trigger.
const SWAP_BLUE_MIN_MEAN: f64 = 150.0;

/// A validated frame in RGB order at source resolution.
#[derive(Debug, Clone)]
pub struct PreparedFrame {
    pub sequence: u64,
    pub captured_at_us: TimestampUs,
    pub image: RgbImage,
    /// An RGB-declared frame was detected as BGR and swapped.
    pub channels_corrected: bool,
}

impl PreparedFrame {
    #[inline]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Validate a frame and normalize it to RGB.
///
/// BGR frames are swapped. With `auto_correct`, RGB frames that look
/// swapped (strong blue cast) are corrected as well.
pub fn prepare(frame: &Frame, auto_correct: bool) -> Result<PreparedFrame, InferenceError> {
    frame.validate()?;

    let mut data = frame.data.to_vec();
    if frame.channel_order == ChannelOrder::Bgr {
        swap_red_blue(&mut data);
    }
    let mut image = RgbImage::from_raw(frame.width, frame.height, data).ok_or_else(|| {
        InferenceError::Compression("pixel buffer does not match dimensions".to_string())
    })?;

    let mut channels_corrected = false;
    if auto_correct && frame.channel_order == ChannelOrder::Rgb && looks_channel_swapped(&image) {
        warn!(
            "Frame {} looks BGR despite RGB declaration, swapping channels",
            frame.sequence
        );
        for px in image.pixels_mut() {
            px.0.swap(0, 2);
        }
        channels_corrected = true;
    }

    Ok(PreparedFrame {
        sequence: frame.sequence,
        captured_at_us: frame.captured_at_us,
        image,
        channels_corrected,
    })
}

fn swap_red_blue(data: &mut [u8]) {
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}

/// Blue-cast heuristic on a subsampled grid.
pub fn looks_channel_swapped(image: &RgbImage) -> bool {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return false;
    }
    let step_x = (w / CHANNEL_SAMPLE_GRID).max(1);
    let step_y = (h / CHANNEL_SAMPLE_GRID).max(1);

    let (mut red, mut blue, mut n) = (0u64, 0u64, 0u64);
    for y in (0..h).step_by(step_y as usize) {
        for x in (0..w).step_by(step_x as usize) {
            let px = image.get_pixel(x, y);
            red += u64::from(px[0]);
            blue += u64::from(px[2]);
            n += 1;
        }
    }
    let red_mean = red as f64 / n as f64;
    let blue_mean = blue as f64 / n as f64;
    blue_mean > SWAP_BLUE_RED_RATIO * red_mean && blue_mean > SWAP_BLUE_MIN_MEAN
}

/// Downscale so neither side exceeds `max_dimension`, keeping aspect ratio.
///
/// Returns the upload image and the factors that map upload pixels back
/// to source pixels.
pub fn downscale(image: &RgbImage, max_dimension: u32) -> (RgbImage, f64, f64) {
    let (w, h) = image.dimensions();
    let largest = w.max(h);
    if largest <= max_dimension {
        return (image.clone(), 1.0, 1.0);
    }
    let ratio = f64::from(max_dimension) / f64::from(largest);
    let nw = ((f64::from(w) * ratio).round() as u32).max(1);
    let nh = ((f64::from(h) * ratio).round() as u32).max(1);
    let resized = imageops::thumbnail(image, nw, nh);
    debug!("Downscaled {w}x{h} -> {nw}x{nh}");
    (
        resized,
        f64::from(w) / f64::from(nw),
        f64::from(h) / f64::from(nh),
    )
}

/// Quality cap for the upload size.
pub fn adaptive_quality(base: u8, width: u32, height: u32) -> u8 {
    let pixels = u64::from(width) * u64::from(height);
    let cap = if pixels > 640 * 480 {
        60
    } else if pixels > 480 * 480 {
        70
    } else if pixels > 320 * 320 {
        75
    } else {
        100
    };
    base.min(cap)
}

/// Encode as baseline JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, InferenceError> {
    let mut buf = Vec::with_capacity(image.as_raw().len() / 8);
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder.write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

/// Upload payload produced from a prepared frame.
#[derive(Debug, Clone)]
pub struct EncodedUpload {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    /// Upload → source pixel factors.
    pub scale_x: f64,
    pub scale_y: f64,
}

/// Downscale, pick quality and encode.
pub fn compress(
    frame: &PreparedFrame,
    config: &CompressionConfig,
) -> Result<EncodedUpload, InferenceError> {
    let (image, scale_x, scale_y) = downscale(&frame.image, config.max_dimension);
    let quality = if config.auto_quality {
        adaptive_quality(config.jpeg_quality, image.width(), image.height())
    } else {
        config.jpeg_quality
    };
    let jpeg = encode_jpeg(&image, quality)?;
    debug!(
        "Frame {} encoded {}x{} q{} -> {} bytes",
        frame.sequence,
        image.width(),
        image.height(),
        quality,
        jpeg.len()
    );
    Ok(EncodedUpload {
        jpeg,
        width: image.width(),
        height: image.height(),
        quality,
        scale_x,
        scale_y,
    })
}
