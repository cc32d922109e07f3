//! Decoding and down-scaling of image responses.

use image::DynamicImage;
use image::imageops::FilterType;

use crate::error::Result;

/// How an image is fitted into the requested bounds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ScaleType {
    /// Fill both bounds exactly, ignoring the aspect ratio.
    FitXy,
    /// Keep the aspect ratio and fit inside the bounds.
    Center,
    /// Keep the aspect ratio and cover the bounds fully.
    CenterCrop,
    /// Keep the aspect ratio and fit inside the bounds.
    #[default]
    CenterInside,
}

/// Target bounds for an image response. Zero means unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageOptions {
    /// Maximum width in pixels.
    pub max_width: u32,
    /// Maximum height in pixels.
    pub max_height: u32,
    /// Fitting policy.
    pub scale_type: ScaleType,
}

impl ImageOptions {
    /// Bounds of `max_width` x `max_height` with the given policy.
    pub fn new(max_width: u32, max_height: u32, scale_type: ScaleType) -> Self {
        Self {
            max_width,
            max_height,
            scale_type,
        }
    }
}

/// Compute one output dimension.
///
/// `primary` is the dimension being computed and `secondary` the other one,
/// so a width is `get_resized_dimension(max_w, max_h, w, h, ..)` and a
/// height is `get_resized_dimension(max_h, max_w, h, w, ..)`.
pub fn get_resized_dimension(
    max_primary: u32,
    max_secondary: u32,
    actual_primary: u32,
    actual_secondary: u32,
    scale_type: ScaleType,
) -> u32 {
    if max_primary == 0 && max_secondary == 0 {
        return actual_primary;
    }

    if scale_type == ScaleType::FitXy {
        return if max_primary == 0 {
            actual_primary
        } else {
            max_primary
        };
    }

    if max_primary == 0 {
        if actual_secondary == 0 {
            return actual_primary;
        }
        let ratio = f64::from(max_secondary) / f64::from(actual_secondary);
        return (f64::from(actual_primary) * ratio) as u32;
    }

    if max_secondary == 0 || actual_primary == 0 {
        return max_primary;
    }

    let ratio = f64::from(actual_secondary) / f64::from(actual_primary);
    let mut resized = max_primary;

    if scale_type == ScaleType::CenterCrop {
        if f64::from(resized) * ratio < f64::from(max_secondary) {
            resized = (f64::from(max_secondary) / ratio) as u32;
        }
        return resized;
    }

    if f64::from(resized) * ratio > f64::from(max_secondary) {
        resized = (f64::from(max_secondary) / ratio) as u32;
    }
    resized
}

/// Decode `data` and scale it down to fit `options`.
///
/// An image already within the desired size is returned at its natural size.
pub fn decode_image(data: &[u8], options: ImageOptions) -> Result<DynamicImage> {
    let image = image::load_from_memory(data)?;
    if options.max_width == 0 && options.max_height == 0 {
        return Ok(image);
    }

    let (width, height) = (image.width(), image.height());
    let desired_width = get_resized_dimension(
        options.max_width,
        options.max_height,
        width,
        height,
        options.scale_type,
    );
    let desired_height = get_resized_dimension(
        options.max_height,
        options.max_width,
        height,
        width,
        options.scale_type,
    );

    if desired_width == 0 || desired_height == 0 {
        return Ok(image);
    }
    if width > desired_width || height > desired_height {
        return Ok(image.resize_exact(desired_width, desired_height, FilterType::Triangle));
    }
    Ok(image)
}
