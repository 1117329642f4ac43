use std::time::Instant;

use crate::blur::box_blur;
use crate::dither::dither_image;
use crate::error::EngineError;
use crate::options::{Algorithm, DitheringOptions};
use crate::raster::RasterImage;
use crate::reduce::ColorReducer;
use crate::tone;

/// Run the full engine on `image`: tone adjustments, optional blur, then the selected
/// dithering strategy. The input is never modified; the result is a new image.
pub fn process(image: &RasterImage, options: &DitheringOptions) -> Result<RasterImage, EngineError> {
    image.validate()?;
    options.validate()?;
    let algorithm = Algorithm::parse(&options.algorithm)?;
    let reducer = ColorReducer::from_palette(options.palette.as_deref());

    let start = Instant::now();
    let (w, h) = (image.width as usize, image.height as usize);
    let mut pixels = image.data.clone();

    // 1) Tone curve
    tone::adjust(
        &mut pixels,
        options.contrast,
        options.midtones,
        options.highlights,
    );
    // 2) Optional blur
    box_blur(&mut pixels, w, h, options.blur);
    // 3) Dither / reduce
    dither_image(
        &mut pixels,
        w,
        h,
        algorithm,
        &reducer,
        options.random_magnitude,
        options.seed,
    );

    tracing::debug!(
        algorithm = algorithm.name(),
        width = image.width,
        height = image.height,
        palette = ?options.palette.as_ref().map(|p| p.len()),
        blur = options.blur,
        elapsed_ms = start.elapsed().as_millis(),
        "dithered image"
    );
    Ok(RasterImage::new(image.width, image.height, pixels))
}
