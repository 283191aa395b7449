use anyhow::Result;
use image_hasher::{HashAlg, HasherConfig, ImageHash};

use crate::models::CapturedImage;

/// Perceptual hash of a frame; visually similar frames hash close together.
pub fn frame_fingerprint(frame: &CapturedImage) -> Result<ImageHash> {
    let img = frame.decode()?;
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::DoubleGradient)
        .hash_size(8, 8)
        .to_hasher();
    Ok(hasher.hash_image(&img))
}

/// True when `current` differs from `previous` by fewer than `threshold` bits.
pub fn is_unchanged(current: &ImageHash, previous: Option<&ImageHash>, threshold: u32) -> bool {
    previous.is_some_and(|previous| current.dist(previous) < threshold)
}
