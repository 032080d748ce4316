//! Blob detection block

use bytemuck::{Pod, Zeroable};

/// Star (blob) extraction tuning.
///
/// Total block size: 44 bytes
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct BlobParams {
    /// Aggressiveness of the dynamic hot pixel finder; smaller is more aggressive
    pub spike_limit: i32,

    /// Dynamic hot pixel rejection (0 = off, 1 = on)
    pub dynamic_hot_pixels: i32,

    /// Smoothing filter radius (px)
    pub r_smooth: i32,

    /// High pass filter (0 = off, 1 = on)
    pub high_pass_filter: i32,

    /// High pass filter radius (px)
    pub r_high_pass_filter: i32,

    /// Distance from the image edge where centroid search starts (px)
    pub centroid_search_border: i32,

    /// Return the filtered image instead of the raw one (0 = off, 1 = on)
    pub filter_return_image: i32,

    /// Pixels brighter than mean + n_sigma * noise are blob candidates
    pub n_sigma: f32,

    /// Minimum spacing between distinct stars (px)
    pub unique_star_spacing: i32,

    /// Rebuild the static hot pixel mask from the next frame (nonzero = remake)
    pub make_static_hp_mask: i32,

    /// Apply the static hot pixel mask (0 = off, 1 = on)
    pub use_static_hp_mask: i32,
}

impl BlobParams {
    /// Block size in bytes
    pub const SIZE: usize = 44;
}

impl Default for BlobParams {
    fn default() -> Self {
        Self {
            spike_limit: 3,
            dynamic_hot_pixels: 1,
            r_smooth: 2,
            high_pass_filter: 1,
            r_high_pass_filter: 10,
            centroid_search_border: 1,
            filter_return_image: 0,
            n_sigma: 2.0,
            unique_star_spacing: 15,
            make_static_hp_mask: 0,
            use_static_hp_mask: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size() {
        assert_eq!(std::mem::size_of::<BlobParams>(), BlobParams::SIZE);
    }
}
