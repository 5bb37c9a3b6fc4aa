//! Math utilities and helpers.

use glam::{Mat4, Vec4};

/// Row-major 3x4 affine transform as consumed by acceleration structure builds.
///
/// The layout matches `VkTransformMatrixKHR`: three rows of four floats, the
/// translation in the last column.
pub type Transform3x4 = [f32; 12];

/// Identity 3x4 transform.
pub const IDENTITY_3X4: Transform3x4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
];

/// Pack a column-major [`Mat4`] into a row-major 3x4 transform.
///
/// The projective row is dropped.
#[inline]
pub fn pack_transform(matrix: Mat4) -> Transform3x4 {
    let rows = matrix.transpose().to_cols_array();
    let mut packed = [0.0; 12];
    packed.copy_from_slice(&rows[..12]);
    packed
}

/// Expand a row-major 3x4 transform back into a [`Mat4`].
#[inline]
pub fn unpack_transform(packed: &Transform3x4) -> Mat4 {
    Mat4::from_cols(
        Vec4::new(packed[0], packed[4], packed[8], 0.0),
        Vec4::new(packed[1], packed[5], packed[9], 0.0),
        Vec4::new(packed[2], packed[6], packed[10], 0.0),
        Vec4::new(packed[3], packed[7], packed[11], 1.0),
    )
}

/// Align a value up to a power-of-two alignment.
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Smallest `d` such that `d * d >= n`.
pub fn ceil_sqrt(n: u32) -> u32 {
    let mut d = 0;
    while d * d < n {
        d += 1;
    }
    d
}

/// Smallest `d` such that `d * d * d >= n`.
pub fn ceil_cbrt(n: u32) -> u32 {
    let mut d = 0;
    while d * d * d < n {
        d += 1;
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec3;

    #[test]
    fn pack_identity() {
        assert_eq!(pack_transform(Mat4::IDENTITY), IDENTITY_3X4);
    }

    #[test]
    fn pack_puts_translation_in_last_column() {
        let packed = pack_transform(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(packed[3], 1.0);
        assert_eq!(packed[7], 2.0);
        assert_eq!(packed[11], 3.0);
    }

    #[test]
    fn unpack_inverts_pack() {
        let m = Mat4::from_scale_rotation_translation(
            Vec3::new(12.0, 1.0, 12.0),
            glam::Quat::from_rotation_y(0.7),
            Vec3::new(-6.0, 0.5, -6.0),
        );
        let back = unpack_transform(&pack_transform(m));
        for (a, b) in m.to_cols_array().iter().zip(back.to_cols_array().iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn align_up_powers_of_two() {
        assert_eq!(align_up(32, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 64), 128);
        assert_eq!(align_up(0, 256), 0);
    }

    #[test]
    fn grid_dimensions() {
        assert_eq!(ceil_sqrt(1), 1);
        assert_eq!(ceil_sqrt(2), 2);
        assert_eq!(ceil_sqrt(9), 3);
        assert_eq!(ceil_sqrt(10), 4);
        assert_eq!(ceil_cbrt(1), 1);
        assert_eq!(ceil_cbrt(8), 2);
        assert_eq!(ceil_cbrt(9), 3);
        assert_eq!(ceil_cbrt(1000), 10);
    }
}
