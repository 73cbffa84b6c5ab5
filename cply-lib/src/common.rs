/// Number of consecutive splats sharing one set of quantization bounds.
pub const CHUNK_SIZE: usize = 256;

/// Zeroth-order spherical harmonic basis constant.
#[allow(clippy::excessive_precision)]
pub const SH_C0: f32 = 0.28209479177387814;

/// For each value of the 2-bit rotation tag, the output slots (`rot_0..rot_3`)
/// receiving `largest, rest[0], rest[1], rest[2]` in that order.
pub const ROTATION_SLOTS: [[usize; 4]; 4] = [
    [0, 1, 2, 3], // (m, a, b, c)
    [1, 0, 2, 3], // (a, m, b, c)
    [2, 0, 1, 3], // (a, b, m, c)
    [3, 0, 1, 2], // (a, b, c, m)
];

/// Maps the low `bits` bits of `value` to `[0, 1]`. `bits` must be in `1..=32`.
#[inline]
pub fn unorm(value: u32, bits: u32) -> f32 {
    debug_assert!(bits > 0 && bits <= 32, "unorm width out of range: {}", bits);
    let mask = u32::MAX >> (32 - bits);
    (value & mask) as f32 / mask as f32
}

#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + t * (b - a)
}

#[inline]
pub fn unpack_111011(value: u32) -> [f32; 3] {
    [
        unorm(value >> 21, 11),
        unorm(value >> 11, 10),
        unorm(value, 11),
    ]
}

#[inline]
pub fn unpack_8888(value: u32) -> [f32; 4] {
    [
        unorm(value >> 24, 8),
        unorm(value >> 16, 8),
        unorm(value >> 8, 8),
        unorm(value, 8),
    ]
}

/// A smallest-three encoded unit quaternion, before the components are
/// placed into their output slots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnpackedRotation {
    pub largest_slot: usize,
    pub largest: f32,
    pub rest: [f32; 3],
}

impl UnpackedRotation {
    #[inline]
    pub fn from_packed(value: u32) -> Self {
        let norm = 1.0 / (std::f32::consts::SQRT_2 * 0.5);
        let a = (unorm(value >> 20, 10) - 0.5) * norm;
        let b = (unorm(value >> 10, 10) - 0.5) * norm;
        let c = (unorm(value, 10) - 0.5) * norm;
        let m = (1.0 - (a * a + b * b + c * c)).max(0.0).sqrt();

        UnpackedRotation {
            largest_slot: (value >> 30) as usize,
            largest: m,
            rest: [a, b, c],
        }
    }

    /// Components in `rot_0..rot_3` order.
    #[inline]
    pub fn components(&self) -> [f32; 4] {
        let slots = ROTATION_SLOTS[self.largest_slot & 3];
        let mut q = [0.0; 4];
        q[slots[0]] = self.largest;
        q[slots[1]] = self.rest[0];
        q[slots[2]] = self.rest[1];
        q[slots[3]] = self.rest[2];
        q
    }
}

#[inline]
pub fn unpack_rot(value: u32) -> [f32; 4] {
    UnpackedRotation::from_packed(value).components()
}

#[inline]
pub fn inv_sigmoid(x: f32) -> f32 {
    -(1.0 / x - 1.0).ln()
}

#[inline]
pub fn color_to_sh_dc(channel: f32) -> f32 {
    (channel - 0.5) / SH_C0
}

#[inline]
pub fn unquantize_sh(x: u8) -> f32 {
    let n = match x {
        0 => 0.0,
        255 => 1.0,
        v => (v as f32 + 0.5) / 256.0,
    };
    (n - 0.5) * 8.0
}

/// Spherical harmonic bands for a count of `f_rest_*` coefficients.
#[inline]
pub const fn sh_bands_for_coeffs(count: usize) -> Option<usize> {
    match count {
        0 => Some(0),
        9 => Some(1),
        24 => Some(2),
        45 => Some(3),
        _ => None,
    }
}

#[inline]
pub const fn chunks_for_splats(num_splats: usize) -> usize {
    num_splats.div_ceil(CHUNK_SIZE)
}
