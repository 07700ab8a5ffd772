//! Big-endian word conversion for FITS data units.
//!
//! FITS stores all binary data most-significant byte first. [`BeWord`] is
//! implemented for every on-disk element type so the data-unit engine can
//! decode and encode generically over BITPIX.

use bytemuck::Pod;

/// An on-disk FITS element type.
pub trait BeWord: Pod + Send + Sync {
    /// Width of one element in bytes.
    const WIDTH: usize;

    /// Read one element from the first [`Self::WIDTH`] bytes of `buf`.
    fn read_be(buf: &[u8]) -> Self;

    /// Widen the element to `f64` before BSCALE/BZERO are applied.
    fn to_f64(self) -> f64;

    /// Convert native-endian elements packed in `buf` to big-endian in place.
    ///
    /// # Panics
    /// Panics if `buf.len()` is not a multiple of [`Self::WIDTH`].
    fn native_to_be_in_place(buf: &mut [u8]) {
        assert!(
            buf.len() % Self::WIDTH == 0,
            "buffer length must be a multiple of {}",
            Self::WIDTH
        );
        if cfg!(target_endian = "little") {
            for chunk in buf.chunks_exact_mut(Self::WIDTH) {
                chunk.reverse();
            }
        }
    }
}

macro_rules! impl_be_word {
    ($($ty:ty => $width:expr),* $(,)?) => {
        $(
            impl BeWord for $ty {
                const WIDTH: usize = $width;

                #[inline]
                fn read_be(buf: &[u8]) -> Self {
                    let mut bytes = [0u8; $width];
                    bytes.copy_from_slice(&buf[..$width]);
                    <$ty>::from_be_bytes(bytes)
                }

                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_be_word! {
    u8 => 1,
    i16 => 2,
    i32 => 4,
    i64 => 8,
    u64 => 8,
    f32 => 4,
    f64 => 8,
}

/// Decode big-endian elements through `convert`, one output per element.
///
/// `out` must hold exactly `raw.len() / T::WIDTH` values.
pub fn decode_slice<T: BeWord>(raw: &[u8], out: &mut [f64], convert: impl Fn(T) -> f64) {
    debug_assert_eq!(raw.len(), out.len() * T::WIDTH);
    for (dst, chunk) in out.iter_mut().zip(raw.chunks_exact(T::WIDTH)) {
        *dst = convert(T::read_be(chunk));
    }
}

/// Pack native elements into a big-endian byte vector.
pub fn encode_be<T: BeWord>(values: &[T]) -> Vec<u8> {
    let mut bytes: Vec<u8> = bytemuck::pod_collect_to_vec(values);
    T::native_to_be_in_place(&mut bytes);
    bytes
}
