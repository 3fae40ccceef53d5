//! Typed, band-interleaved pixel buffers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sample type of a raster band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    F32,
    F64,
}

impl SampleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleType::U8 => "u8",
            SampleType::U16 => "u16",
            SampleType::U32 => "u32",
            SampleType::I8 => "i8",
            SampleType::I16 => "i16",
            SampleType::I32 => "i32",
            SampleType::F32 => "f32",
            SampleType::F64 => "f64",
        }
    }

    /// Map TIFF `BitsPerSample` and `SampleFormat` (1 uint, 2 int, 3 float).
    pub fn from_tiff(bits: u8, sample_format: u16) -> Option<Self> {
        match (sample_format, bits) {
            (1, 8) => Some(SampleType::U8),
            (1, 16) => Some(SampleType::U16),
            (1, 32) => Some(SampleType::U32),
            (2, 8) => Some(SampleType::I8),
            (2, 16) => Some(SampleType::I16),
            (2, 32) => Some(SampleType::I32),
            (3, 32) => Some(SampleType::F32),
            (3, 64) => Some(SampleType::F64),
            _ => None,
        }
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sample type that can hold a nodata value given as `f64`.
trait Sample: Copy {
    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
}

macro_rules! impl_sample {
    ($($t:ty),*) => {
        $(
            impl Sample for $t {
                fn from_f64(value: f64) -> Self {
                    value as $t
                }
                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_sample!(u8, u16, u32, i8, i16, i32, f32, f64);

/// Pixel samples, band-interleaved by pixel, row-major.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! dispatch {
    ($value:expr, $v:ident => $body:expr) => {
        match $value {
            PixelData::U8($v) => $body,
            PixelData::U16($v) => $body,
            PixelData::U32($v) => $body,
            PixelData::I8($v) => $body,
            PixelData::I16($v) => $body,
            PixelData::I32($v) => $body,
            PixelData::F32($v) => $body,
            PixelData::F64($v) => $body,
        }
    };
}

macro_rules! map_same {
    ($value:expr, $v:ident => $body:expr) => {
        match $value {
            PixelData::U8($v) => PixelData::U8($body),
            PixelData::U16($v) => PixelData::U16($body),
            PixelData::U32($v) => PixelData::U32($body),
            PixelData::I8($v) => PixelData::I8($body),
            PixelData::I16($v) => PixelData::I16($body),
            PixelData::I32($v) => PixelData::I32($body),
            PixelData::F32($v) => PixelData::F32($body),
            PixelData::F64($v) => PixelData::F64($body),
        }
    };
}

/// A rectangular pixel window, possibly reaching outside the source grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col: i64,
    pub row: i64,
    pub cols: usize,
    pub rows: usize,
}

impl PixelWindow {
    /// Number of window pixels that fall inside a `width` x `height` grid.
    pub fn pixels_inside(&self, width: usize, height: usize) -> usize {
        let span = |start: i64, len: usize, limit: usize| -> usize {
            let lo = start.max(0);
            let hi = (start + len as i64).min(limit as i64);
            (hi - lo).max(0) as usize
        };
        span(self.col, self.cols, width) * span(self.row, self.rows, height)
    }

    pub fn len(&self) -> usize {
        self.cols * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PixelData {
    /// A buffer of `len` samples all set to `value`.
    pub fn filled(sample_type: SampleType, len: usize, value: f64) -> Self {
        match sample_type {
            SampleType::U8 => PixelData::U8(vec![u8::from_f64(value); len]),
            SampleType::U16 => PixelData::U16(vec![u16::from_f64(value); len]),
            SampleType::U32 => PixelData::U32(vec![u32::from_f64(value); len]),
            SampleType::I8 => PixelData::I8(vec![i8::from_f64(value); len]),
            SampleType::I16 => PixelData::I16(vec![i16::from_f64(value); len]),
            SampleType::I32 => PixelData::I32(vec![i32::from_f64(value); len]),
            SampleType::F32 => PixelData::F32(vec![f32::from_f64(value); len]),
            SampleType::F64 => PixelData::F64(vec![value; len]),
        }
    }

    pub fn sample_type(&self) -> SampleType {
        match self {
            PixelData::U8(_) => SampleType::U8,
            PixelData::U16(_) => SampleType::U16,
            PixelData::U32(_) => SampleType::U32,
            PixelData::I8(_) => SampleType::I8,
            PixelData::I16(_) => SampleType::I16,
            PixelData::I32(_) => SampleType::I32,
            PixelData::F32(_) => SampleType::F32,
            PixelData::F64(_) => SampleType::F64,
        }
    }

    /// Total number of samples across all bands.
    pub fn len(&self) -> usize {
        dispatch!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample `index` widened to `f64`.
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        dispatch!(self, v => v.get(index).map(|s| s.to_f64()))
    }

    /// Copy `window` out of a `width` x `height` grid with `bands`
    /// interleaved samples per pixel. Pixels outside the grid are `nodata`.
    pub fn window(
        &self,
        width: usize,
        height: usize,
        bands: usize,
        window: PixelWindow,
        nodata: f64,
    ) -> PixelData {
        map_same!(self, v => extract(v, width, height, bands, window, nodata))
    }
}

fn extract<T: Sample>(
    data: &[T],
    width: usize,
    height: usize,
    bands: usize,
    window: PixelWindow,
    nodata: f64,
) -> Vec<T> {
    let fill = T::from_f64(nodata);
    let mut out = vec![fill; window.cols * window.rows * bands];

    let col_lo = window.col.max(0);
    let col_hi = (window.col + window.cols as i64).min(width as i64);
    if col_lo >= col_hi {
        return out;
    }
    let run = (col_hi - col_lo) as usize * bands;
    let dst_col = (col_lo - window.col) as usize;

    for r in 0..window.rows {
        let src_row = window.row + r as i64;
        if src_row < 0 || src_row >= height as i64 {
            continue;
        }
        let src = (src_row as usize * width + col_lo as usize) * bands;
        let dst = (r * window.cols + dst_col) * bands;
        out[dst..dst + run].copy_from_slice(&data[src..src + run]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_4x3() -> PixelData {
        // Values encode (row, col) as row * 10 + col.
        PixelData::I16(vec![0, 1, 2, 3, 10, 11, 12, 13, 20, 21, 22, 23])
    }

    #[test]
    fn test_window_inside() {
        let w = PixelWindow {
            col: 1,
            row: 1,
            cols: 2,
            rows: 2,
        };
        assert_eq!(
            grid_4x3().window(4, 3, 1, w, -1.0),
            PixelData::I16(vec![11, 12, 21, 22])
        );
        assert_eq!(w.pixels_inside(4, 3), 4);
    }

    #[test]
    fn test_window_partially_outside_fills_nodata() {
        let w = PixelWindow {
            col: -1,
            row: 2,
            cols: 3,
            rows: 2,
        };
        assert_eq!(
            grid_4x3().window(4, 3, 1, w, -9999.0),
            PixelData::I16(vec![-9999, 20, 21, -9999, -9999, -9999])
        );
        assert_eq!(w.pixels_inside(4, 3), 2);
    }

    #[test]
    fn test_window_fully_outside() {
        let w = PixelWindow {
            col: 10,
            row: 0,
            cols: 2,
            rows: 1,
        };
        assert_eq!(
            grid_4x3().window(4, 3, 1, w, 0.0),
            PixelData::I16(vec![0, 0])
        );
        assert_eq!(w.pixels_inside(4, 3), 0);
    }

    #[test]
    fn test_window_interleaved_bands() {
        // 2x1 RGB grid.
        let data = PixelData::F32(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let w = PixelWindow {
            col: 1,
            row: 0,
            cols: 2,
            rows: 1,
        };
        let out = data.window(2, 1, 3, w, f64::NAN);
        match out {
            PixelData::F32(v) => {
                assert_eq!(&v[..3], &[4.0, 5.0, 6.0]);
                assert!(v[3..].iter().all(|s| s.is_nan()));
            }
            other => panic!("unexpected type {:?}", other.sample_type()),
        }
    }

    #[test]
    fn test_filled_and_nan_in_integer_type() {
        let filled = PixelData::filled(SampleType::U8, 3, 255.0);
        assert_eq!(filled, PixelData::U8(vec![255, 255, 255]));
        // NaN saturates to zero in integer types.
        assert_eq!(PixelData::filled(SampleType::U16, 1, f64::NAN), PixelData::U16(vec![0]));
    }

    #[test]
    fn test_sample_type_from_tiff() {
        assert_eq!(SampleType::from_tiff(32, 3), Some(SampleType::F32));
        assert_eq!(SampleType::from_tiff(16, 2), Some(SampleType::I16));
        assert_eq!(SampleType::from_tiff(8, 1), Some(SampleType::U8));
        assert_eq!(SampleType::from_tiff(16, 3), None);
        assert_eq!(SampleType::from_tiff(12, 1), None);
    }
}
