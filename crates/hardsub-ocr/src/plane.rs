use std::fmt;
use std::ops::Deref;

use hardsub_types::RegionImage;

use crate::error::OcrError;

/// Immutable view over a luminance plane.
#[derive(Clone)]
pub struct LumaPlane<'a> {
    width: u32,
    height: u32,
    stride: usize,
    data: &'a [u8],
}

impl<'a> LumaPlane<'a> {
    pub fn from_parts(
        width: u32,
        height: u32,
        stride: usize,
        data: &'a [u8],
    ) -> Result<Self, OcrError> {
        let required = stride
            .checked_mul(height as usize)
            .ok_or(OcrError::PlaneOverflow { stride, height })?;
        if data.len() < required {
            return Err(OcrError::InsufficientPlaneData {
                provided: data.len(),
                required,
            });
        }
        Ok(Self {
            width,
            height,
            stride,
            data: &data[..required],
        })
    }

    pub fn from_region(region: &'a RegionImage) -> Self {
        // RegionImage is always tightly packed.
        Self {
            width: region.width(),
            height: region.height(),
            stride: region.width() as usize,
            data: region.data(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Rows without stride padding.
    pub fn to_packed(&self) -> Vec<u8> {
        let width = self.width as usize;
        if self.stride == width {
            return self.data.to_vec();
        }
        let mut packed = Vec::with_capacity(width * self.height as usize);
        for row in self.data.chunks(self.stride).take(self.height as usize) {
            packed.extend_from_slice(&row[..width.min(row.len())]);
        }
        packed
    }
}

impl fmt::Debug for LumaPlane<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LumaPlane")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Deref for LumaPlane<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_plane_is_rejected() {
        let data = [0u8; 10];
        let err = LumaPlane::from_parts(4, 3, 4, &data).unwrap_err();
        assert!(matches!(
            err,
            OcrError::InsufficientPlaneData {
                provided: 10,
                required: 12
            }
        ));
    }

    #[test]
    fn packed_rows_drop_padding() {
        let data = [1u8, 2, 0, 3, 4, 0];
        let plane = LumaPlane::from_parts(2, 2, 3, &data).unwrap();
        assert_eq!(plane.to_packed(), vec![1, 2, 3, 4]);
    }
}
