//! Decoded image frame

use super::format::{PixelFormat, Resolution};
use super::pool::PoolLease;
use crate::error::{AppError, Result};

/// Location of one plane inside a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Byte offset of the first row
    pub offset: usize,
    /// Bytes per row, including alignment padding
    pub stride: usize,
    /// Visible bytes per row
    pub width_bytes: usize,
    /// Number of rows
    pub rows: usize,
}

impl PlaneLayout {
    /// Bytes covered by this plane
    pub fn len(&self) -> usize {
        self.stride * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compute plane layouts and total buffer size for a geometry.
///
/// Planes are stored back to back; each stride is the visible row width
/// rounded up to `stride_align` (a power of two).
pub fn plane_layout(
    resolution: Resolution,
    format: PixelFormat,
    stride_align: usize,
) -> (Vec<PlaneLayout>, usize) {
    let align = stride_align.max(1);
    let mut offset = 0;
    let planes = format
        .plane_sizes(resolution)
        .into_iter()
        .map(|(width_bytes, rows)| {
            let stride = width_bytes.div_ceil(align) * align;
            let plane = PlaneLayout {
                offset,
                stride,
                width_bytes,
                rows,
            };
            offset += plane.len();
            plane
        })
        .collect();
    (planes, offset)
}

/// A decoded image backed by a pooled buffer.
///
/// Frames are deliberately not `Clone`: a frame is returned to its pool by
/// moving it into [`FramePool::release`](super::pool::FramePool::release).
/// A handed-out frame carries a lease on its pool slot, so dropping it
/// without a release still frees the slot.
#[derive(Debug)]
pub struct ImageFrame {
    pool_id: u64,
    buffer_id: u64,
    resolution: Resolution,
    format: PixelFormat,
    stride_align: usize,
    planes: Vec<PlaneLayout>,
    data: Vec<u8>,
    lease: Option<PoolLease>,
    /// Capture sequence number of the image currently held
    pub sequence: u64,
}

impl ImageFrame {
    /// Build a zeroed frame. Allocation failure is reported, not aborted on.
    pub(crate) fn allocate(
        pool_id: u64,
        buffer_id: u64,
        resolution: Resolution,
        format: PixelFormat,
        stride_align: usize,
    ) -> Result<Self> {
        let (planes, total) = plane_layout(resolution, format, stride_align);

        let mut data = Vec::new();
        data.try_reserve_exact(total)
            .map_err(|_| AppError::OutOfMemory { bytes: total })?;
        data.resize(total, 0);

        Ok(Self {
            pool_id,
            buffer_id,
            resolution,
            format,
            stride_align: stride_align.max(1),
            planes,
            data,
            lease: None,
            sequence: 0,
        })
    }

    pub fn pool_id(&self) -> u64 {
        self.pool_id
    }

    /// Pool-unique identity of the underlying buffer
    pub fn buffer_id(&self) -> u64 {
        self.buffer_id
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Row alignment used for every plane stride
    pub fn stride_align(&self) -> usize {
        self.stride_align
    }

    pub fn planes(&self) -> &[PlaneLayout] {
        &self.planes
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    /// Stride of plane `index` in bytes
    pub fn stride(&self, index: usize) -> Option<usize> {
        self.planes.get(index).map(|p| p.stride)
    }

    /// Bytes of plane `index`, including row padding
    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        let p = self.planes.get(index)?;
        self.data.get(p.offset..p.offset + p.len())
    }

    pub fn plane_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        let p = *self.planes.get(index)?;
        self.data.get_mut(p.offset..p.offset + p.len())
    }

    /// Whole buffer, planes back to back
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check the sizing invariants: every plane fits in the buffer and
    /// every stride covers the visible row.
    pub fn is_well_formed(&self) -> bool {
        self.resolution.is_valid()
            && self.planes.len() == self.format.plane_count()
            && self.planes.iter().all(|p| {
                p.stride >= p.width_bytes
                    && p.rows > 0
                    && p.offset + p.rows * p.stride <= self.data.len()
            })
    }

    pub(crate) fn attach_lease(&mut self, lease: PoolLease) {
        self.lease = Some(lease);
    }

    pub(crate) fn take_lease(&mut self) -> Option<PoolLease> {
        self.lease.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_invariants_all_formats() {
        for format in PixelFormat::decoded() {
            for align in [1, 4, 16, 64] {
                for res in [Resolution::VGA, Resolution::new(33, 17), Resolution::new(1, 1)] {
                    let frame = ImageFrame::allocate(1, 1, res, *format, align).unwrap();
                    assert!(frame.is_well_formed(), "{} {} align {}", res, format, align);
                    for p in frame.planes() {
                        assert_eq!(p.stride % align, 0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_yuv420_layout_is_contiguous() {
        let frame =
            ImageFrame::allocate(1, 1, Resolution::VGA, PixelFormat::Yuv420p, 1).unwrap();
        let planes = frame.planes();
        assert_eq!(planes[0].offset, 0);
        assert_eq!(planes[1].offset, 640 * 480);
        assert_eq!(planes[2].offset, 640 * 480 + 320 * 240);
        assert_eq!(frame.len(), 640 * 480 * 3 / 2);
    }

    #[test]
    fn test_rgb_stride_padding() {
        let frame =
            ImageFrame::allocate(1, 1, Resolution::new(10, 2), PixelFormat::Rgb24, 16).unwrap();
        assert_eq!(frame.stride(0), Some(32));
        assert_eq!(frame.len(), 64);
        let row_padding = &frame.plane(0).unwrap()[30..32];
        assert_eq!(row_padding, &[0, 0]);
        assert!(frame.plane(1).is_none());
    }

    #[test]
    fn test_plane_mut_writes_land_in_plane() {
        let mut frame =
            ImageFrame::allocate(1, 1, Resolution::new(4, 4), PixelFormat::Yuv420p, 1).unwrap();
        frame.plane_mut(2).unwrap().fill(7);
        assert!(frame.plane(0).unwrap().iter().all(|b| *b == 0));
        assert!(frame.plane(1).unwrap().iter().all(|b| *b == 0));
        assert!(frame.plane(2).unwrap().iter().all(|b| *b == 7));
    }
}
