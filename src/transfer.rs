//! Moving host frames into device-visible memory.
//!
//! Devices expect tightly packed planes. A host frame whose strides
//! already equal the tight line size is passed through without a copy;
//! anything else is copied row by row into a staging buffer that is
//! allocated once per session.

use xma_codec::{plane_span, CodecError, PixelFormat, VideoFrameData};

use crate::FrameView;

/// How a frame reached the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Host planes handed over as they are.
    Wrapped,
    /// Planes copied into the staging buffer.
    Staged,
}

#[derive(Debug)]
struct PlaneLayout {
    line: usize,
    rows: usize,
}

/// Per-session staging memory with tight strides.
#[derive(Debug)]
pub struct StagingBuffer {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    bit_depth: u8,
    layout: Vec<PlaneLayout>,
    planes: Vec<Vec<u8>>,
}

impl StagingBuffer {
    /// Allocate staging planes for frames of the given geometry.
    #[must_use]
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat, bit_depth: u8) -> Self {
        let layout: Vec<PlaneLayout> = (0..pixel_format.plane_count())
            .map(|plane| {
                let (_, rows) = pixel_format.plane_geometry(plane, width, height);
                let line = pixel_format.line_size(plane, width, bit_depth);
                PlaneLayout { line, rows }
            })
            .collect();
        let planes = layout.iter().map(|p| vec![0u8; p.line * p.rows]).collect();
        Self {
            width,
            height,
            pixel_format,
            bit_depth,
            layout,
            planes,
        }
    }

    /// Total bytes held.
    #[must_use]
    pub fn size(&self) -> usize {
        self.planes.iter().map(Vec::len).sum()
    }

    /// Free the staging planes.
    pub fn release(&mut self) {
        self.planes = Vec::new();
    }

    fn check_geometry(&self, frame: &dyn VideoFrameData) -> Result<(), CodecError> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(CodecError::InvalidDimensions {
                width: frame.width(),
                height: frame.height(),
            });
        }
        if frame.pixel_format() != self.pixel_format || frame.bit_depth() != self.bit_depth {
            return Err(CodecError::UnsupportedPixelFormat {
                format: frame.pixel_format(),
                bit_depth: frame.bit_depth(),
            });
        }
        for (plane, layout) in self.layout.iter().enumerate() {
            let stride = frame.stride(plane);
            if stride < layout.line {
                return Err(CodecError::invalid_param(format!(
                    "plane {plane} stride {stride} below line size {}",
                    layout.line
                )));
            }
            let needed = plane_span(stride, layout.line, layout.rows);
            let have = frame.plane(plane).len();
            if have < needed {
                return Err(CodecError::invalid_param(format!(
                    "plane {plane} holds {have} bytes, needs {needed}"
                )));
            }
        }
        Ok(())
    }
}

/// Make `frame` available to the device.
///
/// Returns a view over either the host planes or the staging buffer.
pub fn transfer<'a>(
    frame: &'a dyn VideoFrameData,
    staging: &'a mut StagingBuffer,
) -> Result<(FrameView<'a>, TransferMode), CodecError> {
    if staging.planes.len() != staging.layout.len() {
        return Err(CodecError::Closed);
    }
    staging.check_geometry(frame)?;

    let tight = staging
        .layout
        .iter()
        .enumerate()
        .all(|(plane, layout)| frame.stride(plane) == layout.line);

    let empty: &[u8] = &[];
    let mut view = FrameView {
        width: staging.width,
        height: staging.height,
        pixel_format: staging.pixel_format,
        bit_depth: staging.bit_depth,
        planes: [empty; 3],
        strides: [0; 3],
    };

    if tight {
        for (plane, layout) in staging.layout.iter().enumerate() {
            view.planes[plane] = &frame.plane(plane)[..layout.line * layout.rows];
            view.strides[plane] = layout.line;
        }
        return Ok((view, TransferMode::Wrapped));
    }

    for (plane, layout) in staging.layout.iter().enumerate() {
        copy_plane(
            frame.plane(plane),
            frame.stride(plane),
            &mut staging.planes[plane],
            layout,
        );
    }
    let staging: &'a StagingBuffer = staging;
    for (plane, layout) in staging.layout.iter().enumerate() {
        view.planes[plane] = &staging.planes[plane];
        view.strides[plane] = layout.line;
    }
    Ok((view, TransferMode::Staged))
}

fn copy_plane(src: &[u8], src_stride: usize, dst: &mut [u8], layout: &PlaneLayout) {
    // Geometry was checked: every source row holds at least `line` bytes.
    for (src_row, dst_row) in src
        .chunks(src_stride)
        .zip(dst.chunks_exact_mut(layout.line))
        .take(layout.rows)
    {
        dst_row.copy_from_slice(&src_row[..layout.line]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use xma_codec::VideoFrame;

    fn random_frame(rng: &mut StdRng, format: PixelFormat, bit_depth: u8, padding: usize) -> VideoFrame {
        let mut frame = VideoFrame::alloc_padded(32, 16, format, bit_depth, padding);
        for plane in &mut frame.planes {
            rng.fill(plane.as_mut_slice());
        }
        frame
    }

    fn view_bytes(view: &FrameView<'_>) -> Vec<u8> {
        (0..view.plane_count())
            .flat_map(|plane| view.rows(plane).flatten().copied().collect::<Vec<_>>())
            .collect()
    }

    #[test]
    fn test_tight_frame_wrapped() {
        let mut rng = StdRng::seed_from_u64(1);
        let frame = random_frame(&mut rng, PixelFormat::Yuv420p, 8, 0);
        let mut staging = StagingBuffer::new(32, 16, PixelFormat::Yuv420p, 8);
        let (view, mode) = transfer(&frame, &mut staging).unwrap();
        assert_eq!(mode, TransferMode::Wrapped);
        assert_eq!(view.planes[0].as_ptr(), frame.planes[0].as_ptr());
        assert_eq!(view_bytes(&view), frame.packed());
    }

    #[test]
    fn test_padded_frame_staged() {
        let mut rng = StdRng::seed_from_u64(2);
        for (format, bit_depth) in [
            (PixelFormat::Yuv420p, 8),
            (PixelFormat::Yuv422p, 16),
            (PixelFormat::Yuv444p, 8),
        ] {
            let padding = rng.random_range(1..64);
            let frame = random_frame(&mut rng, format, bit_depth, padding);
            let mut staging = StagingBuffer::new(32, 16, format, bit_depth);
            let (view, mode) = transfer(&frame, &mut staging).unwrap();
            assert_eq!(mode, TransferMode::Staged);
            assert_eq!(view.strides[0], format.line_size(0, 32, bit_depth));
            assert_eq!(view_bytes(&view), frame.packed(), "{format:?}");
        }
    }

    #[test]
    fn test_mismatched_geometry_rejected() {
        let frame = VideoFrame::alloc(16, 16, PixelFormat::Yuv420p, 8);
        let mut staging = StagingBuffer::new(32, 16, PixelFormat::Yuv420p, 8);
        assert!(matches!(
            transfer(&frame, &mut staging),
            Err(CodecError::InvalidDimensions { width: 16, .. })
        ));

        let frame = VideoFrame::alloc(32, 16, PixelFormat::Yuv444p, 8);
        assert!(matches!(
            transfer(&frame, &mut staging),
            Err(CodecError::UnsupportedPixelFormat { .. })
        ));
    }

    #[test]
    fn test_short_plane_rejected() {
        let mut frame = VideoFrame::alloc_padded(32, 16, PixelFormat::Yuv420p, 8, 4);
        frame.planes[2].truncate(10);
        let mut staging = StagingBuffer::new(32, 16, PixelFormat::Yuv420p, 8);
        assert!(matches!(transfer(&frame, &mut staging), Err(CodecError::InvalidParam(_))));
    }

    #[test]
    fn test_released_staging_refuses_transfer() {
        let frame = VideoFrame::alloc(32, 16, PixelFormat::Yuv420p, 8);
        let mut staging = StagingBuffer::new(32, 16, PixelFormat::Yuv420p, 8);
        assert_eq!(staging.size(), 32 * 16 * 3 / 2);
        staging.release();
        assert!(matches!(transfer(&frame, &mut staging), Err(CodecError::Closed)));
    }
}
