//! Planar video frames and layout conversions.

use crate::{bytes_per_sample, CodecError, PixelFormat, VideoFrameData};

/// A video frame held as one buffer per plane.
///
/// Strides may exceed the tight line size; bytes past the visible
/// width of each row are padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel layout of the planes.
    pub pixel_format: PixelFormat,
    /// Bits per sample (8 or 16).
    pub bit_depth: u8,
    /// Plane buffers, `pixel_format.plane_count()` of them.
    pub planes: Vec<Vec<u8>>,
    /// Bytes between the starts of consecutive rows, per plane.
    pub strides: Vec<usize>,
    /// Presentation timestamp.
    pub pts: Option<i64>,
    /// Decode timestamp.
    pub dts: Option<i64>,
}

impl VideoFrame {
    /// Create a frame from existing planes and strides.
    pub fn new(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        bit_depth: u8,
        planes: Vec<Vec<u8>>,
        strides: Vec<usize>,
    ) -> Result<Self, CodecError> {
        let frame = Self {
            width,
            height,
            pixel_format,
            bit_depth,
            planes,
            strides,
            pts: None,
            dts: None,
        };
        frame.check_layout()?;
        Ok(frame)
    }

    /// Allocate a zeroed frame with tight strides.
    #[must_use]
    pub fn alloc(width: u32, height: u32, pixel_format: PixelFormat, bit_depth: u8) -> Self {
        Self::alloc_padded(width, height, pixel_format, bit_depth, 0)
    }

    /// Allocate a zeroed frame whose rows carry `padding` extra bytes.
    #[must_use]
    pub fn alloc_padded(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        bit_depth: u8,
        padding: usize,
    ) -> Self {
        let count = pixel_format.plane_count();
        let mut planes = Vec::with_capacity(count);
        let mut strides = Vec::with_capacity(count);
        for plane in 0..count {
            let (_, rows) = pixel_format.plane_geometry(plane, width, height);
            let stride = pixel_format.line_size(plane, width, bit_depth) + padding;
            planes.push(vec![0u8; stride * rows]);
            strides.push(stride);
        }
        Self {
            width,
            height,
            pixel_format,
            bit_depth,
            planes,
            strides,
            pts: None,
            dts: None,
        }
    }

    /// Attach timestamps.
    #[must_use]
    pub fn with_timestamps(mut self, pts: Option<i64>, dts: Option<i64>) -> Self {
        self.pts = pts;
        self.dts = dts;
        self
    }

    /// Expected size of the visible samples for the current geometry.
    #[must_use]
    pub fn expected_data_size(&self) -> usize {
        expected_frame_size(self.width, self.height, self.pixel_format, self.bit_depth)
    }

    /// Visible rows of `plane`, without stride padding.
    pub fn rows(&self, plane: usize) -> impl Iterator<Item = &[u8]> + '_ {
        let line = self.pixel_format.line_size(plane, self.width, self.bit_depth);
        let (_, rows) = self.pixel_format.plane_geometry(plane, self.width, self.height);
        let stride = self.strides.get(plane).copied().unwrap_or(line).max(1);
        let data = self.planes.get(plane).map(Vec::as_slice).unwrap_or(&[]);
        data.chunks(stride).take(rows).map(move |row| &row[..line.min(row.len())])
    }

    /// Mutable visible rows of `plane`.
    pub fn rows_mut(&mut self, plane: usize) -> impl Iterator<Item = &mut [u8]> + '_ {
        let line = self.pixel_format.line_size(plane, self.width, self.bit_depth);
        let (_, rows) = self.pixel_format.plane_geometry(plane, self.width, self.height);
        let stride = self.strides.get(plane).copied().unwrap_or(line).max(1);
        let data = self.planes.get_mut(plane).map(Vec::as_mut_slice).unwrap_or(&mut []);
        data.chunks_mut(stride).take(rows).map(move |row| {
            let visible = line.min(row.len());
            &mut row[..visible]
        })
    }

    /// All visible samples packed plane after plane with tight rows.
    #[must_use]
    pub fn packed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.expected_data_size());
        for plane in 0..self.pixel_format.plane_count() {
            for row in self.rows(plane) {
                out.extend_from_slice(row);
            }
        }
        out
    }

    /// Convert planar 4:2:2 to packed YUYV.
    ///
    /// If the frame is already YUYV, returns a clone.
    pub fn to_yuyv422(&self) -> Result<VideoFrame, CodecError> {
        match (self.pixel_format, self.bit_depth) {
            (PixelFormat::Yuyv422, _) => Ok(self.clone()),
            (PixelFormat::Yuv422p, 8) => {
                let mut out = VideoFrame::alloc(self.width, self.height, PixelFormat::Yuyv422, 8)
                    .with_timestamps(self.pts, self.dts);
                let luma: Vec<&[u8]> = self.rows(0).collect();
                let cb: Vec<&[u8]> = self.rows(1).collect();
                let cr: Vec<&[u8]> = self.rows(2).collect();
                for (y, dst) in out.rows_mut(0).enumerate() {
                    pack_yuyv_row(luma[y], cb[y], cr[y], dst);
                }
                Ok(out)
            }
            (format, bit_depth) => Err(CodecError::ConversionError(format!(
                "cannot pack {format:?} at {bit_depth} bits as yuyv422"
            ))),
        }
    }

    fn check_layout(&self) -> Result<(), CodecError> {
        let count = self.pixel_format.plane_count();
        if self.planes.len() < count || self.strides.len() < count {
            return Err(CodecError::invalid_param(format!(
                "{:?} needs {count} planes, got {}",
                self.pixel_format,
                self.planes.len()
            )));
        }
        for plane in 0..count {
            let line = self.pixel_format.line_size(plane, self.width, self.bit_depth);
            let (_, rows) = self.pixel_format.plane_geometry(plane, self.width, self.height);
            let stride = self.strides[plane];
            if stride < line {
                return Err(CodecError::invalid_param(format!(
                    "plane {plane} stride {stride} below line size {line}"
                )));
            }
            let needed = plane_span(stride, line, rows);
            if self.planes[plane].len() < needed {
                return Err(CodecError::invalid_param(format!(
                    "plane {plane} holds {} bytes, needs {needed}",
                    self.planes[plane].len()
                )));
            }
        }
        Ok(())
    }
}

impl VideoFrameData for VideoFrame {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    fn plane(&self, index: usize) -> &[u8] {
        self.planes.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    fn stride(&self, index: usize) -> usize {
        self.strides.get(index).copied().unwrap_or(0)
    }

    fn pts(&self) -> Option<i64> {
        self.pts
    }

    fn dts(&self) -> Option<i64> {
        self.dts
    }
}

/// Bytes a plane must hold: every row at `stride`, the last one only `line` long.
#[must_use]
pub fn plane_span(stride: usize, line: usize, rows: usize) -> usize {
    match rows {
        0 => 0,
        n => (n - 1) * stride + line,
    }
}

/// Calculate the visible sample bytes of a frame with the given layout.
#[must_use]
pub fn expected_frame_size(width: u32, height: u32, format: PixelFormat, bit_depth: u8) -> usize {
    (0..format.plane_count())
        .map(|plane| {
            let (samples, rows) = format.plane_geometry(plane, width, height);
            samples * rows * bytes_per_sample(bit_depth)
        })
        .sum()
}

// ============================================================================
// Layout conversion helpers
// ============================================================================

fn pack_yuyv_row(luma: &[u8], cb: &[u8], cr: &[u8], dst: &mut [u8]) {
    for (i, out) in dst.chunks_exact_mut(4).enumerate() {
        out[0] = luma.get(2 * i).copied().unwrap_or(0);
        out[1] = cb.get(i).copied().unwrap_or(128);
        out[2] = luma.get(2 * i + 1).copied().unwrap_or(0);
        out[3] = cr.get(i).copied().unwrap_or(128);
    }
}
