use std::fmt;

use crate::{Error, Result};

/// Pixel layout of a picture, determining how many planes it has and how they are sized.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Chroma {
    /// Planar YUV 4:2:0 with separate U and V planes at half resolution.
    I420,

    /// YUV 4:2:0 with a full-resolution luma plane and one interleaved half-height UV plane.
    Nv12,

    /// Packed 8-bit RGBA in a single plane.
    Rgba,

    /// Single 8-bit luma plane.
    Gray8,
}

impl Chroma {
    /// Whether chroma planes are subsampled by two in both directions.
    const fn is_subsampled(self) -> bool {
        matches!(self, Self::I420 | Self::Nv12)
    }
}

impl fmt::Display for Chroma {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::I420 => "I420",
            Self::Nv12 => "NV12",
            Self::Rgba => "RGBA",
            Self::Gray8 => "GREY",
        };

        f.write_str(name)
    }
}

/// Describes the pictures a decoder or filter produces: chroma layout plus visible dimensions.
///
/// # Examples
///
/// ```
/// use picture_pool::{Chroma, VideoFormat};
///
/// let format = VideoFormat::new(Chroma::I420, 64, 32);
/// let geometry = format.plane_geometry().unwrap();
///
/// assert_eq!(geometry.len(), 3);
/// assert_eq!(geometry[0].pitch(), 64);
/// assert_eq!(geometry[1].lines(), 16);
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct VideoFormat {
    chroma: Chroma,
    width: u32,
    height: u32,
}

impl VideoFormat {
    /// Creates a format descriptor. The descriptor is validated when pictures are allocated.
    #[must_use]
    pub const fn new(chroma: Chroma, width: u32, height: u32) -> Self {
        Self {
            chroma,
            width,
            height,
        }
    }

    /// The pixel layout.
    #[must_use]
    pub const fn chroma(&self) -> Chroma {
        self.chroma
    }

    /// Visible width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Visible height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Calculates the size of every plane a picture of this format consists of.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFormat`] if either dimension is zero, if a subsampled chroma
    /// is used with odd dimensions or if a plane would not fit in the address space.
    #[expect(
        clippy::integer_division,
        reason = "subsampled dimensions are validated to be even before halving"
    )]
    pub fn plane_geometry(&self) -> Result<Vec<PlaneGeometry>> {
        if self.width == 0 || self.height == 0 {
            return Err(self.invalid("dimensions must be non-zero"));
        }

        if self.chroma.is_subsampled() && (self.width % 2 != 0 || self.height % 2 != 0) {
            return Err(self.invalid("subsampled chroma requires even dimensions"));
        }

        let width = usize::try_from(self.width).map_err(|_| self.invalid("width overflows"))?;
        let height = usize::try_from(self.height).map_err(|_| self.invalid("height overflows"))?;

        let planes = match self.chroma {
            Chroma::I420 => vec![
                PlaneGeometry::new(height, width),
                PlaneGeometry::new(height / 2, width / 2),
                PlaneGeometry::new(height / 2, width / 2),
            ],
            Chroma::Nv12 => vec![
                PlaneGeometry::new(height, width),
                PlaneGeometry::new(height / 2, width),
            ],
            Chroma::Rgba => {
                let pitch = width
                    .checked_mul(4)
                    .ok_or_else(|| self.invalid("row size overflows"))?;
                vec![PlaneGeometry::new(height, pitch)]
            }
            Chroma::Gray8 => vec![PlaneGeometry::new(height, width)],
        };

        if planes.iter().any(|plane| plane.bytes().is_none()) {
            return Err(self.invalid("plane size overflows"));
        }

        Ok(planes)
    }

    fn invalid(&self, problem: &str) -> Error {
        Error::InvalidFormat {
            format: *self,
            problem: problem.to_string(),
        }
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{}", self.chroma, self.width, self.height)
    }
}

/// Size of one pixel plane: number of lines and bytes per line.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PlaneGeometry {
    lines: usize,
    pitch: usize,
}

impl PlaneGeometry {
    /// Creates a plane geometry from its line count and line length in bytes.
    #[must_use]
    pub const fn new(lines: usize, pitch: usize) -> Self {
        Self { lines, pitch }
    }

    /// Number of lines in the plane.
    #[must_use]
    pub const fn lines(&self) -> usize {
        self.lines
    }

    /// Number of bytes from the start of one line to the start of the next.
    #[must_use]
    pub const fn pitch(&self) -> usize {
        self.pitch
    }

    /// Total number of bytes in the plane, if it fits in `usize`.
    #[must_use]
    pub const fn bytes(&self) -> Option<usize> {
        self.lines.checked_mul(self.pitch)
    }
}
