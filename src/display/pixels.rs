//! Pixel format table and bounds-checked pixel views
//!
//! Every conversion and compositing step goes through the static
//! [`PixelFormatDescriptor`] table: channel bit offsets and sizes, bytes per
//! pixel, and the highlight/mask colors used for detection overlays.

use serde::{Deserialize, Serialize};

use crate::error::{FormatError, ShortBuffer};

/// Bit position of the bytes-per-pixel field in the surface pixel format register
pub const PIXEL_FORMAT_BYTES_PER_PIXEL_POS: u32 = 3;

pub const RGB565_YELLOW: u32 = 0xFFE0;
pub const RGB565_RED: u32 = 0xF800;
pub const RGB32_YELLOW: u32 = 0x00FF_FF00;
pub const RGB32_RED: u32 = 0x00FF_0000;
pub const A2R10G10B10_YELLOW: u32 = 0x3FFF_FC00;
pub const A2R10G10B10_RED: u32 = 0x3FF0_0000;

/// Supported color layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb565,
    Rgb32,
    /// 10-bit packed RGB; only the top 8 bits of each channel are used
    A2r10g10b10,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 3] = [
        PixelFormat::Rgb565,
        PixelFormat::Rgb32,
        PixelFormat::A2r10g10b10,
    ];

    /// Small integer code used on the firmware side
    pub fn code(self) -> u32 {
        match self {
            PixelFormat::Rgb565 => 0,
            PixelFormat::Rgb32 => 1,
            PixelFormat::A2r10g10b10 => 2,
        }
    }

    pub fn from_code(code: u32) -> Result<Self, FormatError> {
        match code {
            0 => Ok(PixelFormat::Rgb565),
            1 => Ok(PixelFormat::Rgb32),
            2 => Ok(PixelFormat::A2r10g10b10),
            other => Err(FormatError::Unsupported(other)),
        }
    }

    /// Fallback when a frame disagrees with its configured format:
    /// two bytes per pixel means RGB565, anything else RGB32.
    pub fn from_bytes_per_pixel(bytes_per_pixel: usize) -> Self {
        if bytes_per_pixel == 2 {
            PixelFormat::Rgb565
        } else {
            PixelFormat::Rgb32
        }
    }

    pub fn descriptor(self) -> &'static PixelFormatDescriptor {
        &FORMATS[self.code() as usize]
    }

    pub fn bytes_per_pixel(self) -> usize {
        self.descriptor().bytes_per_pixel
    }
}

/// Layout of a single color channel inside a raw pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    pub offset: u32,
    pub bit_size: u32,
    pub default_value: u8,
}

impl ChannelLayout {
    const fn new(offset: u32, bit_size: u32, default_value: u8) -> Self {
        Self {
            offset,
            bit_size,
            default_value,
        }
    }

    pub fn mask(&self) -> u32 {
        (1u32 << self.bit_size) - 1
    }

    /// Channel value at its native bit depth
    pub fn extract(&self, raw: u32) -> u32 {
        (raw >> self.offset) & self.mask()
    }

    /// Place an 8-bit intensity into this channel's bits
    pub fn encode(&self, value: u8) -> u32 {
        ((u32::from(value) >> (8 - self.bit_size)) & self.mask()) << self.offset
    }

    /// Channel value widened back to 8 bits
    pub fn expand(&self, raw: u32) -> u8 {
        (self.extract(raw) << (8 - self.bit_size)) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormatDescriptor {
    pub format: PixelFormat,
    pub red: ChannelLayout,
    pub green: ChannelLayout,
    pub blue: ChannelLayout,
    pub bytes_per_pixel: usize,
    /// Value programmed into the surface pixel format register
    pub pixel_format_code: u32,
    pub default_highlight_color: u32,
    pub default_mask_color: u32,
}

impl PixelFormatDescriptor {
    pub fn encode_rgb(&self, r: u8, g: u8, b: u8) -> u32 {
        self.red.encode(r) | self.green.encode(g) | self.blue.encode(b)
    }

    pub fn decode_rgb(&self, raw: u32) -> [u8; 3] {
        [
            self.red.expand(raw),
            self.green.expand(raw),
            self.blue.expand(raw),
        ]
    }

    pub fn channels(&self) -> [ChannelLayout; 3] {
        [self.red, self.green, self.blue]
    }
}

const fn bytes_per_pixel_register(bytes_per_pixel: u32) -> u32 {
    (bytes_per_pixel - 1) << PIXEL_FORMAT_BYTES_PER_PIXEL_POS
}

/// Indexed by [`PixelFormat::code`]
pub static FORMATS: [PixelFormatDescriptor; 3] = [
    // <--unused--> <-- red 15..11 --> <-- green 10..5 --> <-- blue 4..0 -->
    PixelFormatDescriptor {
        format: PixelFormat::Rgb565,
        red: ChannelLayout::new(11, 5, 0xff),
        green: ChannelLayout::new(5, 6, 0x00),
        blue: ChannelLayout::new(0, 5, 0x00),
        bytes_per_pixel: 2,
        pixel_format_code: bytes_per_pixel_register(2),
        default_highlight_color: RGB565_YELLOW,
        default_mask_color: RGB565_RED,
    },
    PixelFormatDescriptor {
        format: PixelFormat::Rgb32,
        red: ChannelLayout::new(16, 8, 0xff),
        green: ChannelLayout::new(8, 8, 0xff),
        blue: ChannelLayout::new(0, 8, 0xff),
        bytes_per_pixel: 4,
        pixel_format_code: bytes_per_pixel_register(4),
        default_highlight_color: RGB32_YELLOW,
        default_mask_color: RGB32_RED,
    },
    PixelFormatDescriptor {
        format: PixelFormat::A2r10g10b10,
        red: ChannelLayout::new(22, 8, 0xff),
        green: ChannelLayout::new(12, 8, 0xff),
        blue: ChannelLayout::new(2, 8, 0xff),
        bytes_per_pixel: 4,
        pixel_format_code: bytes_per_pixel_register(4),
        default_highlight_color: A2R10G10B10_YELLOW,
        default_mask_color: A2R10G10B10_RED,
    },
];

fn read_raw(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .rev()
        .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte))
}

fn write_raw(bytes: &mut [u8], raw: u32) {
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = (raw >> (8 * i)) as u8;
    }
}

fn required_len(width: u32, height: u32, bytes_per_pixel: usize) -> usize {
    width as usize * height as usize * bytes_per_pixel
}

/// Read-only typed view over a packed frame buffer
#[derive(Clone, Copy)]
pub struct PixelView<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    format: &'static PixelFormatDescriptor,
}

impl<'a> PixelView<'a> {
    pub fn new(
        data: &'a [u8],
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, ShortBuffer> {
        let format = format.descriptor();
        let needed = required_len(width, height, format.bytes_per_pixel);
        if data.len() < needed {
            return Err(ShortBuffer {
                needed,
                available: data.len(),
            });
        }

        Ok(Self {
            data: &data[..needed],
            width,
            height,
            format,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> &'static PixelFormatDescriptor {
        self.format
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel;
        let start = (y as usize * self.width as usize + x as usize) * bpp;
        Some(read_raw(&self.data[start..start + bpp]))
    }

    /// Raw pixel values in scan order
    pub fn pixels(&self) -> impl Iterator<Item = u32> + 'a {
        self.data
            .chunks_exact(self.format.bytes_per_pixel)
            .map(read_raw)
    }
}

/// Mutable typed view over a packed frame buffer
pub struct PixelViewMut<'a> {
    data: &'a mut [u8],
    width: u32,
    height: u32,
    format: &'static PixelFormatDescriptor,
}

impl<'a> PixelViewMut<'a> {
    pub fn new(
        data: &'a mut [u8],
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, ShortBuffer> {
        let format = format.descriptor();
        let needed = required_len(width, height, format.bytes_per_pixel);
        if data.len() < needed {
            return Err(ShortBuffer {
                needed,
                available: data.len(),
            });
        }

        Ok(Self {
            data: &mut data[..needed],
            width,
            height,
            format,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> &'static PixelFormatDescriptor {
        self.format
    }

    pub fn as_view(&self) -> PixelView<'_> {
        PixelView {
            data: &*self.data,
            width: self.width,
            height: self.height,
            format: self.format,
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        self.as_view().get(x, y)
    }

    /// Writes outside the view are ignored
    pub fn set(&mut self, x: u32, y: u32, raw: u32) {
        if x >= self.width || y >= self.height {
            return;
        }
        let bpp = self.format.bytes_per_pixel;
        let start = (y as usize * self.width as usize + x as usize) * bpp;
        write_raw(&mut self.data[start..start + bpp], raw);
    }

    /// Fill a rectangle, clipped to the view
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, raw: u32) {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        if x >= x_end || y >= y_end {
            return;
        }
        let bpp = self.format.bytes_per_pixel;
        let stride = self.width as usize * bpp;

        for row in y..y_end {
            let line = &mut self.data[row as usize * stride..(row as usize + 1) * stride];
            let span = &mut line[x as usize * bpp..x_end as usize * bpp];
            for pixel in span.chunks_exact_mut(bpp) {
                write_raw(pixel, raw);
            }
        }
    }

    pub fn fill(&mut self, raw: u32) {
        let (width, height) = (self.width, self.height);
        self.fill_rect(0, 0, width, height, raw);
    }
}
