//! Image payloads.
//!
//! Downloaded bytes are turned into a [`DecodedImage`] by an [`ImageDecoder`].
//! The bundled [`ContainerDecoder`] identifies the container format from its
//! magic bytes, reads the pixel dimensions, and walks the container to its
//! end so that truncated or corrupt downloads are rejected. The compressed
//! pixel data itself is left untouched. Callers that need pixels can plug in
//! a full decoder behind the same trait.

use std::fmt;

use bytes::Bytes;

use crate::client::ClientError;

/// Image container formats recognised by [`ContainerDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ImageFormat {
    /// Portable Network Graphics.
    Png,
    /// JPEG / JFIF.
    Jpeg,
    /// Graphics Interchange Format.
    Gif,
    /// WebP (lossy, lossless or extended).
    WebP,
    /// Windows bitmap.
    Bmp,
}

impl ImageFormat {
    /// The MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
            ImageFormat::WebP => "image/webp",
            ImageFormat::Bmp => "image/bmp",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// A successfully decoded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    format: ImageFormat,
    width: u32,
    height: u32,
    data: Bytes,
}

impl DecodedImage {
    /// Assemble an image from its parts.
    pub fn new(format: ImageFormat, width: u32, height: u32, data: Bytes) -> Self {
        Self {
            format,
            width,
            height,
            data,
        }
    }

    /// Container format.
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The encoded image bytes, as downloaded.
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// Turns downloaded bytes into an image.
pub trait ImageDecoder: fmt::Debug + Send + Sync + 'static {
    /// Decode `data`, failing with [`ClientError::Decode`] if it is not an
    /// image this decoder understands.
    fn decode(&self, data: Bytes) -> Result<DecodedImage, ClientError>;
}

/// Decoder which checks the structure of the image container.
///
/// Each format is walked from its signature to its terminator:
///
/// - PNG: every chunk checksum through `IEND`, with at least one `IDAT`.
/// - JPEG: segments up to the scan, then the end of image marker.
/// - GIF: every block and sub-block through the trailer.
/// - WebP: the RIFF size and the first chunk against the payload length.
/// - BMP: the pixel array against the stored dimensions, when uncompressed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerDecoder;

impl ImageDecoder for ContainerDecoder {
    fn decode(&self, data: Bytes) -> Result<DecodedImage, ClientError> {
        let (format, width, height) = sniff(&data)?;
        if width == 0 || height == 0 {
            return Err(ClientError::Decode(format!(
                "{format} image has no pixels ({width}x{height})"
            )));
        }

        tracing::trace!(%format, width, height, len = data.len(), "decoded image container");
        Ok(DecodedImage::new(format, width, height, data))
    }
}

type Dimensions = (ImageFormat, u32, u32);

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

fn sniff(data: &[u8]) -> Result<Dimensions, ClientError> {
    if data.starts_with(PNG_SIGNATURE) {
        return png(data);
    }
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return gif(data);
    }
    if data.starts_with(&[0xFF, 0xD8]) {
        return jpeg(data);
    }
    if data.starts_with(b"RIFF") && data.get(8..12) == Some(b"WEBP".as_slice()) {
        return webp(data);
    }
    if data.starts_with(b"BM") {
        return bmp(data);
    }
    Err(ClientError::Decode(format!(
        "unrecognised image format ({} bytes)",
        data.len()
    )))
}

fn truncated(format: ImageFormat) -> ClientError {
    ClientError::Decode(format!("truncated {format} image"))
}

fn corrupt(format: ImageFormat, detail: impl fmt::Display) -> ClientError {
    ClientError::Decode(format!("corrupt {format} image: {detail}"))
}

fn be_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn le_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn le_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn le_u24(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 3)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], 0]))
}

const CRC_TABLE: [u32; 256] = crc_table();

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut crc = n as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 == 1 {
                0xEDB8_8320 ^ (crc >> 1)
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[n] = crc;
        n += 1;
    }
    table
}

/// CRC-32 (ISO 3309) as used by PNG chunks.
fn crc32(bytes: &[u8]) -> u32 {
    !bytes.iter().fold(!0u32, |crc, &byte| {
        CRC_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8)
    })
}

fn png(data: &[u8]) -> Result<Dimensions, ClientError> {
    let format = ImageFormat::Png;
    let mut pos = PNG_SIGNATURE.len();
    let mut size = None;
    let mut has_data = false;

    loop {
        let len = be_u32(data, pos).ok_or_else(|| truncated(format))? as usize;
        let end = (pos + 8)
            .checked_add(len)
            .ok_or_else(|| truncated(format))?;
        let chunk = data.get(pos + 4..end).ok_or_else(|| truncated(format))?;
        let crc = be_u32(data, end).ok_or_else(|| truncated(format))?;

        let (kind, body) = chunk.split_at(4);
        if crc32(chunk) != crc {
            let kind = String::from_utf8_lossy(kind);
            return Err(corrupt(format, format_args!("{kind} chunk fails its checksum")));
        }

        match (kind, size) {
            (b"IHDR", None) if len == 13 => {
                let width = be_u32(body, 0).ok_or_else(|| truncated(format))?;
                let height = be_u32(body, 4).ok_or_else(|| truncated(format))?;
                size = Some((width, height));
            }
            (b"IHDR", _) => return Err(corrupt(format, "misplaced or malformed IHDR")),
            (_, None) => return Err(corrupt(format, "does not start with IHDR")),
            (b"IDAT", Some(_)) => has_data = true,
            (b"IEND", Some((width, height))) => {
                if !has_data {
                    return Err(corrupt(format, "no IDAT chunk"));
                }
                return Ok((format, width, height));
            }
            _ => {}
        }
        pos = end + 4;
    }
}

/// Skip a chain of GIF data sub-blocks starting at `pos`, returning the
/// position after the terminating empty block.
fn gif_sub_blocks(data: &[u8], mut pos: usize) -> Result<usize, ClientError> {
    loop {
        let len = usize::from(*data.get(pos).ok_or_else(|| truncated(ImageFormat::Gif))?);
        pos += 1 + len;
        if len == 0 {
            return Ok(pos);
        }
    }
}

/// Size of a GIF colour table, given the packed field that announces it.
fn gif_color_table(flags: u8) -> usize {
    if flags & 0x80 == 0 {
        0
    } else {
        3 << ((flags & 0x07) + 1)
    }
}

fn gif(data: &[u8]) -> Result<Dimensions, ClientError> {
    let format = ImageFormat::Gif;
    let width = le_u16(data, 6).ok_or_else(|| truncated(format))?;
    let height = le_u16(data, 8).ok_or_else(|| truncated(format))?;
    let flags = *data.get(10).ok_or_else(|| truncated(format))?;

    let mut pos = 13 + gif_color_table(flags);
    let mut frames = 0usize;
    loop {
        match data.get(pos) {
            // Extension: label, then sub-blocks.
            Some(0x21) => pos = gif_sub_blocks(data, pos + 2)?,
            Some(0x2C) => {
                let flags = *data.get(pos + 9).ok_or_else(|| truncated(format))?;
                // Descriptor, local colour table, then the LZW code size.
                pos += 10 + gif_color_table(flags);
                pos = gif_sub_blocks(data, pos + 1)?;
                frames += 1;
            }
            Some(0x3B) if frames > 0 => return Ok((format, width.into(), height.into())),
            Some(0x3B) => return Err(corrupt(format, "no image data")),
            Some(other) => {
                return Err(corrupt(format, format_args!("unknown block {other:#04x}")));
            }
            None => return Err(truncated(format)),
        }
    }
}

fn bmp(data: &[u8]) -> Result<Dimensions, ClientError> {
    let format = ImageFormat::Bmp;
    let offset = le_u32(data, 10).ok_or_else(|| truncated(format))? as usize;
    let header = le_u32(data, 14).ok_or_else(|| truncated(format))?;

    // OS/2 core headers store 16-bit dimensions and are never compressed.
    let (width, height, bits, compression) = if header == 12 {
        let width = le_u16(data, 18).ok_or_else(|| truncated(format))?;
        let height = le_u16(data, 20).ok_or_else(|| truncated(format))?;
        let bits = le_u16(data, 24).ok_or_else(|| truncated(format))?;
        (width.into(), height.into(), bits, 0)
    } else {
        let width = le_u32(data, 18).ok_or_else(|| truncated(format))? as i32;
        // Negative height marks a top-down bitmap.
        let height = le_u32(data, 22).ok_or_else(|| truncated(format))? as i32;
        let bits = le_u16(data, 28).ok_or_else(|| truncated(format))?;
        let compression = le_u32(data, 30).ok_or_else(|| truncated(format))?;
        (width.unsigned_abs(), height.unsigned_abs(), bits, compression)
    };

    let pixels = data.get(offset..).ok_or_else(|| truncated(format))?;

    // BI_RGB and BI_BITFIELDS store rows padded to four bytes.
    if matches!(compression, 0 | 3) {
        let stride = (u64::from(bits) * u64::from(width)).div_ceil(32) * 4;
        let needed = stride * u64::from(height);
        if (pixels.len() as u64) < needed {
            return Err(truncated(format));
        }
    }
    Ok((format, width, height))
}

fn webp(data: &[u8]) -> Result<Dimensions, ClientError> {
    let format = ImageFormat::WebP;
    let riff = le_u32(data, 4).ok_or_else(|| truncated(format))? as usize;
    let end = riff.checked_add(8).ok_or_else(|| truncated(format))?;
    let data = data.get(..end).ok_or_else(|| truncated(format))?;

    let chunk = le_u32(data, 16).ok_or_else(|| truncated(format))? as usize;
    if data.len() - 20 < chunk {
        return Err(truncated(format));
    }

    match data.get(12..16) {
        Some(b"VP8 ") => {
            if data.get(23..26) != Some([0x9d, 0x01, 0x2a].as_slice()) {
                return Err(corrupt(format, "VP8 frame without start code"));
            }
            let width = le_u16(data, 26).ok_or_else(|| truncated(format))? & 0x3fff;
            let height = le_u16(data, 28).ok_or_else(|| truncated(format))? & 0x3fff;
            Ok((format, width.into(), height.into()))
        }
        Some(b"VP8L") => {
            if data.get(20) != Some(&0x2f) {
                return Err(corrupt(format, "VP8L stream without signature"));
            }
            let bits = le_u32(data, 21).ok_or_else(|| truncated(format))?;
            let width = (bits & 0x3fff) + 1;
            let height = ((bits >> 14) & 0x3fff) + 1;
            Ok((format, width, height))
        }
        Some(b"VP8X") => {
            let width = le_u24(data, 24).ok_or_else(|| truncated(format))? + 1;
            let height = le_u24(data, 27).ok_or_else(|| truncated(format))? + 1;
            Ok((format, width, height))
        }
        Some(other) => Err(corrupt(
            format,
            format_args!("unknown chunk {:?}", String::from_utf8_lossy(other)),
        )),
        None => Err(truncated(format)),
    }
}

fn jpeg(data: &[u8]) -> Result<Dimensions, ClientError> {
    let format = ImageFormat::Jpeg;
    let mut pos = 2;
    let mut frame = None;

    loop {
        if data.get(pos) != Some(&0xFF) {
            return Err(corrupt(format, format_args!("marker expected at {pos}")));
        }
        while data.get(pos + 1) == Some(&0xFF) {
            pos += 1;
        }
        let marker = *data.get(pos + 1).ok_or_else(|| truncated(format))?;

        match marker {
            // Markers without a payload.
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            0xD9 => return Err(corrupt(format, "ends before its scan")),
            _ => {}
        }

        let len = usize::from(be_u16(data, pos + 2).ok_or_else(|| truncated(format))?);
        if len < 2 {
            return Err(corrupt(format, format_args!("segment length {len} at {pos}")));
        }
        let end = pos + 2 + len;
        let segment = data.get(pos..end).ok_or_else(|| truncated(format))?;

        match marker {
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                let height = be_u16(segment, 5).ok_or_else(|| truncated(format))?;
                let width = be_u16(segment, 7).ok_or_else(|| truncated(format))?;
                frame = Some((u32::from(width), u32::from(height)));
            }
            0xDA => {
                let (width, height) = frame.ok_or_else(|| corrupt(format, "no frame header"))?;
                // Entropy-coded data never contains an unstuffed 0xFF 0xD9.
                let scan = &data[end..];
                match scan.windows(2).rposition(|pair| pair == [0xFF, 0xD9]) {
                    Some(eoi) if eoi > 0 => return Ok((format, width, height)),
                    Some(_) => return Err(corrupt(format, "empty scan")),
                    None => return Err(truncated(format)),
                }
            }
            _ => {}
        }
        pos = end;
    }
}
