//! Decoding of PDF image XObjects into normalized RGBA buffers.
//!
//! Raw samples in gray (1 channel), RGB (3) and CMYK (4) color spaces are
//! expanded to RGBA; DCT (JPEG) streams are decoded with the `image` crate.
//! The result is PNG-encoded so downstream consumers treat it as an opaque
//! image file.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, RgbaImage};
use lopdf::{Document, Object, Stream};

use crate::error::ExtractError;

/// Images larger than this are skipped rather than decoded.
const MAX_IMAGE_PIXELS: u64 = 50_000_000;

/// Decodes an image XObject stream into a PNG-encoded RGBA buffer.
pub fn decode_image_xobject(doc: &Document, stream: &Stream) -> Result<Vec<u8>, ExtractError> {
    let filters = stream_filters(doc, stream);

    if filters.iter().any(|f| f == "JPXDecode" || f == "JBIG2Decode") {
        return Err(ExtractError::UnsupportedImage(filters.join("+")));
    }

    let rgba = if filters.last().map(String::as_str) == Some("DCTDecode") {
        if filters.len() > 1 {
            return Err(ExtractError::UnsupportedImage(filters.join("+")));
        }
        image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg)
            .map_err(|e| ExtractError::ImageDecode(format!("JPEG: {}", e)))?
            .to_rgba8()
    } else {
        decode_raw_samples(doc, stream)?
    };

    encode_png(rgba)
}

fn decode_raw_samples(doc: &Document, stream: &Stream) -> Result<RgbaImage, ExtractError> {
    let width = dict_u32(doc, stream, b"Width")?;
    let height = dict_u32(doc, stream, b"Height")?;
    if width == 0 || height == 0 {
        return Err(ExtractError::ImageDecode("zero-sized image".to_string()));
    }
    if u64::from(width) * u64::from(height) > MAX_IMAGE_PIXELS {
        return Err(ExtractError::UnsupportedImage(format!(
            "image too large ({}x{})",
            width, height
        )));
    }

    let is_mask = stream
        .dict
        .get(b"ImageMask")
        .and_then(Object::as_bool)
        .unwrap_or(false);

    let (channels, bits) = if is_mask {
        (1, 1)
    } else {
        let color_space = stream
            .dict
            .get(b"ColorSpace")
            .map_err(|_| ExtractError::UnsupportedImage("missing ColorSpace".to_string()))?;
        let channels = color_space_channels(doc, color_space, 0)?;
        let bits = stream
            .dict
            .get(b"BitsPerComponent")
            .and_then(Object::as_i64)
            .unwrap_or(8);
        (channels, bits)
    };

    let data = if stream_filters(doc, stream).is_empty() {
        stream.content.clone()
    } else {
        stream
            .decompressed_content()
            .map_err(|e| ExtractError::ImageDecode(format!("decompress: {}", e)))?
    };

    let mut samples = unpack_samples(&data, width as usize, height as usize, channels, bits)?;

    if channels == 1 && inverted_decode(doc, stream) {
        for s in &mut samples {
            *s = 255 - *s;
        }
    }

    let rgba = expand_to_rgba(&samples, channels)?;
    RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| ExtractError::ImageDecode("pixel buffer size mismatch".to_string()))
}

/// Expands interleaved 8-bit samples with 1, 3 or 4 channels to RGBA.
///
/// Four-channel input is treated as CMYK.
pub fn expand_to_rgba(samples: &[u8], channels: usize) -> Result<Vec<u8>, ExtractError> {
    if !matches!(channels, 1 | 3 | 4) {
        return Err(ExtractError::UnsupportedImage(format!(
            "{} color channels",
            channels
        )));
    }
    if samples.len() % channels != 0 {
        return Err(ExtractError::ImageDecode(format!(
            "{} samples is not a multiple of {} channels",
            samples.len(),
            channels
        )));
    }

    let mut out = Vec::with_capacity(samples.len() / channels * 4);
    for px in samples.chunks_exact(channels) {
        match *px {
            [g] => out.extend_from_slice(&[g, g, g, 255]),
            [r, g, b] => out.extend_from_slice(&[r, g, b, 255]),
            [c, m, y, k] => out.extend_from_slice(&[
                cmyk_component(c, k),
                cmyk_component(m, k),
                cmyk_component(y, k),
                255,
            ]),
            _ => unreachable!("chunks_exact yields exactly `channels` samples"),
        }
    }
    Ok(out)
}

fn cmyk_component(ink: u8, black: u8) -> u8 {
    ((255 - u16::from(ink)) * (255 - u16::from(black)) / 255) as u8
}

/// Unpacks packed samples of `bits` depth to one byte per sample, scaled to
/// the full 0..=255 range. Rows are padded to a byte boundary.
fn unpack_samples(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    bits: i64,
) -> Result<Vec<u8>, ExtractError> {
    if channels == 0 {
        return Err(ExtractError::UnsupportedImage("0 color channels".to_string()));
    }
    let per_row = width.checked_mul(channels).ok_or_else(overflow)?;
    let total = per_row.checked_mul(height).ok_or_else(overflow)?;

    match bits {
        8 => {
            if data.len() < total {
                return Err(truncated(data.len(), total));
            }
            Ok(data[..total].to_vec())
        }
        16 => {
            let wanted = total.checked_mul(2).ok_or_else(overflow)?;
            if data.len() < wanted {
                return Err(truncated(data.len(), wanted));
            }
            Ok(data[..wanted].chunks_exact(2).map(|p| p[0]).collect())
        }
        1 | 2 | 4 => {
            let bits = bits as usize;
            let row_bytes = per_row.checked_mul(bits).ok_or_else(overflow)?.div_ceil(8);
            let wanted = row_bytes.checked_mul(height).ok_or_else(overflow)?;
            if data.len() < wanted {
                return Err(truncated(data.len(), wanted));
            }
            let max = (1u16 << bits) - 1;
            let mut out = Vec::with_capacity(total);
            for row in data.chunks_exact(row_bytes).take(height) {
                for i in 0..per_row {
                    let bit_offset = i * bits;
                    let byte = row[bit_offset / 8];
                    let shift = 8 - bits - (bit_offset % 8);
                    let value = (u16::from(byte) >> shift) & max;
                    out.push((value * 255 / max) as u8);
                }
            }
            Ok(out)
        }
        other => Err(ExtractError::UnsupportedImage(format!(
            "{} bits per component",
            other
        ))),
    }
}

fn overflow() -> ExtractError {
    ExtractError::ImageDecode("image dimensions overflow".to_string())
}

fn truncated(got: usize, want: usize) -> ExtractError {
    ExtractError::ImageDecode(format!("sample data truncated ({} of {} bytes)", got, want))
}

fn color_space_channels(doc: &Document, obj: &Object, depth: u8) -> Result<usize, ExtractError> {
    if depth > 4 {
        return Err(ExtractError::UnsupportedImage(
            "color space nesting too deep".to_string(),
        ));
    }

    match obj {
        Object::Reference(id) => {
            let resolved = doc
                .get_object(*id)
                .map_err(|e| ExtractError::ImageDecode(format!("color space: {}", e)))?;
            color_space_channels(doc, resolved, depth + 1)
        }
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => Ok(1),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Ok(3),
            b"DeviceCMYK" | b"CMYK" => Ok(4),
            other => Err(ExtractError::UnsupportedImage(format!(
                "color space {}",
                String::from_utf8_lossy(other)
            ))),
        },
        Object::Array(items) => {
            let family = items
                .first()
                .and_then(|o| o.as_name().ok())
                .unwrap_or_default();
            match family {
                b"ICCBased" => {
                    let profile = items
                        .get(1)
                        .and_then(|o| o.as_reference().ok())
                        .and_then(|id| doc.get_object(id).ok())
                        .and_then(|o| o.as_stream().ok())
                        .ok_or_else(|| {
                            ExtractError::ImageDecode("ICCBased without profile".to_string())
                        })?;
                    match profile.dict.get(b"N").and_then(Object::as_i64).unwrap_or(3) {
                        n @ (1 | 3 | 4) => Ok(n as usize),
                        n => Err(ExtractError::UnsupportedImage(format!(
                            "ICCBased profile with {} components",
                            n
                        ))),
                    }
                }
                b"CalGray" => Ok(1),
                b"CalRGB" => Ok(3),
                other => Err(ExtractError::UnsupportedImage(format!(
                    "color space {}",
                    String::from_utf8_lossy(other)
                ))),
            }
        }
        _ => Err(ExtractError::UnsupportedImage(
            "malformed color space".to_string(),
        )),
    }
}

fn stream_filters(doc: &Document, stream: &Stream) -> Vec<String> {
    let Ok(filter) = stream.dict.get(b"Filter") else {
        return Vec::new();
    };
    let filter = match filter {
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(obj) => obj,
            Err(_) => return Vec::new(),
        },
        other => other,
    };
    match filter {
        Object::Name(name) => vec![String::from_utf8_lossy(name).into_owned()],
        Object::Array(items) => items
            .iter()
            .filter_map(|o| o.as_name().ok())
            .map(|n| String::from_utf8_lossy(n).into_owned())
            .collect(),
        _ => Vec::new(),
    }
}

fn inverted_decode(doc: &Document, stream: &Stream) -> bool {
    let Ok(decode) = stream.dict.get(b"Decode") else {
        return false;
    };
    let decode = match decode {
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(obj) => obj,
            Err(_) => return false,
        },
        other => other,
    };
    match decode.as_array() {
        Ok(values) => {
            let nums: Vec<f64> = values.iter().filter_map(number).collect();
            nums.len() == 2 && nums[0] > nums[1]
        }
        Err(_) => false,
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

fn dict_u32(doc: &Document, stream: &Stream, key: &[u8]) -> Result<u32, ExtractError> {
    let obj = stream.dict.get(key).map_err(|_| {
        ExtractError::ImageDecode(format!("missing {}", String::from_utf8_lossy(key)))
    })?;
    let obj = match obj {
        Object::Reference(id) => doc
            .get_object(*id)
            .map_err(|e| ExtractError::ImageDecode(e.to_string()))?,
        other => other,
    };
    let value = obj
        .as_i64()
        .map_err(|e| ExtractError::ImageDecode(e.to_string()))?;
    u32::try_from(value).map_err(|_| {
        ExtractError::ImageDecode(format!(
            "invalid {} {}",
            String::from_utf8_lossy(key),
            value
        ))
    })
}

fn encode_png(rgba: RgbaImage) -> Result<Vec<u8>, ExtractError> {
    let mut png = Vec::new();
    DynamicImage::ImageRgba8(rgba)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| ExtractError::ImageDecode(format!("PNG encode: {}", e)))?;
    Ok(png)
}
