//! Page content the editor adds or reads back: text layers, placed images
//! and image extraction.

use crate::page_tree::{add_resource, escape_literal, real, TEXT_FONT_KEY};
use crate::{EngineResult, ImageData, PageImage, RgbaImage, TextRun};
use image::Rgba;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::fmt::Write as _;
use std::io::Read;

const LINE_SPACING: f32 = 1.2;

fn font_name() -> String {
    String::from_utf8_lossy(TEXT_FONT_KEY).into_owned()
}

/// Registers an ExtGState with constant stroke and fill alpha and returns
/// its resource name. `None` for fully opaque drawing.
pub(crate) fn ensure_opacity_state(doc: &mut Document, page: ObjectId, opacity: f32) -> EngineResult<Option<String>> {
    let percent = (opacity.clamp(0.0, 1.0) * 100.0).round() as u32;
    if percent >= 100 {
        return Ok(None);
    }
    let name = format!("FolioAlpha{percent}");
    let alpha = percent as f32 / 100.0;
    add_resource(doc, page, b"ExtGState", name.as_bytes(), |doc| {
        Object::Reference(doc.add_object(dictionary! {
            "Type" => "ExtGState",
            "ca" => real(alpha),
            "CA" => real(alpha),
        }))
    })?;
    Ok(Some(name))
}

/// Content stream drawing `text` as an invisible (render mode 3) layer
/// starting near the top-left corner.
pub(crate) fn invisible_text_content(text: &str, page_height: f32) -> Vec<u8> {
    let top = (page_height - 36.0).max(0.0);
    let mut content = String::from("q\n");
    for (index, line) in text.lines().enumerate() {
        let y = top - index as f32 * 12.0;
        let _ = writeln!(content, "BT\n/{} 10 Tf\n3 Tr\n1 0 0 1 36 {y:.2} Tm", font_name());
        let _ = writeln!(content, "({}) Tj\nET", escape_literal(line));
    }
    content.push_str("Q\n");
    content.into_bytes()
}

/// Content stream drawing a visible text run. Each line is its own text
/// object so extraction sees line breaks.
pub(crate) fn text_run_content(run: &TextRun, opacity_state: Option<&str>) -> Vec<u8> {
    let (sin, cos) = run.angle.to_radians().sin_cos();
    let (sin, cos) = (tidy(sin), tidy(cos));
    let [r, g, b] = run.color;
    let mut content = String::from("q\n");
    if let Some(state) = opacity_state {
        let _ = writeln!(content, "/{state} gs");
    }
    let _ = writeln!(content, "{r:.3} {g:.3} {b:.3} rg");
    for (index, line) in run.text.lines().enumerate() {
        // Lines step down along the rotated baseline's normal.
        let offset = index as f32 * run.font_size * LINE_SPACING;
        let x = run.x + offset * sin;
        let y = run.y - offset * cos;
        let _ = writeln!(content, "BT\n/{} {:.2} Tf", font_name(), run.font_size);
        let _ = writeln!(content, "{cos:.4} {sin:.4} {:.4} {cos:.4} {x:.2} {y:.2} Tm", tidy(-sin));
        let _ = writeln!(content, "({}) Tj\nET", escape_literal(line));
    }
    content.push_str("Q\n");
    content.into_bytes()
}

/// Rounds away float noise and negative zero so matrices print cleanly.
fn tidy(value: f32) -> f32 {
    let rounded = (value * 10_000.0).round() / 10_000.0;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Adds `image` as an RGB image XObject, with a soft mask when any pixel
/// is not fully opaque.
pub(crate) fn add_image_xobject(doc: &mut Document, image: &RgbaImage) -> EngineResult<ObjectId> {
    let (width, height) = image.dimensions();
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    let mut alpha = Vec::with_capacity(width as usize * height as usize);
    for pixel in image.pixels() {
        rgb.extend_from_slice(&pixel.0[..3]);
        alpha.push(pixel.0[3]);
    }

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => i64::from(width),
        "Height" => i64::from(height),
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
    };
    if alpha.iter().any(|&value| value != u8::MAX) {
        let mut mask = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(width),
                "Height" => i64::from(height),
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            alpha,
        );
        mask.compress()?;
        dict.set("SMask", Object::Reference(doc.add_object(mask)));
    }

    let mut stream = Stream::new(dict, rgb);
    stream.compress()?;
    Ok(doc.add_object(stream))
}

/// Content stream painting an image XObject over `rect`.
pub(crate) fn image_content(name: &str, rect: [f32; 4], opacity_state: Option<&str>) -> Vec<u8> {
    let [x0, y0, x1, y1] = rect;
    let mut content = String::from("q\n");
    if let Some(state) = opacity_state {
        let _ = writeln!(content, "/{state} gs");
    }
    let _ = writeln!(content, "{:.2} 0 0 {:.2} {x0:.2} {y0:.2} cm", x1 - x0, y1 - y0);
    let _ = writeln!(content, "/{name} Do\nQ");
    content.into_bytes()
}

/// Image XObjects referenced from a page's resources.
///
/// JPEG and JPEG 2000 streams are returned as stored. Uncompressed or
/// Flate-compressed 8-bit gray and RGB samples are decoded to pixels.
/// Anything else is skipped.
pub(crate) fn page_images(doc: &Document, page: ObjectId) -> Vec<PageImage> {
    let images = match doc.get_page_images(page) {
        Ok(images) => images,
        Err(err) => {
            log::debug!("lopdf: no readable images on page {page:?}: {err}");
            return Vec::new();
        }
    };

    let mut found = Vec::with_capacity(images.len());
    for image in images {
        let (Ok(width), Ok(height)) = (u32::try_from(image.width), u32::try_from(image.height)) else {
            continue;
        };
        let filters = image.filters.clone().unwrap_or_default();
        let bits = image.bits_per_component.and_then(|bits| u8::try_from(bits).ok());
        let data = match filters.last().map(String::as_str) {
            Some("DCTDecode") if filters.len() == 1 => {
                Some(ImageData::Encoded { extension: "jpg", bytes: image.content.to_vec() })
            }
            Some("JPXDecode") if filters.len() == 1 => {
                Some(ImageData::Encoded { extension: "jp2", bytes: image.content.to_vec() })
            }
            None | Some("FlateDecode") if filters.len() <= 1 && bits == Some(8) => {
                let has_predictor = image
                    .origin_dict
                    .get(b"DecodeParms")
                    .and_then(Object::as_dict)
                    .and_then(|params| params.get(b"Predictor"))
                    .and_then(Object::as_i64)
                    .is_ok_and(|predictor| predictor > 1);
                let samples = if filters.is_empty() {
                    Some(image.content.to_vec())
                } else if has_predictor {
                    None
                } else {
                    inflate(image.content)
                };
                samples.and_then(|samples| {
                    decode_samples(&samples, width, height, image.color_space.as_deref()).map(ImageData::Pixels)
                })
            }
            _ => None,
        };

        match data {
            Some(data) => found.push(PageImage {
                width,
                height,
                color_space: image.color_space.clone(),
                bits_per_component: bits,
                data,
            }),
            None => log::debug!("lopdf: skipping image {:?} with filters {filters:?}", image.id),
        }
    }
    found
}

fn inflate(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    flate2::read::ZlibDecoder::new(data).read_to_end(&mut out).ok()?;
    Some(out)
}

fn decode_samples(samples: &[u8], width: u32, height: u32, color_space: Option<&str>) -> Option<RgbaImage> {
    let channels = match color_space? {
        "DeviceRGB" | "CalRGB" => 3,
        "DeviceGray" | "CalGray" => 1,
        _ => return None,
    };
    let pixels = width as usize * height as usize;
    if samples.len() < pixels * channels {
        return None;
    }
    let mut image = RgbaImage::new(width, height);
    for (index, pixel) in image.pixels_mut().enumerate() {
        let start = index * channels;
        *pixel = if channels == 3 {
            Rgba([samples[start], samples[start + 1], samples[start + 2], u8::MAX])
        } else {
            let gray = samples[start];
            Rgba([gray, gray, gray, u8::MAX])
        };
    }
    Some(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invisible_text_uses_render_mode_three() {
        let content = String::from_utf8(invisible_text_content("hello\nworld", 842.0)).unwrap();
        assert!(content.contains("3 Tr"));
        assert!(content.contains("(hello) Tj"));
        assert!(content.contains("(world) Tj"));
        assert_eq!(content.matches("BT").count(), 2);
    }

    #[test]
    fn text_run_rotates_its_matrix() {
        let mut run = TextRun::new("DRAFT", 100.0, 200.0);
        run.angle = 90.0;
        run.color = [1.0, 0.0, 0.0];
        let content = String::from_utf8(text_run_content(&run, Some("FolioAlpha30"))).unwrap();
        assert!(content.contains("/FolioAlpha30 gs"));
        assert!(content.contains("1.000 0.000 0.000 rg"));
        assert!(content.contains("0.0000 1.0000 -1.0000 0.0000 100.00 200.00 Tm"));
        assert!(content.contains("(DRAFT) Tj"));
    }

    #[test]
    fn image_content_scales_unit_square_to_rect() {
        let content = String::from_utf8(image_content("Im1", [10.0, 20.0, 110.0, 70.0], None)).unwrap();
        assert!(content.contains("100.00 0 0 50.00 10.00 20.00 cm"));
        assert!(content.contains("/Im1 Do"));
        assert!(!content.contains(" gs"));
    }

    #[test]
    fn gray_samples_decode_to_opaque_pixels() {
        let image = decode_samples(&[0, 128, 255, 64], 2, 2, Some("DeviceGray")).unwrap();
        assert_eq!(image.get_pixel(1, 0), &Rgba([128, 128, 128, 255]));
        assert!(decode_samples(&[0, 1], 2, 2, Some("DeviceGray")).is_none());
        assert!(decode_samples(&[0; 16], 2, 2, Some("DeviceCMYK")).is_none());
    }
}
