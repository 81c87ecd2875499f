use std::collections::HashSet;

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, warn};

use crate::error::ExtractError;
use crate::extractor::image::decode_image_xobject;
use crate::extractor::PageExtraction;

/// Marker lopdf emits for text runs in CID fonts it cannot decode.
const IDENTITY_H_PATTERN: &str = "?Identity-H Unimplemented?";

/// How deep nested Form XObjects are followed when collecting images.
const MAX_FORM_DEPTH: u8 = 8;

/// Splits a PDF into per-page embedded text and raster images.
#[derive(Debug, Clone, Default)]
pub struct PdfExtractor {
    /// Skip image decoding entirely (used when OCR is disabled).
    text_only: bool,
}

impl PdfExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text_only() -> Self {
        Self { text_only: true }
    }

    /// Parses `bytes` and returns one record per page, in page order.
    ///
    /// Only an unparseable document is an error. Per-page failures are
    /// logged and yield empty text or no images for that page.
    pub fn extract(&self, bytes: &[u8]) -> Result<Vec<PageExtraction>, ExtractError> {
        let _span = tracing::info_span!("extract", bytes = bytes.len()).entered();

        let doc = Document::load_mem(bytes).map_err(|e| ExtractError::LoadPdf(e.to_string()))?;
        let pages = doc.get_pages();
        debug!("PDF has {} pages", pages.len());

        let mut out = Vec::with_capacity(pages.len());
        for (page_number, page_id) in pages {
            let embedded_text = match page_text(&doc, page_number) {
                Ok(text) => text,
                Err(e) => {
                    warn!("{}", e);
                    String::new()
                }
            };

            let images = if self.text_only {
                Vec::new()
            } else {
                match page_images(&doc, page_number, page_id) {
                    Ok(images) => images,
                    Err(e) => {
                        warn!("{}", e);
                        Vec::new()
                    }
                }
            };

            out.push(PageExtraction {
                page_number,
                embedded_text,
                images,
            });
        }

        Ok(out)
    }
}

fn page_text(doc: &Document, page_number: u32) -> Result<String, ExtractError> {
    let raw = doc
        .extract_text(&[page_number])
        .map_err(|e| ExtractError::PageText {
            page: page_number,
            reason: e.to_string(),
        })?;

    Ok(raw.replace(IDENTITY_H_PATTERN, "").trim().to_string())
}

/// Decodes every distinct image XObject painted on the page.
///
/// An image that fails to decode is skipped; only a page whose content
/// stream cannot be read at all is reported as an error.
fn page_images(
    doc: &Document,
    page_number: u32,
    page_id: ObjectId,
) -> Result<Vec<Vec<u8>>, ExtractError> {
    let page_err = |reason: String| ExtractError::PageImages {
        page: page_number,
        reason,
    };

    let content = doc
        .get_page_content(page_id)
        .map_err(|e| page_err(e.to_string()))?;
    let resources = page_resources(doc, page_id).map_err(|e| page_err(e.to_string()))?;

    let mut seen = HashSet::new();
    let mut image_ids = Vec::new();
    collect_image_ids(doc, &content, resources, 0, &mut seen, &mut image_ids)
        .map_err(|e| page_err(e.to_string()))?;

    let mut images = Vec::with_capacity(image_ids.len());
    for (index, id) in image_ids.into_iter().enumerate() {
        let decoded = doc
            .get_object(id)
            .and_then(Object::as_stream)
            .map_err(|e| ExtractError::ImageDecode(e.to_string()))
            .and_then(|stream| decode_image_xobject(doc, stream));

        match decoded {
            Ok(png) => images.push(png),
            Err(e) => warn!(
                "Skipping image {} on page {}: {}",
                index + 1,
                page_number,
                e
            ),
        }
    }

    Ok(images)
}

/// Walks `Do` operators in a content stream, recording image XObject ids
/// in first-paint order and recursing into Form XObjects.
fn collect_image_ids(
    doc: &Document,
    content: &[u8],
    resources: Option<&Dictionary>,
    depth: u8,
    seen: &mut HashSet<ObjectId>,
    out: &mut Vec<ObjectId>,
) -> lopdf::Result<()> {
    let Some(xobjects) = resources.and_then(|r| xobject_dict(doc, r)) else {
        return Ok(());
    };

    let ops = Content::decode(content)?.operations;
    for op in ops.iter().filter(|op| op.operator == "Do") {
        let Some(name) = op.operands.first().and_then(|o| o.as_name().ok()) else {
            continue;
        };
        let Ok(id) = xobjects.get(name).and_then(Object::as_reference) else {
            continue;
        };
        if !seen.insert(id) {
            continue;
        }

        let Ok(stream) = doc.get_object(id).and_then(Object::as_stream) else {
            continue;
        };
        let subtype = stream
            .dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .unwrap_or_default();

        match subtype {
            b"Image" => out.push(id),
            b"Form" if depth < MAX_FORM_DEPTH => {
                let form_content = if stream.dict.has(b"Filter") {
                    match stream.decompressed_content() {
                        Ok(data) => data,
                        Err(e) => {
                            debug!("Skipping undecodable form XObject {:?}: {}", id, e);
                            continue;
                        }
                    }
                } else {
                    stream.content.clone()
                };
                let form_resources = stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|r| resolve_dict(doc, r))
                    .or(resources);
                collect_image_ids(doc, &form_content, form_resources, depth + 1, seen, out)?;
            }
            _ => {}
        }
    }

    Ok(())
}

/// Finds the page's resource dictionary, following the inherited
/// `Parent` chain when the page does not carry its own.
fn page_resources(doc: &Document, page_id: ObjectId) -> lopdf::Result<Option<&Dictionary>> {
    let mut node = doc.get_dictionary(page_id)?;
    let mut visited = HashSet::from([page_id]);

    loop {
        if let Ok(res) = node.get(b"Resources") {
            return Ok(resolve_dict(doc, res));
        }
        let Ok(parent_id) = node.get(b"Parent").and_then(Object::as_reference) else {
            return Ok(None);
        };
        if !visited.insert(parent_id) {
            return Ok(None);
        }
        node = doc.get_dictionary(parent_id)?;
    }
}

fn xobject_dict<'a>(doc: &'a Document, resources: &'a Dictionary) -> Option<&'a Dictionary> {
    resources
        .get(b"XObject")
        .ok()
        .and_then(|x| resolve_dict(doc, x))
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match obj {
        Object::Dictionary(dict) => Some(dict),
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    /// Builds a PDF with one page per entry. Each page shows `text` (if any)
    /// and paints every image id listed for it.
    fn build_pdf(pages: &[(&str, usize)], shared_image: bool) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });

        let image = || {
            Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => 1,
                    "Height" => 1,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8,
                },
                vec![128],
            )
        };
        let shared_id = doc.add_object(image());

        let mut kids: Vec<Object> = Vec::new();
        for (text, image_count) in pages {
            let mut xobjects = Dictionary::new();
            let mut ops = String::new();
            if !text.is_empty() {
                ops.push_str(&format!("BT /F1 12 Tf 50 700 Td ({}) Tj ET\n", text));
            }
            for i in 0..*image_count {
                let id = if shared_image {
                    shared_id
                } else {
                    doc.add_object(image())
                };
                let name = format!("Im{}", i);
                xobjects.set(name.as_bytes().to_vec(), id);
                ops.push_str(&format!("q 10 0 0 10 0 0 cm /{} Do Q\n", name));
            }

            let content_id = doc.add_object(Stream::new(dictionary! {}, ops.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => font_id },
                    "XObject" => xobjects,
                },
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_extract_text_per_page_in_order() {
        let pdf = build_pdf(&[("First page", 0), ("Second page", 0)], false);
        let pages = PdfExtractor::new().extract(&pdf).unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page_number, 1);
        assert!(pages[0].embedded_text.contains("First page"));
        assert_eq!(pages[1].page_number, 2);
        assert!(pages[1].embedded_text.contains("Second page"));
        assert!(pages.iter().all(|p| p.images.is_empty()));
    }

    #[test]
    fn test_extract_images_are_png() {
        let pdf = build_pdf(&[("", 2)], false);
        let pages = PdfExtractor::new().extract(&pdf).unwrap();

        assert_eq!(pages[0].images.len(), 2);
        for img in &pages[0].images {
            assert_eq!(&img[..8], b"\x89PNG\r\n\x1a\n");
        }
    }

    #[test]
    fn test_same_image_painted_twice_is_collected_once() {
        let pdf = build_pdf(&[("", 3)], true);
        let pages = PdfExtractor::new().extract(&pdf).unwrap();
        assert_eq!(pages[0].images.len(), 1);
    }

    #[test]
    fn test_text_only_skips_images() {
        let pdf = build_pdf(&[("Scan", 2)], false);
        let pages = PdfExtractor::text_only().extract(&pdf).unwrap();
        assert!(pages[0].images.is_empty());
    }

    #[test]
    fn test_corrupted_pdf_is_fatal() {
        let err = PdfExtractor::new()
            .extract(b"not a valid pdf content")
            .unwrap_err();
        assert!(matches!(err, ExtractError::LoadPdf(_)));
    }

    /// One page painting a single image XObject built by `image`.
    fn single_image_pdf(image: impl FnOnce(&mut Document) -> Stream) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let image = image(&mut doc);
        let image_id = doc.add_object(image);
        let content_id = doc.add_object(Stream::new(dictionary! {}, b"/Im0 Do".to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Resources" => dictionary! { "XObject" => dictionary! { "Im0" => image_id } },
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_undecodable_image_is_skipped() {
        let bytes = single_image_pdf(|_| {
            Stream::new(
                dictionary! {
                    "Subtype" => "Image",
                    "Width" => 4,
                    "Height" => 4,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                },
                vec![1, 2, 3],
            )
        });

        let pages = PdfExtractor::new().extract(&bytes).unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].images.is_empty());
    }

    #[test]
    fn test_icc_image_without_components_is_skipped() {
        let bytes = single_image_pdf(|doc| {
            let profile = doc.add_object(Stream::new(dictionary! { "N" => 0 }, vec![]));
            Stream::new(
                dictionary! {
                    "Subtype" => "Image",
                    "Width" => 1,
                    "Height" => 1,
                    "ColorSpace" => vec![Object::Name(b"ICCBased".to_vec()), Object::Reference(profile)],
                    "BitsPerComponent" => 1,
                },
                vec![0xFF],
            )
        });

        let pages = PdfExtractor::new().extract(&bytes).unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].images.is_empty());
    }

    #[test]
    fn test_inherited_resources_are_found() {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Subtype" => "Image",
                "Width" => 1,
                "Height" => 1,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![0],
        ));
        let content_id = doc.add_object(Stream::new(dictionary! {}, b"/Im0 Do".to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => dictionary! { "XObject" => dictionary! { "Im0" => image_id } },
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();

        let pages = PdfExtractor::new().extract(&bytes).unwrap();
        assert_eq!(pages[0].images.len(), 1);
    }
}
