//! Builders for test PDFs.

#![allow(dead_code)]

use lopdf::{dictionary, Dictionary, Document, Object, Stream};

/// One page of a test PDF.
pub struct PageSpec {
    pub text: Option<String>,
    /// Gray levels of the 1x1 images painted on the page.
    pub images: Vec<u8>,
}

impl PageSpec {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            images: Vec::new(),
        }
    }

    pub fn scanned(gray: u8) -> Self {
        Self {
            text: None,
            images: vec![gray],
        }
    }
}

/// Builds a PDF whose pages carry Courier text and/or grayscale images.
pub struct PdfBuilder {
    pages: Vec<PageSpec>,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self { pages: Vec::new() }
    }

    pub fn page(mut self, page: PageSpec) -> Self {
        self.pages.push(page);
        self
    }

    pub fn text_page(self, text: &str) -> Self {
        self.page(PageSpec::text(text))
    }

    pub fn scanned_page(self, gray: u8) -> Self {
        self.page(PageSpec::scanned(gray))
    }

    pub fn build(self) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });

        let mut kids: Vec<Object> = Vec::new();
        for page in &self.pages {
            let mut ops = String::new();
            if let Some(text) = &page.text {
                ops.push_str(&format!("BT /F1 12 Tf 50 700 Td ({}) Tj ET\n", text));
            }

            let mut xobjects = Dictionary::new();
            for (i, gray) in page.images.iter().enumerate() {
                let image_id = doc.add_object(Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Width" => 1,
                        "Height" => 1,
                        "ColorSpace" => "DeviceGray",
                        "BitsPerComponent" => 8,
                    },
                    vec![*gray],
                ));
                let name = format!("Im{}", i);
                xobjects.set(name.as_bytes().to_vec(), image_id);
                ops.push_str(&format!("q 600 0 0 800 0 0 cm /{} Do Q\n", name));
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
        doc.save_to(&mut bytes).expect("Failed to serialize test PDF");
        bytes
    }
}

/// A one-page PDF with the given embedded text.
pub fn text_pdf(text: &str) -> Vec<u8> {
    PdfBuilder::new().text_page(text).build()
}
