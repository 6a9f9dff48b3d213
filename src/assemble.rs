//! PDF assembly: one page per image, page size equal to image size.
//!
//! ## Embedding
//!
//! | Source | Embedded as |
//! |--------|-------------|
//! | JPEG, 1 or 3 components | original bytes, `DCTDecode` |
//! | JPEG, other (CMYK, …) | decoded RGB samples, `FlateDecode` |
//! | PNG | decoded RGB or gray samples, `FlateDecode`, alpha as `SMask` |
//!
//! Pages are sized 1 px = 1 pt (`MediaBox [0 0 w h]`) with the image drawn
//! over the whole page, so mixed page sizes in one document are preserved.

use crate::error::CaptureError;
use crate::strategy::{ImageEncoding, PageImage};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::{DynamicImage, ImageReader};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::io::{Cursor, Write};
use tracing::{debug, info};

/// Build a PDF from `pages`.
///
/// Input order does not matter: pages are sorted by `page_number`, which must
/// then run exactly `1..=n`.
///
/// # Errors
/// [`CaptureError::Assembly`] when the input is empty, the page numbers are
/// not `1..=n`, or an image cannot be decoded as PNG or JPEG.
pub fn assemble(pages: Vec<PageImage>) -> Result<Vec<u8>, CaptureError> {
    let pages = order_pages(pages)?;
    let total = pages.len();

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(total);

    for page in &pages {
        let xobject = embed_image(&mut doc, page)?;
        let (w, h) = (page.width as i64, page.height as i64);

        let content = format!("q {w} 0 0 {h} 0 0 cm /Im0 Do Q\n").into_bytes();
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), w.into(), h.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => xobject },
            },
        });
        kids.push(page_id.into());
        debug!("Page {}: {}×{} pt", page.page_number, w, h);
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => total as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| CaptureError::Assembly(format!("PDF serialisation failed: {e}")))?;
    info!("Assembled {} pages into {} bytes", total, out.len());
    Ok(out)
}

/// Sort by page number and require exactly `1..=n`.
fn order_pages(mut pages: Vec<PageImage>) -> Result<Vec<PageImage>, CaptureError> {
    if pages.is_empty() {
        return Err(CaptureError::Assembly("no page images to assemble".into()));
    }
    pages.sort_by_key(|p| p.page_number);
    for (idx, page) in pages.iter().enumerate() {
        let expected = idx as u32 + 1;
        if page.page_number != expected {
            return Err(CaptureError::Assembly(format!(
                "page numbers must run 1..={} without gaps or duplicates; found {} where {} was expected",
                pages.len(),
                page.page_number,
                expected
            )));
        }
    }
    Ok(pages)
}

// ── Image XObjects ───────────────────────────────────────────────────────

fn embed_image(doc: &mut Document, page: &PageImage) -> Result<ObjectId, CaptureError> {
    if page.encoding == ImageEncoding::Jpeg {
        if let Some(color_space) = jpeg_components(&page.bytes).and_then(dct_color_space) {
            return Ok(doc.add_object(dct_stream(page, color_space)));
        }
    }

    let img = decode_verified(page)?;
    let (width, height) = (img.width() as i64, img.height() as i64);
    let color = img.color();

    let (samples, color_space) = if color.has_color() {
        (img.to_rgb8().into_raw(), "DeviceRGB")
    } else {
        (img.to_luma8().into_raw(), "DeviceGray")
    };

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width,
        "Height" => height,
        "ColorSpace" => color_space,
        "BitsPerComponent" => 8,
        "Filter" => "FlateDecode",
    };

    if color.has_alpha() {
        let alpha: Vec<u8> = img.to_rgba8().pixels().map(|p| p.0[3]).collect();
        let smask = flate_image_stream(width, height, "DeviceGray", &alpha, page.page_number)?;
        let smask_id = doc.add_object(smask);
        dict.set("SMask", smask_id);
    }

    let data = deflate(&samples, page.page_number)?;
    Ok(doc.add_object(Stream::new(dict, data).with_compression(false)))
}

/// Decode with the recorded format, falling back to the other one.
fn decode_verified(page: &PageImage) -> Result<DynamicImage, CaptureError> {
    let decode = |encoding: ImageEncoding| {
        ImageReader::with_format(Cursor::new(&page.bytes), encoding.image_format()).decode()
    };
    decode(page.encoding)
        .or_else(|first| decode(page.encoding.other()).map_err(|_| first))
        .map_err(|e| CaptureError::Assembly(format!("page {}: cannot decode image: {e}", page.page_number)))
}

fn dct_stream(page: &PageImage, color_space: &str) -> Stream {
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => page.width as i64,
            "Height" => page.height as i64,
            "ColorSpace" => color_space,
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        page.bytes.clone(),
    )
    .with_compression(false)
}

fn flate_image_stream(
    width: i64,
    height: i64,
    color_space: &str,
    samples: &[u8],
    page_number: u32,
) -> Result<Stream, CaptureError> {
    Ok(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width,
            "Height" => height,
            "ColorSpace" => color_space,
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        },
        deflate(samples, page_number)?,
    )
    .with_compression(false))
}

fn deflate(samples: &[u8], page_number: u32) -> Result<Vec<u8>, CaptureError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(samples)
        .and_then(|_| encoder.finish())
        .map_err(|e| CaptureError::Assembly(format!("page {page_number}: compression failed: {e}")))
}

fn dct_color_space(components: u8) -> Option<&'static str> {
    match components {
        1 => Some("DeviceGray"),
        3 => Some("DeviceRGB"),
        _ => None,
    }
}

/// Component count from the first start-of-frame marker of a JPEG stream.
fn jpeg_components(bytes: &[u8]) -> Option<u8> {
    if bytes.get(..2)? != [0xFF, 0xD8] {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            // length(2) precision(1) height(2) width(2) components(1)
            return bytes.get(pos + 9).copied();
        }
        if marker == 0xDA {
            return None;
        }
        pos += 2 + len;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_images::{jpeg, png, png_with_alpha};

    fn page(n: u32, bytes: Vec<u8>) -> PageImage {
        PageImage::decode(n, bytes).unwrap()
    }

    fn media_boxes(pdf: &[u8]) -> Vec<Vec<i64>> {
        let doc = Document::load_mem(pdf).expect("valid PDF");
        doc.get_pages()
            .values()
            .map(|&id| {
                let dict = doc.get_object(id).and_then(Object::as_dict).unwrap();
                dict.get(b"MediaBox")
                    .and_then(Object::as_array)
                    .unwrap()
                    .iter()
                    .map(|o| o.as_i64().unwrap())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn png_and_jpeg_keep_their_sizes() {
        let pdf = assemble(vec![page(1, png(800, 600)), page(2, jpeg(1024, 768))]).unwrap();
        assert!(pdf.starts_with(b"%PDF-"));
        assert_eq!(
            media_boxes(&pdf),
            vec![vec![0, 0, 800, 600], vec![0, 0, 1024, 768]]
        );
    }

    #[test]
    fn empty_input_is_an_assembly_error() {
        assert!(matches!(assemble(Vec::new()), Err(CaptureError::Assembly(_))));
    }

    #[test]
    fn pages_are_ordered_by_number_not_arrival() {
        let pdf = assemble(vec![
            page(3, png(30, 10)),
            page(1, png(10, 10)),
            page(2, png(20, 10)),
        ])
        .unwrap();
        let widths: Vec<i64> = media_boxes(&pdf).into_iter().map(|b| b[2]).collect();
        assert_eq!(widths, vec![10, 20, 30]);
    }

    #[test]
    fn gaps_and_duplicates_are_rejected() {
        let gap = assemble(vec![page(1, png(4, 4)), page(3, png(4, 4))]);
        assert!(matches!(gap, Err(CaptureError::Assembly(ref m)) if m.contains("found 3")));

        let dup = assemble(vec![page(1, png(4, 4)), page(1, png(4, 4))]);
        assert!(matches!(dup, Err(CaptureError::Assembly(_))));

        let zero = assemble(vec![page(0, png(4, 4))]);
        assert!(matches!(zero, Err(CaptureError::Assembly(_))));
    }

    #[test]
    fn jpeg_is_embedded_unchanged() {
        let bytes = jpeg(64, 48);
        let pdf = assemble(vec![page(1, bytes.clone())]).unwrap();
        let doc = Document::load_mem(&pdf).unwrap();
        let found = doc.objects.values().any(|obj| match obj {
            Object::Stream(s) => {
                s.dict.get(b"Filter").and_then(Object::as_name).ok() == Some(b"DCTDecode".as_slice())
                    && s.content == bytes
            }
            _ => false,
        });
        assert!(found, "expected the original JPEG bytes as a DCTDecode stream");
    }

    #[test]
    fn png_alpha_becomes_smask() {
        let pdf = assemble(vec![page(1, png_with_alpha(16, 8))]).unwrap();
        let doc = Document::load_mem(&pdf).unwrap();
        let has_smask = doc.objects.values().any(|obj| match obj {
            Object::Stream(s) => s.dict.get(b"SMask").is_ok(),
            _ => false,
        });
        assert!(has_smask);
    }

    #[test]
    fn mislabelled_png_still_decodes() {
        let mut img = page(1, png(12, 9));
        img.encoding = ImageEncoding::Jpeg;
        let pdf = assemble(vec![img]).unwrap();
        assert_eq!(media_boxes(&pdf), vec![vec![0, 0, 12, 9]]);
    }

    #[test]
    fn undecodable_bytes_are_rejected() {
        let bogus = PageImage {
            page_number: 1,
            bytes: vec![0x89, b'P', b'N', b'G', 0, 0, 0],
            encoding: ImageEncoding::Png,
            width: 10,
            height: 10,
        };
        assert!(matches!(assemble(vec![bogus]), Err(CaptureError::Assembly(_))));
    }

    #[test]
    fn jpeg_component_scan() {
        assert_eq!(jpeg_components(&jpeg(8, 8)), Some(3));
        assert_eq!(jpeg_components(&png(8, 8)), None);
        assert_eq!(jpeg_components(&[0xFF, 0xD8]), None);
    }
}
