//! Shared fixtures for integration tests.

#![allow(dead_code)]

use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// A solid-colour PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Png)
}

/// A solid-colour baseline JPEG of the given size.
pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Jpeg)
}

fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([40, 90, 160]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).unwrap();
    out.into_inner()
}

/// A minimal viewer page whose page label reads `current / total`.
pub fn viewer_html(title: &str, current: u32, total: u32) -> String {
    format!(
        r#"<!doctype html>
<html>
  <head><title>{title}</title></head>
  <body>
    <header><span class="page-label">{current} / {total}</span></header>
    <main><img class="page-view" src="/pages/{current}.png"></main>
  </body>
</html>"#
    )
}

/// A viewer page showing only an email gate.
pub fn gated_html() -> &'static str {
    r#"<!doctype html>
<html>
  <head><title>Sign in</title></head>
  <body>
    <form class="email-gate"><input type="email" name="email"></form>
  </body>
</html>"#
}

/// `(width, height)` of every page's MediaBox, in page order.
pub fn media_boxes(pdf: &[u8]) -> Vec<(i64, i64)> {
    let doc = lopdf::Document::load_mem(pdf).unwrap();
    doc.get_pages()
        .values()
        .map(|&id| {
            let page = doc.get_dictionary(id).unwrap();
            let mb = page.get(b"MediaBox").unwrap().as_array().unwrap();
            let num = |o: &lopdf::Object| match o {
                lopdf::Object::Integer(i) => *i,
                lopdf::Object::Real(r) => *r as i64,
                other => panic!("unexpected MediaBox entry {other:?}"),
            };
            (num(&mb[2]), num(&mb[3]))
        })
        .collect()
}
