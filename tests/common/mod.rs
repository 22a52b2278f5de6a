//! In-memory EPUB fixtures shared by the integration tests.

#![allow(dead_code)]

use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

pub const CONTENT_OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="uid">urn:uuid:00000000-0000-4000-8000-000000000000</dc:identifier>
    <dc:title>The Sample</dc:title>
    <dc:language>en</dc:language>
    <meta name="cover" content="cover-image"/>
    <meta name="calibre:timestamp" content="2020-01-01T00:00:00+00:00"/>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="cover" href="Text/cover.xhtml" media-type="application/xhtml+xml" properties="svg"/>
    <item id="ch1" href="Text/chapter1.xhtml" media-type="application/xhtml+xml"/>
    <item id="index" href="Text/index.xhtml" media-type="application/xhtml+xml"/>
    <item id="css" href="Styles/style.css" media-type="text/css"/>
    <item id="font" href="Fonts/serif.otf" media-type="font/otf"/>
    <item id="cover-image" href="Images/cover.jpg" media-type="image/jpeg" properties="cover-image"/>
    <item id="script" href="Misc/reader.js" media-type="application/javascript"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="cover"/>
    <itemref idref="ch1"/>
    <itemref idref="index"/>
  </spine>
</package>"#;

pub const NAV_XHTML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
  <head><title>Contents</title></head>
  <body>
    <nav epub:type="toc" id="toc">
      <ol>
        <li><a href="Text/cover.xhtml">Cover</a></li>
        <li><a href="Text/chapter1.xhtml">Chapter One</a></li>
        <li><a href="Text/index.xhtml">Index</a></li>
      </ol>
    </nav>
    <nav epub:type="page-list" hidden="">
      <ol><li><a href="Text/chapter1.xhtml#page1">1</a></li></ol>
    </nav>
  </body>
</html>"#;

pub const TOC_NCX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head><meta name="dtb:uid" content="urn:uuid:00000000-0000-4000-8000-000000000000"/></head>
  <docTitle><text>The Sample</text></docTitle>
  <navMap>
    <navPoint id="np1" playOrder="1">
      <navLabel><text>Chapter One</text></navLabel>
      <content src="Text/chapter1.xhtml"/>
    </navPoint>
  </navMap>
  <pageList>
    <pageTarget id="pt1" type="normal" value="1">
      <navLabel><text>1</text></navLabel>
      <content src="Text/chapter1.xhtml#page1"/>
    </pageTarget>
  </pageList>
</ncx>"#;

pub const COVER_XHTML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
  <head><title>Cover</title><link rel="stylesheet" href="../Styles/style.css"/></head>
  <body epub:type="cover">
    <img src="../Images/cover.jpg" alt="The Sample, a novel"/>
    <p class="credit">Cover art by Someone</p>
  </body>
</html>"#;

pub const CHAPTER_XHTML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
  <head>
    <title>Chapter One</title>
    <meta charset="utf-8"/>
    <link rel="stylesheet" href="../Styles/style.css"/>
    <script src="../Misc/reader.js"></script>
  </head>
  <body epub:type="bodymatter">
    <section epub:type="chapter" id="ch1">
      <h1 class="title">Chapter One</h1>
      <p class="first">It was a queer&nbsp;day, and the fireman&rsquo;s
         dog was feeling gay.<span epub:type="pagebreak" id="page1" title="1"/></p>
      <p>An illustration follows.</p>
      <img src="../Images/cover.jpg" alt="Image"/>
      <p style="text-align:center">&copy; nobody</p>
      <pre>  keep
    this</pre>
    </section>
  </body>
</html>"#;

pub const INDEX_XHTML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
  <head><title>Index</title></head>
  <body>
    <h1>Index</h1>
    <ul>
      <li><a href="chapter1.xhtml#a">Apples</a>, <a href="chapter1.xhtml#b">2</a></li>
      <li><a href="chapter1.xhtml#c">Bears</a>, <a href="chapter1.xhtml#d">3</a></li>
      <li><a href="chapter1.xhtml#e">Cats</a></li>
    </ul>
  </body>
</html>"#;

pub const STYLE_CSS: &str = "p { text-indent: 1em; }\n";

/// Minimal JPEG header followed by filler.
pub fn jpeg_bytes() -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
    data.extend(std::iter::repeat_n(0x42, 256));
    data
}

/// Entries of the sample book, in archive order. `mimetype` is deliberately
/// not first and not stored.
pub fn sample_entries() -> Vec<(String, Vec<u8>)> {
    [
        ("META-INF/container.xml", CONTAINER_XML.as_bytes().to_vec()),
        ("mimetype", b"application/epub+zip".to_vec()),
        ("OEBPS/content.opf", CONTENT_OPF.as_bytes().to_vec()),
        ("OEBPS/nav.xhtml", NAV_XHTML.as_bytes().to_vec()),
        ("OEBPS/toc.ncx", TOC_NCX.as_bytes().to_vec()),
        ("OEBPS/Text/cover.xhtml", COVER_XHTML.as_bytes().to_vec()),
        ("OEBPS/Text/chapter1.xhtml", CHAPTER_XHTML.as_bytes().to_vec()),
        ("OEBPS/Text/index.xhtml", INDEX_XHTML.as_bytes().to_vec()),
        ("OEBPS/Styles/style.css", STYLE_CSS.as_bytes().to_vec()),
        ("OEBPS/Fonts/serif.otf", b"OTTO\0\0\0\0".to_vec()),
        ("OEBPS/Images/cover.jpg", jpeg_bytes()),
        ("OEBPS/Misc/reader.js", b"console.log('hi');".to_vec()),
    ]
    .into_iter()
    .map(|(name, data)| (name.to_string(), data))
    .collect()
}

/// Zip the given entries, deflating all of them.
pub fn build_epub(entries: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in entries {
        zip.start_file(name.as_str(), options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub fn sample_epub() -> Vec<u8> {
    build_epub(&sample_entries())
}

pub fn entry_names(bytes: &[u8]) -> Vec<String> {
    let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    archive.file_names().map(str::to_string).collect()
}

pub fn read_entry(bytes: &[u8], name: &str) -> String {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut out = String::new();
    archive
        .by_name(name)
        .unwrap()
        .read_to_string(&mut out)
        .unwrap();
    out
}

pub fn read_entry_bytes(bytes: &[u8], name: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut out = Vec::new();
    archive.by_name(name).unwrap().read_to_end(&mut out).unwrap();
    out
}
