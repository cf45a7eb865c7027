//! Single-chapter EPUB 3 packaging.
//!
//! [`package_epub`] turns a title and an HTML fragment into a complete
//! package: `mimetype`, `META-INF/container.xml`, `OEBPS/content.opf`,
//! `OEBPS/nav.xhtml` and `OEBPS/content.xhtml`, in that order.

use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::info;
use uuid::Uuid;

use folio_core::defaults::{EPUB_LANGUAGE, EPUB_MEDIA_TYPE, EPUB_UNTITLED};
use folio_core::Result;

use crate::archive::{write_archive, ArchiveEntry, ChecksumMode, MIMETYPE_ENTRY};
use crate::escape::escape_markup;

pub const CONTAINER_PATH: &str = "META-INF/container.xml";
pub const PACKAGE_PATH: &str = "OEBPS/content.opf";
pub const NAV_PATH: &str = "OEBPS/nav.xhtml";
pub const CONTENT_PATH: &str = "OEBPS/content.xhtml";

/// Knobs for [`package_epub`].
#[derive(Debug, Clone)]
pub struct PackageOptions {
    /// `dc:language` value.
    pub language: String,
    /// Package identifier; a random one is generated when absent.
    pub identifier: Option<Uuid>,
    /// `dcterms:modified` and archive timestamps; now when absent.
    pub modified: Option<DateTime<Utc>>,
    pub checksum: ChecksumMode,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            language: EPUB_LANGUAGE.to_string(),
            identifier: None,
            modified: None,
            checksum: ChecksumMode::default(),
        }
    }
}

impl PackageOptions {
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_identifier(mut self, identifier: Uuid) -> Self {
        self.identifier = Some(identifier);
        self
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn with_checksum(mut self, checksum: ChecksumMode) -> Self {
        self.checksum = checksum;
        self
    }
}

/// A produced package.
#[derive(Debug, Clone)]
pub struct EpubPackage {
    pub bytes: Vec<u8>,
    /// Always `application/epub+zip`.
    pub media_type: &'static str,
    /// `urn:uuid:` identifier written into the package document.
    pub identifier: String,
}

/// Package `title` and `body_html` into an EPUB.
///
/// The title is escaped before it is embedded anywhere. `body_html` is
/// embedded verbatim; malformed markup is the caller's concern.
pub fn package_epub(title: &str, body_html: &str, options: &PackageOptions) -> Result<EpubPackage> {
    let start = Instant::now();
    let title = if title.trim().is_empty() {
        EPUB_UNTITLED
    } else {
        title
    };
    let escaped_title = escape_markup(title);
    let identifier = format!("urn:uuid:{}", options.identifier.unwrap_or_else(Uuid::new_v4));
    let modified = options.modified.unwrap_or_else(Utc::now);
    let language = escape_markup(&options.language);

    let entries = vec![
        ArchiveEntry::stored(MIMETYPE_ENTRY, EPUB_MEDIA_TYPE),
        ArchiveEntry::new(CONTAINER_PATH, container_xml()),
        ArchiveEntry::new(
            PACKAGE_PATH,
            package_opf(&escaped_title, &identifier, &language, modified),
        ),
        ArchiveEntry::new(NAV_PATH, nav_xhtml(&escaped_title, &language)),
        ArchiveEntry::new(
            CONTENT_PATH,
            content_xhtml(&escaped_title, &language, body_html),
        ),
    ];

    let bytes = write_archive(&entries, options.checksum, modified)?;

    info!(
        entry_count = entries.len(),
        byte_len = bytes.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "EPUB packaged"
    );

    Ok(EpubPackage {
        bytes,
        media_type: EPUB_MEDIA_TYPE,
        identifier,
    })
}

fn container_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="{}" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#,
        PACKAGE_PATH
    )
}

fn package_opf(title: &str, identifier: &str, language: &str, modified: DateTime<Utc>) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="book-id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">{identifier}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:language>{language}</dc:language>
    <meta property="dcterms:modified">{modified}</meta>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="content" href="content.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="content"/>
  </spine>
</package>
"#,
        modified = modified.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

fn nav_xhtml(title: &str, language: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" lang="{language}" xml:lang="{language}">
<head>
  <title>{title}</title>
</head>
<body>
  <nav epub:type="toc" id="toc">
    <ol>
      <li><a href="content.xhtml">{title}</a></li>
    </ol>
  </nav>
</body>
</html>
"#
    )
}

fn content_xhtml(title: &str, language: &str, body_html: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" lang="{language}" xml:lang="{language}">
<head>
  <title>{title}</title>
</head>
<body>
  <h1>{title}</h1>
{body_html}
</body>
</html>
"#
    )
}
