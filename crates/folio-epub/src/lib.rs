//! # folio-epub
//!
//! Minimal EPUB packaging for folio.
//!
//! This crate provides:
//! - A stored (uncompressed) ZIP writer that honours the EPUB rule that the
//!   first entry is an uncompressed `mimetype`
//! - A reader for the same layout, used for inspection and verification
//! - Generators for the container, package, navigation and content documents
//!
//! ## Example
//!
//! ```
//! use folio_epub::{package_epub, PackageOptions};
//!
//! let package = package_epub("Notes", "<p>Hello</p>", &PackageOptions::default()).unwrap();
//! assert_eq!(package.media_type, "application/epub+zip");
//! assert_eq!(&package.bytes[30..38], b"mimetype");
//! ```

pub mod archive;
pub mod escape;
pub mod package;

pub use archive::{read_archive, write_archive, ArchiveEntry, ChecksumMode, StoredEntry};
pub use escape::escape_markup;
pub use package::{package_epub, EpubPackage, PackageOptions};
