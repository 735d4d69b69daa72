//! EXIF provenance embedding for photo assets.
//!
//! The embedder writes the tagging user into `Artist`, the parsed capture date
//! into `DateTimeOriginal`, and the caption into both `ImageDescription` and
//! `UserComment`. Text is reduced to printable ASCII first, since EXIF ASCII
//! fields cannot carry anything else; every other character becomes `?`.
//!
//! Existing EXIF fields of the primary image are preserved unless overwritten.
//!
//! # Example
//!
//! ```no_run
//! use harvest_core::metadata::{EmbedOptions, MetadataEmbedder, PhotoTags};
//!
//! # fn example(jpeg: bytes::Bytes) -> Result<(), Box<dyn std::error::Error>> {
//! let embedder = MetadataEmbedder::new(EmbedOptions::default());
//! let tags = PhotoTags {
//!     actor: "Jane Q",
//!     caption: "hello",
//!     date: "2023-01-02",
//!     source_link: "https://m.example.com/photo.php?fbid=1",
//! };
//! let tagged = embedder.embed(jpeg, &tags)?;
//! # Ok(())
//! # }
//! ```

mod date;

pub use date::{EXIF_DATETIME_FORMAT, format_exif_datetime, parse_capture_date};

use std::io::Cursor;

use bytes::Bytes;
use chrono::{Local, NaiveDateTime};
use exif::experimental::Writer;
use exif::{Field, In, Tag, Value};
use img_parts::{DynImage, ImageEXIF};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Character written in place of anything EXIF ASCII cannot represent.
pub const REPLACEMENT_CHAR: char = '?';

/// `UserComment` character-code prefix for ASCII payloads.
const USER_COMMENT_ASCII_PREFIX: &[u8; 8] = b"ASCII\0\0\0";

/// Tags this module writes; stale copies in the source EXIF are dropped.
const WRITTEN_TAGS: &[Tag] = &[
    Tag::Artist,
    Tag::DateTimeOriginal,
    Tag::ImageDescription,
    Tag::UserComment,
    Tag::Copyright,
];

/// IFD pointers are recomputed by the EXIF writer.
const POINTER_TAGS: &[Tag] = &[
    Tag::ExifIFDPointer,
    Tag::GPSInfoIFDPointer,
    Tag::InteropIFDPointer,
];

/// Errors that can occur while embedding metadata.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The bytes are not a JPEG, PNG or WebP container.
    #[error("unsupported image container")]
    UnsupportedFormat,

    /// The container was recognized but could not be parsed.
    #[error("malformed image container: {reason}")]
    Container {
        /// Parser diagnostic.
        reason: String,
    },

    /// The EXIF block could not be encoded.
    #[error("failed to encode EXIF: {source}")]
    Encode {
        /// The underlying EXIF error.
        #[source]
        source: exif::Error,
    },
}

/// Layout of the free-text comment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CommentStyle {
    /// Caption only.
    #[default]
    Caption,
    /// Caption, `Tagged by <actor>` and the canonical source link; also sets `Copyright`.
    Attributed,
}

/// Embedder configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbedOptions {
    /// Comment layout.
    pub comment_style: CommentStyle,
}

/// Scraped photo fields to embed.
#[derive(Debug, Clone, Copy)]
pub struct PhotoTags<'a> {
    /// Tagging/posting user.
    pub actor: &'a str,
    /// Caption text.
    pub caption: &'a str,
    /// Site-reported date string.
    pub date: &'a str,
    /// Canonical link to the source page.
    pub source_link: &'a str,
}

/// Writes provenance fields into image containers.
#[derive(Debug, Clone, Default)]
pub struct MetadataEmbedder {
    options: EmbedOptions,
}

impl MetadataEmbedder {
    /// Creates an embedder.
    #[must_use]
    pub fn new(options: EmbedOptions) -> Self {
        Self { options }
    }

    /// Embeds `tags` into `image`, resolving relative dates against the local clock.
    ///
    /// # Errors
    ///
    /// See [`Self::embed_at`].
    pub fn embed(&self, image: Bytes, tags: &PhotoTags<'_>) -> Result<Bytes, EmbedError> {
        self.embed_at(image, tags, Local::now().naive_local())
    }

    /// Embeds `tags` into `image`, resolving relative dates against `now`.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::UnsupportedFormat`] for non-image bytes,
    /// [`EmbedError::Container`] for a corrupt container and
    /// [`EmbedError::Encode`] if the EXIF block cannot be built.
    #[instrument(level = "debug", skip(self, image, tags), fields(bytes = image.len()))]
    pub fn embed_at(
        &self,
        image: Bytes,
        tags: &PhotoTags<'_>,
        now: NaiveDateTime,
    ) -> Result<Bytes, EmbedError> {
        let mut container = DynImage::from_bytes(image)
            .map_err(|e| EmbedError::Container {
                reason: format!("{e:?}"),
            })?
            .ok_or(EmbedError::UnsupportedFormat)?;

        let ours = self.fields_for(tags, now);
        let preserved = container
            .exif()
            .map(|raw| preserved_fields(&raw))
            .unwrap_or_default();

        let exif = match encode_exif(preserved.iter().chain(ours.iter())) {
            Ok(exif) => exif,
            Err(e) if !preserved.is_empty() => {
                warn!(error = %e, "existing EXIF could not be re-encoded; replacing it");
                encode_exif(ours.iter())?
            }
            Err(e) => return Err(e),
        };

        container.set_exif(Some(exif));
        Ok(container.encoder().bytes())
    }

    fn fields_for(&self, tags: &PhotoTags<'_>, now: NaiveDateTime) -> Vec<Field> {
        let mut fields = vec![ascii_field(Tag::Artist, tags.actor)];

        match parse_capture_date(tags.date, now) {
            Some(at) => fields.push(ascii_field(Tag::DateTimeOriginal, &format_exif_datetime(at))),
            None => warn!(date = tags.date, "unparseable capture date; DateTimeOriginal omitted"),
        }

        let comment = match self.options.comment_style {
            CommentStyle::Caption => tags.caption.to_string(),
            CommentStyle::Attributed => {
                fields.push(ascii_field(
                    Tag::Copyright,
                    &format!("{} ({})", tags.actor, tags.source_link),
                ));
                format!(
                    "{}\nTagged by {}\n{}",
                    tags.caption, tags.actor, tags.source_link
                )
            }
        };
        fields.push(ascii_field(Tag::ImageDescription, &comment));

        let mut user_comment = USER_COMMENT_ASCII_PREFIX.to_vec();
        user_comment.extend_from_slice(sanitize_ascii(&comment).as_bytes());
        fields.push(Field {
            tag: Tag::UserComment,
            ifd_num: In::PRIMARY,
            value: Value::Undefined(user_comment, 0),
        });

        fields
    }
}

/// Replaces every character outside printable ASCII (newline and tab kept)
/// with [`REPLACEMENT_CHAR`].
#[must_use]
pub fn sanitize_ascii(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c == '\n' || c == '\t' || (c.is_ascii() && !c.is_ascii_control()) {
                c
            } else {
                REPLACEMENT_CHAR
            }
        })
        .collect()
}

fn ascii_field(tag: Tag, text: &str) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![sanitize_ascii(text).into_bytes()]),
    }
}

fn preserved_fields(raw: &Bytes) -> Vec<Field> {
    match exif::Reader::new().read_raw(raw.to_vec()) {
        Ok(existing) => existing
            .fields()
            .filter(|f| f.ifd_num == In::PRIMARY)
            .filter(|f| !WRITTEN_TAGS.contains(&f.tag) && !POINTER_TAGS.contains(&f.tag))
            .filter(|f| !matches!(f.value, Value::Unknown(..)))
            .cloned()
            .collect(),
        Err(e) => {
            debug!(error = %e, "ignoring unreadable existing EXIF");
            Vec::new()
        }
    }
}

fn encode_exif<'a>(fields: impl Iterator<Item = &'a Field>) -> Result<Bytes, EmbedError> {
    let mut writer = Writer::new();
    for field in fields {
        writer.push_field(field);
    }
    let mut out = Cursor::new(Vec::new());
    writer
        .write(&mut out, false)
        .map_err(|source| EmbedError::Encode { source })?;
    Ok(Bytes::from(out.into_inner()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use chrono::NaiveDate;

    use super::*;

    /// Smallest JPEG the container parser accepts: SOI, JFIF APP0, SOS, EOI.
    pub(crate) fn tiny_jpeg() -> Bytes {
        Bytes::from_static(&[
            0xFF, 0xD8, // SOI
            0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00, 0x01,
            0x00, 0x01, 0x00, 0x00, // APP0
            0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00, // SOS
            0x12, 0x34, 0x56, // scan data
            0xFF, 0xD9, // EOI
        ])
    }

    pub(crate) fn read_exif(image: &[u8]) -> exif::Exif {
        exif::Reader::new()
            .read_from_container(&mut Cursor::new(image))
            .unwrap()
    }

    pub(crate) fn ascii(exif: &exif::Exif, tag: Tag) -> Option<String> {
        match &exif.get_field(tag, In::PRIMARY)?.value {
            Value::Ascii(parts) => Some(String::from_utf8(parts.concat()).unwrap()),
            other => panic!("expected ASCII value for {tag}, got {other:?}"),
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn tags<'a>(actor: &'a str, caption: &'a str, date: &'a str) -> PhotoTags<'a> {
        PhotoTags {
            actor,
            caption,
            date,
            source_link: "https://m.example.com/photo.php?fbid=42",
        }
    }

    #[test]
    fn test_embed_round_trip() {
        let embedder = MetadataEmbedder::default();
        let out = embedder
            .embed_at(tiny_jpeg(), &tags("Jane Q", "hello", "2023-01-02"), now())
            .unwrap();

        let exif = read_exif(&out);
        assert_eq!(ascii(&exif, Tag::Artist).as_deref(), Some("Jane Q"));
        assert_eq!(
            ascii(&exif, Tag::DateTimeOriginal).as_deref(),
            Some("2023:01:02 00:00:00")
        );
        assert_eq!(ascii(&exif, Tag::ImageDescription).as_deref(), Some("hello"));
        match &exif.get_field(Tag::UserComment, In::PRIMARY).unwrap().value {
            Value::Undefined(bytes, _) => {
                assert!(bytes.starts_with(USER_COMMENT_ASCII_PREFIX));
                assert!(bytes.ends_with(b"hello"));
            }
            other => panic!("unexpected UserComment value {other:?}"),
        }
    }

    #[test]
    fn test_embed_replaces_non_ascii_deterministically() {
        let embedder = MetadataEmbedder::default();
        let out = embedder
            .embed_at(tiny_jpeg(), &tags("Zoë Ålund", "café ☕", "Today"), now())
            .unwrap();

        let exif = read_exif(&out);
        assert_eq!(ascii(&exif, Tag::Artist).as_deref(), Some("Zo? ?lund"));
        assert_eq!(ascii(&exif, Tag::ImageDescription).as_deref(), Some("caf? ?"));
        assert_eq!(
            ascii(&exif, Tag::DateTimeOriginal).as_deref(),
            Some("2024:06:15 10:00:00")
        );
    }

    #[test]
    fn test_embed_attributed_comment_and_copyright() {
        let embedder = MetadataEmbedder::new(EmbedOptions {
            comment_style: CommentStyle::Attributed,
        });
        let out = embedder
            .embed_at(tiny_jpeg(), &tags("Jane Q", "hello", "2023-01-02"), now())
            .unwrap();

        let exif = read_exif(&out);
        assert_eq!(
            ascii(&exif, Tag::ImageDescription).as_deref(),
            Some("hello\nTagged by Jane Q\nhttps://m.example.com/photo.php?fbid=42")
        );
        assert_eq!(
            ascii(&exif, Tag::Copyright).as_deref(),
            Some("Jane Q (https://m.example.com/photo.php?fbid=42)")
        );
    }

    #[test]
    fn test_embed_unparseable_date_omits_timestamp() {
        let out = MetadataEmbedder::default()
            .embed_at(tiny_jpeg(), &tags("Jane Q", "hello", "long ago"), now())
            .unwrap();
        let exif = read_exif(&out);
        assert!(exif.get_field(Tag::DateTimeOriginal, In::PRIMARY).is_none());
        assert_eq!(ascii(&exif, Tag::Artist).as_deref(), Some("Jane Q"));
    }

    #[test]
    fn test_embed_twice_overwrites_instead_of_duplicating() {
        let embedder = MetadataEmbedder::default();
        let once = embedder
            .embed_at(tiny_jpeg(), &tags("First", "one", "2020-05-05"), now())
            .unwrap();
        let twice = embedder
            .embed_at(once, &tags("Second", "two", "2021-06-06"), now())
            .unwrap();

        let exif = read_exif(&twice);
        assert_eq!(ascii(&exif, Tag::Artist).as_deref(), Some("Second"));
        assert_eq!(
            ascii(&exif, Tag::DateTimeOriginal).as_deref(),
            Some("2021:06:06 00:00:00")
        );
    }

    #[test]
    fn test_embed_rejects_non_image_bytes() {
        let err = MetadataEmbedder::default()
            .embed_at(
                Bytes::from_static(b"<html>not an image</html>"),
                &tags("a", "b", "Today"),
                now(),
            )
            .unwrap_err();
        assert!(matches!(err, EmbedError::UnsupportedFormat));
    }

    #[test]
    fn test_sanitize_ascii_keeps_newlines_and_tabs() {
        assert_eq!(sanitize_ascii("a\nb\tc\u{7}d"), "a\nb\tc?d");
    }
}
