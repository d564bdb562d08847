//! Playlist model, parsing, and variant selection.
//!
//! A fetched playlist is parsed once into a [`Manifest`] and is read-only
//! from then on. Every URI stored in the model is absolute: relative entries
//! are resolved against the playlist's base URI while parsing, so nothing
//! downstream needs to know where a playlist came from.
//!
//! # Example
//!
//! ```
//! use hlsgrab_core::manifest::{Manifest, VariantPolicy, parse_manifest, select_variant};
//! use url::Url;
//!
//! let base = Url::parse("https://cdn.example/live/master.m3u8").unwrap();
//! let text = "#EXTM3U\n\
//!     #EXT-X-STREAM-INF:BANDWIDTH=500000\nlow.m3u8\n\
//!     #EXT-X-STREAM-INF:BANDWIDTH=1200000\nhigh.m3u8\n";
//!
//! let Manifest::Master(master) = parse_manifest(text, &base).unwrap() else {
//!     panic!("expected a master playlist");
//! };
//! let variant = select_variant(&master, &VariantPolicy::default()).unwrap();
//! assert_eq!(variant.uri.as_str(), "https://cdn.example/live/high.m3u8");
//! ```

mod error;
mod parser;
mod select;

pub use error::{ParseError, SelectError};
pub use parser::parse_manifest;
pub use select::{SelectedRenditions, VariantPolicy, select_renditions, select_variant};

use serde::Serialize;
use url::Url;

/// A parsed playlist: either a master playlist listing variants or a media
/// playlist listing segments.
#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    /// Master playlist (contains variant stream declarations).
    Master(MasterPlaylist),
    /// Media playlist (contains segment declarations).
    Media(MediaPlaylist),
}

impl Manifest {
    /// Base URI the playlist's relative entries were resolved against.
    #[must_use]
    pub fn base_uri(&self) -> &Url {
        match self {
            Self::Master(master) => &master.base_uri,
            Self::Media(media) => &media.base_uri,
        }
    }

    /// Short label used in logs and error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Master(_) => "master",
            Self::Media(_) => "media",
        }
    }
}

/// Master playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterPlaylist {
    /// URI of the playlist itself.
    pub base_uri: Url,
    /// Variant streams in document order.
    pub variants: Vec<Variant>,
    /// Alternate audio/subtitle renditions in document order.
    pub renditions: Vec<Rendition>,
}

/// Media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    /// URI of the playlist itself.
    pub base_uri: Url,
    /// Segments in playback order; `segments[i].sequence_index == i`.
    pub segments: Vec<Segment>,
    /// Renditions declared by the playlist. EXT-X-MEDIA belongs to master
    /// playlists, so this is empty for well-formed input.
    pub renditions: Vec<Rendition>,
}

impl MediaPlaylist {
    /// Sum of the advertised segment durations, in seconds.
    #[must_use]
    pub fn total_duration_secs(&self) -> f64 {
        self.segments.iter().map(|s| s.duration_secs).sum()
    }
}

/// Frame size advertised by a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Resolution {
    pub width: u64,
    pub height: u64,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One encoded quality of the content, referenced from a master playlist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variant {
    /// Absolute URI of the variant's media playlist.
    pub uri: Url,
    /// Peak bits per second; the ranking key for default selection.
    pub bandwidth: u64,
    /// Advertised frame size, if any.
    pub resolution: Option<Resolution>,
    /// CODECS attribute, verbatim.
    pub codecs: Option<String>,
    /// AUDIO group this variant pairs with.
    pub audio_group: Option<String>,
    /// SUBTITLES group this variant pairs with.
    pub subtitle_group: Option<String>,
}

/// Kind of an alternate rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenditionKind {
    Audio,
    Subtitles,
}

impl RenditionKind {
    /// Lowercase label, also used as the file-name infix for rendition outputs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Subtitles => "subtitles",
        }
    }
}

/// Alternate audio or subtitle track declared with EXT-X-MEDIA.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rendition {
    pub kind: RenditionKind,
    /// Absolute URI of the rendition's media playlist.
    pub uri: Url,
    pub group_id: String,
    pub name: String,
    pub language: Option<String>,
    /// `DEFAULT=YES` in the playlist.
    pub is_default: bool,
}

/// Absolute byte range of a sub-range segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    /// Value for an HTTP `Range` request header. `None` for empty ranges.
    #[must_use]
    pub fn to_header_value(self) -> Option<String> {
        if self.length == 0 {
            return None;
        }
        let last = self.offset.saturating_add(self.length - 1);
        Some(format!("bytes={}-{last}", self.offset))
    }

    /// First byte after the range.
    #[must_use]
    pub fn end(self) -> u64 {
        self.offset.saturating_add(self.length)
    }
}

/// One media segment of a media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// 0-based position in document order; the only reassembly ordering key.
    pub sequence_index: usize,
    /// Absolute URI of the segment resource.
    pub uri: Url,
    /// Advertised duration (EXTINF), in seconds.
    pub duration_secs: f64,
    /// Sub-range of the resource, for EXT-X-BYTERANGE segments.
    pub byte_range: Option<ByteRange>,
}
