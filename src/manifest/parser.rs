//! Playlist text → [`Manifest`].

use std::borrow::Cow;

use m3u8_rs::{AlternativeMedia, AlternativeMediaType, KeyMethod, Playlist, parse_playlist_res};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{
    ByteRange, Manifest, MasterPlaylist, MediaPlaylist, ParseError, Rendition, RenditionKind,
    Resolution, Segment, Variant,
};

/// Longest excerpt of the first line quoted in a [`ParseError::Malformed`].
const MAX_EXCERPT_LEN: usize = 80;

const PLAYLIST_HEADER: &str = "#EXTM3U";

/// Parses playlist text into a [`Manifest`], resolving every relative URI
/// against `base_uri`.
///
/// Master and media playlists are told apart by their marker tags: a text
/// with only segment entries and no variant-stream tags is a media playlist.
/// Segments are numbered by their position in the document, which is the
/// reassembly order regardless of any EXT-X-MEDIA-SEQUENCE value.
///
/// A leading byte-order mark or blank lines are ignored, and a document that
/// opens with an `#EXT` tag but lacks the `#EXTM3U` header is accepted.
///
/// # Errors
///
/// - [`ParseError::Malformed`] when the text is not an M3U8 document
/// - [`ParseError::Empty`] when no variants and no segments are declared
/// - [`ParseError::UnresolvableUri`] when an entry's URI cannot be resolved
#[instrument(skip(raw), fields(base_uri = %base_uri, raw_len = raw.len()))]
pub fn parse_manifest(raw: &str, base_uri: &Url) -> Result<Manifest, ParseError> {
    let text = normalize(raw).ok_or_else(|| not_a_playlist(raw, base_uri))?;
    let playlist = parse_playlist_res(text.as_bytes()).map_err(|e| {
        debug!(error = %e, "m3u8 parser rejected playlist");
        not_a_playlist(raw, base_uri)
    })?;

    let manifest = match playlist {
        Playlist::MasterPlaylist(master) => Manifest::Master(convert_master(master, base_uri)?),
        Playlist::MediaPlaylist(media) => Manifest::Media(convert_media(media, base_uri)?),
    };

    let empty = match &manifest {
        Manifest::Master(master) => master.variants.is_empty(),
        Manifest::Media(media) => media.segments.is_empty(),
    };
    if empty {
        return Err(ParseError::empty(base_uri.as_str()));
    }

    Ok(manifest)
}

/// Strips a BOM and leading whitespace, adding the header when it is missing.
/// Returns `None` when the text does not open like a playlist at all.
fn normalize(raw: &str) -> Option<Cow<'_, str>> {
    let text = raw.trim_start_matches('\u{feff}').trim_start();
    if text.starts_with(PLAYLIST_HEADER) {
        Some(Cow::Borrowed(text))
    } else if text.starts_with("#EXT") {
        debug!("playlist lacks #EXTM3U header; adding it");
        Some(Cow::Owned(format!("{PLAYLIST_HEADER}\n{text}")))
    } else {
        None
    }
}

fn not_a_playlist(raw: &str, base_uri: &Url) -> ParseError {
    let first_line = raw
        .trim_start_matches('\u{feff}')
        .trim_start()
        .lines()
        .next()
        .unwrap_or("")
        .trim();
    let reason = if first_line.is_empty() {
        "empty document is not an M3U8 playlist".to_string()
    } else {
        let excerpt: String = first_line.chars().take(MAX_EXCERPT_LEN).collect();
        format!("'{excerpt}' is not an M3U8 playlist")
    };
    ParseError::malformed(base_uri.as_str(), reason)
}

fn convert_master(
    master: m3u8_rs::MasterPlaylist,
    base_uri: &Url,
) -> Result<MasterPlaylist, ParseError> {
    let mut variants = Vec::with_capacity(master.variants.len());
    for variant in master.variants {
        if variant.is_i_frame {
            debug!(uri = %variant.uri, "skipping I-frame-only variant");
            continue;
        }
        variants.push(Variant {
            uri: resolve(base_uri, &variant.uri)?,
            bandwidth: variant.bandwidth,
            resolution: variant.resolution.map(|r| Resolution {
                width: r.width,
                height: r.height,
            }),
            codecs: variant.codecs,
            audio_group: variant.audio,
            subtitle_group: variant.subtitles,
        });
    }

    let mut renditions = Vec::new();
    for media in master.alternatives {
        if let Some(rendition) = convert_rendition(media, base_uri)? {
            renditions.push(rendition);
        }
    }

    debug!(
        variants = variants.len(),
        renditions = renditions.len(),
        "parsed master playlist"
    );

    Ok(MasterPlaylist {
        base_uri: base_uri.clone(),
        variants,
        renditions,
    })
}

/// Keeps audio and subtitle renditions that have their own playlist.
/// Entries without a URI are carried inside the variant stream itself.
fn convert_rendition(
    media: AlternativeMedia,
    base_uri: &Url,
) -> Result<Option<Rendition>, ParseError> {
    let kind = match media.media_type {
        AlternativeMediaType::Audio => RenditionKind::Audio,
        AlternativeMediaType::Subtitles => RenditionKind::Subtitles,
        _ => return Ok(None),
    };
    let Some(uri) = media.uri else {
        debug!(group_id = %media.group_id, name = %media.name, "rendition has no URI; muxed into variant");
        return Ok(None);
    };

    Ok(Some(Rendition {
        kind,
        uri: resolve(base_uri, &uri)?,
        group_id: media.group_id,
        name: media.name,
        language: media.language,
        is_default: media.default,
    }))
}

fn convert_media(
    media: m3u8_rs::MediaPlaylist,
    base_uri: &Url,
) -> Result<MediaPlaylist, ParseError> {
    if !media.end_list {
        warn!(
            base_uri = %base_uri,
            "playlist has no EXT-X-ENDLIST; only the currently listed segments will be downloaded"
        );
    }

    let mut segments = Vec::with_capacity(media.segments.len());
    // Implicit BYTERANGE offsets continue from the previous range of the same resource.
    let mut previous_range: Option<(Url, u64)> = None;
    let mut warned_encrypted = false;
    let mut warned_init_map = false;

    for (sequence_index, segment) in media.segments.into_iter().enumerate() {
        let uri = resolve(base_uri, &segment.uri)?;

        if !warned_encrypted
            && segment
                .key
                .as_ref()
                .is_some_and(|key| key.method != KeyMethod::None)
        {
            warn!(base_uri = %base_uri, "playlist declares encrypted segments; bytes are stored as received");
            warned_encrypted = true;
        }
        if !warned_init_map && segment.map.is_some() {
            warn!(base_uri = %base_uri, "playlist declares an EXT-X-MAP init section; it is not prepended");
            warned_init_map = true;
        }

        let byte_range = segment.byte_range.map(|range| {
            let offset = range.offset.unwrap_or_else(|| match &previous_range {
                Some((prev_uri, prev_end)) if *prev_uri == uri => *prev_end,
                _ => 0,
            });
            ByteRange {
                offset,
                length: range.length,
            }
        });
        previous_range = byte_range.map(|range| (uri.clone(), range.end()));

        segments.push(Segment {
            sequence_index,
            uri,
            duration_secs: f64::from(segment.duration),
            byte_range,
        });
    }

    debug!(segments = segments.len(), "parsed media playlist");

    Ok(MediaPlaylist {
        base_uri: base_uri.clone(),
        segments,
        renditions: Vec::new(),
    })
}

fn resolve(base_uri: &Url, uri: &str) -> Result<Url, ParseError> {
    base_uri
        .join(uri.trim())
        .map_err(|e| ParseError::unresolvable(uri, base_uri.as_str(), e.to_string()))
}
