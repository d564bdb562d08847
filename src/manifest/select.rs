//! Variant and rendition selection.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use tracing::{debug, warn};

use super::{MasterPlaylist, Rendition, RenditionKind, SelectError, Variant};

/// How one variant is chosen from a master playlist.
///
/// Every policy breaks ties in favor of the variant listed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VariantPolicy {
    /// Largest bandwidth.
    #[default]
    HighestBandwidth,
    /// Smallest bandwidth.
    LowestBandwidth,
    /// Bandwidth nearest to the target, in bits per second.
    ClosestBandwidth(u64),
    /// Exact frame size; falls back to [`VariantPolicy::HighestBandwidth`]
    /// when no variant advertises it.
    Resolution { width: u64, height: u64 },
}

impl fmt::Display for VariantPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HighestBandwidth => write!(f, "highest"),
            Self::LowestBandwidth => write!(f, "lowest"),
            Self::ClosestBandwidth(target) => write!(f, "bandwidth:{target}"),
            Self::Resolution { width, height } => write!(f, "resolution:{width}x{height}"),
        }
    }
}

impl FromStr for VariantPolicy {
    type Err = String;

    /// Accepts `highest`, `lowest`, `bandwidth:<bps>` and `resolution:<w>x<h>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_ascii_lowercase();
        match value.as_str() {
            "highest" | "best" => return Ok(Self::HighestBandwidth),
            "lowest" | "worst" => return Ok(Self::LowestBandwidth),
            _ => {}
        }

        if let Some(target) = value.strip_prefix("bandwidth:") {
            let target = target
                .trim()
                .parse::<u64>()
                .map_err(|_| format!("invalid bandwidth '{target}': expected bits per second"))?;
            return Ok(Self::ClosestBandwidth(target));
        }

        if let Some(size) = value.strip_prefix("resolution:") {
            let (width, height) = size
                .trim()
                .split_once('x')
                .ok_or_else(|| format!("invalid resolution '{size}': expected <width>x<height>"))?;
            let width = width
                .parse::<u64>()
                .map_err(|_| format!("invalid resolution width '{width}'"))?;
            let height = height
                .parse::<u64>()
                .map_err(|_| format!("invalid resolution height '{height}'"))?;
            return Ok(Self::Resolution { width, height });
        }

        Err(format!(
            "unknown variant policy '{s}': expected highest, lowest, bandwidth:<bps> or resolution:<w>x<h>"
        ))
    }
}

/// Chooses one variant from `master` according to `policy`.
///
/// # Errors
///
/// Returns [`SelectError::NoVariants`] when the master playlist lists no variants.
pub fn select_variant<'a>(
    master: &'a MasterPlaylist,
    policy: &VariantPolicy,
) -> Result<&'a Variant, SelectError> {
    let variants = master.variants.as_slice();
    if variants.is_empty() {
        return Err(SelectError::NoVariants {
            base_uri: master.base_uri.to_string(),
        });
    }

    let chosen = match *policy {
        VariantPolicy::HighestBandwidth => first_best(variants, |a, b| a.bandwidth.cmp(&b.bandwidth)),
        VariantPolicy::LowestBandwidth => first_best(variants, |a, b| b.bandwidth.cmp(&a.bandwidth)),
        VariantPolicy::ClosestBandwidth(target) => first_best(variants, |a, b| {
            b.bandwidth.abs_diff(target).cmp(&a.bandwidth.abs_diff(target))
        }),
        VariantPolicy::Resolution { width, height } => {
            let matching: Vec<&Variant> = variants
                .iter()
                .filter(|v| v.resolution.is_some_and(|r| r.width == width && r.height == height))
                .collect();
            if matching.is_empty() {
                warn!(
                    base_uri = %master.base_uri,
                    width,
                    height,
                    "no variant advertises the requested resolution; using highest bandwidth"
                );
                first_best(variants, |a, b| a.bandwidth.cmp(&b.bandwidth))
            } else {
                first_best(matching, |a, b| a.bandwidth.cmp(&b.bandwidth))
            }
        }
    };

    // first_best only yields None for an empty input, which is ruled out above.
    let chosen = chosen.ok_or_else(|| SelectError::NoVariants {
        base_uri: master.base_uri.to_string(),
    })?;

    debug!(
        policy = %policy,
        uri = %chosen.uri,
        bandwidth = chosen.bandwidth,
        "selected variant"
    );
    Ok(chosen)
}

/// Returns the element ranking highest under `rank`, keeping the earliest on ties.
///
/// `Iterator::max_by` keeps the last of equal elements, so the fold is explicit.
fn first_best<'a, I, F>(items: I, mut rank: F) -> Option<&'a Variant>
where
    I: IntoIterator<Item = &'a Variant>,
    F: FnMut(&Variant, &Variant) -> Ordering,
{
    items.into_iter().fold(None, |best, candidate| match best {
        Some(current) if rank(candidate, current) != Ordering::Greater => Some(current),
        _ => Some(candidate),
    })
}

/// Audio and subtitle renditions paired with a chosen variant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectedRenditions<'a> {
    pub audio: Option<&'a Rendition>,
    pub subtitles: Option<&'a Rendition>,
}

impl SelectedRenditions<'_> {
    /// True when neither an audio nor a subtitle rendition was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.subtitles.is_none()
    }
}

/// Picks at most one audio and one subtitle rendition for `variant`.
///
/// Candidates are the renditions in the variant's group for that kind, or
/// every rendition of that kind when the variant names no group. The first
/// `DEFAULT=YES` candidate wins, otherwise the first candidate.
#[must_use]
pub fn select_renditions<'a>(
    master: &'a MasterPlaylist,
    variant: &Variant,
) -> SelectedRenditions<'a> {
    SelectedRenditions {
        audio: pick_rendition(master, RenditionKind::Audio, variant.audio_group.as_deref()),
        subtitles: pick_rendition(
            master,
            RenditionKind::Subtitles,
            variant.subtitle_group.as_deref(),
        ),
    }
}

fn pick_rendition<'a>(
    master: &'a MasterPlaylist,
    kind: RenditionKind,
    group: Option<&str>,
) -> Option<&'a Rendition> {
    let mut candidates = master
        .renditions
        .iter()
        .filter(|r| r.kind == kind)
        .filter(|r| group.is_none_or(|g| r.group_id == g))
        .peekable();

    let first = *candidates.peek()?;
    candidates.find(|r| r.is_default).or(Some(first))
}
