//! Output file naming for one or several playlist URLs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use url::Url;

const OUTPUT_EXTENSION: &str = "ts";
const MAX_STEM_LEN: usize = 80;

/// File stems that say nothing about the content.
const GENERIC_STEMS: &[&str] = &[
    "chunklist",
    "index",
    "main",
    "manifest",
    "master",
    "playlist",
    "prog_index",
];

/// Chooses an output path per URL.
///
/// A single URL writes to `output` itself when given. Several URLs treat
/// `output` as a directory (the current directory when absent) and get
/// distinct names derived from their URLs.
pub(crate) fn plan_outputs(urls: &[Url], output: Option<&Path>) -> Vec<PathBuf> {
    if let ([_], Some(path)) = (urls, output) {
        return vec![path.to_path_buf()];
    }

    let dir = output.map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let mut used = HashSet::new();
    urls.iter()
        .map(|url| {
            let stem = unique_stem(derive_stem(url), &mut used);
            dir.join(format!("{stem}.{OUTPUT_EXTENSION}"))
        })
        .collect()
}

/// A readable file stem for `url`: the playlist's file name, or its
/// directory name when the file name is generic.
fn derive_stem(url: &Url) -> String {
    let parts: Vec<&str> = url
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let mut fallback = None;
    for part in parts.iter().rev().take(2) {
        let stem = sanitize(part.rsplit_once('.').map_or(*part, |(stem, _)| stem));
        if stem.is_empty() {
            continue;
        }
        if GENERIC_STEMS.contains(&stem.to_ascii_lowercase().as_str()) {
            fallback.get_or_insert(stem);
            continue;
        }
        return stem;
    }
    fallback
        .or_else(|| url.host_str().map(sanitize).filter(|s| !s.is_empty()))
        .unwrap_or_else(|| "stream".to_string())
}

fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_LEN)
        .collect();
    cleaned.trim_matches(|c| c == '_' || c == '.').to_string()
}

fn unique_stem(stem: String, used: &mut HashSet<String>) -> String {
    if used.insert(stem.clone()) {
        return stem;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{stem}-{n}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn test_single_url_uses_explicit_output() {
        let plan = plan_outputs(
            &[url("https://cdn.example/show/master.m3u8")],
            Some(Path::new("/tmp/episode.ts")),
        );
        assert_eq!(plan, vec![PathBuf::from("/tmp/episode.ts")]);
    }

    #[test]
    fn test_single_url_without_output_derives_name() {
        let plan = plan_outputs(&[url("https://cdn.example/show/trailer.m3u8")], None);
        assert_eq!(plan, vec![PathBuf::from("./trailer.ts")]);
    }

    #[test]
    fn test_generic_file_name_uses_directory() {
        assert_eq!(derive_stem(&url("https://cdn.example/episode-4/master.m3u8")), "episode-4");
        assert_eq!(derive_stem(&url("https://cdn.example/index.m3u8")), "index");
        assert_eq!(derive_stem(&url("https://cdn.example/")), "cdn.example");
    }

    #[test]
    fn test_unsafe_characters_are_replaced() {
        assert_eq!(derive_stem(&url("https://cdn.example/my%20show!.m3u8")), "my_20show");
    }

    #[test]
    fn test_several_urls_get_distinct_names_in_directory() {
        let plan = plan_outputs(
            &[
                url("https://a.example/live/master.m3u8"),
                url("https://b.example/live/master.m3u8"),
                url("https://c.example/clip.m3u8"),
            ],
            Some(Path::new("/downloads")),
        );
        assert_eq!(
            plan,
            vec![
                PathBuf::from("/downloads/live.ts"),
                PathBuf::from("/downloads/live-2.ts"),
                PathBuf::from("/downloads/clip.ts"),
            ]
        );
    }
}
