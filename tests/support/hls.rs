//! Playlist fixtures and mock-server mounting helpers.

use std::path::Path;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A VOD media playlist listing `uris` with 4-second segments.
pub fn media_playlist(uris: &[&str]) -> String {
    let mut text = String::from(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:0\n",
    );
    for uri in uris {
        text.push_str("#EXTINF:4.0,\n");
        text.push_str(uri);
        text.push('\n');
    }
    text.push_str("#EXT-X-ENDLIST\n");
    text
}

/// A master playlist with one variant per `(bandwidth, uri)`.
pub fn master_playlist(variants: &[(u64, &str)]) -> String {
    let mut text = String::from("#EXTM3U\n");
    for (bandwidth, uri) in variants {
        text.push_str(&format!("#EXT-X-STREAM-INF:BANDWIDTH={bandwidth}\n{uri}\n"));
    }
    text
}

pub async fn mount_text(server: &MockServer, at: &str, body: impl Into<String>) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.into()))
        .mount(server)
        .await;
}

pub async fn mount_bytes(server: &MockServer, at: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

pub async fn mount_status(server: &MockServer, at: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Mounts a media playlist of `count` segments at `/{dir}/index.m3u8`.
///
/// Segment `i` is served at `/{dir}/seg{i}.ts` with body `s{i}`, except the
/// indices in `failing`, which answer 404.
pub async fn mount_stream(server: &MockServer, dir: &str, count: usize, failing: &[usize]) {
    let names: Vec<String> = (0..count).map(|i| format!("seg{i}.ts")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    mount_text(server, &format!("/{dir}/index.m3u8"), media_playlist(&refs)).await;

    for (i, name) in names.iter().enumerate() {
        let at = format!("/{dir}/{name}");
        if failing.contains(&i) {
            mount_status(server, &at, 404).await;
        } else {
            mount_bytes(server, &at, format!("s{i}").as_bytes()).await;
        }
    }
}

/// Expected output of [`mount_stream`] given the indices that succeed.
pub fn stream_bytes(indices: impl IntoIterator<Item = usize>) -> Vec<u8> {
    indices
        .into_iter()
        .flat_map(|i| format!("s{i}").into_bytes())
        .collect()
}

/// Entries directly under `root`.
pub fn entries(root: &Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(root)
        .expect("read workspace root")
        .map(|entry| entry.expect("dir entry").path())
        .collect()
}
