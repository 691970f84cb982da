//! Master playlist rewrite.
//!
//! Filters the upstream master down to the requested tracks and reroutes
//! every retained URI through the local `/playlist` endpoint.

use crate::playlist::{absolutize, attribute, parse_attributes, PlaylistOptions, Resolution};

/// Bandwidth advertised for the synthetic audio-only variant. The real
/// figure is unknown here; players only need something plausible.
const AUDIO_ONLY_BANDWIDTH: u64 = 128_000;

/// Rewrite an upstream master playlist.
///
/// `base_url` is the URL the playlist was fetched from (after redirects),
/// used to absolutize relative URIs before rerouting them.
pub fn rewrite_master(input: &str, base_url: &str, opts: &PlaylistOptions) -> String {
    let target_bandwidth = match opts.resolution() {
        Resolution::Best => extreme_bandwidth(input, true),
        Resolution::Worst => extreme_bandwidth(input, false),
        _ => None,
    };

    let mut out = String::new();
    let mut audio_kept = false;
    let mut video_kept = false;
    let mut synthetic_audio: Option<String> = None;
    let mut pending_variant: Option<String> = None;

    for line in input.lines() {
        let trimmed = line.trim();

        // A pending #EXT-X-STREAM-INF consumes the next URI line.
        if let Some(tag) = pending_variant.take() {
            if !trimmed.is_empty() && !trimmed.starts_with('#') {
                if keep_variant(&tag, target_bandwidth, opts, video_kept) {
                    video_kept = true;
                    out.push_str(&tag);
                    out.push('\n');
                    out.push_str(&proxied_uri(base_url, trimmed, opts));
                    out.push('\n');
                }
                continue;
            }
            // Tag without a URI; drop it and fall through.
        }

        if trimmed.starts_with("#EXT-X-I-FRAME-STREAM-INF")
            || trimmed.starts_with("#EXT-X-SESSION-KEY")
        {
            continue;
        }

        if let Some(attr_str) = trimmed.strip_prefix("#EXT-X-MEDIA:") {
            let attrs = parse_attributes(attr_str);
            match attribute(&attrs, "TYPE") {
                Some("CLOSED-CAPTIONS") if opts.audio_only() => continue,
                Some("AUDIO") => {
                    if audio_kept || !audio_matches(&attrs, opts.audio_track.as_deref()) {
                        continue;
                    }
                    audio_kept = true;
                    let uri = attribute(&attrs, "URI")
                        .map(|u| proxied_uri(base_url, u, opts));
                    out.push_str(&rebuild_audio_media(&attrs, uri.as_deref()));
                    out.push('\n');
                    if opts.audio_only() {
                        synthetic_audio = uri;
                    }
                    continue;
                }
                _ => {}
            }
            out.push_str(line);
            out.push('\n');
            continue;
        }

        if trimmed.starts_with("#EXT-X-STREAM-INF:") {
            pending_variant = Some(trimmed.to_string());
            continue;
        }

        out.push_str(line);
        out.push('\n');
    }

    // With video suppressed the matched audio track becomes the only
    // variant, so players that ignore MEDIA-only playlists still work.
    if let Some(uri) = synthetic_audio {
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},CODECS=\"mp4a.40.2\"\n",
            AUDIO_ONLY_BANDWIDTH
        ));
        out.push_str(&uri);
        out.push('\n');
    }

    out
}

fn proxied_uri(base_url: &str, uri: &str, opts: &PlaylistOptions) -> String {
    let absolute = absolutize(base_url, uri);
    format!(
        "/playlist?url={}{}",
        urlencoding::encode(&absolute),
        opts.carry_params()
    )
}

/// Highest or lowest BANDWIDTH among the variants, for best/worst modes.
fn extreme_bandwidth(input: &str, highest: bool) -> Option<u64> {
    input
        .lines()
        .filter_map(|l| l.trim().strip_prefix("#EXT-X-STREAM-INF:"))
        .filter_map(|attrs| {
            attribute(&parse_attributes(attrs), "BANDWIDTH")?
                .parse::<u64>()
                .ok()
        })
        .reduce(|a, b| if highest { a.max(b) } else { a.min(b) })
}

fn keep_variant(
    tag: &str,
    target_bandwidth: Option<u64>,
    opts: &PlaylistOptions,
    video_kept: bool,
) -> bool {
    let attrs = parse_attributes(tag.strip_prefix("#EXT-X-STREAM-INF:").unwrap_or(tag));
    match opts.resolution() {
        Resolution::AudioOnly => false,
        Resolution::Adaptive => true,
        Resolution::Best | Resolution::Worst => {
            if video_kept {
                return false;
            }
            let bandwidth = attribute(&attrs, "BANDWIDTH").and_then(|b| b.parse::<u64>().ok());
            bandwidth.is_some() && bandwidth == target_bandwidth
        }
        Resolution::Exact { width, height, fps } => {
            if video_kept {
                return false;
            }
            let resolution_ok = attribute(&attrs, "RESOLUTION")
                .map(|r| r == format!("{}x{}", width, height))
                .unwrap_or(false);
            let fps_ok = match fps {
                None => true,
                Some(fps) => attribute(&attrs, "FRAME-RATE")
                    .and_then(|f| f.parse::<f64>().ok())
                    .map(|f| f.round() as u32 == *fps)
                    .unwrap_or(false),
            };
            resolution_ok && fps_ok
        }
    }
}

fn audio_matches(attrs: &[(String, String)], requested: Option<&str>) -> bool {
    let Some(requested) = requested else {
        // No preference: first audio track wins.
        return true;
    };
    for key in ["NAME", "LANGUAGE"] {
        if let Some(v) = attribute(attrs, key) {
            if v.eq_ignore_ascii_case(requested) {
                return true;
            }
        }
    }
    false
}

/// Keys whose values are quoted in an EXT-X-MEDIA tag.
const QUOTED_KEYS: &[&str] = &[
    "GROUP-ID",
    "LANGUAGE",
    "ASSOC-LANGUAGE",
    "NAME",
    "URI",
    "CHARACTERISTICS",
    "CHANNELS",
    "INSTREAM-ID",
];

/// Rebuild the surviving audio MEDIA tag, forcing it on by default and
/// swapping the URI for its proxied form.
fn rebuild_audio_media(attrs: &[(String, String)], uri: Option<&str>) -> String {
    let mut out = String::from("#EXT-X-MEDIA:");
    let mut first = true;
    let mut push = |key: &str, value: &str| {
        if !first {
            out.push(',');
        }
        first = false;
        out.push_str(key);
        out.push('=');
        if QUOTED_KEYS.contains(&key) {
            out.push('"');
            out.push_str(value);
            out.push('"');
        } else {
            out.push_str(value);
        }
    };

    for (key, value) in attrs {
        match key.as_str() {
            "DEFAULT" | "AUTOSELECT" => {}
            "URI" => {
                if let Some(uri) = uri {
                    push("URI", uri);
                }
            }
            _ => push(key, value),
        }
    }
    push("AUTOSELECT", "YES");
    push("DEFAULT", "YES");
    out
}
