//! Variant playlist rewrite.
//!
//! Moves the encryption key out of the playlist and onto each rewritten
//! segment URI, collapses excluded time ranges into a single discontinuity
//! per skipped run, and optionally pins the playlist to VOD.

use crate::offsets::{is_excluded, OffsetSpan};
use crate::playlist::{absolutize, attribute, parse_attributes, PlaylistOptions};

const DISCONTINUITY: &str = "#EXT-X-DISCONTINUITY";

/// Rewrite an upstream variant (media) playlist.
///
/// `exclusions` holds the broadcast-relative intervals whose segments are
/// dropped; pass an empty slice to keep the full timeline. The running
/// clock is accumulated from `#EXTINF` durations, so exclusion decisions
/// are made on each segment's start time.
pub fn rewrite_variant(
    input: &str,
    base_url: &str,
    opts: &PlaylistOptions,
    exclusions: &[OffsetSpan],
) -> String {
    let mut out = String::new();
    let mut key_uri: Option<String> = None;
    let mut key_iv: Option<String> = None;
    let mut clock = 0.0_f64;
    let mut pending_extinf: Option<(String, f64)> = None;
    let mut pending_discontinuity = false;
    let mut has_endlist = false;

    for line in input.lines() {
        let trimmed = line.trim();

        if let Some(attr_str) = trimmed.strip_prefix("#EXT-X-KEY:") {
            let attrs = parse_attributes(attr_str);
            if attribute(&attrs, "METHOD") == Some("NONE") {
                key_uri = None;
                key_iv = None;
            } else {
                key_uri = attribute(&attrs, "URI").map(|u| absolutize(base_url, u));
                key_iv = attribute(&attrs, "IV").map(str::to_string);
            }
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("#EXTINF:") {
            let duration = rest
                .split(',')
                .next()
                .and_then(|d| d.trim().parse::<f64>().ok())
                .unwrap_or(0.0);
            pending_extinf = Some((line.to_string(), duration));
            continue;
        }

        if trimmed == "#EXT-X-ENDLIST" {
            has_endlist = true;
            out.push_str(line);
            out.push('\n');
            continue;
        }

        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            let Some((extinf, duration)) = pending_extinf.take() else {
                // URI without a preceding EXTINF; pass it through untouched.
                out.push_str(line);
                out.push('\n');
                continue;
            };

            let start = clock;
            clock += duration;

            if is_excluded(exclusions, start) {
                pending_discontinuity = true;
                continue;
            }

            if pending_discontinuity {
                pending_discontinuity = false;
                if !out.ends_with("#EXT-X-DISCONTINUITY\n") {
                    out.push_str(DISCONTINUITY);
                    out.push('\n');
                }
            }

            out.push_str(&extinf);
            out.push('\n');
            out.push_str(&segment_uri(base_url, trimmed, &key_uri, &key_iv));
            out.push('\n');
            continue;
        }

        out.push_str(line);
        out.push('\n');
    }

    if opts.force_vod && !has_endlist {
        out.push_str("#EXT-X-ENDLIST\n");
    }

    out
}

fn segment_uri(
    base_url: &str,
    uri: &str,
    key_uri: &Option<String>,
    key_iv: &Option<String>,
) -> String {
    let absolute = absolutize(base_url, uri);
    let mut out = format!("/ts?url={}", urlencoding::encode(&absolute));
    if let Some(key) = key_uri {
        out.push_str(&format!("&key={}", urlencoding::encode(key)));
    }
    if let Some(iv) = key_iv {
        out.push_str(&format!("&iv={}", iv));
    }
    out
}
