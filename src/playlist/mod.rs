//! HLS playlist rewriting.
//!
//! Upstream master and variant playlists are rewritten line by line into
//! locally routed ones: media URIs point back at this server, encryption
//! keys move from playlist tags to per-segment query parameters, and
//! skippable intervals collapse into discontinuities.

pub mod master;
pub mod variant;

use crate::error::{GatewayError, Result};

/// Requested video rendition.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Pass every variant through and let the player adapt.
    Adaptive,
    /// Highest-bandwidth variant only.
    Best,
    /// Lowest-bandwidth variant only.
    Worst,
    /// Drop video entirely and serve an audio-only playlist.
    AudioOnly,
    /// Exact resolution, optionally pinned to a frame rate.
    Exact {
        width: u32,
        height: u32,
        fps: Option<u32>,
    },
}

impl Resolution {
    /// Parse `adaptive`, `best`, `worst`, `none`, or `WIDTHxHEIGHT[@FPS]`.
    pub fn parse(s: &str) -> Result<Resolution> {
        match s.to_ascii_lowercase().as_str() {
            "" | "adaptive" => return Ok(Resolution::Adaptive),
            "best" => return Ok(Resolution::Best),
            "worst" => return Ok(Resolution::Worst),
            "none" => return Ok(Resolution::AudioOnly),
            _ => {}
        }

        let (dims, fps) = match s.split_once('@') {
            Some((dims, fps)) => {
                let fps = fps
                    .parse()
                    .map_err(|_| GatewayError::Malformed(format!("bad frame rate in {s:?}")))?;
                (dims, Some(fps))
            }
            None => (s, None),
        };
        let (w, h) = dims
            .split_once('x')
            .ok_or_else(|| GatewayError::Malformed(format!("bad resolution {s:?}")))?;
        let width = w
            .parse()
            .map_err(|_| GatewayError::Malformed(format!("bad resolution {s:?}")))?;
        let height = h
            .parse()
            .map_err(|_| GatewayError::Malformed(format!("bad resolution {s:?}")))?;
        Ok(Resolution::Exact { width, height, fps })
    }
}

/// What to cut out of the variant timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SkipMode {
    #[default]
    Off,
    /// Skip inning breaks (the gaps between inning keep intervals).
    Breaks,
    /// Skip everything that is not a pitch or its aftermath.
    Pitches,
}

impl SkipMode {
    pub fn parse(s: &str) -> SkipMode {
        match s.to_ascii_lowercase().as_str() {
            "breaks" => SkipMode::Breaks,
            "pitches" => SkipMode::Pitches,
            _ => SkipMode::Off,
        }
    }
}

/// Options shared by the master and variant rewrites, carried forward from
/// the stream request into every rewritten URI.
#[derive(Debug, Clone, Default)]
pub struct PlaylistOptions {
    pub resolution: Option<Resolution>,
    pub audio_track: Option<String>,
    pub skip: SkipMode,
    /// Start playback at this half-inning instead of the broadcast start.
    pub start_inning: Option<(u32, bool)>,
    pub force_vod: bool,
    pub content_id: Option<String>,
}

impl PlaylistOptions {
    fn resolution(&self) -> &Resolution {
        self.resolution.as_ref().unwrap_or(&Resolution::Adaptive)
    }

    fn audio_only(&self) -> bool {
        *self.resolution() == Resolution::AudioOnly
    }

    /// Query parameters to append to a rewritten `/playlist` URI so the
    /// variant request can reproduce the skip decision.
    fn carry_params(&self) -> String {
        let mut out = String::new();
        match self.skip {
            SkipMode::Off => {}
            SkipMode::Breaks => out.push_str("&skip=breaks"),
            SkipMode::Pitches => out.push_str("&skip=pitches"),
        }
        if let Some((inning, top)) = self.start_inning {
            out.push_str(&format!("&inning_number={}", inning));
            out.push_str(if top {
                "&inning_half=top"
            } else {
                "&inning_half=bottom"
            });
        }
        if self.force_vod {
            out.push_str("&force_vod=on");
        }
        if let Some(id) = &self.content_id {
            out.push_str(&format!("&contentId={}", urlencoding::encode(id)));
        }
        out
    }
}

/// Parse the attribute list of an `#EXT-X-*` tag, honoring quoted values.
pub(crate) fn parse_attributes(input: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = input;
    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().to_string();
        rest = &rest[eq + 1..];

        let value;
        if let Some(stripped) = rest.strip_prefix('"') {
            let end = stripped.find('"').unwrap_or(stripped.len());
            value = stripped[..end].to_string();
            rest = &stripped[(end + 1).min(stripped.len())..];
            rest = rest.strip_prefix(',').unwrap_or(rest);
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            value = rest[..end].to_string();
            rest = &rest[(end + 1).min(rest.len())..];
        }
        out.push((key, value));
    }
    out
}

pub(crate) fn attribute<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Resolve a possibly relative playlist URI against the URL the playlist
/// itself was fetched from.
pub(crate) fn absolutize(base: &str, uri: &str) -> String {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return uri.to_string();
    }
    if let Some(path) = uri.strip_prefix('/') {
        // Scheme-relative against the base origin.
        let origin_end = base
            .find("://")
            .map(|i| i + 3)
            .and_then(|i| base[i..].find('/').map(|j| i + j))
            .unwrap_or(base.len());
        return format!("{}/{}", &base[..origin_end], path);
    }
    let dir_end = base.rfind('/').map(|i| i + 1).unwrap_or(base.len());
    format!("{}{}", &base[..dir_end], uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_parse() {
        assert_eq!(Resolution::parse("adaptive").unwrap(), Resolution::Adaptive);
        assert_eq!(Resolution::parse("best").unwrap(), Resolution::Best);
        assert_eq!(Resolution::parse("none").unwrap(), Resolution::AudioOnly);
        assert_eq!(
            Resolution::parse("1280x720@60").unwrap(),
            Resolution::Exact {
                width: 1280,
                height: 720,
                fps: Some(60)
            }
        );
        assert_eq!(
            Resolution::parse("1920x1080").unwrap(),
            Resolution::Exact {
                width: 1920,
                height: 1080,
                fps: None
            }
        );
        assert!(Resolution::parse("garbage").is_err());
    }

    #[test]
    fn test_parse_attributes_quoted() {
        let attrs = parse_attributes(
            "TYPE=AUDIO,GROUP-ID=\"aac\",NAME=\"English, US\",URI=\"a.m3u8\"",
        );
        assert_eq!(attribute(&attrs, "TYPE"), Some("AUDIO"));
        assert_eq!(attribute(&attrs, "NAME"), Some("English, US"));
        assert_eq!(attribute(&attrs, "URI"), Some("a.m3u8"));
    }

    #[test]
    fn test_absolutize() {
        let base = "https://host.example/path/master.m3u8";
        assert_eq!(
            absolutize(base, "variant.m3u8"),
            "https://host.example/path/variant.m3u8"
        );
        assert_eq!(
            absolutize(base, "/other/x.m3u8"),
            "https://host.example/other/x.m3u8"
        );
        assert_eq!(
            absolutize(base, "https://cdn.example/y.m3u8"),
            "https://cdn.example/y.m3u8"
        );
    }

    #[test]
    fn test_carry_params() {
        let opts = PlaylistOptions {
            skip: SkipMode::Breaks,
            start_inning: Some((3, true)),
            force_vod: true,
            content_id: Some("abc".to_string()),
            ..Default::default()
        };
        let q = opts.carry_params();
        assert!(q.contains("skip=breaks"));
        assert!(q.contains("inning_number=3"));
        assert!(q.contains("inning_half=top"));
        assert!(q.contains("force_vod=on"));
        assert!(q.contains("contentId=abc"));
    }
}
