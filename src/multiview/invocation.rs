//! Pure construction of the encoder invocation.
//!
//! Everything the encoder process needs is expressed as data here, so the
//! filter-graph combinatorics are testable without spawning anything.

use crate::multiview::{MultiviewConfig, MultiviewSpec};

/// Grid layouts for 2 to 4 inputs, indexed by `inputs - 2`.
const XSTACK_LAYOUTS: &[&str] = &[
    "0_0|w0_0",
    "0_0|w0_0|0_h0",
    "0_0|w0_0|0_h0|w0_h0",
];

const HLS_SEGMENT_SECONDS: &str = "4";
const HLS_WINDOW_SEGMENTS: &str = "6";

/// A fully built encoder command: program plus ordered argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInvocation {
    pub program: String,
    pub args: Vec<String>,
}

/// Build the ffmpeg invocation for a composition.
///
/// One input per stream (read at realtime rate unless `faster`), plus an
/// optional alternate-audio input with its own seek. A single stream is
/// passed through with `-c:v copy`; two or more are stacked into a grid
/// and re-encoded. Every audio track gets a PTS reset, the caller's sync
/// correction, and async resampling.
pub fn build_invocation(spec: &MultiviewSpec, config: &MultiviewConfig) -> EncoderInvocation {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "warning".into(),
        "-y".into(),
    ];

    for url in &spec.streams {
        if !spec.faster {
            args.push("-re".into());
        }
        args.push("-i".into());
        args.push(url.clone());
    }

    let audio_input_index = spec.audio_url.as_ref().map(|url| {
        if spec.audio_url_seek > 0.0 {
            args.push("-ss".into());
            args.push(format!("{}", spec.audio_url_seek));
        }
        args.push("-i".into());
        args.push(url.clone());
        spec.streams.len()
    });

    let mut filters: Vec<String> = Vec::new();
    let single = spec.streams.len() == 1;

    if !single {
        for i in 0..spec.streams.len() {
            filters.push(format!("[{i}:v]setpts=PTS-STARTPTS[v{i}]"));
        }
        let inputs: String = (0..spec.streams.len())
            .map(|i| format!("[v{i}]"))
            .collect();
        filters.push(format!(
            "{}xstack=inputs={}:layout={}[vout]",
            inputs,
            spec.streams.len(),
            XSTACK_LAYOUTS[spec.streams.len() - 2]
        ));
    }

    for (i, _) in spec.streams.iter().enumerate() {
        filters.push(format!(
            "[{i}:a]asetpts=PTS-STARTPTS{}aresample=async=1[a{i}]",
            sync_filter(spec.sync_for(i))
        ));
    }
    if let Some(idx) = audio_input_index {
        filters.push(format!(
            "[{idx}:a]asetpts=PTS-STARTPTS,aresample=async=1[a{idx}]"
        ));
    }

    args.push("-filter_complex".into());
    args.push(filters.join(";"));

    if single {
        args.push("-map".into());
        args.push("0:v".into());
        args.push("-c:v".into());
        args.push("copy".into());
    } else {
        args.push("-map".into());
        args.push("[vout]".into());
        args.push("-c:v".into());
        args.push("libx264".into());
        args.push("-preset".into());
        args.push("veryfast".into());
    }

    let audio_count = spec.streams.len() + usize::from(audio_input_index.is_some());
    for i in 0..audio_count {
        args.push("-map".into());
        args.push(format!("[a{i}]"));
    }
    args.push("-c:a".into());
    args.push("aac".into());

    args.push("-f".into());
    args.push("hls".into());
    args.push("-hls_time".into());
    args.push(HLS_SEGMENT_SECONDS.into());
    args.push("-hls_list_size".into());
    if spec.dvr {
        args.push("0".into());
    } else {
        args.push(HLS_WINDOW_SEGMENTS.into());
        args.push("-hls_flags".into());
        args.push("delete_segments".into());
    }
    args.push(
        config
            .out_dir
            .join(&config.playlist_name)
            .to_string_lossy()
            .into_owned(),
    );

    EncoderInvocation {
        program: config.ffmpeg_path.clone(),
        args,
    }
}

/// Audio sync correction: a positive offset delays the track, a negative
/// one trims its head.
fn sync_filter(sync: f64) -> String {
    if sync > 0.0 {
        let ms = (sync * 1000.0).round() as i64;
        format!(",adelay={ms}:all=1,")
    } else if sync < 0.0 {
        format!(",atrim=start={},", -sync)
    } else {
        ",".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config() -> MultiviewConfig {
        MultiviewConfig {
            ffmpeg_path: "ffmpeg".to_string(),
            out_dir: PathBuf::from("/tmp/multiview"),
            playlist_name: "multiview.m3u8".to_string(),
        }
    }

    fn spec(n: usize) -> MultiviewSpec {
        MultiviewSpec {
            streams: (0..n).map(|i| format!("https://u.example/{i}.m3u8")).collect(),
            ..Default::default()
        }
    }

    fn joined(inv: &EncoderInvocation) -> String {
        inv.args.join(" ")
    }

    #[test]
    fn test_single_stream_copies_video() {
        let inv = build_invocation(&spec(1), &config());
        let args = joined(&inv);
        assert!(args.contains("-c:v copy"));
        assert!(!args.contains("xstack"));
        assert!(!args.contains("libx264"));
    }

    #[test]
    fn test_three_streams_stack_and_reencode() {
        let inv = build_invocation(&spec(3), &config());
        let args = joined(&inv);
        assert!(args.contains("xstack=inputs=3:layout=0_0|w0_0|0_h0"));
        assert!(args.contains("-c:v libx264"));
        assert_eq!(args.matches("-i ").count(), 3);
    }

    #[test]
    fn test_realtime_flag_per_input() {
        let inv = build_invocation(&spec(2), &config());
        assert_eq!(inv.args.iter().filter(|a| *a == "-re").count(), 2);

        let mut fast = spec(2);
        fast.faster = true;
        let inv = build_invocation(&fast, &config());
        assert!(!inv.args.iter().any(|a| a == "-re"));
    }

    #[test]
    fn test_sync_delay_and_trim() {
        let mut s = spec(2);
        s.sync = vec![1.5, -2.0];
        let inv = build_invocation(&s, &config());
        let args = joined(&inv);
        assert!(args.contains("adelay=1500:all=1"));
        assert!(args.contains("atrim=start=2"));
    }

    #[test]
    fn test_alternate_audio_input_with_seek() {
        let mut s = spec(1);
        s.audio_url = Some("https://u.example/radio.m3u8".to_string());
        s.audio_url_seek = 12.0;
        let inv = build_invocation(&s, &config());
        let args = joined(&inv);
        assert!(args.contains("-ss 12"));
        assert!(args.contains("radio.m3u8"));
        assert!(args.contains("[1:a]asetpts=PTS-STARTPTS,aresample=async=1[a1]"));
    }

    #[test]
    fn test_dvr_controls_window() {
        let inv = build_invocation(&spec(1), &config());
        assert!(joined(&inv).contains("-hls_list_size 6"));
        assert!(joined(&inv).contains("delete_segments"));

        let mut s = spec(1);
        s.dvr = true;
        let inv = build_invocation(&s, &config());
        assert!(joined(&inv).contains("-hls_list_size 0"));
        assert!(!joined(&inv).contains("delete_segments"));
    }

    #[test]
    fn test_output_path() {
        let inv = build_invocation(&spec(1), &config());
        assert_eq!(inv.args.last().unwrap(), "/tmp/multiview/multiview.m3u8");
    }
}
