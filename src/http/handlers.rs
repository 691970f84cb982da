//! HTTP request handlers.
//!
//! Every handler catches failures at its boundary: upstream trouble is
//! logged and answered with an empty 200 body, semantic rejections
//! (blackout, no match) with a short diagnostic string. Players treat an
//! empty playlist as "nothing here yet" and retry, which beats showing
//! them a 5xx page.

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::{GatewayError, Result};
use crate::multiview::MultiviewSpec;
use crate::offsets::{merge_spans, OffsetSpan, OffsetTable};
use crate::playlist::{
    master::rewrite_master, variant::rewrite_variant, PlaylistOptions, Resolution, SkipMode,
};
use crate::state::AppState;

const PLAYLIST_CONTENT_TYPE: &str = "audio/x-mpegurl";
const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

/// Query parameters for `/stream.m3u8`.
#[derive(Debug, Deserialize, Default)]
pub struct StreamParams {
    #[serde(rename = "mediaId")]
    pub media_id: Option<String>,
    #[serde(rename = "contentId")]
    pub content_id: Option<String>,
    pub team: Option<String>,
    pub date: Option<String>,
    pub game: Option<usize>,
    /// Direct upstream master URL, bypassing stream resolution entirely.
    pub src: Option<String>,
    pub resolution: Option<String>,
    pub audio_track: Option<String>,
    pub inning_half: Option<String>,
    pub inning_number: Option<u32>,
    pub skip: Option<String>,
    pub force_vod: Option<String>,
}

/// Query parameters for `/playlist`.
#[derive(Debug, Deserialize)]
pub struct VariantParams {
    pub url: String,
    #[serde(rename = "contentId")]
    pub content_id: Option<String>,
    pub inning_half: Option<String>,
    pub inning_number: Option<u32>,
    pub skip: Option<String>,
    pub force_vod: Option<String>,
}

/// Query parameters for `/ts`.
#[derive(Debug, Deserialize)]
pub struct SegmentParams {
    pub url: String,
    pub key: Option<String>,
    pub iv: Option<String>,
}

/// Query parameters for `/highlights`.
#[derive(Debug, Deserialize)]
pub struct HighlightsParams {
    pub team: String,
    pub date: Option<String>,
    pub game: Option<usize>,
}

/// Query parameters for `/multiview`.
#[derive(Debug, Deserialize, Default)]
pub struct MultiviewParams {
    pub streams: Option<String>,
    pub sync: Option<String>,
    pub dvr: Option<String>,
    pub faster: Option<String>,
    pub audio_url: Option<String>,
    pub audio_url_seek: Option<f64>,
}

pub async fn stream_playlist(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StreamParams>,
) -> Response {
    match build_stream_playlist(&state, &params).await {
        Ok(body) => playlist_response(body),
        Err(e) => caught(&e, "stream.m3u8"),
    }
}

async fn build_stream_playlist(state: &AppState, params: &StreamParams) -> Result<String> {
    let mut opts = playlist_options(
        params.resolution.as_deref(),
        params.audio_track.as_deref(),
        params.skip.as_deref(),
        params.inning_half.as_deref(),
        params.inning_number,
        params.force_vod.as_deref(),
        params.content_id.clone(),
    );

    let master_url = if let Some(src) = &params.src {
        src.clone()
    } else {
        let media_id = match (&params.media_id, &params.team) {
            (Some(id), _) => id.clone(),
            (None, Some(team)) => {
                let date = parse_date(params.date.as_deref())?;
                let ids = state
                    .schedule
                    .find_media(team, date, params.game.unwrap_or(1))
                    .await?;
                if opts.content_id.is_none() {
                    opts.content_id = ids.content_id;
                }
                ids.media_id
            }
            (None, None) => match &params.content_id {
                // contentId and mediaId are distinct identifiers; the
                // airings record carries the mapping between them.
                Some(id) => {
                    let airings = state.schedule.airings(id).await?;
                    airings.media_id.clone().ok_or_else(|| {
                        GatewayError::NoMatch(format!("no broadcast media id for content {id}"))
                    })?
                }
                None => {
                    return Err(GatewayError::NoMatch(
                        "need mediaId, contentId, team or src".to_string(),
                    ))
                }
            },
        };
        state.session.resolve_stream_url(&media_id).await?
    };

    let (body, final_url) = state.fetcher.get_text(&master_url).await?;
    Ok(rewrite_master(&body, &final_url, &opts))
}

pub async fn variant_playlist(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VariantParams>,
) -> Response {
    let opts = playlist_options(
        None,
        None,
        params.skip.as_deref(),
        params.inning_half.as_deref(),
        params.inning_number,
        params.force_vod.as_deref(),
        params.content_id.clone(),
    );

    let exclusions = exclusions_for(&state, &opts).await;

    match state.fetcher.get_text(&params.url).await {
        Ok((body, final_url)) => {
            playlist_response(rewrite_variant(&body, &final_url, &opts, &exclusions))
        }
        Err(e) => caught(&e, "playlist"),
    }
}

/// Excluded intervals implied by the skip mode and start inning. Any
/// failure here degrades to "exclude nothing" so playback still works.
async fn exclusions_for(state: &AppState, opts: &PlaylistOptions) -> Vec<OffsetSpan> {
    let Some(content_id) = &opts.content_id else {
        return Vec::new();
    };

    let needs_innings = opts.skip == SkipMode::Breaks || opts.start_inning.is_some();
    let inning_table: Option<OffsetTable> = if needs_innings {
        match state.offsets.inning_table(content_id).await {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!("Inning offsets unavailable for {}: {}", content_id, e);
                None
            }
        }
    } else {
        None
    };

    let mut spans: Vec<OffsetSpan> = Vec::new();
    match opts.skip {
        SkipMode::Off => {}
        SkipMode::Breaks => {
            if let Some(table) = &inning_table {
                spans.extend(table.gap_exclusions());
            }
        }
        SkipMode::Pitches => match state.offsets.pitch_table(content_id).await {
            Ok(Some(table)) => spans.extend(table.invert()),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Pitch offsets unavailable for {}: {}", content_id, e);
            }
        },
    }

    if let Some((inning, top)) = opts.start_inning {
        if let Some(table) = &inning_table {
            if let Some(start) = table.slot_start(OffsetTable::slot_for(inning, top)) {
                spans.push(OffsetSpan { start: 0.0, end: start });
            }
        }
    }

    merge_spans(spans)
}

pub async fn segment(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SegmentParams>,
) -> Response {
    match state
        .segments
        .fetch_segment(&params.url, params.key.as_deref(), params.iv.as_deref())
        .await
    {
        Ok(body) => (
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(SEGMENT_CONTENT_TYPE),
            )],
            body,
        )
            .into_response(),
        Err(e) => caught(&e, "ts"),
    }
}

pub async fn multiview(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MultiviewParams>,
) -> Response {
    let spec = MultiviewSpec {
        streams: split_list(params.streams.as_deref()),
        sync: split_list(params.sync.as_deref())
            .iter()
            .map(|s| s.parse().unwrap_or(0.0))
            .collect(),
        dvr: flag(params.dvr.as_deref()),
        faster: flag(params.faster.as_deref()),
        audio_url: params.audio_url.clone().filter(|u| !u.is_empty()),
        audio_url_seek: params.audio_url_seek.unwrap_or(0.0),
    };

    match state.composer.start(spec).await {
        Ok(msg) => msg.into_response(),
        Err(e) => {
            tracing::warn!("Multiview request failed: {}", e);
            e.to_string().into_response()
        }
    }
}

pub async fn highlights(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HighlightsParams>,
) -> Response {
    match build_highlights(&state, &params).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => caught(&e, "highlights"),
    }
}

async fn build_highlights(
    state: &AppState,
    params: &HighlightsParams,
) -> Result<serde_json::Value> {
    let date = parse_date(params.date.as_deref())?;
    let ids = state
        .schedule
        .find_media(&params.team, date, params.game.unwrap_or(1))
        .await?;
    let game_pk = ids.game_pk.ok_or_else(|| {
        GatewayError::NoMatch(format!("no game id for {} on {}", params.team, date))
    })?;
    state.schedule.highlights(game_pk, date).await
}

/// Multi-week schedule, for guide-building clients.
pub async fn guide(State(state): State<Arc<AppState>>) -> Response {
    match state.schedule.week().await {
        Ok(body) => Json(body).into_response(),
        Err(e) => caught(&e, "guide"),
    }
}

pub async fn status(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "credentials": state.session.has_credentials(),
        "blackouts": state.session.blackout_count(),
        "composer": format!("{:?}", state.composer.state()),
    }))
    .into_response()
}

fn playlist_options(
    resolution: Option<&str>,
    audio_track: Option<&str>,
    skip: Option<&str>,
    inning_half: Option<&str>,
    inning_number: Option<u32>,
    force_vod: Option<&str>,
    content_id: Option<String>,
) -> PlaylistOptions {
    // A resolution that does not parse degrades to adaptive mode.
    let resolution = resolution.and_then(|r| match Resolution::parse(r) {
        Ok(resolution) => Some(resolution),
        Err(e) => {
            tracing::warn!("{}; passing all variants through", e);
            None
        }
    });

    let start_inning = inning_number
        .filter(|n| *n > 0)
        .map(|n| (n, !matches!(inning_half, Some("bottom"))));

    PlaylistOptions {
        resolution,
        audio_track: audio_track.map(str::to_string).filter(|s| !s.is_empty()),
        skip: skip.map(SkipMode::parse).unwrap_or_default(),
        start_inning,
        force_vod: flag(force_vod),
        content_id,
    }
}

fn parse_date(date: Option<&str>) -> Result<NaiveDate> {
    match date {
        Some(date) => NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| GatewayError::Malformed(format!("bad date {date:?}, want YYYY-MM-DD"))),
        None => Ok(Utc::now().date_naive()),
    }
}

/// Presence-style boolean: `?dvr`, `?dvr=on`, `?dvr=true` all enable.
fn flag(value: Option<&str>) -> bool {
    matches!(value, Some("" | "on" | "true" | "1"))
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn playlist_response(body: String) -> Response {
    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PLAYLIST_CONTENT_TYPE),
        )],
        body,
    )
        .into_response()
}

/// Boundary catch: log the failure and answer 200 with an empty body, or
/// a one-line explanation when upstream gave a definitive verdict.
fn caught(e: &GatewayError, endpoint: &str) -> Response {
    if e.is_semantic() {
        tracing::info!("{} request rejected: {}", endpoint, e);
        format!("{e}\n").into_response()
    } else {
        tracing::warn!("{} request failed: {}", endpoint, e);
        String::new().into_response()
    }
}
