//! Application state.
//!
//! One `AppState` is built at startup and shared by every handler. The
//! services inside are wired leaf-first: the retrying fetcher and disk
//! store at the bottom, then the session/schedule services on top of them.

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::multiview::{Composer, MultiviewConfig};
use crate::offsets::OffsetService;
use crate::schedule::ScheduleService;
use crate::segment::SegmentPipeline;
use crate::session::{Credentials, SessionManager};
use crate::store::DiskStore;

pub struct AppState {
    pub config: Config,
    pub fetcher: Arc<Fetcher>,
    pub store: Arc<DiskStore>,
    pub session: Arc<SessionManager>,
    pub schedule: Arc<ScheduleService>,
    pub offsets: OffsetService,
    pub segments: SegmentPipeline,
    pub composer: Composer,
}

impl AppState {
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let fetcher = Arc::new(Fetcher::new()?);
        let store = Arc::new(DiskStore::open(config.cache_dir())?);

        let bootstrap = match (&config.username, &config.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        let session = Arc::new(SessionManager::load(
            &config.data_dir,
            Arc::clone(&fetcher),
            bootstrap,
        )?);

        let schedule = Arc::new(ScheduleService::new(
            Arc::clone(&fetcher),
            Arc::clone(&store),
        ));
        let offsets = OffsetService::new(Arc::clone(&schedule));
        let segments = SegmentPipeline::new(Arc::clone(&fetcher));
        let composer = Composer::new(MultiviewConfig {
            ffmpeg_path: config.ffmpeg_path.clone(),
            out_dir: config.multiview_dir(),
            playlist_name: config.multiview_playlist.clone(),
        });

        Ok(Arc::new(Self {
            config,
            fetcher,
            store,
            session,
            schedule,
            offsets,
            segments,
            composer,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_state_wiring() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::parse_from([
            "dugout",
            "--data-dir",
            dir.path().to_str().unwrap(),
        ]);
        let state = AppState::new(config).unwrap();
        assert!(!state.session.has_credentials());
        assert!(dir.path().join("cache").exists());
    }
}
