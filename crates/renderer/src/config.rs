use std::num::NonZeroUsize;

use view::{MAX_ZOOM, MIN_ZOOM};

/// Largest worker pool a manager will start.
pub const MAX_WORKERS: usize = 256;
/// Largest accepted tile edge.
pub const MAX_TILE_SIZE: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RenderConfigError {
    #[error("tile size must be non-zero")]
    ZeroTileSize,
    #[error("tile size {0} exceeds {MAX_TILE_SIZE}")]
    TileTooLarge(u32),
    #[error("initial zoom must be finite and within [{MIN_ZOOM}, {MAX_ZOOM}]")]
    InvalidZoom,
    #[error("{0} workers requested, at most {MAX_WORKERS} allowed")]
    TooManyWorkers(usize),
}

/// Startup parameters of a render manager. Fixed for the manager's lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderConfig {
    /// `None` starts one worker per available processing unit.
    pub worker_count: Option<NonZeroUsize>,
    pub tile_size: u32,
    pub initial_zoom: f64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            tile_size: model::TILE_SIZE,
            initial_zoom: 1.0,
        }
    }
}

impl RenderConfig {
    pub fn with_workers(mut self, count: NonZeroUsize) -> Self {
        self.worker_count = Some(count);
        self
    }

    pub fn validate(&self) -> Result<(), RenderConfigError> {
        if self.tile_size == 0 {
            return Err(RenderConfigError::ZeroTileSize);
        }
        if self.tile_size > MAX_TILE_SIZE {
            return Err(RenderConfigError::TileTooLarge(self.tile_size));
        }
        if !self.initial_zoom.is_finite() || !(MIN_ZOOM..=MAX_ZOOM).contains(&self.initial_zoom) {
            return Err(RenderConfigError::InvalidZoom);
        }
        if let Some(count) = self.worker_count {
            if count.get() > MAX_WORKERS {
                return Err(RenderConfigError::TooManyWorkers(count.get()));
            }
        }
        Ok(())
    }

    /// The configured count, or the available parallelism capped at [`MAX_WORKERS`].
    pub(crate) fn resolved_worker_count(&self) -> NonZeroUsize {
        self.worker_count
            .unwrap_or_else(|| cap_workers(engine::default_worker_count()))
    }
}

fn cap_workers(count: NonZeroUsize) -> NonZeroUsize {
    NonZeroUsize::new(count.get().min(MAX_WORKERS)).unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(RenderConfig::default().validate(), Ok(()));
        let workers = RenderConfig::default().resolved_worker_count().get();
        assert!((1..=MAX_WORKERS).contains(&workers));
    }

    #[test]
    fn available_parallelism_is_capped() {
        let many = NonZeroUsize::new(MAX_WORKERS * 4).expect("non-zero");
        assert_eq!(cap_workers(many).get(), MAX_WORKERS);
        assert_eq!(cap_workers(NonZeroUsize::MIN), NonZeroUsize::MIN);
    }

    #[test]
    fn rejects_bad_values() {
        let config = RenderConfig {
            tile_size: 0,
            ..RenderConfig::default()
        };
        assert_eq!(config.validate(), Err(RenderConfigError::ZeroTileSize));
        let config = RenderConfig {
            initial_zoom: f64::NAN,
            ..RenderConfig::default()
        };
        assert_eq!(config.validate(), Err(RenderConfigError::InvalidZoom));
        let config = RenderConfig::default()
            .with_workers(NonZeroUsize::new(MAX_WORKERS + 1).expect("non-zero"));
        assert_eq!(
            config.validate(),
            Err(RenderConfigError::TooManyWorkers(MAX_WORKERS + 1))
        );
    }
}
