//! Cache of mapped mosaics.
//!
//! Mapping a source tile costs one index lookup per source pixel, so each
//! mapped [`TileMosaic`] is kept in an LRU cache keyed by the source path and
//! the tonal adjustments it was fetched with. Concurrent misses for the same
//! key share a single build.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use image::GrayImage;
use lru::LruCache;
use rand::rngs::StdRng;
use rand::SeedableRng;
use parking_lot::Mutex;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, trace};

use crate::error::{MosaicError, SourceError};
use crate::index::PyramidIndex;
use crate::source::{Adjustments, ImageSource};

use super::fill::{blank_tile, pad_tile, FillPolicy};
use super::mosaic::{TileMosaic, DEFAULT_MAPPING_SEED, DEFAULT_TILE_EDGE};

/// Default number of mapped mosaics to keep.
pub const DEFAULT_MOSAIC_CACHE_CAPACITY: usize = 100;

// =============================================================================
// Cache Key
// =============================================================================

/// Identity of a mapped source tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MosaicKey {
    /// Deep zoom path of the basic tile
    pub path: Arc<str>,

    /// Adjustments in their textual form
    pub adjustments: String,
}

impl MosaicKey {
    pub fn new(path: impl Into<Arc<str>>, adjustments: Adjustments) -> Self {
        Self {
            path: path.into(),
            adjustments: adjustments.key(),
        }
    }
}

/// Settings for building mosaics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MosaicSettings {
    /// Source tile edge in pixels
    pub edge: u32,

    /// Number of mosaics to cache
    pub capacity: usize,

    /// Seed for the mapping random generator
    pub seed: u64,

    pub fill: FillPolicy,
}

impl Default for MosaicSettings {
    fn default() -> Self {
        Self {
            edge: DEFAULT_TILE_EDGE,
            capacity: DEFAULT_MOSAIC_CACHE_CAPACITY,
            seed: DEFAULT_MAPPING_SEED,
            fill: FillPolicy::default(),
        }
    }
}

// =============================================================================
// Mosaic Cache
// =============================================================================

/// Outcome of an in-flight build.
enum Flight {
    Pending,
    Done(Result<Arc<TileMosaic>, MosaicError>),
    /// The leader was dropped before finishing
    Abandoned,
}

/// State for an in-flight build.
struct InFlightState {
    notify: Notify,
    outcome: Mutex<Flight>,
}

impl InFlightState {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            outcome: Mutex::new(Flight::Pending),
        }
    }

    fn abandoned(&self) -> bool {
        matches!(*self.outcome.lock(), Flight::Abandoned)
    }
}

/// In-flight builds are shared only between requests that agree on
/// whether a blank may stand in for a missing tile.
type FlightKey = (MosaicKey, bool);

/// Role of a request for a key that missed the cache.
enum Role {
    Leader(Arc<InFlightState>),
    Waiter(Arc<InFlightState>),
}

/// Releases an in-flight entry when the leader finishes or is dropped.
///
/// Waiters woken by an abandoned build retry, and one of them becomes the
/// new leader.
struct FlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<FlightKey, Arc<InFlightState>>>,
    key: &'a FlightKey,
    state: Arc<InFlightState>,
}

impl FlightGuard<'_> {
    fn finish(self, result: Result<Arc<TileMosaic>, MosaicError>) {
        *self.state.outcome.lock() = Flight::Done(result);
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        {
            let mut outcome = self.state.outcome.lock();
            if matches!(*outcome, Flight::Pending) {
                *outcome = Flight::Abandoned;
            }
        }
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(self.key)
            .is_some_and(|state| Arc::ptr_eq(state, &self.state))
        {
            in_flight.remove(self.key);
        }
        drop(in_flight);
        self.state.notify.notify_waiters();
    }
}

/// LRU cache of mapped mosaics, building them on demand.
pub struct MosaicCache<S: ImageSource> {
    source: Arc<S>,
    index: Arc<PyramidIndex>,
    settings: MosaicSettings,
    cache: RwLock<LruCache<MosaicKey, Arc<TileMosaic>>>,
    in_flight: Mutex<HashMap<FlightKey, Arc<InFlightState>>>,
}

impl<S: ImageSource> MosaicCache<S> {
    pub fn new(source: Arc<S>, index: Arc<PyramidIndex>, settings: MosaicSettings) -> Self {
        let capacity = NonZeroUsize::new(settings.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            index,
            settings,
            cache: RwLock::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn index(&self) -> &Arc<PyramidIndex> {
        &self.index
    }

    pub fn settings(&self) -> &MosaicSettings {
        &self.settings
    }

    /// Render a sub-tile of the mosaic for the basic tile at `path`.
    pub async fn render(
        &self,
        path: &str,
        adjustments: Adjustments,
        sub_x: u32,
        sub_y: u32,
        level: u32,
        allow_missing: bool,
    ) -> Result<GrayImage, MosaicError> {
        let mosaic = self.get_mosaic(path, adjustments, allow_missing).await?;
        let start = Instant::now();
        let image = mosaic.render(sub_x, sub_y, level, &self.settings.fill)?;
        debug!(
            "Rendered {} x={} y={} level={} in {}ms",
            path,
            sub_x,
            sub_y,
            level,
            start.elapsed().as_millis()
        );
        Ok(image)
    }

    /// Mosaic for the basic tile at `path`, mapping it on a miss.
    ///
    /// With `allow_missing`, a tile the source does not have is replaced by
    /// a blank tile in the pyramid's fill grey. Mosaics of blank tiles are
    /// not cached.
    pub async fn get_mosaic(
        &self,
        path: &str,
        adjustments: Adjustments,
        allow_missing: bool,
    ) -> Result<Arc<TileMosaic>, MosaicError> {
        let key = MosaicKey::new(path, adjustments);

        // Fast path: check cache
        {
            let mut cache = self.cache.write().await;
            if let Some(mosaic) = cache.get(&key) {
                trace!("Mosaic cache hit for {}", path);
                return Ok(mosaic.clone());
            }
        }

        let flight_key = (key.clone(), allow_missing);
        loop {
            let role = {
                let mut in_flight = self.in_flight.lock();
                match in_flight.get(&flight_key) {
                    Some(state) if !state.abandoned() => Role::Waiter(state.clone()),
                    _ => {
                        let state = Arc::new(InFlightState::new());
                        in_flight.insert(flight_key.clone(), state.clone());
                        Role::Leader(state)
                    }
                }
            };

            let state = match role {
                Role::Leader(state) => {
                    let guard = FlightGuard {
                        in_flight: &self.in_flight,
                        key: &flight_key,
                        state,
                    };

                    let result = match self.build(path, adjustments, allow_missing).await {
                        Ok((mosaic, fallback)) => {
                            // A blank stands in for one request only
                            if !fallback {
                                self.cache.write().await.put(key.clone(), mosaic.clone());
                            }
                            Ok(mosaic)
                        }
                        Err(e) => Err(e),
                    };

                    guard.finish(result.clone());
                    return result;
                }
                Role::Waiter(state) => state,
            };

            // Register interest before checking, so a completion in between is not missed
            let notified = state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match Self::outcome(&state) {
                Some(Some(result)) => return result,
                Some(None) => continue,
                None => notified.await,
            }

            if let Some(Some(result)) = Self::outcome(&state) {
                return result;
            }
        }
    }

    /// `None` while pending, `Some(None)` once abandoned.
    fn outcome(state: &InFlightState) -> Option<Option<Result<Arc<TileMosaic>, MosaicError>>> {
        match &*state.outcome.lock() {
            Flight::Pending => None,
            Flight::Done(result) => Some(Some(result.clone())),
            Flight::Abandoned => Some(None),
        }
    }

    async fn build(
        &self,
        path: &str,
        adjustments: Adjustments,
        allow_missing: bool,
    ) -> Result<(Arc<TileMosaic>, bool), MosaicError> {
        let start = Instant::now();
        let edge = self.settings.edge;
        let (image, fallback) = match self.source.fetch_tile(path, adjustments).await {
            Ok(image) => (image, false),
            Err(SourceError::NotFound(_)) if allow_missing => {
                debug!("No tile at '{}', mapping a blank tile", path);
                (blank_tile(edge, self.fill_grey(path)), true)
            }
            Err(e) => return Err(e.into()),
        };
        let image = if image.dimensions() != (edge, edge) {
            let grey = self.fill_grey(path);
            trace!(
                "Padding '{}' from {}x{} to {}x{} with {}",
                path,
                image.width(),
                image.height(),
                edge,
                edge,
                grey
            );
            pad_tile(image, edge, grey)
        } else {
            image
        };

        let mut rng = StdRng::seed_from_u64(self.settings.seed);
        let mosaic = TileMosaic::build_mapping(&image, &self.index, &mut rng)?;
        debug!(
            "Mapped mosaic for {} in {}ms",
            path,
            start.elapsed().as_millis()
        );
        Ok((Arc::new(mosaic), fallback))
    }

    fn fill_grey(&self, path: &str) -> u8 {
        self.index.fill_grey(path, &self.settings.fill, None)
    }

    /// Drop one cached mosaic.
    pub async fn invalidate(&self, path: &str, adjustments: Adjustments) {
        self.cache
            .write()
            .await
            .pop(&MosaicKey::new(path, adjustments));
    }

    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    /// Number of cached mosaics.
    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
