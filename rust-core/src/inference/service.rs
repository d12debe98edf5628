//! Serving-side predictor over the production bundle of a registry.

use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::common::error::{CsatError, CsatResult};
use crate::evaluation::domain::{ModelRegistry, RegistryStage};

use super::domain::{ChampionBundle, Prediction, RawRecord, ReloadPolicy};

/// Loads the production bundle according to a [`ReloadPolicy`] and serves predictions.
pub struct Predictor<R> {
    registry: R,
    policy: ReloadPolicy,
    cached: RwLock<Option<Arc<ChampionBundle>>>,
}

impl<R: ModelRegistry> Predictor<R> {
    pub fn new(registry: R, policy: ReloadPolicy) -> Self {
        Self {
            registry,
            policy,
            cached: RwLock::new(None),
        }
    }

    /// Re-read the production bundle and replace the cached one.
    pub fn reload(&self) -> CsatResult<Arc<ChampionBundle>> {
        let bundle = Arc::new(self.registry.load(RegistryStage::Production)?);
        let mut slot = self
            .cached
            .write()
            .map_err(|_| CsatError::internal("bundle cache lock poisoned"))?;
        *slot = Some(Arc::clone(&bundle));
        info!(model = %bundle.model_name, created_at = %bundle.created_at, "production bundle loaded");
        Ok(bundle)
    }

    /// Bundle to serve the next request with.
    pub fn bundle(&self) -> CsatResult<Arc<ChampionBundle>> {
        if self.policy == ReloadPolicy::EveryRequest {
            return self.reload();
        }
        let cached = self
            .cached
            .read()
            .map_err(|_| CsatError::internal("bundle cache lock poisoned"))?
            .clone();
        match cached {
            Some(bundle) => Ok(bundle),
            None => self.reload(),
        }
    }

    pub fn predict(&self, record: &RawRecord) -> CsatResult<Prediction> {
        let bundle = self.bundle()?;
        let prediction = bundle.predict(record)?;
        debug!(model = %bundle.model_name, label = %prediction.label, probability = prediction.probability, "prediction");
        Ok(prediction)
    }
}
