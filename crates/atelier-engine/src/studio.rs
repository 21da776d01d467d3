use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use atelier_contracts::config::TrimSettings;
use atelier_contracts::error::StudioError;
use atelier_contracts::events::EventLog;
use atelier_contracts::ledger::RecencyLedger;
use atelier_contracts::naming::{
    composite_name, edited_name, generation_stem, is_edited, media_type_for,
};
use chrono::Local;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::grid::{decompose, GridSplit};
use crate::models::{ImageModel, SourceImage};
use crate::store::ArtifactStore;

/// Composites requested from the model per generate call. Each one is split
/// into four quadrants.
pub const COMPOSITES_PER_REQUEST: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationManifest {
    pub artifacts: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditManifest {
    pub artifact: String,
    pub source: String,
}

/// Owns the artifact store, the image model, and the recency ledger, and
/// runs the two model-backed invocations against them.
///
/// The model is called once per composite or edit with no retries.
pub struct Studio {
    store: ArtifactStore,
    model: Arc<dyn ImageModel>,
    ledger: Arc<Mutex<RecencyLedger>>,
    trim: TrimSettings,
    events: Option<EventLog>,
}

impl Studio {
    pub fn new(
        store: ArtifactStore,
        model: Arc<dyn ImageModel>,
        ledger: Arc<Mutex<RecencyLedger>>,
    ) -> Self {
        Self {
            store,
            model,
            ledger,
            trim: TrimSettings::default(),
            events: None,
        }
    }

    pub fn with_trim(mut self, trim: TrimSettings) -> Self {
        self.trim = trim;
        self
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Lock the ledger. A poisoned lock is recovered; the ledger only steers
    /// defaults for later requests.
    pub fn ledger(&self) -> MutexGuard<'_, RecencyLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn generate(&self, prompt: &str) -> Result<GenerationManifest, StudioError> {
        self.generate_batch(prompt, COMPOSITES_PER_REQUEST).await
    }

    pub(crate) async fn generate_batch(
        &self,
        prompt: &str,
        composites: usize,
    ) -> Result<GenerationManifest, StudioError> {
        let stem = generation_stem(Local::now(), &Uuid::new_v4().to_string());
        let mut artifacts = Vec::new();
        let mut warnings = Vec::new();
        let mut errors = Vec::new();
        let mut succeeded = 0;

        for index in 1..=composites {
            match self.generate_composite(prompt, &stem, index).await {
                Ok(split) => {
                    succeeded += 1;
                    artifacts.extend(split.quadrants);
                    warnings.extend(split.warnings);
                }
                Err(err) => {
                    tracing::warn!(index, error = %err, "composite generation failed");
                    errors.push(format!("Error generating image {index}: {err}"));
                }
            }
        }

        if succeeded == 0 {
            return Err(StudioError::Generation(if errors.is_empty() {
                "Unknown error".to_string()
            } else {
                errors.join("; ")
            }));
        }

        if let Some(first) = artifacts.first() {
            self.ledger().record_generated(first.clone());
        }
        for name in &artifacts {
            self.emit("artifact_created", json!({ "name": name, "kind": "quadrant" }));
        }

        if succeeded < composites {
            return Err(StudioError::PartialFailure {
                produced: artifacts,
                succeeded,
                requested: composites,
            });
        }
        Ok(GenerationManifest {
            artifacts,
            warnings,
        })
    }

    async fn generate_composite(
        &self,
        prompt: &str,
        stem: &str,
        index: usize,
    ) -> Result<GridSplit, StudioError> {
        let payload = self
            .model
            .infer(prompt, None)
            .await
            .map_err(|err| StudioError::Generation(format!("{err:#}")))?
            .ok_or_else(|| {
                StudioError::Generation("model returned no image payload".to_string())
            })?;

        let name = composite_name(stem, index);
        self.store.write(&name, &payload.bytes)?;
        self.emit(
            "composite_written",
            json!({ "name": name, "bytes": payload.bytes.len(), "model": self.model.name() }),
        );

        let store = self.store.clone();
        let trim = self.trim;
        let composite = name.clone();
        let split = tokio::task::spawn_blocking(move || decompose(&store, &composite, true, trim))
            .await
            .map_err(|err| StudioError::Generation(format!("decomposition task failed: {err}")))??;
        self.emit(
            "grid_split",
            json!({
                "composite": split.composite,
                "quadrants": split.quadrants,
                "warnings": split.warnings,
            }),
        );
        Ok(split)
    }

    /// Explicit source, else the last generated image, else the most recent
    /// one.
    pub fn resolve_target(&self, source: Option<&str>) -> Result<String, StudioError> {
        if let Some(source) = source.map(str::trim).filter(|value| !value.is_empty()) {
            return Ok(source.to_string());
        }
        self.ledger()
            .implicit_target()
            .map(str::to_string)
            .ok_or(StudioError::NoTarget)
    }

    pub async fn edit(
        &self,
        edit_prompt: &str,
        source: Option<&str>,
    ) -> Result<EditManifest, StudioError> {
        let target = self.resolve_target(source)?;
        if !self.store.exists(&target) {
            return Err(StudioError::SourceNotFound(target));
        }
        let bytes = self.store.read(&target).map_err(|err| match err {
            StudioError::NotFound(name) => StudioError::SourceNotFound(name),
            other => other,
        })?;
        let source_image = SourceImage {
            mime_type: media_type_for(&target).to_string(),
            name: target.clone(),
            bytes,
        };

        let payload = self
            .model
            .infer(edit_prompt, Some(&source_image))
            .await
            .map_err(|err| StudioError::Edit(format!("{err:#}")))?
            .ok_or_else(|| {
                StudioError::Edit("Failed to extract edited image from API response.".to_string())
            })?;

        let name = edited_name(Local::now(), &target);
        self.store.write(&name, &payload.bytes)?;
        self.ledger().record_edited(name.clone());
        self.emit(
            "edit_completed",
            json!({ "name": name, "source": target, "model": self.model.name() }),
        );
        Ok(EditManifest {
            artifact: name,
            source: target,
        })
    }

    /// Records artifacts a reconciled request observed. The first name becomes
    /// the last edited or last generated pointer depending on its prefix.
    pub fn record_observed(&self, observed: &[String]) {
        let Some(first) = observed.first() else {
            return;
        };
        let mut ledger = self.ledger();
        if is_edited(first) {
            ledger.record_edited(first.clone());
        } else {
            ledger.record_generated(first.clone());
        }
    }

    pub fn emit(&self, event_type: &str, fields: Value) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events.record(event_type, fields) {
            tracing::warn!(event_type, error = %err, "event log write failed");
        }
    }
}
