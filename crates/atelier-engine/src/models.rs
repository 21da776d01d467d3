use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use atelier_contracts::config::{non_empty_env, StudioConfig};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::grid::{decode_image, encode_image};

const GEMINI_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const DRYRUN_CELL: u32 = 256;
const DRYRUN_MARGIN: u32 = 40;

#[derive(Debug, Clone)]
pub struct ImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SourceImage {
    pub name: String,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// A generative image model: one prompt, optionally one source image, zero
/// or one image back.
#[async_trait]
pub trait ImageModel: Send + Sync {
    fn name(&self) -> &str;
    async fn infer(&self, prompt: &str, source: Option<&SourceImage>)
        -> Result<Option<ImageBytes>>;
}

#[derive(Default)]
pub struct ImageModelRegistry {
    models: BTreeMap<String, Arc<dyn ImageModel>>,
}

impl ImageModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<M: ImageModel + 'static>(&mut self, model: M) {
        self.models.insert(model.name().to_string(), Arc::new(model));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageModel>> {
        self.models.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }
}

pub fn default_model_registry(config: &StudioConfig) -> ImageModelRegistry {
    let mut models = ImageModelRegistry::new();
    models.register(DryrunModel);
    models.register(GeminiModel::new(config.gemini_model.clone()));
    models
}

/// Offline model. Prompts become a 2x2 grid of solid swatches on white
/// margins; edits tint the non-white pixels of the source. Colours are a
/// hash of the prompt, so output is deterministic.
pub struct DryrunModel;

#[async_trait]
impl ImageModel for DryrunModel {
    fn name(&self) -> &str {
        "dryrun"
    }

    async fn infer(
        &self,
        prompt: &str,
        source: Option<&SourceImage>,
    ) -> Result<Option<ImageBytes>> {
        let (image, name) = match source {
            Some(source) => (tint_source(source, prompt)?, source.name.as_str()),
            None => (dryrun_grid(prompt), "dryrun.png"),
        };
        let bytes = encode_image(name, image).map_err(anyhow::Error::msg)?;
        let mime_type = ImageFormat::from_path(name)
            .map(|format| format.to_mime_type().to_string())
            .unwrap_or_else(|_| "image/png".to_string());
        Ok(Some(ImageBytes {
            bytes,
            mime_type: Some(mime_type),
        }))
    }
}

fn dryrun_grid(prompt: &str) -> DynamicImage {
    let size = DRYRUN_CELL * 2;
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([255, 255, 255]));
    for cell in 0..4u32 {
        let color = swatch_color(prompt, cell);
        let (x0, y0) = ((cell % 2) * DRYRUN_CELL, (cell / 2) * DRYRUN_CELL);
        for y in y0 + DRYRUN_MARGIN..y0 + DRYRUN_CELL - DRYRUN_MARGIN {
            for x in x0 + DRYRUN_MARGIN..x0 + DRYRUN_CELL - DRYRUN_MARGIN {
                canvas.put_pixel(x, y, color);
            }
        }
    }
    DynamicImage::ImageRgb8(canvas)
}

fn tint_source(source: &SourceImage, prompt: &str) -> Result<DynamicImage> {
    let mut image = decode_image(&source.name, &source.bytes)?.to_rgb8();
    let Rgb(tint) = swatch_color(prompt, 7);
    for pixel in image.pixels_mut() {
        if pixel.0.iter().all(|channel| *channel >= 240) {
            continue;
        }
        for (channel, target) in pixel.0.iter_mut().zip(tint) {
            *channel = ((u16::from(*channel) + u16::from(target)) / 2) as u8;
        }
    }
    Ok(DynamicImage::ImageRgb8(image))
}

/// Every channel stays below 200 so swatches always read as content.
fn swatch_color(prompt: &str, cell: u32) -> Rgb<u8> {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(cell.to_be_bytes());
    let digest = hasher.finalize();
    Rgb([digest[0] % 200, digest[1] % 200, digest[2] % 200])
}

/// Gemini `generateContent` with image output.
pub struct GeminiModel {
    api_base: String,
    model: String,
    http: reqwest::Client,
}

impl GeminiModel {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            api_base: non_empty_env("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            model: model.into(),
            http: reqwest::Client::new(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn request_body(prompt: &str, source: Option<&SourceImage>) -> Value {
        let mut parts = Vec::new();
        if let Some(source) = source {
            parts.push(json!({
                "inlineData": {
                    "mimeType": source.mime_type,
                    "data": BASE64.encode(&source.bytes),
                }
            }));
        }
        parts.push(json!({ "text": prompt }));
        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
        })
    }

    /// First inline image across all candidates, if any.
    fn first_image(payload: &Value) -> Result<Option<ImageBytes>> {
        let candidates = payload
            .get("candidates")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for candidate in candidates {
            let parts = candidate
                .pointer("/content/parts")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for part in parts {
                let Some(inline) = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                else {
                    continue;
                };
                let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let bytes = BASE64
                    .decode(data.as_bytes())
                    .context("Gemini image base64 decode failed")?;
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                return Ok(Some(ImageBytes { bytes, mime_type }));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ImageModel for GeminiModel {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn infer(
        &self,
        prompt: &str,
        source: Option<&SourceImage>,
    ) -> Result<Option<ImageBytes>> {
        let Some(api_key) = Self::api_key() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY must be set for the gemini model");
        };
        let endpoint = self.endpoint();
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key.as_str())])
            .timeout(GEMINI_REQUEST_TIMEOUT)
            .json(&Self::request_body(prompt, source))
            .send()
            .await
            .with_context(|| format!("Gemini request failed ({})", self.model))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .context("Gemini response body read failed")?;
        if !status.is_success() {
            bail!(
                "Gemini request failed ({}): {}",
                status.as_u16(),
                truncate_text(&body, 512)
            );
        }
        let payload: Value =
            serde_json::from_str(&body).context("Gemini returned invalid JSON payload")?;
        Self::first_image(&payload)
    }
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
