//! Subject saliency from frame-to-prompt similarity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use bestshot_embed::FrameEmbedder;
use bestshot_models::Frame;

use super::Scorer;
use crate::error::{AnalysisError, AnalysisResult};

pub const DEFAULT_SALIENCY_PROMPTS: [&str; 3] = [
    "a well-composed shot",
    "interesting subject in focus",
    "professional cinematography",
];

/// Kind of footage, selecting a domain prompt set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoType {
    Aerial,
    Interior,
    Portrait,
    Action,
    Nature,
}

impl VideoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoType::Aerial => "aerial",
            VideoType::Interior => "interior",
            VideoType::Portrait => "portrait",
            VideoType::Action => "action",
            VideoType::Nature => "nature",
        }
    }

    pub fn prompts(&self) -> [&'static str; 5] {
        match self {
            VideoType::Aerial => [
                "aerial landscape photography",
                "drone shot with beautiful scenery",
                "bird's eye view of landscape",
                "sweeping aerial vista",
                "dramatic aerial perspective",
            ],
            VideoType::Interior => [
                "well-lit interior space",
                "architectural interior photography",
                "beautifully composed room",
                "professional real estate photo",
                "inviting indoor space",
            ],
            VideoType::Portrait => [
                "professional portrait photography",
                "person in focus with good lighting",
                "engaging human subject",
                "well-composed portrait shot",
                "sharp focus on face",
            ],
            VideoType::Action => [
                "dynamic action shot",
                "exciting moment captured",
                "sports photography",
                "movement and energy",
                "peak action moment",
            ],
            VideoType::Nature => [
                "beautiful nature photography",
                "wildlife in natural habitat",
                "stunning natural landscape",
                "golden hour lighting in nature",
                "pristine wilderness scene",
            ],
        }
    }
}

impl FromStr for VideoType {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aerial" => Ok(VideoType::Aerial),
            "interior" => Ok(VideoType::Interior),
            "portrait" => Ok(VideoType::Portrait),
            "action" => Ok(VideoType::Action),
            "nature" => Ok(VideoType::Nature),
            other => Err(AnalysisError::invalid_input(format!("unknown video type '{other}'"))),
        }
    }
}

/// Scores frames by their best match against a set of text prompts.
pub struct SaliencyScorer {
    embedder: Arc<FrameEmbedder>,
    prompts: Vec<String>,
}

impl SaliencyScorer {
    /// Scorer over `prompts`, or the generic defaults when `None`.
    pub fn new(embedder: Arc<FrameEmbedder>, prompts: Option<Vec<String>>) -> Self {
        let prompts = prompts
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_SALIENCY_PROMPTS.iter().map(|p| p.to_string()).collect());
        Self { embedder, prompts }
    }

    /// Scorer with the prompt set of a footage label. Unknown labels keep the
    /// defaults.
    pub fn for_video_type(embedder: Arc<FrameEmbedder>, label: &str) -> Self {
        match label.parse::<VideoType>() {
            Ok(video_type) => {
                let prompts = video_type.prompts().iter().map(|p| p.to_string()).collect();
                info!(
                    video_type = video_type.as_str(),
                    prompts = 5,
                    "Using video type saliency prompts"
                );
                Self::new(embedder, Some(prompts))
            }
            Err(_) => {
                info!(label, "Unknown video type, using default saliency prompts");
                Self::new(embedder, None)
            }
        }
    }

    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }

    pub fn set_prompts(&mut self, prompts: Vec<String>) {
        self.prompts = prompts;
    }

    /// Scores against a single prompt, leaving the configured set untouched.
    pub async fn score_frames_with_prompt(
        &self,
        frames: &[Frame],
        prompt: &str,
    ) -> AnalysisResult<Vec<f64>> {
        self.score_against(frames, &[prompt.to_string()]).await
    }

    async fn score_against(&self, frames: &[Frame], prompts: &[String]) -> AnalysisResult<Vec<f64>> {
        if prompts.is_empty() {
            return Err(AnalysisError::invalid_input("saliency scorer has no prompts"));
        }
        if frames.is_empty() {
            return Ok(Vec::new());
        }

        let texts = self.embedder.embed_texts(prompts).await?;
        let images = self.embedder.embed_frames(frames).await?;

        images
            .iter()
            .map(|image| -> AnalysisResult<f64> {
                let mut best = f64::NEG_INFINITY;
                for text in &texts {
                    best = best.max(image.similarity(text)?);
                }
                Ok(((best + 1.0) / 2.0).clamp(0.0, 1.0))
            })
            .collect()
    }
}

#[async_trait]
impl Scorer for SaliencyScorer {
    fn name(&self) -> &'static str {
        "saliency"
    }

    async fn score_frames(&self, frames: &[Frame]) -> AnalysisResult<Vec<f64>> {
        self.score_against(frames, &self.prompts).await
    }
}
