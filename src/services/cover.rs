//! Cover policy: credits decide whether an AI cover is attempted, and every
//! path ends in a usable URL.

use crate::config::PipelineConfig;
use crate::error::CoverFailure;
use crate::models::{Cover, CoverMode, Topic};
use crate::services::images::CoverImageGenerator;
use crate::utils::normalize_seed;
use std::sync::Arc;
use tracing::{info, warn};

/// Style modifier distinguishing the post-failure placeholder from the
/// credit-gated one.
const FALLBACK_STYLE: &str = "?blur=2";

/// `base + "/seed/" + normalize(seed) + "/" + width + "/" + height [+ style]`.
pub fn placeholder_url(
    base: &str,
    seed: &str,
    width: u32,
    height: u32,
    style: Option<&str>,
) -> String {
    format!(
        "{}/seed/{}/{}/{}{}",
        base.trim_end_matches('/'),
        normalize_seed(seed),
        width,
        height,
        style.unwrap_or("")
    )
}

/// What the resolver produced, plus the absorbed failure when it fell back.
#[derive(Debug)]
pub struct CoverResolution {
    pub cover: Cover,
    pub failure: Option<CoverFailure>,
}

pub struct CoverResolver {
    generator: Arc<dyn CoverImageGenerator>,
    config: PipelineConfig,
}

impl CoverResolver {
    pub fn new(generator: Arc<dyn CoverImageGenerator>, config: PipelineConfig) -> Self {
        CoverResolver { generator, config }
    }

    fn placeholder(&self, topic: &Topic, mode: CoverMode) -> Cover {
        let style = match mode {
            CoverMode::Fallback => Some(FALLBACK_STYLE),
            _ => None,
        };
        Cover {
            mode,
            url: placeholder_url(
                &self.config.placeholder_base_url,
                topic.as_str(),
                self.config.cover_width,
                self.config.cover_height,
                style,
            ),
        }
    }

    fn prompt(topic: &Topic) -> String {
        format!(
            "A professional, modern e-book cover illustration about {}. \
             Clean composition, no text, no letters.",
            topic
        )
    }

    async fn attempt_ai(&self, topic: &Topic) -> Result<String, CoverFailure> {
        let limit = self.config.call_timeout;
        let prompt = Self::prompt(topic);
        match tokio::time::timeout(limit, self.generator.generate_cover(&prompt)).await {
            Ok(result) => result,
            Err(_) => Err(CoverFailure::Timeout(limit)),
        }
    }

    /// Never fails. Below the credit threshold the AI call is skipped entirely.
    pub async fn resolve(&self, topic: &Topic, credits_available: u32) -> CoverResolution {
        if credits_available < self.config.ai_image_min_credits {
            info!(
                credits = credits_available,
                threshold = self.config.ai_image_min_credits,
                "not enough credits for an AI cover, using placeholder"
            );
            return CoverResolution {
                cover: self.placeholder(topic, CoverMode::Placeholder),
                failure: None,
            };
        }

        match self.attempt_ai(topic).await {
            Ok(url) => CoverResolution {
                cover: Cover { mode: CoverMode::Ai, url },
                failure: None,
            },
            Err(failure) => {
                warn!(error = %failure, "AI cover failed, using fallback placeholder");
                CoverResolution {
                    cover: self.placeholder(topic, CoverMode::Fallback),
                    failure: Some(failure),
                }
            }
        }
    }

    pub async fn resolve_cover(&self, topic: &Topic, credits_available: u32) -> Cover {
        self.resolve(topic, credits_available).await.cover
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaViolation;
    use crate::models::Stage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeGenerator {
        succeed: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CoverImageGenerator for FakeGenerator {
        async fn generate_cover(&self, _prompt: &str) -> Result<String, CoverFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok("https://images.example/cover.png".to_string())
            } else {
                Err(CoverFailure::Schema(SchemaViolation::new(Stage::Cover, "data", "missing")))
            }
        }
    }

    struct StalledGenerator;

    #[async_trait]
    impl CoverImageGenerator for StalledGenerator {
        async fn generate_cover(&self, _prompt: &str) -> Result<String, CoverFailure> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("https://images.example/late.png".to_string())
        }
    }

    fn resolver(succeed: bool) -> (CoverResolver, Arc<FakeGenerator>) {
        let generator = Arc::new(FakeGenerator {
            succeed,
            calls: AtomicUsize::new(0),
        });
        (
            CoverResolver::new(generator.clone(), PipelineConfig::default()),
            generator,
        )
    }

    fn topic() -> Topic {
        Topic::parse("Intermittent Fasting for Beginners", 0).unwrap()
    }

    #[test]
    fn placeholder_url_pattern() {
        assert_eq!(
            placeholder_url("https://picsum.photos/", "Home Brewing 101!", 600, 900, None),
            "https://picsum.photos/seed/HomeBrewing101/600/900"
        );
        assert_eq!(
            placeholder_url("https://picsum.photos", "x", 1, 2, Some("?blur=2")),
            "https://picsum.photos/seed/x/1/2?blur=2"
        );
    }

    #[tokio::test]
    async fn below_threshold_is_deterministic_placeholder() {
        let (resolver, generator) = resolver(true);
        let first = resolver.resolve_cover(&topic(), 49).await;
        let second = resolver.resolve_cover(&topic(), 49).await;

        assert_eq!(first.mode, CoverMode::Placeholder);
        assert_eq!(first, second);
        assert_eq!(
            first.url,
            "https://picsum.photos/seed/IntermittentFastingforBeginners/600/900"
        );
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn at_threshold_attempts_ai() {
        let (resolver, generator) = resolver(true);
        let cover = resolver.resolve_cover(&topic(), 50).await;
        assert_eq!(cover.mode, CoverMode::Ai);
        assert_eq!(cover.url, "https://images.example/cover.png");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ai_failure_falls_back_silently() {
        let (resolver, _) = resolver(false);
        let resolution = resolver.resolve(&topic(), 50).await;
        assert_eq!(resolution.cover.mode, CoverMode::Fallback);
        assert!(resolution.cover.url.ends_with("/600/900?blur=2"));
        assert!(resolution.failure.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn ai_timeout_falls_back() {
        let resolver = CoverResolver::new(Arc::new(StalledGenerator), PipelineConfig::default());
        let resolution = resolver.resolve(&topic(), 50).await;

        assert_eq!(resolution.cover.mode, CoverMode::Fallback);
        assert!(resolution.cover.url.ends_with("?blur=2"));
        assert!(matches!(
            resolution.failure,
            Some(CoverFailure::Timeout(d)) if d == Duration::from_secs(90)
        ));
    }
}
