//! Runtime configuration read from the environment (and an optional `.env`).

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Knobs of the generation pipeline itself.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub model: String,
    pub min_chapters: usize,
    pub max_chapters: usize,
    pub chapter_word_target: usize,
    pub call_timeout: Duration,
    pub ai_image_min_credits: u32,
    pub placeholder_base_url: String,
    pub cover_width: u32,
    pub cover_height: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            model: "gpt-4o-mini".to_string(),
            min_chapters: 10,
            max_chapters: 12,
            chapter_word_target: 1200,
            call_timeout: Duration::from_secs(90),
            ai_image_min_credits: 50,
            placeholder_base_url: "https://picsum.photos".to_string(),
            cover_width: 600,
            cover_height: 900,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct ImageConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub min_topic_len: usize,
    pub default_credits: u32,
    pub history_dir: Option<PathBuf>,
    /// Extra hosts cover images may be fetched from, on top of the
    /// placeholder and image API hosts.
    pub cover_allowed_hosts: Vec<String>,
    pub job_ttl: Duration,
    pub max_jobs: usize,
    pub llm: LlmConfig,
    pub image: ImageConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = PipelineConfig::default();

        let pipeline = PipelineConfig {
            model: env_string("LLM_MODEL", &defaults.model),
            min_chapters: env_parse("MIN_CHAPTERS", defaults.min_chapters)?,
            max_chapters: env_parse("MAX_CHAPTERS", defaults.max_chapters)?,
            chapter_word_target: env_parse("CHAPTER_WORD_TARGET", defaults.chapter_word_target)?,
            call_timeout: Duration::from_secs(env_parse("CALL_TIMEOUT_SECS", 90u64)?),
            ai_image_min_credits: env_parse("AI_IMAGE_MIN_CREDITS", defaults.ai_image_min_credits)?,
            placeholder_base_url: env_string(
                "PLACEHOLDER_BASE_URL",
                &defaults.placeholder_base_url,
            ),
            ..defaults
        };
        if pipeline.min_chapters == 0 || pipeline.min_chapters > pipeline.max_chapters {
            anyhow::bail!(
                "invalid chapter range {}..={}",
                pipeline.min_chapters,
                pipeline.max_chapters
            );
        }

        Ok(Config {
            bind_addr: env_string("BIND_ADDR", "0.0.0.0:3000"),
            min_topic_len: env_parse("MIN_TOPIC_LEN", 10usize)?,
            default_credits: env_parse("DEFAULT_CREDITS", 0u32)?,
            history_dir: std::env::var("HISTORY_DIR").ok().map(PathBuf::from),
            cover_allowed_hosts: env_list("COVER_ALLOWED_HOSTS"),
            job_ttl: Duration::from_secs(env_parse("JOB_TTL_SECS", 3600u64)?),
            max_jobs: env_parse("MAX_JOBS", 1000usize)?,
            llm: LlmConfig {
                api_url: env_string(
                    "LLM_API_URL",
                    "http://localhost:11434/v1/chat/completions",
                ),
                api_key: env_string("LLM_API_KEY", "dummy_key"),
            },
            image: ImageConfig {
                api_url: env_string(
                    "IMAGE_API_URL",
                    "https://api.openai.com/v1/images/generations",
                ),
                api_key: env_string("IMAGE_API_KEY", "dummy_key"),
                model: env_string("IMAGE_MODEL", "dall-e-3"),
            },
            pipeline,
        })
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_list(key: &str) -> Vec<String> {
    env_string(key, "")
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_and_rejects_garbage() {
        // SAFETY: test-local keys that no other test touches.
        unsafe {
            std::env::remove_var("EBOOK_FORGE_TEST_UNSET");
            std::env::set_var("EBOOK_FORGE_TEST_BAD", "ten");
        }
        assert_eq!(env_parse("EBOOK_FORGE_TEST_UNSET", 7usize).unwrap(), 7);
        assert!(env_parse::<usize>("EBOOK_FORGE_TEST_BAD", 7).is_err());
    }

    #[test]
    fn env_list_splits_on_commas() {
        // SAFETY: test-local key that no other test touches.
        unsafe {
            std::env::set_var("EBOOK_FORGE_TEST_LIST", " a.example, ,b.example ");
        }
        assert_eq!(env_list("EBOOK_FORGE_TEST_LIST"), vec!["a.example", "b.example"]);
        assert!(env_list("EBOOK_FORGE_TEST_LIST_UNSET").is_empty());
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PipelineConfig::default();
        assert_eq!((cfg.min_chapters, cfg.max_chapters), (10, 12));
        assert_eq!(cfg.ai_image_min_credits, 50);
    }
}
