use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::imaging::FilterKind;

pub const PROMPT_DIR_NAME: &str = "配置与提示词";
pub const REWRITE_PROMPT_FILE: &str = "小红书改写.txt";
pub const TITLE_PROMPT_FILE: &str = "小红书咪蒙标题生成.txt";

const DEFAULT_OUTPUT_DIR: &str = "新生成文件";
const DEFAULT_PROCESSED_DIR: &str = "已处理文件";
const DEFAULT_FOLDER_DELAY_SECS: f64 = 5.0;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BORDER_SIZE: u32 = 20;

#[derive(Debug, Clone)]
pub struct Config {
    pub openrouter_api_key: Option<String>,
    pub siliconflow_api_key: Option<String>,
    pub moonshot_api_key: String,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub prompt_dir: PathBuf,
    pub folder_delay: Duration,
    pub retry_delay: Duration,
    pub max_retries: u32,
    pub filter: FilterKind,
    pub border_size: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Try to load .env from multiple locations
        Self::try_load_dotenv();

        let moonshot_api_key = non_empty_var("MOONSHOT_API_KEY").context(
            "MOONSHOT_API_KEY not found.\n\n\
            To fix this, create 配置与提示词/.env (or ~/.config/xhs-publisher/.env) with:\n  \
            MOONSHOT_API_KEY=your_key_here\n  \
            OPENROUTER_API_KEY=optional_primary_key\n  \
            SILICONFLOW_API_KEY=optional_backup_key\n\n\
            Get a Moonshot API key from: https://platform.moonshot.cn/console/api-keys",
        )?;

        Ok(Self {
            openrouter_api_key: non_empty_var("OPENROUTER_API_KEY"),
            siliconflow_api_key: non_empty_var("SILICONFLOW_API_KEY"),
            moonshot_api_key,
            input_dir: path_var("INPUT_FOLDER_PATH", "."),
            output_dir: path_var("OUTPUT_FOLDER_PATH", DEFAULT_OUTPUT_DIR),
            processed_dir: path_var("PROCESSED_FOLDER_PATH", DEFAULT_PROCESSED_DIR),
            prompt_dir: path_var("PROMPT_DIR", PROMPT_DIR_NAME),
            folder_delay: parse_delay(env::var("FOLDER_DELAY_SECONDS").ok().as_deref()),
            retry_delay: Duration::from_secs(2),
            max_retries: parse_retries(env::var("MAX_RETRIES").ok().as_deref()),
            filter: FilterKind::Natural,
            border_size: DEFAULT_BORDER_SIZE,
        })
    }

    pub fn rewrite_prompt_path(&self) -> PathBuf {
        self.prompt_dir.join(REWRITE_PROMPT_FILE)
    }

    pub fn title_prompt_path(&self) -> PathBuf {
        self.prompt_dir.join(TITLE_PROMPT_FILE)
    }

    fn try_load_dotenv() {
        // Try locations in order of preference:

        // 1. Current directory (for development)
        if dotenvy::dotenv().is_ok() {
            return;
        }

        // 2. The prompt folder that ships next to the input folders
        let prompt_env = Path::new(PROMPT_DIR_NAME).join(".env");
        if prompt_env.exists() && dotenvy::from_path(&prompt_env).is_ok() {
            return;
        }

        // 3. ~/.config/xhs-publisher/.env (standard config location)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("xhs-publisher").join(".env");
            if config_path.exists() && dotenvy::from_path(&config_path).is_ok() {
                return;
            }
        }

        // 4. ~/.env (home directory)
        if let Some(home_dir) = dirs::home_dir() {
            let home_path = home_dir.join(".env");
            if home_path.exists() {
                let _ = dotenvy::from_path(&home_path);
            }
        }

        // If none found, that's okay - environment variables might be set system-wide
    }
}

/// Reads a prompt template, falling back to an empty prompt so a missing
/// file does not stop the batch.
pub fn load_prompt_template(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("Failed to load prompt template {}: {}", path.display(), e);
            String::new()
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn path_var(key: &str, default: &str) -> PathBuf {
    non_empty_var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

fn parse_delay(raw: Option<&str>) -> Duration {
    raw.and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_FOLDER_DELAY_SECS))
}

fn parse_retries(raw: Option<&str>) -> u32 {
    raw.and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(DEFAULT_MAX_RETRIES)
        .max(1)
}
