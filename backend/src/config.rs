//! Runtime configuration, read from the environment (and `.env`) at startup.

use log::warn;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub jobs: JobsConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct JobsConfig {
    pub max_running: usize,
    pub max_pending: usize,
    pub ttl: Duration,
    pub sweep_interval: Duration,
    pub shutdown_grace: Duration,
    pub default_languages: Vec<String>,
}

/// External programs the conversion pipeline shells out to.
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    pub ocrmypdf: String,
    pub tesseract: String,
    pub pdftoppm: String,
    pub pdfinfo: String,
    pub raster_dpi: u32,
}

impl Default for Config {
    fn default() -> Self {
        let max_running = num_cpus::get().max(1);
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                max_upload_bytes: 50 * 1024 * 1024,
                work_dir: env::temp_dir().join("ocr-server"),
            },
            jobs: JobsConfig {
                max_running,
                max_pending: max_running * 4,
                ttl: Duration::from_secs(3600),
                sweep_interval: Duration::from_secs(60),
                shutdown_grace: Duration::from_secs(30),
                default_languages: vec!["eng".to_string()],
            },
            tools: ToolsConfig {
                ocrmypdf: "ocrmypdf".to_string(),
                tesseract: "tesseract".to_string(),
                pdftoppm: "pdftoppm".to_string(),
                pdfinfo: "pdfinfo".to_string(),
                raster_dpi: 300,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let max_running = parse_var("OCR_MAX_RUNNING_JOBS", defaults.jobs.max_running).max(1);
        let max_pending = parse_var("OCR_MAX_PENDING_JOBS", max_running * 4).max(max_running);

        let default_languages = env::var("OCR_DEFAULT_LANGUAGES")
            .ok()
            .map(|v| {
                v.split('+')
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|langs| !langs.is_empty())
            .unwrap_or(defaults.jobs.default_languages);

        Config {
            server: ServerConfig {
                host: env::var("OCR_HOST").unwrap_or(defaults.server.host),
                port: parse_var("PORT", defaults.server.port),
                max_upload_bytes: parse_var("OCR_MAX_UPLOAD_MB", 50usize) * 1024 * 1024,
                work_dir: env::var("OCR_WORK_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.server.work_dir),
            },
            jobs: JobsConfig {
                max_running,
                max_pending,
                ttl: Duration::from_secs(parse_var("OCR_JOB_TTL_SECS", 3600)),
                sweep_interval: Duration::from_secs(parse_var("OCR_SWEEP_INTERVAL_SECS", 60).max(1)),
                shutdown_grace: Duration::from_secs(parse_var("OCR_SHUTDOWN_GRACE_SECS", 30)),
                default_languages,
            },
            tools: ToolsConfig {
                ocrmypdf: env::var("OCRMYPDF_BIN").unwrap_or(defaults.tools.ocrmypdf),
                tesseract: env::var("TESSERACT_BIN").unwrap_or(defaults.tools.tesseract),
                pdftoppm: env::var("PDFTOPPM_BIN").unwrap_or(defaults.tools.pdftoppm),
                pdfinfo: env::var("PDFINFO_BIN").unwrap_or(defaults.tools.pdfinfo),
                raster_dpi: parse_var("OCR_RASTER_DPI", defaults.tools.raster_dpi),
            },
        }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.server.work_dir.join("uploads")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.server.work_dir.join("outputs")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.server.work_dir.join("pages")
    }
}

fn parse_var<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {}={:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}
