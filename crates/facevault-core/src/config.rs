//! Configuration module
//!
//! Settings for the HTTP server, the file record store, the face detection
//! client, the dispatch queue and the batch dispatcher. Values come from the
//! process environment (a `.env` file is loaded first when present); malformed
//! numbers fall back to their defaults and `validate` rejects combinations that
//! cannot work.

use std::env;
use std::str::FromStr;

// Common constants
const SERVER_PORT: u16 = 3000;
const DB_MAX_CONNECTIONS: u32 = 20;
const DB_TIMEOUT_SECS: u64 = 30;
const ARTIFACT_PROCESSOR_URL: &str = "http://localhost:8080";
const AWS_REGION: &str = "us-east-1";
const DETECTION_MAX_ATTEMPTS: u32 = 3;
const DETECTION_BASE_BACKOFF_MS: u64 = 500;
const DETECTION_MAX_BACKOFF_MS: u64 = 8_000;
const DETECTION_ATTEMPT_TIMEOUT_SECS: u64 = 30;
const MAX_WORKERS: usize = 4;
const MAX_QUEUE_DEPTH: usize = 1000;
const JOB_TIMEOUT_SECS: u64 = 300;
const STALE_THRESHOLD_SECS: u64 = 600;
const REAP_INTERVAL_SECS: u64 = 60;
const MAX_TOTAL_ATTEMPTS: u32 = 5;
const MIN_FILE_SIZE_BYTES: u64 = 1024;
const MAX_BATCH_SIZE: usize = 100;
const DAILY_QUOTA: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" | "in_memory" => Ok(StoreBackend::Memory),
            other => Err(anyhow::anyhow!("Invalid STORE_BACKEND: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionBackend {
    ArtifactProcessor,
    AwsRekognition,
}

impl FromStr for DetectionBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "artifact_processor" | "http" => Ok(DetectionBackend::ArtifactProcessor),
            "aws_rekognition" | "rekognition" => Ok(DetectionBackend::AwsRekognition),
            other => Err(anyhow::anyhow!("Invalid FACE_DETECTION_BACKEND: {}", other)),
        }
    }
}

/// File record store connection settings
#[derive(Clone, Debug)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub timeout_seconds: u64,
}

/// Face detection client settings (backend selection and retry policy)
#[derive(Clone, Debug)]
pub struct DetectionSettings {
    pub backend: DetectionBackend,
    pub artifact_processor_url: String,
    pub aws_region: String,
    pub requested_attributes: Vec<String>,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub attempt_timeout_secs: u64,
}

/// Dispatch queue and reconciliation sweep settings
#[derive(Clone, Debug)]
pub struct QueueSettings {
    pub max_workers: usize,
    pub max_queue_depth: usize,
    /// Maximum lifetime of one job, from Processing to its terminal transition.
    pub job_timeout_secs: u64,
    /// Jobs non-terminal for longer than this are presumed lost.
    pub stale_threshold_secs: u64,
    /// Interval between sweeps. 0 = disabled.
    pub reap_interval_secs: u64,
    /// Attempt budget of one submission, across re-queues.
    pub max_total_attempts: u32,
}

/// Batch eligibility and aggregation settings
#[derive(Clone, Debug)]
pub struct DispatchSettings {
    pub min_file_size_bytes: u64,
    pub max_batch_size: usize,
    /// Per user per UTC day. 0 = unlimited.
    pub daily_quota: u32,
    pub min_face_confidence: f64,
}

/// Application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub server_port: u16,
    pub environment: String,
    pub cors_origins: Vec<String>,
    pub log_format: LogFormat,
    pub store: StoreSettings,
    pub detection: DetectionSettings,
    pub queue: QueueSettings,
    pub dispatch: DispatchSettings,
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    /// Load configuration from the process environment (and `.env` if present).
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from an arbitrary key lookup. Does not validate.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, anyhow::Error> {
        let environment = lookup("ENVIRONMENT")
            .or_else(|| lookup("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let cors_origins = split_list(&lookup("CORS_ORIGINS").unwrap_or_else(|| "*".to_string()));

        let log_format = match lookup("LOG_FORMAT").map(|v| v.to_lowercase()) {
            Some(v) if v == "json" => LogFormat::Json,
            _ => LogFormat::Compact,
        };

        let store = StoreSettings {
            backend: lookup("STORE_BACKEND")
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or(StoreBackend::Postgres),
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", DB_MAX_CONNECTIONS),
            timeout_seconds: parse_or(&lookup, "DB_TIMEOUT_SECONDS", DB_TIMEOUT_SECS),
        };

        let detection = DetectionSettings {
            backend: lookup("FACE_DETECTION_BACKEND")
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or(DetectionBackend::ArtifactProcessor),
            artifact_processor_url: lookup("ARTIFACT_PROCESSOR_URL")
                .unwrap_or_else(|| ARTIFACT_PROCESSOR_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            aws_region: lookup("AWS_REGION").unwrap_or_else(|| AWS_REGION.to_string()),
            requested_attributes: split_list(
                &lookup("FACE_DETECTION_ATTRIBUTES").unwrap_or_else(|| "ALL".to_string()),
            ),
            max_attempts: parse_or(&lookup, "DETECTION_MAX_ATTEMPTS", DETECTION_MAX_ATTEMPTS),
            base_backoff_ms: parse_or(
                &lookup,
                "DETECTION_BASE_BACKOFF_MS",
                DETECTION_BASE_BACKOFF_MS,
            ),
            max_backoff_ms: parse_or(&lookup, "DETECTION_MAX_BACKOFF_MS", DETECTION_MAX_BACKOFF_MS),
            attempt_timeout_secs: parse_or(
                &lookup,
                "DETECTION_ATTEMPT_TIMEOUT_SECS",
                DETECTION_ATTEMPT_TIMEOUT_SECS,
            ),
        };

        let queue = QueueSettings {
            max_workers: parse_or(&lookup, "VECTORIZE_MAX_WORKERS", MAX_WORKERS),
            max_queue_depth: parse_or(&lookup, "VECTORIZE_MAX_QUEUE_DEPTH", MAX_QUEUE_DEPTH),
            job_timeout_secs: parse_or(&lookup, "VECTORIZE_JOB_TIMEOUT_SECS", JOB_TIMEOUT_SECS),
            stale_threshold_secs: parse_or(
                &lookup,
                "VECTORIZE_STALE_THRESHOLD_SECS",
                STALE_THRESHOLD_SECS,
            ),
            reap_interval_secs: parse_or(&lookup, "VECTORIZE_REAP_INTERVAL_SECS", REAP_INTERVAL_SECS),
            max_total_attempts: parse_or(
                &lookup,
                "VECTORIZE_MAX_TOTAL_ATTEMPTS",
                MAX_TOTAL_ATTEMPTS,
            ),
        };

        let dispatch = DispatchSettings {
            min_file_size_bytes: parse_or(
                &lookup,
                "VECTORIZE_MIN_FILE_SIZE_BYTES",
                MIN_FILE_SIZE_BYTES,
            ),
            max_batch_size: parse_or(&lookup, "VECTORIZE_MAX_BATCH_SIZE", MAX_BATCH_SIZE),
            daily_quota: parse_or(&lookup, "VECTORIZE_DAILY_QUOTA", DAILY_QUOTA),
            min_face_confidence: parse_or(&lookup, "FACE_MIN_CONFIDENCE", 0.0),
        };

        Ok(Self {
            server_port: parse_or(&lookup, "SERVER_PORT", SERVER_PORT),
            environment,
            cors_origins,
            log_format,
            store,
            detection,
            queue,
            dispatch,
        })
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.is_production() && self.cors_origins.iter().any(|o| o == "*") {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }
        if self.store.backend == StoreBackend::Postgres && self.store.database_url.is_none() {
            return Err(anyhow::anyhow!(
                "DATABASE_URL is required when STORE_BACKEND=postgres"
            ));
        }
        if self.queue.max_workers == 0 {
            return Err(anyhow::anyhow!("VECTORIZE_MAX_WORKERS must be at least 1"));
        }
        if self.queue.max_queue_depth == 0 {
            return Err(anyhow::anyhow!("VECTORIZE_MAX_QUEUE_DEPTH must be at least 1"));
        }
        if self.queue.max_total_attempts == 0 || self.detection.max_attempts == 0 {
            return Err(anyhow::anyhow!(
                "DETECTION_MAX_ATTEMPTS and VECTORIZE_MAX_TOTAL_ATTEMPTS must be at least 1"
            ));
        }
        if self.detection.base_backoff_ms > self.detection.max_backoff_ms {
            return Err(anyhow::anyhow!(
                "DETECTION_BASE_BACKOFF_MS ({}) exceeds DETECTION_MAX_BACKOFF_MS ({})",
                self.detection.base_backoff_ms,
                self.detection.max_backoff_ms
            ));
        }
        if self.queue.stale_threshold_secs <= self.queue.job_timeout_secs {
            return Err(anyhow::anyhow!(
                "VECTORIZE_STALE_THRESHOLD_SECS must be greater than VECTORIZE_JOB_TIMEOUT_SECS"
            ));
        }
        if self.dispatch.max_batch_size == 0 {
            return Err(anyhow::anyhow!("VECTORIZE_MAX_BATCH_SIZE must be at least 1"));
        }
        if !(0.0..=100.0).contains(&self.dispatch.min_face_confidence) {
            return Err(anyhow::anyhow!("FACE_MIN_CONFIDENCE must be within [0, 100]"));
        }
        Ok(())
    }
}
