use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::tiling::{ConfigurationError, TilingConfig};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub pipeline: PipelineConfig,
    pub model: ModelConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

pub trait Validatable {
    fn validate(&self) -> Result<(), String>;
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: u32,
}

fn default_max_message_bytes() -> u32 {
    detection_proto::DEFAULT_MAX_MESSAGE_BYTES
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Knobs of the tiled pipeline. One struct serves every model variant.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PipelineConfig {
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    #[serde(default = "default_overlap")]
    pub overlap: u32,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default = "default_nms_threshold")]
    pub nms_threshold: f32,
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,
}

fn default_tile_size() -> u32 {
    640
}

fn default_overlap() -> u32 {
    256
}

fn default_score_threshold() -> f32 {
    0.15
}

fn default_nms_threshold() -> f32 {
    0.5
}

fn default_frame_timeout_ms() -> u64 {
    10_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tile_size: default_tile_size(),
            overlap: default_overlap(),
            score_threshold: default_score_threshold(),
            nms_threshold: default_nms_threshold(),
            frame_timeout_ms: default_frame_timeout_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn tiling(&self) -> Result<TilingConfig, ConfigurationError> {
        TilingConfig::new(self.tile_size, self.overlap)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

impl Validatable for PipelineConfig {
    fn validate(&self) -> Result<(), String> {
        self.tiling().map_err(|e| e.to_string())?;
        for (name, value) in [
            ("score_threshold", self.score_threshold),
            ("nms_threshold", self.nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if self.frame_timeout_ms == 0 {
            return Err("frame_timeout_ms must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub onnx_file: String,
    pub model_dir: PathBuf,
    pub labels_file: String,
    pub labels_dir: PathBuf,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_model_iou_threshold")]
    pub iou_threshold: f32,
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(5)
}

fn default_input_size() -> u32 {
    640
}

fn default_model_iou_threshold() -> f32 {
    0.7
}

impl ModelConfig {
    pub fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }

    pub fn get_labels_path(&self) -> PathBuf {
        self.labels_dir.join(&self.labels_file)
    }
}

impl Validatable for ModelConfig {
    fn validate(&self) -> Result<(), String> {
        if !self.get_path().exists() {
            return Err(format!("Model file not found: {:?}", self.get_path()));
        }
        if !self.get_labels_path().exists() {
            return Err(format!("Labels file not found: {:?}", self.get_labels_path()));
        }
        if self.num_instances == 0 {
            return Err("num_instances must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = load_configuration(&configuration_directory, environment, env_overrides())?;

    if let Err(e) = config.model.validate() {
        tracing::error!("Model configuration is invalid: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(config)
}

/// `APP_PIPELINE__OVERLAP=128` overrides `pipeline.overlap`.
fn env_overrides() -> config::Environment {
    config::Environment::with_prefix("APP")
        .prefix_separator("_")
        .separator("__")
}

fn load_configuration(
    configuration_directory: &Path,
    environment: Environment,
    overrides: config::Environment,
) -> Result<Config, config::ConfigError> {
    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(overrides)
        .build()?;

    let config = config.try_deserialize::<Config>()?;

    if let Err(e) = config.pipeline.validate() {
        tracing::error!("Pipeline configuration is invalid: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.tile_size, 640);
        assert_eq!(config.overlap, 256);
        assert_eq!(config.score_threshold, 0.15);
        assert_eq!(config.nms_threshold, 0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pipeline_rejects_non_positive_stride() {
        let config = PipelineConfig {
            tile_size: 256,
            overlap: 256,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pipeline_rejects_out_of_range_thresholds() {
        let config = PipelineConfig {
            nms_threshold: 1.5,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_defaults_and_override() -> Result<(), Box<dyn std::error::Error>> {
        let base = r#"
log_level: info
server:
  host: 127.0.0.1
  port: 8888
pipeline:
  tile_size: 512
model:
  onnx_file: best.onnx
  model_dir: models
  labels_file: labels.txt
  labels_dir: models
"#;
        let config = config::Config::builder()
            .add_source(config::File::from_str(base, config::FileFormat::Yaml))
            .set_override("pipeline.overlap", 128)?
            .build()?
            .try_deserialize::<Config>()?;

        assert_eq!(config.server.get_address(), "127.0.0.1:8888");
        assert_eq!(config.pipeline.tile_size, 512);
        assert_eq!(config.pipeline.overlap, 128);
        assert_eq!(config.pipeline.nms_threshold, 0.5);
        assert_eq!(
            config.server.max_message_bytes,
            detection_proto::DEFAULT_MAX_MESSAGE_BYTES
        );
        assert_eq!(config.model.get_path(), PathBuf::from("models/best.onnx"));
        assert_eq!(config.log_level.as_str(), "info");
        Ok(())
    }

    fn shipped_configuration() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("configuration")
    }

    #[test]
    fn test_environment_file_and_app_variables() -> Result<(), config::ConfigError> {
        let variables = config::Map::from([
            ("APP_PIPELINE__OVERLAP".to_string(), "128".to_string()),
            ("APP_PIPELINE__SCORE_THRESHOLD".to_string(), "0.3".to_string()),
            ("APP_SERVER__PORT".to_string(), "9000".to_string()),
            ("OTHER_PIPELINE__TILE_SIZE".to_string(), "1".to_string()),
        ]);

        let config = load_configuration(
            &shipped_configuration(),
            Environment::Production,
            env_overrides().source(Some(variables)),
        )?;

        assert_eq!(config.server.get_address(), "0.0.0.0:9000");
        assert_eq!(config.pipeline.tile_size, 640);
        assert_eq!(config.pipeline.overlap, 128);
        assert_eq!(config.pipeline.score_threshold, 0.3);
        assert_eq!(config.pipeline.nms_threshold, 0.5);
        assert_eq!(config.log_level.as_str(), "info");
        Ok(())
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let variables = config::Map::from([(
            "APP_PIPELINE__OVERLAP".to_string(),
            "640".to_string(),
        )]);

        let result = load_configuration(
            &shipped_configuration(),
            Environment::Local,
            env_overrides().source(Some(variables)),
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_log_level_and_environment_parsing() {
        assert!(LogLevel::try_from("DEBUG".to_string()).is_ok());
        assert!(LogLevel::try_from("trace".to_string()).is_err());
        assert!(Environment::try_from("production".to_string()).is_ok());
        assert!(Environment::try_from("staging".to_string()).is_err());
    }
}
