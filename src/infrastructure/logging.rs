use serde::{Deserialize, Serialize};
use std::io;
use tracing::{Level, Subscriber};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Level applied to this crate when no `filter` is given
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    pub include_file_location: bool,
    pub include_thread_names: bool,
    pub include_span_events: bool,
    /// Full `EnvFilter` directive, overrides `level`
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            output: LogOutput::Stderr,
            include_file_location: false,
            include_thread_names: false,
            include_span_events: false,
            filter: None,
        }
    }
}

/// 日志格式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 人类可读的格式
    Pretty,
    /// 紧凑格式
    Compact,
    /// JSON 格式
    Json,
}

/// 日志输出目标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    Stderr,
    File(String),
}

impl LoggingConfig {
    /// Parse `level` into a tracing level, rejecting unknown names.
    pub fn parsed_level(&self) -> anyhow::Result<Level> {
        self.level
            .parse::<Level>()
            .map_err(|_| anyhow::anyhow!("unknown log level: {}", self.level))
    }

    fn env_filter(&self) -> anyhow::Result<EnvFilter> {
        if let Some(filter) = &self.filter {
            return Ok(EnvFilter::try_new(filter)?);
        }
        let level = self.parsed_level()?;
        Ok(EnvFilter::from_default_env().add_directive(format!("resource_layer={}", level).parse()?))
    }
}

/// 设置日志系统
///
/// Installs the global subscriber. Calling it a second time returns an error
/// instead of panicking.
pub fn setup_logging(config: LoggingConfig) -> anyhow::Result<()> {
    let env_filter = config.env_filter()?;

    match &config.output {
        LogOutput::Stdout => {
            let layer = create_fmt_layer(&config, io::stdout);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()?;
        }
        LogOutput::Stderr => {
            let layer = create_fmt_layer(&config, io::stderr);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()?;
        }
        LogOutput::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let layer = create_fmt_layer(&config, std::sync::Mutex::new(file));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()?;
        }
    }

    Ok(())
}

fn create_fmt_layer<S, W>(config: &LoggingConfig, make_writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    W: for<'writer> fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let mut layer = fmt::layer()
        .with_writer(make_writer)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(config.include_thread_names)
        .with_thread_names(config.include_thread_names)
        .with_file(config.include_file_location)
        .with_line_number(config.include_file_location);

    if config.include_span_events {
        layer = layer.with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);
    }

    match config.format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}
