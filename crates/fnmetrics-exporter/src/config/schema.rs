use serde::Deserialize;
use fnmetrics_core::error::{MetricsError, Result};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterConfig {
    pub version: u32,

    #[serde(default)]
    pub exporter: ExporterSection,

    #[serde(default)]
    pub build: BuildSection,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            version: 1,
            exporter: ExporterSection::default(),
            build: BuildSection::default(),
        }
    }
}

impl ExporterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(MetricsError::UnsupportedVersion);
        }

        self.exporter.validate()?;
        self.build.validate()?;

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Upper bound on distinct series the in-process store will create.
    #[serde(default = "default_max_series")]
    pub max_series: usize,
}

impl Default for ExporterSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_series: default_max_series(),
        }
    }
}

impl ExporterSection {
    pub fn validate(&self) -> Result<()> {
        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(MetricsError::BadConfig(format!(
                "exporter.listen must be a socket address, got {:?}",
                self.listen
            )));
        }
        if !(1..=1_000_000).contains(&self.max_series) {
            return Err(MetricsError::BadConfig(
                "exporter.max_series must be between 1 and 1000000".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    #[serde(default)]
    pub service_name: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default = "default_git_properties")]
    pub git_properties: String,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            service_name: None,
            version: None,
            git_properties: default_git_properties(),
        }
    }
}

impl BuildSection {
    pub fn validate(&self) -> Result<()> {
        if self.git_properties.trim().is_empty() {
            return Err(MetricsError::BadConfig(
                "build.git_properties must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "0.0.0.0:9464".into()
}
fn default_max_series() -> usize {
    10_000
}
fn default_git_properties() -> String {
    "git.properties".into()
}
