use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use url::Url;

const DEFAULT_CONFIG_FILE: &str = "catalog_scraper.toml";
const ENV_PREFIX: &str = "SCRAPER";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub start_url: String,
    pub request_delay_seconds: f64,
    pub request_timeout_seconds: u64,
    pub user_agent: String,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_pages: usize,
    pub output_targets: OutputTargets,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputTargets {
    pub tabular: PathBuf,
    pub document: PathBuf,
    pub relational: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            start_url: "http://books.toscrape.com/catalogue/page-1.html".into(),
            request_delay_seconds: 1.5,
            request_timeout_seconds: 10,
            user_agent: concat!("catalog_scraper/", env!("CARGO_PKG_VERSION")).into(),
            max_retries: 2,
            retry_backoff_ms: 1000,
            max_pages: 1000,
            output_targets: OutputTargets::default(),
        }
    }
}

impl Default for OutputTargets {
    fn default() -> Self {
        Self {
            tabular: "data/products.csv".into(),
            document: "data/products.json".into(),
            relational: "data/products.db".into(),
        }
    }
}

impl Settings {
    /// Defaults, then the TOML file (explicit path must exist), then `SCRAPER__*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).format(FileFormat::Toml).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE)
                .format(FileFormat::Toml)
                .required(false),
        };
        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.request_delay_seconds.is_finite() || self.request_delay_seconds < 0.0 {
            bail!(
                "request_delay_seconds must be a non-negative number, got {}",
                self.request_delay_seconds
            );
        }
        if self.request_timeout_seconds == 0 {
            bail!("request_timeout_seconds must be at least 1");
        }
        if self.max_pages == 0 {
            bail!("max_pages must be at least 1");
        }
        self.start_locator()?;
        Ok(())
    }

    pub fn start_locator(&self) -> Result<Url> {
        let url = Url::parse(&self.start_url)
            .with_context(|| format!("start_url {:?} is not an absolute URL", self.start_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("start_url must use http or https, got {}", url.scheme());
        }
        Ok(url)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_secs_f64(self.request_delay_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        s.validate().unwrap();
        assert_eq!(s.request_delay(), Duration::from_millis(1500));
        assert_eq!(s.output_targets.tabular, PathBuf::from("data/products.csv"));
    }

    #[test]
    fn file_overrides_defaults() {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            f,
            "request_delay_seconds = 0.25\nmax_pages = 3\n\n[output_targets]\ntabular = \"out/a.csv\""
        )
        .unwrap();

        let s = Settings::load(Some(f.path())).unwrap();
        assert_eq!(s.request_delay_seconds, 0.25);
        assert_eq!(s.max_pages, 3);
        assert_eq!(s.output_targets.tabular, PathBuf::from("out/a.csv"));
        // untouched keys keep their defaults
        assert_eq!(s.output_targets.document, PathBuf::from("data/products.json"));
        assert_eq!(s.max_retries, 2);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(Settings::load(Some(Path::new("does/not/exist.toml"))).is_err());
    }

    #[test]
    fn rejects_negative_delay() {
        let s = Settings {
            request_delay_seconds: -1.0,
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_relative_or_non_http_start() {
        let relative = Settings {
            start_url: "catalogue/page-1.html".into(),
            ..Settings::default()
        };
        assert!(relative.validate().is_err());

        let ftp = Settings {
            start_url: "ftp://example.com/page-1.html".into(),
            ..Settings::default()
        };
        assert!(ftp.validate().is_err());
    }

    #[test]
    fn rejects_zero_timeout() {
        let s = Settings {
            request_timeout_seconds: 0,
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_zero_page_ceiling() {
        let s = Settings {
            max_pages: 0,
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }
}
