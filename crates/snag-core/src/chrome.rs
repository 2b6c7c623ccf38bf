//! Chrome provisioning for the page renderer
//!
//! Resolves a Chrome binary (configured, system-wide, or a previously
//! downloaded Chrome for Testing build) and launches one shared headless
//! browser. In `auto` and `bundled` mode a missing binary is downloaded.

use crate::{Result, SnagError};
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How the renderer obtains Chrome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChromeMode {
    /// Downloaded build first, then system Chrome, then download
    #[default]
    Auto,
    /// Only the downloaded Chrome for Testing build
    Bundled,
    /// Only an installed Chrome
    System,
    /// Rendering disabled
    None,
}

impl std::str::FromStr for ChromeMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ChromeMode::Auto),
            "bundled" => Ok(ChromeMode::Bundled),
            "system" => Ok(ChromeMode::System),
            "none" | "off" => Ok(ChromeMode::None),
            _ => Err(format!(
                "Unknown browser mode: {}. Use 'auto', 'bundled', 'system' or 'none'",
                s
            )),
        }
    }
}

/// Where the Chrome binary came from
#[derive(Debug, Clone)]
enum ChromeSource {
    /// Downloaded chrome-headless-shell
    Bundled(PathBuf),
    /// Installed on the host
    System(PathBuf),
    /// Not resolved yet, or disabled
    None,
}

#[derive(Debug, Clone)]
pub struct ChromeConfig {
    pub mode: ChromeMode,
    /// Explicit binary, tried first in system mode
    pub chrome_path: Option<PathBuf>,
    /// Where downloaded builds are unpacked
    pub data_dir: PathBuf,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        let data_dir = directories::ProjectDirs::from("", "", "snag")
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".snag"));

        Self {
            mode: ChromeMode::default(),
            chrome_path: None,
            data_dir,
        }
    }
}

/// A launched browser and the task driving its CDP connection
pub struct BrowserHandle {
    pub browser: Browser,
    #[allow(dead_code)]
    handler: tokio::task::JoinHandle<()>,
}

pub struct ChromeManager {
    config: ChromeConfig,
    source: ChromeSource,
    browser: Option<Arc<Mutex<BrowserHandle>>>,
}

impl ChromeManager {
    const MANIFEST_URL: &'static str =
        "https://googlechromelabs.github.io/chrome-for-testing/last-known-good-versions-with-downloads.json";

    pub fn with_config(config: ChromeConfig) -> Self {
        Self {
            config,
            source: ChromeSource::None,
            browser: None,
        }
    }

    /// Resolve a Chrome binary according to the configured mode
    pub async fn ensure_chrome(&mut self) -> Result<PathBuf> {
        if let ChromeSource::Bundled(ref path) | ChromeSource::System(ref path) = self.source {
            if path.exists() {
                return Ok(path.clone());
            }
        }

        match self.config.mode {
            ChromeMode::None => Err(SnagError::BrowserError(
                "Browser rendering is disabled".to_string(),
            )),
            ChromeMode::System => {
                let path = self
                    .system_binary()
                    .ok_or_else(|| SnagError::BrowserError("No system Chrome found".to_string()))?;
                self.source = ChromeSource::System(path.clone());
                Ok(path)
            }
            ChromeMode::Bundled => match self.bundled_binary() {
                Some(path) => {
                    self.source = ChromeSource::Bundled(path.clone());
                    Ok(path)
                }
                None => self.download_chrome().await,
            },
            ChromeMode::Auto => {
                if let Some(path) = self.bundled_binary() {
                    debug!("Using bundled Chrome: {:?}", path);
                    self.source = ChromeSource::Bundled(path.clone());
                    return Ok(path);
                }
                if let Some(path) = self.system_binary() {
                    debug!("Using system Chrome: {:?}", path);
                    self.source = ChromeSource::System(path.clone());
                    return Ok(path);
                }
                info!("No Chrome found, downloading Chrome for Testing...");
                self.download_chrome().await
            }
        }
    }

    fn chrome_dir(&self) -> PathBuf {
        self.config.data_dir.join("chrome")
    }

    fn binary_path(&self) -> PathBuf {
        let binary = if cfg!(windows) {
            "chrome-headless-shell.exe"
        } else {
            "chrome-headless-shell"
        };
        self.chrome_dir()
            .join(format!("chrome-headless-shell-{}", platform()))
            .join(binary)
    }

    fn system_binary(&self) -> Option<PathBuf> {
        self.config
            .chrome_path
            .clone()
            .filter(|p| p.exists())
            .or_else(find_system_chrome)
    }

    fn bundled_binary(&self) -> Option<PathBuf> {
        Some(self.binary_path()).filter(|p| p.exists())
    }

    async fn download_chrome(&mut self) -> Result<PathBuf> {
        let platform = platform();
        let client = reqwest::Client::new();
        let manifest: ChromeManifest = client
            .get(Self::MANIFEST_URL)
            .send()
            .await
            .map_err(|e| SnagError::BrowserError(format!("Failed to fetch Chrome manifest: {}", e)))?
            .json()
            .await
            .map_err(|e| SnagError::BrowserError(format!("Failed to parse Chrome manifest: {}", e)))?;

        let stable = manifest.channels.stable;
        let download = stable
            .downloads
            .chrome_headless_shell
            .iter()
            .find(|d| d.platform == platform)
            .ok_or_else(|| {
                SnagError::BrowserError(format!("No Chrome build published for {}", platform))
            })?;

        info!("Downloading Chrome {} from {}", stable.version, download.url);
        let chrome_dir = self.chrome_dir();
        tokio::fs::create_dir_all(&chrome_dir).await?;

        let archive = chrome_dir.join("chrome.zip");
        download_to(&client, &download.url, &archive).await?;

        let dest = chrome_dir.clone();
        let zip_path = archive.clone();
        tokio::task::spawn_blocking(move || unpack_zip(&zip_path, &dest))
            .await
            .map_err(|e| SnagError::Other(e.to_string()))??;
        tokio::fs::remove_file(&archive).await?;
        tokio::fs::write(chrome_dir.join("version.txt"), &stable.version).await?;

        let binary = self.binary_path();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755))?;
        }

        info!("Chrome installed at {:?}", binary);
        self.source = ChromeSource::Bundled(binary.clone());
        Ok(binary)
    }

    /// Shared browser instance, launched on first use
    pub async fn get_browser(&mut self) -> Result<Arc<Mutex<BrowserHandle>>> {
        if let Some(ref browser) = self.browser {
            return Ok(Arc::clone(browser));
        }

        let chrome_path = self.ensure_chrome().await?;
        let browser = Arc::new(Mutex::new(launch_browser(&chrome_path).await?));
        self.browser = Some(Arc::clone(&browser));
        Ok(browser)
    }

    /// Drop the cached browser so the next render relaunches it
    pub fn reset(&mut self) {
        if self.browser.take().is_some() {
            debug!("Discarded browser instance");
        }
    }
}

async fn launch_browser(chrome_path: &Path) -> Result<BrowserHandle> {
    debug!("Launching browser from {:?}", chrome_path);

    let config = BrowserConfig::builder()
        .chrome_executable(chrome_path)
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-infobars")
        .arg("--disable-search-engine-choice-screen")
        .build()
        .map_err(SnagError::BrowserError)?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| SnagError::BrowserError(format!("Failed to launch browser: {}", e)))?;

    let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

    Ok(BrowserHandle { browser, handler })
}

async fn download_to(client: &reqwest::Client, url: &str, path: &Path) -> Result<()> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SnagError::BrowserError(format!("Chrome download failed: {}", e)))?;
    let total = response.content_length();

    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    let mut next_log: u64 = 0;
    while let Some(chunk) = stream.try_next().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        if written >= next_log {
            debug!("Chrome download: {} of {:?} bytes", written, total);
            next_log = written + 10 * 1024 * 1024;
        }
    }
    file.flush().await?;
    Ok(())
}

/// Chrome for Testing platform name for this host
fn platform() -> &'static str {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("macos", "aarch64") => "mac-arm64",
        ("macos", "x86_64") => "mac-x64",
        ("linux", "x86_64") => "linux64",
        ("windows", "x86_64") => "win64",
        (os, arch) => {
            warn!("No Chrome for Testing build for {}-{}, trying linux64", os, arch);
            "linux64"
        }
    }
}

/// Locate an installed Chrome or Chromium
pub fn find_system_chrome() -> Option<PathBuf> {
    let known: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        &[
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/snap/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &[r"C:\Program Files\Google\Chrome\Application\chrome.exe"]
    } else {
        &[]
    };

    known
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .or_else(|| {
            ["chromium", "chromium-browser", "google-chrome", "google-chrome-stable"]
                .iter()
                .find_map(|name| which::which(name).ok())
        })
}

fn unpack_zip(zip_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = std::fs::File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| SnagError::BrowserError(format!("Failed to open Chrome archive: {}", e)))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| SnagError::BrowserError(format!("Corrupt Chrome archive: {}", e)))?;
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let out = dest_dir.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut target = std::fs::File::create(&out)?;
        std::io::copy(&mut entry, &mut target)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                std::fs::set_permissions(&out, std::fs::Permissions::from_mode(mode))?;
            }
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct ChromeManifest {
    channels: Channels,
}

#[derive(Debug, Deserialize)]
struct Channels {
    #[serde(rename = "Stable")]
    stable: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    version: String,
    downloads: Downloads,
}

#[derive(Debug, Deserialize)]
struct Downloads {
    #[serde(rename = "chrome-headless-shell")]
    chrome_headless_shell: Vec<Download>,
}

#[derive(Debug, Deserialize)]
struct Download {
    platform: String,
    url: String,
}
