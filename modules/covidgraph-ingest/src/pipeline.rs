//! End-to-end run: schema setup, downloads, JHU and WPP ingestion, then the
//! latest-report tagging pass.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use covidgraph_common::Config;
use covidgraph_graph::{migrate::migrate, tag_latest, GraphStore, LatestStats};

use crate::download::{extract_archive, DownloadOutcome, Downloader, ExtractOutcome, JHU_FILE_NAME};
use crate::error::{IngestError, Result};
use crate::jhu::{IngestStats, JhuIngest};
use crate::wpp::{load_population, WppStats, WPP_FILE_NAME};

#[derive(Debug, Clone, Serialize)]
pub struct DownloadSummary {
    pub jhu: DownloadOutcome,
    pub jhu_extracted: ExtractOutcome,
    pub wpp: DownloadOutcome,
}

/// Everything one full run did, printed as JSON by the binary.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub downloads: DownloadSummary,
    pub jhu: IngestStats,
    pub wpp: WppStats,
    pub latest: LatestStats,
}

pub struct Pipeline {
    config: Config,
    store: Arc<dyn GraphStore>,
    jhu: JhuIngest,
}

impl Pipeline {
    pub fn new(config: Config, store: Arc<dyn GraphStore>) -> Self {
        Self {
            config,
            store,
            jhu: JhuIngest::default(),
        }
    }

    pub fn with_jhu_ingest(mut self, jhu: JhuIngest) -> Self {
        self.jhu = jhu;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Directory the JHU archive extracts into.
    pub fn jhu_root(&self) -> PathBuf {
        let zip = self.config.data_dir.join(JHU_FILE_NAME);
        zip.with_extension("")
    }

    pub fn wpp_path(&self) -> PathBuf {
        self.config.data_dir.join(WPP_FILE_NAME)
    }

    /// Uniqueness constraints and indexes.
    pub async fn setup(&self) -> Result<()> {
        migrate(self.store.as_ref()).await?;
        Ok(())
    }

    /// Fetch both sources and unpack the JHU archive.
    pub async fn download(&self) -> Result<DownloadSummary> {
        let downloader = Downloader::new()?;
        let data_dir = &self.config.data_dir;
        let skip = self.config.skip_existing;

        let jhu = downloader
            .fetch(&self.config.jhu_url, &data_dir.join(JHU_FILE_NAME), skip)
            .await?;

        let zip_path = jhu.path.clone();
        let overwrite = self.config.overwrite_extracted;
        let jhu_extracted = tokio::task::spawn_blocking(move || extract_archive(&zip_path, overwrite))
            .await
            .map_err(|e| IngestError::Other(anyhow::anyhow!("extract task failed: {e}")))??;

        let wpp = downloader
            .fetch(&self.config.wpp_url, &data_dir.join(WPP_FILE_NAME), skip)
            .await?;

        Ok(DownloadSummary {
            jhu,
            jhu_extracted,
            wpp,
        })
    }

    pub async fn ingest_jhu(&self) -> Result<IngestStats> {
        self.ingest_jhu_from(&self.jhu_root()).await
    }

    pub async fn ingest_jhu_from(&self, jhu_root: &Path) -> Result<IngestStats> {
        self.jhu.ingest_extracted(self.store.as_ref(), jhu_root).await
    }

    pub async fn ingest_wpp(&self) -> Result<WppStats> {
        load_population(self.store.as_ref(), &self.wpp_path(), self.config.reference_year).await
    }

    pub async fn tag_latest(&self) -> Result<LatestStats> {
        Ok(tag_latest(self.store.as_ref()).await?)
    }

    /// Setup, download, ingest JHU, ingest WPP, then tag latest reports.
    pub async fn run(&self) -> Result<RunSummary> {
        info!(data_dir = %self.config.data_dir.display(), "Starting full run");
        self.setup().await?;
        let downloads = self.download().await?;
        let jhu = self.ingest_jhu_from(&downloads.jhu_extracted.dir).await?;
        let wpp = self.ingest_wpp().await?;
        let latest = self.tag_latest().await?;
        info!("Run complete");

        Ok(RunSummary {
            downloads,
            jhu,
            wpp,
            latest,
        })
    }
}
