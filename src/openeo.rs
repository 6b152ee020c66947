//! NDVI batch jobs on an openEO back-end.
mod provider;
pub use provider::OpenEo;

use crate::download_plan::{AssetSource, DownloadPlan, DownloadTask};
use crate::error::{CatalogError, Result};
use crate::footprint::BoundingBox;
use crate::image_selection::ImageSelection;
use chrono::NaiveDate;
use log::info;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep, Instant};

const DOWNLOAD_PLAN_FILE: &str = "download_plan.json";

#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub title: String,
    pub collection: String,
    pub spatial_extent: BoundingBox,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub red: String,
    pub nir: String,
    pub format: String,
}

impl JobRequest {
    pub fn from_selection(selection: &ImageSelection) -> Self {
        Self {
            title: format!("NDVI {}", selection.collection.id),
            collection: selection.backend.collection.clone(),
            spatial_extent: selection.spatial_extent(),
            start: selection.extent.start,
            end: selection.extent.end,
            red: selection.backend.red.clone(),
            nir: selection.backend.nir.clone(),
            format: selection.backend.format.clone(),
        }
    }

    /// `load_collection -> ndvi -> save_result`
    pub fn process_graph(&self) -> Value {
        let bbox = &self.spatial_extent;
        json!({
            "load": {
                "process_id": "load_collection",
                "arguments": {
                    "id": self.collection,
                    "spatial_extent": {
                        "west": bbox.west,
                        "south": bbox.south,
                        "east": bbox.east,
                        "north": bbox.north,
                    },
                    "temporal_extent": [
                        self.start.format("%Y-%m-%d").to_string(),
                        self.end.format("%Y-%m-%d").to_string(),
                    ],
                    "bands": [self.red, self.nir],
                },
            },
            "ndvi": {
                "process_id": "ndvi",
                "arguments": {
                    "data": { "from_node": "load" },
                    "red": self.red,
                    "nir": self.nir,
                },
            },
            "save": {
                "process_id": "save_result",
                "arguments": {
                    "data": { "from_node": "ndvi" },
                    "format": self.format,
                },
                "result": true,
            },
        })
    }

    pub fn job_body(&self) -> Value {
        json!({
            "title": self.title,
            "process": { "process_graph": self.process_graph() },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Created,
    Queued,
    Running,
    Canceled,
    Finished,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultAsset {
    pub name: String,
    pub href: String,
    pub media_type: Option<String>,
}

/// Files produced by a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSet {
    pub job_id: String,
    pub assets: Vec<ResultAsset>,
}

impl ResultSet {
    /// Reads the asset list of a job result document (a STAC Item or Collection).
    pub fn from_stac(job_id: &str, document: &Value) -> Result<Self> {
        let assets = document
            .get("assets")
            .and_then(|a| a.as_object())
            .ok_or_else(|| {
                CatalogError::RemoteJob(format!("results of job {job_id} list no assets"))
            })?;

        let assets = assets
            .iter()
            .filter_map(|(name, asset)| {
                Some(ResultAsset {
                    name: name.to_owned(),
                    href: asset.get("href")?.as_str()?.to_owned(),
                    media_type: asset
                        .get("type")
                        .and_then(|t| t.as_str())
                        .map(|t| t.to_owned()),
                })
            })
            .collect();

        Ok(Self {
            job_id: job_id.to_owned(),
            assets,
        })
    }

    pub fn download_plan(&self, output_dir: &Path) -> DownloadPlan {
        let tasks = self
            .assets
            .iter()
            .map(|asset| {
                // Asset names are file names, but never trust them with directories.
                let file_name = Path::new(&asset.name)
                    .file_name()
                    .map(|f| f.to_os_string())
                    .unwrap_or_else(|| asset.name.clone().into());
                let output = output_dir.join(file_name);
                DownloadTask::new(&asset.href, &output.to_string_lossy())
            })
            .collect();
        DownloadPlan::new(&self.job_id, tasks)
    }

    /// Downloads every asset into `output_dir`, keeping the plan next to the
    /// files as `download_plan.json`.
    pub async fn download_to(
        &self,
        source: &impl AssetSource,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let plan = self.download_plan(output_dir);
        std::fs::create_dir_all(output_dir)?;
        plan.write(output_dir.join(DOWNLOAD_PLAN_FILE))?;
        plan.execute(source).await
    }
}

pub trait ProcessingService {
    /// Creates the batch job and queues it for processing.
    async fn submit_job(&self, request: &JobRequest) -> Result<JobHandle>;

    async fn job_status(&self, job: &JobHandle) -> Result<JobStatus>;

    async fn job_results(&self, job: &JobHandle) -> Result<ResultSet>;
}

/// Polls `job` every `poll_interval` until it finishes. A failed or canceled
/// job, or one still unfinished after `max_wait`, is a [`CatalogError::RemoteJob`].
pub async fn wait_until_done(
    service: &impl ProcessingService,
    job: &JobHandle,
    poll_interval: Duration,
    max_wait: Duration,
) -> Result<ResultSet> {
    let started = Instant::now();
    let mut last_status = None;

    loop {
        let status = service.job_status(job).await?;
        if last_status != Some(status) {
            info!("Job {} is {:?}", job.id, status);
            last_status = Some(status);
        }

        match status {
            JobStatus::Finished => return service.job_results(job).await,
            JobStatus::Error | JobStatus::Canceled => {
                return Err(CatalogError::RemoteJob(format!(
                    "job {} ended with status {:?}",
                    job.id, status
                )))
            }
            JobStatus::Created | JobStatus::Queued | JobStatus::Running => {}
        }

        if started.elapsed() >= max_wait {
            return Err(CatalogError::RemoteJob(format!(
                "job {} not finished after {}s",
                job.id,
                max_wait.as_secs()
            )));
        }
        sleep(poll_interval).await;
    }
}

/// Submits the NDVI job described by `selection`, waits for it and downloads
/// its results into `output_dir`.
pub async fn fetch_ndvi<S>(
    service: &S,
    selection: &ImageSelection,
    output_dir: &Path,
) -> Result<Vec<PathBuf>>
where
    S: ProcessingService + AssetSource,
{
    let request = JobRequest::from_selection(selection);
    let job = service.submit_job(&request).await?;
    info!("Submitted job {}", job.id);

    let results = wait_until_done(
        service,
        &job,
        Duration::from_secs(selection.backend.poll_interval_secs),
        Duration::from_secs(selection.backend.max_wait_secs),
    )
    .await?;

    results.download_to(service, output_dir).await
}
