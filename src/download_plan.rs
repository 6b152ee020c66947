use crate::error::Result;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Somewhere result files can be fetched from, possibly in parts.
pub trait AssetSource {
    /// Size of the remote file, when the server reports one.
    async fn content_length(&self, href: &str) -> Result<Option<u64>>;

    /// Appends the bytes of `href` from offset `start` to the end of the file to
    /// `output` and returns how many were written.
    async fn copy_range(&self, href: &str, start: u64, output: &mut File) -> Result<u64>;
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct DownloadTask {
    href: String,
    output: String,
}

impl DownloadTask {
    pub fn new(href: &str, output: &str) -> Self {
        DownloadTask {
            href: href.to_string(),
            output: output.to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct DownloadPlan {
    job_id: String,
    tasks: Vec<DownloadTask>,
}

impl DownloadPlan {
    pub fn new(job_id: &str, tasks: Vec<DownloadTask>) -> Self {
        Self {
            job_id: job_id.to_string(),
            tasks,
        }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let plan: Self = serde_json::from_str(&content)?;
        Ok(plan)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn outputs(&self) -> Vec<PathBuf> {
        self.tasks.iter().map(|t| PathBuf::from(&t.output)).collect()
    }

    /// Downloads every task in order and returns the output paths.
    pub async fn execute(&self, source: &impl AssetSource) -> Result<Vec<PathBuf>> {
        for task in self.tasks.iter() {
            debug!("Current task: {:?}", task);
            try_download(source, &task.href, &task.output).await?;
        }
        Ok(self.outputs())
    }
}

pub async fn try_download(source: &impl AssetSource, href: &str, output: &str) -> Result<()> {
    // Check if the output file already exists; return early if so
    let dst = Path::new(output);
    if dst.exists() {
        info!("{} already exists", output);
        return Ok(());
    }

    if let Some(parent_dir) = dst.parent() {
        fs::create_dir_all(parent_dir)?;
    }

    // Check if partial file exists and get its size
    let partial = format!("{}.partial", output);
    let mut partial_file = OpenOptions::new()
        .read(true)
        .create(true)
        .append(true)
        .open(&partial)?;
    let mut byte_count = partial_file.metadata()?.len();

    match source.content_length(href).await? {
        Some(total_size) if byte_count > 0 && byte_count < total_size => {
            let progress = (byte_count as f64 / total_size as f64) * 100.;
            info!("Resuming {} from {:.2}% completion", output, progress);
            byte_count += source.copy_range(href, byte_count, &mut partial_file).await?;
        }
        Some(total_size) if byte_count == total_size && total_size > 0 => {
            debug!("{} already complete", partial);
        }
        _ => {
            // Unknown size or a partial file that does not match: start over.
            partial_file.set_len(0)?;
            info!("Downloading {}", href);
            byte_count = source.copy_range(href, 0, &mut partial_file).await?;
        }
    }

    info!("Download complete: {} ({} bytes)", output, byte_count);
    // Rename the file to remove .partial suffix
    drop(partial_file);
    fs::rename(partial, dst)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openeo::fixtures::MockBackend;
    use crate::openeo::JobStatus;

    const HREF: &str = "https://results.example/openEO_2024-01-03Z.tif";

    fn mock_download_plan(dir: &Path) -> DownloadPlan {
        DownloadPlan {
            job_id: "j-2401".to_string(),
            tasks: vec![
                DownloadTask {
                    href: "https://results.example/openEO_2024-01-01Z.tif".to_string(),
                    output: dir.join("openEO_2024-01-01Z.tif").to_string_lossy().into(),
                },
                DownloadTask {
                    href: HREF.to_string(),
                    output: dir.join("openEO_2024-01-03Z.tif").to_string_lossy().into(),
                },
            ],
        }
    }

    #[test]
    fn test_write_and_read_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download_plan.json");
        let plan = mock_download_plan(dir.path());
        plan.write(&path).unwrap();
        assert_eq!(path.exists(), true);

        let read = DownloadPlan::read(&path).unwrap();
        assert_eq!(read.tasks.len(), 2);
        assert_eq!(read, plan);
    }

    #[tokio::test]
    async fn test_execute() {
        let backend = MockBackend::new(
            &[JobStatus::Finished],
            &[
                ("https://results.example/openEO_2024-01-01Z.tif", b"first"),
                (HREF, b"second"),
            ],
        );
        let dir = tempfile::tempdir().unwrap();
        let outputs = mock_download_plan(dir.path()).execute(&backend).await.unwrap();

        assert_eq!(fs::read(&outputs[0]).unwrap(), b"first");
        assert_eq!(fs::read(&outputs[1]).unwrap(), b"second");
        assert!(!dir.path().join("openEO_2024-01-03Z.tif.partial").exists());
    }

    #[tokio::test]
    async fn test_resume_partial_download() {
        let backend = MockBackend::new(&[JobStatus::Finished], &[(HREF, b"0123456789")]);
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("openEO_2024-01-03Z.tif");
        fs::write(dir.path().join("openEO_2024-01-03Z.tif.partial"), b"0123").unwrap();

        try_download(&backend, HREF, &output.to_string_lossy())
            .await
            .unwrap();

        assert_eq!(fs::read(&output).unwrap(), b"0123456789");
        assert_eq!(
            backend.range_requests.borrow().as_slice(),
            &[(HREF.to_string(), 4)]
        );
    }

    #[tokio::test]
    async fn test_existing_output_is_kept() {
        let backend = MockBackend::new(&[JobStatus::Finished], &[(HREF, b"new")]);
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("openEO_2024-01-03Z.tif");
        fs::write(&output, b"old").unwrap();

        try_download(&backend, HREF, &output.to_string_lossy())
            .await
            .unwrap();

        assert_eq!(fs::read(&output).unwrap(), b"old");
        assert!(backend.range_requests.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_partial_restarts() {
        let backend = MockBackend::new(&[JobStatus::Finished], &[(HREF, b"abc")]);
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("openEO_2024-01-03Z.tif");
        fs::write(dir.path().join("openEO_2024-01-03Z.tif.partial"), b"stale bytes").unwrap();

        try_download(&backend, HREF, &output.to_string_lossy())
            .await
            .unwrap();

        assert_eq!(fs::read(&output).unwrap(), b"abc");
    }
}
