use super::{JobHandle, JobRequest, JobStatus, ProcessingService, ResultSet};
use crate::download_plan::AssetSource;
use crate::error::{CatalogError, Result};
use crate::image_selection::ImageSelection;
use log::{debug, warn};
use reqwest::header::{CONTENT_LENGTH, LOCATION, RANGE};
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::Write;
use url::Url;

const ACCESS_TOKEN_VAR: &str = "OPENEO_ACCESS_TOKEN";
const JOB_ID_HEADER: &str = "OpenEO-Identifier";

pub struct OpenEo {
    client: Client,
    base_url: Url,
    bearer: Option<String>,
}

#[derive(Deserialize)]
struct JobDescription {
    status: JobStatus,
}

impl OpenEo {
    /// `access_token` is sent as `oidc/<auth_provider>/<token>`, or as-is without a provider.
    pub fn new(
        base_url: &str,
        auth_provider: Option<&str>,
        access_token: Option<&str>,
    ) -> Result<Self> {
        // Joining relative paths onto the base only keeps its last segment with a trailing slash.
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{base_url}/"))?
        };
        let bearer = access_token.map(|token| match auth_provider {
            Some(provider) => format!("oidc/{provider}/{token}"),
            None => token.to_string(),
        });
        Ok(Self {
            client: Client::new(),
            base_url,
            bearer,
        })
    }

    /// Back-end from the selection, authenticated with `$OPENEO_ACCESS_TOKEN` when set.
    pub fn from_selection(selection: &ImageSelection) -> Result<Self> {
        let token = std::env::var(ACCESS_TOKEN_VAR).ok();
        if token.is_none() {
            warn!("{} is not set; requests are unauthenticated", ACCESS_TOKEN_VAR);
        }
        Self::new(
            &selection.backend.url,
            selection.backend.auth_provider.as_deref(),
            token.as_deref(),
        )
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.bearer {
            Some(bearer) => request.bearer_auth(bearer),
            None => request,
        }
    }
}

fn job_id_from_location(location: &str) -> Option<String> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string())
}

impl ProcessingService for OpenEo {
    async fn submit_job(&self, request: &JobRequest) -> Result<JobHandle> {
        let response = self
            .request(Method::POST, self.url("jobs")?)
            .json(&request.job_body())
            .send()
            .await?
            .error_for_status()?;

        let headers = response.headers();
        let id = headers
            .get(JOB_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .or_else(|| {
                headers
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(job_id_from_location)
            })
            .ok_or_else(|| CatalogError::RemoteJob("back-end returned no job id".to_string()))?;

        let job = JobHandle { id };
        self.request(Method::POST, self.url(&format!("jobs/{}/results", job.id))?)
            .send()
            .await?
            .error_for_status()?;
        Ok(job)
    }

    async fn job_status(&self, job: &JobHandle) -> Result<JobStatus> {
        let description: JobDescription = self
            .request(Method::GET, self.url(&format!("jobs/{}", job.id))?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(description.status)
    }

    async fn job_results(&self, job: &JobHandle) -> Result<ResultSet> {
        let document: Value = self
            .request(Method::GET, self.url(&format!("jobs/{}/results", job.id))?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        ResultSet::from_stac(&job.id, &document)
    }
}

// Result hrefs are usually signed URLs on another host, so no credentials are attached.
impl AssetSource for OpenEo {
    async fn content_length(&self, href: &str) -> Result<Option<u64>> {
        let response = self.client.head(href).send().await?.error_for_status()?;
        let length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        Ok(length)
    }

    async fn copy_range(&self, href: &str, start: u64, output: &mut File) -> Result<u64> {
        let mut request = self.client.get(href);
        if start > 0 {
            request = request.header(RANGE, format!("bytes={}-", start));
        }
        let mut response = request.send().await?.error_for_status()?;
        if start > 0 && response.status() != reqwest::StatusCode::PARTIAL_CONTENT {
            return Err(CatalogError::RemoteJob(format!(
                "{href} does not support resuming downloads"
            )));
        }

        let mut byte_count = 0_u64;
        while let Some(bytes) = response.chunk().await? {
            output.write_all(&bytes)?;
            byte_count += bytes.len() as u64;
        }
        debug!("Received {} bytes from {}", byte_count, href);
        Ok(byte_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let backend = OpenEo::new("https://openeo.example/openeo/1.2", None, None).unwrap();
        assert_eq!(
            backend.url("jobs").unwrap().as_str(),
            "https://openeo.example/openeo/1.2/jobs"
        );
        assert_eq!(
            backend.url("jobs/j-1/results").unwrap().as_str(),
            "https://openeo.example/openeo/1.2/jobs/j-1/results"
        );
    }

    #[test]
    fn test_bearer() {
        let backend = OpenEo::new("https://openeo.example/", Some("CDSE"), Some("abc")).unwrap();
        assert_eq!(backend.bearer.as_deref(), Some("oidc/CDSE/abc"));

        let backend = OpenEo::new("https://openeo.example/", None, Some("basic//xyz")).unwrap();
        assert_eq!(backend.bearer.as_deref(), Some("basic//xyz"));

        let backend = OpenEo::new("https://openeo.example/", Some("CDSE"), None).unwrap();
        assert!(backend.bearer.is_none());
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            OpenEo::new("not a url", None, None),
            Err(CatalogError::Url(_))
        ));
    }

    #[test]
    fn test_job_id_from_location() {
        assert_eq!(
            job_id_from_location("https://openeo.example/openeo/1.2/jobs/j-2401"),
            Some("j-2401".to_string())
        );
        assert_eq!(job_id_from_location("/jobs/j-2401/"), Some("j-2401".to_string()));
        assert_eq!(job_id_from_location(""), None);
    }
}
