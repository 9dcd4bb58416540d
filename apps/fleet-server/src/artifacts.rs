use bytes::Bytes;
use url::Url;

use crate::executor::ExecError;
use crate::wp_rest::ensure_success;

/// A downloaded plugin package ready for upload.
#[derive(Debug, Clone)]
pub(crate) struct Artifact {
    pub file_name: String,
    pub bytes: Bytes,
}

/// Storage access for plugin packages.
#[derive(Clone)]
pub(crate) struct ArtifactStore {
    http: reqwest::Client,
    base: Option<Url>,
}

impl ArtifactStore {
    pub fn new(http: reqwest::Client, base: Option<Url>) -> Self {
        Self { http, base }
    }

    /// Absolute `http(s)` URLs are used as-is; anything else is joined
    /// onto the storage base.
    pub fn resolve(&self, file_url: &str) -> Result<Url, ExecError> {
        let trimmed = file_url.trim();
        if trimmed.is_empty() {
            return Err(ExecError::Artifact("empty file_url".into()));
        }
        if let Ok(url) = Url::parse(trimmed) {
            return match url.scheme() {
                "http" | "https" => Ok(url),
                other => Err(ExecError::Artifact(format!(
                    "unsupported artifact scheme {other}"
                ))),
            };
        }
        let base = self.base.as_ref().ok_or_else(|| {
            ExecError::Artifact(format!(
                "relative file_url {trimmed} requires FLEET_STORAGE_BASE_URL"
            ))
        })?;
        base.join(trimmed.trim_start_matches('/'))
            .map_err(|e| ExecError::Artifact(format!("join {trimmed}: {e}")))
    }

    pub async fn fetch(&self, file_url: &str) -> Result<Artifact, ExecError> {
        let url = self.resolve(file_url)?;
        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ExecError::Artifact(format!("fetch {url}: {e}")))?;
        let resp = ensure_success(resp).await.map_err(|e| {
            ExecError::Artifact(format!("fetch {url}: {e}"))
        })?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ExecError::Artifact(format!("read {url}: {e}")))?;
        if bytes.is_empty() {
            return Err(ExecError::Artifact(format!("{url} returned an empty package")));
        }
        Ok(Artifact {
            file_name: file_name_of(&url),
            bytes,
        })
    }
}

fn file_name_of(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segs| segs.next_back())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "plugin.zip".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(base: Option<&str>) -> ArtifactStore {
        ArtifactStore::new(
            reqwest::Client::new(),
            base.map(|b| Url::parse(b).expect("base")),
        )
    }

    #[test]
    fn absolute_urls_pass_through() {
        let url = store(None)
            .resolve("https://cdn.example/forms-2.0.zip")
            .expect("absolute");
        assert_eq!(url.as_str(), "https://cdn.example/forms-2.0.zip");
        assert!(store(None).resolve("ftp://cdn.example/x.zip").is_err());
    }

    #[test]
    fn relative_urls_join_storage_base() {
        let s = store(Some("https://storage.example/plugins/"));
        let url = s.resolve("/team-1/forms-2.0.zip").expect("relative");
        assert_eq!(
            url.as_str(),
            "https://storage.example/plugins/team-1/forms-2.0.zip"
        );
        assert_eq!(file_name_of(&url), "forms-2.0.zip");
    }

    #[test]
    fn relative_url_without_base_is_an_artifact_error() {
        let err = store(None).resolve("forms.zip").unwrap_err();
        assert!(matches!(err, ExecError::Artifact(_)));
    }
}
