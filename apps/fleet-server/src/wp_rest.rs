//! Thin client for a site's `wp/v2/plugins` REST surface.

use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::artifacts::Artifact;
use crate::executor::ExecError;

pub(crate) const PLUGINS_PATH: &str = "/wp-json/wp/v2/plugins";

/// One entry of the site's installed plugin list.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RemotePlugin {
    /// Site-local identifier, e.g. `akismet/akismet`.
    pub plugin: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub textdomain: Option<String>,
}

/// How closely a site-local plugin path matches a catalog slug. Variants
/// are ordered strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum SlugMatch {
    ExactPath,
    Directory,
    FileStem,
    TextDomain,
}

impl RemotePlugin {
    pub fn is_active(&self) -> bool {
        matches!(self.status.as_str(), "active" | "network-active")
    }

    pub fn slug_match(&self, slug: &str) -> Option<SlugMatch> {
        let path = self.plugin.trim_matches('/');
        if path == slug {
            return Some(SlugMatch::ExactPath);
        }
        if path.split('/').next() == Some(slug) {
            return Some(SlugMatch::Directory);
        }
        let file = path.rsplit('/').next().unwrap_or_default();
        if file.strip_suffix(".php").unwrap_or(file) == slug {
            return Some(SlugMatch::FileStem);
        }
        (self.textdomain.as_deref() == Some(slug)).then_some(SlugMatch::TextDomain)
    }
}

/// Best match for `slug` across the whole list; list order only breaks
/// ties within the same rank.
pub(crate) fn best_match(plugins: Vec<RemotePlugin>, slug: &str) -> Option<RemotePlugin> {
    plugins
        .into_iter()
        .enumerate()
        .filter_map(|(idx, p)| p.slug_match(slug).map(|rank| ((rank, idx), p)))
        .min_by_key(|(key, _)| *key)
        .map(|(_, p)| p)
}

/// What the site reported after accepting an upload.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct InstallReceipt {
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

pub(crate) struct WpRestClient<'a> {
    http: &'a reqwest::Client,
    base: &'a str,
    token: &'a str,
}

impl<'a> WpRestClient<'a> {
    pub fn new(http: &'a reqwest::Client, base: &'a str, token: &'a str) -> Self {
        Self { http, base, token }
    }

    fn collection_url(&self) -> Result<url::Url, ExecError> {
        let raw = format!("{}{}", self.base.trim_end_matches('/'), PLUGINS_PATH);
        url::Url::parse(&raw).map_err(|e| ExecError::Transport(format!("site url {raw}: {e}")))
    }

    fn item_url(&self, plugin: &str) -> Result<url::Url, ExecError> {
        let mut url = self.collection_url()?;
        url.path_segments_mut()
            .map_err(|_| ExecError::Transport(format!("site url {} cannot be a base", self.base)))?
            .extend(plugin.trim_matches('/').split('/'));
        Ok(url)
    }

    pub async fn list_plugins(&self) -> Result<Vec<RemotePlugin>, ExecError> {
        let resp = self
            .http
            .get(self.collection_url()?)
            .bearer_auth(self.token)
            .query(&[("context", "edit")])
            .send()
            .await
            .map_err(ExecError::transport)?;
        let resp = ensure_success(resp).await?;
        resp.json::<Vec<RemotePlugin>>()
            .await
            .map_err(|e| ExecError::InvalidResponse(format!("plugin list: {e}")))
    }

    pub async fn find(&self, slug: &str) -> Result<Option<RemotePlugin>, ExecError> {
        Ok(best_match(self.list_plugins().await?, slug))
    }

    pub async fn upload(&self, artifact: Artifact) -> Result<InstallReceipt, ExecError> {
        let part = reqwest::multipart::Part::bytes(artifact.bytes.to_vec())
            .file_name(artifact.file_name)
            .mime_str("application/zip")
            .map_err(ExecError::transport)?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let resp = self
            .http
            .post(self.collection_url()?)
            .bearer_auth(self.token)
            .multipart(form)
            .send()
            .await
            .map_err(ExecError::transport)?;
        let resp = ensure_success(resp).await?;
        let body = resp.bytes().await.map_err(ExecError::transport)?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(InstallReceipt::default());
        }
        serde_json::from_slice(&body)
            .map_err(|e| ExecError::InvalidResponse(format!("install response: {e}")))
    }

    pub async fn set_status(&self, plugin: &str, status: &str) -> Result<(), ExecError> {
        let resp = self
            .http
            .put(self.item_url(plugin)?)
            .bearer_auth(self.token)
            .json(&json!({ "status": status }))
            .send()
            .await
            .map_err(ExecError::transport)?;
        ensure_success(resp).await.map(drop)
    }

    pub async fn delete(&self, plugin: &str) -> Result<(), ExecError> {
        let resp = self
            .http
            .delete(self.item_url(plugin)?)
            .bearer_auth(self.token)
            .send()
            .await
            .map_err(ExecError::transport)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ExecError::NotFound(plugin.to_string()));
        }
        ensure_success(resp).await.map(drop)
    }
}

/// Map a non-2xx response onto a rejection carrying the site's own words.
pub(crate) async fn ensure_success(resp: Response) -> Result<Response, ExecError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let raw = resp.text().await.unwrap_or_default();
    Err(ExecError::RemoteRejection {
        status: status.as_u16(),
        message: rejection_message(status, &raw),
    })
}

fn rejection_message(status: StatusCode, raw: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
        if let Some(Value::String(message)) = map.get("message") {
            if !message.is_empty() {
                return message.clone();
            }
        }
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(plugin: &str, textdomain: Option<&str>) -> RemotePlugin {
        RemotePlugin {
            plugin: plugin.into(),
            status: "inactive".into(),
            textdomain: textdomain.map(str::to_string),
        }
    }

    #[test]
    fn slug_match_ranks() {
        assert_eq!(remote("forms", None).slug_match("forms"), Some(SlugMatch::ExactPath));
        assert_eq!(
            remote("forms/forms-main", None).slug_match("forms"),
            Some(SlugMatch::Directory)
        );
        assert_eq!(remote("hello.php", None).slug_match("hello"), Some(SlugMatch::FileStem));
        assert_eq!(
            remote("vendor-pack/seo", None).slug_match("seo"),
            Some(SlugMatch::FileStem)
        );
        assert_eq!(
            remote("wp-seo/wp-seo-main", Some("seo")).slug_match("seo"),
            Some(SlugMatch::TextDomain)
        );
        assert_eq!(remote("forms-pro/forms-pro", Some("forms-pro")).slug_match("forms"), None);
    }

    #[test]
    fn weak_match_listed_first_loses_to_directory_match() {
        let list = vec![
            remote("all-in-one-seo/seo", None),
            remote("wp-seo/wp-seo", Some("seo")),
            remote("seo/seo-main", None),
        ];
        let found = best_match(list, "seo").expect("match");
        assert_eq!(found.plugin, "seo/seo-main");

        let list = vec![remote("wp-seo/wp-seo", Some("seo")), remote("all-in-one-seo/seo", None)];
        assert_eq!(best_match(list, "seo").expect("match").plugin, "all-in-one-seo/seo");

        assert!(best_match(vec![remote("other/other", None)], "seo").is_none());
    }

    #[test]
    fn rejection_prefers_wordpress_message() {
        let msg = rejection_message(
            StatusCode::FORBIDDEN,
            r#"{"code":"rest_cannot_manage_plugins","message":"Sorry, you are not allowed to manage plugins for this site."}"#,
        );
        assert_eq!(
            msg,
            "Sorry, you are not allowed to manage plugins for this site."
        );
        assert_eq!(
            rejection_message(StatusCode::BAD_GATEWAY, "upstream down\n"),
            "upstream down"
        );
        assert_eq!(
            rejection_message(StatusCode::INTERNAL_SERVER_ERROR, ""),
            "HTTP 500"
        );
    }
}
