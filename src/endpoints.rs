//! URL derivation for the request API and the WebSocket channels
//!
//! Both are derived from one HTTP(S) origin: `http://host/api/...` for
//! requests and `ws://host/ws/...` for channels (https maps to wss).

use url::Url;

use crate::error::{Error, Result};

/// Base URLs for requests and channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    api_base: Url,
    ws_base: Url,
}

impl Endpoints {
    pub fn new(base_url: &str, api_path: &str, ws_path: &str) -> Result<Self> {
        let origin = Url::parse(base_url).map_err(|e| Error::invalid_url(base_url, e))?;

        let ws_scheme = match origin.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(Error::invalid_url(
                    base_url,
                    format!("unsupported scheme '{}'", other),
                ))
            }
        };

        let api_base = join_path(&origin, api_path)?;
        let mut ws_base = join_path(&origin, ws_path)?;
        ws_base
            .set_scheme(ws_scheme)
            .map_err(|_| Error::invalid_url(base_url, "cannot derive WebSocket scheme"))?;

        Ok(Self { api_base, ws_base })
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    pub fn ws_base(&self) -> &Url {
        &self.ws_base
    }

    /// `<api_base><endpoint>`; `endpoint` normally starts with `/`
    pub fn api_url(&self, endpoint: &str) -> std::result::Result<Url, url::ParseError> {
        let base = self.api_base.as_str().trim_end_matches('/');
        if endpoint.starts_with('/') {
            Url::parse(&format!("{}{}", base, endpoint))
        } else {
            Url::parse(&format!("{}/{}", base, endpoint))
        }
    }

    /// `ws(s)://<host>/ws/tasks/<task_id>`
    pub fn task_channel_url(&self, task_id: &str) -> Url {
        self.channel_url(&["tasks", task_id])
    }

    /// `ws(s)://<host>/ws/system`
    pub fn system_channel_url(&self) -> Url {
        self.channel_url(&["system"])
    }

    fn channel_url(&self, segments: &[&str]) -> Url {
        let mut url = self.ws_base.clone();
        // ws_base always has a hierarchical http-derived path, so this cannot fail
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

fn join_path(origin: &Url, path: &str) -> Result<Url> {
    let mut url = origin.clone();
    let trimmed = path.trim_end_matches('/');
    let full = if trimmed.starts_with('/') || trimmed.is_empty() {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };
    url.set_path(&full);
    url.set_query(None);
    url.set_fragment(None);

    if url.cannot_be_a_base() {
        return Err(Error::invalid_url(origin.as_str(), "URL cannot be a base"));
    }
    Ok(url)
}
