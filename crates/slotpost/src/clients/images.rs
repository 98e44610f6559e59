use assembly::{CollaboratorError, ImageSource};
use async_trait::async_trait;

use super::{request_error, status_error};

const SERVICE: &str = "images";

/// Fetches `http(s)://` URLs over HTTP and anything else from local disk.
pub struct HttpImageSource {
    client: reqwest::Client,
}

impl HttpImageSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, CollaboratorError> {
        if !is_remote(url) {
            return tokio::fs::read(url)
                .await
                .map_err(|e| CollaboratorError::request(SERVICE, format!("{url}: {e}")));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| request_error(SERVICE, e))?;
        if !response.status().is_success() {
            return Err(status_error(SERVICE, response).await);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| request_error(SERVICE, e))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promo.png");
        std::fs::write(&path, b"\x89PNG").unwrap();

        let source = HttpImageSource::new(reqwest::Client::new());
        let bytes = source.fetch(path.to_str().unwrap()).await.unwrap();
        assert_eq!(bytes, b"\x89PNG");
        assert!(source.fetch("/definitely/missing.png").await.is_err());
    }

    #[test]
    fn scheme_detection() {
        assert!(is_remote("https://images.igdb.com/x.jpg"));
        assert!(!is_remote("assets/promo.png"));
    }
}
