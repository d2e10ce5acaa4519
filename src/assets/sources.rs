//! External image sources
//! Each source turns a text query into at most one validated image payload.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use futures_util::StreamExt;
use reqwest::{redirect, Client, Url};
use serde::Deserialize;
use serde_json::json;

use super::query::{detect_container, is_forbidden, ImageContainer};
use crate::config::SourcesConfig;
use crate::types::{AspectRatio, AssetSource};

/// A validated image payload
#[derive(Debug)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub container: ImageContainer,
}

/// Curated stock photo API (Pexels)
pub struct StockPhotoSource {
    api_key: Option<String>,
    endpoint: String,
}

/// Keyword image endpoint (LoremFlickr)
pub struct WebImageSource {
    endpoint: String,
}

/// AI image generation: OpenAI when keyed, Pollinations otherwise
pub struct GeneratedImageSource {
    openai_key: Option<String>,
    openai_endpoint: String,
    pollinations_endpoint: String,
}

/// Wrapper enum for the image source chain
pub enum SourceClient {
    Stock(StockPhotoSource),
    Web(WebImageSource),
    Generated(GeneratedImageSource),
}

#[derive(Deserialize)]
struct PexelsResponse {
    #[serde(default)]
    photos: Vec<PexelsPhoto>,
}

#[derive(Deserialize)]
struct PexelsPhoto {
    src: PexelsSrc,
}

#[derive(Deserialize)]
struct PexelsSrc {
    large2x: Option<String>,
    original: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiImageResponse {
    #[serde(default)]
    data: Vec<OpenAiImage>,
}

#[derive(Deserialize)]
struct OpenAiImage {
    b64_json: Option<String>,
    url: Option<String>,
}

impl SourceClient {
    /// The prioritized chain: stock, web search, generation
    pub fn default_chain(config: &SourcesConfig) -> Vec<SourceClient> {
        vec![
            SourceClient::Stock(StockPhotoSource {
                api_key: config.pexels_api_key.clone(),
                endpoint: config.pexels_url.clone(),
            }),
            SourceClient::Web(WebImageSource {
                endpoint: config.web_search_url.clone(),
            }),
            SourceClient::Generated(GeneratedImageSource {
                openai_key: config.openai_api_key.clone(),
                openai_endpoint: config.openai_url.clone(),
                pollinations_endpoint: config.pollinations_url.clone(),
            }),
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            SourceClient::Stock(_) => "stock",
            SourceClient::Web(_) => "web",
            SourceClient::Generated(_) => "generated",
        }
    }

    pub fn asset_source(&self) -> AssetSource {
        match self {
            SourceClient::Stock(_) => AssetSource::StockSearch,
            SourceClient::Web(_) => AssetSource::WebSearch,
            SourceClient::Generated(_) => AssetSource::AIGenerated,
        }
    }

    pub async fn fetch(
        &self,
        client: &Client,
        query: &str,
        aspect: AspectRatio,
        config: &SourcesConfig,
    ) -> Result<ImagePayload> {
        if query.trim().is_empty() {
            return Err(anyhow!("empty query"));
        }
        match self {
            SourceClient::Stock(source) => source.fetch(client, query, aspect, config).await,
            SourceClient::Web(source) => source.fetch(client, query, aspect, config).await,
            SourceClient::Generated(source) => source.fetch(client, query, aspect, config).await,
        }
    }
}

impl StockPhotoSource {
    async fn fetch(
        &self,
        client: &Client,
        query: &str,
        aspect: AspectRatio,
        config: &SourcesConfig,
    ) -> Result<ImagePayload> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("no Pexels API key configured"))?;

        let resp = client
            .get(&self.endpoint)
            .header("Authorization", key)
            .query(&[
                ("query", query),
                ("per_page", "1"),
                ("orientation", aspect.orientation()),
            ])
            .send()
            .await
            .context("Pexels search request failed")?;

        if !resp.status().is_success() {
            return Err(anyhow!("Pexels API failed with status {}", resp.status()));
        }

        let body: PexelsResponse = resp.json().await.context("Invalid Pexels response")?;
        let photo = body
            .photos
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no stock photos found for '{}'", query))?;
        let image_url = photo
            .src
            .large2x
            .or(photo.src.original)
            .ok_or_else(|| anyhow!("stock photo has no source URL"))?;

        let url = Url::parse(&image_url).context("Invalid stock photo URL")?;
        download_image(client, url, config).await
    }
}

impl WebImageSource {
    async fn fetch(
        &self,
        client: &Client,
        query: &str,
        aspect: AspectRatio,
        config: &SourcesConfig,
    ) -> Result<ImagePayload> {
        let (w, h) = aspect.dimensions();
        let tags = query.split_whitespace().collect::<Vec<_>>().join(",");

        let mut url = Url::parse(&self.endpoint).context("Invalid web search endpoint")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("web search endpoint cannot take a path"))?
            .pop_if_empty()
            .push(&w.to_string())
            .push(&h.to_string())
            .push(&tags);

        download_image(client, url, config).await
    }
}

impl GeneratedImageSource {
    async fn fetch(
        &self,
        client: &Client,
        query: &str,
        aspect: AspectRatio,
        config: &SourcesConfig,
    ) -> Result<ImagePayload> {
        if let Some(key) = &self.openai_key {
            match self.fetch_openai(client, key, query, aspect, config).await {
                Ok(payload) => return Ok(payload),
                Err(e) => log::warn!("OpenAI image generation failed: {:#}", e),
            }
        }
        self.fetch_pollinations(client, query, aspect, config).await
    }

    async fn fetch_openai(
        &self,
        client: &Client,
        key: &str,
        prompt: &str,
        aspect: AspectRatio,
        config: &SourcesConfig,
    ) -> Result<ImagePayload> {
        let size = match aspect {
            AspectRatio::Wide => "1792x1024",
            AspectRatio::Tall => "1024x1792",
        };
        let payload = json!({
            "model": "dall-e-3",
            "prompt": prompt,
            "n": 1,
            "size": size,
            "quality": "standard",
            "response_format": "b64_json",
        });

        let resp = client
            .post(&self.openai_endpoint)
            .bearer_auth(key)
            .json(&payload)
            .send()
            .await
            .context("OpenAI image request failed")?;

        if !resp.status().is_success() {
            return Err(anyhow!("OpenAI API failed with status {}", resp.status()));
        }

        let body: OpenAiImageResponse = resp.json().await.context("Invalid OpenAI response")?;
        let image = body
            .data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("OpenAI returned no images"))?;

        if let Some(b64) = image.b64_json {
            let bytes = general_purpose::STANDARD
                .decode(b64.trim())
                .context("Invalid base64 image from OpenAI")?;
            return validate_payload(bytes, config);
        }
        let url = image
            .url
            .ok_or_else(|| anyhow!("OpenAI image has neither data nor URL"))?;
        download_image(client, Url::parse(&url)?, config).await
    }

    async fn fetch_pollinations(
        &self,
        client: &Client,
        prompt: &str,
        aspect: AspectRatio,
        config: &SourcesConfig,
    ) -> Result<ImagePayload> {
        let (w, h) = aspect.dimensions();
        let seed = chrono::Utc::now().timestamp().to_string();

        let mut url =
            Url::parse(&self.pollinations_endpoint).context("Invalid Pollinations endpoint")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Pollinations endpoint cannot take a path"))?
            .pop_if_empty()
            .push(prompt);
        url.query_pairs_mut()
            .append_pair("width", &w.to_string())
            .append_pair("height", &h.to_string())
            .append_pair("nologo", "true")
            .append_pair("seed", &seed);

        download_image(client, url, config).await
    }
}

const MAX_REDIRECTS: usize = 10;

/// Redirects to a denylisted host are not followed
pub fn redirect_policy(denylist: &[String]) -> redirect::Policy {
    let denylist = denylist.to_vec();
    redirect::Policy::custom(move |attempt| {
        if is_forbidden(attempt.url(), &denylist) {
            attempt.stop()
        } else if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else {
            attempt.follow()
        }
    })
}

/// Download an image URL: denylist check, status, size cap, signature check
pub async fn download_image(
    client: &Client,
    url: Url,
    config: &SourcesConfig,
) -> Result<ImagePayload> {
    if is_forbidden(&url, &config.forbidden_domains) {
        return Err(anyhow!("refusing denylisted host {}", url));
    }

    let resp = client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("request to {} failed", url))?;

    if is_forbidden(resp.url(), &config.forbidden_domains) {
        return Err(anyhow!("redirected to denylisted host {}", resp.url()));
    }
    if resp.status().is_redirection() {
        let target = resp
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("?");
        return Err(anyhow!("redirect to denylisted host not followed: {}", target));
    }
    if !resp.status().is_success() {
        return Err(anyhow!("{} returned status {}", url, resp.status()));
    }
    if let Some(len) = resp.content_length() {
        if len as usize > config.max_download_bytes {
            return Err(anyhow!("image too large ({} bytes)", len));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("image download interrupted")?;
        if bytes.len() + chunk.len() > config.max_download_bytes {
            return Err(anyhow!("image exceeded {} bytes", config.max_download_bytes));
        }
        bytes.extend_from_slice(&chunk);
    }

    validate_payload(bytes, config)
}

fn validate_payload(bytes: Vec<u8>, config: &SourcesConfig) -> Result<ImagePayload> {
    if bytes.len() > config.max_download_bytes {
        return Err(anyhow!("image exceeded {} bytes", config.max_download_bytes));
    }
    let container = detect_container(&bytes)
        .ok_or_else(|| anyhow!("payload is not a recognized image ({} bytes)", bytes.len()))?;
    Ok(ImagePayload { bytes, container })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config() -> SourcesConfig {
        SourcesConfig {
            web_search_url: "http://127.0.0.1:9".to_string(),
            pollinations_url: "http://127.0.0.1:9/prompt".to_string(),
            request_timeout_secs: 2,
            ..SourcesConfig::default()
        }
    }

    #[test]
    fn test_chain_order() {
        let chain = SourceClient::default_chain(&SourcesConfig::default());
        let names: Vec<_> = chain.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["stock", "web", "generated"]);
        assert_eq!(chain[2].asset_source(), AssetSource::AIGenerated);
    }

    #[test]
    fn test_validate_payload_rejects_html() {
        let config = SourcesConfig::default();
        assert!(validate_payload(b"<html>nope</html>".to_vec(), &config).is_err());
        let ok = validate_payload(vec![0xFF, 0xD8, 0xFF, 0xDB, 1, 2, 3], &config).unwrap();
        assert_eq!(ok.container, ImageContainer::Jpeg);
    }

    #[tokio::test]
    async fn test_stock_without_key_fails_fast() {
        let config = offline_config();
        let client = Client::new();
        let chain = SourceClient::default_chain(&config);
        let err = chain[0]
            .fetch(&client, "lighthouse", AspectRatio::Wide, &config)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Pexels"));
    }

    #[tokio::test]
    async fn test_denylisted_url_is_never_requested() {
        let config = offline_config();
        let client = Client::new();
        let url = Url::parse("https://www.gettyimages.com/photo.jpg").unwrap();
        let err = download_image(&client, url, &config).await.unwrap_err();
        assert!(err.to_string().contains("denylisted"));
    }

    #[tokio::test]
    async fn test_redirect_to_denylisted_host_is_not_followed() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(
                    b"HTTP/1.1 302 Found\r\n\
                      Location: https://media.gettyimages.com/photo.jpg\r\n\
                      Content-Length: 0\r\n\
                      Connection: close\r\n\r\n",
                )
                .await
                .unwrap();
        });

        let config = offline_config();
        let client = Client::builder()
            .redirect(redirect_policy(&config.forbidden_domains))
            .build()
            .unwrap();
        let url = Url::parse(&format!("http://{}/image.jpg", addr)).unwrap();
        let err = download_image(&client, url, &config).await.unwrap_err();
        assert!(
            err.to_string().contains("not followed"),
            "unexpected error: {}",
            err
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_sources_fail() {
        let config = offline_config();
        let client = Client::new();
        for source in SourceClient::default_chain(&config) {
            assert!(source
                .fetch(&client, "red fox", AspectRatio::Tall, &config)
                .await
                .is_err());
        }
    }
}
