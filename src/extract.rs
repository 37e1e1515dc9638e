use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::Config;
use crate::error::Error;
use crate::formats::{
    DocumentMetadata, HeadingSpec, PageSpec, StructureDescription, SubheadingSpec, Version,
    VisualSpec,
};

/// Image bytes produced alongside a structure description, addressed by `image_ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    pub image_ref: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub description: StructureDescription,
    pub images: Vec<ExtractedImage>,
}

impl Extraction {
    /// Prefixes every visual reference with `scope` and keeps only the images those visuals
    /// name, renamed to match. Pages belong to the document, so page references stay as they are.
    pub fn into_scoped(self, scope: &str) -> Self {
        let Self {
            mut description,
            images,
        } = self;
        let mut wanted = HashSet::new();
        for visual in description
            .headings
            .iter_mut()
            .flat_map(|heading| heading.subheadings.iter_mut())
            .flat_map(|subheading| subheading.visuals.iter_mut())
        {
            let original = visual.image_ref.trim().to_owned();
            visual.image_ref = format!("{scope}-{original}");
            wanted.insert(original);
        }
        let images = images
            .into_iter()
            .filter(|image| wanted.contains(image.image_ref.trim()))
            .map(|image| ExtractedImage {
                image_ref: format!("{scope}-{}", image.image_ref.trim()),
                bytes: image.bytes,
            })
            .collect();
        Self {
            description,
            images,
        }
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, source: &[u8], version: Version) -> anyhow::Result<Extraction>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorEngine {
    Outline,
    Http,
}

impl ExtractorEngine {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "outline" => Ok(Self::Outline),
            "http" => Ok(Self::Http),
            other => anyhow::bail!("unsupported extractor engine: {other}"),
        }
    }
}

/// Runs one extraction, mapping collaborator failures and timeouts to `Error::Extraction`.
pub async fn run_with_timeout(
    extractor: &dyn Extractor,
    source: &[u8],
    version: Version,
    timeout: Duration,
) -> crate::Result<Extraction> {
    match tokio::time::timeout(timeout, extractor.extract(source, version)).await {
        Ok(result) => result.map_err(Error::extraction),
        Err(_) => Err(Error::Extraction(format!(
            "{version} extraction timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

pub fn from_config(config: &Config) -> anyhow::Result<Arc<dyn Extractor>> {
    match config.extractor {
        ExtractorEngine::Outline => Ok(Arc::new(OutlineExtractor::default())),
        ExtractorEngine::Http => {
            let endpoint = config
                .extractor_url
                .clone()
                .context("DOCGRAPH_EXTRACTOR_URL is required for the http extractor")?;
            Ok(Arc::new(HttpExtractor::new(endpoint, config.extract_timeout)?))
        }
    }
}

/// Title reported when neither front matter nor a heading names the document.
pub const UNTITLED: &str = "Untitled";

const CONTEXT_MAX_CHARS: usize = 600;
const FALLBACK_HEADING: &str = "Document";

/// Built-in extractor for plain-text outlines.
///
/// Pages are separated by form feeds. `# ` starts a heading, `## ` a subheading and
/// `![caption](ref)` adds a visual reference to the current subheading. An optional
/// `---` front matter block may carry `title` and `author`. The enhanced version also
/// keeps the paragraph text under each subheading as its context.
#[derive(Debug, Clone, Default)]
pub struct OutlineExtractor;

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    title: Option<String>,
    author: Option<String>,
}

#[async_trait]
impl Extractor for OutlineExtractor {
    async fn extract(&self, source: &[u8], version: Version) -> anyhow::Result<Extraction> {
        let text = std::str::from_utf8(source).context("outline extractor expects UTF-8 text")?;
        let description = outline(text, version, source.len() as u64)?;
        Ok(Extraction {
            description,
            images: Vec::new(),
        })
    }
}

fn outline(text: &str, version: Version, file_size: u64) -> anyhow::Result<StructureDescription> {
    let (front, body) = split_front_matter(text)?;
    let pages = body.split('\x0c').collect::<Vec<_>>();

    let mut headings: Vec<HeadingSpec> = Vec::new();
    let mut paragraphs: Vec<Vec<String>> = Vec::new();

    for (index, page_text) in pages.iter().enumerate() {
        let page = index as i64 + 1;
        for line in page_text.lines() {
            let line = line.trim();
            if let Some(title) = line.strip_prefix("## ") {
                let Some(heading) = headings.last_mut() else {
                    continue;
                };
                heading.subheadings.push(SubheadingSpec {
                    title: title.trim().to_owned(),
                    context: String::new(),
                    page,
                    position: None,
                    visuals: Vec::new(),
                });
                paragraphs.push(Vec::new());
            } else if let Some(text) = line.strip_prefix("# ") {
                headings.push(HeadingSpec {
                    text: text.trim().to_owned(),
                    page,
                    position: None,
                    subheadings: Vec::new(),
                });
            } else if let Some((caption, image_ref)) = parse_visual(line) {
                let Some(subheading) = headings.last_mut().and_then(|h| h.subheadings.last_mut())
                else {
                    continue;
                };
                subheading.visuals.push(VisualSpec {
                    caption: caption.to_owned(),
                    image_ref: image_ref.to_owned(),
                    page,
                    position: None,
                });
            } else if !line.is_empty() {
                let has_subheading = headings.last().is_some_and(|h| !h.subheadings.is_empty());
                if let (true, Some(buf)) = (has_subheading, paragraphs.last_mut()) {
                    buf.push(line.to_owned());
                }
            }
        }
    }

    if version == Version::Enhanced {
        let mut buffers = paragraphs.into_iter();
        for subheading in headings.iter_mut().flat_map(|h| h.subheadings.iter_mut()) {
            let Some(lines) = buffers.next() else {
                break;
            };
            subheading.context = lines.join(" ").chars().take(CONTEXT_MAX_CHARS).collect();
        }
    }

    if headings.is_empty() {
        headings.push(HeadingSpec {
            text: FALLBACK_HEADING.to_owned(),
            page: 1,
            position: None,
            subheadings: (1..=pages.len() as i64)
                .map(|page| SubheadingSpec {
                    title: format!("Page {page}"),
                    context: String::new(),
                    page,
                    position: None,
                    visuals: Vec::new(),
                })
                .collect(),
        });
    }

    let title = front
        .title
        .filter(|t| !t.trim().is_empty())
        .or_else(|| {
            headings
                .first()
                .filter(|h| h.text != FALLBACK_HEADING)
                .map(|h| h.text.clone())
        })
        .unwrap_or_else(|| UNTITLED.to_owned());

    Ok(StructureDescription {
        metadata: DocumentMetadata {
            title,
            page_count: pages.len() as u32,
            author: front.author,
            file_size,
        },
        headings,
        pages: (1..=pages.len() as i64)
            .map(|page_number| PageSpec {
                page_number,
                image_ref: format!("page-{page_number}"),
            })
            .collect(),
    })
}

fn split_front_matter(text: &str) -> anyhow::Result<(FrontMatter, &str)> {
    let Some(rest) = text.strip_prefix("---\n") else {
        return Ok((FrontMatter::default(), text));
    };
    let Some(end) = rest.find("\n---") else {
        anyhow::bail!("front matter is not terminated with '---'");
    };
    let yaml = &rest[..end];
    let body = rest[end + "\n---".len()..].trim_start_matches(['\r', '\n']);
    let front: FrontMatter = serde_yaml::from_str(yaml).context("parse front matter")?;
    Ok((front, body))
}

fn parse_visual(line: &str) -> Option<(&str, &str)> {
    let inner = line.strip_prefix("![")?.strip_suffix(')')?;
    let (caption, image_ref) = inner.split_once("](")?;
    let image_ref = image_ref.trim();
    if image_ref.is_empty() {
        return None;
    }
    Some((caption.trim(), image_ref))
}

/// Delegates extraction to an external service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpExtractor {
    client: reqwest::Client,
    endpoint: Url,
}

#[derive(Debug, Serialize)]
struct ExtractRequest {
    version: Version,
    file: String,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    structure: StructureDescription,
    #[serde(default)]
    images: Vec<WireImage>,
}

#[derive(Debug, Deserialize)]
struct WireImage {
    image_ref: String,
    data: String,
}

impl HttpExtractor {
    pub fn new(endpoint: Url, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build extractor http client")?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(&self, source: &[u8], version: Version) -> anyhow::Result<Extraction> {
        let request = ExtractRequest {
            version,
            file: base64::engine::general_purpose::STANDARD.encode(source),
        };
        tracing::info!(endpoint = %self.endpoint, %version, bytes = source.len(), "extract via http");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .with_context(|| format!("POST {}", self.endpoint))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .context("read extractor response body")?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or(raw);
            anyhow::bail!("extractor error ({status}): {message}");
        }

        let parsed: ExtractResponse =
            serde_json::from_str(&raw).context("parse extractor response")?;
        let images = parsed
            .images
            .into_iter()
            .map(|image| {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(image.data.as_bytes())
                    .with_context(|| format!("decode image {}", image.image_ref))?;
                Ok(ExtractedImage {
                    image_ref: image.image_ref,
                    bytes,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Extraction {
            description: parsed.structure,
            images,
        })
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.as_str()?.to_owned();
    Some(message)
}
