//! HTML article, link, image and metadata extraction
//!
//! Article content comes from readability; links, images and metadata come
//! from an independent DOM pass over the full document so a page whose
//! article cannot be isolated still yields everything else.

use crate::params::ReturnFormat;
use crate::url::resolve;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::sync::LazyLock;
use url::Url;

/// Characters of body text used as a fallback description
const DESCRIPTION_FALLBACK_CHARS: usize = 200;

static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("hardcoded selector is valid"));
static IMAGE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img").expect("hardcoded selector is valid"));
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("hardcoded selector is valid"));
static META: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("meta[content]").expect("hardcoded selector is valid"));
static CANONICAL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("link[rel='canonical'][href]").expect("hardcoded selector is valid")
});
static HTML_ROOT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("html[lang]").expect("hardcoded selector is valid"));

/// Everything pulled out of one HTML document
#[derive(Debug, Clone, Default, Serialize)]
pub struct Extracted {
    /// Payload in the requested format
    pub content: String,
    pub title: String,
    pub description: String,
    /// Absolute http(s) links in document order, deduplicated
    pub links: Vec<String>,
    /// Absolute image URLs in document order, deduplicated
    pub images: Vec<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Stateless HTML extractor
pub struct Extractor;

impl Extractor {
    /// Extracts content, links, images and metadata from a page
    ///
    /// # Arguments
    ///
    /// * `html` - Full document body
    /// * `url` - URL the document was served from, used to resolve relative references
    /// * `format` - Requested shape of `content`
    ///
    /// # Returns
    ///
    /// The extracted page. This never fails: when no article can be isolated
    /// the whole document stands in for it.
    pub fn extract(html: &str, url: &str, format: ReturnFormat) -> Extracted {
        let document = Html::parse_document(html);
        let article = Article::from_html(html, url, &document);

        let content = match format {
            ReturnFormat::Markdown | ReturnFormat::Commonmark => {
                match htmd::convert(&article.html) {
                    Ok(markdown) => markdown,
                    Err(e) => {
                        tracing::debug!("Markdown conversion failed for {}: {}", url, e);
                        article.text.clone()
                    }
                }
            }
            ReturnFormat::Text => article.text.clone(),
            ReturnFormat::Raw | ReturnFormat::Xml => html.to_string(),
            ReturnFormat::Bytes | ReturnFormat::Empty => String::new(),
        };

        let mut metadata = extract_metadata(&document);

        let title = if article.title.is_empty() {
            metadata.get("og:title").cloned().unwrap_or_default()
        } else {
            article.title
        };

        let description = metadata
            .get("description")
            .or_else(|| metadata.get("og:description"))
            .cloned()
            .unwrap_or_else(|| truncate_chars(&article.text, DESCRIPTION_FALLBACK_CHARS));

        metadata.insert("title".to_string(), title.clone());
        metadata.insert("description".to_string(), description.clone());

        Extracted {
            content,
            title,
            description,
            links: extract_links(&document, url),
            images: extract_images(&document, url),
            metadata,
        }
    }
}

/// Readable part of a page
struct Article {
    title: String,
    html: String,
    text: String,
}

impl Article {
    fn from_html(html: &str, url: &str, document: &Html) -> Self {
        let parsed = Url::parse(url).ok().and_then(|page_url| {
            let mut cursor = Cursor::new(html.as_bytes());
            match readability::extractor::extract(&mut cursor, &page_url) {
                Ok(product) => Some(product),
                Err(e) => {
                    tracing::debug!("Readability failed for {}: {}", url, e);
                    None
                }
            }
        });

        match parsed {
            Some(product) if !product.content.trim().is_empty() => Self {
                title: product.title.trim().to_string(),
                html: product.content,
                text: collapse_whitespace(&product.text),
            },
            _ => Self {
                title: document_title(document).unwrap_or_default(),
                html: html.to_string(),
                text: visible_text(document),
            },
        }
    }
}

fn document_title(document: &Html) -> Option<String> {
    document
        .select(&TITLE)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Text of the document outside script, style and noscript elements
fn visible_text(document: &Html) -> String {
    let mut parts = Vec::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };

        let hidden = node
            .parent()
            .and_then(|parent| parent.value().as_element().map(|el| el.name().to_string()))
            .is_some_and(|name| matches!(name.as_str(), "script" | "style" | "noscript"));

        if !hidden {
            parts.push((**text).to_owned());
        }
    }

    collapse_whitespace(&parts.join(" "))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Extracts followable links from `<a href>` elements
fn extract_links(document: &Html, page_url: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&ANCHOR) {
        if element.value().attr("download").is_some() {
            continue;
        }

        let Some(href) = element.value().attr("href") else {
            continue;
        };

        if let Some(absolute) = resolve_reference(href, page_url) {
            if seen.insert(absolute.clone()) {
                links.push(absolute);
            }
        }
    }

    links
}

/// Extracts image URLs, honoring common lazy-loading attributes and og:image
fn extract_images(document: &Html, page_url: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut images = Vec::new();

    let sources = document
        .select(&IMAGE)
        .filter_map(image_source)
        .chain(document.select(&META).filter_map(|meta| {
            let property = meta.value().attr("property")?;
            if property.eq_ignore_ascii_case("og:image") {
                meta.value().attr("content")
            } else {
                None
            }
        }));

    for src in sources {
        if let Some(absolute) = resolve_reference(src, page_url) {
            if seen.insert(absolute.clone()) {
                images.push(absolute);
            }
        }
    }

    images
}

fn image_source<'a>(element: ElementRef<'a>) -> Option<&'a str> {
    ["src", "data-src", "data-lazy-src"]
        .iter()
        .filter_map(|attr| element.value().attr(attr))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

/// Resolves an attribute value against the page URL
///
/// Returns None for empty values, fragment-only references, non-navigational
/// schemes and anything that does not resolve to http or https.
fn resolve_reference(value: &str, page_url: &str) -> Option<String> {
    let value = value.trim();

    if value.is_empty() || value.starts_with('#') {
        return None;
    }

    let lower = value.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let absolute = resolve(page_url, value);
    match Url::parse(&absolute) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Some(url.to_string()),
        _ => None,
    }
}

/// Collects description, language, canonical URL and Open Graph properties
fn extract_metadata(document: &Html) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();

    for meta in document.select(&META) {
        let attrs = meta.value();
        let Some(content) = attrs.attr("content").map(str::trim) else {
            continue;
        };
        if content.is_empty() {
            continue;
        }

        if let Some(name) = attrs.attr("name") {
            if name.eq_ignore_ascii_case("description") {
                metadata
                    .entry("description".to_string())
                    .or_insert_with(|| content.to_string());
            }
        }

        if let Some(property) = attrs.attr("property") {
            let property = property.to_ascii_lowercase();
            if property.starts_with("og:") {
                metadata.entry(property).or_insert_with(|| content.to_string());
            }
        }
    }

    if let Some(lang) = document
        .select(&HTML_ROOT)
        .next()
        .and_then(|el| el.value().attr("lang"))
    {
        metadata.insert("language".to_string(), lang.trim().to_string());
    }

    if let Some(canonical) = document
        .select(&CANONICAL)
        .next()
        .and_then(|el| el.value().attr("href"))
    {
        metadata.insert("canonical".to_string(), canonical.trim().to_string());
    }

    metadata
}
