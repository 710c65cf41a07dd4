use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::download::WorkshopId;
use crate::error::LookupError;
use crate::units;

pub const WORKSHOP_PAGE_BASE_URL: &str = "https://steamcommunity.com/sharedfiles/filedetails";

// Fixed named regions of the workshop item page. Extraction is best-effort
// structural matching; any missing required region collapses to `Invalid`.
static TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"class="workshopItemTitle"[^>]*>\s*([^<]+?)\s*<"#).expect("valid regex")
});

static TYPE_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)class="rightDetailsBlock"[^>]*>(.*?)</div>"#).expect("valid regex")
});

static SIZE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"class="detailsStatRight"[^>]*>\s*([^<]+?)\s*<"#).expect("valid regex")
});

static RATING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)class="fileRatingDetails".*?<img[^>]*src="([^"]+)""#).expect("valid regex")
});

static PREVIEW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<img[^>]*id="previewImage(?:Main)?"[^>]*src="([^"]+)""#).expect("valid regex")
});

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Metadata for one workshop item, scraped from its public page.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkshopItem {
    pub name: String,
    pub type_label: String,
    pub size_text: String,
    pub size_bytes: Option<u64>,
    pub rating_image_url: String,
    pub preview_image_url: Option<String>,
}

impl WorkshopItem {
    /// Declared size as a human-readable string ("1.50 KB" style).
    pub fn size_readable(&self) -> Option<String> {
        self.size_bytes.map(units::format_bytes)
    }
}

/// Outcome of a lookup that reached the metadata source. A page missing any
/// required region means the id does not name a workshop item.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Valid(WorkshopItem),
    Invalid,
}

pub struct MetadataClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for MetadataClient {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl MetadataClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: WORKSHOP_PAGE_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Fetches the item page and extracts its metadata. Network and HTTP
    /// errors surface as `Err`; a well-served page without the required
    /// regions is `Ok(Lookup::Invalid)`.
    pub async fn lookup(&self, id: &WorkshopId) -> Result<Lookup, LookupError> {
        let url = format!("{}/?id={}", self.base_url, id);
        debug!("fetching workshop page {url}");
        let response = self.http.get(&url).send().await?.error_for_status()?;
        let body = response.text().await?;
        Ok(extract_item(&body))
    }

    /// Declared size of an item in bytes, if the page reports one.
    pub async fn file_size(&self, id: &WorkshopId) -> Result<Option<u64>, LookupError> {
        match self.lookup(id).await? {
            Lookup::Valid(item) => Ok(item.size_bytes),
            Lookup::Invalid => Ok(None),
        }
    }
}

fn extract_item(body: &str) -> Lookup {
    let name = match capture(&TITLE_RE, body) {
        Some(name) => name,
        None => return Lookup::Invalid,
    };
    let type_label = match capture(&TYPE_BLOCK_RE, body).map(|block| strip_tags(&block)) {
        Some(label) if !label.is_empty() => label,
        _ => return Lookup::Invalid,
    };
    let size_text = match capture(&SIZE_RE, body) {
        Some(size) => size,
        None => return Lookup::Invalid,
    };
    let rating_image_url = match capture(&RATING_RE, body) {
        Some(url) => url,
        None => return Lookup::Invalid,
    };
    let preview_image_url = capture(&PREVIEW_RE, body);

    let size_bytes = units::parse_size_text(&size_text);

    Lookup::Valid(WorkshopItem {
        name,
        type_label,
        size_text,
        size_bytes,
        rating_image_url,
        preview_image_url,
    })
}

fn capture(re: &Regex, body: &str) -> Option<String> {
    re.captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn strip_tags(fragment: &str) -> String {
    TAG_RE.replace_all(fragment, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_PAGE: &str = r##"
        <html><body>
        <div class="workshopItemTitle">Zombie Outpost</div>
        <div class="rightDetailsBlock"> <a href="#">Map</a> </div>
        <div class="detailsStatRight">1,536.5 MB</div>
        <div class="fileRatingDetails"><img src="https://img.example/5-star.png"></div>
        <img id="previewImage" src="https://img.example/preview.jpg">
        </body></html>
    "##;

    #[test]
    fn extracts_all_regions_from_valid_page() {
        let item = match extract_item(VALID_PAGE) {
            Lookup::Valid(item) => item,
            Lookup::Invalid => panic!("expected valid item"),
        };
        assert_eq!(item.name, "Zombie Outpost");
        assert_eq!(item.type_label, "Map");
        assert_eq!(item.size_text, "1,536.5 MB");
        assert_eq!(item.size_bytes, Some((1536.5 * 1024.0 * 1024.0) as u64));
        assert_eq!(item.rating_image_url, "https://img.example/5-star.png");
        assert_eq!(
            item.preview_image_url.as_deref(),
            Some("https://img.example/preview.jpg")
        );
    }

    #[test]
    fn missing_required_region_is_invalid() {
        let page = VALID_PAGE.replace("workshopItemTitle", "somethingElse");
        assert_eq!(extract_item(&page), Lookup::Invalid);

        let page = VALID_PAGE.replace("fileRatingDetails", "noRating");
        assert_eq!(extract_item(&page), Lookup::Invalid);
    }

    #[test]
    fn missing_preview_is_still_valid() {
        let page = VALID_PAGE.replace("previewImage", "previewGone");
        match extract_item(&page) {
            Lookup::Valid(item) => assert!(item.preview_image_url.is_none()),
            Lookup::Invalid => panic!("preview image is optional"),
        }
    }

    #[test]
    fn fallback_preview_image_main_is_used() {
        let page = VALID_PAGE.replace("id=\"previewImage\"", "id=\"previewImageMain\"");
        match extract_item(&page) {
            Lookup::Valid(item) => assert_eq!(
                item.preview_image_url.as_deref(),
                Some("https://img.example/preview.jpg")
            ),
            Lookup::Invalid => panic!("expected valid item"),
        }
    }

    #[tokio::test]
    async fn lookup_fetches_page_by_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/?id=123456")
            .with_status(200)
            .with_body(VALID_PAGE)
            .create_async()
            .await;

        let client = MetadataClient::with_base_url(reqwest::Client::new(), server.url());
        let id = WorkshopId::parse("123456").unwrap();
        let lookup = client.lookup(&id).await.unwrap();

        assert!(matches!(lookup, Lookup::Valid(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_error_is_distinct_from_invalid() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/?id=123456")
            .with_status(500)
            .create_async()
            .await;

        let client = MetadataClient::with_base_url(reqwest::Client::new(), server.url());
        let id = WorkshopId::parse("123456").unwrap();
        assert!(client.lookup(&id).await.is_err());
    }

    #[tokio::test]
    async fn malformed_page_is_invalid_not_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/?id=123456")
            .with_status(200)
            .with_body("<html><body>item is private or removed</body></html>")
            .create_async()
            .await;

        let client = MetadataClient::with_base_url(reqwest::Client::new(), server.url());
        let id = WorkshopId::parse("123456").unwrap();
        assert_eq!(client.lookup(&id).await.unwrap(), Lookup::Invalid);
    }
}
