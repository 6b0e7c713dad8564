// Link filters applied before a URL reaches the frontier

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

const EXCLUDED_PREFIXES: &[&str] = &[
    "javascript:",
    "mailto:",
    "tel:",
    "data:",
    "about:",
    "file:",
    "ftp:",
    "#",
];

const EXCLUDED_EXTENSIONS: &[&str] = &[
    // images
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".svg", ".webp", ".ico", ".tiff",
    // documents
    ".pdf", ".doc", ".docx", ".ppt", ".pptx", ".xls", ".xlsx", ".csv",
    // media
    ".mp3", ".mp4", ".avi", ".mov", ".flv", ".wmv", ".wav", ".ogg",
    // archives
    ".zip", ".rar", ".tar", ".gz", ".7z",
    // assets
    ".css", ".js", ".json", ".xml",
    // other
    ".txt", ".md", ".exe", ".dmg", ".iso", ".apk", ".ipa",
];

const EXCLUDED_PATHS: &[&str] = &[
    "/wp-admin/",
    "/wp-json/",
    "/wp-content/uploads/",
    "/wp-includes/",
    "/wp-login",
    "/xmlrpc.php",
    "/admin/",
    "/login",
    "/logout",
    "/cart",
    "/checkout",
    "/assets/",
    "/static/",
    "/images/",
    "/js/",
    "/css/",
    "/fonts/",
    "/media/",
    "/download/",
    "/downloads/",
    "/_layouts/",
    "/cgi-bin/",
];

const IMAGE_FORMATS: &[&str] = &["jpeg", "jpg", "png", "gif", "webp"];

const IMAGE_PATH_KEYWORDS: &[&str] = &[
    "/image", "/img", "/media", "/photo", "/picture",
];

static IMAGE_QUERY_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|&)(?:img|photo|picture|media|file)=[^&]+").unwrap());

static IMAGE_QUERY_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|&)(?:format|type|ext|mimetype)=(?:image|jpeg|jpg|png|gif|webp)").unwrap()
});

/// Why a link was filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    Scheme,
    StaticResource,
    ImageQuery,
    ExcludedPath,
}

/// Rejects raw hrefs that can never be a crawlable page.
pub fn check_raw(raw: &str) -> Option<FilterReason> {
    let lowered = raw.trim().to_lowercase();
    if EXCLUDED_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
        return Some(FilterReason::Scheme);
    }
    None
}

/// Rejects parsed URLs pointing at assets or non-public areas.
pub fn check_url(url: &Url) -> Option<FilterReason> {
    if !matches!(url.scheme(), "http" | "https") {
        return Some(FilterReason::Scheme);
    }

    let path = url.path().to_lowercase();
    if EXCLUDED_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return Some(FilterReason::StaticResource);
    }

    let query = url.query().unwrap_or("").to_lowercase();
    if !query.is_empty() {
        if IMAGE_QUERY_FORMAT.is_match(&query)
            || IMAGE_QUERY_KEY.is_match(&query)
            || query.contains("image")
            || query.contains("jpeg")
        {
            return Some(FilterReason::ImageQuery);
        }
        if IMAGE_PATH_KEYWORDS.iter().any(|kw| path.contains(kw))
            && IMAGE_FORMATS.iter().any(|f| query.contains(f))
        {
            return Some(FilterReason::ImageQuery);
        }
    }

    if EXCLUDED_PATHS.iter().any(|p| path.contains(p)) {
        return Some(FilterReason::ExcludedPath);
    }

    None
}
