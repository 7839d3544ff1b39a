use url::Url;

/// Hosts that serve TikTok profile pages
pub const TIKTOK_HOSTNAMES: &[&str] = &[
    "m.tiktok.com",
    "tiktok.com",
    "vm.tiktok.com",
    "www.tiktok.com",
];

/// Placeholder used when sanitization leaves nothing behind
const UNNAMED: &str = "unnamed";

/// Validate a submitted profile URL.
///
/// Returns `Some(message)` describing the first rule the URL breaks, or `None`
/// when it is a well-formed TikTok profile URL. Purely syntactic, no network access.
pub fn validate_profile_url(url: &str) -> Option<String> {
    if url.is_empty() {
        return Some("URL is required".to_string());
    }

    let url = url.trim();

    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Some("URL must start with http:// or https://".to_string());
    }

    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return Some("Invalid URL format".to_string()),
    };

    let host = parsed.host_str().unwrap_or_default();
    if !TIKTOK_HOSTNAMES.contains(&host) {
        return Some(format!(
            "Not a TikTok URL. Allowed hosts: {}",
            TIKTOK_HOSTNAMES.join(", ")
        ));
    }

    if !is_profile_path(&decoded_path(&parsed)) {
        return Some(
            "URL must be a TikTok profile (e.g. https://www.tiktok.com/@username)".to_string(),
        );
    }

    None
}

/// Matches `^/@[\w.-]+/?$`
fn is_profile_path(path: &str) -> bool {
    let Some(rest) = path.strip_prefix("/@") else {
        return false;
    };
    let name = rest.strip_suffix('/').unwrap_or(rest);

    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '-')
}

fn decoded_path(parsed: &Url) -> String {
    urlencoding::decode(parsed.path())
        .map(|path| path.into_owned())
        .unwrap_or_else(|_| parsed.path().to_string())
}

/// Sanitize a name for use as a single path component.
///
/// Reserved and control characters become `_`, `..` sequences are broken up,
/// surrounding dots and spaces are stripped, and an empty result becomes `unnamed`.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if (c as u32) < 0x20 => '_',
            c => c,
        })
        .collect();

    let mut cleaned = replaced;
    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", "_");
    }

    let trimmed = cleaned.trim_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        UNNAMED.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Extract the sanitized `@username` (without the `@`) from a profile URL
pub fn extract_profile_name(url: &str) -> String {
    let path = match Url::parse(url.trim()) {
        Ok(parsed) => decoded_path(&parsed),
        Err(_) => String::new(),
    };

    let name = path.trim_start_matches('/').trim_start_matches('@');
    let name = name.strip_suffix('/').unwrap_or(name);
    sanitize_filename(name)
}

/// Truncate a title to at most `max_chars` characters for display
pub fn truncate_title(title: &str, max_chars: usize) -> String {
    title.chars().take(max_chars).collect()
}

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Check that the external tools the pipeline shells out to are present
pub async fn check_dependencies(yt_dlp: &str, ffmpeg: &str, whisper: &str) -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available(yt_dlp, "--version").await {
        missing.push(format!("{} - required for listing and downloading videos", yt_dlp));
    }

    if !check_command_available(ffmpeg, "-version").await {
        missing.push(format!("{} - required for audio extraction", ffmpeg));
    }

    if !check_command_available(whisper, "--help").await {
        missing.push(format!("{} - required for transcription", whisper));
    }

    missing
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str, version_flag: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg(version_flag)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
