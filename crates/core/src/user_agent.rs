//! Coarse device, browser and OS detection from a `User-Agent` header.
//!
//! Only enough to label a session in the "my sessions" list. Ordering of the
//! checks matters: Edge and Opera also advertise `Chrome/`, Chrome also
//! advertises `Safari/`, iOS advertises `Mac OS X` and Android advertises
//! `Linux`.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

pub const UNKNOWN: &str = "Unknown";

pub mod device_types {
    pub const DESKTOP: &str = "Desktop";
    pub const MOBILE: &str = "Mobile";
    pub const TABLET: &str = "Tablet";
    pub const BOT: &str = "Bot";
}

static BOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)bot|crawler|spider|curl/|wget/").expect("valid regex"));

static BROWSER_RES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("Edge", r"Edg(?:e|A|iOS)?/(\d+)"),
        ("Opera", r"(?:OPR|Opera)/(\d+)"),
        ("Firefox", r"(?:Firefox|FxiOS)/(\d+)"),
        ("Chrome", r"(?:Chrome|CriOS)/(\d+)"),
        ("Safari", r"Version/(\d+)[\d.]*.*Safari/"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("valid regex")))
    .collect()
});

static ANDROID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Android (\d+)").expect("valid regex"));
static IOS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:iPhone|iPad|iPod).*?OS (\d+)_").expect("valid regex"));
static WINDOWS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Windows NT (\d+\.\d+)").expect("valid regex"));

/// Parsed user-agent labels stored on a session row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub device_type: String,
    pub browser: String,
    pub os: String,
}

impl DeviceInfo {
    fn unknown() -> Self {
        Self {
            device_type: UNKNOWN.to_string(),
            browser: UNKNOWN.to_string(),
            os: UNKNOWN.to_string(),
        }
    }
}

/// Parse `user_agent` into display labels. Never fails.
pub fn parse(user_agent: Option<&str>) -> DeviceInfo {
    let ua = match user_agent.map(str::trim) {
        Some(ua) if !ua.is_empty() => ua,
        _ => return DeviceInfo::unknown(),
    };

    DeviceInfo {
        device_type: device_type(ua).to_string(),
        browser: browser(ua),
        os: os(ua),
    }
}

fn device_type(ua: &str) -> &'static str {
    if BOT_RE.is_match(ua) {
        device_types::BOT
    } else if ua.contains("iPad") || (ua.contains("Android") && !ua.contains("Mobile")) {
        device_types::TABLET
    } else if ua.contains("Mobi") || ua.contains("iPhone") || ua.contains("iPod") {
        device_types::MOBILE
    } else {
        device_types::DESKTOP
    }
}

fn browser(ua: &str) -> String {
    BROWSER_RES
        .iter()
        .find_map(|(name, re)| re.captures(ua).map(|caps| format!("{name} {}", &caps[1])))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn os(ua: &str) -> String {
    if let Some(caps) = ANDROID_RE.captures(ua) {
        return format!("Android {}", &caps[1]);
    }
    if let Some(caps) = IOS_RE.captures(ua) {
        return format!("iOS {}", &caps[1]);
    }
    if let Some(caps) = WINDOWS_RE.captures(ua) {
        let name = match &caps[1] {
            "10.0" => "Windows 10",
            "6.3" => "Windows 8.1",
            "6.2" => "Windows 8",
            "6.1" => "Windows 7",
            _ => "Windows",
        };
        return name.to_string();
    }
    let label = if ua.contains("CrOS") {
        "ChromeOS"
    } else if ua.contains("Mac OS X") || ua.contains("Macintosh") {
        "macOS"
    } else if ua.contains("Linux") || ua.contains("X11") {
        "Linux"
    } else {
        UNKNOWN
    };
    label.to_string()
}
