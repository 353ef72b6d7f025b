use std::fs;

use base64::Engine as _;
use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{BridgeError, Result};

pub const ABOUT_BLANK: &str = "about:blank";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    pub base_url: String,
    pub contents: String,
}

/// Resolve a page URI into its source text.
pub fn fetch_document(uri: &str) -> Result<FetchedDocument> {
    let trimmed = uri.trim();
    if trimmed.eq_ignore_ascii_case(ABOUT_BLANK) {
        return Ok(FetchedDocument {
            base_url: ABOUT_BLANK.to_string(),
            contents: String::new(),
        });
    }

    let url = parse_url(trimmed)?;
    let contents = fetch_url(&url)?;
    Ok(FetchedDocument {
        base_url: url.to_string(),
        contents,
    })
}

/// Fetch a sub-resource (e.g. `<script src>`) relative to `base_url`.
pub fn fetch_resource(reference: &str, base_url: Option<&str>) -> Result<String> {
    let url = match base_url.and_then(|base| Url::parse(base).ok()) {
        Some(base) => base.join(reference).map_err(|err| BridgeError::InvalidUri {
            uri: reference.to_string(),
            reason: err.to_string(),
        })?,
        None => parse_url(reference)?,
    };
    fetch_url(&url)
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|err| BridgeError::InvalidUri {
        uri: raw.to_string(),
        reason: err.to_string(),
    })
}

fn fetch_url(url: &Url) -> Result<String> {
    match url.scheme() {
        "file" => fetch_file_url(url),
        "data" => decode_data_url(url.as_str()),
        "http" | "https" => {
            let response = reqwest::blocking::get(url.clone())
                .and_then(|response| response.error_for_status())
                .map_err(|err| BridgeError::Fetch(format!("{url}: {err}")))?;
            response
                .text()
                .map_err(|err| BridgeError::Fetch(format!("{url}: {err}")))
        }
        other => Err(BridgeError::InvalidUri {
            uri: url.to_string(),
            reason: format!("unsupported scheme `{other}`"),
        }),
    }
}

fn fetch_file_url(url: &Url) -> Result<String> {
    let path = url.to_file_path().map_err(|_| BridgeError::InvalidUri {
        uri: url.to_string(),
        reason: "invalid file URL".into(),
    })?;

    if path.is_dir() {
        return Err(BridgeError::Fetch(format!(
            "{} is a directory",
            path.display()
        )));
    }

    Ok(fs::read_to_string(&path)?)
}

/// `data:[<mediatype>][;base64],<data>`
fn decode_data_url(raw: &str) -> Result<String> {
    let invalid = |reason: &str| BridgeError::InvalidUri {
        uri: raw.chars().take(64).collect(),
        reason: reason.to_string(),
    };

    let body = raw
        .strip_prefix("data:")
        .ok_or_else(|| invalid("not a data URL"))?;
    let (meta, data) = body
        .split_once(',')
        .ok_or_else(|| invalid("missing `,` separator"))?;

    if meta.split(';').any(|part| part.eq_ignore_ascii_case("base64")) {
        let decoded_percent = percent_decode_str(data).collect::<Vec<u8>>();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(decoded_percent)
            .map_err(|err| invalid(&err.to_string()))?;
        String::from_utf8(bytes).map_err(|err| invalid(&err.to_string()))
    } else {
        percent_decode_str(data)
            .decode_utf8()
            .map(|text| text.into_owned())
            .map_err(|err| invalid(&err.to_string()))
    }
}
