//! Minimal `multipart/form-data` parsing for single-file uploads.

use anyhow::{anyhow, Result};

/// One part of a multipart body. `data` borrows from the request body.
#[derive(Debug, PartialEq, Eq)]
pub struct Part<'a> {
    pub name: Option<String>,
    /// Declared part content type, if any.
    pub content_type: Option<String>,
    pub data: &'a [u8],
}

impl<'a> Part<'a> {
    fn from_headers(headers: &str, data: &'a [u8]) -> Self {
        let mut part = Part {
            name: None,
            content_type: None,
            data,
        };
        for line in headers.split("\r\n") {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            if key.eq_ignore_ascii_case("content-disposition") {
                part.name = header_params(value)
                    .into_iter()
                    .find(|(param, _)| param == "name")
                    .map(|(_, name)| name);
            } else if key.eq_ignore_ascii_case("content-type") {
                part.content_type = Some(value.trim().to_string());
            }
        }
        part
    }
}

/// Boundary parameter of a `multipart/form-data` content type, if it is one.
pub fn boundary(content_type: &str) -> Option<String> {
    let (mime, params) = content_type.split_once(';')?;
    if !mime.trim().eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    header_params(&format!(";{}", params))
        .into_iter()
        .find(|(key, _)| key == "boundary")
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

/// Split a multipart body into its parts.
pub fn parse<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<Part<'a>>> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let closing = [b"\r\n".as_slice(), delimiter.as_slice()].concat();

    let mut pos = find(body, &delimiter, 0)
        .ok_or_else(|| anyhow!("multipart body does not contain its boundary"))?
        + delimiter.len();
    let mut parts = Vec::new();
    loop {
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        if !rest.starts_with(b"\r\n") {
            return Err(anyhow!("malformed multipart delimiter line"));
        }
        pos += 2;

        let (headers, data_start) = if body[pos..].starts_with(b"\r\n") {
            (String::new(), pos + 2)
        } else {
            let head_end = find(body, b"\r\n\r\n", pos)
                .ok_or_else(|| anyhow!("multipart part headers are not terminated"))?;
            (
                String::from_utf8_lossy(&body[pos..head_end]).into_owned(),
                head_end + 4,
            )
        };
        let data_end = find(body, &closing, data_start)
            .ok_or_else(|| anyhow!("multipart part is not terminated"))?;
        parts.push(Part::from_headers(&headers, &body[data_start..data_end]));
        pos = data_end + closing.len();
    }
}

/// The first part named `field`.
pub fn file_field<'a>(body: &'a [u8], boundary: &str, field: &str) -> Result<Option<Part<'a>>> {
    Ok(parse(body, boundary)?
        .into_iter()
        .find(|part| part.name.as_deref() == Some(field)))
}

pub(crate) fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| offset + from)
}

/// `; key="value"` parameters after the first `;`, keys lowercased.
fn header_params(value: &str) -> Vec<(String, String)> {
    value
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .map(|(key, value)| {
            (
                key.trim().to_lowercase(),
                value.trim().trim_matches('"').to_string(),
            )
        })
        .collect()
}
