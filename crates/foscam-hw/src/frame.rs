//! JPEG payload checks — SOI/EOI markers and CGI error bodies.

/// JPEG start-of-image marker.
const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker.
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Check that `data` looks like one complete JPEG image.
///
/// Requires the SOI marker at the start and an EOI marker at the end,
/// ignoring trailing padding bytes some firmware appends after EOI.
pub fn is_complete_jpeg(data: &[u8]) -> bool {
    if data.len() < 4 || data[..2] != SOI {
        return false;
    }
    let end = data
        .iter()
        .rposition(|&b| b != 0x00 && b != b'\r' && b != b'\n')
        .map(|i| i + 1)
        .unwrap_or(0);
    end >= 4 && data[end - 2..end] == EOI
}

/// True if the body starts with the JPEG SOI marker, complete or not.
pub fn starts_like_jpeg(data: &[u8]) -> bool {
    data.len() >= 2 && data[..2] == SOI
}

/// Extract the `<result>N</result>` code from a CGI XML response.
///
/// Foscam answers every CGI command with a `<CGI_Result>` document when it
/// cannot (or does not) return binary data.
pub fn parse_cgi_result(body: &str) -> Option<i32> {
    let start = body.find("<result>")? + "<result>".len();
    let len = body[start..].find("</result>")?;
    body[start..start + len].trim().parse().ok()
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("truncated JPEG: {len} bytes without end-of-image marker")]
    Truncated { len: usize },
}

/// Validate a snapshot body, returning it unchanged when complete.
pub fn validate_jpeg(data: Vec<u8>) -> Result<Vec<u8>, FrameError> {
    if is_complete_jpeg(&data) {
        Ok(data)
    } else {
        Err(FrameError::Truncated { len: data.len() })
    }
}
