//! Legacy banner-ad responder (spec §6, §9 open question).
//!
//! If the very first bytes on a freshly accepted connection look like an
//! HTTP `GET` for the ad banner or its image, the listener answers with a
//! fixed response and closes the connection instead of handing it to the
//! connection state machine. Disabled by `disable_xp_ad_banner`.
//!
//! Header bytes are preserved exactly, including `Connection: close`, per
//! the open question in spec §9: it is unclear whether clients tolerate
//! chunked encoding, so `Content-Length` is always sent and matches the
//! body exactly.

/// A 1x1 transparent PNG, standing in for `XP_AD_BANNER_DATA` (not present
/// in the retrieved `original_source`).
pub const BANNER_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
    0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01,
    0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

const BANNER_HTML: &str = "<html><body><a href=\"/windows/ad.asp\"><img src=\"/banner.png\"></a></body></html>";

/// Which, if any, fixed ad-banner response the first request line asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerRequest {
    Html,
    Png,
}

/// Inspects the first line of a freshly accepted socket's input.
pub fn classify_request(first_line: &str) -> Option<BannerRequest> {
    if first_line.starts_with("GET /windows/ad.asp") {
        Some(BannerRequest::Html)
    } else if first_line.starts_with("GET /banner.png") {
        Some(BannerRequest::Png)
    } else {
        None
    }
}

/// Builds the full HTTP response (headers + body) for a classified banner
/// request.
pub fn build_response(request: BannerRequest) -> Vec<u8> {
    match request {
        BannerRequest::Html => {
            let mut resp = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                BANNER_HTML.len()
            )
            .into_bytes();
            resp.extend_from_slice(BANNER_HTML.as_bytes());
            resp
        }
        BannerRequest::Png => {
            let mut resp = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                BANNER_PNG.len()
            )
            .into_bytes();
            resp.extend_from_slice(BANNER_PNG);
            resp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_requests() {
        assert_eq!(classify_request("GET /windows/ad.asp HTTP/1.1"), Some(BannerRequest::Html));
        assert_eq!(classify_request("GET /banner.png HTTP/1.1"), Some(BannerRequest::Png));
        assert_eq!(classify_request("JOIN Session=abc"), None);
    }

    #[test]
    fn html_response_content_length_matches_body() {
        let resp = build_response(BannerRequest::Html);
        let text = String::from_utf8_lossy(&resp);
        let header_end = text.find("\r\n\r\n").unwrap() + 4;
        let body_len = resp.len() - header_end;
        assert_eq!(body_len, BANNER_HTML.len());
        assert!(text.contains("Connection: close"));
    }
}
