use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use bytes::Bytes;

#[cfg(feature = "json")]
pub mod json;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Format {
    Binary,
    Text,
}

pub(crate) fn format_bytes_for_debug(format: Format, bytes: &[u8], max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    match format {
        Format::Text => {
            // Lossy preview: a char is at most 4 UTF-8 bytes.
            let max_bytes = max_chars.saturating_mul(4).max(1);
            let slice_len = bytes.len().min(max_bytes);
            let s0 = String::from_utf8_lossy(&bytes[..slice_len]).to_string();
            let mut s = truncate_for_debug(&s0, max_chars);
            if slice_len < bytes.len() && !s.ends_with('…') {
                s.push('…');
            }
            s
        }
        Format::Binary => {
            let max_bytes = max_chars.saturating_mul(3).div_ceil(4).max(1);
            let slice_len = bytes.len().min(max_bytes);
            let s0 = STANDARD_NO_PAD.encode(&bytes[..slice_len]);
            let mut s = truncate_for_debug(&s0, max_chars);
            if slice_len < bytes.len() && !s.ends_with('…') {
                s.push('…');
            }
            s
        }
    }
}

/// Guesses a preview format from a `Content-Type` value.
pub(crate) fn format_for_content_type(ct: Option<&str>) -> Format {
    match ct {
        Some(ct) if ct.starts_with("application/json") || ct.starts_with("text/") => Format::Text,
        None => Format::Text,
        Some(_) => Format::Binary,
    }
}

pub(crate) fn truncate_for_debug(s: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let mut it = s.chars();
    let mut out = String::new();
    for _ in 0..max_chars {
        match it.next() {
            Some(c) => out.push(c),
            None => return out,
        }
    }
    if it.next().is_some() {
        out.push('…');
    }
    out
}

pub trait ContentType {
    /// Empty means "no meaningful Content-Type/Accept".
    const CONTENT_TYPE: &'static str;
}

/// A configured response decoder. Decoders are values so a factory can
/// build one from the response at hand (server date, account time zone).
pub trait Decodes<T> {
    type Error: std::error::Error + Send + Sync + 'static;
    fn decode(&self, bytes: &Bytes) -> Result<T, Self::Error>;
}

pub trait Encodes<T>: ContentType {
    type Error: std::error::Error + Send + Sync + 'static;
    fn encode(output: &T) -> Result<Bytes, Self::Error>;
}

/// Encoded request body together with the content type it is sent as.
#[derive(Clone, Debug)]
pub struct Body {
    pub content_type: &'static str,
    pub bytes: Bytes,
}

impl Body {
    pub fn encode<C, T>(value: &T) -> Result<Self, C::Error>
    where
        C: Encodes<T>,
    {
        Ok(Self {
            content_type: C::CONTENT_TYPE,
            bytes: C::encode(value)?,
        })
    }
}

/// Decoder for responses that must not carry a body, such as a `204`.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoContent;

#[derive(Debug, thiserror::Error)]
#[error("expected an empty body, got {0} bytes")]
pub struct UnexpectedBody(pub usize);

impl Decodes<()> for NoContent {
    type Error = UnexpectedBody;
    fn decode(&self, bytes: &Bytes) -> Result<(), Self::Error> {
        if bytes.is_empty() {
            Ok(())
        } else {
            Err(UnexpectedBody(bytes.len()))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn previews_truncate_per_format() {
        assert_eq!(format_bytes_for_debug(Format::Text, b"hello", 3), "hel…");
        assert_eq!(format_bytes_for_debug(Format::Binary, &[0, 1, 2], 16), "AAEC");
        assert_eq!(format_bytes_for_debug(Format::Text, b"abc", 0), "");
        assert_eq!(format_for_content_type(Some("image/png")), Format::Binary);
        assert_eq!(
            format_for_content_type(Some("application/json; charset=UTF-8")),
            Format::Text
        );
    }

    #[test]
    fn no_content_rejects_a_body() {
        assert!(NoContent.decode(&Bytes::new()).is_ok());
        let err = NoContent.decode(&Bytes::from_static(b"{}")).unwrap_err();
        assert_eq!(err.to_string(), "expected an empty body, got 2 bytes");
    }
}
