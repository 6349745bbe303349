//! Content-type detection from the leading bytes of a response body.
//!
//! Implements the signature tables of the WHATWG MIME Sniffing standard,
//! the same rules browsers apply to responses served without a
//! `Content-Type`.

/// Number of leading bytes considered when sniffing.
pub const SNIFF_LEN: usize = 512;

/// Fallback when no signature matches.
const OCTET_STREAM: &str = "application/octet-stream";

const HTML: &str = "text/html; charset=utf-8";
const TEXT_UTF8: &str = "text/plain; charset=utf-8";

enum Signature {
    /// Bytes must start with `pat`.
    Exact {
        pat: &'static [u8],
        ct: &'static str,
    },
    /// `data[i] & mask[i] == pat[i]` for every `i`.
    Masked {
        mask: &'static [u8],
        pat: &'static [u8],
        skip_ws: bool,
        ct: &'static str,
    },
    /// Case-insensitive tag after leading whitespace, followed by ' ' or '>'.
    Html(&'static [u8]),
    Mp4,
    Text,
}

const SIGNATURES: &[Signature] = &[
    Signature::Html(b"<!DOCTYPE HTML"),
    Signature::Html(b"<HTML"),
    Signature::Html(b"<HEAD"),
    Signature::Html(b"<SCRIPT"),
    Signature::Html(b"<IFRAME"),
    Signature::Html(b"<H1"),
    Signature::Html(b"<DIV"),
    Signature::Html(b"<FONT"),
    Signature::Html(b"<TABLE"),
    Signature::Html(b"<A"),
    Signature::Html(b"<STYLE"),
    Signature::Html(b"<TITLE"),
    Signature::Html(b"<B"),
    Signature::Html(b"<BODY"),
    Signature::Html(b"<BR"),
    Signature::Html(b"<P"),
    Signature::Html(b"<!--"),
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\xFF",
        pat: b"<?xml",
        skip_ws: true,
        ct: "text/xml; charset=utf-8",
    },
    Signature::Exact {
        pat: b"%PDF-",
        ct: "application/pdf",
    },
    Signature::Exact {
        pat: b"%!PS-Adobe-",
        ct: "application/postscript",
    },
    // Byte order marks
    Signature::Masked {
        mask: b"\xFF\xFF\x00\x00",
        pat: b"\xFE\xFF\x00\x00",
        skip_ws: false,
        ct: "text/plain; charset=utf-16be",
    },
    Signature::Masked {
        mask: b"\xFF\xFF\x00\x00",
        pat: b"\xFF\xFE\x00\x00",
        skip_ws: false,
        ct: "text/plain; charset=utf-16le",
    },
    Signature::Exact {
        pat: b"\xEF\xBB\xBF",
        ct: TEXT_UTF8,
    },
    // Images
    Signature::Exact {
        pat: b"\x00\x00\x01\x00",
        ct: "image/x-icon",
    },
    Signature::Exact {
        pat: b"\x00\x00\x02\x00",
        ct: "image/x-icon",
    },
    Signature::Exact {
        pat: b"BM",
        ct: "image/bmp",
    },
    Signature::Exact {
        pat: b"GIF87a",
        ct: "image/gif",
    },
    Signature::Exact {
        pat: b"GIF89a",
        ct: "image/gif",
    },
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF\xFF\xFF",
        pat: b"RIFF\x00\x00\x00\x00WEBPVP",
        skip_ws: false,
        ct: "image/webp",
    },
    Signature::Exact {
        pat: b"\x89PNG\x0D\x0A\x1A\x0A",
        ct: "image/png",
    },
    Signature::Exact {
        pat: b"\xFF\xD8\xFF",
        ct: "image/jpeg",
    },
    // Audio and video
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
        pat: b"FORM\x00\x00\x00\x00AIFF",
        skip_ws: false,
        ct: "audio/aiff",
    },
    Signature::Masked {
        mask: b"\xFF\xFF\xFF",
        pat: b"ID3",
        skip_ws: false,
        ct: "audio/mpeg",
    },
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\xFF",
        pat: b"OggS\x00",
        skip_ws: false,
        ct: "application/ogg",
    },
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\xFF\xFF\xFF\xFF",
        pat: b"MThd\x00\x00\x00\x06",
        skip_ws: false,
        ct: "audio/midi",
    },
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
        pat: b"RIFF\x00\x00\x00\x00AVI ",
        skip_ws: false,
        ct: "video/avi",
    },
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
        pat: b"RIFF\x00\x00\x00\x00WAVE",
        skip_ws: false,
        ct: "audio/wave",
    },
    Signature::Mp4,
    Signature::Exact {
        pat: b"\x1A\x45\xDF\xA3",
        ct: "video/webm",
    },
    // Fonts
    Signature::Masked {
        // 34 bytes of don't-care, then "LP"
        mask: b"\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\xFF\xFF",
        pat: b"\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00LP",
        skip_ws: false,
        ct: "application/vnd.ms-fontobject",
    },
    Signature::Exact {
        pat: b"\x00\x01\x00\x00",
        ct: "font/ttf",
    },
    Signature::Exact {
        pat: b"OTTO",
        ct: "font/otf",
    },
    Signature::Exact {
        pat: b"ttcf",
        ct: "font/collection",
    },
    Signature::Exact {
        pat: b"wOFF",
        ct: "font/woff",
    },
    Signature::Exact {
        pat: b"wOF2",
        ct: "font/woff2",
    },
    // Archives
    Signature::Exact {
        pat: b"\x1F\x8B\x08",
        ct: "application/x-gzip",
    },
    Signature::Exact {
        pat: b"PK\x03\x04",
        ct: "application/zip",
    },
    Signature::Exact {
        pat: b"Rar!\x1A\x07\x00",
        ct: "application/x-rar-compressed",
    },
    Signature::Exact {
        pat: b"Rar!\x1A\x07\x01\x00",
        ct: "application/x-rar-compressed",
    },
    Signature::Exact {
        pat: b"\x00\x61\x73\x6D",
        ct: "application/wasm",
    },
    Signature::Text,
];

/// Infers a MIME type from the leading bytes of `data`.
///
/// Only the first [`SNIFF_LEN`] bytes are examined. Always returns a valid
/// `Content-Type` value, falling back to `application/octet-stream`.
pub fn detect_content_type(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];
    let first_non_ws = data
        .iter()
        .position(|&b| !is_ws(b))
        .unwrap_or(data.len());

    SIGNATURES
        .iter()
        .find_map(|sig| sig.matches(data, first_non_ws))
        .unwrap_or(OCTET_STREAM)
}

impl Signature {
    fn matches(&self, data: &[u8], first_non_ws: usize) -> Option<&'static str> {
        match *self {
            Signature::Exact { pat, ct } => data.starts_with(pat).then_some(ct),
            Signature::Masked {
                mask,
                pat,
                skip_ws,
                ct,
            } => {
                let data = if skip_ws { &data[first_non_ws..] } else { data };
                if data.len() < pat.len() {
                    return None;
                }
                pat.iter()
                    .zip(mask)
                    .zip(data)
                    .all(|((&p, &m), &d)| d & m == p)
                    .then_some(ct)
            }
            Signature::Html(tag) => {
                let data = &data[first_non_ws..];
                if data.len() < tag.len() + 1 {
                    return None;
                }
                let tag_matches = tag.iter().zip(data).all(|(&t, &d)| {
                    let d = if t.is_ascii_uppercase() { d & 0xDF } else { d };
                    t == d
                });
                (tag_matches && is_tag_terminator(data[tag.len()])).then_some(HTML)
            }
            Signature::Mp4 => is_mp4(data).then_some("video/mp4"),
            Signature::Text => (!data[first_non_ws..].iter().any(|&b| is_binary(b)))
                .then_some(TEXT_UTF8),
        }
    }
}

/// Matches an ISO base media file whose `ftyp` box lists an `mp4` brand.
fn is_mp4(data: &[u8]) -> bool {
    if data.len() < 12 {
        return false;
    }
    let box_size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if data.len() < box_size || box_size % 4 != 0 {
        return false;
    }
    if &data[4..8] != b"ftyp" {
        return false;
    }
    // Major brand at 8, minor version at 12, compatible brands after that
    (8..box_size)
        .step_by(4)
        .filter(|&offset| offset != 12)
        .any(|offset| data.get(offset..offset + 3) == Some(b"mp4".as_slice()))
}

fn is_ws(b: u8) -> bool {
    matches!(b, b'\t' | b'\n' | b'\x0c' | b'\r' | b' ')
}

fn is_tag_terminator(b: u8) -> bool {
    b == b' ' || b == b'>'
}

fn is_binary(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}
