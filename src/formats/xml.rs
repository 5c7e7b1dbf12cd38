//! Charset-aware decoding of XML documents read from archives.

use encoding_rs::{Encoding, UTF_8};
use quick_xml::Reader;
use quick_xml::events::Event;

/// Decode raw XML bytes to a UTF-8 string.
///
/// The charset is taken from a byte order mark if present, otherwise from the
/// `encoding` of the XML declaration, otherwise UTF-8. Undecodable bytes
/// become U+FFFD. The declaration is dropped from the result since it no
/// longer describes the text.
pub fn decode_document(data: &[u8]) -> String {
    let text = match Encoding::for_bom(data) {
        Some((encoding, bom_len)) => encoding
            .decode_without_bom_handling(&data[bom_len..])
            .0
            .into_owned(),
        None => {
            let encoding = declared_encoding(data).unwrap_or(UTF_8);
            encoding.decode_without_bom_handling(data).0.into_owned()
        }
    };

    strip_declaration(text)
}

/// Encoding named by the XML declaration, if any and known.
fn declared_encoding(data: &[u8]) -> Option<&'static Encoding> {
    let mut reader = Reader::from_reader(data);
    match reader.read_event() {
        Ok(Event::Decl(decl)) => {
            let label = decl.encoding()?.ok()?;
            let encoding = Encoding::for_label(&label);
            if encoding.is_none() {
                tracing::debug!(
                    label = %String::from_utf8_lossy(&label),
                    "Unknown XML encoding, assuming UTF-8"
                );
            }
            encoding
        }
        _ => None,
    }
}

fn strip_declaration(text: String) -> String {
    let trimmed = text.trim_start();
    if trimmed.starts_with("<?xml")
        && let Some(end) = trimmed.find("?>")
    {
        return trimmed[end + 2..].to_string();
    }
    text
}
