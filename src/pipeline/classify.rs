//! Content classification: picks the parts of a message worth delivering.
//!
//! A message is deliverable when it has at least one textual part or one
//! image part. Everything else (PDFs, calendar invites, ...) is ignored.

use std::borrow::Cow;

use mail_parser::{Message, MessagePart, MimeHeaders, PartType};

use crate::error::DeliveryError;

/// Textual and image parts of a message, each in original part order.
#[derive(Debug, Default)]
pub struct Content<'m> {
    pub text: Vec<&'m MessagePart<'m>>,
    pub images: Vec<&'m MessagePart<'m>>,
}

impl<'m> Content<'m> {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.images.is_empty()
    }

    /// Body of the first textual part. Only this one is ever delivered.
    pub fn body_text(&self) -> Option<Cow<'m, str>> {
        self.text.first().map(|part| match part.text_contents() {
            Some(text) => Cow::Borrowed(text),
            None => String::from_utf8_lossy(part.contents()),
        })
    }
}

/// Split a parsed message into its textual and image leaf parts.
///
/// Multipart containers are skipped; attached `message/rfc822` parts are
/// descended into so their leaves count too.
pub fn classify<'m>(message: &'m Message<'m>) -> Content<'m> {
    let mut content = Content::default();
    collect(message, &mut content);
    content
}

fn collect<'m>(message: &'m Message<'m>, content: &mut Content<'m>) {
    for part in &message.parts {
        match &part.body {
            PartType::Multipart(_) => {}
            PartType::Message(nested) => collect(nested, content),
            _ => match part.content_type() {
                // RFC 2045: no Content-Type means text/plain.
                None => content.text.push(part),
                Some(ct) if ct.ctype().eq_ignore_ascii_case("text") => content.text.push(part),
                Some(ct) if ct.ctype().eq_ignore_ascii_case("image") => content.images.push(part),
                Some(_) => {}
            },
        }
    }
}

/// Filename from an image part's Content-Disposition, used as both the
/// upload name and the caption.
pub fn image_filename<'m>(part: &'m MessagePart<'m>, index: usize) -> Result<&'m str, DeliveryError> {
    let disposition = part
        .content_disposition()
        .ok_or(DeliveryError::MissingDisposition { index })?;
    disposition
        .attribute("filename")
        .filter(|name| !name.trim().is_empty())
        .ok_or(DeliveryError::MissingFilename { index })
}
