//! Push-style element events over a streamed XML document.
//!
//! `quick_xml` reports start tags, text and end tags separately. The extractor wants one
//! `Enter` event per element that already carries the text of leaf elements, so a start tag is
//! held back until the next markup event shows whether text belongs to it.

use crate::bundle::error::{classify_xml_error, BundleError};
use log::warn;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::VecDeque;
use tokio::io::AsyncBufRead;

/// An entered element. Names are local names, i.e. without namespace prefix; attribute keys
/// are kept as written (`dwd:elementName`).
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: Option<String>,
}

impl Element {
    /// Value of the first attribute whose key ends with `suffix`.
    pub fn attribute_ending_with(&self, suffix: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.ends_with(suffix))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentEvent {
    Enter(Element),
    /// Local name of the element being left.
    Exit(String),
}

/// Pulls [`DocumentEvent`]s from an XML byte stream, one at a time.
pub struct DocumentEvents<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    pending: Option<Element>,
    queued: VecDeque<DocumentEvent>,
    finished: bool,
}

impl<R: AsyncBufRead + Unpin> DocumentEvents<R> {
    pub fn new(source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.trim_text(true);
        Self {
            reader,
            buf: Vec::with_capacity(8 * 1024),
            pending: None,
            queued: VecDeque::new(),
            finished: false,
        }
    }

    /// The next event, or `None` at the end of the document.
    pub async fn next_event(&mut self) -> Result<Option<DocumentEvent>, BundleError> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }

            let event = self
                .reader
                .read_event_into_async(&mut self.buf)
                .await
                .map_err(classify_xml_error)?;
            match event {
                Event::Start(start) => {
                    let element = element_from(&start, &self.reader);
                    Self::flush_pending(&mut self.pending, &mut self.queued);
                    self.pending = Some(element);
                }
                Event::Empty(start) => {
                    let element = element_from(&start, &self.reader);
                    Self::flush_pending(&mut self.pending, &mut self.queued);
                    let name = element.name.clone();
                    self.queued.push_back(DocumentEvent::Enter(element));
                    self.queued.push_back(DocumentEvent::Exit(name));
                }
                Event::Text(text) => {
                    if let Some(element) = self.pending.as_mut() {
                        match text.unescape() {
                            Ok(text) => append_text(element, &text),
                            Err(e) => {
                                warn!("Skipping undecodable text of <{}>: {}", element.name, e)
                            }
                        }
                    }
                }
                Event::CData(cdata) => {
                    if let Some(element) = self.pending.as_mut() {
                        append_text(element, &String::from_utf8_lossy(&cdata.into_inner()));
                    }
                }
                Event::End(end) => {
                    let name = String::from_utf8_lossy(end.local_name().as_ref()).into_owned();
                    Self::flush_pending(&mut self.pending, &mut self.queued);
                    self.queued.push_back(DocumentEvent::Exit(name));
                }
                Event::Eof => {
                    Self::flush_pending(&mut self.pending, &mut self.queued);
                    self.finished = true;
                }
                _ => {}
            }
            self.buf.clear();
        }
    }

    fn flush_pending(pending: &mut Option<Element>, queued: &mut VecDeque<DocumentEvent>) {
        if let Some(element) = pending.take() {
            queued.push_back(DocumentEvent::Enter(element));
        }
    }
}

/// Attribute values are decoded with the document's declared encoding, like text.
fn element_from<B>(start: &BytesStart<'_>, reader: &Reader<B>) -> Element {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let attributes = start
        .attributes()
        .filter_map(|attr| match attr {
            Ok(attr) => {
                let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                match attr.decode_and_unescape_value(reader) {
                    Ok(value) => Some((key, value.into_owned())),
                    Err(e) => {
                        warn!("Skipping attribute {} of <{}>: {}", key, name, e);
                        None
                    }
                }
            }
            Err(e) => {
                warn!("Skipping malformed attribute of <{}>: {}", name, e);
                None
            }
        })
        .collect();
    Element {
        name,
        attributes,
        text: None,
    }
}

fn append_text(element: &mut Element, text: &str) {
    element.text.get_or_insert_with(String::new).push_str(text);
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(xml: &str) -> Result<Vec<DocumentEvent>, BundleError> {
        let mut events = DocumentEvents::new(xml.as_bytes());
        let mut out = vec![];
        while let Some(event) = events.next_event().await? {
            out.push(event);
        }
        Ok(out)
    }

    fn enter(name: &str, text: Option<&str>) -> DocumentEvent {
        DocumentEvent::Enter(Element {
            name: name.to_string(),
            attributes: vec![],
            text: text.map(str::to_string),
        })
    }

    fn exit(name: &str) -> DocumentEvent {
        DocumentEvent::Exit(name.to_string())
    }

    #[tokio::test]
    async fn test_leaf_text_travels_with_enter() {
        let events = collect("<a:root><a:leaf> 12 &amp; 13 </a:leaf><b:empty/></a:root>")
            .await
            .unwrap();
        assert_eq!(
            events,
            vec![
                enter("root", None),
                enter("leaf", Some("12 & 13")),
                exit("leaf"),
                enter("empty", None),
                exit("empty"),
                exit("root"),
            ]
        );
    }

    #[tokio::test]
    async fn test_attributes_keep_prefixed_keys() {
        let events = collect(r#"<dwd:Forecast dwd:elementName="Rad1h"><dwd:value>1</dwd:value></dwd:Forecast>"#)
            .await
            .unwrap();
        let DocumentEvent::Enter(forecast) = &events[0] else {
            panic!("expected enter, got {:?}", events[0]);
        };
        assert_eq!(forecast.name, "Forecast");
        assert_eq!(forecast.attribute_ending_with("elementName"), Some("Rad1h"));
        assert_eq!(forecast.attribute_ending_with("unit"), None);
    }

    #[tokio::test]
    async fn test_cdata_is_text() {
        let events = collect("<r><name><![CDATA[N0677]]></name></r>").await.unwrap();
        assert_eq!(events[1], enter("name", Some("N0677")));
    }

    #[tokio::test]
    async fn test_mismatched_end_tag_is_malformed() {
        let err = collect("<r><a>1</b></r>").await.unwrap_err();
        assert!(matches!(err, BundleError::MalformedDocument(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_latin1_declared_document() {
        let mut xml = br#"<?xml version="1.0" encoding="ISO-8859-1"?><r><d city="K"#.to_vec();
        xml.push(0xD6); // Ö in ISO-8859-1
        xml.extend_from_slice(b"LN\">M");
        xml.push(0xDC); // Ü in ISO-8859-1
        xml.extend_from_slice(b"NCHEN</d></r>");
        let mut events = DocumentEvents::new(xml.as_slice());
        let mut texts = vec![];
        let mut cities = vec![];
        while let Some(event) = events.next_event().await.unwrap() {
            if let DocumentEvent::Enter(element) = event {
                if let Some(city) = element.attribute_ending_with("city") {
                    cities.push(city.to_string());
                }
                if let Some(t) = element.text {
                    texts.push(t);
                }
            }
        }
        assert_eq!(texts, vec!["MÜNCHEN".to_string()]);
        assert_eq!(cities, vec!["KÖLN".to_string()]);
    }
}
