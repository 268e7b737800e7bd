//! XML file backend.
//!
//! Reads documents of the form
//! `<data><fields><field>name</field>…</fields><rows><row><col>v</col>…</row>…</rows></data>`.
//! Text is decoded by the XML parser from the document's own declaration, so
//! cells come back as typed text rather than raw bytes.

use async_trait::async_trait;
use folio_core::{
    Backend, BackendKind, Connection, DatasourceSpec, FileFormat, RawCell, RawRows, Value,
};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::info;

use crate::error::ConnectorError;
use crate::file::FileConnection;

pub struct XmlBackend;

#[async_trait]
impl Backend for XmlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Xml
    }

    async fn connect(&self, spec: &DatasourceSpec) -> anyhow::Result<Box<dyn Connection>> {
        match spec {
            DatasourceSpec::File {
                format: FileFormat::Xml,
                base_dir,
            } => {
                info!("Opened XML datasource (base dir {:?})", base_dir);
                Ok(Box::new(FileConnection::new(base_dir.clone(), parse_xml)))
            }
            other => Err(ConnectorError::UnsupportedSpec(format!(
                "XML backend cannot serve {} datasources",
                other.kind()
            ))
            .into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element {
    Data,
    Fields,
    Field,
    Rows,
    Row,
    Col,
}

impl Element {
    /// The element named `name` when it may appear inside `parent`.
    fn child_of(parent: Option<Element>, name: &[u8]) -> Option<Element> {
        match (parent, name) {
            (None, b"data") => Some(Element::Data),
            (Some(Element::Data), b"fields") => Some(Element::Fields),
            (Some(Element::Data), b"rows") => Some(Element::Rows),
            (Some(Element::Fields), b"field") => Some(Element::Field),
            (Some(Element::Rows), b"row") => Some(Element::Row),
            (Some(Element::Row), b"col") => Some(Element::Col),
            _ => None,
        }
    }
}

fn second_root() -> ConnectorError {
    ConnectorError::MalformedData("XML document has more than one root element".to_string())
}

fn unexpected(name: &[u8], parent: Option<Element>) -> ConnectorError {
    let name = String::from_utf8_lossy(name);
    match parent {
        None => ConnectorError::MalformedData(format!(
            "expected <data> root element, found <{}>",
            name
        )),
        Some(p) => ConnectorError::MalformedData(format!(
            "unexpected element <{}> inside {:?}",
            name, p
        )),
    }
}

#[derive(Default)]
struct Builder {
    columns: Vec<RawCell>,
    rows: Vec<Vec<RawCell>>,
    row: Vec<RawCell>,
    text: Option<String>,
}

impl Builder {
    fn open(&mut self, element: Element) {
        match element {
            Element::Field | Element::Col => self.text = Some(String::new()),
            Element::Row => self.row.clear(),
            _ => {}
        }
    }

    fn close(&mut self, element: Element) {
        match element {
            Element::Field => {
                let name = self.text.take().unwrap_or_default();
                if name.trim().is_empty() {
                    self.columns.push(RawCell::Null);
                } else {
                    self.columns.push(RawCell::Value(Value::Text(name.trim().to_string())));
                }
            }
            Element::Col => {
                let text = self.text.take().unwrap_or_default();
                self.row.push(RawCell::Value(Value::Text(text)));
            }
            Element::Row => self.rows.push(std::mem::take(&mut self.row)),
            _ => {}
        }
    }

    fn finish(self) -> Result<RawRows, ConnectorError> {
        if self.columns.is_empty() {
            return Err(ConnectorError::MalformedData(
                "XML document declares no fields".to_string(),
            ));
        }
        let width = self.columns.len();
        let rows = self
            .rows
            .into_iter()
            .map(|mut row| {
                row.truncate(width);
                row.resize(width, RawCell::Null);
                row
            })
            .collect();
        Ok(RawRows {
            columns: self.columns,
            rows,
        })
    }
}

pub fn parse_xml(bytes: &[u8]) -> Result<RawRows, ConnectorError> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut builder = Builder::default();
    let mut seen_root = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let parent = stack.last().copied();
                if parent.is_none() && seen_root {
                    return Err(second_root());
                }
                let element = Element::child_of(parent, e.name().as_ref())
                    .ok_or_else(|| unexpected(e.name().as_ref(), parent))?;
                seen_root = true;
                builder.open(element);
                stack.push(element);
            }
            Event::Empty(e) => {
                let parent = stack.last().copied();
                if parent.is_none() && seen_root {
                    return Err(second_root());
                }
                let element = Element::child_of(parent, e.name().as_ref())
                    .ok_or_else(|| unexpected(e.name().as_ref(), parent))?;
                seen_root = true;
                match element {
                    Element::Field => builder.columns.push(RawCell::Null),
                    _ => {
                        builder.open(element);
                        builder.close(element);
                    }
                }
            }
            Event::End(_) => {
                if let Some(element) = stack.pop() {
                    builder.close(element);
                }
            }
            Event::Text(t) => {
                if let Some(text) = builder.text.as_mut() {
                    text.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(text) = builder.text.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !seen_root {
        return Err(ConnectorError::MalformedData(
            "XML document has no <data> element".to_string(),
        ));
    }
    if !stack.is_empty() {
        return Err(ConnectorError::MalformedData(
            "XML document ends inside an open element".to_string(),
        ));
    }
    builder.finish()
}
