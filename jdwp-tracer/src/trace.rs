// Trace document serialization
//
// Streaming, write-only markup: one root element for the session, one
// program_point element per snapshot, one variable element per binding.
// Every write is flushed so a killed process still leaves a maximally
// complete partial document.

use crate::snapshot::PointRecord;
use anyhow::Result;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub struct TraceWriter<W> {
    sink: W,
    closed: bool,
}

impl<W: AsyncWrite + Unpin> TraceWriter<W> {
    /// Write the session's opening element.
    pub async fn open(mut sink: W) -> Result<Self> {
        sink.write_all(b"<trace>\n").await?;
        sink.flush().await?;
        Ok(Self {
            sink,
            closed: false,
        })
    }

    /// Append one program-point record.
    pub async fn write_point(&mut self, record: &PointRecord) -> Result<()> {
        let buf = encode_point(record)?;
        self.sink.write_all(&buf).await?;
        self.sink.flush().await?;
        Ok(())
    }

    /// Write the closing element. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink.write_all(b"</trace>\n").await?;
        self.sink.flush().await?;
        Ok(())
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// Render a complete program_point element into memory. Records are encoded
/// whole before anything reaches the sink, so an encoding failure can never
/// leave an unbalanced element behind.
fn encode_point(record: &PointRecord) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());

    let mut point = BytesStart::new("program_point");
    point.push_attribute(("file", record.point.file.as_str()));
    let line = record.point.line.to_string();
    point.push_attribute(("line", line.as_str()));
    writer.write_event(Event::Start(point))?;

    for var in &record.variables {
        let mut element = BytesStart::new("variable");
        element.push_attribute(("type", var.type_name.as_str()));
        element.push_attribute(("age", var.age.as_str()));
        element.push_attribute(("name", var.name.as_str()));
        if let Some(proxy) = &var.proxy {
            element.push_attribute(("proxy", proxy.as_str()));
        }
        writer.write_event(Event::Start(element))?;
        writer.write_event(Event::Text(BytesText::new(&var.value)))?;
        writer.write_event(Event::End(BytesEnd::new("variable")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("program_point")))?;

    let mut out = writer.into_inner();
    out.push(b'\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Age, PointRecord, ProgramPoint, VariableRecord};
    use std::io::Cursor;

    fn record(variables: Vec<VariableRecord>) -> PointRecord {
        PointRecord {
            point: ProgramPoint {
                file: "Main.java".to_string(),
                line: 10,
            },
            variables,
        }
    }

    fn var(name: &str, type_name: &str, age: Age, value: &str) -> VariableRecord {
        VariableRecord {
            name: name.to_string(),
            type_name: type_name.to_string(),
            age,
            proxy: None,
            value: value.to_string(),
        }
    }

    async fn written(records: &[PointRecord], close: bool) -> String {
        let mut writer = TraceWriter::open(Cursor::new(Vec::new())).await.unwrap();
        for record in records {
            writer.write_point(record).await.unwrap();
        }
        if close {
            writer.close().await.unwrap();
        }
        String::from_utf8(writer.into_inner().into_inner()).unwrap()
    }

    #[tokio::test]
    async fn test_document_shape() {
        let doc = written(
            &[record(vec![var("i", "int", Age::New, "0")])],
            true,
        )
        .await;

        assert_eq!(
            doc,
            "<trace>\n\
             <program_point file=\"Main.java\" line=\"10\">\
             <variable type=\"int\" age=\"new\" name=\"i\">0</variable>\
             </program_point>\n\
             </trace>\n"
        );
    }

    #[tokio::test]
    async fn test_root_open_close_balance() {
        let doc = written(&[record(vec![])], true).await;
        assert_eq!(doc.matches("<trace>").count(), 1);
        assert_eq!(doc.matches("</trace>").count(), 1);
        assert_eq!(doc.matches("<program_point").count(), 1);
        assert_eq!(doc.matches("</program_point>").count(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut writer = TraceWriter::open(Cursor::new(Vec::new())).await.unwrap();
        writer.close().await.unwrap();
        writer.close().await.unwrap();
        let doc = String::from_utf8(writer.into_inner().into_inner()).unwrap();
        assert_eq!(doc.matches("</trace>").count(), 1);
    }

    #[tokio::test]
    async fn test_text_and_attributes_escaped() {
        let mut bad = var("s", "java.lang.String", Age::Modified, "1 < 2 & done");
        bad.proxy = Some("java.lang.Object.toString()".to_string());
        let doc = written(&[record(vec![bad])], true).await;

        assert!(doc.contains("1 &lt; 2 &amp; done"));
        assert!(doc.contains("proxy=\"java.lang.Object.toString()\""));
        assert!(!doc.contains("1 < 2"));
    }

    #[tokio::test]
    async fn test_writes_reach_the_filesystem_incrementally() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.xml");

        let file = tokio::fs::File::create(&path).await.unwrap();
        let mut writer = TraceWriter::open(file).await.unwrap();
        writer
            .write_point(&record(vec![var("i", "int", Age::New, "0")]))
            .await
            .unwrap();

        // Not yet closed: the document should still hold everything written
        let partial = std::fs::read_to_string(&path).unwrap();
        assert!(partial.starts_with("<trace>\n"));
        assert!(partial.contains("<program_point"));
        assert!(!partial.contains("</trace>"));

        writer.close().await.unwrap();
        let full = std::fs::read_to_string(&path).unwrap();
        assert!(full.ends_with("</trace>\n"));
    }
}
