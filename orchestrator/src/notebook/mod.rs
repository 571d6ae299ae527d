//! Notebook documents (nbformat 4)
//!
//! A stateless codec between notebook bytes and an in-memory document, plus
//! the conversions between cell outputs and execution records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::execution::CellInput;
use crate::models::{CellExecutionRecord, KernelSpec, OutputItem, MIME_TEXT_PLAIN};

/// Text stored either as one string or as a list of lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MultilineString {
    Single(String),
    Lines(Vec<String>),
}

impl MultilineString {
    /// Split text into lines that keep their terminators, as Jupyter writes
    pub fn from_text(text: &str) -> Self {
        MultilineString::Lines(text.split_inclusive('\n').map(str::to_string).collect())
    }

    pub fn text(&self) -> String {
        match self {
            MultilineString::Single(text) => text.clone(),
            MultilineString::Lines(lines) => lines.concat(),
        }
    }
}

impl Default for MultilineString {
    fn default() -> Self {
        MultilineString::Lines(Vec::new())
    }
}

/// Outputs with a known `output_type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum KnownOutput {
    Stream {
        name: String,
        text: MultilineString,
    },
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
    DisplayData {
        data: Map<String, Value>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    ExecuteResult {
        data: Map<String, Value>,
        execution_count: Option<u32>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
}

/// One cell output. Records this codec does not understand are carried
/// through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Output {
    Known(KnownOutput),
    Unrecognized(Value),
}

impl From<&OutputItem> for Output {
    fn from(item: &OutputItem) -> Self {
        let known = match item {
            OutputItem::Text { mime, data } if mime == MIME_TEXT_PLAIN => KnownOutput::Stream {
                name: "stdout".to_string(),
                text: MultilineString::from_text(&String::from_utf8_lossy(data)),
            },
            OutputItem::Text { mime, data } => {
                let mut bundle = Map::new();
                bundle.insert(
                    mime.clone(),
                    Value::String(String::from_utf8_lossy(data).into_owned()),
                );
                KnownOutput::DisplayData {
                    data: bundle,
                    metadata: Map::new(),
                }
            }
            OutputItem::Error {
                name,
                message,
                trace,
            } => KnownOutput::Error {
                ename: name.clone(),
                evalue: message.clone(),
                traceback: trace.clone(),
            },
        };
        Output::Known(known)
    }
}

impl Output {
    /// The equivalent output item, when there is one
    pub fn to_item(&self) -> Option<OutputItem> {
        match self {
            Output::Known(KnownOutput::Stream { text, .. }) => Some(OutputItem::text(text.text())),
            Output::Known(KnownOutput::Error {
                ename,
                evalue,
                traceback,
            }) => Some(OutputItem::Error {
                name: ename.clone(),
                message: evalue.clone(),
                trace: traceback.clone(),
            }),
            Output::Known(KnownOutput::DisplayData { data, .. })
            | Output::Known(KnownOutput::ExecuteResult { data, .. }) => {
                let (mime, value) = match data.get(MIME_TEXT_PLAIN) {
                    Some(value) => (MIME_TEXT_PLAIN, value),
                    None => data.iter().next().map(|(k, v)| (k.as_str(), v))?,
                };
                Some(OutputItem::Text {
                    mime: mime.to_string(),
                    data: bundle_text(value).into_bytes(),
                })
            }
            Output::Unrecognized(_) => None,
        }
    }
}

/// Mime bundle entries are strings, lists of lines, or JSON
fn bundle_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(lines) if lines.iter().all(Value::is_string) => lines
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .concat(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeCell {
    pub execution_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    pub source: MultilineString,
}

impl CodeCell {
    pub fn new(source: &str) -> Self {
        Self {
            execution_count: None,
            id: None,
            metadata: Map::new(),
            outputs: Vec::new(),
            source: MultilineString::from_text(source),
        }
    }

    /// Replace outputs and execution count with those of a finished run
    pub fn apply_record(&mut self, record: &CellExecutionRecord) {
        self.outputs = record.outputs().iter().map(Output::from).collect();
        self.execution_count = record.execution_order;
    }
}

/// Markdown and raw cells
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCell {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub source: MultilineString,
}

impl TextCell {
    pub fn new(source: &str) -> Self {
        Self {
            attachments: None,
            id: None,
            metadata: Map::new(),
            source: MultilineString::from_text(source),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cell_type", rename_all = "lowercase")]
pub enum Cell {
    Code(CodeCell),
    Markdown(TextCell),
    Raw(TextCell),
}

impl Cell {
    pub fn kind(&self) -> &'static str {
        match self {
            Cell::Code(_) => "code",
            Cell::Markdown(_) => "markdown",
            Cell::Raw(_) => "raw",
        }
    }

    pub fn source(&self) -> String {
        match self {
            Cell::Code(cell) => cell.source.text(),
            Cell::Markdown(cell) | Cell::Raw(cell) => cell.source.text(),
        }
    }
}

/// `metadata.kernelspec`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSpecMetadata {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotebookMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernelspec: Option<KernelSpecMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_info: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub metadata: NotebookMetadata,
    pub nbformat: u32,
    pub nbformat_minor: u32,
}

impl Default for Notebook {
    fn default() -> Self {
        Self {
            cells: Vec::new(),
            metadata: NotebookMetadata::default(),
            nbformat: 4,
            nbformat_minor: 5,
        }
    }
}

impl Notebook {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialize with one-space indentation and a trailing newline
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut serializer)?;
        out.push(b'\n');
        Ok(out)
    }

    /// Controller input for every code cell, in document order.
    ///
    /// Cells are keyed by their id, or by position when they have none.
    pub fn execution_inputs(&self) -> Vec<CellInput> {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(index, cell)| match cell {
                Cell::Code(code) => Some(CellInput::new(cell_key(index, code), code.source.text())),
                _ => None,
            })
            .collect()
    }

    /// Write finished runs back into the cells they came from
    pub fn apply_records(&mut self, records: &[CellExecutionRecord]) {
        for (index, cell) in self.cells.iter_mut().enumerate() {
            if let Cell::Code(code) = cell {
                let key = cell_key(index, code);
                if let Some(record) = records.iter().find(|r| r.cell_id == key) {
                    code.apply_record(record);
                }
            }
        }
    }

    /// Record the kernel the document runs on
    pub fn set_kernel(&mut self, kernel: &KernelSpec) {
        self.metadata.kernelspec = Some(KernelSpecMetadata {
            display_name: kernel.display_name.clone(),
            language: kernel.language.clone(),
            name: kernel.name.clone(),
        });
        if let Some(language) = &kernel.language {
            let mut info = match self.metadata.language_info.take() {
                Some(Value::Object(info)) => info,
                _ => Map::new(),
            };
            info.insert("name".to_string(), Value::String(language.clone()));
            self.metadata.language_info = Some(Value::Object(info));
        }
    }
}

fn cell_key(index: usize, cell: &CodeCell) -> String {
    cell.id.clone().unwrap_or_else(|| format!("cell-{index}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r##"{
 "cells": [
  {
   "cell_type": "markdown",
   "id": "intro",
   "metadata": {},
   "source": ["# Title\n", "Some *text*"]
  },
  {
   "cell_type": "code",
   "execution_count": 3,
   "id": "calc",
   "metadata": {"tags": ["keep"]},
   "outputs": [
    {"name": "stdout", "output_type": "stream", "text": ["5\n", "6\n"]},
    {"output_type": "error", "ename": "ValueError", "evalue": "bad", "traceback": ["Traceback", "ValueError: bad"]},
    {"output_type": "display_data", "data": {"text/html": "<b>hi</b>"}, "metadata": {}},
    {"output_type": "widget_state", "payload": 42}
   ],
   "source": "print(5)\nprint(6)"
  },
  {
   "cell_type": "raw",
   "metadata": {},
   "source": []
  }
 ],
 "metadata": {
  "kernelspec": {"display_name": "Python 3", "language": "python", "name": "python3"},
  "language_info": {"name": "python", "version": "3.11.4"},
  "authors": ["someone"]
 },
 "nbformat": 4,
 "nbformat_minor": 5
}"##;

    #[test]
    fn test_parse_sample() {
        let notebook = Notebook::from_slice(SAMPLE.as_bytes()).unwrap();
        assert_eq!(notebook.cells.len(), 3);
        assert_eq!(
            notebook.cells.iter().map(Cell::kind).collect::<Vec<_>>(),
            vec!["markdown", "code", "raw"]
        );
        assert_eq!(notebook.cells[0].source(), "# Title\nSome *text*");

        let Cell::Code(code) = &notebook.cells[1] else {
            panic!("expected a code cell");
        };
        assert_eq!(code.execution_count, Some(3));
        assert_eq!(code.outputs.len(), 4);
        assert!(matches!(code.outputs[3], Output::Unrecognized(_)));
        assert_eq!(
            notebook.metadata.kernelspec.as_ref().map(|k| k.name.as_str()),
            Some("python3")
        );
        assert!(notebook.metadata.extra.contains_key("authors"));
    }

    #[test]
    fn test_round_trip_preserves_cells_and_outputs() {
        let mut notebook = Notebook::default();
        let mut code = CodeCell::new("print('hello')\n");
        code.outputs.push(Output::from(&OutputItem::text("hello\nworld\n")));
        notebook.cells.push(Cell::Code(code));
        notebook.cells.push(Cell::Markdown(TextCell::new("## Notes\n")));

        let bytes = notebook.to_vec().unwrap();
        let decoded = Notebook::from_slice(&bytes).unwrap();

        assert_eq!(decoded, notebook);
        assert_eq!(decoded.cells.len(), 2);
        assert_eq!(decoded.cells[0].kind(), "code");
        assert_eq!(decoded.cells[1].kind(), "markdown");
        let Cell::Code(code) = &decoded.cells[0] else {
            panic!("expected a code cell");
        };
        assert_eq!(
            code.outputs[0].to_item().and_then(|item| item.as_text()),
            Some("hello\nworld\n".to_string())
        );
    }

    #[test]
    fn test_sample_round_trip_is_lossless() {
        let notebook = Notebook::from_slice(SAMPLE.as_bytes()).unwrap();
        let again = Notebook::from_slice(&notebook.to_vec().unwrap()).unwrap();
        assert_eq!(again, notebook);

        let original: Value = serde_json::from_str(SAMPLE).unwrap();
        let written: Value = serde_json::from_slice(&notebook.to_vec().unwrap()).unwrap();
        assert_eq!(written, original);
    }

    #[test]
    fn test_writes_jupyter_layout() {
        let mut notebook = Notebook::default();
        notebook.cells.push(Cell::Code(CodeCell::new("x = 1")));
        let text = String::from_utf8(notebook.to_vec().unwrap()).unwrap();

        assert!(text.starts_with("{\n \"cells\": [\n  {\n   \"cell_type\": \"code\""));
        assert!(text.contains("\"execution_count\": null"));
        assert!(text.ends_with("}\n"));
    }

    #[test]
    fn test_output_conversions() {
        let stream = Output::from(&OutputItem::text("a\nb"));
        assert_eq!(
            serde_json::to_value(&stream).unwrap(),
            serde_json::json!({"output_type": "stream", "name": "stdout", "text": ["a\n", "b"]})
        );

        let error = OutputItem::from_error_detail("Traceback\nKeyError: 'k'");
        assert_eq!(
            serde_json::to_value(Output::from(&error)).unwrap(),
            serde_json::json!({
                "output_type": "error",
                "ename": "KeyError",
                "evalue": "'k'",
                "traceback": ["Traceback", "KeyError: 'k'"]
            })
        );
        assert_eq!(Output::from(&error).to_item(), Some(error));

        let html = OutputItem::Text {
            mime: "text/html".to_string(),
            data: b"<p>x</p>".to_vec(),
        };
        assert_eq!(
            serde_json::to_value(Output::from(&html)).unwrap(),
            serde_json::json!({"output_type": "display_data", "data": {"text/html": "<p>x</p>"}, "metadata": {}})
        );
        assert_eq!(Output::from(&html).to_item(), Some(html));
    }

    #[test]
    fn test_execute_result_prefers_plain_text() {
        let output: Output = serde_json::from_value(serde_json::json!({
            "output_type": "execute_result",
            "execution_count": 1,
            "data": {"text/html": "<i>2</i>", "text/plain": ["2"]},
            "metadata": {}
        }))
        .unwrap();
        assert_eq!(output.to_item(), Some(OutputItem::text("2")));
    }

    #[test]
    fn test_apply_records() {
        let mut notebook = Notebook::from_slice(SAMPLE.as_bytes()).unwrap();
        notebook.cells.push(Cell::Code(CodeCell::new("print('new')")));

        let inputs = notebook.execution_inputs();
        assert_eq!(
            inputs,
            vec![
                CellInput::new("calc", "print(5)\nprint(6)"),
                CellInput::new("cell-3", "print('new')"),
            ]
        );

        let mut first = CellExecutionRecord::new("calc");
        first.begin(1).unwrap();
        first.succeed("5\n6\n").unwrap();
        let mut second = CellExecutionRecord::new("cell-3");
        second.begin(2).unwrap();
        second.succeed("").unwrap();

        notebook.apply_records(&[first, second]);

        let Cell::Code(calc) = &notebook.cells[1] else {
            panic!("expected a code cell");
        };
        assert_eq!(calc.execution_count, Some(1));
        assert_eq!(calc.outputs, vec![Output::from(&OutputItem::text("5\n6\n"))]);

        let Cell::Code(new) = &notebook.cells[3] else {
            panic!("expected a code cell");
        };
        assert_eq!(new.execution_count, Some(2));
        assert!(new.outputs.is_empty());
    }

    #[test]
    fn test_set_kernel() {
        let mut notebook = Notebook::from_slice(SAMPLE.as_bytes()).unwrap();
        notebook.set_kernel(&KernelSpec {
            name: "py311".to_string(),
            display_name: "Python 3.11".to_string(),
            language: Some("python".to_string()),
        });

        let kernelspec = notebook.metadata.kernelspec.as_ref().unwrap();
        assert_eq!(kernelspec.name, "py311");
        assert_eq!(kernelspec.display_name, "Python 3.11");
        // Other language_info fields survive
        assert_eq!(
            notebook.metadata.language_info,
            Some(serde_json::json!({"name": "python", "version": "3.11.4"}))
        );
    }

    #[test]
    fn test_rejects_unknown_cell_type() {
        let bad = br#"{"cells": [{"cell_type": "heading", "source": ""}], "metadata": {}, "nbformat": 4, "nbformat_minor": 5}"#;
        assert!(Notebook::from_slice(bad).is_err());
    }
}
