//! CSV file backend.
//!
//! The first record is the header. Cells are returned as raw bytes so the
//! datasource charset decides how they are read; an empty cell is the empty
//! string. Short rows are padded with `Null` and long rows truncated.

use async_trait::async_trait;
use folio_core::{Backend, BackendKind, Connection, DatasourceSpec, FileFormat, RawCell, RawRows};
use tracing::info;

use crate::error::ConnectorError;
use crate::file::FileConnection;

pub struct CsvBackend;

#[async_trait]
impl Backend for CsvBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Csv
    }

    async fn connect(&self, spec: &DatasourceSpec) -> anyhow::Result<Box<dyn Connection>> {
        match spec {
            DatasourceSpec::File {
                format: FileFormat::Csv,
                base_dir,
            } => {
                info!("Opened CSV datasource (base dir {:?})", base_dir);
                Ok(Box::new(FileConnection::new(base_dir.clone(), parse_csv)))
            }
            other => Err(ConnectorError::UnsupportedSpec(format!(
                "CSV backend cannot serve {} datasources",
                other.kind()
            ))
            .into()),
        }
    }
}

pub fn parse_csv(bytes: &[u8]) -> Result<RawRows, ConnectorError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut records = reader.byte_records();
    let header = match records.next() {
        Some(record) => record?,
        None => {
            return Err(ConnectorError::MalformedData(
                "CSV file has no header record".to_string(),
            ))
        }
    };
    let columns: Vec<RawCell> = header
        .iter()
        .map(|field| RawCell::Bytes(field.to_vec()))
        .collect();

    let mut rows = Vec::new();
    for record in records {
        let record = record?;
        let mut row: Vec<RawCell> = record
            .iter()
            .take(columns.len())
            .map(|field| RawCell::Bytes(field.to_vec()))
            .collect();
        row.resize(columns.len(), RawCell::Null);
        rows.push(row);
    }

    Ok(RawRows { columns, rows })
}
