use anyhow::{bail, Context, Result};
use reqwest::Client;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{csv::read_csv_file, sheets, xlsx, RawTable};

/// Where the download of a public export is parked when it has to be kept.
pub const KEPT_DOWNLOAD: &str = "._download.csv";

/// A place rows can be read from. All variants yield the same [`RawTable`].
#[derive(Debug, Clone, PartialEq)]
pub enum TableSource {
    /// A CSV/TSV export or a workbook on disk.
    LocalFile { path: PathBuf },
    /// A sheet shared by link, read through its CSV export.
    PublicExport {
        sheet_id: String,
        gid: u64,
        keep_download: bool,
    },
    /// A private sheet read through the Sheets API with a service-account key.
    ServiceAccountSheet {
        credentials: PathBuf,
        sheet_id: String,
        worksheet: Option<String>,
    },
}

impl TableSource {
    /// Pick a source from the usual CLI flag combination:
    /// `--input`, or `--sheet-id` with `--download`, or `--sheet-id` with `--service-account`.
    pub fn from_flags(
        input: Option<&Path>,
        sheet_id: Option<&str>,
        download: bool,
        gid: u64,
        service_account: Option<&Path>,
        worksheet: Option<&str>,
        keep_download: bool,
    ) -> Result<Self> {
        match (input, sheet_id, download, service_account) {
            (Some(path), _, _, _) => Ok(TableSource::LocalFile {
                path: path.to_path_buf(),
            }),
            (None, Some(id), true, _) => Ok(TableSource::PublicExport {
                sheet_id: id.to_string(),
                gid,
                keep_download,
            }),
            (None, Some(id), false, Some(creds)) => Ok(TableSource::ServiceAccountSheet {
                credentials: creds.to_path_buf(),
                sheet_id: id.to_string(),
                worksheet: worksheet.map(str::to_string),
            }),
            _ => bail!(
                "Provide --input or (--sheet-id with --download) or (--sheet-id with --service-account)"
            ),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            TableSource::LocalFile { path } => format!("file {}", path.display()),
            TableSource::PublicExport { sheet_id, gid, .. } => {
                format!("public sheet {} (gid {})", sheet_id, gid)
            }
            TableSource::ServiceAccountSheet {
                sheet_id, worksheet, ..
            } => format!(
                "sheet {} / {}",
                sheet_id,
                worksheet.as_deref().unwrap_or("<first worksheet>")
            ),
        }
    }

    pub async fn read(&self, client: &Client) -> Result<RawTable> {
        let table = match self {
            TableSource::LocalFile { path } => {
                if !path.exists() {
                    bail!("Input file not found: {}", path.display());
                }
                let path = path.clone();
                tokio::task::spawn_blocking(move || {
                    if xlsx::is_workbook(&path) {
                        xlsx::read_workbook(&path)
                    } else {
                        read_csv_file(&path)
                    }
                })
                .await??
            }
            TableSource::PublicExport {
                sheet_id,
                gid,
                keep_download,
            } => {
                if *keep_download {
                    sheets::download_public_csv(client, sheet_id, *gid, KEPT_DOWNLOAD).await?
                } else {
                    let tmp = tempfile::Builder::new()
                        .prefix("sheetpoints-")
                        .suffix(".csv")
                        .tempfile()
                        .context("creating temporary download file")?;
                    // the temp file is removed when `tmp` drops
                    sheets::download_public_csv(client, sheet_id, *gid, tmp.path()).await?
                }
            }
            TableSource::ServiceAccountSheet {
                credentials,
                sheet_id,
                worksheet,
            } => {
                sheets::read_with_service_account(
                    client,
                    credentials,
                    sheet_id,
                    worksheet.as_deref(),
                )
                .await?
            }
        };
        info!(source = %self.describe(), rows = table.len(), "read rows from source");
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_from_flags_precedence() -> Result<()> {
        let src = TableSource::from_flags(
            Some(Path::new("in.csv")),
            Some("id"),
            true,
            0,
            None,
            None,
            false,
        )?;
        assert_eq!(
            src,
            TableSource::LocalFile {
                path: PathBuf::from("in.csv")
            }
        );

        let src = TableSource::from_flags(None, Some("id"), true, 5, None, None, true)?;
        assert_eq!(
            src,
            TableSource::PublicExport {
                sheet_id: "id".into(),
                gid: 5,
                keep_download: true
            }
        );

        let src = TableSource::from_flags(
            None,
            Some("id"),
            false,
            0,
            Some(Path::new("sa.json")),
            Some("Data"),
            false,
        )?;
        assert!(matches!(src, TableSource::ServiceAccountSheet { worksheet: Some(ref w), .. } if w == "Data"));

        assert!(TableSource::from_flags(None, Some("id"), false, 0, None, None, false).is_err());
        assert!(TableSource::from_flags(None, None, true, 0, None, None, false).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_local_file_read() -> Result<()> {
        let mut tmp = NamedTempFile::new()?;
        tmp.write_all(b"a;b\n1,5;2\n")?;
        let src = TableSource::LocalFile {
            path: tmp.path().to_path_buf(),
        };
        let table = src.read(&Client::new()).await?;
        assert_eq!(table.headers, vec!["a", "b"]);
        assert_eq!(table.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_local_file() {
        let src = TableSource::LocalFile {
            path: PathBuf::from("/definitely/not/here.csv"),
        };
        let err = src.read(&Client::new()).await.unwrap_err();
        assert!(err.to_string().contains("Input file not found"));
    }
}
