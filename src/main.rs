use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use reqwest::Client;
use sheetpoints::{
    config::{ArcgisConfig, Config, DatabaseConfig, SheetConfig},
    logging,
    sink::{
        arcgis::{convert_for_arcgis, ArcGisSink},
        export::{export_features, read_feature_records, write_error_meta},
        postgis::{connect, PostgisSink, TableName},
        run_batches, SinkReport,
    },
    table::{csv::write_table_csv, source::TableSource, RawTable},
    transform::{clean::clean_table, prepare_features, Expansion, FeatureRecord},
};
use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "sheetpoints", version, about = "Expand survey sheets into point features and publish them")]
struct Cli {
    /// Optional YAML config; environment variables override it.
    #[arg(long, global = true, env = "SHEETPOINTS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct SourceArgs {
    /// Local CSV or workbook.
    #[arg(long, short = 'i')]
    input: Option<PathBuf>,
    #[arg(long)]
    sheet_id: Option<String>,
    /// gid for the public CSV export.
    #[arg(long)]
    gid: Option<u64>,
    /// Download the public CSV export of --sheet-id.
    #[arg(long)]
    download: bool,
    /// service_account.json for reading a private sheet.
    #[arg(long)]
    service_account: Option<PathBuf>,
    #[arg(long)]
    worksheet_name: Option<String>,
    /// Keep the downloaded CSV next to the working directory.
    #[arg(long)]
    keep_tmp: bool,
}

impl SourceArgs {
    /// Flags first, then the `sheet` config section.
    fn resolve(&self, sheet: &SheetConfig) -> Result<TableSource> {
        let service_account = self
            .service_account
            .clone()
            .or_else(|| sheet.service_account_json.as_ref().map(PathBuf::from));
        TableSource::from_flags(
            self.input.as_deref(),
            self.sheet_id.as_deref().or(sheet.sheet_id.as_deref()),
            self.download,
            self.gid.unwrap_or(sheet.gid),
            service_account.as_deref(),
            self.worksheet_name.as_deref().or(sheet.worksheet.as_deref()),
            self.keep_tmp,
        )
    }
}

#[derive(Debug, Args)]
struct ArcgisArgs {
    /// FeatureServer/<layerIndex> URL.
    #[arg(long)]
    feature_layer_url: Option<String>,
    #[arg(long)]
    token: Option<String>,
}

impl ArcgisArgs {
    fn apply(&self, mut cfg: ArcgisConfig) -> ArcgisConfig {
        if let Some(u) = &self.feature_layer_url {
            cfg.feature_layer_url = Some(u.clone());
        }
        if let Some(t) = &self.token {
            cfg.token = Some(t.clone());
        }
        cfg
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read a source, expand rows into features, write exports and optionally upload to ArcGIS.
    Prepare {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        base_name: Option<String>,
        #[arg(long, default_value_t = 10)]
        max_preview: usize,
        #[arg(long)]
        upload: bool,
        #[command(flatten)]
        arcgis: ArcgisArgs,
        /// Upload batch size (defaults to UPLOAD_BATCH_SIZE or 250).
        #[arg(long)]
        batch: Option<usize>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Read a source, expand, export under <dir>/<table>.* and insert into PostGIS.
    LoadPostgis {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        table: Option<String>,
        #[arg(long)]
        db_url: Option<String>,
        #[arg(long, default_value_t = 500)]
        batch: usize,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        truncate_before_insert: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Upload a prepared features JSON to an ArcGIS feature layer.
    Upload {
        #[arg(long)]
        features: PathBuf,
        #[command(flatten)]
        arcgis: ArcgisArgs,
        #[arg(long, default_value_t = 200)]
        batch: usize,
        /// Seconds to pause between batches.
        #[arg(long, default_value_t = 0.3)]
        sleep: f64,
        #[arg(long)]
        dry_run: bool,
    },
    /// Read a sheet, write the cleaned CSV and optionally load it into PostGIS.
    FetchSheet {
        #[arg(long)]
        sheet_id: Option<String>,
        #[arg(long)]
        service_account: Option<PathBuf>,
        #[arg(long)]
        worksheet_name: Option<String>,
        /// Use the public CSV export instead of the Sheets API.
        #[arg(long)]
        download: bool,
        #[arg(long)]
        gid: Option<u64>,
        #[arg(long, default_value = "results/from_gsheet.csv")]
        out: PathBuf,
        #[arg(long)]
        run_transform: bool,
        #[arg(long)]
        table: Option<String>,
        #[arg(long, default_value_t = 500)]
        batch: usize,
        #[arg(long)]
        db_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // ─── 1) load config (.env first, so it can set the log filter) ───
    let cli = Cli::parse();
    let cfg = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: config: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    // ─── 2) init logging ─────────────────────────────────────────────
    logging::init(&cfg.logging);

    // ─── 3) run the subcommand ───────────────────────────────────────
    match run(cli.command, cfg).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, cfg: Config) -> Result<ExitCode> {
    let client = Client::new();
    match command {
        Command::Prepare {
            source,
            output_dir,
            base_name,
            max_preview,
            upload,
            arcgis,
            batch,
            dry_run,
        } => {
            let source = source.resolve(&cfg.sheet)?;
            let out_dir = output_dir.unwrap_or_else(|| PathBuf::from(&cfg.output.dir));
            let base = base_name.unwrap_or_else(|| cfg.output.base_name.clone());

            let table = source.read(&client).await?;
            let expansion = expand_or_snapshot(table, &out_dir).await?;
            let paths = export_features(&out_dir, &base, &expansion.features)?;
            info!(json = %paths.json.display(), parquet = %paths.parquet.display(), "saved prepared features");
            print_preview(&expansion, max_preview);

            if !upload {
                return Ok(ExitCode::SUCCESS);
            }
            if dry_run || cfg.dry_run {
                info!("dry run: upload skipped");
                return Ok(ExitCode::SUCCESS);
            }
            let arc = arcgis.apply(cfg.arcgis.clone());
            let batch = batch.unwrap_or(arc.batch_size);
            let records: Vec<FeatureRecord> =
                expansion.features.iter().map(FeatureRecord::from).collect();
            let report = upload_records(&client, &arc, false, &records, batch).await?;
            finish(&report)
        }

        Command::LoadPostgis {
            source,
            table,
            db_url,
            batch,
            output_dir,
            truncate_before_insert,
            dry_run,
        } => {
            let source = source.resolve(&cfg.sheet)?;
            let out_dir = output_dir.unwrap_or_else(|| PathBuf::from(&cfg.output.dir));
            let table_name = table.unwrap_or_else(|| cfg.database.table.clone());
            let db = with_db_url(&cfg.database, db_url);

            let raw = source.read(&client).await?;
            load_into_postgis(
                &db,
                &table_name,
                raw,
                &out_dir,
                batch,
                truncate_before_insert,
                dry_run || cfg.dry_run,
            )
            .await
        }

        Command::Upload {
            features,
            arcgis,
            batch,
            sleep,
            dry_run,
        } => {
            let mut arc = arcgis.apply(cfg.arcgis.clone());
            arc.sleep_between_ms = (sleep.max(0.0) * 1000.0) as u64;
            let records = read_feature_records(&features)?;
            info!(features = records.len(), path = %features.display(), "loaded features");
            let report = upload_records(&client, &arc, dry_run || cfg.dry_run, &records, batch).await?;
            finish(&report)
        }

        Command::FetchSheet {
            sheet_id,
            service_account,
            worksheet_name,
            download,
            gid,
            out,
            run_transform,
            table,
            batch,
            db_url,
        } => {
            let source = SourceArgs {
                input: None,
                sheet_id,
                gid,
                download,
                service_account,
                worksheet_name,
                keep_tmp: false,
            }
            .resolve(&cfg.sheet)?;

            let raw = source.read(&client).await?;
            let cleaned = clean_table(&raw);
            write_table_csv(&out, &cleaned.table)?;
            info!(path = %out.display(), rows = cleaned.table.len(), "saved cleaned sheet");

            if !run_transform {
                return Ok(ExitCode::SUCCESS);
            }
            let out_dir = out
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(&cfg.output.dir));
            let table_name = table.unwrap_or_else(|| cfg.database.table.clone());
            let db = with_db_url(&cfg.database, db_url);
            load_into_postgis(&db, &table_name, cleaned.table, &out_dir, batch, false, cfg.dry_run).await
        }
    }
}

fn with_db_url(db: &DatabaseConfig, db_url: Option<String>) -> DatabaseConfig {
    let mut db = db.clone();
    if db_url.is_some() {
        db.url = db_url;
    }
    db
}

/// Expand on the blocking pool. A header that does not resolve leaves a
/// `processing_error_meta.json` snapshot in `out_dir`.
async fn expand_or_snapshot(table: RawTable, out_dir: &Path) -> Result<Expansion> {
    let headers = table.headers.clone();
    let result = tokio::task::spawn_blocking(move || prepare_features(&table))
        .await
        .context("expansion task failed")?;
    match result {
        Ok(expansion) => Ok(expansion),
        Err(e) => {
            let meta = write_error_meta(out_dir, &headers, &e.to_string())?;
            error!(meta = %meta.display(), "column resolution failed");
            Err(e.into())
        }
    }
}

fn print_preview(expansion: &Expansion, n: usize) {
    println!(
        "Prepared {} features from {} rows. Preview:",
        expansion.stats.features, expansion.stats.rows_read
    );
    for attrs in expansion.preview(n) {
        match serde_json::to_string(attrs) {
            Ok(line) => println!("{}", line),
            Err(e) => error!(error = %e, "could not render preview row"),
        }
    }
}

async fn upload_records(
    client: &Client,
    arc: &ArcgisConfig,
    dry_run: bool,
    records: &[FeatureRecord],
    batch: usize,
) -> Result<SinkReport> {
    let features = convert_for_arcgis(records);
    info!(features = features.len(), batch, dry_run, "uploading to ArcGIS");
    let sink = ArcGisSink::new(client.clone(), arc, dry_run)?;
    Ok(run_batches(&sink, &features, batch).await)
}

async fn load_into_postgis(
    db: &DatabaseConfig,
    table_name: &str,
    raw: RawTable,
    out_dir: &Path,
    batch: usize,
    truncate: bool,
    dry_run: bool,
) -> Result<ExitCode> {
    let table = TableName::parse(table_name)?;
    let expansion = expand_or_snapshot(raw, out_dir).await?;
    let paths = export_features(out_dir, table.name(), &expansion.features)?;
    info!(json = %paths.json.display(), features = expansion.features.len(), "saved prepared features");

    if dry_run {
        info!("dry run: database untouched");
        return Ok(ExitCode::SUCCESS);
    }

    let pool = connect(db).await?;
    let sink = PostgisSink::new(pool, table);
    sink.ensure_table().await?;
    if truncate {
        sink.truncate().await?;
    }
    let report = run_batches(&sink, &expansion.features, batch).await;
    finish(&report)
}

/// Print the sink report; a failed batch turns into exit code 1.
fn finish(report: &SinkReport) -> Result<ExitCode> {
    println!(
        "{}",
        serde_json::to_string_pretty(report).context("rendering report")?
    );
    match report.failure() {
        Some(failure) => {
            error!(written = report.written(), "{}", failure);
            Ok(ExitCode::FAILURE)
        }
        None => {
            info!(written = report.written(), sink = %report.sink, "done");
            Ok(ExitCode::SUCCESS)
        }
    }
}
