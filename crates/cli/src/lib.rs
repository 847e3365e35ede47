use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use folio_core::{
    DocumentHandle, DocumentMetadata, EditorConfig, InsertPosition, PageInfo, Rotation, TextWatermark,
    TocEntry, WriteOptions,
};
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "folio")]
#[command(about = "Inspect and edit PDF page structure")]
pub struct Cli {
    /// JSON editor config; `FOLIO_*` environment variables apply otherwise.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct Input {
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// Password for encrypted documents.
    #[arg(long)]
    password: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable document information.
    Info {
        #[command(flatten)]
        input: Input,
    },
    /// Concatenate PDFs into a new file.
    Merge {
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
        #[arg(value_name = "FILE", required = true, num_args = 2..)]
        inputs: Vec<PathBuf>,
    },
    /// Split a PDF into several files.
    Split {
        #[command(flatten)]
        input: Input,
        /// Pages per output file.
        #[arg(long, conflicts_with = "ranges", required_unless_present = "ranges")]
        every: Option<usize>,
        /// Comma separated 1-based inclusive ranges, e.g. `1-3,4-10`.
        #[arg(long)]
        ranges: Option<String>,
        /// Directory for the output files (defaults to the input's directory).
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,
    },
    /// Copy selected pages into a new file.
    Extract {
        #[command(flatten)]
        input: Input,
        /// 1-based pages, e.g. `1,3-5`.
        #[arg(long)]
        pages: String,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
    /// Remove pages and write the result.
    Delete {
        #[command(flatten)]
        input: Input,
        #[arg(long)]
        pages: String,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
    /// Rotate pages clockwise by a multiple of 90 degrees.
    Rotate {
        #[command(flatten)]
        input: Input,
        #[arg(long)]
        pages: String,
        #[arg(long, allow_negative_numbers = true)]
        degrees: i32,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
    /// Print the bookmark tree as JSON.
    Bookmarks {
        #[command(flatten)]
        input: Input,
    },
    /// Print the text of the document or of selected pages.
    Text {
        #[command(flatten)]
        input: Input,
        /// 1-based pages, e.g. `1,3-5`; all pages when omitted.
        #[arg(long)]
        pages: Option<String>,
    },
    /// Print the pages containing a phrase as JSON.
    Search {
        #[command(flatten)]
        input: Input,
        #[arg(value_name = "QUERY")]
        query: String,
        #[arg(long)]
        case_sensitive: bool,
    },
    /// Stamp text or an image across pages.
    Watermark {
        #[command(flatten)]
        input: Input,
        #[arg(long, conflicts_with = "image", required_unless_present = "image")]
        text: Option<String>,
        /// Image file drawn over each page, scaled to fit.
        #[arg(long, value_name = "FILE")]
        image: Option<PathBuf>,
        #[arg(long, default_value_t = 0.3)]
        opacity: f32,
        /// 1-based pages; all pages when omitted.
        #[arg(long)]
        pages: Option<String>,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
    /// Render one page to a PNG file.
    Render {
        #[command(flatten)]
        input: Input,
        /// 1-based page number.
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// Zoom factor; the configured render DPI decides when omitted.
        #[arg(long)]
        zoom: Option<f32>,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct SearchHit {
    /// 1-based
    page: usize,
    count: usize,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: usize,
    encrypted: bool,
    metadata: DocumentMetadata,
    pages: Vec<PageInfo>,
    bookmarks: usize,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info { input } => run_info(&config, &input),
        Commands::Merge { output, inputs } => run_merge(&config, &inputs, &output),
        Commands::Split { input, every, ranges, out_dir } => {
            run_split(&config, &input, every, ranges.as_deref(), out_dir.as_deref())
        }
        Commands::Extract { input, pages, output } => run_extract(&config, &input, &pages, &output),
        Commands::Delete { input, pages, output } => {
            let document = open(&config, &input)?;
            let indices = parse_pages(&pages)?;
            let removed = document.delete_many(&indices).context("failed to delete pages")?;
            save(&document, &output)?;
            println!("deleted {removed} pages, {} remain", document.page_count()?);
            Ok(())
        }
        Commands::Rotate { input, pages, degrees, output } => {
            let document = open(&config, &input)?;
            let indices = parse_pages(&pages)?;
            document.rotate_many(&indices, degrees).context("failed to rotate pages")?;
            save(&document, &output)?;
            println!("{}", output.display());
            Ok(())
        }
        Commands::Bookmarks { input } => {
            let document = open(&config, &input)?;
            let toc: Vec<TocEntry> = document.toc()?;
            println!("{}", serde_json::to_string_pretty(&toc)?);
            Ok(())
        }
        Commands::Text { input, pages } => {
            let document = open(&config, &input)?;
            let text = match pages {
                Some(pages) => parse_pages(&pages)?
                    .into_iter()
                    .map(|index| document.page_text(index))
                    .collect::<Result<Vec<_>, _>>()?
                    .join("\n\n"),
                None => document.document_text()?,
            };
            println!("{text}");
            Ok(())
        }
        Commands::Search { input, query, case_sensitive } => {
            let document = open(&config, &input)?;
            let hits: Vec<SearchHit> = document
                .search_text(&query, case_sensitive)?
                .into_iter()
                .map(|hit| SearchHit { page: hit.page_index + 1, count: hit.count })
                .collect();
            println!("{}", serde_json::to_string_pretty(&hits)?);
            Ok(())
        }
        Commands::Watermark { input, text, image, opacity, pages, output } => {
            let document = open(&config, &input)?;
            let pages = pages.as_deref().map(parse_pages).transpose()?;
            let stamped = match (text, image) {
                (Some(text), _) => {
                    let watermark = TextWatermark { opacity, ..TextWatermark::new(text) };
                    document.add_text_watermark(&watermark, pages.as_deref())
                }
                (None, Some(image)) => document.add_image_watermark(&image, opacity, pages.as_deref()),
                (None, None) => anyhow::bail!("give --text or --image"),
            }
            .context("failed to stamp watermark")?;
            save(&document, &output)?;
            println!("stamped {stamped} pages in {}", output.display());
            Ok(())
        }
        Commands::Render { input, page, zoom, output } => {
            let document = open(&config, &input)?;
            if page == 0 {
                anyhow::bail!("page numbers are 1-based");
            }
            let index = page - 1;
            let buffer = match zoom {
                Some(zoom) => document.render(index, zoom, Rotation::Deg0),
                None => document.render_default(index),
            }
            .with_context(|| format!("failed to render page {page}"))?;
            if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            buffer.save(&output).with_context(|| format!("failed to write {}", output.display()))?;
            println!("{}x{} {}", buffer.width(), buffer.height(), output.display());
            Ok(())
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EditorConfig> {
    let config = match path {
        Some(path) => EditorConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EditorConfig::from_env().context("invalid FOLIO_* environment setting")?,
    };
    // One-shot commands never render in the background.
    Ok(config.with_render_workers(0))
}

fn open(config: &EditorConfig, input: &Input) -> Result<DocumentHandle> {
    ensure_pdf_exists(&input.file)?;
    let document = DocumentHandle::with_config(config.clone());
    document
        .open(&input.file, input.password.as_deref())
        .with_context(|| format!("failed to open PDF {}", input.file.display()))?;
    Ok(document)
}

fn save(document: &DocumentHandle, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    document
        .save(Some(output), &WriteOptions::default())
        .with_context(|| format!("failed to write {}", output.display()))
}

fn run_info(config: &EditorConfig, input: &Input) -> Result<()> {
    let document = open(config, input)?;
    let payload = InfoOutput {
        path: input.file.display().to_string(),
        page_count: document.page_count()?,
        encrypted: document.is_encrypted()?,
        metadata: document.metadata()?,
        pages: document.all_pages_info()?,
        bookmarks: document.toc()?.len(),
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_merge(config: &EditorConfig, inputs: &[PathBuf], output: &Path) -> Result<()> {
    for input in inputs {
        ensure_pdf_exists(input)?;
    }
    let document = DocumentHandle::with_config(config.clone());
    document.create_new()?;
    let added = document.merge_files(inputs, InsertPosition::End).context("failed to merge PDFs")?;
    save(&document, output)?;
    log::info!("merged {} files ({added} pages)", inputs.len());
    println!("{}", output.display());
    Ok(())
}

fn run_split(
    config: &EditorConfig,
    input: &Input,
    every: Option<usize>,
    ranges: Option<&str>,
    out_dir: Option<&Path>,
) -> Result<()> {
    let document = open(config, input)?;
    let stem = input.file.file_stem().and_then(|name| name.to_str()).unwrap_or("document");
    let out_dir = out_dir
        .map(Path::to_path_buf)
        .or_else(|| input.file.parent().map(Path::to_path_buf))
        .unwrap_or_default();

    if let Some(every) = every {
        let parts = document.split_by_count(every).context("failed to split PDF")?;
        let mut first = 1;
        for part in parts {
            let last = first + part.page_count()? - 1;
            let output = out_dir.join(format!("{stem}_pages_{first}-{last}.pdf"));
            save(&part, &output)?;
            println!("{}", output.display());
            first = last + 1;
        }
        return Ok(());
    }

    let ranges = parse_ranges(ranges.unwrap_or_default())?;
    let mut failed = 0;
    for (number, part) in document.split_by_ranges(&ranges)?.into_iter().enumerate() {
        let number = number + 1;
        match part {
            Ok(part) => {
                let output = out_dir.join(format!("{stem}_part_{number}.pdf"));
                save(&part, &output)?;
                println!("{}", output.display());
            }
            Err(err) => {
                eprintln!("range {number}: {err}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} ranges could not be split", ranges.len());
    }
    Ok(())
}

fn run_extract(config: &EditorConfig, input: &Input, pages: &str, output: &Path) -> Result<()> {
    let document = open(config, input)?;
    let indices = parse_pages(pages)?;
    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let count = document
        .extract_to_path(&indices, output, &WriteOptions::default())
        .context("failed to extract pages")?;
    println!("extracted {count} pages to {}", output.display());
    Ok(())
}

/// Parse `1,3-5` into 0-based indices, keeping the given order.
fn parse_pages(spec: &str) -> Result<Vec<usize>> {
    let mut pages = Vec::new();
    for (start, end) in parse_ranges(spec)? {
        pages.extend(start..=end);
    }
    Ok(pages)
}

/// Parse `1-3,7` into 0-based inclusive ranges. A reversed range is kept
/// as given so the document reports it.
fn parse_ranges(spec: &str) -> Result<Vec<(usize, usize)>> {
    let mut ranges = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let (start, end) = match part.split_once('-') {
            Some((start, end)) => (parse_page_number(start)?, parse_page_number(end)?),
            None => {
                let page = parse_page_number(part)?;
                (page, page)
            }
        };
        ranges.push((start - 1, end - 1));
    }
    if ranges.is_empty() {
        anyhow::bail!("no pages given");
    }
    Ok(ranges)
}

fn parse_page_number(value: &str) -> Result<usize> {
    let page: usize = value.trim().parse().with_context(|| format!("invalid page number {value:?}"))?;
    if page == 0 {
        anyhow::bail!("page numbers are 1-based");
    }
    Ok(page)
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pages() {
        assert_eq!(parse_pages("1,3-5").unwrap(), vec![0, 2, 3, 4]);
        assert_eq!(parse_pages(" 4 , 2 ").unwrap(), vec![3, 1]);
        assert!(parse_pages("0").is_err());
        assert!(parse_pages("x").is_err());
        assert!(parse_pages("").is_err());
    }

    #[test]
    fn test_parse_ranges_keeps_reversed_ranges() {
        assert_eq!(parse_ranges("1-5,6-10").unwrap(), vec![(0, 4), (5, 9)]);
        assert_eq!(parse_ranges("5-2").unwrap(), vec![(4, 1)]);
    }
}
