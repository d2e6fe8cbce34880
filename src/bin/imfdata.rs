use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use imfdata::{Query, storage};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "imfdata",
    version,
    about = "Discover and download IMF statistical data"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List datasets in the IMF catalog, optionally filtered.
    Datasets(DatasetsArgs),
    /// Show the key structure of a dataset.
    Dimensions(DimensionsArgs),
    /// Fetch data (and optionally save it and print stats).
    Get(GetArgs),
}

#[derive(Args, Debug)]
struct DatasetsArgs {
    /// Case-insensitive text to look for in dataset codes and names.
    #[arg(short, long)]
    filter: Option<String>,
}

#[derive(Args, Debug)]
struct DimensionsArgs {
    /// Dataset code (e.g., IFS, DOT, BOP)
    #[arg(short, long)]
    dataset: String,
    /// Also resolve and count each dimension's codes.
    #[arg(long, default_value_t = false)]
    codes: bool,
}

#[derive(ValueEnum, Clone, Debug)]
enum OutFormat {
    Csv,
    Json,
}

#[derive(Args, Debug)]
struct GetArgs {
    /// Dataset code (e.g., IFS, DOT, BOP)
    #[arg(short, long, default_value = "IFS")]
    dataset: String,
    /// Search terms separated by semicolon, matched against indicator codes and descriptions
    /// (omit to select every indicator)
    #[arg(short, long)]
    search: Option<String>,
    /// Country codes separated by comma or semicolon (e.g., US,DE)
    #[arg(short, long)]
    countries: Option<String>,
    /// Period code (A, Q or M). Defaults to the dataset's usual frequency.
    #[arg(short, long)]
    period: Option<String>,
    /// Start date; only the leading year (YYYY) is used.
    #[arg(long)]
    start: Option<String>,
    /// End date; only the leading year (YYYY) is used.
    #[arg(long)]
    end: Option<String>,
    /// Save results to file (format inferred by --format or extension).
    #[arg(long)]
    out: Option<PathBuf>,
    /// Output format (csv or json). If omitted, inferred from --out extension.
    #[arg(long, value_enum)]
    format: Option<OutFormat>,
    /// Print grouped statistics to stdout.
    #[arg(long, default_value_t = false)]
    stats: bool,
}

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(x) if x.is_finite() => {
            // Format up to 4 decimals, then trim trailing zeros and trailing dot.
            let s = format!("{:.4}", x);
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        }
        _ => "NA".to_string(),
    }
}

fn parse_list(s: &str, separators: &[char]) -> Vec<String> {
    s.split(separators)
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Datasets(args) => cmd_datasets(args),
        Command::Dimensions(args) => cmd_dimensions(args),
        Command::Get(args) => cmd_get(args),
    }
}

fn cmd_datasets(args: DatasetsArgs) -> Result<()> {
    let q = Query::builder("").build()?;
    let resolver = q.resolver();
    let datasets = match args.filter.as_deref() {
        Some(f) => resolver.list_datasets(f)?,
        None => resolver
            .catalog()
            .ok_or_else(|| anyhow::anyhow!("dataset catalog unavailable"))?,
    };
    for d in datasets {
        println!("{:<16} {}", d.code, d.name);
    }
    Ok(())
}

fn cmd_dimensions(args: DimensionsArgs) -> Result<()> {
    let q = Query::builder(&args.dataset).build()?;
    let resolver = q.resolver();
    let structure = resolver.list_dimensions(q.config())?;
    for d in &structure.dimensions {
        let role = if d.position == structure.indicator_position {
            " (indicator)"
        } else if Some(d.position) == structure.area_position {
            " (area)"
        } else if Some(d.position) == structure.frequency_position {
            " (frequency)"
        } else {
            ""
        };
        if args.codes {
            let n = resolver
                .list_codes(&structure, d.position)
                .map(|cl| cl.len().to_string())
                .unwrap_or_else(|| "unavailable".into());
            println!("{}  {}{}  codes={}", d.position, d.codelist, role, n);
        } else {
            println!("{}  {}{}", d.position, d.codelist, role);
        }
    }
    Ok(())
}

fn cmd_get(args: GetArgs) -> Result<()> {
    let mut builder = Query::builder(&args.dataset);
    if let Some(s) = &args.search {
        builder = builder.search_terms(parse_list(s, &[';']));
    }
    if let Some(c) = &args.countries {
        builder = builder.countries(parse_list(c, &[',', ';']));
    }
    if let Some(p) = &args.period {
        builder = builder.period(p);
    }
    if let Some(s) = &args.start {
        builder = builder.start_date(s);
    }
    if let Some(e) = &args.end {
        builder = builder.end_date(e);
    }
    let mut q = builder.build()?;
    let table = q.download_data()?;
    eprintln!(
        "Fetched {} rows x {} columns from {}",
        table.len(),
        table.column_count(),
        args.dataset
    );

    if let Some(path) = args.out.as_ref() {
        let fmt = match args.format {
            Some(OutFormat::Csv) => "csv",
            Some(OutFormat::Json) => "json",
            None => path.extension().and_then(|e| e.to_str()).unwrap_or("csv"),
        }
        .to_ascii_lowercase();
        match fmt.as_str() {
            "csv" => storage::save_table(table, path)?,
            "json" => std::fs::write(path, serde_json::to_string_pretty(&table.rows)?)?,
            other => anyhow::bail!("unsupported format: {}", other),
        }
        eprintln!("Saved {} rows to {}", table.len(), path.display());
    }

    if args.stats {
        for s in q.describe_data() {
            println!(
                "{} • {}  count={} missing={}  min={} max={} mean={} median={}",
                s.key.country,
                s.key.id,
                s.count,
                s.missing,
                fmt_opt(s.min),
                fmt_opt(s.max),
                fmt_opt(s.mean),
                fmt_opt(s.median)
            );
        }
    }

    Ok(())
}
