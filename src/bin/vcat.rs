//! A binary to stream any versatile source to standard output.
//!
//! ```shell
//! cargo run --release --bin=vcat --features=binaries https://example.com/annotations.tsv.gz
//! ```
//!
//! The source may be a local path or an `http(s)` URL, optionally
//! gzip-compressed; lines are printed as they are read, so remote files are
//! fetched incrementally rather than downloaded up front.

use std::io::Write as _;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use clap_verbosity_flag::Verbosity;
use tracing_log::AsTrace as _;
use tracing_subscriber::EnvFilter;
use versatilefile::TextStream;
use versatilefile::VersatileFile;
use versatilefile::net::Proxy;

/// Stream a local or remote, optionally gzip-compressed file to stdout.
#[derive(Parser)]
struct Args {
    /// The file path or http(s) URL to read.
    source: String,

    /// Print at most this many lines.
    #[arg(short = 'n', long)]
    lines: Option<usize>,

    /// Route remote requests through a proxy, given as `host:port`.
    #[arg(long)]
    proxy: Option<String>,

    /// Accept invalid TLS certificates (for internal servers with
    /// self-signed certificates).
    #[arg(long)]
    insecure: bool,

    #[command(flatten)]
    verbose: Verbosity,
}

/// Parses a `host:port` proxy argument.
fn parse_proxy(value: &str) -> Result<Proxy> {
    let (host, port) = value
        .rsplit_once(':')
        .context("the proxy must be given as `host:port`")?;

    let port = port
        .parse()
        .with_context(|| format!("parsing proxy port `{port}`"))?;

    Ok(Proxy::new(host, port))
}

/// Streams the source to stdout.
fn cat(args: &Args) -> Result<()> {
    let mut builder =
        VersatileFile::builder(&args.source).accept_invalid_certs(args.insecure);

    if let Some(proxy) = &args.proxy {
        builder = builder.proxy(parse_proxy(proxy)?);
    }

    let file = builder
        .build()
        .with_context(|| format!("constructing a reader for `{}`", args.source))?;

    if !file.exists() {
        bail!("`{}` does not exist", args.source);
    }

    let mut stream = TextStream::from_file(file)
        .with_context(|| format!("opening `{}`", args.source))?;

    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();
    let mut printed = 0;

    while let Some(line) = stream.read_line(true)? {
        writeln!(stdout, "{line}")?;
        printed += 1;

        if args.lines.is_some_and(|max| printed >= max) {
            break;
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    match std::env::var("RUST_LOG") {
        Ok(_) => tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init(),
        Err(_) => tracing_subscriber::fmt()
            .with_max_level(args.verbose.log_level_filter().as_trace())
            .init(),
    };

    cat(&args)
}
