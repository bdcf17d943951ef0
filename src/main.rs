use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use zs::{CodecId, FileTransport, Query, Reader, Writer, WriterOptions};

#[derive(Parser)]
#[command(name = "zs", version = "1.0.0", about = "ZS: sorted, integrity-checked record container")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LengthPrefix {
    U64le,
    Uleb128,
}

#[derive(Parser)]
struct Framing {
    /// Decode/encode records as `<length><bytes>`, length in the given width.
    #[arg(long, value_enum, conflicts_with = "terminator")]
    length_prefixed: Option<LengthPrefix>,
    /// Decode/encode records separated by a single terminator byte (given as
    /// decimal, e.g. 10 for `\n`). Defaults to newline-terminated if neither
    /// `--length-prefixed` nor `--terminator` is given.
    #[arg(long)]
    terminator: Option<u8>,
}

impl Framing {
    fn read_records(&self, input: &mut dyn Read) -> io::Result<Vec<Vec<u8>>> {
        match self.length_prefixed {
            Some(LengthPrefix::U64le) => {
                let mut records = Vec::new();
                let mut reader = BufReader::new(input);
                loop {
                    let mut len_bytes = [0u8; 8];
                    match reader.read_exact(&mut len_bytes) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                        Err(e) => return Err(e),
                    }
                    let len = u64::from_le_bytes(len_bytes) as usize;
                    let mut buf = vec![0u8; len];
                    reader.read_exact(&mut buf)?;
                    records.push(buf);
                }
                Ok(records)
            }
            Some(LengthPrefix::Uleb128) => {
                let mut records = Vec::new();
                let mut reader = BufReader::new(input);
                loop {
                    let len = match zs::varint::read_uleb128(&mut reader) {
                        Ok(len) => len,
                        Err(_) => break,
                    };
                    let mut buf = vec![0u8; len as usize];
                    reader.read_exact(&mut buf)?;
                    records.push(buf);
                }
                Ok(records)
            }
            None => {
                let term = self.terminator.unwrap_or(b'\n');
                let mut records = Vec::new();
                for line in BufReader::new(input).split(term) {
                    records.push(line?);
                }
                Ok(records)
            }
        }
    }

    fn write_record(&self, out: &mut dyn Write, record: &[u8]) -> io::Result<()> {
        match self.length_prefixed {
            Some(LengthPrefix::U64le) => {
                out.write_all(&(record.len() as u64).to_le_bytes())?;
                out.write_all(record)
            }
            Some(LengthPrefix::Uleb128) => {
                zs::varint::write_uleb128(&mut *out, record.len() as u64)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                out.write_all(record)
            }
            None => {
                let term = self.terminator.unwrap_or(b'\n');
                out.write_all(record)?;
                out.write_all(&[term])
            }
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build a ZS file from a sorted stream of framed records on stdin.
    Make {
        #[arg(long, default_value = "lzma")]
        codec: String,
        #[arg(long, default_value_t = zs::config::DEFAULT_APPROX_BLOCK_SIZE)]
        approx_block_size: usize,
        /// Inline JSON object stored verbatim as the file's metadata blob.
        #[arg(long, default_value = "{}")]
        metadata: String,
        #[command(flatten)]
        framing: Framing,
        input: PathBuf,
        out: PathBuf,
    },
    /// Dump matching records from a ZS file to stdout, framed per --length-prefixed/--terminator.
    Dump {
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        stop: Option<String>,
        #[arg(long)]
        prefix: Option<String>,
        #[arg(short = 'j', long, default_value_t = 0)]
        workers: usize,
        #[command(flatten)]
        framing: Framing,
        file: PathBuf,
    },
    /// Print the file header as JSON.
    Info {
        /// Print only the metadata blob.
        #[arg(short = 'm', long)]
        metadata_only: bool,
        file: PathBuf,
    },
    /// Check every structural invariant of the file.
    Validate { file: PathBuf },
}

fn main() -> ExitCode {
    zs::config::init_tracing();
    match run(Cli::parse().command) {
        Ok(()) => ExitCode::from(0),
        Err(CliError::Usage(msg)) => {
            eprintln!("error: {msg}");
            ExitCode::from(1)
        }
        Err(CliError::Fault(msg)) => {
            eprintln!("error: {msg}");
            ExitCode::from(2)
        }
    }
}

enum CliError {
    /// Caller error: exit code 1.
    Usage(String),
    /// Corruption or I/O failure: exit code 2.
    Fault(String),
}

impl From<zs::Error> for CliError {
    fn from(e: zs::Error) -> Self {
        match e {
            zs::Error::BadUsage(msg) => CliError::Usage(msg),
            other => CliError::Fault(other.to_string()),
        }
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        CliError::Fault(e.to_string())
    }
}

fn run(cmd: Commands) -> Result<(), CliError> {
    match cmd {
        Commands::Make {
            codec,
            approx_block_size,
            metadata,
            framing,
            input,
            out,
        } => cmd_make(codec, approx_block_size, metadata, framing, input, out),
        Commands::Dump {
            start,
            stop,
            prefix,
            workers,
            framing,
            file,
        } => cmd_dump(start, stop, prefix, workers, framing, file),
        Commands::Info { metadata_only, file } => cmd_info(metadata_only, file),
        Commands::Validate { file } => cmd_validate(file),
    }
}

fn cmd_make(
    codec: String,
    approx_block_size: usize,
    metadata: String,
    framing: Framing,
    input: PathBuf,
    out: PathBuf,
) -> Result<(), CliError> {
    let codec_id = CodecId::from_name(&codec)
        .ok_or_else(|| CliError::Usage(format!("unknown codec '{codec}'")))?;
    let metadata: serde_json::Value = serde_json::from_str(&metadata)
        .map_err(|e| CliError::Usage(format!("--metadata is not valid JSON: {e}")))?;
    if !metadata.is_object() {
        return Err(CliError::Usage("--metadata must be a JSON object".into()));
    }

    let mut in_file: Box<dyn Read> = if input.as_os_str() == "-" {
        Box::new(io::stdin())
    } else {
        Box::new(File::open(&input)?)
    };
    let records = framing.read_records(&mut in_file)?;

    let out_file = File::create(&out)?;
    let opts = WriterOptions {
        codec: codec_id,
        approx_block_size,
        metadata,
        ..WriterOptions::default()
    };
    let mut writer = Writer::new(BufWriter::new(out_file), opts)?;
    for record in &records {
        writer.add_record(record)?;
    }
    writer.finish()?;
    eprintln!("wrote {} record(s) to {}", records.len(), out.display());
    Ok(())
}

fn cmd_dump(
    start: Option<String>,
    stop: Option<String>,
    prefix: Option<String>,
    workers: usize,
    framing: Framing,
    file: PathBuf,
) -> Result<(), CliError> {
    if let (Some(s), Some(e)) = (&start, &stop) {
        if s.as_bytes() > e.as_bytes() {
            return Err(CliError::Usage(format!(
                "--start {s:?} is greater than --stop {e:?}"
            )));
        }
    }
    let transport = FileTransport::open(&file)?;
    let reader = Reader::open(transport)?;
    let query = Query {
        start: start.map(String::into_bytes),
        stop: stop.map(String::into_bytes),
        prefix: prefix.map(String::into_bytes),
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for record in reader.search(query, workers)? {
        let record = record?;
        framing.write_record(&mut out, &record)?;
    }
    Ok(())
}

fn cmd_info(metadata_only: bool, file: PathBuf) -> Result<(), CliError> {
    let transport = FileTransport::open(&file)?;
    let reader = Reader::open(transport)?;
    let header = reader.header();

    if metadata_only {
        println!("{}", serde_json::to_string_pretty(&header.metadata).unwrap());
        return Ok(());
    }

    let summary = serde_json::json!({
        "root_index_offset": header.root_index_offset,
        "root_index_length": header.root_index_length,
        "total_file_length": header.total_file_length,
        "data_sha256": hex::encode(header.data_sha256),
        "codec": header.codec.name(),
        "metadata": header.metadata,
    });
    println!("{}", serde_json::to_string_pretty(&summary).unwrap());
    Ok(())
}

fn cmd_validate(file: PathBuf) -> Result<(), CliError> {
    let transport = FileTransport::open(&file)?;
    let report = zs::validate(&transport)?;
    println!(
        "OK: {} data block(s), {} index block(s)",
        report.data_blocks, report.index_blocks
    );
    Ok(())
}
