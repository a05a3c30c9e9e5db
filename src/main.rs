//! Purpose: `recfile` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Commands emit one JSON value or JSON lines on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Logs go to stderr, filtered by `RUST_LOG` (default `warn`).
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod record_paths;
mod stress;

use recfile::api::{Durability, Error, ErrorKind, RecordFile, RecordFileOptions, to_exit_code};
use record_paths::default_stress_path;
use stress::{StressArgs, run_stress};

#[derive(Parser, Debug)]
#[command(
    name = "recfile",
    version,
    about = "Concurrent fixed-length record files",
    long_about = None,
    after_help = r#"EXAMPLES
  $ recfile write data.rec --record-len 3 abc def
  $ recfile dump data.rec --record-len 3
  $ recfile stress --record-len 3 --writers 3 --readers 2 --count 100000"#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append one record per DATA argument
    Write(WriteCmd),
    /// Print every written record as JSON lines
    Dump(DumpCmd),
    /// Hammer one file with concurrent writers and readers, then verify sequences
    Stress(StressCmd),
}

#[derive(Args, Debug)]
struct WriteCmd {
    path: PathBuf,
    #[arg(long, help = "Fixed record length in bytes")]
    record_len: u32,
    #[arg(long, help = "Keep existing records and append after them")]
    append: bool,
    #[arg(long, help = "Decode each DATA argument as hex")]
    hex: bool,
    #[arg(long, value_enum, default_value = "fast")]
    durability: DurabilityArg,
    #[arg(required = true)]
    data: Vec<String>,
}

#[derive(Args, Debug)]
struct DumpCmd {
    path: PathBuf,
    #[arg(long, help = "Fixed record length in bytes")]
    record_len: u32,
}

#[derive(Args, Debug)]
struct StressCmd {
    #[arg(long, help = "Record file to use (default: a file in the temp directory)")]
    path: Option<PathBuf>,
    #[arg(long, default_value_t = 3)]
    record_len: u32,
    #[arg(long, default_value_t = 3)]
    writers: usize,
    #[arg(long, default_value_t = 2)]
    readers: usize,
    #[arg(long, default_value_t = 100_000, help = "Records per thread")]
    count: u64,
    #[arg(long, value_enum, default_value = "fast")]
    durability: DurabilityArg,
    #[arg(long, default_value_t = 10_000, help = "Give up on a read after this many ms")]
    read_timeout_ms: u64,
    #[arg(long, help = "Keep the record file after the run")]
    keep: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum DurabilityArg {
    Fast,
    Flush,
}

impl From<DurabilityArg> for Durability {
    fn from(value: DurabilityArg) -> Self {
        match value {
            DurabilityArg::Fast => Durability::Fast,
            DurabilityArg::Flush => Durability::Flush,
        }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let code = if err.kind() == ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                {
                    2
                } else {
                    0
                };
                return Ok(code);
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `recfile --help`."));
            }
        },
    };

    match cli.command {
        Command::Write(cmd) => run_write(cmd)?,
        Command::Dump(cmd) => run_dump(cmd)?,
        Command::Stress(cmd) => {
            let args = StressArgs {
                path: cmd.path.unwrap_or_else(default_stress_path),
                record_len: cmd.record_len,
                writers: cmd.writers,
                readers: cmd.readers,
                count: cmd.count,
                durability: cmd.durability.into(),
                read_timeout: Duration::from_millis(cmd.read_timeout_ms),
                keep: cmd.keep,
            };
            let report = run_stress(&args)?;
            emit_json(&serde_json::to_value(&report).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("encode stress report")
                    .with_source(err)
            })?);
        }
    }
    Ok(0)
}

fn run_write(cmd: WriteCmd) -> Result<(), Error> {
    let payloads = cmd
        .data
        .iter()
        .map(|arg| {
            if cmd.hex {
                decode_hex(arg)
            } else {
                Ok(arg.as_bytes().to_vec())
            }
        })
        .collect::<Result<Vec<_>, Error>>()?;

    let options = RecordFileOptions::new(cmd.record_len)
        .truncate(!cmd.append)
        .durability(cmd.durability.into());
    let file = RecordFile::open_with(&cmd.path, options)?;
    for payload in &payloads {
        let seq = file.write(payload)?;
        let stored = payload.len().min(cmd.record_len as usize);
        emit_json(&json!({ "seq": seq, "len": stored, "truncated": payload.len() > stored }));
    }
    file.close()
}

fn run_dump(cmd: DumpCmd) -> Result<(), Error> {
    if !cmd.path.is_file() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("record file does not exist")
            .with_path(&cmd.path));
    }
    let options = RecordFileOptions::new(cmd.record_len).truncate(false);
    let file = RecordFile::open_with(&cmd.path, options)?;
    let published = file.published_seq()?;
    while file.current_read_seq() < published {
        let record = file.read_timeout(Duration::ZERO)?;
        emit_json(&json!({ "seq": record.seq, "hex": encode_hex(&record.data) }));
    }
    file.close()
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn emit_json(value: &Value) {
    let json = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("error: {}", error_message(err));
        if let Some(hint) = err.hint() {
            eprintln!("hint: {hint}");
        }
        for cause in error_causes(err) {
            eprintln!("caused by: {cause}");
        }
        return;
    }

    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::Busy => "record file is busy".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Closed => "record file is closed".to_string(),
        ErrorKind::TimedOut => "timed out".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(seq) = err.seq() {
        inner.insert("seq".to_string(), json!(seq));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.trim_start_matches("error: ").to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

fn decode_hex(input: &str) -> Result<Vec<u8>, Error> {
    let invalid = || {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid hex data: {input:?}"))
            .with_hint("Hex data needs an even number of 0-9a-f digits.")
    };
    if input.len() % 2 != 0 {
        return Err(invalid());
    }
    (0..input.len())
        .step_by(2)
        .map(|i| {
            input
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(invalid)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{Cli, decode_hex, encode_hex, error_json};
    use clap::CommandFactory;
    use recfile::api::{Error, ErrorKind};

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn hex_round_trips() {
        let bytes = decode_hex("00ff7a").expect("decode");
        assert_eq!(bytes, vec![0x00, 0xff, 0x7a]);
        assert_eq!(encode_hex(&bytes), "00ff7a");
    }

    #[test]
    fn bad_hex_is_usage_error() {
        assert_eq!(decode_hex("abc").expect_err("odd").kind(), ErrorKind::Usage);
        assert_eq!(decode_hex("zz").expect_err("digit").kind(), ErrorKind::Usage);
    }

    #[test]
    fn error_json_carries_context() {
        let err = Error::new(ErrorKind::TimedOut)
            .with_message("record not published before deadline")
            .with_seq(4);
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "TimedOut");
        assert_eq!(value["error"]["seq"], 4);
        assert!(value["error"].get("path").is_none());
    }
}
